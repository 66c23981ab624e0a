mod dir_engine;
mod namespace;
mod node_cache;

pub use dir_engine::*;
pub use namespace::*;
pub use node_cache::*;

#[cfg(test)]
mod dir_engine_tests;

mod block_reader;
mod block_writer;
mod file_engine;
mod file_meta_cache;

pub use block_reader::*;
pub use block_writer::block_name;
pub use file_engine::*;
pub use file_meta_cache::*;

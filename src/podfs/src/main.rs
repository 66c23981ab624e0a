mod podfs_cli;

use log::error;
use std::env;

use crate::podfs_cli::{parse_args, run_podfs};

fn main() {
    env_logger::init();
    let args = env::args().skip(1).collect::<Vec<String>>();
    let options = match parse_args(&args) {
        Ok(v) => v,
        Err(msg) => {
            eprintln!("{}", msg);
            std::process::exit(1);
        }
    };

    if let Err(err) = run_podfs(options) {
        error!("podfs failed: {}", err);
        eprintln!("{}", err);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod podfs_cli_tests;

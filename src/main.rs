// Allow dead code for items that are part of the public API but only used in tests
#![allow(dead_code)]

mod cmd;
mod engine;
mod expr;
mod index;
mod query;
mod record;
mod warnings;

use clap::Parser;
use cmd::Cli;

fn main() {
    let cli = Cli::parse();

    if let Err(e) = cmd::run(cli) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

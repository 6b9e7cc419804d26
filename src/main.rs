use std::process::ExitCode;

use clap::Parser;

use awfel::cli::{self, Cli};

fn main() -> ExitCode {
    let cli = Cli::parse();
    match cli::run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("\x1b[31m[FAIL]\x1b[0m {err}");
            ExitCode::FAILURE
        }
    }
}

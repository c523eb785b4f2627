use std::io::{self, Write};
use std::process::ExitCode;

fn main() -> ExitCode {
    match dockyardd::run_daemon() {
        Ok(_) => ExitCode::SUCCESS,
        Err(error) if error.is_interrupted() => ExitCode::SUCCESS,
        Err(error) => {
            let _ = writeln!(io::stderr(), "dockyardd: {error}");
            ExitCode::FAILURE
        }
    }
}

//! Campus DM server binary.
//! Run with: cargo run --bin campus-dm-server

use std::process::ExitCode;

use campus_dm::startup;

fn main() -> ExitCode {
    startup::run()
}

use std::process::ExitCode;

fn main() -> ExitCode {
    slideboard_cli::run()
}

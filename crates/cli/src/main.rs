use std::process::ExitCode;

fn main() -> ExitCode {
    catalink_cli::run()
}

use std::process::ExitCode;

fn main() -> ExitCode {
    betweenus_cli::run()
}

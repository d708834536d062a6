use hpcannex::commands::{run_cli, CliFailure};
use hpcannex::signals;

fn main() {
    signals::install();
    let args: Vec<String> = std::env::args().skip(1).collect();
    match run_cli(args) {
        Ok(output) => println!("{output}"),
        Err(CliFailure { message, code }) => {
            eprintln!("{message}");
            std::process::exit(code);
        }
    }
}

use clap::Parser;
use shipit::{cli::Cli, output::Output};

fn main() {
    let cli = Cli::parse();
    let output = Output::new(cli.is_verbose());
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(output.log_target())
        .init();

    if let Err(error) = cli.run(&output) {
        // Quiet runs only show what happened once something went wrong.
        let _ = output.flush_to(&mut std::io::stderr());

        const BOLD_RED: &str = "\x1b[1;31m";
        const BOLD: &str = "\x1b[1m";
        const RESET: &str = "\x1b[0m";
        eprintln!("{BOLD_RED}error{RESET}{BOLD}:{RESET} {error}");
        std::process::exit(1);
    }
}

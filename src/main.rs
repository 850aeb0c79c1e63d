//! gara-synth CLI: typed AWS infrastructure for Gara.

use clap::Parser;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "gara-synth",
    version,
    about = "Synthesize the Gara AWS stack into a CloudFormation template"
)]
struct Cli {
    #[command(subcommand)]
    command: gara_synth::cli::Commands,

    /// Log construct and synthesis progress to stderr
    #[arg(short, long, global = true)]
    verbose: bool,
}

fn main() {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if cli.verbose { "info" } else { "warn" }));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = gara_synth::cli::dispatch(cli.command) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}

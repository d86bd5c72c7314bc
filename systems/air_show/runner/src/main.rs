//! Show runner binary
use clap::Parser;
use halo::components::prelude::*;

/// Arguments required for starting the program from the command line.
#[derive(Parser, Debug)]
struct Args {
    /// Path to the config file for the show runner component.
    #[arg(short, long)]
    filepath: String,
    /// Path to the show file to fly.
    #[arg(short, long)]
    show: String,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().init();
    let args = Args::parse();
    let component = ShowRunner::from_config_file(args.filepath);
    if let Err(error) = ShowRunnerController::start(component, args.show).await {
        tracing::error!(%error, "show did not start");
        std::process::exit(1);
    }
}

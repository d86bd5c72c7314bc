//! Preflight check binary: validates a show file without a vehicle.
use clap::Parser;
use halo::messages::show::descriptor::{LightingProgram, ShowDescriptor};

/// Arguments required for starting the program from the command line.
#[derive(Parser, Debug)]
struct Args {
    /// Path to the show file to check.
    #[arg(short, long)]
    show: String,
}

fn main() {
    let args = Args::parse();
    match ShowDescriptor::from_file(&args.show) {
        Ok(show) => {
            println!("show '{}' is flyable", show.name);
            println!("  waypoints: {}", show.waypoints.len());
            match &show.lighting {
                LightingProgram::Sequence(events) => {
                    let duration = events.last().map_or(0, |event| event.timestamp);
                    println!("  lighting: {} timeline entries over {duration}ms", events.len());
                }
                LightingProgram::Interpolation(curve) => {
                    println!(
                        "  lighting: {} keyframes over {}ms, sampled every {}ms",
                        curve.keyframes.len(),
                        curve.duration_ms(),
                        curve.tick_interval_ms
                    );
                }
            }
        }
        Err(error) => {
            eprintln!("show file rejected: {error}");
            std::process::exit(1);
        }
    }
}

//! Dreamer Examples
//!
//! # Point Mass (NdArray, CPU)
//!
//! ```bash
//! # Continuous force actions
//! cargo run --release -- point-mass
//!
//! # Five discrete moves, with a JSON configuration file
//! cargo run --release -- point-mass-discrete dreamer.json
//! ```
//!
//! Log verbosity follows `RUST_LOG` (default `info`).

mod dreamer_point_mass;
mod point_mass;
mod replay;

use tracing_subscriber::EnvFilter;

use dreamer_rl::ActionSpace;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args: Vec<String> = std::env::args().collect();
    let config_path = args.get(2).map(String::as_str);

    let result = match args.get(1).map(String::as_str) {
        Some("point-mass") => dreamer_point_mass::run(ActionSpace::Continuous(2), config_path),
        Some("point-mass-discrete") => dreamer_point_mass::run(ActionSpace::Discrete(5), config_path),
        Some(other) => {
            println!("Unknown demo: {}", other);
            println!();
            print_usage();
            Ok(())
        }
        None => {
            print_usage();
            Ok(())
        }
    };

    if let Err(err) = result {
        tracing::error!(%err, "demo failed");
        std::process::exit(1);
    }
}

fn print_usage() {
    println!("Usage: demos <demo> [config.json]");
    println!();
    println!("Demos:");
    println!("  point-mass            Continuous 2-D force on a point mass");
    println!("  point-mass-discrete   Five discrete moves on a point mass");
}

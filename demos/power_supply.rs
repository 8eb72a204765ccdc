// Send one command to the bench power supply
//
// Setpoint and output commands (VSET, ISET, OUT, BEEP) are written without
// waiting for a reply; everything else is sent as a query and the reply is
// printed.

use clap::Parser;
use logic_bench::{BenchConfig, CommandKind, PowerSupply};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "power_supply")]
#[command(version = "0.1")]
#[command(about = "Send a single command to the bench power supply")]
struct Args {
    /// Command to send, e.g. `*IDN?`, `VSET1:3.30` or `OUTCH1:1`
    command: String,

    /// Serial device of the supply, overrides bench.toml
    #[arg(short, long)]
    port: Option<PathBuf>,

    /// Configuration file
    #[arg(short, long, default_value = logic_bench::config::CONFIG_FILE)]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    if args.verbose {
        env_logger::Builder::from_default_env()
            .filter_level(log::LevelFilter::Debug)
            .init();
    } else {
        env_logger::init();
    }

    let mut config = if args.config.exists() {
        BenchConfig::read(&args.config)?
    } else {
        BenchConfig::default()
    };
    if let Some(port) = args.port {
        config.power_supply.port = port;
    }

    let mut supply = PowerSupply::open(&config.power_supply)?;
    match CommandKind::classify(&args.command) {
        CommandKind::WriteOnly => supply.send(&args.command)?,
        CommandKind::Query => println!("{}", supply.query(&args.command)?),
    }

    Ok(())
}

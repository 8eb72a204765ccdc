// Verify an exported capture artifact
//
// Without --expect the artifact is checked as a raw edge train. With
// --expect the listed values must appear, in order, in the chosen column
// of a decoded-frame export.

use clap::{Parser, ValueEnum};
use logic_bench::{
    verify_edge_transitions, verify_frame_sequence, BenchConfig, ExportArtifact,
    FrameExpectations, FrameField,
};
use std::path::PathBuf;
use std::process;

#[derive(Clone, Copy, ValueEnum)]
enum Field {
    Data,
    Address,
    Mosi,
    Miso,
    State,
}

impl From<Field> for FrameField {
    fn from(field: Field) -> Self {
        match field {
            Field::Data => FrameField::Data,
            Field::Address => FrameField::Address,
            Field::Mosi => FrameField::Mosi,
            Field::Miso => FrameField::Miso,
            Field::State => FrameField::State,
        }
    }
}

#[derive(Parser)]
#[command(name = "verify_capture")]
#[command(version = "0.1")]
#[command(about = "Check an exported capture against the expected DUT behaviour")]
struct Args {
    /// Artifact file name inside the output directory
    #[arg(long, default_value = "digital.csv")]
    capture_file: String,

    /// Output directory, defaults to output_dir from bench.toml
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Check the `Channel <n>` column instead of the first level column
    #[arg(long)]
    channel: Option<u8>,

    /// Exclusive upper bound on transitions, 0 disables it
    #[arg(long)]
    max_transitions: Option<usize>,

    /// Column the expected values are compared against
    #[arg(long, value_enum, default_value_t = Field::Data)]
    field: Field,

    /// Expected values in frame order, e.g. `0x0F,0x01,0x17`
    #[arg(long, value_delimiter = ',')]
    expect: Vec<String>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let mut config = BenchConfig::read_or_default()?;
    if let Some(max) = args.max_transitions {
        config.verify.max_transitions = max;
    }
    let dir = args.output_dir.unwrap_or(config.output_dir);

    let artifact = ExportArtifact::load(dir.join(&args.capture_file))?;
    println!("Checking {}", artifact.path().display());

    let result = if args.expect.is_empty() {
        verify_edge_transitions(artifact.table(), &config.verify.edge_policy(args.channel))
    } else {
        let expectations = FrameExpectations::sequence(args.field.into(), args.expect);
        verify_frame_sequence(artifact.table(), &expectations)
    };

    if let Err(err) = result.into_result() {
        eprintln!("{err}");
        process::exit(1);
    }
    println!("PASS");
    Ok(())
}

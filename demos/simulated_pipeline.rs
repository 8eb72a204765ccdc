// Run the whole capture pipeline against the simulated capture device
//
// Captures a GPIO toggle train, a TMP117 device-id read over I2C and a
// BMP280 chip-id read over SPI, exports each one and verifies it. No
// hardware is needed.

use clap::Parser;
use logic_bench::{
    verify_edge_transitions, verify_frame_sequence, AnalyzerBinding, AnalyzerKind, BenchConfig,
    CaptureManager, ClockPhase, ClockPolarity, DecodedFrame, DigitalTrace, Direction,
    FrameExpectations, FrameField, Radix, SimulatedLogic, VerificationResult,
};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "simulated_pipeline")]
#[command(version = "0.1")]
#[command(about = "Capture, export and verify against the simulated capture device")]
struct Args {
    /// Where artifacts are written, defaults to output_dir from bench.toml
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Simulated capture duration in milliseconds
    #[arg(short, long, default_value_t = 200)]
    duration: u64,

    /// Number of edges on the simulated GPIO pin
    #[arg(short, long, default_value_t = 6)]
    edges: usize,
}

fn i2c_frames() -> Vec<DecodedFrame> {
    [(0x90, 0x0F, Direction::Write), (0x91, 0x01, Direction::Read), (0x91, 0x17, Direction::Read)]
        .into_iter()
        .enumerate()
        .map(|(i, (address, data, direction))| DecodedFrame::I2c {
            time_s: 0.001 * (i + 1) as f64,
            packet_id: u32::from(i > 0),
            address,
            data,
            direction,
            ack: i < 2,
        })
        .collect()
}

fn spi_frames() -> Vec<DecodedFrame> {
    vec![
        DecodedFrame::Spi {
            time_s: 0.001,
            packet_id: 0,
            mosi: 0xD0,
            miso: 0xFF,
        },
        DecodedFrame::Spi {
            time_s: 0.002,
            packet_id: 0,
            mosi: 0xFF,
            miso: 0x58,
        },
    ]
}

fn report(name: &str, result: &VerificationResult) -> bool {
    println!("{name:>5}: {result}");
    result.passed()
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let mut config = BenchConfig::read_or_default()?;
    config.capture.duration_seconds = Duration::from_millis(args.duration).as_secs_f64();
    let output_dir = args.output_dir.unwrap_or(config.output_dir);

    let backend = SimulatedLogic::new(DigitalTrace::toggle_train(0, false, 0.5, args.edges))
        .with_frames(AnalyzerKind::I2c, i2c_frames())
        .with_frames(AnalyzerKind::Spi, spi_frames());
    let mut manager =
        CaptureManager::new(backend).with_grace_period(config.capture.grace_period());

    println!("Logic Bench Simulated Pipeline");
    println!("==============================\n");

    let gpio = manager.run(config.capture.request([0]), |running| {
        log::info!("Stimulus: OUTCH1:1 (simulated)");
        let mut completed = running.wait()?;
        completed.export_raw(&BTreeSet::from([0]), &output_dir)
    })?;
    let gpio_ok = report(
        "GPIO",
        &verify_edge_transitions(gpio.table(), &config.verify.edge_policy(None)),
    );

    let i2c = manager.run(config.capture.request([1, 2]), |running| {
        let mut completed = running.wait()?;
        let analyzer = completed.attach(&AnalyzerBinding::i2c("I2C", 1, 2))?;
        completed.export_decoded(&analyzer, &output_dir.join("i2c.csv"), Radix::Hexadecimal)
    })?;
    let i2c_ok = report(
        "I2C",
        &verify_frame_sequence(
            i2c.table(),
            &FrameExpectations::sequence(FrameField::Data, ["0x0F", "0x01", "0x17"]),
        ),
    );

    let spi = manager.run(config.capture.request([5, 6, 4, 7]), |running| {
        let mut completed = running.wait()?;
        let binding = AnalyzerBinding::spi("SPI")
            .mosi(5)
            .miso(6)
            .clock(4)
            .enable(7)
            .mode(ClockPolarity::IdleHigh, ClockPhase::TrailingEdge)
            .build();
        let analyzer = completed.attach(&binding)?;
        completed.export_decoded(&analyzer, &output_dir.join("spi.csv"), Radix::Hexadecimal)
    })?;
    let spi_ok = report(
        "SPI",
        &verify_frame_sequence(
            spi.table(),
            &FrameExpectations::new()
                .at(0, FrameField::Mosi, "0xD0")
                .at(1, FrameField::Miso, "0x58"),
        ),
    );

    println!("\nArtifacts written to {}", output_dir.display());
    if !(gpio_ok && i2c_ok && spi_ok) {
        std::process::exit(1);
    }
    Ok(())
}

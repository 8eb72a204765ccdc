//! # logic-bench
//!
//! A hardware-in-the-loop harness for firmware running on a device under test
//! (DUT). It switches the DUT's bench power supply, records its bus activity
//! with a logic analyzer, decodes the traffic with the analyzer's protocol
//! decoders and checks the decoded data against what the firmware should do.
//!
//! ## Features
//!
//! - **Power supply control**: ASCII commands over a serial port with a settle delay after every command
//! - **Capture lifecycle**: typestate sessions that can't be waited on before they run, with a bounded wait
//! - **Guaranteed release**: a capture is closed exactly once, whichever way the scope is left
//! - **Analyzer bindings**: typed GPIO, I2C and SPI bindings with validated pins and options
//! - **CSV artifacts**: raw samples and decoded frames written and read back through `polars`
//! - **Verification**: edge-transition and frame-sequence checks over exported artifacts
//! - **Simulated device**: the whole pipeline runs without hardware for tests and demos
//!
//! ## Examples
//!
//! ### Capture, export and verify an edge train
//!
//! ```rust,no_run
//! use logic_bench::{
//!     verify_edge_transitions, CaptureManager, CaptureRequest, DigitalTrace, EdgePolicy,
//!     SimulatedLogic,
//! };
//! use std::collections::BTreeSet;
//! use std::path::Path;
//! use std::time::Duration;
//!
//! let backend = SimulatedLogic::new(DigitalTrace::toggle_train(0, false, 0.1, 4));
//! let mut manager = CaptureManager::new(backend);
//!
//! let request = CaptureRequest::new([0], 10_000_000, 3.3, Duration::from_millis(100));
//! let artifact = manager.run(request, |running| {
//!     let mut completed = running.wait()?;
//!     completed.export_raw(&BTreeSet::from([0]), Path::new("output"))
//! })?;
//!
//! verify_edge_transitions(artifact.table(), &EdgePolicy::default()).into_result()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ### Power supply
//!
//! ```rust,no_run
//! use logic_bench::{BenchConfig, PowerSupply};
//! use std::time::Duration;
//!
//! let config = BenchConfig::read_or_default()?;
//! let mut supply = PowerSupply::open(&config.power_supply)?;
//!
//! println!("{}", supply.identify()?);
//! supply.set_voltage(1, 3.3)?;
//! supply.power_cycle(1, Duration::from_millis(500))?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ### Checking decoded I2C frames
//!
//! ```rust
//! use logic_bench::{verify_frame_sequence, ExportTable, FrameExpectations, FrameField};
//!
//! let table = ExportTable::parse_csv(
//!     b"Time [s],Packet ID,Address,Data,Read/Write,ACK/NAK\n\
//!       0.1,0,0x90,0x0F,Write,ACK\n\
//!       0.2,1,0x91,0x01,Read,ACK\n\
//!       0.3,1,0x91,0x17,Read,NAK\n",
//! )?;
//!
//! let device_id = FrameExpectations::sequence(FrameField::Data, ["0x0F", "0x01", "0x17"]);
//! assert!(verify_frame_sequence(&table, &device_id).passed());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod analyzer;
pub mod capture;
pub mod config;
pub mod error;
pub mod export;
pub mod power_supply;
pub mod simulated;
pub mod verify;

// Re-export the main types for convenience
pub use analyzer::{
    AnalyzerBinding, AnalyzerHandle, AnalyzerId, AnalyzerKind, BitOrder, ClockPhase,
    ClockPolarity, EnablePolarity, SpiBindingBuilder,
};

pub use capture::{
    CaptureBackend, CaptureId, CaptureManager, CaptureRequest, CaptureState, CompletedCapture,
    ConfiguredCapture, RunningCapture,
};

pub use config::{BenchConfig, CaptureDefaults, PowerSupplyConfig, VerifyConfig};

pub use error::{HarnessError, Result};

pub use export::{
    DecodedFrame, DigitalTrace, Direction, ExportArtifact, ExportTable, Radix,
};

pub use power_supply::{CommandKind, PowerSupply, PowerSupplySettings};

pub use simulated::{Completion, SimulatedLogic};

pub use verify::{
    verify_edge_transitions, verify_frame_sequence, EdgePolicy, FrameExpectations, FrameField,
    VerificationResult,
};

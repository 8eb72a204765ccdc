use logic_bench::{
    verify_edge_transitions, verify_frame_sequence, AnalyzerBinding, AnalyzerKind, CaptureManager,
    CaptureRequest, CaptureState, ClockPhase, ClockPolarity, DecodedFrame, DigitalTrace,
    Direction, EdgePolicy, ExportArtifact, FrameExpectations, FrameField, HarnessError, Radix,
    SimulatedLogic,
};
use std::collections::BTreeSet;
use std::time::Duration;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn request(channels: &[u8]) -> CaptureRequest {
    CaptureRequest::new(
        channels.iter().copied(),
        10_000_000,
        3.3,
        Duration::from_millis(5),
    )
}

fn manager(backend: SimulatedLogic) -> CaptureManager<SimulatedLogic> {
    CaptureManager::new(backend)
        .with_grace_period(Duration::from_secs(1))
        .with_poll_interval(Duration::from_millis(1))
}

/// TMP117 device id read: register pointer write, then two data bytes
fn tmp117_frames() -> Vec<DecodedFrame> {
    vec![
        DecodedFrame::I2c {
            time_s: 0.010,
            packet_id: 0,
            address: 0x90,
            data: 0x0F,
            direction: Direction::Write,
            ack: true,
        },
        DecodedFrame::I2c {
            time_s: 0.011,
            packet_id: 1,
            address: 0x91,
            data: 0x01,
            direction: Direction::Read,
            ack: true,
        },
        DecodedFrame::I2c {
            time_s: 0.012,
            packet_id: 1,
            address: 0x91,
            data: 0x17,
            direction: Direction::Read,
            ack: false,
        },
    ]
}

/// BMP280 chip id read
fn bmp280_frames() -> Vec<DecodedFrame> {
    vec![
        DecodedFrame::Spi {
            time_s: 0.020,
            packet_id: 0,
            mosi: 0xD0,
            miso: 0xFF,
        },
        DecodedFrame::Spi {
            time_s: 0.021,
            packet_id: 0,
            mosi: 0xFF,
            miso: 0x58,
        },
    ]
}

#[test]
fn gpio_toggle_capture_passes_edge_check() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let mut manager = manager(SimulatedLogic::new(DigitalTrace::toggle_train(
        0, false, 0.25, 4,
    )));

    let artifact = manager
        .run(request(&[0]), |running| {
            let mut completed = running.wait()?;
            completed.export_raw(&BTreeSet::from([0]), dir.path())
        })
        .unwrap();

    assert_eq!(manager.state(), CaptureState::Released);
    assert_eq!(artifact.path(), dir.path().join("digital.csv"));

    let loaded = ExportArtifact::load(artifact.path()).unwrap();
    assert_eq!(loaded.table().header(), &["Time [s]", "Channel 0"]);
    assert_eq!(loaded.table().len(), 6);

    let result = verify_edge_transitions(loaded.table(), &EdgePolicy::default());
    assert!(result.passed(), "{result}");
    assert_eq!(result.rows().len(), 6);
}

#[test]
fn stuck_pin_fails_edge_check() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let mut trace = DigitalTrace::new([0]);
    for row in 0..5 {
        trace.push(f64::from(row) * 0.1, &[true]);
    }
    let mut manager = manager(SimulatedLogic::new(trace));

    let artifact = manager
        .run(request(&[0]), |running| {
            running
                .wait()?
                .export_raw(&BTreeSet::from([0]), dir.path())
        })
        .unwrap();

    let err = verify_edge_transitions(artifact.table(), &EdgePolicy::default())
        .into_result()
        .unwrap_err();
    assert!(err.is_verification_failure());
}

#[test]
fn gpio_analyzer_export() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let mut manager = manager(SimulatedLogic::new(DigitalTrace::toggle_train(
        0, true, 0.5, 3,
    )));
    let path = dir.path().join("gpio.csv");

    let artifact = manager
        .run(request(&[0]), |running| {
            let mut completed = running.wait()?;
            let edges = completed.attach(&AnalyzerBinding::gpio("Edges", 0))?;
            completed.export_decoded(&edges, &path, Radix::Hexadecimal)
        })
        .unwrap();

    let table = ExportArtifact::load(artifact.path()).unwrap().into_table();
    assert_eq!(table.header(), &["Time [s]", "State"]);
    let states: Vec<&str> = table.rows().iter().map(|row| row[1].as_str()).collect();
    assert_eq!(states, vec!["0", "1", "0"]);
}

#[test]
fn i2c_device_id_is_decoded_and_verified() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let backend = SimulatedLogic::new(DigitalTrace::new([1, 2]))
        .with_frames(AnalyzerKind::I2c, tmp117_frames());
    let mut manager = manager(backend);
    let path = dir.path().join("i2c").join("tmp117.csv");

    let artifact = manager
        .run(request(&[1, 2]), |running| {
            let mut completed = running.wait()?;
            let i2c = completed.attach(&AnalyzerBinding::i2c("I2C", 1, 2))?;
            completed.export_decoded(&i2c, &path, Radix::Hexadecimal)
        })
        .unwrap();

    let table = ExportArtifact::load(artifact.path()).unwrap().into_table();
    assert_eq!(table.rows()[0][1], "0");
    assert_eq!(table.rows()[0][2], "0x90");
    assert_eq!(table.rows()[2][5], "NAK");

    let device_id = FrameExpectations::sequence(FrameField::Data, ["0x0F", "0x01", "0x17"]);
    verify_frame_sequence(&table, &device_id)
        .into_result()
        .unwrap();
}

#[test]
fn decimal_radix_changes_byte_columns_only() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let backend = SimulatedLogic::new(DigitalTrace::new([1, 2]))
        .with_frames(AnalyzerKind::I2c, tmp117_frames());
    let mut manager = manager(backend);
    let path = dir.path().join("tmp117-dec.csv");

    let artifact = manager
        .run(request(&[1, 2]), |running| {
            let mut completed = running.wait()?;
            let i2c = completed.attach(&AnalyzerBinding::i2c("I2C", 1, 2))?;
            completed.export_decoded(&i2c, &path, Radix::Decimal)
        })
        .unwrap();

    let row = &artifact.table().rows()[2];
    assert_eq!(row, &["0.012000000", "1", "145", "23", "Read", "NAK"]);

    let hex_expectation = FrameExpectations::sequence(FrameField::Data, ["0x0F"]);
    assert!(!verify_frame_sequence(artifact.table(), &hex_expectation).passed());
}

#[test]
fn spi_chip_id_is_decoded_and_verified() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let backend = SimulatedLogic::new(DigitalTrace::new([4, 5, 6, 7]))
        .with_frames(AnalyzerKind::Spi, bmp280_frames());
    let mut manager = manager(backend);
    let path = dir.path().join("spi.csv");

    let artifact = manager
        .run(request(&[5, 6, 4, 7]), |running| {
            let mut completed = running.wait()?;
            let binding = AnalyzerBinding::spi("SPI")
                .mosi(5)
                .miso(6)
                .clock(4)
                .enable(7)
                .mode(ClockPolarity::IdleHigh, ClockPhase::TrailingEdge)
                .build();
            let spi = completed.attach(&binding)?;
            completed.export_decoded(&spi, &path, Radix::Hexadecimal)
        })
        .unwrap();

    let table = ExportArtifact::load(artifact.path()).unwrap().into_table();
    assert_eq!(table.header(), &["Time [s]", "Packet ID", "MOSI", "MISO"]);

    let chip_id = FrameExpectations::new()
        .at(0, FrameField::Mosi, "0xD0")
        .at(1, FrameField::Miso, "0x58");
    verify_frame_sequence(&table, &chip_id).into_result().unwrap();
}

#[test]
fn export_round_trip_keeps_rows() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let mut trace = DigitalTrace::new([0, 1, 2]);
    trace.push(0.0, &[false, true, false]);
    trace.push(0.000_000_1, &[true, true, false]);
    trace.push(1.5, &[true, false, true]);
    let mut manager = manager(SimulatedLogic::new(trace));

    let written = manager
        .run(request(&[0, 1, 2]), |running| {
            running
                .wait()?
                .export_raw(&BTreeSet::from([0, 2]), dir.path())
        })
        .unwrap();
    let loaded = ExportArtifact::load(written.path()).unwrap();

    assert_eq!(loaded.table(), written.table());
    assert_eq!(
        loaded.table().rows()[1],
        vec!["0.000000100", "1", "0"]
    );
}

#[test]
fn exporting_twice_into_the_same_directory() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("nested").join("output");
    let mut manager = manager(SimulatedLogic::new(DigitalTrace::toggle_train(
        0, false, 0.1, 2,
    )));

    for _ in 0..2 {
        let artifact = manager
            .run(request(&[0]), |running| {
                running.wait()?.export_raw(&BTreeSet::from([0]), &out)
            })
            .unwrap();
        assert_eq!(artifact.table().len(), 4);
    }

    assert_eq!(manager.backend().start_count(), 2);
    assert_eq!(manager.backend().open_captures(), 0);
}

#[test]
fn failed_attach_still_releases_the_capture() {
    init_logging();
    let mut manager = manager(SimulatedLogic::new(DigitalTrace::new([1, 2])));

    let mut capture = None;
    let err = manager
        .run(request(&[1, 2]), |running| {
            let mut completed = running.wait()?;
            capture = Some(completed.id());
            completed.attach(&AnalyzerBinding::i2c("I2C", 1, 9))
        })
        .unwrap_err();

    assert!(matches!(
        err,
        HarnessError::UnknownChannel { channel: 9, .. }
    ));
    assert_eq!(manager.backend().release_count(capture.unwrap()), 1);
    assert_eq!(manager.state(), CaptureState::Released);
}

#[test]
fn invalid_binding_is_rejected_before_the_device_sees_it() {
    init_logging();
    let mut manager = manager(SimulatedLogic::new(DigitalTrace::new([4, 5, 6])));

    let err = manager
        .run(request(&[4, 5, 6]), |running| {
            let mut completed = running.wait()?;
            let missing_clock = AnalyzerBinding::spi("SPI").mosi(5).miso(6).build();
            completed.attach(&missing_clock)
        })
        .unwrap_err();

    assert!(matches!(err, HarnessError::InvalidConfiguration(_)));
}

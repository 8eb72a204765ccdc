use polars::prelude::*;
use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};

use crate::analyzer::AnalyzerKind;
use crate::error::{HarnessError, Result};

/// File name the raw digital export is written to inside the destination directory
pub const RAW_EXPORT_FILE: &str = "digital.csv";

pub const TIME_COLUMN: &str = "Time [s]";
pub const GPIO_HEADER: [&str; 2] = [TIME_COLUMN, "State"];
pub const I2C_HEADER: [&str; 6] = [
    TIME_COLUMN,
    "Packet ID",
    "Address",
    "Data",
    "Read/Write",
    "ACK/NAK",
];
pub const SPI_HEADER: [&str; 4] = [TIME_COLUMN, "Packet ID", "MOSI", "MISO"];

/// Header of the raw export column carrying `channel`
pub fn channel_column(channel: u8) -> String {
    format!("Channel {channel}")
}

fn format_time(time_s: f64) -> String {
    format!("{time_s:.9}")
}

fn format_level(level: bool) -> &'static str {
    if level {
        "1"
    } else {
        "0"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Radix {
    Decimal,
    #[default]
    Hexadecimal,
}

impl Radix {
    pub fn format_byte(&self, value: u8) -> String {
        match self {
            Radix::Decimal => value.to_string(),
            Radix::Hexadecimal => format!("0x{value:02X}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DigitalSample {
    pub time_s: f64,
    /// One level per trace channel, in the trace's channel order
    pub levels: Vec<bool>,
}

/// Per-channel digital samples as delivered by the capture device.
///
/// One row per level change, plus the level at the start and at the end of
/// the capture.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DigitalTrace {
    channels: Vec<u8>,
    samples: Vec<DigitalSample>,
}

impl DigitalTrace {
    pub fn new(channels: impl IntoIterator<Item = u8>) -> Self {
        let channels: BTreeSet<u8> = channels.into_iter().collect();
        Self {
            channels: channels.into_iter().collect(),
            samples: Vec::new(),
        }
    }

    /// Append a sample; `levels[i]` belongs to the `i`-th channel in ascending order
    pub fn push(&mut self, time_s: f64, levels: &[bool]) {
        let mut levels = levels.to_vec();
        levels.resize(self.channels.len(), false);
        self.samples.push(DigitalSample { time_s, levels });
    }

    /// A single channel toggling `edges` times, `period_s` apart.
    ///
    /// The first row holds `initial` at t=0 and the last row repeats the final
    /// level one period after the last edge, the way a capture device reports
    /// the levels it saw at the capture boundaries. With both boundary rows
    /// dropped, `edges` rows remain and form `edges - 1` adjacent pairs.
    pub fn toggle_train(channel: u8, initial: bool, period_s: f64, edges: usize) -> Self {
        let mut trace = Self::new([channel]);
        let mut level = initial;
        trace.push(0.0, &[level]);
        for edge in 1..=edges {
            level = !level;
            trace.push(edge as f64 * period_s, &[level]);
        }
        trace.push((edges + 1) as f64 * period_s, &[level]);
        trace
    }

    pub fn channels(&self) -> &[u8] {
        &self.channels
    }

    pub fn samples(&self) -> &[DigitalSample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn level(&self, row: usize, channel: u8) -> Option<bool> {
        let index = self.channels.iter().position(|&ch| ch == channel)?;
        self.samples.get(row)?.levels.get(index).copied()
    }

    /// Keep only `channels`; a channel the trace never saw reads as low
    pub fn project(&self, channels: &BTreeSet<u8>) -> Self {
        let mut projected = Self::new(channels.iter().copied());
        for row in 0..self.samples.len() {
            let levels: Vec<bool> = projected
                .channels
                .iter()
                .map(|&ch| self.level(row, ch).unwrap_or(false))
                .collect();
            projected.push(self.samples[row].time_s, &levels);
        }
        projected
    }

    fn to_table(&self) -> ExportTable {
        let mut header = vec![TIME_COLUMN.to_string()];
        header.extend(self.channels.iter().map(|&ch| channel_column(ch)));

        let rows = (0..self.samples.len())
            .map(|row| {
                let mut cells = vec![format_time(self.samples[row].time_s)];
                cells.extend(self.channels.iter().map(|&ch| {
                    format_level(self.level(row, ch).unwrap_or(false)).to_string()
                }));
                cells
            })
            .collect();

        ExportTable::new(header, rows)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Read,
    Write,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Read => "Read",
            Direction::Write => "Write",
        }
    }
}

/// One frame produced by a protocol analyzer
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedFrame {
    Gpio {
        time_s: f64,
        level: bool,
    },
    I2c {
        time_s: f64,
        packet_id: u32,
        address: u8,
        data: u8,
        direction: Direction,
        ack: bool,
    },
    Spi {
        time_s: f64,
        packet_id: u32,
        mosi: u8,
        miso: u8,
    },
}

impl DecodedFrame {
    pub fn kind(&self) -> AnalyzerKind {
        match self {
            DecodedFrame::Gpio { .. } => AnalyzerKind::Gpio,
            DecodedFrame::I2c { .. } => AnalyzerKind::I2c,
            DecodedFrame::Spi { .. } => AnalyzerKind::Spi,
        }
    }

    /// Cells of the export row; packet ids stay decimal whatever the radix
    fn cells(&self, radix: Radix) -> Vec<String> {
        match *self {
            DecodedFrame::Gpio { time_s, level } => {
                vec![format_time(time_s), format_level(level).to_string()]
            }
            DecodedFrame::I2c {
                time_s,
                packet_id,
                address,
                data,
                direction,
                ack,
            } => vec![
                format_time(time_s),
                packet_id.to_string(),
                radix.format_byte(address),
                radix.format_byte(data),
                direction.as_str().to_string(),
                if ack { "ACK" } else { "NAK" }.to_string(),
            ],
            DecodedFrame::Spi {
                time_s,
                packet_id,
                mosi,
                miso,
            } => vec![
                format_time(time_s),
                packet_id.to_string(),
                radix.format_byte(mosi),
                radix.format_byte(miso),
            ],
        }
    }
}

fn decoded_header(kind: AnalyzerKind) -> &'static [&'static str] {
    match kind {
        AnalyzerKind::Gpio => &GPIO_HEADER,
        AnalyzerKind::I2c => &I2C_HEADER,
        AnalyzerKind::Spi => &SPI_HEADER,
    }
}

/// A header row plus data rows, every cell kept as the text found in the file
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExportTable {
    header: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl ExportTable {
    pub fn new(header: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        Self { header, rows }
    }

    pub fn header(&self) -> &[String] {
        &self.header
    }

    /// Data rows, header excluded
    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Vec<String>> {
        self.rows
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.header.iter().position(|column| column == name)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Parse CSV text; all columns are read as strings so values survive unchanged
    pub fn parse_csv(data: &[u8]) -> Result<Self> {
        let df = CsvReadOptions::default()
            .with_has_header(true)
            .with_infer_schema_length(Some(0))
            .into_reader_with_file_handle(Cursor::new(data))
            .finish()?;

        let header = df
            .get_column_names()
            .iter()
            .map(|name| name.to_string())
            .collect();

        let columns = df
            .get_columns()
            .iter()
            .map(|column| -> PolarsResult<Vec<String>> {
                Ok(column
                    .str()?
                    .into_iter()
                    .map(|cell| cell.unwrap_or_default().to_string())
                    .collect::<Vec<_>>())
            })
            .collect::<PolarsResult<Vec<_>>>()?;

        let rows = (0..df.height())
            .map(|row| columns.iter().map(|column| column[row].clone()).collect())
            .collect();

        Ok(Self { header, rows })
    }

    fn to_data_frame(&self) -> PolarsResult<DataFrame> {
        let columns = self
            .header
            .iter()
            .enumerate()
            .map(|(index, name)| {
                let values: Vec<&str> = self
                    .rows
                    .iter()
                    .map(|row| row.get(index).map_or("", String::as_str))
                    .collect();
                Series::new(name.as_str().into(), values).into()
            })
            .collect::<Vec<Column>>();

        DataFrame::new(columns)
    }

    /// Write the table as CSV, creating missing parent directories
    pub fn write_csv(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|err| HarnessError::export_io(parent, err))?;
        }

        let mut df = self.to_data_frame()?;
        let mut csv = Vec::new();
        CsvWriter::new(&mut csv)
            .include_header(true)
            .finish(&mut df)?;

        let mut file = File::create(path).map_err(|err| HarnessError::export_io(path, err))?;
        file.write_all(&csv)
            .map_err(|err| HarnessError::export_io(path, err))?;

        log::debug!("Exported {} rows to {}", self.rows.len(), path.display());
        Ok(())
    }
}

/// An exported table together with where it lives on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportArtifact {
    path: PathBuf,
    table: ExportTable,
}

impl ExportArtifact {
    /// Read an artifact back from storage
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let data = fs::read(&path).map_err(|err| HarnessError::export_io(&path, err))?;
        let table = ExportTable::parse_csv(&data)?;
        Ok(Self { path, table })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn table(&self) -> &ExportTable {
        &self.table
    }

    pub fn into_table(self) -> ExportTable {
        self.table
    }
}

/// Write raw digital samples to `destination_dir/digital.csv`
pub fn write_raw(trace: &DigitalTrace, destination_dir: &Path) -> Result<ExportArtifact> {
    let path = destination_dir.join(RAW_EXPORT_FILE);
    let table = trace.to_table();
    table.write_csv(&path)?;
    Ok(ExportArtifact { path, table })
}

/// Write decoded frames of one analyzer to `destination_path`
pub fn write_decoded(
    kind: AnalyzerKind,
    label: &str,
    frames: &[DecodedFrame],
    destination_path: &Path,
    radix: Radix,
) -> Result<ExportArtifact> {
    if let Some(frame) = frames.iter().find(|frame| frame.kind() != kind) {
        return Err(HarnessError::UnexpectedFrame {
            label: label.to_string(),
            expected: kind.as_str(),
            found: frame.kind().as_str(),
        });
    }

    let header = decoded_header(kind).iter().map(ToString::to_string).collect();
    let rows = frames.iter().map(|frame| frame.cells(radix)).collect();
    let table = ExportTable::new(header, rows);
    table.write_csv(destination_path)?;

    Ok(ExportArtifact {
        path: destination_path.to_path_buf(),
        table,
    })
}

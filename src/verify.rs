//! Checks over exported artifacts
//!
//! Both checks work on an [`ExportTable`] read back from storage, never on
//! live device state, so a failed run can be re-checked from its artifact
//! alone.

use std::fmt;

use crate::error::{HarnessError, Result};
use crate::export::{channel_column, ExportTable, TIME_COLUMN};

/// Column holding the pin level when no channel is named
const DEFAULT_STATE_COLUMN: usize = 1;

/// Outcome of one check, with the rows it looked at
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationResult {
    passed: bool,
    explanation: String,
    rows: Vec<Vec<String>>,
}

impl VerificationResult {
    fn pass(explanation: String, rows: &[Vec<String>]) -> Self {
        Self {
            passed: true,
            explanation,
            rows: rows.to_vec(),
        }
    }

    fn fail(explanation: String, rows: &[Vec<String>]) -> Self {
        Self {
            passed: false,
            explanation,
            rows: rows.to_vec(),
        }
    }

    pub fn passed(&self) -> bool {
        self.passed
    }

    pub fn explanation(&self) -> &str {
        &self.explanation
    }

    /// Every data row of the checked table
    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    /// Turn a failed check into an error.
    ///
    /// The observed rows are printed first, so the test output alone is
    /// enough to see what the device actually did.
    pub fn into_result(self) -> Result<Self> {
        if self.passed {
            return Ok(self);
        }

        println!("{self}");
        for row in &self.rows {
            println!("  {}", row.join(","));
        }
        Err(HarnessError::VerificationFailure {
            explanation: self.explanation,
            rows: self.rows,
        })
    }
}

impl fmt::Display for VerificationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verdict = if self.passed { "PASS" } else { "FAIL" };
        write!(f, "{verdict}: {}", self.explanation)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EdgePolicy {
    /// Read levels from the `Channel <n>` column instead of the first level column
    pub channel: Option<u8>,
    /// More transitions than this means clock trouble; `None` disables the bound
    pub max_transitions: Option<usize>,
}

impl EdgePolicy {
    pub const DEFAULT_MAX_TRANSITIONS: usize = 15;
}

impl Default for EdgePolicy {
    fn default() -> Self {
        Self {
            channel: None,
            max_transitions: Some(Self::DEFAULT_MAX_TRANSITIONS),
        }
    }
}

/// Check that a raw capture shows a clean toggle train.
///
/// The first and last data rows are dropped: they carry whatever level the
/// pin had when the capture started and ended, not an edge. Every adjacent
/// pair of the remaining levels must then be `1 -> 0` or `0 -> 1`.
pub fn verify_edge_transitions(table: &ExportTable, policy: &EdgePolicy) -> VerificationResult {
    let rows = table.rows();

    let column = match policy.channel {
        Some(channel) => {
            let name = channel_column(channel);
            match table.column_index(&name) {
                Some(column) => column,
                None => {
                    return VerificationResult::fail(
                        format!("export has no '{name}' column"),
                        rows,
                    )
                }
            }
        }
        None => DEFAULT_STATE_COLUMN,
    };

    let inner = if rows.len() > 2 {
        &rows[1..rows.len() - 1]
    } else {
        &[]
    };

    let mut states = Vec::with_capacity(inner.len());
    for (index, row) in inner.iter().enumerate() {
        match row.get(column) {
            Some(state) => states.push(state.as_str()),
            None => {
                return VerificationResult::fail(
                    format!("row {} has no level in column {column}", index + 1),
                    rows,
                )
            }
        }
    }
    log::info!("Found pin in following states: {states:?}");

    let transitions: Vec<(&str, &str)> = states.windows(2).map(|w| (w[0], w[1])).collect();

    if transitions.is_empty() {
        return VerificationResult::fail(
            format!(
                "no transitions left after dropping boundary rows ({} data rows)",
                rows.len()
            ),
            rows,
        );
    }

    if let Some(max) = policy.max_transitions {
        if transitions.len() >= max {
            return VerificationResult::fail(
                format!(
                    "{} transitions, expected fewer than {max}; check the clock setup",
                    transitions.len()
                ),
                rows,
            );
        }
    }

    let bad = transitions
        .iter()
        .position(|pair| !matches!(pair, ("1", "0") | ("0", "1")));
    if let Some(index) = bad {
        let (from, to) = transitions[index];
        return VerificationResult::fail(
            format!(
                "rows {} and {} hold '{from}' -> '{to}', which is not a toggle",
                index + 1,
                index + 2
            ),
            rows,
        );
    }

    VerificationResult::pass(
        format!("{} clean transitions", transitions.len()),
        rows,
    )
}

/// A column of a decoded-frame export
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameField {
    Time,
    PacketId,
    Address,
    Data,
    ReadWrite,
    Ack,
    Mosi,
    Miso,
    State,
}

impl FrameField {
    pub fn column_name(&self) -> &'static str {
        match self {
            FrameField::Time => TIME_COLUMN,
            FrameField::PacketId => "Packet ID",
            FrameField::Address => "Address",
            FrameField::Data => "Data",
            FrameField::ReadWrite => "Read/Write",
            FrameField::Ack => "ACK/NAK",
            FrameField::Mosi => "MOSI",
            FrameField::Miso => "MISO",
            FrameField::State => "State",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct FrameCheck {
    row: usize,
    field: FrameField,
    expected: String,
}

/// Values expected at fixed frame positions
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FrameExpectations {
    checks: Vec<FrameCheck>,
}

impl FrameExpectations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Expect `values` in `field` of frames 0, 1, 2, ...
    pub fn sequence<I, S>(field: FrameField, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        values
            .into_iter()
            .enumerate()
            .fold(Self::new(), |expectations, (row, value)| {
                expectations.at(row, field, value)
            })
    }

    /// Expect `value` in `field` of frame `row`
    pub fn at(mut self, row: usize, field: FrameField, value: impl Into<String>) -> Self {
        self.checks.push(FrameCheck {
            row,
            field,
            expected: value.into(),
        });
        self
    }

    pub fn len(&self) -> usize {
        self.checks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }
}

/// Check decoded frames against expected values, position by position.
///
/// Frame N must carry the N-th expected value; values are compared as the
/// literal text of the export (`0x0F`, not `15`).
pub fn verify_frame_sequence(
    table: &ExportTable,
    expectations: &FrameExpectations,
) -> VerificationResult {
    let rows = table.rows();

    if expectations.is_empty() {
        return VerificationResult::fail("no expected frames given".to_string(), rows);
    }

    for check in &expectations.checks {
        let name = check.field.column_name();
        let Some(column) = table.column_index(name) else {
            return VerificationResult::fail(format!("export has no '{name}' column"), rows);
        };

        let Some(actual) = rows.get(check.row).and_then(|row| row.get(column)) else {
            return VerificationResult::fail(
                format!(
                    "expected {} in frame {} but only {} frames were decoded",
                    check.expected,
                    check.row,
                    rows.len()
                ),
                rows,
            );
        };

        if *actual != check.expected {
            return VerificationResult::fail(
                format!(
                    "frame {} {name}: expected {}, got {actual}",
                    check.row, check.expected
                ),
                rows,
            );
        }
    }

    VerificationResult::pass(
        format!("{} expected frame values matched", expectations.len()),
        rows,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::{write_raw, DigitalTrace};

    fn table(csv: &str) -> ExportTable {
        ExportTable::parse_csv(csv.as_bytes()).unwrap()
    }

    #[test]
    fn test_boundary_rows_are_excluded() {
        let table = table("Time,Ch0\n0.1,1\n0.2,0\n0.3,1\n0.4,0\n");
        let result = verify_edge_transitions(&table, &EdgePolicy::default());

        assert!(result.passed(), "{result}");
        assert_eq!(result.explanation(), "1 clean transitions");
    }

    #[test]
    fn test_pair_count_matches_inner_edges() {
        let dir = tempfile::tempdir().unwrap();
        let unbounded = EdgePolicy {
            max_transitions: None,
            ..EdgePolicy::default()
        };

        // toggle_train(n) leaves n - 1 pairs: its first edge sits between
        // the dropped first row and row 1
        for edges in [1, 2, 3, 7, 14, 40] {
            let trace = DigitalTrace::toggle_train(0, edges % 2 == 0, 0.01, edges + 1);
            let artifact = write_raw(&trace, dir.path()).unwrap();

            let result = verify_edge_transitions(artifact.table(), &unbounded);
            assert!(result.passed(), "{edges} edges: {result}");
            assert_eq!(result.explanation(), format!("{edges} clean transitions"));
        }
    }

    #[test]
    fn test_repeated_boundary_levels_are_ignored() {
        // first and last rows repeat their neighbours' level
        let table = table("Time [s],Channel 0\n0.0,1\n0.5,1\n0.6,0\n0.7,1\n0.9,1\n");
        assert!(verify_edge_transitions(&table, &EdgePolicy::default()).passed());
    }

    #[test]
    fn test_repeated_state_fails() {
        let table = table("Time [s],Channel 0\n0.0,0\n0.1,1\n0.2,0\n0.3,0\n0.4,1\n0.5,1\n");
        let result = verify_edge_transitions(&table, &EdgePolicy::default());

        assert!(!result.passed());
        assert!(result.explanation().contains("'0' -> '0'"));
        assert_eq!(result.rows().len(), 6);
    }

    #[test]
    fn test_no_samples_fails() {
        let empty = table("Time [s],Channel 0\n");
        assert!(!verify_edge_transitions(&empty, &EdgePolicy::default()).passed());

        let only_boundaries = table("Time [s],Channel 0\n0.1,1\n0.2,0\n");
        assert!(!verify_edge_transitions(&only_boundaries, &EdgePolicy::default()).passed());

        let single_inner = table("Time [s],Channel 0\n0.1,1\n0.2,0\n0.3,1\n");
        assert!(!verify_edge_transitions(&single_inner, &EdgePolicy::default()).passed());
    }

    #[test]
    fn test_transition_bound() {
        let mut csv = String::from("Time [s],Channel 0\n");
        for row in 0..20 {
            csv.push_str(&format!("{row}.0,{}\n", row % 2));
        }
        let table = table(&csv);

        let bounded = verify_edge_transitions(&table, &EdgePolicy::default());
        assert!(!bounded.passed());
        assert!(bounded.explanation().contains("fewer than 15"));

        let unbounded = EdgePolicy {
            max_transitions: None,
            ..EdgePolicy::default()
        };
        assert!(verify_edge_transitions(&table, &unbounded).passed());
    }

    #[test]
    fn test_named_channel_column() {
        let table = table("Time [s],Channel 1,Channel 4\n0,0,1\n1,0,0\n2,0,1\n3,0,0\n4,0,0\n");

        let channel_4 = EdgePolicy {
            channel: Some(4),
            ..EdgePolicy::default()
        };
        assert!(verify_edge_transitions(&table, &channel_4).passed());
        assert!(!verify_edge_transitions(&table, &EdgePolicy::default()).passed());

        let missing = EdgePolicy {
            channel: Some(7),
            ..EdgePolicy::default()
        };
        let result = verify_edge_transitions(&table, &missing);
        assert!(result.explanation().contains("Channel 7"));
    }

    #[test]
    fn test_i2c_device_id_sequence() {
        let table = table(
            "Time [s],Packet ID,Address,Data,Read/Write,ACK/NAK\n\
             0.1,0,0x90,0x0F,Write,ACK\n\
             0.2,1,0x91,0x01,Read,ACK\n\
             0.3,1,0x91,0x17,Read,NAK\n",
        );

        let expected = FrameExpectations::sequence(FrameField::Data, ["0x0F", "0x01", "0x17"]);
        assert!(verify_frame_sequence(&table, &expected).passed());

        for position in 0..3 {
            let mut values = vec!["0x0F", "0x01", "0x17"];
            values[position] = "0x00";
            let expected = FrameExpectations::sequence(FrameField::Data, values);
            assert!(!verify_frame_sequence(&table, &expected).passed());
        }
    }

    #[test]
    fn test_frame_sequence_is_positional() {
        let table = table("Time [s],Packet ID,MOSI,MISO\n0.1,0,0xD0,0xFF\n0.2,0,0xFF,0x58\n");

        let chip_id = FrameExpectations::new()
            .at(0, FrameField::Mosi, "0xD0")
            .at(1, FrameField::Miso, "0x58");
        assert!(verify_frame_sequence(&table, &chip_id).passed());

        let swapped = FrameExpectations::new().at(0, FrameField::Miso, "0x58");
        assert!(!verify_frame_sequence(&table, &swapped).passed());

        let too_many = FrameExpectations::sequence(FrameField::Mosi, ["0xD0", "0xFF", "0x00"]);
        let result = verify_frame_sequence(&table, &too_many);
        assert!(result.explanation().contains("only 2 frames"));
    }

    #[test]
    fn test_missing_column_and_empty_expectations() {
        let table = table("Time [s],Packet ID,MOSI,MISO\n0.1,0,0xD0,0xFF\n");

        let wrong_protocol = FrameExpectations::sequence(FrameField::Data, ["0xD0"]);
        assert!(!verify_frame_sequence(&table, &wrong_protocol).passed());
        assert!(!verify_frame_sequence(&table, &FrameExpectations::new()).passed());
    }

    #[test]
    fn test_failure_becomes_error_with_rows() {
        let table = table("Time [s],Channel 0\n0.1,1\n");
        let err = verify_edge_transitions(&table, &EdgePolicy::default())
            .into_result()
            .unwrap_err();

        match err {
            HarnessError::VerificationFailure { rows, .. } => {
                assert_eq!(rows, vec![vec!["0.1".to_string(), "1".to_string()]]);
            }
            other => unreachable!("unexpected error: {other}"),
        }
    }
}

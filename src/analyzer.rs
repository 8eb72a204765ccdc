use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::capture::CaptureId;
use crate::error::{HarnessError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AnalyzerKind {
    Gpio,
    I2c,
    Spi,
}

impl AnalyzerKind {
    /// Analyzer name as the capture software knows it
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalyzerKind::Gpio => "GPIO",
            AnalyzerKind::I2c => "I2C",
            AnalyzerKind::Spi => "SPI",
        }
    }

    fn required_roles(&self) -> &'static [&'static str] {
        match self {
            AnalyzerKind::Gpio => &["Input"],
            AnalyzerKind::I2c => &["SDA", "SCL"],
            AnalyzerKind::Spi => &["MOSI", "MISO", "Clock"],
        }
    }

    fn optional_roles(&self) -> &'static [&'static str] {
        match self {
            AnalyzerKind::Spi => &["Enable"],
            AnalyzerKind::Gpio | AnalyzerKind::I2c => &[],
        }
    }

    fn allowed_options(&self) -> &'static [(&'static str, &'static [&'static str])] {
        match self {
            AnalyzerKind::Spi => &[
                (BitOrder::OPTION, BitOrder::VALUES),
                (BITS_PER_TRANSFER_OPTION, &[BITS_PER_TRANSFER_8]),
                (ClockPolarity::OPTION, ClockPolarity::VALUES),
                (ClockPhase::OPTION, ClockPhase::VALUES),
                (EnablePolarity::OPTION, EnablePolarity::VALUES),
            ],
            AnalyzerKind::Gpio | AnalyzerKind::I2c => &[],
        }
    }
}

impl fmt::Display for AnalyzerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const BITS_PER_TRANSFER_OPTION: &str = "Bits per Transfer";
const BITS_PER_TRANSFER_8: &str = "8 Bits per Transfer (Standard)";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BitOrder {
    #[default]
    MsbFirst,
    LsbFirst,
}

impl BitOrder {
    const OPTION: &'static str = "Significant Bit";
    const VALUES: &'static [&'static str] = &[
        "Most Significant Bit First (Standard)",
        "Least Significant Bit First",
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BitOrder::MsbFirst => Self::VALUES[0],
            BitOrder::LsbFirst => Self::VALUES[1],
        }
    }
}

/// CPOL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClockPolarity {
    #[default]
    IdleLow,
    IdleHigh,
}

impl ClockPolarity {
    const OPTION: &'static str = "Clock State";
    const VALUES: &'static [&'static str] = &[
        "Clock is Low when inactive (CPOL = 0)",
        "Clock is High when inactive (CPOL = 1)",
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ClockPolarity::IdleLow => Self::VALUES[0],
            ClockPolarity::IdleHigh => Self::VALUES[1],
        }
    }
}

/// CPHA
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClockPhase {
    #[default]
    LeadingEdge,
    TrailingEdge,
}

impl ClockPhase {
    const OPTION: &'static str = "Clock Phase";
    const VALUES: &'static [&'static str] = &[
        "Data is Valid on Clock Leading Edge (CPHA = 0)",
        "Data is Valid on Clock Trailing Edge (CPHA = 1)",
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ClockPhase::LeadingEdge => Self::VALUES[0],
            ClockPhase::TrailingEdge => Self::VALUES[1],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EnablePolarity {
    #[default]
    ActiveLow,
    ActiveHigh,
}

impl EnablePolarity {
    const OPTION: &'static str = "Enable Line";
    const VALUES: &'static [&'static str] = &[
        "Enable line is Active Low (Standard)",
        "Enable line is Active High",
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EnablePolarity::ActiveLow => Self::VALUES[0],
            EnablePolarity::ActiveHigh => Self::VALUES[1],
        }
    }
}

/// A protocol analyzer to attach to a finished capture.
///
/// Prefer the typed builders ([`AnalyzerBinding::i2c`],
/// [`AnalyzerBinding::spi`], [`AnalyzerBinding::gpio`]); a hand-assembled
/// binding is checked by [`AnalyzerBinding::validate`] before it reaches the
/// device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalyzerBinding {
    pub kind: AnalyzerKind,
    pub label: String,
    pub pin_roles: BTreeMap<String, u8>,
    pub options: BTreeMap<String, String>,
}

impl AnalyzerBinding {
    pub fn new(kind: AnalyzerKind, label: impl Into<String>) -> Self {
        Self {
            kind,
            label: label.into(),
            pin_roles: BTreeMap::new(),
            options: BTreeMap::new(),
        }
    }

    pub fn gpio(label: impl Into<String>, input: u8) -> Self {
        Self::new(AnalyzerKind::Gpio, label).pin("Input", input)
    }

    pub fn i2c(label: impl Into<String>, sda: u8, scl: u8) -> Self {
        Self::new(AnalyzerKind::I2c, label)
            .pin("SDA", sda)
            .pin("SCL", scl)
    }

    pub fn spi(label: impl Into<String>) -> SpiBindingBuilder {
        SpiBindingBuilder::new(label.into())
    }

    pub fn pin(mut self, role: &str, channel: u8) -> Self {
        self.pin_roles.insert(role.to_string(), channel);
        self
    }

    pub fn option(mut self, name: &str, value: &str) -> Self {
        self.options.insert(name.to_string(), value.to_string());
        self
    }

    /// All channels this binding reads from
    pub fn channels(&self) -> BTreeSet<u8> {
        self.pin_roles.values().copied().collect()
    }

    /// Check roles and options against what the analyzer kind accepts
    pub fn validate(&self) -> Result<()> {
        let kind = self.kind;

        for role in kind.required_roles() {
            if !self.pin_roles.contains_key(*role) {
                return Err(HarnessError::invalid(format!(
                    "{kind} analyzer '{}' has no '{role}' pin",
                    self.label
                )));
            }
        }

        for role in self.pin_roles.keys() {
            let known = kind.required_roles().contains(&role.as_str())
                || kind.optional_roles().contains(&role.as_str());
            if !known {
                return Err(HarnessError::invalid(format!(
                    "{kind} analyzer has no pin role '{role}'"
                )));
            }
        }

        for (name, value) in &self.options {
            let allowed = kind
                .allowed_options()
                .iter()
                .find(|(option, _)| option == name)
                .ok_or_else(|| {
                    HarnessError::invalid(format!("{kind} analyzer has no option '{name}'"))
                })?;
            if !allowed.1.contains(&value.as_str()) {
                return Err(HarnessError::invalid(format!(
                    "'{value}' is not a valid '{name}' for {kind} (expected one of {:?})",
                    allowed.1
                )));
            }
        }

        Ok(())
    }

    /// Check that every pin is one of the capture's enabled channels
    pub fn check_channels(&self, enabled: &BTreeSet<u8>) -> Result<()> {
        match self.channels().into_iter().find(|ch| !enabled.contains(ch)) {
            Some(channel) => Err(HarnessError::UnknownChannel {
                channel,
                enabled: enabled.iter().copied().collect(),
            }),
            None => Ok(()),
        }
    }
}

#[derive(Debug)]
pub struct SpiBindingBuilder {
    label: String,
    mosi: Option<u8>,
    miso: Option<u8>,
    clock: Option<u8>,
    enable: Option<u8>,
    bit_order: BitOrder,
    polarity: ClockPolarity,
    phase: ClockPhase,
    enable_polarity: EnablePolarity,
}

impl SpiBindingBuilder {
    fn new(label: String) -> Self {
        Self {
            label,
            mosi: None,
            miso: None,
            clock: None,
            enable: None,
            bit_order: BitOrder::default(),
            polarity: ClockPolarity::default(),
            phase: ClockPhase::default(),
            enable_polarity: EnablePolarity::default(),
        }
    }

    pub fn mosi(mut self, channel: u8) -> Self {
        self.mosi = Some(channel);
        self
    }

    pub fn miso(mut self, channel: u8) -> Self {
        self.miso = Some(channel);
        self
    }

    pub fn clock(mut self, channel: u8) -> Self {
        self.clock = Some(channel);
        self
    }

    pub fn enable(mut self, channel: u8) -> Self {
        self.enable = Some(channel);
        self
    }

    pub fn bit_order(mut self, bit_order: BitOrder) -> Self {
        self.bit_order = bit_order;
        self
    }

    /// Set CPOL and CPHA together
    pub fn mode(mut self, polarity: ClockPolarity, phase: ClockPhase) -> Self {
        self.polarity = polarity;
        self.phase = phase;
        self
    }

    pub fn enable_polarity(mut self, polarity: EnablePolarity) -> Self {
        self.enable_polarity = polarity;
        self
    }

    /// Missing pins are left out here and reported by `validate`
    pub fn build(self) -> AnalyzerBinding {
        let pins = [
            ("MOSI", self.mosi),
            ("MISO", self.miso),
            ("Clock", self.clock),
            ("Enable", self.enable),
        ];

        let mut binding = AnalyzerBinding::new(AnalyzerKind::Spi, self.label);
        for (role, channel) in pins {
            if let Some(channel) = channel {
                binding = binding.pin(role, channel);
            }
        }

        binding
            .option(BitOrder::OPTION, self.bit_order.as_str())
            .option(BITS_PER_TRANSFER_OPTION, BITS_PER_TRANSFER_8)
            .option(ClockPolarity::OPTION, self.polarity.as_str())
            .option(ClockPhase::OPTION, self.phase.as_str())
            .option(EnablePolarity::OPTION, self.enable_polarity.as_str())
    }
}

/// Identifies an analyzer inside the capture device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AnalyzerId(pub u64);

/// An analyzer attached to a completed capture
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalyzerHandle {
    pub(crate) id: AnalyzerId,
    pub(crate) capture: CaptureId,
    pub(crate) kind: AnalyzerKind,
    pub(crate) label: String,
}

impl AnalyzerHandle {
    pub fn id(&self) -> AnalyzerId {
        self.id
    }

    pub fn kind(&self) -> AnalyzerKind {
        self.kind
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

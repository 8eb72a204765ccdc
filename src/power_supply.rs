use serialport::SerialPort;
use std::io::{Read, Write};
use std::thread;
use std::time::{Duration, Instant};

use crate::config::PowerSupplyConfig;
use crate::error::{HarnessError, Result};

/// Command prefixes the supply accepts without sending anything back
const WRITE_ONLY_PREFIXES: [&str; 4] = ["VSET", "ISET", "OUT", "BEEP"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    /// Setpoint or output toggle, fire-and-forget
    WriteOnly,
    /// Expects exactly one line in reply
    Query,
}

impl CommandKind {
    /// Classify a command by its prefix.
    ///
    /// A trailing `?` always makes a query, so `VSET1?` reads the setpoint
    /// back while `VSET1:3.30` is write-only.
    pub fn classify(command: &str) -> Self {
        let command = command.trim();
        if command.ends_with('?') {
            return Self::Query;
        }
        if WRITE_ONLY_PREFIXES
            .iter()
            .any(|prefix| command.starts_with(prefix))
        {
            Self::WriteOnly
        } else {
            Self::Query
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PowerSupplySettings {
    /// Pause after every command so the supply reaches steady state
    pub settle_delay: Duration,
    pub query_timeout: Duration,
    pub terminator: String,
}

impl Default for PowerSupplySettings {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_secs(1),
            query_timeout: Duration::from_secs(1),
            terminator: "\n".to_string(),
        }
    }
}

/// Bench power supply driven over a serial line.
///
/// Commands are never retried; every transport failure surfaces to the
/// caller as is.
pub struct PowerSupply<T = Box<dyn SerialPort>> {
    transport: T,
    settings: PowerSupplySettings,
}

impl PowerSupply {
    /// Open the serial device named in the configuration.
    ///
    /// The configured path is usually a udev symlink (`/dev/ttyPowerSupply`),
    /// so it is resolved to the real device node first.
    pub fn open(config: &PowerSupplyConfig) -> Result<Self> {
        let device = std::fs::canonicalize(&config.port).map_err(|err| {
            HarnessError::unavailable(format!(
                "power supply {} not found: {err}",
                config.port.display()
            ))
        })?;
        log::debug!(
            "Connecting to power supply on {} (via {})",
            device.display(),
            config.port.display()
        );

        let port = serialport::new(device.to_string_lossy(), config.baud_rate)
            .timeout(Duration::from_millis(10))
            .open()
            .map_err(|err| {
                HarnessError::unavailable(format!(
                    "cannot open power supply on {}: {err}",
                    device.display()
                ))
            })?;
        port.clear(serialport::ClearBuffer::All)?;

        Ok(Self::new(port, config.settings()))
    }
}

impl<T: Read + Write> PowerSupply<T> {
    pub fn new(transport: T, settings: PowerSupplySettings) -> Self {
        Self {
            transport,
            settings,
        }
    }

    pub fn settings(&self) -> &PowerSupplySettings {
        &self.settings
    }

    pub fn into_inner(self) -> T {
        self.transport
    }

    /// Send a command without waiting for a reply
    pub fn send(&mut self, command: &str) -> Result<()> {
        log::debug!("Power supply <- {command}");
        self.write_command(command)?;
        self.settle();
        Ok(())
    }

    /// Send a command and block for its single-line reply
    pub fn query(&mut self, command: &str) -> Result<String> {
        log::debug!("Power supply <- {command}");
        self.write_command(command)?;
        let reply = self.read_line();
        self.settle();

        let reply = reply?;
        log::debug!("Power supply -> {reply}");
        Ok(reply)
    }

    /// Send or query depending on the command kind.
    pub fn execute(&mut self, command: &str) -> Result<Option<String>> {
        match CommandKind::classify(command) {
            CommandKind::WriteOnly => self.send(command).map(|()| None),
            CommandKind::Query => self.query(command).map(Some),
        }
    }

    pub fn identify(&mut self) -> Result<String> {
        self.query("*IDN?")
    }

    pub fn set_voltage(&mut self, channel: u8, volts: f64) -> Result<()> {
        if !volts.is_finite() || volts < 0.0 {
            return Err(HarnessError::invalid(format!(
                "voltage setpoint {volts} is not a non-negative number"
            )));
        }
        self.send(&format!("VSET{}:{volts:.2}", Self::checked_channel(channel)?))
    }

    pub fn set_current(&mut self, channel: u8, amps: f64) -> Result<()> {
        if !amps.is_finite() || amps < 0.0 {
            return Err(HarnessError::invalid(format!(
                "current limit {amps} is not a non-negative number"
            )));
        }
        self.send(&format!("ISET{}:{amps:.3}", Self::checked_channel(channel)?))
    }

    pub fn set_output(&mut self, channel: u8, enabled: bool) -> Result<()> {
        let channel = Self::checked_channel(channel)?;
        self.send(&format!("OUTCH{channel}:{}", u8::from(enabled)))
    }

    /// Switch an output off, keep it off for `off_time`, then switch it back on
    pub fn power_cycle(&mut self, channel: u8, off_time: Duration) -> Result<()> {
        log::info!("Power cycling channel {channel}");
        self.set_output(channel, false)?;
        thread::sleep(off_time);
        self.set_output(channel, true)
    }

    fn checked_channel(channel: u8) -> Result<u8> {
        if channel == 0 {
            return Err(HarnessError::invalid("power supply channels start at 1"));
        }
        Ok(channel)
    }

    fn write_command(&mut self, command: &str) -> Result<()> {
        let line = format!("{}{}", command.trim(), self.settings.terminator);
        self.transport.write_all(line.as_bytes())?;
        self.transport.flush()?;
        Ok(())
    }

    fn read_line(&mut self) -> Result<String> {
        let terminator = self.settings.terminator.as_bytes();
        let mut response = Vec::new();
        let start = Instant::now();

        loop {
            let mut byte = [0u8; 1];
            if self.transport.read_exact(&mut byte).is_ok() {
                response.push(byte[0]);
                if !terminator.is_empty() && response.ends_with(terminator) {
                    response.truncate(response.len() - terminator.len());
                    break;
                }
            }

            // a device streaming bytes without a terminator must time out too
            if start.elapsed() >= self.settings.query_timeout {
                return Err(HarnessError::unavailable(format!(
                    "no reply from power supply within {:?} (got {:?})",
                    self.settings.query_timeout,
                    String::from_utf8_lossy(&response)
                )));
            }
        }

        Ok(String::from_utf8_lossy(&response).trim().to_string())
    }

    fn settle(&self) {
        if !self.settings.settle_delay.is_zero() {
            thread::sleep(self.settings.settle_delay);
        }
    }
}

//! Connection parameters for both roles.
//!
//! The CLI in `main.rs` parses raw arguments; these structs carry the values
//! into the library and [`validate`](SenderConfig::validate) them before any
//! socket is opened.

use std::ops::RangeInclusive;
use std::time::Duration;

use thiserror::Error;

/// Smallest permitted window: one full segment.
pub const MIN_WINDOW: usize = 1000;
/// Largest permitted window: half the sequence space, so stale duplicates
/// can never be mistaken for data ahead of the receive window.
pub const MAX_WINDOW: usize = 32_768;
/// Ports the CLI accepts (the dynamic/private range).
pub const PORT_RANGE: RangeInclusive<u16> = 49_152..=65_535;
/// Maximum segment lifetime used for TIME_WAIT (2×MSL).
pub const DEFAULT_MSL: Duration = Duration::from_secs(1);

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("invalid window {0}: must be between {MIN_WINDOW} and {MAX_WINDOW} bytes")]
    Window(usize),
    #[error("invalid rto: must be at least 1 ms")]
    Rto,
    #[error("invalid {name} {value}: must be within [0, 1]")]
    Probability { name: &'static str, value: f64 },
    #[error("invalid port {0}: must be between 49152 and 65535")]
    Port(u16),
    #[error("invalid msl: must be greater than zero")]
    Msl,
}

/// Initiator (sender) parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct SenderConfig {
    /// Upper bound on unacknowledged payload bytes.
    pub max_window: usize,
    /// Fixed retransmission timeout.
    pub rto: Duration,
    /// Probability an outbound segment is dropped.
    pub forward_loss: f64,
    /// Probability an inbound ACK is dropped.
    pub reverse_loss: f64,
    /// SYN sequence number; random when `None`.
    pub initial_seqno: Option<u16>,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            max_window: MIN_WINDOW,
            rto: Duration::from_millis(200),
            forward_loss: 0.0,
            reverse_loss: 0.0,
            initial_seqno: None,
        }
    }
}

impl SenderConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_window(self.max_window)?;
        if self.rto < Duration::from_millis(1) {
            return Err(ConfigError::Rto);
        }
        validate_probability("flp", self.forward_loss)?;
        validate_probability("rlp", self.reverse_loss)?;
        Ok(())
    }
}

/// Responder (receiver) parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct ReceiverConfig {
    /// Port the SYN must come from.
    pub sender_port: u16,
    /// Advertised receive window in bytes.
    pub max_window: usize,
    pub msl: Duration,
}

impl ReceiverConfig {
    pub fn new(sender_port: u16, max_window: usize) -> Self {
        Self {
            sender_port,
            max_window,
            msl: DEFAULT_MSL,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_window(self.max_window)?;
        if self.msl.is_zero() {
            return Err(ConfigError::Msl);
        }
        Ok(())
    }
}

/// Reject ports outside [`PORT_RANGE`].
pub fn validate_port(port: u16) -> Result<u16, ConfigError> {
    if PORT_RANGE.contains(&port) {
        Ok(port)
    } else {
        Err(ConfigError::Port(port))
    }
}

fn validate_window(window: usize) -> Result<(), ConfigError> {
    if (MIN_WINDOW..=MAX_WINDOW).contains(&window) {
        Ok(())
    } else {
        Err(ConfigError::Window(window))
    }
}

fn validate_probability(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::Probability { name, value })
    }
}

//! Error taxonomy for the experiment engine.
//!
//! `InvalidRateInput` and `AliasedIsi` are recovered inside the ISI
//! calibrator; every other kind aborts the run once the event log is flushed.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExperimentError {
    /// Requested intensity (or a ramp sub-step) has no command in the code table
    #[error("intensity {intensity} is not representable by the code table")]
    UnrepresentableIntensity { intensity: f64 },

    #[error("unsupported stimulator configuration: {parameter} = {value} ms")]
    UnsupportedConfiguration { parameter: &'static str, value: u32 },

    #[error("transport write failed: {0}")]
    Transport(#[from] TransportError),

    /// The adaptive procedure could not propose a next intensity
    #[error("adaptive procedure unavailable: {reason}")]
    EstimatorUnavailable { reason: String },

    #[error("invalid respiratory rate input {input:?}: {reason}")]
    InvalidRateInput { input: String, reason: &'static str },

    #[error("ISI {isi} s rejected: {reason}")]
    AliasedIsi { isi: f64, reason: &'static str },

    #[error("scripted rate input exhausted before calibration was accepted")]
    RateInputExhausted,

    #[error("failed to load intensity code table: {0}")]
    CodeTable(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("event log write failed: {0}")]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ExperimentError {
    /// Recoverable kinds are retried by the calibrator instead of ending the run.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ExperimentError::InvalidRateInput { .. } | ExperimentError::AliasedIsi { .. }
        )
    }
}

/// Byte-level failure of a stimulator link.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("serial port {port}: {source}")]
    Serial {
        port: String,
        #[source]
        source: serialport::Error,
    },

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ExperimentError>;

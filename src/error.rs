//! Error types shared across the daemon.
//!
//! Per-target hardware failures are not errors at this level: they travel as
//! [`crate::model::BmcPowerRc`] values so sibling targets keep going. The enums
//! here cover startup problems, request validation and internal defects.

use thiserror::Error;

/// Startup, configuration and capability errors.
#[derive(Debug, Error)]
pub enum CapmcError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("malformed configuration file: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unable to build Redfish HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("no power controls for {0} operation")]
    NoPowerControls(String),

    #[error("no supported ResetType for {0} operation")]
    NoSupportedResetType(String),

    #[error("Cannot force the {0} operation")]
    NoForceVariant(String),
}

/// Power-cap request validation and payload generation errors.
#[derive(Debug, Error)]
pub enum PowerCapError {
    #[error("Duplicate control specified: {0}")]
    Duplicate(String),

    #[error("Control ({name}) value ({value}) is less than minimum ({min})")]
    BelowMinimum { name: String, value: i64, min: i64 },

    #[error("Control ({name}) value ({value}) is greater than maximum ({max})")]
    AboveMaximum { name: String, value: i64, max: i64 },

    #[error("Control ({name}) index ({index}) is outside the PowerControl array ({len})")]
    IndexOutOfRange { name: String, index: usize, len: usize },

    #[error("missing power limit information")]
    MissingPowerLimit,

    #[error("missing power control information")]
    MissingPowerControl,

    #[error("Invalid license")]
    InvalidLicense,

    #[error("No Redfish Power data")]
    NoPowerData,

    #[error("Error decoding Redfish Power data: {0}")]
    Json(#[from] serde_json::Error),
}

/// Worker pool submission errors.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("worker pool is stopped")]
    PoolStopped,
}

pub type CapmcResult<T> = Result<T, CapmcError>;

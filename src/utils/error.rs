//! Error types for spacedist

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PlannerError {
    #[error("Not enough disk space: {0}")]
    NoDiskSpace(String),

    #[error("Volume group {vg} is too small: {missing} still missing after freeing space")]
    VolumeGroupTooSmall { vg: String, missing: String },

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Disk not found: {0}")]
    DiskNotFound(String),

    #[error("Volume group not found: {0}")]
    VolumeGroupNotFound(String),

    #[error("Invalid region: {0}")]
    InvalidRegion(String),

    #[error("No free partition slot: {0}")]
    NoPartitionSlot(String),

    #[error("Invalid name: {0}")]
    InvalidName(String),

    #[error("Invalid size: {0}")]
    InvalidSize(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, PlannerError>;

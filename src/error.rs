use std::fmt;

use thiserror::Error;

use crate::video::hal::HardwareError;

/// Device capability required by a controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    /// Video capture (input)
    Capture,
    /// Video playback (output)
    Playback,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::Capture => write!(f, "video capture"),
            Capability::Playback => write!(f, "video playback"),
        }
    }
}

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Device {device} does not support {capability}")]
    MissingCapability {
        device: String,
        capability: Capability,
    },

    #[error("Failed to start capture on {device}: {source}")]
    StartCaptureFailed {
        device: String,
        #[source]
        source: HardwareError,
    },

    #[error("Failed to stop capture on {device}: {source}")]
    StopCaptureFailed {
        device: String,
        #[source]
        source: HardwareError,
    },

    #[error("Failed to start playback on {device}: {source}")]
    StartPlaybackFailed {
        device: String,
        #[source]
        source: HardwareError,
    },

    #[error("Failed to stop playback on {device}: {source}")]
    StopPlaybackFailed {
        device: String,
        #[source]
        source: HardwareError,
    },

    #[error("Playback on {0} has not been prepared")]
    NotPrepared(String),

    #[error("Playback on {0} is already prepared")]
    AlreadyPrepared(String),

    #[error("Frame rejected: {0}")]
    FrameMismatch(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Hardware error on {device}: {source}")]
    Hardware {
        device: String,
        #[source]
        source: HardwareError,
    },
}

impl AppError {
    pub(crate) fn hardware(device: impl Into<String>, source: HardwareError) -> Self {
        Self::Hardware {
            device: device.into(),
            source,
        }
    }
}

/// Result type alias used across the crate
pub type Result<T> = std::result::Result<T, AppError>;

//! Audio backend error types

use thiserror::Error;

/// Errors from the output driver
#[derive(Debug, Clone, Error)]
pub enum AudioError {
    #[error("No audio output devices found")]
    NoDevices,

    #[error("Failed to get default audio device: {0}")]
    NoDefaultDevice(String),

    #[error("Audio device not found: {0}")]
    DeviceNotFound(String),

    #[error("Audio device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Audio device disconnected: {0}")]
    DeviceDisconnected(String),

    #[error("Failed to get device config: {0}")]
    ConfigError(String),

    #[error("Sample rate {requested}Hz not supported by device '{device}'")]
    SampleRateUnsupported { device: String, requested: u32 },

    #[error("Failed to build audio stream: {0}")]
    StreamBuildError(String),

    #[error("Failed to start audio stream: {0}")]
    StreamPlayError(String),
}

/// Result type for audio operations
pub type AudioResult<T> = Result<T, AudioError>;

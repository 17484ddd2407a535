//! Command-surface error type
//!
//! Flattens every subsystem error into one enum so shells get a stable
//! `kind()` string alongside the human-readable message.

use thiserror::Error;

use crate::audio::AudioError;
use crate::db::StoreError;
use crate::import::ImportError;
use crate::loader::SongLoadError;

#[derive(Debug, Error)]
pub enum ControlError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("song load failed: {0}")]
    Load(#[from] SongLoadError),

    #[error(transparent)]
    Audio(#[from] AudioError),

    #[error(transparent)]
    Import(#[from] ImportError),

    #[error("no song loaded")]
    NoSongLoaded,

    #[error("invalid seek position: {0}")]
    InvalidSeekPosition(f64),

    #[error("unknown stem: {0}")]
    UnknownStem(String),
}

impl ControlError {
    /// Stable error kind name for the command surface
    pub fn kind(&self) -> &'static str {
        match self {
            ControlError::Store(err) => store_kind(err),
            ControlError::Load(_) => "SongLoadFailed",
            ControlError::Audio(err) => match err {
                AudioError::DeviceDisconnected(_) => "DeviceDisconnected",
                AudioError::SampleRateUnsupported { .. } => "SampleRateUnsupported",
                _ => "DeviceUnavailable",
            },
            ControlError::Import(err) => match err {
                ImportError::FileNotFound(_) => "FileNotFound",
                ImportError::UnsupportedFormat(_) => "UnsupportedFormat",
                ImportError::MetadataExtraction(_) => "MetadataExtractionFailed",
                ImportError::DuplicateSource(_) => "DuplicateSource",
                ImportError::Validation(_) => "InvalidArgument",
                ImportError::Store(err) => store_kind(err),
            },
            ControlError::NoSongLoaded => "NoSongLoaded",
            ControlError::InvalidSeekPosition(_) => "InvalidSeekPosition",
            ControlError::UnknownStem(_) => "NotFound",
        }
    }
}

fn store_kind(err: &StoreError) -> &'static str {
    match err {
        StoreError::NotFound => "NotFound",
        StoreError::UniqueViolation(_) => "UniqueViolation",
        StoreError::Corrupt(_) => "StoreCorrupt",
        StoreError::Invalid(_) => "InvalidArgument",
        StoreError::Io(_) | StoreError::Internal(_) => "IoError",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_names_are_stable() {
        assert_eq!(ControlError::from(StoreError::NotFound).kind(), "NotFound");
        assert_eq!(
            ControlError::from(StoreError::Corrupt("x".into())).kind(),
            "StoreCorrupt"
        );
        assert_eq!(
            ControlError::from(ImportError::DuplicateSource("x".into())).kind(),
            "DuplicateSource"
        );
        assert_eq!(
            ControlError::from(SongLoadError::NoStems).kind(),
            "SongLoadFailed"
        );
        assert_eq!(ControlError::NoSongLoaded.kind(), "NoSongLoaded");
        assert_eq!(
            ControlError::from(AudioError::NoDevices).kind(),
            "DeviceUnavailable"
        );
        assert_eq!(
            ControlError::from(AudioError::SampleRateUnsupported {
                device: "d".into(),
                requested: 48_000
            })
            .kind(),
            "SampleRateUnsupported"
        );
    }
}

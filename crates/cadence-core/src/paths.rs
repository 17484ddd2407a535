//! Standard filesystem locations

use std::path::PathBuf;

/// Per-user application data directory
///
/// Returns `<data_dir>/cadence` (e.g. `~/.local/share/cadence` on Linux,
/// `~/Library/Application Support/cadence` on macOS).
pub fn data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("cadence")
}

/// Default location of the metadata store file
pub fn default_store_path() -> PathBuf {
    data_dir().join("cadence.db")
}

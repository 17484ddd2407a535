use serde::{Deserialize, Serialize};

// Song model exposed over the command surface
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Song {
    pub id: String,
    pub name: String,
    pub artist: Option<String>,
    pub tempo: Option<f64>,
    pub key: Option<String>,
    pub time_signature: Option<String>,
    pub duration: f64,
    /// Rendered mixdown for UI waveform display; the engine never reads it
    pub mixdown_path: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

// Stem model exposed over the command surface
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stem {
    pub id: String,
    pub song_id: String,
    pub name: String,
    pub file_path: String,
    pub file_size: i64,
    pub sample_rate: u32,
    pub channels: u16,
    pub duration: f64,
    /// Default mix gain (0.0 - 1.0)
    pub gain: f64,
    /// Default mute flag
    pub muted: bool,
    /// Display order within the song
    pub position: i64,
    /// SHA-256 over the first 1 MiB + file size, for duplicate detection
    pub source_hash: Option<String>,
}

// Setlist with its member songs in play order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Setlist {
    pub id: String,
    pub name: String,
    pub created_at: i64,
    pub updated_at: i64,
    pub song_ids: Vec<String>,
}

// Persisted audio/engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioSettings {
    /// Preferred output device name (None = system default)
    pub output_device: Option<String>,
    /// Requested buffer size in frames
    pub buffer_size: u32,
    /// Requested sample rate in Hz
    pub sample_rate: u32,
    pub theme: String,
    /// Song cache byte budget
    pub cache_bytes: u64,
}

impl Default for AudioSettings {
    fn default() -> Self {
        AudioSettings {
            output_device: None,
            buffer_size: 512,
            sample_rate: crate::types::SAMPLE_RATE,
            theme: "dark".to_string(),
            cache_bytes: 2 * 1024 * 1024 * 1024,
        }
    }
}

// Filter and sorting options for song queries
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SongFilter {
    pub search_query: Option<String>,
    pub tempo_min: Option<f64>,
    pub tempo_max: Option<f64>,
    pub key: Option<String>,
    pub sort_by: Option<SortBy>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortBy {
    Name,
    Artist,
    Tempo,
    Duration,
    DateAdded,
}

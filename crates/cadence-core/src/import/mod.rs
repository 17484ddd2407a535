//! Import pipeline
//!
//! Groups user-chosen files into one new song. Metadata extraction runs in
//! parallel; persistence is a single transaction so an import either lands
//! completely or not at all. Audio files are referenced by absolute path and
//! never copied.

mod duplicate;
mod metadata;
mod stem_names;

pub use duplicate::source_hash;
pub use metadata::{extract_metadata, SourceMetadata};
pub use stem_names::detect_stem_name;

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use thiserror::Error;

use crate::db::{Database, Song, Stem, StoreError};
use crate::events::{AppEvent, EventBus};

/// Default mix gain for freshly imported stems
const DEFAULT_STEM_GAIN: f64 = 0.8;

const SUPPORTED_EXTENSIONS: &[&str] = &["wav", "mp3", "flac"];

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("metadata extraction failed: {0}")]
    MetadataExtraction(String),

    #[error("duplicate source: {0}")]
    DuplicateSource(String),

    #[error("invalid import request: {0}")]
    Validation(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Request to import the given files as stems of one new song
#[derive(Debug, Clone)]
pub struct ImportRequest {
    pub file_paths: Vec<PathBuf>,
    pub title: String,
    pub artist: Option<String>,
    pub key: Option<String>,
    pub time_signature: Option<String>,
}

impl ImportRequest {
    fn validate(&self) -> Result<(), ImportError> {
        if self.title.trim().is_empty() {
            return Err(ImportError::Validation("song title is required".to_string()));
        }
        if self.file_paths.is_empty() {
            return Err(ImportError::Validation(
                "at least one audio file is required".to_string(),
            ));
        }
        for path in &self.file_paths {
            validate_extension(path)?;
        }
        Ok(())
    }
}

fn validate_extension(path: &Path) -> Result<(), ImportError> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .ok_or_else(|| ImportError::Validation(format!("{}: file has no extension", path.display())))?;

    if !SUPPORTED_EXTENSIONS.contains(&extension.as_str()) {
        return Err(ImportError::UnsupportedFormat(format!(
            "{}: supported formats are WAV, MP3, FLAC",
            path.display()
        )));
    }
    Ok(())
}

struct ProcessedFile {
    file_path: PathBuf,
    metadata: SourceMetadata,
    stem_name: String,
    hash: String,
}

/// Import a song; returns the new song id
///
/// All-or-nothing: any per-file failure or store failure aborts the whole
/// import with no rows created.
pub fn import_song(
    db: &Database,
    events: &EventBus,
    request: ImportRequest,
) -> Result<String, ImportError> {
    request.validate()?;

    let total = request.file_paths.len();
    log::info!("importing '{}' with {} files", request.title, total);

    let done = std::sync::atomic::AtomicUsize::new(0);
    let results: Vec<Result<ProcessedFile, ImportError>> = request
        .file_paths
        .par_iter()
        .map(|file_path| {
            let processed = process_file(file_path);
            let current = done.fetch_add(1, std::sync::atomic::Ordering::Relaxed) + 1;
            events.emit(AppEvent::ImportProgress {
                current,
                total,
                file: file_path.display().to_string(),
            });
            processed
        })
        .collect();

    let mut processed: Vec<ProcessedFile> = Vec::with_capacity(total);
    for result in results {
        processed.push(result?);
    }

    // Duplicate detection: within the batch, then against the library.
    let mut batch_hashes = HashSet::new();
    for file in &processed {
        if !batch_hashes.insert(file.hash.as_str()) {
            return Err(ImportError::DuplicateSource(file.file_path.display().to_string()));
        }
        if db.source_hash_exists(&file.hash)? {
            return Err(ImportError::DuplicateSource(file.file_path.display().to_string()));
        }
    }

    let mut names: Vec<String> = processed.iter().map(|f| f.stem_name.clone()).collect();
    stem_names::deduplicate_names(&mut names);

    let duration = processed.iter().map(|f| f.metadata.duration).fold(0.0, f64::max);

    let now = chrono::Utc::now().timestamp();
    let song = Song {
        id: uuid::Uuid::new_v4().to_string(),
        name: request.title.trim().to_string(),
        artist: request.artist.clone(),
        tempo: None,
        key: request.key.clone(),
        time_signature: request.time_signature.clone(),
        duration,
        mixdown_path: None,
        created_at: now,
        updated_at: now,
    };

    let stems: Vec<Stem> = processed
        .iter()
        .zip(names)
        .enumerate()
        .map(|(position, (file, name))| Stem {
            id: uuid::Uuid::new_v4().to_string(),
            song_id: song.id.clone(),
            name,
            file_path: file.file_path.display().to_string(),
            file_size: file.metadata.file_size,
            sample_rate: file.metadata.sample_rate,
            // Multichannel sources are downmixed to stereo at decode time.
            channels: file.metadata.channels.min(2),
            duration: file.metadata.duration,
            gain: DEFAULT_STEM_GAIN,
            muted: false,
            position: position as i64,
            source_hash: Some(file.hash.clone()),
        })
        .collect();

    db.insert_song_with_stems(&song, &stems)?;

    log::info!("imported '{}' ({} stems) as {}", song.name, stems.len(), song.id);
    Ok(song.id)
}

fn process_file(file_path: &Path) -> Result<ProcessedFile, ImportError> {
    let metadata = metadata::extract_metadata(file_path)?;

    let filename = file_path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("unknown");
    let stem_name = stem_names::detect_stem_name(filename);

    let hash = duplicate::source_hash(file_path)?;

    Ok(ProcessedFile {
        file_path: file_path.to_path_buf(),
        metadata,
        stem_name,
        hash,
    })
}

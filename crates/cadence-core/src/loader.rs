//! Song loader
//!
//! Orchestrates the parallel decode of all stems of one song on a bounded
//! worker pool and assembles the result into a [`DecodedSong`]. Parallel
//! decode is the main load-time win; decoded buffers then stay in RAM for the
//! song's full duration so the audio callback never waits on a decoder.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use rayon::prelude::*;
use thiserror::Error;

use crate::db::{Database, StoreError};
use crate::decode::{self, DecodeError};
use crate::events::{AppEvent, EventBus};
use crate::song::{DecodedSong, DecodedStem};
use crate::types::{MAX_STEMS, SAMPLE_RATE};

/// Worker pool ceiling; decode parallelism beyond this stops paying off
/// because stems are I/O-bound at the tail.
const MAX_DECODE_WORKERS: usize = 8;

/// Load errors
///
/// `Clone` because one failed load is fanned out to every caller coalesced
/// onto it by the cache.
#[derive(Debug, Clone, Error)]
pub enum SongLoadError {
    #[error("song has no stems")]
    NoStems,

    #[error("song has {0} stems; the engine supports at most {MAX_STEMS}")]
    TooManyStems(usize),

    #[error("load cancelled")]
    Cancelled,

    #[error("failed to load stem '{stem_name}': {source}")]
    StemFailed {
        stem_name: String,
        source: DecodeError,
    },

    #[error("metadata store error: {0}")]
    Store(String),
}

impl From<StoreError> for SongLoadError {
    fn from(err: StoreError) -> Self {
        SongLoadError::Store(err.to_string())
    }
}

/// Parallel stem decoder for whole songs
pub struct SongLoader {
    db: Arc<Database>,
    pool: rayon::ThreadPool,
    events: EventBus,
}

impl SongLoader {
    pub fn new(db: Arc<Database>, events: EventBus) -> Self {
        let workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4)
            .min(MAX_DECODE_WORKERS);

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("stem-decode-{}", i))
            .build()
            .expect("failed to build decode pool");

        log::info!("song loader ready with {} decode workers", workers);

        Self { db, pool, events }
    }

    /// Decode every stem of a song into a [`DecodedSong`]
    ///
    /// `cancel` is polled at stem granularity: a cancellation that arrives
    /// mid-stem takes effect before the next stem starts. A single stem
    /// failure fails the whole load; partial stems would break the
    /// sample-lock-step guarantee.
    pub fn load(
        &self,
        song_id: &str,
        cancel: &AtomicBool,
    ) -> Result<Arc<DecodedSong>, SongLoadError> {
        let stems = self.db.stems_for_song(song_id)?;
        if stems.is_empty() {
            return Err(SongLoadError::NoStems);
        }
        if stems.len() > MAX_STEMS {
            return Err(SongLoadError::TooManyStems(stems.len()));
        }

        let total = stems.len();
        let completed = AtomicUsize::new(0);
        let start = Instant::now();

        log::info!("loading song {} ({} stems)", song_id, total);

        let results: Vec<Result<DecodedStem, SongLoadError>> = self.pool.install(|| {
            stems
                .par_iter()
                .map(|stem| {
                    if cancel.load(Ordering::Acquire) {
                        return Err(SongLoadError::Cancelled);
                    }

                    let decoded = decode::decode_stem_file(
                        std::path::Path::new(&stem.file_path),
                        SAMPLE_RATE,
                    )
                    .map_err(|source| SongLoadError::StemFailed {
                        stem_name: stem.name.clone(),
                        source,
                    })?;

                    let current = completed.fetch_add(1, Ordering::Relaxed) + 1;
                    self.events.emit(AppEvent::LoadProgress {
                        song_id: song_id.to_string(),
                        current,
                        total,
                    });

                    Ok(DecodedStem {
                        id: stem.id.clone(),
                        name: stem.name.clone(),
                        default_gain: stem.gain as f32,
                        default_muted: stem.muted,
                        pcm: decoded.pcm,
                        frames: decoded.frames,
                    })
                })
                .collect()
        });

        // First failure in stem display order wins; everything decoded so far
        // is dropped with the Vec.
        let mut decoded_stems = Vec::with_capacity(total);
        for result in results {
            decoded_stems.push(result?);
        }

        let song = Arc::new(DecodedSong::new(song_id.to_string(), decoded_stems));
        log::info!(
            "loaded song {} in {:?} ({:.1} MiB)",
            song_id,
            start.elapsed(),
            song.bytes as f64 / (1024.0 * 1024.0)
        );

        self.events.emit(AppEvent::LoadComplete {
            song_id: song_id.to_string(),
        });

        Ok(song)
    }
}

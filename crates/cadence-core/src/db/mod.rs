//! Metadata store
//!
//! Durable index of songs, stems, setlists, and audio settings in a single
//! SQLite file. Writes are serialized behind one connection; the audio thread
//! never touches this module.

mod models;
mod schema;
mod setlists;
mod settings;
mod songs;
mod stems;


use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::Connection;
use thiserror::Error;

pub use models::{AudioSettings, Setlist, Song, SongFilter, SortBy, Stem};

/// Store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found")]
    NotFound,

    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),

    #[error("store corrupt: {0}")]
    Corrupt(String),

    #[error("invalid argument: {0}")]
    Invalid(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("database error: {0}")]
    Internal(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
            rusqlite::Error::SqliteFailure(e, msg) => {
                use rusqlite::ffi::ErrorCode;
                match e.code {
                    ErrorCode::ConstraintViolation => {
                        // Foreign-key failures mean a referenced row is gone;
                        // everything else constraint-shaped is a uniqueness or
                        // CHECK breach.
                        if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY {
                            StoreError::NotFound
                        } else {
                            StoreError::UniqueViolation(
                                msg.clone().unwrap_or_else(|| err.to_string()),
                            )
                        }
                    }
                    ErrorCode::DatabaseCorrupt | ErrorCode::NotADatabase => {
                        StoreError::Corrupt(err.to_string())
                    }
                    ErrorCode::CannotOpen | ErrorCode::DiskFull | ErrorCode::ReadOnly => {
                        StoreError::Io(err.to_string())
                    }
                    _ => StoreError::Internal(err.to_string()),
                }
            }
            _ => StoreError::Internal(err.to_string()),
        }
    }
}

/// Thread-safe store handle
///
/// Designed to be shared across control threads via `Arc<Database>`.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) the store at the given path
    ///
    /// Runs an integrity check before touching the schema; a corrupt file is
    /// refused rather than opened.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::Io(e.to_string()))?;
        }

        let mut conn = Connection::open(path)?;
        configure(&conn)?;
        integrity_check(&conn)?;
        schema::run_migrations(&mut conn)?;

        log::info!("metadata store open at {}", path.display());
        Ok(Database {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory store (tests)
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let mut conn = Connection::open_in_memory()?;
        configure(&conn)?;
        schema::run_migrations(&mut conn)?;
        Ok(Database {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        // A poisoned store mutex means a panic mid-statement; nothing can be
        // salvaged, so propagate the panic.
        self.conn.lock().expect("metadata store mutex poisoned")
    }

    // ---- songs ----

    pub fn create_song(&self, song: &Song) -> Result<(), StoreError> {
        songs::create(&self.conn(), song)
    }

    pub fn get_song(&self, id: &str) -> Result<Song, StoreError> {
        songs::get(&self.conn(), id)
    }

    pub fn update_song(&self, song: &Song) -> Result<(), StoreError> {
        songs::update(&self.conn(), song)
    }

    pub fn delete_song(&self, id: &str) -> Result<(), StoreError> {
        songs::delete(&self.conn(), id)
    }

    pub fn list_songs(&self, filter: Option<&SongFilter>) -> Result<Vec<Song>, StoreError> {
        songs::list(&self.conn(), filter)
    }

    // ---- stems ----

    pub fn get_stem(&self, id: &str) -> Result<Stem, StoreError> {
        stems::get(&self.conn(), id)
    }

    pub fn stems_for_song(&self, song_id: &str) -> Result<Vec<Stem>, StoreError> {
        stems::for_song(&self.conn(), song_id)
    }

    pub fn update_stem(&self, stem: &Stem) -> Result<(), StoreError> {
        stems::update(&self.conn(), stem)
    }

    pub fn source_hash_exists(&self, hash: &str) -> Result<bool, StoreError> {
        stems::source_hash_exists(&self.conn(), hash)
    }

    /// Insert a song and all of its stems in one transaction (import path)
    pub fn insert_song_with_stems(&self, song: &Song, stem_rows: &[Stem]) -> Result<(), StoreError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        songs::create(&tx, song)?;
        for stem in stem_rows {
            stems::create(&tx, stem)?;
        }
        tx.commit()?;
        Ok(())
    }

    // ---- setlists ----

    pub fn create_setlist(&self, name: &str) -> Result<Setlist, StoreError> {
        setlists::create(&self.conn(), name)
    }

    pub fn get_setlist(&self, id: &str) -> Result<Setlist, StoreError> {
        setlists::get(&self.conn(), id)
    }

    pub fn list_setlists(&self) -> Result<Vec<Setlist>, StoreError> {
        setlists::list(&self.conn())
    }

    pub fn update_setlist(&self, id: &str, name: &str, song_ids: &[String]) -> Result<(), StoreError> {
        setlists::update(&mut self.conn(), id, name, song_ids)
    }

    pub fn delete_setlist(&self, id: &str) -> Result<(), StoreError> {
        setlists::delete(&self.conn(), id)
    }

    pub fn add_song_to_setlist(&self, setlist_id: &str, song_id: &str) -> Result<(), StoreError> {
        setlists::add_song(&mut self.conn(), setlist_id, song_id)
    }

    pub fn remove_song_from_setlist(&self, setlist_id: &str, song_id: &str) -> Result<(), StoreError> {
        setlists::remove_song(&mut self.conn(), setlist_id, song_id)
    }

    pub fn reorder_setlist_songs(&self, setlist_id: &str, song_ids: &[String]) -> Result<(), StoreError> {
        setlists::reorder(&mut self.conn(), setlist_id, song_ids)
    }

    // ---- settings ----

    pub fn get_settings(&self) -> Result<AudioSettings, StoreError> {
        settings::get(&self.conn())
    }

    pub fn update_settings(&self, value: &AudioSettings) -> Result<(), StoreError> {
        settings::update(&mut self.conn(), value)
    }
}

fn configure(conn: &Connection) -> Result<(), StoreError> {
    conn.pragma_update(None, "foreign_keys", "ON")?;
    // WAL lets control-thread reads proceed alongside the serialized writes.
    // The pragma returns the resulting mode ("memory" for in-memory stores).
    let _mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
    Ok(())
}

fn integrity_check(conn: &Connection) -> Result<(), StoreError> {
    let result: String = conn.query_row("PRAGMA integrity_check", [], |row| row.get(0))?;
    if result != "ok" {
        return Err(StoreError::Corrupt(result));
    }
    Ok(())
}

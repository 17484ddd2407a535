//! Schema migrations
//!
//! Numbered migrations are applied exactly once and recorded in the
//! `migrations` table. New schema changes append a new entry to `MIGRATIONS`;
//! existing entries are never edited.

use rusqlite::Connection;

use super::StoreError;

struct Migration {
    id: i64,
    name: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[Migration {
    id: 1,
    name: "initial_schema",
    sql: r#"
    CREATE TABLE songs (
        id TEXT PRIMARY KEY NOT NULL,
        name TEXT NOT NULL,
        artist TEXT,
        tempo REAL CHECK (tempo IS NULL OR (tempo >= 20 AND tempo <= 300)),
        key TEXT,
        time_signature TEXT,
        duration REAL NOT NULL DEFAULT 0,
        mixdown_path TEXT,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    );
    CREATE INDEX idx_songs_name ON songs(name COLLATE NOCASE);
    CREATE INDEX idx_songs_artist ON songs(artist COLLATE NOCASE);
    CREATE INDEX idx_songs_tempo ON songs(tempo);
    CREATE INDEX idx_songs_key ON songs(key);

    CREATE TABLE stems (
        id TEXT PRIMARY KEY NOT NULL,
        song_id TEXT NOT NULL REFERENCES songs(id) ON DELETE CASCADE,
        name TEXT NOT NULL,
        file_path TEXT NOT NULL UNIQUE,
        file_size INTEGER NOT NULL,
        sample_rate INTEGER NOT NULL CHECK (sample_rate BETWEEN 8000 AND 192000),
        channels INTEGER NOT NULL CHECK (channels IN (1, 2)),
        duration REAL NOT NULL,
        gain REAL NOT NULL DEFAULT 0.8 CHECK (gain >= 0.0 AND gain <= 1.0),
        muted INTEGER NOT NULL DEFAULT 0,
        position INTEGER NOT NULL DEFAULT 0,
        source_hash TEXT
    );
    CREATE INDEX idx_stems_song_id ON stems(song_id);
    CREATE INDEX idx_stems_source_hash ON stems(source_hash);

    CREATE TABLE setlists (
        id TEXT PRIMARY KEY NOT NULL,
        name TEXT NOT NULL UNIQUE,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    );

    CREATE TABLE setlist_items (
        setlist_id TEXT NOT NULL REFERENCES setlists(id) ON DELETE CASCADE,
        song_id TEXT NOT NULL REFERENCES songs(id) ON DELETE CASCADE,
        position INTEGER NOT NULL,
        PRIMARY KEY (setlist_id, song_id),
        UNIQUE (setlist_id, position)
    );

    CREATE TABLE app_settings (
        key TEXT PRIMARY KEY NOT NULL,
        value TEXT NOT NULL
    );
    "#,
}];

/// Apply all unapplied migrations
pub fn run_migrations(conn: &mut Connection) -> Result<(), StoreError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS migrations (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at INTEGER NOT NULL
        )",
        [],
    )?;

    let applied: i64 = conn.query_row("SELECT COALESCE(MAX(id), 0) FROM migrations", [], |row| {
        row.get(0)
    })?;

    for migration in MIGRATIONS.iter().filter(|m| m.id > applied) {
        log::info!("applying migration {} ({})", migration.id, migration.name);

        let tx = conn.transaction()?;
        tx.execute_batch(migration.sql)?;
        tx.execute(
            "INSERT INTO migrations (id, name, applied_at) VALUES (?1, ?2, ?3)",
            rusqlite::params![migration.id, migration.name, chrono::Utc::now().timestamp()],
        )?;
        tx.commit()?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_are_idempotent() {
        let mut conn = Connection::open_in_memory().unwrap();
        run_migrations(&mut conn).unwrap();
        run_migrations(&mut conn).unwrap();

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM migrations", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, MIGRATIONS.len() as i64);
    }

    #[test]
    fn test_migration_ids_are_strictly_increasing() {
        let mut last = 0;
        for m in MIGRATIONS {
            assert!(m.id > last, "migration ids must increase");
            last = m.id;
        }
    }
}

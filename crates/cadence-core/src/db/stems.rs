use rusqlite::{params, Connection, Row};

use super::models::Stem;
use super::StoreError;

fn from_row(row: &Row) -> rusqlite::Result<Stem> {
    Ok(Stem {
        id: row.get(0)?,
        song_id: row.get(1)?,
        name: row.get(2)?,
        file_path: row.get(3)?,
        file_size: row.get(4)?,
        sample_rate: row.get::<_, i64>(5)? as u32,
        channels: row.get::<_, i64>(6)? as u16,
        duration: row.get(7)?,
        gain: row.get(8)?,
        muted: row.get(9)?,
        position: row.get(10)?,
        source_hash: row.get(11)?,
    })
}

const COLUMNS: &str = "id, song_id, name, file_path, file_size, sample_rate, channels, duration, gain, muted, position, source_hash";

pub fn create(conn: &Connection, stem: &Stem) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO stems (id, song_id, name, file_path, file_size, sample_rate, channels, duration, gain, muted, position, source_hash)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            stem.id,
            stem.song_id,
            stem.name,
            stem.file_path,
            stem.file_size,
            stem.sample_rate as i64,
            stem.channels as i64,
            stem.duration,
            stem.gain,
            stem.muted,
            stem.position,
            stem.source_hash,
        ],
    )?;
    Ok(())
}

pub fn get(conn: &Connection, id: &str) -> Result<Stem, StoreError> {
    let stem = conn.query_row(
        &format!("SELECT {} FROM stems WHERE id = ?1", COLUMNS),
        [id],
        from_row,
    )?;
    Ok(stem)
}

/// Stems of one song in display order
pub fn for_song(conn: &Connection, song_id: &str) -> Result<Vec<Stem>, StoreError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM stems WHERE song_id = ?1 ORDER BY position",
        COLUMNS
    ))?;
    let rows = stmt.query_map([song_id], from_row)?;

    let mut stems = Vec::new();
    for stem in rows {
        stems.push(stem?);
    }
    Ok(stems)
}

pub fn update(conn: &Connection, stem: &Stem) -> Result<(), StoreError> {
    let changed = conn.execute(
        "UPDATE stems SET name = ?1, gain = ?2, muted = ?3, position = ?4 WHERE id = ?5",
        params![stem.name, stem.gain, stem.muted, stem.position, stem.id],
    )?;
    if changed == 0 {
        return Err(StoreError::NotFound);
    }
    Ok(())
}

pub fn source_hash_exists(conn: &Connection, hash: &str) -> Result<bool, StoreError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM stems WHERE source_hash = ?1",
        [hash],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

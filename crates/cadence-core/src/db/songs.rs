use rusqlite::{params, Connection, Row};

use super::models::{Song, SongFilter, SortBy};
use super::StoreError;

fn from_row(row: &Row) -> rusqlite::Result<Song> {
    Ok(Song {
        id: row.get(0)?,
        name: row.get(1)?,
        artist: row.get(2)?,
        tempo: row.get(3)?,
        key: row.get(4)?,
        time_signature: row.get(5)?,
        duration: row.get(6)?,
        mixdown_path: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

const COLUMNS: &str =
    "id, name, artist, tempo, key, time_signature, duration, mixdown_path, created_at, updated_at";

pub fn create(conn: &Connection, song: &Song) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO songs (id, name, artist, tempo, key, time_signature, duration, mixdown_path, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            song.id,
            song.name,
            song.artist,
            song.tempo,
            song.key,
            song.time_signature,
            song.duration,
            song.mixdown_path,
            song.created_at,
            song.updated_at,
        ],
    )?;
    Ok(())
}

pub fn get(conn: &Connection, id: &str) -> Result<Song, StoreError> {
    let song = conn.query_row(
        &format!("SELECT {} FROM songs WHERE id = ?1", COLUMNS),
        [id],
        from_row,
    )?;
    Ok(song)
}

pub fn update(conn: &Connection, song: &Song) -> Result<(), StoreError> {
    let updated_at = chrono::Utc::now().timestamp();
    let changed = conn.execute(
        "UPDATE songs SET name = ?1, artist = ?2, tempo = ?3, key = ?4, time_signature = ?5,
         duration = ?6, mixdown_path = ?7, updated_at = ?8 WHERE id = ?9",
        params![
            song.name,
            song.artist,
            song.tempo,
            song.key,
            song.time_signature,
            song.duration,
            song.mixdown_path,
            updated_at,
            song.id,
        ],
    )?;
    if changed == 0 {
        return Err(StoreError::NotFound);
    }
    Ok(())
}

pub fn delete(conn: &Connection, id: &str) -> Result<(), StoreError> {
    let changed = conn.execute("DELETE FROM songs WHERE id = ?1", [id])?;
    if changed == 0 {
        return Err(StoreError::NotFound);
    }
    Ok(())
}

/// List songs with optional search, tempo range, key filter, and sort order
pub fn list(conn: &Connection, filter: Option<&SongFilter>) -> Result<Vec<Song>, StoreError> {
    let mut sql = format!("SELECT {} FROM songs WHERE 1=1", COLUMNS);
    let mut args: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

    if let Some(f) = filter {
        if let Some(search) = f.search_query.as_deref().filter(|s| !s.trim().is_empty()) {
            sql.push_str(&format!(
                " AND (name LIKE ?{n} OR artist LIKE ?{n})",
                n = args.len() + 1
            ));
            args.push(Box::new(format!("%{}%", search.trim())));
        }
        if let Some(tempo_min) = f.tempo_min {
            sql.push_str(&format!(" AND tempo >= ?{}", args.len() + 1));
            args.push(Box::new(tempo_min));
        }
        if let Some(tempo_max) = f.tempo_max {
            sql.push_str(&format!(" AND tempo <= ?{}", args.len() + 1));
            args.push(Box::new(tempo_max));
        }
        if let Some(key) = f.key.as_deref() {
            sql.push_str(&format!(" AND key = ?{}", args.len() + 1));
            args.push(Box::new(key.to_string()));
        }

        sql.push_str(" ORDER BY ");
        match f.sort_by.unwrap_or(SortBy::Name) {
            SortBy::Name => sql.push_str("name COLLATE NOCASE"),
            SortBy::Artist => sql.push_str("artist COLLATE NOCASE"),
            SortBy::Tempo => sql.push_str("tempo"),
            SortBy::Duration => sql.push_str("duration"),
            SortBy::DateAdded => sql.push_str("created_at DESC"),
        }
    } else {
        sql.push_str(" ORDER BY name COLLATE NOCASE");
    }

    let mut stmt = conn.prepare(&sql)?;
    let arg_refs: Vec<&dyn rusqlite::ToSql> = args.iter().map(|a| a.as_ref()).collect();
    let rows = stmt.query_map(arg_refs.as_slice(), from_row)?;

    let mut songs = Vec::new();
    for song in rows {
        songs.push(song?);
    }
    Ok(songs)
}

//! Setlist storage
//!
//! Membership lives in `setlist_items(setlist_id, song_id, position)` with
//! dense 0-based positions. Every mutation rewrites positions inside one
//! transaction, so a partial ordering is never observable.

use std::collections::HashSet;

use rusqlite::{params, Connection};

use super::models::Setlist;
use super::StoreError;

pub fn create(conn: &Connection, name: &str) -> Result<Setlist, StoreError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(StoreError::Invalid("setlist name is required".to_string()));
    }

    let now = chrono::Utc::now().timestamp();
    let setlist = Setlist {
        id: uuid::Uuid::new_v4().to_string(),
        name: name.to_string(),
        created_at: now,
        updated_at: now,
        song_ids: Vec::new(),
    };

    conn.execute(
        "INSERT INTO setlists (id, name, created_at, updated_at) VALUES (?1, ?2, ?3, ?4)",
        params![setlist.id, setlist.name, setlist.created_at, setlist.updated_at],
    )?;
    Ok(setlist)
}

pub fn get(conn: &Connection, id: &str) -> Result<Setlist, StoreError> {
    let (name, created_at, updated_at) = conn.query_row(
        "SELECT name, created_at, updated_at FROM setlists WHERE id = ?1",
        [id],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
    )?;

    Ok(Setlist {
        id: id.to_string(),
        name,
        created_at,
        updated_at,
        song_ids: member_ids(conn, id)?,
    })
}

pub fn list(conn: &Connection) -> Result<Vec<Setlist>, StoreError> {
    let mut stmt =
        conn.prepare("SELECT id, name, created_at, updated_at FROM setlists ORDER BY created_at DESC")?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, i64>(2)?,
            row.get::<_, i64>(3)?,
        ))
    })?;

    let mut setlists = Vec::new();
    for row in rows {
        let (id, name, created_at, updated_at) = row?;
        let song_ids = member_ids(conn, &id)?;
        setlists.push(Setlist {
            id,
            name,
            created_at,
            updated_at,
            song_ids,
        });
    }
    Ok(setlists)
}

/// Rename a setlist and replace its membership in one transaction
pub fn update(conn: &mut Connection, id: &str, name: &str, song_ids: &[String]) -> Result<(), StoreError> {
    ensure_no_duplicates(song_ids)?;

    let tx = conn.transaction()?;
    let changed = tx.execute(
        "UPDATE setlists SET name = ?1, updated_at = ?2 WHERE id = ?3",
        params![name.trim(), chrono::Utc::now().timestamp(), id],
    )?;
    if changed == 0 {
        return Err(StoreError::NotFound);
    }

    tx.execute("DELETE FROM setlist_items WHERE setlist_id = ?1", [id])?;
    insert_members(&tx, id, song_ids)?;
    tx.commit()?;
    Ok(())
}

pub fn delete(conn: &Connection, id: &str) -> Result<(), StoreError> {
    let changed = conn.execute("DELETE FROM setlists WHERE id = ?1", [id])?;
    if changed == 0 {
        return Err(StoreError::NotFound);
    }
    Ok(())
}

/// Append a song at the end of a setlist
pub fn add_song(conn: &mut Connection, setlist_id: &str, song_id: &str) -> Result<(), StoreError> {
    let tx = conn.transaction()?;
    ensure_setlist_exists(&tx, setlist_id)?;

    tx.execute(
        "INSERT INTO setlist_items (setlist_id, song_id, position)
         SELECT ?1, ?2, COALESCE(MAX(position) + 1, 0) FROM setlist_items WHERE setlist_id = ?1",
        params![setlist_id, song_id],
    )?;
    touch(&tx, setlist_id)?;
    tx.commit()?;
    Ok(())
}

/// Remove a song and close the position gap
pub fn remove_song(conn: &mut Connection, setlist_id: &str, song_id: &str) -> Result<(), StoreError> {
    let tx = conn.transaction()?;

    let changed = tx.execute(
        "DELETE FROM setlist_items WHERE setlist_id = ?1 AND song_id = ?2",
        params![setlist_id, song_id],
    )?;
    if changed == 0 {
        return Err(StoreError::NotFound);
    }

    let remaining = member_ids(&tx, setlist_id)?;
    tx.execute("DELETE FROM setlist_items WHERE setlist_id = ?1", [setlist_id])?;
    insert_members(&tx, setlist_id, &remaining)?;
    touch(&tx, setlist_id)?;
    tx.commit()?;
    Ok(())
}

/// Atomically replace the play order with `song_ids`
///
/// The ids must be a permutation of the current membership.
pub fn reorder(conn: &mut Connection, setlist_id: &str, song_ids: &[String]) -> Result<(), StoreError> {
    ensure_no_duplicates(song_ids)?;

    let tx = conn.transaction()?;
    ensure_setlist_exists(&tx, setlist_id)?;

    let current = member_ids(&tx, setlist_id)?;
    let current_set: HashSet<&str> = current.iter().map(String::as_str).collect();
    let new_set: HashSet<&str> = song_ids.iter().map(String::as_str).collect();
    if current_set != new_set {
        return Err(StoreError::Invalid(
            "reorder must contain exactly the setlist's current songs".to_string(),
        ));
    }

    tx.execute("DELETE FROM setlist_items WHERE setlist_id = ?1", [setlist_id])?;
    insert_members(&tx, setlist_id, song_ids)?;
    touch(&tx, setlist_id)?;
    tx.commit()?;
    Ok(())
}

fn member_ids(conn: &Connection, setlist_id: &str) -> Result<Vec<String>, StoreError> {
    let mut stmt = conn
        .prepare("SELECT song_id FROM setlist_items WHERE setlist_id = ?1 ORDER BY position")?;
    let rows = stmt.query_map([setlist_id], |row| row.get(0))?;

    let mut ids = Vec::new();
    for id in rows {
        ids.push(id?);
    }
    Ok(ids)
}

fn insert_members(conn: &Connection, setlist_id: &str, song_ids: &[String]) -> Result<(), StoreError> {
    let mut stmt = conn.prepare(
        "INSERT INTO setlist_items (setlist_id, song_id, position) VALUES (?1, ?2, ?3)",
    )?;
    for (position, song_id) in song_ids.iter().enumerate() {
        stmt.execute(params![setlist_id, song_id, position as i64])?;
    }
    Ok(())
}

fn ensure_setlist_exists(conn: &Connection, id: &str) -> Result<(), StoreError> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM setlists WHERE id = ?1", [id], |row| {
        row.get(0)
    })?;
    if count == 0 {
        return Err(StoreError::NotFound);
    }
    Ok(())
}

fn ensure_no_duplicates(song_ids: &[String]) -> Result<(), StoreError> {
    let unique: HashSet<&str> = song_ids.iter().map(String::as_str).collect();
    if unique.len() != song_ids.len() {
        return Err(StoreError::Invalid(
            "a setlist cannot contain the same song twice".to_string(),
        ));
    }
    Ok(())
}

fn touch(conn: &Connection, setlist_id: &str) -> Result<(), StoreError> {
    conn.execute(
        "UPDATE setlists SET updated_at = ?1 WHERE id = ?2",
        params![chrono::Utc::now().timestamp(), setlist_id],
    )?;
    Ok(())
}

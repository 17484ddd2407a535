//! Persisted engine settings as `app_settings` key/value rows

use rusqlite::{params, Connection, OptionalExtension};

use super::models::AudioSettings;
use super::StoreError;

const OUTPUT_DEVICE: &str = "output_device";
const BUFFER_SIZE: &str = "buffer_size";
const SAMPLE_RATE: &str = "sample_rate";
const THEME: &str = "theme";
const CACHE_BYTES: &str = "cache_bytes";

fn read(conn: &Connection, key: &str) -> Result<Option<String>, StoreError> {
    let value = conn
        .query_row("SELECT value FROM app_settings WHERE key = ?1", [key], |row| {
            row.get(0)
        })
        .optional()?;
    Ok(value)
}

/// Load settings; missing keys fall back to defaults
pub fn get(conn: &Connection) -> Result<AudioSettings, StoreError> {
    let defaults = AudioSettings::default();

    Ok(AudioSettings {
        output_device: read(conn, OUTPUT_DEVICE)?.filter(|v| !v.is_empty()),
        buffer_size: read(conn, BUFFER_SIZE)?
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.buffer_size),
        sample_rate: read(conn, SAMPLE_RATE)?
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.sample_rate),
        theme: read(conn, THEME)?.unwrap_or(defaults.theme),
        cache_bytes: read(conn, CACHE_BYTES)?
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.cache_bytes),
    })
}

/// Persist all settings in one transaction
pub fn update(conn: &mut Connection, settings: &AudioSettings) -> Result<(), StoreError> {
    let tx = conn.transaction()?;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO app_settings (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )?;
        stmt.execute(params![
            OUTPUT_DEVICE,
            settings.output_device.as_deref().unwrap_or("")
        ])?;
        stmt.execute(params![BUFFER_SIZE, settings.buffer_size.to_string()])?;
        stmt.execute(params![SAMPLE_RATE, settings.sample_rate.to_string()])?;
        stmt.execute(params![THEME, settings.theme])?;
        stmt.execute(params![CACHE_BYTES, settings.cache_bytes.to_string()])?;
    }
    tx.commit()?;
    Ok(())
}

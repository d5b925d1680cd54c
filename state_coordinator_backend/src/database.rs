use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

/// Durable key-value settings storage.
///
/// The state store keeps one serialized blob under its settings key; hosts can
/// back this with whatever settings mechanism they already own.
pub trait SettingsStorage: Send + Sync {
    fn load(&self, key: &str) -> Result<Option<String>>;
    fn save(&self, key: &str, value: &str) -> Result<()>;
}

/// SQLite-backed settings storage.
pub struct SettingsDatabase {
    conn: Mutex<Connection>,
}

impl SettingsDatabase {
    /// Helper to lock the connection
    fn lock_conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Database lock poisoned: {}", e))
    }

    /// Create or open the database
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path.as_ref())
            .with_context(|| format!("Failed to open settings database {:?}", path.as_ref()))?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.ensure_schema()?;
        Ok(db)
    }

    fn ensure_schema(&self) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            r#"CREATE TABLE IF NOT EXISTS extension_settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )"#,
            [],
        )?;
        Ok(())
    }
}

impl SettingsStorage for SettingsDatabase {
    fn load(&self, key: &str) -> Result<Option<String>> {
        let conn = self.lock_conn()?;
        let result = conn.query_row(
            "SELECT value FROM extension_settings WHERE key = ?1",
            [key],
            |row| row.get(0),
        );

        match result {
            Ok(value) => Ok(Some(value)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO extension_settings (key, value, updated_at) VALUES (?1, ?2, ?3)",
            params![key, value, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }
}

/// In-process settings, for hosts that persist settings themselves.
#[derive(Default)]
pub struct MemorySettings {
    values: Mutex<HashMap<String, String>>,
}

impl MemorySettings {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SettingsStorage for MemorySettings {
    fn load(&self, key: &str) -> Result<Option<String>> {
        let values = self
            .values
            .lock()
            .map_err(|e| anyhow::anyhow!("Settings lock poisoned: {}", e))?;
        Ok(values.get(key).cloned())
    }

    fn save(&self, key: &str, value: &str) -> Result<()> {
        let mut values = self
            .values
            .lock()
            .map_err(|e| anyhow::anyhow!("Settings lock poisoned: {}", e))?;
        values.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_survive_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("settings.db");

        {
            let db = SettingsDatabase::new(&path).expect("db init");
            assert!(db.load("state_coordinator").unwrap().is_none());
            db.save("state_coordinator", r#"{"activeStates":{}}"#)
                .expect("save");
            db.save("state_coordinator", r#"{"activeStates":{"c1":["happy"]}}"#)
                .expect("overwrite");
        }

        let db = SettingsDatabase::new(&path).expect("db reopen");
        assert_eq!(
            db.load("state_coordinator").unwrap().as_deref(),
            Some(r#"{"activeStates":{"c1":["happy"]}}"#)
        );
        assert!(db.load("other").unwrap().is_none());
    }

    #[test]
    fn memory_settings_roundtrip() {
        let settings = MemorySettings::new();
        settings.save("k", "v1").unwrap();
        settings.save("k", "v2").unwrap();
        assert_eq!(settings.load("k").unwrap().as_deref(), Some("v2"));
        assert!(settings.load("missing").unwrap().is_none());
    }
}

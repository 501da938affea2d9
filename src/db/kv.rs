//! Key/value document repository

use super::DbPool;
use crate::{Error, Result};

/// Repository over the `kv_store` table
#[derive(Debug, Clone)]
pub struct KvStore {
    pool: DbPool,
}

impl KvStore {
    /// Create a new repository
    #[must_use]
    pub const fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Read the value stored under `key`
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn get(&self, key: &str) -> Result<Option<String>> {
        let conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;

        let result = conn.query_row("SELECT value FROM kv_store WHERE key = ?1", [key], |row| {
            row.get(0)
        });

        match result {
            Ok(value) => Ok(Some(value)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Insert or replace the value under `key`
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn set(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;

        conn.execute(
            "INSERT INTO kv_store (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = datetime('now')",
            [key, value],
        )?;

        Ok(())
    }

    /// Remove `key`. Returns whether a row was deleted.
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn delete(&self, key: &str) -> Result<bool> {
        let conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;
        let rows = conn.execute("DELETE FROM kv_store WHERE key = ?1", [key])?;
        Ok(rows > 0)
    }
}

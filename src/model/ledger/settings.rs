//! The election config store: flat string settings kept next to the ballots.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use crate::model::election::{ElectionSettings, ElectionStatus};

use super::{Ledger, StorageError};

/// Names of the settings the ledger knows about.
pub mod keys {
    pub const STATUS: &str = "status";
    pub const TITLE: &str = "title";
    pub const MAX_SELECTIONS: &str = "max_selections";
    /// Empty or absent until the first successful push.
    pub const LAST_REMOTE_SYNC_AT: &str = "last_remote_sync_at";
}

impl Ledger {
    /// Read a setting, falling back to `default` if it was never set.
    pub fn get(&self, key: &str, default: &str) -> Result<String, StorageError> {
        let value: Option<String> = self
            .lock()?
            .query_row(
                "SELECT value FROM config WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value.unwrap_or_else(|| default.to_string()))
    }

    /// Write a setting. Last write wins.
    pub fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.lock()?.execute(
            "INSERT INTO config (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    pub fn status(&self) -> Result<ElectionStatus, StorageError> {
        self.get(keys::STATUS, ElectionStatus::Open.as_str())?
            .parse()
            .map_err(StorageError::Corrupt)
    }

    pub fn set_status(&self, status: ElectionStatus) -> Result<(), StorageError> {
        self.set(keys::STATUS, status.as_str())
    }

    pub fn title(&self) -> Result<String, StorageError> {
        self.get(keys::TITLE, &self.defaults.title)
    }

    pub fn set_title(&self, title: &str) -> Result<(), StorageError> {
        self.set(keys::TITLE, title)
    }

    pub fn max_selections(&self) -> Result<u32, StorageError> {
        let raw = self.get(keys::MAX_SELECTIONS, "")?;
        if raw.is_empty() {
            return Ok(self.defaults.max_selections);
        }
        match raw.parse::<u32>() {
            Ok(limit) if limit > 0 => Ok(limit),
            _ => Err(StorageError::Corrupt(format!(
                "selection limit {raw:?} is not a positive integer"
            ))),
        }
    }

    pub fn set_max_selections(&self, limit: u32) -> Result<(), StorageError> {
        self.set(keys::MAX_SELECTIONS, &limit.to_string())
    }

    /// When the ledger was last successfully pushed, if ever.
    pub fn last_remote_sync_at(&self) -> Result<Option<DateTime<Utc>>, StorageError> {
        let raw = self.get(keys::LAST_REMOTE_SYNC_AT, "")?;
        if raw.is_empty() {
            return Ok(None);
        }
        DateTime::parse_from_rfc3339(&raw)
            .map(|at| Some(at.with_timezone(&Utc)))
            .map_err(|e| StorageError::Corrupt(format!("bad sync timestamp {raw:?}: {e}")))
    }

    pub fn set_last_remote_sync_at(&self, at: DateTime<Utc>) -> Result<(), StorageError> {
        self.set(keys::LAST_REMOTE_SYNC_AT, &at.to_rfc3339())
    }

    /// All settings at once.
    pub fn settings(&self) -> Result<ElectionSettings, StorageError> {
        Ok(ElectionSettings {
            title: self.title()?,
            status: self.status()?,
            max_selections: self.max_selections()?,
            last_remote_sync_at: self.last_remote_sync_at()?,
        })
    }
}

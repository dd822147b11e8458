//! The local ballot ledger.
//!
//! One SQLite file holds two tables: `ballots` (voter id -> choices, timestamp)
//! and `config` (string key -> string value). The file is the unit of
//! replication: it is copied whole into snapshots, uploaded whole to the
//! remote store, and replaced whole when the remote copy wins.

mod ballots;
mod settings;

pub use settings::keys;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, info};
use rusqlite::{backup::Progress, params, Connection, DatabaseName, OpenFlags};
use thiserror::Error;

use crate::model::election::{ElectionDefaults, ElectionStatus};

/// Failures of the local persistence layer. These always reach the caller.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error(transparent)]
    Db(#[from] rusqlite::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Json(#[from] rocket::serde::json::serde_json::Error),
    #[error("Corrupt ledger: {0}")]
    Corrupt(String),
    #[error("Ledger lock poisoned by a panicking writer")]
    Poisoned,
}

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS ballots (
    voter_id    TEXT PRIMARY KEY,
    choices     TEXT NOT NULL,
    recorded_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS config (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);";

/// Handle on the ledger file. Cheap to clone; all clones share one connection.
#[derive(Clone)]
pub struct Ledger {
    conn: Arc<Mutex<Connection>>,
    path: Arc<PathBuf>,
    defaults: Arc<ElectionDefaults>,
}

impl Ledger {
    /// Open (creating if needed) the ledger at `path`.
    ///
    /// A brand new ledger starts `OPEN` with the given defaults; an existing
    /// one keeps whatever it already holds.
    pub fn open(path: impl AsRef<Path>, defaults: ElectionDefaults) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(&path)?;
        init_schema(&conn, &defaults)?;
        info!("Opened ledger at {}", path.display());

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: Arc::new(path),
            defaults: Arc::new(defaults),
        })
    }

    /// Location of the ledger file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, Connection>, StorageError> {
        self.conn.lock().map_err(|_| StorageError::Poisoned)
    }

    /// Write a consistent copy of the whole ledger to `dest`.
    pub fn backup_to(&self, dest: &Path) -> Result<(), StorageError> {
        let conn = self.lock()?;
        conn.backup(DatabaseName::Main, dest, None)?;
        debug!("Copied ledger to {}", dest.display());
        Ok(())
    }

    /// Serialise the whole ledger (ballots and config) into one blob.
    pub fn export_bytes(&self) -> Result<Vec<u8>, StorageError> {
        let scratch = Scratch::next_to(&self.path, "push")?;
        self.backup_to(scratch.path())?;
        Ok(fs::read(scratch.path())?)
    }

    /// Replace the whole ledger with the contents of `bytes`.
    ///
    /// The blob is checked to be a ledger before anything local is touched.
    pub fn restore_from_bytes(&self, bytes: &[u8]) -> Result<(), StorageError> {
        let scratch = Scratch::next_to(&self.path, "pull")?;
        fs::write(scratch.path(), bytes)?;
        check_is_ledger(scratch.path())?;

        let mut conn = self.lock()?;
        conn.restore(DatabaseName::Main, scratch.path(), None::<fn(Progress)>)?;
        init_schema(&conn, &self.defaults)?;
        info!("Replaced ledger contents ({} bytes)", bytes.len());
        Ok(())
    }
}

/// A scratch file next to the ledger, private to one call and removed on drop.
struct Scratch(PathBuf);

impl Scratch {
    fn next_to(ledger: &Path, purpose: &str) -> Result<Self, StorageError> {
        static NEXT: AtomicUsize = AtomicUsize::new(0);
        let mut name = ledger
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "ledger".into());
        name.push(format!(
            ".{purpose}.{}.{}",
            process::id(),
            NEXT.fetch_add(1, Ordering::Relaxed)
        ));
        let path = ledger.with_file_name(name);
        // Left over from a crashed process that happened to have our pid.
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        Ok(Self(path))
    }

    fn path(&self) -> &Path {
        &self.0
    }
}

impl Drop for Scratch {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.0);
    }
}

/// Create the tables and seed the config if this is a fresh ledger.
fn init_schema(conn: &Connection, defaults: &ElectionDefaults) -> Result<(), StorageError> {
    conn.execute_batch(SCHEMA_SQL)?;
    let seed = [
        (keys::STATUS, ElectionStatus::Open.to_string()),
        (keys::TITLE, defaults.title.clone()),
        (keys::MAX_SELECTIONS, defaults.max_selections.to_string()),
    ];
    for (key, value) in seed {
        conn.execute(
            "INSERT OR IGNORE INTO config (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
    }
    Ok(())
}

/// Does the file at `path` look like a ledger?
fn check_is_ledger(path: &Path) -> Result<(), StorageError> {
    let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
    let tables: u32 = conn
        .query_row(
            "SELECT count(*) FROM sqlite_master WHERE type = 'table' AND name IN ('ballots', 'config')",
            [],
            |row| row.get(0),
        )
        .map_err(|e| StorageError::Corrupt(format!("not a ledger file: {e}")))?;
    if tables != 2 {
        return Err(StorageError::Corrupt(
            "ledger blob is missing the ballots or config table".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::election::ElectionStatus;

    #[backend_test]
    async fn fresh_ledger_starts_open_with_defaults(ledger: Ledger) {
        let settings = ledger.settings().unwrap();
        assert_eq!(settings.status, ElectionStatus::Open);
        assert_eq!(settings.max_selections, 1);
        assert_eq!(settings.last_remote_sync_at, None);
    }

    #[backend_test]
    async fn reopening_keeps_existing_state(ledger: Ledger) {
        ledger.set_status(ElectionStatus::Closed).unwrap();
        ledger.upsert_ballot("a@x.org", &["Ana".into()]).unwrap();

        let reopened = Ledger::open(ledger.path(), ElectionDefaults::default()).unwrap();
        assert_eq!(reopened.status().unwrap(), ElectionStatus::Closed);
        assert_eq!(reopened.ballot_count().unwrap(), 1);
    }

    #[backend_test]
    async fn export_then_restore_replaces_everything(ledger: Ledger) {
        ledger.upsert_ballot("a@x.org", &["Ana".into()]).unwrap();
        ledger.set_title("Board 2026").unwrap();
        let blob = ledger.export_bytes().unwrap();

        ledger.delete_all_ballots().unwrap();
        ledger.upsert_ballot("b@x.org", &["Bob".into()]).unwrap();
        ledger.set_title("Something else").unwrap();

        ledger.restore_from_bytes(&blob).unwrap();
        let ballots = ledger.ballots().unwrap();
        assert_eq!(ballots.len(), 1);
        assert_eq!(ballots[0].voter_id, "a@x.org");
        assert_eq!(ledger.title().unwrap(), "Board 2026");
    }

    #[backend_test]
    async fn concurrent_exports_do_not_share_scratch_files(ledger: Ledger) {
        for i in 0..500 {
            ledger
                .upsert_ballot(&format!("voter{i}@x.org"), &["Ana".into(), "Bob".into()])
                .unwrap();
        }
        let expected = ledger.export_bytes().unwrap().len();

        for _ in 0..5 {
            let exports: Vec<_> = (0..3)
                .map(|_| {
                    let ledger = ledger.clone();
                    std::thread::spawn(move || ledger.export_bytes())
                })
                .collect();
            for export in exports {
                assert_eq!(export.join().unwrap().unwrap().len(), expected);
            }
        }

        // No scratch file outlives its call.
        let dir = ledger.path().parent().unwrap();
        let leftovers: Vec<_> = fs::read_dir(dir)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| name.contains(".push.") || name.contains(".pull."))
            .collect();
        assert!(leftovers.is_empty(), "{leftovers:?}");
    }

    #[backend_test]
    async fn restore_rejects_garbage_and_keeps_local(ledger: Ledger) {
        ledger.upsert_ballot("a@x.org", &["Ana".into()]).unwrap();

        let result = ledger.restore_from_bytes(b"definitely not sqlite");
        assert!(result.is_err());
        assert_eq!(ledger.ballot_count().unwrap(), 1);
    }
}

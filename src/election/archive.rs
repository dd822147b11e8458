use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use log::{error, info};
use serde::Serialize;

use crate::model::{
    export::{write_ballot_table, ExportSummary},
    ledger::{Ledger, StorageError},
    roster::Candidate,
};

const PREFIX: &str = "backup_ballots_";

/// One archived copy of the ledger, taken before a reset.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub taken_at: DateTime<Utc>,
    /// The human-readable ballot table.
    pub export_path: PathBuf,
    /// A raw copy of the ledger file.
    pub ledger_path: PathBuf,
    #[serde(skip)]
    pub summary: ExportSummary,
}

/// Writes snapshots into an append-only backup directory.
///
/// Names follow `backup_ballots_YYYYMMDD_HHMMSS.{csv,db}`, so a plain
/// lexicographic sort lists them oldest first. Existing files are never touched.
#[derive(Debug, Clone)]
pub struct SnapshotArchiver {
    dir: PathBuf,
}

impl SnapshotArchiver {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Archive the ledger as it stands. Either both artifacts are written or
    /// neither is left behind.
    pub fn snapshot(&self, ledger: &Ledger, candidates: &[Candidate]) -> Result<Snapshot, StorageError> {
        fs::create_dir_all(&self.dir)?;
        let taken_at = Utc::now();
        let (stem, csv_file) = self.claim_stem(taken_at)?;
        let export_path = self.dir.join(format!("{stem}.csv"));
        let ledger_path = self.dir.join(format!("{stem}.db"));

        let result = write_export(csv_file, ledger, candidates).and_then(|summary| {
            if ledger_path.exists() {
                return Err(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    format!("{} already exists", ledger_path.display()),
                )
                .into());
            }
            ledger.backup_to(&ledger_path)?;
            Ok(summary)
        });

        match result {
            Ok(summary) => {
                info!(
                    "Snapshot {stem} written: {} voters, {} votes",
                    summary.voters, summary.total_votes
                );
                Ok(Snapshot {
                    taken_at,
                    export_path,
                    ledger_path,
                    summary,
                })
            }
            Err(e) => {
                error!("Snapshot {stem} failed: {e}");
                let _ = fs::remove_file(&export_path);
                let _ = fs::remove_file(&ledger_path);
                Err(e)
            }
        }
    }

    /// Every snapshot stem currently in the backup area, oldest first.
    pub fn list_snapshots(&self) -> Result<Vec<String>, StorageError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut stems = Vec::new();
        for entry in entries {
            let name = entry?.file_name().to_string_lossy().into_owned();
            if let Some(stem) = name.strip_suffix(".csv").filter(|s| s.starts_with(PREFIX)) {
                stems.push(stem.to_string());
            }
        }
        stems.sort();
        Ok(stems)
    }

    /// The ballot table of an existing snapshot. Only names that
    /// [`list_snapshots`](Self::list_snapshots) reports are ever opened.
    pub fn read_export(&self, stem: &str) -> Result<Option<Vec<u8>>, StorageError> {
        if !self.list_snapshots()?.iter().any(|known| known == stem) {
            return Ok(None);
        }
        Ok(Some(fs::read(self.dir.join(format!("{stem}.csv")))?))
    }

    /// Reserve a fresh file name for `taken_at` by creating its CSV exclusively.
    fn claim_stem(&self, taken_at: DateTime<Utc>) -> Result<(String, File), StorageError> {
        let base = format!("{PREFIX}{}", taken_at.format("%Y%m%d_%H%M%S"));
        for attempt in 0u32.. {
            let stem = match attempt {
                0 => base.clone(),
                n => format!("{base}_{n:03}"),
            };
            let path = self.dir.join(format!("{stem}.csv"));
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => return Ok((stem, file)),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(io::Error::new(io::ErrorKind::AlreadyExists, format!("no free snapshot name for {base}")).into())
    }
}

fn write_export(file: File, ledger: &Ledger, candidates: &[Candidate]) -> Result<ExportSummary, StorageError> {
    let ballots = ledger.ballots()?;
    let mut out = BufWriter::new(file);
    let summary = write_ballot_table(&mut out, candidates, &ballots)?;
    out.flush()?;
    out.into_inner().map_err(|e| e.into_error())?.sync_all()?;
    Ok(summary)
}

//! The election state machine and the side effects of its transitions.

mod archive;
mod voting;

pub use archive::{Snapshot, SnapshotArchiver};
pub use voting::CastReceipt;

use std::sync::Arc;

use log::{info, warn};
use rocket::http::Status;
use rocket::tokio::sync::Mutex;
use serde::Serialize;

use crate::error::{Error, Result};
use crate::model::{
    ballot::CandidateId,
    election::{ElectionSettings, ElectionStatus, NewElection},
    export::{ballot_table_bytes, ExportSummary},
    ledger::Ledger,
    roster::{Candidate, Roster},
    tally::Tally,
};
use crate::sync::{SyncClient, SyncOutcome, SyncReport};

/// Result of a status transition.
#[derive(Debug, Serialize)]
pub struct Transition {
    pub settings: ElectionSettings,
    /// Present only for resets.
    pub snapshot: Option<Snapshot>,
    pub sync: SyncReport,
}

/// Everything an administrator sees about the current election.
#[derive(Debug, Serialize)]
pub struct ElectionOverview {
    pub settings: ElectionSettings,
    pub ballots: u64,
    pub sync: SyncState,
    pub snapshots: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct SyncState {
    pub enabled: bool,
    pub paused: bool,
    pub location: Option<String>,
}

/// Candidate labels of `roster`, alphabetically.
pub fn candidate_labels(roster: &dyn Roster) -> Result<Vec<CandidateId>> {
    let mut labels: Vec<_> = roster.list_candidates()?.iter().map(Candidate::label).collect();
    labels.sort();
    Ok(labels)
}

/// Standings of every ballot in `ledger`. Candidates in `roster` without a
/// vote are listed with zero.
pub fn standings(ledger: &Ledger, roster: &dyn Roster) -> Result<Tally> {
    let ballots = ledger.ballots()?;
    Ok(Tally::count(&ballots).including(candidate_labels(roster)?))
}

/// Owns every mutation of the ledger.
///
/// Vote casting, transitions and the pushes they trigger all pass through one
/// gate, so a sync always sees the ledger at least as fresh as the write that
/// triggered it.
#[derive(Clone)]
pub struct ElectionController {
    ledger: Ledger,
    roster: Arc<dyn Roster>,
    archiver: SnapshotArchiver,
    sync: Arc<SyncClient>,
    gate: Arc<Mutex<()>>,
}

impl ElectionController {
    pub fn new(
        ledger: Ledger,
        roster: Arc<dyn Roster>,
        archiver: SnapshotArchiver,
        sync: Arc<SyncClient>,
    ) -> Self {
        Self {
            ledger,
            roster,
            archiver,
            sync,
            gate: Arc::new(Mutex::new(())),
        }
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn roster(&self) -> &dyn Roster {
        self.roster.as_ref()
    }

    pub fn archiver(&self) -> &SnapshotArchiver {
        &self.archiver
    }

    pub fn sync(&self) -> &SyncClient {
        &self.sync
    }

    pub fn settings(&self) -> Result<ElectionSettings> {
        Ok(self.ledger.settings()?)
    }

    pub fn overview(&self) -> Result<ElectionOverview> {
        Ok(ElectionOverview {
            settings: self.ledger.settings()?,
            ballots: self.ledger.ballot_count()?,
            sync: SyncState {
                enabled: self.sync.is_enabled(),
                paused: self.sync.is_auth_expired(),
                location: self.sync.location(),
            },
            snapshots: self.archiver.list_snapshots()?,
        })
    }

    /// Candidate labels as offered on the ballot, alphabetically.
    pub fn candidates(&self) -> Result<Vec<CandidateId>> {
        candidate_labels(self.roster.as_ref())
    }

    /// `OPEN -> CLOSED`, then push.
    pub async fn close(&self) -> Result<Transition> {
        self.transition(ElectionStatus::Closed).await
    }

    /// `CLOSED -> OPEN`, then push.
    pub async fn reopen(&self) -> Result<Transition> {
        self.transition(ElectionStatus::Open).await
    }

    async fn transition(&self, target: ElectionStatus) -> Result<Transition> {
        let _gate = self.gate.lock().await;
        let current = self.ledger.status()?;
        if current == target {
            return Err(Error::Status(
                Status::Conflict,
                format!("Election is already {current}"),
            ));
        }
        self.ledger.set_status(target)?;
        info!("Election status {current} -> {target}");

        let sync = self.report(self.sync.push().await);
        Ok(Transition {
            settings: self.ledger.settings()?,
            snapshot: None,
            sync,
        })
    }

    /// Archive the current election, wipe its ballots and start the next one.
    ///
    /// Nothing is deleted unless the snapshot was fully written, and the new
    /// settings are applied only once the old ballots are gone.
    pub async fn reset(&self, next: NewElection) -> Result<Transition> {
        next.validate().map_err(Error::Validation)?;

        let _gate = self.gate.lock().await;
        let candidates = self.roster.list_candidates()?;
        let snapshot = self.archiver.snapshot(&self.ledger, &candidates)?;

        let deleted = self.ledger.delete_all_ballots()?;
        self.ledger.set_status(ElectionStatus::Open)?;
        if let Some(title) = &next.title {
            self.ledger.set_title(title.trim())?;
        }
        if let Some(limit) = next.max_selections {
            self.ledger.set_max_selections(limit)?;
        }
        if let Some(roster) = &next.roster {
            self.roster.replace(roster)?;
        }
        info!("Election reset: {deleted} ballots archived and removed");

        let sync = self.report(self.sync.push().await);
        Ok(Transition {
            settings: self.ledger.settings()?,
            snapshot: Some(snapshot),
            sync,
        })
    }

    /// Current standings, listing every catalogue candidate.
    pub fn tally(&self) -> Result<Tally> {
        standings(&self.ledger, self.roster.as_ref())
    }

    /// The ballot table as CSV, in the same layout as snapshots.
    pub fn export(&self) -> Result<(Vec<u8>, ExportSummary)> {
        let candidates = self.roster.list_candidates()?;
        let ballots = self.ledger.ballots()?;
        Ok(ballot_table_bytes(&candidates, &ballots)?)
    }

    /// The ballot table archived by an earlier reset.
    pub fn snapshot_export(&self, stem: &str) -> Result<Vec<u8>> {
        self.archiver
            .read_export(stem)?
            .ok_or_else(|| Error::not_found(format!("snapshot {stem}")))
    }

    /// The raw ledger file, as it would be pushed.
    pub fn ledger_bytes(&self) -> Result<Vec<u8>> {
        Ok(self.ledger.export_bytes()?)
    }

    /// Push regardless of the periodic throttle.
    pub async fn push_now(&self) -> SyncReport {
        let _gate = self.gate.lock().await;
        self.report(self.sync.push().await)
    }

    fn report(&self, outcome: SyncOutcome) -> SyncReport {
        if let Some(warning) = outcome.warning() {
            warn!("{warning}");
        }
        outcome.report()
    }
}

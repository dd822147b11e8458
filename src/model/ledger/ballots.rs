use chrono::{DateTime, Utc};
use rocket::serde::json::serde_json;
use rusqlite::{params, OptionalExtension, Row};

use crate::model::ballot::{Ballot, CandidateId};

use super::{Ledger, StorageError};

impl Ledger {
    /// Store `choices` for `voter_id`, replacing any earlier ballot.
    ///
    /// The store takes whatever it is given; selection policy is the caller's job.
    pub fn upsert_ballot(
        &self,
        voter_id: &str,
        choices: &[CandidateId],
    ) -> Result<Ballot, StorageError> {
        let recorded_at = Utc::now();
        let encoded = serde_json::to_string(choices)?;
        self.lock()?.execute(
            "INSERT INTO ballots (voter_id, choices, recorded_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(voter_id) DO UPDATE SET
                 choices = excluded.choices,
                 recorded_at = excluded.recorded_at",
            params![voter_id, encoded, recorded_at],
        )?;
        Ok(Ballot {
            voter_id: voter_id.to_string(),
            choices: choices.to_vec(),
            recorded_at,
        })
    }

    /// The current ballot of `voter_id`, if they have voted.
    pub fn get_ballot(&self, voter_id: &str) -> Result<Option<Ballot>, StorageError> {
        let raw = self
            .lock()?
            .query_row(
                "SELECT voter_id, choices, recorded_at FROM ballots WHERE voter_id = ?1",
                params![voter_id],
                raw_ballot,
            )
            .optional()?;
        raw.map(RawBallot::decode).transpose()
    }

    /// Stream every ballot through `visit`, returning how many were seen.
    ///
    /// Rows are decoded one at a time while the ledger is locked, so `visit`
    /// must not call back into the ledger. Each call starts a fresh scan.
    pub fn scan_ballots<F>(&self, mut visit: F) -> Result<usize, StorageError>
    where
        F: FnMut(Ballot),
    {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT voter_id, choices, recorded_at FROM ballots")?;
        let mut rows = stmt.query([])?;
        let mut seen = 0;
        while let Some(row) = rows.next()? {
            visit(raw_ballot(row)?.decode()?);
            seen += 1;
        }
        Ok(seen)
    }

    /// Collect every ballot.
    pub fn ballots(&self) -> Result<Vec<Ballot>, StorageError> {
        let mut ballots = Vec::new();
        self.scan_ballots(|ballot| ballots.push(ballot))?;
        Ok(ballots)
    }

    pub fn ballot_count(&self) -> Result<u64, StorageError> {
        let count: i64 = self
            .lock()?
            .query_row("SELECT count(*) FROM ballots", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Remove every ballot. Only ever run after a snapshot has been taken.
    pub fn delete_all_ballots(&self) -> Result<u64, StorageError> {
        let deleted = self.lock()?.execute("DELETE FROM ballots", [])?;
        Ok(deleted as u64)
    }
}

/// A row as stored, before the choice list is decoded.
struct RawBallot {
    voter_id: String,
    choices: String,
    recorded_at: DateTime<Utc>,
}

impl RawBallot {
    fn decode(self) -> Result<Ballot, StorageError> {
        let choices = serde_json::from_str(&self.choices).map_err(|e| {
            StorageError::Corrupt(format!("choices of {} unreadable: {e}", self.voter_id))
        })?;
        Ok(Ballot {
            voter_id: self.voter_id,
            choices,
            recorded_at: self.recorded_at,
        })
    }
}

fn raw_ballot(row: &Row<'_>) -> rusqlite::Result<RawBallot> {
    Ok(RawBallot {
        voter_id: row.get(0)?,
        choices: row.get(1)?,
        recorded_at: row.get(2)?,
    })
}

use std::collections::HashSet;

use log::info;
use rocket::http::Status;
use serde::Serialize;

use crate::error::{Error, Result};
use crate::model::{
    ballot::{Ballot, BallotView, CandidateId},
    election::ElectionStatus,
};

use super::ElectionController;

/// What the voter gets back after casting.
#[derive(Debug, Serialize)]
pub struct CastReceipt {
    pub ballot: Ballot,
    /// Set when the ballot was stored but could not be replicated.
    pub sync_warning: Option<String>,
}

impl ElectionController {
    /// The voter's current ballot, empty if they have not voted.
    pub fn ballot_of(&self, voter_id: &str) -> Result<BallotView> {
        let ballot = self.ledger.get_ballot(voter_id)?;
        Ok(BallotView::new(voter_id, ballot))
    }

    /// Record `choices` as `voter_id`'s ballot, replacing any earlier one.
    ///
    /// The ledger is left untouched unless the election is open and every
    /// choice passes validation.
    pub async fn cast_vote(&self, voter_id: &str, choices: Vec<CandidateId>) -> Result<CastReceipt> {
        let _gate = self.gate.lock().await;
        if self.ledger.status()? == ElectionStatus::Closed {
            return Err(Error::Status(
                Status::Forbidden,
                "Voting is closed".to_string(),
            ));
        }
        self.validate_choices(&choices)?;

        let revote = self.ledger.get_ballot(voter_id)?.is_some();
        let ballot = self.ledger.upsert_ballot(voter_id, &choices)?;
        if revote {
            info!("Ballot of {voter_id} replaced");
        } else {
            info!("Ballot of {voter_id} recorded");
        }

        let sync_warning = self.sync.maybe_periodic_push().await.warning();
        Ok(CastReceipt {
            ballot,
            sync_warning,
        })
    }

    fn validate_choices(&self, choices: &[CandidateId]) -> Result<()> {
        if choices.is_empty() {
            return Err(Error::Validation("Select at least one candidate".to_string()));
        }
        let mut seen = HashSet::new();
        if let Some(repeat) = choices.iter().find(|choice| !seen.insert(*choice)) {
            return Err(Error::Validation(format!("{repeat:?} selected more than once")));
        }
        let limit = self.ledger.max_selections()?;
        if choices.len() > limit as usize {
            return Err(Error::Validation(format!(
                "At most {limit} selection(s) allowed, got {}",
                choices.len()
            )));
        }
        let known = self.candidates()?;
        if let Some(unknown) = choices.iter().find(|choice| !known.contains(choice)) {
            return Err(Error::Validation(format!("{unknown:?} is not a candidate")));
        }
        Ok(())
    }
}

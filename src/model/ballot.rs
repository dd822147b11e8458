use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Candidates are identified by their full display label,
/// e.g. `"Ana (Inst1 - East)"`.
pub type CandidateId = String;

/// One voter's current ballot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ballot {
    pub voter_id: String,
    /// Selected candidates, in the order they were submitted.
    pub choices: Vec<CandidateId>,
    pub recorded_at: DateTime<Utc>,
}

impl Ballot {
    /// Has this ballot selected the given candidate?
    pub fn selects(&self, candidate: &str) -> bool {
        self.choices.iter().any(|choice| choice == candidate)
    }
}

/// A ballot as returned to the voter: empty choices if they have not voted yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BallotView {
    pub voter_id: String,
    pub choices: Vec<CandidateId>,
    pub recorded_at: Option<DateTime<Utc>>,
}

impl BallotView {
    pub fn new(voter_id: &str, ballot: Option<Ballot>) -> Self {
        match ballot {
            Some(ballot) => Self {
                voter_id: ballot.voter_id,
                choices: ballot.choices,
                recorded_at: Some(ballot.recorded_at),
            },
            None => Self {
                voter_id: voter_id.to_string(),
                choices: Vec::new(),
                recorded_at: None,
            },
        }
    }

    pub fn has_voted(&self) -> bool {
        !self.choices.is_empty()
    }
}

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::roster::RosterUpdate;

/// States in the election lifecycle.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ElectionStatus {
    /// Ballots are accepted.
    Open,
    /// No further ballots are accepted; existing ones remain visible.
    Closed,
}

impl ElectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "OPEN",
            Self::Closed => "CLOSED",
        }
    }
}

impl Display for ElectionStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ElectionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OPEN" => Ok(Self::Open),
            "CLOSED" => Ok(Self::Closed),
            other => Err(format!("unknown election status {other:?}")),
        }
    }
}

/// Settings written into a brand new ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElectionDefaults {
    pub title: String,
    pub max_selections: u32,
}

impl Default for ElectionDefaults {
    fn default() -> Self {
        Self {
            title: "Election".to_string(),
            max_selections: 3,
        }
    }
}

/// A typed view of the election config store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElectionSettings {
    pub title: String,
    pub status: ElectionStatus,
    pub max_selections: u32,
    pub last_remote_sync_at: Option<DateTime<Utc>>,
}

/// Configuration for the next election, applied by a reset.
/// Absent fields keep their current values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewElection {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub max_selections: Option<u32>,
    #[serde(default)]
    pub roster: Option<RosterUpdate>,
}

impl NewElection {
    /// Reject malformed settings before anything is touched.
    pub fn validate(&self) -> Result<(), String> {
        if let Some(title) = &self.title {
            if title.trim().is_empty() {
                return Err("Election title must not be empty".to_string());
            }
        }
        if self.max_selections == Some(0) {
            return Err("Selection limit must be a positive integer".to_string());
        }
        if let Some(roster) = &self.roster {
            roster.validate().map_err(|e| e.to_string())?;
        }
        Ok(())
    }
}

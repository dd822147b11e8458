//! Voter roster and candidate catalogue.
//!
//! Both are plain CSV files owned by the election organisers. They are read
//! fresh on every call, since a reset may replace them between elections.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use log::warn;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;

use crate::model::ballot::CandidateId;

pub const VOTERS_FILE: &str = "voters.csv";
pub const CANDIDATES_FILE: &str = "candidates.csv";

const VOTER_COLUMNS: [&str; 3] = ["email", "name", "secret"];
const CANDIDATE_COLUMNS: [&str; 3] = ["name", "affiliation", "region"];

#[derive(Debug, Error)]
pub enum RosterError {
    #[error("{file}: required column '{column}' not found")]
    MissingColumn {
        file: &'static str,
        column: &'static str,
    },
    #[error("{0}: no entries")]
    Empty(&'static str),
    #[error("{file}: duplicate entry {entry:?}")]
    Duplicate { file: &'static str, entry: String },
    #[error("{file}: {source}")]
    Csv {
        file: &'static str,
        #[source]
        source: csv::Error,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl RosterError {
    /// Was the roster content itself at fault (as opposed to the filesystem)?
    pub fn is_malformed(&self) -> bool {
        !matches!(self, Self::Io(_))
    }
}

/// A candidate as listed in the catalogue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub name: String,
    pub affiliation: String,
    pub region: String,
}

impl Candidate {
    /// The identifier ballots refer to this candidate by.
    pub fn label(&self) -> CandidateId {
        format!("{} ({} - {})", self.name, self.affiliation, self.region)
    }
}

/// One line of the voter roster.
#[derive(Debug, Clone, Deserialize)]
struct VoterEntry {
    email: String,
    name: String,
    secret: String,
}

/// Replacement roster files for a new election, as raw CSV text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterUpdate {
    pub voters_csv: String,
    pub candidates_csv: String,
}

impl RosterUpdate {
    /// Check both files parse and carry the required columns.
    pub fn validate(&self) -> Result<(), RosterError> {
        parse_voters(&self.voters_csv)?;
        parse_candidates(&self.candidates_csv)?;
        Ok(())
    }
}

/// Source of voter credentials and the candidate catalogue.
pub trait Roster: Send + Sync {
    /// The voter's display name if `id` is on the roster with this `secret`.
    fn is_valid_voter(&self, id: &str, secret: &str) -> Result<Option<String>, RosterError>;

    /// Is `id` on the roster at all?
    fn knows_voter(&self, id: &str) -> Result<bool, RosterError>;

    /// The candidate catalogue, in roster order.
    fn list_candidates(&self) -> Result<Vec<Candidate>, RosterError>;

    /// Swap in a new roster and catalogue.
    fn replace(&self, update: &RosterUpdate) -> Result<(), RosterError>;
}

/// Normalise a voter identifier for comparison and storage.
pub fn normalize_voter_id(id: &str) -> String {
    id.trim().to_lowercase()
}

/// A [`Roster`] backed by `voters.csv` and `candidates.csv` in one directory.
/// Inline CSV text can stand in for a file that does not exist.
pub struct CsvRoster {
    dir: PathBuf,
    inline_voters: Option<String>,
    inline_candidates: Option<String>,
}

impl CsvRoster {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            inline_voters: None,
            inline_candidates: None,
        }
    }

    /// Use the given CSV text when the corresponding file is absent.
    pub fn with_inline(mut self, voters: Option<String>, candidates: Option<String>) -> Self {
        self.inline_voters = voters;
        self.inline_candidates = candidates;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Raw CSV text of one roster file, from disk or the inline fallback.
    pub fn read_source(&self, file: &'static str) -> Result<Option<String>, RosterError> {
        let path = self.dir.join(file);
        if path.exists() {
            return Ok(Some(fs::read_to_string(path)?));
        }
        let inline = match file {
            VOTERS_FILE => &self.inline_voters,
            _ => &self.inline_candidates,
        };
        Ok(inline.clone())
    }

    fn voters(&self) -> Result<Vec<VoterEntry>, RosterError> {
        match self.read_source(VOTERS_FILE)? {
            Some(text) => parse_voters(&text),
            None => {
                warn!("No voter roster found in {}", self.dir.display());
                Ok(Vec::new())
            }
        }
    }
}

impl Roster for CsvRoster {
    fn is_valid_voter(&self, id: &str, secret: &str) -> Result<Option<String>, RosterError> {
        let id = normalize_voter_id(id);
        let secret = secret.trim();
        if id.is_empty() || secret.is_empty() {
            return Ok(None);
        }
        Ok(self
            .voters()?
            .into_iter()
            .find(|voter| normalize_voter_id(&voter.email) == id)
            .filter(|voter| voter.secret.trim() == secret)
            .map(|voter| voter.name))
    }

    fn knows_voter(&self, id: &str) -> Result<bool, RosterError> {
        let id = normalize_voter_id(id);
        Ok(self
            .voters()?
            .iter()
            .any(|voter| normalize_voter_id(&voter.email) == id))
    }

    fn list_candidates(&self) -> Result<Vec<Candidate>, RosterError> {
        match self.read_source(CANDIDATES_FILE)? {
            Some(text) => parse_candidates(&text),
            None => {
                warn!("No candidate catalogue found in {}", self.dir.display());
                Ok(Vec::new())
            }
        }
    }

    fn replace(&self, update: &RosterUpdate) -> Result<(), RosterError> {
        update.validate()?;
        fs::create_dir_all(&self.dir)?;
        write_atomically(&self.dir.join(VOTERS_FILE), &update.voters_csv)?;
        write_atomically(&self.dir.join(CANDIDATES_FILE), &update.candidates_csv)?;
        Ok(())
    }
}

fn write_atomically(path: &Path, contents: &str) -> Result<(), RosterError> {
    let tmp = path.with_extension("csv.tmp");
    fs::write(&tmp, contents)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

fn parse_voters(text: &str) -> Result<Vec<VoterEntry>, RosterError> {
    let voters: Vec<VoterEntry> = parse_csv(text, VOTERS_FILE, &VOTER_COLUMNS)?;
    let mut seen = HashSet::new();
    for voter in &voters {
        if !seen.insert(normalize_voter_id(&voter.email)) {
            return Err(RosterError::Duplicate {
                file: VOTERS_FILE,
                entry: voter.email.clone(),
            });
        }
    }
    Ok(voters)
}

fn parse_candidates(text: &str) -> Result<Vec<Candidate>, RosterError> {
    let candidates: Vec<Candidate> = parse_csv(text, CANDIDATES_FILE, &CANDIDATE_COLUMNS)?;
    let mut seen = HashSet::new();
    for candidate in &candidates {
        if !seen.insert(candidate.label()) {
            return Err(RosterError::Duplicate {
                file: CANDIDATES_FILE,
                entry: candidate.label(),
            });
        }
    }
    Ok(candidates)
}

/// Parse a CSV file with the given required columns (extra columns are ignored).
fn parse_csv<T: DeserializeOwned>(
    text: &str,
    file: &'static str,
    required: &[&'static str],
) -> Result<Vec<T>, RosterError> {
    let csv_err = |source: csv::Error| RosterError::Csv { file, source };
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());

    let headers = reader.headers().map_err(csv_err)?.clone();
    for column in required {
        if !headers.iter().any(|h| h == *column) {
            return Err(RosterError::MissingColumn { file, column });
        }
    }

    let records = reader
        .deserialize()
        .collect::<Result<Vec<T>, _>>()
        .map_err(csv_err)?;
    if records.is_empty() {
        return Err(RosterError::Empty(file));
    }
    Ok(records)
}

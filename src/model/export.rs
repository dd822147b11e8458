//! Human-readable tabular export of the ballot store.
//!
//! One row per voter, one `0`/`1` column per candidate, a per-voter total, and
//! a trailing `TOTAL` row. Columns come from the candidate catalogue; any
//! choice that no longer matches a catalogue label gets a column of its own
//! after the catalogue ones, so no recorded vote is dropped from the totals.

use std::collections::BTreeSet;
use std::io::Write;

use crate::model::{
    ballot::{Ballot, CandidateId},
    ledger::StorageError,
    roster::Candidate,
};

pub const TOTAL_ROW: &str = "TOTAL";

/// What an export contained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportSummary {
    pub voters: u64,
    pub columns: Vec<(CandidateId, u64)>,
    pub total_votes: u64,
}

/// The column layout for one export, fixed before any row is written.
struct Schema {
    columns: Vec<CandidateId>,
}

impl Schema {
    fn new(candidates: &[Candidate], ballots: &[Ballot]) -> Self {
        let mut columns: Vec<CandidateId> = candidates.iter().map(Candidate::label).collect();
        let unknown: BTreeSet<&CandidateId> = ballots
            .iter()
            .flat_map(|ballot| &ballot.choices)
            .filter(|choice| !columns.contains(choice))
            .collect();
        columns.extend(unknown.into_iter().cloned());
        Self { columns }
    }

    fn header(&self) -> Vec<&str> {
        let mut header = vec!["voter_id", "recorded_at"];
        header.extend(self.columns.iter().map(String::as_str));
        header.push("total");
        header
    }
}

/// Write `ballots` as CSV to `out`.
pub fn write_ballot_table<W: Write>(
    out: W,
    candidates: &[Candidate],
    ballots: &[Ballot],
) -> Result<ExportSummary, StorageError> {
    let schema = Schema::new(candidates, ballots);
    let mut sums = vec![0_u64; schema.columns.len()];
    let mut writer = csv::Writer::from_writer(out);
    writer.write_record(schema.header())?;

    let mut rows: Vec<&Ballot> = ballots.iter().collect();
    rows.sort_by(|a, b| a.voter_id.cmp(&b.voter_id));
    for ballot in &rows {
        let mut record = vec![ballot.voter_id.clone(), ballot.recorded_at.to_rfc3339()];
        let mut selected = 0_u64;
        for (column, sum) in schema.columns.iter().zip(sums.iter_mut()) {
            let mark = u64::from(ballot.selects(column));
            selected += mark;
            *sum += mark;
            record.push(mark.to_string());
        }
        record.push(selected.to_string());
        writer.write_record(&record)?;
    }

    let total_votes: u64 = sums.iter().sum();
    let mut footer = vec![TOTAL_ROW.to_string(), String::new()];
    footer.extend(sums.iter().map(u64::to_string));
    footer.push(total_votes.to_string());
    writer.write_record(&footer)?;
    writer.flush()?;

    Ok(ExportSummary {
        voters: rows.len() as u64,
        columns: schema.columns.into_iter().zip(sums).collect(),
        total_votes,
    })
}

/// Render the export into memory.
pub fn ballot_table_bytes(
    candidates: &[Candidate],
    ballots: &[Ballot],
) -> Result<(Vec<u8>, ExportSummary), StorageError> {
    let mut buffer = Vec::new();
    let summary = write_ballot_table(&mut buffer, candidates, ballots)?;
    Ok((buffer, summary))
}

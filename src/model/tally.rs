use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::model::ballot::{Ballot, CandidateId};

/// Votes received by one candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateCount {
    pub candidate: CandidateId,
    pub votes: u64,
}

/// Running results of an election.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tally {
    /// Number of voters with a ballot on record.
    pub voters: u64,
    /// Candidates ranked by votes, most first; ties broken by label.
    pub ranking: Vec<CandidateCount>,
}

impl Tally {
    /// Count every selection in `ballots`.
    pub fn count<'a>(ballots: impl IntoIterator<Item = &'a Ballot>) -> Self {
        let mut voters = 0;
        let mut counts: HashMap<&str, u64> = HashMap::new();
        for ballot in ballots {
            voters += 1;
            for choice in &ballot.choices {
                *counts.entry(choice.as_str()).or_default() += 1;
            }
        }

        let ranking = counts
            .into_iter()
            .map(|(candidate, votes)| CandidateCount {
                candidate: candidate.to_string(),
                votes,
            })
            .collect();

        let mut tally = Self { voters, ranking };
        tally.rank();
        tally
    }

    /// List every candidate in `labels`, with zero votes if nobody chose them.
    pub fn including(mut self, labels: impl IntoIterator<Item = CandidateId>) -> Self {
        for label in labels {
            if !self.ranking.iter().any(|count| count.candidate == label) {
                self.ranking.push(CandidateCount {
                    candidate: label,
                    votes: 0,
                });
            }
        }
        self.rank();
        self
    }

    fn rank(&mut self) {
        self.ranking
            .sort_by(|a, b| b.votes.cmp(&a.votes).then(a.candidate.cmp(&b.candidate)));
    }

    /// Votes for the given candidate.
    pub fn votes_for(&self, candidate: &str) -> u64 {
        self.ranking
            .iter()
            .find(|count| count.candidate == candidate)
            .map(|count| count.votes)
            .unwrap_or(0)
    }

    /// Sum of all selections.
    pub fn total_votes(&self) -> u64 {
        self.ranking.iter().map(|count| count.votes).sum()
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn ballot(voter: &str, choices: &[&str]) -> Ballot {
        Ballot {
            voter_id: voter.to_string(),
            choices: choices.iter().map(|c| c.to_string()).collect(),
            recorded_at: Utc::now(),
        }
    }

    #[test]
    fn ranking_orders_by_votes_then_name() {
        let ballots = vec![
            ballot("a", &["Carla", "Ana"]),
            ballot("b", &["Bob"]),
            ballot("c", &["Carla", "Bob"]),
            ballot("d", &["Ana"]),
        ];
        let tally = Tally::count(&ballots);

        assert_eq!(tally.voters, 4);
        let order: Vec<_> = tally
            .ranking
            .iter()
            .map(|c| (c.candidate.as_str(), c.votes))
            .collect();
        assert_eq!(order, vec![("Ana", 2), ("Bob", 2), ("Carla", 2)]);
        assert_eq!(tally.total_votes(), 6);
        assert_eq!(tally.votes_for("Nobody"), 0);
    }

    #[test]
    fn unchosen_candidates_rank_last_with_zero() {
        let ballots = vec![ballot("a", &["Bob"])];
        let tally = Tally::count(&ballots).including(["Ana".to_string(), "Bob".to_string()]);

        assert_eq!(tally.ranking[0].candidate, "Bob");
        assert_eq!(tally.ranking[1].candidate, "Ana");
        assert_eq!(tally.votes_for("Ana"), 0);
        assert_eq!(tally.total_votes(), 1);
    }

    #[test]
    fn empty_ledger_has_empty_tally() {
        assert_eq!(Tally::count(&[]), Tally::default());
    }
}

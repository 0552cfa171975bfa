// Vote counting for matches in the voting phase.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::tournament::{MatchId, ParticipantId, Side};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BallotError {
    #[error("Invalid choice '{0}': vote 1 or 2")]
    InvalidChoice(String),
}

/// Supplies the final `(votes_a, votes_b)` for a match when its voting closes.
pub trait VoteSource {
    fn tally(&self, match_id: &str) -> (u32, u32);
}

/// Parse a voter's choice: `1`/`a` for the first submission, `2`/`b` for the second.
pub fn parse_choice(raw: &str) -> Result<Side, BallotError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "a" => Ok(Side::A),
        "2" | "b" => Ok(Side::B),
        _ => Err(BallotError::InvalidChoice(raw.to_string())),
    }
}

/// One ballot per voter per match; a later ballot replaces the earlier one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BallotBox {
    ballots: HashMap<MatchId, HashMap<ParticipantId, Side>>,
}

impl BallotBox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a ballot. Returns true if it replaced an earlier ballot by the same voter.
    pub fn cast(&mut self, match_id: &str, voter: ParticipantId, side: Side) -> bool {
        self.ballots
            .entry(match_id.to_string())
            .or_default()
            .insert(voter, side)
            .is_some()
    }

    /// Number of distinct voters for a match.
    pub fn voters(&self, match_id: &str) -> usize {
        self.ballots.get(match_id).map_or(0, |b| b.len())
    }

    /// Drop ballots of every match for which `keep` returns false.
    pub fn retain(&mut self, mut keep: impl FnMut(&str) -> bool) {
        self.ballots.retain(|id, _| keep(id));
    }

    pub fn clear(&mut self) {
        self.ballots.clear();
    }
}

impl VoteSource for BallotBox {
    fn tally(&self, match_id: &str) -> (u32, u32) {
        let Some(ballots) = self.ballots.get(match_id) else {
            return (0, 0);
        };
        ballots.values().fold((0, 0), |(a, b), side| match side {
            Side::A => (a + 1, b),
            Side::B => (a, b + 1),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tally_counts_each_voter_once() {
        let mut ballots = BallotBox::new();
        assert!(!ballots.cast("r0m0", 1, Side::A));
        assert!(!ballots.cast("r0m0", 2, Side::B));
        assert!(!ballots.cast("r0m0", 3, Side::B));
        // Voter 1 changes their mind
        assert!(ballots.cast("r0m0", 1, Side::B));

        assert_eq!(ballots.tally("r0m0"), (0, 3));
        assert_eq!(ballots.voters("r0m0"), 3);
    }

    #[test]
    fn test_tally_is_per_match() {
        let mut ballots = BallotBox::new();
        ballots.cast("r0m0", 1, Side::A);
        ballots.cast("r0m1", 1, Side::B);
        assert_eq!(ballots.tally("r0m0"), (1, 0));
        assert_eq!(ballots.tally("r0m1"), (0, 1));
        assert_eq!(ballots.tally("r9m9"), (0, 0));
    }

    #[test]
    fn test_retain_and_clear() {
        let mut ballots = BallotBox::new();
        ballots.cast("r0m0", 1, Side::A);
        ballots.cast("r0m1", 2, Side::A);
        ballots.retain(|id| id == "r0m1");
        assert_eq!(ballots.voters("r0m0"), 0);
        assert_eq!(ballots.voters("r0m1"), 1);

        ballots.clear();
        assert_eq!(ballots, BallotBox::new());
    }

    #[test]
    fn test_parse_choice() {
        assert_eq!(parse_choice("1"), Ok(Side::A));
        assert_eq!(parse_choice(" B "), Ok(Side::B));
        assert_eq!(
            parse_choice("3"),
            Err(BallotError::InvalidChoice("3".to_string()))
        );
    }

    #[test]
    fn test_ballots_survive_json() {
        let mut ballots = BallotBox::new();
        ballots.cast("r1m0", 123456789012345678, Side::B);
        let json = serde_json::to_string(&ballots).unwrap();
        let restored: BallotBox = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.tally("r1m0"), (0, 1));
    }
}

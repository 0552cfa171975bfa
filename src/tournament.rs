// Tournament bracket model: matches, rounds, and single-elimination pairing
// with deferred byes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Platform user id of a participant.
pub type ParticipantId = u64;

/// Stable match key, scoped to round and slot (`r0m1`, `r2bye`).
pub type MatchId = String;

/// Lifecycle of a single match. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchPhase {
    Pending,
    AwaitingSubmissions,
    Voting,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TournamentStatus {
    NotStarted,
    InProgress,
    Completed,
}

/// One side of a match. Player A is always present; player B is absent for a bye.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    A,
    B,
}

/// How the winner of a match was decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// Lone participant advanced without an opponent.
    Bye,
    /// Only one side submitted before the deadline.
    Forfeit,
    /// Neither side submitted; decided by coin flip.
    NoSubmissions,
    /// Higher vote count.
    Votes,
    /// Equal vote counts; decided by coin flip.
    TieBreak,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Match {
    pub id: MatchId,
    pub round: usize,
    pub player_a: ParticipantId,
    pub player_b: Option<ParticipantId>,
    pub submission_a: Option<String>,
    pub submission_b: Option<String>,
    pub tally: (u32, u32),
    pub winner: Option<ParticipantId>,
    pub phase: MatchPhase,
    pub resolution: Option<Resolution>,
    pub prompt_image: Option<String>,
    pub voting_deadline: Option<DateTime<Utc>>,
}

impl Match {
    /// A playable match waiting to be started.
    pub fn pending(
        id: MatchId,
        round: usize,
        player_a: ParticipantId,
        player_b: ParticipantId,
        prompt_image: Option<String>,
    ) -> Self {
        Self {
            id,
            round,
            player_a,
            player_b: Some(player_b),
            submission_a: None,
            submission_b: None,
            tally: (0, 0),
            winner: None,
            phase: MatchPhase::Pending,
            resolution: None,
            prompt_image,
            voting_deadline: None,
        }
    }

    /// A bye: resolved on creation, never enters submission or voting.
    pub fn bye(id: MatchId, round: usize, player: ParticipantId) -> Self {
        Self {
            id,
            round,
            player_a: player,
            player_b: None,
            submission_a: None,
            submission_b: None,
            tally: (0, 0),
            winner: Some(player),
            phase: MatchPhase::Completed,
            resolution: Some(Resolution::Bye),
            prompt_image: None,
            voting_deadline: None,
        }
    }

    pub fn is_bye(&self) -> bool {
        self.player_b.is_none()
    }

    /// Which side `participant` plays in this match, if any.
    pub fn side_of(&self, participant: ParticipantId) -> Option<Side> {
        if self.player_a == participant {
            Some(Side::A)
        } else if self.player_b == Some(participant) {
            Some(Side::B)
        } else {
            None
        }
    }

    pub fn player(&self, side: Side) -> Option<ParticipantId> {
        match side {
            Side::A => Some(self.player_a),
            Side::B => self.player_b,
        }
    }

    pub fn submission(&self, side: Side) -> Option<&str> {
        match side {
            Side::A => self.submission_a.as_deref(),
            Side::B => self.submission_b.as_deref(),
        }
    }

    pub fn set_submission(&mut self, side: Side, content: String) {
        match side {
            Side::A => self.submission_a = Some(content),
            Side::B => self.submission_b = Some(content),
        }
    }

    pub fn has_both_submissions(&self) -> bool {
        self.submission_a.is_some() && self.submission_b.is_some()
    }

    /// Close the match with `side` as winner. The winner is written once;
    /// a completed match is left untouched.
    pub fn complete(&mut self, side: Side, resolution: Resolution) -> Option<ParticipantId> {
        if self.phase == MatchPhase::Completed {
            return self.winner;
        }
        let winner = self.player(side)?;
        self.winner = Some(winner);
        self.resolution = Some(resolution);
        self.phase = MatchPhase::Completed;
        self.voting_deadline = None;
        Some(winner)
    }
}

/// One layer of the bracket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Round {
    pub index: usize,
    /// Playable matches, in slot order.
    pub matches: Vec<MatchId>,
    /// Bye deferred from the previous round; its winner is an entrant of this round.
    pub carried_bye: Option<MatchId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tournament {
    pub rounds: Vec<Round>,
    pub current_round: usize,
    /// Matches of the current round still in progress.
    pub active_matches: Vec<MatchId>,
    /// Bye produced by the current round's odd entrant, slated for the next round.
    pub pending_bye: Option<MatchId>,
    pub status: TournamentStatus,
    pub entrants: usize,
    pub submission_deadline: Option<DateTime<Utc>>,
}

impl Tournament {
    pub fn new(entrants: usize) -> Self {
        Self {
            rounds: Vec::new(),
            current_round: 0,
            active_matches: Vec::new(),
            pending_bye: None,
            status: TournamentStatus::NotStarted,
            entrants,
            submission_deadline: None,
        }
    }

    pub fn current(&self) -> Option<&Round> {
        self.rounds.get(self.current_round)
    }
}

/// Result of pairing a list of entrants.
#[derive(Debug, Clone, PartialEq)]
pub struct Pairing {
    pub pairs: Vec<(ParticipantId, ParticipantId)>,
    pub bye: Option<ParticipantId>,
}

/// Generate single-elimination bracket pairings.
///
/// Entrants are paired sequentially: (0 vs 1), (2 vs 3), etc.
/// If the number of entrants is odd, the last one gets a bye into the next round.
pub fn generate_single_elimination_bracket(entrants: &[ParticipantId]) -> Pairing {
    let pairs = entrants
        .chunks_exact(2)
        .map(|pair| (pair[0], pair[1]))
        .collect();
    let bye = if entrants.len() % 2 == 1 {
        entrants.last().copied()
    } else {
        None
    };
    Pairing { pairs, bye }
}

/// Number of rounds a single-elimination bracket needs: ceil(log2(n)).
pub fn total_rounds(num_participants: usize) -> usize {
    if num_participants <= 1 {
        0
    } else {
        num_participants.next_power_of_two().trailing_zeros() as usize
    }
}

/// Matches to materialize for one round.
#[derive(Debug, Clone)]
pub struct RoundPlan {
    pub round: Round,
    pub matches: Vec<Match>,
    /// Deferred bye for round `index + 1`.
    pub bye: Option<Match>,
}

/// Lay out round `index` from its ordered entrants. `prompt` supplies the
/// prompt image for each playable match.
pub fn plan_round(
    index: usize,
    entrants: &[ParticipantId],
    carried_bye: Option<MatchId>,
    mut prompt: impl FnMut() -> Option<String>,
) -> RoundPlan {
    let pairing = generate_single_elimination_bracket(entrants);

    let matches: Vec<Match> = pairing
        .pairs
        .iter()
        .enumerate()
        .map(|(slot, (a, b))| Match::pending(format!("r{index}m{slot}"), index, *a, *b, prompt()))
        .collect();

    let bye = pairing
        .bye
        .map(|player| Match::bye(format!("r{}bye", index + 1), index + 1, player));

    RoundPlan {
        round: Round {
            index,
            matches: matches.iter().map(|m| m.id.clone()).collect(),
            carried_bye,
        },
        matches,
        bye,
    }
}

// Events emitted by the tournament engine for the notifier to announce.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::tournament::{MatchId, ParticipantId, Resolution};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TournamentEvent {
    SignupOpened,
    SignupClosed {
        registered: usize,
    },
    ParticipantRegistered {
        participant: ParticipantId,
    },
    TournamentStarted {
        participants: Vec<ParticipantId>,
        total_rounds: usize,
    },
    MatchStarted {
        match_id: MatchId,
        round: usize,
        player_a: ParticipantId,
        player_b: ParticipantId,
        prompt_image: Option<String>,
        submission_deadline: DateTime<Utc>,
    },
    /// A bye carried into the round was resolved without play.
    ByeAwarded {
        match_id: MatchId,
        participant: ParticipantId,
    },
    SubmissionReceived {
        match_id: MatchId,
        participant: ParticipantId,
    },
    VotingStarted {
        match_id: MatchId,
        player_a: ParticipantId,
        player_b: ParticipantId,
        submission_a: String,
        submission_b: String,
        prompt_image: Option<String>,
        voting_deadline: DateTime<Utc>,
    },
    MatchCompleted {
        match_id: MatchId,
        winner: ParticipantId,
        resolution: Resolution,
        tally: (u32, u32),
    },
    RoundAdvanced {
        round: usize,
        matches: Vec<MatchId>,
    },
    TournamentCompleted {
        champion: ParticipantId,
    },
    TournamentReset,
}

impl TournamentEvent {
    /// Short stable label, used for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SignupOpened => "signup_opened",
            Self::SignupClosed { .. } => "signup_closed",
            Self::ParticipantRegistered { .. } => "participant_registered",
            Self::TournamentStarted { .. } => "tournament_started",
            Self::MatchStarted { .. } => "match_started",
            Self::ByeAwarded { .. } => "bye_awarded",
            Self::SubmissionReceived { .. } => "submission_received",
            Self::VotingStarted { .. } => "voting_started",
            Self::MatchCompleted { .. } => "match_completed",
            Self::RoundAdvanced { .. } => "round_advanced",
            Self::TournamentCompleted { .. } => "tournament_completed",
            Self::TournamentReset => "tournament_reset",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_json_is_tagged() {
        let event = TournamentEvent::MatchCompleted {
            match_id: "r0m0".into(),
            winner: 42,
            resolution: Resolution::TieBreak,
            tally: (3, 3),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "match_completed");
        assert_eq!(json["winner"], 42);
        assert_eq!(json["resolution"], "tie_break");
        assert_eq!(event.kind(), "match_completed");
    }
}

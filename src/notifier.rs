// Outbound announcements: renders engine events as chat-ready text and fans
// them out to subscribers (WebSocket clients, bridges).

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde::Serialize;
use tokio::sync::broadcast;

use crate::events::TournamentEvent;
use crate::tournament::{ParticipantId, Resolution};

/// Delivers events produced by one tournament session.
pub trait Notifier: Send + Sync {
    fn publish(&self, session: &str, events: &[TournamentEvent]);
}

/// Maps participant ids to human-readable names.
pub trait IdentityResolver: Send + Sync {
    fn display_name(&self, participant: ParticipantId) -> String;
}

/// In-memory name directory, filled in as participants register.
#[derive(Debug, Default)]
pub struct Directory {
    names: RwLock<HashMap<ParticipantId, String>>,
}

impl Directory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn remember(&self, participant: ParticipantId, name: impl Into<String>) {
        let name = name.into();
        if name.trim().is_empty() {
            return;
        }
        if let Ok(mut names) = self.names.write() {
            names.insert(participant, name);
        }
    }
}

impl IdentityResolver for Directory {
    fn display_name(&self, participant: ParticipantId) -> String {
        self.names
            .read()
            .ok()
            .and_then(|names| names.get(&participant).cloned())
            .unwrap_or_else(|| format!("user-{participant}"))
    }
}

/// JSON envelope sent to subscribers.
#[derive(Debug, Serialize)]
pub struct Announcement<'a> {
    pub session: &'a str,
    pub message: String,
    pub event: &'a TournamentEvent,
}

/// Broadcasts announcements as JSON strings over a tokio broadcast channel.
pub struct BroadcastNotifier {
    tx: broadcast::Sender<String>,
    names: Arc<dyn IdentityResolver>,
}

impl BroadcastNotifier {
    pub fn new(names: Arc<dyn IdentityResolver>) -> Self {
        let (tx, _) = broadcast::channel(256);
        Self { tx, names }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Notifier for BroadcastNotifier {
    fn publish(&self, session: &str, events: &[TournamentEvent]) {
        for event in events {
            let message = render(event, self.names.as_ref());
            tracing::info!(session, kind = event.kind(), "{message}");

            let envelope = Announcement {
                session,
                message,
                event,
            };
            match serde_json::to_string(&envelope) {
                // No subscribers is not an error.
                Ok(json) => {
                    let _ = self.tx.send(json);
                }
                Err(e) => tracing::warn!("Failed to encode announcement: {e}"),
            }
        }
    }
}

/// Render an event as a single chat line.
pub fn render(event: &TournamentEvent, names: &dyn IdentityResolver) -> String {
    let name = |id: &ParticipantId| names.display_name(*id);
    match event {
        TournamentEvent::SignupOpened => {
            "Aux Battle signups are now open! Register to join the tournament.".to_string()
        }
        TournamentEvent::SignupClosed { registered } => {
            format!("Signups are now closed! {registered} players have registered.")
        }
        TournamentEvent::ParticipantRegistered { participant } => {
            format!("{} has signed up for the Aux Battle tournament!", name(participant))
        }
        TournamentEvent::TournamentStarted {
            participants,
            total_rounds,
        } => format!(
            "The tournament has begun with {} players over {total_rounds} rounds!",
            participants.len()
        ),
        TournamentEvent::MatchStarted {
            match_id,
            round,
            player_a,
            player_b,
            prompt_image,
            submission_deadline,
        } => {
            let mut line = format!(
                "Round {} match {match_id}: {} vs {}. Submit your song before {}.",
                round + 1,
                name(player_a),
                name(player_b),
                submission_deadline.format("%Y-%m-%d %H:%M UTC")
            );
            if let Some(image) = prompt_image {
                line.push_str(&format!(" Prompt: {image}"));
            }
            line
        }
        TournamentEvent::ByeAwarded { participant, .. } => {
            format!("{} advances with a bye.", name(participant))
        }
        TournamentEvent::SubmissionReceived { participant, .. } => {
            format!("{} has submitted their song!", name(participant))
        }
        TournamentEvent::VotingStarted {
            match_id,
            player_a,
            player_b,
            submission_a,
            submission_b,
            voting_deadline,
            ..
        } => format!(
            "Voting is open for {match_id} until {}! Option 1 ({}): {submission_a} | Option 2 ({}): {submission_b}",
            voting_deadline.format("%Y-%m-%d %H:%M UTC"),
            name(player_a),
            name(player_b)
        ),
        TournamentEvent::MatchCompleted {
            match_id,
            winner,
            resolution,
            tally,
        } => {
            let how = match resolution {
                Resolution::Votes => format!("with {} votes", tally.0.max(tally.1)),
                Resolution::TieBreak => format!("on a coin flip after a {}-{} tie", tally.0, tally.1),
                Resolution::Forfeit => "by default, the opponent did not submit".to_string(),
                Resolution::NoSubmissions => "on a coin flip, nobody submitted".to_string(),
                Resolution::Bye => "with a bye".to_string(),
            };
            format!("{} wins {match_id} {how}!", name(winner))
        }
        TournamentEvent::RoundAdvanced { round, matches } => {
            format!("Round {} created with {} matches.", round + 1, matches.len())
        }
        TournamentEvent::TournamentCompleted { champion } => {
            format!("Tournament completed! The champion is {}!", name(champion))
        }
        TournamentEvent::TournamentReset => "Tournament has been reset!".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directory_fallback_name() {
        let dir = Directory::new();
        dir.remember(7, "dj_seven");
        dir.remember(8, "   ");
        assert_eq!(dir.display_name(7), "dj_seven");
        assert_eq!(dir.display_name(8), "user-8");
    }

    #[test]
    fn test_render_uses_names() {
        let dir = Directory::new();
        dir.remember(1, "alice");
        let line = render(&TournamentEvent::TournamentCompleted { champion: 1 }, &dir);
        assert_eq!(line, "Tournament completed! The champion is alice!");

        let line = render(
            &TournamentEvent::MatchCompleted {
                match_id: "r0m0".into(),
                winner: 2,
                resolution: Resolution::TieBreak,
                tally: (4, 4),
            },
            &dir,
        );
        assert_eq!(line, "user-2 wins r0m0 on a coin flip after a 4-4 tie!");
    }

    #[tokio::test]
    async fn test_broadcast_delivers_envelope() {
        let notifier = BroadcastNotifier::new(Arc::new(Directory::new()));
        let mut rx = notifier.subscribe();
        assert_eq!(notifier.subscriber_count(), 1);

        notifier.publish(
            "guild-9",
            &[
                TournamentEvent::SignupOpened,
                TournamentEvent::SignupClosed { registered: 3 },
            ],
        );

        let first: serde_json::Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(first["session"], "guild-9");
        assert_eq!(first["event"]["type"], "signup_opened");

        let second: serde_json::Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(
            second["message"],
            "Signups are now closed! 3 players have registered."
        );
    }

    #[test]
    fn test_publish_without_subscribers() {
        let notifier = BroadcastNotifier::new(Arc::new(Directory::new()));
        notifier.publish("s", &[TournamentEvent::TournamentReset]);
        assert_eq!(notifier.subscriber_count(), 0);
    }
}

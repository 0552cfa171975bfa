// Tournament engine: signup roster, bracket progression, and the per-match
// submission/voting state machine.
//
// The engine is synchronous. Every operation validates first, then mutates,
// and returns the events the notifier should announce. Deadlines are handed
// to an injected `Scheduler`; the caller feeds fired timers back through
// `handle_timer`.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ballot::VoteSource;
use crate::events::TournamentEvent;
use crate::links::LinkValidator;
use crate::scheduler::{Scheduler, Timer, TimerId};
use crate::tournament::{
    plan_round, total_rounds, Match, MatchId, MatchPhase, ParticipantId, Resolution, Side,
    Tournament, TournamentStatus,
};

pub const MIN_PARTICIPANTS: usize = 2;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("Signups are currently closed")]
    SignupClosed,

    #[error("Signups are already closed")]
    SignupAlreadyClosed,

    #[error("Participant {0} is already registered")]
    AlreadyRegistered(ParticipantId),

    #[error("Insufficient participants: need {needed}, have {current}")]
    InsufficientParticipants { needed: usize, current: usize },

    #[error("A tournament is already in progress")]
    AlreadyInProgress,

    #[error("Participant {0} has no match awaiting submissions")]
    NoActiveMatch(ParticipantId),

    #[error("Submission is not an accepted media link")]
    InvalidContent,

    #[error("Match {0} is not in the voting phase")]
    MatchNotInVoting(MatchId),
}

impl EngineError {
    /// Short stable label, used for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SignupClosed => "signup_closed",
            Self::SignupAlreadyClosed => "signup_already_closed",
            Self::AlreadyRegistered(_) => "already_registered",
            Self::InsufficientParticipants { .. } => "insufficient_participants",
            Self::AlreadyInProgress => "already_in_progress",
            Self::NoActiveMatch(_) => "no_active_match",
            Self::InvalidContent => "invalid_content",
            Self::MatchNotInVoting(_) => "match_not_in_voting",
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Full serializable state of one tournament session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Snapshot {
    /// Registered participants, in signup order.
    pub participants: Vec<ParticipantId>,
    pub is_signup_open: bool,
    pub matches: BTreeMap<MatchId, Match>,
    pub tournament: Option<Tournament>,
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub submission_window: Duration,
    pub voting_window: Duration,
    /// Pool of prompt images; each playable match draws one.
    pub prompt_images: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            submission_window: Duration::from_secs(12 * 3600),
            voting_window: Duration::from_secs(24 * 3600),
            prompt_images: Vec::new(),
        }
    }
}

/// Read-only view of the bracket, round by round.
#[derive(Debug, Clone, Serialize)]
pub struct BracketView {
    pub status: TournamentStatus,
    pub current_round: usize,
    pub total_rounds: usize,
    pub rounds: Vec<RoundView>,
    /// Bye waiting for the round after the current one.
    pub pending_bye: Option<Match>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RoundView {
    pub index: usize,
    pub matches: Vec<Match>,
    pub carried_bye: Option<Match>,
}

pub struct TournamentEngine {
    state: Snapshot,
    config: EngineConfig,
    links: Arc<dyn LinkValidator>,
    scheduler: Arc<dyn Scheduler>,
    timers: HashMap<TimerId, Timer>,
    rng: StdRng,
}

impl TournamentEngine {
    pub fn new(
        config: EngineConfig,
        links: Arc<dyn LinkValidator>,
        scheduler: Arc<dyn Scheduler>,
    ) -> Self {
        Self {
            state: Snapshot::default(),
            config,
            links,
            scheduler,
            timers: HashMap::new(),
            rng: StdRng::from_entropy(),
        }
    }

    /// Replace the random source (shuffles, prompt draws, coin flips).
    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = rng;
        self
    }

    /// Rebuild an engine from a persisted snapshot, re-arming the deadlines
    /// that were outstanding when it was taken. Elapsed deadlines fire immediately.
    pub fn restore(
        snapshot: Snapshot,
        config: EngineConfig,
        links: Arc<dyn LinkValidator>,
        scheduler: Arc<dyn Scheduler>,
    ) -> Self {
        let mut engine = Self::new(config, links, scheduler);
        engine.state = snapshot;
        engine.rearm_deadlines(Utc::now());
        engine
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.state
    }

    pub fn tournament(&self) -> Option<&Tournament> {
        self.state.tournament.as_ref()
    }

    pub fn find_match(&self, match_id: &str) -> Option<&Match> {
        self.state.matches.get(match_id)
    }

    /// Number of deadlines scheduled and not yet fired or cancelled.
    pub fn pending_timers(&self) -> usize {
        self.timers.len()
    }

    pub fn bracket(&self) -> Option<BracketView> {
        let t = self.state.tournament.as_ref()?;
        let lookup = |id: &MatchId| self.state.matches.get(id).cloned();
        let rounds = t
            .rounds
            .iter()
            .map(|r| RoundView {
                index: r.index,
                matches: r.matches.iter().filter_map(lookup).collect(),
                carried_bye: r.carried_bye.as_ref().and_then(lookup),
            })
            .collect();
        Some(BracketView {
            status: t.status,
            current_round: t.current_round,
            total_rounds: total_rounds(t.entrants),
            rounds,
            pending_bye: t.pending_bye.as_ref().and_then(lookup),
        })
    }

    // ── Signup ────────────────────────────────────────────────────────

    /// Open signups for a new tournament. Always clears the roster.
    pub fn open_signup(&mut self) -> Vec<TournamentEvent> {
        self.state.is_signup_open = true;
        self.state.participants.clear();
        tracing::info!("Signups opened");
        vec![TournamentEvent::SignupOpened]
    }

    pub fn close_signup(&mut self) -> EngineResult<Vec<TournamentEvent>> {
        if !self.state.is_signup_open {
            return Err(EngineError::SignupAlreadyClosed);
        }
        self.state.is_signup_open = false;
        let registered = self.state.participants.len();
        tracing::info!("Signups closed with {registered} participants");
        Ok(vec![TournamentEvent::SignupClosed { registered }])
    }

    pub fn register_participant(
        &mut self,
        participant: ParticipantId,
    ) -> EngineResult<Vec<TournamentEvent>> {
        if !self.state.is_signup_open {
            return Err(EngineError::SignupClosed);
        }
        if self.state.participants.contains(&participant) {
            return Err(EngineError::AlreadyRegistered(participant));
        }
        self.state.participants.push(participant);
        Ok(vec![TournamentEvent::ParticipantRegistered { participant }])
    }

    // ── Bracket progression ───────────────────────────────────────────

    /// Shuffle the roster into round 0 and start its matches.
    pub fn start_tournament(&mut self) -> EngineResult<Vec<TournamentEvent>> {
        if self
            .state
            .tournament
            .as_ref()
            .is_some_and(|t| t.status == TournamentStatus::InProgress)
        {
            return Err(EngineError::AlreadyInProgress);
        }
        let current = self.state.participants.len();
        if current < MIN_PARTICIPANTS {
            return Err(EngineError::InsufficientParticipants {
                needed: MIN_PARTICIPANTS,
                current,
            });
        }

        self.cancel_timers(|_| true);
        let mut roster = self.state.participants.clone();
        roster.shuffle(&mut self.rng);

        self.state.is_signup_open = false;
        self.state.matches.clear();
        let mut tournament = Tournament::new(roster.len());
        tournament.status = TournamentStatus::InProgress;
        self.state.tournament = Some(tournament);
        self.install_round(0, &roster, None);

        tracing::info!(
            "Tournament started with {} participants ({} rounds)",
            roster.len(),
            total_rounds(roster.len())
        );

        let mut events = vec![TournamentEvent::TournamentStarted {
            total_rounds: total_rounds(roster.len()),
            participants: roster,
        }];
        events.extend(self.begin_active_matches());
        Ok(events)
    }

    /// Move every pending match of the current round into the submission
    /// phase and arm the round's submission deadline. No-op when nothing is pending.
    pub fn begin_active_matches(&mut self) -> Vec<TournamentEvent> {
        let Some(t) = self.active_tournament() else {
            return Vec::new();
        };
        let round = t.current_round;
        let carried_bye = t.current().and_then(|r| r.carried_bye.clone());
        let pending: Vec<MatchId> = t
            .active_matches
            .iter()
            .filter(|id| {
                self.state
                    .matches
                    .get(*id)
                    .is_some_and(|m| m.phase == MatchPhase::Pending)
            })
            .cloned()
            .collect();
        if pending.is_empty() {
            return Vec::new();
        }

        let window = self.config.submission_window;
        let deadline = deadline_after(Utc::now(), window);
        let mut events = Vec::new();

        if let Some(bye) = carried_bye.and_then(|id| self.state.matches.get(&id)) {
            events.push(TournamentEvent::ByeAwarded {
                match_id: bye.id.clone(),
                participant: bye.player_a,
            });
        }

        for id in &pending {
            let Some(m) = self.state.matches.get_mut(id) else {
                continue;
            };
            let Some(player_b) = m.player_b else {
                continue;
            };
            m.phase = MatchPhase::AwaitingSubmissions;
            events.push(TournamentEvent::MatchStarted {
                match_id: m.id.clone(),
                round,
                player_a: m.player_a,
                player_b,
                prompt_image: m.prompt_image.clone(),
                submission_deadline: deadline,
            });
        }

        if let Some(t) = self.state.tournament.as_mut() {
            t.submission_deadline = Some(deadline);
        }
        self.arm(window, Timer::SubmissionDeadline { round });
        tracing::info!("Round {} submissions open for {} matches", round + 1, pending.len());
        events
    }

    /// Store a participant's submission for their match. Once both sides have
    /// submitted, the match moves straight to voting.
    ///
    /// `match_id`, when given, must name the participant's current match.
    pub fn record_submission(
        &mut self,
        match_id: Option<&str>,
        participant: ParticipantId,
        content: &str,
    ) -> EngineResult<Vec<TournamentEvent>> {
        let id = self
            .awaiting_match_of(participant)
            .ok_or(EngineError::NoActiveMatch(participant))?;
        if match_id.is_some_and(|expected| expected != id) {
            return Err(EngineError::NoActiveMatch(participant));
        }
        if !self.links.is_accepted_link(content) {
            return Err(EngineError::InvalidContent);
        }

        let voting_window = self.config.voting_window;
        let m = self
            .state
            .matches
            .get_mut(&id)
            .ok_or(EngineError::NoActiveMatch(participant))?;
        let side = m
            .side_of(participant)
            .ok_or(EngineError::NoActiveMatch(participant))?;
        m.set_submission(side, content.trim().to_string());

        let mut events = vec![TournamentEvent::SubmissionReceived {
            match_id: id.clone(),
            participant,
        }];
        if !m.has_both_submissions() {
            return Ok(events);
        }

        let deadline = deadline_after(Utc::now(), voting_window);
        m.phase = MatchPhase::Voting;
        m.voting_deadline = Some(deadline);
        events.push(TournamentEvent::VotingStarted {
            match_id: id.clone(),
            player_a: m.player_a,
            player_b: m.player_b.unwrap_or_default(),
            submission_a: m.submission_a.clone().unwrap_or_default(),
            submission_b: m.submission_b.clone().unwrap_or_default(),
            prompt_image: m.prompt_image.clone(),
            voting_deadline: deadline,
        });
        tracing::info!("Match {id} entered voting");
        self.arm(voting_window, Timer::VotingDeadline { match_id: id });
        Ok(events)
    }

    /// Resolve every match still waiting on submissions: a lone submitter wins
    /// by default, a silent match is decided by coin flip.
    pub fn force_advance_submissions(&mut self) -> Vec<TournamentEvent> {
        let Some(t) = self.active_tournament() else {
            return Vec::new();
        };
        let awaiting: Vec<MatchId> = t
            .active_matches
            .iter()
            .filter(|id| {
                self.state
                    .matches
                    .get(*id)
                    .is_some_and(|m| m.phase == MatchPhase::AwaitingSubmissions)
            })
            .cloned()
            .collect();

        self.cancel_timers(|t| matches!(t, Timer::SubmissionDeadline { .. }));
        if let Some(t) = self.state.tournament.as_mut() {
            t.submission_deadline = None;
        }

        let mut events = Vec::new();
        for id in awaiting {
            let Some(m) = self.state.matches.get(&id) else {
                continue;
            };
            let (side, resolution) = match (m.submission_a.is_some(), m.submission_b.is_some()) {
                (true, false) => (Side::A, Resolution::Forfeit),
                (false, true) => (Side::B, Resolution::Forfeit),
                (false, false) => (self.coin_flip(), Resolution::NoSubmissions),
                (true, true) => continue,
            };
            events.extend(self.finish_match(&id, side, resolution));
        }

        events.extend(self.check_round_completion());
        events
    }

    /// Close voting on a match with the final counts. Higher count wins; a tie
    /// is broken by coin flip.
    pub fn record_vote_tally(
        &mut self,
        match_id: &str,
        count_a: u32,
        count_b: u32,
    ) -> EngineResult<Vec<TournamentEvent>> {
        let not_voting = || EngineError::MatchNotInVoting(match_id.to_string());
        let m = self
            .state
            .matches
            .get_mut(match_id)
            .filter(|m| m.phase == MatchPhase::Voting)
            .ok_or_else(not_voting)?;
        m.tally = (count_a, count_b);

        let (side, resolution) = match count_a.cmp(&count_b) {
            std::cmp::Ordering::Greater => (Side::A, Resolution::Votes),
            std::cmp::Ordering::Less => (Side::B, Resolution::Votes),
            std::cmp::Ordering::Equal => (self.coin_flip(), Resolution::TieBreak),
        };

        self.cancel_timers(|t| {
            matches!(t, Timer::VotingDeadline { match_id: id } if id == match_id)
        });
        let mut events: Vec<TournamentEvent> = self
            .finish_match(match_id, side, resolution)
            .into_iter()
            .collect();
        if events.is_empty() {
            return Err(not_voting());
        }
        events.extend(self.check_round_completion());
        Ok(events)
    }

    /// Once every match of the current round is completed, either crown the
    /// champion or build and start the next round from the winners.
    pub fn check_round_completion(&mut self) -> Vec<TournamentEvent> {
        let Some(t) = self.active_tournament() else {
            return Vec::new();
        };
        let Some(round) = t.current() else {
            return Vec::new();
        };

        let mut winners = Vec::with_capacity(round.matches.len() + 1);
        for id in &round.matches {
            match self.state.matches.get(id) {
                Some(m) if m.phase == MatchPhase::Completed => winners.extend(m.winner),
                _ => return Vec::new(),
            }
        }
        let carried = t.pending_bye.clone();
        if let Some(bye) = carried.as_ref().and_then(|id| self.state.matches.get(id)) {
            winners.extend(bye.winner);
        }
        let next_round = t.current_round + 1;

        self.cancel_timers(|t| matches!(t, Timer::SubmissionDeadline { .. }));

        if let [champion] = winners.as_slice() {
            let champion = *champion;
            self.cancel_timers(|_| true);
            if let Some(t) = self.state.tournament.as_mut() {
                t.status = TournamentStatus::Completed;
                t.active_matches.clear();
                t.submission_deadline = None;
            }
            tracing::info!("Tournament completed, champion {champion}");
            return vec![TournamentEvent::TournamentCompleted { champion }];
        }

        self.install_round(next_round, &winners, carried);
        let matches = self
            .state
            .tournament
            .as_ref()
            .and_then(|t| t.current())
            .map(|r| r.matches.clone())
            .unwrap_or_default();
        tracing::info!("Advanced to round {} with {} matches", next_round + 1, matches.len());

        let mut events = vec![TournamentEvent::RoundAdvanced {
            round: next_round,
            matches,
        }];
        events.extend(self.begin_active_matches());
        events
    }

    /// Dispatch a fired deadline. Timers that were cancelled, or that refer to
    /// a match or round that has moved on, are ignored.
    pub fn handle_timer(&mut self, id: TimerId, votes: &dyn VoteSource) -> Vec<TournamentEvent> {
        let Some(timer) = self.timers.remove(&id) else {
            tracing::debug!("Ignoring stale timer {id}");
            return Vec::new();
        };
        match timer {
            Timer::SubmissionDeadline { round } => {
                let current = self.active_tournament().map(|t| t.current_round);
                if current != Some(round) {
                    tracing::debug!("Ignoring submission deadline for past round {round}");
                    return Vec::new();
                }
                self.force_advance_submissions()
            }
            Timer::VotingDeadline { match_id } => {
                let (a, b) = votes.tally(&match_id);
                match self.record_vote_tally(&match_id, a, b) {
                    Ok(events) => events,
                    Err(e) => {
                        tracing::debug!("Ignoring voting deadline: {e}");
                        Vec::new()
                    }
                }
            }
        }
    }

    /// Clear roster, matches, tournament and signup flag, cancelling every deadline.
    pub fn reset(&mut self) -> Vec<TournamentEvent> {
        self.cancel_timers(|_| true);
        self.state = Snapshot::default();
        tracing::info!("Tournament reset");
        vec![TournamentEvent::TournamentReset]
    }

    // ── Internals ─────────────────────────────────────────────────────

    fn active_tournament(&self) -> Option<&Tournament> {
        self.state
            .tournament
            .as_ref()
            .filter(|t| t.status == TournamentStatus::InProgress)
    }

    fn awaiting_match_of(&self, participant: ParticipantId) -> Option<MatchId> {
        let t = self.active_tournament()?;
        t.active_matches
            .iter()
            .filter_map(|id| self.state.matches.get(id))
            .find(|m| {
                m.phase == MatchPhase::AwaitingSubmissions && m.side_of(participant).is_some()
            })
            .map(|m| m.id.clone())
    }

    fn coin_flip(&mut self) -> Side {
        if self.rng.gen_bool(0.5) {
            Side::A
        } else {
            Side::B
        }
    }

    /// Materialize round `index` and make its matches the active set.
    fn install_round(&mut self, index: usize, entrants: &[ParticipantId], carried_bye: Option<MatchId>) {
        let images = &self.config.prompt_images;
        let rng = &mut self.rng;
        let plan = plan_round(index, entrants, carried_bye, || images.choose(&mut *rng).cloned());

        for m in plan.matches {
            self.state.matches.insert(m.id.clone(), m);
        }
        let pending_bye = plan.bye.map(|bye| {
            let id = bye.id.clone();
            self.state.matches.insert(id.clone(), bye);
            id
        });

        if let Some(t) = self.state.tournament.as_mut() {
            t.current_round = index;
            t.active_matches = plan.round.matches.clone();
            t.pending_bye = pending_bye;
            t.submission_deadline = None;
            t.rounds.push(plan.round);
        }
    }

    fn finish_match(
        &mut self,
        match_id: &str,
        side: Side,
        resolution: Resolution,
    ) -> Option<TournamentEvent> {
        let m = self.state.matches.get_mut(match_id)?;
        if m.phase == MatchPhase::Completed {
            return None;
        }
        let winner = m.complete(side, resolution)?;
        let event = TournamentEvent::MatchCompleted {
            match_id: m.id.clone(),
            winner,
            resolution,
            tally: m.tally,
        };
        if let Some(t) = self.state.tournament.as_mut() {
            t.active_matches.retain(|id| id != match_id);
        }
        tracing::info!("Match {match_id} won by {winner} ({resolution:?})");
        Some(event)
    }

    fn arm(&mut self, delay: Duration, timer: Timer) -> TimerId {
        let id = self.scheduler.schedule(delay, timer.clone());
        self.timers.insert(id, timer);
        id
    }

    fn cancel_timers(&mut self, pred: impl Fn(&Timer) -> bool) {
        let ids: Vec<TimerId> = self
            .timers
            .iter()
            .filter(|(_, t)| pred(t))
            .map(|(id, _)| *id)
            .collect();
        for id in ids {
            self.timers.remove(&id);
            self.scheduler.cancel(id);
        }
    }

    fn rearm_deadlines(&mut self, now: DateTime<Utc>) {
        let Some(t) = self.active_tournament() else {
            return;
        };
        let round = t.current_round;
        let submission_deadline = t.submission_deadline;
        let mut awaiting = false;
        let mut voting = Vec::new();
        for m in t.active_matches.iter().filter_map(|id| self.state.matches.get(id)) {
            match m.phase {
                MatchPhase::AwaitingSubmissions => awaiting = true,
                MatchPhase::Voting => voting.push((m.id.clone(), m.voting_deadline)),
                _ => {}
            }
        }

        if awaiting {
            let delay = submission_deadline.map_or(Duration::ZERO, |d| remaining(d, now));
            self.arm(delay, Timer::SubmissionDeadline { round });
        }
        for (match_id, deadline) in voting {
            let delay = deadline.map_or(Duration::ZERO, |d| remaining(d, now));
            self.arm(delay, Timer::VotingDeadline { match_id });
        }
    }
}

fn deadline_after(now: DateTime<Utc>, window: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(window)
        .ok()
        .and_then(|d| now.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn remaining(deadline: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (deadline - now).to_std().unwrap_or(Duration::ZERO)
}

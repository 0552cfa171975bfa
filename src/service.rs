// Session repository: one tournament engine per session id, with mutations
// serialized per session, persisted after every change, and announced
// through the notifier.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::ballot::{parse_choice, BallotBox, BallotError, VoteSource};
use crate::db::Database;
use crate::engine::{BracketView, EngineConfig, EngineError, Snapshot, TournamentEngine};
use crate::events::TournamentEvent;
use crate::links::LinkValidator;
use crate::metrics;
use crate::notifier::{Directory, Notifier};
use crate::scheduler::{TimerFired, TokioScheduler};
use crate::tournament::{Match, MatchPhase, ParticipantId};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Ballot(#[from] BallotError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Session encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

impl ServiceError {
    /// Short stable label, used for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Engine(e) => e.kind(),
            Self::Ballot(_) => "invalid_choice",
            Self::Database(_) => "database",
            Self::Encoding(_) => "encoding",
        }
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;

/// What gets persisted per session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    #[serde(default)]
    pub snapshot: Snapshot,
    #[serde(default)]
    pub ballots: BallotBox,
}

/// Acknowledgement for an accepted ballot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VoteReceipt {
    pub match_id: String,
    /// True when the voter's earlier ballot was replaced.
    pub replaced: bool,
    pub voters: usize,
}

/// A match together with its live vote count.
#[derive(Debug, Clone, Serialize)]
pub struct MatchView {
    #[serde(flatten)]
    pub details: Match,
    pub live_tally: (u32, u32),
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub engine: EngineConfig,
    /// Extra attempts for a failed save.
    pub save_retries: u32,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            save_retries: 3,
        }
    }
}

struct Session {
    engine: TournamentEngine,
    ballots: BallotBox,
    /// Set once the session has left the cache.
    evicted: bool,
}

impl Session {
    fn record(&self) -> SessionRecord {
        SessionRecord {
            snapshot: self.engine.snapshot().clone(),
            ballots: self.ballots.clone(),
        }
    }

    fn is_blank(&self) -> bool {
        self.ballots == BallotBox::default() && *self.engine.snapshot() == Snapshot::default()
    }

    /// Ballots only matter while their match is voting.
    fn prune_ballots(&mut self) {
        let engine = &self.engine;
        self.ballots.retain(|id| {
            engine
                .find_match(id)
                .is_some_and(|m| m.phase == MatchPhase::Voting)
        });
    }
}

pub struct AuxBattleService {
    db: Arc<Database>,
    config: ServiceConfig,
    links: Arc<dyn LinkValidator>,
    notifier: Arc<dyn Notifier>,
    directory: Arc<Directory>,
    timer_tx: mpsc::UnboundedSender<TimerFired>,
    sessions: Mutex<HashMap<String, Arc<Mutex<Session>>>>,
}

impl AuxBattleService {
    /// Build the service. Fired deadlines arrive on the returned receiver;
    /// hand it to [`spawn_timer_worker`] to feed them back in.
    pub fn new(
        db: Arc<Database>,
        config: ServiceConfig,
        links: Arc<dyn LinkValidator>,
        notifier: Arc<dyn Notifier>,
        directory: Arc<Directory>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<TimerFired>) {
        let (timer_tx, timer_rx) = mpsc::unbounded_channel();
        let service = Arc::new(Self {
            db,
            config,
            links,
            notifier,
            directory,
            timer_tx,
            sessions: Mutex::new(HashMap::new()),
        });
        (service, timer_rx)
    }

    pub fn directory(&self) -> &Arc<Directory> {
        &self.directory
    }

    // ── Session loading ───────────────────────────────────────────────

    /// The stored record for `session_id`. An unreadable record is logged
    /// and replaced by a blank one.
    async fn load_record(&self, session_id: &str) -> ServiceResult<Option<SessionRecord>> {
        let Some(json) = self.db.load(session_id).await? else {
            return Ok(None);
        };
        match serde_json::from_str::<SessionRecord>(&json) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                tracing::error!("Discarding unreadable record for session {session_id}: {e}");
                Ok(Some(SessionRecord::default()))
            }
        }
    }

    fn install(
        &self,
        sessions: &mut HashMap<String, Arc<Mutex<Session>>>,
        session_id: &str,
        record: SessionRecord,
    ) -> Arc<Mutex<Session>> {
        let scheduler = Arc::new(TokioScheduler::new(session_id, self.timer_tx.clone()));
        let engine = TournamentEngine::restore(
            record.snapshot,
            self.config.engine.clone(),
            self.links.clone(),
            scheduler,
        );
        if engine.pending_timers() > 0 {
            tracing::info!(
                "Restored session {session_id} with {} pending deadlines",
                engine.pending_timers()
            );
        }

        let session = Arc::new(Mutex::new(Session {
            engine,
            ballots: record.ballots,
            evicted: false,
        }));
        sessions.insert(session_id.to_string(), session.clone());
        metrics::LOADED_SESSIONS.set(sessions.len() as i64);
        session
    }

    /// A cached or stored session. Unknown ids are not cached.
    async fn find_session(&self, session_id: &str) -> ServiceResult<Option<Arc<Mutex<Session>>>> {
        let mut sessions = self.sessions.lock().await;
        if let Some(session) = sessions.get(session_id) {
            return Ok(Some(session.clone()));
        }
        let Some(record) = self.load_record(session_id).await? else {
            return Ok(None);
        };
        Ok(Some(self.install(&mut sessions, session_id, record)))
    }

    /// A cached or stored session, or a blank one for an unknown id.
    async fn open_session(&self, session_id: &str) -> ServiceResult<Arc<Mutex<Session>>> {
        let mut sessions = self.sessions.lock().await;
        if let Some(session) = sessions.get(session_id) {
            return Ok(session.clone());
        }
        let record = self.load_record(session_id).await?.unwrap_or_default();
        Ok(self.install(&mut sessions, session_id, record))
    }

    /// Drop a session that holds no state from the cache. The caller holds
    /// the session lock, so anyone waiting on it sees `evicted` and reloads.
    async fn evict(&self, session_id: &str, session: &mut Session) {
        session.evicted = true;
        let mut sessions = self.sessions.lock().await;
        sessions.remove(session_id);
        metrics::LOADED_SESSIONS.set(sessions.len() as i64);
    }

    /// Load every persisted session so outstanding deadlines are re-armed.
    pub async fn restore_sessions(&self) -> ServiceResult<usize> {
        let stored = self.db.list_sessions().await?;
        for row in &stored {
            self.open_session(&row.key).await?;
        }
        Ok(stored.len())
    }

    pub async fn session_ids(&self) -> ServiceResult<Vec<String>> {
        Ok(self
            .db
            .list_sessions()
            .await?
            .into_iter()
            .map(|s| s.key)
            .collect())
    }

    // ── Mutation pipeline ─────────────────────────────────────────────

    /// Run one operation under the session lock, then persist and publish.
    /// A failed save is retried and logged; it never undoes the mutation.
    /// Sessions left blank are evicted and removed from the database
    /// instead of saved.
    async fn mutate<T>(
        &self,
        session_id: &str,
        operation: &'static str,
        apply: impl FnOnce(&mut Session) -> ServiceResult<(T, Vec<TournamentEvent>)>,
    ) -> ServiceResult<T> {
        let mut session = loop {
            let session = self.open_session(session_id).await?.lock_owned().await;
            if !session.evicted {
                break session;
            }
        };

        let (value, events) = match apply(&mut *session) {
            Ok(done) => done,
            Err(e) => {
                metrics::OPERATIONS_TOTAL
                    .with_label_values(&[operation, e.kind()])
                    .inc();
                tracing::warn!(session = session_id, operation, "Rejected: {e}");
                if session.is_blank() {
                    self.evict(session_id, &mut session).await;
                }
                return Err(e);
            }
        };
        metrics::OPERATIONS_TOTAL
            .with_label_values(&[operation, "ok"])
            .inc();

        session.prune_ballots();
        if session.is_blank() {
            // Delete while still cached so no one reloads the old row
            if let Err(e) = self.db.delete(session_id).await {
                tracing::error!("Failed to delete session {session_id}: {e}");
                metrics::SAVE_FAILURES_TOTAL.inc();
            }
            self.evict(session_id, &mut session).await;
        } else {
            let record = session.record();
            self.persist(session_id, &record).await;
        }

        self.notifier.publish(session_id, &events);
        for event in &events {
            metrics::EVENTS_PUBLISHED_TOTAL
                .with_label_values(&[event.kind()])
                .inc();
        }
        Ok(value)
    }

    async fn persist(&self, session_id: &str, record: &SessionRecord) {
        let json = match serde_json::to_string(record) {
            Ok(json) => json,
            Err(e) => {
                tracing::error!("Failed to encode session {session_id}: {e}");
                metrics::SAVE_FAILURES_TOTAL.inc();
                return;
            }
        };

        let started = Instant::now();
        let attempts = self.config.save_retries + 1;
        for attempt in 1..=attempts {
            match self.db.save(session_id, &json).await {
                Ok(()) => {
                    metrics::SAVE_DURATION_SECONDS.observe(started.elapsed().as_secs_f64());
                    return;
                }
                Err(e) if attempt < attempts => {
                    tracing::warn!("Save of session {session_id} failed (attempt {attempt}): {e}");
                    tokio::time::sleep(Duration::from_millis(50 * u64::from(attempt))).await;
                }
                Err(e) => {
                    tracing::error!(
                        "Giving up saving session {session_id} after {attempts} attempts: {e}"
                    );
                }
            }
        }
        metrics::SAVE_FAILURES_TOTAL.inc();
    }

    // ── Operations ────────────────────────────────────────────────────

    pub async fn open_signup(&self, session_id: &str) -> ServiceResult<Vec<TournamentEvent>> {
        self.mutate(session_id, "open_signup", |s| {
            let events = s.engine.open_signup();
            Ok((events.clone(), events))
        })
        .await
    }

    pub async fn close_signup(&self, session_id: &str) -> ServiceResult<Vec<TournamentEvent>> {
        self.mutate(session_id, "close_signup", |s| {
            let events = s.engine.close_signup()?;
            Ok((events.clone(), events))
        })
        .await
    }

    pub async fn register(
        &self,
        session_id: &str,
        participant: ParticipantId,
        display_name: Option<String>,
    ) -> ServiceResult<Vec<TournamentEvent>> {
        let directory = self.directory.clone();
        self.mutate(session_id, "register", move |s| {
            let events = s.engine.register_participant(participant)?;
            if let Some(name) = display_name {
                directory.remember(participant, name);
            }
            Ok((events.clone(), events))
        })
        .await
    }

    pub async fn start(&self, session_id: &str) -> ServiceResult<Vec<TournamentEvent>> {
        self.mutate(session_id, "start", |s| {
            let events = s.engine.start_tournament()?;
            s.ballots.clear();
            Ok((events.clone(), events))
        })
        .await
    }

    pub async fn submit(
        &self,
        session_id: &str,
        match_id: Option<&str>,
        participant: ParticipantId,
        content: &str,
    ) -> ServiceResult<Vec<TournamentEvent>> {
        self.mutate(session_id, "submit", |s| {
            let events = s.engine.record_submission(match_id, participant, content)?;
            Ok((events.clone(), events))
        })
        .await
    }

    /// Record a ballot for a match that is currently voting.
    pub async fn cast_vote(
        &self,
        session_id: &str,
        match_id: &str,
        voter: ParticipantId,
        choice: &str,
    ) -> ServiceResult<VoteReceipt> {
        let receipt = self
            .mutate(session_id, "vote", |s| {
                let side = parse_choice(choice)?;
                let voting = s
                    .engine
                    .find_match(match_id)
                    .is_some_and(|m| m.phase == MatchPhase::Voting);
                if !voting {
                    return Err(EngineError::MatchNotInVoting(match_id.to_string()).into());
                }
                let replaced = s.ballots.cast(match_id, voter, side);
                let receipt = VoteReceipt {
                    match_id: match_id.to_string(),
                    replaced,
                    voters: s.ballots.voters(match_id),
                };
                Ok((receipt, Vec::new()))
            })
            .await?;
        metrics::VOTES_CAST_TOTAL.inc();
        Ok(receipt)
    }

    /// Close voting on a match now, using the ballots cast so far.
    pub async fn end_voting(
        &self,
        session_id: &str,
        match_id: &str,
    ) -> ServiceResult<Vec<TournamentEvent>> {
        self.mutate(session_id, "end_voting", |s| {
            let (a, b) = s.ballots.tally(match_id);
            let events = s.engine.record_vote_tally(match_id, a, b)?;
            Ok((events.clone(), events))
        })
        .await
    }

    /// Fast-forward the current round's submission deadline.
    pub async fn force_advance(&self, session_id: &str) -> ServiceResult<Vec<TournamentEvent>> {
        self.mutate(session_id, "force_advance", |s| {
            let events = s.engine.force_advance_submissions();
            Ok((events.clone(), events))
        })
        .await
    }

    pub async fn reset(&self, session_id: &str) -> ServiceResult<Vec<TournamentEvent>> {
        self.mutate(session_id, "reset", |s| {
            let events = s.engine.reset();
            s.ballots.clear();
            Ok((events.clone(), events))
        })
        .await
    }

    /// Feed a fired deadline back into its session. Stale timers are ignored
    /// by the engine and produce no events.
    pub async fn handle_timer(&self, fired: TimerFired) -> ServiceResult<Vec<TournamentEvent>> {
        metrics::TIMERS_FIRED_TOTAL
            .with_label_values(&[fired.timer.kind()])
            .inc();
        tracing::debug!("Timer {} fired for session {}", fired.timer.kind(), fired.session);
        self.mutate(&fired.session, "timer", |s| {
            let Session {
                engine, ballots, ..
            } = s;
            let events = engine.handle_timer(fired.id, &*ballots);
            Ok((events.clone(), events))
        })
        .await
    }

    // ── Reads ─────────────────────────────────────────────────────────

    pub async fn snapshot(&self, session_id: &str) -> ServiceResult<Snapshot> {
        let Some(handle) = self.find_session(session_id).await? else {
            return Ok(Snapshot::default());
        };
        let session = handle.lock().await;
        Ok(session.engine.snapshot().clone())
    }

    pub async fn bracket(&self, session_id: &str) -> ServiceResult<Option<BracketView>> {
        let Some(handle) = self.find_session(session_id).await? else {
            return Ok(None);
        };
        let session = handle.lock().await;
        Ok(session.engine.bracket())
    }

    pub async fn match_view(
        &self,
        session_id: &str,
        match_id: &str,
    ) -> ServiceResult<Option<MatchView>> {
        let Some(handle) = self.find_session(session_id).await? else {
            return Ok(None);
        };
        let session = handle.lock().await;
        Ok(session.engine.find_match(match_id).map(|m| MatchView {
            details: m.clone(),
            live_tally: session.ballots.tally(match_id),
        }))
    }
}

/// Spawn a background task that routes fired deadlines back into their sessions.
pub fn spawn_timer_worker(
    service: Arc<AuxBattleService>,
    mut timers: mpsc::UnboundedReceiver<TimerFired>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(fired) = timers.recv().await {
            let session = fired.session.clone();
            if let Err(e) = service.handle_timer(fired).await {
                tracing::error!("Timer for session {session} failed: {e}");
            }
        }
        tracing::info!("Timer worker stopped");
    })
}

// Deadline timers for submission and voting phases.
//
// The engine never sleeps: it asks a `Scheduler` to deliver a `Timer` after a
// delay and is handed the timer back by its caller when it fires.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use uuid::Uuid;

use crate::tournament::MatchId;

pub type TimerId = Uuid;

/// What a timer means when it fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Timer {
    /// Submission window of `round` has elapsed.
    SubmissionDeadline { round: usize },
    /// Voting window of `match_id` has elapsed.
    VotingDeadline { match_id: MatchId },
}

impl Timer {
    pub fn kind(&self) -> &'static str {
        match self {
            Timer::SubmissionDeadline { .. } => "submission_deadline",
            Timer::VotingDeadline { .. } => "voting_deadline",
        }
    }
}

/// Fires a timer once after a delay. Cancelling an unknown or already fired
/// timer is a no-op.
pub trait Scheduler: Send + Sync {
    fn schedule(&self, delay: Duration, timer: Timer) -> TimerId;
    fn cancel(&self, id: TimerId);
}

/// A timer delivered back to the owner of a session.
#[derive(Debug, Clone)]
pub struct TimerFired {
    pub session: String,
    pub id: TimerId,
    pub timer: Timer,
}

/// Tokio-backed scheduler: one sleeping task per timer, delivering into a channel.
pub struct TokioScheduler {
    session: String,
    tx: mpsc::UnboundedSender<TimerFired>,
    handles: Arc<Mutex<HashMap<TimerId, AbortHandle>>>,
}

impl TokioScheduler {
    pub fn new(session: impl Into<String>, tx: mpsc::UnboundedSender<TimerFired>) -> Self {
        Self {
            session: session.into(),
            tx,
            handles: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&self, delay: Duration, timer: Timer) -> TimerId {
        let id = Uuid::new_v4();
        let fired = TimerFired {
            session: self.session.clone(),
            id,
            timer,
        };
        let tx = self.tx.clone();
        let handles = self.handles.clone();

        // Hold the lock across spawn so a zero-delay task cannot remove its
        // handle before it is inserted.
        let mut guard = match self.handles.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Ok(mut h) = handles.lock() {
                h.remove(&id);
            }
            if tx.send(fired).is_err() {
                tracing::debug!("Timer {id} fired after its receiver closed");
            }
        });
        guard.insert(id, task.abort_handle());
        id
    }

    fn cancel(&self, id: TimerId) {
        let handle = match self.handles.lock() {
            Ok(mut h) => h.remove(&id),
            Err(_) => None,
        };
        if let Some(handle) = handle {
            handle.abort();
        }
    }
}

/// Scheduler that only records requests. Callers fire timers by hand.
#[derive(Debug, Default, Clone)]
pub struct ManualScheduler {
    pending: Arc<Mutex<Vec<(TimerId, Duration, Timer)>>>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Outstanding timers in scheduling order.
    pub fn pending(&self) -> Vec<(TimerId, Duration, Timer)> {
        self.pending.lock().map(|p| p.clone()).unwrap_or_default()
    }

    /// Remove and return the first outstanding timer matching `pred`.
    pub fn take(&self, pred: impl Fn(&Timer) -> bool) -> Option<(TimerId, Timer)> {
        let mut pending = self.pending.lock().ok()?;
        let pos = pending.iter().position(|(_, _, t)| pred(t))?;
        let (id, _, timer) = pending.remove(pos);
        Some((id, timer))
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&self, delay: Duration, timer: Timer) -> TimerId {
        let id = Uuid::new_v4();
        if let Ok(mut pending) = self.pending.lock() {
            pending.push((id, delay, timer));
        }
        id
    }

    fn cancel(&self, id: TimerId) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.retain(|(pid, _, _)| *pid != id);
        }
    }
}

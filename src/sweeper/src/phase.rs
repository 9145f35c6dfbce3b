//! Run phases and cooperative cancellation.

use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;

/// Where a sweep run currently is.
///
/// `Idle -> Scanning -> Collecting -> Committing -> [Retrying]* -> Reported`,
/// repeated per catalog entry, then `Done`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum SweepPhase {
    Idle,
    Scanning { entry: String },
    Collecting { entry: String },
    Committing { entry: String, chunk: usize },
    Retrying { entry: String, chunk: usize, attempt: u32 },
    Reported { entry: String },
    Done,
}

impl fmt::Display for SweepPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SweepPhase::Idle => f.write_str("idle"),
            SweepPhase::Scanning { entry } => write!(f, "scanning({entry})"),
            SweepPhase::Collecting { entry } => write!(f, "collecting({entry})"),
            SweepPhase::Committing { entry, chunk } => write!(f, "committing({entry}#{chunk})"),
            SweepPhase::Retrying {
                entry,
                chunk,
                attempt,
            } => write!(f, "retrying({entry}#{chunk}, attempt {attempt})"),
            SweepPhase::Reported { entry } => write!(f, "reported({entry})"),
            SweepPhase::Done => f.write_str("done"),
        }
    }
}

/// Publishes phase transitions to any number of observers.
#[derive(Debug, Clone)]
pub struct PhaseTracker {
    tx: Arc<watch::Sender<SweepPhase>>,
}

impl Default for PhaseTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl PhaseTracker {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(SweepPhase::Idle);
        Self { tx: Arc::new(tx) }
    }

    pub fn set(&self, phase: SweepPhase) {
        let to = phase.to_string();
        let previous = self.tx.send_replace(phase);
        tracing::debug!(from = %previous, to = %to, "Sweep phase transition");
    }

    pub fn current(&self) -> SweepPhase {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SweepPhase> {
        self.tx.subscribe()
    }
}

/// Cooperative cancellation flag, checked between entries and chunks.
///
/// Clones share the same flag. Raising it never interrupts a store call
/// that is already in flight.
#[derive(Debug, Clone)]
pub struct Cancellation {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for Cancellation {
    fn default() -> Self {
        Self::new()
    }
}

impl Cancellation {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn cancel(&self) {
        if !self.tx.send_replace(true) {
            tracing::info!("Cancellation requested");
        }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once [`Cancellation::cancel`] has been called.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so the channel cannot close here
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

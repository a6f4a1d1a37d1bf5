use std::sync::{Mutex, PoisonError};

use serde::Serialize;

use crate::pipeline::traits::DiagnosticsSink;
use crate::types::{FallbackTier, TierTransition, UnmatchedReason};

/// Structured events the engine reports while reducing a run. Emitted from a
/// single thread in reference-sentence order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    PassStarted {
        tier: FallbackTier,
        overcut_retry: bool,
        sentences: usize,
    },
    SentenceResolved {
        tier: FallbackTier,
        sentence_index: usize,
        sentence_id: String,
        matched: bool,
        score: Option<f64>,
        reason: Option<UnmatchedReason>,
        deleted_spans: usize,
        timed_out: bool,
    },
    OvercutDetected {
        tier: FallbackTier,
        deleted_ratio: f64,
        ceiling: f64,
        retrying: bool,
    },
    TierTransition(TierTransition),
    RunCompleted {
        tier: FallbackTier,
        matched: usize,
        unmatched: usize,
        cut_seconds: f64,
        timed_out: bool,
    },
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct CollectingSink {
    events: Mutex<Vec<EngineEvent>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<EngineEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl DiagnosticsSink for CollectingSink {
    fn record(&self, event: &EngineEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
    }
}

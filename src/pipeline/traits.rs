use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::alignment::banded::MatchRequest;
use crate::alignment::candidates::CandidateParams;
use crate::pipeline::events::EngineEvent;
use crate::types::{CandidateWindow, MatchEngine, MatchResult, TokenId, Transcript};

pub trait Tokenizer: Send + Sync {
    /// Comparable form of one word, or `None` when nothing comparable is left.
    fn normalize(&self, word: &str) -> Option<String>;
}

pub trait CandidateFinder: Send + Sync {
    fn find_windows(
        &self,
        reference: &[TokenId],
        transcript: &Transcript,
        params: &CandidateParams,
    ) -> Vec<CandidateWindow>;
}

pub trait SentenceMatcher: Send + Sync {
    fn engine(&self) -> MatchEngine;

    fn match_window(
        &self,
        reference: &[TokenId],
        transcript: &Transcript,
        window: &CandidateWindow,
        request: &MatchRequest,
        deadline: &Deadline<'_>,
    ) -> MatchResult;
}

pub trait DiagnosticsSink: Send + Sync {
    fn record(&self, event: &EngineEvent);
}

impl<T: DiagnosticsSink + ?Sized> DiagnosticsSink for Arc<T> {
    fn record(&self, event: &EngineEvent) {
        (**self).record(event);
    }
}

pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// A point in time on a [`Clock`], polled cooperatively by the matcher.
#[derive(Clone, Copy)]
pub struct Deadline<'a> {
    clock: &'a dyn Clock,
    at: Option<Instant>,
}

impl<'a> Deadline<'a> {
    /// `budget` from now. A budget too large to represent never expires.
    pub fn after(clock: &'a dyn Clock, budget: Duration) -> Self {
        Self {
            clock,
            at: clock.now().checked_add(budget),
        }
    }

    pub fn unbounded(clock: &'a dyn Clock) -> Self {
        Self { clock, at: None }
    }

    pub fn expired(&self) -> bool {
        self.at.is_some_and(|at| self.clock.now() >= at)
    }
}

use std::time::Instant;

use crate::alignment::banded::{match_window_banded, match_window_naive, MatchRequest};
use crate::alignment::candidates::{find_candidate_windows, CandidateParams};
use crate::alignment::tokenization::normalize_word_case_folded;
use crate::pipeline::events::EngineEvent;
use crate::pipeline::traits::{
    CandidateFinder, Clock, Deadline, DiagnosticsSink, SentenceMatcher, Tokenizer,
};
use crate::types::{CandidateWindow, MatchEngine, MatchResult, TokenId, Transcript};

pub struct CaseFoldTokenizer;

impl Tokenizer for CaseFoldTokenizer {
    fn normalize(&self, word: &str) -> Option<String> {
        normalize_word_case_folded(word)
    }
}

pub struct AnchorCandidateFinder;

impl CandidateFinder for AnchorCandidateFinder {
    fn find_windows(
        &self,
        reference: &[TokenId],
        transcript: &Transcript,
        params: &CandidateParams,
    ) -> Vec<CandidateWindow> {
        find_candidate_windows(reference, transcript, params)
    }
}

pub struct BandedMatcher;

impl SentenceMatcher for BandedMatcher {
    fn engine(&self) -> MatchEngine {
        MatchEngine::Banded
    }

    fn match_window(
        &self,
        reference: &[TokenId],
        transcript: &Transcript,
        window: &CandidateWindow,
        request: &MatchRequest,
        deadline: &Deadline<'_>,
    ) -> MatchResult {
        match_window_banded(reference, transcript, window, request, deadline)
    }
}

/// Full-matrix comparison for the align-greedy tier. Ignores the deadline.
pub struct NaiveMatcher;

impl SentenceMatcher for NaiveMatcher {
    fn engine(&self) -> MatchEngine {
        MatchEngine::Naive
    }

    fn match_window(
        &self,
        reference: &[TokenId],
        transcript: &Transcript,
        window: &CandidateWindow,
        request: &MatchRequest,
        _deadline: &Deadline<'_>,
    ) -> MatchResult {
        match_window_naive(reference, transcript, window, request)
    }
}

pub struct TracingSink;

impl DiagnosticsSink for TracingSink {
    fn record(&self, event: &EngineEvent) {
        match event {
            EngineEvent::PassStarted {
                tier,
                overcut_retry,
                sentences,
            } => tracing::debug!(
                tier = tier.as_str(),
                overcut_retry,
                sentences,
                "engine: pass started"
            ),
            EngineEvent::SentenceResolved {
                tier,
                sentence_index,
                sentence_id,
                matched,
                score,
                reason,
                deleted_spans,
                timed_out,
            } => tracing::debug!(
                tier = tier.as_str(),
                sentence_index,
                sentence_id = sentence_id.as_str(),
                matched,
                score = score.unwrap_or(0.0),
                reason = reason.map(|r| r.as_str()).unwrap_or("-"),
                deleted_spans,
                timed_out,
                "engine: sentence resolved"
            ),
            EngineEvent::OvercutDetected {
                tier,
                deleted_ratio,
                ceiling,
                retrying,
            } => tracing::warn!(
                tier = tier.as_str(),
                deleted_ratio,
                ceiling,
                retrying,
                "engine: deleted share exceeds over-cut ceiling"
            ),
            EngineEvent::TierTransition(transition) => tracing::warn!(
                from = transition.from.as_str(),
                to = transition.to.as_str(),
                trigger = transition.trigger.as_str(),
                "engine: degrading fallback tier"
            ),
            EngineEvent::RunCompleted {
                tier,
                matched,
                unmatched,
                cut_seconds,
                timed_out,
            } => tracing::info!(
                tier = tier.as_str(),
                matched,
                unmatched,
                cut_seconds,
                timed_out,
                "engine: run completed"
            ),
        }
    }
}

pub struct NullSink;

impl DiagnosticsSink for NullSink {
    fn record(&self, _event: &EngineEvent) {}
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock that never advances. Latencies read as zero and a deadline
/// expires only when its budget is zero, which makes runs reproducible.
#[derive(Debug, Clone, Copy)]
pub struct FrozenClock {
    at: Instant,
}

impl FrozenClock {
    pub fn new() -> Self {
        Self { at: Instant::now() }
    }
}

impl Default for FrozenClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for FrozenClock {
    fn now(&self) -> Instant {
        self.at
    }
}

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::AlignmentError;

/// Interned identity of a normalized word. Two tokens are equal iff their ids are.
pub type TokenId = u32;

/// One ASR word as delivered by the recognizer, before normalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AsrWord {
    pub text: String,
    /// Seconds from the start of the recording.
    pub start: f64,
    pub end: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TranscriptToken {
    pub id: TokenId,
    pub text: String,
    pub start_time: f64,
    pub end_time: f64,
}

/// Time-stamped token stream of one take. Immutable once built.
#[derive(Debug, Clone)]
pub struct Transcript {
    tokens: Vec<TranscriptToken>,
    ids: Vec<TokenId>,
    total_duration: f64,
}

impl Transcript {
    /// Builds a transcript, checking that timestamps are finite and monotonic.
    /// `total_duration` defaults to the end of the last token and is never
    /// allowed to be shorter than it.
    pub fn new(
        tokens: Vec<TranscriptToken>,
        total_duration: Option<f64>,
    ) -> Result<Self, AlignmentError> {
        let mut prev: Option<&TranscriptToken> = None;
        for (idx, token) in tokens.iter().enumerate() {
            if !token.start_time.is_finite() || !token.end_time.is_finite() {
                return Err(AlignmentError::invalid_input(format!(
                    "token #{idx} '{}' has a non-finite timestamp",
                    token.text
                )));
            }
            if token.start_time < 0.0 || token.end_time < token.start_time {
                return Err(AlignmentError::invalid_input(format!(
                    "token #{idx} '{}' has an invalid interval [{:.3}, {:.3})",
                    token.text, token.start_time, token.end_time
                )));
            }
            if let Some(prev) = prev {
                if token.start_time < prev.start_time || token.end_time < prev.end_time {
                    return Err(AlignmentError::invalid_input(format!(
                        "token #{idx} '{}' goes back in time ({:.3}s after {:.3}s)",
                        token.text, token.start_time, prev.start_time
                    )));
                }
            }
            prev = Some(token);
        }

        let last_end = tokens.last().map(|t| t.end_time).unwrap_or(0.0);
        let total_duration = match total_duration {
            Some(d) if !d.is_finite() || d < 0.0 => {
                return Err(AlignmentError::invalid_input(format!(
                    "total duration must be a finite non-negative number, got {d}"
                )));
            }
            Some(d) => d.max(last_end),
            None => last_end,
        };

        let ids = tokens.iter().map(|t| t.id).collect();
        Ok(Self {
            tokens,
            ids,
            total_duration,
        })
    }

    pub fn tokens(&self) -> &[TranscriptToken] {
        &self.tokens
    }

    /// Token ids in transcript order, for slice comparisons.
    pub fn ids(&self) -> &[TokenId] {
        &self.ids
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn total_duration(&self) -> f64 {
        self.total_duration
    }

    /// Resolves the half-open token range `[start_index, end_index)` to times.
    /// Returns `None` for empty or out-of-range spans.
    pub fn span(&self, start_index: usize, end_index: usize) -> Option<TranscriptSpan> {
        if start_index >= end_index || end_index > self.tokens.len() {
            return None;
        }
        Some(TranscriptSpan {
            start_index,
            end_index,
            start_time: self.tokens[start_index].start_time,
            end_time: self.tokens[end_index - 1].end_time,
        })
    }

    /// Token texts of `span`, clamped to the transcript.
    pub fn excerpt(&self, span: &TranscriptSpan) -> String {
        let end = span.end_index.min(self.tokens.len());
        let start = span.start_index.min(end);
        self.tokens[start..end]
            .iter()
            .map(|t| t.text.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReferenceSentence {
    pub id: String,
    /// Position in the original script; output ordering follows this.
    pub index: usize,
    pub text: String,
    pub tokens: Vec<TokenId>,
}

#[derive(Debug, Clone)]
pub struct ReferenceScript {
    sentences: Vec<ReferenceSentence>,
}

impl ReferenceScript {
    /// Sentences are stored ordered by `index`; ids and indices must be unique.
    pub fn new(mut sentences: Vec<ReferenceSentence>) -> Result<Self, AlignmentError> {
        let mut ids = HashSet::with_capacity(sentences.len());
        let mut indices = HashSet::with_capacity(sentences.len());
        for sentence in &sentences {
            if !ids.insert(sentence.id.as_str()) {
                return Err(AlignmentError::invalid_input(format!(
                    "duplicate reference sentence id '{}'",
                    sentence.id
                )));
            }
            if !indices.insert(sentence.index) {
                return Err(AlignmentError::invalid_input(format!(
                    "duplicate reference sentence index {}",
                    sentence.index
                )));
            }
        }
        sentences.sort_by_key(|s| s.index);
        Ok(Self { sentences })
    }

    pub fn sentences(&self) -> &[ReferenceSentence] {
        &self.sentences
    }

    pub fn len(&self) -> usize {
        self.sentences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sentences.is_empty()
    }
}

/// Half-open token range `[start_index, end_index)` with its resolved times.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TranscriptSpan {
    pub start_index: usize,
    pub end_index: usize,
    pub start_time: f64,
    pub end_time: f64,
}

impl TranscriptSpan {
    pub fn token_len(&self) -> usize {
        self.end_index - self.start_index
    }

    pub fn duration(&self) -> f64 {
        self.end_time - self.start_time
    }

    pub fn midpoint_time(&self) -> f64 {
        (self.start_time + self.end_time) / 2.0
    }

    /// Overlap in token space; touching spans do not overlap.
    pub fn overlaps(&self, other: &TranscriptSpan) -> bool {
        self.start_index < other.end_index && other.start_index < self.end_index
    }

    pub fn overlap_len(&self, other: &TranscriptSpan) -> usize {
        let start = self.start_index.max(other.start_index);
        let end = self.end_index.min(other.end_index);
        end.saturating_sub(start)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CandidateWindow {
    pub span: TranscriptSpan,
    /// Cheap prior in [0, 1] used to order and bound evaluation only.
    pub prior_score: f64,
    pub anchor_hits: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchOutcome {
    /// The DP reached the end cell with a certified distance.
    Complete,
    /// Row minimum exceeded the acceptance distance; the window cannot match.
    Abandoned,
    /// The sentence deadline passed before the window was certified.
    TimedOut,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchResult {
    pub window: CandidateWindow,
    /// `1 - edit_distance / max(len(reference), len(window))`.
    pub similarity: f64,
    pub edit_distance: usize,
    pub band_saturated: bool,
    pub timed_out: bool,
    pub outcome: MatchOutcome,
    /// Seconds between the window midpoint and where the sentence is expected.
    pub expected_offset: f64,
}

impl MatchResult {
    pub fn is_acceptable(&self, acceptance_floor: f64) -> bool {
        self.outcome != MatchOutcome::Abandoned && self.similarity >= acceptance_floor
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeepPolicy {
    /// Keep the latest qualifying take.
    #[default]
    Last,
    /// Keep the highest-similarity take; ties go to the latest.
    Best,
}

impl KeepPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            KeepPolicy::Last => "last",
            KeepPolicy::Best => "best",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FallbackPolicy {
    /// Enter the ladder at the normal tier.
    #[default]
    Safe,
    AlignGreedy,
    KeepAll,
}

impl FallbackPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            FallbackPolicy::Safe => "safe",
            FallbackPolicy::AlignGreedy => "align-greedy",
            FallbackPolicy::KeepAll => "keep-all",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchEngine {
    Banded,
    Naive,
    None,
}

impl MatchEngine {
    pub fn as_str(self) -> &'static str {
        match self {
            MatchEngine::Banded => "banded",
            MatchEngine::Naive => "naive",
            MatchEngine::None => "none",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnmatchedReason {
    NoCandidates,
    BelowFloor,
    TimedOut,
    NotAttempted,
}

impl UnmatchedReason {
    pub fn as_str(self) -> &'static str {
        match self {
            UnmatchedReason::NoCandidates => "no_candidates",
            UnmatchedReason::BelowFloor => "below_floor",
            UnmatchedReason::TimedOut => "timed_out",
            UnmatchedReason::NotAttempted => "not_attempted",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Resolution {
    Kept {
        keep: TranscriptSpan,
        chosen: MatchResult,
    },
    Unmatched {
        reason: UnmatchedReason,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SentenceDecision {
    pub sentence_index: usize,
    pub sentence_id: String,
    pub resolution: Resolution,
    /// Earlier (or, under `best`, lower-scoring) takes to cut.
    pub delete_spans: Vec<TranscriptSpan>,
    pub policy: KeepPolicy,
    pub engine: MatchEngine,
}

impl SentenceDecision {
    pub fn is_matched(&self) -> bool {
        matches!(self.resolution, Resolution::Kept { .. })
    }

    pub fn keep_span(&self) -> Option<&TranscriptSpan> {
        match &self.resolution {
            Resolution::Kept { keep, .. } => Some(keep),
            Resolution::Unmatched { .. } => None,
        }
    }

    pub fn chosen(&self) -> Option<&MatchResult> {
        match &self.resolution {
            Resolution::Kept { chosen, .. } => Some(chosen),
            Resolution::Unmatched { .. } => None,
        }
    }

    pub fn unmatched_reason(&self) -> Option<UnmatchedReason> {
        match &self.resolution {
            Resolution::Kept { .. } => None,
            Resolution::Unmatched { reason } => Some(*reason),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SpanLabel {
    Keep,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TimelineSpan {
    pub start: f64,
    pub end: f64,
    pub label: SpanLabel,
}

impl TimelineSpan {
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

/// Ordered, gap-free KEEP/DELETE cover of `[0, total_duration)`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Timeline {
    spans: Vec<TimelineSpan>,
    total_duration: f64,
}

impl Timeline {
    pub(crate) fn from_spans(spans: Vec<TimelineSpan>, total_duration: f64) -> Self {
        Self {
            spans,
            total_duration,
        }
    }

    /// The last-resort timeline: everything kept.
    pub fn keep_all(total_duration: f64) -> Self {
        Self {
            spans: vec![TimelineSpan {
                start: 0.0,
                end: total_duration,
                label: SpanLabel::Keep,
            }],
            total_duration,
        }
    }

    pub fn spans(&self) -> &[TimelineSpan] {
        &self.spans
    }

    pub fn total_duration(&self) -> f64 {
        self.total_duration
    }

    pub fn has_keep(&self) -> bool {
        self.spans.iter().any(|s| s.label == SpanLabel::Keep)
    }

    pub fn spans_with_label(&self, label: SpanLabel) -> impl Iterator<Item = &TimelineSpan> {
        self.spans.iter().filter(move |s| s.label == label)
    }

    pub fn deleted_seconds(&self) -> f64 {
        self.spans_with_label(SpanLabel::Delete)
            .map(TimelineSpan::duration)
            .sum()
    }

    pub fn kept_seconds(&self) -> f64 {
        self.spans_with_label(SpanLabel::Keep)
            .map(TimelineSpan::duration)
            .sum()
    }

    /// Label of the span covering `time`, if `time` lies in `[0, total_duration)`.
    pub fn label_at(&self, time: f64) -> Option<SpanLabel> {
        self.spans
            .iter()
            .find(|s| s.start <= time && time < s.end)
            .map(|s| s.label)
    }

    /// Checks coverage, ordering and non-overlap. A failure is an engine defect.
    pub fn verify(&self) -> Result<(), AlignmentError> {
        const CONTEXT: &str = "timeline verification";
        let Some(first) = self.spans.first() else {
            return Err(AlignmentError::invariant(CONTEXT, "timeline has no spans"));
        };
        if first.start != 0.0 {
            return Err(AlignmentError::invariant(
                CONTEXT,
                format!("first span starts at {:.6}s instead of 0", first.start),
            ));
        }
        for (idx, span) in self.spans.iter().enumerate() {
            let zero_length_ok = self.total_duration == 0.0 && self.spans.len() == 1;
            if !(span.start < span.end || (zero_length_ok && span.start == span.end)) {
                return Err(AlignmentError::invariant(
                    CONTEXT,
                    format!(
                        "span #{idx} is empty or reversed [{:.6}, {:.6})",
                        span.start, span.end
                    ),
                ));
            }
            if idx > 0 {
                let prev = &self.spans[idx - 1];
                if span.start != prev.end {
                    return Err(AlignmentError::invariant(
                        CONTEXT,
                        format!(
                            "span #{idx} starts at {:.6}s but previous ends at {:.6}s",
                            span.start, prev.end
                        ),
                    ));
                }
                if span.label == prev.label {
                    return Err(AlignmentError::invariant(
                        CONTEXT,
                        format!("spans #{} and #{idx} share a label and were not merged", idx - 1),
                    ));
                }
            }
        }
        let last_end = self.spans[self.spans.len() - 1].end;
        if last_end != self.total_duration {
            return Err(AlignmentError::invariant(
                CONTEXT,
                format!(
                    "last span ends at {:.6}s but duration is {:.6}s",
                    last_end, self.total_duration
                ),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FallbackTier {
    Normal,
    AlignGreedy,
    KeepAll,
}

impl FallbackTier {
    pub fn as_str(self) -> &'static str {
        match self {
            FallbackTier::Normal => "normal",
            FallbackTier::AlignGreedy => "align-greedy",
            FallbackTier::KeepAll => "keep-all",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionTrigger {
    GlobalTimeout,
    DocumentOverrun,
    OvercutPersisted,
    LowMatchRate,
    NoKeepSpan,
}

impl TransitionTrigger {
    pub fn as_str(self) -> &'static str {
        match self {
            TransitionTrigger::GlobalTimeout => "global_timeout",
            TransitionTrigger::DocumentOverrun => "document_overrun",
            TransitionTrigger::OvercutPersisted => "overcut_persisted",
            TransitionTrigger::LowMatchRate => "low_match_rate",
            TransitionTrigger::NoKeepSpan => "no_keep_span",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TierTransition {
    pub from: FallbackTier,
    pub to: FallbackTier,
    pub trigger: TransitionTrigger,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SentenceDiagnostics {
    pub sentence_index: usize,
    pub sentence_id: String,
    pub matched: bool,
    pub score: Option<f64>,
    pub engine: MatchEngine,
    pub timed_out: bool,
    pub latency_ms: f64,
    pub candidates_found: usize,
    pub windows_evaluated: usize,
    pub deleted_spans: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnmatchedExample {
    pub sentence_index: usize,
    pub sentence_id: String,
    pub excerpt: String,
    pub reason: UnmatchedReason,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PassSummary {
    pub tier: FallbackTier,
    /// True for the stricter re-resolution run after an over-cut.
    pub overcut_retry: bool,
    pub matched: usize,
    pub unmatched: usize,
    pub timed_out_sentences: usize,
    pub deleted_ratio: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunDiagnostics {
    pub total_sentences: usize,
    pub matched: usize,
    pub unmatched: usize,
    pub sentences: Vec<SentenceDiagnostics>,
    pub timed_out: bool,
    pub fallback_tier: FallbackTier,
    pub match_engine: MatchEngine,
    pub transitions: Vec<TierTransition>,
    pub passes: Vec<PassSummary>,
    pub unmatched_examples: Vec<UnmatchedExample>,
    pub cut_seconds: f64,
    pub total_duration: f64,
    pub deleted_ratio: f64,
    pub total_overrun_ms: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineOutput {
    pub timeline: Timeline,
    pub decisions: Vec<SentenceDecision>,
    pub diagnostics: RunDiagnostics,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(id: TokenId, start: f64, end: f64) -> TranscriptToken {
        TranscriptToken {
            id,
            text: format!("w{id}"),
            start_time: start,
            end_time: end,
        }
    }

    #[test]
    fn transcript_duration_defaults_to_last_token_end() {
        let t = Transcript::new(vec![token(1, 0.0, 0.5), token(2, 0.6, 1.2)], None).unwrap();
        assert_eq!(t.total_duration(), 1.2);
        let padded =
            Transcript::new(vec![token(1, 0.0, 0.5)], Some(3.0)).expect("valid transcript");
        assert_eq!(padded.total_duration(), 3.0);
        let clamped = Transcript::new(vec![token(1, 0.0, 0.5)], Some(0.1)).unwrap();
        assert_eq!(clamped.total_duration(), 0.5);
    }

    #[test]
    fn transcript_rejects_time_going_backwards() {
        let err = Transcript::new(vec![token(1, 1.0, 1.5), token(2, 0.5, 1.6)], None);
        assert!(matches!(err, Err(AlignmentError::InvalidInput { .. })));
        let err = Transcript::new(vec![token(1, 1.0, 0.5)], None);
        assert!(matches!(err, Err(AlignmentError::InvalidInput { .. })));
        let err = Transcript::new(vec![token(1, f64::NAN, 0.5)], None);
        assert!(matches!(err, Err(AlignmentError::InvalidInput { .. })));
    }

    #[test]
    fn span_resolves_times_and_rejects_empty_ranges() {
        let t = Transcript::new(
            vec![token(1, 0.0, 0.5), token(2, 0.6, 1.2), token(3, 1.3, 2.0)],
            None,
        )
        .unwrap();
        let span = t.span(1, 3).unwrap();
        assert_eq!(span.start_time, 0.6);
        assert_eq!(span.end_time, 2.0);
        assert_eq!(span.token_len(), 2);
        assert_eq!(t.excerpt(&span), "w2 w3");
        assert!(t.span(2, 2).is_none());
        assert!(t.span(1, 4).is_none());
    }

    #[test]
    fn excerpt_clamps_foreign_spans() {
        let t = Transcript::new(vec![token(1, 0.0, 0.5), token(2, 0.6, 1.2)], None).unwrap();
        let past_end = TranscriptSpan {
            start_index: 5,
            end_index: 9,
            start_time: 5.0,
            end_time: 9.0,
        };
        assert_eq!(t.excerpt(&past_end), "");
        let straddling = TranscriptSpan {
            start_index: 1,
            end_index: 9,
            start_time: 0.6,
            end_time: 9.0,
        };
        assert_eq!(t.excerpt(&straddling), "w2");
    }

    #[test]
    fn touching_spans_do_not_overlap() {
        let a = TranscriptSpan {
            start_index: 0,
            end_index: 3,
            start_time: 0.0,
            end_time: 1.0,
        };
        let b = TranscriptSpan {
            start_index: 3,
            end_index: 5,
            start_time: 1.0,
            end_time: 2.0,
        };
        let c = TranscriptSpan {
            start_index: 2,
            end_index: 4,
            start_time: 0.8,
            end_time: 1.5,
        };
        assert!(!a.overlaps(&b));
        assert!(a.overlaps(&c));
        assert_eq!(a.overlap_len(&c), 1);
    }

    #[test]
    fn reference_script_orders_by_index_and_rejects_duplicates() {
        let sentence = |id: &str, index: usize| ReferenceSentence {
            id: id.to_string(),
            index,
            text: String::new(),
            tokens: vec![1],
        };
        let script = ReferenceScript::new(vec![sentence("b", 1), sentence("a", 0)]).unwrap();
        assert_eq!(script.sentences()[0].id, "a");
        assert!(ReferenceScript::new(vec![sentence("a", 0), sentence("a", 1)]).is_err());
        assert!(ReferenceScript::new(vec![sentence("a", 0), sentence("b", 0)]).is_err());
    }

    #[test]
    fn keep_all_timeline_verifies() {
        let timeline = Timeline::keep_all(12.5);
        timeline.verify().unwrap();
        assert!(timeline.has_keep());
        assert_eq!(timeline.deleted_seconds(), 0.0);
        assert_eq!(timeline.label_at(3.0), Some(SpanLabel::Keep));
        assert_eq!(timeline.label_at(12.5), None);
        Timeline::keep_all(0.0).verify().unwrap();
    }

    #[test]
    fn verify_flags_gaps_and_unmerged_labels() {
        let gap = Timeline::from_spans(
            vec![
                TimelineSpan { start: 0.0, end: 1.0, label: SpanLabel::Keep },
                TimelineSpan { start: 1.5, end: 2.0, label: SpanLabel::Delete },
            ],
            2.0,
        );
        assert!(matches!(
            gap.verify(),
            Err(AlignmentError::InvariantViolation { .. })
        ));

        let unmerged = Timeline::from_spans(
            vec![
                TimelineSpan { start: 0.0, end: 1.0, label: SpanLabel::Keep },
                TimelineSpan { start: 1.0, end: 2.0, label: SpanLabel::Keep },
            ],
            2.0,
        );
        assert!(unmerged.verify().is_err());

        let short = Timeline::from_spans(
            vec![TimelineSpan { start: 0.0, end: 1.0, label: SpanLabel::Keep }],
            2.0,
        );
        assert!(short.verify().is_err());
    }

    #[test]
    fn policies_serialize_with_config_spelling() {
        assert_eq!(serde_json::to_string(&KeepPolicy::Best).unwrap(), "\"best\"");
        assert_eq!(
            serde_json::to_string(&FallbackPolicy::AlignGreedy).unwrap(),
            "\"align-greedy\""
        );
        let parsed: FallbackPolicy = serde_json::from_str("\"keep-all\"").unwrap();
        assert_eq!(parsed, FallbackPolicy::KeepAll);
        assert_eq!(serde_json::to_string(&SpanLabel::Delete).unwrap(), "\"DELETE\"");
    }
}

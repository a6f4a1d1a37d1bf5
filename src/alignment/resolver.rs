use std::cmp::Ordering;

use crate::types::{
    KeepPolicy, MatchEngine, MatchResult, ReferenceSentence, Resolution, SentenceDecision,
    UnmatchedReason,
};

/// Everything the matcher produced for one sentence, in evaluation order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SentenceMatches {
    pub results: Vec<MatchResult>,
    pub candidates_found: usize,
    /// The sentence deadline passed before every candidate was scored.
    pub timed_out: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolveParams {
    pub acceptance_floor: f64,
    pub keep_policy: KeepPolicy,
}

/// Turns one sentence's match results into exactly one decision.
pub fn resolve_sentence(
    sentence: &ReferenceSentence,
    matches: &SentenceMatches,
    params: &ResolveParams,
    engine: MatchEngine,
) -> SentenceDecision {
    let survivors: Vec<&MatchResult> = matches
        .results
        .iter()
        .filter(|result| result.is_acceptable(params.acceptance_floor))
        .collect();

    let decision = |resolution: Resolution, delete_spans| SentenceDecision {
        sentence_index: sentence.index,
        sentence_id: sentence.id.clone(),
        resolution,
        delete_spans,
        policy: params.keep_policy,
        engine,
    };

    if survivors.is_empty() {
        let reason = if matches.candidates_found == 0 {
            UnmatchedReason::NoCandidates
        } else if matches.timed_out {
            UnmatchedReason::TimedOut
        } else {
            UnmatchedReason::BelowFloor
        };
        return decision(Resolution::Unmatched { reason }, Vec::new());
    }

    let mut takes = drop_overlapping(survivors);
    let keep_at = match params.keep_policy {
        KeepPolicy::Last => takes
            .iter()
            .enumerate()
            .max_by_key(|(_, take)| take.window.span.start_index)
            .map(|(idx, _)| idx),
        // Expected offset is not consulted here: a take of equal similarity is
        // resolved toward the later reading, as under `Last`.
        KeepPolicy::Best => takes
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| {
                a.similarity
                    .partial_cmp(&b.similarity)
                    .unwrap_or(Ordering::Equal)
                    .then_with(|| a.window.span.start_index.cmp(&b.window.span.start_index))
            })
            .map(|(idx, _)| idx),
    }
    .unwrap_or(0);

    let chosen = takes.swap_remove(keep_at).clone();
    let mut delete_spans: Vec<_> = takes.iter().map(|take| take.window.span).collect();
    delete_spans.sort_by_key(|span| span.start_index);

    decision(
        Resolution::Kept {
            keep: chosen.window.span,
            chosen,
        },
        delete_spans,
    )
}

/// Two takes that share transcript tokens are matcher noise, not retakes.
/// Keeps the stronger one: higher prior, then similarity, then closer to the
/// expected position, then earlier.
fn drop_overlapping(mut survivors: Vec<&MatchResult>) -> Vec<&MatchResult> {
    survivors.sort_by(|a, b| {
        b.window
            .prior_score
            .partial_cmp(&a.window.prior_score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| b.similarity.partial_cmp(&a.similarity).unwrap_or(Ordering::Equal))
            .then_with(|| {
                a.expected_offset
                    .partial_cmp(&b.expected_offset)
                    .unwrap_or(Ordering::Equal)
            })
            .then_with(|| a.window.span.start_index.cmp(&b.window.span.start_index))
    });

    let mut kept: Vec<&MatchResult> = Vec::with_capacity(survivors.len());
    for take in survivors {
        if kept
            .iter()
            .all(|other| !other.window.span.overlaps(&take.window.span))
        {
            kept.push(take);
        }
    }
    kept
}

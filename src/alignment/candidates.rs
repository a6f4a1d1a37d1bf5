use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};

use crate::config::ResolvedConfig;
use crate::types::{CandidateWindow, TokenId, Transcript};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CandidateParams {
    pub fast_match: bool,
    pub max_windows: usize,
    pub min_anchor_ngram: usize,
    /// Upper bound on window length, as a multiple of the reference length.
    pub window_length_factor: f64,
}

impl CandidateParams {
    pub fn from_config(config: &ResolvedConfig) -> Self {
        Self {
            fast_match: config.fast_match,
            max_windows: config.max_windows,
            min_anchor_ngram: config.min_anchor_ngram,
            window_length_factor: config.window_length_factor,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct AnchorHit {
    position: usize,
    ref_offset: usize,
    /// Where the reference would start if this hit were on the true diagonal.
    implied_start: isize,
}

/// Proposes up to `max_windows` transcript windows for one reference sentence,
/// best prior first. Never fails; an empty list means "no candidates".
pub fn find_candidate_windows(
    reference: &[TokenId],
    transcript: &Transcript,
    params: &CandidateParams,
) -> Vec<CandidateWindow> {
    if reference.is_empty() || transcript.is_empty() || params.max_windows == 0 {
        return Vec::new();
    }
    if !params.fast_match {
        return sliding_windows(reference, transcript, 1, params.max_windows);
    }

    let anchored = anchor_windows(reference, transcript, params);
    if !anchored.is_empty() {
        return select_windows(anchored, params.max_windows);
    }

    tracing::debug!(
        reference_len = reference.len(),
        "candidates: no anchor hits, falling back to coarse sliding windows"
    );
    let step = (reference.len() / 2).max(1);
    sliding_windows(reference, transcript, step, params.max_windows)
}

fn anchor_windows(
    reference: &[TokenId],
    transcript: &Transcript,
    params: &CandidateParams,
) -> Vec<CandidateWindow> {
    let m = reference.len();
    let k = params.min_anchor_ngram.clamp(1, m);
    let anchor_count = m - k + 1;

    let mut anchors: HashMap<&[TokenId], Vec<usize>> = HashMap::new();
    for (offset, gram) in reference.windows(k).enumerate() {
        anchors.entry(gram).or_default().push(offset);
    }

    // A reference n-gram repeated at several offsets yields one hit per offset
    // at the same position; a take keeps at most one of them.
    let mut hits_at: BTreeMap<usize, Vec<AnchorHit>> = BTreeMap::new();
    for (position, gram) in transcript.ids().windows(k).enumerate() {
        if let Some(offsets) = anchors.get(gram) {
            let hits = offsets
                .iter()
                .map(|&ref_offset| AnchorHit {
                    position,
                    ref_offset,
                    implied_start: position as isize - ref_offset as isize,
                })
                .collect();
            hits_at.insert(position, hits);
        }
    }

    let tolerance = (m / 3).max(1) as isize;
    let max_len = ((m as f64) * params.window_length_factor).ceil().max(m as f64) as usize;

    let mut windows = Vec::new();
    while let Some(seed) = strongest_diagonal(&hits_at, m, transcript.len()) {
        let take = collect_take(&hits_at, seed, tolerance);
        if take.is_empty() {
            break;
        }
        for hit in &take {
            hits_at.remove(&hit.position);
        }
        windows.extend(take_window(&take, transcript, m, max_len, anchor_count));
    }
    windows
}

/// Implied start backed by the most remaining hits. Ties prefer a diagonal
/// whose full extent fits in the transcript, then the earlier one.
fn strongest_diagonal(
    hits_at: &BTreeMap<usize, Vec<AnchorHit>>,
    reference_len: usize,
    transcript_len: usize,
) -> Option<isize> {
    let mut support: HashMap<isize, usize> = HashMap::new();
    for hit in hits_at.values().flatten() {
        *support.entry(hit.implied_start).or_insert(0) += 1;
    }
    let fits = |start: isize| start >= 0 && start as usize + reference_len <= transcript_len;
    support
        .into_iter()
        .max_by(|(a, a_hits), (b, b_hits)| {
            a_hits
                .cmp(b_hits)
                .then_with(|| fits(*a).cmp(&fits(*b)))
                .then_with(|| b.cmp(a))
        })
        .map(|(start, _)| start)
}

/// One take around the `seed` diagonal: every hit on the seed itself, plus at
/// most one hit per other position that stays within `tolerance` of the
/// diagonal followed so far. Each reference offset is used once per take, so a
/// second reading of the same words starts a take of its own.
fn collect_take(
    hits_at: &BTreeMap<usize, Vec<AnchorHit>>,
    seed: isize,
    tolerance: isize,
) -> Vec<AnchorHit> {
    let mut take: Vec<AnchorHit> = hits_at
        .values()
        .flatten()
        .filter(|hit| hit.implied_start == seed)
        .copied()
        .collect();
    let Some(first) = take.first().map(|hit| hit.position) else {
        return take;
    };
    let mut used: HashSet<usize> = take.iter().map(|hit| hit.ref_offset).collect();
    let seeded: HashSet<usize> = take.iter().map(|hit| hit.position).collect();

    let mut diagonal = seed;
    for (position, hits) in hits_at.range(first..) {
        if seeded.contains(position) {
            diagonal = seed;
            continue;
        }
        if let Some(hit) = closest_hit(hits, diagonal, tolerance, &used) {
            used.insert(hit.ref_offset);
            diagonal = hit.implied_start;
            take.push(hit);
        }
    }

    let mut diagonal = seed;
    for hits in hits_at.range(..first).rev().map(|(_, hits)| hits) {
        if let Some(hit) = closest_hit(hits, diagonal, tolerance, &used) {
            used.insert(hit.ref_offset);
            diagonal = hit.implied_start;
            take.push(hit);
        }
    }

    take.sort_by_key(|hit| hit.position);
    take
}

fn closest_hit(
    hits: &[AnchorHit],
    diagonal: isize,
    tolerance: isize,
    used: &HashSet<usize>,
) -> Option<AnchorHit> {
    hits.iter()
        .filter(|hit| !used.contains(&hit.ref_offset))
        .filter(|hit| (hit.implied_start - diagonal).abs() <= tolerance)
        .min_by_key(|hit| ((hit.implied_start - diagonal).abs(), hit.ref_offset))
        .copied()
}

/// Window spanning the implied extents of one take's hits.
fn take_window(
    take: &[AnchorHit],
    transcript: &Transcript,
    reference_len: usize,
    max_len: usize,
    anchor_count: usize,
) -> Option<CandidateWindow> {
    let first = take.iter().map(|hit| hit.implied_start).min()?;
    let last = take.iter().map(|hit| hit.implied_start).max()?;
    let n = transcript.len() as isize;
    let start = first.clamp(0, n) as usize;
    let end = (last + reference_len as isize).clamp(0, n) as usize;
    let end = end.min(start + max_len);
    let span = transcript.span(start, end)?;
    Some(CandidateWindow {
        span,
        prior_score: take.len() as f64 / anchor_count as f64,
        anchor_hits: take.len(),
    })
}

/// Fixed-length windows every `step` tokens, scored by multiset unigram
/// overlap with the reference. Zero-overlap windows are never proposed.
fn sliding_windows(
    reference: &[TokenId],
    transcript: &Transcript,
    step: usize,
    max_windows: usize,
) -> Vec<CandidateWindow> {
    let ids = transcript.ids();
    let n = ids.len();
    let len = reference.len().min(n);
    if len == 0 {
        return Vec::new();
    }
    let step = step.max(1);
    let last_start = n - len;

    let mut wanted: HashMap<TokenId, usize> = HashMap::new();
    for &id in reference {
        *wanted.entry(id).or_insert(0) += 1;
    }
    let mut have: HashMap<TokenId, usize> = HashMap::new();
    let mut overlap = 0usize;

    let mut scored = Vec::new();
    for end in 0..n {
        overlap += add_token(&mut have, &wanted, ids[end]);
        if end >= len {
            overlap -= remove_token(&mut have, &wanted, ids[end - len]);
        }
        if end + 1 < len {
            continue;
        }
        let start = end + 1 - len;
        if overlap == 0 || (start % step != 0 && start != last_start) {
            continue;
        }
        if let Some(span) = transcript.span(start, start + len) {
            scored.push(CandidateWindow {
                span,
                prior_score: overlap as f64 / reference.len() as f64,
                anchor_hits: overlap,
            });
        }
    }
    select_windows(scored, max_windows)
}

fn add_token(have: &mut HashMap<TokenId, usize>, wanted: &HashMap<TokenId, usize>, id: TokenId) -> usize {
    let count = have.entry(id).or_insert(0);
    let gained = usize::from(*count < wanted.get(&id).copied().unwrap_or(0));
    *count += 1;
    gained
}

fn remove_token(have: &mut HashMap<TokenId, usize>, wanted: &HashMap<TokenId, usize>, id: TokenId) -> usize {
    let Some(count) = have.get_mut(&id) else {
        return 0;
    };
    *count -= 1;
    usize::from(*count < wanted.get(&id).copied().unwrap_or(0))
}

/// Greedy pick in prior order, skipping windows that overlap an already
/// selected one by more than half of the shorter window.
fn select_windows(mut scored: Vec<CandidateWindow>, max_windows: usize) -> Vec<CandidateWindow> {
    scored.sort_by(|a, b| {
        b.prior_score
            .partial_cmp(&a.prior_score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.span.start_index.cmp(&b.span.start_index))
            .then_with(|| a.span.end_index.cmp(&b.span.end_index))
    });

    let mut selected: Vec<CandidateWindow> = Vec::with_capacity(max_windows.min(scored.len()));
    for window in scored {
        if selected.len() >= max_windows {
            break;
        }
        let suppressed = selected.iter().any(|kept| {
            let shorter = kept.span.token_len().min(window.span.token_len());
            2 * kept.span.overlap_len(&window.span) > shorter
        });
        if !suppressed {
            selected.push(window);
        }
    }
    selected
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TranscriptToken;

    fn transcript(ids: &[TokenId]) -> Transcript {
        let tokens = ids
            .iter()
            .enumerate()
            .map(|(i, &id)| TranscriptToken {
                id,
                text: format!("t{id}"),
                start_time: i as f64,
                end_time: i as f64 + 0.9,
            })
            .collect();
        Transcript::new(tokens, None).expect("valid transcript")
    }

    fn params() -> CandidateParams {
        CandidateParams {
            fast_match: true,
            max_windows: 8,
            min_anchor_ngram: 2,
            window_length_factor: 2.0,
        }
    }

    #[test]
    fn exact_occurrence_yields_full_density_window() {
        let t = transcript(&[90, 91, 1, 2, 3, 4, 5, 92]);
        let windows = find_candidate_windows(&[1, 2, 3, 4, 5], &t, &params());
        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0].span.start_index, 2);
        assert_eq!(windows[0].span.end_index, 7);
        assert_eq!(windows[0].prior_score, 1.0);
        assert_eq!(windows[0].anchor_hits, 4);
    }

    #[test]
    fn retake_produces_one_window_per_take_ordered_by_prior() {
        // first take has one substitution (3 -> 77), second is clean
        let t = transcript(&[1, 2, 77, 4, 5, 6, 1, 2, 3, 4, 5, 6]);
        let windows = find_candidate_windows(&[1, 2, 3, 4, 5, 6], &t, &params());
        assert_eq!(windows.len(), 2);
        assert_eq!(windows[0].span.start_index, 6);
        assert_eq!(windows[0].span.end_index, 12);
        assert_eq!(windows[1].span.start_index, 0);
        assert_eq!(windows[1].span.end_index, 6);
        assert!(windows[0].prior_score > windows[1].prior_score);
    }

    #[test]
    fn false_start_is_split_from_the_retake() {
        // "1 2 3" abandoned, then the full sentence
        let t = transcript(&[1, 2, 3, 1, 2, 3, 4, 5, 6, 7, 8, 9]);
        let windows = find_candidate_windows(&[1, 2, 3, 4, 5, 6, 7, 8, 9], &t, &params());
        assert!(!windows.is_empty());
        assert_eq!(windows[0].span.start_index, 3);
        assert_eq!(windows[0].span.end_index, 12);
        assert_eq!(windows[0].prior_score, 1.0);
    }

    #[test]
    fn insertion_widens_window_to_cover_both_diagonals() {
        let t = transcript(&[1, 2, 3, 99, 4, 5, 6]);
        let windows = find_candidate_windows(&[1, 2, 3, 4, 5, 6], &t, &params());
        assert_eq!(windows[0].span.start_index, 0);
        assert_eq!(windows[0].span.end_index, 7);
    }

    #[test]
    fn repeated_reference_ngram_stays_on_one_diagonal() {
        // bigram "1 2" sits at offsets 0 and 3 of the reference
        let reference = [1, 2, 3, 1, 2, 4, 5, 6, 7];
        let t = transcript(&[1, 2, 3, 1, 2, 4, 5, 6, 7, 80, 81, 82]);
        let windows = find_candidate_windows(&reference, &t, &params());
        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0].span.start_index, 0);
        assert_eq!(windows[0].span.end_index, 9);
        assert_eq!(windows[0].prior_score, 1.0);
        assert_eq!(windows[0].anchor_hits, 8);
    }

    #[test]
    fn repeated_reference_ngram_keeps_retakes_apart() {
        // flawed take (6 -> 88), then a clean one
        let reference = [1, 2, 3, 1, 2, 4, 5, 6, 7];
        let t = transcript(&[1, 2, 3, 1, 2, 4, 5, 88, 7, 1, 2, 3, 1, 2, 4, 5, 6, 7]);
        let windows = find_candidate_windows(&reference, &t, &params());
        assert_eq!(windows.len(), 2);
        assert_eq!(windows[0].span.start_index, 9);
        assert_eq!(windows[0].span.end_index, 18);
        assert_eq!(windows[0].prior_score, 1.0);
        assert_eq!(windows[1].span.start_index, 0);
        assert_eq!(windows[1].span.end_index, 9);
        assert_eq!(windows[1].prior_score, 0.75);
    }

    #[test]
    fn no_anchor_falls_back_to_sliding_overlap() {
        // no shared bigram, but unigrams overlap
        let t = transcript(&[50, 3, 51, 1, 52, 2, 53]);
        let windows = find_candidate_windows(&[1, 2, 3], &t, &params());
        assert!(!windows.is_empty());
        assert!(windows.len() <= 8);
        assert!(windows.iter().all(|w| w.span.token_len() == 3));
        assert!(windows.iter().all(|w| w.prior_score > 0.0));
    }

    #[test]
    fn unrelated_sentence_has_no_candidates() {
        let t = transcript(&[10, 11, 12, 13, 14]);
        assert!(find_candidate_windows(&[1, 2, 3], &t, &params()).is_empty());
        assert!(find_candidate_windows(&[], &t, &params()).is_empty());
        let empty = transcript(&[]);
        assert!(find_candidate_windows(&[1, 2], &empty, &params()).is_empty());
    }

    #[test]
    fn max_windows_caps_output() {
        let mut ids = Vec::new();
        for _ in 0..6 {
            ids.extend_from_slice(&[1, 2, 3, 80]);
        }
        let t = transcript(&ids);
        let capped = CandidateParams {
            max_windows: 3,
            ..params()
        };
        let windows = find_candidate_windows(&[1, 2, 3], &t, &capped);
        assert_eq!(windows.len(), 3);
        // equal priors fall back to transcript order
        assert_eq!(windows[0].span.start_index, 0);
        assert_eq!(windows[1].span.start_index, 4);
    }

    #[test]
    fn exhaustive_scan_finds_occurrence_without_anchors() {
        let t = transcript(&[9, 9, 1, 2, 3, 9]);
        let exhaustive = CandidateParams {
            fast_match: false,
            ..params()
        };
        let windows = find_candidate_windows(&[1, 2, 3], &t, &exhaustive);
        assert_eq!(windows[0].span.start_index, 2);
        assert_eq!(windows[0].prior_score, 1.0);
        // overlapping neighbours are suppressed
        assert!(windows
            .iter()
            .skip(1)
            .all(|w| 2 * w.span.overlap_len(&windows[0].span) <= 3));
    }

    #[test]
    fn window_length_is_capped() {
        // repeated reference bigram at far-apart offsets produces a wide cluster
        let t = transcript(&[1, 2, 5, 6, 7, 8, 1, 2]);
        let windows = find_candidate_windows(&[1, 2, 3, 1, 2], &t, &params());
        assert!(windows.iter().all(|w| w.span.token_len() <= 10));
    }

    #[test]
    fn sliding_overlap_counts_multiset_minimum() {
        let t = transcript(&[1, 1, 1]);
        let windows = sliding_windows(&[1, 1, 2], &t, 1, 4);
        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0].anchor_hits, 2);
    }
}

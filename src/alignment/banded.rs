use crate::pipeline::traits::Deadline;
use crate::types::{CandidateWindow, MatchOutcome, MatchResult, TokenId, Transcript};

const INF: usize = usize::MAX / 2;

/// Result of one banded DP round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BandOutcome {
    /// Cost of the best alignment that stays inside the band. Exact when it
    /// does not exceed the half-width; otherwise only an upper bound.
    Reached(usize),
    /// Every in-band cell of `row` exceeded the abandonment limit.
    Abandoned { row: usize, lower_bound: usize },
    /// The end cell lies outside the band.
    Unreachable,
}

/// Per-window matching parameters, fixed for the whole run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchRequest {
    /// Seeds the initial band half-width.
    pub max_distance_ratio: f64,
    pub acceptance_floor: f64,
    /// Where the sentence should fall on a linear reading of the script, in seconds.
    pub expected_time: f64,
}

/// Midpoint of sentence `index`'s linear share of `total_duration`.
pub fn expected_time(index: usize, sentence_count: usize, total_duration: f64) -> f64 {
    if sentence_count == 0 {
        return 0.0;
    }
    (index as f64 + 0.5) / sentence_count as f64 * total_duration
}

/// Largest edit distance that still clears `acceptance_floor` for sequences
/// whose longer side has `longest` tokens.
pub fn acceptance_distance(acceptance_floor: f64, longest: usize) -> usize {
    ((1.0 - acceptance_floor).max(0.0) * longest as f64 + 1e-9).floor() as usize
}

pub fn similarity(edit_distance: usize, longest: usize) -> f64 {
    if longest == 0 {
        return 1.0;
    }
    (1.0 - edit_distance as f64 / longest as f64).clamp(0.0, 1.0)
}

/// Levenshtein distance restricted to cells with `|i - j| <= half_width`.
///
/// With `abandon_above` set, the DP stops as soon as a whole row exceeds it.
/// Callers must only pass a limit no larger than `half_width`: an optimal
/// path of cost `d` never leaves the band `|i - j| <= d`, so under that
/// condition an abandoned window provably cannot reach the limit.
pub fn banded_edit_distance(
    a: &[TokenId],
    b: &[TokenId],
    half_width: usize,
    abandon_above: Option<usize>,
) -> BandOutcome {
    let (m, n) = (a.len(), b.len());
    if m.abs_diff(n) > half_width {
        return BandOutcome::Unreachable;
    }

    let mut prev = vec![INF; n + 1];
    let mut curr = vec![INF; n + 1];
    for (j, cell) in prev.iter_mut().enumerate().take(n.min(half_width) + 1) {
        *cell = j;
    }

    for i in 1..=m {
        let lo = i.saturating_sub(half_width);
        let hi = (i + half_width).min(n);
        if lo > 0 {
            curr[lo - 1] = INF;
        }
        let mut row_min = INF;
        for j in lo..=hi {
            let value = if j == 0 {
                i
            } else {
                let substitute = prev[j - 1] + usize::from(a[i - 1] != b[j - 1]);
                let delete = prev[j] + 1;
                let insert = curr[j - 1] + 1;
                substitute.min(delete).min(insert).min(INF)
            };
            curr[j] = value;
            row_min = row_min.min(value);
        }
        if hi < n {
            curr[hi + 1] = INF;
        }
        if let Some(limit) = abandon_above {
            if row_min > limit {
                return BandOutcome::Abandoned {
                    row: i,
                    lower_bound: row_min,
                };
            }
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    match prev[n] {
        d if d >= INF => BandOutcome::Unreachable,
        d => BandOutcome::Reached(d),
    }
}

/// Full two-row Levenshtein distance, no band and no early stop.
pub fn naive_edit_distance(a: &[TokenId], b: &[TokenId]) -> usize {
    let n = b.len();
    let mut prev: Vec<usize> = (0..=n).collect();
    let mut curr = vec![0usize; n + 1];
    for (i, &x) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, &y) in b.iter().enumerate() {
            curr[j + 1] = (prev[j] + usize::from(x != y))
                .min(prev[j + 1] + 1)
                .min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[n]
}

fn window_ids<'t>(transcript: &'t Transcript, window: &CandidateWindow) -> &'t [TokenId] {
    let ids = transcript.ids();
    let end = window.span.end_index.min(ids.len());
    &ids[window.span.start_index.min(end)..end]
}

fn build_result(
    window: &CandidateWindow,
    request: &MatchRequest,
    edit_distance: usize,
    longest: usize,
    outcome: MatchOutcome,
    band_saturated: bool,
) -> MatchResult {
    MatchResult {
        window: window.clone(),
        similarity: similarity(edit_distance, longest),
        edit_distance,
        band_saturated,
        timed_out: outcome == MatchOutcome::TimedOut,
        outcome,
        expected_offset: (window.span.midpoint_time() - request.expected_time).abs(),
    }
}

/// Scores one window with iterative band widening.
///
/// The deadline is polled before every round. A timed-out window reports the
/// best upper bound any finished round produced, or the worst possible
/// distance when no round finished.
pub fn match_window_banded(
    reference: &[TokenId],
    transcript: &Transcript,
    window: &CandidateWindow,
    request: &MatchRequest,
    deadline: &Deadline<'_>,
) -> MatchResult {
    let candidate = window_ids(transcript, window);
    let (m, w) = (reference.len(), candidate.len());
    let longest = m.max(w);
    let accept = acceptance_distance(request.acceptance_floor, longest);

    let length_gap = m.abs_diff(w);
    if length_gap > accept {
        return build_result(window, request, length_gap, longest, MatchOutcome::Abandoned, false);
    }

    let mut half_width = ((request.max_distance_ratio * m as f64).ceil() as usize)
        .max(1)
        .min(longest.max(1));
    let mut upper_bound: Option<usize> = None;
    loop {
        if deadline.expired() {
            let distance = upper_bound.unwrap_or(longest);
            return build_result(window, request, distance, longest, MatchOutcome::TimedOut, false);
        }

        let saturated = half_width >= longest;
        let abandon_above = (half_width >= accept).then_some(accept);
        match banded_edit_distance(reference, candidate, half_width, abandon_above) {
            BandOutcome::Abandoned { lower_bound, .. } => {
                return build_result(
                    window,
                    request,
                    lower_bound,
                    longest,
                    MatchOutcome::Abandoned,
                    saturated,
                );
            }
            BandOutcome::Reached(distance) if distance <= half_width || saturated => {
                return build_result(
                    window,
                    request,
                    distance,
                    longest,
                    MatchOutcome::Complete,
                    saturated,
                );
            }
            BandOutcome::Reached(distance) if half_width >= accept => {
                // The true distance exceeds the band, which already covers the limit.
                return build_result(
                    window,
                    request,
                    distance.min(half_width + 1),
                    longest,
                    MatchOutcome::Abandoned,
                    saturated,
                );
            }
            BandOutcome::Reached(distance) => {
                upper_bound = Some(upper_bound.map_or(distance, |d| d.min(distance)));
            }
            BandOutcome::Unreachable => {}
        }
        half_width = (half_width * 2).min(longest);
    }
}

/// Scores one window with the full DP. Used by the align-greedy tier, which
/// bounds its work by sentence count rather than by deadline.
pub fn match_window_naive(
    reference: &[TokenId],
    transcript: &Transcript,
    window: &CandidateWindow,
    request: &MatchRequest,
) -> MatchResult {
    let candidate = window_ids(transcript, window);
    let longest = reference.len().max(candidate.len());
    let distance = naive_edit_distance(reference, candidate);
    build_result(window, request, distance, longest, MatchOutcome::Complete, true)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use super::*;
    use crate::pipeline::defaults::FrozenClock;
    use crate::types::TranscriptToken;

    fn transcript(ids: &[TokenId]) -> Transcript {
        let tokens = ids
            .iter()
            .enumerate()
            .map(|(i, &id)| TranscriptToken {
                id,
                text: format!("w{id}"),
                start_time: i as f64 * 0.5,
                end_time: i as f64 * 0.5 + 0.4,
            })
            .collect();
        Transcript::new(tokens, None).expect("valid transcript")
    }

    fn whole_window(t: &Transcript) -> CandidateWindow {
        CandidateWindow {
            span: t.span(0, t.len()).expect("non-empty transcript"),
            prior_score: 1.0,
            anchor_hits: 0,
        }
    }

    fn request() -> MatchRequest {
        MatchRequest {
            max_distance_ratio: 0.25,
            acceptance_floor: 0.75,
            expected_time: 0.0,
        }
    }

    #[test]
    fn naive_distance_matches_textbook_cases() {
        assert_eq!(naive_edit_distance(&[], &[]), 0);
        assert_eq!(naive_edit_distance(&[1, 2, 3], &[]), 3);
        assert_eq!(naive_edit_distance(&[1, 2, 3], &[1, 2, 3]), 0);
        assert_eq!(naive_edit_distance(&[1, 2, 3], &[1, 9, 3]), 1);
        assert_eq!(naive_edit_distance(&[1, 2, 3, 4], &[2, 3, 4, 5]), 2);
    }

    #[test]
    fn band_is_exact_whenever_it_covers_the_distance() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..300 {
            let m: usize = rng.gen_range(0..14);
            let n: usize = rng.gen_range(0..14);
            let a: Vec<TokenId> = (0..m).map(|_| rng.gen_range(0..4)).collect();
            let b: Vec<TokenId> = (0..n).map(|_| rng.gen_range(0..4)).collect();
            let exact = naive_edit_distance(&a, &b);
            for h in 0..=14usize {
                match banded_edit_distance(&a, &b, h, None) {
                    BandOutcome::Reached(d) => {
                        assert!(d >= exact, "band never undercuts the true distance");
                        if h >= exact {
                            assert_eq!(d, exact, "a={a:?} b={b:?} h={h}");
                        }
                    }
                    BandOutcome::Unreachable => assert!(m.abs_diff(n) > h),
                    BandOutcome::Abandoned { .. } => unreachable!("no limit was given"),
                }
            }
        }
    }

    #[test]
    fn abandonment_never_rejects_a_reachable_match() {
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..300 {
            let m: usize = rng.gen_range(1..12);
            let a: Vec<TokenId> = (0..m).map(|_| rng.gen_range(0..3)).collect();
            let b: Vec<TokenId> = (0..rng.gen_range(1..12)).map(|_| rng.gen_range(0..3)).collect();
            let exact = naive_edit_distance(&a, &b);
            let limit: usize = rng.gen_range(0..6);
            let h = limit + rng.gen_range(0..3);
            if let BandOutcome::Abandoned { lower_bound, .. } =
                banded_edit_distance(&a, &b, h, Some(limit))
            {
                assert!(exact > limit, "abandoned a={a:?} b={b:?} at distance {exact}");
                assert!(lower_bound > limit);
            }
        }
    }

    #[test]
    fn identical_window_scores_one() {
        let t = transcript(&[1, 2, 3, 4, 5, 6, 7, 8]);
        let clock = FrozenClock::new();
        let deadline = Deadline::after(&clock, Duration::from_secs(1));
        let reference = [1, 2, 3, 4, 5, 6, 7, 8];
        let result = match_window_banded(&reference, &t, &whole_window(&t), &request(), &deadline);
        assert_eq!(result.outcome, MatchOutcome::Complete);
        assert_eq!(result.edit_distance, 0);
        assert_eq!(result.similarity, 1.0);
        assert!(!result.timed_out);
        assert!(result.is_acceptable(0.75));
    }

    #[test]
    fn two_edits_in_ten_tokens_score_point_eight() {
        let reference: Vec<TokenId> = (1..=10).collect();
        let t = transcript(&[1, 2, 3, 40, 5, 6, 7, 80, 9, 10]);
        let clock = FrozenClock::new();
        let deadline = Deadline::after(&clock, Duration::from_secs(1));
        let result = match_window_banded(&reference, &t, &whole_window(&t), &request(), &deadline);
        assert_eq!(result.edit_distance, 2);
        assert!((result.similarity - 0.8).abs() < 1e-12);
        assert!(result.is_acceptable(0.75));
        assert!(!result.band_saturated);
    }

    #[test]
    fn band_widens_when_lengths_diverge() {
        let reference: Vec<TokenId> = (1..=20).collect();
        let mut ids = reference.clone();
        for k in 0..8 {
            ids.insert(2 + 3 * k, 100 + k as TokenId);
        }
        let t = transcript(&ids);
        let req = MatchRequest {
            max_distance_ratio: 0.3,
            acceptance_floor: 0.7,
            expected_time: 0.0,
        };
        let clock = FrozenClock::new();
        let deadline = Deadline::after(&clock, Duration::from_secs(1));
        let result = match_window_banded(&reference, &t, &whole_window(&t), &req, &deadline);
        assert_eq!(result.outcome, MatchOutcome::Complete);
        assert_eq!(result.edit_distance, 8);
        assert!((result.similarity - (1.0 - 8.0 / 28.0)).abs() < 1e-12);
    }

    #[test]
    fn unrelated_window_is_abandoned() {
        let reference: Vec<TokenId> = (1..=10).collect();
        let t = transcript(&[50, 51, 52, 53, 54, 55, 56, 57, 58, 59]);
        let clock = FrozenClock::new();
        let deadline = Deadline::after(&clock, Duration::from_secs(1));
        let result = match_window_banded(&reference, &t, &whole_window(&t), &request(), &deadline);
        assert_eq!(result.outcome, MatchOutcome::Abandoned);
        assert!(!result.is_acceptable(0.0));
    }

    #[test]
    fn length_gap_alone_rejects_window() {
        let reference: Vec<TokenId> = (1..=4).collect();
        let t = transcript(&[1, 2, 3, 4, 5, 6, 7, 8, 9, 10]);
        let clock = FrozenClock::new();
        let deadline = Deadline::after(&clock, Duration::from_secs(1));
        let result = match_window_banded(&reference, &t, &whole_window(&t), &request(), &deadline);
        assert_eq!(result.outcome, MatchOutcome::Abandoned);
        assert_eq!(result.edit_distance, 6);
    }

    #[test]
    fn expired_deadline_times_out_without_work() {
        let reference: Vec<TokenId> = (1..=10).collect();
        let t = transcript(&reference);
        let clock = FrozenClock::new();
        let deadline = Deadline::after(&clock, Duration::ZERO);
        let result = match_window_banded(&reference, &t, &whole_window(&t), &request(), &deadline);
        assert_eq!(result.outcome, MatchOutcome::TimedOut);
        assert!(result.timed_out);
        assert_eq!(result.edit_distance, 10);
        assert_eq!(result.similarity, 0.0);
    }

    #[test]
    fn naive_window_match_is_complete_and_saturated() {
        let reference: Vec<TokenId> = (1..=10).collect();
        let t = transcript(&[1, 2, 3, 40, 5, 6, 7, 80, 9, 10]);
        let result = match_window_naive(&reference, &t, &whole_window(&t), &request());
        assert_eq!(result.outcome, MatchOutcome::Complete);
        assert!(result.band_saturated);
        assert_eq!(result.edit_distance, 2);
    }

    #[test]
    fn expected_time_is_linear_share_midpoint() {
        assert_eq!(expected_time(0, 4, 40.0), 5.0);
        assert_eq!(expected_time(3, 4, 40.0), 35.0);
        assert_eq!(expected_time(0, 0, 40.0), 0.0);
        assert_eq!(acceptance_distance(0.75, 10), 2);
        assert_eq!(acceptance_distance(0.8, 10), 2);
        assert_eq!(acceptance_distance(1.0, 10), 0);
    }
}

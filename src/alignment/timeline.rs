use crate::error::AlignmentError;
use crate::types::{SentenceDecision, SpanLabel, Timeline, TimelineSpan};

/// Builds the KEEP/DELETE cover of `[0, total_duration)` from per-sentence
/// decisions.
///
/// The background is KEEP. DELETE spans are carved out of it, except where
/// another sentence's KEEP span claims the same audio. Adjacent spans with the
/// same label are merged. The result is verified before it is returned; a
/// verification failure is an assembler defect and is never repaired.
pub fn assemble_timeline(
    decisions: &[SentenceDecision],
    total_duration: f64,
) -> Result<Timeline, AlignmentError> {
    if !total_duration.is_finite() || total_duration < 0.0 {
        return Err(AlignmentError::invalid_input(format!(
            "total duration must be a finite non-negative number, got {total_duration}"
        )));
    }
    if total_duration == 0.0 {
        let timeline = Timeline::keep_all(0.0);
        timeline.verify()?;
        return Ok(timeline);
    }

    let clamp = |start: f64, end: f64| {
        let start = start.clamp(0.0, total_duration);
        let end = end.clamp(0.0, total_duration);
        (start < end).then_some((start, end))
    };
    let deletes = merge_intervals(
        decisions
            .iter()
            .flat_map(|d| d.delete_spans.iter())
            .filter_map(|span| clamp(span.start_time, span.end_time))
            .collect(),
    );
    let keeps = merge_intervals(
        decisions
            .iter()
            .filter_map(|d| d.keep_span())
            .filter_map(|span| clamp(span.start_time, span.end_time))
            .collect(),
    );
    let deletes = subtract_intervals(&deletes, &keeps);

    let mut spans: Vec<TimelineSpan> = Vec::with_capacity(deletes.len() * 2 + 1);
    let mut cursor = 0.0;
    for (start, end) in deletes {
        push_span(&mut spans, cursor, start, SpanLabel::Keep);
        push_span(&mut spans, start, end, SpanLabel::Delete);
        cursor = end;
    }
    push_span(&mut spans, cursor, total_duration, SpanLabel::Keep);

    let timeline = Timeline::from_spans(spans, total_duration);
    timeline.verify()?;
    tracing::debug!(
        spans = timeline.spans().len(),
        deleted_seconds = timeline.deleted_seconds(),
        "timeline: assembled"
    );
    Ok(timeline)
}

fn push_span(spans: &mut Vec<TimelineSpan>, start: f64, end: f64, label: SpanLabel) {
    if start >= end {
        return;
    }
    if let Some(last) = spans.last_mut() {
        if last.label == label && last.end == start {
            last.end = end;
            return;
        }
    }
    spans.push(TimelineSpan { start, end, label });
}

/// Sorts and unions half-open intervals; touching intervals are joined.
fn merge_intervals(mut intervals: Vec<(f64, f64)>) -> Vec<(f64, f64)> {
    intervals.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.total_cmp(&b.1)));
    let mut merged: Vec<(f64, f64)> = Vec::with_capacity(intervals.len());
    for (start, end) in intervals {
        match merged.last_mut() {
            Some(last) if start <= last.1 => last.1 = last.1.max(end),
            _ => merged.push((start, end)),
        }
    }
    merged
}

/// `base \ cut` for two sorted, disjoint interval lists.
fn subtract_intervals(base: &[(f64, f64)], cut: &[(f64, f64)]) -> Vec<(f64, f64)> {
    let mut out = Vec::with_capacity(base.len());
    let mut next_cut = 0usize;
    for &(start, end) in base {
        let mut cursor = start;
        while next_cut < cut.len() && cut[next_cut].1 <= cursor {
            next_cut += 1;
        }
        let mut k = next_cut;
        while k < cut.len() && cut[k].0 < end {
            let (cut_start, cut_end) = cut[k];
            if cut_start > cursor {
                out.push((cursor, cut_start));
            }
            cursor = cursor.max(cut_end);
            if cursor >= end {
                break;
            }
            k += 1;
        }
        if cursor < end {
            out.push((cursor, end));
        }
    }
    out
}

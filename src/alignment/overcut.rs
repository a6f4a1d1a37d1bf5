use serde::Serialize;

use crate::types::Timeline;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct OvercutVerdict {
    pub deleted_seconds: f64,
    /// `deleted_seconds / total_duration`, 0 for an empty recording.
    pub deleted_ratio: f64,
    pub ceiling: f64,
    pub exceeds: bool,
}

/// Flags timelines that delete an implausible share of the recording.
pub fn check_overcut(timeline: &Timeline, ceiling: f64) -> OvercutVerdict {
    let deleted_seconds = timeline.deleted_seconds();
    let total = timeline.total_duration();
    let deleted_ratio = if total > 0.0 {
        deleted_seconds / total
    } else {
        0.0
    };
    OvercutVerdict {
        deleted_seconds,
        deleted_ratio,
        ceiling,
        exceeds: deleted_ratio > ceiling,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{SpanLabel, TimelineSpan};

    fn timeline(deleted: f64, total: f64) -> Timeline {
        Timeline::from_spans(
            vec![
                TimelineSpan {
                    start: 0.0,
                    end: deleted,
                    label: SpanLabel::Delete,
                },
                TimelineSpan {
                    start: deleted,
                    end: total,
                    label: SpanLabel::Keep,
                },
            ],
            total,
        )
    }

    #[test]
    fn ratio_above_ceiling_is_flagged() {
        let verdict = check_overcut(&timeline(7.0, 10.0), 0.6);
        assert!(verdict.exceeds);
        assert!((verdict.deleted_ratio - 0.7).abs() < 1e-12);
        assert_eq!(verdict.deleted_seconds, 7.0);
    }

    #[test]
    fn ratio_at_ceiling_is_accepted() {
        let verdict = check_overcut(&timeline(6.0, 10.0), 0.6);
        assert!(!verdict.exceeds);
        assert!(!check_overcut(&Timeline::keep_all(10.0), 0.01).exceeds);
    }

    #[test]
    fn empty_recording_never_overcuts() {
        let verdict = check_overcut(&Timeline::keep_all(0.0), 0.5);
        assert_eq!(verdict.deleted_ratio, 0.0);
        assert!(!verdict.exceeds);
    }
}

use std::cmp::Ordering;

use serde::Serialize;

use crate::error::AlignmentError;
use crate::types::{
    EngineOutput, FallbackPolicy, KeepPolicy, RunDiagnostics, SentenceDecision, SpanLabel,
    Timeline,
};

pub const REPORT_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub schema_version: u32,
    pub meta: Meta,
    pub timeline: Timeline,
    pub decisions: Vec<SentenceDecision>,
    pub diagnostics: RunDiagnostics,
    pub aggregates: AggregateReport,
}

#[derive(Debug, Clone, Serialize)]
pub struct Meta {
    pub generated_at: String,
    pub transcript_path: String,
    pub reference_path: String,
    pub transcript_tokens: usize,
    pub reference_sentences: usize,
    pub keep_policy: KeepPolicy,
    pub fallback_policy: FallbackPolicy,
    pub match_timeout_secs: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AggregateReport {
    pub counts: AggregateCounts,
    pub kept_seconds: f32,
    pub cut_seconds: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<MetricDistribution>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similarity: Option<MetricDistribution>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AggregateCounts {
    pub sentences: u32,
    pub matched: u32,
    pub unmatched: u32,
    pub timed_out: u32,
    /// Sentences that were read more than once and had takes cut.
    pub retaken: u32,
    pub keep_spans: u32,
    pub delete_spans: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricDistribution {
    pub mean: f32,
    pub p50: f32,
    pub p90: f32,
    pub p95: f32,
    pub p99: f32,
}

pub fn build_report(meta: Meta, output: EngineOutput) -> Report {
    let aggregates = aggregate_output(&output);
    Report {
        schema_version: REPORT_SCHEMA_VERSION,
        meta,
        timeline: output.timeline,
        decisions: output.decisions,
        diagnostics: output.diagnostics,
        aggregates,
    }
}

pub fn aggregate_output(output: &EngineOutput) -> AggregateReport {
    let diagnostics = &output.diagnostics;
    let latencies: Vec<f64> = diagnostics.sentences.iter().map(|s| s.latency_ms).collect();
    let similarities: Vec<f64> = diagnostics.sentences.iter().filter_map(|s| s.score).collect();

    AggregateReport {
        counts: AggregateCounts {
            sentences: to_u32(diagnostics.total_sentences),
            matched: to_u32(diagnostics.matched),
            unmatched: to_u32(diagnostics.unmatched),
            timed_out: to_u32(diagnostics.sentences.iter().filter(|s| s.timed_out).count()),
            retaken: to_u32(
                output
                    .decisions
                    .iter()
                    .filter(|d| !d.delete_spans.is_empty())
                    .count(),
            ),
            keep_spans: to_u32(output.timeline.spans_with_label(SpanLabel::Keep).count()),
            delete_spans: to_u32(output.timeline.spans_with_label(SpanLabel::Delete).count()),
        },
        kept_seconds: checked_f32(output.timeline.kept_seconds(), "kept_seconds").unwrap_or(0.0),
        cut_seconds: checked_f32(output.timeline.deleted_seconds(), "cut_seconds").unwrap_or(0.0),
        latency_ms: distribution_or_none(&latencies),
        similarity: distribution_or_none(&similarities),
    }
}

fn distribution_or_none(values: &[f64]) -> Option<MetricDistribution> {
    if values.is_empty() {
        return None;
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    Some(MetricDistribution {
        mean: checked_f32(mean(&sorted), "aggregate.mean").ok()?,
        p50: checked_f32(percentile_sorted(&sorted, 0.5), "aggregate.p50").ok()?,
        p90: checked_f32(percentile_sorted(&sorted, 0.9), "aggregate.p90").ok()?,
        p95: checked_f32(percentile_sorted(&sorted, 0.95), "aggregate.p95").ok()?,
        p99: checked_f32(percentile_sorted(&sorted, 0.99), "aggregate.p99").ok()?,
    })
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

fn percentile_sorted(sorted_values: &[f64], percentile: f64) -> f64 {
    if sorted_values.is_empty() {
        return 0.0;
    }
    if sorted_values.len() == 1 {
        return sorted_values[0];
    }

    let rank = percentile.clamp(0.0, 1.0) * (sorted_values.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    if lower == upper {
        sorted_values[lower]
    } else {
        let weight = rank - lower as f64;
        sorted_values[lower] * (1.0 - weight) + sorted_values[upper] * weight
    }
}

fn to_u32(value: usize) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}

fn checked_f32(value: f64, metric_name: &str) -> Result<f32, AlignmentError> {
    if !value.is_finite() || value < f32::MIN as f64 || value > f32::MAX as f64 {
        return Err(AlignmentError::invalid_input(format!(
            "metric '{metric_name}' cannot be reported as f32: {value}"
        )));
    }
    Ok(value as f32)
}

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::AlignmentError;
use crate::types::{FallbackPolicy, KeepPolicy};

/// User-facing engine options. Resolve once with [`EngineConfig::resolve`]
/// before running; the engine only ever sees a [`ResolvedConfig`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Anchor-based pre-filtering; `false` scans every window position.
    pub fast_match: bool,
    pub max_windows: usize,
    /// Per-sentence matcher deadline, in seconds.
    pub match_timeout: f64,
    pub max_distance_ratio: f64,
    pub min_anchor_ngram: usize,
    pub keep_policy: KeepPolicy,
    pub fallback_policy: FallbackPolicy,
    pub overcut_ceiling: f64,
    /// Minimum similarity for a take to count. Defaults to `1 - max_distance_ratio`.
    pub acceptance_floor: Option<f64>,
    /// Percentage 0..=100; when set it replaces `max_distance_ratio`.
    pub aggressiveness: Option<u8>,
    pub strict_floor_delta: f64,
    pub window_length_factor: f64,
    pub timeout_fraction_trigger: f64,
    /// Seconds of summed per-sentence overrun tolerated before degrading.
    pub document_overrun_budget: f64,
    pub min_match_rate: f64,
    pub greedy_max_sentences: usize,
    /// 0 picks the available parallelism.
    pub worker_threads: usize,
    pub max_unmatched_examples: usize,
}

impl EngineConfig {
    pub const DEFAULT_MAX_WINDOWS: usize = 8;
    pub const DEFAULT_MATCH_TIMEOUT_SECS: f64 = 2.0;
    pub const DEFAULT_MAX_DISTANCE_RATIO: f64 = 0.25;
    pub const DEFAULT_MIN_ANCHOR_NGRAM: usize = 2;
    pub const DEFAULT_OVERCUT_CEILING: f64 = 0.6;

    pub fn load(path: &Path) -> Result<Self, AlignmentError> {
        let data = std::fs::read_to_string(path)
            .map_err(|e| AlignmentError::io("read engine config", e))?;
        serde_json::from_str(&data).map_err(|e| AlignmentError::json("parse engine config", e))
    }

    /// Validates every option and computes the concrete thresholds.
    pub fn resolve(&self) -> Result<ResolvedConfig, AlignmentError> {
        if self.max_windows == 0 {
            return Err(AlignmentError::invalid_config("max_windows", "must be >= 1"));
        }
        if self.min_anchor_ngram == 0 {
            return Err(AlignmentError::invalid_config(
                "min_anchor_ngram",
                "must be >= 1",
            ));
        }
        if !self.match_timeout.is_finite() || self.match_timeout < 0.0 {
            return Err(AlignmentError::invalid_config(
                "match_timeout",
                format!("must be a non-negative number of seconds, got {}", self.match_timeout),
            ));
        }
        check_unit_interval("max_distance_ratio", self.max_distance_ratio)?;
        if !(self.overcut_ceiling > 0.0 && self.overcut_ceiling <= 1.0) {
            return Err(AlignmentError::invalid_config(
                "overcut_ceiling",
                format!("must be in (0, 1], got {}", self.overcut_ceiling),
            ));
        }
        check_unit_interval("strict_floor_delta", self.strict_floor_delta)?;
        check_unit_interval("timeout_fraction_trigger", self.timeout_fraction_trigger)?;
        check_unit_interval("min_match_rate", self.min_match_rate)?;
        if !self.window_length_factor.is_finite() || self.window_length_factor < 1.0 {
            return Err(AlignmentError::invalid_config(
                "window_length_factor",
                format!("must be >= 1.0, got {}", self.window_length_factor),
            ));
        }
        if !self.document_overrun_budget.is_finite() || self.document_overrun_budget < 0.0 {
            return Err(AlignmentError::invalid_config(
                "document_overrun_budget",
                format!("must be >= 0 seconds, got {}", self.document_overrun_budget),
            ));
        }

        let max_distance_ratio = match self.aggressiveness {
            Some(percent) if percent > 100 => {
                return Err(AlignmentError::invalid_config(
                    "aggressiveness",
                    format!("must be a percentage in 0..=100, got {percent}"),
                ));
            }
            Some(percent) => aggressiveness_to_ratio(percent),
            None => self.max_distance_ratio,
        };
        let acceptance_floor = match self.acceptance_floor {
            Some(floor) => {
                check_unit_interval("acceptance_floor", floor)?;
                floor
            }
            None => 1.0 - max_distance_ratio,
        };

        Ok(ResolvedConfig {
            fast_match: self.fast_match,
            max_windows: self.max_windows,
            match_timeout: seconds("match_timeout", self.match_timeout)?,
            max_distance_ratio,
            min_anchor_ngram: self.min_anchor_ngram,
            keep_policy: self.keep_policy,
            fallback_policy: self.fallback_policy,
            overcut_ceiling: self.overcut_ceiling,
            acceptance_floor,
            strict_acceptance_floor: (acceptance_floor + self.strict_floor_delta).min(1.0),
            window_length_factor: self.window_length_factor,
            timeout_fraction_trigger: self.timeout_fraction_trigger,
            document_overrun_budget: seconds(
                "document_overrun_budget",
                self.document_overrun_budget,
            )?,
            min_match_rate: self.min_match_rate,
            greedy_max_sentences: self.greedy_max_sentences,
            worker_threads: self.worker_threads,
            max_unmatched_examples: self.max_unmatched_examples,
        })
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            fast_match: true,
            max_windows: Self::DEFAULT_MAX_WINDOWS,
            match_timeout: Self::DEFAULT_MATCH_TIMEOUT_SECS,
            max_distance_ratio: Self::DEFAULT_MAX_DISTANCE_RATIO,
            min_anchor_ngram: Self::DEFAULT_MIN_ANCHOR_NGRAM,
            keep_policy: KeepPolicy::Last,
            fallback_policy: FallbackPolicy::Safe,
            overcut_ceiling: Self::DEFAULT_OVERCUT_CEILING,
            acceptance_floor: None,
            aggressiveness: None,
            strict_floor_delta: 0.1,
            window_length_factor: 2.0,
            timeout_fraction_trigger: 0.5,
            document_overrun_budget: 5.0,
            min_match_rate: 0.2,
            greedy_max_sentences: 256,
            worker_threads: 0,
            max_unmatched_examples: 10,
        }
    }
}

/// Concrete thresholds for one run. Never recomputed after resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedConfig {
    pub fast_match: bool,
    pub max_windows: usize,
    pub match_timeout: Duration,
    pub max_distance_ratio: f64,
    pub min_anchor_ngram: usize,
    pub keep_policy: KeepPolicy,
    pub fallback_policy: FallbackPolicy,
    pub overcut_ceiling: f64,
    pub acceptance_floor: f64,
    pub strict_acceptance_floor: f64,
    pub window_length_factor: f64,
    pub timeout_fraction_trigger: f64,
    pub document_overrun_budget: Duration,
    pub min_match_rate: f64,
    pub greedy_max_sentences: usize,
    pub worker_threads: usize,
    pub max_unmatched_examples: usize,
}

/// 0% tolerates 10% token edits, 100% tolerates 40%.
fn aggressiveness_to_ratio(percent: u8) -> f64 {
    0.10 + 0.30 * f64::from(percent) / 100.0
}

fn seconds(field: &'static str, value: f64) -> Result<Duration, AlignmentError> {
    Duration::try_from_secs_f64(value)
        .map_err(|e| AlignmentError::invalid_config(field, e.to_string()))
}

fn check_unit_interval(field: &'static str, value: f64) -> Result<(), AlignmentError> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(AlignmentError::invalid_config(
            field,
            format!("must be in [0, 1], got {value}"),
        ))
    }
}

use std::time::Duration;

use crate::config::ResolvedConfig;
use crate::types::{FallbackPolicy, FallbackTier, TierTransition, TransitionTrigger};

/// States of the degradation ladder. `Terminal` is reached only from
/// `KeepAll`, which always succeeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LadderState {
    Normal,
    AlignGreedy,
    KeepAll,
    Terminal,
}

impl LadderState {
    pub fn tier(self) -> Option<FallbackTier> {
        match self {
            LadderState::Normal => Some(FallbackTier::Normal),
            LadderState::AlignGreedy => Some(FallbackTier::AlignGreedy),
            LadderState::KeepAll => Some(FallbackTier::KeepAll),
            LadderState::Terminal => None,
        }
    }
}

/// Outcome of one tier's pass, as seen by the transition predicates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PassStats {
    pub total_sentences: usize,
    pub matched: usize,
    pub timed_out_sentences: usize,
    /// Sum of per-sentence time spent beyond `match_timeout`.
    pub overrun: Duration,
    /// Over-cut still present after the stricter re-resolution.
    pub overcut: bool,
    pub has_keep: bool,
}

impl PassStats {
    /// 1.0 for an empty script: there was nothing to miss.
    pub fn match_rate(&self) -> f64 {
        if self.total_sentences == 0 {
            1.0
        } else {
            self.matched as f64 / self.total_sentences as f64
        }
    }

    pub fn timed_out_fraction(&self) -> f64 {
        if self.total_sentences == 0 {
            0.0
        } else {
            self.timed_out_sentences as f64 / self.total_sentences as f64
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TriggerThresholds {
    pub timeout_fraction: f64,
    pub overrun_budget: Duration,
    pub min_match_rate: f64,
}

impl TriggerThresholds {
    pub fn from_config(config: &ResolvedConfig) -> Self {
        Self {
            timeout_fraction: config.timeout_fraction_trigger,
            overrun_budget: config.document_overrun_budget,
            min_match_rate: config.min_match_rate,
        }
    }
}

/// Why the normal tier must hand over to align-greedy, if it must.
pub fn normal_tier_trigger(
    stats: &PassStats,
    thresholds: &TriggerThresholds,
) -> Option<TransitionTrigger> {
    if stats.timed_out_sentences > 0 && stats.timed_out_fraction() >= thresholds.timeout_fraction {
        return Some(TransitionTrigger::GlobalTimeout);
    }
    if stats.overrun > thresholds.overrun_budget {
        return Some(TransitionTrigger::DocumentOverrun);
    }
    common_trigger(stats, thresholds)
}

/// Why align-greedy must hand over to keep-all, if it must.
pub fn greedy_tier_trigger(
    stats: &PassStats,
    thresholds: &TriggerThresholds,
) -> Option<TransitionTrigger> {
    common_trigger(stats, thresholds)
}

fn common_trigger(stats: &PassStats, thresholds: &TriggerThresholds) -> Option<TransitionTrigger> {
    if stats.overcut {
        Some(TransitionTrigger::OvercutPersisted)
    } else if stats.match_rate() < thresholds.min_match_rate {
        Some(TransitionTrigger::LowMatchRate)
    } else if !stats.has_keep {
        Some(TransitionTrigger::NoKeepSpan)
    } else {
        None
    }
}

#[derive(Debug, Clone)]
pub struct FallbackController {
    state: LadderState,
    transitions: Vec<TierTransition>,
}

impl FallbackController {
    /// Enters the ladder at the tier the policy names.
    pub fn new(policy: FallbackPolicy) -> Self {
        let state = match policy {
            FallbackPolicy::Safe => LadderState::Normal,
            FallbackPolicy::AlignGreedy => LadderState::AlignGreedy,
            FallbackPolicy::KeepAll => LadderState::KeepAll,
        };
        Self {
            state,
            transitions: Vec::new(),
        }
    }

    pub fn state(&self) -> LadderState {
        self.state
    }

    pub fn transitions(&self) -> &[TierTransition] {
        &self.transitions
    }

    /// Moves one rung down. Returns `None` from `KeepAll` and `Terminal`,
    /// which have nothing below them to degrade to.
    pub fn degrade(&mut self, trigger: TransitionTrigger) -> Option<TierTransition> {
        let (from, to) = match self.state {
            LadderState::Normal => (FallbackTier::Normal, LadderState::AlignGreedy),
            LadderState::AlignGreedy => (FallbackTier::AlignGreedy, LadderState::KeepAll),
            LadderState::KeepAll | LadderState::Terminal => return None,
        };
        let transition = TierTransition {
            from,
            to: to.tier()?,
            trigger,
        };
        self.state = to;
        self.transitions.push(transition);
        Some(transition)
    }

    /// The current tier produced the final result.
    pub fn finish(&mut self) -> Option<FallbackTier> {
        let tier = self.state.tier();
        self.state = LadderState::Terminal;
        tier
    }
}

use crate::config::EngineConfig;
use crate::error::AlignmentError;
use crate::pipeline::defaults::{
    AnchorCandidateFinder, BandedMatcher, CaseFoldTokenizer, NaiveMatcher, SystemClock,
    TracingSink,
};
use crate::pipeline::runtime::{RetakeEngine, RetakeEngineParts};
use crate::pipeline::traits::{
    CandidateFinder, Clock, DiagnosticsSink, SentenceMatcher, Tokenizer,
};

pub struct RetakeEngineBuilder {
    config: EngineConfig,
    tokenizer: Option<Box<dyn Tokenizer>>,
    candidate_finder: Option<Box<dyn CandidateFinder>>,
    matcher: Option<Box<dyn SentenceMatcher>>,
    greedy_matcher: Option<Box<dyn SentenceMatcher>>,
    diagnostics_sink: Option<Box<dyn DiagnosticsSink>>,
    clock: Option<Box<dyn Clock>>,
}

impl RetakeEngineBuilder {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            tokenizer: None,
            candidate_finder: None,
            matcher: None,
            greedy_matcher: None,
            diagnostics_sink: None,
            clock: None,
        }
    }

    pub fn with_tokenizer(mut self, tokenizer: Box<dyn Tokenizer>) -> Self {
        self.tokenizer = Some(tokenizer);
        self
    }

    pub fn with_candidate_finder(mut self, candidate_finder: Box<dyn CandidateFinder>) -> Self {
        self.candidate_finder = Some(candidate_finder);
        self
    }

    /// Matcher for the normal tier.
    pub fn with_matcher(mut self, matcher: Box<dyn SentenceMatcher>) -> Self {
        self.matcher = Some(matcher);
        self
    }

    /// Matcher for the align-greedy tier.
    pub fn with_greedy_matcher(mut self, greedy_matcher: Box<dyn SentenceMatcher>) -> Self {
        self.greedy_matcher = Some(greedy_matcher);
        self
    }

    pub fn with_diagnostics_sink(mut self, diagnostics_sink: Box<dyn DiagnosticsSink>) -> Self {
        self.diagnostics_sink = Some(diagnostics_sink);
        self
    }

    pub fn with_clock(mut self, clock: Box<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Resolves the configuration once; the engine never recomputes thresholds.
    pub fn build(self) -> Result<RetakeEngine, AlignmentError> {
        let config = self.config.resolve()?;
        tracing::debug!(
            keep_policy = config.keep_policy.as_str(),
            fallback_policy = config.fallback_policy.as_str(),
            max_distance_ratio = config.max_distance_ratio,
            acceptance_floor = config.acceptance_floor,
            match_timeout_ms = config.match_timeout.as_secs_f64() * 1000.0,
            "engine: configuration resolved"
        );

        Ok(RetakeEngine::from_parts(RetakeEngineParts {
            config,
            tokenizer: self
                .tokenizer
                .unwrap_or_else(|| Box::new(CaseFoldTokenizer)),
            candidate_finder: self
                .candidate_finder
                .unwrap_or_else(|| Box::new(AnchorCandidateFinder)),
            matcher: self.matcher.unwrap_or_else(|| Box::new(BandedMatcher)),
            greedy_matcher: self
                .greedy_matcher
                .unwrap_or_else(|| Box::new(NaiveMatcher)),
            diagnostics_sink: self
                .diagnostics_sink
                .unwrap_or_else(|| Box::new(TracingSink)),
            clock: self.clock.unwrap_or_else(|| Box::new(SystemClock)),
        }))
    }
}

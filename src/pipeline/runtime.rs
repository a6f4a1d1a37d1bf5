use std::num::NonZeroUsize;
use std::time::Duration;

use crate::alignment::banded::{expected_time, MatchRequest};
use crate::alignment::candidates::CandidateParams;
use crate::alignment::overcut::{check_overcut, OvercutVerdict};
use crate::alignment::resolver::{resolve_sentence, ResolveParams, SentenceMatches};
use crate::alignment::timeline::assemble_timeline;
use crate::alignment::tokenization::{build_reference_script, build_transcript, Vocabulary};
use crate::config::ResolvedConfig;
use crate::error::AlignmentError;
use crate::pipeline::events::EngineEvent;
use crate::pipeline::fallback::{
    greedy_tier_trigger, normal_tier_trigger, FallbackController, LadderState, PassStats,
    TriggerThresholds,
};
use crate::pipeline::traits::{
    CandidateFinder, Clock, Deadline, DiagnosticsSink, SentenceMatcher, Tokenizer,
};
use crate::types::{
    AsrWord, EngineOutput, FallbackTier, KeepPolicy, MatchEngine, PassSummary, ReferenceScript,
    ReferenceSentence, Resolution, RunDiagnostics, SentenceDecision, SentenceDiagnostics,
    Timeline, Transcript, UnmatchedExample, UnmatchedReason,
};

const EXCERPT_MAX_CHARS: usize = 80;

pub struct RetakeEngine {
    config: ResolvedConfig,
    tokenizer: Box<dyn Tokenizer>,
    candidate_finder: Box<dyn CandidateFinder>,
    matcher: Box<dyn SentenceMatcher>,
    greedy_matcher: Box<dyn SentenceMatcher>,
    diagnostics_sink: Box<dyn DiagnosticsSink>,
    clock: Box<dyn Clock>,
}

pub(crate) struct RetakeEngineParts {
    pub config: ResolvedConfig,
    pub tokenizer: Box<dyn Tokenizer>,
    pub candidate_finder: Box<dyn CandidateFinder>,
    pub matcher: Box<dyn SentenceMatcher>,
    pub greedy_matcher: Box<dyn SentenceMatcher>,
    pub diagnostics_sink: Box<dyn DiagnosticsSink>,
    pub clock: Box<dyn Clock>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EvaluationMode {
    /// Every candidate in prior order, under the sentence deadline.
    Bounded,
    /// Top-prior candidate only, full DP, capped in sentence count.
    Greedy,
}

/// Matcher work for one sentence, before any keep policy is applied.
struct SentenceEvaluation {
    matches: SentenceMatches,
    engine: MatchEngine,
    latency: Duration,
    attempted: bool,
}

/// One resolved and assembled pass over the whole script.
struct Pass {
    tier: FallbackTier,
    overcut_retry: bool,
    decisions: Vec<SentenceDecision>,
    sentences: Vec<SentenceDiagnostics>,
    timeline: Timeline,
    verdict: OvercutVerdict,
    timed_out_sentences: usize,
}

impl Pass {
    fn matched(&self) -> usize {
        self.decisions.iter().filter(|d| d.is_matched()).count()
    }

    fn summary(&self) -> PassSummary {
        let matched = self.matched();
        PassSummary {
            tier: self.tier,
            overcut_retry: self.overcut_retry,
            matched,
            unmatched: self.decisions.len() - matched,
            timed_out_sentences: self.timed_out_sentences,
            deleted_ratio: self.verdict.deleted_ratio,
        }
    }

    fn stats(&self, overrun: Duration) -> PassStats {
        PassStats {
            total_sentences: self.decisions.len(),
            matched: self.matched(),
            timed_out_sentences: self.timed_out_sentences,
            overrun,
            overcut: self.verdict.exceeds,
            has_keep: self.timeline.has_keep(),
        }
    }
}

impl RetakeEngine {
    pub(crate) fn from_parts(parts: RetakeEngineParts) -> Self {
        Self {
            config: parts.config,
            tokenizer: parts.tokenizer,
            candidate_finder: parts.candidate_finder,
            matcher: parts.matcher,
            greedy_matcher: parts.greedy_matcher,
            diagnostics_sink: parts.diagnostics_sink,
            clock: parts.clock,
        }
    }

    pub fn config(&self) -> &ResolvedConfig {
        &self.config
    }

    /// Engine used by the normal tier.
    pub fn match_engine(&self) -> MatchEngine {
        self.matcher.engine()
    }

    /// Tokenizes raw ASR words and script sentences against one shared vocabulary.
    pub fn prepare(
        &self,
        words: &[AsrWord],
        sentences: &[&str],
        total_duration: Option<f64>,
    ) -> Result<(Transcript, ReferenceScript), AlignmentError> {
        let mut vocab = Vocabulary::new();
        let transcript =
            build_transcript(words, self.tokenizer.as_ref(), &mut vocab, total_duration)?;
        let script = build_reference_script(sentences, self.tokenizer.as_ref(), &mut vocab)?;
        Ok((transcript, script))
    }

    /// Resolves every sentence, assembles the timeline and walks the fallback
    /// ladder until a tier produces a plausible result.
    ///
    /// Data-level trouble (no candidates, low scores, timeouts, over-cut) is
    /// reported through diagnostics. Only engine defects return `Err`.
    pub fn run(
        &self,
        transcript: &Transcript,
        script: &ReferenceScript,
    ) -> Result<EngineOutput, AlignmentError> {
        let thresholds = TriggerThresholds::from_config(&self.config);
        let mut controller = FallbackController::new(self.config.fallback_policy);
        let mut summaries: Vec<PassSummary> = Vec::new();
        let mut last_pass: Option<Pass> = None;
        let mut total_overrun = Duration::ZERO;
        let mut any_timeout = false;

        loop {
            let trigger = match controller.state() {
                LadderState::Normal => {
                    self.record(EngineEvent::PassStarted {
                        tier: FallbackTier::Normal,
                        overcut_retry: false,
                        sentences: script.len(),
                    });
                    let evaluations =
                        self.evaluate_sentences(transcript, script, EvaluationMode::Bounded)?;
                    let overrun = self.overrun(&evaluations);
                    total_overrun += overrun;

                    let normal = ResolveParams {
                        acceptance_floor: self.config.acceptance_floor,
                        keep_policy: self.config.keep_policy,
                    };
                    let mut pass = self.resolve_pass(
                        FallbackTier::Normal,
                        false,
                        &normal,
                        transcript,
                        script,
                        &evaluations,
                    )?;
                    if pass.verdict.exceeds {
                        self.record_overcut(&pass, true);
                        summaries.push(pass.summary());
                        self.record(EngineEvent::PassStarted {
                            tier: FallbackTier::Normal,
                            overcut_retry: true,
                            sentences: script.len(),
                        });
                        let strict = ResolveParams {
                            acceptance_floor: self.config.strict_acceptance_floor,
                            keep_policy: KeepPolicy::Best,
                        };
                        pass = self.resolve_pass(
                            FallbackTier::Normal,
                            true,
                            &strict,
                            transcript,
                            script,
                            &evaluations,
                        )?;
                        if pass.verdict.exceeds {
                            self.record_overcut(&pass, false);
                        }
                    }
                    any_timeout |= pass.timed_out_sentences > 0;
                    summaries.push(pass.summary());
                    let trigger = normal_tier_trigger(&pass.stats(overrun), &thresholds);
                    last_pass = Some(pass);
                    trigger
                }
                LadderState::AlignGreedy => {
                    self.record(EngineEvent::PassStarted {
                        tier: FallbackTier::AlignGreedy,
                        overcut_retry: false,
                        sentences: script.len(),
                    });
                    let evaluations =
                        self.evaluate_sentences(transcript, script, EvaluationMode::Greedy)?;
                    let params = ResolveParams {
                        acceptance_floor: self.config.acceptance_floor,
                        keep_policy: self.config.keep_policy,
                    };
                    let pass = self.resolve_pass(
                        FallbackTier::AlignGreedy,
                        false,
                        &params,
                        transcript,
                        script,
                        &evaluations,
                    )?;
                    if pass.verdict.exceeds {
                        self.record_overcut(&pass, false);
                    }
                    summaries.push(pass.summary());
                    let trigger = greedy_tier_trigger(&pass.stats(Duration::ZERO), &thresholds);
                    last_pass = Some(pass);
                    trigger
                }
                LadderState::KeepAll => {
                    let pass = self.keep_all_pass(transcript, last_pass.take(), script)?;
                    summaries.push(pass.summary());
                    last_pass = Some(pass);
                    None
                }
                LadderState::Terminal => None,
            };

            match trigger.and_then(|trigger| controller.degrade(trigger)) {
                Some(transition) => self.record(EngineEvent::TierTransition(transition)),
                None => break,
            }
        }

        let final_tier = controller.finish().unwrap_or(FallbackTier::KeepAll);
        let Some(pass) = last_pass else {
            return Err(AlignmentError::runtime(
                "fallback ladder",
                "no tier produced a timeline",
            ));
        };

        let matched = pass.matched();
        let unmatched = pass.decisions.len() - matched;
        let cut_seconds = pass.timeline.deleted_seconds();
        self.record(EngineEvent::RunCompleted {
            tier: final_tier,
            matched,
            unmatched,
            cut_seconds,
            timed_out: any_timeout,
        });

        let diagnostics = RunDiagnostics {
            total_sentences: script.len(),
            matched,
            unmatched,
            unmatched_examples: self.unmatched_examples(&pass.decisions, script),
            sentences: pass.sentences,
            timed_out: any_timeout,
            fallback_tier: final_tier,
            match_engine: match final_tier {
                FallbackTier::Normal => self.matcher.engine(),
                FallbackTier::AlignGreedy => self.greedy_matcher.engine(),
                FallbackTier::KeepAll => MatchEngine::None,
            },
            transitions: controller.transitions().to_vec(),
            passes: summaries,
            cut_seconds,
            total_duration: pass.timeline.total_duration(),
            deleted_ratio: pass.verdict.deleted_ratio,
            total_overrun_ms: total_overrun.as_secs_f64() * 1000.0,
        };
        Ok(EngineOutput {
            timeline: pass.timeline,
            decisions: pass.decisions,
            diagnostics,
        })
    }

    fn record(&self, event: EngineEvent) {
        self.diagnostics_sink.record(&event);
    }

    fn record_overcut(&self, pass: &Pass, retrying: bool) {
        self.record(EngineEvent::OvercutDetected {
            tier: pass.tier,
            deleted_ratio: pass.verdict.deleted_ratio,
            ceiling: pass.verdict.ceiling,
            retrying,
        });
    }

    fn overrun(&self, evaluations: &[SentenceEvaluation]) -> Duration {
        evaluations
            .iter()
            .map(|e| e.latency.saturating_sub(self.config.match_timeout))
            .sum()
    }

    fn evaluate_sentences(
        &self,
        transcript: &Transcript,
        script: &ReferenceScript,
        mode: EvaluationMode,
    ) -> Result<Vec<SentenceEvaluation>, AlignmentError> {
        let params = CandidateParams::from_config(&self.config);
        let count = script.len();
        self.run_parallel(script.sentences(), |position, sentence| {
            let request = MatchRequest {
                max_distance_ratio: self.config.max_distance_ratio,
                acceptance_floor: self.config.acceptance_floor,
                expected_time: expected_time(position, count, transcript.total_duration()),
            };
            match mode {
                EvaluationMode::Bounded => {
                    self.evaluate_bounded(sentence, transcript, &params, &request)
                }
                EvaluationMode::Greedy if position < self.config.greedy_max_sentences => {
                    self.evaluate_greedy(sentence, transcript, &params, &request)
                }
                EvaluationMode::Greedy => SentenceEvaluation {
                    matches: SentenceMatches::default(),
                    engine: MatchEngine::None,
                    latency: Duration::ZERO,
                    attempted: false,
                },
            }
        })
    }

    fn evaluate_bounded(
        &self,
        sentence: &ReferenceSentence,
        transcript: &Transcript,
        params: &CandidateParams,
        request: &MatchRequest,
    ) -> SentenceEvaluation {
        let started = self.clock.now();
        let windows = self
            .candidate_finder
            .find_windows(&sentence.tokens, transcript, params);
        let deadline = Deadline::after(self.clock.as_ref(), self.config.match_timeout);

        let mut results = Vec::with_capacity(windows.len());
        let mut timed_out = false;
        for window in &windows {
            if deadline.expired() {
                timed_out = true;
                break;
            }
            let result =
                self.matcher
                    .match_window(&sentence.tokens, transcript, window, request, &deadline);
            let cut_short = result.timed_out;
            results.push(result);
            if cut_short {
                timed_out = true;
                break;
            }
        }

        SentenceEvaluation {
            matches: SentenceMatches {
                results,
                candidates_found: windows.len(),
                timed_out,
            },
            engine: self.matcher.engine(),
            latency: self.clock.now().saturating_duration_since(started),
            attempted: true,
        }
    }

    fn evaluate_greedy(
        &self,
        sentence: &ReferenceSentence,
        transcript: &Transcript,
        params: &CandidateParams,
        request: &MatchRequest,
    ) -> SentenceEvaluation {
        let started = self.clock.now();
        let windows = self
            .candidate_finder
            .find_windows(&sentence.tokens, transcript, params);
        let deadline = Deadline::unbounded(self.clock.as_ref());
        let results = windows
            .first()
            .map(|window| {
                self.greedy_matcher
                    .match_window(&sentence.tokens, transcript, window, request, &deadline)
            })
            .into_iter()
            .collect();

        SentenceEvaluation {
            matches: SentenceMatches {
                results,
                candidates_found: windows.len(),
                timed_out: false,
            },
            engine: self.greedy_matcher.engine(),
            latency: self.clock.now().saturating_duration_since(started),
            attempted: true,
        }
    }

    /// Runs `work` for every sentence on scoped workers with static striping.
    /// Results come back in sentence order whatever order workers finish in.
    fn run_parallel<T, F>(
        &self,
        sentences: &[ReferenceSentence],
        work: F,
    ) -> Result<Vec<T>, AlignmentError>
    where
        T: Send,
        F: Fn(usize, &ReferenceSentence) -> T + Sync,
    {
        let workers = self.worker_count(sentences.len());
        if workers <= 1 {
            return Ok(sentences
                .iter()
                .enumerate()
                .map(|(position, sentence)| work(position, sentence))
                .collect());
        }

        let work = &work;
        let joined: Vec<_> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..workers)
                .map(|worker| {
                    scope.spawn(move || {
                        sentences
                            .iter()
                            .enumerate()
                            .skip(worker)
                            .step_by(workers)
                            .map(|(position, sentence)| (position, work(position, sentence)))
                            .collect::<Vec<_>>()
                    })
                })
                .collect();
            handles.into_iter().map(|handle| handle.join()).collect()
        });

        let mut slots: Vec<Option<T>> = std::iter::repeat_with(|| None)
            .take(sentences.len())
            .collect();
        for part in joined {
            let part = part.map_err(|_| {
                AlignmentError::runtime("sentence evaluation", "worker thread panicked")
            })?;
            for (position, value) in part {
                slots[position] = Some(value);
            }
        }
        slots
            .into_iter()
            .enumerate()
            .map(|(position, slot)| {
                slot.ok_or_else(|| {
                    AlignmentError::runtime(
                        "sentence evaluation",
                        format!("sentence #{position} produced no result"),
                    )
                })
            })
            .collect()
    }

    fn worker_count(&self, sentence_count: usize) -> usize {
        let configured = match self.config.worker_threads {
            0 => std::thread::available_parallelism()
                .map(NonZeroUsize::get)
                .unwrap_or(1),
            n => n,
        };
        configured.min(sentence_count).max(1)
    }

    fn resolve_pass(
        &self,
        tier: FallbackTier,
        overcut_retry: bool,
        params: &ResolveParams,
        transcript: &Transcript,
        script: &ReferenceScript,
        evaluations: &[SentenceEvaluation],
    ) -> Result<Pass, AlignmentError> {
        let mut decisions = Vec::with_capacity(script.len());
        let mut sentences = Vec::with_capacity(script.len());
        let mut timed_out_sentences = 0usize;

        for (sentence, evaluation) in script.sentences().iter().zip(evaluations) {
            let decision = if evaluation.attempted {
                resolve_sentence(sentence, &evaluation.matches, params, evaluation.engine)
            } else {
                not_attempted(sentence, params)
            };
            let timed_out = evaluation.matches.timed_out;
            timed_out_sentences += usize::from(timed_out);
            let score = decision.chosen().map(|chosen| chosen.similarity);

            self.record(EngineEvent::SentenceResolved {
                tier,
                sentence_index: sentence.index,
                sentence_id: sentence.id.clone(),
                matched: decision.is_matched(),
                score,
                reason: decision.unmatched_reason(),
                deleted_spans: decision.delete_spans.len(),
                timed_out,
            });
            sentences.push(SentenceDiagnostics {
                sentence_index: sentence.index,
                sentence_id: sentence.id.clone(),
                matched: decision.is_matched(),
                score,
                engine: evaluation.engine,
                timed_out,
                latency_ms: evaluation.latency.as_secs_f64() * 1000.0,
                candidates_found: evaluation.matches.candidates_found,
                windows_evaluated: evaluation.matches.results.len(),
                deleted_spans: decision.delete_spans.len(),
            });
            decisions.push(decision);
        }

        let timeline = assemble_timeline(&decisions, transcript.total_duration())?;
        let verdict = check_overcut(&timeline, self.config.overcut_ceiling);
        Ok(Pass {
            tier,
            overcut_retry,
            decisions,
            sentences,
            timeline,
            verdict,
            timed_out_sentences,
        })
    }

    /// Everything is kept. Decisions of the previous tier are carried over
    /// without their deletions so callers still see what was recognised.
    fn keep_all_pass(
        &self,
        transcript: &Transcript,
        previous: Option<Pass>,
        script: &ReferenceScript,
    ) -> Result<Pass, AlignmentError> {
        self.record(EngineEvent::PassStarted {
            tier: FallbackTier::KeepAll,
            overcut_retry: false,
            sentences: script.len(),
        });
        let (decisions, sentences, timed_out_sentences) = match previous {
            Some(pass) => {
                let decisions = pass
                    .decisions
                    .into_iter()
                    .map(|decision| SentenceDecision {
                        delete_spans: Vec::new(),
                        ..decision
                    })
                    .collect();
                let sentences = pass
                    .sentences
                    .into_iter()
                    .map(|diagnostics| SentenceDiagnostics {
                        deleted_spans: 0,
                        ..diagnostics
                    })
                    .collect();
                (decisions, sentences, pass.timed_out_sentences)
            }
            None => {
                let params = ResolveParams {
                    acceptance_floor: self.config.acceptance_floor,
                    keep_policy: self.config.keep_policy,
                };
                let decisions: Vec<SentenceDecision> = script
                    .sentences()
                    .iter()
                    .map(|sentence| not_attempted(sentence, &params))
                    .collect();
                let sentences = script
                    .sentences()
                    .iter()
                    .map(|sentence| SentenceDiagnostics {
                        sentence_index: sentence.index,
                        sentence_id: sentence.id.clone(),
                        matched: false,
                        score: None,
                        engine: MatchEngine::None,
                        timed_out: false,
                        latency_ms: 0.0,
                        candidates_found: 0,
                        windows_evaluated: 0,
                        deleted_spans: 0,
                    })
                    .collect();
                (decisions, sentences, 0)
            }
        };

        let timeline = Timeline::keep_all(transcript.total_duration());
        timeline.verify()?;
        let verdict = check_overcut(&timeline, self.config.overcut_ceiling);
        Ok(Pass {
            tier: FallbackTier::KeepAll,
            overcut_retry: false,
            decisions,
            sentences,
            timeline,
            verdict,
            timed_out_sentences,
        })
    }

    fn unmatched_examples(
        &self,
        decisions: &[SentenceDecision],
        script: &ReferenceScript,
    ) -> Vec<UnmatchedExample> {
        script
            .sentences()
            .iter()
            .zip(decisions)
            .filter_map(|(sentence, decision)| {
                let reason = decision.unmatched_reason()?;
                Some(UnmatchedExample {
                    sentence_index: sentence.index,
                    sentence_id: sentence.id.clone(),
                    excerpt: excerpt(&sentence.text),
                    reason,
                })
            })
            .take(self.config.max_unmatched_examples)
            .collect()
    }
}

fn not_attempted(sentence: &ReferenceSentence, params: &ResolveParams) -> SentenceDecision {
    SentenceDecision {
        sentence_index: sentence.index,
        sentence_id: sentence.id.clone(),
        resolution: Resolution::Unmatched {
            reason: UnmatchedReason::NotAttempted,
        },
        delete_spans: Vec::new(),
        policy: params.keep_policy,
        engine: MatchEngine::None,
    }
}

fn excerpt(text: &str) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(EXCERPT_MAX_CHARS).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}

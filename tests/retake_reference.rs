use std::env;
use std::sync::Arc;

use libtest_mimic::{Arguments, Failed, Trial};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use retake_aligner::{
    AsrWord, CollectingSink, EngineConfig, EngineOutput, FallbackTier, FrozenClock, KeepPolicy,
    RetakeEngineBuilder, SpanLabel,
};

const DEFAULT_CASES: usize = 24;
const DEFAULT_SEED: u64 = 42;
const SUITE_NAME: &str = "synthetic_retakes_resolve_to_ground_truth";

/// One synthetic narration with known ground truth.
#[derive(Debug, Clone)]
struct SyntheticCase {
    seed: u64,
    sentences: Vec<String>,
    words: Vec<AsrWord>,
    /// Time ranges of takes that must survive.
    kept_takes: Vec<(f64, f64)>,
    /// Time ranges of flawed takes that must be cut.
    cut_takes: Vec<(f64, f64)>,
}

fn main() {
    let args = Arguments::from_args();
    let seed = env_u64("RETAKE_IT_SEED", DEFAULT_SEED);
    let cases = env_u64("RETAKE_IT_CASES", DEFAULT_CASES as u64) as usize;

    let mut rng = StdRng::seed_from_u64(seed);
    let mut tests = Vec::with_capacity(cases * 2);
    for idx in 0..cases {
        let case = generate_case(rng.gen());
        let timeout_case = case.clone();
        tests.push(Trial::test(
            format!("{SUITE_NAME}::case_{idx:03}_seed_{}", case.seed),
            move || run_ground_truth_case(&case).map_err(Failed::from),
        ));
        tests.push(Trial::test(
            format!("timeout_never_increases_matches::case_{idx:03}_seed_{}", timeout_case.seed),
            move || run_timeout_monotonic_case(&timeout_case).map_err(Failed::from),
        ));
    }

    libtest_mimic::run(&args, tests).exit();
}

fn generate_case(seed: u64) -> SyntheticCase {
    let mut rng = StdRng::seed_from_u64(seed);
    let sentence_count = rng.gen_range(3..=8);
    let sentences: Vec<Vec<String>> = (0..sentence_count)
        .map(|s| {
            let len = rng.gen_range(6..=14);
            (0..len).map(|w| format!("w{s}x{w}")).collect()
        })
        .collect();

    let mut words = Vec::new();
    let mut kept_takes = Vec::new();
    let mut cut_takes = Vec::new();
    let mut clock = rng.gen_range(0.0..1.0);
    let mut junk = 0usize;
    for sentence in &sentences {
        if rng.gen_bool(0.4) {
            let flawed_at = rng.gen_range(0..sentence.len());
            let take: Vec<String> = sentence
                .iter()
                .enumerate()
                .map(|(w, word)| {
                    if w == flawed_at {
                        junk += 1;
                        format!("junk{junk}")
                    } else {
                        word.clone()
                    }
                })
                .collect();
            cut_takes.push(speak(&mut rng, &take, &mut clock, &mut words));
        }
        kept_takes.push(speak(&mut rng, sentence, &mut clock, &mut words));
    }

    SyntheticCase {
        seed,
        sentences: sentences.iter().map(|s| s.join(" ")).collect(),
        words,
        kept_takes,
        cut_takes,
    }
}

/// Appends timed words for one take and returns its time range.
fn speak(rng: &mut StdRng, take: &[String], clock: &mut f64, out: &mut Vec<AsrWord>) -> (f64, f64) {
    let start = *clock;
    for text in take {
        let duration = rng.gen_range(0.2..0.6);
        out.push(AsrWord {
            text: text.clone(),
            start: *clock,
            end: *clock + duration,
        });
        *clock += duration + rng.gen_range(0.0..0.1);
    }
    let end = out.last().map(|w| w.end).unwrap_or(start);
    (start, end)
}

fn run_case(case: &SyntheticCase, config: EngineConfig) -> Result<EngineOutput, String> {
    let engine = RetakeEngineBuilder::new(config)
        .with_clock(Box::new(FrozenClock::new()))
        .with_diagnostics_sink(Box::new(Arc::new(CollectingSink::new())))
        .build()
        .map_err(|err| format!("seed {}: build failed: {err}", case.seed))?;
    let sentences: Vec<&str> = case.sentences.iter().map(String::as_str).collect();
    let (transcript, script) = engine
        .prepare(&case.words, &sentences, None)
        .map_err(|err| format!("seed {}: prepare failed: {err}", case.seed))?;
    engine
        .run(&transcript, &script)
        .map_err(|err| format!("seed {}: run failed: {err}", case.seed))
}

fn run_ground_truth_case(case: &SyntheticCase) -> Result<(), String> {
    for policy in [KeepPolicy::Last, KeepPolicy::Best] {
        let config = EngineConfig {
            keep_policy: policy,
            ..EngineConfig::default()
        };
        let output = run_case(case, config)?;
        let diagnostics = &output.diagnostics;
        if diagnostics.fallback_tier != FallbackTier::Normal {
            return Err(format!(
                "seed {} ({}): degraded to {:?} via {:?}",
                case.seed,
                policy.as_str(),
                diagnostics.fallback_tier,
                diagnostics.transitions
            ));
        }
        if diagnostics.matched != case.sentences.len() {
            return Err(format!(
                "seed {} ({}): matched {}/{} sentences, unmatched {:?}",
                case.seed,
                policy.as_str(),
                diagnostics.matched,
                case.sentences.len(),
                diagnostics.unmatched_examples
            ));
        }
        output
            .timeline
            .verify()
            .map_err(|err| format!("seed {}: {err}", case.seed))?;

        for &(start, end) in &case.kept_takes {
            expect_label(case, &output, (start + end) / 2.0, SpanLabel::Keep)?;
        }
        for &(start, end) in &case.cut_takes {
            expect_label(case, &output, (start + end) / 2.0, SpanLabel::Delete)?;
        }

        let expected_cut: f64 = case.cut_takes.iter().map(|(s, e)| e - s).sum();
        if (diagnostics.cut_seconds - expected_cut).abs() > 1e-6 {
            return Err(format!(
                "seed {}: cut {:.3}s, expected {:.3}s",
                case.seed, diagnostics.cut_seconds, expected_cut
            ));
        }
    }
    Ok(())
}

fn run_timeout_monotonic_case(case: &SyntheticCase) -> Result<(), String> {
    let generous = run_case(case, EngineConfig::default())?;
    let tight = run_case(
        case,
        EngineConfig {
            match_timeout: 0.0,
            ..EngineConfig::default()
        },
    )?;

    let (Some(generous_pass), Some(tight_pass)) =
        (generous.diagnostics.passes.first(), tight.diagnostics.passes.first())
    else {
        return Err(format!("seed {}: no pass summaries", case.seed));
    };
    if tight_pass.matched > generous_pass.matched {
        return Err(format!(
            "seed {}: tighter timeout matched more ({} > {})",
            case.seed, tight_pass.matched, generous_pass.matched
        ));
    }
    if tight_pass.timed_out_sentences < generous_pass.timed_out_sentences {
        return Err(format!(
            "seed {}: tighter timeout timed out less ({} < {})",
            case.seed, tight_pass.timed_out_sentences, generous_pass.timed_out_sentences
        ));
    }
    tight
        .timeline
        .verify()
        .map_err(|err| format!("seed {}: {err}", case.seed))
}

fn expect_label(
    case: &SyntheticCase,
    output: &EngineOutput,
    time: f64,
    expected: SpanLabel,
) -> Result<(), String> {
    let actual = output.timeline.label_at(time);
    if actual == Some(expected) {
        return Ok(());
    }
    Err(format!(
        "seed {}: expected {:?} at {:.3}s, found {:?}",
        case.seed, expected, time, actual
    ))
}

fn env_u64(name: &str, default: u64) -> u64 {
    match env::var(name) {
        Ok(value) => value.trim().parse::<u64>().unwrap_or_else(|err| {
            panic!(
                "Invalid value for {}='{}' (expected u64): {}",
                name, value, err
            )
        }),
        Err(_) => default,
    }
}

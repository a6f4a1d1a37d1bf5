use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use clap::{Parser, ValueEnum};
use retake_aligner::{
    build_report, AsrWord, EngineConfig, FallbackPolicy, KeepPolicy, Meta, RetakeEngineBuilder,
};
use tracing_subscriber::EnvFilter;

#[path = "retake_report/json_report_formatter.rs"]
mod json_report_formatter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum KeepChoice {
    Last,
    Best,
}

impl KeepChoice {
    fn policy(self) -> KeepPolicy {
        match self {
            Self::Last => KeepPolicy::Last,
            Self::Best => KeepPolicy::Best,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum FallbackChoice {
    Safe,
    AlignGreedy,
    KeepAll,
}

impl FallbackChoice {
    fn policy(self) -> FallbackPolicy {
        match self {
            Self::Safe => FallbackPolicy::Safe,
            Self::AlignGreedy => FallbackPolicy::AlignGreedy,
            Self::KeepAll => FallbackPolicy::KeepAll,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "retake_report")]
#[command(about = "Resolve retakes in a narration transcript and report the keep/delete timeline")]
struct Args {
    /// JSON array of `{text, start, end}` ASR words.
    #[arg(long, env = "RETAKE_REPORT_TRANSCRIPT")]
    transcript: PathBuf,
    /// Reference script, one sentence per non-empty line.
    #[arg(long, env = "RETAKE_REPORT_REFERENCE")]
    reference: PathBuf,
    #[arg(long, env = "RETAKE_REPORT_CONFIG")]
    config: Option<PathBuf>,
    #[arg(long, env = "RETAKE_REPORT_KEEP_POLICY", value_enum)]
    keep_policy: Option<KeepChoice>,
    #[arg(long, env = "RETAKE_REPORT_FALLBACK_POLICY", value_enum)]
    fallback_policy: Option<FallbackChoice>,
    /// Per-sentence matcher timeout in seconds.
    #[arg(long, env = "RETAKE_REPORT_MATCH_TIMEOUT")]
    match_timeout: Option<f64>,
    /// Recording length in seconds when it exceeds the last word.
    #[arg(long, env = "RETAKE_REPORT_DURATION")]
    duration: Option<f64>,
    #[arg(long, env = "RETAKE_REPORT_OUT")]
    out: Option<PathBuf>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = run() {
        tracing::error!(error = %err, "retake_report failed");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let args = Args::parse();

    let mut config = match args.config.as_ref() {
        Some(path) => EngineConfig::load(path).map_err(|err| err.to_string())?,
        None => EngineConfig::default(),
    };
    if let Some(choice) = args.keep_policy {
        config.keep_policy = choice.policy();
    }
    if let Some(choice) = args.fallback_policy {
        config.fallback_policy = choice.policy();
    }
    if let Some(seconds) = args.match_timeout {
        config.match_timeout = seconds;
    }

    let words = load_words(&args.transcript)?;
    let sentences = load_sentences(&args.reference)?;
    if sentences.is_empty() {
        return Err(format!(
            "Reference script '{}' has no sentences.",
            args.reference.display()
        ));
    }

    let engine = RetakeEngineBuilder::new(config)
        .build()
        .map_err(|err| err.to_string())?;
    let sentence_refs: Vec<&str> = sentences.iter().map(String::as_str).collect();
    let (transcript, script) = engine
        .prepare(&words, &sentence_refs, args.duration)
        .map_err(|err| err.to_string())?;
    tracing::info!(
        words = words.len(),
        tokens = transcript.len(),
        sentences = script.len(),
        "retake_report: inputs loaded"
    );

    let output = engine
        .run(&transcript, &script)
        .map_err(|err| format!("Engine run failed: {err}"))?;

    let resolved = engine.config();
    let meta = Meta {
        generated_at: Utc::now().to_rfc3339(),
        transcript_path: args.transcript.display().to_string(),
        reference_path: args.reference.display().to_string(),
        transcript_tokens: transcript.len(),
        reference_sentences: script.len(),
        keep_policy: resolved.keep_policy,
        fallback_policy: resolved.fallback_policy,
        match_timeout_secs: resolved.match_timeout.as_secs_f64(),
    };
    let report = build_report(meta, output);
    json_report_formatter::write_report(args.out.as_deref(), &report)?;

    if let Some(out) = args.out.as_ref() {
        tracing::info!(
            path = %out.display(),
            tier = report.diagnostics.fallback_tier.as_str(),
            cut_seconds = report.diagnostics.cut_seconds,
            "retake_report: report written"
        );
    }
    Ok(())
}

fn load_words(path: &Path) -> Result<Vec<AsrWord>, String> {
    let data = fs::read_to_string(path)
        .map_err(|err| format!("Failed to read transcript '{}': {err}", path.display()))?;
    serde_json::from_str(&data)
        .map_err(|err| format!("Failed to parse transcript JSON '{}': {err}", path.display()))
}

fn load_sentences(path: &Path) -> Result<Vec<String>, String> {
    let data = fs::read_to_string(path)
        .map_err(|err| format!("Failed to read reference script '{}': {err}", path.display()))?;
    Ok(data
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

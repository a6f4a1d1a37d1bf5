pub mod alignment;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod types;

pub use alignment::report::{build_report, Meta, Report, REPORT_SCHEMA_VERSION};
pub use alignment::tokenization::{build_reference_script, build_transcript, Vocabulary};
pub use config::{EngineConfig, ResolvedConfig};
pub use error::AlignmentError;
pub use pipeline::builder::RetakeEngineBuilder;
pub use pipeline::defaults::{
    AnchorCandidateFinder, BandedMatcher, CaseFoldTokenizer, FrozenClock, NaiveMatcher, NullSink,
    SystemClock, TracingSink,
};
pub use pipeline::events::{CollectingSink, EngineEvent};
pub use pipeline::runtime::RetakeEngine;
pub use pipeline::traits::{
    CandidateFinder, Clock, Deadline, DiagnosticsSink, SentenceMatcher, Tokenizer,
};
pub use types::{
    AsrWord, EngineOutput, FallbackPolicy, FallbackTier, KeepPolicy, MatchEngine, ReferenceScript,
    RunDiagnostics, SentenceDecision, SpanLabel, Timeline, TimelineSpan, Transcript,
    UnmatchedReason,
};

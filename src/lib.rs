pub mod config;
pub mod error;
pub mod metrics;
pub mod pipeline;
pub mod scoring;
pub mod types;

pub use config::CtcDecodingConfig;
pub use error::ScoringError;
pub use metrics::{EvalMetrics, EvalOptions, WordMeasures};
pub use pipeline::builder::CtcRescorerBuilder;
pub use pipeline::defaults::{LogSoftmaxProcessor, LogitsProcessorList};
pub use pipeline::rescorer::CtcRescorer;
pub use pipeline::traits::LogitsProcessor;
pub use scoring::{CtcPrefixScorer, CtcState, PosteriorTensor, PrefixState};
pub use types::{ScoreMatrix, LOG_ZERO};

use std::fs;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};

use ctc_rescore::{
    CtcDecodingConfig, CtcPrefixScorer, EvalMetrics, EvalOptions, PosteriorTensor, LOG_ZERO,
};

#[derive(Debug, Parser)]
#[command(name = "ctc-rescore", about = "CTC prefix scoring and transcript metrics")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Score every next-token candidate of each hypothesis from an empty state.
    Score {
        /// JSON with `log_probs` shaped (batch, time, vocab) and optional `lengths`.
        #[arg(long)]
        posteriors: PathBuf,
        /// JSON list of hypotheses, each starting with the decoder start token.
        #[arg(long)]
        hypotheses: PathBuf,
        /// Decoding config JSON; blank and eos ids are taken from it.
        #[arg(long, env = "CTC_RESCORE_CONFIG")]
        config: Option<PathBuf>,
        /// Eos id used when no config is given.
        #[arg(long, default_value_t = 2)]
        eos_token_id: u32,
    },
    /// WER/CER (and optionally BLEU) between two line-aligned text files.
    Metrics {
        #[arg(long)]
        references: PathBuf,
        #[arg(long)]
        predictions: PathBuf,
        #[arg(long, default_value_t = false)]
        normalize: bool,
        #[arg(long, default_value_t = false)]
        bleu: bool,
    },
}

#[derive(Debug, Deserialize)]
struct PosteriorsFile {
    log_probs: Vec<Vec<Vec<f32>>>,
    #[serde(default)]
    lengths: Option<Vec<usize>>,
}

#[derive(Debug, Serialize)]
struct ScoreOutput {
    blank_id: u32,
    eos_token_id: u32,
    /// `null` marks candidates with zero CTC probability.
    scores: Vec<Vec<Option<f32>>>,
}

fn main() {
    if let Err(err) = run() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let args = Args::parse();
    let json = match args.command {
        Command::Score {
            posteriors,
            hypotheses,
            config,
            eos_token_id,
        } => {
            let config = match config {
                Some(path) => CtcDecodingConfig::load(&path).map_err(|e| e.to_string())?,
                None => CtcDecodingConfig::new(0, eos_token_id),
            };
            let output = score(&posteriors, &hypotheses, &config)?;
            serde_json::to_string_pretty(&output)
        }
        Command::Metrics {
            references,
            predictions,
            normalize,
            bleu,
        } => {
            let references = read_lines(&references)?;
            let predictions = read_lines(&predictions)?;
            let report = EvalMetrics::compute(
                &references,
                &predictions,
                EvalOptions { normalize, bleu },
            )
            .map_err(|e| e.to_string())?;
            serde_json::to_string_pretty(&report)
        }
    }
    .map_err(|e| format!("failed to serialize output: {e}"))?;
    println!("{json}");
    Ok(())
}

fn score(
    posteriors_path: &Path,
    hypotheses_path: &Path,
    config: &CtcDecodingConfig,
) -> Result<ScoreOutput, String> {
    let posteriors: PosteriorsFile = read_json(posteriors_path)?;
    let hypotheses: Vec<Vec<u32>> = read_json(hypotheses_path)?;

    let log_probs = PosteriorTensor::from_nested(posteriors.log_probs).map_err(|e| e.to_string())?;
    config
        .validate(log_probs.vocab())
        .map_err(|e| e.to_string())?;
    config
        .check_hypotheses(&hypotheses)
        .map_err(|e| e.to_string())?;
    let lengths = posteriors
        .lengths
        .unwrap_or_else(|| vec![log_probs.frames(); log_probs.batch()]);
    let scorer = CtcPrefixScorer::new(
        &log_probs,
        &lengths,
        config.blank_id(),
        config.eos_token_id,
        config.ctc_margin,
    )
    .map_err(|e| e.to_string())?;
    let (scores, _) = scorer
        .score(&hypotheses, None, None, None)
        .map_err(|e| e.to_string())?;

    Ok(ScoreOutput {
        blank_id: scorer.blank_id(),
        eos_token_id: scorer.eos_id(),
        scores: scores
            .to_rows()
            .into_iter()
            .map(|row| {
                row.into_iter()
                    .map(|s| (s > LOG_ZERO).then_some(s))
                    .collect()
            })
            .collect(),
    })
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, String> {
    let data = fs::read_to_string(path)
        .map_err(|e| format!("failed to read {}: {e}", path.display()))?;
    serde_json::from_str(&data).map_err(|e| format!("failed to parse {}: {e}", path.display()))
}

fn read_lines(path: &Path) -> Result<Vec<String>, String> {
    let data = fs::read_to_string(path)
        .map_err(|e| format!("failed to read {}: {e}", path.display()))?;
    Ok(data.lines().map(str::to_string).collect())
}

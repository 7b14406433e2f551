use candle_core::{Tensor, D};

use crate::config::CtcDecodingConfig;
use crate::error::ScoringError;
use crate::pipeline::rescorer::CtcRescorer;
use crate::scoring::{CtcPrefixScorer, PosteriorTensor};

enum Posteriors {
    Logits(Tensor),
    LogProbs(PosteriorTensor),
}

/// Assembles a [`CtcRescorer`] from encoder output and a decoding config.
pub struct CtcRescorerBuilder {
    config: CtcDecodingConfig,
    posteriors: Option<Posteriors>,
    lengths: Option<Vec<usize>>,
}

impl CtcRescorerBuilder {
    pub fn new(config: CtcDecodingConfig) -> Self {
        Self {
            config,
            posteriors: None,
            lengths: None,
        }
    }

    /// Raw CTC-head logits `(batch, time, vocab)`; normalized at build time.
    pub fn with_encoder_logits(mut self, logits: Tensor) -> Self {
        self.posteriors = Some(Posteriors::Logits(logits));
        self
    }

    /// Posteriors that are already log-probabilities.
    pub fn with_log_probs(mut self, log_probs: PosteriorTensor) -> Self {
        self.posteriors = Some(Posteriors::LogProbs(log_probs));
        self
    }

    /// Valid frame count per utterance. Defaults to the full time axis.
    pub fn with_lengths(mut self, lengths: Vec<usize>) -> Self {
        self.lengths = Some(lengths);
        self
    }

    pub fn build(self) -> Result<CtcRescorer, ScoringError> {
        let log_probs = match self.posteriors {
            Some(Posteriors::LogProbs(log_probs)) => log_probs,
            Some(Posteriors::Logits(logits)) => {
                let normalized = candle_nn::ops::log_softmax(&logits, D::Minus1)
                    .map_err(|e| ScoringError::runtime("encoder log_softmax", e))?;
                PosteriorTensor::from_tensor(&normalized)?
            }
            None => {
                return Err(ScoringError::invalid_input(
                    "rescorer needs encoder logits or log probabilities",
                ))
            }
        };
        self.config.validate(log_probs.vocab())?;

        let lengths = self
            .lengths
            .unwrap_or_else(|| vec![log_probs.frames(); log_probs.batch()]);
        let scorer = CtcPrefixScorer::new(
            &log_probs,
            &lengths,
            self.config.blank_id(),
            self.config.eos_token_id,
            self.config.ctc_margin,
        )?;

        tracing::info!(
            batch = log_probs.batch(),
            frames = log_probs.frames(),
            vocab = log_probs.vocab(),
            ctc_weight = self.config.ctc_weight,
            ctc_margin = self.config.ctc_margin,
            pre_beam_size = self.config.pre_beam_size,
            "ctc rescorer ready"
        );
        CtcRescorer::from_config(scorer, &self.config)
    }
}

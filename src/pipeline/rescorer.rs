use candle_core::{DType, Tensor};

use crate::config::CtcDecodingConfig;
use crate::error::ScoringError;
use crate::pipeline::traits::LogitsProcessor;
use crate::scoring::{CtcPrefixScorer, CtcState};
use crate::types::{ScoreMatrix, LOG_ZERO};

/// Hybrid CTC/attention rescoring as a logits processor.
///
/// Each step blends the decoder's scores with incremental CTC prefix scores:
/// `(1 - ctc_weight) * model + ctc_weight * ctc`. One instance serves one
/// batch decode; the CTC state it keeps between steps is dropped with it.
pub struct CtcRescorer {
    scorer: CtcPrefixScorer,
    pad_token_id: usize,
    ctc_weight: f32,
    pre_beam_size: usize,
    state: Option<CtcState>,
}

impl CtcRescorer {
    pub fn new(
        scorer: CtcPrefixScorer,
        pad_token_id: u32,
        ctc_weight: f32,
        pre_beam_size: usize,
    ) -> Result<Self, ScoringError> {
        if !(0.0..=1.0).contains(&ctc_weight) {
            return Err(ScoringError::invalid_input(format!(
                "ctc_weight must lie in [0, 1], got {ctc_weight}"
            )));
        }
        if pad_token_id as usize >= scorer.vocab() {
            return Err(ScoringError::invalid_input(format!(
                "pad id {pad_token_id} outside vocabulary of size {}",
                scorer.vocab()
            )));
        }
        Ok(Self {
            scorer,
            pad_token_id: pad_token_id as usize,
            ctc_weight,
            pre_beam_size,
            state: None,
        })
    }

    pub fn from_config(
        scorer: CtcPrefixScorer,
        config: &CtcDecodingConfig,
    ) -> Result<Self, ScoringError> {
        Self::new(
            scorer,
            config.pad_token_id,
            config.ctc_weight,
            config.pre_beam_size,
        )
    }

    pub fn scorer(&self) -> &CtcPrefixScorer {
        &self.scorer
    }

    pub fn ctc_weight(&self) -> f32 {
        self.ctc_weight
    }

    pub fn state(&self) -> Option<&CtcState> {
        self.state.as_ref()
    }

    /// Forget the CTC state, e.g. before decoding the same batch again.
    pub fn reset(&mut self) {
        self.state = None;
    }

    /// Rescore one decoding step.
    ///
    /// `parents[n]`, when given, is the index (within its utterance) of the
    /// previous-step hypothesis that hypothesis `n` extends. Without it the
    /// beams are assumed to stay in place, so hypothesis `n` extends the
    /// previous hypothesis at the same in-utterance position.
    pub fn process_with_parents(
        &mut self,
        input_ids: &[Vec<u32>],
        mut scores: ScoreMatrix,
        parents: Option<&[usize]>,
    ) -> Result<ScoreMatrix, ScoringError> {
        let vocab = self.scorer.vocab();
        let batch = self.scorer.batch();
        let n_bh = input_ids.len();
        if scores.rows() != n_bh || scores.cols() != vocab {
            return Err(ScoringError::shape(
                "ctc rescoring",
                format!(
                    "scores are {}x{}, expected {n_bh}x{vocab}",
                    scores.rows(),
                    scores.cols()
                ),
            ));
        }
        if batch == 0 || n_bh == 0 || n_bh % batch != 0 {
            return Err(ScoringError::shape(
                "ctc rescoring",
                format!("{n_bh} hypotheses cannot be split evenly over a batch of {batch}"),
            ));
        }
        if parents.is_some_and(|p| p.len() != n_bh) {
            return Err(ScoringError::shape(
                "ctc rescoring",
                format!("parent list must name one parent for each of {n_bh} hypotheses"),
            ));
        }
        let beam_width = n_bh / batch;

        scores.fill_column(self.pad_token_id, LOG_ZERO);

        let prefix = match &self.state {
            Some(state) => {
                let prev_width = state.num_hypotheses() / batch;
                let mut best_ids = Vec::with_capacity(batch);
                for b in 0..batch {
                    let mut row = Vec::with_capacity(beam_width);
                    for w in 0..beam_width {
                        let n = b * beam_width + w;
                        let parent = match parents {
                            Some(parents) => parents[n],
                            None => w.min(prev_width.saturating_sub(1)),
                        };
                        if parent >= prev_width {
                            return Err(ScoringError::shape(
                                "ctc rescoring",
                                format!(
                                    "hypothesis {n} names parent {parent}, previous beam had {prev_width}"
                                ),
                            ));
                        }
                        let last = input_ids[n].last().copied().ok_or_else(|| {
                            ScoringError::shape(
                                "ctc rescoring",
                                format!("hypothesis {n} has no tokens"),
                            )
                        })?;
                        row.push(parent * vocab + last as usize);
                    }
                    best_ids.push(row);
                }
                Some(self.scorer.index_select_state(state, &best_ids)?)
            }
            None => None,
        };

        let scoring_ids = (self.pre_beam_size > 0 && self.pre_beam_size < vocab)
            .then(|| top_k_ids(&scores, self.pre_beam_size));
        let (ctc_scores, state) =
            self.scorer
                .score(input_ids, prefix.as_ref(), scoring_ids.as_deref(), None)?;
        self.state = Some(state);

        let weight = self.ctc_weight;
        for n in 0..n_bh {
            let ctc_row = ctc_scores.row(n);
            for (score, &ctc) in scores.row_mut(n).iter_mut().zip(ctc_row) {
                *score = blend(*score, ctc, weight);
            }
        }
        Ok(scores)
    }

    /// Tensor form of [`LogitsProcessor::process`]: `input_ids` is
    /// `(hypotheses, length)`, `scores` is `(hypotheses, vocab)`.
    pub fn process_tensor(
        &mut self,
        input_ids: &Tensor,
        scores: &Tensor,
    ) -> Result<Tensor, ScoringError> {
        let ids = input_ids
            .to_dtype(DType::U32)
            .and_then(|t| t.to_vec2::<u32>())
            .map_err(|e| ScoringError::runtime("input ids to_vec2", e))?;
        let matrix = ScoreMatrix::from_tensor(scores)?;
        let out = self.process(&ids, matrix)?;
        out.to_tensor(scores.device())?
            .to_dtype(scores.dtype())
            .map_err(|e| ScoringError::runtime("rescored tensor dtype", e))
    }
}

impl LogitsProcessor for CtcRescorer {
    fn process(
        &mut self,
        input_ids: &[Vec<u32>],
        scores: ScoreMatrix,
    ) -> Result<ScoreMatrix, ScoringError> {
        self.process_with_parents(input_ids, scores, None)
    }
}

/// Weighted sum that leaves the ignored side out entirely at the endpoints.
#[inline(always)]
fn blend(model: f32, ctc: f32, weight: f32) -> f32 {
    if weight == 0.0 {
        model
    } else if weight == 1.0 {
        ctc
    } else {
        (1.0 - weight) * model + weight * ctc
    }
}

/// Labels of the `k` best scores in every row, best first.
fn top_k_ids(scores: &ScoreMatrix, k: usize) -> Vec<Vec<u32>> {
    (0..scores.rows())
        .map(|n| {
            let row = scores.row(n);
            let mut order: Vec<u32> = (0..row.len() as u32).collect();
            order.sort_by(|&a, &b| row[b as usize].total_cmp(&row[a as usize]));
            order.truncate(k);
            order
        })
        .collect()
}

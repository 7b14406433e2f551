use crate::error::ScoringError;
use crate::pipeline::traits::LogitsProcessor;
use crate::scoring::logmath::log_softmax_in_place;
use crate::types::ScoreMatrix;

/// Turns raw decoder logits into per-row log probabilities.
pub struct LogSoftmaxProcessor;

impl LogitsProcessor for LogSoftmaxProcessor {
    fn process(
        &mut self,
        _input_ids: &[Vec<u32>],
        mut scores: ScoreMatrix,
    ) -> Result<ScoreMatrix, ScoringError> {
        for n in 0..scores.rows() {
            log_softmax_in_place(scores.row_mut(n));
        }
        Ok(scores)
    }
}

/// Runs processors in insertion order, feeding each the previous output.
#[derive(Default)]
pub struct LogitsProcessorList {
    processors: Vec<Box<dyn LogitsProcessor>>,
}

impl LogitsProcessorList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, processor: Box<dyn LogitsProcessor>) {
        self.processors.push(processor);
    }

    pub fn with(mut self, processor: Box<dyn LogitsProcessor>) -> Self {
        self.push(processor);
        self
    }

    pub fn len(&self) -> usize {
        self.processors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }
}

impl LogitsProcessor for LogitsProcessorList {
    fn process(
        &mut self,
        input_ids: &[Vec<u32>],
        scores: ScoreMatrix,
    ) -> Result<ScoreMatrix, ScoringError> {
        self.processors
            .iter_mut()
            .try_fold(scores, |scores, processor| processor.process(input_ids, scores))
    }
}

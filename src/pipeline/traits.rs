use crate::error::ScoringError;
use crate::types::ScoreMatrix;

/// One step of score post-processing inside a generation loop.
///
/// `input_ids` holds the full token history of every active hypothesis
/// (leading start token included); `scores` holds one row of next-token
/// scores per hypothesis in the same order.
pub trait LogitsProcessor: Send {
    fn process(
        &mut self,
        input_ids: &[Vec<u32>],
        scores: ScoreMatrix,
    ) -> Result<ScoreMatrix, ScoringError>;
}

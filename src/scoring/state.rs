use crate::types::{ScoreMatrix, LOG_ZERO};

/// Path type index for alignments whose last frame emitted a label.
pub(crate) const NON_BLANK: usize = 0;
/// Path type index for alignments whose last frame emitted blank.
pub(crate) const BLANK: usize = 1;

/// Log forward probabilities `r[t][path][hyp][slot]`, row-major.
///
/// `slot` is the candidate label (or its compact index when only a subset of
/// the vocabulary is scored). Tables carried between steps have one slot.
#[derive(Debug, Clone, PartialEq)]
pub struct ForwardTable {
    frames: usize,
    hyps: usize,
    slots: usize,
    data: Vec<f32>,
}

impl ForwardTable {
    pub(crate) fn log_zero(frames: usize, hyps: usize, slots: usize) -> Self {
        Self {
            frames,
            hyps,
            slots,
            data: vec![LOG_ZERO; frames * 2 * hyps * slots],
        }
    }

    #[inline(always)]
    fn index(&self, t: usize, path: usize, hyp: usize, slot: usize) -> usize {
        ((t * 2 + path) * self.hyps + hyp) * self.slots + slot
    }

    #[inline(always)]
    pub fn get(&self, t: usize, path: usize, hyp: usize, slot: usize) -> f32 {
        self.data[self.index(t, path, hyp, slot)]
    }

    #[inline(always)]
    pub(crate) fn set(&mut self, t: usize, path: usize, hyp: usize, slot: usize, value: f32) {
        let idx = self.index(t, path, hyp, slot);
        self.data[idx] = value;
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn hyps(&self) -> usize {
        self.hyps
    }

    pub fn slots(&self) -> usize {
        self.slots
    }

    pub(crate) fn as_slice(&self) -> &[f32] {
        &self.data
    }
}

/// Maps `(hypothesis, label)` to the compact slot it was scored in.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoringIdMap {
    vocab: usize,
    slots: usize,
    ids: Vec<i32>,
}

impl ScoringIdMap {
    /// `scoring_ids` holds one row of distinct labels per hypothesis.
    pub(crate) fn build(scoring_ids: &[Vec<u32>], vocab: usize) -> Self {
        let slots = scoring_ids.first().map(Vec::len).unwrap_or(0);
        let mut ids = vec![-1i32; scoring_ids.len() * vocab];
        for (hyp, row) in scoring_ids.iter().enumerate() {
            for (slot, &label) in row.iter().enumerate() {
                ids[hyp * vocab + label as usize] = slot as i32;
            }
        }
        Self { vocab, slots, ids }
    }

    pub fn slot(&self, hyp: usize, label: usize) -> Option<usize> {
        let slot = self.ids[hyp * self.vocab + label];
        (slot >= 0).then_some(slot as usize)
    }

    pub fn slots(&self) -> usize {
        self.slots
    }
}

/// Per-candidate state produced by one scoring step.
///
/// Holds the forward table for every `(hypothesis, candidate)` pair, so the
/// next step has to pick the surviving pairs with
/// [`CtcPrefixScorer::index_select_state`](super::CtcPrefixScorer::index_select_state)
/// before it can score again.
#[derive(Debug, Clone, PartialEq)]
pub struct CtcState {
    pub(crate) forward: ForwardTable,
    pub(crate) prefix_scores: ScoreMatrix,
    pub(crate) window_min: usize,
    pub(crate) window_max: usize,
    pub(crate) scoring_id_map: Option<ScoringIdMap>,
}

impl CtcState {
    pub fn forward(&self) -> &ForwardTable {
        &self.forward
    }

    /// Log prefix probability of each `hypothesis + label` extension.
    pub fn prefix_scores(&self) -> &ScoreMatrix {
        &self.prefix_scores
    }

    pub fn window(&self) -> (usize, usize) {
        (self.window_min, self.window_max)
    }

    pub fn scoring_id_map(&self) -> Option<&ScoringIdMap> {
        self.scoring_id_map.as_ref()
    }

    pub fn num_hypotheses(&self) -> usize {
        self.forward.hyps
    }
}

/// State of the hypotheses that survived beam pruning, ready to be scored.
#[derive(Debug, Clone, PartialEq)]
pub struct PrefixState {
    pub(crate) forward: ForwardTable,
    pub(crate) prefix_scores: Vec<f32>,
    pub(crate) window_min: usize,
    pub(crate) window_max: usize,
}

impl PrefixState {
    pub fn forward(&self) -> &ForwardTable {
        &self.forward
    }

    /// Log prefix probability of each hypothesis.
    pub fn prefix_scores(&self) -> &[f32] {
        &self.prefix_scores
    }

    pub fn window(&self) -> (usize, usize) {
        (self.window_min, self.window_max)
    }

    pub fn num_hypotheses(&self) -> usize {
        self.forward.hyps
    }

    pub fn frames(&self) -> usize {
        self.forward.frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_table_indexing_is_dense() {
        let mut table = ForwardTable::log_zero(3, 2, 4);
        table.set(2, BLANK, 1, 3, -0.5);
        table.set(0, NON_BLANK, 0, 0, -1.5);
        assert_eq!(table.get(2, BLANK, 1, 3), -0.5);
        assert_eq!(table.get(0, NON_BLANK, 0, 0), -1.5);
        assert_eq!(*table.as_slice().last().unwrap(), -0.5);
        assert_eq!(table.as_slice()[0], -1.5);
        assert_eq!(table.get(1, BLANK, 1, 3), LOG_ZERO);
    }

    #[test]
    fn scoring_id_map_marks_unscored_labels() {
        let map = ScoringIdMap::build(&[vec![4, 1], vec![0, 2]], 5);
        assert_eq!(map.slots(), 2);
        assert_eq!(map.slot(0, 4), Some(0));
        assert_eq!(map.slot(0, 1), Some(1));
        assert_eq!(map.slot(0, 2), None);
        assert_eq!(map.slot(1, 2), Some(1));
        assert_eq!(map.slot(1, 4), None);
    }
}

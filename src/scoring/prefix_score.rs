use super::logmath::{log_add, log_sum_exp_axis, LogAccumulator};
use super::posteriors::{FramePosteriors, PosteriorTensor};
use super::state::{CtcState, ForwardTable, PrefixState, ScoringIdMap, BLANK, NON_BLANK};
use super::window::{self, ScoringWindow};
use crate::error::ScoringError;
use crate::types::{ScoreMatrix, LOG_ZERO};

/// Vectorized CTC prefix scorer for a batch of utterances.
///
/// Computes, for every active hypothesis `h` and every candidate label `c`,
/// the log probability that the CTC alignment lattice produces an output
/// starting with `h + c` (Watanabe et al., hybrid CTC/attention; Seki et al.,
/// vectorized beam search). Hypotheses are laid out utterance-major: the
/// `W` hypotheses of utterance `b` occupy rows `b * W .. (b + 1) * W`.
///
/// The scorer holds only the posteriors. The DP state lives in the
/// [`CtcState`] / [`PrefixState`] values threaded through by the caller, and a
/// state must not be fed to two scoring calls at once.
#[derive(Debug, Clone)]
pub struct CtcPrefixScorer {
    posteriors: FramePosteriors,
    blank: usize,
    eos: usize,
    margin: usize,
    end_frames: Vec<usize>,
}

/// Candidate labels of one hypothesis row: the whole vocabulary or a subset.
enum Candidates<'a> {
    Dense(usize),
    Sparse(&'a [Vec<u32>]),
}

impl Candidates<'_> {
    fn slots(&self) -> usize {
        match self {
            Candidates::Dense(vocab) => *vocab,
            Candidates::Sparse(ids) => ids.first().map(Vec::len).unwrap_or(0),
        }
    }

    #[inline(always)]
    fn label(&self, hyp: usize, slot: usize) -> usize {
        match self {
            Candidates::Dense(_) => slot,
            Candidates::Sparse(ids) => ids[hyp][slot] as usize,
        }
    }
}

impl CtcPrefixScorer {
    /// `lengths[b]` is the number of valid frames of utterance `b`; frames
    /// past it are overwritten so that only blank can be emitted there.
    /// `margin > 0` enables attention-guided windowing.
    pub fn new(
        posteriors: &PosteriorTensor,
        lengths: &[usize],
        blank: u32,
        eos: u32,
        margin: usize,
    ) -> Result<Self, ScoringError> {
        let (batch, frames, vocab) = (posteriors.batch(), posteriors.frames(), posteriors.vocab());
        if lengths.len() != batch {
            return Err(ScoringError::shape(
                "prefix scorer construction",
                format!("{} lengths for a batch of {batch}", lengths.len()),
            ));
        }
        if let Some((b, &len)) = lengths.iter().enumerate().find(|(_, &len)| len > frames) {
            return Err(ScoringError::shape(
                "prefix scorer construction",
                format!("utterance {b} claims {len} frames but the posteriors hold {frames}"),
            ));
        }
        for (name, id) in [("blank", blank), ("eos", eos)] {
            if id as usize >= vocab {
                return Err(ScoringError::invalid_input(format!(
                    "{name} id {id} outside vocabulary of size {vocab}"
                )));
            }
        }

        let mut frame_posteriors = FramePosteriors::new(posteriors, blank as usize);
        for (b, &len) in lengths.iter().enumerate() {
            if len < frames {
                frame_posteriors.pad_from(b, len);
            }
        }

        Ok(Self {
            posteriors: frame_posteriors,
            blank: blank as usize,
            eos: eos as usize,
            margin,
            end_frames: lengths.iter().map(|&len| len.saturating_sub(1)).collect(),
        })
    }

    pub fn batch(&self) -> usize {
        self.posteriors.batch()
    }

    pub fn frames(&self) -> usize {
        self.posteriors.frames()
    }

    pub fn vocab(&self) -> usize {
        self.posteriors.vocab()
    }

    pub fn blank_id(&self) -> u32 {
        self.blank as u32
    }

    pub fn eos_id(&self) -> u32 {
        self.eos as u32
    }

    /// Score every candidate extension of `hypotheses`.
    ///
    /// Each hypothesis starts with a start-of-sequence token that is not
    /// counted as output. `state` is `None` on the first step of an
    /// utterance batch and the selected state of the previous step otherwise.
    /// `scoring_ids` restricts scoring to a per-hypothesis label subset (all
    /// rows the same width); `attention` gives one row of attention weights
    /// over the frames per hypothesis and is only used when the scorer was
    /// built with a non-zero margin.
    ///
    /// Returns a `(hypotheses, vocab)` matrix of incremental log scores
    /// `log psi(h + c) - log psi(h)` and the per-candidate state.
    pub fn score(
        &self,
        hypotheses: &[Vec<u32>],
        state: Option<&PrefixState>,
        scoring_ids: Option<&[Vec<u32>]>,
        attention: Option<&[Vec<f32>]>,
    ) -> Result<(ScoreMatrix, CtcState), ScoringError> {
        let frames = self.frames();
        let vocab = self.vocab();
        let n_bh = hypotheses.len();
        let n_hyps = self.hypotheses_per_utterance(n_bh, "prefix scoring")?;

        let mut last_ids = Vec::with_capacity(n_bh);
        for (idx, hyp) in hypotheses.iter().enumerate() {
            match hyp.last() {
                Some(&id) => last_ids.push(id as usize),
                None => {
                    return Err(ScoringError::shape(
                        "prefix scoring",
                        format!("hypothesis {idx} is empty; expected a leading start token"),
                    ))
                }
            }
        }
        let output_length = hypotheses[0].len() - 1;

        let candidates = match scoring_ids {
            Some(ids) if ids.first().is_some_and(|row| !row.is_empty()) => {
                self.check_scoring_ids(ids, n_bh)?;
                Candidates::Sparse(ids)
            }
            _ => Candidates::Dense(vocab),
        };
        let snum = candidates.slots();

        let initial;
        let prior = match state {
            Some(prior) => {
                if prior.num_hypotheses() != n_bh || prior.frames() != frames {
                    return Err(ScoringError::shape(
                        "prefix scoring",
                        format!(
                            "state covers {} hypotheses over {} frames, call has {n_bh} over {frames}",
                            prior.num_hypotheses(),
                            prior.frames()
                        ),
                    ));
                }
                prior
            }
            None => {
                initial = self.initial_state(n_bh, n_hyps);
                &initial
            }
        };

        // r_sum[t][h]: total forward mass of the prefix itself at frame t.
        let r_sum = log_sum_exp_axis(prior.forward.as_slice(), frames, 2, n_bh);

        // A candidate equal to the last label can only follow a blank.
        let mut log_phi = vec![LOG_ZERO; frames * n_bh * snum];
        for t in 0..frames {
            for n in 0..n_bh {
                let base = (t * n_bh + n) * snum;
                let summed = r_sum[t * n_bh + n];
                let blank_only = prior.forward.get(t, BLANK, n, 0);
                for s in 0..snum {
                    log_phi[base + s] = if candidates.label(n, s) == last_ids[n] {
                        blank_only
                    } else {
                        summed
                    };
                }
            }
        }

        let mut r = ForwardTable::log_zero(frames, n_bh, snum);
        if output_length == 0 && frames > 0 {
            for n in 0..n_bh {
                let b = n / n_hyps;
                for s in 0..snum {
                    r.set(0, NON_BLANK, n, s, self.posteriors.emit(0, b, candidates.label(n, s)));
                }
            }
        }

        let centers = match attention {
            Some(weights) if self.margin > 0 => {
                self.check_attention(weights, n_bh)?;
                Some(window::attention_centers(weights))
            }
            _ => None,
        };
        let window = window::resolve(
            output_length,
            frames,
            self.margin,
            prior.window_min,
            prior.window_max,
            centers.as_deref(),
        );
        let ScoringWindow {
            start,
            end,
            min: window_min,
            max: window_max,
        } = window;
        let scoring_id_map = match &candidates {
            Candidates::Sparse(ids) => Some(ScoringIdMap::build(ids, vocab)),
            Candidates::Dense(_) => None,
        };

        if window.is_empty() || frames == 0 {
            tracing::warn!(
                start,
                end,
                output_length,
                "ctc prefix scoring: empty frame window, returning log-zero scores"
            );
            return Ok((
                ScoreMatrix::filled(n_bh, vocab, LOG_ZERO),
                CtcState {
                    forward: r,
                    prefix_scores: ScoreMatrix::filled(n_bh, vocab, LOG_ZERO),
                    window_min,
                    window_max,
                    scoring_id_map,
                },
            ));
        }
        let start = start.max(1);
        tracing::debug!(
            start,
            end,
            hypotheses = n_bh,
            candidates = snum,
            output_length,
            "ctc prefix scoring window"
        );

        for t in start..end {
            for n in 0..n_bh {
                let b = n / n_hyps;
                let blank_emit = self.posteriors.blank(t, b);
                for s in 0..snum {
                    let prev_nb = r.get(t - 1, NON_BLANK, n, s);
                    let prev_b = r.get(t - 1, BLANK, n, s);
                    let phi = log_phi[((t - 1) * n_bh + n) * snum + s];
                    let emit = self.posteriors.emit(t, b, candidates.label(n, s));
                    r.set(t, NON_BLANK, n, s, log_add(prev_nb, phi) + emit);
                    r.set(t, BLANK, n, s, log_add(prev_nb, prev_b) + blank_emit);
                }
            }
        }

        let mut log_psi = ScoreMatrix::filled(n_bh, vocab, LOG_ZERO);
        for n in 0..n_bh {
            let b = n / n_hyps;
            for s in 0..snum {
                let label = candidates.label(n, s);
                let mut acc = LogAccumulator::new();
                for t in start..end {
                    let phi = log_phi[((t - 1) * n_bh + n) * snum + s];
                    acc.push(phi + self.posteriors.emit(t, b, label));
                }
                acc.push(r.get(start - 1, NON_BLANK, n, s));
                log_psi.set(n, label, acc.finish());
            }
        }

        for n in 0..n_bh {
            let end_frame = self.end_frames[n / n_hyps];
            let ended = r_sum[end_frame * n_bh + n];
            if ended > log_psi.get(n, self.eos) {
                log_psi.set(n, self.eos, ended);
            }
        }
        log_psi.fill_column(self.blank, LOG_ZERO);

        let mut scores = log_psi.clone();
        for n in 0..n_bh {
            let prev = prior.prefix_scores[n];
            for score in scores.row_mut(n) {
                *score -= prev;
                if *score == 0.0 {
                    *score = LOG_ZERO;
                }
            }
        }

        Ok((
            scores,
            CtcState {
                forward: r,
                prefix_scores: log_psi,
                window_min,
                window_max,
                scoring_id_map,
            },
        ))
    }

    /// Keep the `(hypothesis, label)` pairs chosen by beam pruning.
    ///
    /// `best_ids[b]` lists the selections for utterance `b` as flat indices
    /// `hyp_in_utterance * vocab + label` over that utterance's previous
    /// hypotheses. The beam width may change between steps, but every
    /// utterance must keep the same number of hypotheses.
    pub fn index_select_state(
        &self,
        state: &CtcState,
        best_ids: &[Vec<usize>],
    ) -> Result<PrefixState, ScoringError> {
        let vocab = self.vocab();
        let n_bh = state.num_hypotheses();
        let n_hyps = self.hypotheses_per_utterance(n_bh, "beam state selection")?;
        if best_ids.len() != self.batch() {
            return Err(ScoringError::shape(
                "beam state selection",
                format!(
                    "{} selection rows for a batch of {}",
                    best_ids.len(),
                    self.batch()
                ),
            ));
        }
        let width = best_ids[0].len();
        if width == 0 || best_ids.iter().any(|row| row.len() != width) {
            return Err(ScoringError::shape(
                "beam state selection",
                "every utterance must select the same non-zero number of hypotheses",
            ));
        }

        let mut sources = Vec::with_capacity(self.batch() * width);
        for (b, row) in best_ids.iter().enumerate() {
            for &id in row {
                if id >= n_hyps * vocab {
                    return Err(ScoringError::shape(
                        "beam state selection",
                        format!("selection {id} outside {n_hyps} hypotheses x {vocab} labels"),
                    ));
                }
                let hyp = b * n_hyps + id / vocab;
                let label = id % vocab;
                let slot = match &state.scoring_id_map {
                    Some(map) => map.slot(hyp, label).unwrap_or(0),
                    None => label,
                };
                sources.push((hyp, label, slot));
            }
        }

        let frames = state.forward.frames();
        let mut forward = ForwardTable::log_zero(frames, sources.len(), 1);
        for t in 0..frames {
            for path in [NON_BLANK, BLANK] {
                for (n, &(hyp, _, slot)) in sources.iter().enumerate() {
                    forward.set(t, path, n, 0, state.forward.get(t, path, hyp, slot));
                }
            }
        }
        let prefix_scores = sources
            .iter()
            .map(|&(hyp, label, _)| state.prefix_scores.get(hyp, label))
            .collect();

        tracing::debug!(
            previous = n_bh,
            selected = sources.len(),
            "ctc prefix state re-indexed after beam pruning"
        );
        Ok(PrefixState {
            forward,
            prefix_scores,
            window_min: state.window_min,
            window_max: state.window_max,
        })
    }

    /// Take in newly available frames for streaming use.
    ///
    /// `posteriors` holds every frame seen so far; frames already held are
    /// kept and only the tail is copied. Every utterance is then treated as
    /// ending at the last frame. No-op when nothing new arrived.
    pub fn extend_prob(&mut self, posteriors: &PosteriorTensor) -> Result<(), ScoringError> {
        if posteriors.batch() != self.batch() || posteriors.vocab() != self.vocab() {
            return Err(ScoringError::shape(
                "posterior extension",
                format!(
                    "got ({}, _, {}), scorer holds ({}, _, {})",
                    posteriors.batch(),
                    posteriors.vocab(),
                    self.batch(),
                    self.vocab()
                ),
            ));
        }
        if posteriors.frames() <= self.frames() {
            return Ok(());
        }
        let previous = self.frames();
        self.posteriors.extend(posteriors);
        let last = self.frames() - 1;
        self.end_frames.iter_mut().for_each(|f| *f = last);
        tracing::debug!(previous, frames = self.frames(), "ctc posteriors extended");
        Ok(())
    }

    /// Grow a selected state to cover frames added by [`Self::extend_prob`].
    ///
    /// New frames can only continue the prefix through blank:
    /// `r_b[t] = logsumexp(r_n[t-1], r_b[t-1]) + blank[t]`, `r_n[t] = log 0`.
    pub fn extend_state(
        &self,
        state: Option<PrefixState>,
    ) -> Result<Option<PrefixState>, ScoringError> {
        let Some(state) = state else {
            return Ok(None);
        };
        let frames = self.frames();
        let old_frames = state.frames();
        if old_frames >= frames {
            return Ok(Some(state));
        }
        let n_bh = state.num_hypotheses();
        let n_hyps = self.hypotheses_per_utterance(n_bh, "prefix state extension")?;

        let mut forward = ForwardTable::log_zero(frames, n_bh, 1);
        for t in 0..old_frames {
            for path in [NON_BLANK, BLANK] {
                for n in 0..n_bh {
                    forward.set(t, path, n, 0, state.forward.get(t, path, n, 0));
                }
            }
        }
        for t in old_frames..frames {
            for n in 0..n_bh {
                let blank_emit = self.posteriors.blank(t, n / n_hyps);
                let value = if t == 0 {
                    blank_emit
                } else {
                    log_add(
                        forward.get(t - 1, NON_BLANK, n, 0),
                        forward.get(t - 1, BLANK, n, 0),
                    ) + blank_emit
                };
                forward.set(t, BLANK, n, 0, value);
            }
        }

        tracing::debug!(old_frames, frames, "ctc prefix state extended");
        Ok(Some(PrefixState { forward, ..state }))
    }

    /// State of the empty prefix: blank emitted on every frame so far.
    fn initial_state(&self, n_bh: usize, n_hyps: usize) -> PrefixState {
        let frames = self.frames();
        let mut forward = ForwardTable::log_zero(frames, n_bh, 1);
        for n in 0..n_bh {
            let b = n / n_hyps;
            let mut cumulative = 0.0f32;
            for t in 0..frames {
                cumulative += self.posteriors.blank(t, b);
                forward.set(t, BLANK, n, 0, cumulative);
            }
        }
        PrefixState {
            forward,
            prefix_scores: vec![0.0; n_bh],
            window_min: 0,
            window_max: 1,
        }
    }

    fn hypotheses_per_utterance(
        &self,
        n_bh: usize,
        context: &'static str,
    ) -> Result<usize, ScoringError> {
        let batch = self.batch();
        if n_bh == 0 || batch == 0 || n_bh % batch != 0 {
            return Err(ScoringError::shape(
                context,
                format!("{n_bh} hypotheses cannot be split evenly over a batch of {batch}"),
            ));
        }
        Ok(n_bh / batch)
    }

    fn check_scoring_ids(&self, ids: &[Vec<u32>], n_bh: usize) -> Result<(), ScoringError> {
        if ids.len() != n_bh {
            return Err(ScoringError::shape(
                "prefix scoring",
                format!("{} scoring-id rows for {n_bh} hypotheses", ids.len()),
            ));
        }
        let width = ids[0].len();
        for (n, row) in ids.iter().enumerate() {
            if row.len() != width {
                return Err(ScoringError::shape(
                    "prefix scoring",
                    format!("scoring-id row {n} has {} ids, expected {width}", row.len()),
                ));
            }
            if let Some(&id) = row.iter().find(|&&id| id as usize >= self.vocab()) {
                return Err(ScoringError::shape(
                    "prefix scoring",
                    format!("scoring id {id} outside vocabulary of size {}", self.vocab()),
                ));
            }
        }
        Ok(())
    }

    fn check_attention(&self, weights: &[Vec<f32>], n_bh: usize) -> Result<(), ScoringError> {
        if weights.len() != n_bh || weights.iter().any(|row| row.len() != self.frames()) {
            return Err(ScoringError::shape(
                "prefix scoring",
                format!(
                    "attention weights must be {n_bh} rows of {} frames",
                    self.frames()
                ),
            ));
        }
        Ok(())
    }
}

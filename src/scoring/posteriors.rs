use candle_core::{DType, Tensor};

use crate::error::ScoringError;
use crate::types::LOG_ZERO;

/// Encoder label posteriors in log space, laid out `(batch, time, vocab)`.
#[derive(Debug, Clone, PartialEq)]
pub struct PosteriorTensor {
    batch: usize,
    frames: usize,
    vocab: usize,
    data: Vec<f32>,
}

impl PosteriorTensor {
    pub fn from_flat(
        batch: usize,
        frames: usize,
        vocab: usize,
        data: Vec<f32>,
    ) -> Result<Self, ScoringError> {
        if data.len() != batch * frames * vocab {
            return Err(ScoringError::shape(
                "posterior tensor",
                format!(
                    "{} values cannot form a ({batch}, {frames}, {vocab}) tensor",
                    data.len()
                ),
            ));
        }
        Ok(Self {
            batch,
            frames,
            vocab,
            data,
        })
    }

    /// Build from `[utterance][frame][label]` rows; every utterance must have
    /// the same number of frames and every frame the same width.
    pub fn from_nested(rows: Vec<Vec<Vec<f32>>>) -> Result<Self, ScoringError> {
        let batch = rows.len();
        let frames = rows.first().map(Vec::len).unwrap_or(0);
        let vocab = rows
            .first()
            .and_then(|u| u.first())
            .map(Vec::len)
            .unwrap_or(0);
        let mut data = Vec::with_capacity(batch * frames * vocab);
        for (b, utterance) in rows.into_iter().enumerate() {
            if utterance.len() != frames {
                return Err(ScoringError::shape(
                    "posterior tensor",
                    format!(
                        "utterance {b} has {} frames, expected {frames}",
                        utterance.len()
                    ),
                ));
            }
            for (t, frame) in utterance.into_iter().enumerate() {
                if frame.len() != vocab {
                    return Err(ScoringError::shape(
                        "posterior tensor",
                        format!(
                            "utterance {b} frame {t} has {} labels, expected {vocab}",
                            frame.len()
                        ),
                    ));
                }
                data.extend(frame);
            }
        }
        Self::from_flat(batch, frames, vocab, data)
    }

    pub fn from_tensor(tensor: &Tensor) -> Result<Self, ScoringError> {
        let (batch, frames, vocab) = tensor
            .dims3()
            .map_err(|e| ScoringError::runtime("posterior tensor dims3", e))?;
        let data = tensor
            .to_dtype(DType::F32)
            .and_then(|t| t.flatten_all())
            .and_then(|t| t.to_vec1::<f32>())
            .map_err(|e| ScoringError::runtime("posterior tensor to_vec1", e))?;
        Self::from_flat(batch, frames, vocab, data)
    }

    pub fn batch(&self) -> usize {
        self.batch
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn vocab(&self) -> usize {
        self.vocab
    }

    pub fn get(&self, b: usize, t: usize, label: usize) -> f32 {
        self.data[(b * self.frames + t) * self.vocab + label]
    }
}

/// Time-major copy of the posteriors owned by the scorer, `(time, batch, vocab)`.
///
/// Frames past an utterance's true length are rewritten so that only blank
/// is possible there.
#[derive(Debug, Clone)]
pub(crate) struct FramePosteriors {
    frames: usize,
    batch: usize,
    vocab: usize,
    blank: usize,
    data: Vec<f32>,
}

impl FramePosteriors {
    pub(crate) fn new(source: &PosteriorTensor, blank: usize) -> Self {
        let mut out = Self {
            frames: source.frames,
            batch: source.batch,
            vocab: source.vocab,
            blank,
            data: vec![LOG_ZERO; source.frames * source.batch * source.vocab],
        };
        out.copy_frames(source, 0);
        out
    }

    fn copy_frames(&mut self, source: &PosteriorTensor, from_frame: usize) {
        for t in from_frame..self.frames {
            for b in 0..self.batch {
                let src = (b * source.frames + t) * source.vocab;
                let dst = self.offset(t, b);
                self.data[dst..dst + self.vocab]
                    .copy_from_slice(&source.data[src..src + self.vocab]);
            }
        }
    }

    /// Overwrite frames `length..` of utterance `b` with the padding pattern.
    pub(crate) fn pad_from(&mut self, b: usize, length: usize) {
        for t in length..self.frames {
            let offset = self.offset(t, b);
            let row = &mut self.data[offset..offset + self.vocab];
            row.fill(LOG_ZERO);
            row[self.blank] = 0.0;
        }
    }

    /// Grow to `source.frames()` frames, keeping the frames already held.
    pub(crate) fn extend(&mut self, source: &PosteriorTensor) {
        let old_frames = self.frames;
        let mut data = vec![LOG_ZERO; source.frames * self.batch * self.vocab];
        data[..self.data.len()].copy_from_slice(&self.data);
        self.data = data;
        self.frames = source.frames;
        self.copy_frames(source, old_frames);
    }

    #[inline(always)]
    fn offset(&self, t: usize, b: usize) -> usize {
        (t * self.batch + b) * self.vocab
    }

    #[inline(always)]
    pub(crate) fn emit(&self, t: usize, b: usize, label: usize) -> f32 {
        self.data[self.offset(t, b) + label]
    }

    #[inline(always)]
    pub(crate) fn blank(&self, t: usize, b: usize) -> f32 {
        self.data[self.offset(t, b) + self.blank]
    }

    pub(crate) fn frames(&self) -> usize {
        self.frames
    }

    pub(crate) fn batch(&self) -> usize {
        self.batch
    }

    pub(crate) fn vocab(&self) -> usize {
        self.vocab
    }
}

#[cfg(test)]
mod tests {
    use candle_core::Device;

    use super::*;

    fn sample() -> PosteriorTensor {
        // (2, 3, 2)
        PosteriorTensor::from_nested(vec![
            vec![vec![-0.1, -2.0], vec![-0.2, -1.5], vec![-0.3, -1.2]],
            vec![vec![-0.4, -1.0], vec![-0.5, -0.9], vec![-0.6, -0.8]],
        ])
        .unwrap()
    }

    #[test]
    fn nested_rows_validate_shape() {
        let err = PosteriorTensor::from_nested(vec![vec![vec![0.0, 0.0]], vec![]]).unwrap_err();
        assert!(matches!(err, ScoringError::ShapeMismatch { .. }));
        let err =
            PosteriorTensor::from_nested(vec![vec![vec![0.0, 0.0], vec![0.0]]]).unwrap_err();
        assert!(matches!(err, ScoringError::ShapeMismatch { .. }));
    }

    #[test]
    fn frame_major_layout_matches_source() {
        let source = sample();
        let frames = FramePosteriors::new(&source, 0);
        for b in 0..2 {
            for t in 0..3 {
                for o in 0..2 {
                    assert_eq!(frames.emit(t, b, o), source.get(b, t, o));
                }
                assert_eq!(frames.blank(t, b), source.get(b, t, 0));
            }
        }
    }

    #[test]
    fn padding_makes_blank_certain() {
        let mut frames = FramePosteriors::new(&sample(), 0);
        frames.pad_from(0, 1);
        assert_eq!(frames.emit(0, 0, 1), -2.0);
        assert_eq!(frames.blank(1, 0), 0.0);
        assert_eq!(frames.emit(1, 0, 1), LOG_ZERO);
        assert_eq!(frames.emit(2, 0, 1), LOG_ZERO);
        assert_eq!(frames.emit(2, 1, 1), -0.8);
    }

    #[test]
    fn extend_keeps_existing_frames() {
        let mut frames = FramePosteriors::new(&sample(), 0);
        frames.pad_from(0, 2);
        let longer = PosteriorTensor::from_nested(vec![
            vec![vec![9.0, 9.0]; 5],
            vec![vec![7.0, 7.0]; 5],
        ])
        .unwrap();
        frames.extend(&longer);
        assert_eq!(frames.frames(), 5);
        assert_eq!(frames.emit(2, 0, 1), LOG_ZERO);
        assert_eq!(frames.emit(1, 1, 1), -0.9);
        assert_eq!(frames.emit(3, 0, 1), 9.0);
        assert_eq!(frames.emit(4, 1, 0), 7.0);
    }

    #[test]
    fn from_tensor_reads_three_dims() {
        let t = Tensor::from_vec(vec![0.0f32, -1.0, -2.0, -3.0], (1, 2, 2), &Device::Cpu).unwrap();
        let p = PosteriorTensor::from_tensor(&t).unwrap();
        assert_eq!((p.batch(), p.frames(), p.vocab()), (1, 2, 2));
        assert_eq!(p.get(0, 1, 0), -2.0);
    }
}

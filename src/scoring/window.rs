/// Frame range `[start, end)` scored in one step, plus the attention span
/// `(min, max)` carried forward to the next step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ScoringWindow {
    pub start: usize,
    pub end: usize,
    pub min: usize,
    pub max: usize,
}

impl ScoringWindow {
    pub(crate) fn is_empty(&self) -> bool {
        self.start > self.end
    }
}

/// Attention-weighted frame position of each hypothesis.
pub(crate) fn attention_centers(weights: &[Vec<f32>]) -> Vec<f32> {
    weights
        .iter()
        .map(|row| {
            row.iter()
                .enumerate()
                .map(|(t, &w)| w * t as f32)
                .sum::<f32>()
        })
        .collect()
}

/// Decide which frames to score.
///
/// Without attention centers (or with `margin == 0`) every frame from
/// `max(output_length, 1)` to the end is scored. With them, the window is
/// `[f_min - margin, f_max + margin]` around the attention span, where the
/// span never moves backwards and the start never passes the previous
/// step's `f_max`.
pub(crate) fn resolve(
    output_length: usize,
    frames: usize,
    margin: usize,
    prev_min: usize,
    prev_max: usize,
    centers: Option<&[f32]>,
) -> ScoringWindow {
    match centers {
        Some(centers) if margin > 0 && !centers.is_empty() => {
            let lowest = centers.iter().copied().fold(f32::INFINITY, f32::min);
            let highest = centers.iter().copied().fold(f32::NEG_INFINITY, f32::max);
            let min = (lowest.max(0.0) as usize).max(prev_min);
            let max = (highest.max(0.0) as usize).max(prev_max);
            let start = prev_max.min(min.saturating_sub(margin).max(output_length).max(1));
            let end = max.saturating_add(margin).min(frames);
            ScoringWindow {
                start,
                end,
                min,
                max,
            }
        }
        _ => ScoringWindow {
            start: output_length.max(1),
            end: frames,
            min: 0,
            max: 0,
        },
    }
}

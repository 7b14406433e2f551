use candle_core::{DType, Device, Tensor};

use crate::error::ScoringError;

/// Log-domain stand-in for probability zero.
///
/// A finite sentinel keeps sums of impossible terms finite, so differences
/// such as `psi - s_prev` never produce NaN.
pub const LOG_ZERO: f32 = -1.0e10;

/// Row-major `(rows, cols)` matrix of log scores, one row per hypothesis.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreMatrix {
    rows: usize,
    cols: usize,
    data: Vec<f32>,
}

impl ScoreMatrix {
    pub fn filled(rows: usize, cols: usize, value: f32) -> Self {
        Self {
            rows,
            cols,
            data: vec![value; rows * cols],
        }
    }

    pub fn from_flat(rows: usize, cols: usize, data: Vec<f32>) -> Result<Self, ScoringError> {
        if data.len() != rows * cols {
            return Err(ScoringError::shape(
                "score matrix",
                format!("{} values cannot form a {rows}x{cols} matrix", data.len()),
            ));
        }
        Ok(Self { rows, cols, data })
    }

    pub fn from_rows(rows: Vec<Vec<f32>>) -> Result<Self, ScoringError> {
        let cols = rows.first().map(Vec::len).unwrap_or(0);
        let mut data = Vec::with_capacity(rows.len() * cols);
        for (idx, row) in rows.iter().enumerate() {
            if row.len() != cols {
                return Err(ScoringError::shape(
                    "score matrix",
                    format!("row {idx} has {} columns, expected {cols}", row.len()),
                ));
            }
            data.extend_from_slice(row);
        }
        Ok(Self {
            rows: rows.len(),
            cols,
            data,
        })
    }

    pub fn from_tensor(tensor: &Tensor) -> Result<Self, ScoringError> {
        let (rows, cols) = tensor
            .dims2()
            .map_err(|e| ScoringError::runtime("score tensor dims2", e))?;
        let data = tensor
            .to_dtype(DType::F32)
            .and_then(|t| t.flatten_all())
            .and_then(|t| t.to_vec1::<f32>())
            .map_err(|e| ScoringError::runtime("score tensor to_vec1", e))?;
        Self::from_flat(rows, cols, data)
    }

    pub fn to_tensor(&self, device: &Device) -> Result<Tensor, ScoringError> {
        Tensor::from_vec(self.data.clone(), (self.rows, self.cols), device)
            .map_err(|e| ScoringError::runtime("score tensor creation", e))
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn get(&self, row: usize, col: usize) -> f32 {
        self.data[row * self.cols + col]
    }

    pub fn set(&mut self, row: usize, col: usize, value: f32) {
        self.data[row * self.cols + col] = value;
    }

    pub fn row(&self, row: usize) -> &[f32] {
        &self.data[row * self.cols..(row + 1) * self.cols]
    }

    pub fn row_mut(&mut self, row: usize) -> &mut [f32] {
        &mut self.data[row * self.cols..(row + 1) * self.cols]
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn to_rows(&self) -> Vec<Vec<f32>> {
        self.data.chunks(self.cols.max(1)).map(<[f32]>::to_vec).collect()
    }

    /// Overwrite one column in every row.
    pub fn fill_column(&mut self, col: usize, value: f32) {
        for row in 0..self.rows {
            self.set(row, col, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_rows_rejects_ragged_input() {
        let err = ScoreMatrix::from_rows(vec![vec![0.0, 1.0], vec![2.0]]).unwrap_err();
        assert!(matches!(err, ScoringError::ShapeMismatch { .. }));
    }

    #[test]
    fn row_access_and_fill_column() {
        let mut m = ScoreMatrix::from_rows(vec![vec![0.0, 1.0, 2.0], vec![3.0, 4.0, 5.0]]).unwrap();
        assert_eq!(m.row(1), &[3.0, 4.0, 5.0]);
        m.fill_column(1, LOG_ZERO);
        assert_eq!(m.get(0, 1), LOG_ZERO);
        assert_eq!(m.get(1, 1), LOG_ZERO);
        assert_eq!(m.get(1, 2), 5.0);
    }

    #[test]
    fn tensor_conversion_preserves_layout() {
        let m = ScoreMatrix::from_rows(vec![vec![-1.0, -2.0], vec![-3.0, -4.0]]).unwrap();
        let t = m.to_tensor(&Device::Cpu).unwrap();
        assert_eq!(t.dims(), &[2, 2]);
        let back = ScoreMatrix::from_tensor(&t).unwrap();
        assert_eq!(back, m);
    }
}

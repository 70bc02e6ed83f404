//! Rolling matrix of feature vectors sized to the network input.

use crate::error::{KwsError, Result};
use crate::features::FeatureVector;
use crate::inference::InputShape;

/// `frames` rows of `features` coefficients, stored flat and row-major.
///
/// Row 0 is the oldest retained frame, the last row the newest. The flat
/// length never changes after construction and rows are only ever written
/// whole.
#[derive(Debug, Clone)]
pub struct FeatureWindow {
    shape: InputShape,
    data: Vec<f32>,
}

impl FeatureWindow {
    pub fn new(shape: InputShape) -> Self {
        Self {
            shape,
            data: vec![0.0; shape.flat_len()],
        }
    }

    pub fn shape(&self) -> InputShape {
        self.shape
    }

    /// Zero every row, keeping the allocation.
    pub fn reset(&mut self) {
        self.data.fill(0.0);
    }

    /// Fill rows `0..frames` in order from `next`.
    ///
    /// `next` receives the row index and returns the vector for it, or
    /// `None` to stop early (abort). Errors stop the fill immediately.
    /// Rows past the stopping point keep their previous contents, so callers
    /// must discard a partial fill.
    ///
    /// # Returns
    /// Number of rows written
    pub fn fill_sequential<F>(&mut self, mut next: F) -> Result<usize>
    where
        F: FnMut(usize) -> Result<Option<FeatureVector>>,
    {
        for row in 0..self.shape.frames {
            let Some(vector) = next(row)? else {
                return Ok(row);
            };
            self.write_row(row, &vector)?;
        }
        Ok(self.shape.frames)
    }

    /// Drop row 0, move every other row up by one and write `vector` last.
    pub fn shift_and_append(&mut self, vector: &FeatureVector) -> Result<()> {
        self.check_len(vector)?;
        let x = self.shape.features;
        if self.shape.frames == 0 {
            return Ok(());
        }
        self.data.copy_within(x.., 0);
        let last = self.shape.frames - 1;
        self.data[last * x..].copy_from_slice(vector.as_slice());
        Ok(())
    }

    /// The flat view handed to the inference engine.
    pub fn as_flat_input(&self) -> &[f32] {
        &self.data
    }

    pub fn row(&self, index: usize) -> Option<&[f32]> {
        let x = self.shape.features;
        (index < self.shape.frames).then(|| &self.data[index * x..(index + 1) * x])
    }

    /// Rows oldest first.
    pub fn rows(&self) -> impl Iterator<Item = &[f32]> {
        // chunks_exact panics on zero
        self.data.chunks_exact(self.shape.features.max(1))
    }

    fn write_row(&mut self, row: usize, vector: &FeatureVector) -> Result<()> {
        self.check_len(vector)?;
        let x = self.shape.features;
        self.data[row * x..(row + 1) * x].copy_from_slice(vector.as_slice());
        Ok(())
    }

    fn check_len(&self, vector: &FeatureVector) -> Result<()> {
        if vector.len() != self.shape.features {
            return Err(KwsError::ShapeMismatch {
                expected: self.shape.features,
                actual: vector.len(),
            });
        }
        Ok(())
    }
}

//! Time-axis mean pooling and per-layer accumulation

use ndarray::{Array1, Array2, Array3, Axis};

use crate::error::{ExtractError, Result};

/// Average a `(1, time, dim)` hidden state over time
///
/// The mean is taken in the tensor's own precision (f32), element-wise per
/// feature.
pub fn mean_pool(layer: &Array3<f32>) -> Result<Array1<f32>> {
    let (batch, frames, dim) = layer.dim();
    if batch != 1 {
        return Err(ExtractError::InvalidInput {
            reason: format!("expected batch size 1, got {batch}"),
        });
    }
    if frames == 0 {
        return Err(ExtractError::InvalidInput {
            reason: "hidden state has no time steps".to_string(),
        });
    }

    let pooled = layer
        .index_axis(Axis(0), 0)
        .mean_axis(Axis(0))
        .ok_or_else(|| ExtractError::InvalidInput {
            reason: "hidden state has no time steps".to_string(),
        })?;
    debug_assert_eq!(pooled.len(), dim);
    Ok(pooled)
}

/// Row-major accumulator of pooled vectors for every layer
#[derive(Debug, Clone)]
pub struct LayerAccumulator {
    rows: usize,
    dims: Vec<Option<usize>>,
    data: Vec<Vec<f32>>,
}

impl LayerAccumulator {
    pub fn new(num_layers: usize) -> Self {
        Self {
            rows: 0,
            dims: vec![None; num_layers],
            data: vec![Vec::new(); num_layers],
        }
    }

    pub fn num_layers(&self) -> usize {
        self.data.len()
    }

    /// Rows pushed so far
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Feature width of a layer, once known
    pub fn dim(&self, layer: usize) -> Option<usize> {
        self.dims.get(layer).copied().flatten()
    }

    /// Append one file's pooled vectors, one per layer
    ///
    /// The first push fixes each layer's width; a later vector of another
    /// width fails without modifying any layer.
    pub fn push(&mut self, pooled: &[Array1<f32>], context: &str) -> Result<()> {
        if pooled.len() != self.num_layers() {
            return Err(ExtractError::LayerCountMismatch {
                context: context.to_string(),
                expected: self.num_layers(),
                actual: pooled.len(),
            });
        }

        for (layer, (vector, dim)) in pooled.iter().zip(&self.dims).enumerate() {
            if let Some(expected) = *dim {
                if vector.len() != expected {
                    return Err(ExtractError::FeatureDimMismatch {
                        layer,
                        path: context.to_string(),
                        expected,
                        actual: vector.len(),
                    });
                }
            }
        }

        for ((vector, dim), data) in pooled.iter().zip(&mut self.dims).zip(&mut self.data) {
            *dim = Some(vector.len());
            data.extend(vector.iter().copied());
        }
        self.rows += 1;

        Ok(())
    }

    /// Stack every layer into a `(rows, dim)` matrix
    ///
    /// With no rows each matrix is `(0, 0)`.
    pub fn into_matrices(self) -> Result<Vec<Array2<f32>>> {
        let rows = self.rows;
        self.data
            .into_iter()
            .zip(self.dims)
            .map(|(data, dim)| {
                let dim = if rows == 0 { 0 } else { dim.unwrap_or(0) };
                Array2::from_shape_vec((rows, dim), data).map_err(|e| {
                    ExtractError::InvalidInput {
                        reason: format!("cannot stack layer: {e}"),
                    }
                })
            })
            .collect()
    }
}

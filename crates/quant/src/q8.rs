//! Q8_0 quantization
//!
//! For every group of `group_size` consecutive elements:
//! - `scale = max(|x|) / 127`
//! - `q = round(x / scale)`, rounding half away from zero (`f32::round`)
//! - an all-zero group gets `scale = 0` and all-zero values, no division
//!
//! With round-to-nearest the reconstruction error `|q * scale - x|` of a
//! group is bounded by `scale / 2`.

use rayon::prelude::*;

use crate::error::{QuantError, Result};

/// Largest magnitude of a quantized value; -128 is never produced
pub const Q8_MAX: f32 = 127.0;

/// Quantized tensor with per-group scale factors
#[derive(Debug, Clone, PartialEq)]
pub struct QuantizedTensor {
    /// INT8 quantized values, same order as the source elements
    pub values: Vec<i8>,
    /// One scale per group
    pub scales: Vec<f32>,
    /// Elements per group
    pub group_size: usize,
    /// Original shape
    pub shape: Vec<usize>,
    /// Largest `|dequantized - original|` over every element
    pub max_error: f32,
}

impl QuantizedTensor {
    /// Number of elements
    pub fn numel(&self) -> usize {
        self.values.len()
    }

    /// Reconstruct float values
    pub fn dequantize(&self) -> Vec<f32> {
        self.values
            .chunks_exact(self.group_size)
            .zip(&self.scales)
            .flat_map(|(group, &scale)| group.iter().map(move |&q| q as f32 * scale))
            .collect()
    }

    /// Stored size in bytes (values + scales)
    pub fn size_bytes(&self) -> usize {
        self.values.len() + self.scales.len() * 4
    }

    /// Size of the same tensor in float32
    pub fn f32_equivalent_size(&self) -> usize {
        self.numel() * 4
    }

    /// Stored size relative to float32
    pub fn compression_ratio(&self) -> f32 {
        if self.numel() == 0 {
            return 1.0;
        }
        self.size_bytes() as f32 / self.f32_equivalent_size() as f32
    }
}

/// Quantize float32 values to Q8_0 (parallel over groups).
///
/// `data.len()` must be an exact multiple of a non-zero `group_size`;
/// anything else is a caller error and nothing is computed. NaN and
/// infinities are rejected with `NonFinite`.
pub fn quantize_q8_0(data: &[f32], shape: &[usize], group_size: usize) -> Result<QuantizedTensor> {
    if group_size == 0 || data.len() % group_size != 0 {
        return Err(QuantError::InvalidGroupSize {
            len: data.len(),
            group_size,
        });
    }
    if shape.iter().product::<usize>() != data.len() {
        return Err(QuantError::ShapeMismatch {
            shape: shape.to_vec(),
            len: data.len(),
        });
    }

    if let Some(index) = data.par_iter().position_first(|v| !v.is_finite()) {
        return Err(QuantError::NonFinite {
            index,
            value: data[index],
        });
    }

    let mut values = vec![0i8; data.len()];
    let mut scales = vec![0f32; data.len() / group_size];

    // Each group writes only its own output slots, so the result does not
    // depend on scheduling.
    let max_error = data
        .par_chunks_exact(group_size)
        .zip(values.par_chunks_exact_mut(group_size))
        .zip(scales.par_iter_mut())
        .map(|((group, out), scale)| {
            *scale = quantize_group(group, out);
            group_error(group, out, *scale)
        })
        .reduce(|| 0.0f32, f32::max);

    Ok(QuantizedTensor {
        values,
        scales,
        group_size,
        shape: shape.to_vec(),
        max_error,
    })
}

/// Quantize one group in place, returning its scale
fn quantize_group(group: &[f32], out: &mut [i8]) -> f32 {
    let max_abs = group.iter().map(|v| v.abs()).fold(0.0f32, f32::max);
    let scale = max_abs / Q8_MAX;

    if scale == 0.0 {
        out.fill(0);
        return scale;
    }

    for (q, &x) in out.iter_mut().zip(group) {
        *q = (x / scale).round().clamp(-Q8_MAX, Q8_MAX) as i8;
    }
    scale
}

/// Largest reconstruction error within one group
fn group_error(group: &[f32], quantized: &[i8], scale: f32) -> f32 {
    group
        .iter()
        .zip(quantized)
        .map(|(&x, &q)| (q as f32 * scale - x).abs())
        .fold(0.0f32, f32::max)
}

/// Halve `preferred` until it divides `dim`.
///
/// Used to pick a group size that tiles every row of the model's matrices.
pub fn fit_group_size(dim: usize, preferred: usize) -> usize {
    let mut group_size = preferred.max(1);
    while dim % group_size != 0 {
        group_size /= 2;
    }
    group_size
}

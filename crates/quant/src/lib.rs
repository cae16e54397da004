//! lmpack quantization
//!
//! Q8_0: per-group symmetric int8 quantization. Each contiguous group of
//! `group_size` elements shares one float32 scale, there is no zero point.
//! Storage drops from 4 bytes to `1 + 4 / group_size` bytes per element.
//!
//! Groups are independent, so quantization runs on the rayon pool; results
//! are bit-identical to a sequential pass regardless of thread count.

mod error;
mod q8;

pub use error::{QuantError, Result};
pub use q8::{fit_group_size, quantize_q8_0, QuantizedTensor, Q8_MAX};

//! lmpack container format
//!
//! Binary layout of the `.bin` weight container read by the inference runtime:
//! a fixed 256-byte header followed by tensor payloads in a canonical order.
//! No per-tensor length prefixes are stored; readers reconstruct every
//! length from the hyperparameters through the [`layout`] table.

mod constants;
mod error;
mod header;
pub mod layout;
mod params;
mod reader;
mod writer;

pub use constants::*;
pub use error::{FormatError, Result};
pub use header::Header;
pub use layout::{Encoding, WeightKind, WeightRecord, WeightSlot};
pub use params::Hyperparams;
pub use reader::{read_container, Container, ContainerReader, ContainerTensor, TensorData};
pub use writer::ContainerWriter;

//! Container constants

use crate::error::{FormatError, Result};

/// Container magic: ASCII "ak42" packed into a little-endian u32
pub const MAGIC: u32 = 0x616b_3432;

/// Fixed header length in bytes, for every version and flag combination
pub const HEADER_LEN: usize = 256;

/// Number of i32 hyperparameter fields following magic and version
pub const PARAM_COUNT: usize = 7;

/// Byte offset of the shared-classifier flag
pub const SHARED_CLASSIFIER_OFFSET: usize = 8 + PARAM_COUNT * 4;

/// Byte offset of the Q8_0 group size (version 2 only)
pub const GROUP_SIZE_OFFSET: usize = SHARED_CLASSIFIER_OFFSET + 1;

/// Retired headerless format, never produced
pub const LEGACY_VERSION: i32 = 0;

/// Preferred Q8_0 group size before fitting it to the model width
pub const DEFAULT_GROUP_SIZE: usize = 64;

/// Container format versions that can be written and read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum FormatVersion {
    /// Full-fidelity float32 weights
    Float32 = 1,
    /// Norms in float32, matrices as Q8_0 int8 with per-group scales
    Q8 = 2,
}

impl FormatVersion {
    /// Resolve a raw version number, rejecting retired and unknown values
    pub fn from_i32(value: i32) -> Result<Self> {
        match value {
            LEGACY_VERSION => Err(FormatError::DeprecatedVersion(value)),
            1 => Ok(FormatVersion::Float32),
            2 => Ok(FormatVersion::Q8),
            _ => Err(FormatError::UnknownVersion(value)),
        }
    }

    pub fn to_i32(self) -> i32 {
        self as i32
    }

    /// Whether the container carries quantized records
    pub fn is_quantized(self) -> bool {
        matches!(self, FormatVersion::Q8)
    }
}

impl std::fmt::Display for FormatVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FormatVersion::Float32 => write!(f, "v1 (float32)"),
            FormatVersion::Q8 => write!(f, "v2 (Q8_0)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_magic_bytes() {
        assert_eq!(&MAGIC.to_le_bytes(), b"24ka");
    }

    #[test]
    fn test_flag_offsets() {
        assert_eq!(SHARED_CLASSIFIER_OFFSET, 36);
        assert_eq!(GROUP_SIZE_OFFSET, 37);
    }

    #[test]
    fn test_version_resolution() {
        assert_eq!(FormatVersion::from_i32(1).unwrap(), FormatVersion::Float32);
        assert_eq!(FormatVersion::from_i32(2).unwrap(), FormatVersion::Q8);
        assert!(matches!(
            FormatVersion::from_i32(0),
            Err(FormatError::DeprecatedVersion(0))
        ));
        assert!(matches!(
            FormatVersion::from_i32(99),
            Err(FormatError::UnknownVersion(99))
        ));
        assert!(matches!(
            FormatVersion::from_i32(-1),
            Err(FormatError::UnknownVersion(-1))
        ));
    }
}

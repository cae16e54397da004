//! Container format error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum FormatError {
    #[error("Invalid magic: expected 0x{expected:08X}, got 0x{got:08X}")]
    InvalidMagic { expected: u32, got: u32 },

    #[error("Format version {0} is deprecated and can no longer be produced")]
    DeprecatedVersion(i32),

    #[error("Unknown format version {0}")]
    UnknownVersion(i32),

    #[error("Header layout overflow: {len} bytes of fields exceed the {max}-byte header")]
    LayoutOverflow { len: usize, max: usize },

    #[error("Header field {field} = {value} does not fit a signed 32-bit integer")]
    FieldOutOfRange { field: &'static str, value: usize },

    #[error("Header field {field} is negative: {value}")]
    NegativeField { field: &'static str, value: i32 },

    #[error("Invalid flag byte at offset {offset}: {value}")]
    InvalidFlag { offset: usize, value: u8 },

    #[error("Invalid quantization group size: {0}")]
    InvalidGroupSize(i64),

    #[error("Non-zero padding byte at offset {offset}")]
    NonZeroPadding { offset: usize },

    #[error("Value {value} at index {index} is outside the int8 range [-128, 127]")]
    ValueOutOfRange { index: usize, value: i64 },

    #[error("Quantized record mismatch: {values} values cannot be split into {scales} groups")]
    RecordMismatch { values: usize, scales: usize },

    #[error("Tensor written before the header")]
    HeaderNotWritten,

    #[error("Header already written")]
    HeaderAlreadyWritten,

    #[error("Buffer too short: need {need} bytes, have {have}")]
    BufferTooShort { need: usize, have: usize },

    #[error("Container size described by the header overflows the address space")]
    SizeOverflow,

    #[error("{count} trailing bytes after the last tensor")]
    TrailingBytes { count: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, FormatError>;

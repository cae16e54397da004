//! Container header (256 bytes)

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Read, Write};

use crate::constants::{FormatVersion, HEADER_LEN, MAGIC, PARAM_COUNT};
use crate::error::{FormatError, Result};
use crate::params::{Hyperparams, FIELD_NAMES};

/// Container header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    /// Format version
    pub version: FormatVersion,
    /// Architecture hyperparameters
    pub params: Hyperparams,
    /// Output projection omitted because it equals the token embedding
    pub shared_classifier: bool,
    /// Q8_0 group size (version 2 only)
    pub group_size: Option<usize>,
}

impl Header {
    /// Header for a float32 (version 1) container
    pub fn float32(params: Hyperparams, shared_classifier: bool) -> Self {
        Self {
            version: FormatVersion::Float32,
            params,
            shared_classifier,
            group_size: None,
        }
    }

    /// Header for a Q8_0 (version 2) container
    pub fn q8(params: Hyperparams, shared_classifier: bool, group_size: usize) -> Self {
        Self {
            version: FormatVersion::Q8,
            params,
            shared_classifier,
            group_size: Some(group_size),
        }
    }

    /// Fields preceding the zero padding
    fn encode_fields(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(HEADER_LEN);
        buf.write_u32::<LittleEndian>(MAGIC)?;
        buf.write_i32::<LittleEndian>(self.version.to_i32())?;
        for value in self.params.to_i32_fields()? {
            buf.write_i32::<LittleEndian>(value)?;
        }
        buf.write_u8(u8::from(self.shared_classifier))?;

        match (self.version, self.group_size) {
            (FormatVersion::Float32, _) => {}
            (FormatVersion::Q8, Some(group_size)) if group_size > 0 => {
                let raw = i32::try_from(group_size)
                    .map_err(|_| FormatError::InvalidGroupSize(group_size as i64))?;
                buf.write_i32::<LittleEndian>(raw)?;
            }
            (FormatVersion::Q8, group_size) => {
                return Err(FormatError::InvalidGroupSize(
                    group_size.map_or(0, |g| g as i64),
                ));
            }
        }

        Ok(buf)
    }

    /// Encode the header to exactly `HEADER_LEN` bytes
    pub fn encode(&self) -> Result<Vec<u8>> {
        pad_header(self.encode_fields()?)
    }

    /// Write the header to a writer
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&self.encode()?)?;
        Ok(())
    }

    /// Decode a header from the first `HEADER_LEN` bytes
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_LEN {
            return Err(FormatError::BufferTooShort {
                need: HEADER_LEN,
                have: data.len(),
            });
        }

        let mut cursor = Cursor::new(&data[..HEADER_LEN]);

        let magic = cursor.read_u32::<LittleEndian>()?;
        if magic != MAGIC {
            return Err(FormatError::InvalidMagic {
                expected: MAGIC,
                got: magic,
            });
        }

        let version = FormatVersion::from_i32(cursor.read_i32::<LittleEndian>()?)?;

        let mut fields = [0usize; PARAM_COUNT];
        for (i, field) in fields.iter_mut().enumerate() {
            let raw = cursor.read_i32::<LittleEndian>()?;
            *field = usize::try_from(raw).map_err(|_| FormatError::NegativeField {
                field: FIELD_NAMES[i],
                value: raw,
            })?;
        }
        let params = Hyperparams::from_fields(fields);

        let flag_offset = cursor.position() as usize;
        let shared_classifier = match cursor.read_u8()? {
            0 => false,
            1 => true,
            value => {
                return Err(FormatError::InvalidFlag {
                    offset: flag_offset,
                    value,
                })
            }
        };

        let group_size = match version {
            FormatVersion::Float32 => None,
            FormatVersion::Q8 => {
                let raw = cursor.read_i32::<LittleEndian>()?;
                if raw <= 0 {
                    return Err(FormatError::InvalidGroupSize(raw as i64));
                }
                Some(raw as usize)
            }
        };

        let padding_start = cursor.position() as usize;
        let mut padding = Vec::with_capacity(HEADER_LEN - padding_start);
        cursor.read_to_end(&mut padding)?;
        if let Some(pos) = padding.iter().position(|&b| b != 0) {
            return Err(FormatError::NonZeroPadding {
                offset: padding_start + pos,
            });
        }

        Ok(Self {
            version,
            params,
            shared_classifier,
            group_size,
        })
    }
}

/// Zero-fill header fields up to `HEADER_LEN`
fn pad_header(mut buf: Vec<u8>) -> Result<Vec<u8>> {
    if buf.len() > HEADER_LEN {
        return Err(FormatError::LayoutOverflow {
            len: buf.len(),
            max: HEADER_LEN,
        });
    }
    buf.resize(HEADER_LEN, 0);
    Ok(buf)
}

//! Sequential container writer

use byteorder::{ByteOrder, LittleEndian};
use std::io::Write;

use crate::error::{FormatError, Result};
use crate::header::Header;

/// Appends a header and tensor records to an output stream.
///
/// Writes are strictly sequential: the header goes first and exactly once,
/// tensors follow in the order they are handed in. Nothing is ever seeked
/// or rewritten.
pub struct ContainerWriter<W: Write> {
    inner: W,
    bytes_written: u64,
    header_written: bool,
}

impl<W: Write> ContainerWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            bytes_written: 0,
            header_written: false,
        }
    }

    /// Bytes appended so far, header included
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Write the 256-byte header
    pub fn write_header(&mut self, header: &Header) -> Result<()> {
        if self.header_written {
            return Err(FormatError::HeaderAlreadyWritten);
        }
        let bytes = header.encode()?;
        self.append(&bytes)?;
        self.header_written = true;
        Ok(())
    }

    /// Append float32 values as little-endian bytes, row-major, untransformed
    pub fn write_tensor_f32(&mut self, data: &[f32]) -> Result<()> {
        self.require_header()?;
        let mut buf = vec![0u8; data.len() * 4];
        LittleEndian::write_f32_into(data, &mut buf);
        self.append(&buf)
    }

    /// Append values as signed bytes.
    ///
    /// The whole tensor is range-checked before anything is written; a value
    /// outside `[-128, 127]` is an error, never truncated.
    pub fn write_tensor_i8<T>(&mut self, values: &[T]) -> Result<()>
    where
        T: Copy + Into<i64>,
    {
        self.require_header()?;
        let mut buf = Vec::with_capacity(values.len());
        for (index, &value) in values.iter().enumerate() {
            let value: i64 = value.into();
            let byte = i8::try_from(value)
                .map_err(|_| FormatError::ValueOutOfRange { index, value })?;
            buf.push(byte as u8);
        }
        self.append(&buf)
    }

    /// Append a Q8_0 record: all int8 values, then one float32 scale per group
    pub fn write_quantized(&mut self, values: &[i8], scales: &[f32]) -> Result<()> {
        let mismatch = match scales.len() {
            0 => !values.is_empty(),
            n => values.len() % n != 0,
        };
        if mismatch {
            return Err(FormatError::RecordMismatch {
                values: values.len(),
                scales: scales.len(),
            });
        }
        self.write_tensor_i8(values)?;
        self.write_tensor_f32(scales)
    }

    /// Flush and hand back the underlying stream with the byte count
    pub fn finish(mut self) -> Result<(W, u64)> {
        self.inner.flush()?;
        Ok((self.inner, self.bytes_written))
    }

    fn require_header(&self) -> Result<()> {
        if self.header_written {
            Ok(())
        } else {
            Err(FormatError::HeaderNotWritten)
        }
    }

    fn append(&mut self, bytes: &[u8]) -> Result<()> {
        self.inner.write_all(bytes)?;
        self.bytes_written += bytes.len() as u64;
        Ok(())
    }
}

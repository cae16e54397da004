//! Container reader
//!
//! Walks a container with the same layout table the writer follows, so a
//! float32 weight read back is bit-identical to the one written.

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;

use crate::constants::HEADER_LEN;
use crate::error::{FormatError, Result};
use crate::header::Header;
use crate::layout::{self, Encoding, WeightKind, WeightRecord};

/// Decoded tensor payload
#[derive(Debug, Clone, PartialEq)]
pub enum TensorData {
    F32(Vec<f32>),
    Q8 { values: Vec<i8>, scales: Vec<f32> },
}

impl TensorData {
    /// Float values, dequantizing Q8 records with their group scales
    pub fn to_f32(&self) -> Vec<f32> {
        match self {
            TensorData::F32(data) => data.clone(),
            TensorData::Q8 { values, scales } => {
                if scales.is_empty() {
                    return Vec::new();
                }
                let group_size = values.len() / scales.len();
                values
                    .chunks_exact(group_size)
                    .zip(scales)
                    .flat_map(|(group, &scale)| group.iter().map(move |&q| q as f32 * scale))
                    .collect()
            }
        }
    }
}

/// One tensor read back from a container
#[derive(Debug, Clone)]
pub struct ContainerTensor {
    pub record: WeightRecord,
    pub data: TensorData,
}

/// A fully decoded container
#[derive(Debug, Clone)]
pub struct Container {
    pub header: Header,
    pub tensors: Vec<ContainerTensor>,
}

impl Container {
    /// Find a tensor by kind and layer
    pub fn get(&self, kind: WeightKind, layer: Option<usize>) -> Option<&ContainerTensor> {
        self.tensors
            .iter()
            .find(|t| t.record.slot.kind == kind && t.record.slot.layer == layer)
    }
}

/// Low-level cursor over container bytes
pub struct ContainerReader<'a> {
    cursor: Cursor<&'a [u8]>,
}

impl<'a> ContainerReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            cursor: Cursor::new(data),
        }
    }

    /// Bytes not yet consumed
    pub fn remaining(&self) -> usize {
        let len = self.cursor.get_ref().len();
        len.saturating_sub(self.cursor.position() as usize)
    }

    /// Decode the header and advance past it
    pub fn read_header(&mut self) -> Result<Header> {
        let start = self.cursor.position() as usize;
        let header = Header::decode(&self.cursor.get_ref()[start..])?;
        self.cursor.set_position((start + HEADER_LEN) as u64);
        Ok(header)
    }

    /// Read `count` little-endian float32 values
    pub fn read_f32(&mut self, count: usize) -> Result<Vec<f32>> {
        let need = count.checked_mul(4).ok_or(FormatError::SizeOverflow)?;
        self.ensure(need)?;
        let mut out = vec![0f32; count];
        self.cursor.read_f32_into::<LittleEndian>(&mut out)?;
        Ok(out)
    }

    /// Read `count` signed bytes
    pub fn read_i8(&mut self, count: usize) -> Result<Vec<i8>> {
        self.ensure(count)?;
        let mut out = vec![0i8; count];
        self.cursor.read_i8_into(&mut out)?;
        Ok(out)
    }

    /// Read one record as laid out by the writer
    pub fn read_record(&mut self, record: &WeightRecord, group_size: usize) -> Result<TensorData> {
        let numel = record.numel().ok_or(FormatError::SizeOverflow)?;
        match record.encoding {
            Encoding::F32 => Ok(TensorData::F32(self.read_f32(numel)?)),
            Encoding::Q8 => {
                if group_size == 0 || numel % group_size != 0 {
                    return Err(FormatError::InvalidGroupSize(group_size as i64));
                }
                let values = self.read_i8(numel)?;
                let scales = self.read_f32(numel / group_size)?;
                Ok(TensorData::Q8 { values, scales })
            }
        }
    }

    fn ensure(&self, need: usize) -> Result<()> {
        let have = self.remaining();
        if have < need {
            return Err(FormatError::BufferTooShort { need, have });
        }
        Ok(())
    }
}

/// Decode a whole container, reconstructing tensor lengths from the header.
///
/// The payload size implied by the header is checked against the buffer
/// before any record is allocated.
pub fn read_container(data: &[u8]) -> Result<Container> {
    let mut reader = ContainerReader::new(data);
    let header = reader.read_header()?;
    let group_size = header.group_size.unwrap_or(0);

    let need = layout::payload_len(
        header.version,
        &header.params,
        header.shared_classifier,
        group_size,
    )?;
    reader.ensure(need)?;

    let records = layout::weight_order(header.version, &header.params, header.shared_classifier);
    let mut tensors = Vec::with_capacity(records.len());
    for record in records {
        let data = reader.read_record(&record, group_size)?;
        tensors.push(ContainerTensor { record, data });
    }

    let trailing = reader.remaining();
    if trailing > 0 {
        return Err(FormatError::TrailingBytes { count: trailing });
    }

    Ok(Container { header, tensors })
}

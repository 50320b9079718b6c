//! Source tensor descriptors and payload streaming.
//!
//! A [`SourceTensor`] names a slice of checkpoint data plus its dtype
//! and shape. Payload bytes stay on disk until the writer asks for
//! them; an attached repacker transforms the f32 view of the data on
//! the way out.

use crate::errors::ConvertError;
use crate::gguf::TensorData;
use half::{bf16, f16};
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::PathBuf;

/// Write-time transform over a tensor's f32 data. Receives the source
/// tensor name, the decoded values and the logical shape.
pub type Repacker = Box<dyn Fn(&str, Vec<f32>, &[u64]) -> Result<Vec<f32>, ConvertError>>;

/// Element type of a source tensor as stored in the checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceDtype {
    F32,
    F16,
    BF16,
}

impl SourceDtype {
    pub fn from_safetensors(s: &str) -> Result<Self, ConvertError> {
        match s {
            "F32" => Ok(SourceDtype::F32),
            "F16" => Ok(SourceDtype::F16),
            "BF16" => Ok(SourceDtype::BF16),
            other => Err(ConvertError::InvalidTensorData(format!(
                "unsupported dtype: {other}"
            ))),
        }
    }

    /// The ggml kind this dtype lands as. BF16 is widened to f32.
    pub fn kind(self) -> u32 {
        match self {
            SourceDtype::F32 | SourceDtype::BF16 => 0,
            SourceDtype::F16 => 1,
        }
    }

    pub fn element_size(self) -> usize {
        match self {
            SourceDtype::F32 => 4,
            SourceDtype::F16 | SourceDtype::BF16 => 2,
        }
    }
}

enum Payload {
    File {
        path: PathBuf,
        offset: u64,
        len: u64,
    },
    Memory(Vec<u8>),
}

/// One tensor discovered in the source checkpoint.
pub struct SourceTensor {
    name: String,
    dtype: SourceDtype,
    shape: Vec<u64>,
    payload: Payload,
    repacker: Option<Repacker>,
}

impl SourceTensor {
    /// Descriptor backed by a byte range of a checkpoint file.
    pub fn from_file(
        name: String,
        dtype: SourceDtype,
        shape: Vec<u64>,
        path: PathBuf,
        offset: u64,
        len: u64,
    ) -> Self {
        Self {
            name,
            dtype,
            shape,
            payload: Payload::File { path, offset, len },
            repacker: None,
        }
    }

    /// In-memory f32 descriptor.
    pub fn from_f32(name: String, shape: Vec<u64>, values: &[f32]) -> Self {
        let mut bytes = Vec::with_capacity(values.len() * 4);
        for v in values {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        Self {
            name,
            dtype: SourceDtype::F32,
            shape,
            payload: Payload::Memory(bytes),
            repacker: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> u32 {
        self.dtype.kind()
    }

    pub fn shape(&self) -> &[u64] {
        &self.shape
    }

    pub fn set_repacker(&mut self, repacker: Repacker) {
        self.repacker = Some(repacker);
    }

    fn read_raw(&self) -> Result<Vec<u8>, ConvertError> {
        match &self.payload {
            Payload::File { path, offset, len } => {
                let mut f = File::open(path)?;
                f.seek(SeekFrom::Start(*offset))?;
                let mut buf = vec![0u8; *len as usize];
                f.read_exact(&mut buf)?;
                Ok(buf)
            }
            Payload::Memory(bytes) => Ok(bytes.clone()),
        }
    }

    fn decode_f32(&self, raw: &[u8]) -> Vec<f32> {
        match self.dtype {
            SourceDtype::F32 => raw
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect(),
            SourceDtype::F16 => raw
                .chunks_exact(2)
                .map(|c| f16::from_le_bytes([c[0], c[1]]).to_f32())
                .collect(),
            SourceDtype::BF16 => raw
                .chunks_exact(2)
                .map(|c| bf16::from_le_bytes([c[0], c[1]]).to_f32())
                .collect(),
        }
    }
}

impl TensorData for SourceTensor {
    fn write_to(&self, w: &mut dyn Write) -> Result<u64, ConvertError> {
        // F32/F16 without a repacker stream straight from the source
        if self.repacker.is_none() && self.dtype != SourceDtype::BF16 {
            return match &self.payload {
                Payload::File { path, offset, len } => {
                    let mut f = File::open(path)?;
                    f.seek(SeekFrom::Start(*offset))?;
                    Ok(io::copy(&mut f.take(*len), w)?)
                }
                Payload::Memory(bytes) => {
                    w.write_all(bytes)?;
                    Ok(bytes.len() as u64)
                }
            };
        }

        let raw = self.read_raw()?;
        let mut values = self.decode_f32(&raw);
        if let Some(repack) = &self.repacker {
            values = repack(&self.name, values, &self.shape)?;
        }

        match self.dtype {
            SourceDtype::F32 | SourceDtype::BF16 => {
                for v in &values {
                    w.write_all(&v.to_le_bytes())?;
                }
                Ok(values.len() as u64 * 4)
            }
            SourceDtype::F16 => {
                for v in &values {
                    w.write_all(&f16::from_f32(*v).to_le_bytes())?;
                }
                Ok(values.len() as u64 * 2)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_tensor_streams_raw_bytes() {
        let t = SourceTensor::from_f32("t".into(), vec![2], &[1.0, 2.0]);
        let mut out = Vec::new();
        assert_eq!(t.write_to(&mut out).unwrap(), 8);
        assert_eq!(out[..4], 1.0f32.to_le_bytes());
        assert_eq!(out[4..], 2.0f32.to_le_bytes());
    }

    #[test]
    fn repacker_transforms_payload() {
        let mut t = SourceTensor::from_f32("t".into(), vec![2], &[1.0, 2.0]);
        t.set_repacker(Box::new(|_, data, _| {
            Ok(data.into_iter().map(|v| v * 10.0).collect())
        }));
        let mut out = Vec::new();
        t.write_to(&mut out).unwrap();
        assert_eq!(out[..4], 10.0f32.to_le_bytes());
        assert_eq!(out[4..], 20.0f32.to_le_bytes());
    }

    #[test]
    fn unknown_safetensors_dtype_rejected() {
        assert!(SourceDtype::from_safetensors("I64").is_err());
    }
}

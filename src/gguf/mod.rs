//! GGUF container format: value codec, reader, writer.
//!
//! Layout follows llama.cpp GGUF v3: header, metadata KV, tensor infos,
//! aligned tensor data. The reader accepts v1/v2/v3 in either byte
//! order; the writer always emits v3 little-endian.

pub mod reader;
pub mod value;
pub mod writer;

pub use reader::{decode, Gguf, TensorInfo};
pub use value::{GgufArray, GgufType, GgufValue};
pub use writer::write_gguf;

use crate::errors::ConvertError;
use std::collections::BTreeMap;
use std::io::Write;

/// GGUF magic: "GGUF".
pub const GGUF_MAGIC: [u8; 4] = *b"GGUF";
/// Version emitted by the writer.
pub const GGUF_VERSION: u32 = 3;
/// Alignment for the tensor data region, fixed for writes; reads honor
/// `general.alignment` when present.
pub const GGUF_ALIGNMENT: u64 = 32;

/// Metadata map. `BTreeMap` iterates keys in ascending byte order,
/// which is exactly the writer's required emission order.
pub type KV = BTreeMap<String, GgufValue>;

/// Streams a tensor's raw payload bytes into a sink, returning the
/// number of bytes written. Repacking transforms run inside
/// implementations of this trait, at write time.
pub trait TensorData {
    fn write_to(&self, w: &mut dyn Write) -> Result<u64, ConvertError>;
}

/// A tensor descriptor handed to the writer. `offset` is assigned by
/// the writer in sorted-name order; the value given here is ignored.
pub struct Tensor {
    pub name: String,
    pub kind: u32,
    pub shape: Vec<u64>,
    pub offset: u64,
    pub data: Box<dyn TensorData>,
}

impl Tensor {
    /// Number of elements (product of the shape).
    pub fn elements(&self) -> u64 {
        self.shape.iter().product()
    }

    /// On-disk payload size in bytes for this tensor's kind.
    pub fn size(&self) -> Result<u64, ConvertError> {
        let (block, type_size) = kind_block_info(self.kind)?;
        Ok(self.elements() / block * type_size)
    }
}

/// Zero bytes needed after `offset` to reach the next multiple of
/// `align`.
pub fn pad(offset: u64, align: u64) -> u64 {
    (align - offset % align) % align
}

/// Block size (elements) and bytes per block for a ggml tensor kind.
/// Quantized kinds pack whole blocks; scalar kinds use block size 1.
pub fn kind_block_info(kind: u32) -> Result<(u64, u64), ConvertError> {
    let info = match kind {
        0 => (1, 4),    // F32
        1 => (1, 2),    // F16
        2 => (32, 18),  // Q4_0
        3 => (32, 20),  // Q4_1
        6 => (32, 22),  // Q5_0
        7 => (32, 24),  // Q5_1
        8 => (32, 34),  // Q8_0
        9 => (32, 36),  // Q8_1
        10 => (256, 84),  // Q2_K
        11 => (256, 110), // Q3_K
        12 => (256, 144), // Q4_K
        13 => (256, 176), // Q5_K
        14 => (256, 210), // Q6_K
        15 => (256, 292), // Q8_K
        16 => (256, 66),  // IQ2_XXS
        17 => (256, 74),  // IQ2_XS
        18 => (256, 98),  // IQ3_XXS
        19 => (256, 50),  // IQ1_S
        20 => (256, 132), // IQ4_NL
        21 => (256, 110), // IQ3_S
        22 => (256, 82),  // IQ2_S
        23 => (256, 136), // IQ4_XS
        24 => (1, 1),   // I8
        25 => (1, 2),   // I16
        26 => (1, 4),   // I32
        27 => (1, 8),   // I64
        28 => (1, 8),   // F64
        29 => (1, 2),   // BF16
        _ => return Err(ConvertError::InvalidType(kind)),
    };
    Ok(info)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pad_stays_in_range_and_aligns() {
        for align in [1u64, 2, 8, 32, 64] {
            for offset in 0..200u64 {
                let p = pad(offset, align);
                assert!(p < align);
                assert_eq!((offset + p) % align, 0);
            }
        }
    }

    #[test]
    fn f32_tensor_size() {
        let t = Tensor {
            name: "t".into(),
            kind: 0,
            shape: vec![32, 8],
            offset: 0,
            data: Box::new(crate::gguf::writer::Bytes(vec![])),
        };
        assert_eq!(t.size().unwrap(), 32 * 8 * 4);
    }

    #[test]
    fn unknown_kind_rejected() {
        assert!(matches!(
            kind_block_info(99),
            Err(ConvertError::InvalidType(99))
        ));
    }
}

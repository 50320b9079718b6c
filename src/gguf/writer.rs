//! GGUF v3 little-endian writer.
//!
//! Emission order is deterministic: metadata in ascending key byte
//! order, tensor descriptors and payloads in ascending name byte order.
//! Offsets are assigned in that order; each advances by the unpadded
//! tensor size even though payloads are padded to the 32-byte boundary.

use super::value::{write_string, GgufArray, GgufType, GgufValue};
use super::{pad, Tensor, TensorData, KV, GGUF_ALIGNMENT, GGUF_MAGIC, GGUF_VERSION};
use crate::errors::ConvertError;
use byteorder::{LittleEndian, WriteBytesExt};
use std::io::{Seek, Write};

/// Write a complete GGUF v3 file: magic, header, metadata, tensor
/// descriptors, alignment padding, then each tensor payload padded to
/// the 32-byte boundary. Consumes the descriptors together with their
/// payload providers.
pub fn write_gguf<W: Write + Seek>(
    ws: &mut W,
    kv: &KV,
    mut tensors: Vec<Tensor>,
) -> Result<(), ConvertError> {
    ws.write_all(&GGUF_MAGIC)?;
    ws.write_u32::<LittleEndian>(GGUF_VERSION)?;
    ws.write_u64::<LittleEndian>(tensors.len() as u64)?;
    ws.write_u64::<LittleEndian>(kv.len() as u64)?;

    for (key, value) in kv {
        write_kv(ws, key, value)?;
    }

    tensors.sort_by(|a, b| a.name.cmp(&b.name));

    let mut offset = 0u64;
    for tensor in &mut tensors {
        tensor.offset = offset;
        write_tensor_info(ws, tensor)?;
        offset += tensor.size()?;
    }

    let pos = ws.stream_position()?;
    write_padding(ws, pad(pos, GGUF_ALIGNMENT))?;

    for tensor in &tensors {
        tensor.data.write_to(ws)?;
        let pos = ws.stream_position()?;
        write_padding(ws, pad(pos, GGUF_ALIGNMENT))?;
    }

    Ok(())
}

fn write_kv<W: Write>(w: &mut W, key: &str, value: &GgufValue) -> Result<(), ConvertError> {
    write_string(w, key)?;

    match value {
        GgufValue::Uint32(v) => {
            w.write_u32::<LittleEndian>(GgufType::Uint32 as u32)?;
            w.write_u32::<LittleEndian>(*v)?;
        }
        GgufValue::Float32(v) => {
            w.write_u32::<LittleEndian>(GgufType::Float32 as u32)?;
            w.write_f32::<LittleEndian>(*v)?;
        }
        GgufValue::Bool(v) => {
            w.write_u32::<LittleEndian>(GgufType::Bool as u32)?;
            w.write_u8(u8::from(*v))?;
        }
        GgufValue::String(s) => {
            w.write_u32::<LittleEndian>(GgufType::String as u32)?;
            write_string(w, s)?;
        }
        GgufValue::Array(GgufArray::Int32(v)) => {
            write_array_header(w, GgufType::Int32, v.len())?;
            for e in v {
                w.write_i32::<LittleEndian>(*e)?;
            }
        }
        GgufValue::Array(GgufArray::Uint32(v)) => {
            write_array_header(w, GgufType::Uint32, v.len())?;
            for e in v {
                w.write_u32::<LittleEndian>(*e)?;
            }
        }
        GgufValue::Array(GgufArray::Float32(v)) => {
            write_array_header(w, GgufType::Float32, v.len())?;
            for e in v {
                w.write_f32::<LittleEndian>(*e)?;
            }
        }
        GgufValue::Array(GgufArray::String(v)) => {
            write_array_header(w, GgufType::String, v.len())?;
            for e in v {
                write_string(w, e)?;
            }
        }
        _ => return Err(ConvertError::ImproperType(key.to_string())),
    }

    Ok(())
}

fn write_array_header<W: Write>(
    w: &mut W,
    elem: GgufType,
    len: usize,
) -> Result<(), ConvertError> {
    w.write_u32::<LittleEndian>(GgufType::Array as u32)?;
    w.write_u32::<LittleEndian>(elem as u32)?;
    w.write_u64::<LittleEndian>(len as u64)?;
    Ok(())
}

fn write_tensor_info<W: Write>(w: &mut W, t: &Tensor) -> Result<(), ConvertError> {
    write_string(w, &t.name)?;
    w.write_u32::<LittleEndian>(t.shape.len() as u32)?;
    // dimensions land on disk in reverse of the logical shape
    for dim in t.shape.iter().rev() {
        w.write_u64::<LittleEndian>(*dim)?;
    }
    w.write_u32::<LittleEndian>(t.kind)?;
    w.write_u64::<LittleEndian>(t.offset)?;
    Ok(())
}

fn write_padding<W: Write>(w: &mut W, n: u64) -> Result<(), ConvertError> {
    for _ in 0..n {
        w.write_u8(0)?;
    }
    Ok(())
}

/// In-memory payload provider.
pub struct Bytes(pub Vec<u8>);

impl TensorData for Bytes {
    fn write_to(&self, w: &mut dyn Write) -> Result<u64, ConvertError> {
        w.write_all(&self.0)?;
        Ok(self.0.len() as u64)
    }
}

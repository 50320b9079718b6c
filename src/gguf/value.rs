//! GGUF metadata value model and the scalar/string/array wire codec.
//!
//! Scalars are read in a caller-chosen byte order (big-endian GGUF files
//! exist) and always written little-endian. Version 1 files use slightly
//! different framing: string lengths include a trailing NUL and array
//! lengths are 32-bit.

use crate::errors::ConvertError;
use byteorder::{ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

/// Metadata value type tags as stored on the wire.
#[repr(u32)]
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum GgufType {
    Uint8 = 0,
    Int8 = 1,
    Uint16 = 2,
    Int16 = 3,
    Uint32 = 4,
    Int32 = 5,
    Float32 = 6,
    Bool = 7,
    String = 8,
    Array = 9,
    Uint64 = 10,
    Int64 = 11,
    Float64 = 12,
}

/// A single metadata value.
#[derive(Debug, Clone, PartialEq)]
pub enum GgufValue {
    Uint8(u8),
    Int8(i8),
    Uint16(u16),
    Int16(i16),
    Uint32(u32),
    Int32(i32),
    Float32(f32),
    Bool(bool),
    String(String),
    Uint64(u64),
    Int64(i64),
    Float64(f64),
    Array(GgufArray),
}

/// A homogeneous metadata array. Nested arrays are not representable;
/// the codec rejects them on read and the writer never produces them.
#[derive(Debug, Clone, PartialEq)]
pub enum GgufArray {
    Uint8(Vec<u8>),
    Int8(Vec<i8>),
    Uint16(Vec<u16>),
    Int16(Vec<i16>),
    Uint32(Vec<u32>),
    Int32(Vec<i32>),
    Float32(Vec<f32>),
    Bool(Vec<bool>),
    String(Vec<String>),
    Uint64(Vec<u64>),
    Int64(Vec<i64>),
    Float64(Vec<f64>),
}

impl GgufValue {
    pub fn as_u32(&self) -> Option<u32> {
        match self {
            GgufValue::Uint32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            GgufValue::Uint32(v) => Some(*v as u64),
            GgufValue::Uint64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            GgufValue::String(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

impl GgufArray {
    pub fn len(&self) -> usize {
        match self {
            GgufArray::Uint8(v) => v.len(),
            GgufArray::Int8(v) => v.len(),
            GgufArray::Uint16(v) => v.len(),
            GgufArray::Int16(v) => v.len(),
            GgufArray::Uint32(v) => v.len(),
            GgufArray::Int32(v) => v.len(),
            GgufArray::Float32(v) => v.len(),
            GgufArray::Bool(v) => v.len(),
            GgufArray::String(v) => v.len(),
            GgufArray::Uint64(v) => v.len(),
            GgufArray::Int64(v) => v.len(),
            GgufArray::Float64(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Read a length-prefixed string. Version 1 lengths include a trailing
/// NUL byte which is stripped from the returned value.
pub fn read_string<R: Read, O: ByteOrder>(
    r: &mut R,
    version: u32,
) -> Result<String, ConvertError> {
    let len = r.read_u64::<O>()? as usize;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;

    if version == 1 && buf.pop().is_none() {
        return Err(ConvertError::Truncated);
    }

    String::from_utf8(buf).map_err(|_| {
        ConvertError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "invalid utf8",
        ))
    })
}

/// Write a string as a u64 length prefix plus raw UTF-8 bytes, no NUL.
pub fn write_string<W: Write>(w: &mut W, s: &str) -> Result<(), ConvertError> {
    let b = s.as_bytes();
    w.write_u64::<LittleEndian>(b.len() as u64)?;
    w.write_all(b)?;
    Ok(())
}

/// Read one metadata value for the given wire type tag.
pub fn read_value<R: Read, O: ByteOrder>(
    r: &mut R,
    tag: u32,
    version: u32,
) -> Result<GgufValue, ConvertError> {
    use GgufType as T;
    match tag {
        x if x == T::Uint8 as u32 => Ok(GgufValue::Uint8(r.read_u8()?)),
        x if x == T::Int8 as u32 => Ok(GgufValue::Int8(r.read_i8()?)),
        x if x == T::Uint16 as u32 => Ok(GgufValue::Uint16(r.read_u16::<O>()?)),
        x if x == T::Int16 as u32 => Ok(GgufValue::Int16(r.read_i16::<O>()?)),
        x if x == T::Uint32 as u32 => Ok(GgufValue::Uint32(r.read_u32::<O>()?)),
        x if x == T::Int32 as u32 => Ok(GgufValue::Int32(r.read_i32::<O>()?)),
        x if x == T::Float32 as u32 => Ok(GgufValue::Float32(r.read_f32::<O>()?)),
        x if x == T::Bool as u32 => Ok(GgufValue::Bool(r.read_u8()? != 0)),
        x if x == T::String as u32 => Ok(GgufValue::String(read_string::<R, O>(r, version)?)),
        x if x == T::Uint64 as u32 => Ok(GgufValue::Uint64(r.read_u64::<O>()?)),
        x if x == T::Int64 as u32 => Ok(GgufValue::Int64(r.read_i64::<O>()?)),
        x if x == T::Float64 as u32 => Ok(GgufValue::Float64(r.read_f64::<O>()?)),
        x if x == T::Array as u32 => Ok(GgufValue::Array(read_array::<R, O>(r, version)?)),
        _ => Err(ConvertError::InvalidType(tag)),
    }
}

/// Read a typed array: element tag, length (u32 in v1, u64 otherwise),
/// then the elements.
pub fn read_array<R: Read, O: ByteOrder>(
    r: &mut R,
    version: u32,
) -> Result<GgufArray, ConvertError> {
    let elem = r.read_u32::<O>()?;
    let len = if version == 1 {
        r.read_u32::<O>()? as u64
    } else {
        r.read_u64::<O>()?
    } as usize;

    use GgufType as T;
    macro_rules! elems {
        ($read:expr) => {{
            let mut v = Vec::with_capacity(len);
            for _ in 0..len {
                v.push($read);
            }
            v
        }};
    }

    match elem {
        x if x == T::Uint8 as u32 => Ok(GgufArray::Uint8(elems!(r.read_u8()?))),
        x if x == T::Int8 as u32 => Ok(GgufArray::Int8(elems!(r.read_i8()?))),
        x if x == T::Uint16 as u32 => Ok(GgufArray::Uint16(elems!(r.read_u16::<O>()?))),
        x if x == T::Int16 as u32 => Ok(GgufArray::Int16(elems!(r.read_i16::<O>()?))),
        x if x == T::Uint32 as u32 => Ok(GgufArray::Uint32(elems!(r.read_u32::<O>()?))),
        x if x == T::Int32 as u32 => Ok(GgufArray::Int32(elems!(r.read_i32::<O>()?))),
        x if x == T::Float32 as u32 => Ok(GgufArray::Float32(elems!(r.read_f32::<O>()?))),
        x if x == T::Bool as u32 => Ok(GgufArray::Bool(elems!(r.read_u8()? != 0))),
        x if x == T::String as u32 => {
            Ok(GgufArray::String(elems!(read_string::<R, O>(r, version)?)))
        }
        x if x == T::Uint64 as u32 => Ok(GgufArray::Uint64(elems!(r.read_u64::<O>()?))),
        x if x == T::Int64 as u32 => Ok(GgufArray::Int64(elems!(r.read_i64::<O>()?))),
        x if x == T::Float64 as u32 => Ok(GgufArray::Float64(elems!(r.read_f64::<O>()?))),
        _ => Err(ConvertError::InvalidType(elem)),
    }
}

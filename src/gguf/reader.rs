//! GGUF reader: decodes the header, metadata and tensor descriptors,
//! then seeks past the aligned payload region so callers can keep
//! inspecting the stream.
//!
//! Versions 1, 2 and 3 are accepted; unknown versions above 3 are read
//! with the v3 header layout. Payload bytes are never loaded.

use super::value::{read_string, read_value};
use super::{kind_block_info, pad, GgufValue, KV, GGUF_MAGIC};
use crate::errors::ConvertError;
use byteorder::{BigEndian, ByteOrder, LittleEndian, ReadBytesExt};
use std::io::{Read, Seek, SeekFrom};

/// Descriptor of one tensor as stored in the file. `shape` is kept in
/// on-disk order; the writer reverses dimensions on the way out, so a
/// round-trip observes reversed shapes.
#[derive(Debug, Clone, PartialEq)]
pub struct TensorInfo {
    pub name: String,
    pub kind: u32,
    pub shape: Vec<u64>,
    pub offset: u64,
}

impl TensorInfo {
    /// Number of elements (product of the shape).
    pub fn elements(&self) -> u64 {
        self.shape.iter().product()
    }

    /// On-disk payload size in bytes.
    pub fn size(&self) -> Result<u64, ConvertError> {
        let (block, type_size) = kind_block_info(self.kind)?;
        Ok(self.elements() / block * type_size)
    }
}

/// A decoded GGUF file: metadata plus tensor descriptors.
pub struct Gguf {
    pub version: u32,
    pub kv: KV,
    pub tensors: Vec<TensorInfo>,
}

/// Decode a GGUF stream from the start, consuming the magic and
/// detecting byte order from it.
pub fn decode<R: Read + Seek>(r: &mut R) -> Result<Gguf, ConvertError> {
    let mut magic = [0u8; 4];
    r.read_exact(&mut magic)?;
    if magic == GGUF_MAGIC {
        decode_gguf::<R, LittleEndian>(r)
    } else if magic == [b'F', b'U', b'G', b'G'] {
        decode_gguf::<R, BigEndian>(r)
    } else {
        Err(ConvertError::InvalidMagic(magic))
    }
}

fn decode_gguf<R: Read + Seek, O: ByteOrder>(r: &mut R) -> Result<Gguf, ConvertError> {
    let version = r.read_u32::<O>()?;

    let (num_tensor, num_kv) = match version {
        1 => (r.read_u32::<O>()? as u64, r.read_u32::<O>()? as u64),
        _ => (r.read_u64::<O>()?, r.read_u64::<O>()?),
    };

    let mut kv = KV::new();
    for _ in 0..num_kv {
        let key = read_string::<R, O>(r, version)?;
        let tag = r.read_u32::<O>()?;
        let value = read_value::<R, O>(r, tag, version)?;
        kv.insert(key, value);
    }

    let mut tensors = Vec::with_capacity(num_tensor as usize);
    let mut parameters = 0u64;
    for _ in 0..num_tensor {
        let name = read_string::<R, O>(r, version)?;
        let dims = r.read_u32::<O>()?;

        let mut shape = Vec::with_capacity(dims as usize);
        for _ in 0..dims {
            shape.push(r.read_u64::<O>()?);
        }

        let kind = r.read_u32::<O>()?;
        let offset = r.read_u64::<O>()?;

        let tensor = TensorInfo {
            name,
            kind,
            shape,
            offset,
        };
        parameters += tensor.elements();
        tensors.push(tensor);
    }

    // patch KV with the derived parameter count
    kv.insert(
        "general.parameter_count".to_string(),
        GgufValue::Uint64(parameters),
    );

    let alignment = kv
        .get("general.alignment")
        .and_then(GgufValue::as_u32)
        .map(u64::from)
        .unwrap_or(32);

    let offset = r.stream_position()?;
    r.seek(SeekFrom::Current(pad(offset, alignment) as i64))?;

    for tensor in &tensors {
        let size = tensor.size()?;
        r.seek(SeekFrom::Current((size + pad(size, alignment)) as i64))?;
    }

    Ok(Gguf {
        version,
        kv,
        tensors,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn v1_string(s: &str) -> Vec<u8> {
        let mut out = (s.len() as u64 + 1).to_le_bytes().to_vec();
        out.extend_from_slice(s.as_bytes());
        out.push(0);
        out
    }

    #[test]
    fn v1_string_values_lose_their_nul() {
        // v1 header: u32 counts; one KV, key "k" -> string "hi"
        let mut buf = GGUF_MAGIC.to_vec();
        buf.extend_from_slice(&1u32.to_le_bytes()); // version
        buf.extend_from_slice(&0u32.to_le_bytes()); // tensors
        buf.extend_from_slice(&1u32.to_le_bytes()); // kv
        buf.extend_from_slice(&v1_string("k"));
        buf.extend_from_slice(&8u32.to_le_bytes()); // String
        buf.extend_from_slice(&v1_string("hi"));

        let gguf = decode(&mut Cursor::new(buf)).unwrap();
        assert_eq!(gguf.version, 1);
        assert_eq!(
            gguf.kv.get("k"),
            Some(&GgufValue::String("hi".to_string()))
        );
    }

    #[test]
    fn unknown_version_uses_v3_layout() {
        let mut buf = GGUF_MAGIC.to_vec();
        buf.extend_from_slice(&42u32.to_le_bytes());
        buf.extend_from_slice(&0u64.to_le_bytes());
        buf.extend_from_slice(&0u64.to_le_bytes());

        let gguf = decode(&mut Cursor::new(buf)).unwrap();
        assert_eq!(gguf.version, 42);
        assert_eq!(
            gguf.kv.get("general.parameter_count"),
            Some(&GgufValue::Uint64(0))
        );
    }

    #[test]
    fn bad_magic_rejected() {
        let buf = b"NOPE".to_vec();
        assert!(matches!(
            decode(&mut Cursor::new(buf)),
            Err(ConvertError::InvalidMagic(_))
        ));
    }

    #[test]
    fn parameter_count_sums_shapes() {
        let mut buf = GGUF_MAGIC.to_vec();
        buf.extend_from_slice(&3u32.to_le_bytes());
        buf.extend_from_slice(&2u64.to_le_bytes()); // tensors
        buf.extend_from_slice(&0u64.to_le_bytes()); // kv
        for (name, dims) in [("a", [4u64, 2]), ("b", [8, 8])] {
            buf.extend_from_slice(&(name.len() as u64).to_le_bytes());
            buf.extend_from_slice(name.as_bytes());
            buf.extend_from_slice(&2u32.to_le_bytes());
            for d in dims {
                buf.extend_from_slice(&d.to_le_bytes());
            }
            buf.extend_from_slice(&0u32.to_le_bytes()); // F32
            buf.extend_from_slice(&0u64.to_le_bytes());
        }
        // payload region: descriptors end wherever they end; the reader
        // seeks past padding and payloads without reading, so an empty
        // tail is fine for a Cursor.

        let gguf = decode(&mut Cursor::new(buf)).unwrap();
        assert_eq!(
            gguf.kv.get("general.parameter_count"),
            Some(&GgufValue::Uint64(4 * 2 + 8 * 8))
        );
        assert_eq!(gguf.tensors.len(), 2);
    }
}

//! Tensor discovery from safetensors checkpoints.
//!
//! A safetensors file is an 8-byte little-endian header length, a JSON
//! map from tensor name to `{dtype, shape, data_offsets}`, then the
//! packed tensor data; `data_offsets` are relative to the end of the
//! header. Sharded checkpoints are handled by parsing every
//! `*.safetensors` file in the directory.

use super::tensors::{SourceDtype, SourceTensor};
use crate::errors::ConvertError;
use byteorder::{LittleEndian, ReadBytesExt};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};

#[derive(Deserialize)]
struct HeaderEntry {
    dtype: String,
    shape: Vec<u64>,
    data_offsets: [u64; 2],
}

/// Discover all tensors under `dir`. Missing checkpoint files is
/// `UnknownTensorFormat`.
pub fn parse_tensors(dir: &Path) -> Result<Vec<SourceTensor>, ConvertError> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext == "safetensors"))
        .collect();
    files.sort();

    if files.is_empty() {
        return Err(ConvertError::UnknownTensorFormat);
    }

    let mut tensors = Vec::new();
    for file in &files {
        tensors.extend(parse_safetensors(file)?);
    }
    Ok(tensors)
}

fn parse_safetensors(path: &Path) -> Result<Vec<SourceTensor>, ConvertError> {
    let mut f = File::open(path)?;
    let header_len = f.read_u64::<LittleEndian>()?;
    let mut header = vec![0u8; header_len as usize];
    f.read_exact(&mut header)?;

    // BTreeMap keeps shard contents in name order
    let entries: BTreeMap<String, serde_json::Value> = serde_json::from_slice(&header)?;
    let base = 8 + header_len;

    let mut tensors = Vec::new();
    for (name, value) in entries {
        if name == "__metadata__" {
            continue;
        }

        let entry: HeaderEntry = serde_json::from_value(value)?;
        let dtype = SourceDtype::from_safetensors(&entry.dtype)?;

        let [start, end] = entry.data_offsets;
        let elements: u64 = entry.shape.iter().product();
        if end < start || end - start != elements * dtype.element_size() as u64 {
            return Err(ConvertError::InvalidTensorData(format!(
                "{name}: data range {start}..{end} does not match shape {:?}",
                entry.shape
            )));
        }

        tensors.push(SourceTensor::from_file(
            name,
            dtype,
            entry.shape,
            path.to_path_buf(),
            base + start,
            end - start,
        ));
    }
    Ok(tensors)
}

/// Serialize an f32 tensor map into safetensors bytes. Test scaffolding
/// for building source checkpoints.
#[cfg(test)]
pub fn build_safetensors(tensors: &[(&str, Vec<u64>, Vec<f32>)]) -> Vec<u8> {
    let mut header = String::from("{");
    let mut data = Vec::new();
    for (i, (name, shape, values)) in tensors.iter().enumerate() {
        let start = data.len();
        for v in values {
            data.extend_from_slice(&v.to_le_bytes());
        }
        if i > 0 {
            header.push(',');
        }
        let dims: Vec<String> = shape.iter().map(|d| d.to_string()).collect();
        header.push_str(&format!(
            r#""{name}":{{"dtype":"F32","shape":[{}],"data_offsets":[{start},{}]}}"#,
            dims.join(","),
            data.len()
        ));
    }
    header.push('}');

    let mut out = (header.len() as u64).to_le_bytes().to_vec();
    out.extend_from_slice(header.as_bytes());
    out.extend_from_slice(&data);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gguf::TensorData;

    #[test]
    fn parses_names_shapes_and_payloads() {
        let dir = tempfile::tempdir().unwrap();
        let bytes = build_safetensors(&[
            ("b.weight", vec![2, 2], vec![4.0, 5.0, 6.0, 7.0]),
            ("a.weight", vec![2], vec![1.0, 2.0]),
        ]);
        fs::write(dir.path().join("model.safetensors"), bytes).unwrap();

        let tensors = parse_tensors(dir.path()).unwrap();
        assert_eq!(tensors.len(), 2);
        assert_eq!(tensors[0].name(), "a.weight");
        assert_eq!(tensors[0].shape(), &[2]);
        assert_eq!(tensors[1].name(), "b.weight");
        assert_eq!(tensors[1].kind(), 0);

        let mut payload = Vec::new();
        tensors[0].write_to(&mut payload).unwrap();
        assert_eq!(payload[..4], 1.0f32.to_le_bytes());
    }

    #[test]
    fn empty_directory_is_unknown_format() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            parse_tensors(dir.path()),
            Err(ConvertError::UnknownTensorFormat)
        ));
    }

    #[test]
    fn mismatched_data_range_rejected() {
        let dir = tempfile::tempdir().unwrap();
        // shape [8] but only 16 payload bytes
        let header = r#"{"a.weight":{"dtype":"F32","shape":[8],"data_offsets":[0,16]}}"#;
        let mut bytes = (header.len() as u64).to_le_bytes().to_vec();
        bytes.extend_from_slice(header.as_bytes());
        bytes.extend_from_slice(&[0u8; 16]);
        fs::write(dir.path().join("model.safetensors"), bytes).unwrap();

        assert!(matches!(
            parse_tensors(dir.path()),
            Err(ConvertError::InvalidTensorData(_))
        ));
    }
}

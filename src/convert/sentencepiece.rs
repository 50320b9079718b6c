//! Minimal SentencePiece model decoding.
//!
//! `tokenizer.model` is a protobuf `ModelProto`. The vocabulary only
//! needs the repeated `SentencePiece` field (piece, score, type), so
//! this walks the protobuf wire format directly rather than pulling in
//! a full protobuf stack. Piece type values match the GGUF token type
//! codes one for one.

use super::tokenizer::{Vocabulary, TOKEN_TYPE_NORMAL};
use crate::errors::ConvertError;
use std::fs;
use std::path::Path;

// ModelProto: repeated SentencePiece pieces = 1
const MODEL_FIELD_PIECES: u64 = 1;
// SentencePiece: string piece = 1, float score = 2, Type type = 3
const PIECE_FIELD_PIECE: u64 = 1;
const PIECE_FIELD_SCORE: u64 = 2;
const PIECE_FIELD_TYPE: u64 = 3;

/// Decode the vocabulary from `<dir>/tokenizer.model`.
pub fn parse_sentencepiece(dir: &Path) -> Result<Vocabulary, ConvertError> {
    let data = fs::read(dir.join("tokenizer.model"))?;

    let mut v = Vocabulary::default();
    let mut pos = 0usize;
    while pos < data.len() {
        let (key, n) = read_varint(&data[pos..])?;
        pos += n;

        if key >> 3 == MODEL_FIELD_PIECES && key & 7 == 2 {
            let (len, n) = read_varint(&data[pos..])?;
            pos += n;
            let end = pos + len as usize;
            if end > data.len() {
                return Err(ConvertError::Truncated);
            }

            let (piece, score, piece_type) = parse_piece(&data[pos..end])?;
            v.tokens.push(piece);
            v.scores.push(score);
            v.types.push(piece_type);
            pos = end;
        } else {
            pos += skip_field(&data[pos..], key & 7)?;
        }
    }

    Ok(v)
}

fn parse_piece(data: &[u8]) -> Result<(String, f32, i32), ConvertError> {
    let mut piece = String::new();
    let mut score = 0f32;
    let mut piece_type = TOKEN_TYPE_NORMAL;

    let mut pos = 0usize;
    while pos < data.len() {
        let (key, n) = read_varint(&data[pos..])?;
        pos += n;

        match (key >> 3, key & 7) {
            (PIECE_FIELD_PIECE, 2) => {
                let (len, n) = read_varint(&data[pos..])?;
                pos += n;
                let end = pos + len as usize;
                if end > data.len() {
                    return Err(ConvertError::Truncated);
                }
                piece = String::from_utf8_lossy(&data[pos..end]).into_owned();
                pos = end;
            }
            (PIECE_FIELD_SCORE, 5) => {
                if pos + 4 > data.len() {
                    return Err(ConvertError::Truncated);
                }
                score = f32::from_le_bytes([
                    data[pos],
                    data[pos + 1],
                    data[pos + 2],
                    data[pos + 3],
                ]);
                pos += 4;
            }
            (PIECE_FIELD_TYPE, 0) => {
                let (t, n) = read_varint(&data[pos..])?;
                pos += n;
                piece_type = t as i32;
            }
            (_, wire) => pos += skip_field(&data[pos..], wire)?,
        }
    }

    Ok((piece, score, piece_type))
}

fn read_varint(data: &[u8]) -> Result<(u64, usize), ConvertError> {
    let mut value = 0u64;
    for (i, b) in data.iter().enumerate().take(10) {
        value |= u64::from(b & 0x7f) << (7 * i);
        if b & 0x80 == 0 {
            return Ok((value, i + 1));
        }
    }
    Err(ConvertError::Truncated)
}

/// Bytes consumed by an unrecognized field of the given wire type.
fn skip_field(data: &[u8], wire: u64) -> Result<usize, ConvertError> {
    match wire {
        0 => {
            let (_, n) = read_varint(data)?;
            Ok(n)
        }
        1 => Ok(8),
        2 => {
            let (len, n) = read_varint(data)?;
            Ok(n + len as usize)
        }
        5 => Ok(4),
        other => Err(ConvertError::InvalidTensorData(format!(
            "unsupported protobuf wire type: {other}"
        ))),
    }
}

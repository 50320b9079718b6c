//! Vocabulary assembly from tokenizer files.
//!
//! `parse_vocabulary` probes `tokenizer.model` (SentencePiece) and then
//! `tokenizer.json` (BPE). Special tokens are resolved separately from
//! `tokenizer_config.json` against the added tokens of
//! `tokenizer.json`.

use super::sentencepiece;
use crate::errors::ConvertError;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs::File;
use std::path::Path;

pub const TOKEN_TYPE_NORMAL: i32 = 1;
pub const TOKEN_TYPE_UNKNOWN: i32 = 2;
pub const TOKEN_TYPE_CONTROL: i32 = 3;
pub const TOKEN_TYPE_USER_DEFINED: i32 = 4;
pub const TOKEN_TYPE_UNUSED: i32 = 5;
pub const TOKEN_TYPE_BYTE: i32 = 6;

/// Parallel token/score/type arrays plus optional BPE merges.
#[derive(Debug, Default, Clone)]
pub struct Vocabulary {
    pub tokens: Vec<String>,
    pub scores: Vec<f32>,
    pub types: Vec<i32>,
    pub merges: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct TokenizerJson {
    #[serde(default)]
    added_tokens: Vec<AddedToken>,
    #[serde(default)]
    model: TokenizerModel,
}

#[derive(Debug, Default, Deserialize)]
struct TokenizerModel {
    #[serde(default)]
    vocab: HashMap<String, i32>,
    #[serde(default)]
    merges: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct AddedToken {
    id: i32,
    content: String,
    #[serde(default)]
    special: bool,
}

/// Parse the tokenizer under `dir`, preferring a SentencePiece model
/// over a BPE tokenizer JSON. Neither present is
/// `UnknownTensorFormat`.
pub fn parse_vocabulary(dir: &Path) -> Result<Vocabulary, ConvertError> {
    if dir.join("tokenizer.model").is_file() {
        return sentencepiece::parse_sentencepiece(dir);
    }
    if dir.join("tokenizer.json").is_file() {
        return parse_bpe_vocabulary(dir);
    }
    Err(ConvertError::UnknownTensorFormat)
}

fn parse_bpe_vocabulary(dir: &Path) -> Result<Vocabulary, ConvertError> {
    let f = File::open(dir.join("tokenizer.json"))?;
    let bpe: TokenizerJson = serde_json::from_reader(f)?;

    // (id, content, user_defined, special)
    let mut tokens: Vec<(i32, String, bool, bool)> = bpe
        .model
        .vocab
        .iter()
        .map(|(content, id)| (*id, content.clone(), false, false))
        .collect();

    for t in &bpe.added_tokens {
        tokens.push((t.id, t.content.clone(), true, t.special));
    }

    tokens.sort_by_key(|(id, ..)| *id);

    let mut v = Vocabulary {
        merges: bpe.model.merges,
        ..Vocabulary::default()
    };
    for (id, content, user_defined, special) in tokens {
        v.tokens.push(content);
        v.scores.push(id as f32);
        v.types.push(if special {
            TOKEN_TYPE_CONTROL
        } else if user_defined {
            TOKEN_TYPE_USER_DEFINED
        } else {
            TOKEN_TYPE_NORMAL
        });
    }

    Ok(v)
}

/// One resolved special token: its logical type, resolved id, content
/// and whether inference should add it automatically.
#[derive(Debug, Clone)]
pub struct SpecialVocabulary {
    pub token_type: String,
    pub id: i32,
    pub content: String,
    pub add_token: bool,
}

impl SpecialVocabulary {
    /// Storage key suffix under `tokenizer.ggml.`.
    pub fn key(&self) -> &str {
        match self.token_type.as_str() {
            "pad" => "padding",
            "unk" => "unknown",
            other => other,
        }
    }
}

/// Resolve the requested special-token types from
/// `tokenizer_config.json` (required), matching contents against the
/// added tokens of `tokenizer.json` (optional). Types whose token
/// cannot be resolved are silently dropped.
pub fn parse_special_vocabulary(
    dir: &Path,
    types: &[&str],
) -> Result<Vec<SpecialVocabulary>, ConvertError> {
    let mut added: HashMap<String, AddedToken> = HashMap::new();
    match File::open(dir.join("tokenizer.json")) {
        Ok(f) => {
            let t: TokenizerJson = serde_json::from_reader(f)?;
            for token in t.added_tokens {
                added.insert(token.content.clone(), token);
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }

    let f = File::open(dir.join("tokenizer_config.json"))?;
    let config: HashMap<String, serde_json::Value> = serde_json::from_reader(f)?;

    let mut svs = Vec::new();
    for t in types {
        let mut add_token = false;
        if let Some(value) = config.get(&format!("add_{t}_token")) {
            add_token = serde_json::from_value(value.clone())?;
        }

        let Some(value) = config.get(&format!("{t}_token")) else {
            continue;
        };

        // either a plain string or an object carrying a content field
        let content = match value {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Object(o) => match o.get("content") {
                Some(serde_json::Value::String(s)) => s.clone(),
                _ => continue,
            },
            _ => continue,
        };

        if let Some(token) = added.get(&content) {
            svs.push(SpecialVocabulary {
                token_type: t.to_string(),
                id: token.id,
                content,
                add_token,
            });
        }
    }

    Ok(svs)
}

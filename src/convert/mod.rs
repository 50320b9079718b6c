//! Checkpoint to GGUF conversion: driver, shared parameters and the
//! per-architecture adapters.

pub mod gemma;
pub mod llama;
pub mod phi;
pub mod safetensors;
pub mod sentencepiece;
pub mod tensors;
pub mod tokenizer;

pub use gemma::Gemma;
pub use llama::Llama;
pub use phi::Phi;
pub use tensors::{Repacker, SourceDtype, SourceTensor};
pub use tokenizer::{SpecialVocabulary, Vocabulary};

use crate::errors::ConvertError;
use crate::gguf::{self, write_gguf, GgufArray, GgufValue, KV};
use serde::Deserialize;
use std::fs;
use std::io::{Seek, Write};
use std::path::Path;
use tracing::warn;

/// Hyperparameters shared by every architecture: the dispatch field and
/// the declared vocabulary size.
#[derive(Debug, Default, Deserialize)]
pub struct Parameters {
    #[serde(default)]
    pub architectures: Vec<String>,
    #[serde(default)]
    pub vocab_size: u32,
}

impl Parameters {
    /// Metadata contributed regardless of architecture: file type,
    /// pretokenizer, the vocabulary arrays and the resolved special
    /// tokens.
    pub fn kv(&self, v: &Vocabulary, svs: &[SpecialVocabulary]) -> KV {
        let mut kv = KV::new();
        kv.insert("general.file_type".into(), GgufValue::Uint32(1));
        kv.insert(
            "tokenizer.ggml.pre".into(),
            GgufValue::String("default".into()),
        );
        kv.insert(
            "tokenizer.ggml.tokens".into(),
            GgufValue::Array(GgufArray::String(v.tokens.clone())),
        );
        kv.insert(
            "tokenizer.ggml.scores".into(),
            GgufValue::Array(GgufArray::Float32(v.scores.clone())),
        );
        kv.insert(
            "tokenizer.ggml.token_type".into(),
            GgufValue::Array(GgufArray::Int32(v.types.clone())),
        );

        for sv in svs {
            kv.insert(
                format!("tokenizer.ggml.{}_token_id", sv.key()),
                GgufValue::Uint32(sv.id as u32),
            );
            kv.insert(
                format!("tokenizer.ggml.add_{}_token", sv.key()),
                GgufValue::Bool(sv.add_token),
            );
        }

        kv
    }
}

/// The capability set every architecture adapter provides.
pub trait Converter {
    /// Canonical metadata for this architecture.
    fn kv(&self, v: &Vocabulary, svs: &[SpecialVocabulary]) -> KV;

    /// Rename source tensors and attach repackers. Tensors whose name
    /// does not fit the architecture's grammar are logged and dropped.
    fn tensors(&self, ts: Vec<SourceTensor>) -> Vec<gguf::Tensor>;

    /// Special-token logical types this architecture resolves.
    fn special_types(&self) -> &'static [&'static str] {
        &["bos", "eos", "unk", "sep", "pad", "cls", "mask"]
    }

    /// Map one source tensor name to its canonical name.
    fn tensor_name(&self, name: &str) -> Result<String, ConvertError>;
}

/// Convert the checkpoint in `dir` into a GGUF v3 stream on `ws`.
pub fn convert<W: Write + Seek>(dir: &Path, ws: &mut W) -> Result<(), ConvertError> {
    let config = fs::read_to_string(dir.join("config.json"))?;
    let params: Parameters = serde_json::from_str(&config)?;

    if params.architectures.is_empty() {
        return Err(ConvertError::UnknownArchitecture);
    }

    let conv: Box<dyn Converter> = match params.architectures[0].as_str() {
        "LlamaForCausalLM" | "MistralForCausalLM" | "MixtralForCausalLM" => {
            Box::new(serde_json::from_str::<Llama>(&config)?)
        }
        "GemmaForCausalLM" => Box::new(serde_json::from_str::<Gemma>(&config)?),
        "PhiForCausalLM" | "Phi3ForCausalLM" => Box::new(serde_json::from_str::<Phi>(&config)?),
        other => return Err(ConvertError::UnsupportedArchitecture(other.to_string())),
    };

    let mut v = tokenizer::parse_vocabulary(dir)?;
    let svs = tokenizer::parse_special_vocabulary(dir, conv.special_types())?;

    let vocab_size = params.vocab_size as usize;
    if vocab_size > v.tokens.len() {
        warn!(
            "vocabulary is smaller than expected ({} < {}), padding with dummy tokens",
            v.tokens.len(),
            vocab_size
        );
        for i in 0..vocab_size - v.tokens.len() {
            v.tokens.push(format!("<dummy{i:05}>"));
            v.scores.push(-1.0);
            v.types.push(tokenizer::TOKEN_TYPE_USER_DEFINED);
        }
    }

    let ts = safetensors::parse_tensors(dir)?;

    write_gguf(ws, &conv.kv(&v, &svs), conv.tensors(ts))
}

/// Map a `model.*`-style source tensor name onto the canonical GGUF
/// name. Shared by the Llama and Gemma adapters.
pub(crate) fn canonical_tensor_name(name: &str) -> Result<String, ConvertError> {
    let invalid = || ConvertError::InvalidTensorName(name.to_string());

    let (stem, suffix) = name.rsplit_once('.').ok_or_else(invalid)?;
    if suffix != "weight" {
        return Err(invalid());
    }

    if stem == "lm_head" {
        return Ok("output.weight".to_string());
    }

    let (prefix, rest) = stem.split_once('.').ok_or_else(invalid)?;
    if prefix != "model" {
        return Err(invalid());
    }

    match rest {
        "embed_tokens" => return Ok("token_embd.weight".to_string()),
        "norm" => return Ok("output_norm.weight".to_string()),
        _ => {}
    }

    let (layers, rest) = rest.split_once('.').ok_or_else(invalid)?;
    if layers != "layers" {
        return Err(invalid());
    }

    let (layer, which) = rest.split_once('.').ok_or_else(invalid)?;
    if layer.parse::<u32>().is_err() {
        return Err(invalid());
    }

    let canonical = match which {
        "input_layernorm" => "attn_norm",
        "self_attn.q_proj" => "attn_q",
        "self_attn.k_proj" => "attn_k",
        "self_attn.v_proj" => "attn_v",
        "self_attn.o_proj" => "attn_output",
        "mlp.gate_proj" => "ffn_gate",
        "mlp.down_proj" => "ffn_down",
        "mlp.up_proj" => "ffn_up",
        "post_attention_layernorm" => "ffn_norm",
        _ => return Err(invalid()),
    };

    Ok(format!("blk.{layer}.{canonical}.weight"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_names() {
        let cases = [
            ("lm_head.weight", "output.weight"),
            ("model.embed_tokens.weight", "token_embd.weight"),
            ("model.norm.weight", "output_norm.weight"),
            ("model.layers.0.input_layernorm.weight", "blk.0.attn_norm.weight"),
            ("model.layers.3.self_attn.q_proj.weight", "blk.3.attn_q.weight"),
            ("model.layers.3.self_attn.k_proj.weight", "blk.3.attn_k.weight"),
            ("model.layers.3.self_attn.v_proj.weight", "blk.3.attn_v.weight"),
            (
                "model.layers.12.self_attn.o_proj.weight",
                "blk.12.attn_output.weight",
            ),
            ("model.layers.1.mlp.gate_proj.weight", "blk.1.ffn_gate.weight"),
            ("model.layers.1.mlp.down_proj.weight", "blk.1.ffn_down.weight"),
            ("model.layers.1.mlp.up_proj.weight", "blk.1.ffn_up.weight"),
            (
                "model.layers.1.post_attention_layernorm.weight",
                "blk.1.ffn_norm.weight",
            ),
        ];
        for (input, expect) in cases {
            assert_eq!(canonical_tensor_name(input).unwrap(), expect, "{input}");
        }
    }

    #[test]
    fn invalid_names_rejected() {
        for name in [
            "lm_head.bias",
            "weight",
            "transformer.h.0.attn.weight",
            "model.layers.x.input_layernorm.weight",
            "model.layers.0.rotary_emb.inv_freq.weight",
            "model.unexpected.weight",
        ] {
            assert!(
                matches!(
                    canonical_tensor_name(name),
                    Err(ConvertError::InvalidTensorName(_))
                ),
                "{name}"
            );
        }
    }
}

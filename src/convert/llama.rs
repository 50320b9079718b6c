//! Llama-family conversion (Llama, Mistral, Mixtral).

use super::tensors::SourceTensor;
use super::tokenizer::{SpecialVocabulary, Vocabulary};
use super::{canonical_tensor_name, Converter, Parameters};
use crate::errors::ConvertError;
use crate::gguf::{GgufArray, GgufValue, Tensor, KV};
use serde::Deserialize;
use tracing::debug;

/// Hyperparameters as they appear in a Llama-family `config.json`,
/// including the older GPT-style aliases some checkpoints carry.
#[derive(Debug, Default, Deserialize)]
pub struct Llama {
    #[serde(flatten)]
    pub params: Parameters,
    #[serde(default)]
    n_layers: u32,
    #[serde(default)]
    num_hidden_layers: u32,
    #[serde(default)]
    n_layer: u32,
    #[serde(default)]
    max_position_embeddings: u32,
    #[serde(default)]
    n_ctx: u32,
    #[serde(default)]
    hidden_size: u32,
    #[serde(default)]
    n_embd: u32,
    #[serde(default)]
    intermediate_size: u32,
    #[serde(default)]
    n_inner: u32,
    #[serde(default)]
    num_attention_heads: u32,
    #[serde(default)]
    n_head: u32,
    #[serde(default)]
    num_key_value_heads: u32,
    #[serde(default)]
    rope_theta: f32,
    #[serde(default)]
    rms_norm_eps: f32,
    #[serde(default)]
    layer_norm_eps: f32,
    #[serde(default)]
    layer_norm_epsilon: f32,
    #[serde(default)]
    norm_epsilon: f32,
    #[serde(default)]
    num_local_experts: u32,
    #[serde(default, rename = "num_experts_per_tok")]
    num_experts_per_token: u32,
}

/// First nonzero value, or zero.
fn or(values: &[u32]) -> u32 {
    values.iter().copied().find(|v| *v != 0).unwrap_or(0)
}

fn or_f32(values: &[f32]) -> f32 {
    values.iter().copied().find(|v| *v != 0.0).unwrap_or(0.0)
}

impl Converter for Llama {
    fn kv(&self, v: &Vocabulary, svs: &[SpecialVocabulary]) -> KV {
        let mut kv = self.params.kv(v, svs);
        kv.insert(
            "general.architecture".into(),
            GgufValue::String("llama".into()),
        );
        kv.insert("general.name".into(), GgufValue::String("llama".into()));

        kv.insert(
            "llama.block_count".into(),
            GgufValue::Uint32(or(&[self.n_layers, self.num_hidden_layers, self.n_layer])),
        );
        kv.insert(
            "llama.vocab_size".into(),
            GgufValue::Uint32(self.params.vocab_size),
        );

        let context_length = or(&[self.max_position_embeddings, self.n_ctx]);
        if context_length > 0 {
            kv.insert(
                "llama.context_length".into(),
                GgufValue::Uint32(context_length),
            );
        }

        let embedding_length = or(&[self.hidden_size, self.n_embd]);
        if embedding_length > 0 {
            kv.insert(
                "llama.embedding_length".into(),
                GgufValue::Uint32(embedding_length),
            );
        }

        let feed_forward_length = or(&[self.intermediate_size, self.n_inner]);
        if feed_forward_length > 0 {
            kv.insert(
                "llama.feed_forward_length".into(),
                GgufValue::Uint32(feed_forward_length),
            );
        }

        let head_count = or(&[self.num_attention_heads, self.n_head]);
        if head_count > 0 {
            kv.insert(
                "llama.attention.head_count".into(),
                GgufValue::Uint32(head_count),
            );
            kv.insert(
                "llama.rope.dimension_count".into(),
                GgufValue::Uint32(self.hidden_size / head_count),
            );
        }

        if self.num_key_value_heads > 0 {
            kv.insert(
                "llama.attention.head_count_kv".into(),
                GgufValue::Uint32(self.num_key_value_heads),
            );
        }

        if self.rope_theta > 0.0 {
            kv.insert(
                "llama.attention.rope_freq_base".into(),
                GgufValue::Float32(self.rope_theta),
            );
        }

        if self.rms_norm_eps > 0.0 {
            kv.insert(
                "llama.attention.layer_norm_rms_epsilon".into(),
                GgufValue::Float32(self.rms_norm_eps),
            );
        }

        let layer_norm_epsilon = or_f32(&[
            self.layer_norm_eps,
            self.layer_norm_epsilon,
            self.norm_epsilon,
        ]);
        if layer_norm_epsilon > 0.0 {
            kv.insert(
                "llama.attention.layer_norm_epsilon".into(),
                GgufValue::Float32(layer_norm_epsilon),
            );
        }

        if self.num_local_experts > 0 {
            kv.insert(
                "llama.attention.expert_count".into(),
                GgufValue::Uint32(self.num_local_experts),
            );
        }

        if self.num_experts_per_token > 0 {
            kv.insert(
                "llama.attention.expert_used_count".into(),
                GgufValue::Uint32(self.num_experts_per_token),
            );
        }

        if !v.merges.is_empty() {
            kv.insert(
                "tokenizer.ggml.merges".into(),
                GgufValue::Array(GgufArray::String(v.merges.clone())),
            );
        }

        kv.insert(
            "tokenizer.ggml.model".into(),
            GgufValue::String("llama".into()),
        );
        kv
    }

    fn tensors(&self, ts: Vec<SourceTensor>) -> Vec<Tensor> {
        let heads = self.num_attention_heads;
        let kv_heads = self.num_key_value_heads;

        let mut out = Vec::new();
        for mut t in ts {
            let name = match self.tensor_name(t.name()) {
                Ok(name) => name,
                Err(_) => {
                    debug!("skipping unknown tensor: {}", t.name());
                    continue;
                }
            };

            if name.ends_with("attn_q.weight") || name.ends_with("attn_k.weight") {
                t.set_repacker(Box::new(move |name, data, shape| {
                    let heads = if name.ends_with("q_proj.weight") {
                        heads
                    } else if name.ends_with("k_proj.weight") {
                        or(&[kv_heads, heads])
                    } else {
                        return Err(ConvertError::InvalidTensorName(name.to_string()));
                    };
                    Ok(permute_qk(heads as usize, &data, shape))
                }));
            }

            out.push(Tensor {
                name,
                kind: t.kind(),
                shape: t.shape().to_vec(),
                offset: 0,
                data: Box::new(t),
            });
        }
        out
    }

    fn tensor_name(&self, name: &str) -> Result<String, ConvertError> {
        canonical_tensor_name(name)
    }
}

/// Undo the interleaved rotary projection layout: view the matrix as
/// `[heads, 2, rows/heads/2, cols]`, swap the middle axes, then
/// transpose the flattened `[rows, cols]` matrix.
fn permute_qk(heads: usize, data: &[f32], shape: &[u64]) -> Vec<f32> {
    let dims: Vec<usize> = shape
        .iter()
        .filter(|d| **d != 0)
        .map(|d| *d as usize)
        .collect();
    let rows = dims[0];
    let cols: usize = dims[1..].iter().product();
    let half = rows / heads / 2;

    let mut permuted = vec![0f32; data.len()];
    for h in 0..heads {
        for t in 0..2 {
            for r in 0..half {
                let src = ((h * 2 + t) * half + r) * cols;
                let dst = ((h * half + r) * 2 + t) * cols;
                permuted[dst..dst + cols].copy_from_slice(&data[src..src + cols]);
            }
        }
    }

    let mut out = vec![0f32; data.len()];
    for i in 0..rows {
        for j in 0..cols {
            out[j * rows + i] = permuted[i * cols + j];
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(json: &str) -> Llama {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn kv_for_minimal_config() {
        let p = params(
            r#"{
                "architectures": ["LlamaForCausalLM"],
                "vocab_size": 32,
                "num_hidden_layers": 1,
                "hidden_size": 8,
                "num_attention_heads": 2,
                "num_key_value_heads": 2,
                "intermediate_size": 16
            }"#,
        );
        let kv = p.kv(&Vocabulary::default(), &[]);

        assert_eq!(
            kv.get("general.architecture"),
            Some(&GgufValue::String("llama".into()))
        );
        assert_eq!(kv.get("llama.vocab_size"), Some(&GgufValue::Uint32(32)));
        assert_eq!(kv.get("llama.block_count"), Some(&GgufValue::Uint32(1)));
        assert_eq!(
            kv.get("llama.rope.dimension_count"),
            Some(&GgufValue::Uint32(4))
        );
        assert_eq!(
            kv.get("llama.attention.head_count_kv"),
            Some(&GgufValue::Uint32(2))
        );
        // zero/absent parameters stay out
        assert!(!kv.contains_key("llama.context_length"));
        assert!(!kv.contains_key("llama.attention.rope_freq_base"));
        assert!(!kv.contains_key("tokenizer.ggml.merges"));
        assert_eq!(
            kv.get("tokenizer.ggml.model"),
            Some(&GgufValue::String("llama".into()))
        );
    }

    #[test]
    fn kv_honors_aliases() {
        let p = params(
            r#"{
                "vocab_size": 8,
                "n_layer": 2,
                "n_ctx": 1024,
                "n_embd": 16,
                "n_inner": 64,
                "n_head": 4,
                "rope_theta": 10000.0,
                "layer_norm_epsilon": 1e-5
            }"#,
        );
        let kv = p.kv(&Vocabulary::default(), &[]);
        assert_eq!(kv.get("llama.block_count"), Some(&GgufValue::Uint32(2)));
        assert_eq!(
            kv.get("llama.context_length"),
            Some(&GgufValue::Uint32(1024))
        );
        assert_eq!(
            kv.get("llama.embedding_length"),
            Some(&GgufValue::Uint32(16))
        );
        assert_eq!(
            kv.get("llama.feed_forward_length"),
            Some(&GgufValue::Uint32(64))
        );
        assert_eq!(
            kv.get("llama.attention.rope_freq_base"),
            Some(&GgufValue::Float32(10000.0))
        );
        assert_eq!(
            kv.get("llama.attention.layer_norm_epsilon"),
            Some(&GgufValue::Float32(1e-5))
        );
    }

    #[test]
    fn permute_qk_matches_reference() {
        // [4, 4] with 2 heads: the head split leaves the data in place
        // and the final transpose reorders it column-first
        let data: Vec<f32> = (0..16).map(|i| i as f32).collect();
        let out = permute_qk(2, &data, &[4, 4]);
        assert_eq!(out[0], 0.0);
        assert_eq!(out[8], 2.0);
        assert_eq!(
            out,
            vec![
                0.0, 4.0, 8.0, 12.0, 1.0, 5.0, 9.0, 13.0, 2.0, 6.0, 10.0, 14.0, 3.0, 7.0,
                11.0, 15.0
            ]
        );
    }

    #[test]
    fn permute_qk_interleaves_larger_heads() {
        // [8, 1] with 2 heads: half = 2, so rows reorder within each
        // head as (0, 2, 1, 3) before the transpose
        let data: Vec<f32> = (0..8).map(|i| i as f32).collect();
        let out = permute_qk(2, &data, &[8, 1]);
        assert_eq!(out, vec![0.0, 2.0, 1.0, 3.0, 4.0, 6.0, 5.0, 7.0]);
    }

    #[test]
    fn unknown_tensors_are_dropped() {
        let p = params(r#"{"num_attention_heads": 2}"#);
        let ts = vec![
            SourceTensor::from_f32("model.embed_tokens.weight".into(), vec![2, 2], &[0.0; 4]),
            SourceTensor::from_f32("model.rotary.inv_freq".into(), vec![2], &[0.0; 2]),
        ];
        let out = p.tensors(ts);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].name, "token_embd.weight");
    }
}

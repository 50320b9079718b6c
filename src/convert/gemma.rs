//! Gemma conversion.

use super::tensors::SourceTensor;
use super::tokenizer::{SpecialVocabulary, Vocabulary};
use super::{canonical_tensor_name, Converter, Parameters};
use crate::errors::ConvertError;
use crate::gguf::{GgufValue, Tensor, KV};
use serde::Deserialize;
use tracing::debug;

#[derive(Debug, Default, Deserialize)]
pub struct Gemma {
    #[serde(flatten)]
    pub params: Parameters,
    #[serde(default)]
    max_position_embeddings: u32,
    #[serde(default)]
    hidden_size: u32,
    #[serde(default)]
    num_hidden_layers: u32,
    #[serde(default)]
    intermediate_size: u32,
    #[serde(default)]
    num_attention_heads: u32,
    #[serde(default)]
    num_key_value_heads: u32,
    #[serde(default)]
    rms_norm_eps: f32,
    #[serde(default)]
    head_dim: u32,
}

impl Converter for Gemma {
    fn kv(&self, v: &Vocabulary, svs: &[SpecialVocabulary]) -> KV {
        let mut kv = self.params.kv(v, svs);
        kv.insert(
            "general.architecture".into(),
            GgufValue::String("gemma".into()),
        );
        kv.insert("general.name".into(), GgufValue::String("gemma".into()));
        kv.insert(
            "gemma.context_length".into(),
            GgufValue::Uint32(self.max_position_embeddings),
        );
        kv.insert(
            "gemma.embedding_length".into(),
            GgufValue::Uint32(self.hidden_size),
        );
        kv.insert(
            "gemma.block_count".into(),
            GgufValue::Uint32(self.num_hidden_layers),
        );
        kv.insert(
            "gemma.feed_forward_length".into(),
            GgufValue::Uint32(self.intermediate_size),
        );
        kv.insert(
            "gemma.attention.head_count".into(),
            GgufValue::Uint32(self.num_attention_heads),
        );
        kv.insert(
            "gemma.attention.head_count_kv".into(),
            GgufValue::Uint32(self.num_key_value_heads),
        );
        kv.insert(
            "gemma.attention.layer_norm_rms_epsilon".into(),
            GgufValue::Float32(self.rms_norm_eps),
        );
        kv.insert(
            "gemma.attention.key_length".into(),
            GgufValue::Uint32(self.head_dim),
        );
        kv.insert(
            "gemma.attention.value_length".into(),
            GgufValue::Uint32(self.head_dim),
        );
        kv.insert(
            "tokenizer.ggml.model".into(),
            GgufValue::String("llama".into()),
        );
        kv.insert("tokenizer.ggml.eot_token_id".into(), GgufValue::Uint32(107));
        kv.insert(
            "tokenizer.ggml.middle_token_id".into(),
            GgufValue::Uint32(68),
        );
        kv.insert(
            "tokenizer.ggml.prefix_token_id".into(),
            GgufValue::Uint32(67),
        );
        kv.insert(
            "tokenizer.ggml.suffix_token_id".into(),
            GgufValue::Uint32(69),
        );
        kv
    }

    fn tensors(&self, ts: Vec<SourceTensor>) -> Vec<Tensor> {
        let mut out = Vec::new();
        for mut t in ts {
            let name = match self.tensor_name(t.name()) {
                Ok(name) => name,
                Err(_) => {
                    debug!("skipping unknown tensor: {}", t.name());
                    continue;
                }
            };

            // gemma checkpoints store norm weights as (w - 1)
            if name.ends_with("_norm.weight") {
                t.set_repacker(Box::new(|_, data, _| {
                    Ok(data.into_iter().map(|x| x + 1.0).collect())
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gguf::TensorData;

    #[test]
    fn kv_always_emits_head_dims_and_fixed_token_ids() {
        let g: Gemma = serde_json::from_str(
            r#"{"vocab_size": 16, "head_dim": 32, "num_hidden_layers": 2}"#,
        )
        .unwrap();
        let kv = g.kv(&Vocabulary::default(), &[]);

        assert_eq!(
            kv.get("general.architecture"),
            Some(&GgufValue::String("gemma".into()))
        );
        assert_eq!(
            kv.get("gemma.attention.key_length"),
            Some(&GgufValue::Uint32(32))
        );
        assert_eq!(
            kv.get("gemma.attention.value_length"),
            Some(&GgufValue::Uint32(32))
        );
        assert_eq!(
            kv.get("tokenizer.ggml.eot_token_id"),
            Some(&GgufValue::Uint32(107))
        );
        assert_eq!(
            kv.get("tokenizer.ggml.middle_token_id"),
            Some(&GgufValue::Uint32(68))
        );
        assert_eq!(
            kv.get("tokenizer.ggml.prefix_token_id"),
            Some(&GgufValue::Uint32(67))
        );
        assert_eq!(
            kv.get("tokenizer.ggml.suffix_token_id"),
            Some(&GgufValue::Uint32(69))
        );
        // unconditional even when zero, unlike the llama adapter
        assert_eq!(kv.get("gemma.context_length"), Some(&GgufValue::Uint32(0)));
    }

    #[test]
    fn norm_weights_gain_one() {
        let g = Gemma::default();
        let ts = vec![SourceTensor::from_f32(
            "model.layers.0.input_layernorm.weight".into(),
            vec![4],
            &[0.0, 0.5, -1.0, 2.0],
        )];
        let out = g.tensors(ts);
        assert_eq!(out[0].name, "blk.0.attn_norm.weight");

        let mut payload = Vec::new();
        out[0].data.write_to(&mut payload).unwrap();
        let values: Vec<f32> = payload
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        assert_eq!(values, vec![1.0, 1.5, 0.0, 3.0]);
    }

    #[test]
    fn projection_weights_pass_through() {
        let g = Gemma::default();
        let ts = vec![SourceTensor::from_f32(
            "model.layers.0.self_attn.v_proj.weight".into(),
            vec![2, 2],
            &[1.0, 2.0, 3.0, 4.0],
        )];
        let out = g.tensors(ts);

        let mut payload = Vec::new();
        out[0].data.write_to(&mut payload).unwrap();
        assert_eq!(payload[..4], 1.0f32.to_le_bytes());
    }
}

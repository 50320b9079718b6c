//! Phi conversion. Metadata only; Phi tensors are not transformed.

use super::tensors::SourceTensor;
use super::tokenizer::{SpecialVocabulary, Vocabulary};
use super::{Converter, Parameters};
use crate::errors::ConvertError;
use crate::gguf::{GgufValue, Tensor, KV};
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
pub struct Phi {
    #[serde(flatten)]
    pub params: Parameters,
}

impl Converter for Phi {
    fn kv(&self, v: &Vocabulary, svs: &[SpecialVocabulary]) -> KV {
        let mut kv = self.params.kv(v, svs);
        kv.insert(
            "general.architecture".into(),
            GgufValue::String("phi".into()),
        );
        kv.insert(
            "tokenizer.ggml.model".into(),
            GgufValue::String("llama".into()),
        );
        kv
    }

    fn tensors(&self, _ts: Vec<SourceTensor>) -> Vec<Tensor> {
        Vec::new()
    }

    fn tensor_name(&self, name: &str) -> Result<String, ConvertError> {
        Ok(name.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kv_is_minimal() {
        let p = Phi::default();
        let kv = p.kv(&Vocabulary::default(), &[]);
        assert_eq!(
            kv.get("general.architecture"),
            Some(&GgufValue::String("phi".into()))
        );
        assert_eq!(
            kv.get("tokenizer.ggml.model"),
            Some(&GgufValue::String("llama".into()))
        );
        assert!(!kv.contains_key("general.name"));
    }

    #[test]
    fn tensors_are_not_emitted() {
        let p = Phi::default();
        let ts = vec![SourceTensor::from_f32("x.weight".into(), vec![1], &[0.0])];
        assert!(p.tensors(ts).is_empty());
    }
}

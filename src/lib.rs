//! # ggufize
//!
//! Convert Hugging Face checkpoints into GGUF v3 model files in pure Rust.
//!
//! ## Architecture
//!
//! - **GGUF codec**: bit-exact reader (v1/v2/v3, both byte orders) and
//!   v3 little-endian writer with deterministic key and tensor ordering
//! - **Adapters**: per-family metadata mapping and tensor renaming for
//!   Llama/Mistral/Mixtral, Gemma and Phi, with write-time repacking of
//!   attention projections and norm weights
//! - **Vocabulary**: BPE (`tokenizer.json`) and SentencePiece
//!   (`tokenizer.model`) assembly plus special-token resolution

pub mod convert;
pub mod errors;
pub mod gguf;

pub use convert::{convert, Converter, Parameters, SourceTensor, Vocabulary};
pub use errors::ConvertError;
pub use gguf::{decode, write_gguf, Gguf, GgufArray, GgufValue, Tensor, TensorInfo, KV};

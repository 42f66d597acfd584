pub mod bi_encoder;
pub mod embedder;
pub mod tokenize;

pub use bi_encoder::{BiEncoderModel, OnnxBackend};
pub use embedder::{l2_normalize, Device, EmbeddingBackend, EmbeddingConfig, TextEmbedder};
pub use tokenize::TokenizerWrapper;

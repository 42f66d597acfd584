//! Pluggable embedding backend.
//!
//! An [`EmbeddingBackend`] loads a feature-extraction model from an
//! [`EmbeddingConfig`] and hands back a [`TextEmbedder`]. Loading may be slow
//! and may fail; the search layer treats failure as "fuzzy only".

use std::{fmt, path::PathBuf, sync::Arc};

use crate::error::Result;

/// Compute device requested for the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Device {
    Cpu,
    Cuda,
}

impl Device {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "cpu" => Some(Self::Cpu),
            "cuda" | "gpu" => Some(Self::Cuda),
            _ => None,
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => f.write_str("cpu"),
            Device::Cuda => f.write_str("cuda"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    /// Model name; also the directory name under `cache_dir`
    pub model: String,
    pub device: Device,
    /// Directory holding one sub-directory per model
    pub cache_dir: PathBuf,
    /// Tokenizer truncation length
    pub max_sequence_length: usize,
    /// Number of inference sessions kept warm
    pub pool_size: usize,
}

impl EmbeddingConfig {
    pub fn model_dir(&self) -> PathBuf {
        self.cache_dir.join(&self.model)
    }
}

/// Turns text into a fixed-length vector.
pub trait TextEmbedder: Send + Sync {
    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    fn dimension(&self) -> usize;
}

pub trait EmbeddingBackend: Send + Sync {
    /// Load the model. Blocking; call from a blocking context.
    fn load(&self, config: &EmbeddingConfig) -> Result<Arc<dyn TextEmbedder>>;
}

/// Scale `vector` to unit length in place. Zero vectors are left alone.
pub fn l2_normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 && norm.is_finite() {
        for val in vector.iter_mut() {
            *val /= norm;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_l2_normalize_unit_length() {
        let mut v = vec![3.0, 4.0];
        l2_normalize(&mut v);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_l2_normalize_zero_vector() {
        let mut v = vec![0.0; 4];
        l2_normalize(&mut v);
        assert_eq!(v, vec![0.0; 4]);
    }

    #[test]
    fn test_device_parse() {
        assert_eq!(Device::parse("CPU"), Some(Device::Cpu));
        assert_eq!(Device::parse("gpu"), Some(Device::Cuda));
        assert_eq!(Device::parse("tpu"), None);
    }

    #[test]
    fn test_model_dir() {
        let config = EmbeddingConfig {
            model: "bge-small-en-v1.5".into(),
            device: Device::Cpu,
            cache_dir: PathBuf::from("/models"),
            max_sequence_length: 256,
            pool_size: 1,
        };
        assert_eq!(config.model_dir(), PathBuf::from("/models/bge-small-en-v1.5"));
    }
}

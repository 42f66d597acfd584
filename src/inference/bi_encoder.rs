//! ONNX bi-encoder used to embed tool descriptions and queries.
//!
//! Query and documents are encoded independently, so document vectors can be
//! computed once at indexing time and cached. Output is mean-pooled over
//! non-padding tokens and L2-normalized.

use crate::error::{AppError, Result};
use crate::inference::{
    embedder::{l2_normalize, Device, EmbeddingBackend, EmbeddingConfig, TextEmbedder},
    tokenize::TokenizerWrapper,
};
use crossbeam::queue::ArrayQueue;
use ndarray::Array2;
use ort::{
    session::{builder::GraphOptimizationLevel, Session},
    value::Tensor,
};
use std::{path::Path, sync::Arc};

pub const MODEL_FILE: &str = "model.onnx";
pub const TOKENIZER_FILE: &str = "tokenizer.json";

/// Bi-encoder with a fixed pool of inference sessions.
///
/// Each call checks a session out of the lock-free queue and returns it
/// afterwards, so up to `pool_size` embeddings run in parallel.
pub struct BiEncoderModel {
    sessions: ArrayQueue<Session>,
    tokenizer: TokenizerWrapper,
    embedding_dim: usize,
}

impl BiEncoderModel {
    /// Load `pool_size` sessions plus the tokenizer, then run one warmup
    /// inference to learn the embedding dimension.
    pub fn load(
        model_path: &Path,
        tokenizer_path: &Path,
        max_length: usize,
        pool_size: usize,
    ) -> Result<Self> {
        let pool_size = pool_size.max(1);
        let tokenizer = TokenizerWrapper::load(tokenizer_path, max_length)?;

        let sessions = ArrayQueue::new(pool_size);
        for i in 0..pool_size {
            let session = Session::builder()
                .map_err(|e| AppError::ModelError(e.to_string()))?
                .with_optimization_level(GraphOptimizationLevel::Level3)
                .map_err(|e| AppError::ModelError(e.to_string()))?
                .with_intra_threads(1)
                .map_err(|e| AppError::ModelError(e.to_string()))?
                .commit_from_file(model_path)
                .map_err(|e| {
                    AppError::ModelError(format!("Failed to load embedding model: {}", e))
                })?;

            sessions.push(session).map_err(|_| {
                AppError::ModelError(format!("Failed to add session {} to pool", i))
            })?;
        }

        let mut model = Self {
            sessions,
            tokenizer,
            embedding_dim: 0,
        };

        let warmup = model.encode_batch(&["warmup".to_string()])?;
        model.embedding_dim = warmup.ncols();

        tracing::info!(
            model = %model_path.display(),
            pool_size,
            max_length,
            dimension = model.embedding_dim,
            "Embedding model loaded"
        );

        Ok(model)
    }

    /// Run `f` with a session checked out of the pool.
    fn with_session<T>(&self, f: impl FnOnce(&mut Session) -> Result<T>) -> Result<T> {
        let mut session = self
            .sessions
            .pop()
            .ok_or_else(|| AppError::ResourceError("No available sessions in pool".into()))?;
        let result = f(&mut session);
        let _ = self.sessions.push(session);
        result
    }

    /// Encode texts into an array of shape (batch_size, embedding_dim).
    pub fn encode_batch(&self, texts: &[String]) -> Result<Array2<f32>> {
        if texts.is_empty() {
            return Ok(Array2::zeros((0, self.embedding_dim)));
        }

        let (input_ids, attention_mask, token_type_ids) = self.tokenizer.encode_batch(texts)?;
        let (batch_size, seq_len) = input_ids.dim();
        let shape = [batch_size, seq_len];

        let input_ids_tensor =
            Tensor::from_array((shape, input_ids.iter().copied().collect::<Vec<_>>()))
                .map_err(|e| AppError::ModelError(e.to_string()))?;
        let attention_mask_tensor =
            Tensor::from_array((shape, attention_mask.iter().copied().collect::<Vec<_>>()))
                .map_err(|e| AppError::ModelError(e.to_string()))?;
        let token_type_ids_tensor =
            Tensor::from_array((shape, token_type_ids.iter().copied().collect::<Vec<_>>()))
                .map_err(|e| AppError::ModelError(e.to_string()))?;

        self.with_session(|session| {
            let outputs = session
                .run(ort::inputs![
                    "input_ids" => input_ids_tensor,
                    "attention_mask" => attention_mask_tensor,
                    "token_type_ids" => token_type_ids_tensor,
                ])
                .map_err(|e| AppError::ModelError(format!("Embedding inference failed: {}", e)))?;

            // (batch, seq_len, hidden_size)
            let hidden_state = outputs.get("last_hidden_state").ok_or_else(|| {
                AppError::ModelError("No 'last_hidden_state' output found".to_string())
            })?;

            let (shape_info, data) = hidden_state
                .try_extract_tensor::<f32>()
                .map_err(|e| AppError::ModelError(e.to_string()))?;
            if shape_info.len() != 3 {
                return Err(AppError::ModelError(format!(
                    "Unexpected hidden state rank {}",
                    shape_info.len()
                )));
            }
            let (batch_size, seq_len) = attention_mask.dim();
            if shape_info[0] as usize != batch_size || shape_info[1] as usize != seq_len {
                return Err(AppError::ModelError(format!(
                    "Hidden state shape [{}, {}] does not match input [{}, {}]",
                    shape_info[0], shape_info[1], batch_size, seq_len
                )));
            }
            let hidden_size = shape_info[2] as usize;

            mean_pool(data, &attention_mask, hidden_size)
        })
    }
}

/// Average token vectors where the mask is set, then L2-normalize each row.
fn mean_pool(
    data: &[f32],
    attention_mask: &Array2<i64>,
    hidden_size: usize,
) -> Result<Array2<f32>> {
    let (batch_size, seq_len) = attention_mask.dim();
    let expected = batch_size * seq_len * hidden_size;
    if data.len() != expected {
        return Err(AppError::ModelError(format!(
            "Hidden state holds {} values, expected {}",
            data.len(),
            expected
        )));
    }

    let mut embeddings = Array2::zeros((batch_size, hidden_size));

    for i in 0..batch_size {
        let mut sum = vec![0.0f32; hidden_size];
        let mut count = 0.0f32;

        for j in 0..seq_len {
            if attention_mask[[i, j]] == 1 {
                let base_idx = i * seq_len * hidden_size + j * hidden_size;
                for (k, sum_val) in sum.iter_mut().enumerate() {
                    *sum_val += data[base_idx + k];
                }
                count += 1.0;
            }
        }

        if count > 0.0 {
            for val in sum.iter_mut() {
                *val /= count;
            }
        }
        l2_normalize(&mut sum);

        for (k, val) in sum.into_iter().enumerate() {
            embeddings[[i, k]] = val;
        }
    }

    Ok(embeddings)
}

impl TextEmbedder for BiEncoderModel {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let embeddings = self.encode_batch(&[text.to_string()])?;
        Ok(embeddings.row(0).to_vec())
    }

    fn dimension(&self) -> usize {
        self.embedding_dim
    }
}

/// Loads [`BiEncoderModel`] from `<cache_dir>/<model>/`.
#[derive(Debug, Default, Clone, Copy)]
pub struct OnnxBackend;

impl EmbeddingBackend for OnnxBackend {
    fn load(&self, config: &EmbeddingConfig) -> Result<Arc<dyn TextEmbedder>> {
        if config.device != Device::Cpu {
            return Err(AppError::ModelError(format!(
                "Device '{}' is not supported by this build",
                config.device
            )));
        }

        let dir = config.model_dir();
        let model_path = dir.join(MODEL_FILE);
        let tokenizer_path = dir.join(TOKENIZER_FILE);

        for path in [&model_path, &tokenizer_path] {
            if !path.exists() {
                return Err(AppError::ModelError(format!(
                    "Missing model file {}",
                    path.display()
                )));
            }
        }

        let model = BiEncoderModel::load(
            &model_path,
            &tokenizer_path,
            config.max_sequence_length,
            config.pool_size,
        )?;
        Ok(Arc::new(model))
    }
}

use crate::error::{AppError, Result};
use ndarray::Array2;
use std::path::Path;
use tokenizers::Tokenizer;

pub struct TokenizerWrapper {
    tokenizer: Tokenizer,
    max_length: usize,
}

/// Padded model inputs: (input_ids, attention_mask, token_type_ids).
pub type EncodedBatch = (Array2<i64>, Array2<i64>, Array2<i64>);

impl TokenizerWrapper {
    pub fn load(tokenizer_path: &Path, max_length: usize) -> Result<Self> {
        let tokenizer = Tokenizer::from_file(tokenizer_path)
            .map_err(|e| AppError::TokenizationError(e.to_string()))?;

        tracing::info!(
            path = %tokenizer_path.display(),
            max_length,
            "Tokenizer loaded successfully"
        );

        Ok(Self {
            tokenizer,
            max_length,
        })
    }

    /// Tokenize independent texts into one right-padded batch.
    pub fn encode_batch(&self, texts: &[String]) -> Result<EncodedBatch> {
        if texts.is_empty() {
            return Err(AppError::ValidationError(
                "Nothing to tokenize".to_string(),
            ));
        }

        let batch_size = texts.len();

        let encodings = self
            .tokenizer
            .encode_batch(texts.to_vec(), true)
            .map_err(|e| AppError::TokenizationError(e.to_string()))?;

        // Pad to the longest sequence in the batch, capped at max_length
        let max_len = encodings
            .iter()
            .map(|e| e.get_ids().len().min(self.max_length))
            .max()
            .unwrap_or(0)
            .max(1);

        let mut input_ids = Array2::<i64>::zeros((batch_size, max_len));
        let mut attention_mask = Array2::<i64>::zeros((batch_size, max_len));
        let mut token_type_ids = Array2::<i64>::zeros((batch_size, max_len));

        for (i, encoding) in encodings.iter().enumerate() {
            let ids = encoding.get_ids();
            let mask = encoding.get_attention_mask();
            let types = encoding.get_type_ids();

            let len = ids.len().min(max_len);

            for j in 0..len {
                input_ids[[i, j]] = ids[j] as i64;
                attention_mask[[i, j]] = mask[j] as i64;
                token_type_ids[[i, j]] = types[j] as i64;
            }
        }

        Ok((input_ids, attention_mask, token_type_ids))
    }
}

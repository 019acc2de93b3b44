//! llama-cpp generation engine
//!
//! Owns the llama backend and a loaded model, and runs the bounded greedy
//! decode loop. Each generation call builds a fresh context sized to the
//! prompt plus the requested token budget.

use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use llama_cpp_2::context::params::LlamaContextParams;
use llama_cpp_2::llama_backend::LlamaBackend;
use llama_cpp_2::llama_batch::LlamaBatch;
use llama_cpp_2::model::params::LlamaModelParams;
use llama_cpp_2::model::{AddBos, LlamaModel, Special};
use llama_cpp_2::sampling::LlamaSampler;
use thiserror::Error;

use crate::inference::model::{validate_gguf, GgufMetadata, ModelError};

/// Contexts never get sized below this, even for tiny prompts.
const MIN_CONTEXT: u32 = 512;

/// Engine errors
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Failed to initialize llama backend: {0}")]
    Backend(#[from] llama_cpp_2::LlamaCppError),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error("Failed to load model: {0}")]
    Load(#[from] llama_cpp_2::LlamaModelLoadError),
    #[error("Failed to create context: {0}")]
    Context(#[from] llama_cpp_2::LlamaContextLoadError),
    #[error("Failed to tokenize prompt: {0}")]
    Tokenize(#[from] llama_cpp_2::StringToTokenError),
    #[error("Failed to detokenize output: {0}")]
    Detokenize(#[from] llama_cpp_2::TokenToStringError),
    #[error("Failed to fill batch: {0}")]
    Batch(#[from] llama_cpp_2::llama_batch::BatchAddError),
    #[error("Decode failed: {0}")]
    Decode(#[from] llama_cpp_2::DecodeError),
    #[error("Prompt produced no tokens")]
    EmptyPrompt,
    #[error("Prompt ({prompt_tokens} tokens) plus n-predict ({n_predict}) exceeds the model's context window ({n_ctx_train})")]
    ContextOverflow {
        prompt_tokens: usize,
        n_predict: usize,
        n_ctx_train: u32,
    },
}

/// Parameters for a single generation call
#[derive(Debug, Clone)]
pub struct GenerationParams {
    /// Upper bound on newly generated tokens. Zero means prefill only.
    pub n_predict: usize,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self { n_predict: 32 }
    }
}

/// Result of one generation call
#[derive(Debug)]
pub struct GenerationOutput {
    /// Decoded prompt plus continuation, special tokens stripped
    pub text: String,
    /// Token count of the encoded prompt
    pub prompt_tokens: usize,
    /// Newly generated token count (0..=n_predict)
    pub generated_tokens: usize,
    /// Wall-clock duration of prefill plus decode
    pub duration: Duration,
}

/// Metadata about the currently loaded model
#[derive(Debug, Clone)]
pub struct LoadedModelInfo {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub n_ctx_train: u32,
    pub gguf: GgufMetadata,
}

/// Inference engine wrapping a loaded llama.cpp model.
pub struct LlamaEngine {
    backend: LlamaBackend,
    model: LlamaModel,
    info: LoadedModelInfo,
}

impl LlamaEngine {
    /// Load a GGUF checkpoint from disk.
    ///
    /// Quantization is whatever the checkpoint carries (Q4 variants for
    /// 4-bit weights); llama.cpp dequantizes during the forward pass.
    pub fn load(path: &Path, n_gpu_layers: u32) -> Result<Self, EngineError> {
        let gguf = validate_gguf(path)?;
        tracing::debug!(
            "GGUF v{}: {} tensors, {} metadata keys",
            gguf.version,
            gguf.tensor_count,
            gguf.kv_count
        );

        let backend = LlamaBackend::init()?;
        let model_params = LlamaModelParams::default().with_n_gpu_layers(n_gpu_layers);

        tracing::info!("Loading model from {}", path.display());
        let model = LlamaModel::load_from_file(&backend, path, &model_params)?;

        let size_bytes = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        let info = LoadedModelInfo {
            path: path.to_path_buf(),
            size_bytes,
            n_ctx_train: model.n_ctx_train(),
            gguf,
        };

        Ok(Self {
            backend,
            model,
            info,
        })
    }

    /// Metadata for the loaded model.
    pub fn info(&self) -> &LoadedModelInfo {
        &self.info
    }

    /// Run bounded greedy generation for an already-formatted prompt.
    ///
    /// The prefill decode populates the KV cache; each subsequent step
    /// feeds only the newly sampled token back through the model, reusing
    /// the cached attention state. Generation stops at the model's
    /// end-of-generation token or after `n_predict` new tokens, whichever
    /// comes first. The returned text is the decode of prompt plus
    /// continuation with special tokens skipped.
    pub fn generate(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<GenerationOutput, EngineError> {
        let tokens = self.model.str_to_token(prompt, AddBos::Always)?;
        if tokens.is_empty() {
            return Err(EngineError::EmptyPrompt);
        }
        let prompt_tokens = tokens.len();

        let n_ctx_train = self.info.n_ctx_train.max(MIN_CONTEXT);
        let n_ctx = context_budget(prompt_tokens, params.n_predict, n_ctx_train)?;

        let ctx_params = LlamaContextParams::default()
            .with_n_ctx(NonZeroU32::new(n_ctx))
            .with_n_batch(n_ctx);
        let mut ctx = self.model.new_context(&self.backend, ctx_params)?;

        let mut batch = LlamaBatch::new(n_ctx as usize, 1);
        let last_index = prompt_tokens as i32 - 1;
        for (i, token) in (0_i32..).zip(tokens.iter().copied()) {
            // logits only for the final prompt token
            batch.add(token, i, &[0], i == last_index)?;
        }

        let mut sampler = LlamaSampler::greedy();
        let mut sequence = tokens;

        let started = Instant::now();
        ctx.decode(&mut batch)?;

        let mut n_cur = prompt_tokens as i32;
        while sequence.len() - prompt_tokens < params.n_predict {
            let token = sampler.sample(&ctx, batch.n_tokens() - 1);
            sampler.accept(token);

            if self.model.is_eog_token(token) {
                break;
            }
            sequence.push(token);

            batch.clear();
            batch.add(token, n_cur, &[0], true)?;
            n_cur += 1;
            ctx.decode(&mut batch)?;
        }
        let duration = started.elapsed();

        // Special::Plaintext skips control tokens in the rendering. Bytes
        // are accumulated before UTF-8 conversion because a multi-byte
        // character can span token boundaries.
        let mut bytes = Vec::new();
        for token in &sequence {
            bytes.extend(self.model.token_to_bytes(*token, Special::Plaintext)?);
        }
        let text = String::from_utf8_lossy(&bytes).into_owned();

        let generated_tokens = sequence.len() - prompt_tokens;
        let secs = duration.as_secs_f64();
        if generated_tokens > 0 && secs > 0.0 {
            tracing::info!(
                "generated {} tokens in {:.2}s ({:.1} tok/s)",
                generated_tokens,
                secs,
                generated_tokens as f64 / secs
            );
        }

        Ok(GenerationOutput {
            text,
            prompt_tokens,
            generated_tokens,
            duration,
        })
    }
}

/// Size the context for the prompt plus token budget, or fail if the model
/// cannot hold the request. The sum is computed in u64 so an absurd
/// n-predict cannot wrap below the limit.
fn context_budget(
    prompt_tokens: usize,
    n_predict: usize,
    n_ctx_train: u32,
) -> Result<u32, EngineError> {
    let needed = (prompt_tokens as u64)
        .saturating_add(n_predict as u64)
        .saturating_add(1);
    if needed > u64::from(n_ctx_train) {
        return Err(EngineError::ContextOverflow {
            prompt_tokens,
            n_predict,
            n_ctx_train,
        });
    }
    Ok((needed as u32).max(MIN_CONTEXT))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_params() {
        let params = GenerationParams::default();
        assert_eq!(params.n_predict, 32);
    }

    #[test]
    fn test_context_overflow_message() {
        let err = EngineError::ContextOverflow {
            prompt_tokens: 8000,
            n_predict: 512,
            n_ctx_train: 8192,
        };
        let msg = err.to_string();
        assert!(msg.contains("8000"));
        assert!(msg.contains("512"));
        assert!(msg.contains("8192"));
    }

    #[test]
    fn test_context_budget_small_prompts_get_minimum() {
        assert_eq!(context_budget(4, 8, 8192).unwrap(), MIN_CONTEXT);
    }

    #[test]
    fn test_context_budget_sized_to_request() {
        assert_eq!(context_budget(1000, 200, 8192).unwrap(), 1201);
    }

    #[test]
    fn test_context_budget_overflow() {
        assert!(matches!(
            context_budget(8000, 512, 8192),
            Err(EngineError::ContextOverflow { .. })
        ));
    }

    #[test]
    fn test_context_budget_huge_n_predict_does_not_wrap() {
        assert!(matches!(
            context_budget(10, usize::MAX, 8192),
            Err(EngineError::ContextOverflow { .. })
        ));
    }

    #[test]
    fn test_load_rejects_non_gguf() {
        use std::io::Write;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"not a gguf file at all......").unwrap();
        assert!(matches!(
            LlamaEngine::load(file.path(), 0),
            Err(EngineError::Model(ModelError::BadMagic(_)))
        ));
    }
}

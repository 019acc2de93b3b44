//! glmgen binary
//!
//! Loads a 4-bit quantized GLM-4 checkpoint, wraps the prompt in the GLM-4
//! chat template, generates a bounded continuation, and prints the timing,
//! prompt, and output sections.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use glmgen::inference::{GenerationParams, LlamaEngine};
use glmgen::prompt::format_prompt;
use glmgen::storage::huggingface::{format_size, resolve_model};

/// Predict tokens from a GLM-4 model using 4-bit quantized GGUF weights
#[derive(Parser, Debug)]
#[command(name = "glmgen", version, about)]
struct Cli {
    /// HuggingFace repo id for the GLM-4 model, or path to a local GGUF checkpoint
    #[arg(long, default_value = "THUDM/glm-4-9b-chat")]
    repo_id_or_model_path: String,

    /// Prompt to infer
    #[arg(long, default_value = "AI是什么？")]
    prompt: String,

    /// Max tokens to predict
    #[arg(long, default_value_t = 32)]
    n_predict: usize,

    /// Number of model layers to offload to the GPU
    #[arg(long, default_value_t = 0)]
    n_gpu_layers: u32,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let model_path = resolve_model(&cli.repo_id_or_model_path)
        .await
        .map_err(|e| anyhow!(e))?;

    let engine = LlamaEngine::load(&model_path, cli.n_gpu_layers)
        .with_context(|| format!("failed to load {}", model_path.display()))?;
    let info = engine.info();
    tracing::info!(
        "Loaded {} ({}, context {})",
        info.path.display(),
        format_size(info.size_bytes),
        info.n_ctx_train
    );

    let prompt = format_prompt(&cli.prompt);
    let params = GenerationParams {
        n_predict: cli.n_predict,
    };
    let output = engine.generate(&prompt, &params)?;

    println!("Inference time: {} s", output.duration.as_secs_f64());
    println!("{} Prompt {}", "-".repeat(20), "-".repeat(20));
    println!("{}", prompt);
    println!("{} Output {}", "-".repeat(20), "-".repeat(20));
    println!("{}", output.text);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["glmgen"]);
        assert_eq!(cli.repo_id_or_model_path, "THUDM/glm-4-9b-chat");
        assert_eq!(cli.prompt, "AI是什么？");
        assert_eq!(cli.n_predict, 32);
        assert_eq!(cli.n_gpu_layers, 0);
    }

    #[test]
    fn test_cli_flags() {
        let cli = Cli::parse_from([
            "glmgen",
            "--repo-id-or-model-path",
            "/models/glm4.Q4_K_M.gguf",
            "--prompt",
            "hello",
            "--n-predict",
            "0",
        ]);
        assert_eq!(cli.repo_id_or_model_path, "/models/glm4.Q4_K_M.gguf");
        assert_eq!(cli.prompt, "hello");
        assert_eq!(cli.n_predict, 0);
    }

    #[test]
    fn test_cli_rejects_non_numeric_n_predict() {
        assert!(Cli::try_parse_from(["glmgen", "--n-predict", "lots"]).is_err());
    }
}

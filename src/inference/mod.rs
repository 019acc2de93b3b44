//! LLM inference engine
//!
//! This module handles all interaction with llama-cpp for model loading and
//! bounded text generation.

pub mod engine;
pub mod model;

pub use engine::{EngineError, GenerationOutput, GenerationParams, LlamaEngine, LoadedModelInfo};
pub use model::{validate_gguf, GgufMetadata, ModelError, GGUF_MAGIC};

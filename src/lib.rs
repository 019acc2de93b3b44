//! glmgen library
//!
//! Core library for local GLM-4 text generation with 4-bit quantized GGUF
//! checkpoints. The binary in `main.rs` wires these modules into a single
//! load → format → generate → print pipeline.

pub mod inference;
pub mod prompt;
pub mod storage;

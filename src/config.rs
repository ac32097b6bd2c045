// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Run configuration for the text recognition pipeline
//!
//! The instruction and resize hints are fixed constants of the pipeline.
//! They live here so tests and alternative front ends can override them
//! without touching the pipeline itself.

/// Model loaded by the command line tool
pub const DEFAULT_MODEL_ID: &str = "onnx-community/Qwen2-VL-2B-Instruct";

/// Instruction sent alongside the image
pub const OCR_INSTRUCTION: &str =
    "Recognize all of the text in this image without leaving anything out.";

/// Advisory resize height passed with the image
pub const DEFAULT_RESIZED_HEIGHT: u32 = 800;

/// Advisory resize width passed with the image
pub const DEFAULT_RESIZED_WIDTH: u32 = 840;

/// Hard upper bound on generated tokens
pub const DEFAULT_MAX_NEW_TOKENS: usize = 256;

/// Configuration for a single recognition run
#[derive(Debug, Clone, PartialEq)]
pub struct OcrConfig {
    /// Registry identifier of the vision-language model
    pub model_id: String,
    /// Instruction placed after the image in the user message
    pub instruction: String,
    /// Advisory image height
    pub resized_height: u32,
    /// Advisory image width
    pub resized_width: u32,
    /// Maximum number of tokens to generate
    pub max_new_tokens: usize,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            model_id: DEFAULT_MODEL_ID.to_string(),
            instruction: OCR_INSTRUCTION.to_string(),
            resized_height: DEFAULT_RESIZED_HEIGHT,
            resized_width: DEFAULT_RESIZED_WIDTH,
            max_new_tokens: DEFAULT_MAX_NEW_TOKENS,
        }
    }
}

impl OcrConfig {
    /// Same configuration with a different model identifier
    pub fn with_model_id(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = model_id.into();
        self
    }
}

// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Qwen2-VL vision-language model on ONNX Runtime
//!
//! The export is split into three graphs:
//! - `vision_encoder`: patchified pixels to merged patch features
//! - `embed_tokens`: token ids to embeddings
//! - `decoder_model_merged`: embeddings to logits, with key/value cache

pub mod config;
pub mod decoder;
pub mod encoder;
pub mod model;
pub mod onnx;
pub mod rope;

pub use config::{GenerationConfig, Qwen2VlConfig, QWEN2_VL_MODEL_TYPE};
pub use model::{GenerationTokens, Qwen2VlFiles, Qwen2VlModel};

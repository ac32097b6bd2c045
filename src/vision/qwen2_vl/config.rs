// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Qwen2-VL model configuration (config.json / generation_config.json)

use serde::Deserialize;

/// `model_type` value this crate can drive
pub const QWEN2_VL_MODEL_TYPE: &str = "qwen2_vl";

/// A token id field that may hold one id or a list
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum TokenIds {
    Single(u32),
    Many(Vec<u32>),
}

impl TokenIds {
    pub fn to_vec(&self) -> Vec<u32> {
        match self {
            Self::Single(id) => vec![*id],
            Self::Many(ids) => ids.clone(),
        }
    }
}

/// Vision tower settings used outside the encoder graph
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct VisionConfig {
    #[serde(default = "default_spatial_merge_size")]
    pub spatial_merge_size: usize,
}

fn default_spatial_merge_size() -> usize {
    2
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            spatial_merge_size: default_spatial_merge_size(),
        }
    }
}

/// Fields of config.json the ONNX runtime path needs
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Qwen2VlConfig {
    pub model_type: String,
    pub hidden_size: usize,
    pub num_hidden_layers: usize,
    pub num_attention_heads: usize,
    pub num_key_value_heads: usize,
    #[serde(default)]
    pub eos_token_id: Option<TokenIds>,
    #[serde(default)]
    pub image_token_id: Option<u32>,
    #[serde(default)]
    pub vision_start_token_id: Option<u32>,
    #[serde(default)]
    pub vision_config: VisionConfig,
}

impl Qwen2VlConfig {
    pub fn is_supported(&self) -> bool {
        self.model_type == QWEN2_VL_MODEL_TYPE
    }

    pub fn head_dim(&self) -> usize {
        self.hidden_size / self.num_attention_heads
    }

    pub fn eos_token_ids(&self) -> Vec<u32> {
        self.eos_token_id
            .as_ref()
            .map(TokenIds::to_vec)
            .unwrap_or_default()
    }
}

/// generation_config.json, when the repository ships one
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct GenerationConfig {
    #[serde(default)]
    pub eos_token_id: Option<TokenIds>,
    #[serde(default)]
    pub pad_token_id: Option<u32>,
}

/// End-of-sequence ids from both configs, without duplicates
pub fn merge_eos_ids(config: &Qwen2VlConfig, generation: Option<&GenerationConfig>) -> Vec<u32> {
    let mut ids = config.eos_token_ids();
    if let Some(extra) = generation.and_then(|g| g.eos_token_id.as_ref()) {
        for id in extra.to_vec() {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
    }
    ids
}

// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Preprocessor paired with a loaded model
//!
//! Bundles the tokenizer, chat template, image processor settings and the
//! special token ids the model was trained with.

use std::fmt;

use tokenizers::Tokenizer;
use tracing::debug;

use crate::errors::{GenerationError, LoadError, PreprocessError};
use crate::inference::batch::BatchedInput;
use crate::inference::chat_template::{ChatTemplate, RenderedPrompt, IMAGE_PAD};
use crate::inference::prompt::Message;
use crate::models::device::Device;
use crate::vision::preprocessing::{process_vision_info, ImageProcessorConfig, VisionInputs};

/// Fallback padding token of the Qwen2 vocabulary
pub const ENDOFTEXT: &str = "<|endoftext|>";

/// Text to token id conversion
pub trait TokenCodec: Send + Sync {
    /// Encode without adding special tokens
    fn encode(&self, text: &str) -> tokenizers::Result<Vec<u32>>;

    /// Decode ids, with no whitespace cleanup around punctuation
    fn decode(&self, ids: &[u32], skip_special_tokens: bool) -> tokenizers::Result<String>;

    fn token_to_id(&self, token: &str) -> Option<u32>;
}

// Tokenizer derefs to its implementation, which owns the inherent methods
impl TokenCodec for Tokenizer {
    fn encode(&self, text: &str) -> tokenizers::Result<Vec<u32>> {
        let encoding = (**self).encode(text, false)?;
        Ok(encoding.get_ids().to_vec())
    }

    fn decode(&self, ids: &[u32], skip_special_tokens: bool) -> tokenizers::Result<String> {
        (**self).decode(ids, skip_special_tokens)
    }

    fn token_to_id(&self, token: &str) -> Option<u32> {
        (**self).token_to_id(token)
    }
}

/// Special token ids used while batching and generating
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecialTokens {
    pub image_pad: u32,
    pub pad: u32,
    pub eos: Vec<u32>,
}

impl SpecialTokens {
    /// Look up the ids in `codec`, preferring ids given by the model config
    pub fn resolve(
        codec: &dyn TokenCodec,
        image_token_id: Option<u32>,
        eos: Vec<u32>,
    ) -> Result<Self, LoadError> {
        let image_pad = image_token_id
            .or_else(|| codec.token_to_id(IMAGE_PAD))
            .ok_or_else(|| LoadError::Tokenizer(format!("vocabulary has no {} token", IMAGE_PAD)))?;

        if eos.is_empty() {
            return Err(LoadError::Tokenizer(
                "model declares no end-of-sequence token".to_string(),
            ));
        }

        let pad = codec.token_to_id(ENDOFTEXT).unwrap_or(eos[0]);

        Ok(Self {
            image_pad,
            pad,
            eos,
        })
    }

    pub fn is_eos(&self, token: u32) -> bool {
        self.eos.contains(&token)
    }
}

/// Tokenizer, chat template and image settings for one model
pub struct Preprocessor {
    model_id: String,
    codec: Box<dyn TokenCodec>,
    template: ChatTemplate,
    image_config: ImageProcessorConfig,
    special_tokens: SpecialTokens,
}

impl fmt::Debug for Preprocessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Preprocessor")
            .field("model_id", &self.model_id)
            .field("template", &self.template)
            .field("special_tokens", &self.special_tokens)
            .finish_non_exhaustive()
    }
}

impl Preprocessor {
    pub fn new(
        model_id: impl Into<String>,
        codec: Box<dyn TokenCodec>,
        template: ChatTemplate,
        image_config: ImageProcessorConfig,
        special_tokens: SpecialTokens,
    ) -> Self {
        Self {
            model_id: model_id.into(),
            codec,
            template,
            image_config,
            special_tokens,
        }
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn codec(&self) -> &dyn TokenCodec {
        self.codec.as_ref()
    }

    pub fn template(&self) -> ChatTemplate {
        self.template
    }

    pub fn image_config(&self) -> &ImageProcessorConfig {
        &self.image_config
    }

    pub fn special_tokens(&self) -> &SpecialTokens {
        &self.special_tokens
    }

    /// Render messages with the generation marker appended
    pub fn render(&self, messages: &[Message]) -> RenderedPrompt {
        self.template.render(messages, true)
    }

    /// Fetch, decode and patchify every image in `messages`
    pub fn process_vision(&self, messages: &[Message]) -> Result<VisionInputs, PreprocessError> {
        process_vision_info(messages, &self.image_config)
    }

    /// Expand image placeholders, tokenize and pad into one batch
    ///
    /// Each `<|image_pad|>` placeholder becomes one pad token per merged
    /// patch of the matching image, in order of appearance.
    pub fn batch(
        &self,
        prompts: &[RenderedPrompt],
        vision: VisionInputs,
        device: Device,
    ) -> Result<BatchedInput, GenerationError> {
        let placeholders: usize = prompts.iter().map(RenderedPrompt::image_placeholders).sum();
        if placeholders != vision.images.len() {
            return Err(GenerationError::PlaceholderMismatch {
                placeholders,
                images: vision.images.len(),
            });
        }
        if !vision.videos.is_empty() {
            return Err(GenerationError::Model(
                "video inputs are not supported".to_string(),
            ));
        }

        let merge = self.image_config.merge_size;
        let mut image_tokens = vision.images.iter().map(|image| image.num_tokens(merge));
        let mut rows = Vec::with_capacity(prompts.len());

        for prompt in prompts {
            let mut pieces = prompt.as_str().split(IMAGE_PAD);
            let mut expanded = pieces.next().unwrap_or_default().to_string();
            for piece in pieces {
                let count = image_tokens.next().unwrap_or(0);
                expanded.push_str(&IMAGE_PAD.repeat(count));
                expanded.push_str(piece);
            }

            let ids = self
                .codec
                .encode(&expanded)
                .map_err(|e| GenerationError::Tokenize(e.to_string()))?;
            debug!("Prompt row tokenized to {} ids", ids.len());
            rows.push(ids);
        }

        BatchedInput::new(rows, self.special_tokens.pad, vision.images, device)
    }
}

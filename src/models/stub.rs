// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Deterministic in-process model
//!
//! Answers every prompt with a scripted response. It follows the same echo
//! contract as a real model, so the whole pipeline can run without
//! downloading weights.

use std::collections::HashMap;

use tracing::{debug, info};

use super::device::{Device, Placement, Precision};
use super::preprocessor::{Preprocessor, SpecialTokens, TokenCodec, ENDOFTEXT};
use super::provisioner::{GeneratedSequence, ModelHandle, ModelProvisioner, VisionLanguageModel};
use crate::errors::{GenerationError, LoadError};
use crate::inference::batch::BatchedInput;
use crate::inference::chat_template::{
    ChatTemplate, IMAGE_PAD, IM_END, IM_START, VISION_END, VISION_START,
};
use crate::vision::preprocessing::ImageProcessorConfig;

/// The only identifier the stub provisioner resolves
pub const STUB_MODEL_ID: &str = "stub/vl-ocr";

const SPECIAL_TOKENS: [&str; 6] = [ENDOFTEXT, IM_START, IM_END, VISION_START, VISION_END, IMAGE_PAD];

/// Ids below this value are special tokens, above it `CHAR_BASE + codepoint`
const CHAR_BASE: u32 = 1_000;

/// Character level codec with the Qwen2-VL special tokens
///
/// Every char maps to its own id, so decoding is exact.
#[derive(Debug, Clone)]
pub struct CharCodec {
    specials: HashMap<&'static str, u32>,
}

impl CharCodec {
    pub fn new() -> Self {
        let specials = SPECIAL_TOKENS
            .iter()
            .enumerate()
            .map(|(id, token)| (*token, id as u32))
            .collect();
        Self { specials }
    }

    fn special_text(&self, id: u32) -> Option<&'static str> {
        SPECIAL_TOKENS.get(id as usize).copied()
    }
}

impl Default for CharCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenCodec for CharCodec {
    fn encode(&self, text: &str) -> tokenizers::Result<Vec<u32>> {
        let mut ids = Vec::with_capacity(text.len());
        let mut rest = text;
        'outer: while let Some(ch) = rest.chars().next() {
            for token in SPECIAL_TOKENS {
                if let Some(tail) = rest.strip_prefix(token) {
                    ids.push(self.specials[token]);
                    rest = tail;
                    continue 'outer;
                }
            }
            ids.push(CHAR_BASE + ch as u32);
            rest = &rest[ch.len_utf8()..];
        }
        Ok(ids)
    }

    fn decode(&self, ids: &[u32], skip_special_tokens: bool) -> tokenizers::Result<String> {
        let mut text = String::new();
        for &id in ids {
            if let Some(special) = self.special_text(id) {
                if !skip_special_tokens {
                    text.push_str(special);
                }
                continue;
            }
            let ch = id
                .checked_sub(CHAR_BASE)
                .and_then(char::from_u32)
                .ok_or_else(|| format!("unknown token id {}", id))?;
            text.push(ch);
        }
        Ok(text)
    }

    fn token_to_id(&self, token: &str) -> Option<u32> {
        if let Some(id) = self.specials.get(token) {
            return Some(*id);
        }
        let mut chars = token.chars();
        match (chars.next(), chars.next()) {
            (Some(ch), None) => Some(CHAR_BASE + ch as u32),
            _ => None,
        }
    }
}

/// Preprocessor over [`CharCodec`] with the Qwen2-VL template
pub fn char_preprocessor(model_id: &str) -> Preprocessor {
    let codec = CharCodec::new();
    let eos = vec![codec.specials[IM_END], codec.specials[ENDOFTEXT]];
    let special_tokens = SpecialTokens {
        image_pad: codec.specials[IMAGE_PAD],
        pad: codec.specials[ENDOFTEXT],
        eos,
    };
    Preprocessor::new(
        model_id,
        Box::new(codec),
        ChatTemplate::Qwen2Vl,
        ImageProcessorConfig::default(),
        special_tokens,
    )
}

/// Model that echoes its input and appends a scripted response
#[derive(Debug, Clone)]
pub struct StubModel {
    response: String,
    failure: Option<String>,
    codec: CharCodec,
}

impl StubModel {
    pub fn new(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
            failure: None,
            codec: CharCodec::new(),
        }
    }

    /// A model whose every generation call fails with `message`
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            failure: Some(message.into()),
            ..Self::new("")
        }
    }
}

impl VisionLanguageModel for StubModel {
    fn device(&self) -> Device {
        Device::Cpu
    }

    fn precision(&self) -> Precision {
        Precision::F32
    }

    fn generate(
        &self,
        input: &BatchedInput,
        max_new_tokens: usize,
    ) -> Result<Vec<GeneratedSequence>, GenerationError> {
        if let Some(message) = &self.failure {
            return Err(GenerationError::Model(message.clone()));
        }

        let mut answer = self
            .codec
            .encode(&self.response)
            .map_err(|e| GenerationError::Tokenize(e.to_string()))?;
        answer.push(self.codec.specials[IM_END]);
        answer.truncate(max_new_tokens);

        debug!(
            "Stub generating {} tokens for {} rows",
            answer.len(),
            input.batch_size()
        );

        Ok(input
            .input_ids()
            .iter()
            .map(|row| {
                let mut sequence = row.clone();
                sequence.extend_from_slice(&answer);
                sequence
            })
            .collect())
    }
}

/// Provisioner that resolves only [`STUB_MODEL_ID`]
#[derive(Debug, Clone)]
pub struct StubProvisioner {
    model_id: String,
    response: String,
    failure: Option<String>,
}

impl StubProvisioner {
    pub fn new(response: impl Into<String>) -> Self {
        Self {
            model_id: STUB_MODEL_ID.to_string(),
            response: response.into(),
            failure: None,
        }
    }

    /// Models from this provisioner fail every generation call
    pub fn with_generation_failure(mut self, message: impl Into<String>) -> Self {
        self.failure = Some(message.into());
        self
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }
}

impl ModelProvisioner for StubProvisioner {
    fn load(&self, model_id: &str) -> Result<(ModelHandle, Preprocessor), LoadError> {
        if model_id != self.model_id {
            return Err(LoadError::NotFound(model_id.to_string()));
        }

        let model = match &self.failure {
            Some(message) => StubModel::failing(message.clone()),
            None => StubModel::new(self.response.clone()),
        };
        info!(
            "Stub model {} ready on {}",
            model_id,
            Placement::on(Device::Cpu)
        );

        Ok((
            ModelHandle::new(model_id, Box::new(model)),
            char_preprocessor(model_id),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::provisioner::load_paired;

    #[test]
    fn test_codec_exact_round_trip() {
        let codec = CharCodec::new();
        let text = "TOTAL 12.99\nTHANK YOU ✓";
        let ids = codec.encode(text).unwrap();
        assert_eq!(ids.len(), text.chars().count());
        assert_eq!(codec.decode(&ids, true).unwrap(), text);
    }

    #[test]
    fn test_codec_special_tokens() {
        let codec = CharCodec::new();
        let ids = codec.encode("<|im_start|>user\n<|image_pad|><|image_pad|>").unwrap();
        assert_eq!(ids[0], codec.token_to_id(IM_START).unwrap());
        assert_eq!(ids.len(), 1 + 5 + 2);
        assert_eq!(codec.decode(&ids, true).unwrap(), "user\n");
        assert_eq!(
            codec.decode(&ids, false).unwrap(),
            "<|im_start|>user\n<|image_pad|><|image_pad|>"
        );
    }

    #[test]
    fn test_codec_unknown_id() {
        let codec = CharCodec::new();
        assert!(codec.decode(&[500], true).is_err());
    }

    #[test]
    fn test_stub_echoes_and_appends() {
        let model = StubModel::new("ok");
        let input = BatchedInput::new(vec![vec![1, 2, 3]], 0, Vec::new(), Device::Cpu).unwrap();

        let sequences = model.generate(&input, 16).unwrap();
        assert_eq!(sequences.len(), 1);
        assert_eq!(&sequences[0][..3], &[1, 2, 3]);
        assert_eq!(sequences[0].len(), 3 + 2 + 1);
        assert_eq!(*sequences[0].last().unwrap(), CharCodec::new().specials[IM_END]);
    }

    #[test]
    fn test_stub_respects_token_bound() {
        let model = StubModel::new("a long answer");
        let input = BatchedInput::new(vec![vec![1]], 0, Vec::new(), Device::Cpu).unwrap();
        let sequences = model.generate(&input, 4).unwrap();
        assert_eq!(sequences[0].len(), 1 + 4);
    }

    #[test]
    fn test_provisioner_rejects_unknown_id() {
        let provisioner = StubProvisioner::new("x");
        match provisioner.load("nonexistent-model-id") {
            Err(LoadError::NotFound(id)) => assert_eq!(id, "nonexistent-model-id"),
            other => panic!("expected NotFound, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_provisioner_pairs_identifiers() {
        let provisioner = StubProvisioner::new("x");
        let loaded = load_paired(&provisioner, STUB_MODEL_ID).unwrap();
        assert_eq!(loaded.handle.model_id(), STUB_MODEL_ID);
        assert_eq!(loaded.preprocessor.model_id(), STUB_MODEL_ID);
    }

    #[test]
    fn test_failing_model() {
        let model = StubModel::failing("out of memory");
        let input = BatchedInput::new(vec![vec![1]], 0, Vec::new(), Device::Cpu).unwrap();
        assert!(matches!(
            model.generate(&input, 4),
            Err(GenerationError::Model(message)) if message == "out of memory"
        ));
    }
}

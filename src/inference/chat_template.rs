// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Chat template system for model-specific prompt formatting
//!
//! Vision-language models expect image placeholders at the exact spot the
//! image appears in the conversation. Templates render structured messages
//! to the literal prompt text, without tokenizing.

use std::fmt;

use super::prompt::{ContentPart, Message, Role};

/// Start of a chat turn
pub const IM_START: &str = "<|im_start|>";
/// End of a chat turn
pub const IM_END: &str = "<|im_end|>";
/// Opens an image region
pub const VISION_START: &str = "<|vision_start|>";
/// Closes an image region
pub const VISION_END: &str = "<|vision_end|>";
/// Placeholder expanded to one token per merged image patch
pub const IMAGE_PAD: &str = "<|image_pad|>";

/// System prompt inserted by the Qwen2-VL template when none is given
pub const QWEN2_VL_DEFAULT_SYSTEM: &str = "You are a helpful assistant.";

/// A prompt string produced by a chat template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedPrompt(String);

impl RenderedPrompt {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Number of image placeholders in the prompt
    pub fn image_placeholders(&self) -> usize {
        self.0.matches(IMAGE_PAD).count()
    }
}

impl fmt::Display for RenderedPrompt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Chat template of the supported model family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChatTemplate {
    /// Qwen2-VL: ChatML turns, default system prompt, vision markers for images
    #[default]
    Qwen2Vl,
}

impl ChatTemplate {
    /// Render messages to a prompt string
    ///
    /// With `add_generation_prompt` the assistant turn is opened so the
    /// model knows a response comes next.
    pub fn render(&self, messages: &[Message], add_generation_prompt: bool) -> RenderedPrompt {
        let mut prompt = String::new();

        if messages.first().map(Message::role) != Some(Role::System) {
            push_turn(&mut prompt, Role::System, QWEN2_VL_DEFAULT_SYSTEM);
        }

        for message in messages {
            let mut body = String::new();
            for part in message.content() {
                match part {
                    ContentPart::Image(_) => {
                        body.push_str(VISION_START);
                        body.push_str(IMAGE_PAD);
                        body.push_str(VISION_END);
                    }
                    ContentPart::Text(text) => body.push_str(text),
                }
            }
            push_turn(&mut prompt, message.role(), &body);
        }

        if add_generation_prompt {
            prompt.push_str(IM_START);
            prompt.push_str(Role::Assistant.as_str());
            prompt.push('\n');
        }

        RenderedPrompt(prompt)
    }
}

fn push_turn(prompt: &mut String, role: Role, body: &str) {
    prompt.push_str(&format!("{IM_START}{role}\n{body}{IM_END}\n"));
}

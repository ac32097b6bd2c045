// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Structured multimodal messages
//!
//! A message is a role plus an ordered list of typed content parts. The
//! OCR prompt is always one user message holding one image part followed
//! by one text part.

use std::fmt;

/// Speaker of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    /// Role name as written into chat templates
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference to an image plus advisory resize hints
///
/// The hints are consumed by the vision preprocessor, which may round them
/// to the model's patch grid. They are not a guarantee of output size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageDescriptor {
    source: String,
    resized_height: u32,
    resized_width: u32,
}

impl ImageDescriptor {
    pub fn new(source: impl Into<String>, resized_height: u32, resized_width: u32) -> Self {
        Self {
            source: source.into(),
            resized_height,
            resized_width,
        }
    }

    /// Local path or URL of the image
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn resized_height(&self) -> u32 {
        self.resized_height
    }

    pub fn resized_width(&self) -> u32 {
        self.resized_width
    }
}

/// One typed part of a message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentPart {
    Image(ImageDescriptor),
    Text(String),
}

impl ContentPart {
    pub fn is_image(&self) -> bool {
        matches!(self, Self::Image(_))
    }

    pub fn is_text(&self) -> bool {
        matches!(self, Self::Text(_))
    }
}

/// A chat message, immutable once built
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    role: Role,
    content: Vec<ContentPart>,
}

impl Message {
    pub fn new(role: Role, content: Vec<ContentPart>) -> Self {
        Self { role, content }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn content(&self) -> &[ContentPart] {
        &self.content
    }

    /// Image descriptors in order of appearance
    pub fn images(&self) -> impl Iterator<Item = &ImageDescriptor> {
        self.content.iter().filter_map(|part| match part {
            ContentPart::Image(image) => Some(image),
            ContentPart::Text(_) => None,
        })
    }
}

/// Build the OCR message: one user message, image part first, then the instruction
pub fn build(image_source: &str, instruction: &str, height: u32, width: u32) -> Message {
    Message::new(
        Role::User,
        vec![
            ContentPart::Image(ImageDescriptor::new(image_source, height, width)),
            ContentPart::Text(instruction.to_string()),
        ],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_shape() {
        let message = build("receipt.png", "read it", 800, 840);
        assert_eq!(message.role(), Role::User);
        assert_eq!(message.content().len(), 2);
        assert!(message.content()[0].is_image());
        assert!(message.content()[1].is_text());
    }

    #[test]
    fn test_build_carries_hints() {
        let message = build("https://example.com/r.jpg", "read it", 800, 840);
        let image = message.images().next().expect("image part");
        assert_eq!(image.source(), "https://example.com/r.jpg");
        assert_eq!(image.resized_height(), 800);
        assert_eq!(image.resized_width(), 840);
    }

    #[test]
    fn test_build_keeps_instruction_verbatim() {
        let message = build("a.png", "  line one\nline two ", 28, 28);
        assert_eq!(
            message.content()[1],
            ContentPart::Text("  line one\nline two ".to_string())
        );
    }

    #[test]
    fn test_role_names() {
        assert_eq!(Role::User.as_str(), "user");
        assert_eq!(Role::System.to_string(), "system");
        assert_eq!(Role::Assistant.as_str(), "assistant");
    }
}

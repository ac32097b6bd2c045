// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
// Export all submodules and their public types
pub mod batch;
pub mod chat_template;
pub mod decode;
pub mod engine;
pub mod prompt;
pub mod timing;

// Re-export main types for convenience
pub use batch::BatchedInput;
pub use chat_template::{ChatTemplate, RenderedPrompt};
pub use decode::{decode, split_lines, trim_echo, DecodedText};
pub use engine::{GeneratedRun, InferenceEngine};
pub use prompt::{build, ContentPart, ImageDescriptor, Message, Role};
pub use timing::{timed, Elapsed};

// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
pub mod cli;
pub mod config;
pub mod errors;
pub mod inference;
pub mod models;
pub mod pipeline;
pub mod vision;

// Re-export main types
pub use config::OcrConfig;
pub use errors::{DecodeError, GenerationError, LoadError, OcrError, PreprocessError};
pub use models::{HubProvisioner, ModelProvisioner, StubProvisioner};
pub use pipeline::{OcrPipeline, OcrReport, PipelineStage};

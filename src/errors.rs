// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Error types for the text recognition pipeline
//!
//! One enum per stage. Every variant is fatal for the run:
//! - `LoadError` - model or preprocessor could not be materialized
//! - `PreprocessError` - image could not be fetched, decoded or resized
//! - `GenerationError` - the generation call failed
//! - `DecodeError` - generated sequences violate the echo/trim contract
//!
//! `OcrError` wraps them all for the pipeline and the binary.

use std::path::PathBuf;
use thiserror::Error;

use crate::pipeline::PipelineStage;
use crate::vision::image_utils::ImageError;

/// Failure while resolving or loading the model and its preprocessor
#[derive(Error, Debug)]
pub enum LoadError {
    /// The registry has no such model (or the stub does not know it)
    #[error("Model not found: {0}")]
    NotFound(String),

    /// A file could not be fetched from the model registry
    #[error("Failed to fetch {file} for model {model_id}: {source}")]
    Download {
        model_id: String,
        file: String,
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// A downloaded file could not be read
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A JSON configuration file is malformed
    #[error("Invalid model configuration in {path}: {source}")]
    Config {
        path: PathBuf,
        source: serde_json::Error,
    },

    /// The model family is not one this crate can drive
    #[error("Unsupported model architecture: {0}")]
    UnsupportedArchitecture(String),

    /// The tokenizer failed to load or lacks a required special token
    #[error("Tokenizer error: {0}")]
    Tokenizer(String),

    /// ONNX Runtime rejected a graph (missing provider, out of memory, bad file)
    #[error("Failed to create ONNX session for {path}: {source}")]
    Session { path: PathBuf, source: ort::Error },

    /// Model handle and preprocessor were loaded from different identifiers
    #[error("Model handle loaded from '{model}' but preprocessor from '{preprocessor}'")]
    IdentifierMismatch { model: String, preprocessor: String },
}

/// Failure while fetching or preparing the image
#[derive(Error, Debug)]
pub enum PreprocessError {
    /// The message carries no image part
    #[error("Message contains no image part")]
    MissingImage,

    /// Resize hints must be positive
    #[error("Invalid resize hint {height}x{width}: both dimensions must be positive")]
    InvalidResizeHint { height: u32, width: u32 },

    /// Extreme aspect ratios cannot be patchified
    #[error("Absolute aspect ratio must be smaller than {max}, got {actual:.1}")]
    AspectRatio { max: f64, actual: f64 },

    /// Local file could not be read
    #[error("Failed to read image {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Remote image could not be fetched
    #[error("Failed to fetch image {url}: {source}")]
    Fetch { url: String, source: reqwest::Error },

    /// Remote image body could not be read
    #[error("Failed to read image body from {url}: {source}")]
    FetchBody {
        url: String,
        source: std::io::Error,
    },

    /// Remote server answered with a non-success status
    #[error("Fetching image {url} returned HTTP {status}")]
    HttpStatus { url: String, status: u16 },

    /// Source string is neither a path nor a supported URL
    #[error("Unsupported image source: {0}")]
    UnsupportedSource(String),

    /// Bytes were fetched but are not a usable image
    #[error(transparent)]
    Image(#[from] ImageError),
}

/// Failure during the generation call
#[derive(Error, Debug)]
pub enum GenerationError {
    /// Prompt could not be tokenized
    #[error("Failed to tokenize prompt: {0}")]
    Tokenize(String),

    /// ONNX Runtime failed mid-generation (device memory, kernel fault)
    #[error("Model runtime failure during {stage}: {source}")]
    Runtime {
        stage: &'static str,
        source: ort::Error,
    },

    /// A graph returned a tensor of unexpected shape
    #[error("Unexpected tensor shape from {stage}: {detail}")]
    Shape { stage: &'static str, detail: String },

    /// Number of image pad tokens disagrees with the encoder output
    #[error("Prompt holds {found} image tokens but vision encoder produced {expected} features")]
    ImageTokenMismatch { expected: usize, found: usize },

    /// More or fewer image placeholders than image tensors
    #[error("Prompt holds {placeholders} image placeholders but {images} images were processed")]
    PlaceholderMismatch { placeholders: usize, images: usize },

    /// The model returned a different number of sequences than batch rows
    #[error("Expected {expected} generated sequences, got {actual}")]
    BatchSizeMismatch { expected: usize, actual: usize },

    /// Any other model-side failure
    #[error("Generation failed: {0}")]
    Model(String),
}

/// Generated output violates the echo/trim contract
#[derive(Error, Debug)]
pub enum DecodeError {
    /// Trimming index runs past the end of the generated sequence
    #[error("Cannot trim {input_len} echoed tokens from sequence {index} of length {sequence_len}")]
    TrimOutOfBounds {
        index: usize,
        input_len: usize,
        sequence_len: usize,
    },

    /// One input length is required per generated sequence
    #[error("Got {sequences} generated sequences but {lengths} input lengths")]
    LengthMismatch { sequences: usize, lengths: usize },

    /// The tokenizer could not turn ids back into text
    #[error("Failed to decode tokens: {0}")]
    Tokenizer(String),
}

/// Any fatal pipeline failure
#[derive(Error, Debug)]
pub enum OcrError {
    #[error("Model load failed: {0}")]
    Load(#[from] LoadError),

    #[error("Image preprocessing failed: {0}")]
    Preprocess(#[from] PreprocessError),

    #[error("Text generation failed: {0}")]
    Generation(#[from] GenerationError),

    #[error("Output decoding failed: {0}")]
    Decode(#[from] DecodeError),

    /// The console report could not be written
    #[error("Failed to write report: {0}")]
    Report(#[from] std::io::Error),
}

impl OcrError {
    /// Stage the pipeline was advancing to when the failure happened
    pub fn stage(&self) -> PipelineStage {
        match self {
            Self::Load(_) => PipelineStage::Loading,
            Self::Preprocess(_) => PipelineStage::Preprocessed,
            Self::Generation(_) => PipelineStage::Generating,
            Self::Decode(_) => PipelineStage::Decoded,
            Self::Report(_) => PipelineStage::Reported,
        }
    }
}

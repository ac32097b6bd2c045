// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Model provisioning
//!
//! Resolves a model identifier to a runnable vision-language model and the
//! preprocessor paired with it:
//! - `hub`: Qwen2-VL ONNX exports from the Hugging Face Hub
//! - `stub`: a deterministic in-process model for offline runs and tests

pub mod device;
pub mod hub;
pub mod preprocessor;
pub mod provisioner;
pub mod stub;

pub use device::{Device, Placement, Precision};
pub use hub::HubProvisioner;
pub use preprocessor::{Preprocessor, SpecialTokens, TokenCodec};
pub use provisioner::{
    load_paired, GeneratedSequence, LoadedModel, ModelHandle, ModelProvisioner,
    VisionLanguageModel,
};
pub use stub::{CharCodec, StubModel, StubProvisioner, STUB_MODEL_ID};

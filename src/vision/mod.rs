// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Vision side of the pipeline
//!
//! This module provides:
//! - Image loading from paths, URLs and data URLs
//! - Resizing, normalization and patchification for Qwen2-VL
//! - The Qwen2-VL ONNX model itself

pub mod image_utils;
pub mod preprocessing;
pub mod qwen2_vl;

pub use image_utils::{load_image, ImageError, ImageInfo, ImageSource};
pub use preprocessing::{
    process_vision_info, smart_resize, ImageProcessorConfig, ImageTensors, VisionInputs,
};

// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Qwen2-VL vision encoder
//!
//! Turns patchified pixels into one feature row per merged patch, ready
//! to be spliced into the text embeddings at the image pad positions.

use std::path::Path;

use ndarray::{concatenate, Array2, ArrayView2, Axis, Ix2};
use tracing::{debug, info};

use super::onnx::Graph;
use crate::errors::{GenerationError, LoadError};
use crate::models::device::{Device, Precision};
use crate::vision::preprocessing::ImageTensors;

/// Vision tower exported as `onnx/vision_encoder*.onnx`
#[derive(Debug, Clone)]
pub struct VisionEncoder {
    graph: Graph,
    output_name: String,
}

impl VisionEncoder {
    pub fn load(path: &Path, device: Device, precision: Precision) -> Result<Self, LoadError> {
        info!("Loading Qwen2-VL vision encoder from {}", path.display());
        let graph = Graph::load("vision_encoder", path, device, precision)?;
        let output_name = graph.first_output("image_features");
        Ok(Self { graph, output_name })
    }

    /// Encode all images of a batch into `[sum of merged patches, hidden]`
    pub fn encode(&self, images: &[ImageTensors]) -> Result<Array2<f32>, GenerationError> {
        let views: Vec<ArrayView2<f32>> = images.iter().map(|i| i.pixel_values.view()).collect();
        let pixel_values = concatenate(Axis(0), &views).map_err(|e| GenerationError::Shape {
            stage: "vision_encoder",
            detail: e.to_string(),
        })?;
        let grid_thw = Array2::from_shape_fn((images.len(), 3), |(i, axis)| {
            images[i].grid_thw[axis] as i64
        });
        debug!(
            "Vision encoder input: pixel_values {:?}, {} grids",
            pixel_values.dim(),
            images.len()
        );

        let pixel_values = self.graph.float_input(pixel_values)?;
        let grid_thw = self.graph.int_input(grid_thw)?;

        let mut session = self.graph.lock()?;
        let outputs = session
            .run(ort::inputs![
                "pixel_values" => pixel_values,
                "grid_thw" => grid_thw
            ])
            .map_err(|source| self.graph.runtime_error(source))?;

        let value = outputs
            .get(self.output_name.as_str())
            .ok_or_else(|| self.graph.missing_output(&self.output_name))?;
        let features = self.graph.float_output(value)?;
        let features = match features.ndim() {
            3 if features.shape()[0] == 1 => features.index_axis_move(Axis(0), 0),
            _ => features,
        };
        let shape = features.shape().to_vec();
        let features = features
            .into_dimensionality::<Ix2>()
            .map_err(|_| GenerationError::Shape {
                stage: "vision_encoder",
                detail: format!("expected [tokens, hidden], got {:?}", shape),
            })?;

        debug!("Image features: {:?}", features.dim());
        Ok(features)
    }
}

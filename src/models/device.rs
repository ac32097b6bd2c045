// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Automatic device and precision selection
//!
//! CUDA is used whenever the CUDA execution provider registers on a
//! session, with half precision weights. A runtime built with CUDA support
//! is not enough: its provider library and driver must load too. Otherwise
//! everything runs on CPU in f32.

use std::fmt;

use ort::execution_providers::{
    CPUExecutionProvider, CUDAExecutionProvider, ExecutionProvider, ExecutionProviderDispatch,
};
use ort::session::Session;
use tracing::{info, warn};

/// Compute device a model runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Device {
    Cpu,
    Cuda,
}

impl Device {
    /// Pick CUDA when its execution provider is usable, CPU otherwise
    pub fn detect() -> Self {
        Self::from_cuda_probe(probe_cuda())
    }

    /// Device for the outcome of a CUDA registration attempt
    pub fn from_cuda_probe(probe: Result<(), String>) -> Self {
        match probe {
            Ok(()) => {
                info!("✅ CUDA execution provider registered");
                Self::Cuda
            }
            Err(reason) => {
                info!("CUDA execution provider unusable ({}), using CPU", reason);
                Self::Cpu
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cpu => "cpu",
            Self::Cuda => "cuda",
        }
    }

    /// Providers registered on every session, in priority order
    ///
    /// CPU always comes last so nodes without a CUDA kernel still run.
    pub fn execution_providers(&self) -> Vec<ExecutionProviderDispatch> {
        match self {
            Self::Cpu => vec![CPUExecutionProvider::default().build()],
            Self::Cuda => vec![
                CUDAExecutionProvider::default().build(),
                CPUExecutionProvider::default().build(),
            ],
        }
    }
}

/// Register the CUDA provider on a throwaway session builder
fn probe_cuda() -> Result<(), String> {
    let cuda = CUDAExecutionProvider::default();
    match cuda.is_available() {
        Ok(true) => {}
        Ok(false) => return Err("runtime built without CUDA".to_string()),
        Err(e) => {
            warn!("⚠️  Could not query CUDA execution provider: {}", e);
            return Err(e.to_string());
        }
    }

    let mut builder = Session::builder().map_err(|e| e.to_string())?;
    cuda.register(&mut builder).map_err(|e| e.to_string())
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Numeric precision of model weights and activations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precision {
    F32,
    F16,
}

impl Precision {
    /// Narrowest precision with full kernel coverage on `device`
    pub fn for_device(device: Device) -> Self {
        match device {
            Device::Cuda => Self::F16,
            Device::Cpu => Self::F32,
        }
    }

    /// Suffix of the ONNX export matching this precision
    pub fn onnx_suffix(&self) -> &'static str {
        match self {
            Self::F32 => "",
            Self::F16 => "_fp16",
        }
    }

    /// Repository path of an ONNX graph, e.g. `onnx/embed_tokens_fp16.onnx`
    pub fn onnx_file(&self, stem: &str) -> String {
        format!("onnx/{}{}.onnx", stem, self.onnx_suffix())
    }
}

impl fmt::Display for Precision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::F32 => f.write_str("f32"),
            Self::F16 => f.write_str("f16"),
        }
    }
}

/// Device plus precision a model is materialized with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    pub device: Device,
    pub precision: Precision,
}

impl Placement {
    /// Automatic placement on the best available device
    pub fn auto() -> Self {
        Self::on(Device::detect())
    }

    /// Placement on a fixed device with its matching precision
    pub fn on(device: Device) -> Self {
        Self {
            device,
            precision: Precision::for_device(device),
        }
    }
}

impl fmt::Display for Placement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.device, self.precision)
    }
}

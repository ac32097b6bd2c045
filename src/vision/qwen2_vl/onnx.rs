// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! ONNX Runtime session and tensor helpers shared by the Qwen2-VL graphs

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use half::f16;
use ndarray::{ArrayD, Dimension};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::{DynValue, Value};
use tracing::debug;

use crate::errors::{GenerationError, LoadError};
use crate::models::device::{Device, Precision};

/// Thread-safe handle to one ONNX graph
#[derive(Clone)]
pub struct Graph {
    name: &'static str,
    session: Arc<Mutex<Session>>,
    input_names: Vec<String>,
    output_names: Vec<String>,
    precision: Precision,
}

impl std::fmt::Debug for Graph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Graph")
            .field("name", &self.name)
            .field("inputs", &self.input_names)
            .field("precision", &self.precision)
            .finish_non_exhaustive()
    }
}

impl Graph {
    /// Create a session for `path` with the device's execution providers
    pub fn load(
        name: &'static str,
        path: &Path,
        device: Device,
        precision: Precision,
    ) -> Result<Self, LoadError> {
        if !path.exists() {
            return Err(LoadError::Io {
                path: path.to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "ONNX graph not found"),
            });
        }

        let session_error = |source| LoadError::Session {
            path: path.to_path_buf(),
            source,
        };
        let session = Session::builder()
            .map_err(session_error)?
            .with_execution_providers(device.execution_providers())
            .map_err(session_error)?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(session_error)?
            .with_intra_threads(4)
            .map_err(session_error)?
            .commit_from_file(path)
            .map_err(session_error)?;

        let input_names: Vec<String> = session.inputs.iter().map(|i| i.name.clone()).collect();
        let output_names: Vec<String> = session.outputs.iter().map(|o| o.name.clone()).collect();
        debug!("{} inputs: {:?}", name, input_names);
        debug!("{} outputs: {:?}", name, output_names);

        Ok(Self {
            name,
            session: Arc::new(Mutex::new(session)),
            input_names,
            output_names,
            precision,
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn input_names(&self) -> &[String] {
        &self.input_names
    }

    pub fn output_names(&self) -> &[String] {
        &self.output_names
    }

    pub fn has_input(&self, name: &str) -> bool {
        self.input_names.iter().any(|n| n == name)
    }

    /// First output name, falling back to `default`
    pub fn first_output(&self, default: &str) -> String {
        self.output_names
            .first()
            .cloned()
            .unwrap_or_else(|| default.to_string())
    }

    pub fn lock(&self) -> Result<MutexGuard<'_, Session>, GenerationError> {
        self.session
            .lock()
            .map_err(|_| GenerationError::Model(format!("{} session lock poisoned", self.name)))
    }

    /// Float tensor in this graph's precision
    pub fn float_input<D: Dimension + 'static>(
        &self,
        array: ndarray::Array<f32, D>,
    ) -> Result<DynValue, GenerationError> {
        let value = match self.precision {
            Precision::F32 => Value::from_array(array).map(|v| v.into_dyn()),
            Precision::F16 => Value::from_array(array.mapv(f16::from_f32)).map(|v| v.into_dyn()),
        };
        value.map_err(|source| self.runtime_error(source))
    }

    /// Integer tensor, precision independent
    pub fn int_input<D: Dimension + 'static>(
        &self,
        array: ndarray::Array<i64, D>,
    ) -> Result<DynValue, GenerationError> {
        Value::from_array(array)
            .map(|v| v.into_dyn())
            .map_err(|source| self.runtime_error(source))
    }

    /// Copy a float output into an owned f32 array
    pub fn float_output(&self, value: &DynValue) -> Result<ArrayD<f32>, GenerationError> {
        let array = match self.precision {
            Precision::F32 => value.try_extract_array::<f32>().map(|a| a.to_owned()),
            Precision::F16 => value
                .try_extract_array::<f16>()
                .map(|a| a.mapv(f32::from)),
        };
        array.map_err(|source| self.runtime_error(source))
    }

    pub fn missing_output(&self, name: &str) -> GenerationError {
        GenerationError::Shape {
            stage: self.name,
            detail: format!("missing output {}", name),
        }
    }

    pub fn runtime_error(&self, source: ort::Error) -> GenerationError {
        GenerationError::Runtime {
            stage: self.name,
            source,
        }
    }
}

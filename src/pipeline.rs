// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! One-shot text recognition pipeline
//!
//! Sequences the stages for a single image:
//! `Idle -> Loading -> PromptReady -> Preprocessed -> Generating -> Decoded -> Reported`.
//! Any failure moves to `Failed` and skips every remaining stage. The model
//! is loaded fresh for each run and dropped at the end of it.

use std::fmt;
use std::io::Write;

use tracing::{error, info};

use crate::config::OcrConfig;
use crate::errors::OcrError;
use crate::inference::decode::decode;
use crate::inference::engine::InferenceEngine;
use crate::inference::prompt::build;
use crate::inference::timing::{timed, Elapsed};
use crate::models::provisioner::{load_paired, ModelProvisioner};

/// Status line written before loading
pub const LOADING_LINE: &str = "loading model and preprocessor...";
/// Status line written once loading succeeded
pub const LOADED_LINE: &str = "load complete.";
/// Status line written before generation
pub const STARTING_LINE: &str = "starting text recognition...";

/// Stage of a pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Idle,
    Loading,
    PromptReady,
    Preprocessed,
    Generating,
    Decoded,
    Reported,
    Failed,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Loading => "loading",
            Self::PromptReady => "prompt-ready",
            Self::Preprocessed => "preprocessed",
            Self::Generating => "generating",
            Self::Decoded => "decoded",
            Self::Reported => "reported",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Recognized text of one image and how long generation took
#[derive(Debug, Clone, PartialEq)]
pub struct OcrReport {
    pub elapsed: Elapsed,
    pub lines: Vec<String>,
}

impl OcrReport {
    pub fn elapsed_seconds(&self) -> f64 {
        self.elapsed.as_secs_f64()
    }

    /// Result header
    pub fn header(&self) -> String {
        format!("--- OCR result (elapsed: {}) ---", self.elapsed)
    }

    /// Header followed by one line per recognized line
    pub fn write_to<W: Write>(&self, out: &mut W) -> std::io::Result<()> {
        writeln!(out, "{}", self.header())?;
        for line in &self.lines {
            writeln!(out, "{}", line)?;
        }
        Ok(())
    }
}

/// Drives one image through load, prompt, preprocess, generate and decode
pub struct OcrPipeline<P: ModelProvisioner> {
    provisioner: P,
    config: OcrConfig,
    trace: Vec<PipelineStage>,
}

impl<P: ModelProvisioner> OcrPipeline<P> {
    pub fn new(provisioner: P, config: OcrConfig) -> Self {
        Self {
            provisioner,
            config,
            trace: vec![PipelineStage::Idle],
        }
    }

    pub fn config(&self) -> &OcrConfig {
        &self.config
    }

    /// Stages visited by the last run, in order
    pub fn trace(&self) -> &[PipelineStage] {
        &self.trace
    }

    /// Current stage
    pub fn stage(&self) -> PipelineStage {
        self.trace.last().copied().unwrap_or(PipelineStage::Idle)
    }

    fn advance(&mut self, stage: PipelineStage) {
        info!("Pipeline stage: {}", stage);
        self.trace.push(stage);
    }

    /// Recognize the text in `image_source`, writing the console report to `out`
    pub fn run<W: Write>(&mut self, image_source: &str, out: &mut W) -> Result<OcrReport, OcrError> {
        self.trace = vec![PipelineStage::Idle];
        match self.run_stages(image_source, out) {
            Ok(report) => Ok(report),
            Err(e) => {
                error!("Pipeline failed at {}: {}", e.stage(), e);
                self.trace.push(PipelineStage::Failed);
                Err(e)
            }
        }
    }

    fn run_stages<W: Write>(&mut self, image_source: &str, out: &mut W) -> Result<OcrReport, OcrError> {
        self.advance(PipelineStage::Loading);
        writeln!(out, "{}", LOADING_LINE)?;
        let loaded = load_paired(&self.provisioner, &self.config.model_id)?;
        writeln!(out, "{}", LOADED_LINE)?;

        let message = build(
            image_source,
            &self.config.instruction,
            self.config.resized_height,
            self.config.resized_width,
        );
        let messages = [message];
        let prompt = loaded.preprocessor.render(&messages);
        self.advance(PipelineStage::PromptReady);

        let vision = loaded.preprocessor.process_vision(&messages)?;
        self.advance(PipelineStage::Preprocessed);

        writeln!(out, "{}", STARTING_LINE)?;
        self.advance(PipelineStage::Generating);
        let engine = InferenceEngine::new(&loaded.handle, &loaded.preprocessor);
        let (run, elapsed) = timed(|| engine.generate(&prompt, vision, self.config.max_new_tokens));
        let run = run?;
        info!("Generation finished in {}", elapsed);

        let lines = decode(
            loaded.preprocessor.codec(),
            &run.sequences,
            &run.input_lengths,
        )?;
        self.advance(PipelineStage::Decoded);

        let report = OcrReport { elapsed, lines };
        report.write_to(out)?;
        self.advance(PipelineStage::Reported);
        Ok(report)
    }
}

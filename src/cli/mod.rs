// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use crate::config::OcrConfig;
use crate::models::HubProvisioner;
use crate::pipeline::OcrPipeline;

/// Recognize all text in a document image with a vision-language model
#[derive(Parser, Debug)]
#[command(name = "vl-ocr")]
#[command(version)]
#[command(about = "Extract the text of a document image with Qwen2-VL", long_about = None)]
pub struct Cli {
    /// Local file path, file:// URL, http(s) URL or data URL of the image
    pub image_source: String,
}

/// Run the pipeline for the image named on the command line
pub fn execute(cli: Cli) -> Result<()> {
    let config = OcrConfig::default();
    info!("Recognizing text in {} with {}", cli.image_source, config.model_id);

    let mut pipeline = OcrPipeline::new(HubProvisioner::new(), config);
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let report = pipeline
        .run(&cli.image_source, &mut out)
        .with_context(|| format!("text recognition failed for {}", cli.image_source))?;

    info!(
        "✅ Recognized {} lines in {:.1}s",
        report.lines.len(),
        report.elapsed_seconds()
    );
    Ok(())
}

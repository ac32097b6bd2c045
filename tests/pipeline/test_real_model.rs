// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
use image::{Rgb, RgbImage};
use vl_ocr::config::OcrConfig;
use vl_ocr::models::HubProvisioner;
use vl_ocr::pipeline::OcrPipeline;

#[test]
#[ignore] // Downloads the default model from the Hugging Face Hub
fn test_real_model_on_blank_page() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("blank.png");
    RgbImage::from_pixel(840, 800, Rgb([255, 255, 255]))
        .save(&path)
        .unwrap();

    let mut pipeline = OcrPipeline::new(HubProvisioner::new(), OcrConfig::default());
    let mut out = Vec::new();
    let report = pipeline.run(&path.to_string_lossy(), &mut out).unwrap();

    println!("{}", String::from_utf8_lossy(&out));
    assert!(report.elapsed_seconds() > 0.0);
    assert!(report.lines.len() <= OcrConfig::default().max_new_tokens);
}

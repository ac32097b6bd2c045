// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
use std::io::Cursor;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{ImageFormat, Rgb, RgbImage};
use tempfile::TempDir;
use vl_ocr::config::OcrConfig;
use vl_ocr::errors::{LoadError, OcrError};
use vl_ocr::models::{ModelProvisioner, StubProvisioner, STUB_MODEL_ID};
use vl_ocr::pipeline::{OcrPipeline, PipelineStage, LOADED_LINE, LOADING_LINE, STARTING_LINE};

fn receipt_image() -> RgbImage {
    let mut img = RgbImage::from_pixel(420, 400, Rgb([250, 250, 245]));
    for x in 40..380 {
        img.put_pixel(x, 200, Rgb([0, 0, 0]));
    }
    img
}

fn write_receipt(dir: &TempDir) -> String {
    let path = dir.path().join("receipt.png");
    receipt_image().save(&path).unwrap();
    path.to_string_lossy().into_owned()
}

fn stub_pipeline(response: &str) -> OcrPipeline<StubProvisioner> {
    OcrPipeline::new(
        StubProvisioner::new(response),
        OcrConfig::default().with_model_id(STUB_MODEL_ID),
    )
}

fn console(out: Vec<u8>) -> Vec<String> {
    String::from_utf8(out)
        .unwrap()
        .lines()
        .map(str::to_string)
        .collect()
}

#[test]
fn test_receipt_prints_header_then_text() {
    let dir = tempfile::tempdir().unwrap();
    let mut pipeline = stub_pipeline("TOTAL 12.99");
    let mut out = Vec::new();

    let report = pipeline.run(&write_receipt(&dir), &mut out).unwrap();

    assert_eq!(report.lines, vec!["TOTAL 12.99"]);
    let lines = console(out);
    assert_eq!(
        &lines[..3],
        &[LOADING_LINE, LOADED_LINE, STARTING_LINE].map(String::from)
    );
    assert_eq!(lines[3], report.header());
    assert!(lines[3].starts_with("--- OCR result (elapsed: "));
    assert!(lines[3].ends_with("s) ---"));
    assert_eq!(&lines[4..], &["TOTAL 12.99".to_string()]);
    assert_eq!(pipeline.stage(), PipelineStage::Reported);
}

#[test]
fn test_multi_line_response_keeps_line_order() {
    let dir = tempfile::tempdir().unwrap();
    let mut pipeline = stub_pipeline("STORE 42\nMILK 1.99\r\nTOTAL 12.99\n");
    let mut out = Vec::new();

    let report = pipeline.run(&write_receipt(&dir), &mut out).unwrap();

    assert_eq!(report.lines, vec!["STORE 42", "MILK 1.99", "TOTAL 12.99"]);
    assert_eq!(&console(out)[4..], report.lines.as_slice());
}

#[test]
fn test_blank_image_with_empty_response_prints_header_only() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("blank.png");
    RgbImage::from_pixel(300, 300, Rgb([255, 255, 255]))
        .save(&path)
        .unwrap();

    let mut pipeline = stub_pipeline("");
    let mut out = Vec::new();
    let report = pipeline
        .run(&path.to_string_lossy(), &mut out)
        .unwrap();

    assert!(report.lines.is_empty());
    let lines = console(out);
    assert_eq!(lines.len(), 4);
    assert!(lines[3].starts_with("--- OCR result"));
}

#[test]
fn test_unknown_model_fails_before_any_result() {
    let provisioner = StubProvisioner::new("TOTAL 12.99");
    assert!(matches!(
        provisioner.load("nonexistent-model-id"),
        Err(LoadError::NotFound(_))
    ));

    let mut pipeline = OcrPipeline::new(
        provisioner,
        OcrConfig::default().with_model_id("nonexistent-model-id"),
    );
    let mut out = Vec::new();
    let err = pipeline.run("receipt.png", &mut out).unwrap_err();

    assert!(matches!(err, OcrError::Load(LoadError::NotFound(_))));
    assert!(err.to_string().contains("nonexistent-model-id"));
    assert_eq!(
        pipeline.trace(),
        &[PipelineStage::Idle, PipelineStage::Loading, PipelineStage::Failed]
    );
    assert!(!console(out).iter().any(|line| line.starts_with("--- OCR result")));
}

#[test]
fn test_file_url_source() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_receipt(&dir);
    let mut pipeline = stub_pipeline("TOTAL 12.99");

    let report = pipeline
        .run(&format!("file://{}", path), &mut Vec::new())
        .unwrap();
    assert_eq!(report.lines, vec!["TOTAL 12.99"]);
}

#[test]
fn test_data_url_source() {
    let mut bytes = Vec::new();
    receipt_image()
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .unwrap();
    let source = format!("data:image/png;base64,{}", STANDARD.encode(&bytes));

    let mut pipeline = stub_pipeline("TOTAL 12.99");
    let report = pipeline.run(&source, &mut Vec::new()).unwrap();
    assert_eq!(report.lines, vec!["TOTAL 12.99"]);
}

#[test]
fn test_unreadable_image_stops_before_generation() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("not-an-image.png");
    std::fs::write(&path, b"plain text, not pixels").unwrap();

    let mut pipeline = stub_pipeline("TOTAL 12.99");
    let mut out = Vec::new();
    let err = pipeline.run(&path.to_string_lossy(), &mut out).unwrap_err();

    assert!(matches!(err, OcrError::Preprocess(_)));
    assert!(!pipeline.trace().contains(&PipelineStage::Generating));
    assert!(!console(out).contains(&STARTING_LINE.to_string()));
}

#[test]
fn test_generation_failure_reports_cause() {
    let dir = tempfile::tempdir().unwrap();
    let provisioner = StubProvisioner::new("TOTAL 12.99").with_generation_failure("CUDA out of memory");
    let mut pipeline =
        OcrPipeline::new(provisioner, OcrConfig::default().with_model_id(STUB_MODEL_ID));

    let err = pipeline.run(&write_receipt(&dir), &mut Vec::new()).unwrap_err();
    assert!(matches!(err, OcrError::Generation(_)));
    assert!(err.to_string().contains("CUDA out of memory"));
    assert_eq!(pipeline.stage(), PipelineStage::Failed);
}

#[test]
fn test_token_bound_truncates_output() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = OcrConfig::default().with_model_id(STUB_MODEL_ID);
    config.max_new_tokens = 5;
    let mut pipeline = OcrPipeline::new(StubProvisioner::new("TOTAL 12.99"), config);

    let report = pipeline.run(&write_receipt(&dir), &mut Vec::new()).unwrap();
    assert_eq!(report.lines, vec!["TOTAL"]);
}

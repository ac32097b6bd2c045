// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
use vl_ocr::errors::DecodeError;
use vl_ocr::inference::{decode, split_lines, trim_echo};
use vl_ocr::models::{CharCodec, TokenCodec};

#[test]
fn test_output_never_contains_prompt_tokens() {
    let codec = CharCodec::new();
    let prompt = codec.encode("<|im_start|>user\nRead the receipt").unwrap();
    let answer = codec.encode("TOTAL 12.99<|im_end|>").unwrap();

    let mut sequence = prompt.clone();
    sequence.extend_from_slice(&answer);

    let lines = decode(&codec, &[sequence], &[prompt.len()]).unwrap();
    assert_eq!(lines, vec!["TOTAL 12.99"]);
}

#[test]
fn test_trim_leaves_exactly_the_generated_suffix() {
    let sequences = vec![vec![9, 9, 9, 1, 2], vec![7, 7, 3]];
    let trimmed = trim_echo(&sequences, &[3, 2]).unwrap();
    assert_eq!(trimmed, vec![&[1u32, 2][..], &[3u32][..]]);
}

#[test]
fn test_empty_generation_yields_no_lines() {
    let codec = CharCodec::new();
    let prompt = codec.encode("<|im_start|>assistant\n").unwrap();
    let mut sequence = prompt.clone();
    sequence.push(codec.token_to_id("<|im_end|>").unwrap());

    let lines = decode(&codec, &[sequence], &[prompt.len()]).unwrap();
    assert!(lines.is_empty());
}

#[test]
fn test_echo_shorter_than_input_is_an_error() {
    let codec = CharCodec::new();
    let result = decode(&codec, &[vec![1, 2]], &[5]);
    assert!(matches!(result, Err(DecodeError::TrimOutOfBounds { .. })));
}

#[test]
fn test_splits_on_every_boundary_kind() {
    assert_eq!(split_lines("a\nb\r\nc\rd"), vec!["a", "b", "c", "d"]);
    assert_eq!(split_lines("a\u{2028}b\u{0c}c"), vec!["a", "b", "c"]);
}

#[test]
fn test_trailing_newline_adds_no_empty_line() {
    assert_eq!(split_lines("TOTAL 12.99\n"), vec!["TOTAL 12.99"]);
    assert_eq!(split_lines("a\n\nb"), vec!["a", "", "b"]);
    assert!(split_lines("").is_empty());
}

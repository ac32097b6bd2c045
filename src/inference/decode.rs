// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Output decoding
//!
//! Generated rows echo their input. The echo is trimmed by the input
//! length of each row, the remainder decoded without special tokens, and
//! the text split into lines for the report.

use tracing::debug;

use crate::errors::DecodeError;
use crate::models::preprocessor::TokenCodec;

/// Decoder output: a batch of texts, or a single text
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedText {
    Batch(Vec<String>),
    Single(String),
}

impl DecodedText {
    /// Lines of every text in order; a single text is a one-element batch
    pub fn into_lines(self) -> Vec<String> {
        let texts = match self {
            Self::Batch(texts) => texts,
            Self::Single(text) => vec![text],
        };
        texts.iter().flat_map(|text| split_lines(text)).collect()
    }
}

/// Drop the first `input_lengths[i]` tokens of sequence `i`
pub fn trim_echo<'a>(
    sequences: &'a [Vec<u32>],
    input_lengths: &[usize],
) -> Result<Vec<&'a [u32]>, DecodeError> {
    if sequences.len() != input_lengths.len() {
        return Err(DecodeError::LengthMismatch {
            sequences: sequences.len(),
            lengths: input_lengths.len(),
        });
    }

    sequences
        .iter()
        .zip(input_lengths)
        .enumerate()
        .map(|(index, (sequence, &input_len))| {
            sequence
                .get(input_len..)
                .ok_or(DecodeError::TrimOutOfBounds {
                    index,
                    input_len,
                    sequence_len: sequence.len(),
                })
        })
        .collect()
}

fn is_line_boundary(ch: char) -> bool {
    matches!(
        ch,
        '\n' | '\r' | '\u{0b}' | '\u{0c}' | '\u{1c}' | '\u{1d}' | '\u{1e}' | '\u{85}' | '\u{2028}'
            | '\u{2029}'
    )
}

/// Split on line boundaries, dropping the terminators
///
/// `\r\n` counts as one boundary, as do vertical tab, form feed, the file,
/// group and record separators, NEL and the Unicode line and paragraph
/// separators. A trailing boundary does not produce an empty last line.
pub fn split_lines(text: &str) -> Vec<String> {
    let mut lines = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((i, ch)) = chars.next() {
        if !is_line_boundary(ch) {
            continue;
        }
        lines.push(text[start..i].to_string());
        let mut end = i + ch.len_utf8();
        if ch == '\r' {
            if let Some(&(j, '\n')) = chars.peek() {
                chars.next();
                end = j + 1;
            }
        }
        start = end;
    }

    if start < text.len() {
        lines.push(text[start..].to_string());
    }
    lines
}

/// Trim, decode and split generated sequences into report lines
pub fn decode(
    codec: &dyn TokenCodec,
    sequences: &[Vec<u32>],
    input_lengths: &[usize],
) -> Result<Vec<String>, DecodeError> {
    let trimmed = trim_echo(sequences, input_lengths)?;
    let texts = trimmed
        .into_iter()
        .map(|ids| {
            codec
                .decode(ids, true)
                .map_err(|e| DecodeError::Tokenizer(e.to_string()))
        })
        .collect::<Result<Vec<_>, _>>()?;
    debug!("Decoded {} sequences", texts.len());

    Ok(DecodedText::Batch(texts).into_lines())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::stub::CharCodec;

    #[test]
    fn test_trim_removes_exact_prefix() {
        let sequences = vec![vec![1, 2, 3, 4, 5], vec![6, 7, 8]];
        let trimmed = trim_echo(&sequences, &[3, 3]).unwrap();
        assert_eq!(trimmed[0], &[4, 5]);
        assert!(trimmed[1].is_empty());
    }

    #[test]
    fn test_trim_out_of_bounds() {
        let sequences = vec![vec![1, 2]];
        let result = trim_echo(&sequences, &[3]);
        assert!(matches!(
            result,
            Err(DecodeError::TrimOutOfBounds {
                index: 0,
                input_len: 3,
                sequence_len: 2
            })
        ));
    }

    #[test]
    fn test_trim_length_mismatch() {
        let sequences = vec![vec![1, 2]];
        assert!(matches!(
            trim_echo(&sequences, &[1, 1]),
            Err(DecodeError::LengthMismatch {
                sequences: 1,
                lengths: 2
            })
        ));
    }

    #[test]
    fn test_split_lines_basic() {
        assert_eq!(split_lines("a\nb\n"), vec!["a", "b"]);
        assert_eq!(split_lines("a\r\nb"), vec!["a", "b"]);
        assert_eq!(split_lines("a\n\nb"), vec!["a", "", "b"]);
        assert_eq!(split_lines("a\rb\u{2028}c"), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_split_lines_empty() {
        assert!(split_lines("").is_empty());
        assert_eq!(split_lines("\n"), vec![""]);
        assert_eq!(split_lines("\r\n\r\n"), vec!["", ""]);
    }

    #[test]
    fn test_split_lines_keeps_inner_whitespace() {
        assert_eq!(split_lines("  TOTAL\t12.99  "), vec!["  TOTAL\t12.99  "]);
    }

    #[test]
    fn test_single_is_one_element_batch() {
        let single = DecodedText::Single("x\ny".to_string()).into_lines();
        let batch = DecodedText::Batch(vec!["x\ny".to_string()]).into_lines();
        assert_eq!(single, batch);
    }

    #[test]
    fn test_decode_drops_echo_and_special_tokens() {
        let codec = CharCodec::new();
        let mut sequence = codec.encode("<|im_start|>user\nprompt").unwrap();
        let input_len = sequence.len();
        sequence.extend(codec.encode("TOTAL 12.99\nCASH<|im_end|>").unwrap());

        let lines = decode(&codec, &[sequence], &[input_len]).unwrap();
        assert_eq!(lines, vec!["TOTAL 12.99", "CASH"]);
    }
}

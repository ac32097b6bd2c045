// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Image fetching and decoding for vision preprocessing
//!
//! An image source is a local path, a `file://` URL, an `http(s)://` URL or
//! a `data:image/...;base64,` URL.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{DynamicImage, ImageFormat};
use std::io::Read;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::errors::PreprocessError;

/// Maximum image size (32MB)
const MAX_IMAGE_SIZE: usize = 32 * 1024 * 1024;

/// Timeout for fetching remote images
const FETCH_TIMEOUT: Duration = Duration::from_secs(120);

/// Custom error types for image decoding
#[derive(Debug, Error)]
pub enum ImageError {
    #[error("Image data is too large: {0} bytes (max: {1} bytes)")]
    TooLarge(usize, usize),

    #[error("Invalid base64 encoding: {0}")]
    InvalidBase64(#[from] base64::DecodeError),

    #[error("Malformed data URL")]
    MalformedDataUrl,

    #[error("Unsupported image format")]
    UnsupportedFormat,

    #[error("Failed to decode image: {0}")]
    DecodeFailed(String),

    #[error("Image data is empty")]
    EmptyData,
}

/// Image information extracted during loading
#[derive(Debug, Clone)]
pub struct ImageInfo {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Detected format
    pub format: ImageFormat,
    /// Size in bytes
    pub size_bytes: usize,
}

/// Where an image comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    /// Filesystem path (plain or from a `file://` URL)
    Local(PathBuf),
    /// `http://` or `https://` URL
    Remote(Url),
    /// Base64 payload of a `data:` URL
    Inline(String),
}

impl ImageSource {
    /// Classify a source string
    pub fn parse(source: &str) -> Result<Self, PreprocessError> {
        if let Some(rest) = source.strip_prefix("data:") {
            let (_, payload) = rest
                .split_once(";base64,")
                .ok_or(PreprocessError::Image(ImageError::MalformedDataUrl))?;
            return Ok(Self::Inline(payload.to_string()));
        }

        if source.starts_with("http://") || source.starts_with("https://") {
            let url = Url::parse(source)
                .map_err(|_| PreprocessError::UnsupportedSource(source.to_string()))?;
            return Ok(Self::Remote(url));
        }

        if source.starts_with("file://") {
            let url = Url::parse(source)
                .map_err(|_| PreprocessError::UnsupportedSource(source.to_string()))?;
            let path = url
                .to_file_path()
                .map_err(|_| PreprocessError::UnsupportedSource(source.to_string()))?;
            return Ok(Self::Local(path));
        }

        if source.is_empty() {
            return Err(PreprocessError::UnsupportedSource(source.to_string()));
        }

        Ok(Self::Local(PathBuf::from(source)))
    }
}

/// Fetch and decode the image behind a source string
pub fn load_image(source: &str) -> Result<(DynamicImage, ImageInfo), PreprocessError> {
    let decoded = match ImageSource::parse(source)? {
        ImageSource::Local(path) => {
            debug!("Reading image from {}", path.display());
            let bytes = std::fs::read(&path).map_err(|source| PreprocessError::Read {
                path: path.clone(),
                source,
            })?;
            decode_image_bytes(&bytes)?
        }
        ImageSource::Remote(url) => {
            let bytes = fetch_remote(&url)?;
            decode_image_bytes(&bytes)?
        }
        ImageSource::Inline(payload) => decode_base64_image(&payload)?,
    };

    info!(
        "Loaded {} image {}x{} ({} bytes)",
        format_to_extension(decoded.1.format),
        decoded.1.width,
        decoded.1.height,
        decoded.1.size_bytes
    );

    Ok(decoded)
}

/// Download the raw bytes of a remote image
fn fetch_remote(url: &Url) -> Result<Vec<u8>, PreprocessError> {
    debug!("Fetching image from {}", url);
    let fetch_error = |source| PreprocessError::Fetch {
        url: url.to_string(),
        source,
    };

    let client = reqwest::blocking::Client::builder()
        .timeout(FETCH_TIMEOUT)
        .build()
        .map_err(fetch_error)?;

    let response = client.get(url.clone()).send().map_err(fetch_error)?;
    let status = response.status();
    if !status.is_success() {
        return Err(PreprocessError::HttpStatus {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }

    if let Some(length) = response.content_length() {
        if length > MAX_IMAGE_SIZE as u64 {
            return Err(ImageError::TooLarge(length as usize, MAX_IMAGE_SIZE).into());
        }
    }

    read_capped(response, MAX_IMAGE_SIZE).map_err(|e| match e {
        CappedReadError::TooLarge(read) => ImageError::TooLarge(read, MAX_IMAGE_SIZE).into(),
        CappedReadError::Io(source) => PreprocessError::FetchBody {
            url: url.to_string(),
            source,
        },
    })
}

enum CappedReadError {
    TooLarge(usize),
    Io(std::io::Error),
}

/// Read a body of at most `limit` bytes, stopping one byte past it
fn read_capped<R: Read>(reader: R, limit: usize) -> Result<Vec<u8>, CappedReadError> {
    let mut bytes = Vec::new();
    reader
        .take(limit as u64 + 1)
        .read_to_end(&mut bytes)
        .map_err(CappedReadError::Io)?;
    if bytes.len() > limit {
        return Err(CappedReadError::TooLarge(bytes.len()));
    }
    Ok(bytes)
}

/// Decode a base64-encoded image
///
/// # Arguments
/// * `base64_str` - Base64 encoded image data
///
/// # Returns
/// * `Ok((DynamicImage, ImageInfo))` - The decoded image and metadata
/// * `Err(ImageError)` - If decoding fails
pub fn decode_base64_image(base64_str: &str) -> Result<(DynamicImage, ImageInfo), ImageError> {
    if base64_str.is_empty() {
        return Err(ImageError::EmptyData);
    }

    let bytes = STANDARD.decode(base64_str)?;
    decode_image_bytes(&bytes)
}

/// Decode raw image bytes
///
/// # Arguments
/// * `bytes` - Raw image bytes
///
/// # Returns
/// * `Ok((DynamicImage, ImageInfo))` - The decoded image and metadata
/// * `Err(ImageError)` - If decoding fails
pub fn decode_image_bytes(bytes: &[u8]) -> Result<(DynamicImage, ImageInfo), ImageError> {
    // Validate size
    if bytes.len() > MAX_IMAGE_SIZE {
        return Err(ImageError::TooLarge(bytes.len(), MAX_IMAGE_SIZE));
    }

    if bytes.is_empty() {
        return Err(ImageError::EmptyData);
    }

    // Detect format from magic bytes
    let format = detect_format(bytes)?;

    let img = image::load_from_memory_with_format(bytes, format)
        .map_err(|e| ImageError::DecodeFailed(e.to_string()))?;

    let info = ImageInfo {
        width: img.width(),
        height: img.height(),
        format,
        size_bytes: bytes.len(),
    };

    Ok((img, info))
}

/// Detect image format from magic bytes
///
/// # Arguments
/// * `bytes` - Raw image data
///
/// # Returns
/// * `Ok(ImageFormat)` - Detected format
/// * `Err(ImageError::UnsupportedFormat)` - If format cannot be detected
pub fn detect_format(bytes: &[u8]) -> Result<ImageFormat, ImageError> {
    if bytes.len() < 4 {
        return Err(ImageError::UnsupportedFormat);
    }

    match bytes {
        // PNG: 89 50 4E 47 (0x89 P N G)
        [0x89, 0x50, 0x4E, 0x47, ..] => Ok(ImageFormat::Png),

        // JPEG: FF D8 FF
        [0xFF, 0xD8, 0xFF, ..] => Ok(ImageFormat::Jpeg),

        // WebP: RIFF .... WEBP
        [0x52, 0x49, 0x46, 0x46, _, _, _, _, 0x57, 0x45, 0x42, 0x50, ..] => Ok(ImageFormat::WebP),

        // GIF: GIF87a or GIF89a
        [0x47, 0x49, 0x46, 0x38, x, ..] if *x == 0x37 || *x == 0x39 => Ok(ImageFormat::Gif),

        // BMP: BM
        [0x42, 0x4D, ..] => Ok(ImageFormat::Bmp),

        // TIFF: II (little-endian) or MM (big-endian)
        [0x49, 0x49, 0x2A, 0x00, ..] | [0x4D, 0x4D, 0x00, 0x2A, ..] => Ok(ImageFormat::Tiff),

        _ => Err(ImageError::UnsupportedFormat),
    }
}

/// Get the format extension as a string
pub fn format_to_extension(format: ImageFormat) -> &'static str {
    match format {
        ImageFormat::Png => "png",
        ImageFormat::Jpeg => "jpg",
        ImageFormat::WebP => "webp",
        ImageFormat::Gif => "gif",
        ImageFormat::Bmp => "bmp",
        ImageFormat::Tiff => "tiff",
        _ => "unknown",
    }
}

// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Image preprocessing for the Qwen2-VL vision encoder
//!
//! Steps:
//! 1. Resize toward the advisory hints, snapped to the patch grid
//! 2. Snap again to the processor's pixel budget
//! 3. Normalize with CLIP mean/std: (pixel/255 - mean) / std
//! 4. Repeat the frame over the temporal patch and flatten into patches,
//!    ordered in merge blocks

use image::{imageops::FilterType, DynamicImage, GenericImageView};
use ndarray::Array2;
use serde::Deserialize;
use tracing::{debug, info};

use super::image_utils::load_image;
use crate::errors::PreprocessError;
use crate::inference::prompt::{ImageDescriptor, Message};

/// CLIP normalization mean values
pub const CLIP_MEAN: [f32; 3] = [0.481_454_66, 0.457_827_5, 0.408_210_73];

/// CLIP normalization std values
pub const CLIP_STD: [f32; 3] = [0.268_629_54, 0.261_302_58, 0.275_777_11];

/// Pixel floor applied when snapping the resize hints
pub const HINT_MIN_PIXELS: usize = 4 * 28 * 28;

/// Pixel ceiling applied when snapping the resize hints
pub const HINT_MAX_PIXELS: usize = 16384 * 28 * 28;

/// Images more elongated than this cannot be patchified
pub const MAX_ASPECT_RATIO: f64 = 200.0;

const DEFAULT_MIN_PIXELS: usize = 56 * 56;
const DEFAULT_MAX_PIXELS: usize = 28 * 28 * 16384;

/// Pixel budget in the newer `size` layout of preprocessor_config.json
#[derive(Debug, Clone, PartialEq, Deserialize)]
struct SizeConfig {
    shortest_edge: Option<usize>,
    longest_edge: Option<usize>,
}

/// Image processor settings, read from preprocessor_config.json
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ImageProcessorConfig {
    #[serde(default)]
    min_pixels: Option<usize>,
    #[serde(default)]
    max_pixels: Option<usize>,
    #[serde(default)]
    size: Option<SizeConfig>,
    #[serde(default = "default_patch_size")]
    pub patch_size: usize,
    #[serde(default = "default_temporal_patch_size")]
    pub temporal_patch_size: usize,
    #[serde(default = "default_merge_size")]
    pub merge_size: usize,
    #[serde(default = "default_mean")]
    pub image_mean: [f32; 3],
    #[serde(default = "default_std")]
    pub image_std: [f32; 3],
}

fn default_patch_size() -> usize {
    14
}

fn default_temporal_patch_size() -> usize {
    2
}

fn default_merge_size() -> usize {
    2
}

fn default_mean() -> [f32; 3] {
    CLIP_MEAN
}

fn default_std() -> [f32; 3] {
    CLIP_STD
}

impl Default for ImageProcessorConfig {
    fn default() -> Self {
        Self {
            min_pixels: Some(DEFAULT_MIN_PIXELS),
            max_pixels: Some(12_845_056),
            size: None,
            patch_size: default_patch_size(),
            temporal_patch_size: default_temporal_patch_size(),
            merge_size: default_merge_size(),
            image_mean: CLIP_MEAN,
            image_std: CLIP_STD,
        }
    }
}

impl ImageProcessorConfig {
    pub fn min_pixels(&self) -> usize {
        self.min_pixels
            .or_else(|| self.size.as_ref().and_then(|s| s.shortest_edge))
            .unwrap_or(DEFAULT_MIN_PIXELS)
    }

    pub fn max_pixels(&self) -> usize {
        self.max_pixels
            .or_else(|| self.size.as_ref().and_then(|s| s.longest_edge))
            .unwrap_or(DEFAULT_MAX_PIXELS)
    }

    /// Side length in pixels that one merged vision token covers
    pub fn factor(&self) -> usize {
        self.patch_size * self.merge_size
    }

    /// Length of one flattened patch: channels x temporal x patch x patch
    pub fn patch_dim(&self) -> usize {
        3 * self.temporal_patch_size * self.patch_size * self.patch_size
    }
}

/// Patchified pixels of one image
#[derive(Debug, Clone, PartialEq)]
pub struct ImageTensors {
    /// [num_patches, patch_dim]
    pub pixel_values: Array2<f32>,
    /// Temporal, height and width extent of the patch grid
    pub grid_thw: [usize; 3],
}

impl ImageTensors {
    /// Number of placeholder tokens this image occupies in the prompt
    pub fn num_tokens(&self, merge_size: usize) -> usize {
        let [t, h, w] = self.grid_thw;
        t * h * w / (merge_size * merge_size)
    }
}

/// Tensors extracted from all vision parts of a conversation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VisionInputs {
    pub images: Vec<ImageTensors>,
    /// Always empty: messages carry no video parts
    pub videos: Vec<ImageTensors>,
}

fn round_by_factor(value: f64, factor: usize) -> usize {
    ((value / factor as f64).round_ties_even() as usize) * factor
}

fn floor_by_factor(value: f64, factor: usize) -> usize {
    ((value / factor as f64).floor() as usize) * factor
}

fn ceil_by_factor(value: f64, factor: usize) -> usize {
    ((value / factor as f64).ceil() as usize) * factor
}

/// Snap (height, width) to multiples of `factor` within a pixel budget,
/// keeping the aspect ratio as close as possible
pub fn smart_resize(
    height: usize,
    width: usize,
    factor: usize,
    min_pixels: usize,
    max_pixels: usize,
) -> Result<(usize, usize), PreprocessError> {
    if height == 0 || width == 0 {
        return Err(PreprocessError::InvalidResizeHint {
            height: height as u32,
            width: width as u32,
        });
    }

    let ratio = height.max(width) as f64 / height.min(width) as f64;
    if ratio > MAX_ASPECT_RATIO {
        return Err(PreprocessError::AspectRatio {
            max: MAX_ASPECT_RATIO,
            actual: ratio,
        });
    }

    let (h, w) = (height as f64, width as f64);
    let mut h_bar = factor.max(round_by_factor(h, factor));
    let mut w_bar = factor.max(round_by_factor(w, factor));

    if h_bar * w_bar > max_pixels {
        let beta = (h * w / max_pixels as f64).sqrt();
        h_bar = factor.max(floor_by_factor(h / beta, factor));
        w_bar = factor.max(floor_by_factor(w / beta, factor));
    } else if h_bar * w_bar < min_pixels {
        let beta = (min_pixels as f64 / (h * w)).sqrt();
        h_bar = ceil_by_factor(h * beta, factor);
        w_bar = ceil_by_factor(w * beta, factor);
    }

    Ok((h_bar, w_bar))
}

/// Resize a decoded image toward the descriptor's hints
pub fn apply_resize_hints(
    image: &DynamicImage,
    descriptor: &ImageDescriptor,
    factor: usize,
) -> Result<DynamicImage, PreprocessError> {
    let (hint_h, hint_w) = (descriptor.resized_height(), descriptor.resized_width());
    if hint_h == 0 || hint_w == 0 {
        return Err(PreprocessError::InvalidResizeHint {
            height: hint_h,
            width: hint_w,
        });
    }

    let (height, width) = smart_resize(
        hint_h as usize,
        hint_w as usize,
        factor,
        HINT_MIN_PIXELS,
        HINT_MAX_PIXELS,
    )?;
    debug!(
        "Resize hint {}x{} snapped to {}x{}",
        hint_h, hint_w, height, width
    );

    Ok(image.resize_exact(width as u32, height as u32, FilterType::CatmullRom))
}

/// Normalize and patchify one image
pub fn preprocess_image(
    image: &DynamicImage,
    config: &ImageProcessorConfig,
) -> Result<ImageTensors, PreprocessError> {
    let (orig_w, orig_h) = image.dimensions();
    let (height, width) = smart_resize(
        orig_h as usize,
        orig_w as usize,
        config.factor(),
        config.min_pixels(),
        config.max_pixels(),
    )?;

    let resized;
    let image = if (height, width) == (orig_h as usize, orig_w as usize) {
        image
    } else {
        resized = image.resize_exact(width as u32, height as u32, FilterType::CatmullRom);
        &resized
    };
    let rgb = image.to_rgb8();

    let patch = config.patch_size;
    let merge = config.merge_size;
    let temporal = config.temporal_patch_size;
    let grid_h = height / patch;
    let grid_w = width / patch;
    let patch_dim = config.patch_dim();
    let num_patches = grid_h * grid_w;

    let mut pixel_values = Array2::<f32>::zeros((num_patches, patch_dim));
    let mut row = 0;
    for mh in 0..grid_h / merge {
        for mw in 0..grid_w / merge {
            for sh in 0..merge {
                for sw in 0..merge {
                    let py0 = (mh * merge + sh) * patch;
                    let px0 = (mw * merge + sw) * patch;
                    let mut col = 0;
                    for c in 0..3 {
                        for _ in 0..temporal {
                            for py in 0..patch {
                                for px in 0..patch {
                                    let pixel = rgb.get_pixel((px0 + px) as u32, (py0 + py) as u32);
                                    pixel_values[[row, col]] = (pixel[c] as f32 / 255.0
                                        - config.image_mean[c])
                                        / config.image_std[c];
                                    col += 1;
                                }
                            }
                        }
                    }
                    row += 1;
                }
            }
        }
    }

    Ok(ImageTensors {
        pixel_values,
        grid_thw: [1, grid_h, grid_w],
    })
}

/// Extract, decode and preprocess every image part of the messages
pub fn process_vision_info(
    messages: &[Message],
    config: &ImageProcessorConfig,
) -> Result<VisionInputs, PreprocessError> {
    let mut inputs = VisionInputs::default();

    for descriptor in messages.iter().flat_map(Message::images) {
        if descriptor.resized_height() == 0 || descriptor.resized_width() == 0 {
            return Err(PreprocessError::InvalidResizeHint {
                height: descriptor.resized_height(),
                width: descriptor.resized_width(),
            });
        }

        let (image, _) = load_image(descriptor.source())?;
        let hinted = apply_resize_hints(&image, descriptor, config.factor())?;
        let tensors = preprocess_image(&hinted, config)?;
        info!(
            "Image {} -> grid {:?}, {} patches",
            descriptor.source(),
            tensors.grid_thw,
            tensors.pixel_values.nrows()
        );
        inputs.images.push(tensors);
    }

    if inputs.images.is_empty() {
        return Err(PreprocessError::MissingImage);
    }

    Ok(inputs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::prompt::{build, ContentPart, Role};
    use image::{Rgb, RgbImage};

    #[test]
    fn test_smart_resize_snaps_hints() {
        // 800 / 28 = 28.57 -> 29 * 28
        assert_eq!(
            smart_resize(800, 840, 28, HINT_MIN_PIXELS, HINT_MAX_PIXELS).unwrap(),
            (812, 840)
        );
    }

    #[test]
    fn test_smart_resize_rounds_half_to_even() {
        // 42 / 28 = 1.5 -> 2, 70 / 28 = 2.5 -> 2
        assert_eq!(smart_resize(42, 70, 28, 0, usize::MAX).unwrap(), (56, 56));
    }

    #[test]
    fn test_smart_resize_respects_max_pixels() {
        let (h, w) = smart_resize(4000, 3000, 28, 3136, 1_003_520).unwrap();
        assert!(h * w <= 1_003_520);
        assert_eq!(h % 28, 0);
        assert_eq!(w % 28, 0);
    }

    #[test]
    fn test_smart_resize_respects_min_pixels() {
        let (h, w) = smart_resize(10, 10, 28, 3136, 1_003_520).unwrap();
        assert!(h * w >= 3136);
        assert_eq!(h, w);
        assert_eq!(h % 28, 0);
    }

    #[test]
    fn test_smart_resize_rejects_extreme_aspect_ratio() {
        let result = smart_resize(10, 2100, 28, 0, usize::MAX);
        assert!(matches!(result, Err(PreprocessError::AspectRatio { .. })));
    }

    #[test]
    fn test_smart_resize_rejects_zero() {
        assert!(matches!(
            smart_resize(0, 10, 28, 0, usize::MAX),
            Err(PreprocessError::InvalidResizeHint { .. })
        ));
    }

    #[test]
    fn test_preprocess_shapes() {
        let config = ImageProcessorConfig::default();
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(112, 56, Rgb([255, 255, 255])));
        let tensors = preprocess_image(&image, &config).unwrap();

        assert_eq!(tensors.grid_thw, [1, 4, 8]);
        assert_eq!(tensors.pixel_values.dim(), (32, 3 * 2 * 14 * 14));
        assert_eq!(tensors.num_tokens(config.merge_size), 8);
    }

    #[test]
    fn test_preprocess_normalization() {
        let config = ImageProcessorConfig::default();
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(56, 56, Rgb([255, 0, 0])));
        let tensors = preprocess_image(&image, &config).unwrap();

        let red = (1.0 - CLIP_MEAN[0]) / CLIP_STD[0];
        let green = (0.0 - CLIP_MEAN[1]) / CLIP_STD[1];
        let per_channel = 2 * 14 * 14;
        assert!((tensors.pixel_values[[0, 0]] - red).abs() < 1e-5);
        assert!((tensors.pixel_values[[0, per_channel]] - green).abs() < 1e-5);
    }

    #[test]
    fn test_preprocess_patch_order_follows_merge_blocks() {
        let config = ImageProcessorConfig::default();
        // Left half black, right half white: 4x8 patch grid
        let mut img = RgbImage::new(112, 56);
        for (x, _, pixel) in img.enumerate_pixels_mut() {
            *pixel = if x < 56 { Rgb([0, 0, 0]) } else { Rgb([255, 255, 255]) };
        }
        let tensors = preprocess_image(&DynamicImage::ImageRgb8(img), &config).unwrap();
        assert_eq!(tensors.grid_thw, [1, 4, 8]);

        let black = (0.0 - CLIP_MEAN[0]) / CLIP_STD[0];
        let white = (1.0 - CLIP_MEAN[0]) / CLIP_STD[0];
        // Merge blocks 0-1 cover patch columns 0-3 (black), blocks 2-3 cover 4-7 (white)
        for row in 0..8 {
            assert!((tensors.pixel_values[[row, 0]] - black).abs() < 1e-5);
        }
        for row in 8..16 {
            assert!((tensors.pixel_values[[row, 0]] - white).abs() < 1e-5);
        }
    }

    #[test]
    fn test_config_from_json() {
        let json = r#"{
            "min_pixels": 3136,
            "max_pixels": 12845056,
            "patch_size": 14,
            "temporal_patch_size": 2,
            "merge_size": 2,
            "image_mean": [0.48145466, 0.4578275, 0.40821073],
            "image_std": [0.26862954, 0.26130258, 0.27577711],
            "image_processor_type": "Qwen2VLImageProcessor"
        }"#;
        let config: ImageProcessorConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.min_pixels(), 3136);
        assert_eq!(config.max_pixels(), 12_845_056);
        assert_eq!(config.factor(), 28);
        assert_eq!(config.patch_dim(), 1176);
    }

    #[test]
    fn test_config_size_layout() {
        let json = r#"{"size": {"shortest_edge": 3136, "longest_edge": 1003520}}"#;
        let config: ImageProcessorConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.min_pixels(), 3136);
        assert_eq!(config.max_pixels(), 1_003_520);
        assert_eq!(config.patch_size, 14);
    }

    #[test]
    fn test_process_vision_info_reads_image() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("receipt.png");
        RgbImage::from_pixel(300, 200, Rgb([250, 250, 250]))
            .save(&path)
            .unwrap();

        let message = build(path.to_str().unwrap(), "read", 56, 84);
        let inputs = process_vision_info(&[message], &ImageProcessorConfig::default()).unwrap();

        assert_eq!(inputs.images.len(), 1);
        assert!(inputs.videos.is_empty());
        assert_eq!(inputs.images[0].grid_thw, [1, 4, 6]);
    }

    #[test]
    fn test_process_vision_info_zero_hint() {
        let message = build("receipt.png", "read", 0, 840);
        let result = process_vision_info(&[message], &ImageProcessorConfig::default());
        assert!(matches!(
            result,
            Err(PreprocessError::InvalidResizeHint { height: 0, width: 840 })
        ));
    }

    #[test]
    fn test_process_vision_info_without_image() {
        let message = Message::new(Role::User, vec![ContentPart::Text("hi".into())]);
        let result = process_vision_info(&[message], &ImageProcessorConfig::default());
        assert!(matches!(result, Err(PreprocessError::MissingImage)));
    }
}

//! Seams to external models: the frame processor, the audio embedder and
//! the text tokenizer.
//!
//! Each collaborator takes an array (or text) and returns an array. The
//! reference implementations here are enough to run the pipeline end to end
//! without pretrained weights.

use crate::tokenize::TokenizeError;
use egomux_data::CropSize;
use image::{RgbImage, imageops::FilterType};
use ndarray::{Array2, Array3, ArrayView4, Axis};
use thiserror::Error;

/// CLIP image normalization constants.
pub const CLIP_MEAN: [f32; 3] = [0.481_454_66, 0.457_827_5, 0.408_210_73];
pub const CLIP_STD: [f32; 3] = [0.268_629_54, 0.261_302_58, 0.275_777_11];

/// Errors raised by frame or audio collaborators.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

/// Turns an RGB frame into a normalized `3 × H × W` array.
pub trait FrameProcessor: Send + Sync {
    /// Per-channel mean in `[0, 1]`, also used as the square-padding colour.
    fn image_mean(&self) -> [f32; 3];

    fn crop_size(&self) -> CropSize;

    fn process(&self, image: &RgbImage) -> Result<Array3<f32>, ProcessError>;
}

/// Embeds a batch of peak-normalized waveforms (`1 × S × L × C`).
pub trait AudioEmbedder: Send + Sync {
    fn embed(&self, waveform: ArrayView4<'_, f32>) -> Result<Array2<f32>, ProcessError>;
}

/// Text to token ids.
pub trait TextTokenizer: Send + Sync {
    /// Token ids for `text`, including the BOS token when the tokenizer adds one.
    fn token_ids(&self, text: &str) -> Result<Vec<i64>, TokenizeError>;

    fn bos_token_id(&self) -> Option<i64>;
}

impl TextTokenizer for tokenizers::Tokenizer {
    fn token_ids(&self, text: &str) -> Result<Vec<i64>, TokenizeError> {
        let encoding = self
            .encode(text, true)
            .map_err(|e| TokenizeError::Encode(e.to_string()))?;
        Ok(encoding.get_ids().iter().map(|&id| i64::from(id)).collect())
    }

    fn bos_token_id(&self) -> Option<i64> {
        ["<s>", "<|begin_of_text|>", "<|startoftext|>"]
            .iter()
            .find_map(|t| self.token_to_id(t))
            .map(i64::from)
    }
}

/// Resize to the crop size and normalize with a mean/std pair.
#[derive(Debug, Clone)]
pub struct ResizeNormalize {
    crop: CropSize,
    mean: [f32; 3],
    std: [f32; 3],
    filter: FilterType,
}

impl ResizeNormalize {
    /// CLIP statistics at the given crop size.
    pub fn clip(crop: CropSize) -> Self {
        Self {
            crop,
            mean: CLIP_MEAN,
            std: CLIP_STD,
            filter: FilterType::CatmullRom,
        }
    }

    pub fn with_stats(mut self, mean: [f32; 3], std: [f32; 3]) -> Self {
        self.mean = mean;
        self.std = std;
        self
    }

    pub fn with_filter(mut self, filter: FilterType) -> Self {
        self.filter = filter;
        self
    }
}

impl FrameProcessor for ResizeNormalize {
    fn image_mean(&self) -> [f32; 3] {
        self.mean
    }

    fn crop_size(&self) -> CropSize {
        self.crop
    }

    fn process(&self, image: &RgbImage) -> Result<Array3<f32>, ProcessError> {
        if image.width() == 0 || image.height() == 0 {
            return Err(ProcessError::InvalidInput("empty image".to_string()));
        }
        let resized = image::imageops::resize(image, self.crop.width, self.crop.height, self.filter);

        let (w, h) = (self.crop.width as usize, self.crop.height as usize);
        let mut out = Array3::<f32>::zeros((3, h, w));
        for (x, y, pixel) in resized.enumerate_pixels() {
            for c in 0..3 {
                let value = f32::from(pixel[c]) / 255.0;
                out[[c, y as usize, x as usize]] = (value - self.mean[c]) / self.std[c];
            }
        }
        Ok(out)
    }
}

/// Mono downmix followed by mean pooling of the absolute envelope into a
/// fixed number of bins per snippet.
#[derive(Debug, Clone)]
pub struct PooledEnvelope {
    bins: usize,
}

impl PooledEnvelope {
    pub fn new(bins: usize) -> Self {
        Self { bins: bins.max(1) }
    }
}

impl Default for PooledEnvelope {
    fn default() -> Self {
        Self::new(64)
    }
}

impl AudioEmbedder for PooledEnvelope {
    fn embed(&self, waveform: ArrayView4<'_, f32>) -> Result<Array2<f32>, ProcessError> {
        let (batch, snippets, length, channels) = waveform.dim();
        if batch != 1 || channels == 0 {
            return Err(ProcessError::InvalidInput(format!(
                "expected 1 × S × L × C waveform, got {:?}",
                waveform.shape()
            )));
        }

        // S × L
        let mono = waveform
            .index_axis(Axis(0), 0)
            .mean_axis(Axis(2))
            .ok_or_else(|| ProcessError::InvalidInput("no channels".to_string()))?;

        let mut out = Array2::<f32>::zeros((snippets, self.bins));
        for (s, snippet) in mono.outer_iter().enumerate() {
            for bin in 0..self.bins {
                let start = bin * length / self.bins;
                let end = ((bin + 1) * length / self.bins).max(start + 1).min(length);
                if start >= end {
                    continue;
                }
                let sum: f32 = snippet.slice(ndarray::s![start..end]).iter().map(|v| v.abs()).sum();
                out[[s, bin]] = sum / (end - start) as f32;
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use ndarray::Array4;

    #[test]
    fn test_resize_normalize_shape_and_values() {
        let processor = ResizeNormalize::clip(CropSize {
            width: 4,
            height: 2,
        })
        .with_filter(FilterType::Nearest);
        let image = RgbImage::from_pixel(8, 8, Rgb([255, 0, 0]));
        let out = processor.process(&image).unwrap();

        assert_eq!(out.shape(), &[3, 2, 4]);
        let expected_r = (1.0 - CLIP_MEAN[0]) / CLIP_STD[0];
        assert!((out[[0, 1, 3]] - expected_r).abs() < 1e-5);
        let expected_g = (0.0 - CLIP_MEAN[1]) / CLIP_STD[1];
        assert!((out[[1, 0, 0]] - expected_g).abs() < 1e-5);
    }

    #[test]
    fn test_pooled_envelope_bins() {
        let mut wave = Array4::<f32>::zeros((1, 2, 8, 2));
        wave.slice_mut(ndarray::s![0, 1, 0..4, ..]).fill(1.0);
        wave.slice_mut(ndarray::s![0, 1, 4..8, ..]).fill(-0.5);

        let out = PooledEnvelope::new(2).embed(wave.view()).unwrap();
        assert_eq!(out.shape(), &[2, 2]);
        assert_eq!(out[[0, 0]], 0.0);
        assert!((out[[1, 0]] - 1.0).abs() < 1e-6);
        assert!((out[[1, 1]] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_pooled_envelope_rejects_batches() {
        let wave = Array4::<f32>::zeros((2, 1, 4, 1));
        assert!(PooledEnvelope::default().embed(wave.view()).is_err());
    }
}

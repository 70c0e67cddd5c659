#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;

use image::{Rgb, RgbImage};
use imagesearch::{AppError, Embedder, EmbeddingInput, Result};

/// Embeds an image as its mean RGB colour; text comes from a fixed table.
#[derive(Debug, Default)]
pub struct MeanColorEmbedder {
    pub texts: HashMap<String, Vec<f32>>,
    /// Images with exactly this mean colour make the "model" fail
    pub fail_on: Option<[f32; 3]>,
    /// Images with exactly this mean colour embed to NaN
    pub nan_on: Option<[f32; 3]>,
}

impl MeanColorEmbedder {
    pub fn with_text(mut self, text: &str, vector: Vec<f32>) -> Self {
        self.texts.insert(text.to_string(), vector);
        self
    }
}

impl Embedder for MeanColorEmbedder {
    fn embed(&self, input: EmbeddingInput<'_>) -> Result<Vec<f32>> {
        match input {
            EmbeddingInput::Image(bytes) => {
                let img = image::load_from_memory(bytes)?.to_rgb8();
                let count = (img.width() * img.height()) as f32;
                let mut sum = [0f32; 3];
                for pixel in img.pixels() {
                    for c in 0..3 {
                        sum[c] += pixel[c] as f32;
                    }
                }
                let mean = sum.map(|s| s / count);
                if self.fail_on == Some(mean) {
                    return Err(AppError::Model("inference failed".to_string()));
                }
                if self.nan_on == Some(mean) {
                    return Ok(vec![f32::NAN; 3]);
                }
                Ok(mean.to_vec())
            }
            EmbeddingInput::Text(text) => self
                .texts
                .get(text)
                .cloned()
                .ok_or_else(|| AppError::Model(format!("unknown prompt {}", text))),
        }
    }
}

/// Write a solid-colour image; the format follows the extension.
pub fn write_solid(path: &Path, color: [u8; 3]) {
    RgbImage::from_pixel(8, 6, Rgb(color)).save(path).unwrap();
}

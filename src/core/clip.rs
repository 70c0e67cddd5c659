use image::{imageops::FilterType, DynamicImage};
use tch::{CModule, Device, Kind, Tensor};
use tokenizers::{
    PaddingDirection, PaddingParams, PaddingStrategy, Tokenizer, TruncationDirection,
    TruncationParams, TruncationStrategy,
};

use crate::core::embeddings::{Embedder, EmbeddingInput};
use crate::error::{AppError, Result};
use crate::state::ModelConfig;

/// Per-channel mean used by CLIP image preprocessing
const CLIP_MEAN: [f32; 3] = [0.481_454_66, 0.457_827_5, 0.408_210_73];
/// Per-channel standard deviation used by CLIP image preprocessing
const CLIP_STD: [f32; 3] = [0.268_629_54, 0.261_302_58, 0.275_777_11];

struct TextEncoder {
    module: CModule,
    tokenizer: Tokenizer,
    context_length: usize,
}

/// CLIP vision (and optionally text) encoders exported to TorchScript
pub struct ClipModel {
    vision: CModule,
    text: Option<TextEncoder>,
    device: Device,
    image_size: u32,
}

impl std::fmt::Debug for ClipModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClipModel")
            .field("device", &self.device)
            .field("image_size", &self.image_size)
            .field("text", &self.text.is_some())
            .finish()
    }
}

impl ClipModel {
    /// Load the encoders named in `config`
    ///
    /// The vision encoder is required. The text encoder is loaded only when
    /// both its TorchScript file and its `tokenizer.json` are configured.
    pub fn load(config: &ModelConfig) -> Result<Self> {
        let device = Device::cuda_if_available();

        let vision_path = config.vision_model.as_ref().ok_or_else(|| {
            AppError::Config(
                "no CLIP vision encoder configured (set IMAGESEARCH_CLIP_VISION)".to_string(),
            )
        })?;
        log::info!("Loading CLIP vision encoder from {}", vision_path.display());
        let mut vision = CModule::load_on_device(vision_path, device)?;
        vision.set_eval();

        let text = match (&config.text_model, &config.tokenizer) {
            (Some(model_path), Some(tokenizer_path)) => {
                log::info!("Loading CLIP text encoder from {}", model_path.display());
                let mut module = CModule::load_on_device(model_path, device)?;
                module.set_eval();
                let tokenizer = load_tokenizer(tokenizer_path, config.context_length)?;
                Some(TextEncoder {
                    module,
                    tokenizer,
                    context_length: config.context_length,
                })
            }
            (Some(_), None) | (None, Some(_)) => {
                log::warn!("CLIP text encoder needs both a model and a tokenizer; text embedding disabled");
                None
            }
            (None, None) => None,
        };

        Ok(Self {
            vision,
            text,
            device,
            image_size: config.image_size,
        })
    }

    /// Preprocess an image into a `[3, size, size]` normalized tensor
    fn preprocess_image(&self, img: &DynamicImage) -> Tensor {
        let size = self.image_size;
        // Scale the shortest edge to `size` and centre crop
        let rgb_img = img
            .resize_to_fill(size, size, FilterType::CatmullRom)
            .to_rgb8();

        let plane = (size * size) as usize;
        let mut data = vec![0f32; plane * 3];
        for (i, pixel) in rgb_img.pixels().enumerate() {
            for c in 0..3 {
                data[c * plane + i] = pixel[c] as f32 / 255.0;
            }
        }

        let side = size as i64;
        let tensor = Tensor::of_slice(&data).view([3, side, side]);
        let mean = Tensor::of_slice(&CLIP_MEAN).view([3, 1, 1]);
        let std = Tensor::of_slice(&CLIP_STD).view([3, 1, 1]);

        (tensor - &mean) / &std
    }

    fn encode_images(&self, images: &[&[u8]]) -> Result<Vec<Vec<f32>>> {
        let tensors = images
            .iter()
            .map(|bytes| Ok(self.preprocess_image(&image::load_from_memory(bytes)?)))
            .collect::<Result<Vec<_>>>()?;

        let batch = Tensor::stack(&tensors, 0).to_device(self.device);
        let output = tch::no_grad(|| self.vision.forward_ts(&[batch]))?;
        rows(output, images.len())
    }

    fn encode_texts(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let encoder = self.text.as_ref().ok_or_else(|| {
            AppError::Config(
                "no CLIP text encoder configured (set IMAGESEARCH_CLIP_TEXT and IMAGESEARCH_CLIP_TOKENIZER)"
                    .to_string(),
            )
        })?;

        let mut ids = Vec::with_capacity(texts.len() * encoder.context_length);
        for text in texts {
            let encoding = encoder
                .tokenizer
                .encode(*text, true)
                .map_err(|e| AppError::Model(format!("tokenization failed: {}", e)))?;
            ids.extend(encoding.get_ids().iter().map(|&id| id as i64));
        }

        let batch = Tensor::of_slice(&ids)
            .view([texts.len() as i64, encoder.context_length as i64])
            .to_device(self.device);
        let output = tch::no_grad(|| encoder.module.forward_ts(&[batch]))?;
        rows(output, texts.len())
    }
}

impl Embedder for ClipModel {
    fn embed(&self, input: EmbeddingInput<'_>) -> Result<Vec<f32>> {
        let mut vectors = self.embed_batch(&[input])?;
        vectors
            .pop()
            .ok_or_else(|| AppError::Model("model returned no embedding".to_string()))
    }

    /// Runs one forward pass per input kind, preserving input order
    fn embed_batch(&self, inputs: &[EmbeddingInput<'_>]) -> Result<Vec<Vec<f32>>> {
        let mut images = Vec::new();
        let mut texts = Vec::new();
        for input in inputs {
            match input {
                EmbeddingInput::Image(bytes) => images.push(*bytes),
                EmbeddingInput::Text(text) => texts.push(*text),
            }
        }

        let mut image_vecs = if images.is_empty() {
            Vec::new()
        } else {
            self.encode_images(&images)?
        }
        .into_iter();
        let mut text_vecs = if texts.is_empty() {
            Vec::new()
        } else {
            self.encode_texts(&texts)?
        }
        .into_iter();

        inputs
            .iter()
            .map(|input| {
                let next = match input {
                    EmbeddingInput::Image(_) => image_vecs.next(),
                    EmbeddingInput::Text(_) => text_vecs.next(),
                };
                next.ok_or_else(|| AppError::Model("model returned too few embeddings".to_string()))
            })
            .collect()
    }
}

fn load_tokenizer(path: &std::path::Path, context_length: usize) -> Result<Tokenizer> {
    let mut tokenizer = Tokenizer::from_file(path)
        .map_err(|e| AppError::Model(format!("failed to load tokenizer {}: {}", path.display(), e)))?;

    tokenizer.with_padding(Some(PaddingParams {
        strategy: PaddingStrategy::Fixed(context_length),
        direction: PaddingDirection::Right,
        pad_to_multiple_of: None,
        pad_id: 0,
        pad_type_id: 0,
        pad_token: "<|endoftext|>".to_string(),
    }));
    tokenizer
        .with_truncation(Some(TruncationParams {
            max_length: context_length,
            strategy: TruncationStrategy::LongestFirst,
            stride: 0,
            direction: TruncationDirection::Right,
        }))
        .map_err(|e| AppError::Model(format!("failed to configure truncation: {}", e)))?;

    Ok(tokenizer)
}

/// Split a `[n, dims]` output tensor into `n` vectors
fn rows(output: Tensor, expected: usize) -> Result<Vec<Vec<f32>>> {
    let output = output.to_kind(Kind::Float).to_device(Device::Cpu);
    let size = output.size();
    if size.len() != 2 || size[0] as usize != expected {
        return Err(AppError::Model(format!(
            "unexpected encoder output shape {:?} for a batch of {}",
            size, expected
        )));
    }

    (0..expected as i64)
        .map(|i| Ok(Vec::<f32>::try_from(output.get(i))?))
        .collect()
}

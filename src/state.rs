use std::path::{Path, PathBuf};

use crate::core::embeddings::Embedder;
use crate::core::gallery::{embed_image_file, StoreBuilder, SUPPORTED_EXTENSIONS};
use crate::core::similarity::{MatchOptions, QueryContext};
use crate::error::{AppError, Result};
use crate::models::matches::BuildReport;
use crate::models::store::EmbeddingStore;

/// Configuration for the application
#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    /// Directory holding the gallery images
    pub gallery_dir: PathBuf,
    /// Path of the persisted embedding store
    pub store_path: PathBuf,
    /// Recognized gallery image extensions
    pub extensions: Vec<String>,
    /// Default threshold and truncation for match requests
    pub matching: MatchOptions,
    /// Embedding model configuration
    pub model: ModelConfig,
}

/// Where to find the CLIP encoders
#[derive(Clone, Debug, PartialEq)]
pub struct ModelConfig {
    /// TorchScript vision encoder
    pub vision_model: Option<PathBuf>,
    /// TorchScript text encoder
    pub text_model: Option<PathBuf>,
    /// HuggingFace `tokenizer.json` matching the text encoder
    pub tokenizer: Option<PathBuf>,
    /// Square input resolution of the vision encoder
    pub image_size: u32,
    /// Token sequence length of the text encoder
    pub context_length: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            gallery_dir: PathBuf::from("assets"),
            store_path: PathBuf::from("db.json"),
            extensions: SUPPORTED_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
            matching: MatchOptions::default(),
            model: ModelConfig::default(),
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            vision_model: None,
            text_model: None,
            tokenizer: None,
            image_size: 224,
            context_length: 77,
        }
    }
}

impl Config {
    /// Load configuration from the environment, reading `.env` first
    ///
    /// Unset variables keep their defaults.
    pub fn from_env() -> Result<Self> {
        if let Ok(path) = dotenv::dotenv() {
            log::debug!("Loaded environment from {}", path.display());
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(dir) = var("IMAGESEARCH_GALLERY_DIR") {
            config.gallery_dir = PathBuf::from(dir);
        }
        if let Some(path) = var("IMAGESEARCH_STORE_PATH") {
            config.store_path = PathBuf::from(path);
        }
        if let Some(list) = var("IMAGESEARCH_EXTENSIONS") {
            config.extensions = parse_extensions(&list)?;
        }
        if let Some(value) = var("IMAGESEARCH_THRESHOLD") {
            config.matching.threshold = value.trim().parse().map_err(|_| {
                AppError::Config(format!("IMAGESEARCH_THRESHOLD is not a number: {}", value))
            })?;
        }
        if let Some(value) = var("IMAGESEARCH_TOP_K") {
            config.matching.top_k = parse_top_k(&value)?;
        }
        config
            .matching
            .validate()
            .map_err(|e| AppError::Config(e.to_string()))?;

        config.model.vision_model = var("IMAGESEARCH_CLIP_VISION").map(PathBuf::from);
        config.model.text_model = var("IMAGESEARCH_CLIP_TEXT").map(PathBuf::from);
        config.model.tokenizer = var("IMAGESEARCH_CLIP_TOKENIZER").map(PathBuf::from);

        Ok(config)
    }
}

fn parse_extensions(list: &str) -> Result<Vec<String>> {
    let extensions: Vec<String> = list
        .split(',')
        .map(|e| e.trim().trim_start_matches('.').to_ascii_lowercase())
        .filter(|e| !e.is_empty())
        .collect();
    if extensions.is_empty() {
        return Err(AppError::Config(
            "IMAGESEARCH_EXTENSIONS lists no extensions".to_string(),
        ));
    }
    Ok(extensions)
}

/// Parse a top-K setting; `all` disables truncation
pub(crate) fn parse_top_k(value: &str) -> Result<Option<usize>> {
    let value = value.trim();
    if value.eq_ignore_ascii_case("all") {
        return Ok(None);
    }
    value
        .parse()
        .map(Some)
        .map_err(|_| AppError::Config(format!("top-k must be a count or `all`, got {}", value)))
}

/// The configuration plus the loaded model, passed explicitly to each request
#[derive(Debug)]
pub struct AppState<E> {
    /// Application configuration
    pub config: Config,
    /// Embedding model
    pub embedder: E,
}

impl<E: Embedder> AppState<E> {
    /// Pair a configuration with an embedding model
    pub fn new(config: Config, embedder: E) -> Self {
        Self { config, embedder }
    }

    /// Whether the store has been built
    pub fn is_initialized(&self) -> bool {
        EmbeddingStore::exists(&self.config.store_path)
    }

    /// Rebuild the store from the configured gallery
    pub fn initialize(&self) -> Result<BuildReport> {
        StoreBuilder::new(&self.config.gallery_dir, &self.config.store_path)
            .with_extensions(self.config.extensions.iter().cloned())
            .build(&self.embedder)
    }

    /// Gallery images under the configured directory
    pub fn gallery_images(&self) -> Result<Vec<PathBuf>> {
        StoreBuilder::new(&self.config.gallery_dir, &self.config.store_path)
            .with_extensions(self.config.extensions.iter().cloned())
            .scan()
    }

    /// Load the store, failing with [`AppError::NotInitialized`] if it was never built
    pub fn load_store(&self) -> Result<EmbeddingStore> {
        EmbeddingStore::load(&self.config.store_path)
    }

    /// Embed a query image into a request context
    pub fn query_image(&self, path: &Path, options: MatchOptions) -> Result<QueryContext> {
        let embedding = embed_image_file(&self.embedder, path)?;
        QueryContext::new(embedding, options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::similarity::{DEFAULT_THRESHOLD, DEFAULT_TOP_K};
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(|_| None).unwrap();

        assert_eq!(config, Config::default());
        assert_eq!(config.gallery_dir, PathBuf::from("assets"));
        assert_eq!(config.store_path, PathBuf::from("db.json"));
        assert_eq!(config.matching.threshold, DEFAULT_THRESHOLD);
        assert_eq!(config.matching.top_k, Some(DEFAULT_TOP_K));
        assert_eq!(config.extensions.len(), 5);
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("IMAGESEARCH_GALLERY_DIR", "/srv/gallery"),
            ("IMAGESEARCH_STORE_PATH", "/srv/db.json"),
            ("IMAGESEARCH_EXTENSIONS", "PNG, .jpg,,jpeg"),
            ("IMAGESEARCH_THRESHOLD", "0.3"),
            ("IMAGESEARCH_TOP_K", "all"),
            ("IMAGESEARCH_CLIP_VISION", "models/visual.pt"),
        ]))
        .unwrap();

        assert_eq!(config.gallery_dir, PathBuf::from("/srv/gallery"));
        assert_eq!(config.store_path, PathBuf::from("/srv/db.json"));
        assert_eq!(config.extensions, vec!["png", "jpg", "jpeg"]);
        assert_eq!(config.matching.threshold, 0.3);
        assert_eq!(config.matching.top_k, None);
        assert_eq!(
            config.model.vision_model,
            Some(PathBuf::from("models/visual.pt"))
        );
        assert_eq!(config.model.text_model, None);
    }

    #[test]
    fn test_invalid_values() {
        for vars in [
            [("IMAGESEARCH_THRESHOLD", "high")],
            [("IMAGESEARCH_THRESHOLD", "2.0")],
            [("IMAGESEARCH_TOP_K", "-1")],
            [("IMAGESEARCH_EXTENSIONS", " , ")],
        ] {
            let err = Config::from_lookup(lookup(&vars)).unwrap_err();
            assert!(matches!(err, AppError::Config(_)), "{:?} -> {:?}", vars, err);
        }
    }

    #[test]
    fn test_parse_top_k() {
        assert_eq!(parse_top_k("5").unwrap(), Some(5));
        assert_eq!(parse_top_k(" ALL ").unwrap(), None);
        assert!(parse_top_k("three").is_err());
    }
}

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

//! # imagesearch
//!
//! Find the gallery images that look most like a query image.
//!
//! A gallery of local images is embedded once with a pretrained
//! vision-language model (CLIP) and persisted as a JSON object mapping file
//! names to vectors. Each query image is embedded the same way and compared
//! against every stored vector by cosine similarity.
//!
//! ## Features
//!
//! - **Store building**: scan a gallery, normalize every image to RGB PNG and
//!   embed it; unreadable images are skipped and reported
//! - **Matching**: threshold, rank and truncate by cosine similarity
//! - **Prompt guessing**: pick the closest of a fixed set of descriptions
//! - **CLIP**: TorchScript encoders via `tch` (feature `embeddings`)
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use imagesearch::{build_store, match_image, Embedder, MatchOptions, Result};
//!
//! fn search(model: &dyn Embedder) -> Result<()> {
//!     let report = build_store(model, "assets", "db.json")?;
//!     println!("stored {} embeddings", report.embedded);
//!
//!     for m in match_image(model, "query.jpg", "db.json", &MatchOptions::default())? {
//!         println!("{}", m);
//!     }
//!     Ok(())
//! }
//! ```

// Internal modules
pub mod core;
/// Defines the application's error types and result aliases.
pub mod error;
pub mod models;
/// Configuration and per-run application state.
pub mod state;
mod utils;

/// Build-time information generated by `build.rs`.
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

// Public API exports
pub use crate::{
    core::embeddings::{Embedder, EmbeddingInput},
    core::gallery::{
        build_store, embed_image_bytes, embed_image_file, normalize_image, scan_gallery,
        StoreBuilder, SUPPORTED_EXTENSIONS,
    },
    core::prompts::{guess_body_prompt, guess_prompt, BodyPrompt},
    core::similarity::{cosine_similarity, find_matches, MatchOptions, QueryContext},
    error::{AppError, Result, ResultExt},
    models::matches::{BuildReport, Match, PromptGuess, SkippedImage},
    models::store::EmbeddingStore,
    state::{AppState, Config, ModelConfig},
};

#[cfg(feature = "embeddings")]
pub use crate::core::clip::ClipModel;

/// Initialize logging
///
/// Honors `RUST_LOG`, defaulting to `info`. Call once, early in `main`.
///
/// # Example
///
/// ```no_run
/// use imagesearch::init;
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     init()?;
///     // Application code here
///     Ok(())
/// }
/// ```
pub fn init() -> Result<()> {
    let env = env_logger::Env::default()
        .default_filter_or("info")
        .default_write_style_or("auto");

    env_logger::Builder::from_env(env)
        .format_timestamp_millis()
        .format_module_path(false)
        .format_target(false)
        .try_init()
        .map_err(|e| AppError::Config(format!("logger already initialized: {}", e)))?;

    log::debug!(
        "imagesearch {} ({} build for {})",
        built_info::PKG_VERSION,
        built_info::PROFILE,
        built_info::TARGET
    );
    #[cfg(not(feature = "embeddings"))]
    log::debug!("Built without the `embeddings` feature; CLIP is unavailable");

    Ok(())
}

/// Load the embedding model described by `config`
///
/// # Errors
///
/// Returns [`AppError::Config`] if no vision encoder is configured or the
/// crate was built without the `embeddings` feature.
#[cfg(feature = "embeddings")]
pub fn load_model(config: &ModelConfig) -> Result<Box<dyn Embedder>> {
    Ok(Box::new(ClipModel::load(config)?))
}

/// Load the embedding model (placeholder)
#[cfg(not(feature = "embeddings"))]
pub fn load_model(_config: &ModelConfig) -> Result<Box<dyn Embedder>> {
    Err(AppError::Config(
        "Embedding model not available - enable the 'embeddings' feature".to_string(),
    ))
}

/// Rank the gallery against a query image file
///
/// This is a convenience function that loads the store, embeds the query
/// and returns the ranked matches.
///
/// # Errors
///
/// Returns [`AppError::NotInitialized`] if the store has not been built, or
/// any error from reading, decoding or embedding the query image.
pub fn match_image<E, P, Q>(
    embedder: &E,
    query_path: P,
    store_path: Q,
    options: &MatchOptions,
) -> Result<Vec<Match>>
where
    E: Embedder + ?Sized,
    P: AsRef<std::path::Path>,
    Q: AsRef<std::path::Path>,
{
    let store = EmbeddingStore::load(store_path)?;
    let query = embed_image_file(embedder, query_path.as_ref())?;
    find_matches(&query, &store, options)
}

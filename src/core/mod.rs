//! Core functionality for embedding, storing and matching images

/// TorchScript CLIP encoders.
#[cfg(feature = "embeddings")]
pub mod clip;
/// The embedding model interface.
pub mod embeddings;
/// Gallery scanning, image normalization and store building.
pub mod gallery;
/// Closed prompt sets and prompt guessing.
pub mod prompts;
/// Cosine similarity and match ranking.
pub mod similarity;

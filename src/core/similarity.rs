use ndarray::ArrayView1;
use serde::{Deserialize, Serialize};

use crate::core::embeddings::Embedder;
use crate::core::gallery::embed_image_bytes;
use crate::core::prompts::{guess_body_prompt, BodyPrompt};
use crate::error::{AppError, Result};
use crate::models::matches::{Match, PromptGuess};
use crate::models::store::EmbeddingStore;

/// Default minimum cosine similarity for a gallery image to count as a match
pub const DEFAULT_THRESHOLD: f32 = 0.5;

/// Default number of matches returned
pub const DEFAULT_TOP_K: usize = 3;

/// Filtering and truncation applied to ranked matches
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MatchOptions {
    /// Minimum similarity, inclusive, in `[-1, 1]`
    pub threshold: f32,
    /// Keep only the `k` best matches; `None` keeps all above the threshold
    pub top_k: Option<usize>,
}

impl Default for MatchOptions {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            top_k: Some(DEFAULT_TOP_K),
        }
    }
}

impl MatchOptions {
    /// Create validated options
    pub fn new(threshold: f32, top_k: Option<usize>) -> Result<Self> {
        let options = Self { threshold, top_k };
        options.validate()?;
        Ok(options)
    }

    /// Check that the threshold is a finite value in `[-1, 1]`
    pub fn validate(&self) -> Result<()> {
        if !self.threshold.is_finite() || !(-1.0..=1.0).contains(&self.threshold) {
            return Err(AppError::InvalidInput(format!(
                "similarity threshold must be within [-1, 1], got {}",
                self.threshold
            )));
        }
        Ok(())
    }
}

/// Compute cosine similarity (`1 - cosine distance`) between two embeddings
///
/// The result is clamped to `[-1, 1]`. A zero vector has no direction, so
/// its similarity to anything is `0.0`.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32> {
    if a.len() != b.len() {
        return Err(AppError::Validation(format!(
            "cannot compare embeddings of {} and {} dimensions",
            a.len(),
            b.len()
        )));
    }
    Ok(cosine(ArrayView1::from(a), ArrayView1::from(b)))
}

fn cosine(a: ArrayView1<'_, f32>, b: ArrayView1<'_, f32>) -> f32 {
    let dot_product = a.dot(&b);
    let norm_a = a.dot(&a).sqrt();
    let norm_b = b.dot(&b).sqrt();

    if norm_a > 0.0 && norm_b > 0.0 {
        (dot_product / (norm_a * norm_b)).min(1.0).max(-1.0)
    } else {
        0.0
    }
}

/// Rank every stored embedding by similarity to `query`
///
/// Entries below `options.threshold` are dropped, the rest are sorted by
/// descending similarity (ties keep store order) and truncated to
/// `options.top_k` when set. An empty store yields no matches.
///
/// # Errors
///
/// Returns an error if the options are invalid, the query holds a NaN or
/// infinite value, or its dimensionality differs from the store's.
pub fn find_matches(
    query: &[f32],
    store: &EmbeddingStore,
    options: &MatchOptions,
) -> Result<Vec<Match>> {
    options.validate()?;

    if let Some(dims) = store.dimensions() {
        if dims != query.len() {
            return Err(AppError::Validation(format!(
                "query embedding has {} dimensions, store has {}",
                query.len(),
                dims
            )));
        }
    }

    if query.iter().any(|x| !x.is_finite()) {
        return Err(AppError::Validation(
            "query embedding has a non-finite value".to_string(),
        ));
    }

    let query = ArrayView1::from(query);
    let mut matches: Vec<Match> = store
        .iter()
        .filter_map(|(name, embedding)| {
            let similarity = cosine(query, ArrayView1::from(embedding));
            (similarity >= options.threshold).then(|| Match {
                name: name.to_string(),
                similarity,
            })
        })
        .collect();

    // `sort_by` is stable, equal scores stay in store order
    matches.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));

    if let Some(k) = options.top_k {
        matches.truncate(k);
    }

    log::debug!(
        "{} of {} gallery images matched at threshold {}",
        matches.len(),
        store.len(),
        options.threshold
    );
    Ok(matches)
}

/// Everything one match request needs, built from the query image
///
/// This is created per request and handed to the matcher; nothing about
/// the query outlives it.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryContext {
    /// Embedding of the query image
    pub embedding: Vec<f32>,
    /// Threshold and truncation for this request
    pub options: MatchOptions,
}

impl QueryContext {
    /// Wrap a precomputed query embedding
    pub fn new(embedding: Vec<f32>, options: MatchOptions) -> Result<Self> {
        options.validate()?;
        if embedding.is_empty() {
            return Err(AppError::InvalidInput("query embedding is empty".to_string()));
        }
        Ok(Self { embedding, options })
    }

    /// Embed encoded query image bytes the same way gallery images are embedded
    pub fn from_image_bytes<E: Embedder + ?Sized>(
        embedder: &E,
        bytes: &[u8],
        options: MatchOptions,
    ) -> Result<Self> {
        let embedding = embed_image_bytes(embedder, bytes)?;
        Self::new(embedding, options)
    }

    /// Rank the store against this query
    pub fn matches(&self, store: &EmbeddingStore) -> Result<Vec<Match>> {
        find_matches(&self.embedding, store, &self.options)
    }

    /// Guess which body prompt best describes the query image
    pub fn guess_body_prompt<E: Embedder + ?Sized>(
        &self,
        embedder: &E,
    ) -> Result<PromptGuess<BodyPrompt>> {
        guess_body_prompt(embedder, &self.embedding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(entries: &[(&str, Vec<f32>)]) -> EmbeddingStore {
        let mut store = EmbeddingStore::new();
        for (name, v) in entries {
            store.insert(*name, v.clone()).unwrap();
        }
        store
    }

    #[test]
    fn test_cosine_similarity() {
        // Identical vectors
        let a = [1.0, 2.0, 3.0];
        assert!((cosine_similarity(&a, &a).unwrap() - 1.0).abs() < 1e-6);

        // Orthogonal vectors
        let a = [1.0, 0.0];
        let b = [0.0, 1.0];
        assert!(cosine_similarity(&a, &b).unwrap().abs() < 1e-6);

        // Opposite vectors
        let b = [-3.0, 0.0];
        assert!((cosine_similarity(&a, &b).unwrap() + 1.0).abs() < 1e-6);

        // Zero vector
        assert_eq!(cosine_similarity(&a, &[0.0, 0.0]).unwrap(), 0.0);

        assert!(matches!(
            cosine_similarity(&a, &[1.0]),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn test_exact_match_ranks_first() {
        let v1 = vec![0.9, 0.1, 0.3];
        let v2 = vec![-0.2, 0.8, 0.5];
        let store = store(&[("a.png", v1.clone()), ("b.png", v2)]);
        let options = MatchOptions::new(0.0, None).unwrap();

        let matches = find_matches(&v1, &store, &options).unwrap();

        assert_eq!(matches[0].name, "a.png");
        assert!((matches[0].similarity - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_threshold_is_inclusive_and_filters() {
        let store = store(&[
            ("same.png", vec![1.0, 0.0]),
            ("diag.png", vec![1.0, 1.0]),
            ("ortho.png", vec![0.0, 1.0]),
            ("opposite.png", vec![-1.0, 0.0]),
        ]);

        let options = MatchOptions::new(0.0, None).unwrap();
        let matches = find_matches(&[1.0, 0.0], &store, &options).unwrap();
        let names: Vec<_> = matches.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["same.png", "diag.png", "ortho.png"]);
        assert!(matches.iter().all(|m| m.similarity >= 0.0));

        let options = MatchOptions::new(0.75, None).unwrap();
        let matches = find_matches(&[1.0, 0.0], &store, &options).unwrap();
        assert_eq!(matches.len(), 1);
    }

    #[test]
    fn test_sorted_descending_with_stable_ties() {
        let store = store(&[
            ("low.png", vec![0.2, 1.0]),
            ("tie_first.png", vec![1.0, 1.0]),
            ("best.png", vec![1.0, 0.0]),
            ("tie_second.png", vec![2.0, 2.0]),
        ]);
        let options = MatchOptions::new(-1.0, None).unwrap();

        let matches = find_matches(&[1.0, 0.0], &store, &options).unwrap();

        let names: Vec<_> = matches.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["best.png", "tie_first.png", "tie_second.png", "low.png"]);
        assert!(matches
            .windows(2)
            .all(|w| w[0].similarity >= w[1].similarity));
    }

    #[test]
    fn test_top_k_truncates_to_available() {
        let store = store(&[
            ("a.png", vec![1.0, 0.0]),
            ("b.png", vec![0.9, 0.1]),
            ("c.png", vec![0.8, 0.2]),
            ("d.png", vec![0.0, 1.0]),
        ]);

        let options = MatchOptions::new(0.5, Some(2)).unwrap();
        assert_eq!(find_matches(&[1.0, 0.0], &store, &options).unwrap().len(), 2);

        // Only three clear the threshold
        let options = MatchOptions::new(0.5, Some(10)).unwrap();
        assert_eq!(find_matches(&[1.0, 0.0], &store, &options).unwrap().len(), 3);
    }

    #[test]
    fn test_empty_store_yields_no_matches() {
        let options = MatchOptions::default();
        let matches = find_matches(&[1.0, 2.0], &EmbeddingStore::new(), &options).unwrap();
        assert!(matches.is_empty());
    }

    #[test]
    fn test_rejects_bad_threshold_and_dimensions() {
        assert!(matches!(
            MatchOptions::new(1.5, None),
            Err(AppError::InvalidInput(_))
        ));
        assert!(MatchOptions::new(f32::NAN, None).is_err());

        let store = store(&[("a.png", vec![1.0, 0.0, 0.0])]);
        let err = find_matches(&[1.0, 0.0], &store, &MatchOptions::default()).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let all = MatchOptions::new(-1.0, None).unwrap();
        let err = find_matches(&[f32::NAN, 0.0, 0.0], &store, &all).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn test_query_context_defaults() {
        let ctx = QueryContext::new(vec![1.0, 0.0], MatchOptions::default()).unwrap();
        assert_eq!(ctx.options.threshold, DEFAULT_THRESHOLD);
        assert_eq!(ctx.options.top_k, Some(DEFAULT_TOP_K));
        assert!(QueryContext::new(Vec::new(), MatchOptions::default()).is_err());
    }
}

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// A gallery image that scored at or above the similarity threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Match {
    /// File name of the gallery image.
    pub name: String,
    /// Cosine similarity to the query, in `[-1, 1]`.
    pub similarity: f32,
}

impl fmt::Display for Match {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}  Similarity: {:.1}%", self.name, self.similarity * 100.0)
    }
}

/// The prompt that best describes an image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptGuess<P> {
    /// The winning prompt.
    pub prompt: P,
    /// Cosine similarity between the image and the prompt.
    pub score: f32,
}

impl<P: fmt::Display> fmt::Display for PromptGuess<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Description guess: {} | Confidence: {:.2}%",
            self.prompt,
            self.score * 100.0
        )
    }
}

/// An image left out of the store, with the reason.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedImage {
    /// File name of the skipped image.
    pub name: String,
    /// Why the image could not be embedded.
    pub reason: String,
}

/// Outcome of building the embedding store from a gallery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildReport {
    /// Where the store was written.
    pub store_path: PathBuf,
    /// Number of images embedded and stored.
    pub embedded: usize,
    /// Images that were skipped.
    pub skipped: Vec<SkippedImage>,
}

impl BuildReport {
    /// Returns `true` if every scanned image made it into the store.
    pub fn is_complete(&self) -> bool {
        self.skipped.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_match_display_as_percentage() {
        let m = Match {
            name: "cat.png".to_string(),
            similarity: 0.8734,
        };
        assert_eq!(m.to_string(), "cat.png  Similarity: 87.3%");
    }

    #[test]
    fn test_prompt_guess_display() {
        let guess = PromptGuess {
            prompt: "A photo of a cat",
            score: 0.25,
        };
        assert_eq!(
            guess.to_string(),
            "Description guess: A photo of a cat | Confidence: 25.00%"
        );
    }
}

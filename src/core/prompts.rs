use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::core::embeddings::{Embedder, EmbeddingInput};
use crate::core::similarity::cosine_similarity;
use crate::error::{AppError, Result};
use crate::models::matches::PromptGuess;

/// Descriptions of how much of a person an image shows
///
/// Serializes as its prompt text, the same string `Display` prints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BodyPrompt {
    /// Only the face
    Face,
    /// Head and torso
    UpperBody,
    /// The whole person
    FullBody,
    /// Only the left arm
    LeftArm,
    /// Only the right arm
    RightArm,
}

impl BodyPrompt {
    /// Every prompt, in the order used for tie-breaking
    pub const ALL: [BodyPrompt; 5] = [
        BodyPrompt::Face,
        BodyPrompt::UpperBody,
        BodyPrompt::FullBody,
        BodyPrompt::LeftArm,
        BodyPrompt::RightArm,
    ];

    /// The text embedded for this prompt
    pub fn as_str(&self) -> &'static str {
        match self {
            BodyPrompt::Face => "A photo of only the face of a person",
            BodyPrompt::UpperBody => "A photo of the upper body of a person",
            BodyPrompt::FullBody => "A photo of the full body of a person",
            BodyPrompt::LeftArm => "A photo of the left arm of a person",
            BodyPrompt::RightArm => "A photo of the right arm of a person",
        }
    }
}

impl AsRef<str> for BodyPrompt {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl fmt::Display for BodyPrompt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BodyPrompt {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        BodyPrompt::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| AppError::InvalidInput(format!("unknown body prompt: {}", s)))
    }
}

impl Serialize for BodyPrompt {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for BodyPrompt {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

/// Pick the prompt whose text embedding is closest to `image_vec`
///
/// Each prompt is embedded with the same model as the image. When several
/// prompts share the top score the first one wins.
pub fn guess_prompt<E, P>(embedder: &E, image_vec: &[f32], prompts: &[P]) -> Result<PromptGuess<P>>
where
    E: Embedder + ?Sized,
    P: AsRef<str> + Clone,
{
    if prompts.is_empty() {
        return Err(AppError::InvalidInput("no prompts to choose from".to_string()));
    }

    let inputs: Vec<_> = prompts
        .iter()
        .map(|p| EmbeddingInput::Text(p.as_ref()))
        .collect();
    let prompt_vecs = embedder.embed_batch(&inputs)?;
    if prompt_vecs.len() != prompts.len() {
        return Err(AppError::Model(format!(
            "expected {} prompt embeddings, model returned {}",
            prompts.len(),
            prompt_vecs.len()
        )));
    }

    let mut best: Option<(usize, f32)> = None;
    for (i, prompt_vec) in prompt_vecs.iter().enumerate() {
        let score = cosine_similarity(image_vec, prompt_vec)?;
        log::trace!("prompt {:?} scored {}", prompts[i].as_ref(), score);
        match best {
            Some((_, top)) if score <= top => {}
            _ => best = Some((i, score)),
        }
    }

    let (index, score) = best.ok_or_else(|| AppError::Internal("no prompt scored".to_string()))?;
    Ok(PromptGuess {
        prompt: prompts[index].clone(),
        score,
    })
}

/// Guess which [`BodyPrompt`] best describes an image embedding
pub fn guess_body_prompt<E: Embedder + ?Sized>(
    embedder: &E,
    image_vec: &[f32],
) -> Result<PromptGuess<BodyPrompt>> {
    guess_prompt(embedder, image_vec, &BodyPrompt::ALL)
}

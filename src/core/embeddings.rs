use crate::error::Result;

/// Something an [`Embedder`] can map into the shared embedding space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EmbeddingInput<'a> {
    /// Encoded image bytes (PNG after normalization).
    Image(&'a [u8]),
    /// A text prompt.
    Text(&'a str),
}

impl EmbeddingInput<'_> {
    /// Short name of the input kind, used in log and error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Image(_) => "image",
            Self::Text(_) => "text",
        }
    }
}

/// A pretrained model that maps images and text into one vector space.
///
/// Implementations must be deterministic: the same input embeds to the same
/// vector, and every vector has the same length.
pub trait Embedder {
    /// Embeds a single input.
    fn embed(&self, input: EmbeddingInput<'_>) -> Result<Vec<f32>>;

    /// Embeds several inputs, returning one vector per input in order.
    ///
    /// The default implementation calls [`Embedder::embed`] for each input.
    fn embed_batch(&self, inputs: &[EmbeddingInput<'_>]) -> Result<Vec<Vec<f32>>> {
        inputs.iter().map(|input| self.embed(*input)).collect()
    }
}

impl<E: Embedder + ?Sized> Embedder for &E {
    fn embed(&self, input: EmbeddingInput<'_>) -> Result<Vec<f32>> {
        (**self).embed(input)
    }

    fn embed_batch(&self, inputs: &[EmbeddingInput<'_>]) -> Result<Vec<Vec<f32>>> {
        (**self).embed_batch(inputs)
    }
}

impl<E: Embedder + ?Sized> Embedder for Box<E> {
    fn embed(&self, input: EmbeddingInput<'_>) -> Result<Vec<f32>> {
        (**self).embed(input)
    }

    fn embed_batch(&self, inputs: &[EmbeddingInput<'_>]) -> Result<Vec<Vec<f32>>> {
        (**self).embed_batch(inputs)
    }
}

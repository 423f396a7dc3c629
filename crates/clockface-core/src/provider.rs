use crate::types::Embedding;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("image could not be decoded: {0}")]
    Decode(String),
    #[error("no usable face in sample")]
    NoFace,
    #[error("inference failed: {0}")]
    Inference(String),
    #[error("embedding provider unavailable")]
    Unavailable,
}

/// Turns a face image into an embedding.
///
/// Implementations are opaque models. They are called once per sample and
/// never retried by the caller.
pub trait EmbeddingProvider: Send + Sync {
    fn extract(&self, image: &[u8]) -> Result<Embedding, ProviderError>;
}

impl<P: EmbeddingProvider + ?Sized> EmbeddingProvider for std::sync::Arc<P> {
    fn extract(&self, image: &[u8]) -> Result<Embedding, ProviderError> {
        (**self).extract(image)
    }
}

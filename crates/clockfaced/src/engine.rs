use clockface_core::arcface::ArcFaceModel;
use clockface_core::{Embedding, EmbeddingProvider, ProviderError};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// A model that needs exclusive access to run inference.
pub trait Embedder: Send + 'static {
    fn embed(&mut self, image: &[u8]) -> Result<Embedding, ProviderError>;
}

impl Embedder for ArcFaceModel {
    fn embed(&mut self, image: &[u8]) -> Result<Embedding, ProviderError> {
        ArcFaceModel::embed(self, image).map_err(ProviderError::from)
    }
}

/// Messages sent from request handlers to the engine thread.
enum EngineRequest {
    Extract {
        image: Vec<u8>,
        reply: oneshot::Sender<Result<Embedding, ProviderError>>,
    },
}

/// Clone-safe handle to the engine thread.
///
/// Calls block the current thread; use it from `spawn_blocking` or a plain
/// OS thread, never directly on an async worker.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EmbeddingProvider for EngineHandle {
    fn extract(&self, image: &[u8]) -> Result<Embedding, ProviderError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .blocking_send(EngineRequest::Extract {
                image: image.to_vec(),
                reply: reply_tx,
            })
            .map_err(|_| ProviderError::Unavailable)?;
        reply_rx.blocking_recv().map_err(|_| ProviderError::Unavailable)?
    }
}

/// Spawn the engine on a dedicated OS thread that owns `model`.
pub fn spawn_engine<M: Embedder>(mut model: M) -> Result<EngineHandle, EngineError> {
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("clockface-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Extract { image, reply } => {
                        let result = model.embed(&image);
                        if let Err(e) = &result {
                            tracing::debug!(error = %e, bytes = image.len(), "extraction failed");
                        }
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })?;

    Ok(EngineHandle { tx })
}

/// Stand-in provider when no model could be loaded. Vector-based calls
/// still work; image-based ones report the provider as unavailable.
pub struct NoModel;

impl EmbeddingProvider for NoModel {
    fn extract(&self, _image: &[u8]) -> Result<Embedding, ProviderError> {
        Err(ProviderError::Unavailable)
    }
}

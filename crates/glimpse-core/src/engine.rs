//! Dedicated inference thread.
//!
//! Model sessions need `&mut self` and burn CPU, so they live on one OS thread
//! and async callers reach them through a cloneable [`EngineHandle`].

use crate::detector::DetectorError;
use crate::embedder::EmbedderError;
use crate::provider::{EmbeddingProvider, FaceLocator};
use crate::types::{BoundingBox, Embedding};
use image::RgbImage;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("embedder error: {0}")]
    Embedder(#[from] EmbedderError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Messages sent from async callers to the engine thread.
enum EngineRequest {
    Locate {
        image: Arc<RgbImage>,
        reply: oneshot::Sender<Result<Vec<BoundingBox>, DetectorError>>,
    },
    Embed {
        face: RgbImage,
        reply: oneshot::Sender<Result<Embedding, EmbedderError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Run face location on the engine thread.
    pub async fn locate(&self, image: Arc<RgbImage>) -> Result<Vec<BoundingBox>, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Locate {
                image,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        Ok(reply_rx.await.map_err(|_| EngineError::ChannelClosed)??)
    }

    /// Run embedding extraction on a cropped face.
    pub async fn embed(&self, face: RgbImage) -> Result<Embedding, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Embed {
                face,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        Ok(reply_rx.await.map_err(|_| EngineError::ChannelClosed)??)
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// The thread owns both models and serves requests until every handle is
/// dropped. Requests whose caller stopped waiting (for example after a frame
/// timeout) are discarded without running the model. A provider panic kills the thread; later requests then fail
/// with [`EngineError::ChannelClosed`].
pub fn spawn_engine<L, E>(mut locator: L, mut embedder: E) -> Result<EngineHandle, EngineError>
where
    L: FaceLocator,
    E: EmbeddingProvider,
{
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("glimpse-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Locate { image, reply } => {
                        if reply.is_closed() {
                            tracing::debug!("skipping abandoned locate request");
                            continue;
                        }
                        let result = locator.locate(&image);
                        if let Err(e) = &result {
                            tracing::debug!(error = %e, "locate failed");
                        }
                        let _ = reply.send(result);
                    }
                    EngineRequest::Embed { face, reply } => {
                        if reply.is_closed() {
                            tracing::debug!("skipping abandoned embed request");
                            continue;
                        }
                        let result = embedder.embed(&face);
                        if let Err(e) = &result {
                            tracing::debug!(error = %e, "embed failed");
                        }
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx })
}

//! Live-stream matching with a single frame in flight.
//!
//! Frames arriving while another one is being processed are dropped on the
//! spot; nothing is queued. The busy flag is a test-and-set atomic released by
//! an RAII guard, so a failing, timed-out or panicking frame cannot leave the
//! matcher stuck.

use crate::crop::crop_face;
use crate::engine::{EngineError, EngineHandle};
use crate::scorer::{Decision, FrameScores, ScoreError, SimilarityScorer};
use crate::types::{Gallery, Prediction, RecognitionState};
use image::RgbImage;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;

#[derive(Error, Debug)]
pub enum FrameError {
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("scoring failed: {0}")]
    Score(#[from] ScoreError),
    #[error("detected face lies outside the frame")]
    EmptyCrop,
    #[error("frame processing exceeded {0:?}")]
    Timeout(Duration),
}

/// Why a frame was not processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Another frame is in flight.
    Busy,
    /// Nothing enrolled yet.
    EmptyGallery,
}

/// What happened to one frame.
#[derive(Debug)]
pub enum FrameOutcome {
    Dropped(DropReason),
    /// A state was published. `prediction` is set when exactly one face was found.
    Completed {
        state: RecognitionState,
        prediction: Option<Prediction>,
    },
    /// Processing failed; no state was published.
    Failed(FrameError),
}

struct Shared {
    engine: EngineHandle,
    scorer: SimilarityScorer,
    frame_timeout: Option<Duration>,
    busy: AtomicBool,
    gallery: watch::Sender<Arc<Gallery>>,
    state: watch::Sender<RecognitionState>,
}

/// Holds the busy flag for one frame; clears it on drop.
struct InFlight {
    shared: Arc<Shared>,
    gallery: Arc<Gallery>,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.shared.busy.store(false, Ordering::Release);
    }
}

/// Matches live frames against the enrolled gallery and publishes the
/// resulting [`RecognitionState`].
#[derive(Clone)]
pub struct StreamMatcher {
    shared: Arc<Shared>,
}

impl StreamMatcher {
    pub fn new(engine: EngineHandle, scorer: SimilarityScorer, frame_timeout: Option<Duration>) -> Self {
        let (gallery, _) = watch::channel(Arc::new(Gallery::new()));
        let (state, _) = watch::channel(RecognitionState::Init);
        Self {
            shared: Arc::new(Shared {
                engine,
                scorer,
                frame_timeout,
                busy: AtomicBool::new(false),
                gallery,
                state,
            }),
        }
    }

    /// Replace the gallery. Frames already in flight keep their snapshot.
    pub fn set_gallery(&self, gallery: Gallery) {
        tracing::info!(
            entries = gallery.len(),
            labels = gallery.labels().len(),
            "gallery installed"
        );
        self.shared.gallery.send_replace(Arc::new(gallery));
    }

    pub fn gallery(&self) -> Arc<Gallery> {
        Arc::clone(&self.shared.gallery.borrow())
    }

    /// Observe state transitions.
    pub fn subscribe(&self) -> watch::Receiver<RecognitionState> {
        self.shared.state.subscribe()
    }

    /// Current state.
    pub fn state(&self) -> RecognitionState {
        self.shared.state.borrow().clone()
    }

    pub fn is_busy(&self) -> bool {
        self.shared.busy.load(Ordering::Acquire)
    }

    /// Fire-and-forget frame entry.
    ///
    /// Returns `None` if the frame was dropped (busy or empty gallery),
    /// otherwise the handle of the spawned processing task, which callers may
    /// ignore. Must be called from within a Tokio runtime.
    pub fn on_frame(&self, frame: RgbImage) -> Option<JoinHandle<FrameOutcome>> {
        match self.try_begin() {
            Ok(slot) => Some(tokio::spawn(run(slot, frame))),
            Err(reason) => {
                tracing::trace!(?reason, "frame dropped");
                None
            }
        }
    }

    /// Process one frame on the caller's task.
    pub async fn process_frame(&self, frame: RgbImage) -> FrameOutcome {
        match self.try_begin() {
            Ok(slot) => run(slot, frame).await,
            Err(reason) => FrameOutcome::Dropped(reason),
        }
    }

    fn try_begin(&self) -> Result<InFlight, DropReason> {
        let gallery = self.gallery();
        if gallery.is_empty() {
            return Err(DropReason::EmptyGallery);
        }
        self.shared
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| DropReason::Busy)?;

        Ok(InFlight {
            shared: Arc::clone(&self.shared),
            gallery,
        })
    }
}

/// Process a frame while holding the busy slot; the slot is released when
/// this returns (or unwinds).
async fn run(slot: InFlight, frame: RgbImage) -> FrameOutcome {
    let started = Instant::now();
    let work = match_frame(&slot.shared, &slot.gallery, frame);

    let result = match slot.shared.frame_timeout {
        Some(limit) => tokio::time::timeout(limit, work)
            .await
            .unwrap_or(Err(FrameError::Timeout(limit))),
        None => work.await,
    };

    let outcome = match result {
        Ok((state, prediction)) => {
            let previous = slot.shared.state.send_replace(state.clone());
            if previous != state {
                tracing::info!(from = ?previous, to = ?state, "recognition state changed");
            }
            FrameOutcome::Completed { state, prediction }
        }
        Err(error) => {
            tracing::warn!(error = %error, "frame processing failed");
            FrameOutcome::Failed(error)
        }
    };

    tracing::debug!(elapsed_ms = started.elapsed().as_millis() as u64, "frame done");
    drop(slot);
    outcome
}

/// Detect, embed and score one frame.
async fn match_frame(
    shared: &Shared,
    gallery: &Gallery,
    frame: RgbImage,
) -> Result<(RecognitionState, Option<Prediction>), FrameError> {
    let frame = Arc::new(frame);
    let faces = shared.engine.locate(Arc::clone(&frame)).await?;

    let [face] = faces.as_slice() else {
        tracing::debug!(faces = faces.len(), "no single subject in frame");
        return Ok((RecognitionState::NoUser, None));
    };

    let crop = crop_face(&frame, face).ok_or(FrameError::EmptyCrop)?;
    let subject = shared.engine.embed(crop).await?;

    let mut scores = FrameScores::new();
    for entry in gallery {
        scores.record(&entry.label, shared.scorer.score(&subject, &entry.embedding)?);
    }

    let decision = shared.scorer.decide(&scores);
    tracing::debug!(
        metric = %shared.scorer.metric(),
        threshold = shared.scorer.threshold(),
        ?decision,
        "frame scored"
    );

    let (state, label) = match decision {
        Decision::Recognized { label, score } => (
            RecognitionState::UserRecognized {
                label: label.clone(),
                score,
            },
            Some(label),
        ),
        Decision::Unknown { .. } => (RecognitionState::UserUnknown, None),
    };

    Ok((
        state,
        Some(Prediction {
            bbox: face.clone(),
            label,
        }),
    ))
}

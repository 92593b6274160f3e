//! Turns a producer's chunk stream into ordered signal pushes.
//!
//! One relay runs per request. Every push goes through `Emitter`, which owns
//! the sink, the step counter and the cancellation token, so the ordering
//! rules live in one place:
//!
//! - `{loading, result, error, step:0}` first, then `step` 1 and 2 around
//!   `start`;
//! - `step` 3 once, on the first partial or final chunk;
//! - exactly one terminal push: `{step:4, result, loading:false}` on success
//!   or `{error, loading:false, step:0}` on failure;
//! - nothing at all once the token is cancelled or the sink refuses a write.

use log::{debug, info, warn};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::services::producer::{Chunk, ContentProducer};
use crate::services::push_sink::PushSink;
use crate::types::{SignalPatch, Step, StreamRequest};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RelayError {
    #[error("Failed to start: {0}")]
    ProducerStart(String),

    #[error("Stream error: {0}")]
    ProducerStream(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOutcome {
    Completed { result_len: usize },
    Failed(RelayError),
    Cancelled,
}

/// Strictly increasing progress counter.
#[derive(Debug, Default)]
pub struct StepTracker {
    current: Step,
}

impl StepTracker {
    pub fn current(&self) -> Step {
        self.current
    }

    /// Moves to `step` if it is ahead of the current one.
    pub fn advance(&mut self, step: Step) -> bool {
        if step > self.current {
            self.current = step;
            true
        } else {
            false
        }
    }
}

// Marker for "the client is gone, stop quietly".
struct Disconnected;

struct Emitter<'a, S: ?Sized> {
    sink: &'a mut S,
    cancel: &'a CancellationToken,
    steps: StepTracker,
}

impl<S: PushSink + ?Sized> Emitter<'_, S> {
    async fn push(&mut self, patch: SignalPatch) -> Result<(), Disconnected> {
        if self.cancel.is_cancelled() {
            return Err(Disconnected);
        }
        if let Err(e) = self.sink.push(&patch).await {
            warn!("Dropping stream: {e}");
            self.cancel.cancel();
            return Err(Disconnected);
        }
        Ok(())
    }

    async fn step(&mut self, step: Step) -> Result<(), Disconnected> {
        if self.steps.advance(step) {
            debug!("Advancing to step {}", u8::from(step));
            self.push(SignalPatch::step(step)).await?;
        }
        Ok(())
    }

    async fn complete(mut self, result: String) -> RelayOutcome {
        let result_len = result.len();
        self.steps.advance(Step::Complete);
        match self.push(SignalPatch::completed(result)).await {
            Ok(()) => RelayOutcome::Completed { result_len },
            Err(Disconnected) => RelayOutcome::Cancelled,
        }
    }

    async fn fail(mut self, error: RelayError) -> RelayOutcome {
        match self.push(SignalPatch::failed(error.to_string())).await {
            Ok(()) => RelayOutcome::Failed(error),
            Err(Disconnected) => RelayOutcome::Cancelled,
        }
    }
}

/// Runs one request from the initial push to its terminal push.
///
/// The producer gets a child of `cancel`, cancelled again when the relay
/// returns, so it never outlives the request.
pub async fn relay<P, S>(
    request: &StreamRequest,
    producer: &mut P,
    sink: &mut S,
    cancel: &CancellationToken,
) -> RelayOutcome
where
    P: ContentProducer + ?Sized,
    S: PushSink + ?Sized,
{
    let producer_token = cancel.child_token();
    let _release = producer_token.clone().drop_guard();

    let mut emitter = Emitter {
        sink,
        cancel,
        steps: StepTracker::default(),
    };

    if emitter.push(SignalPatch::initial()).await.is_err() {
        return RelayOutcome::Cancelled;
    }
    if emitter.step(Step::Dispatched).await.is_err() {
        return RelayOutcome::Cancelled;
    }

    info!("Dispatching request to {} producer", producer.name());
    let mut chunks = match producer.start(request, producer_token).await {
        Ok(chunks) => chunks,
        Err(e) => {
            if cancel.is_cancelled() {
                return RelayOutcome::Cancelled;
            }
            return emitter.fail(RelayError::ProducerStart(e.to_string())).await;
        }
    };

    if emitter.step(Step::Opened).await.is_err() {
        return RelayOutcome::Cancelled;
    }

    let accumulation = producer.accumulation();
    let mut buffer = String::new();
    let mut final_text: Option<String> = None;

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return RelayOutcome::Cancelled,
            next = chunks.recv() => next,
        };
        let Some(chunk) = next else { break };

        if cancel.is_cancelled() {
            return RelayOutcome::Cancelled;
        }

        match chunk {
            Chunk::Error(cause) => {
                return emitter.fail(RelayError::ProducerStream(cause)).await;
            }
            Chunk::Partial(text) => {
                if emitter.step(Step::Receiving).await.is_err() {
                    return RelayOutcome::Cancelled;
                }
                accumulation.apply(&mut buffer, text);
                if emitter.push(SignalPatch::result(buffer.as_str())).await.is_err() {
                    return RelayOutcome::Cancelled;
                }
            }
            Chunk::Final(text) => {
                if emitter.step(Step::Receiving).await.is_err() {
                    return RelayOutcome::Cancelled;
                }
                final_text = Some(text);
            }
        }
    }

    emitter.complete(final_text.unwrap_or(buffer)).await
}

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::types::StreamRequest;

/// Capacity of the producer -> relay channel.
pub const CHUNK_BUFFER: usize = 32;

pub type ChunkReceiver = mpsc::Receiver<Chunk>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Chunk {
    /// Content so far; the stream continues.
    Partial(String),
    /// Authoritative content; overrides anything accumulated from partials.
    Final(String),
    /// The stream failed with this cause.
    Error(String),
}

/// How a producer's partial chunks relate to the running result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accumulation {
    /// Each partial already carries the whole text produced so far.
    Replace,
    /// Each partial is a delta to append.
    Append,
}

impl Accumulation {
    pub fn apply(self, buffer: &mut String, text: String) {
        match self {
            Accumulation::Replace => *buffer = text,
            Accumulation::Append => buffer.push_str(&text),
        }
    }
}

#[derive(Error, Debug)]
pub enum ProducerError {
    #[error("{0}")]
    Unavailable(String),

    #[error("upstream returned {status}: {message}")]
    Upstream { status: u16, message: String },
}

/// A source of content chunks for one request.
///
/// `start` hands back the receiving half of an ordered channel. The producer
/// must stop sending and release what it holds once `cancel` fires.
#[async_trait]
pub trait ContentProducer: Send {
    fn name(&self) -> &'static str;

    fn accumulation(&self) -> Accumulation;

    async fn start(
        &mut self,
        request: &StreamRequest,
        cancel: CancellationToken,
    ) -> Result<ChunkReceiver, ProducerError>;
}

/// Sends a chunk unless the relay has gone away or cancellation fired first.
/// Returns `false` when the producer should stop.
pub(crate) async fn forward(
    tx: &mpsc::Sender<Chunk>,
    cancel: &CancellationToken,
    chunk: Chunk,
) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        sent = tx.send(chunk) => sent.is_ok(),
    }
}

use async_trait::async_trait;
use axum::response::sse::Event;
use std::convert::Infallible;
use std::str::FromStr;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::types::SignalPatch;

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("client disconnected")]
    Closed,

    #[error("failed to encode signals: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Event name carried by every signal push. Datastar renamed it in 1.0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalFraming {
    MergeSignals,
    PatchSignals,
}

impl SignalFraming {
    pub fn event_name(self) -> &'static str {
        match self {
            SignalFraming::MergeSignals => "datastar-merge-signals",
            SignalFraming::PatchSignals => "datastar-patch-signals",
        }
    }

    pub fn event(self, patch: &SignalPatch) -> Result<Event, SinkError> {
        let signals = serde_json::to_string(patch)?;
        Ok(Event::default()
            .event(self.event_name())
            .data(format!("signals {signals}")))
    }
}

impl FromStr for SignalFraming {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "merge" | "datastar-merge-signals" => Ok(SignalFraming::MergeSignals),
            "patch" | "datastar-patch-signals" => Ok(SignalFraming::PatchSignals),
            other => Err(format!("unknown datastar event: {other}")),
        }
    }
}

/// One-way channel to a connected client. Only the relay writes to it.
#[async_trait]
pub trait PushSink: Send {
    async fn push(&mut self, patch: &SignalPatch) -> Result<(), SinkError>;
}

/// Feeds signal patches into the channel backing an SSE response.
pub struct EventSink {
    tx: mpsc::Sender<Result<Event, Infallible>>,
    framing: SignalFraming,
}

impl EventSink {
    pub fn new(tx: mpsc::Sender<Result<Event, Infallible>>, framing: SignalFraming) -> Self {
        Self { tx, framing }
    }
}

#[async_trait]
impl PushSink for EventSink {
    async fn push(&mut self, patch: &SignalPatch) -> Result<(), SinkError> {
        let event = self.framing.event(patch)?;
        self.tx.send(Ok(event)).await.map_err(|_| SinkError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Step;

    #[test]
    fn test_framing_parses_short_and_full_names() {
        assert_eq!("merge".parse::<SignalFraming>(), Ok(SignalFraming::MergeSignals));
        assert_eq!("PATCH".parse::<SignalFraming>(), Ok(SignalFraming::PatchSignals));
        assert_eq!(
            "datastar-patch-signals".parse::<SignalFraming>(),
            Ok(SignalFraming::PatchSignals)
        );
        assert!("fragments".parse::<SignalFraming>().is_err());
    }

    #[tokio::test]
    async fn test_push_fails_once_receiver_is_gone() {
        let (tx, rx) = mpsc::channel(1);
        let mut sink = EventSink::new(tx, SignalFraming::MergeSignals);

        sink.push(&SignalPatch::step(Step::Dispatched)).await.unwrap();
        drop(rx);

        let err = sink.push(&SignalPatch::step(Step::Opened)).await.unwrap_err();
        assert!(matches!(err, SinkError::Closed));
    }
}

use axum::{
    extract::{Query, State},
    response::sse::{Event, Sse},
};
use dashmap::{mapref::entry::Entry, DashMap};
use futures::stream::Stream;
use log::{info, warn};
use std::{
    collections::HashMap,
    convert::Infallible,
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
    time::Duration,
};
use tokio::{sync::mpsc, time::Instant};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{services::relay::RelayOutcome, state::AppState};

/// Events buffered between the relay task and the response body.
const EVENT_BUFFER: usize = 16;

/// SSE body that ends as soon as its token is cancelled, and cancels the
/// token when the client goes away and the body is dropped.
pub struct CancellableSseStream {
    receiver: mpsc::Receiver<Result<Event, Infallible>>,
    cancel_token: CancellationToken,
}

impl Stream for CancellableSseStream {
    type Item = Result<Event, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.cancel_token.is_cancelled() {
            return Poll::Ready(None);
        }
        self.receiver.poll_recv(cx)
    }
}

impl Drop for CancellableSseStream {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

struct Registration {
    token: CancellationToken,
    lease: Uuid,
    claimed: bool,
    created: Instant,
}

impl Registration {
    fn new(claimed: bool) -> Self {
        Self {
            token: CancellationToken::new(),
            lease: Uuid::new_v4(),
            claimed,
            created: Instant::now(),
        }
    }

    fn claim(&self, id: String) -> StreamClaim {
        StreamClaim {
            id,
            lease: self.lease,
            token: self.token.clone(),
        }
    }
}

/// A relay's hold on a registry entry. Only the holder of the matching lease
/// can remove the entry when the relay ends.
#[derive(Debug, Clone)]
pub struct StreamClaim {
    pub id: String,
    pub lease: Uuid,
    pub token: CancellationToken,
}

/// Stream id registry. Ids minted by `/api/create-stream` sit unclaimed until
/// a relay picks them up, and expire after `ttl` if none does.
#[derive(Clone)]
pub struct SseState {
    streams: Arc<DashMap<String, Registration>>,
    ttl: Duration,
}

impl SseState {
    pub fn new(ttl: Duration) -> Self {
        Self {
            streams: Arc::new(DashMap::new()),
            ttl,
        }
    }

    /// Mints an id for a relay that has not started yet.
    pub fn reserve_stream(&self) -> String {
        self.prune_unclaimed();

        let id = Uuid::new_v4().to_string();
        self.streams.insert(id.clone(), Registration::new(false));
        id
    }

    /// Binds a relay to `requested`, or to a fresh id when none was given or
    /// another relay already holds it.
    pub fn claim_stream(&self, requested: Option<String>) -> StreamClaim {
        if let Some(id) = requested {
            match self.streams.entry(id.clone()) {
                Entry::Occupied(mut entry) if !entry.get().claimed => {
                    let registration = entry.get_mut();
                    registration.claimed = true;
                    return registration.claim(id);
                }
                Entry::Occupied(_) => {
                    warn!("Stream {id} is already running, relaying under a new id")
                }
                Entry::Vacant(entry) => return entry.insert(Registration::new(true)).claim(id),
            }
        }

        let id = Uuid::new_v4().to_string();
        let registration = Registration::new(true);
        let claim = registration.claim(id.clone());
        self.streams.insert(id, registration);
        claim
    }

    pub fn cancel_stream(&self, id: &str) -> bool {
        if let Some((_, registration)) = self.streams.remove(id) {
            registration.token.cancel();
            true
        } else {
            false
        }
    }

    /// Drops the entry unless it has since been cancelled and re-registered.
    pub fn finish_stream(&self, claim: &StreamClaim) {
        self.streams
            .remove_if(&claim.id, |_, registration| registration.lease == claim.lease);
    }

    pub fn is_registered(&self, id: &str) -> bool {
        self.streams.contains_key(id)
    }

    fn prune_unclaimed(&self) {
        let ttl = self.ttl;
        self.streams
            .retain(|_, registration| registration.claimed || registration.created.elapsed() < ttl);
    }
}

/// Spawns `process_fn` against a fresh event channel and returns the SSE
/// response reading from it.
///
/// The task's token is cancelled by `/api/cancel-stream`, by the client
/// disconnecting, or once `timeout` elapses.
pub fn create_cancellable_sse_stream<F, Fut>(
    state: SseState,
    claim: StreamClaim,
    timeout: Duration,
    process_fn: F,
) -> Sse<CancellableSseStream>
where
    F: FnOnce(mpsc::Sender<Result<Event, Infallible>>, CancellationToken) -> Fut + Send + 'static,
    Fut: Future<Output = RelayOutcome> + Send + 'static,
{
    let (tx, rx) = mpsc::channel(EVENT_BUFFER);
    let cancel_token = claim.token.clone();

    tokio::spawn(async move {
        let stream_id = &claim.id;
        let work = process_fn(tx, claim.token.clone());
        let outcome = match tokio::time::timeout(timeout, work).await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!("Stream {stream_id} timed out after {timeout:?}");
                claim.token.cancel();
                RelayOutcome::Cancelled
            }
        };

        match &outcome {
            RelayOutcome::Completed { result_len } => {
                info!("Stream {stream_id} completed with {result_len} bytes")
            }
            RelayOutcome::Failed(e) => warn!("Stream {stream_id} failed: {e}"),
            RelayOutcome::Cancelled => info!("Stream {stream_id} cancelled"),
        }
        state.finish_stream(&claim);
    });

    Sse::new(CancellableSseStream {
        receiver: rx,
        cancel_token,
    })
}

pub async fn cancel_stream(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> &'static str {
    if let Some(stream_id) = params.get("stream_id") {
        info!("Cancelling stream: {stream_id}");
        if state.sse_state.cancel_stream(stream_id) {
            "Stream cancelled"
        } else {
            "Stream not found"
        }
    } else {
        "No stream ID provided"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(300);

    #[test]
    fn test_claim_reuses_reserved_token() {
        let state = SseState::new(TTL);
        let id = state.reserve_stream();
        let claim = state.claim_stream(Some(id.clone()));

        assert_eq!(claim.id, id);
        assert!(state.cancel_stream(&id));
        assert!(claim.token.is_cancelled());
        assert!(!state.is_registered(&id));
    }

    #[test]
    fn test_second_claim_on_running_id_gets_its_own_token() {
        let state = SseState::new(TTL);
        let first = state.claim_stream(Some("abc".into()));
        let second = state.claim_stream(Some("abc".into()));

        assert_eq!(first.id, "abc");
        assert_ne!(second.id, "abc");

        second.token.cancel();
        state.finish_stream(&second);
        assert!(!first.token.is_cancelled());
        assert!(state.is_registered("abc"));
        assert!(!state.is_registered(&second.id));

        assert!(state.cancel_stream("abc"));
        assert!(first.token.is_cancelled());
    }

    #[test]
    fn test_finish_leaves_newer_registration_alone() {
        let state = SseState::new(TTL);
        let old = state.claim_stream(Some("abc".into()));
        assert!(state.cancel_stream("abc"));

        let new = state.claim_stream(Some("abc".into()));
        assert_eq!(new.id, "abc");
        state.finish_stream(&old);
        assert!(state.is_registered("abc"));

        state.finish_stream(&new);
        assert!(!state.is_registered("abc"));
    }

    #[test]
    fn test_claim_without_id_mints_one() {
        let state = SseState::new(TTL);
        let claim = state.claim_stream(None);
        assert!(Uuid::parse_str(&claim.id).is_ok());
        assert!(state.is_registered(&claim.id));
    }

    #[test]
    fn test_cancel_unknown_stream() {
        let state = SseState::new(TTL);
        assert!(!state.cancel_stream("missing"));
    }

    #[test]
    fn test_finish_does_not_cancel() {
        let state = SseState::new(TTL);
        let claim = state.claim_stream(Some("done".into()));
        state.finish_stream(&claim);
        assert!(!claim.token.is_cancelled());
        assert!(!state.is_registered("done"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unclaimed_ids_expire_on_next_reservation() {
        let state = SseState::new(Duration::from_secs(10));
        let stale: Vec<String> = (0..100).map(|_| state.reserve_stream()).collect();
        let running = state.claim_stream(Some(stale[0].clone()));

        tokio::time::advance(Duration::from_secs(11)).await;
        let fresh = state.reserve_stream();

        assert!(state.is_registered(&fresh));
        assert!(state.is_registered(&running.id));
        assert_eq!(stale.iter().filter(|id| state.is_registered(id)).count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reserved_id_survives_within_ttl() {
        let state = SseState::new(Duration::from_secs(10));
        let id = state.reserve_stream();

        tokio::time::advance(Duration::from_secs(5)).await;
        state.reserve_stream();

        assert!(state.is_registered(&id));
    }
}

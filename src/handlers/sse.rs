use axum::{
    extract::{Query, State},
    response::{
        sse::{Event, Sse},
        IntoResponse, Response,
    },
    http::StatusCode,
    Json,
};
use futures::stream;
use log::{error, info};
use serde::Deserialize;
use std::convert::Infallible;

use crate::{
    cancellable_sse::{create_cancellable_sse_stream, CancellableSseStream},
    error::AppError,
    handlers::input::TweakInput,
    services::{
        push_sink::{EventSink, SignalFraming},
        relay::relay,
        validation::validate,
    },
    state::AppState,
    types::{SignalPatch, StreamRequest, StreamResponse},
};

#[derive(Debug, Default, Deserialize)]
pub struct StreamParams {
    pub stream_id: Option<String>,
}

pub async fn create_stream(State(state): State<AppState>) -> Json<StreamResponse> {
    let stream_id = state.sse_state.reserve_stream();

    info!("Created SSE stream: {stream_id}");

    Json(StreamResponse { stream_id })
}

/// Datastar binding: every outcome, including a rejected request, arrives as
/// signal pushes on the event stream.
pub async fn tweak_stream(
    State(state): State<AppState>,
    Query(params): Query<StreamParams>,
    input: Result<TweakInput, AppError>,
) -> Response {
    let framing = state.config.framing;

    let request = input
        .map_err(|AppError::Validation(e)| e)
        .and_then(|TweakInput(form)| validate(form));

    match request {
        Ok(request) => start_relay(&state, params.stream_id, request).into_response(),
        Err(e) => {
            info!("Rejecting tweak request: {e}");
            rejection_stream(framing, e.to_string())
        }
    }
}

/// JSON binding: rejected requests get a plain 400 before any stream opens.
pub async fn tweak_stream_json(
    State(state): State<AppState>,
    Query(params): Query<StreamParams>,
    TweakInput(form): TweakInput,
) -> Result<Sse<CancellableSseStream>, AppError> {
    let request = validate(form)?;
    Ok(start_relay(&state, params.stream_id, request))
}

fn start_relay(
    state: &AppState,
    stream_id: Option<String>,
    request: StreamRequest,
) -> Sse<CancellableSseStream> {
    let claim = state.sse_state.claim_stream(stream_id);
    let framing = state.config.framing;
    let mut producer = state.producer();

    info!("Starting {} stream: {}", producer.name(), claim.id);

    create_cancellable_sse_stream(
        state.sse_state.clone(),
        claim,
        state.config.stream_timeout,
        move |tx, token| async move {
            let mut sink = EventSink::new(tx, framing);
            relay(&request, producer.as_mut(), &mut sink, &token).await
        },
    )
}

// A one-event stream carrying the terminal error state.
fn rejection_stream(framing: SignalFraming, message: String) -> Response {
    match framing.event(&SignalPatch::failed(message)) {
        Ok(event) => {
            let events = stream::once(async move { Ok::<Event, Infallible>(event) });
            Sse::new(events).into_response()
        }
        Err(e) => {
            error!("Failed to encode rejection: {e}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

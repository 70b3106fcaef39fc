//! Server-Sent Events stream of heart-rate readings

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::{Stream, StreamExt};
use std::convert::Infallible;
use tracing::{debug, warn};

use crate::error::ApiResult;
use crate::relay::{self, SessionConfig};
use crate::AppState;

/// GET /heartrate/stream
///
/// `initial_reading` events for the newest readings, then a `new_reading`
/// event for every reading relayed while the client stays connected.
pub async fn reading_stream(
    State(state): State<AppState>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    if state.listener.ensure_listening()? {
        debug!("Reading listener started by stream request");
    }

    // Subscribe before the replay is fetched so nothing written meanwhile is lost
    let subscriber = state.hub.subscribe();
    debug!("New SSE client connected: {}", subscriber.id());

    let events = relay::reading_stream(
        state.readings.clone(),
        subscriber,
        SessionConfig::from(&state.relay),
    )
    .filter_map(|event| async move {
        match event.to_sse_event() {
            Ok(sse_event) => Some(Ok::<_, Infallible>(sse_event)),
            Err(e) => {
                warn!("Failed to serialize reading {}: {}", event.id(), e);
                None
            }
        }
    });

    Ok(Sse::new(events).keep_alive(
        KeepAlive::new()
            .interval(state.relay.keep_alive_interval())
            .text("keep-alive"),
    ))
}

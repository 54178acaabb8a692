use std::convert::Infallible;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use futures::StreamExt;
use tokio_stream::wrappers::BroadcastStream;

use super::AppState;

/// `GET /metrics`: one SSE event per snapshot, ~2 Hz. No per-connection
/// state; reconnecting just resumes from the next snapshot.
pub async fn stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.metrics.subscribe();
    let events = BroadcastStream::new(rx).filter_map(|item| async move {
        match item {
            Ok(snapshot) => Event::default().json_data(snapshot.as_ref()).ok().map(Ok),
            // This observer lagged behind the sampler; drop the missed
            // snapshots and continue with fresh ones.
            Err(_) => None,
        }
    });
    Sse::new(events).keep_alive(KeepAlive::default())
}

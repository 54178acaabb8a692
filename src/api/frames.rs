use std::convert::Infallible;
use std::time::Duration;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use chrono::Utc;
use futures::stream::Stream;
use futures::StreamExt;
use serde::Serialize;
use tokio_stream::wrappers::IntervalStream;

use crate::frame::InspectorRecord;

use super::AppState;

#[derive(Debug, Serialize)]
struct FramesResponse {
    frames: Vec<InspectorRecord>,
    timestamp: f64,
}

/// `GET /frames`: debugging stream of the most recent frames seen anywhere in
/// the pipeline, newest first.
pub async fn stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let inspector = state.runtime.inspector().clone();
    let events = IntervalStream::new(tokio::time::interval(Duration::from_millis(500)))
        .filter_map(move |_| {
            let response = FramesResponse {
                frames: inspector.recent(),
                timestamp: Utc::now().timestamp_micros() as f64 / 1e6,
            };
            async move { Event::default().json_data(&response).ok().map(Ok) }
        });
    Sse::new(events).keep_alive(KeepAlive::default())
}

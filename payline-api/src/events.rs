use axum::{
    extract::{Query, State},
    response::sse::{Event, KeepAlive, Sse},
    routing::get,
    Router,
};
use futures_util::{Stream, StreamExt};
use serde::Deserialize;
use std::convert::Infallible;
use tokio_stream::wrappers::BroadcastStream;
use uuid::Uuid;

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct EventStreamQuery {
    pub order_id: Option<Uuid>,
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/v1/events", get(stream_events))
}

/// GET /v1/events
/// Server-sent stream of payment events, optionally for one order
pub async fn stream_events(
    State(state): State<AppState>,
    Query(query): Query<EventStreamQuery>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.events.subscribe();
    let wanted = query.order_id.map(|id| id.to_string());

    let stream = BroadcastStream::new(rx).filter_map(move |result| {
        let wanted = wanted.clone();
        async move {
            // Lagged receivers skip what they missed
            let event = result.ok()?;
            if let Some(order_id) = wanted {
                if event.payload["order_id"].as_str() != Some(order_id.as_str()) {
                    return None;
                }
            }
            let data = serde_json::to_string(&event).ok()?;
            Some(Ok(Event::default().event(event.name.clone()).data(data)))
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

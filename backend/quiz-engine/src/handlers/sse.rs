use axum::{
    extract::State,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse,
    },
};
use futures::stream::{self, Stream};
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};

use crate::metrics::SSE_CONNECTIONS_ACTIVE;
use crate::models::timer::TimerEvent;
use crate::services::AppState;

/// SSE endpoint for timer events
/// GET /api/v1/quiz/stream
pub async fn quiz_stream(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    tracing::info!("Client connected to quiz event stream");
    let stream = create_event_stream(state.quiz.subscribe());
    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// Decrements the connection gauge when the client goes away.
struct ConnectionGuard;

impl ConnectionGuard {
    fn new() -> Self {
        SSE_CONNECTIONS_ACTIVE.inc();
        ConnectionGuard
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        SSE_CONNECTIONS_ACTIVE.dec();
    }
}

/// Forwards engine events until the quiz finishes. A slow client that falls
/// behind skips the missed ticks rather than disconnecting.
fn create_event_stream(
    receiver: broadcast::Receiver<TimerEvent>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    stream::unfold(
        (receiver, ConnectionGuard::new(), false),
        |(mut rx, guard, finished)| async move {
            if finished {
                return None;
            }

            loop {
                match rx.recv().await {
                    Ok(event) => {
                        let done = matches!(event, TimerEvent::SessionFinished(_));
                        let sse = Event::default()
                            .event(event.event_name())
                            .data(event.to_sse_data());
                        return Some((Ok(sse), (rx, guard, done)));
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::debug!("SSE client lagged, skipped {} events", skipped);
                    }
                    Err(RecvError::Closed) => return None,
                }
            }
        },
    )
}

//! Server-sent events for live map updates.
//!
//! Connect to `/api/nodes/stream`. The first event is `ready` with an empty
//! JSON object; after that every accepted ping produces a `ping` event
//! carrying the node's updated marker. Keep-alive comments go out every
//! 15 seconds. A subscriber that falls behind the bounded channel skips the
//! events it missed and carries on.

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::{self, Stream, StreamExt};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, warn};

use crate::map::MapMarker;
use crate::node::MeshworkState;

/// Capacity of the presence broadcast channel.
pub const PRESENCE_CHANNEL_CAPACITY: usize = 1024;

/// Interval between keep-alive comments.
pub const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Events delivered to a map subscriber.
#[derive(Debug, Clone, PartialEq)]
pub enum PresenceEvent {
    /// Sent once at connect
    Ready,
    /// A node was seen
    Ping(MapMarker),
}

impl PresenceEvent {
    fn into_sse(self) -> Option<Event> {
        match self {
            PresenceEvent::Ready => Some(Event::default().event("ready").data("{}")),
            PresenceEvent::Ping(marker) => match Event::default().event("ping").json_data(&marker) {
                Ok(event) => Some(event),
                Err(e) => {
                    warn!("Failed to encode presence event: {}", e);
                    None
                }
            },
        }
    }
}

/// `ready`, then one `ping` per broadcast marker until the channel closes.
pub fn presence_events(rx: broadcast::Receiver<MapMarker>) -> impl Stream<Item = PresenceEvent> {
    let updates = stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(marker) => return Some((PresenceEvent::Ping(marker), rx)),
                Err(RecvError::Lagged(skipped)) => {
                    debug!(skipped, "presence subscriber lagged");
                    continue;
                }
                Err(RecvError::Closed) => return None,
            }
        }
    });
    stream::once(async { PresenceEvent::Ready }).chain(updates)
}

/// SSE handler for live map updates.
pub async fn nodes_stream_handler(
    State(state): State<Arc<MeshworkState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    info!("Map stream client connected");
    let events = presence_events(state.presence_tx.subscribe())
        .filter_map(|event| async move { event.into_sse().map(Ok) });
    Sse::new(events).keep_alive(KeepAlive::new().interval(KEEP_ALIVE_INTERVAL))
}

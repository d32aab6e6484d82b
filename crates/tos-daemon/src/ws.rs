//! WebSocket subscribers for `GET /ws/orders`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures_util::{
    stream::{SplitSink, StreamExt},
    SinkExt,
};
use tokio::sync::{Mutex, Notify};
use tracing::{debug, info};

use crate::registry::{DeliveryError, Subscriber, SubscriberRegistry};

/// Upper bound on flushing a Close frame to a peer that may not be reading.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Write half of an accepted WebSocket. The mutex keeps concurrent
/// broadcasts from interleaving frames on one socket.
///
/// The sink is taken out (and the socket torn down) when the connection
/// ends, whether the peer left or the registry dropped it.
pub struct WsSubscriber {
    sink: Mutex<Option<SplitSink<WebSocket, Message>>>,
    dropped: Notify,
}

impl WsSubscriber {
    pub fn new(sink: SplitSink<WebSocket, Message>) -> Self {
        Self {
            sink: Mutex::new(Some(sink)),
            dropped: Notify::new(),
        }
    }

    /// Resolves once the registry has dropped this subscriber.
    async fn dropped(&self) {
        self.dropped.notified().await
    }

    /// Finish the connection: try a Close frame, then release the sink.
    ///
    /// A send cancelled by the broadcast timeout may have left a partial
    /// frame buffered; closing flushes it ahead of the Close frame, and if
    /// the peer will not read, the socket is dropped instead so the client
    /// sees the stream end rather than a silent, half-written one.
    async fn shutdown(&self) {
        let Some(mut sink) = self.sink.lock().await.take() else {
            return;
        };
        match tokio::time::timeout(CLOSE_GRACE, sink.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(error = %e, "close frame not sent"),
            Err(_) => debug!("peer not reading; dropping socket without close frame"),
        }
    }
}

#[async_trait]
impl Subscriber for WsSubscriber {
    async fn deliver(&self, text: &str) -> Result<(), DeliveryError> {
        let mut guard = self.sink.lock().await;
        let sink = guard.as_mut().ok_or(DeliveryError::Closed)?;
        sink.send(Message::Text(text.to_string()))
            .await
            .map_err(|e| DeliveryError::Transport(e.to_string()))
    }

    fn on_dropped(&self) {
        // notify_one stores a permit, so this is not lost if the connection
        // task is between polls.
        self.dropped.notify_one();
    }
}

/// Serve one subscriber connection until the peer goes away or the registry
/// drops it after a failed delivery.
///
/// Inbound frames are read only to notice the close; their content is
/// discarded.
pub async fn serve_subscriber(socket: WebSocket, registry: Arc<SubscriberRegistry>) {
    let (sink, mut inbound) = socket.split();
    let sub = Arc::new(WsSubscriber::new(sink));
    let id = registry.register(sub.clone()).await;
    info!(subscriber_id = %id, "subscriber connected");

    let reason = loop {
        tokio::select! {
            _ = sub.dropped() => break "dropped after failed delivery",
            msg = inbound.next() => match msg {
                Some(Ok(Message::Close(_))) | None => break "peer closed",
                Some(Err(_)) => break "transport error",
                Some(Ok(_)) => {}
            },
        }
    };

    // A failed delivery may already have removed it.
    registry.unregister(id).await;
    sub.shutdown().await;
    drop(inbound);
    info!(subscriber_id = %id, reason, "subscriber disconnected");
}

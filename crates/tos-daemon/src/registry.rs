//! Live subscriber set and best-effort fan-out.
//!
//! `SubscriberRegistry` owns the only shared mutable state in the daemon: the
//! map of connected subscribers. All three operations go through one
//! `RwLock`:
//!
//! - `register` / `unregister` take the write lock for a single map edit.
//! - `broadcast` takes the read lock just long enough to copy the members,
//!   delivers to the copy with no lock held, then takes the write lock once to
//!   drop every member whose delivery failed. Dropped members are told via
//!   `Subscriber::on_dropped` so their connection is closed too.
//!
//! A subscriber that registers mid-broadcast is not in that broadcast's
//! snapshot and simply gets the next event.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::join_all;
use serde::Serialize;
use tokio::sync::RwLock;
use tos_schemas::OrderRecord;
use tracing::{debug, error};
use uuid::Uuid;

/// A single subscriber could not be reached. Local to the registry: it only
/// ever causes that subscriber's removal.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("subscriber channel closed")]
    Closed,
    #[error("delivery timed out after {0:?}")]
    Timeout(Duration),
    #[error("transport error: {0}")]
    Transport(String),
}

/// One end of a push channel.
///
/// `deliver` must send `text` as one whole message or fail; concurrent calls
/// on the same subscriber must not interleave.
#[async_trait]
pub trait Subscriber: Send + Sync {
    async fn deliver(&self, text: &str) -> Result<(), DeliveryError>;

    /// Called exactly once, after a failed delivery removed this subscriber.
    /// Implementations shut their transport down; a removed subscriber never
    /// receives another event.
    fn on_dropped(&self) {}
}

/// Registry-issued identity of a subscriber. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(Uuid);

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Outcome of one `broadcast` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BroadcastReport {
    /// Members in the snapshot (one delivery attempt each).
    pub attempted: usize,
    pub delivered: usize,
    /// Members removed because their delivery failed.
    pub dropped: usize,
}

pub struct SubscriberRegistry {
    members: RwLock<HashMap<SubscriberId, Arc<dyn Subscriber>>>,
    send_timeout: Duration,
}

impl SubscriberRegistry {
    pub fn new(send_timeout: Duration) -> Self {
        Self {
            members: RwLock::new(HashMap::new()),
            send_timeout,
        }
    }

    /// Add a subscriber to the live set and return its id.
    pub async fn register(&self, sub: Arc<dyn Subscriber>) -> SubscriberId {
        let id = SubscriberId(Uuid::new_v4());
        self.members.write().await.insert(id, sub);
        id
    }

    /// Remove a subscriber. Absent ids are ignored; returns whether anything
    /// was removed.
    pub async fn unregister(&self, id: SubscriberId) -> bool {
        self.members.write().await.remove(&id).is_some()
    }

    pub async fn len(&self) -> usize {
        self.members.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.members.read().await.is_empty()
    }

    /// Push `record` as JSON text to every current member.
    ///
    /// Each delivery is independent and bounded by the send timeout. Members
    /// that fail are removed after the whole pass. No retries.
    pub async fn broadcast(&self, record: &OrderRecord) -> BroadcastReport {
        let text = match serde_json::to_string(record) {
            Ok(t) => t,
            Err(e) => {
                error!(order_id = record.id, error = %e, "order record not serializable; fan-out skipped");
                return BroadcastReport::default();
            }
        };

        let snapshot: Vec<(SubscriberId, Arc<dyn Subscriber>)> = self
            .members
            .read()
            .await
            .iter()
            .map(|(id, sub)| (*id, Arc::clone(sub)))
            .collect();

        if snapshot.is_empty() {
            return BroadcastReport::default();
        }

        let text = text.as_str();
        let timeout = self.send_timeout;
        let outcomes = join_all(snapshot.iter().map(|(id, sub)| async move {
            let res = match tokio::time::timeout(timeout, sub.deliver(text)).await {
                Ok(r) => r,
                Err(_) => Err(DeliveryError::Timeout(timeout)),
            };
            (*id, res)
        }))
        .await;

        let mut failed = Vec::new();
        for (id, res) in outcomes {
            if let Err(e) = res {
                debug!(subscriber_id = %id, order_id = record.id, error = %e, "delivery failed; dropping subscriber");
                failed.push(id);
            }
        }

        if !failed.is_empty() {
            // Only the pass that actually removes a member shuts it down, so a
            // subscriber failing in two concurrent broadcasts is closed once.
            let removed: Vec<Arc<dyn Subscriber>> = {
                let mut members = self.members.write().await;
                failed.iter().filter_map(|id| members.remove(id)).collect()
            };
            for sub in &removed {
                sub.on_dropped();
            }
        }

        let report = BroadcastReport {
            attempted: snapshot.len(),
            delivered: snapshot.len() - failed.len(),
            dropped: failed.len(),
        };
        debug!(
            order_id = record.id,
            attempted = report.attempted,
            delivered = report.delivered,
            dropped = report.dropped,
            "fan-out complete"
        );
        report
    }
}

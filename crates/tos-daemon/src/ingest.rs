//! Order ingestion: validate, store, fan out, acknowledge.
//!
//! ```text
//! Received --validate--> Validated --insert--> Stored --spawn fan-out--> Broadcast --> Acknowledged
//!     \______________________\_________________________ Failed
//! ```
//!
//! `Failed` is only reachable before the record is stored. Once stored, the
//! order is acknowledged no matter what happens to the fan-out, which runs on
//! its own task and is never awaited by the caller.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tos_db::OrderStore;
use tos_schemas::{OrderDraft, OrderRecord};
use tracing::{error, info, warn};

use crate::{
    error::IntakeError,
    registry::{BroadcastReport, SubscriberRegistry},
};

/// A stored order plus the handle of its in-flight fan-out.
///
/// Dropping `fanout` detaches the task; it still runs to completion.
#[derive(Debug)]
pub struct Acknowledged {
    pub record: OrderRecord,
    pub fanout: JoinHandle<BroadcastReport>,
}

#[derive(Clone)]
pub struct OrderIntake {
    store: Arc<dyn OrderStore>,
    registry: Arc<SubscriberRegistry>,
}

impl OrderIntake {
    pub fn new(store: Arc<dyn OrderStore>, registry: Arc<SubscriberRegistry>) -> Self {
        Self { store, registry }
    }

    pub async fn create(&self, draft: OrderDraft) -> Result<Acknowledged, IntakeError> {
        let order = draft.validate().map_err(|e| {
            warn!(error = %e, "order rejected by validation");
            IntakeError::from(e)
        })?;

        let record = self.store.insert(order).await.map_err(|e| {
            error!(error = %e, "order insert failed");
            IntakeError::from(e)
        })?;

        info!(
            order_id = record.id,
            symbol = %record.symbol,
            order_type = %record.order_type,
            "order stored"
        );

        let registry = Arc::clone(&self.registry);
        let event = record.clone();
        let fanout = tokio::spawn(async move { registry.broadcast(&event).await });

        Ok(Acknowledged { record, fanout })
    }

    pub async fn list(&self) -> Result<Vec<OrderRecord>, IntakeError> {
        self.store.list_all().await.map_err(|e| {
            error!(error = %e, "order list failed");
            IntakeError::from(e)
        })
    }
}

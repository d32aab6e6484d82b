//! Shared runtime state for tos-daemon.
//!
//! Handlers receive `State<Arc<AppState>>` from Axum. The registry is owned
//! here and injected into the intake path; nothing lives in a global.

use std::sync::Arc;
use std::time::Duration;

use tos_db::OrderStore;

use crate::{ingest::OrderIntake, registry::SubscriberRegistry};

/// Static build metadata included in health responses.
#[derive(Clone, Debug)]
pub struct BuildInfo {
    pub service: &'static str,
    pub version: &'static str,
}

#[derive(Clone)]
pub struct AppState {
    pub build: BuildInfo,
    /// Live WebSocket subscribers.
    pub registry: Arc<SubscriberRegistry>,
    pub intake: OrderIntake,
}

impl AppState {
    /// `send_timeout` bounds a single push to one subscriber.
    pub fn new(store: Arc<dyn OrderStore>, send_timeout: Duration) -> Self {
        let registry = Arc::new(SubscriberRegistry::new(send_timeout));
        let intake = OrderIntake::new(store, Arc::clone(&registry));

        Self {
            build: BuildInfo {
                service: "tos-daemon",
                version: env!("CARGO_PKG_VERSION"),
            },
            registry,
            intake,
        }
    }
}

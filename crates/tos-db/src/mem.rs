//! In-memory `OrderStore` for tests. Behaves like the Postgres store (ids
//! start at 1, never reused) and can be switched into an "unreachable" mode.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tos_schemas::{OrderRecord, ValidOrder};

use crate::{OrderStore, PersistenceError};

#[derive(Default)]
pub struct MemOrderStore {
    inner: Mutex<MemInner>,
    unavailable: AtomicBool,
}

#[derive(Default)]
struct MemInner {
    last_id: i64,
    rows: Vec<OrderRecord>,
}

impl MemOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate a lost database: every call fails until switched back.
    pub fn set_unavailable(&self, down: bool) {
        self.unavailable.store(down, Ordering::SeqCst);
    }

    pub fn row_count(&self) -> usize {
        self.lock().rows.len()
    }

    fn check_up(&self) -> Result<(), PersistenceError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(PersistenceError::Unavailable(
                "connection refused (simulated)".to_string(),
            ));
        }
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemInner> {
        // A panicking test thread must not wedge the others.
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[async_trait]
impl OrderStore for MemOrderStore {
    async fn insert(&self, order: ValidOrder) -> Result<OrderRecord, PersistenceError> {
        self.check_up()?;
        let mut g = self.lock();
        g.last_id += 1;
        let rec = order.into_record(g.last_id);
        g.rows.push(rec.clone());
        Ok(rec)
    }

    async fn list_all(&self) -> Result<Vec<OrderRecord>, PersistenceError> {
        self.check_up()?;
        Ok(self.lock().rows.clone())
    }
}

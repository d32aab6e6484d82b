use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{postgres::PgPoolOptions, PgPool, Row};
use tos_schemas::{OrderRecord, OrderType, ValidOrder};

#[cfg(feature = "testkit")]
mod mem;
#[cfg(feature = "testkit")]
pub use mem::MemOrderStore;

/// Connect to Postgres. The pool hands each store call its own connection.
pub async fn connect(url: &str, max_connections: u32, acquire_timeout: Duration) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(acquire_timeout)
        .connect(url)
        .await
        .context("failed to connect to Postgres")?;

    Ok(pool)
}

/// Run embedded SQLx migrations.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("db migrate failed")?;
    Ok(())
}

/// The store could not complete a call. Any transaction it opened has been
/// rolled back by the time this is returned.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("order store unavailable: {0}")]
    Unavailable(String),
    #[error("order store rejected the write: {0}")]
    Rejected(String),
    #[error("order store returned an unreadable row: {0}")]
    Corrupt(String),
}

impl From<sqlx::Error> for PersistenceError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::Database(db_err) => PersistenceError::Rejected(db_err.to_string()),
            e @ (sqlx::Error::ColumnDecode { .. }
            | sqlx::Error::ColumnNotFound(_)
            | sqlx::Error::Decode(_)
            | sqlx::Error::TypeNotFound { .. }
            | sqlx::Error::RowNotFound) => PersistenceError::Corrupt(e.to_string()),
            other => PersistenceError::Unavailable(other.to_string()),
        }
    }
}

/// Durable home of order records.
///
/// Implementations must give every call its own connection (or equivalent)
/// and release it before returning; ids are assigned by the store, are
/// monotonic and are never reused.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Persist one order and return it with its assigned id.
    async fn insert(&self, order: ValidOrder) -> Result<OrderRecord, PersistenceError>;

    /// Every persisted order, ascending by id.
    async fn list_all(&self) -> Result<Vec<OrderRecord>, PersistenceError>;
}

#[derive(Clone)]
pub struct PgOrderStore {
    pool: PgPool,
}

impl PgOrderStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl OrderStore for PgOrderStore {
    async fn insert(&self, order: ValidOrder) -> Result<OrderRecord, PersistenceError> {
        let mut tx = self.pool.begin().await?;

        let d = order.draft();
        let inserted = sqlx::query_scalar::<_, i64>(
            r#"
            insert into orders (symbol, price, quantity, order_type)
            values ($1, $2, $3, $4)
            returning id
            "#,
        )
        .bind(&d.symbol)
        .bind(d.price)
        .bind(d.quantity)
        .bind(d.order_type.as_str())
        .fetch_one(&mut *tx)
        .await;

        let id = match inserted {
            Ok(id) => id,
            Err(e) => {
                if let Err(rb) = tx.rollback().await {
                    tracing::warn!(error = %rb, "rollback after failed insert also failed");
                }
                return Err(e.into());
            }
        };

        tx.commit().await?;
        Ok(order.into_record(id))
    }

    async fn list_all(&self) -> Result<Vec<OrderRecord>, PersistenceError> {
        let rows = sqlx::query(
            r#"
            select id, symbol, price, quantity, order_type
            from orders
            order by id asc
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<OrderRecord, PersistenceError> {
                let order_type: String = row.try_get("order_type")?;
                Ok(OrderRecord {
                    id: row.try_get("id")?,
                    symbol: row.try_get("symbol")?,
                    price: row.try_get("price")?,
                    quantity: row.try_get("quantity")?,
                    order_type: OrderType::parse(&order_type)
                        .map_err(|e| PersistenceError::Corrupt(e.to_string()))?,
                })
            })
            .collect()
    }
}

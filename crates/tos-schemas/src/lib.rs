//! Order payload and record types shared by the store and the daemon.
//!
//! A draft (`OrderDraft`) is what a client submits. It becomes a
//! `ValidOrder` once the shape rules pass, and an `OrderRecord` once the
//! store has assigned it an id. Records are never mutated afterwards.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Width of the `symbol` column in the `orders` table.
pub const MAX_SYMBOL_LEN: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    Buy,
    Sell,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Buy => "buy",
            OrderType::Sell => "sell",
        }
    }

    pub fn parse(s: &str) -> Result<Self, ValidationError> {
        match s {
            "buy" => Ok(OrderType::Buy),
            "sell" => Ok(OrderType::Sell),
            other => Err(ValidationError::UnknownOrderType(other.to_string())),
        }
    }
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inbound order payload (no id yet).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderDraft {
    pub symbol: String,
    pub price: f64,
    pub quantity: i32,
    pub order_type: OrderType,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("symbol must not be empty")]
    EmptySymbol,
    #[error("symbol must be at most {max} characters (got {len})")]
    SymbolTooLong { len: usize, max: usize },
    #[error("price must be a finite number greater than zero (got {0})")]
    InvalidPrice(f64),
    #[error("quantity must be greater than zero (got {0})")]
    InvalidQuantity(i32),
    #[error("order_type must be one of: buy, sell (got {0:?})")]
    UnknownOrderType(String),
    #[error("malformed order payload: {0}")]
    Malformed(String),
}

impl OrderDraft {
    /// Check the shape rules and promote the draft to a `ValidOrder`.
    pub fn validate(self) -> Result<ValidOrder, ValidationError> {
        if self.symbol.trim().is_empty() {
            return Err(ValidationError::EmptySymbol);
        }
        let len = self.symbol.chars().count();
        if len > MAX_SYMBOL_LEN {
            return Err(ValidationError::SymbolTooLong {
                len,
                max: MAX_SYMBOL_LEN,
            });
        }
        if !self.price.is_finite() || self.price <= 0.0 {
            return Err(ValidationError::InvalidPrice(self.price));
        }
        if self.quantity <= 0 {
            return Err(ValidationError::InvalidQuantity(self.quantity));
        }
        Ok(ValidOrder(self))
    }
}

/// A draft that passed `OrderDraft::validate`. Only the store turns this into
/// a record.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidOrder(OrderDraft);

impl ValidOrder {
    pub fn draft(&self) -> &OrderDraft {
        &self.0
    }

    /// Attach the store-assigned id.
    pub fn into_record(self, id: i64) -> OrderRecord {
        let OrderDraft {
            symbol,
            price,
            quantity,
            order_type,
        } = self.0;
        OrderRecord {
            id,
            symbol,
            price,
            quantity,
            order_type,
        }
    }
}

/// A persisted order. Field order here is the wire order of the JSON text
/// pushed to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRecord {
    pub id: i64,
    pub symbol: String,
    pub price: f64,
    pub quantity: i32,
    pub order_type: OrderType,
}

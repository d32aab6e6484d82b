//! Tail the order feed: connect to `/ws/orders` and log every order pushed.
//!
//! Usage: `order-listener [ws://host:port/ws/orders]`
//! (falls back to `TOS_LISTEN_URL`, then `ws://127.0.0.1:8000/ws/orders`).

use anyhow::Context;
use futures_util::StreamExt;
use tokio_tungstenite::tungstenite::Message;
use tos_schemas::OrderRecord;
use tracing::{info, warn};

const DEFAULT_URL: &str = "ws://127.0.0.1:8000/ws/orders";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::from_filename(".env.local");

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let url = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("TOS_LISTEN_URL").ok())
        .unwrap_or_else(|| DEFAULT_URL.to_string());

    let (mut ws, _) = tokio_tungstenite::connect_async(url.as_str())
        .await
        .with_context(|| format!("failed to connect to {url}"))?;
    info!(%url, "listening for orders");

    while let Some(msg) = ws.next().await {
        match msg.context("order feed read failed")? {
            Message::Text(text) => match serde_json::from_str::<OrderRecord>(&text) {
                Ok(o) => info!(
                    order_id = o.id,
                    symbol = %o.symbol,
                    price = o.price,
                    quantity = o.quantity,
                    order_type = %o.order_type,
                    "new order"
                ),
                Err(e) => warn!(error = %e, raw = %text, "unrecognised message on order feed"),
            },
            Message::Close(_) => break,
            _ => {}
        }
    }

    info!("order feed closed");
    Ok(())
}

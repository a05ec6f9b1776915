//! Decoding of raw order-lifecycle event payloads.

use serde::Deserialize;
use serde_json::Value as JsonValue;
use thiserror::Error;

use shipbill_core::OrderId;

/// The only status value that triggers invoice dispatch.
pub const SHIPPED_STATUS: &str = "Shipped";

/// A decoded order-lifecycle event.
///
/// Ephemeral: constructed per message, discarded after processing. `status`
/// is free-form by contract with the order service; only [`SHIPPED_STATUS`]
/// means anything to us. `raw` keeps the original JSON for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderEvent {
    pub order_id: OrderId,
    pub status: String,
    pub raw: JsonValue,
}

impl OrderEvent {
    pub fn is_shipped(&self) -> bool {
        self.status == SHIPPED_STATUS
    }
}

/// A payload that could not be decoded. Retrying will not fix these.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("event payload is not valid JSON: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("event payload is missing or has an empty `{0}` field")]
    MissingField(&'static str),
}

/// Wire shape of the feed: `{ "orderId": ..., "status": ..., ... }`.
///
/// Unknown additional fields are ignored for forward compatibility.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireOrderEvent {
    #[serde(default)]
    order_id: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

/// Parse a raw event payload into a typed [`OrderEvent`].
///
/// Pure and side-effect-free.
pub fn decode_order_event(raw: &[u8]) -> Result<OrderEvent, DecodeError> {
    let value: JsonValue = serde_json::from_slice(raw)?;
    let wire: WireOrderEvent = serde_json::from_value(value.clone())?;

    let order_id = wire
        .order_id
        .filter(|s| !s.trim().is_empty())
        .ok_or(DecodeError::MissingField("orderId"))?;
    let status = wire
        .status
        .filter(|s| !s.is_empty())
        .ok_or(DecodeError::MissingField("status"))?;

    // Non-empty checked above, so OrderId construction cannot fail.
    let order_id =
        OrderId::new(order_id).map_err(|_| DecodeError::MissingField("orderId"))?;

    Ok(OrderEvent {
        order_id,
        status,
        raw: value,
    })
}

//! Public order tracking.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::{instrument, warn};

use hearth_core::OrderStatus;

use crate::api::StoreApi;
use crate::api::types::decimal_from_value;
use crate::error::{Result, StoreError};

/// Tracking view of a placed order.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct OrderTracking {
    #[serde(alias = "tracking_number")]
    pub order_code: String,
    #[serde(default, deserialize_with = "lenient_status")]
    pub status: OrderStatus,
    #[serde(default, deserialize_with = "lenient_date")]
    pub estimated_delivery_date: Option<NaiveDate>,
    #[serde(default)]
    pub shipping_address: Option<String>,
    #[serde(default)]
    pub timeline: Vec<TimelineStep>,
    #[serde(default)]
    pub items: Vec<TrackedItem>,
}

impl OrderTracking {
    /// Most recent timeline entry.
    #[must_use]
    pub fn latest_step(&self) -> Option<&TimelineStep> {
        self.timeline.last()
    }
}

/// One status change in an order's history.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TimelineStep {
    #[serde(default, deserialize_with = "lenient_status")]
    pub status: OrderStatus,
    /// Timestamp as sent by the backend.
    #[serde(default, alias = "cambiado_en")]
    pub changed_at: Option<String>,
    #[serde(default, alias = "nota")]
    pub note: Option<String>,
}

/// An ordered product as shown by tracking.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TrackedItem {
    #[serde(default, alias = "product_name")]
    pub name: Option<String>,
    #[serde(default)]
    pub quantity: u32,
    #[serde(default, deserialize_with = "lenient_price")]
    pub price: Decimal,
}

impl TrackedItem {
    #[must_use]
    pub fn line_total(&self) -> Decimal {
        self.price * Decimal::from(self.quantity)
    }
}

/// Look up an order by tracking number. No session is needed.
///
/// # Errors
///
/// - `Validation` for an empty tracking number
/// - `BackendRejected` when no order matches
/// - `Network` when the backend cannot be reached
#[instrument(skip(api))]
pub async fn track_order<A: StoreApi>(api: &A, tracking_number: &str) -> Result<OrderTracking> {
    let tracking_number = tracking_number.trim();
    if tracking_number.is_empty() {
        return Err(StoreError::Validation(
            "Enter a tracking number".to_string(),
        ));
    }
    api.track_order(tracking_number)
        .await
        .map_err(StoreError::from)
}

/// Status names are matched case-insensitively; unknown ones read as pending.
fn lenient_status<'de, D>(deserializer: D) -> std::result::Result<OrderStatus, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.map_or_else(OrderStatus::default, |name| parse_status(&name)))
}

fn parse_status(name: &str) -> OrderStatus {
    let normalized = name.trim().to_lowercase().replace(' ', "_");
    serde_json::from_value(Value::String(normalized)).unwrap_or_else(|_| {
        warn!(status = name, "Unknown order status");
        OrderStatus::default()
    })
}

/// Accepts `YYYY-MM-DD` or a full timestamp; anything else reads as unknown.
fn lenient_date<'de, D>(deserializer: D) -> std::result::Result<Option<NaiveDate>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.and_then(|value| {
        value
            .get(..10)
            .and_then(|day| NaiveDate::parse_from_str(day, "%Y-%m-%d").ok())
    }))
}

fn lenient_price<'de, D>(deserializer: D) -> std::result::Result<Decimal, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(decimal_from_value(&value).unwrap_or_default())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_tracking() {
        let json = r#"{
            "order_code": "HRT-1042",
            "status": "Enviado",
            "estimated_delivery_date": "2025-06-12T00:00:00Z",
            "shipping_address": "Avenida Andalucía 8, Alcalá la Real",
            "timeline": [
                {"status": "pendiente", "cambiado_en": "2025-06-09 10:00"},
                {"status": "enviado", "cambiado_en": "2025-06-10 08:30", "nota": "Salida de almacén"}
            ],
            "items": [{"product_name": "Sofá", "quantity": 2, "price": "199.50"}]
        }"#;
        let tracking: OrderTracking = serde_json::from_str(json).unwrap();

        assert_eq!(tracking.order_code, "HRT-1042");
        assert_eq!(tracking.status, OrderStatus::Shipped);
        assert_eq!(
            tracking.estimated_delivery_date,
            NaiveDate::from_ymd_opt(2025, 6, 12)
        );
        assert_eq!(tracking.timeline.len(), 2);
        let latest = tracking.latest_step().unwrap();
        assert_eq!(latest.note.as_deref(), Some("Salida de almacén"));
        assert_eq!(tracking.items[0].line_total(), Decimal::from(399));
    }

    #[test]
    fn test_lenient_fields() {
        let json = r#"{
            "tracking_number": "HRT-7",
            "status": "en ruta",
            "estimated_delivery_date": "soon"
        }"#;
        let tracking: OrderTracking = serde_json::from_str(json).unwrap();
        assert_eq!(tracking.order_code, "HRT-7");
        assert_eq!(tracking.status, OrderStatus::InTransit);
        assert_eq!(tracking.estimated_delivery_date, None);
        assert!(tracking.timeline.is_empty());
    }

    #[test]
    fn test_unknown_status_reads_as_pending() {
        assert_eq!(parse_status("devuelto"), OrderStatus::Pending);
        assert_eq!(parse_status("DELIVERED"), OrderStatus::Delivered);
    }
}

//! Core data models used throughout the invoice pipeline.
//!
//! These types represent the attachments, extracted invoice fields, and
//! persisted records that flow through the processing and persistence layers.

use chrono::{DateTime, Utc};

/// Raw file attached to a chat turn, before any processing.
///
/// Created per turn, consumed immediately by the pipeline, never persisted
/// on its own. The payload may arrive as an inline base64 data URL or as
/// raw bytes; [`Attachment::from_data_url`] handles the former.
#[derive(Debug, Clone)]
pub struct Attachment {
    pub id: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
    pub name: Option<String>,
}

impl Attachment {
    /// Attachment with a content-derived identity: the id is the sha-256
    /// digest of the bytes, so reprocessing the same document yields the
    /// same identity and the same prompt-cache key.
    pub fn from_bytes(content_type: &str, bytes: Vec<u8>, name: Option<String>) -> Self {
        use sha2::{Digest, Sha256};
        let id = hex::encode(Sha256::digest(&bytes));
        Self {
            id,
            content_type: content_type.to_string(),
            bytes,
            name,
        }
    }

    /// Decode an attachment from an inline `data:<mime>;base64,<payload>` URL.
    pub fn from_data_url(id: &str, url: &str, name: Option<String>) -> Option<Self> {
        use base64::Engine;
        let rest = url.strip_prefix("data:")?;
        let (header, payload) = rest.split_once(',')?;
        let content_type = header.strip_suffix(";base64")?.to_string();
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(payload)
            .ok()?;
        Some(Self {
            id: id.to_string(),
            content_type,
            bytes,
            name,
        })
    }
}

/// A single extracted line item, still in major currency units.
#[derive(Debug, Clone, PartialEq)]
pub struct LineItemFields {
    pub description: String,
    pub quantity: f64,
    pub unit_price: f64,
    pub total: f64,
    /// Reference ordinal printed on the invoice. Never a quantity.
    pub position: Option<i64>,
    /// Set when quantity and unit price were both absent from the source and
    /// the line total was adopted as the unit price with quantity 1. Such
    /// items are exempt from the quantity × unit-price cross-check.
    pub unit_price_from_total: bool,
}

impl LineItemFields {
    /// Assemble a line item from whatever numeric parts the source yielded,
    /// back-filling the gaps. An absent quantity is derived from
    /// `total ÷ unit price` when both are present; when quantity and unit
    /// price are both absent, the line total is adopted as the unit price
    /// with quantity 1 and the exemption flag set.
    pub fn from_parts(
        description: String,
        quantity: Option<f64>,
        unit_price: Option<f64>,
        total: Option<f64>,
        position: Option<i64>,
    ) -> Self {
        let total = total.unwrap_or(0.0);
        let (quantity, unit_price, from_total) = match (quantity, unit_price) {
            (Some(q), Some(u)) => (q, u, false),
            (None, Some(u)) if u != 0.0 && total != 0.0 => (total / u, u, false),
            (None, Some(u)) => (1.0, u, false),
            (Some(q), None) if q != 0.0 => (q, total / q, false),
            _ => (1.0, total, true),
        };
        Self {
            description,
            quantity,
            unit_price,
            total,
            position,
            unit_price_from_total: from_total,
        }
    }
}

/// Structured fields extracted from a document, before persistence.
///
/// Monetary values are major-unit decimals here; conversion to minor units
/// happens exactly once, at the store boundary.
#[derive(Debug, Clone, PartialEq)]
pub struct InvoiceFields {
    pub vendor_name: String,
    pub customer_name: String,
    pub invoice_number: String,
    pub invoice_date: Option<String>,
    pub due_date: Option<String>,
    pub currency: String,
    pub total_amount: f64,
    pub line_items: Vec<LineItemFields>,
}

/// Verdict of the combined classify + extract step.
#[derive(Debug, Clone)]
pub struct InvoiceCandidate {
    pub is_invoice: bool,
    pub rejection_reason: Option<String>,
    pub fields: Option<InvoiceFields>,
}

/// Persisted invoice header. Monetary values are integer minor units.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Invoice {
    pub id: String,
    pub document_id: Option<String>,
    pub document_created_at: Option<i64>,
    pub vendor_name: String,
    pub customer_name: String,
    pub invoice_number: String,
    pub invoice_date: Option<String>,
    pub due_date: Option<String>,
    pub total_amount: i64,
    pub currency: String,
    pub created_at: i64,
    pub last_edited_by: Option<String>,
}

/// Persisted line item, exclusively owned by its invoice.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct InvoiceLineItem {
    pub id: String,
    pub invoice_id: String,
    pub description: String,
    pub quantity: f64,
    pub unit_price: i64,
    pub total_price: i64,
}

/// Generic stored document, versioned by creation time.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Document {
    pub id: String,
    pub created_at: i64,
    pub title: String,
    pub kind: String,
    pub content: String,
    pub user_id: String,
}

/// Token counts reported by one model invocation.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenUsage {
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub total_tokens: i64,
}

/// One cached prompt, keyed by its content hash.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PromptCacheEntry {
    pub id: String,
    pub prompt: String,
    pub hash: String,
    pub token_count: i64,
    pub created_at: i64,
    pub last_used_at: i64,
    pub use_count: i64,
}

/// Current UTC time as Unix seconds, the storage representation for all
/// timestamps.
pub fn now_ts() -> i64 {
    Utc::now().timestamp()
}

/// Format a stored Unix timestamp for display.
pub fn format_ts(ts: i64) -> String {
    DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_url_round_trip() {
        use base64::Engine;
        let payload = base64::engine::general_purpose::STANDARD.encode(b"%PDF-1.4");
        let url = format!("data:application/pdf;base64,{}", payload);
        let att = Attachment::from_data_url("a1", &url, Some("inv.pdf".into())).unwrap();
        assert_eq!(att.content_type, "application/pdf");
        assert_eq!(att.bytes, b"%PDF-1.4");
        assert_eq!(att.name.as_deref(), Some("inv.pdf"));
    }

    #[test]
    fn content_identity_is_stable_across_reads() {
        let a = Attachment::from_bytes("application/pdf", b"%PDF-1.4 same".to_vec(), None);
        let b = Attachment::from_bytes(
            "application/pdf",
            b"%PDF-1.4 same".to_vec(),
            Some("other-name.pdf".into()),
        );
        let c = Attachment::from_bytes("application/pdf", b"%PDF-1.4 other".to_vec(), None);
        assert_eq!(a.id, b.id);
        assert_ne!(a.id, c.id);
    }

    #[test]
    fn data_url_without_base64_marker_is_rejected() {
        assert!(Attachment::from_data_url("a1", "data:text/plain,hello", None).is_none());
        assert!(Attachment::from_data_url("a1", "https://example.com/x.pdf", None).is_none());
    }
}

//! Structured document extraction service client.
//!
//! The primary extraction path sends the raw document to a schema-driven
//! entity-extraction processor and maps the returned entity graph into
//! [`InvoiceFields`]. Entity type tags are translated into [`EntityKind`] at
//! a single boundary; everything downstream matches on the enum. Any failure
//! on this path (transport, missing required entities, no line items) makes
//! the pipeline fall back to the model-based extraction with the text this
//! service already recognized.

use anyhow::{bail, Result};
use async_trait::async_trait;
use base64::Engine;
use std::time::Duration;

use crate::config::DocAiConfig;
use crate::models::{InvoiceFields, LineItemFields};
use crate::money::parse_decimal;

/// One extracted entity: a type tag, the text span it covers, and nested
/// sub-entities (line items carry their fields as properties).
#[derive(Debug, Clone)]
pub struct Entity {
    pub kind: String,
    pub mention_text: String,
    pub confidence: f64,
    pub properties: Vec<Entity>,
}

/// Full processor output: recognized text plus the entity graph.
#[derive(Debug, Clone)]
pub struct ProcessedDocument {
    pub text: String,
    pub entities: Vec<Entity>,
}

#[async_trait]
pub trait DocumentIntelligence: Send + Sync {
    async fn process(&self, bytes: &[u8], mime: &str) -> Result<ProcessedDocument>;
}

/// Known entity type tags, translated once from the wire strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    VendorName,
    CustomerName,
    InvoiceNumber,
    InvoiceDate,
    DueDate,
    Currency,
    TotalAmount,
    TotalTaxAmount,
    LineItem,
    ItemDescription,
    ItemQuantity,
    ItemUnitPrice,
    ItemAmount,
    ItemPosition,
}

impl EntityKind {
    pub fn from_tag(tag: &str) -> Option<Self> {
        // The processor namespaces line-item fields as "line-items/<field>".
        let tag = match tag.strip_prefix("line-items/") {
            Some("description") => "item-description",
            Some("quantity") => "item-quantity",
            Some("unit-price") => "item-unit-price",
            Some("amount") => "item-amount",
            Some("position") => "item-position",
            Some(other) => other,
            None => tag,
        };
        match tag {
            "vendor-name" | "supplier-name" => Some(Self::VendorName),
            "customer-name" | "receiver-name" => Some(Self::CustomerName),
            "invoice-number" | "invoice-id" => Some(Self::InvoiceNumber),
            "invoice-date" => Some(Self::InvoiceDate),
            "due-date" => Some(Self::DueDate),
            "currency" => Some(Self::Currency),
            "total-amount" => Some(Self::TotalAmount),
            "total-tax-amount" => Some(Self::TotalTaxAmount),
            "line-items" | "line-item" => Some(Self::LineItem),
            "item-description" | "description" => Some(Self::ItemDescription),
            "item-quantity" | "quantity" => Some(Self::ItemQuantity),
            "item-unit-price" | "unit-price" => Some(Self::ItemUnitPrice),
            "item-amount" | "amount" => Some(Self::ItemAmount),
            "item-position" | "position" => Some(Self::ItemPosition),
            _ => None,
        }
    }
}

/// Failures of the structured mapping, each of which triggers the fallback.
#[derive(Debug, PartialEq)]
pub enum DocAiError {
    MissingField(&'static str),
    NoLineItems,
}

impl std::fmt::Display for DocAiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DocAiError::MissingField(name) => {
                write!(f, "structured extraction missing required field: {}", name)
            }
            DocAiError::NoLineItems => {
                write!(f, "structured extraction produced no line items")
            }
        }
    }
}

impl std::error::Error for DocAiError {}

#[derive(Default)]
struct ItemBuilder {
    description: Option<String>,
    quantity: Option<f64>,
    unit_price: Option<f64>,
    total: Option<f64>,
    position: Option<i64>,
}

impl ItemBuilder {
    fn set(&mut self, kind: EntityKind, text: &str) {
        match kind {
            EntityKind::ItemDescription => self.description = Some(text.trim().to_string()),
            EntityKind::ItemQuantity => self.quantity = parse_decimal(text),
            EntityKind::ItemUnitPrice => self.unit_price = parse_decimal(text),
            EntityKind::ItemAmount => self.total = parse_decimal(text),
            EntityKind::ItemPosition => self.position = leading_integer(text),
            _ => {}
        }
    }

    fn finish(self) -> Option<LineItemFields> {
        let has_any = self.description.is_some()
            || self.quantity.is_some()
            || self.unit_price.is_some()
            || self.total.is_some();
        if !has_any {
            return None;
        }
        Some(LineItemFields::from_parts(
            self.description.unwrap_or_default(),
            self.quantity,
            self.unit_price,
            self.total,
            self.position,
        ))
    }
}

/// Parse the leading run of ASCII digits, e.g. `"3."` → 3. Position ordinals
/// are reference labels; they never become quantities.
fn leading_integer(text: &str) -> Option<i64> {
    let digits: String = text
        .trim()
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

/// Map a processed document's entity graph to invoice fields.
///
/// A `line-items` entity opens a new item; its fields arrive either as nested
/// properties or as sibling entities seen before the next `line-items`
/// entity. Header fields may appear anywhere.
pub fn extract_fields(
    doc: &ProcessedDocument,
    default_currency: &str,
) -> Result<InvoiceFields, DocAiError> {
    let mut vendor_name = None;
    let mut customer_name = None;
    let mut invoice_number = None;
    let mut invoice_date = None;
    let mut due_date = None;
    let mut currency = None;
    let mut total_amount = None;
    let mut line_items: Vec<LineItemFields> = Vec::new();
    let mut current: Option<ItemBuilder> = None;

    for entity in &doc.entities {
        let Some(kind) = EntityKind::from_tag(&entity.kind) else {
            continue;
        };
        let text = entity.mention_text.trim();
        match kind {
            EntityKind::VendorName => vendor_name = non_empty(text),
            EntityKind::CustomerName => customer_name = non_empty(text),
            EntityKind::InvoiceNumber => invoice_number = non_empty(text),
            EntityKind::InvoiceDate => invoice_date = non_empty(text),
            EntityKind::DueDate => due_date = non_empty(text),
            EntityKind::Currency => currency = non_empty(text),
            EntityKind::TotalAmount => total_amount = parse_decimal(text),
            EntityKind::TotalTaxAmount => {}
            EntityKind::LineItem => {
                if let Some(item) = current.take().and_then(ItemBuilder::finish) {
                    line_items.push(item);
                }
                let mut builder = ItemBuilder::default();
                for prop in &entity.properties {
                    if let Some(prop_kind) = EntityKind::from_tag(&prop.kind) {
                        builder.set(prop_kind, &prop.mention_text);
                    }
                }
                current = Some(builder);
            }
            EntityKind::ItemDescription
            | EntityKind::ItemQuantity
            | EntityKind::ItemUnitPrice
            | EntityKind::ItemAmount
            | EntityKind::ItemPosition => {
                if let Some(builder) = current.as_mut() {
                    builder.set(kind, text);
                }
            }
        }
    }
    if let Some(item) = current.take().and_then(ItemBuilder::finish) {
        line_items.push(item);
    }

    let vendor_name = vendor_name.ok_or(DocAiError::MissingField("vendor name"))?;
    let invoice_number = invoice_number.ok_or(DocAiError::MissingField("invoice number"))?;
    let total_amount = total_amount.ok_or(DocAiError::MissingField("total amount"))?;
    if line_items.is_empty() {
        return Err(DocAiError::NoLineItems);
    }

    Ok(InvoiceFields {
        vendor_name,
        customer_name: customer_name.unwrap_or_default(),
        invoice_number,
        invoice_date,
        due_date,
        currency: currency.unwrap_or_else(|| default_currency.to_string()),
        total_amount,
        line_items,
    })
}

fn non_empty(text: &str) -> Option<String> {
    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}

/// HTTP client for the processor endpoint
/// (`POST <endpoint>/processors/<id>:process`).
pub struct HttpDocAi {
    endpoint: String,
    processor_id: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl HttpDocAi {
    /// Returns `Ok(None)` when no processor is configured; the pipeline then
    /// runs model-only extraction.
    pub fn from_config(config: &DocAiConfig) -> Result<Option<Self>> {
        let (Some(endpoint), Some(processor_id)) = (&config.endpoint, &config.processor_id)
        else {
            return Ok(None);
        };
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Some(Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            processor_id: processor_id.clone(),
            api_key: std::env::var(&config.api_key_env).ok(),
            client,
        }))
    }
}

#[async_trait]
impl DocumentIntelligence for HttpDocAi {
    async fn process(&self, bytes: &[u8], mime: &str) -> Result<ProcessedDocument> {
        let body = serde_json::json!({
            "rawDocument": {
                "content": base64::engine::general_purpose::STANDARD.encode(bytes),
                "mimeType": mime,
            },
        });

        let mut request = self
            .client
            .post(format!(
                "{}/processors/{}:process",
                self.endpoint, self.processor_id
            ))
            .header("Content-Type", "application/json")
            .json(&body);
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {}", key));
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("Document processor error {}: {}", status, body_text);
        }

        let json: serde_json::Value = response.json().await?;
        parse_processed(&json)
    }
}

fn parse_processed(json: &serde_json::Value) -> Result<ProcessedDocument> {
    let document = json
        .get("document")
        .ok_or_else(|| anyhow::anyhow!("Invalid processor response: missing document"))?;
    let text = document
        .get("text")
        .and_then(|t| t.as_str())
        .unwrap_or_default()
        .to_string();
    let entities = document
        .get("entities")
        .and_then(|e| e.as_array())
        .map(|list| list.iter().map(parse_entity).collect())
        .unwrap_or_default();
    Ok(ProcessedDocument { text, entities })
}

fn parse_entity(json: &serde_json::Value) -> Entity {
    Entity {
        kind: json
            .get("type")
            .and_then(|t| t.as_str())
            .unwrap_or_default()
            .to_string(),
        mention_text: json
            .get("mentionText")
            .and_then(|t| t.as_str())
            .unwrap_or_default()
            .to_string(),
        confidence: json
            .get("confidence")
            .and_then(|c| c.as_f64())
            .unwrap_or(0.0),
        properties: json
            .get("properties")
            .and_then(|p| p.as_array())
            .map(|list| list.iter().map(parse_entity).collect())
            .unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity(kind: &str, text: &str) -> Entity {
        Entity {
            kind: kind.to_string(),
            mention_text: text.to_string(),
            confidence: 0.9,
            properties: Vec::new(),
        }
    }

    fn doc(entities: Vec<Entity>) -> ProcessedDocument {
        ProcessedDocument {
            text: "recognized text".to_string(),
            entities,
        }
    }

    #[test]
    fn maps_header_and_nested_line_items() {
        let mut item = entity("line-items", "2 Widget 5.00 10.00");
        item.properties = vec![
            entity("line-items/description", "Widget"),
            entity("line-items/quantity", "2"),
            entity("line-items/unit-price", "$5.00"),
            entity("line-items/amount", "$10.00"),
        ];
        let d = doc(vec![
            entity("vendor-name", "Acme Co"),
            entity("customer-name", "Globex"),
            entity("invoice-number", "INV-100"),
            entity("currency", "EUR"),
            entity("total-amount", "$10.00"),
            item,
        ]);
        let fields = extract_fields(&d, "USD").unwrap();
        assert_eq!(fields.vendor_name, "Acme Co");
        assert_eq!(fields.currency, "EUR");
        assert_eq!(fields.total_amount, 10.0);
        assert_eq!(fields.line_items.len(), 1);
        assert_eq!(fields.line_items[0].quantity, 2.0);
        assert_eq!(fields.line_items[0].unit_price, 5.0);
    }

    #[test]
    fn sibling_fields_attach_to_the_open_item() {
        let d = doc(vec![
            entity("vendor-name", "Acme"),
            entity("invoice-number", "1"),
            entity("total-amount", "30.00"),
            entity("line-items", "first"),
            entity("line-items/description", "First"),
            entity("line-items/amount", "10.00"),
            entity("line-items", "second"),
            entity("line-items/description", "Second"),
            entity("line-items/amount", "20.00"),
        ]);
        let fields = extract_fields(&d, "USD").unwrap();
        assert_eq!(fields.line_items.len(), 2);
        assert_eq!(fields.line_items[0].description, "First");
        assert_eq!(fields.line_items[1].total, 20.0);
    }

    #[test]
    fn position_is_never_a_quantity() {
        let d = doc(vec![
            entity("vendor-name", "Acme"),
            entity("invoice-number", "1"),
            entity("total-amount", "100.00"),
            entity("line-items", "item"),
            entity("line-items/description", "Service"),
            entity("line-items/position", "3."),
            entity("line-items/unit-price", "100.00"),
            entity("line-items/amount", "100.00"),
        ]);
        let fields = extract_fields(&d, "USD").unwrap();
        let item = &fields.line_items[0];
        assert_eq!(item.position, Some(3));
        assert_eq!(item.quantity, 1.0);
    }

    #[test]
    fn missing_vendor_fails() {
        let d = doc(vec![
            entity("invoice-number", "1"),
            entity("line-items", "x"),
            entity("line-items/description", "X"),
            entity("line-items/amount", "5.00"),
        ]);
        assert_eq!(
            extract_fields(&d, "USD").unwrap_err(),
            DocAiError::MissingField("vendor name")
        );
    }

    #[test]
    fn zero_line_items_fails() {
        let d = doc(vec![
            entity("vendor-name", "Acme"),
            entity("invoice-number", "1"),
            entity("total-amount", "5.00"),
        ]);
        assert_eq!(extract_fields(&d, "USD").unwrap_err(), DocAiError::NoLineItems);
    }

    #[test]
    fn missing_total_amount_fails_even_with_items() {
        // The item sum is never adopted as the header total; without a
        // stated total the document goes to the fallback path.
        let d = doc(vec![
            entity("vendor-name", "Acme"),
            entity("invoice-number", "1"),
            entity("line-items", "a"),
            entity("line-items/description", "A"),
            entity("line-items/amount", "5.00"),
            entity("line-items", "b"),
            entity("line-items/description", "B"),
            entity("line-items/amount", "7.50"),
        ]);
        assert_eq!(
            extract_fields(&d, "USD").unwrap_err(),
            DocAiError::MissingField("total amount")
        );
    }

    #[test]
    fn parses_processor_response_json() {
        let json = serde_json::json!({
            "document": {
                "text": "Invoice INV-1",
                "entities": [
                    { "type": "vendor-name", "mentionText": "Acme", "confidence": 0.98 },
                    {
                        "type": "line-items",
                        "mentionText": "Widget 10.00",
                        "confidence": 0.9,
                        "properties": [
                            { "type": "line-items/description", "mentionText": "Widget" },
                        ],
                    },
                ],
            },
        });
        let doc = parse_processed(&json).unwrap();
        assert_eq!(doc.text, "Invoice INV-1");
        assert_eq!(doc.entities.len(), 2);
        assert_eq!(doc.entities[1].properties[0].mention_text, "Widget");
    }

    #[test]
    fn unknown_tags_are_ignored() {
        assert_eq!(EntityKind::from_tag("barcode"), None);
        assert_eq!(EntityKind::from_tag("vendor-name"), Some(EntityKind::VendorName));
        assert_eq!(
            EntityKind::from_tag("line-items/quantity"),
            Some(EntityKind::ItemQuantity)
        );
    }
}

//! Parser for the model-based classify + extract response protocol.
//!
//! The fallback extraction path asks the model to answer with a fixed-prefix
//! protocol: a leading `true:`/`false:` discriminator, then either a short
//! rejection rationale or a flat `key:value` line payload with the line-item
//! sub-list between `---line items start---` and `---line items end---`
//! delimiters. Any response violating the contract is a protocol error,
//! which the pipeline reports as a processing failure — never a best-effort
//! partial parse, and never shown to the user verbatim.

use crate::models::{InvoiceCandidate, InvoiceFields, LineItemFields};
use crate::money::parse_decimal;

pub const LINE_ITEMS_START: &str = "---line items start---";
pub const LINE_ITEMS_END: &str = "---line items end---";

pub const EXTRACTION_SYSTEM_PROMPT: &str = "\
You are an invoice processing assistant. Analyze documents to determine if \
they are invoices and extract relevant data if they are. Follow the format \
instructions exactly.";

/// Violations of the response contract, logged with the offending output.
#[derive(Debug, PartialEq)]
pub enum ProtocolError {
    EmptyResponse,
    MissingPrefix,
    MalformedLineItems(String),
    MissingField(&'static str),
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProtocolError::EmptyResponse => write!(f, "empty model response"),
            ProtocolError::MissingPrefix => {
                write!(f, "response missing true:/false: prefix")
            }
            ProtocolError::MalformedLineItems(detail) => {
                write!(f, "malformed line item section: {}", detail)
            }
            ProtocolError::MissingField(name) => {
                write!(f, "required field missing from response: {}", name)
            }
        }
    }
}

impl std::error::Error for ProtocolError {}

/// Build the user prompt for the combined classify + extract call.
pub fn build_extraction_prompt(document_text: &str) -> String {
    format!(
        "Analyze this document and determine if it's a business invoice.\n\
         \n\
         A business invoice should have most of these elements:\n\
         - Invoice number\n\
         - Issue date\n\
         - Due date\n\
         - Line items with quantities and prices\n\
         - Total amount\n\
         - Vendor and customer information\n\
         \n\
         The document may be a PDF or image that's been converted to text, so the \
         formatting might not be perfect. Look for these elements even if they're \
         not perfectly formatted.\n\
         \n\
         If this is NOT a business invoice:\n\
         1. Start your response with exactly \"false:\"\n\
         2. Follow with a brief explanation of why it's not an invoice\n\
         \n\
         If this IS a business invoice:\n\
         1. Start your response with exactly \"true:\"\n\
         2. Follow with the extracted data in this exact format:\n\
         vendor:...\n\
         customer:...\n\
         invoice_number:...\n\
         invoice_date:...\n\
         due_date:...\n\
         currency:...\n\
         total_amount:...\n\
         {start}\n\
         description:...\n\
         quantity:...\n\
         unit_price:...\n\
         total:...\n\
         {end}\n\
         \n\
         Do not include position/reference numbers as quantities.\n\
         Some fields might be missing - extract what you can find.\n\
         \n\
         Document text:\n{text}",
        start = LINE_ITEMS_START,
        end = LINE_ITEMS_END,
        text = document_text,
    )
}

/// Parse a model response into a verdict + fields.
///
/// `default_currency` fills the currency when the response leaves it blank.
pub fn parse_response(
    raw: &str,
    default_currency: &str,
) -> Result<InvoiceCandidate, ProtocolError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ProtocolError::EmptyResponse);
    }

    if trimmed
        .get(.."false:".len())
        .is_some_and(|head| head.eq_ignore_ascii_case("false:"))
    {
        let reason = trimmed["false:".len()..].trim();
        return Ok(InvoiceCandidate {
            is_invoice: false,
            rejection_reason: if reason.is_empty() {
                None
            } else {
                Some(reason.to_string())
            },
            fields: None,
        });
    }
    if !trimmed
        .get(.."true:".len())
        .is_some_and(|head| head.eq_ignore_ascii_case("true:"))
    {
        return Err(ProtocolError::MissingPrefix);
    }

    let body = trimmed["true:".len()..].trim();
    let fields = parse_fields(body, default_currency)?;
    Ok(InvoiceCandidate {
        is_invoice: true,
        rejection_reason: None,
        fields: Some(fields),
    })
}

#[derive(Default)]
struct RawItem {
    description: Option<String>,
    quantity: Option<f64>,
    unit_price: Option<f64>,
    total: Option<f64>,
}

impl RawItem {
    fn finish(self) -> Option<LineItemFields> {
        let description = self.description?;
        Some(LineItemFields::from_parts(
            description,
            self.quantity,
            self.unit_price,
            self.total,
            None,
        ))
    }
}

fn parse_fields(body: &str, default_currency: &str) -> Result<InvoiceFields, ProtocolError> {
    let mut vendor_name = None;
    let mut customer_name = None;
    let mut invoice_number = None;
    let mut invoice_date = None;
    let mut due_date = None;
    let mut currency = None;
    let mut total_amount = None;
    let mut line_items: Vec<LineItemFields> = Vec::new();

    let mut in_items = false;
    let mut items_seen = false;
    let mut current = RawItem::default();

    for line in body.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line.contains(LINE_ITEMS_START) {
            if in_items || items_seen {
                return Err(ProtocolError::MalformedLineItems(
                    "duplicate start delimiter".to_string(),
                ));
            }
            in_items = true;
            items_seen = true;
            continue;
        }
        if line.contains(LINE_ITEMS_END) {
            if !in_items {
                return Err(ProtocolError::MalformedLineItems(
                    "end delimiter before start".to_string(),
                ));
            }
            in_items = false;
            if let Some(item) = std::mem::take(&mut current).finish() {
                line_items.push(item);
            }
            continue;
        }

        // Value may itself contain colons (dates, URLs); split only once.
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim();
        let value = value.trim();

        if in_items {
            match key {
                "description" => {
                    // A new description opens a new item.
                    if current.description.is_some() {
                        if let Some(item) = std::mem::take(&mut current).finish() {
                            line_items.push(item);
                        }
                    }
                    current.description = Some(value.to_string());
                }
                "quantity" => current.quantity = parse_decimal(value),
                "unit_price" => current.unit_price = parse_decimal(value),
                "total" => current.total = parse_decimal(value),
                _ => {}
            }
        } else {
            match key {
                "vendor" => vendor_name = non_empty(value),
                "customer" => customer_name = non_empty(value),
                "invoice_number" => invoice_number = non_empty(value),
                "invoice_date" => invoice_date = non_empty(value),
                "due_date" => due_date = non_empty(value),
                "currency" => currency = non_empty(value),
                "total_amount" => total_amount = parse_decimal(value),
                _ => {}
            }
        }
    }

    if in_items {
        return Err(ProtocolError::MalformedLineItems(
            "unterminated line item section".to_string(),
        ));
    }

    let vendor_name = vendor_name.ok_or(ProtocolError::MissingField("vendor"))?;
    let invoice_number = invoice_number.ok_or(ProtocolError::MissingField("invoice_number"))?;
    let total_amount = total_amount.ok_or(ProtocolError::MissingField("total_amount"))?;

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

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

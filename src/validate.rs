//! Arithmetic validation of extracted invoice fields.
//!
//! Checks run at minor-unit integer precision with a one-cent tolerance. The
//! caller decides severity: on the structured path any issue is a hard
//! failure that triggers the model fallback; on the model path issues become
//! warnings attached to the saved outcome.

use crate::models::InvoiceFields;
use crate::money::{format_major, to_minor, within_tolerance};

#[derive(Debug, Clone, PartialEq)]
pub enum ValidationIssue {
    /// Sum of line-item totals disagrees with the header total.
    TotalMismatch { stated: i64, computed: i64 },
    /// quantity × unit price disagrees with the item's stated total.
    ItemMismatch {
        index: usize,
        description: String,
        stated: i64,
        computed: i64,
    },
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationIssue::TotalMismatch { stated, computed } => write!(
                f,
                "line items sum to {} but the invoice total is {}",
                format_major(*computed),
                format_major(*stated)
            ),
            ValidationIssue::ItemMismatch {
                index,
                description,
                stated,
                computed,
            } => write!(
                f,
                "line item {} ({}): quantity × unit price is {} but stated total is {}",
                index + 1,
                description,
                format_major(*computed),
                format_major(*stated)
            ),
        }
    }
}

/// Cross-check the invoice arithmetic. Empty result means consistent.
pub fn validate_fields(fields: &InvoiceFields) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();

    if !fields.line_items.is_empty() {
        let stated = to_minor(fields.total_amount);
        let computed: i64 = fields.line_items.iter().map(|i| to_minor(i.total)).sum();
        if !within_tolerance(stated, computed) {
            issues.push(ValidationIssue::TotalMismatch { stated, computed });
        }
    }

    for (index, item) in fields.line_items.iter().enumerate() {
        // Items whose unit price was adopted from the total have no
        // independently stated price to check against.
        if item.unit_price_from_total {
            continue;
        }
        let stated = to_minor(item.total);
        let computed = to_minor(item.quantity * item.unit_price);
        if !within_tolerance(stated, computed) {
            issues.push(ValidationIssue::ItemMismatch {
                index,
                description: item.description.clone(),
                stated,
                computed,
            });
        }
    }

    issues
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LineItemFields;

    fn item(quantity: f64, unit_price: f64, total: f64) -> LineItemFields {
        LineItemFields {
            description: "item".to_string(),
            quantity,
            unit_price,
            total,
            position: None,
            unit_price_from_total: false,
        }
    }

    fn fields(total: f64, items: Vec<LineItemFields>) -> InvoiceFields {
        InvoiceFields {
            vendor_name: "Acme".to_string(),
            customer_name: String::new(),
            invoice_number: "1".to_string(),
            invoice_date: None,
            due_date: None,
            currency: "USD".to_string(),
            total_amount: total,
            line_items: items,
        }
    }

    #[test]
    fn consistent_invoice_has_no_issues() {
        let f = fields(10.0, vec![item(2.0, 5.0, 10.0)]);
        assert!(validate_fields(&f).is_empty());
    }

    #[test]
    fn header_total_mismatch_is_reported() {
        let f = fields(15.0, vec![item(2.0, 6.0, 12.0)]);
        let issues = validate_fields(&f);
        assert_eq!(
            issues,
            vec![ValidationIssue::TotalMismatch {
                stated: 1500,
                computed: 1200,
            }]
        );
    }

    #[test]
    fn item_arithmetic_mismatch_is_reported() {
        let f = fields(10.0, vec![item(3.0, 5.0, 10.0)]);
        let issues = validate_fields(&f);
        assert!(issues
            .iter()
            .any(|i| matches!(i, ValidationIssue::ItemMismatch { computed: 1500, .. })));
    }

    #[test]
    fn one_cent_rounding_is_tolerated() {
        // 3 × 3.33 = 9.99 against a stated 10.00 line.
        let f = fields(10.0, vec![item(3.0, 3.33, 10.0)]);
        assert!(validate_fields(&f).is_empty());
    }

    #[test]
    fn fallback_constructed_items_skip_the_cross_check() {
        let fallback = LineItemFields::from_parts("Service".to_string(), None, None, Some(99.9), None);
        assert!(fallback.unit_price_from_total);
        let f = fields(99.9, vec![fallback]);
        assert!(validate_fields(&f).is_empty());
    }

    #[test]
    fn position_mistaken_as_quantity_is_caught() {
        // Ordinal 3 misread as quantity on a single 100.00 line.
        let f = fields(100.0, vec![item(3.0, 100.0, 100.0)]);
        let issues = validate_fields(&f);
        assert!(issues
            .iter()
            .any(|i| matches!(i, ValidationIssue::ItemMismatch { computed: 30000, .. })));
    }

    #[test]
    fn no_items_means_no_total_check() {
        let f = fields(100.0, vec![]);
        assert!(validate_fields(&f).is_empty());
    }
}

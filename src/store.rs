//! Invoice and document persistence.
//!
//! Conversion from major-unit decimals to integer minor units happens here,
//! exactly once per save. Multi-row writes (header + items, deletes, item
//! replacement) run in a single transaction. Duplicate detection is an exact
//! match on (vendor name, invoice number, total minor units), checked before
//! anything is written.

use anyhow::{anyhow, Result};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::models::{now_ts, Document, Invoice, InvoiceFields, InvoiceLineItem};
use crate::money::to_minor;

/// Sort keys accepted by [`list_invoices`]. Maps to whitelisted columns only;
/// no caller-supplied SQL fragments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortColumn {
    InvoiceDate,
    TotalAmount,
    VendorName,
    CreatedAt,
}

impl SortColumn {
    fn as_sql(self) -> &'static str {
        match self {
            SortColumn::InvoiceDate => "invoice_date",
            SortColumn::TotalAmount => "total_amount",
            SortColumn::VendorName => "vendor_name",
            SortColumn::CreatedAt => "created_at",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "invoice_date" | "date" => Some(Self::InvoiceDate),
            "total_amount" | "amount" => Some(Self::TotalAmount),
            "vendor_name" | "vendor" => Some(Self::VendorName),
            "created_at" => Some(Self::CreatedAt),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    fn as_sql(self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

/// An already-stored invoice matching the duplicate triple.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DuplicateMatch {
    pub id: String,
    pub vendor_name: String,
    pub invoice_number: String,
    pub total_amount: i64,
}

/// Exact-match duplicate lookup on (vendor, invoice number, total minor
/// units).
pub async fn find_duplicate(
    pool: &SqlitePool,
    fields: &InvoiceFields,
) -> Result<Option<DuplicateMatch>> {
    let found = sqlx::query_as::<_, DuplicateMatch>(
        "SELECT id, vendor_name, invoice_number, total_amount FROM invoices \
         WHERE vendor_name = ? AND invoice_number = ? AND total_amount = ?",
    )
    .bind(&fields.vendor_name)
    .bind(&fields.invoice_number)
    .bind(to_minor(fields.total_amount))
    .fetch_optional(pool)
    .await?;
    Ok(found)
}

/// Persist a new invoice with its line items. Returns the new invoice id.
pub async fn save_invoice(
    pool: &SqlitePool,
    fields: &InvoiceFields,
    document: Option<(&str, i64)>,
) -> Result<String> {
    let invoice_id = Uuid::new_v4().to_string();
    let (document_id, document_created_at) = match document {
        Some((id, created_at)) => (Some(id.to_string()), Some(created_at)),
        None => (None, None),
    };

    let mut tx = pool.begin().await?;
    sqlx::query(
        "INSERT INTO invoices \
         (id, document_id, document_created_at, vendor_name, customer_name, invoice_number, \
          invoice_date, due_date, total_amount, currency, created_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&invoice_id)
    .bind(&document_id)
    .bind(document_created_at)
    .bind(&fields.vendor_name)
    .bind(&fields.customer_name)
    .bind(&fields.invoice_number)
    .bind(&fields.invoice_date)
    .bind(&fields.due_date)
    .bind(to_minor(fields.total_amount))
    .bind(&fields.currency)
    .bind(now_ts())
    .execute(&mut *tx)
    .await?;

    for item in &fields.line_items {
        sqlx::query(
            "INSERT INTO invoice_line_items \
             (id, invoice_id, description, quantity, unit_price, total_price) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&invoice_id)
        .bind(&item.description)
        .bind(item.quantity)
        .bind(to_minor(item.unit_price))
        .bind(to_minor(item.total))
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;

    Ok(invoice_id)
}

/// Fetch one invoice with its line items in insertion order.
pub async fn get_invoice(
    pool: &SqlitePool,
    invoice_id: &str,
) -> Result<Option<(Invoice, Vec<InvoiceLineItem>)>> {
    let invoice = sqlx::query_as::<_, Invoice>("SELECT * FROM invoices WHERE id = ?")
        .bind(invoice_id)
        .fetch_optional(pool)
        .await?;
    let Some(invoice) = invoice else {
        return Ok(None);
    };

    let items = sqlx::query_as::<_, InvoiceLineItem>(
        "SELECT * FROM invoice_line_items WHERE invoice_id = ? ORDER BY rowid",
    )
    .bind(invoice_id)
    .fetch_all(pool)
    .await?;
    Ok(Some((invoice, items)))
}

/// List invoice headers. `sort`/`order` map to whitelisted columns.
pub async fn list_invoices(
    pool: &SqlitePool,
    sort: SortColumn,
    order: SortOrder,
    limit: i64,
    offset: i64,
) -> Result<Vec<Invoice>> {
    let sql = format!(
        "SELECT * FROM invoices ORDER BY {} {} LIMIT ? OFFSET ?",
        sort.as_sql(),
        order.as_sql()
    );
    let invoices = sqlx::query_as::<_, Invoice>(&sql)
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await?;
    Ok(invoices)
}

/// Partial header update for [`update_invoice`]. `None` fields are left
/// untouched.
#[derive(Debug, Default, Clone)]
pub struct InvoiceUpdate {
    pub vendor_name: Option<String>,
    pub customer_name: Option<String>,
    pub invoice_number: Option<String>,
    pub invoice_date: Option<String>,
    pub due_date: Option<String>,
    pub total_amount: Option<f64>,
    pub currency: Option<String>,
    pub line_items: Option<Vec<crate::models::LineItemFields>>,
    pub edited_by: Option<String>,
}

/// Apply a partial update. When `line_items` is provided the stored items are
/// replaced wholesale; header changes and the replacement share one
/// transaction.
pub async fn update_invoice(
    pool: &SqlitePool,
    invoice_id: &str,
    update: &InvoiceUpdate,
) -> Result<()> {
    let existing = sqlx::query_as::<_, Invoice>("SELECT * FROM invoices WHERE id = ?")
        .bind(invoice_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| anyhow!("Invoice not found: {}", invoice_id))?;

    let mut tx = pool.begin().await?;
    sqlx::query(
        "UPDATE invoices SET vendor_name = ?, customer_name = ?, invoice_number = ?, \
         invoice_date = ?, due_date = ?, total_amount = ?, currency = ?, last_edited_by = ? \
         WHERE id = ?",
    )
    .bind(update.vendor_name.as_ref().unwrap_or(&existing.vendor_name))
    .bind(update.customer_name.as_ref().unwrap_or(&existing.customer_name))
    .bind(update.invoice_number.as_ref().unwrap_or(&existing.invoice_number))
    .bind(update.invoice_date.as_ref().or(existing.invoice_date.as_ref()))
    .bind(update.due_date.as_ref().or(existing.due_date.as_ref()))
    .bind(
        update
            .total_amount
            .map(to_minor)
            .unwrap_or(existing.total_amount),
    )
    .bind(update.currency.as_ref().unwrap_or(&existing.currency))
    .bind(update.edited_by.as_ref().or(existing.last_edited_by.as_ref()))
    .bind(invoice_id)
    .execute(&mut *tx)
    .await?;

    if let Some(items) = &update.line_items {
        sqlx::query("DELETE FROM invoice_line_items WHERE invoice_id = ?")
            .bind(invoice_id)
            .execute(&mut *tx)
            .await?;
        for item in items {
            sqlx::query(
                "INSERT INTO invoice_line_items \
                 (id, invoice_id, description, quantity, unit_price, total_price) \
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(Uuid::new_v4().to_string())
            .bind(invoice_id)
            .bind(&item.description)
            .bind(item.quantity)
            .bind(to_minor(item.unit_price))
            .bind(to_minor(item.total))
            .execute(&mut *tx)
            .await?;
        }
    }
    tx.commit().await?;
    Ok(())
}

/// Delete an invoice. Usage records keep their history but lose the link;
/// line items go with the invoice. One transaction.
pub async fn delete_invoice(pool: &SqlitePool, invoice_id: &str) -> Result<bool> {
    let mut tx = pool.begin().await?;
    sqlx::query("UPDATE token_usage SET invoice_id = NULL WHERE invoice_id = ?")
        .bind(invoice_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM invoice_line_items WHERE invoice_id = ?")
        .bind(invoice_id)
        .execute(&mut *tx)
        .await?;
    let deleted = sqlx::query("DELETE FROM invoices WHERE id = ?")
        .bind(invoice_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();
    tx.commit().await?;
    Ok(deleted > 0)
}

/// Store one version of a document. Returns (id, created_at); repeated saves
/// of the same id add versions.
pub async fn save_document(
    pool: &SqlitePool,
    id: &str,
    title: &str,
    kind: &str,
    content: &str,
    user_id: &str,
) -> Result<(String, i64)> {
    let created_at = now_ts();
    sqlx::query(
        "INSERT INTO documents (id, created_at, title, kind, content, user_id) \
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(id)
    .bind(created_at)
    .bind(title)
    .bind(kind)
    .bind(content)
    .bind(user_id)
    .execute(pool)
    .await?;
    Ok((id.to_string(), created_at))
}

/// Latest version of a document by creation time.
pub async fn get_document(pool: &SqlitePool, id: &str) -> Result<Option<Document>> {
    let doc = sqlx::query_as::<_, Document>(
        "SELECT * FROM documents WHERE id = ? ORDER BY created_at DESC LIMIT 1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(doc)
}

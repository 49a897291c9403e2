use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    create_schema(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create all tables and indexes. Idempotent.
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    // Generic documents, versioned by creation time (composite key).
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            title TEXT NOT NULL,
            kind TEXT NOT NULL DEFAULT 'text',
            content TEXT NOT NULL,
            user_id TEXT NOT NULL,
            PRIMARY KEY (id, created_at)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS invoices (
            id TEXT PRIMARY KEY,
            document_id TEXT,
            document_created_at INTEGER,
            vendor_name TEXT NOT NULL,
            customer_name TEXT NOT NULL,
            invoice_number TEXT NOT NULL,
            invoice_date TEXT,
            due_date TEXT,
            total_amount INTEGER NOT NULL,
            currency TEXT NOT NULL DEFAULT 'USD',
            created_at INTEGER NOT NULL,
            last_edited_by TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS invoice_line_items (
            id TEXT PRIMARY KEY,
            invoice_id TEXT NOT NULL,
            description TEXT NOT NULL,
            quantity REAL NOT NULL,
            unit_price INTEGER NOT NULL,
            total_price INTEGER NOT NULL,
            FOREIGN KEY (invoice_id) REFERENCES invoices(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // invoice_id is nulled (not cascaded) when an invoice is deleted, so
    // cost history survives invoice removal.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS token_usage (
            id TEXT PRIMARY KEY,
            invoice_id TEXT,
            prompt_tokens INTEGER,
            completion_tokens INTEGER,
            total_tokens INTEGER,
            estimated_cost REAL,
            created_at INTEGER NOT NULL,
            total_processed_invoices INTEGER
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS prompt_cache (
            id TEXT PRIMARY KEY,
            prompt TEXT NOT NULL,
            hash TEXT NOT NULL UNIQUE,
            token_count INTEGER NOT NULL,
            created_at INTEGER NOT NULL,
            last_used_at INTEGER NOT NULL,
            use_count INTEGER NOT NULL DEFAULT 1
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_line_items_invoice_id ON invoice_line_items(invoice_id)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_invoices_duplicate \
         ON invoices(vendor_name, invoice_number, total_amount)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_token_usage_invoice_id ON token_usage(invoice_id)")
        .execute(pool)
        .await?;

    Ok(())
}

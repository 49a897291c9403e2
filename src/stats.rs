//! Processing cost and cache overview.
//!
//! Summarizes what the pipeline has processed and spent: invoice counts,
//! total and average model cost per invoice, and prompt-cache effectiveness.
//! Used by `invox stats` to give confidence that accounting and caching are
//! working as expected.

use anyhow::Result;

use crate::config::Config;
use crate::db;
use crate::ledger;

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;

    let stored_invoices: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM invoices")
        .fetch_one(&pool)
        .await?;
    let total_value: i64 =
        sqlx::query_scalar("SELECT COALESCE(SUM(total_amount), 0) FROM invoices")
            .fetch_one(&pool)
            .await?;

    let usage = ledger::usage_stats(&pool).await?;
    let cache = ledger::cache_stats(&pool, &config.pricing).await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Invox — Processing Stats");
    println!("========================");
    println!();
    println!("  Database:            {}", config.db.path.display());
    println!("  Size:                {}", format_bytes(db_size));
    println!();
    println!("  Stored invoices:     {}", stored_invoices);
    println!(
        "  Total invoice value: {}",
        crate::money::format_major(total_value)
    );
    println!();
    println!("  Processed invoices:  {}", usage.processed_invoices);
    println!("  Total tokens:        {}", usage.total_tokens);
    println!("  Total cost:          ${:.4}", usage.total_cost);
    println!("  Avg cost / invoice:  ${:.4}", usage.average_cost);
    println!();
    println!("  Cache entries:       {}", cache.entries);
    println!("  Cache uses:          {}", cache.total_uses);
    println!("  Hit rate:            {:.1}%", cache.hit_rate);
    println!("  Tokens saved:        {}", cache.tokens_saved);
    println!("  Est. cost saved:     ${:.4}", cache.cost_saved);
    println!();

    pool.close().await;
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

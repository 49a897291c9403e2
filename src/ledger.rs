//! Token usage ledger and prompt cache.
//!
//! Every model call is recorded with an estimated cost at fixed per-1000-token
//! rates. A distinguished singleton row (id `global-stats`) carries the
//! running count of processed invoices; it is seeded lazily from the existing
//! rows and incremented atomically inside the same transaction as any
//! invoice-linked insert. The prompt cache keys on a content hash over the
//! prompt text plus the attachment listing; a cache read is a mutating
//! operation that bumps the use count and books the saved prompt tokens as a
//! zero-completion usage row.

use anyhow::Result;
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::config::PricingConfig;
use crate::models::{now_ts, PromptCacheEntry, TokenUsage};

/// Fixed id of the singleton row holding the processed-invoice counter.
pub const GLOBAL_STATS_ID: &str = "global-stats";

/// Estimated cost of one call at the configured rates.
pub fn estimate_cost(pricing: &PricingConfig, usage: &TokenUsage) -> f64 {
    usage.prompt_tokens as f64 / 1000.0 * pricing.prompt_rate_per_1k
        + usage.completion_tokens as f64 / 1000.0 * pricing.completion_rate_per_1k
}

/// Rough token count for text we never sent to a tokenizer.
pub fn estimate_tokens(text: &str) -> i64 {
    (text.len() as i64 + 3) / 4
}

/// Record one model call. Invoice-linked records also advance the
/// processed-invoice counter, in the same transaction as the insert.
pub async fn track_usage(
    pool: &SqlitePool,
    pricing: &PricingConfig,
    usage: &TokenUsage,
    invoice_id: Option<&str>,
) -> Result<f64> {
    let cost = estimate_cost(pricing, usage);
    ensure_global_stats(pool).await?;

    let mut tx = pool.begin().await?;
    sqlx::query(
        "INSERT INTO token_usage \
         (id, invoice_id, prompt_tokens, completion_tokens, total_tokens, estimated_cost, created_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(invoice_id)
    .bind(usage.prompt_tokens)
    .bind(usage.completion_tokens)
    .bind(usage.total_tokens)
    .bind(cost)
    .bind(now_ts())
    .execute(&mut *tx)
    .await?;

    if invoice_id.is_some() {
        sqlx::query(
            "UPDATE token_usage \
             SET total_processed_invoices = total_processed_invoices + 1 \
             WHERE id = ?",
        )
        .bind(GLOBAL_STATS_ID)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;

    Ok(cost)
}

/// Seed the singleton counter row if it does not exist yet, from the number
/// of distinct invoices already recorded.
async fn ensure_global_stats(pool: &SqlitePool) -> Result<()> {
    let exists: Option<i64> =
        sqlx::query_scalar("SELECT 1 FROM token_usage WHERE id = ?")
            .bind(GLOBAL_STATS_ID)
            .fetch_optional(pool)
            .await?;
    if exists.is_some() {
        return Ok(());
    }

    let processed: i64 = sqlx::query_scalar(
        "SELECT COUNT(DISTINCT invoice_id) FROM token_usage WHERE invoice_id IS NOT NULL",
    )
    .fetch_one(pool)
    .await?;

    sqlx::query(
        "INSERT OR IGNORE INTO token_usage (id, created_at, total_processed_invoices) \
         VALUES (?, ?, ?)",
    )
    .bind(GLOBAL_STATS_ID)
    .bind(now_ts())
    .bind(processed)
    .execute(pool)
    .await?;
    Ok(())
}

/// Cache key: sha-256 over the prompt text and the sorted, deduplicated
/// attachment listing. Distinct attachment sets yield distinct keys even for
/// identical prompt text.
pub fn cache_key(prompt: &str, attachments: &[(String, String)]) -> String {
    let mut listing: Vec<String> = attachments
        .iter()
        .map(|(id, content_type)| format!("{}:{}", id, content_type))
        .collect();
    listing.sort();
    listing.dedup();

    let mut hasher = Sha256::new();
    hasher.update(prompt.as_bytes());
    for entry in &listing {
        hasher.update(entry.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Look up a cached prompt by hash. A hit bumps the use count, refreshes the
/// last-used timestamp, and books the saved prompt tokens as a
/// zero-completion usage record.
pub async fn get_cached(
    pool: &SqlitePool,
    pricing: &PricingConfig,
    hash: &str,
) -> Result<Option<PromptCacheEntry>> {
    let entry: Option<PromptCacheEntry> =
        sqlx::query_as("SELECT * FROM prompt_cache WHERE hash = ?")
            .bind(hash)
            .fetch_optional(pool)
            .await?;
    let Some(mut entry) = entry else {
        return Ok(None);
    };

    let now = now_ts();
    sqlx::query("UPDATE prompt_cache SET use_count = use_count + 1, last_used_at = ? WHERE id = ?")
        .bind(now)
        .bind(&entry.id)
        .execute(pool)
        .await?;
    entry.use_count += 1;
    entry.last_used_at = now;

    let saved = TokenUsage {
        prompt_tokens: entry.token_count,
        completion_tokens: 0,
        total_tokens: entry.token_count,
    };
    track_usage(pool, pricing, &saved, None).await?;

    Ok(Some(entry))
}

/// Insert a prompt into the cache, or bump an existing entry with the same
/// hash.
pub async fn cache_prompt(
    pool: &SqlitePool,
    prompt: &str,
    hash: &str,
    token_count: i64,
) -> Result<()> {
    let now = now_ts();
    sqlx::query(
        "INSERT INTO prompt_cache (id, prompt, hash, token_count, created_at, last_used_at, use_count) \
         VALUES (?, ?, ?, ?, ?, ?, 1) \
         ON CONFLICT(hash) DO UPDATE SET use_count = use_count + 1, last_used_at = excluded.last_used_at",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(prompt)
    .bind(hash)
    .bind(token_count)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;
    Ok(())
}

/// Aggregate usage figures for the stats report.
#[derive(Debug, Clone, Copy, Default)]
pub struct UsageStats {
    pub processed_invoices: i64,
    pub total_cost: f64,
    pub average_cost: f64,
    pub total_tokens: i64,
}

/// Aggregate cache figures for the stats report.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    pub entries: i64,
    pub total_uses: i64,
    pub hit_rate: f64,
    pub tokens_saved: i64,
    pub cost_saved: f64,
}

pub async fn usage_stats(pool: &SqlitePool) -> Result<UsageStats> {
    let processed_invoices: i64 = sqlx::query_scalar(
        "SELECT COALESCE(total_processed_invoices, 0) FROM token_usage WHERE id = ?",
    )
    .bind(GLOBAL_STATS_ID)
    .fetch_optional(pool)
    .await?
    .unwrap_or(0);

    // The singleton row carries no cost and is excluded from the sums.
    let (total_cost, total_tokens): (f64, i64) = sqlx::query_as(
        "SELECT COALESCE(SUM(estimated_cost), 0.0), COALESCE(SUM(total_tokens), 0) \
         FROM token_usage WHERE id != ?",
    )
    .bind(GLOBAL_STATS_ID)
    .fetch_one(pool)
    .await?;

    let average_cost = if processed_invoices > 0 {
        total_cost / processed_invoices as f64
    } else {
        0.0
    };

    Ok(UsageStats {
        processed_invoices,
        total_cost,
        average_cost,
        total_tokens,
    })
}

pub async fn cache_stats(pool: &SqlitePool, pricing: &PricingConfig) -> Result<CacheStats> {
    let (entries, total_uses, tokens_saved): (i64, i64, i64) = sqlx::query_as(
        "SELECT COUNT(*), COALESCE(SUM(use_count), 0), \
         COALESCE(SUM(token_count * (use_count - 1)), 0) FROM prompt_cache",
    )
    .fetch_one(pool)
    .await?;

    let hit_rate = if total_uses > 0 {
        (total_uses - entries) as f64 / total_uses as f64 * 100.0
    } else {
        0.0
    };
    let cost_saved = tokens_saved as f64 / 1000.0 * pricing.prompt_rate_per_1k;

    Ok(CacheStats {
        entries,
        total_uses,
        hit_rate,
        tokens_saved,
        cost_saved,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::migrate::create_schema;

    async fn pool() -> SqlitePool {
        let pool = db::connect_memory().await.unwrap();
        create_schema(&pool).await.unwrap();
        pool
    }

    fn usage(prompt: i64, completion: i64) -> TokenUsage {
        TokenUsage {
            prompt_tokens: prompt,
            completion_tokens: completion,
            total_tokens: prompt + completion,
        }
    }

    #[test]
    fn cost_uses_both_rates() {
        let pricing = PricingConfig::default();
        let cost = estimate_cost(&pricing, &usage(1000, 500));
        assert!((cost - (0.03 + 0.03)).abs() < 1e-9);
    }

    #[test]
    fn cache_key_is_order_insensitive_but_set_sensitive() {
        let a = ("a1".to_string(), "application/pdf".to_string());
        let b = ("b2".to_string(), "image/png".to_string());
        let k1 = cache_key("prompt", &[a.clone(), b.clone()]);
        let k2 = cache_key("prompt", &[b.clone(), a.clone()]);
        let k3 = cache_key("prompt", &[a.clone()]);
        let k4 = cache_key("other prompt", &[a.clone(), b]);
        assert_eq!(k1, k2);
        assert_ne!(k1, k3);
        assert_ne!(k1, k4);
        // Duplicate listings collapse.
        assert_eq!(cache_key("p", &[a.clone(), a.clone()]), cache_key("p", &[a]));
    }

    #[tokio::test]
    async fn invoice_linked_usage_advances_the_counter() {
        let pool = pool().await;
        let pricing = PricingConfig::default();

        track_usage(&pool, &pricing, &usage(100, 50), Some("inv-1"))
            .await
            .unwrap();
        track_usage(&pool, &pricing, &usage(100, 50), None)
            .await
            .unwrap();
        track_usage(&pool, &pricing, &usage(100, 50), Some("inv-2"))
            .await
            .unwrap();

        let stats = usage_stats(&pool).await.unwrap();
        assert_eq!(stats.processed_invoices, 2);
        assert_eq!(stats.total_tokens, 450);
        assert!(stats.total_cost > 0.0);
    }

    #[tokio::test]
    async fn singleton_is_seeded_from_existing_rows() {
        let pool = pool().await;
        // Rows written before the counter existed.
        for invoice in ["a", "a", "b"] {
            sqlx::query(
                "INSERT INTO token_usage \
                 (id, invoice_id, prompt_tokens, completion_tokens, total_tokens, estimated_cost, created_at) \
                 VALUES (?, ?, 10, 5, 15, 0.001, 0)",
            )
            .bind(Uuid::new_v4().to_string())
            .bind(invoice)
            .execute(&pool)
            .await
            .unwrap();
        }

        track_usage(&pool, &PricingConfig::default(), &usage(10, 5), Some("c"))
            .await
            .unwrap();
        let stats = usage_stats(&pool).await.unwrap();
        // Two distinct pre-existing invoices plus the new one.
        assert_eq!(stats.processed_invoices, 3);
    }

    #[tokio::test]
    async fn cache_round_trip_counts_uses_and_saved_tokens() {
        let pool = pool().await;
        let pricing = PricingConfig::default();
        let hash = cache_key("extract this", &[("a1".to_string(), "application/pdf".to_string())]);

        assert!(get_cached(&pool, &pricing, &hash).await.unwrap().is_none());
        cache_prompt(&pool, "extract this", &hash, 200).await.unwrap();

        let entry = get_cached(&pool, &pricing, &hash).await.unwrap().unwrap();
        assert_eq!(entry.use_count, 2);
        assert_eq!(entry.token_count, 200);
        let entry = get_cached(&pool, &pricing, &hash).await.unwrap().unwrap();
        assert_eq!(entry.use_count, 3);

        let stats = cache_stats(&pool, &pricing).await.unwrap();
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.total_uses, 3);
        assert_eq!(stats.tokens_saved, 400);
        assert!((stats.hit_rate - 200.0 / 3.0).abs() < 1e-9);
        assert!(stats.cost_saved > 0.0);
    }

    #[tokio::test]
    async fn cache_hits_book_zero_completion_usage() {
        let pool = pool().await;
        let pricing = PricingConfig::default();
        cache_prompt(&pool, "p", "deadbeef", 100).await.unwrap();
        get_cached(&pool, &pricing, "deadbeef").await.unwrap();

        let (completion, total): (i64, i64) = sqlx::query_as(
            "SELECT COALESCE(SUM(completion_tokens), 0), COALESCE(SUM(total_tokens), 0) \
             FROM token_usage WHERE id != ?",
        )
        .bind(GLOBAL_STATS_ID)
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(completion, 0);
        assert_eq!(total, 100);
    }

    #[test]
    fn token_estimate_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }
}

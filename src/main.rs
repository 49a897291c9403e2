//! # Invox CLI (`invox`)
//!
//! The `invox` binary drives the invoice processing pipeline from the command
//! line: database initialization, attachment processing, invoice listing and
//! inspection, and cost statistics.
//!
//! ## Usage
//!
//! ```bash
//! invox --config ./config/invox.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `invox init` | Create the SQLite database and run schema migrations |
//! | `invox process <files…>` | Run attachments through the pipeline |
//! | `invox list` | List stored invoices |
//! | `invox show <id>` | Print one invoice with its line items |
//! | `invox delete <id>` | Delete an invoice (usage history is kept) |
//! | `invox stats` | Print processing cost and cache statistics |
//!
//! ## Examples
//!
//! ```bash
//! # Initialize the database
//! invox init --config ./config/invox.toml
//!
//! # Process two attachments with an explicit request
//! invox process scan1.pdf scan2.png --message "process this invoice"
//!
//! # Most expensive invoices first
//! invox list --sort amount --order desc --limit 10
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use invox::config::{self, Config};
use invox::db;
use invox::docai::HttpDocAi;
use invox::extract::MIME_PDF;
use invox::llm::HttpChatModel;
use invox::migrate;
use invox::models::{format_ts, Attachment};
use invox::money::format_major;
use invox::ocr::HttpOcr;
use invox::pipeline::{Outcome, Pipeline, Services};
use invox::stats;
use invox::store::{self, SortColumn, SortOrder};

/// Invox CLI — an invoice document processing pipeline.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/invox.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "invox",
    about = "Invox — an invoice document processing pipeline",
    version,
    long_about = "Invox ingests invoice attachments (PDFs, scans), extracts their text, \
    classifies and extracts structured invoice data (a schema-driven document processor with a \
    language-model fallback), validates the arithmetic, detects duplicates, and stores the \
    results in SQLite with full token and cost accounting."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/invox.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables (documents,
    /// invoices, invoice_line_items, token_usage, prompt_cache). This command
    /// is idempotent — running it multiple times is safe.
    Init,

    /// Process attachments through the invoice pipeline.
    ///
    /// Each file is extracted, classified, validated, checked for duplicates,
    /// and saved. Files are processed concurrently; one failing file does not
    /// stop the others.
    Process {
        /// Attachment files (PDF or image).
        files: Vec<PathBuf>,

        /// The accompanying user message. Messages without invoice-processing
        /// intent route each document through the strict verifier first.
        #[arg(long, default_value = "process this invoice")]
        message: String,
    },

    /// List stored invoices.
    List {
        /// Sort column: `date`, `amount`, `vendor`, or `created_at`.
        #[arg(long, default_value = "created_at")]
        sort: String,

        /// Sort order: `asc` or `desc`.
        #[arg(long, default_value = "desc")]
        order: String,

        /// Maximum number of invoices to show.
        #[arg(long, default_value_t = 50)]
        limit: i64,

        /// Number of invoices to skip.
        #[arg(long, default_value_t = 0)]
        offset: i64,
    },

    /// Print one invoice with its line items.
    Show {
        /// Invoice UUID.
        id: String,
    },

    /// Delete an invoice and its line items.
    ///
    /// Token usage records keep their history but lose the invoice link.
    Delete {
        /// Invoice UUID.
        id: String,
    },

    /// Print processing cost and cache statistics.
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Process { files, message } => {
            if files.is_empty() {
                bail!("no files given");
            }
            run_process(&cfg, &files, &message).await?;
        }
        Commands::List {
            sort,
            order,
            limit,
            offset,
        } => {
            run_list(&cfg, &sort, &order, limit, offset).await?;
        }
        Commands::Show { id } => {
            run_show(&cfg, &id).await?;
        }
        Commands::Delete { id } => {
            let pool = db::connect(&cfg).await?;
            if store::delete_invoice(&pool, &id).await? {
                println!("Deleted invoice {}", id);
            } else {
                println!("No invoice with id {}", id);
            }
            pool.close().await;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
    }

    Ok(())
}

async fn run_process(cfg: &Config, files: &[PathBuf], message: &str) -> Result<()> {
    let mut attachments = Vec::with_capacity(files.len());
    for path in files {
        let bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read attachment: {}", path.display()))?;
        let content_type = content_type_for(path)?;
        // Content-derived identity: reprocessing the same file hits the
        // same prompt-cache entry.
        attachments.push(Attachment::from_bytes(
            content_type,
            bytes,
            path.file_name().map(|n| n.to_string_lossy().into_owned()),
        ));
    }

    let services = Services {
        ocr: Arc::new(HttpOcr::new(&cfg.ocr)?),
        docai: HttpDocAi::from_config(&cfg.docai)?
            .map(|d| Arc::new(d) as Arc<dyn invox::docai::DocumentIntelligence>),
        model: Arc::new(HttpChatModel::new(&cfg.model)?),
    };

    let pool = db::connect(cfg).await?;
    let pipeline = Pipeline::new(
        pool.clone(),
        services,
        cfg.pricing,
        cfg.invoice.default_currency.clone(),
    );

    let results = pipeline.process_all(&attachments, message).await;
    for result in &results {
        let label = result.name.as_deref().unwrap_or(&result.attachment_id);
        match &result.outcome {
            Outcome::Saved {
                invoice_id,
                warnings,
                ..
            } => {
                println!("{}: saved as invoice {}", label, invoice_id);
                for warning in warnings {
                    println!("  warning: {}", warning);
                }
            }
            Outcome::Duplicate {
                invoice_id,
                vendor_name,
                invoice_number,
                total_amount,
            } => {
                println!(
                    "{}: duplicate of invoice {} ({}, {}, {})",
                    label,
                    invoice_id,
                    vendor_name,
                    invoice_number,
                    format_major(*total_amount)
                );
            }
            Outcome::NotAnInvoice { reason } => match reason {
                Some(reason) => println!("{}: not an invoice — {}", label, reason),
                None => println!("{}: not an invoice", label),
            },
            Outcome::Failed { error } => {
                println!("{}: failed — {}", label, error);
            }
        }
    }

    pool.close().await;
    Ok(())
}

async fn run_list(cfg: &Config, sort: &str, order: &str, limit: i64, offset: i64) -> Result<()> {
    let sort = SortColumn::parse(sort)
        .ok_or_else(|| anyhow::anyhow!("unknown sort column: {}", sort))?;
    let order = match order {
        "asc" => SortOrder::Asc,
        "desc" => SortOrder::Desc,
        other => bail!("unknown sort order: {}", other),
    };

    let pool = db::connect(cfg).await?;
    let invoices = store::list_invoices(&pool, sort, order, limit, offset).await?;
    if invoices.is_empty() {
        println!("No invoices stored.");
    } else {
        println!(
            "{:<36} {:<24} {:<16} {:>12}  {}",
            "ID", "VENDOR", "NUMBER", "TOTAL", "DATE"
        );
        println!("{}", "-".repeat(100));
        for invoice in &invoices {
            println!(
                "{:<36} {:<24} {:<16} {:>9} {}  {}",
                invoice.id,
                invoice.vendor_name,
                invoice.invoice_number,
                format_major(invoice.total_amount),
                invoice.currency,
                invoice.invoice_date.as_deref().unwrap_or("-")
            );
        }
    }
    pool.close().await;
    Ok(())
}

async fn run_show(cfg: &Config, id: &str) -> Result<()> {
    let pool = db::connect(cfg).await?;
    let Some((invoice, items)) = store::get_invoice(&pool, id).await? else {
        println!("No invoice with id {}", id);
        pool.close().await;
        return Ok(());
    };

    println!("Invoice {}", invoice.id);
    println!("  Vendor:     {}", invoice.vendor_name);
    println!("  Customer:   {}", invoice.customer_name);
    println!("  Number:     {}", invoice.invoice_number);
    println!(
        "  Date:       {}",
        invoice.invoice_date.as_deref().unwrap_or("-")
    );
    println!(
        "  Due:        {}",
        invoice.due_date.as_deref().unwrap_or("-")
    );
    println!(
        "  Total:      {} {}",
        format_major(invoice.total_amount),
        invoice.currency
    );
    println!("  Processed:  {}", format_ts(invoice.created_at));
    if let Some(editor) = &invoice.last_edited_by {
        println!("  Edited by:  {}", editor);
    }
    if !items.is_empty() {
        println!();
        println!(
            "  {:<40} {:>10} {:>12} {:>12}",
            "DESCRIPTION", "QTY", "UNIT", "TOTAL"
        );
        println!("  {}", "-".repeat(78));
        for item in &items {
            println!(
                "  {:<40} {:>10} {:>12} {:>12}",
                item.description,
                item.quantity,
                format_major(item.unit_price),
                format_major(item.total_price)
            );
        }
    }

    pool.close().await;
    Ok(())
}

/// Map a file extension to the attachment content type.
fn content_type_for(path: &Path) -> Result<&'static str> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "pdf" => Ok(MIME_PDF),
        "png" => Ok("image/png"),
        "jpg" | "jpeg" => Ok("image/jpeg"),
        "webp" => Ok("image/webp"),
        other => bail!("unsupported file extension: {:?}", other),
    }
}

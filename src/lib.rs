//! # Invox
//!
//! An invoice document processing pipeline.
//!
//! Invox takes chat-style attachment uploads (PDFs, scans), extracts their
//! text, decides whether each document is an invoice the user wants
//! processed, extracts structured invoice data — a schema-driven document
//! processor first, with a language-model fallback — validates the
//! arithmetic, detects duplicates, and persists everything in SQLite with
//! full token and cost accounting.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────────────┐   ┌──────────┐
//! │ Attachments │──▶│       Pipeline        │──▶│  SQLite   │
//! │  PDF / IMG  │   │ extract→verify→parse │   │ invoices │
//! └─────────────┘   │  validate→dedupe     │   │ +ledger  │
//!                   └──────┬───────────────┘   └────┬─────┘
//!                          │ injected services      │
//!                ┌─────────┼──────────┐             ▼
//!                ▼         ▼          ▼        ┌──────────┐
//!              OCR     Doc processor  Model    │   CLI    │
//!                                              │ (invox)  │
//!                                              └──────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`extract`] | Text extraction from PDFs and images |
//! | [`ocr`] | OCR service client |
//! | [`docai`] | Structured document processor client and field mapping |
//! | [`verify`] | Intent and invoice-identity gates |
//! | [`protocol`] | Model extraction prompt and response parser |
//! | [`validate`] | Arithmetic cross-checks |
//! | [`money`] | Minor-unit monetary arithmetic |
//! | [`llm`] | Chat model client |
//! | [`ledger`] | Token/cost accounting and prompt cache |
//! | [`store`] | Invoice and document persistence |
//! | [`pipeline`] | Per-attachment orchestration |
//! | [`stats`] | Cost and cache statistics report |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod config;
pub mod db;
pub mod docai;
pub mod extract;
pub mod ledger;
pub mod llm;
pub mod migrate;
pub mod models;
pub mod money;
pub mod ocr;
pub mod pipeline;
pub mod protocol;
pub mod stats;
pub mod store;
pub mod validate;
pub mod verify;

//! Attachment processing pipeline.
//!
//! One pipeline instance owns the database pool and the injected service
//! clients (OCR, structured document processor, chat model). Attachments in a
//! run are processed concurrently; the stages for a single attachment run in
//! sequence: extract → intent gate → extraction (structured first, model
//! fallback) → duplicate check → persist → usage accounting. A failing
//! attachment never aborts its siblings, and ledger failures are logged and
//! swallowed rather than failing an otherwise-processed invoice.

use std::sync::Arc;

use sqlx::SqlitePool;
use uuid::Uuid;

use crate::config::PricingConfig;
use crate::docai::{extract_fields, DocumentIntelligence};
use crate::extract::extract_text;
use crate::ledger;
use crate::llm::ChatModel;
use crate::models::{Attachment, InvoiceFields, TokenUsage};
use crate::ocr::OcrEngine;
use crate::protocol::{build_extraction_prompt, parse_response, EXTRACTION_SYSTEM_PROMPT};
use crate::store;
use crate::validate::validate_fields;
use crate::verify::{has_invoice_intent, verify_invoice};

/// Injected service clients. The structured processor is optional; without
/// it every attachment takes the model path.
pub struct Services {
    pub ocr: Arc<dyn OcrEngine>,
    pub docai: Option<Arc<dyn DocumentIntelligence>>,
    pub model: Arc<dyn ChatModel>,
}

/// Why an attachment failed, for the user-facing message.
#[derive(Debug, Clone, PartialEq)]
pub enum FailureKind {
    Extraction(String),
    /// The model's output broke the response contract. The raw output is
    /// logged, never included here.
    ProtocolViolation,
    Model(String),
    Persistence(String),
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::Extraction(e) => write!(f, "could not read the document: {}", e),
            FailureKind::ProtocolViolation => {
                write!(f, "the model returned an unusable response")
            }
            FailureKind::Model(e) => write!(f, "model call failed: {}", e),
            FailureKind::Persistence(e) => write!(f, "could not save the invoice: {}", e),
        }
    }
}

/// Terminal state of one attachment.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Saved {
        invoice_id: String,
        document_id: String,
        warnings: Vec<String>,
    },
    Duplicate {
        invoice_id: String,
        vendor_name: String,
        invoice_number: String,
        total_amount: i64,
    },
    NotAnInvoice {
        reason: Option<String>,
    },
    Failed {
        error: FailureKind,
    },
}

/// One attachment's identity plus its outcome.
#[derive(Debug)]
pub struct AttachmentResult {
    pub attachment_id: String,
    pub name: Option<String>,
    pub outcome: Outcome,
}

pub struct Pipeline {
    pool: SqlitePool,
    services: Services,
    pricing: PricingConfig,
    default_currency: String,
}

impl Pipeline {
    pub fn new(
        pool: SqlitePool,
        services: Services,
        pricing: PricingConfig,
        default_currency: String,
    ) -> Self {
        Self {
            pool,
            services,
            pricing,
            default_currency,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Process all attachments of one user turn concurrently.
    pub async fn process_all(
        &self,
        attachments: &[Attachment],
        user_message: &str,
    ) -> Vec<AttachmentResult> {
        let runs = attachments.iter().map(|attachment| async move {
            AttachmentResult {
                attachment_id: attachment.id.clone(),
                name: attachment.name.clone(),
                outcome: self.process_attachment(attachment, user_message).await,
            }
        });
        futures::future::join_all(runs).await
    }

    async fn process_attachment(&self, attachment: &Attachment, user_message: &str) -> Outcome {
        let text = match extract_text(
            &attachment.bytes,
            &attachment.content_type,
            self.services.ocr.as_ref(),
        )
        .await
        {
            Ok(text) => text,
            Err(e) => {
                return Outcome::Failed {
                    error: FailureKind::Extraction(e.to_string()),
                }
            }
        };

        // Intent gate: explicit keywords skip the model verdict.
        if !has_invoice_intent(user_message) {
            match verify_invoice(self.services.model.as_ref(), &text, user_message).await {
                Ok((verdict, usage)) => {
                    self.record_usage(&usage, None).await;
                    if !verdict {
                        return Outcome::NotAnInvoice { reason: None };
                    }
                }
                Err(e) => {
                    return Outcome::Failed {
                        error: FailureKind::Model(e.to_string()),
                    }
                }
            }
        }

        let mut warnings = Vec::new();
        let mut usage = TokenUsage::default();
        let fields = match self.structured_extract(attachment).await {
            Some(fields) => fields,
            None => match self.model_extract(&text, attachment).await {
                Ok((fields, item_warnings, u)) => {
                    usage = u;
                    warnings = item_warnings;
                    fields
                }
                Err(outcome) => return *outcome,
            },
        };

        // Duplicate check runs before anything is written.
        match store::find_duplicate(&self.pool, &fields).await {
            Ok(Some(existing)) => {
                self.record_usage(&usage, None).await;
                return Outcome::Duplicate {
                    invoice_id: existing.id,
                    vendor_name: existing.vendor_name,
                    invoice_number: existing.invoice_number,
                    total_amount: existing.total_amount,
                };
            }
            Ok(None) => {}
            Err(e) => {
                return Outcome::Failed {
                    error: FailureKind::Persistence(e.to_string()),
                }
            }
        }

        let title = attachment
            .name
            .clone()
            .unwrap_or_else(|| format!("Invoice {}", fields.invoice_number));
        let kind = if attachment.content_type.starts_with("image/") {
            "image"
        } else {
            "text"
        };
        let document_id = Uuid::new_v4().to_string();
        let document =
            match store::save_document(&self.pool, &document_id, &title, kind, &text, "pipeline")
                .await
            {
                Ok(doc) => doc,
                Err(e) => {
                    return Outcome::Failed {
                        error: FailureKind::Persistence(e.to_string()),
                    }
                }
            };
        let invoice_id =
            match store::save_invoice(&self.pool, &fields, Some((&document.0, document.1))).await {
                Ok(id) => id,
                Err(e) => {
                    return Outcome::Failed {
                        error: FailureKind::Persistence(e.to_string()),
                    }
                }
            };

        self.record_usage(&usage, Some(&invoice_id)).await;
        Outcome::Saved {
            invoice_id,
            document_id,
            warnings,
        }
    }

    /// Structured path. Any failure (transport, missing entities, arithmetic
    /// inconsistency) returns `None` and the caller falls back to the model.
    async fn structured_extract(&self, attachment: &Attachment) -> Option<InvoiceFields> {
        let docai = self.services.docai.as_ref()?;
        let processed = match docai
            .process(&attachment.bytes, &attachment.content_type)
            .await
        {
            Ok(processed) => processed,
            Err(e) => {
                tracing::warn!(error = %e, "structured processor call failed, using model fallback");
                return None;
            }
        };
        let fields = match extract_fields(&processed, &self.default_currency) {
            Ok(fields) => fields,
            Err(e) => {
                tracing::warn!(error = %e, "structured extraction incomplete, using model fallback");
                return None;
            }
        };
        let issues = validate_fields(&fields);
        if !issues.is_empty() {
            for issue in &issues {
                tracing::warn!(issue = %issue, "structured extraction failed validation");
            }
            return None;
        }
        Some(fields)
    }

    /// Model fallback: combined classify + extract over the document text.
    /// Validation issues on this path are soft warnings.
    async fn model_extract(
        &self,
        text: &str,
        attachment: &Attachment,
    ) -> Result<(InvoiceFields, Vec<String>, TokenUsage), Box<Outcome>> {
        let prompt = build_extraction_prompt(text);
        let key = ledger::cache_key(
            &prompt,
            &[(attachment.id.clone(), attachment.content_type.clone())],
        );
        let cache_hit = match ledger::get_cached(&self.pool, &self.pricing, &key).await {
            Ok(Some(entry)) => {
                tracing::debug!(uses = entry.use_count, "prompt cache hit");
                true
            }
            Ok(None) => false,
            Err(e) => {
                tracing::warn!(error = %e, "prompt cache lookup failed");
                false
            }
        };

        let completion = match self
            .services
            .model
            .complete(EXTRACTION_SYSTEM_PROMPT, &prompt)
            .await
        {
            Ok(completion) => completion,
            Err(e) => {
                return Err(Box::new(Outcome::Failed {
                    error: FailureKind::Model(e.to_string()),
                }))
            }
        };

        if !cache_hit {
            let token_count = if completion.usage.prompt_tokens > 0 {
                completion.usage.prompt_tokens
            } else {
                ledger::estimate_tokens(&prompt)
            };
            if let Err(e) = ledger::cache_prompt(&self.pool, &prompt, &key, token_count).await {
                tracing::warn!(error = %e, "failed to cache prompt");
            }
        }

        let candidate = match parse_response(&completion.text, &self.default_currency) {
            Ok(candidate) => candidate,
            Err(e) => {
                tracing::error!(error = %e, raw = %completion.text, "extraction response violated the protocol");
                return Err(Box::new(Outcome::Failed {
                    error: FailureKind::ProtocolViolation,
                }));
            }
        };
        if !candidate.is_invoice {
            self.record_usage(&completion.usage, None).await;
            return Err(Box::new(Outcome::NotAnInvoice {
                reason: candidate.rejection_reason,
            }));
        }
        let Some(fields) = candidate.fields else {
            return Err(Box::new(Outcome::Failed {
                error: FailureKind::ProtocolViolation,
            }));
        };

        let warnings = validate_fields(&fields)
            .iter()
            .map(ToString::to_string)
            .collect();
        Ok((fields, warnings, completion.usage))
    }

    /// Ledger write; failures are logged, never propagated. Zero-token
    /// records are still written when invoice-linked so the processed-invoice
    /// counter advances for structured-path saves.
    async fn record_usage(&self, usage: &TokenUsage, invoice_id: Option<&str>) {
        if invoice_id.is_none() && usage.total_tokens == 0 && usage.prompt_tokens == 0 {
            return;
        }
        if let Err(e) = ledger::track_usage(&self.pool, &self.pricing, usage, invoice_id).await {
            tracing::warn!(error = %e, "failed to record token usage");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::docai::{Entity, ProcessedDocument};
    use crate::llm::Completion;
    use crate::migrate::create_schema;
    use crate::ocr::MockOcr;
    use anyhow::Result;
    use async_trait::async_trait;

    struct ScriptedModel {
        reply: String,
    }

    #[async_trait]
    impl ChatModel for ScriptedModel {
        async fn complete(&self, _system: &str, _user: &str) -> Result<Completion> {
            Ok(Completion {
                text: self.reply.clone(),
                usage: TokenUsage {
                    prompt_tokens: 200,
                    completion_tokens: 80,
                    total_tokens: 280,
                },
            })
        }
    }

    struct ScriptedDocAi {
        entities: Vec<Entity>,
    }

    #[async_trait]
    impl DocumentIntelligence for ScriptedDocAi {
        async fn process(&self, _bytes: &[u8], _mime: &str) -> Result<ProcessedDocument> {
            Ok(ProcessedDocument {
                text: "processed".to_string(),
                entities: self.entities.clone(),
            })
        }
    }

    fn entity(kind: &str, text: &str) -> Entity {
        Entity {
            kind: kind.to_string(),
            mention_text: text.to_string(),
            confidence: 0.9,
            properties: Vec::new(),
        }
    }

    fn attachment() -> Attachment {
        Attachment {
            id: "att-1".to_string(),
            content_type: "image/png".to_string(),
            bytes: vec![0xFF, 0xD8, 0xFF, 0xD9],
            name: Some("scan.png".to_string()),
        }
    }

    async fn pipeline(services: Services) -> Pipeline {
        let pool = db::connect_memory().await.unwrap();
        create_schema(&pool).await.unwrap();
        Pipeline::new(pool, services, PricingConfig::default(), "USD".to_string())
    }

    const MODEL_INVOICE: &str = "true:\n\
        vendor:Acme Co\n\
        customer:Globex\n\
        invoice_number:INV-100\n\
        currency:USD\n\
        total_amount:10.00\n\
        ---line items start---\n\
        description:Widget\n\
        quantity:2\n\
        unit_price:5.00\n\
        total:10.00\n\
        ---line items end---";

    #[tokio::test]
    async fn model_path_saves_a_clean_invoice() {
        let p = pipeline(Services {
            ocr: Arc::new(MockOcr::with_text("ACME invoice INV-100 total 10.00")),
            docai: None,
            model: Arc::new(ScriptedModel {
                reply: MODEL_INVOICE.to_string(),
            }),
        })
        .await;

        let results = p.process_all(&[attachment()], "please process this invoice").await;
        assert_eq!(results.len(), 1);
        let Outcome::Saved {
            document_id,
            warnings,
            ..
        } = &results[0].outcome
        else {
            panic!("expected Saved, got {:?}", results[0].outcome);
        };
        assert!(warnings.is_empty());

        // Image uploads are stored as image documents.
        let doc = store::get_document(p.pool(), document_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(doc.kind, "image");
    }

    #[tokio::test]
    async fn second_identical_upload_is_a_duplicate() {
        let p = pipeline(Services {
            ocr: Arc::new(MockOcr::with_text("ACME invoice INV-100 total 10.00")),
            docai: None,
            model: Arc::new(ScriptedModel {
                reply: MODEL_INVOICE.to_string(),
            }),
        })
        .await;

        let first = p.process_all(&[attachment()], "invoice").await;
        assert!(matches!(first[0].outcome, Outcome::Saved { .. }));
        let second = p.process_all(&[attachment()], "invoice").await;
        let Outcome::Duplicate { total_amount, .. } = &second[0].outcome else {
            panic!("expected Duplicate, got {:?}", second[0].outcome);
        };
        assert_eq!(*total_amount, 1000);
    }

    #[tokio::test]
    async fn verifier_rejection_is_not_an_invoice() {
        let p = pipeline(Services {
            ocr: Arc::new(MockOcr::with_text("weekly grocery list: milk, eggs, bread")),
            docai: None,
            model: Arc::new(ScriptedModel {
                reply: "false".to_string(),
            }),
        })
        .await;

        // No intent keywords, so the strict verifier decides.
        let results = p.process_all(&[attachment()], "what do you make of this?").await;
        assert!(matches!(
            results[0].outcome,
            Outcome::NotAnInvoice { reason: None }
        ));
    }

    #[tokio::test]
    async fn structured_mismatch_falls_back_to_the_model() {
        // Structured result sums to 12.00 against a stated 15.00 total.
        let p = pipeline(Services {
            ocr: Arc::new(MockOcr::with_text("ACME invoice INV-100")),
            docai: Some(Arc::new(ScriptedDocAi {
                entities: vec![
                    entity("vendor-name", "Acme Co"),
                    entity("invoice-number", "INV-100"),
                    entity("total-amount", "15.00"),
                    entity("line-items", "item"),
                    entity("line-items/description", "Widget"),
                    entity("line-items/quantity", "2"),
                    entity("line-items/unit-price", "6.00"),
                    entity("line-items/amount", "12.00"),
                ],
            })),
            model: Arc::new(ScriptedModel {
                reply: MODEL_INVOICE.to_string(),
            }),
        })
        .await;

        let results = p.process_all(&[attachment()], "invoice").await;
        let Outcome::Saved { invoice_id, .. } = &results[0].outcome else {
            panic!("expected Saved via fallback, got {:?}", results[0].outcome);
        };
        // The saved values come from the model, not the inconsistent
        // structured result.
        let (invoice, _) = store::get_invoice(p.pool(), invoice_id).await.unwrap().unwrap();
        assert_eq!(invoice.total_amount, 1000);
    }

    #[tokio::test]
    async fn protocol_violation_is_a_failure_not_a_rejection() {
        let p = pipeline(Services {
            ocr: Arc::new(MockOcr::with_text("ACME invoice INV-100")),
            docai: None,
            model: Arc::new(ScriptedModel {
                reply: "Sure! The vendor appears to be Acme.".to_string(),
            }),
        })
        .await;

        let results = p.process_all(&[attachment()], "invoice").await;
        assert!(matches!(
            results[0].outcome,
            Outcome::Failed {
                error: FailureKind::ProtocolViolation
            }
        ));
    }

    #[tokio::test]
    async fn unreadable_attachment_does_not_abort_siblings() {
        let p = pipeline(Services {
            ocr: Arc::new(MockOcr::with_text("ACME invoice INV-100 total 10.00")),
            docai: None,
            model: Arc::new(ScriptedModel {
                reply: MODEL_INVOICE.to_string(),
            }),
        })
        .await;

        let broken = Attachment {
            id: "att-2".to_string(),
            content_type: "application/zip".to_string(),
            bytes: vec![0x50, 0x4B],
            name: None,
        };
        let results = p.process_all(&[broken, attachment()], "invoice").await;
        assert!(matches!(
            results[0].outcome,
            Outcome::Failed {
                error: FailureKind::Extraction(_)
            }
        ));
        assert!(matches!(results[1].outcome, Outcome::Saved { .. }));
    }
}

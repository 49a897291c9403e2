//! Invoice intent and identity checks.
//!
//! Two gates run before any expensive extraction: a keyword check on the
//! user's chat message, and a strict model verdict restricted to a single
//! `true`/`false` answer. Anything the model emits beyond those two words is
//! treated as a non-match — the verifier fails closed.

use anyhow::Result;

use crate::llm::ChatModel;
use crate::models::TokenUsage;

/// Phrases in the user message that signal an invoice-processing request.
const INVOICE_INTENT_KEYWORDS: &[&str] = &[
    "invoice",
    "bill",
    "receipt",
    "process this",
    "extract this",
    "extract the",
];

const VERIFICATION_SYSTEM_PROMPT: &str = "\
You are an expert at identifying business invoices in any language. Analyze \
the provided document and user message.

A business invoice, regardless of language, should have these universal elements:
- Business information (seller and buyer details)
- Line items with associated pricing
- Payment information and dates
- A unique invoice identifier/number
- Itemized costs and total amount

The document should follow a clear invoice structure, even if the text is not \
in English. Focus on the document's structure and numerical patterns rather \
than specific keywords.

CRITICAL: You must respond with ONLY one of these two words:
\"true\" - if this is a business invoice AND the user wants to process it
\"false\" - for any other case

Do not add any other text.
Do not add punctuation or spaces.
ONLY respond with \"true\" or \"false\".";

/// Cheap gate: does the user's message ask for invoice processing?
pub fn has_invoice_intent(message: &str) -> bool {
    let lower = message.to_lowercase();
    INVOICE_INTENT_KEYWORDS.iter().any(|kw| lower.contains(kw))
}

/// Strict model verdict on (document text, user message).
///
/// Returns the verdict plus the usage of the underlying call so the caller
/// can record it. Any output other than exactly `true` is a negative verdict.
pub async fn verify_invoice(
    model: &dyn ChatModel,
    text: &str,
    user_message: &str,
) -> Result<(bool, TokenUsage)> {
    if text.len() < 10 {
        return Ok((false, TokenUsage::default()));
    }

    let user_prompt = format!(
        "User message: {}\n\nDocument content:\n{}",
        user_message, text
    );
    let completion = model
        .complete(VERIFICATION_SYSTEM_PROMPT, &user_prompt)
        .await?;

    let verdict = matches!(completion.text.trim().to_lowercase().as_str(), "true");
    Ok((verdict, completion.usage))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::Completion;
    use async_trait::async_trait;

    struct FixedModel(&'static str);

    #[async_trait]
    impl ChatModel for FixedModel {
        async fn complete(&self, _system: &str, _user: &str) -> Result<Completion> {
            Ok(Completion {
                text: self.0.to_string(),
                usage: TokenUsage {
                    prompt_tokens: 50,
                    completion_tokens: 1,
                    total_tokens: 51,
                },
            })
        }
    }

    #[test]
    fn intent_keywords_are_case_insensitive() {
        assert!(has_invoice_intent("Please process this Invoice"));
        assert!(has_invoice_intent("here is my BILL"));
        assert!(!has_invoice_intent("what's the weather like?"));
    }

    #[tokio::test]
    async fn exact_true_is_positive() {
        let (verdict, usage) = verify_invoice(&FixedModel("true"), &"x".repeat(20), "go")
            .await
            .unwrap();
        assert!(verdict);
        assert_eq!(usage.total_tokens, 51);
    }

    #[tokio::test]
    async fn surrounding_whitespace_and_case_are_tolerated() {
        let (verdict, _) = verify_invoice(&FixedModel(" True \n"), &"x".repeat(20), "go")
            .await
            .unwrap();
        assert!(verdict);
    }

    #[tokio::test]
    async fn any_other_output_fails_closed() {
        for reply in ["Successful", "true.", "yes", "true: it is an invoice", ""] {
            let model = FixedModel(Box::leak(reply.to_string().into_boxed_str()));
            let (verdict, _) = verify_invoice(&model, &"x".repeat(20), "go").await.unwrap();
            assert!(!verdict, "reply {:?} must fail closed", reply);
        }
    }

    #[tokio::test]
    async fn short_documents_are_rejected_without_a_call() {
        let (verdict, usage) = verify_invoice(&FixedModel("true"), "tiny", "go")
            .await
            .unwrap();
        assert!(!verdict);
        assert_eq!(usage.total_tokens, 0);
    }
}

//! Text extraction for uploaded attachments (PDF, images).
//!
//! Extraction is pipeline-layer: the caller supplies bytes + content-type;
//! this module returns normalized plain UTF-8 text. Text-native PDFs use the
//! PDF text layer directly; scanned PDFs fall back to OCR via an embedded
//! image when one can be located, or the raw PDF bytes as a last resort.

use crate::ocr::OcrEngine;

/// Supported MIME type for PDF attachments; anything `image/*` routes to OCR.
pub const MIME_PDF: &str = "application/pdf";

/// Extraction error. Distinguishes an unreadable file from a readable file
/// with no recognizable text, so the user-facing message can say which.
#[derive(Debug)]
pub enum ExtractError {
    UnsupportedContentType(String),
    /// The file could not be parsed at all (corrupted or encrypted).
    Corrupted(String),
    /// Parsing succeeded but no readable text was found, even via OCR.
    NoText,
    /// The OCR service itself failed (transport, timeout, non-2xx).
    Ocr(String),
}

impl std::fmt::Display for ExtractError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExtractError::UnsupportedContentType(ct) => {
                write!(f, "unsupported content-type: {}", ct)
            }
            ExtractError::Corrupted(e) => {
                write!(f, "document is corrupted or encrypted: {}", e)
            }
            ExtractError::NoText => write!(f, "no readable text found in document"),
            ExtractError::Ocr(e) => write!(f, "OCR failed: {}", e),
        }
    }
}

impl std::error::Error for ExtractError {}

/// Extract normalized plain text from an attachment.
pub async fn extract_text(
    bytes: &[u8],
    content_type: &str,
    ocr: &dyn OcrEngine,
) -> Result<String, ExtractError> {
    if content_type == MIME_PDF {
        extract_pdf(bytes, ocr).await
    } else if content_type.starts_with("image/") {
        recognize_normalized(bytes, ocr).await
    } else {
        Err(ExtractError::UnsupportedContentType(
            content_type.to_string(),
        ))
    }
}

async fn extract_pdf(bytes: &[u8], ocr: &dyn OcrEngine) -> Result<String, ExtractError> {
    let text = pdf_extract::extract_text_from_mem(bytes)
        .map_err(|e| ExtractError::Corrupted(e.to_string()))?;
    let normalized = normalize_text(&text);
    if !normalized.is_empty() {
        return Ok(normalized);
    }

    // Scanned PDF: no text layer. Prefer OCR on an embedded page image; if
    // none can be located, hand the raw PDF to the OCR service.
    if let Some(image) = find_embedded_jpeg(bytes) {
        recognize_normalized(image, ocr).await
    } else {
        recognize_normalized(bytes, ocr).await
    }
}

async fn recognize_normalized(bytes: &[u8], ocr: &dyn OcrEngine) -> Result<String, ExtractError> {
    let text = ocr
        .recognize(bytes)
        .await
        .map_err(|e| ExtractError::Ocr(e.to_string()))?;
    let normalized = normalize_text(&text);
    if normalized.is_empty() {
        Err(ExtractError::NoText)
    } else {
        Ok(normalized)
    }
}

/// Locate the first embedded JPEG stream in a PDF (DCTDecode filter).
///
/// Scanned single-page invoices are typically one full-page JPEG; rasterizing
/// via the stream bytes avoids rendering the page. Returns the slice between
/// `stream` and `endstream` of the first DCTDecode object, if any.
pub fn find_embedded_jpeg(pdf: &[u8]) -> Option<&[u8]> {
    let marker = b"/DCTDecode";
    let at = find_subslice(pdf, marker, 0)?;
    let stream_kw = find_subslice(pdf, b"stream", at)?;
    // Skip the keyword and the EOL that follows it (CRLF or LF).
    let mut start = stream_kw + b"stream".len();
    if pdf.get(start) == Some(&b'\r') {
        start += 1;
    }
    if pdf.get(start) == Some(&b'\n') {
        start += 1;
    }
    let end = find_subslice(pdf, b"endstream", start)?;
    let data = &pdf[start..end];
    // JPEG data starts with the SOI marker.
    if data.len() > 2 && data[0] == 0xFF && data[1] == 0xD8 {
        Some(data)
    } else {
        None
    }
}

fn find_subslice(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if from >= haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| p + from)
}

/// Normalize extracted text: CRLF → LF, 3+ newlines collapsed to 2, runs of
/// horizontal whitespace collapsed to one space, trimmed.
pub fn normalize_text(text: &str) -> String {
    let unified = text.replace("\r\n", "\n").replace('\r', "\n");

    let mut out = String::with_capacity(unified.len());
    let mut newlines = 0usize;
    let mut pending_space = false;
    for ch in unified.chars() {
        match ch {
            '\n' => {
                pending_space = false;
                newlines += 1;
                if newlines <= 2 {
                    out.push('\n');
                }
            }
            c if c.is_whitespace() => {
                pending_space = true;
            }
            c => {
                if pending_space && !out.is_empty() && !out.ends_with('\n') {
                    out.push(' ');
                }
                pending_space = false;
                newlines = 0;
                out.push(c);
            }
        }
    }
    out.trim().to_string()
}

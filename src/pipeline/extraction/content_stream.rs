use std::path::Path;

use lopdf::Document;

use super::sanitize::sanitize_extracted_text;
use super::{detect_format, read_document, read_plain_text, SourceFormat};
use crate::pipeline::collaborator::{CollaboratorError, TextExtractor};

/// Secondary extractor: per-page text operators read straight from the
/// content streams with lopdf. No layout reconstruction, so spacing and line
/// breaks may differ from [`super::PdfTextExtractor`].
pub struct ContentStreamExtractor;

impl ContentStreamExtractor {
    pub fn extract_bytes(&self, path: &Path, bytes: Vec<u8>) -> Result<String, CollaboratorError> {
        let raw = match detect_format(path, &bytes) {
            SourceFormat::Pdf => extract_pages(&bytes)?,
            SourceFormat::PlainText => read_plain_text(bytes)?,
        };
        Ok(sanitize_extracted_text(&raw))
    }
}

fn extract_pages(bytes: &[u8]) -> Result<String, CollaboratorError> {
    let doc = Document::load_mem(bytes)
        .map_err(|e| CollaboratorError::Extraction(format!("PDF parsing failed: {e}")))?;

    let mut pages = Vec::new();
    for page_number in doc.get_pages().keys() {
        match doc.extract_text(&[*page_number]) {
            Ok(text) => pages.push(text),
            Err(e) => {
                tracing::warn!(page = page_number, error = %e, "Skipping unreadable page");
            }
        }
    }

    if pages.is_empty() {
        return Err(CollaboratorError::Extraction("no readable pages".into()));
    }
    Ok(pages.join("\n"))
}

impl TextExtractor for ContentStreamExtractor {
    fn extract(&self, document_path: &Path, document_name: &str) -> Result<String, CollaboratorError> {
        tracing::debug!(document = document_name, "ContentStreamExtractor: reading content streams");
        let bytes = read_document(document_path)?;
        self.extract_bytes(document_path, bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::extraction::make_test_pdf;

    #[test]
    fn extracts_text_operators() {
        let text = ContentStreamExtractor
            .extract_bytes(Path::new("inv.pdf"), make_test_pdf("INV-100 50.00"))
            .unwrap();
        assert!(text.contains("INV-100"), "got: {text}");
    }

    #[test]
    fn invalid_pdf_returns_error() {
        let result = ContentStreamExtractor.extract_bytes(Path::new("x.pdf"), b"not a pdf".to_vec());
        assert!(matches!(result, Err(CollaboratorError::Extraction(_))));
    }

    #[test]
    fn plain_text_matches_primary_extractor() {
        let bytes = b"INV-100\n  $50.00  ".to_vec();
        let secondary = ContentStreamExtractor
            .extract_bytes(Path::new("a.txt"), bytes.clone())
            .unwrap();
        let primary = crate::pipeline::extraction::PdfTextExtractor
            .extract_bytes(Path::new("a.txt"), bytes)
            .unwrap();
        assert_eq!(primary, secondary);
    }
}

use std::path::Path;

use super::sanitize::sanitize_extracted_text;
use super::{detect_format, read_document, read_plain_text, SourceFormat};
use crate::pipeline::collaborator::{CollaboratorError, TextExtractor};

/// Primary extractor: digital PDF text layer via the pdf-extract crate.
pub struct PdfTextExtractor;

impl PdfTextExtractor {
    pub fn extract_bytes(&self, path: &Path, bytes: Vec<u8>) -> Result<String, CollaboratorError> {
        let raw = match detect_format(path, &bytes) {
            SourceFormat::Pdf => pdf_extract::extract_text_from_mem(&bytes)
                .map_err(|e| CollaboratorError::Extraction(format!("PDF parsing failed: {e}")))?,
            SourceFormat::PlainText => read_plain_text(bytes)?,
        };
        Ok(sanitize_extracted_text(&raw))
    }
}

impl TextExtractor for PdfTextExtractor {
    fn extract(&self, document_path: &Path, document_name: &str) -> Result<String, CollaboratorError> {
        tracing::debug!(document = document_name, "PdfTextExtractor: reading text layer");
        let bytes = read_document(document_path)?;
        let text = self.extract_bytes(document_path, bytes)?;
        if text.is_empty() {
            tracing::warn!(document = document_name, "PdfTextExtractor: no text layer found");
        }
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::extraction::make_test_pdf;

    #[test]
    fn extract_text_from_digital_pdf() {
        let text = PdfTextExtractor
            .extract_bytes(Path::new("inv.pdf"), make_test_pdf("Invoice INV-100 total 50.00"))
            .unwrap();
        assert!(
            text.contains("INV-100") || text.contains("Invoice"),
            "Expected invoice text, got: {text}"
        );
    }

    #[test]
    fn invalid_pdf_returns_error() {
        let result = PdfTextExtractor.extract_bytes(Path::new("broken.pdf"), b"%PDF-garbage".to_vec());
        assert!(matches!(result, Err(CollaboratorError::Extraction(_))));
    }

    #[test]
    fn plain_text_is_sanitized() {
        let text = PdfTextExtractor
            .extract_bytes(Path::new("inv.txt"), b"  INV-100 $50.00\x00  \n\n".to_vec())
            .unwrap();
        assert_eq!(text, "INV-100 $50.00");
    }

    #[test]
    fn extract_reads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("inv.txt");
        std::fs::write(&path, "INV-7 $12.00").unwrap();
        assert_eq!(PdfTextExtractor.extract(&path, "inv.txt").unwrap(), "INV-7 $12.00");
    }
}

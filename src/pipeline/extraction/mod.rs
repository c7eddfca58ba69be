//! Reference extraction collaborators.
//!
//! Two independent implementations so the comparison stage has something to
//! disagree about: [`PdfTextExtractor`] uses pdf-extract's layout pass,
//! [`ContentStreamExtractor`] walks page content streams through lopdf.
//! Non-PDF inputs are read as UTF-8 by both.

pub mod content_stream;
pub mod pdf;
pub mod sanitize;

pub use content_stream::ContentStreamExtractor;
pub use pdf::PdfTextExtractor;
pub use sanitize::sanitize_extracted_text;

use std::path::Path;

use super::collaborator::CollaboratorError;

/// How a document's bytes should be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Pdf,
    PlainText,
}

/// Magic bytes first, extension second.
pub fn detect_format(path: &Path, bytes: &[u8]) -> SourceFormat {
    if bytes.starts_with(b"%PDF") {
        return SourceFormat::Pdf;
    }
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("pdf") => SourceFormat::Pdf,
        _ => SourceFormat::PlainText,
    }
}

pub(crate) fn read_document(path: &Path) -> Result<Vec<u8>, CollaboratorError> {
    std::fs::read(path).map_err(|e| {
        CollaboratorError::Extraction(format!("cannot read {}: {e}", path.display()))
    })
}

pub(crate) fn read_plain_text(bytes: Vec<u8>) -> Result<String, CollaboratorError> {
    String::from_utf8(bytes)
        .map_err(|e| CollaboratorError::Extraction(format!("text encoding error: {e}")))
}

/// Single-page PDF with one text run, built with lopdf.
#[cfg(test)]
pub(crate) fn make_test_pdf(text: &str) -> Vec<u8> {
    use lopdf::dictionary;
    use lopdf::{Document, Object, Stream};

    let mut doc = Document::with_version("1.4");

    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });

    let content = format!("BT /F1 12 Tf 100 700 Td ({text}) Tj ET");
    let content_id = doc.add_object(Stream::new(dictionary! {}, content.into_bytes()));

    let resources = dictionary! {
        "Font" => dictionary! {
            "F1" => font_id,
        },
    };

    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
        "Contents" => content_id,
        "Resources" => resources,
    });

    let pages_id = doc.add_object(dictionary! {
        "Type" => "Pages",
        "Kids" => vec![page_id.into()],
        "Count" => 1,
    });

    if let Ok(Object::Dictionary(dict)) = doc.get_object_mut(page_id) {
        dict.set("Parent", pages_id);
    }

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut buf = Vec::new();
    doc.save_to(&mut buf).unwrap();
    buf
}

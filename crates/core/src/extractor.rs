use crate::error::IngestError;
use lopdf::{Document, ObjectId};
use std::path::Path;

#[derive(Debug, Clone, PartialEq)]
pub struct PageText {
    pub number: u32,
    pub text: String,
}

pub trait PdfExtractor: Send + Sync {
    fn extract_text(&self, path: &Path) -> Result<String, IngestError>;

    fn extract_bytes(&self, filename: &str, bytes: &[u8]) -> Result<String, IngestError>;
}

/// Direct text extraction with lopdf. Pages without text but with images get a
/// placeholder instead of OCR.
#[derive(Debug, Default, Clone, Copy)]
pub struct LopdfExtractor;

impl PdfExtractor for LopdfExtractor {
    fn extract_text(&self, path: &Path) -> Result<String, IngestError> {
        let filename = file_name(path)?;
        let document = Document::load(path).map_err(|error| {
            IngestError::PdfParse(format!("failed to open {}: {error}", path.display()))
        })?;
        Ok(assemble_document_text(&collect_pages(&document), &filename))
    }

    fn extract_bytes(&self, filename: &str, bytes: &[u8]) -> Result<String, IngestError> {
        let document = Document::load_mem(bytes)
            .map_err(|error| IngestError::PdfParse(format!("failed to open {filename}: {error}")))?;
        Ok(assemble_document_text(&collect_pages(&document), filename))
    }
}

pub fn extract_page_texts(path: &Path) -> Result<Vec<PageText>, IngestError> {
    let document = Document::load(path).map_err(|error| {
        IngestError::PdfParse(format!("failed to open {}: {error}", path.display()))
    })?;
    Ok(collect_pages(&document))
}

pub(crate) fn file_name(path: &Path) -> Result<String, IngestError> {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .ok_or_else(|| IngestError::MissingFileName(path.display().to_string()))
}

fn collect_pages(document: &Document) -> Vec<PageText> {
    let pages = document.get_pages();
    tracing::debug!(page_count = pages.len(), "extracting pdf pages");

    pages
        .into_iter()
        .map(|(number, page_id)| PageText {
            number,
            text: page_text(document, number, page_id),
        })
        .collect()
}

fn page_text(document: &Document, number: u32, page_id: ObjectId) -> String {
    resolve_page_text(number, document.extract_text(&[number]), || {
        document.get_page_images(page_id).map(|images| images.len())
    })
}

/// A failed text extraction counts as an empty page. Empty pages that carry
/// images become a placeholder.
fn resolve_page_text(
    number: u32,
    extracted: Result<String, lopdf::Error>,
    image_count: impl FnOnce() -> Result<usize, lopdf::Error>,
) -> String {
    let text = match extracted {
        Ok(text) => text,
        Err(error) => {
            tracing::warn!(page = number, %error, "page text extraction failed");
            String::new()
        }
    };

    if !text.trim().is_empty() {
        tracing::debug!(page = number, characters = text.chars().count(), "extracted page");
        return text;
    }

    match image_count() {
        Ok(images) if images > 0 => {
            tracing::info!(page = number, images, "page has no text layer, text may be in image form");
            format!("[Image-based content on page {number}]")
        }
        Ok(_) => text,
        Err(error) => {
            tracing::warn!(page = number, %error, "failed to inspect page images");
            text
        }
    }
}

/// Concatenates pages in order, or names the file when nothing was readable.
pub fn assemble_document_text(pages: &[PageText], filename: &str) -> String {
    let text = pages
        .iter()
        .map(|page| page.text.as_str())
        .collect::<Vec<_>>()
        .join("\n");

    if text.trim().is_empty() {
        tracing::warn!(filename, "no text extracted, document may be scanned or image-based");
        return format!(
            "[This document appears to be image-based or contains no extractable text: {filename}]"
        );
    }

    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::{dictionary, Object, Stream};

    fn blank_pdf(page_count: usize) -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let kids = (0..page_count)
            .map(|_| {
                let content_id = doc.add_object(Stream::new(dictionary! {}, Vec::new()));
                let page_id = doc.add_object(dictionary! {
                    "Type" => "Page",
                    "Parent" => pages_id,
                    "Contents" => content_id,
                });
                Object::from(page_id)
            })
            .collect::<Vec<_>>();
        let pages = dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => page_count as i64,
            "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
        };
        doc.objects.insert(pages_id, Object::Dictionary(pages));
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut bytes = Vec::new();
        doc.save_to(&mut bytes).expect("in-memory pdf should serialize");
        bytes
    }

    fn image_only_pdf() -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let image_id = doc.add_object(Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => 1,
                "Height" => 1,
                "ColorSpace" => "DeviceGray",
                "BitsPerComponent" => 8,
            },
            vec![0u8],
        ));
        let content_id = doc.add_object(Stream::new(dictionary! {}, Vec::new()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "Resources" => dictionary! {
                "XObject" => dictionary! { "Im1" => image_id },
            },
        });
        let pages = dictionary! {
            "Type" => "Pages",
            "Kids" => vec![Object::from(page_id)],
            "Count" => 1,
            "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
        };
        doc.objects.insert(pages_id, Object::Dictionary(pages));
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut bytes = Vec::new();
        doc.save_to(&mut bytes).expect("in-memory pdf should serialize");
        bytes
    }

    fn corrupt_stream() -> lopdf::Error {
        lopdf::Error::from(std::io::Error::other("corrupt content stream"))
    }

    #[test]
    fn image_only_page_gets_page_placeholder() {
        let text = LopdfExtractor
            .extract_bytes("scan.pdf", &image_only_pdf())
            .expect("image pdf should open");
        assert_eq!(text, "[Image-based content on page 1]");
    }

    #[test]
    fn failed_page_is_empty_and_other_pages_survive() {
        let pages = vec![
            PageText {
                number: 1,
                text: resolve_page_text(1, Ok("Intro.".to_string()), || Ok(0)),
            },
            PageText {
                number: 2,
                text: resolve_page_text(2, Err(corrupt_stream()), || Ok(0)),
            },
            PageText {
                number: 3,
                text: resolve_page_text(3, Err(corrupt_stream()), || Ok(2)),
            },
        ];

        assert_eq!(pages[1].text, "");
        assert_eq!(pages[2].text, "[Image-based content on page 3]");
        assert_eq!(
            assemble_document_text(&pages, "manual.pdf"),
            "Intro.\n\n[Image-based content on page 3]"
        );
    }

    #[test]
    fn image_lookup_failure_keeps_empty_text() {
        let text = resolve_page_text(4, Ok("  ".to_string()), || Err(corrupt_stream()));
        assert_eq!(text, "  ");
    }

    #[test]
    fn pages_are_joined_in_order() {
        let pages = vec![
            PageText {
                number: 1,
                text: "First page.".to_string(),
            },
            PageText {
                number: 2,
                text: "[Image-based content on page 2]".to_string(),
            },
        ];

        let text = assemble_document_text(&pages, "manual.pdf");
        assert_eq!(text, "First page.\n[Image-based content on page 2]");
    }

    #[test]
    fn empty_document_gets_named_placeholder() {
        let pages = vec![PageText {
            number: 1,
            text: "  \n".to_string(),
        }];

        let text = assemble_document_text(&pages, "scan.pdf");
        assert_eq!(
            text,
            "[This document appears to be image-based or contains no extractable text: scan.pdf]"
        );
    }

    #[test]
    fn blank_pdf_resolves_to_placeholder_instead_of_failing() {
        let bytes = blank_pdf(2);
        let text = LopdfExtractor
            .extract_bytes("blank.pdf", &bytes)
            .expect("blank pdf should open");
        assert!(text.contains("blank.pdf"));
    }

    #[test]
    fn unreadable_bytes_are_a_parse_error() {
        let result = LopdfExtractor.extract_bytes("broken.pdf", b"%PDF-1.4\n%broken");
        assert!(matches!(result, Err(IngestError::PdfParse(_))));
    }

    #[test]
    fn missing_file_fails_to_open() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let result = LopdfExtractor.extract_text(&dir.path().join("absent.pdf"));
        assert!(matches!(result, Err(IngestError::PdfParse(_))));
        Ok(())
    }
}

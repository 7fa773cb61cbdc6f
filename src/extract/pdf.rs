#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

use std::path::Path;

use lopdf::Document;

use crate::error::ExtractionError;

/// Reads the text layer of the PDF at `path`.
///
/// Pages are visited in page-number order and joined with a newline. Trailing
/// whitespace of the result is trimmed.
pub fn extract_pdf_text(path: &Path) -> Result<String, ExtractionError> {
    let decode_error = |message: String| ExtractionError::Decode {
        path: path.to_path_buf(),
        message,
    };

    let document = Document::load(path).map_err(|err| decode_error(err.to_string()))?;

    let mut pages = Vec::new();
    for page_number in document.get_pages().keys() {
        let text = document
            .extract_text(&[*page_number])
            .map_err(|err| decode_error(format!("page {page_number}: {err}")))?;
        pages.push(text);
    }

    Ok(pages.join("\n").trim_end().to_string())
}

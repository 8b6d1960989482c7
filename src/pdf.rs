//! Extracción de texto de un PDF página a página.
//!
//! Se intenta primero con `pdf-extract` (mejor manejo de codificaciones de
//! fuentes). Si falla para el documento completo, se recurre a `lopdf`
//! extrayendo cada página por separado: una página que falla se omite sin
//! abortar la ingesta. Las páginas sin texto (tras `trim`) nunca se emiten;
//! no hay OCR.

use std::fs;
use std::panic;
use std::path::Path;

use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::models::Page;

/// Lee un PDF desde disco y devuelve sus páginas con texto, en orden físico.
pub fn extract_pages(path: &Path) -> Result<Vec<Page>> {
    let bytes = fs::read(path)
        .map_err(|e| Error::DocumentRead(format!("{}: {e}", path.display())))?;
    extract_pages_from_bytes(&bytes)
}

/// Igual que `extract_pages` pero a partir del contenido en memoria.
pub fn extract_pages_from_bytes(bytes: &[u8]) -> Result<Vec<Page>> {
    let raw_pages = match extract_with_pdf_extract(bytes) {
        Ok(pages) => pages.into_iter().map(Some).collect(),
        Err(reason) => {
            warn!("pdf-extract no pudo procesar el documento ({reason}); usando lopdf página a página.");
            extract_with_lopdf(bytes)?
        }
    };

    let pages = collect_pages(raw_pages);
    debug!("{} páginas con texto extraíble.", pages.len());
    Ok(pages)
}

/// Numera las páginas (1-based, orden físico) y descarta las vacías o fallidas.
///
/// Cada elemento es el texto de una página física, o `None` si su extracción
/// falló. Los números de página resultantes no son necesariamente contiguos.
pub fn collect_pages<I>(raw_pages: I) -> Vec<Page>
where
    I: IntoIterator<Item = Option<String>>,
{
    raw_pages
        .into_iter()
        .enumerate()
        .filter_map(|(index, text)| {
            let text = text?;
            if text.trim().is_empty() {
                return None;
            }
            Some(Page {
                page_number: index as u32 + 1,
                text,
            })
        })
        .collect()
}

fn extract_with_pdf_extract(bytes: &[u8]) -> std::result::Result<Vec<String>, String> {
    // pdf-extract puede entrar en pánico con PDFs poco habituales.
    match panic::catch_unwind(|| pdf_extract::extract_text_from_mem_by_pages(bytes)) {
        Ok(Ok(pages)) => Ok(pages),
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => Err("pánico interno de pdf-extract".to_string()),
    }
}

fn extract_with_lopdf(bytes: &[u8]) -> Result<Vec<Option<String>>> {
    let doc = lopdf::Document::load_mem(bytes)
        .map_err(|e| Error::DocumentRead(format!("PDF ilegible: {e}")))?;

    let pages = doc
        .get_pages()
        .into_keys()
        .map(|page_number| match doc.extract_text(&[page_number]) {
            Ok(text) => Some(text),
            Err(e) => {
                warn!("No se pudo extraer la página {page_number}: {e}. Se omite.");
                None
            }
        })
        .collect();
    Ok(pages)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_and_failed_pages_are_skipped_but_keep_numbering() {
        let pages = collect_pages(vec![
            Some("Credit Agreement".to_string()),
            Some("   \n\t".to_string()),
            None,
            Some("Borrower: Acme Corp.".to_string()),
        ]);
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].page_number, 1);
        assert_eq!(pages[1].page_number, 4);
        assert_eq!(pages[1].text, "Borrower: Acme Corp.");
    }

    #[test]
    fn garbage_bytes_are_a_document_read_error() {
        let err = extract_pages_from_bytes(b"this is not a pdf").unwrap_err();
        assert!(matches!(err, Error::DocumentRead(_)));
    }

    #[test]
    fn missing_file_is_a_document_read_error() {
        let err = extract_pages(Path::new("/definitely/not/here.pdf")).unwrap_err();
        assert_eq!(err.kind(), "document_read");
    }
}

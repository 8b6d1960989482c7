//! Ingesta de un documento PDF: páginas → filtro de boilerplate → chunks.
//!
//! El resultado (`IngestedDocument`) está listo para entregarse al índice
//! vectorial (`vector_store::VectorStore::build`).

use std::path::Path;

use mime_guess::MimeGuess;
use tracing::{info, warn};

use crate::{
    boilerplate,
    chunker::{self, TextSplitter},
    config::AppConfig,
    error::{Error, Result},
    models::{Chunk, Page},
    pdf,
};

/// Parámetros del pipeline de ingesta.
#[derive(Debug, Clone, Copy)]
pub struct IngestOptions {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub boilerplate_threshold: f64,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
            boilerplate_threshold: boilerplate::DEFAULT_THRESHOLD,
        }
    }
}

impl IngestOptions {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            chunk_size: cfg.chunk_size,
            chunk_overlap: cfg.chunk_overlap,
            boilerplate_threshold: cfg.boilerplate_threshold,
        }
    }

    fn validate(&self) -> Result<TextSplitter> {
        if !(self.boilerplate_threshold > 0.0 && self.boilerplate_threshold <= 1.0) {
            return Err(Error::Config(format!(
                "el umbral de boilerplate debe estar en (0, 1], recibido {}",
                self.boilerplate_threshold
            )));
        }
        TextSplitter::new(self.chunk_size, self.chunk_overlap)
    }
}

/// Resumen de los resultados de una operación de ingesta.
#[derive(Debug, Default, Clone)]
pub struct IngestionSummary {
    pub pages_read: usize,
    pub pages_after_filter: usize,
    pub boilerplate_lines: usize,
    pub chunks_created: usize,
}

/// Implementa cómo se mostrará el resumen como texto.
impl std::fmt::Display for IngestionSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Resumen: {} páginas con texto, {} tras filtrar {} líneas repetidas. {} chunks creados.",
            self.pages_read, self.pages_after_filter, self.boilerplate_lines, self.chunks_created
        )
    }
}

#[derive(Debug, Clone)]
pub struct IngestedDocument {
    pub source: String,
    pub chunks: Vec<Chunk>,
    pub summary: IngestionSummary,
}

/// Ingiere un PDF desde disco. `source` será el nombre del fichero.
pub fn ingest_pdf_path(path: &Path, opts: &IngestOptions) -> Result<IngestedDocument> {
    let is_pdf = MimeGuess::from_path(path)
        .first()
        .map(|mime| mime.essence_str() == "application/pdf")
        .unwrap_or(false);
    if !is_pdf {
        return Err(Error::DocumentRead(format!(
            "sólo se admiten ficheros PDF: {}",
            path.display()
        )));
    }

    let source = path
        .file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string_lossy().to_string());
    let pages = pdf::extract_pages(path)?;
    ingest_pages(pages, &source, opts)
}

/// Ingiere un PDF en memoria (p. ej. recibido por la API).
pub fn ingest_pdf_bytes(bytes: &[u8], source: &str, opts: &IngestOptions) -> Result<IngestedDocument> {
    let pages = pdf::extract_pages_from_bytes(bytes)?;
    ingest_pages(pages, source, opts)
}

/// Filtra y trocea páginas ya extraídas.
pub fn ingest_pages(pages: Vec<Page>, source: &str, opts: &IngestOptions) -> Result<IngestedDocument> {
    let splitter = opts.validate()?;
    let pages_read = pages.len();

    let filtered = boilerplate::filter_pages(pages, opts.boilerplate_threshold);
    if !filtered.repeated_lines.is_empty() {
        info!(
            "{}: eliminadas {} líneas repetidas (cabeceras/pies).",
            source,
            filtered.repeated_lines.len()
        );
    }

    let chunks = chunker::chunk_pages(&filtered.pages, &splitter, source);
    if chunks.is_empty() {
        warn!("Documento vacío o sin texto útil: {source}");
        return Err(Error::DocumentRead(format!(
            "{source}: el documento no tiene texto extraíble"
        )));
    }

    let summary = IngestionSummary {
        pages_read,
        pages_after_filter: filtered.pages.len(),
        boilerplate_lines: filtered.repeated_lines.len(),
        chunks_created: chunks.len(),
    };
    info!("Ingerido {source}. {summary}");

    Ok(IngestedDocument {
        source: source.to_string(),
        chunks,
        summary,
    })
}

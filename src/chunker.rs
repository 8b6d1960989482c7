//! División recursiva de texto en chunks con solapamiento.
//!
//! Se prefiere cortar por párrafo, después por línea y después por palabra;
//! sólo como último recurso se corta carácter a carácter. Las longitudes se
//! miden en caracteres (no bytes). Cada página se divide por separado, así
//! que un chunk nunca abarca dos páginas.

use std::collections::VecDeque;

use crate::error::{Error, Result};
use crate::models::{Chunk, Page};

/// Separadores en orden de preferencia; `""` significa corte por carácter.
const SEPARATORS: [&str; 4] = ["\n\n", "\n", " ", ""];

#[derive(Debug, Clone, Copy)]
pub struct TextSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl TextSplitter {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(Error::Config("chunk_size debe ser mayor que 0".to_string()));
        }
        if chunk_overlap >= chunk_size {
            return Err(Error::Config(format!(
                "chunk_overlap ({chunk_overlap}) debe ser menor que chunk_size ({chunk_size})"
            )));
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }

    pub fn split_text(&self, text: &str) -> Vec<String> {
        self.split_recursive(text, &SEPARATORS)
    }

    fn split_recursive(&self, text: &str, separators: &[&str]) -> Vec<String> {
        let (separator, finer) = pick_separator(text, separators);

        let mut chunks = Vec::new();
        let mut pending: Vec<String> = Vec::new();
        for piece in split_keeping_separator(text, separator) {
            // El separador inicial se recorta al formar el chunk; no cuenta aquí.
            let body = piece.strip_prefix(separator).unwrap_or(piece.as_str());
            if char_len(body) <= self.chunk_size {
                pending.push(piece);
                continue;
            }
            if !pending.is_empty() {
                chunks.extend(self.merge_pieces(&pending));
                pending.clear();
            }
            if finer.is_empty() {
                chunks.push(piece);
            } else {
                chunks.extend(self.split_recursive(&piece, finer));
            }
        }
        if !pending.is_empty() {
            chunks.extend(self.merge_pieces(&pending));
        }
        chunks
    }

    /// Junta piezas pequeñas en chunks de hasta `chunk_size` caracteres,
    /// arrastrando al siguiente chunk hasta `chunk_overlap` caracteres del final.
    fn merge_pieces(&self, pieces: &[String]) -> Vec<String> {
        let mut chunks = Vec::new();
        let mut window: VecDeque<(&str, usize)> = VecDeque::new();
        let mut total = 0usize;

        for piece in pieces {
            let len = char_len(piece);
            if total + len > self.chunk_size && !window.is_empty() {
                push_joined(&window, &mut chunks);
                while total > self.chunk_overlap || (total > 0 && total + len > self.chunk_size) {
                    let Some((_, dropped)) = window.pop_front() else {
                        break;
                    };
                    total -= dropped;
                }
            }
            window.push_back((piece.as_str(), len));
            total += len;
        }
        push_joined(&window, &mut chunks);
        chunks
    }
}

/// Divide cada página y etiqueta los chunks con página, ordinal y origen.
/// `chunk_index` reinicia en 0 en cada página.
pub fn chunk_pages(pages: &[Page], splitter: &TextSplitter, source: &str) -> Vec<Chunk> {
    pages
        .iter()
        .flat_map(|page| {
            splitter
                .split_text(&page.text)
                .into_iter()
                .enumerate()
                .map(move |(index, text)| Chunk {
                    text,
                    page_number: page.page_number,
                    chunk_index: index as u32,
                    source: source.to_string(),
                })
        })
        .collect()
}

fn pick_separator<'a>(text: &str, separators: &'a [&'a str]) -> (&'a str, &'a [&'a str]) {
    for (i, separator) in separators.iter().copied().enumerate() {
        if separator.is_empty() {
            return (separator, &separators[..0]);
        }
        if text.contains(separator) {
            return (separator, &separators[i + 1..]);
        }
    }
    (separators.last().copied().unwrap_or(""), &separators[..0])
}

/// Divide por `separator` dejando el separador al inicio de cada pieza
/// siguiente; descarta piezas vacías.
fn split_keeping_separator(text: &str, separator: &str) -> Vec<String> {
    if separator.is_empty() {
        return text.chars().map(String::from).collect();
    }
    let mut parts = text.split(separator);
    let mut pieces: Vec<String> = parts.next().map(str::to_string).into_iter().collect();
    pieces.extend(parts.map(|part| format!("{separator}{part}")));
    pieces.retain(|p| !p.is_empty());
    pieces
}

fn push_joined(window: &VecDeque<(&str, usize)>, chunks: &mut Vec<String>) {
    let joined: String = window.iter().map(|(piece, _)| *piece).collect();
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        chunks.push(trimmed.to_string());
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

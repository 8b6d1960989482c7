//! Detección y eliminación de líneas repetidas entre páginas
//! (cabeceras, pies de página, marcas de agua).

use std::collections::HashSet;

use crate::models::Page;

pub const DEFAULT_THRESHOLD: f64 = 0.5;

/// Devuelve las líneas (recortadas) que aparecen en más de
/// `threshold × total_páginas` páginas distintas. Varias apariciones en la
/// misma página cuentan una sola vez; las líneas en blanco se ignoran.
pub fn find_repeated_lines<S: AsRef<str>>(pages: &[S], threshold: f64) -> HashSet<String> {
    if pages.is_empty() {
        return HashSet::new();
    }

    let mut page_counts: std::collections::HashMap<&str, usize> = Default::default();
    for page in pages {
        let distinct: HashSet<&str> = page
            .as_ref()
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect();
        for line in distinct {
            *page_counts.entry(line).or_default() += 1;
        }
    }

    let limit = threshold * pages.len() as f64;
    page_counts
        .into_iter()
        .filter(|(_, count)| *count as f64 > limit)
        .map(|(line, _)| line.to_string())
        .collect()
}

/// Quita de `text` las líneas repetidas y las líneas en blanco.
pub fn strip_lines(text: &str, repeated: &HashSet<String>) -> String {
    text.lines()
        .filter(|line| {
            let trimmed = line.trim();
            !trimmed.is_empty() && !repeated.contains(trimmed)
        })
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// Resultado de filtrar un documento.
#[derive(Debug, Clone, Default)]
pub struct FilteredPages {
    pub pages: Vec<Page>,
    pub repeated_lines: HashSet<String>,
}

/// Aplica el filtro a todas las páginas. Las páginas que quedan vacías se
/// descartan (no llegan al chunker).
pub fn filter_pages(pages: Vec<Page>, threshold: f64) -> FilteredPages {
    let repeated_lines = find_repeated_lines(
        &pages.iter().map(|p| p.text.as_str()).collect::<Vec<_>>(),
        threshold,
    );

    let pages = pages
        .into_iter()
        .filter_map(|page| {
            let text = strip_lines(&page.text, &repeated_lines);
            (!text.is_empty()).then_some(Page {
                page_number: page.page_number,
                text,
            })
        })
        .collect();

    FilteredPages {
        pages,
        repeated_lines,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pages(texts: &[&str]) -> Vec<Page> {
        texts
            .iter()
            .enumerate()
            .map(|(i, t)| Page {
                page_number: i as u32 + 1,
                text: t.to_string(),
            })
            .collect()
    }

    #[test]
    fn line_on_every_page_is_removed() {
        let filtered = filter_pages(pages(&["A\nB", "A\nC", "A\nD"]), 0.5);
        let texts: Vec<_> = filtered.pages.iter().map(|p| p.text.as_str()).collect();
        assert_eq!(texts, vec!["B", "C", "D"]);
        assert_eq!(filtered.repeated_lines.len(), 1);
        assert!(filtered.repeated_lines.contains("A"));
    }

    #[test]
    fn repeats_within_one_page_count_once() {
        let repeated = find_repeated_lines(&["X\nX\nX\nY", "Z", "W"], 0.5);
        assert!(repeated.is_empty());
    }

    #[test]
    fn threshold_is_strictly_greater_than() {
        // 2 de 4 páginas == 0.5 × 4, no supera el umbral.
        let repeated = find_repeated_lines(&["H\n1", "H\n2", "3", "4"], 0.5);
        assert!(repeated.is_empty());
        let repeated = find_repeated_lines(&["H\n1", "H\n2", "H\n3", "4"], 0.5);
        assert!(repeated.contains("H"));
    }

    #[test]
    fn comparison_uses_trimmed_lines() {
        let repeated = find_repeated_lines(&["  CONFIDENTIAL  \na", "CONFIDENTIAL\nb"], 0.5);
        assert!(repeated.contains("CONFIDENTIAL"));
    }

    #[test]
    fn pages_that_become_empty_are_dropped() {
        let filtered = filter_pages(pages(&["Header\nPage 1 body", "Header", "Header\nPage 3"]), 0.5);
        let numbers: Vec<_> = filtered.pages.iter().map(|p| p.page_number).collect();
        assert_eq!(numbers, vec![1, 3]);
    }

    #[test]
    fn no_pages_is_a_no_op() {
        let empty: [&str; 0] = [];
        assert!(find_repeated_lines(&empty, 0.5).is_empty());
        assert!(filter_pages(Vec::new(), 0.5).pages.is_empty());
    }
}

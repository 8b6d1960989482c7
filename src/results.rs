//! Agregación de resultados: extrae una lista de atributos en orden y
//! persiste el conjunto como JSON.

use std::path::Path;

use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::ResultSet;
use crate::rag::AttributeExtractor;
use crate::vector_store::VectorIndex;

/// Atributos que se extraen cuando el usuario no indica ninguno.
pub const DEFAULT_ATTRIBUTES: &[&str] = &["Who is the borrower in this credit agreement?"];

/// Extrae cada atributo en orden de entrada.
///
/// El primer error se propaga y descarta los resultados parciales; no hay
/// aislamiento por atributo.
pub async fn extract_all<S: AsRef<str>>(
    extractor: &AttributeExtractor,
    index: &VectorIndex,
    attributes: &[S],
) -> Result<ResultSet> {
    extract_all_with_progress(extractor, index, attributes, |_, _, _| {}).await
}

/// Igual que `extract_all`, notificando `(hechos, total, atributo)` antes de
/// cada extracción.
pub async fn extract_all_with_progress<S, F>(
    extractor: &AttributeExtractor,
    index: &VectorIndex,
    attributes: &[S],
    mut on_progress: F,
) -> Result<ResultSet>
where
    S: AsRef<str>,
    F: FnMut(usize, usize, &str),
{
    let total = attributes.len();
    let mut results = ResultSet::new();

    for (done, attribute) in attributes.iter().enumerate() {
        let attribute = attribute.as_ref();
        if results.contains(attribute) {
            warn!("Atributo duplicado '{attribute}': se ignora.");
            continue;
        }

        on_progress(done, total, attribute);
        info!("[{}/{}] Extrayendo '{}'...", done + 1, total, attribute);

        let result = extractor.extract(index, attribute).await?;
        results.insert(result);
    }

    info!("Extracción completada: {} atributos.", results.len());
    Ok(results)
}

/// Guarda el conjunto como JSON legible; escribe a un temporal y renombra.
pub async fn save_results(results: &ResultSet, path: &Path) -> Result<()> {
    let payload = serde_json::to_vec_pretty(results)
        .map_err(|e| Error::Storage(format!("no se pudieron serializar los resultados: {e}")))?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| Error::Storage(format!("no se pudo crear {}: {e}", parent.display())))?;
    }

    let staging = path.with_extension(format!("{}.staging", Uuid::new_v4().simple()));
    if let Err(e) = tokio::fs::write(&staging, &payload).await {
        let _ = tokio::fs::remove_file(&staging).await;
        return Err(Error::Storage(format!(
            "no se pudo escribir {}: {e}",
            staging.display()
        )));
    }
    if let Err(e) = tokio::fs::rename(&staging, path).await {
        let _ = tokio::fs::remove_file(&staging).await;
        return Err(Error::Storage(format!(
            "no se pudo escribir {}: {e}",
            path.display()
        )));
    }

    info!("Resultados guardados en {}", path.display());
    Ok(())
}

pub async fn load_results(path: &Path) -> Result<ResultSet> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| Error::Storage(format!("no se pudo leer {}: {e}", path.display())))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| Error::Storage(format!("resultados corruptos en {}: {e}", path.display())))
}

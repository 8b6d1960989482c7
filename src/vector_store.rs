//! Índice vectorial sobre los chunks de un documento.
//!
//! API pública:
//!   - `VectorStore::build(nombre, chunks)`: embebe y reemplaza la colección.
//!   - `VectorStore::load(nombre)`: abre una colección sin re-embeber.
//!   - `VectorIndex::query(texto, k)`: k vecinos más cercanos por distancia coseno.
//!
//! Un `VectorIndex` es una instantánea inmutable en memoria de una colección;
//! las consultas nunca tocan el almacenamiento, así que no pueden observar una
//! reconstrucción a medias.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::collection_store::{CollectionStore, StoredCollection};
use crate::embeddings::Embedder;
use crate::error::{with_timeout, Error, Result};
use crate::models::{Chunk, IndexedChunk, QueryHit};

const DEFAULT_EMBEDDING_TIMEOUT: Duration = Duration::from_secs(120);

/// Punto de entrada para construir y abrir índices. Barato de clonar.
#[derive(Clone)]
pub struct VectorStore {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn CollectionStore>,
    timeout: Duration,
}

impl VectorStore {
    pub fn new(embedder: Arc<dyn Embedder>, store: Arc<dyn CollectionStore>) -> Self {
        Self {
            embedder,
            store,
            timeout: DEFAULT_EMBEDDING_TIMEOUT,
        }
    }

    /// Tiempo límite de cada llamada al servicio de embeddings.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    /// Embebe todos los chunks y reemplaza la colección `name`.
    ///
    /// Todo o nada: si el embedding falla no se persiste nada y la colección
    /// anterior queda intacta. Los ids `chunk_<i>` siguen el orden de entrada.
    pub async fn build(&self, name: &str, chunks: Vec<Chunk>) -> Result<VectorIndex> {
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let embeddings = self.embed_in_batches(texts).await?;

        if embeddings.len() != chunks.len() {
            return Err(Error::EmbeddingService(format!(
                "se esperaban {} embeddings y se recibieron {}",
                chunks.len(),
                embeddings.len()
            )));
        }
        let dimension = embeddings.first().map(Vec::len).unwrap_or(0);
        if !chunks.is_empty() && dimension == 0 {
            return Err(Error::EmbeddingService("embeddings vacíos".to_string()));
        }
        if let Some(bad) = embeddings.iter().position(|e| e.len() != dimension) {
            return Err(Error::EmbeddingService(format!(
                "dimensión inconsistente en el chunk {bad}: {} != {dimension}",
                embeddings[bad].len()
            )));
        }

        let collection = StoredCollection {
            name: name.to_string(),
            model_id: self.embedder.model_id().to_string(),
            dimension,
            chunks: chunks
                .into_iter()
                .zip(embeddings)
                .enumerate()
                .map(|(i, (chunk, embedding))| IndexedChunk {
                    id: format!("chunk_{i}"),
                    chunk,
                    embedding,
                })
                .collect(),
        };
        self.store.replace(&collection).await?;

        info!(
            "Índice '{}' construido: {} chunks, dimensión {}.",
            name,
            collection.chunks.len(),
            dimension
        );
        Ok(self.index_from(collection))
    }

    /// Abre una colección persistida. Falla si se construyó con otro modelo.
    pub async fn load(&self, name: &str) -> Result<VectorIndex> {
        let collection = self.store.load(name).await?;
        if collection.model_id != self.embedder.model_id() {
            return Err(Error::ModelMismatch {
                collection: name.to_string(),
                expected: collection.model_id,
                found: self.embedder.model_id().to_string(),
            });
        }
        info!(
            "Índice '{}' cargado: {} chunks.",
            name,
            collection.chunks.len()
        );
        Ok(self.index_from(collection))
    }

    /// Embebe `texts` en lotes de `max_batch_size()`, concatenando en orden.
    /// El primer lote que falla aborta todo; el tiempo límite es por lote.
    async fn embed_in_batches(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let batch_size = self.embedder.max_batch_size().max(1);
        let batches = texts.len().div_ceil(batch_size);
        let mut embeddings = Vec::with_capacity(texts.len());

        for (i, batch) in texts.chunks(batch_size).enumerate() {
            let vectors = with_timeout(
                "el embedding del documento",
                self.timeout,
                self.embedder.embed_documents(batch.to_vec()),
            )
            .await
            .map_err(|e| match e {
                Error::Timeout { .. } | Error::EmbeddingService(_) => e,
                other => Error::EmbeddingService(other.to_string()),
            })?;
            if vectors.len() != batch.len() {
                return Err(Error::EmbeddingService(format!(
                    "el lote {} devolvió {} embeddings para {} textos",
                    i + 1,
                    vectors.len(),
                    batch.len()
                )));
            }
            debug!("Lote de embeddings {}/{} ({} textos)", i + 1, batches, batch.len());
            embeddings.extend(vectors);
        }
        Ok(embeddings)
    }

    fn index_from(&self, collection: StoredCollection) -> VectorIndex {
        VectorIndex {
            name: collection.name,
            dimension: collection.dimension,
            chunks: collection.chunks,
            embedder: Arc::clone(&self.embedder),
            timeout: self.timeout,
        }
    }
}

/// Instantánea consultable de una colección.
pub struct VectorIndex {
    name: String,
    dimension: usize,
    chunks: Vec<IndexedChunk>,
    embedder: Arc<dyn Embedder>,
    timeout: Duration,
}

impl std::fmt::Debug for VectorIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorIndex")
            .field("name", &self.name)
            .field("dimension", &self.dimension)
            .field("chunks", &self.chunks.len())
            .field("model_id", &self.embedder.model_id())
            .finish()
    }
}

impl VectorIndex {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn chunks(&self) -> &[IndexedChunk] {
        &self.chunks
    }

    /// Devuelve los `k` chunks más cercanos a `text`, de menor a mayor
    /// distancia; empates en orden de inserción.
    ///
    /// `k` debe cumplir `1 <= k <= len()`; si no, `InvalidQuery`.
    pub async fn query(&self, text: &str, k: usize) -> Result<Vec<QueryHit<'_>>> {
        if k == 0 || k > self.chunks.len() {
            return Err(Error::InvalidQuery {
                k,
                size: self.chunks.len(),
            });
        }

        let query_vec = with_timeout(
            "el embedding de la consulta",
            self.timeout,
            self.embedder.embed_query(text),
        )
        .await
        .map_err(|e| match e {
            Error::Timeout { .. } => e,
            other => Error::Retrieval(other.to_string()),
        })?;
        if query_vec.len() != self.dimension {
            return Err(Error::Retrieval(format!(
                "la consulta tiene dimensión {} y la colección {}",
                query_vec.len(),
                self.dimension
            )));
        }

        let mut hits: Vec<QueryHit<'_>> = self
            .chunks
            .iter()
            .map(|chunk| QueryHit {
                chunk,
                distance: cosine_distance(&query_vec, &chunk.embedding),
            })
            .collect();
        // sort_by es estable: los empates conservan el orden de inserción.
        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        hits.truncate(k);

        debug!(
            "Consulta '{}' (k={k}) en '{}': mejor distancia {:.4}",
            text,
            self.name,
            hits[0].distance
        );
        Ok(hits)
    }
}

/// `1 - cos(a, b)`; 1.0 si algún vector tiene norma cero.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (&x, &y) in a.iter().zip(b.iter()) {
        let (x, y) = (f64::from(x), f64::from(y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom <= f64::EPSILON {
        return 1.0;
    }
    (1.0 - dot / denom) as f32
}

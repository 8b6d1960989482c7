//! Taxonomía de errores del pipeline de extracción.
//!
//! Cada variante corresponde a un tipo de fallo distinguible por el llamante.
//! Una respuesta mal formada del LLM NO es un error: degrada a un resultado
//! de confianza baja (ver `rag::parse_model_output`).

use std::future::Future;
use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// El documento no se puede abrir o parsear en absoluto.
    #[error("no se pudo leer el documento: {0}")]
    DocumentRead(String),

    /// Fallo del servicio de embeddings al construir el índice.
    #[error("fallo del servicio de embeddings: {0}")]
    EmbeddingService(String),

    #[error("k={k} fuera de rango: la colección tiene {size} chunks (se requiere 1 <= k <= {size})")]
    InvalidQuery { k: usize, size: usize },

    #[error("la colección '{0}' no existe; hay que construirla primero")]
    CollectionNotFound(String),

    /// Fallo al embeber la consulta o al acceder al almacenamiento en tiempo de consulta.
    #[error("fallo de recuperación: {0}")]
    Retrieval(String),

    /// Fallo de la llamada al modelo de lenguaje (red, cuota, autenticación...).
    #[error("fallo del modelo de lenguaje: {0}")]
    Generation(String),

    #[error("{operation} superó el tiempo límite de {seconds}s")]
    Timeout { operation: &'static str, seconds: u64 },

    #[error(
        "la colección '{collection}' se construyó con el modelo '{expected}', pero el embedder activo es '{found}'"
    )]
    ModelMismatch {
        collection: String,
        expected: String,
        found: String,
    },

    #[error("error de almacenamiento: {0}")]
    Storage(String),

    #[error("configuración inválida: {0}")]
    Config(String),
}

impl Error {
    /// Identificador estable del tipo de error (se expone en la API HTTP).
    pub fn kind(&self) -> &'static str {
        match self {
            Error::DocumentRead(_) => "document_read",
            Error::EmbeddingService(_) => "embedding_service",
            Error::InvalidQuery { .. } => "invalid_query",
            Error::CollectionNotFound(_) => "collection_not_found",
            Error::Retrieval(_) => "retrieval",
            Error::Generation(_) => "generation",
            Error::Timeout { .. } => "timeout",
            Error::ModelMismatch { .. } => "model_mismatch",
            Error::Storage(_) => "storage",
            Error::Config(_) => "config",
        }
    }
}

/// Ejecuta `fut` con un tiempo límite; al vencer devuelve `Error::Timeout`.
pub async fn with_timeout<T, F>(operation: &'static str, limit: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout {
            operation,
            seconds: limit.as_secs(),
        }),
    }
}

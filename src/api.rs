use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Json, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::spawn;
use tracing::{error, info, warn};

use crate::{
    app_state::{AppState, Status},
    error::Error,
    ingest::{self, IngestOptions},
    models::{Chunk, ResultSet},
    results,
};

const MAX_UPLOAD_BYTES: usize = 64 * 1024 * 1024;

// --- Payloads y Respuestas de la API ---

#[derive(Deserialize)]
pub struct IngestParams {
    source: Option<String>,
}

#[derive(Deserialize)]
pub struct ExtractPayload {
    #[serde(default)]
    attributes: Vec<String>,
    k: Option<usize>,
}

#[derive(Deserialize)]
pub struct QueryPayload {
    query: String,
    k: Option<usize>,
}

#[derive(Serialize)]
pub struct QueryHitResponse {
    id: String,
    page: u32,
    chunk_index: u32,
    source: String,
    text: String,
    distance: f32,
}

// --- Errores ---

/// Error de la API: `{ "error": mensaje, "kind": tipo }`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    kind: &'static str,
    message: String,
}

impl ApiError {
    fn busy(message: String) -> Self {
        Self {
            status: StatusCode::CONFLICT,
            kind: "busy",
            message,
        }
    }

    fn bad_request(message: &str) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            kind: "bad_request",
            message: message.to_string(),
        }
    }
}

/// Código HTTP para cada tipo de error del pipeline.
pub fn status_for(err: &Error) -> StatusCode {
    match err {
        Error::InvalidQuery { .. } | Error::DocumentRead(_) => StatusCode::BAD_REQUEST,
        Error::CollectionNotFound(_) => StatusCode::NOT_FOUND,
        Error::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        Error::Generation(_) | Error::Retrieval(_) | Error::EmbeddingService(_) => {
            StatusCode::BAD_GATEWAY
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self {
            status: status_for(&err),
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!("Error en la API ({}): {}", self.kind, self.message);
        }
        (
            self.status,
            Json(json!({ "error": self.message, "kind": self.kind })),
        )
            .into_response()
    }
}

// --- Router ---

pub fn create_router(app_state: AppState) -> Router {
    Router::new()
        .route(
            "/api/ingest",
            post(ingest_handler).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .route("/api/extract", post(extract_handler))
        .route("/api/query", post(query_handler))
        .route("/api/status", get(status_handler))
        .route("/api/results", get(results_handler))
        .route("/api/shutdown", post(shutdown_handler))
        .with_state(app_state)
}

// --- Handlers ---

#[axum::debug_handler]
async fn ingest_handler(
    State(state): State<AppState>,
    Query(params): Query<IngestParams>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    if body.is_empty() {
        return Err(ApiError::bad_request("El cuerpo de la petición debe ser un PDF."));
    }
    let source = params
        .source
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| "document.pdf".to_string());

    if !state.try_begin(&format!("Leyendo '{source}'...")) {
        return Err(ApiError::busy(state.status().message));
    }

    spawn(async move {
        let result = rebuild_index(&state, body, source).await;
        match result {
            Ok(summary) => state.finish(format!("¡Indexación completada! {summary}")),
            Err(err) => {
                error!("Error de ingesta: {}", err);
                state.finish(format!("Error en la indexación: {err}"));
            }
        }
    });

    Ok(StatusCode::ACCEPTED)
}

/// Lee el PDF, lo trocea y sustituye la colección activa.
async fn rebuild_index(
    state: &AppState,
    body: Bytes,
    source: String,
) -> crate::error::Result<ingest::IngestionSummary> {
    let opts = IngestOptions::from_config(&state.config);
    let document = tokio::task::spawn_blocking(move || {
        ingest::ingest_pdf_bytes(&body, &source, &opts)
    })
    .await
    .map_err(|e| Error::DocumentRead(format!("la tarea de lectura falló: {e}")))??;

    state.update_status(|status| {
        status.message = format!(
            "Generando embeddings de {} chunks...",
            document.summary.chunks_created
        );
        status.progress = 0.5;
    });

    install_index(state, document.chunks).await?;
    Ok(document.summary)
}

/// Construye la colección y sustituye la instantánea activa. Las consultas
/// siguen usando la anterior mientras se calculan los embeddings; el cerrojo
/// de escritura sólo se toma para el cambio.
async fn install_index(state: &AppState, chunks: Vec<Chunk>) -> crate::error::Result<()> {
    let built = state
        .vector_store
        .build(&state.config.collection_name, chunks)
        .await?;
    *state.index.write().await = Some(built);
    Ok(())
}

#[axum::debug_handler]
async fn extract_handler(
    State(state): State<AppState>,
    Json(payload): Json<ExtractPayload>,
) -> Result<Json<ResultSet>, ApiError> {
    let attributes = if payload.attributes.is_empty() {
        results::DEFAULT_ATTRIBUTES
            .iter()
            .map(|a| a.to_string())
            .collect()
    } else {
        payload.attributes
    };

    if !state.try_begin("Extrayendo atributos...") {
        return Err(ApiError::busy(state.status().message));
    }

    let outcome: crate::error::Result<ResultSet> = async {
        let guard = state.index.read().await;
        let index = guard
            .as_ref()
            .ok_or_else(|| Error::CollectionNotFound(state.config.collection_name.clone()))?;
        let extractor = state
            .extractor
            .as_ref()
            .clone()
            .with_top_k(payload.k.unwrap_or(state.extractor.top_k()));

        let set =
            results::extract_all_with_progress(&extractor, index, &attributes, |done, total, attr| {
                state.update_status(|status| {
                    status.message = format!("[{}/{}] {}", done + 1, total, attr);
                    status.progress = done as f32 / total as f32;
                });
            })
            .await?;
        Ok(set)
    }
    .await;

    match outcome {
        Ok(set) => {
            if let Err(e) = results::save_results(&set, &state.config.results_path).await {
                warn!("No se pudieron guardar los resultados: {e}");
            }
            state.set_results(set.clone());
            state.finish(format!("Extracción completada: {} atributos.", set.len()));
            Ok(Json(set))
        }
        Err(err) => {
            state.finish(format!("Error en la extracción: {err}"));
            Err(err.into())
        }
    }
}

#[axum::debug_handler]
async fn query_handler(
    State(state): State<AppState>,
    Json(payload): Json<QueryPayload>,
) -> Result<Json<Vec<QueryHitResponse>>, ApiError> {
    let guard = state.index.read().await;
    let index = guard
        .as_ref()
        .ok_or_else(|| Error::CollectionNotFound(state.config.collection_name.clone()))?;

    let k = payload.k.unwrap_or(state.config.top_k);
    let hits = index.query(&payload.query, k).await?;

    let response: Vec<QueryHitResponse> = hits
        .iter()
        .map(|hit| QueryHitResponse {
            id: hit.chunk.id.clone(),
            page: hit.chunk.chunk.page_number,
            chunk_index: hit.chunk.chunk.chunk_index,
            source: hit.chunk.chunk.source.clone(),
            text: hit.chunk.chunk.text.clone(),
            distance: hit.distance,
        })
        .collect();
    Ok(Json(response))
}

#[axum::debug_handler]
async fn status_handler(State(state): State<AppState>) -> Json<Status> {
    Json(state.status())
}

#[axum::debug_handler]
async fn results_handler(State(state): State<AppState>) -> Result<Json<ResultSet>, ApiError> {
    if let Some(set) = state.results() {
        return Ok(Json(set));
    }
    let path = &state.config.results_path;
    if !path.exists() {
        return Err(ApiError {
            status: StatusCode::NOT_FOUND,
            kind: "results_not_found",
            message: "Todavía no hay resultados.".to_string(),
        });
    }
    let set = results::load_results(path).await?;
    state.set_results(set.clone());
    Ok(Json(set))
}

// --- Handler de Apagado ---

#[axum::debug_handler]
async fn shutdown_handler(State(state): State<AppState>) -> impl IntoResponse {
    info!("Petición de apagado recibida.");
    let sender = state
        .shutdown_sender
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
        .take();
    if let Some(sender) = sender {
        let _ = sender.send(());
    }
    StatusCode::OK
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use tokio::sync::{oneshot, Notify};

    use super::*;
    use crate::{
        collection_store::FsStore,
        config::AppConfig,
        embeddings::Embedder,
        llm::{ChatModel, ModelReply},
        rag::AttributeExtractor,
        vector_store::{VectorIndex, VectorStore},
    };

    /// Embedder que se queda esperando hasta que el test lo libera.
    #[derive(Default)]
    struct GatedEmbedder {
        started: Notify,
        release: Notify,
    }

    #[async_trait]
    impl Embedder for GatedEmbedder {
        fn model_id(&self) -> &str {
            "test/gated"
        }

        async fn embed_documents(&self, texts: Vec<String>) -> crate::error::Result<Vec<Vec<f32>>> {
            self.started.notify_one();
            self.release.notified().await;
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }
    }

    struct NoChat;

    #[async_trait]
    impl ChatModel for NoChat {
        fn model_id(&self) -> &str {
            "test/none"
        }

        async fn complete(&self, _system: &str, _user: &str) -> crate::error::Result<ModelReply> {
            Err(Error::Generation("sin modelo".into()))
        }
    }

    #[tokio::test]
    async fn index_stays_readable_while_a_rebuild_embeds() {
        let dir = tempfile::tempdir().unwrap();
        let embedder = Arc::new(GatedEmbedder::default());
        let store = VectorStore::new(embedder.clone(), Arc::new(FsStore::new(dir.path())));
        let config = AppConfig::from_lookup(|key| {
            (key == "OPENAI_API_KEY").then(|| "sk-test".to_string())
        })
        .unwrap();
        let (shutdown_tx, _shutdown_rx) = oneshot::channel();
        let state = AppState::new(
            config,
            store,
            AttributeExtractor::new(Arc::new(NoChat)),
            None,
            shutdown_tx,
        );

        let task = {
            let state = state.clone();
            tokio::spawn(async move {
                let chunk = Chunk {
                    text: "The Borrower is Acme Corp.".to_string(),
                    page_number: 1,
                    chunk_index: 0,
                    source: "loan.pdf".to_string(),
                };
                install_index(&state, vec![chunk]).await
            })
        };

        embedder.started.notified().await;
        assert!(state.index.try_read().is_ok());

        embedder.release.notify_one();
        task.await.unwrap().unwrap();
        assert_eq!(state.index.read().await.as_ref().map(VectorIndex::len), Some(1));
    }

    #[test]
    fn pipeline_errors_map_to_http_status() {
        let cases = [
            (Error::InvalidQuery { k: 5, size: 3 }, StatusCode::BAD_REQUEST),
            (Error::DocumentRead("x".into()), StatusCode::BAD_REQUEST),
            (Error::CollectionNotFound("docs".into()), StatusCode::NOT_FOUND),
            (
                Error::Timeout { operation: "llm", seconds: 60 },
                StatusCode::GATEWAY_TIMEOUT,
            ),
            (Error::Generation("429".into()), StatusCode::BAD_GATEWAY),
            (Error::Retrieval("down".into()), StatusCode::BAD_GATEWAY),
            (Error::EmbeddingService("down".into()), StatusCode::BAD_GATEWAY),
            (Error::Storage("disk".into()), StatusCode::INTERNAL_SERVER_ERROR),
            (Error::Config("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, expected) in cases {
            assert_eq!(status_for(&err), expected, "{}", err.kind());
        }
    }

    #[test]
    fn api_error_keeps_kind_and_message() {
        let api: ApiError = Error::InvalidQuery { k: 0, size: 3 }.into();
        assert_eq!(api.status, StatusCode::BAD_REQUEST);
        assert_eq!(api.kind, "invalid_query");
        assert!(api.message.contains("k=0"));
    }
}

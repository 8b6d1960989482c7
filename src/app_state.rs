use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{oneshot, RwLock};

use crate::config::AppConfig;
use crate::models::ResultSet;
use crate::rag::AttributeExtractor;
use crate::vector_store::{VectorIndex, VectorStore};

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub vector_store: VectorStore,
    pub extractor: Arc<AttributeExtractor>,
    /// Índice activo. La reconstrucción toma el lock de escritura, así que
    /// ninguna consulta ve una colección a medio construir.
    pub index: Arc<RwLock<Option<VectorIndex>>>,
    pub status: Arc<Mutex<Status>>,
    pub last_results: Arc<Mutex<Option<ResultSet>>>,
    pub shutdown_sender: Arc<Mutex<Option<oneshot::Sender<()>>>>,
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct Status {
    pub is_busy: bool,
    pub message: String,
    pub progress: f32, // Valor entre 0.0 y 1.0
}

impl AppState {
    pub fn new(
        config: AppConfig,
        vector_store: VectorStore,
        extractor: AttributeExtractor,
        index: Option<VectorIndex>,
        shutdown_sender: oneshot::Sender<()>,
    ) -> Self {
        let message = match &index {
            Some(index) => format!("Servidor listo. Índice '{}' cargado.", index.name()),
            None => "Servidor listo. Sin índice: sube un PDF.".to_string(),
        };
        Self {
            config,
            vector_store,
            extractor: Arc::new(extractor),
            index: Arc::new(RwLock::new(index)),
            status: Arc::new(Mutex::new(Status {
                is_busy: false,
                message,
                progress: 0.0,
            })),
            last_results: Arc::new(Mutex::new(None)),
            shutdown_sender: Arc::new(Mutex::new(Some(shutdown_sender))),
        }
    }

    pub fn status(&self) -> Status {
        self.status
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn update_status(&self, f: impl FnOnce(&mut Status)) {
        let mut status = self.status.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut status);
    }

    /// Marca el estado como ocupado. Devuelve `false` si ya lo estaba.
    pub fn try_begin(&self, message: &str) -> bool {
        let mut status = self.status.lock().unwrap_or_else(PoisonError::into_inner);
        if status.is_busy {
            return false;
        }
        status.is_busy = true;
        status.message = message.to_string();
        status.progress = 0.0;
        true
    }

    pub fn finish(&self, message: String) {
        self.update_status(|status| {
            status.is_busy = false;
            status.progress = 0.0;
            status.message = message;
        });
    }

    pub fn set_results(&self, results: ResultSet) {
        *self
            .last_results
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(results);
    }

    pub fn results(&self) -> Option<ResultSet> {
        self.last_results
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

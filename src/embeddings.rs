//! Servicio de embeddings compartido.
//!
//! Se construye una sola vez al arrancar (`build_embedder`) y se comparte
//! como `Arc<dyn Embedder>` entre la construcción del índice y las consultas.
//! La misma instancia (mismo modelo) debe usarse para indexar y para consultar
//! una colección; `model_id` queda registrado en la colección persistida.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::config::{AppConfig, EmbeddingProvider, LlmProvider};
use crate::error::{Error, Result};

/// Tamaño de lote por defecto para servicios sin límite conocido.
pub const DEFAULT_MAX_BATCH: usize = 96;

#[async_trait]
pub trait Embedder: Send + Sync {
    /// Identificador estable del modelo (proveedor/modelo).
    fn model_id(&self) -> &str;

    /// Máximo de textos por llamada a `embed_documents`.
    fn max_batch_size(&self) -> usize {
        DEFAULT_MAX_BATCH
    }

    /// Embebe un lote de textos; devuelve un vector por texto, en orden.
    /// El lote no debe superar `max_batch_size()`.
    async fn embed_documents(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>>;

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_documents(vec![text.to_string()])
            .await?
            .pop()
            .ok_or_else(|| Error::EmbeddingService("respuesta vacía del modelo de embeddings".into()))
    }
}

/// Crea el embedder configurado.
pub fn build_embedder(cfg: &AppConfig) -> Result<Arc<dyn Embedder>> {
    match cfg.embedding_provider {
        EmbeddingProvider::Remote(provider) => Ok(Arc::new(RigEmbedder::new(
            provider,
            &cfg.llm_embedding_model,
        ))),
        #[cfg(feature = "local-embeddings")]
        EmbeddingProvider::Local => Ok(Arc::new(local::LocalEmbedder::new())),
        #[cfg(not(feature = "local-embeddings"))]
        EmbeddingProvider::Local => Err(Error::Config(
            "EMBEDDING_PROVIDER=local requiere compilar con la feature 'local-embeddings'".into(),
        )),
    }
}

/// Embeddings remotos (OpenAI / Gemini) a través de Rig.
#[derive(Debug, Clone)]
pub struct RigEmbedder {
    provider: LlmProvider,
    model: String,
    model_id: String,
}

impl RigEmbedder {
    pub fn new(provider: LlmProvider, model: &str) -> Self {
        let model = if model.is_empty() {
            provider.default_embedding_model().to_string()
        } else {
            model.to_string()
        };
        Self {
            provider,
            model_id: format!("{provider}/{model}"),
            model,
        }
    }
}

#[async_trait]
impl Embedder for RigEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    // Gemini admite 100 textos por batchEmbedContents; OpenAI limita además
    // los tokens totales de la petición.
    fn max_batch_size(&self) -> usize {
        match self.provider {
            LlmProvider::OpenAI => 256,
            LlmProvider::Gemini => 100,
        }
    }

    async fn embed_documents(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        use rig::client::EmbeddingsClient as _;
        use rig::client::ProviderClient as _;
        use rig::embeddings::EmbeddingModel as _;

        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let expected = texts.len();

        let embeddings = match self.provider {
            LlmProvider::OpenAI => {
                use rig::providers::openai;
                let client = openai::Client::from_env();
                client
                    .embedding_model(&self.model)
                    .embed_texts(texts)
                    .await
                    .map_err(|e| Error::EmbeddingService(e.to_string()))?
            }
            LlmProvider::Gemini => {
                use rig::providers::gemini;
                let client = gemini::Client::from_env();
                client
                    .embedding_model(&self.model)
                    .embed_texts(texts)
                    .await
                    .map_err(|e| Error::EmbeddingService(e.to_string()))?
            }
        };

        if embeddings.len() != expected {
            return Err(Error::EmbeddingService(format!(
                "número de embeddings ({}) distinto al número de textos ({expected})",
                embeddings.len()
            )));
        }
        debug!("{} embeddings generados con {}", expected, self.model_id);

        Ok(embeddings
            .into_iter()
            .map(|e| e.vec.into_iter().map(|x| x as f32).collect())
            .collect())
    }
}

#[cfg(feature = "local-embeddings")]
mod local {
    use std::sync::Arc;

    use async_trait::async_trait;
    use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
    use tokio::sync::OnceCell;
    use tracing::info;

    use super::Embedder;
    use crate::config::EmbeddingProvider;
    use crate::error::{Error, Result};

    /// all-MiniLM-L6-v2 local. El modelo se carga la primera vez que se usa
    /// y se reutiliza durante toda la vida del proceso.
    pub struct LocalEmbedder {
        model: OnceCell<Arc<TextEmbedding>>,
        model_id: String,
    }

    impl LocalEmbedder {
        pub fn new() -> Self {
            Self {
                model: OnceCell::new(),
                model_id: format!("local/{}", EmbeddingProvider::LOCAL_MODEL),
            }
        }

        async fn model(&self) -> Result<Arc<TextEmbedding>> {
            self.model
                .get_or_try_init(|| async {
                    info!("Inicializando modelo local de embeddings (all-MiniLM-L6-v2)...");
                    let model = tokio::task::spawn_blocking(|| {
                        let mut options = InitOptions::default();
                        options.model_name = EmbeddingModel::AllMiniLML6V2;
                        TextEmbedding::try_new(options)
                    })
                    .await
                    .map_err(|e| Error::EmbeddingService(e.to_string()))?
                    .map_err(|e| Error::EmbeddingService(e.to_string()))?;
                    info!("Modelo de embeddings cargado.");
                    Ok(Arc::new(model))
                })
                .await
                .cloned()
        }
    }

    #[async_trait]
    impl Embedder for LocalEmbedder {
        fn model_id(&self) -> &str {
            &self.model_id
        }

        async fn embed_documents(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
            if texts.is_empty() {
                return Ok(Vec::new());
            }
            let model = self.model().await?;
            tokio::task::spawn_blocking(move || model.embed(texts, None))
                .await
                .map_err(|e| Error::EmbeddingService(e.to_string()))?
                .map_err(|e| Error::EmbeddingService(e.to_string()))
        }
    }
}

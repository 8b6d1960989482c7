//! Carga y gestión de configuración de la aplicación (LLM, embeddings,
//! almacenamiento de colecciones y parámetros del pipeline).

use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LlmProvider {
    OpenAI,
    Gemini,
}

impl LlmProvider {
    /// Variable de entorno de la que el cliente de Rig lee la API key.
    pub fn api_key_var(&self) -> &'static str {
        match self {
            Self::OpenAI => "OPENAI_API_KEY",
            Self::Gemini => "GEMINI_API_KEY",
        }
    }

    pub fn default_chat_model(&self) -> &'static str {
        match self {
            Self::OpenAI => "gpt-4o-mini",
            Self::Gemini => "gemini-2.5-flash",
        }
    }

    pub fn default_embedding_model(&self) -> &'static str {
        match self {
            Self::OpenAI => "text-embedding-3-small",
            Self::Gemini => "text-embedding-004",
        }
    }
}

impl FromStr for LlmProvider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "gemini" => Ok(Self::Gemini),
            other => Err(Error::Config(format!("proveedor LLM no soportado: {other}"))),
        }
    }
}

impl fmt::Display for LlmProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OpenAI => f.write_str("openai"),
            Self::Gemini => f.write_str("gemini"),
        }
    }
}

/// Origen de los embeddings: un proveedor remoto vía Rig o el modelo local.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EmbeddingProvider {
    Remote(LlmProvider),
    Local,
}

impl EmbeddingProvider {
    pub const LOCAL_MODEL: &'static str = "all-MiniLM-L6-v2";

    pub fn default_model(&self) -> &'static str {
        match self {
            Self::Remote(provider) => provider.default_embedding_model(),
            Self::Local => Self::LOCAL_MODEL,
        }
    }
}

impl FromStr for EmbeddingProvider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            other => LlmProvider::from_str(other).map(Self::Remote),
        }
    }
}

#[derive(Clone, Debug)]
pub enum StoreBackend {
    Filesystem { root: PathBuf },
    Neo4j {
        uri: String,
        user: String,
        password: String,
    },
}

/// Configuración completa de la aplicación.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub llm_provider: LlmProvider,
    pub llm_chat_model: String,
    pub embedding_provider: EmbeddingProvider,
    pub llm_embedding_model: String,

    pub store_backend: StoreBackend,
    pub collection_name: String,

    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub boilerplate_threshold: f64,
    pub top_k: usize,

    pub llm_timeout: Duration,
    pub embedding_timeout: Duration,

    pub results_path: PathBuf,
    pub server_addr: String,
}

impl AppConfig {
    /// Carga la configuración desde variables de entorno (usando .env si existe).
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Igual que `from_env`, pero leyendo de una función arbitraria.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let llm_provider: LlmProvider = var("LLM_PROVIDER")
            .unwrap_or_else(|| "openai".to_string())
            .parse()?;
        let llm_chat_model = var("LLM_CHAT_MODEL")
            .unwrap_or_else(|| llm_provider.default_chat_model().to_string());

        let embedding_provider = match var("EMBEDDING_PROVIDER") {
            Some(raw) => raw.parse()?,
            None => EmbeddingProvider::Remote(llm_provider),
        };
        let llm_embedding_model = var("LLM_EMBEDDING_MODEL")
            .unwrap_or_else(|| embedding_provider.default_model().to_string());

        // Los clientes de Rig leen la clave del entorno; se comprueba aquí
        // para fallar con un mensaje claro y no dentro del cliente.
        let mut required_keys = vec![llm_provider.api_key_var()];
        if let EmbeddingProvider::Remote(provider) = embedding_provider {
            required_keys.push(provider.api_key_var());
        }
        for key in required_keys {
            if var(key).is_none() {
                return Err(Error::Config(format!("falta {key} en el entorno")));
            }
        }

        let store_backend = match var("STORE_BACKEND")
            .unwrap_or_else(|| "fs".to_string())
            .to_lowercase()
            .as_str()
        {
            "fs" => StoreBackend::Filesystem {
                root: PathBuf::from(var("INDEX_DIR").unwrap_or_else(|| "./index_db".to_string())),
            },
            "neo4j" => {
                let required = |key: &str| {
                    var(key).ok_or_else(|| Error::Config(format!("falta {key} en el entorno")))
                };
                StoreBackend::Neo4j {
                    uri: required("NEO4J_URI")?,
                    user: required("NEO4J_USER")?,
                    password: required("NEO4J_PASSWORD")?,
                }
            }
            other => {
                return Err(Error::Config(format!(
                    "STORE_BACKEND no soportado: {other} (usa 'fs' o 'neo4j')"
                )))
            }
        };

        let collection_name =
            var("COLLECTION_NAME").unwrap_or_else(|| "document_chunks".to_string());

        let chunk_size = parse_or(&var, "CHUNK_SIZE", 1000usize)?;
        let chunk_overlap = parse_or(&var, "CHUNK_OVERLAP", 200usize)?;
        if chunk_size == 0 || chunk_overlap >= chunk_size {
            return Err(Error::Config(format!(
                "CHUNK_OVERLAP ({chunk_overlap}) debe ser menor que CHUNK_SIZE ({chunk_size}) y CHUNK_SIZE > 0"
            )));
        }

        let boilerplate_threshold = parse_or(&var, "BOILERPLATE_THRESHOLD", 0.5f64)?;
        if !(boilerplate_threshold > 0.0 && boilerplate_threshold <= 1.0) {
            return Err(Error::Config(format!(
                "BOILERPLATE_THRESHOLD debe estar en (0, 1], recibido {boilerplate_threshold}"
            )));
        }

        let top_k = parse_or(&var, "TOP_K", 5usize)?;
        if top_k == 0 {
            return Err(Error::Config("TOP_K debe ser al menos 1".to_string()));
        }

        let llm_timeout = Duration::from_secs(parse_or(&var, "LLM_TIMEOUT_SECS", 60u64)?);
        let embedding_timeout =
            Duration::from_secs(parse_or(&var, "EMBEDDING_TIMEOUT_SECS", 120u64)?);

        let results_path =
            PathBuf::from(var("RESULTS_PATH").unwrap_or_else(|| "results.json".to_string()));
        let server_addr = var("SERVER_ADDR").unwrap_or_else(|| "127.0.0.1:3322".to_string());

        Ok(Self {
            llm_provider,
            llm_chat_model,
            embedding_provider,
            llm_embedding_model,
            store_backend,
            collection_name,
            chunk_size,
            chunk_overlap,
            boilerplate_threshold,
            top_k,
            llm_timeout,
            embedding_timeout,
            results_path,
            server_addr,
        })
    }
}

fn parse_or<T, F>(var: &F, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match var(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| Error::Config(format!("{key}='{raw}' no es válido: {e}"))),
        None => Ok(default),
    }
}

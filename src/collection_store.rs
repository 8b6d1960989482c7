//! Persistencia de colecciones (chunks + embeddings + metadatos).
//!
//! `replace` es un intercambio en dos fases: la colección nueva se escribe
//! completa en una ubicación temporal y sólo después sustituye a la anterior
//! de forma atómica. Si el proceso muere a mitad, la colección previa sigue
//! siendo legible.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{AppConfig, StoreBackend};
use crate::error::{Error, Result};
use crate::models::IndexedChunk;
use crate::neo4j_client::{self, Neo4jStore};

/// Una colección tal y como se guarda en disco / base de datos.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredCollection {
    pub name: String,
    /// Modelo con el que se generaron los embeddings.
    pub model_id: String,
    pub dimension: usize,
    pub chunks: Vec<IndexedChunk>,
}

#[async_trait]
pub trait CollectionStore: Send + Sync {
    /// Sustituye por completo la colección `collection.name` (nunca añade).
    async fn replace(&self, collection: &StoredCollection) -> Result<()>;

    /// Carga una colección existente; `CollectionNotFound` si no existe.
    async fn load(&self, name: &str) -> Result<StoredCollection>;

    async fn exists(&self, name: &str) -> Result<bool>;

    async fn delete(&self, name: &str) -> Result<()>;
}

/// Abre el almacenamiento configurado.
pub async fn open_store(cfg: &AppConfig) -> Result<Arc<dyn CollectionStore>> {
    match &cfg.store_backend {
        StoreBackend::Filesystem { root } => Ok(Arc::new(FsStore::new(root))),
        StoreBackend::Neo4j { .. } => {
            let graph = neo4j_client::connect_from_config(cfg).await?;
            neo4j_client::ensure_schema(&graph).await?;
            Ok(Arc::new(Neo4jStore::new(graph)))
        }
    }
}

/// Nombres de colección admitidos: no vacíos, sólo `[A-Za-z0-9_-]`.
pub fn validate_collection_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(Error::Storage(format!("nombre de colección inválido: '{name}'")))
    }
}

/// Una colección por fichero JSON (`<root>/<name>.json`).
#[derive(Debug)]
pub struct FsStore {
    root: PathBuf,
    // Serializa `replace` frente a `load` dentro del proceso.
    lock: RwLock<()>,
}

impl FsStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            lock: RwLock::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn collection_path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{name}.json"))
    }

    fn staging_path(&self, name: &str) -> PathBuf {
        self.root
            .join(format!(".{name}.{}.staging", Uuid::new_v4().simple()))
    }

    /// Borra ficheros temporales de escrituras anteriores interrumpidas.
    async fn remove_stale_staging(&self, name: &str) {
        let prefix = format!(".{name}.");
        let Ok(mut entries) = tokio::fs::read_dir(&self.root).await else {
            return;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let file_name = entry.file_name().to_string_lossy().to_string();
            if file_name.starts_with(&prefix) && file_name.ends_with(".staging") {
                debug!("Eliminando fichero temporal huérfano {file_name}");
                if let Err(e) = tokio::fs::remove_file(entry.path()).await {
                    warn!("No se pudo eliminar {file_name}: {e}");
                }
            }
        }
    }
}

fn io_error(context: &str, path: &Path, e: std::io::Error) -> Error {
    Error::Storage(format!("{context} {}: {e}", path.display()))
}

#[async_trait]
impl CollectionStore for FsStore {
    async fn replace(&self, collection: &StoredCollection) -> Result<()> {
        validate_collection_name(&collection.name)?;
        let _guard = self.lock.write().await;

        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| io_error("no se pudo crear", &self.root, e))?;
        self.remove_stale_staging(&collection.name).await;

        let payload = serde_json::to_vec(collection)
            .map_err(|e| Error::Storage(format!("no se pudo serializar la colección: {e}")))?;

        // Fase 1: escribir la colección completa en un fichero temporal.
        let staging = self.staging_path(&collection.name);
        let mut file = tokio::fs::File::create(&staging)
            .await
            .map_err(|e| io_error("no se pudo crear", &staging, e))?;
        let written = async {
            file.write_all(&payload).await?;
            file.sync_all().await
        }
        .await;
        drop(file);
        if let Err(e) = written {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(io_error("no se pudo escribir", &staging, e));
        }

        // Fase 2: intercambio atómico.
        let target = self.collection_path(&collection.name);
        if let Err(e) = tokio::fs::rename(&staging, &target).await {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(io_error("no se pudo activar", &target, e));
        }

        info!(
            "Colección '{}' reemplazada ({} chunks) en {}",
            collection.name,
            collection.chunks.len(),
            target.display()
        );
        Ok(())
    }

    async fn load(&self, name: &str) -> Result<StoredCollection> {
        validate_collection_name(name)?;
        let _guard = self.lock.read().await;

        let path = self.collection_path(name);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::CollectionNotFound(name.to_string()))
            }
            Err(e) => return Err(io_error("no se pudo leer", &path, e)),
        };
        serde_json::from_slice(&bytes)
            .map_err(|e| Error::Storage(format!("colección '{name}' corrupta: {e}")))
    }

    async fn exists(&self, name: &str) -> Result<bool> {
        validate_collection_name(name)?;
        let _guard = self.lock.read().await;
        tokio::fs::try_exists(self.collection_path(name))
            .await
            .map_err(|e| io_error("no se pudo comprobar", &self.collection_path(name), e))
    }

    async fn delete(&self, name: &str) -> Result<()> {
        validate_collection_name(name)?;
        let _guard = self.lock.write().await;
        let path = self.collection_path(name);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error("no se pudo borrar", &path, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Chunk;

    fn collection(name: &str, texts: &[&str]) -> StoredCollection {
        StoredCollection {
            name: name.to_string(),
            model_id: "test/model".to_string(),
            dimension: 2,
            chunks: texts
                .iter()
                .enumerate()
                .map(|(i, text)| IndexedChunk {
                    id: format!("chunk_{i}"),
                    chunk: Chunk {
                        text: text.to_string(),
                        page_number: 1,
                        chunk_index: i as u32,
                        source: "loan.pdf".to_string(),
                    },
                    embedding: vec![1.0, i as f32],
                })
                .collect(),
        }
    }

    #[tokio::test]
    async fn load_missing_collection_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path());
        let err = store.load("document_chunks").await.unwrap_err();
        assert!(matches!(err, Error::CollectionNotFound(name) if name == "document_chunks"));
        assert!(!store.exists("document_chunks").await.unwrap());
    }

    #[tokio::test]
    async fn replace_overwrites_instead_of_appending() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path());

        store.replace(&collection("docs", &["a", "b", "c"])).await.unwrap();
        store.replace(&collection("docs", &["z"])).await.unwrap();

        let loaded = store.load("docs").await.unwrap();
        assert_eq!(loaded, collection("docs", &["z"]));
    }

    #[tokio::test]
    async fn persisted_metadata_uses_page_key() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path());
        store.replace(&collection("docs", &["a"])).await.unwrap();

        let raw = std::fs::read_to_string(dir.path().join("docs.json")).unwrap();
        let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
        let chunk = &json["chunks"][0];
        assert_eq!(chunk["id"], "chunk_0");
        assert_eq!(chunk["page"], 1);
        assert_eq!(chunk["chunk_index"], 0);
        assert_eq!(chunk["source"], "loan.pdf");
    }

    #[tokio::test]
    async fn stale_staging_files_do_not_hide_the_collection() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path());
        store.replace(&collection("docs", &["a"])).await.unwrap();

        // Simula un proceso que murió a mitad de una reconstrucción.
        std::fs::write(dir.path().join(".docs.deadbeef.staging"), b"{partial").unwrap();
        assert_eq!(store.load("docs").await.unwrap().chunks.len(), 1);

        store.replace(&collection("docs", &["b", "c"])).await.unwrap();
        assert!(!dir.path().join(".docs.deadbeef.staging").exists());
        assert_eq!(store.load("docs").await.unwrap().chunks.len(), 2);
    }

    #[tokio::test]
    async fn delete_removes_collection() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path());
        store.replace(&collection("docs", &["a"])).await.unwrap();
        store.delete("docs").await.unwrap();
        assert!(!store.exists("docs").await.unwrap());
        store.delete("docs").await.unwrap();
    }

    #[tokio::test]
    async fn path_like_names_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path());
        let err = store.load("../etc/passwd").await.unwrap_err();
        assert_eq!(err.kind(), "storage");
    }
}

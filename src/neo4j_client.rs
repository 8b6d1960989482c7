//! Neo4j como almacenamiento de colecciones:
//! `(:Collection {name})-[:HAS_CHUNK]->(:Chunk)`.
//!
//! La sustitución de una colección se hace en una única transacción, de modo
//! que un lector ve la colección anterior o la nueva, nunca un estado parcial.

use anyhow::Context as _;
use async_trait::async_trait;
use neo4rs::{query, Graph, Txn};
use tokio::sync::RwLock;
use tracing::{info, warn};
use url::Url;

use crate::collection_store::{validate_collection_name, CollectionStore, StoredCollection};
use crate::config::{AppConfig, StoreBackend};
use crate::error::{Error, Result};
use crate::models::{Chunk, IndexedChunk};

pub async fn connect_from_config(cfg: &AppConfig) -> Result<Graph> {
    let StoreBackend::Neo4j { uri, user, password } = &cfg.store_backend else {
        return Err(Error::Config("STORE_BACKEND no es 'neo4j'".to_string()));
    };
    connect(uri, user, password)
        .await
        .map_err(|e| Error::Storage(format!("{e:#}")))
}

async fn connect(uri: &str, user: &str, password: &str) -> anyhow::Result<Graph> {
    let url = Url::parse(uri).with_context(|| format!("NEO4J_URI inválida: {uri}"))?;
    let host = url.host_str().unwrap_or("localhost");
    let port = url.port().unwrap_or(7687);
    let addr = format!("{host}:{port}");

    info!("Conectando a Neo4j en {addr}...");
    let graph = Graph::new(&addr, user, password)
        .await
        .context("error conectando a Neo4j")?;
    info!("Conexión a Neo4j OK");
    Ok(graph)
}

/// Crea los constraints usados por el almacenamiento de colecciones.
pub async fn ensure_schema(graph: &Graph) -> Result<()> {
    let statements = [
        // Collection.name único
        "CREATE CONSTRAINT collection_name IF NOT EXISTS
         FOR (k:Collection)
         REQUIRE k.name IS UNIQUE",
        // Chunk.uid único (colección + id)
        "CREATE CONSTRAINT chunk_uid IF NOT EXISTS
         FOR (c:Chunk)
         REQUIRE c.uid IS UNIQUE",
    ];

    for stmt in statements {
        graph.run(query(stmt)).await.map_err(storage)?;
    }

    info!("Esquema de Neo4j asegurado (constraints de colecciones creados).");
    Ok(())
}

fn storage(e: neo4rs::Error) -> Error {
    Error::Storage(format!("Neo4j: {e}"))
}

pub struct Neo4jStore {
    graph: Graph,
    lock: RwLock<()>,
}

impl Neo4jStore {
    pub fn new(graph: Graph) -> Self {
        Self {
            graph,
            lock: RwLock::new(()),
        }
    }
}

async fn delete_collection(tx: &Txn, name: &str) -> Result<()> {
    tx.run(
        query(
            "MATCH (k:Collection {name: $name})
             OPTIONAL MATCH (k)-[:HAS_CHUNK]->(c:Chunk)
             DETACH DELETE c, k",
        )
        .param("name", name.to_string()),
    )
    .await
    .map_err(storage)
}

async fn write_collection(tx: &Txn, collection: &StoredCollection) -> Result<()> {
    delete_collection(tx, &collection.name).await?;

    tx.run(
        query("CREATE (k:Collection {name: $name, model_id: $model_id, dimension: $dimension})")
            .param("name", collection.name.clone())
            .param("model_id", collection.model_id.clone())
            .param("dimension", collection.dimension as i64),
    )
    .await
    .map_err(storage)?;

    for (seq, indexed) in collection.chunks.iter().enumerate() {
        let embedding: Vec<f64> = indexed.embedding.iter().map(|&x| f64::from(x)).collect();
        tx.run(
            query(
                "MATCH (k:Collection {name: $name})
                 CREATE (k)-[:HAS_CHUNK]->(c:Chunk {
                     uid: $uid, id: $id, seq: $seq, text: $text,
                     page: $page, chunk_index: $chunk_index, source: $source,
                     embedding: $embedding
                 })",
            )
            .param("name", collection.name.clone())
            .param("uid", format!("{}/{}", collection.name, indexed.id))
            .param("id", indexed.id.clone())
            .param("seq", seq as i64)
            .param("text", indexed.chunk.text.clone())
            .param("page", i64::from(indexed.chunk.page_number))
            .param("chunk_index", i64::from(indexed.chunk.chunk_index))
            .param("source", indexed.chunk.source.clone())
            .param("embedding", embedding),
        )
        .await
        .map_err(storage)?;
    }
    Ok(())
}

#[async_trait]
impl CollectionStore for Neo4jStore {
    async fn replace(&self, collection: &StoredCollection) -> Result<()> {
        validate_collection_name(&collection.name)?;
        let _guard = self.lock.write().await;

        let tx = self.graph.start_txn().await.map_err(storage)?;
        match write_collection(&tx, collection).await {
            Ok(()) => tx.commit().await.map_err(storage)?,
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    warn!("Rollback fallido en Neo4j: {rollback}");
                }
                return Err(e);
            }
        }

        info!(
            "Colección '{}' reemplazada en Neo4j ({} chunks).",
            collection.name,
            collection.chunks.len()
        );
        Ok(())
    }

    async fn load(&self, name: &str) -> Result<StoredCollection> {
        validate_collection_name(name)?;
        let _guard = self.lock.read().await;

        let mut cursor = self
            .graph
            .execute(
                query(
                    "MATCH (k:Collection {name: $name})
                     RETURN k.model_id AS model_id, k.dimension AS dimension",
                )
                .param("name", name.to_string()),
            )
            .await
            .map_err(storage)?;
        let Some(row) = cursor.next().await.map_err(storage)? else {
            return Err(Error::CollectionNotFound(name.to_string()));
        };
        let model_id: String = row
            .get("model_id")
            .ok_or_else(|| Error::Storage("falta 'model_id' en la colección".into()))?;
        let dimension: i64 = row
            .get("dimension")
            .ok_or_else(|| Error::Storage("falta 'dimension' en la colección".into()))?;

        let mut cursor = self
            .graph
            .execute(
                query(
                    "MATCH (:Collection {name: $name})-[:HAS_CHUNK]->(c:Chunk)
                     RETURN c.id AS id, c.text AS text, c.page AS page,
                            c.chunk_index AS chunk_index, c.source AS source,
                            c.embedding AS embedding
                     ORDER BY c.seq",
                )
                .param("name", name.to_string()),
            )
            .await
            .map_err(storage)?;

        let missing = |field: &str| Error::Storage(format!("falta campo '{field}' en un :Chunk"));
        let mut chunks = Vec::new();
        while let Some(row) = cursor.next().await.map_err(storage)? {
            let id: String = row.get("id").ok_or_else(|| missing("id"))?;
            let text: String = row.get("text").ok_or_else(|| missing("text"))?;
            let page: i64 = row.get("page").ok_or_else(|| missing("page"))?;
            let chunk_index: i64 = row.get("chunk_index").ok_or_else(|| missing("chunk_index"))?;
            let source: String = row.get("source").ok_or_else(|| missing("source"))?;
            let embedding: Vec<f64> = row.get("embedding").ok_or_else(|| missing("embedding"))?;

            chunks.push(IndexedChunk {
                id,
                chunk: Chunk {
                    text,
                    page_number: page as u32,
                    chunk_index: chunk_index as u32,
                    source,
                },
                embedding: embedding.into_iter().map(|x| x as f32).collect(),
            });
        }

        Ok(StoredCollection {
            name: name.to_string(),
            model_id,
            dimension: dimension as usize,
            chunks,
        })
    }

    async fn exists(&self, name: &str) -> Result<bool> {
        validate_collection_name(name)?;
        let mut cursor = self
            .graph
            .execute(
                query("MATCH (k:Collection {name: $name}) RETURN k.name AS name")
                    .param("name", name.to_string()),
            )
            .await
            .map_err(storage)?;
        Ok(cursor.next().await.map_err(storage)?.is_some())
    }

    async fn delete(&self, name: &str) -> Result<()> {
        validate_collection_name(name)?;
        let _guard = self.lock.write().await;
        let tx = self.graph.start_txn().await.map_err(storage)?;
        delete_collection(&tx, name).await?;
        tx.commit().await.map_err(storage)
    }
}

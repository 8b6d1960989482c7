//! Extracción de atributos de documentos legales y financieros en PDF.
//!
//! Pipeline: páginas → filtro de texto repetido → chunks → índice vectorial
//! → extracción con LLM por atributo → conjunto de resultados.

pub mod api;
pub mod app_state;
pub mod boilerplate;
pub mod chunker;
pub mod collection_store;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod ingest;
pub mod llm;
pub mod models;
pub mod neo4j_client;
pub mod pdf;
pub mod rag;
pub mod results;
pub mod vector_store;

pub use collection_store::{CollectionStore, FsStore, StoredCollection};
pub use config::AppConfig;
pub use embeddings::Embedder;
pub use error::{Error, Result};
pub use ingest::{IngestOptions, IngestedDocument, IngestionSummary};
pub use llm::{ChatModel, ModelReply, ReplyPart};
pub use models::{Chunk, Confidence, ExtractionResult, IndexedChunk, Page, QueryHit, ResultSet};
pub use rag::AttributeExtractor;
pub use vector_store::{VectorIndex, VectorStore};

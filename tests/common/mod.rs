#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use legal_rag_extractor::{
    collection_store::FsStore,
    error::{Error, Result},
    llm::{ChatModel, ModelReply},
    models::Chunk,
    vector_store::VectorStore,
    Embedder,
};
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};
use tempfile::TempDir;

pub const HASH_MODEL_ID: &str = "test/hash-bow";
const HASH_DIMENSION: usize = 1024;

/// Bolsa de palabras con hashing: determinista y sin red.
pub struct HashEmbedder {
    model_id: String,
}

impl HashEmbedder {
    pub fn new() -> Self {
        Self::with_model_id(HASH_MODEL_ID)
    }

    pub fn with_model_id(model_id: &str) -> Self {
        Self {
            model_id: model_id.to_string(),
        }
    }

    pub fn embed(text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; HASH_DIMENSION];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let word = word.to_lowercase();
            vector[fnv1a(&word) as usize % HASH_DIMENSION] += 1.0;
        }
        vector
    }
}

fn fnv1a(s: &str) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in s.bytes() {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn embed_documents(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| Self::embed(t)).collect())
    }
}

/// Servicio de embeddings caído.
pub struct FailingEmbedder;

#[async_trait]
impl Embedder for FailingEmbedder {
    fn model_id(&self) -> &str {
        HASH_MODEL_ID
    }

    async fn embed_documents(&self, _texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        Err(Error::EmbeddingService("503 service unavailable".to_string()))
    }
}

/// Modelo de chat con respuestas predefinidas; registra cada petición.
pub struct ScriptedChat {
    replies: Mutex<VecDeque<Result<ModelReply>>>,
    requests: Mutex<Vec<(String, String)>>,
}

impl ScriptedChat {
    pub fn new(replies: Vec<Result<ModelReply>>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn replying(texts: &[&str]) -> Arc<Self> {
        Self::new(
            texts
                .iter()
                .map(|t| Ok(ModelReply::Text(t.to_string())))
                .collect(),
        )
    }

    /// Pares (sistema, usuario) recibidos, en orden.
    pub fn requests(&self) -> Vec<(String, String)> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatModel for ScriptedChat {
    fn model_id(&self) -> &str {
        "test/scripted"
    }

    async fn complete(&self, system: &str, user: &str) -> Result<ModelReply> {
        self.requests
            .lock()
            .unwrap()
            .push((system.to_string(), user.to_string()));
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(Error::Generation("no scripted reply left".to_string())))
    }
}

/// Modelo de chat que tarda más que cualquier timeout razonable de test.
pub struct SlowChat;

#[async_trait]
impl ChatModel for SlowChat {
    fn model_id(&self) -> &str {
        "test/slow"
    }

    async fn complete(&self, _system: &str, _user: &str) -> Result<ModelReply> {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok(ModelReply::Text("{}".to_string()))
    }
}

pub fn chunk(text: &str, page: u32) -> Chunk {
    Chunk {
        text: text.to_string(),
        page_number: page,
        chunk_index: 0,
        source: "loan.pdf".to_string(),
    }
}

/// `VectorStore` sobre un directorio temporal con el embedder indicado.
pub fn vector_store(dir: &TempDir, embedder: Arc<dyn Embedder>) -> VectorStore {
    VectorStore::new(embedder, Arc::new(FsStore::new(dir.path())))
}

pub fn hash_store(dir: &TempDir) -> VectorStore {
    vector_store(dir, Arc::new(HashEmbedder::new()))
}

/// Genera un PDF con una página por elemento; cada línea del texto es una
/// línea de texto en Helvetica. Una cadena vacía produce una página en blanco.
pub fn build_pdf(pages: &[&str]) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! {
            "F1" => font_id,
        },
    });

    let mut kids = Vec::new();
    for text in pages {
        let mut operations = Vec::new();
        for (i, line) in text.lines().enumerate() {
            operations.push(Operation::new("BT", vec![]));
            operations.push(Operation::new(
                "Tf",
                vec![Object::Name(b"F1".to_vec()), Object::Integer(12)],
            ));
            operations.push(Operation::new(
                "Td",
                vec![Object::Integer(72), Object::Integer(760 - 20 * i as i64)],
            ));
            operations.push(Operation::new("Tj", vec![Object::string_literal(line)]));
            operations.push(Operation::new("ET", vec![]));
        }
        let content = Content { operations };
        let content_id = doc.add_object(Stream::new(
            dictionary! {},
            content.encode().expect("contenido PDF válido"),
        ));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "Resources" => resources_id,
            "MediaBox" => vec![
                Object::Integer(0),
                Object::Integer(0),
                Object::Integer(595),
                Object::Integer(842),
            ],
        });
        kids.push(Object::Reference(page_id));
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => Object::Integer(count),
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).expect("PDF serializable");
    bytes
}

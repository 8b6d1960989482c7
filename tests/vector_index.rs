mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use legal_rag_extractor::{
    error::{Error, Result},
    rag::AttributeExtractor,
    Embedder,
};

use common::{
    chunk, hash_store, vector_store, FailingEmbedder, HashEmbedder, ScriptedChat, HASH_MODEL_ID,
};

fn loan_chunks() -> Vec<legal_rag_extractor::Chunk> {
    vec![
        chunk("The Borrower is Acme Corp., a Delaware corporation.", 1),
        chunk("Interest accrues at five percent per annum.", 2),
        chunk("Governed by the laws of New York.", 3),
    ]
}

#[tokio::test]
async fn query_k_must_fit_the_collection() {
    let dir = tempfile::tempdir().unwrap();
    let index = hash_store(&dir)
        .build("document_chunks", loan_chunks())
        .await
        .unwrap();

    let err = index.query("borrower", 5).await.unwrap_err();
    assert!(matches!(err, Error::InvalidQuery { k: 5, size: 3 }));

    let err = index.query("borrower", 0).await.unwrap_err();
    assert_eq!(err.kind(), "invalid_query");

    let hits = index.query("borrower", 3).await.unwrap();
    assert_eq!(hits.len(), 3);
    assert!(hits.windows(2).all(|w| w[0].distance <= w[1].distance));
    assert_eq!(hits[0].chunk.chunk.page_number, 1);
}

#[tokio::test]
async fn ids_follow_input_order() {
    let dir = tempfile::tempdir().unwrap();
    let index = hash_store(&dir)
        .build("document_chunks", loan_chunks())
        .await
        .unwrap();

    let ids: Vec<&str> = index.chunks().iter().map(|c| c.id.as_str()).collect();
    assert_eq!(ids, vec!["chunk_0", "chunk_1", "chunk_2"]);
}

#[tokio::test]
async fn ties_keep_insertion_order() {
    let dir = tempfile::tempdir().unwrap();
    let index = hash_store(&dir)
        .build(
            "document_chunks",
            vec![chunk("same words", 4), chunk("same words", 2), chunk("other", 1)],
        )
        .await
        .unwrap();

    let hits = index.query("same words", 2).await.unwrap();
    assert_eq!(hits[0].chunk.id, "chunk_0");
    assert_eq!(hits[1].chunk.id, "chunk_1");
    assert_eq!(hits[0].distance, hits[1].distance);
}

#[tokio::test]
async fn rebuilding_replaces_instead_of_appending() {
    let dir = tempfile::tempdir().unwrap();
    let store = hash_store(&dir);

    let first = store.build("document_chunks", loan_chunks()).await.unwrap();
    let first_hits: Vec<(String, f32)> = first
        .query("Who is the borrower?", 3)
        .await
        .unwrap()
        .iter()
        .map(|h| (h.chunk.id.clone(), h.distance))
        .collect();

    store.build("document_chunks", loan_chunks()).await.unwrap();
    let reloaded = store.load("document_chunks").await.unwrap();
    assert_eq!(reloaded.len(), 3);

    let second_hits: Vec<(String, f32)> = reloaded
        .query("Who is the borrower?", 3)
        .await
        .unwrap()
        .iter()
        .map(|h| (h.chunk.id.clone(), h.distance))
        .collect();
    assert_eq!(first_hits, second_hits);
}

#[tokio::test]
async fn loading_a_missing_collection_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let err = hash_store(&dir).load("document_chunks").await.unwrap_err();
    assert_eq!(err.kind(), "collection_not_found");
}

#[tokio::test]
async fn failed_embedding_leaves_previous_collection_intact() {
    let dir = tempfile::tempdir().unwrap();
    hash_store(&dir)
        .build("document_chunks", loan_chunks())
        .await
        .unwrap();

    let failing = vector_store(&dir, Arc::new(FailingEmbedder));
    let err = failing
        .build("document_chunks", vec![chunk("replacement text", 1)])
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "embedding_service");

    let survivor = hash_store(&dir).load("document_chunks").await.unwrap();
    assert_eq!(survivor.len(), 3);
    assert!(survivor.chunks()[0].chunk.text.contains("Acme"));
}

#[tokio::test]
async fn collection_built_with_another_model_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    hash_store(&dir)
        .build("document_chunks", loan_chunks())
        .await
        .unwrap();

    let other = vector_store(&dir, Arc::new(HashEmbedder::with_model_id("test/other-model")));
    let err = other.load("document_chunks").await.unwrap_err();
    match err {
        Error::ModelMismatch {
            expected, found, ..
        } => {
            assert_eq!(expected, "test/hash-bow");
            assert_eq!(found, "test/other-model");
        }
        other => panic!("se esperaba ModelMismatch, llegó {other:?}"),
    }
}

#[tokio::test]
async fn empty_collection_rejects_every_query() {
    let dir = tempfile::tempdir().unwrap();
    let index = hash_store(&dir).build("document_chunks", Vec::new()).await.unwrap();
    assert!(index.is_empty());
    let err = index.query("borrower", 1).await.unwrap_err();
    assert!(matches!(err, Error::InvalidQuery { k: 1, size: 0 }));
}

struct SlowEmbedder;

#[async_trait]
impl Embedder for SlowEmbedder {
    fn model_id(&self) -> &str {
        "test/slow"
    }

    async fn embed_documents(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok(texts.iter().map(|_| vec![1.0]).collect())
    }
}

#[tokio::test]
async fn slow_embedding_service_times_out() {
    let dir = tempfile::tempdir().unwrap();
    let store = vector_store(&dir, Arc::new(SlowEmbedder)).with_timeout(Duration::from_millis(20));
    let err = store.build("document_chunks", loan_chunks()).await.unwrap_err();
    assert_eq!(err.kind(), "timeout");
    assert!(!dir.path().join("document_chunks.json").exists());
}

/// Embedder que rechaza lotes de más de `limit` textos, como hacen los
/// proveedores remotos, y puede fallar en la llamada `fail_on` (base 0).
struct BatchLimitedEmbedder {
    limit: usize,
    fail_on: Option<usize>,
    batches: Mutex<Vec<usize>>,
}

impl BatchLimitedEmbedder {
    fn new(limit: usize, fail_on: Option<usize>) -> Arc<Self> {
        Arc::new(Self {
            limit,
            fail_on,
            batches: Mutex::new(Vec::new()),
        })
    }

    fn batches(&self) -> Vec<usize> {
        self.batches.lock().unwrap().clone()
    }
}

#[async_trait]
impl Embedder for BatchLimitedEmbedder {
    fn model_id(&self) -> &str {
        HASH_MODEL_ID
    }

    fn max_batch_size(&self) -> usize {
        self.limit
    }

    async fn embed_documents(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        if texts.len() > self.limit {
            return Err(Error::EmbeddingService(format!(
                "400 batch of {} exceeds {}",
                texts.len(),
                self.limit
            )));
        }
        let call = {
            let mut batches = self.batches.lock().unwrap();
            batches.push(texts.len());
            batches.len() - 1
        };
        if self.fail_on == Some(call) {
            return Err(Error::EmbeddingService("503 service unavailable".to_string()));
        }
        Ok(texts.iter().map(|t| HashEmbedder::embed(t)).collect())
    }
}

fn numbered_chunks(n: u32) -> Vec<legal_rag_extractor::Chunk> {
    (1..=n)
        .map(|page| chunk(&format!("Section {page}. The Borrower covenants clause {page}."), page))
        .collect()
}

#[tokio::test]
async fn long_documents_are_embedded_in_provider_sized_batches() {
    let dir = tempfile::tempdir().unwrap();
    let embedder = BatchLimitedEmbedder::new(3, None);
    let index = vector_store(&dir, embedder.clone())
        .build("document_chunks", numbered_chunks(7))
        .await
        .unwrap();

    assert_eq!(embedder.batches(), vec![3, 3, 1]);
    assert_eq!(index.len(), 7);
    for (i, indexed) in index.chunks().iter().enumerate() {
        assert_eq!(indexed.id, format!("chunk_{i}"));
        assert_eq!(indexed.embedding, HashEmbedder::embed(&indexed.chunk.text));
    }

    let reloaded = hash_store(&dir).load("document_chunks").await.unwrap();
    assert_eq!(reloaded.len(), 7);
}

#[tokio::test]
async fn a_failed_batch_persists_nothing() {
    let dir = tempfile::tempdir().unwrap();
    hash_store(&dir)
        .build("document_chunks", loan_chunks())
        .await
        .unwrap();

    let embedder = BatchLimitedEmbedder::new(2, Some(1));
    let err = vector_store(&dir, embedder.clone())
        .build("document_chunks", numbered_chunks(5))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "embedding_service");
    assert_eq!(embedder.batches(), vec![2, 2]);

    let survivor = hash_store(&dir).load("document_chunks").await.unwrap();
    assert_eq!(survivor.len(), 3);
}

#[tokio::test]
async fn query_embedding_failure_is_a_retrieval_error() {
    let dir = tempfile::tempdir().unwrap();
    hash_store(&dir)
        .build("document_chunks", loan_chunks())
        .await
        .unwrap();

    let index = vector_store(&dir, Arc::new(FailingEmbedder))
        .load("document_chunks")
        .await
        .unwrap();
    let err = index.query("borrower", 1).await.unwrap_err();
    assert_eq!(err.kind(), "retrieval");

    let chat = ScriptedChat::replying(&[r#"{"value": "Acme Corp.", "confidence": "high"}"#]);
    let err = AttributeExtractor::new(chat.clone())
        .extract_with_k(&index, "borrower", 1)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Retrieval(_)), "{err:?}");
    assert!(chat.requests().is_empty());
}

/// Mismo modelo declarado, pero vectores de otra dimensión.
struct ShortVectorEmbedder;

#[async_trait]
impl Embedder for ShortVectorEmbedder {
    fn model_id(&self) -> &str {
        HASH_MODEL_ID
    }

    async fn embed_documents(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|_| vec![1.0, 0.0, 0.0]).collect())
    }
}

#[tokio::test]
async fn query_vector_of_wrong_dimension_is_a_retrieval_error() {
    let dir = tempfile::tempdir().unwrap();
    hash_store(&dir)
        .build("document_chunks", loan_chunks())
        .await
        .unwrap();

    let index = vector_store(&dir, Arc::new(ShortVectorEmbedder))
        .load("document_chunks")
        .await
        .unwrap();
    let err = index.query("borrower", 1).await.unwrap_err();
    assert_eq!(err.kind(), "retrieval");
    assert!(err.to_string().contains("dimensión 3"), "{err}");

    let chat = ScriptedChat::replying(&[]);
    let err = AttributeExtractor::new(chat.clone())
        .extract_with_k(&index, "borrower", 1)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Retrieval(_)), "{err:?}");
    assert!(chat.requests().is_empty());
}

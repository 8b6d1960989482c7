//! Extracción de atributos con RAG.
//!
//! Flujo:
//!   1. Búsqueda k-NN de los chunks relevantes para el atributo.
//!   2. Construcción del contexto (`[Page N]` + texto, en orden de ranking).
//!   3. Llamada al LLM con instrucción de sistema + mensaje de usuario.
//!   4. Parseo de la respuesta JSON; si no es JSON válido, el texto entero
//!      pasa a ser el valor con confianza baja (nunca un error).
//!   5. Citas: páginas distintas en orden de aparición y textos de los chunks.
//!
//! La confianza es la que declara el modelo; la distancia del mejor chunk se
//! guarda como dato informativo pero no la corrige.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{info, warn};

use crate::error::{with_timeout, Error, Result};
use crate::llm::ChatModel;
use crate::models::{Confidence, ExtractionResult, QueryHit, NOT_FOUND};
use crate::vector_store::VectorIndex;

pub const DEFAULT_TOP_K: usize = 5;

const DEFAULT_LLM_TIMEOUT: Duration = Duration::from_secs(60);

/// Razonamiento registrado cuando la respuesta no se pudo parsear.
pub const PARSE_FAILURE_REASONING: &str = "Failed to parse model response as JSON";

pub const SYSTEM_PROMPT: &str = r#"You are reading excerpts from a legal document.
Based only on these excerpts, extract the value for the requested attribute.
Respond in JSON with exactly these keys:
- "value": the extracted answer (use "not found" if the answer is not in the excerpts)
- "confidence": "high", "medium", or "low" based on how clearly the answer appears
- "reasoning": one sentence explaining where you found it

Respond with ONLY the JSON object, no markdown fences, no extra text."#;

/// Valor, confianza y razonamiento tal y como los devuelve el modelo.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedAnswer {
    pub value: String,
    pub confidence: Confidence,
    pub reasoning: String,
    /// `true` si la respuesta no era un objeto JSON y se usó el texto literal.
    pub fallback: bool,
}

#[derive(Clone)]
pub struct AttributeExtractor {
    chat: Arc<dyn ChatModel>,
    top_k: usize,
    timeout: Duration,
}

impl AttributeExtractor {
    pub fn new(chat: Arc<dyn ChatModel>) -> Self {
        Self {
            chat,
            top_k: DEFAULT_TOP_K,
            timeout: DEFAULT_LLM_TIMEOUT,
        }
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    /// Tiempo límite de cada llamada al LLM.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    /// Extrae `attribute` (nombre o pregunta completa) con el `top_k` por defecto.
    pub async fn extract(&self, index: &VectorIndex, attribute: &str) -> Result<ExtractionResult> {
        self.extract_with_k(index, attribute, self.top_k).await
    }

    /// Fallos de recuperación se propagan como `Retrieval` (o `InvalidQuery`
    /// si `k` no cabe en la colección) y los del LLM como `Generation`, sin
    /// reintentos.
    pub async fn extract_with_k(
        &self,
        index: &VectorIndex,
        attribute: &str,
        k: usize,
    ) -> Result<ExtractionResult> {
        // 1) Buscar los k chunks más relevantes
        let hits = index.query(attribute, k).await?;

        // 2) Contexto y mensajes
        let context = build_context(&hits);
        let user_message = build_user_message(&context, attribute);

        // 3) Preguntar al LLM
        let reply = with_timeout(
            "la llamada al modelo de lenguaje",
            self.timeout,
            self.chat.complete(SYSTEM_PROMPT, &user_message),
        )
        .await
        .map_err(|e| match e {
            Error::Timeout { .. } | Error::Generation(_) => e,
            other => Error::Generation(other.to_string()),
        })?;
        let raw = reply.into_text();

        // 4) Parsear la respuesta
        let parsed = parse_model_output(&raw);
        if parsed.fallback {
            warn!(
                "Respuesta no parseable para '{}' ({}); se usa el texto literal con confianza baja.",
                attribute,
                self.chat.model_id()
            );
        }

        info!(
            "Atributo '{}': '{}' (confianza {})",
            attribute, parsed.value, parsed.confidence
        );

        // 5) Citas
        Ok(ExtractionResult {
            attribute_name: attribute.to_string(),
            value: parsed.value,
            confidence: parsed.confidence,
            reasoning: parsed.reasoning,
            source_pages: source_pages(&hits),
            source_chunks: hits.iter().map(|h| h.chunk.chunk.text.clone()).collect(),
            best_distance: hits.first().map(|h| h.distance),
        })
    }
}

/// Concatena los chunks con su número de página, en orden de ranking.
pub fn build_context(hits: &[QueryHit<'_>]) -> String {
    hits.iter()
        .map(|hit| format!("[Page {}]\n{}", hit.chunk.chunk.page_number, hit.chunk.chunk.text))
        .collect::<Vec<_>>()
        .join("\n\n---\n\n")
}

pub fn build_user_message(context: &str, attribute: &str) -> String {
    format!(
        "Here are the relevant excerpts from the document:\n\n{context}\n\nExtract the value for: {attribute}"
    )
}

/// Páginas distintas de los chunks recuperados, en orden de primera aparición.
pub fn source_pages(hits: &[QueryHit<'_>]) -> Vec<u32> {
    let mut pages = Vec::new();
    for hit in hits {
        let page = hit.chunk.chunk.page_number;
        if !pages.contains(&page) {
            pages.push(page);
        }
    }
    pages
}

/// Quita las vallas de código markdown (```` ``` ```` / ```` ```json ````) que
/// rodean la respuesta, si las hay.
pub fn strip_code_fences(raw: &str) -> &str {
    let mut text = raw.trim();
    if text.starts_with("```") {
        text = match text.split_once('\n') {
            Some((_, rest)) => rest,
            None => text.trim_start_matches('`'),
        };
    }
    if let Some(stripped) = text.trim_end().strip_suffix("```") {
        text = stripped;
    }
    text.trim()
}

/// Parsea la respuesta del modelo según el contrato JSON del `SYSTEM_PROMPT`.
///
/// Nunca falla: si el texto no es un objeto JSON, el valor es el texto
/// (sin vallas y recortado) con confianza `low`.
pub fn parse_model_output(raw: &str) -> ParsedAnswer {
    let cleaned = strip_code_fences(raw);

    let Ok(Value::Object(fields)) = serde_json::from_str::<Value>(cleaned) else {
        return ParsedAnswer {
            value: cleaned.to_string(),
            confidence: Confidence::Low,
            reasoning: PARSE_FAILURE_REASONING.to_string(),
            fallback: true,
        };
    };

    let value = match fields.get("value") {
        None | Some(Value::Null) => NOT_FOUND.to_string(),
        Some(Value::String(s)) => s.trim().to_string(),
        Some(other) => other.to_string(),
    };

    let confidence = match fields.get("confidence").and_then(Value::as_str) {
        Some(label) => Confidence::parse(label).unwrap_or_else(|| {
            warn!("Confianza desconocida '{label}'; se usa 'low'.");
            Confidence::Low
        }),
        None => Confidence::Low,
    };

    let reasoning = match fields.get("reasoning") {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.trim().to_string(),
        Some(other) => other.to_string(),
    };

    ParsedAnswer {
        value,
        confidence,
        reasoning,
        fallback: false,
    }
}

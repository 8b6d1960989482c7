//! Abstracción sobre Rig para los modelos de chat (OpenAI y Gemini).
//!
//! La respuesta de un proveedor se modela como `ModelReply` y se normaliza a
//! texto plano antes de cualquier parseo.

use async_trait::async_trait;
use serde_json::Value;

use crate::config::{AppConfig, LlmProvider};
use crate::error::{Error, Result};

/// Fragmento de una respuesta compuesta.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplyPart {
    Text(String),
    /// Contenido no textual (llamadas a herramientas, bloques estructurados...).
    Other(Value),
}

/// Respuesta de un modelo de chat tal y como la entrega el proveedor.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelReply {
    Text(String),
    Parts(Vec<ReplyPart>),
}

impl ModelReply {
    /// Normaliza a texto: las partes textuales se unen con un espacio y las
    /// no textuales se representan con su JSON (o su campo `text` si lo tienen).
    pub fn into_text(self) -> String {
        match self {
            ModelReply::Text(text) => text,
            ModelReply::Parts(parts) => parts
                .into_iter()
                .map(|part| match part {
                    ReplyPart::Text(text) => text,
                    ReplyPart::Other(value) => match value.get("text").and_then(Value::as_str) {
                        Some(text) => text.to_string(),
                        None => value.to_string(),
                    },
                })
                .collect::<Vec<_>>()
                .join(" "),
        }
    }
}

impl From<String> for ModelReply {
    fn from(text: String) -> Self {
        ModelReply::Text(text)
    }
}

#[async_trait]
pub trait ChatModel: Send + Sync {
    fn model_id(&self) -> &str;

    /// Una petición de dos mensajes: instrucción de sistema + mensaje de usuario.
    async fn complete(&self, system: &str, user: &str) -> Result<ModelReply>;
}

/// Gestor de LLMs de chat.
#[derive(Debug, Clone)]
pub struct LlmManager {
    pub provider: LlmProvider,
    pub chat_model: String,
    model_id: String,
}

impl LlmManager {
    /// Construye el manager a partir de la configuración.
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self::new(cfg.llm_provider, &cfg.llm_chat_model)
    }

    pub fn new(provider: LlmProvider, chat_model: &str) -> Self {
        // Modelo de chat por defecto si no se ha configurado otro
        let chat_model = if chat_model.is_empty() {
            provider.default_chat_model().to_string()
        } else {
            chat_model.to_string()
        };
        Self {
            provider,
            model_id: format!("{provider}/{chat_model}"),
            chat_model,
        }
    }
}

#[async_trait]
impl ChatModel for LlmManager {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn complete(&self, system: &str, user: &str) -> Result<ModelReply> {
        use rig::client::CompletionClient as _;
        use rig::client::ProviderClient as _;
        use rig::completion::Prompt as _;

        let answer = match self.provider {
            LlmProvider::OpenAI => {
                use rig::providers::openai;
                let client = openai::Client::from_env();
                let agent = client
                    .agent(&self.chat_model)
                    .preamble(system)
                    .temperature(0.0)
                    .build();
                agent.prompt(user).await
            }
            LlmProvider::Gemini => {
                use rig::providers::gemini;
                let client = gemini::Client::from_env();
                let agent = client
                    .agent(&self.chat_model)
                    .preamble(system)
                    .temperature(0.0)
                    .build();
                agent.prompt(user).await
            }
        }
        .map_err(|e| Error::Generation(e.to_string()))?;

        Ok(ModelReply::Text(answer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn plain_text_reply_is_unchanged() {
        let reply = ModelReply::from("{\"value\": \"Acme\"}".to_string());
        assert_eq!(reply.into_text(), "{\"value\": \"Acme\"}");
    }

    #[test]
    fn parts_are_joined_with_spaces() {
        let reply = ModelReply::Parts(vec![
            ReplyPart::Text("{\"value\":".to_string()),
            ReplyPart::Other(json!({"type": "text", "text": "\"Acme\"}"})),
        ]);
        assert_eq!(reply.into_text(), "{\"value\": \"Acme\"}");
    }

    #[test]
    fn non_text_parts_fall_back_to_json() {
        let reply = ModelReply::Parts(vec![ReplyPart::Other(json!({"tool": "search"}))]);
        assert_eq!(reply.into_text(), "{\"tool\":\"search\"}");
    }

    #[test]
    fn default_chat_model_per_provider() {
        let manager = LlmManager::new(LlmProvider::Gemini, "");
        assert_eq!(manager.chat_model, "gemini-2.5-flash");
        assert_eq!(manager.model_id(), "gemini/gemini-2.5-flash");
    }
}

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use log::{debug, trace, warn};

use crate::ProviderKind;
use crate::error::Error;
use crate::request::{
  system_and_user, ChatMessage, GenerationRequest, GenerationResult
};

const VENDOR: &str = "Ollama";

// ===== Message Types =====

#[derive(Debug, Clone, Serialize)]
pub struct OllamaChatRequest
{   pub model: String
  , pub messages: Vec<ChatMessage>
  , pub stream: bool
  , pub options: OllamaOptions
}

#[derive(Debug, Clone, Serialize)]
pub struct OllamaOptions
{   pub temperature: f32
  , pub num_predict: u32
}

#[derive(Debug, Clone, Deserialize)]
pub struct OllamaChatResponse
{   pub message: OllamaMessage
  , #[serde(default)]
    pub done: bool
}

#[derive(Debug, Clone, Deserialize)]
pub struct OllamaMessage
{   #[serde(default)]
    pub content: String
}

#[derive(Debug, Clone, Deserialize)]
pub struct OllamaTagsResponse
{   #[serde(default)]
    pub models: Vec<OllamaModel>
}

#[derive(Debug, Clone, Deserialize)]
pub struct OllamaModel
{   pub name: String
}

/// Local Ollama daemon
pub struct OllamaProvider
{   host: String
  , http_client: reqwest::Client
}

impl OllamaProvider
{   pub fn new(host: impl Into<String>) -> Self
    {   let host = host.into();
        debug!("Creating OllamaProvider for {}", host);
        OllamaProvider
        {   host
          , http_client: reqwest::Client::new()
        }
    }

    pub fn host(&self) -> &str
    {   &self.host
    }

    async fn tags(&self) -> Result<Vec<String>, Error>
    {   let raw = super::send_json(
          self.http_client
            .get(super::join_url(&self.host, "api/tags")),
          VENDOR
        ).await?;
        let parsed: OllamaTagsResponse = super::decode(&raw, VENDOR)?;
        Ok(parsed.models.into_iter().map(|m| m.name).collect())
    }
}

#[async_trait]
impl super::Provider for OllamaProvider
{   async fn generate(&self, request: &GenerationRequest)
      -> Result<GenerationResult, Error>
    {   debug!("Ollama chat for: {}", request.model_id);

        let body = OllamaChatRequest
        {   model: request.model_id.clone()
          , messages: system_and_user(request)
          , stream: false
          , options: OllamaOptions
            {   temperature: request.options.temperature
              , num_predict: request.options.max_tokens
            }
        };
        trace!("Ollama request: {:?}", body);

        let raw = super::send_json(
          self.http_client
            .post(super::join_url(&self.host, "api/chat"))
            .json(&body),
          VENDOR
        ).await?;

        let parsed: OllamaChatResponse = super::decode(&raw, VENDOR)?;
        Ok(GenerationResult
        {   content: parsed.message.content
          , raw
        })
    }

    async fn list_models(&self) -> Vec<String>
    {   match self.tags().await
        {   Ok(models) => models
          , Err(e) => {
              warn!("Ollama model listing failed: {}", e);
              vec![]
            }
        }
    }

    async fn check_health(&self) -> bool
    {   self.tags().await.is_ok()
    }

    fn name(&self) -> &str
    {   ProviderKind::Ollama.display_name()
    }

    fn kind(&self) -> ProviderKind
    {   ProviderKind::Ollama
    }
}

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use log::{debug, trace, warn};

use crate::ProviderKind;
use crate::error::Error;
use crate::request::{
  system_and_user, ChatMessage, GenerationRequest, GenerationResult
};

// ===== Message Types =====

#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionRequest
{   pub model: String
  , pub messages: Vec<ChatMessage>
  , pub temperature: f32
  , pub max_tokens: u32
  , pub stream: bool
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionResponse
{   pub choices: Vec<Choice>
}

#[derive(Debug, Clone, Deserialize)]
pub struct Choice
{   pub message: ResponseMessage
  , #[serde(default)]
    pub finish_reason: Option<String>
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResponseMessage
{   #[serde(default)]
    pub content: Option<String>
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelsResponse
{   pub data: Vec<ModelData>
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelData
{   pub id: String
  , #[serde(default)]
    pub owned_by: Option<String>
}

// ===== Chat Completions Transport =====

/// Client for the `/chat/completions` + `/models` API shape.
/// Shared by the OpenAI-compatible and Groq providers.
#[derive(Debug, Clone)]
pub struct ChatCompletionsClient
{   http_client: reqwest::Client
  , base_url: String
  , api_key: String
  , vendor: &'static str
}

impl ChatCompletionsClient
{   pub fn new(
      base_url: impl Into<String>
    , api_key: impl Into<String>
    , vendor: &'static str
    ) -> Self
    {   ChatCompletionsClient
        {   http_client: reqwest::Client::new()
          , base_url: base_url.into()
          , api_key: api_key.into()
          , vendor
        }
    }

    pub fn base_url(&self) -> &str
    {   &self.base_url
    }

    pub async fn chat(&self, request: &GenerationRequest)
      -> Result<GenerationResult, Error>
    {   debug!("{} chat completion for: {}", self.vendor, request.model_id);

        let body = ChatCompletionRequest
        {   model: request.model_id.clone()
          , messages: system_and_user(request)
          , temperature: request.options.temperature
          , max_tokens: request.options.max_tokens
          , stream: false
        };
        trace!("{} request: {:?}", self.vendor, body);

        let raw = super::send_json(
          self.http_client
            .post(super::join_url(&self.base_url, "chat/completions"))
            .bearer_auth(&self.api_key)
            .json(&body),
          self.vendor
        ).await?;

        let parsed: ChatCompletionResponse
          = super::decode(&raw, self.vendor)?;

        let content = parsed.choices.into_iter()
          .next()
          .and_then(|c| c.message.content)
          .ok_or_else(|| {
            Error::Upstream(format!(
              "{} response contained no choices: {}",
              self.vendor, raw
            ))
          })?;

        Ok(GenerationResult { content, raw })
    }

    pub async fn models(&self) -> Result<Vec<String>, Error>
    {   let raw = super::send_json(
          self.http_client
            .get(super::join_url(&self.base_url, "models"))
            .bearer_auth(&self.api_key),
          self.vendor
        ).await?;

        let parsed: ModelsResponse = super::decode(&raw, self.vendor)?;
        let model_names: Vec<String>
          = parsed.data.into_iter().map(|m| m.id).collect();

        debug!("{} listed {} models", self.vendor, model_names.len());
        Ok(model_names)
    }
}

// ===== OpenAI-compatible Provider =====

/// Any server speaking the OpenAI chat API (LM Studio, vLLM, ...)
pub struct OpenAiProvider
{   client: ChatCompletionsClient
}

impl OpenAiProvider
{   pub fn new(
      base_url: impl Into<String>
    , api_key: impl Into<String>
    ) -> Self
    {   let base_url = base_url.into();
        debug!("Creating OpenAiProvider for {}", base_url);
        OpenAiProvider
        {   client: ChatCompletionsClient::new(
              base_url,
              api_key,
              ProviderKind::OpenAi.display_name()
            )
        }
    }
}

#[async_trait]
impl super::Provider for OpenAiProvider
{   async fn generate(&self, request: &GenerationRequest)
      -> Result<GenerationResult, Error>
    {   self.client.chat(request).await
    }

    async fn list_models(&self) -> Vec<String>
    {   match self.client.models().await
        {   Ok(models) => models
          , Err(e) => {
              warn!("Model listing failed, returning none: {}", e);
              vec![]
            }
        }
    }

    async fn check_health(&self) -> bool
    {   self.client.models().await.is_ok()
    }

    fn name(&self) -> &str
    {   ProviderKind::OpenAi.display_name()
    }

    fn kind(&self) -> ProviderKind
    {   ProviderKind::OpenAi
    }
}

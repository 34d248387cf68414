use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use log::{debug, trace, warn};

use crate::ProviderKind;
use crate::error::Error;
use crate::request::{ChatMessage, GenerationRequest, GenerationResult};

const ANTHROPIC_API_BASE: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const VENDOR: &str = "Anthropic";

/// Returned when the model listing call fails
pub const FALLBACK_MODELS: [&str; 3] =
[   "claude-3-opus-20240229"
  , "claude-3-sonnet-20240229"
  , "claude-3-haiku-20240307"
];

// ===== Message Types =====

#[derive(Debug, Clone, Serialize)]
pub struct MessagesRequest
{   pub model: String
  , pub max_tokens: u32
  , pub temperature: f32
  , /// Anthropic takes the system prompt outside the message list
    pub system: String
  , pub messages: Vec<ChatMessage>
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessagesResponse
{   pub content: Vec<ContentBlock>
  , #[serde(default)]
    pub stop_reason: Option<String>
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContentBlock
{   #[serde(rename = "type")]
    pub kind: String
  , #[serde(default)]
    pub text: Option<String>
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnthropicModelsResponse
{   pub data: Vec<AnthropicModel>
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnthropicModel
{   pub id: String
}

/// Anthropic Messages API
pub struct AnthropicProvider
{   api_key: String
  , base_url: String
  , http_client: reqwest::Client
}

impl AnthropicProvider
{   pub fn new(api_key: impl Into<String>) -> Self
    {   Self::with_base_url(ANTHROPIC_API_BASE, api_key)
    }

    pub fn with_base_url(
      base_url: impl Into<String>
    , api_key: impl Into<String>
    ) -> Self
    {   debug!("Creating AnthropicProvider");
        AnthropicProvider
        {   api_key: api_key.into()
          , base_url: base_url.into()
          , http_client: reqwest::Client::new()
        }
    }

    fn authorized(&self, builder: reqwest::RequestBuilder)
      -> reqwest::RequestBuilder
    {   builder
          .header("x-api-key", &self.api_key)
          .header("anthropic-version", ANTHROPIC_VERSION)
    }

    async fn models(&self) -> Result<Vec<String>, Error>
    {   let raw = super::send_json(
          self.authorized(self.http_client.get(
            super::join_url(&self.base_url, "v1/models")
          )),
          VENDOR
        ).await?;
        let parsed: AnthropicModelsResponse = super::decode(&raw, VENDOR)?;
        Ok(parsed.data.into_iter().map(|m| m.id).collect())
    }
}

#[async_trait]
impl super::Provider for AnthropicProvider
{   async fn generate(&self, request: &GenerationRequest)
      -> Result<GenerationResult, Error>
    {   debug!("Anthropic messages call for: {}", request.model_id);

        let body = MessagesRequest
        {   model: request.model_id.clone()
          , max_tokens: request.options.max_tokens
          , temperature: request.options.temperature
          , system: request.system_prompt.clone()
          , messages: vec![ChatMessage::user(request.user_prompt.clone())]
        };
        trace!("Anthropic request: {:?}", body);

        let raw = super::send_json(
          self.authorized(self.http_client.post(
            super::join_url(&self.base_url, "v1/messages")
          )).json(&body),
          VENDOR
        ).await?;

        let parsed: MessagesResponse = super::decode(&raw, VENDOR)?;
        let texts: Vec<String> = parsed.content.into_iter()
          .filter(|b| b.kind == "text")
          .filter_map(|b| b.text)
          .collect();

        if texts.is_empty()
        {   return Err(Error::Upstream(format!(
              "Anthropic response contained no text: {}", raw
            )));
        }

        Ok(GenerationResult
        {   content: texts.concat()
          , raw
        })
    }

    async fn list_models(&self) -> Vec<String>
    {   match self.models().await
        {   Ok(models) if !models.is_empty() => models
          , Ok(_) => {
              FALLBACK_MODELS.iter().map(|m| m.to_string()).collect()
            }
          , Err(e) => {
              warn!("Anthropic model listing failed, using defaults: {}", e);
              FALLBACK_MODELS.iter().map(|m| m.to_string()).collect()
            }
        }
    }

    /// Client constructed; no remote check.
    async fn check_health(&self) -> bool
    {   true
    }

    fn name(&self) -> &str
    {   ProviderKind::Anthropic.display_name()
    }

    fn kind(&self) -> ProviderKind
    {   ProviderKind::Anthropic
    }
}

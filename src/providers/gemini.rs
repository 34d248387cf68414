use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use log::{debug, trace, warn};

use crate::ProviderKind;
use crate::error::Error;
use crate::request::{GenerationRequest, GenerationResult};

const GEMINI_API_BASE: &str
  = "https://generativelanguage.googleapis.com/v1beta";
const VENDOR: &str = "Gemini";

// ===== Message Types =====

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Part
{   #[serde(default)]
    pub text: Option<String>
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Content
{   #[serde(skip_serializing_if = "Option::is_none", default)]
    pub role: Option<String>
  , #[serde(default)]
    pub parts: Vec<Part>
}

impl Content
{   fn text(role: Option<&str>, text: &str) -> Self
    {   Content
        {   role: role.map(|r| r.to_string())
          , parts: vec![Part { text: Some(text.to_string()) }]
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig
{   pub temperature: f32
  , pub max_output_tokens: u32
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentRequest
{   /// Gemini has no system role; the instruction rides with the model config
    pub system_instruction: Content
  , pub contents: Vec<Content>
  , pub generation_config: GenerationConfig
}

#[derive(Debug, Clone, Deserialize)]
pub struct GenerateContentResponse
{   #[serde(default)]
    pub candidates: Vec<Candidate>
}

#[derive(Debug, Clone, Deserialize)]
pub struct Candidate
{   #[serde(default)]
    pub content: Option<Content>
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiModelsResponse
{   #[serde(default)]
    pub models: Vec<GeminiModel>
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiModel
{   pub name: String
  , #[serde(default)]
    pub supported_generation_methods: Vec<String>
}

/// Strip the `models/` resource prefix the API puts on names
pub fn short_model_name(name: &str) -> &str
{   name.strip_prefix("models/").unwrap_or(name)
}

/// Google AI Studio (Gemini) generateContent API
pub struct GeminiProvider
{   api_key: String
  , base_url: String
  , http_client: reqwest::Client
}

impl GeminiProvider
{   pub fn new(api_key: impl Into<String>) -> Self
    {   Self::with_base_url(GEMINI_API_BASE, api_key)
    }

    pub fn with_base_url(
      base_url: impl Into<String>
    , api_key: impl Into<String>
    ) -> Self
    {   debug!("Creating GeminiProvider");
        GeminiProvider
        {   api_key: api_key.into()
          , base_url: base_url.into()
          , http_client: reqwest::Client::new()
        }
    }

    async fn models(&self) -> Result<Vec<String>, Error>
    {   let raw = super::send_json(
          self.http_client
            .get(super::join_url(&self.base_url, "models"))
            .query(&[("pageSize", "1000")])
            .header("x-goog-api-key", &self.api_key),
          VENDOR
        ).await?;
        let parsed: GeminiModelsResponse = super::decode(&raw, VENDOR)?;
        Ok(
          parsed.models.into_iter()
            .filter(|m| {
              m.supported_generation_methods.iter()
                .any(|g| g == "generateContent")
            })
            .map(|m| short_model_name(&m.name).to_string())
            .collect()
        )
    }
}

#[async_trait]
impl super::Provider for GeminiProvider
{   async fn generate(&self, request: &GenerationRequest)
      -> Result<GenerationResult, Error>
    {   let model = short_model_name(&request.model_id);
        debug!("Gemini generateContent for: {}", model);

        let body = GenerateContentRequest
        {   system_instruction: Content::text(None, &request.system_prompt)
          , contents: vec![
              Content::text(Some("user"), &request.user_prompt)
            ]
          , generation_config: GenerationConfig
            {   temperature: request.options.temperature
              , max_output_tokens: request.options.max_tokens
            }
        };
        trace!("Gemini request: {:?}", body);

        let raw = super::send_json(
          self.http_client
            .post(super::join_url(
              &self.base_url,
              &format!("models/{}:generateContent", model)
            ))
            .header("x-goog-api-key", &self.api_key)
            .json(&body),
          VENDOR
        ).await?;

        let parsed: GenerateContentResponse = super::decode(&raw, VENDOR)?;
        let text: Option<String> = parsed.candidates.into_iter()
          .next()
          .and_then(|c| c.content)
          .map(|c| {
            c.parts.into_iter()
              .filter_map(|p| p.text)
              .collect::<Vec<_>>()
              .concat()
          })
          .filter(|t| !t.is_empty());

        match text
        {   Some(content) => Ok(GenerationResult { content, raw })
          , None => Err(Error::Upstream(format!(
              "Gemini response contained no text: {}", raw
            )))
        }
    }

    async fn list_models(&self) -> Vec<String>
    {   match self.models().await
        {   Ok(models) => models
          , Err(e) => {
              warn!("Gemini model listing failed: {}", e);
              vec![]
            }
        }
    }

    /// Client constructed; no remote check.
    async fn check_health(&self) -> bool
    {   true
    }

    fn name(&self) -> &str
    {   ProviderKind::Gemini.display_name()
    }

    fn kind(&self) -> ProviderKind
    {   ProviderKind::Gemini
    }
}

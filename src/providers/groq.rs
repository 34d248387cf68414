use async_trait::async_trait;
use log::{debug, warn};

use crate::ProviderKind;
use crate::error::Error;
use crate::request::{GenerationRequest, GenerationResult};
use super::openai::ChatCompletionsClient;

const GROQ_API_BASE: &str = "https://api.groq.com/openai/v1";

/// Returned when the model listing call fails
pub const FALLBACK_MODELS: [&str; 3] =
[   "llama3-8b-8192"
  , "llama3-70b-8192"
  , "mixtral-8x7b-32768"
];

/// Groq's hosted OpenAI-compatible endpoint
pub struct GroqProvider
{   client: ChatCompletionsClient
}

impl GroqProvider
{   pub fn new(api_key: impl Into<String>) -> Self
    {   Self::with_base_url(GROQ_API_BASE, api_key)
    }

    pub fn with_base_url(
      base_url: impl Into<String>
    , api_key: impl Into<String>
    ) -> Self
    {   debug!("Creating GroqProvider");
        GroqProvider
        {   client: ChatCompletionsClient::new(
              base_url,
              api_key,
              ProviderKind::Groq.display_name()
            )
        }
    }
}

#[async_trait]
impl super::Provider for GroqProvider
{   async fn generate(&self, request: &GenerationRequest)
      -> Result<GenerationResult, Error>
    {   self.client.chat(request).await
    }

    async fn list_models(&self) -> Vec<String>
    {   match self.client.models().await
        {   Ok(models) => models
          , Err(e) => {
              warn!("Groq model listing failed, using defaults: {}", e);
              FALLBACK_MODELS.iter().map(|m| m.to_string()).collect()
            }
        }
    }

    /// Client constructed; no remote check.
    async fn check_health(&self) -> bool
    {   true
    }

    fn name(&self) -> &str
    {   ProviderKind::Groq.display_name()
    }

    fn kind(&self) -> ProviderKind
    {   ProviderKind::Groq
    }
}

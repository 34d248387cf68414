//! LLM provider implementations

use async_trait::async_trait;
use log::{error, trace};
use serde_json::Value;

use crate::ProviderKind;
use crate::error::Error;
use crate::request::{GenerationRequest, GenerationResult};

pub mod openai;
pub mod ollama;
pub mod llamacpp;
pub mod anthropic;
pub mod gemini;
pub mod groq;
pub mod registry;

// Re-export for convenience
pub use openai::OpenAiProvider;
pub use ollama::OllamaProvider;
pub use llamacpp::{LlamaCppProvider, LocalEngine};
pub use anthropic::AnthropicProvider;
pub use gemini::GeminiProvider;
pub use groq::GroqProvider;
pub use registry::{create, create_from_config, list_available};

/// Capability set shared by every backend.
///
/// `list_models` and `check_health` never fail: they degrade to an
/// empty/static list and `false`/`true` according to each backend.
/// A `true` health answer only means the client is constructed for
/// backends without a cheap remote check.
#[async_trait]
pub trait Provider: Send + Sync
{   /// One round-trip completion with a system slot and one user turn
    async fn generate(&self, request: &GenerationRequest)
      -> Result<GenerationResult, Error>;

    /// Best-effort model enumeration
    async fn list_models(&self) -> Vec<String>;

    /// Best-effort readiness check
    async fn check_health(&self) -> bool;

    /// Display label
    fn name(&self) -> &str;

    fn kind(&self) -> ProviderKind;
}

/// Send a prepared request and decode the JSON body.
/// Transport failures and non-success statuses become
/// `Error::Upstream` with the vendor text untouched.
pub(crate) async fn send_json(
  request: reqwest::RequestBuilder
, vendor: &str
) -> Result<Value, Error>
{   let response = request
      .send()
      .await
      .map_err(|e| {
        error!("{} HTTP error: {}", vendor, e);
        Error::Upstream(e.to_string())
      })?;

    let status = response.status();
    trace!("{} response status: {}", vendor, status);

    if !status.is_success()
    {   let error_text = response.text().await
          .unwrap_or_else(|_| String::new());
        error!("{} API error ({}): {}", vendor, status, error_text);
        return Err(Error::Upstream(
          if error_text.is_empty()
          {   status.to_string()
          } else
          {   error_text
          }
        ));
    }

    response.json::<Value>().await.map_err(|e| {
      error!("{} parse error: {}", vendor, e);
      Error::Upstream(e.to_string())
    })
}

/// Decode a typed view of a payload while keeping the raw value
pub(crate) fn decode<T>(raw: &Value, vendor: &str) -> Result<T, Error>
where
  T: serde::de::DeserializeOwned
{   serde_json::from_value(raw.clone()).map_err(|e| {
      error!("{} unexpected payload: {}", vendor, e);
      Error::Upstream(format!("{}: {}", e, raw))
    })
}

/// Trim a trailing slash so paths can be appended
pub(crate) fn join_url(base: &str, path: &str) -> String
{   format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

//! Configuration for providers and the optimizer

use std::path::{Path, PathBuf};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use log::debug;

use crate::ProviderKind;
use crate::error::Error;
use crate::request::GenerationOptions;

pub const DEFAULT_OPENAI_BASE_URL: &str = "http://localhost:1234/v1";
pub const DEFAULT_OPENAI_API_KEY: &str = "lm-studio";
pub const DEFAULT_OLLAMA_HOST: &str = "http://localhost:11434";
pub const DEFAULT_CONTEXT_SIZE: u32 = 4096;

fn default_openai_base_url() -> String
{   DEFAULT_OPENAI_BASE_URL.to_string()
}

fn default_openai_api_key() -> String
{   DEFAULT_OPENAI_API_KEY.to_string()
}

fn default_ollama_host() -> String
{   DEFAULT_OLLAMA_HOST.to_string()
}

fn default_context_size() -> u32
{   DEFAULT_CONTEXT_SIZE
}

/// Connection parameters, one variant per provider.
/// Tagged by the provider identifier when serialized. On input the tag
/// goes through [`ProviderKind::from_identifier`], so aliases and
/// display labels work in config files too.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(remote = "Self", tag = "provider", rename_all = "lowercase")]
pub enum ProviderConfig
{   /// OpenAI-compatible server
    OpenAi
    {   #[serde(default = "default_openai_base_url")]
        base_url: String
      , #[serde(default = "default_openai_api_key")]
        api_key: String
    }
  , Ollama
    {   #[serde(default = "default_ollama_host")]
        host: String
    }
  , /// Embedded llama.cpp; loading the model is blocking
    LlamaCpp
    {   model_path: PathBuf
      , #[serde(default = "default_context_size")]
        context_size: u32
      , #[serde(default)]
        gpu_layers: u32
    }
  , Anthropic
    {   api_key: String
    }
  , Gemini
    {   api_key: String
    }
  , Groq
    {   api_key: String
    }
}

impl Serialize for ProviderConfig
{   fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
      S: Serializer
    {   ProviderConfig::serialize(self, serializer)
    }
}

impl<'de> Deserialize<'de> for ProviderConfig
{   fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
      D: Deserializer<'de>
    {   let mut value = Value::deserialize(deserializer)?;
        let tag = value.get("provider")
          .and_then(Value::as_str)
          .ok_or_else(|| D::Error::missing_field("provider"))?;
        let kind = ProviderKind::from_identifier(tag).ok_or_else(|| {
          D::Error::custom(format!("Unknown provider type: {}", tag))
        })?;
        value["provider"] = Value::String(kind.identifier().to_string());
        ProviderConfig::deserialize(value).map_err(D::Error::custom)
    }
}

impl ProviderConfig
{   pub fn openai(
      base_url: impl Into<String>
    , api_key: impl Into<String>
    ) -> Self
    {   ProviderConfig::OpenAi
        {   base_url: base_url.into()
          , api_key: api_key.into()
        }
    }

    pub fn ollama(host: impl Into<String>) -> Self
    {   ProviderConfig::Ollama { host: host.into() }
    }

    pub fn llamacpp(model_path: impl Into<PathBuf>) -> Self
    {   ProviderConfig::LlamaCpp
        {   model_path: model_path.into()
          , context_size: DEFAULT_CONTEXT_SIZE
          , gpu_layers: 0
        }
    }

    /// Config for one of the three API-key providers
    pub fn cloud(kind: ProviderKind, api_key: impl Into<String>)
      -> Result<Self, Error>
    {   let api_key = api_key.into();
        match kind
        {   ProviderKind::Anthropic => {
              Ok(ProviderConfig::Anthropic { api_key })
            }
          , ProviderKind::Gemini => {
              Ok(ProviderConfig::Gemini { api_key })
            }
          , ProviderKind::Groq => {
              Ok(ProviderConfig::Groq { api_key })
            }
          , other => {
              Err(Error::Configuration(format!(
                "{} is not an API-key provider", other
              )))
            }
        }
    }

    pub fn kind(&self) -> ProviderKind
    {   match self
        {   ProviderConfig::OpenAi { .. } => ProviderKind::OpenAi
          , ProviderConfig::Ollama { .. } => ProviderKind::Ollama
          , ProviderConfig::LlamaCpp { .. } => ProviderKind::LlamaCpp
          , ProviderConfig::Anthropic { .. } => ProviderKind::Anthropic
          , ProviderConfig::Gemini { .. } => ProviderKind::Gemini
          , ProviderConfig::Groq { .. } => ProviderKind::Groq
        }
    }

    /// Check that every field the variant needs is populated
    pub fn validate(&self) -> Result<(), Error>
    {   let kind = self.kind();
        let missing = |field: &str| {
          Error::Configuration(format!(
            "missing required field '{}' for provider {}",
            field, kind
          ))
        };

        match self
        {   ProviderConfig::OpenAi { base_url, api_key } => {
              if base_url.trim().is_empty()
              {   return Err(missing("base_url"));
              }
              if api_key.trim().is_empty()
              {   return Err(missing("api_key"));
              }
            }
          , ProviderConfig::Ollama { host } => {
              if host.trim().is_empty()
              {   return Err(missing("host"));
              }
            }
          , ProviderConfig::LlamaCpp {
              model_path, context_size, ..
            } => {
              if model_path.as_os_str().is_empty()
              {   return Err(missing("model_path"));
              }
              if *context_size == 0
              {   return Err(Error::Configuration(
                  "context_size must be greater than zero".to_string()
                ));
              }
            }
          , ProviderConfig::Anthropic { api_key }
          | ProviderConfig::Gemini { api_key }
          | ProviderConfig::Groq { api_key } => {
              if api_key.trim().is_empty()
              {   return Err(missing("api_key"));
              }
            }
        }
        Ok(())
    }
}

/// Retry configuration. Zero retries unless asked for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig
{   /// Extra attempts after the first failed generate
    #[serde(default)]
    pub max_retries: usize
  , /// Backoff multiplier for retries
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f32
  , /// Initial backoff duration in milliseconds
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64
}

fn default_backoff_multiplier() -> f32
{   2.0
}

fn default_initial_backoff_ms() -> u64
{   100
}

impl Default for RetryConfig
{   fn default() -> Self
    {   RetryConfig
        {   max_retries: 0
          , backoff_multiplier: default_backoff_multiplier()
          , initial_backoff_ms: default_initial_backoff_ms()
        }
    }
}

/// Optimizer configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizerConfig
{   /// Active provider
    pub provider: ProviderConfig
  , /// Sampling options for every optimize call
    #[serde(default)]
    pub options: GenerationOptions
  , /// Retry configuration
    #[serde(default)]
    pub retry: RetryConfig
}

impl OptimizerConfig
{   pub fn new(provider: ProviderConfig) -> Self
    {   OptimizerConfig
        {   provider
          , options: GenerationOptions::default()
          , retry: RetryConfig::default()
        }
    }

    /// Load and validate a JSON config file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, Error>
    {   let path = path.as_ref();
        debug!("Loading optimizer config from {}", path.display());
        let text = std::fs::read_to_string(path).map_err(|e| {
          Error::Configuration(format!(
            "cannot read {}: {}", path.display(), e
          ))
        })?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, Error>
    {   let config: OptimizerConfig = serde_json::from_str(text)
          .map_err(|e| Error::Configuration(e.to_string()))?;
        config.provider.validate()?;
        Ok(config)
    }
}

impl Default for OptimizerConfig
{   fn default() -> Self
    {   OptimizerConfig::new(ProviderConfig::openai(
          DEFAULT_OPENAI_BASE_URL,
          DEFAULT_OPENAI_API_KEY
        ))
    }
}

//! Identifier -> provider constructor mapping

use log::{debug, error};

use crate::ProviderKind;
use crate::config::ProviderConfig;
use crate::error::Error;
use super::{
  AnthropicProvider, GeminiProvider, GroqProvider, LlamaCppProvider,
  OllamaProvider, OpenAiProvider, Provider
};

/// Every provider kind, in lookup-table order
pub fn list_available() -> Vec<ProviderKind>
{   ProviderKind::all()
}

/// Build a provider from an identifier and its config.
///
/// Unknown identifiers, a config for another provider and missing
/// fields are configuration errors and construct nothing. The
/// `llamacpp` variant loads its model here and blocks.
pub fn create(identifier: &str, config: ProviderConfig)
  -> Result<Box<dyn Provider>, Error>
{   let kind = ProviderKind::from_identifier(identifier)
      .ok_or_else(|| {
        error!("Unknown provider type: {}", identifier);
        Error::Configuration(
          format!("Unknown provider type: {}", identifier)
        )
      })?;

    if config.kind() != kind
    {   return Err(Error::Configuration(format!(
          "provider '{}' given a config for '{}'",
          kind, config.kind()
        )));
    }

    create_from_config(config)
}

/// Build a provider from a config, using its own tag
pub fn create_from_config(config: ProviderConfig)
  -> Result<Box<dyn Provider>, Error>
{   config.validate()?;
    debug!("Creating provider: {}", config.kind());

    let provider: Box<dyn Provider> = match config
    {   ProviderConfig::OpenAi { base_url, api_key } => {
          Box::new(OpenAiProvider::new(base_url, api_key))
        }
      , ProviderConfig::Ollama { host } => {
          Box::new(OllamaProvider::new(host))
        }
      , ProviderConfig::LlamaCpp {
          model_path, context_size, gpu_layers
        } => {
          Box::new(LlamaCppProvider::load(
            model_path, context_size, gpu_layers
          )?)
        }
      , ProviderConfig::Anthropic { api_key } => {
          Box::new(AnthropicProvider::new(api_key))
        }
      , ProviderConfig::Gemini { api_key } => {
          Box::new(GeminiProvider::new(api_key))
        }
      , ProviderConfig::Groq { api_key } => {
          Box::new(GroqProvider::new(api_key))
        }
    };
    Ok(provider)
}

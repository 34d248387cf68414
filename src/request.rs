//! Unified request and response types for every provider

use serde::{Deserialize, Serialize};

pub const DEFAULT_TEMPERATURE: f32 = 0.7;
pub const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Sampling options passed through to the backend
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GenerationOptions
{   /// Temperature for sampling
    #[serde(default = "default_temperature")]
    pub temperature: f32
  , /// Max tokens to generate
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32
}

fn default_temperature() -> f32
{   DEFAULT_TEMPERATURE
}

fn default_max_tokens() -> u32
{   DEFAULT_MAX_TOKENS
}

impl Default for GenerationOptions
{   fn default() -> Self
    {   GenerationOptions
        {   temperature: DEFAULT_TEMPERATURE
          , max_tokens: DEFAULT_MAX_TOKENS
        }
    }
}

/// One single-turn completion request. Built per call, never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest
{   /// Instruction text sent in the backend's system slot
    pub system_prompt: String
  , /// The single user turn
    pub user_prompt: String
  , /// Model name as the backend knows it
    pub model_id: String
  , #[serde(default)]
    pub options: GenerationOptions
}

impl GenerationRequest
{   pub fn new(
      system_prompt: impl Into<String>
    , user_prompt: impl Into<String>
    , model_id: impl Into<String>
    ) -> Self
    {   GenerationRequest
        {   system_prompt: system_prompt.into()
          , user_prompt: user_prompt.into()
          , model_id: model_id.into()
          , options: GenerationOptions::default()
        }
    }

    pub fn with_options(mut self, options: GenerationOptions) -> Self
    {   self.options = options;
        self
    }
}

/// Provider reply
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationResult
{   /// Generated text, the only field used downstream
    pub content: String
  , /// Vendor payload kept for diagnostics
    pub raw: serde_json::Value
}

/// Chat message in the OpenAI-style shape shared by several backends
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage
{   pub role: String
  , pub content: String
}

impl ChatMessage
{   pub fn system(content: impl Into<String>) -> Self
    {   ChatMessage
        {   role: "system".to_string()
          , content: content.into()
        }
    }

    pub fn user(content: impl Into<String>) -> Self
    {   ChatMessage
        {   role: "user".to_string()
          , content: content.into()
        }
    }
}

/// System message followed by the single user turn
pub fn system_and_user(request: &GenerationRequest) -> Vec<ChatMessage>
{   vec![
      ChatMessage::system(request.system_prompt.clone())
    , ChatMessage::user(request.user_prompt.clone())
    ]
}

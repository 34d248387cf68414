pub mod error;
pub mod config;
pub mod request;
pub mod prompt;
pub mod parser;
pub mod providers;
pub mod retry;
pub mod optimizer;
pub mod client;
pub mod history;
pub mod credentials;
pub mod telemetry;
use serde::{Deserialize, Serialize};

pub use error::Error;
pub use config::{OptimizerConfig, ProviderConfig};
pub use request::{GenerationOptions, GenerationRequest, GenerationResult};
pub use prompt::{Element, OptimizeOutcome, OptimizedPrompt};
pub use providers::Provider;
pub use optimizer::Optimizer;
pub use client::OptimizerBackend;

/*

promptforge: one raw prompt in, one structured prompt out.
The rewriting is delegated to whichever LLM backend is
configured; the crate only owns the contract with the model
and the recovery of its answer.

promptforge/
├── Cargo.toml
├── src/
│   ├── lib.rs          # Provider table, backend channel API
│   ├── error.rs        # Crate error type
│   ├── config.rs       # Provider and optimizer configuration
│   ├── request.rs      # Generation request/response types
│   ├── prompt.rs       # Elements, system prompt, results
│   ├── parser.rs       # Model output -> OptimizedPrompt
│   ├── providers/      # One module per backend + registry
│   ├── retry.rs        # Opt-in retry policy
│   ├── optimizer.rs    # Request/response/parse cycle
│   ├── client.rs       # Background task owning an Optimizer
│   ├── history.rs      # Session history store
│   ├── credentials.rs  # API key store interface
│   ├── telemetry.rs    # Hardware stats interface
│   └── main.rs         # CLI
└── tests/

*/

/// PROMPTFORGE BACKEND INTERFACE:

// ===== Optimize =====

pub type OptimizeReply = crate::prompt::OptimizeOutcome;
pub type OptimizeReplySender
  = tokio::sync::mpsc::UnboundedSender<OptimizeReply>;

pub struct OptimizeArgs
{   pub raw_prompt: String
  , pub model: String
  , pub topic_group: String
  , pub reply: OptimizeReplySender
}

// ===== SetProvider =====

pub type SetProviderReply = Result<(), crate::error::Error>;
pub type SetProviderReplySender
  = tokio::sync::mpsc::UnboundedSender<SetProviderReply>;

pub struct SetProviderArgs
{   pub identifier: String
  , pub config: crate::config::ProviderConfig
  , pub reply: SetProviderReplySender
}

// ===== ListModels =====

pub type ListModelsReply = Vec<String>;
pub type ListModelsReplySender
  = tokio::sync::mpsc::UnboundedSender<ListModelsReply>;

pub struct ListModelsArgs
{   pub reply: ListModelsReplySender
}

// ===== CheckHealth =====

pub type CheckHealthReply = bool;
pub type CheckHealthReplySender
  = tokio::sync::mpsc::UnboundedSender<CheckHealthReply>;

pub struct CheckHealthArgs
{   pub reply: CheckHealthReplySender
}

// ===== KillProcess =====

pub type KillProcessReply = Result<(), crate::error::Error>;
pub type KillProcessReplySender
  = tokio::sync::mpsc::UnboundedSender<KillProcessReply>;

pub struct KillProcessArgs
{   pub reply: KillProcessReplySender
}

// ===== OptimizerHand (sender side) =====

pub struct OptimizerHand
{   pub optimize_tx
      : tokio::sync::mpsc::UnboundedSender<OptimizeArgs>
  , pub set_provider_tx
      : tokio::sync::mpsc::UnboundedSender<SetProviderArgs>
  , pub list_models_tx
      : tokio::sync::mpsc::UnboundedSender<ListModelsArgs>
  , pub check_health_tx
      : tokio::sync::mpsc::UnboundedSender<CheckHealthArgs>
  , pub kill_process_tx
      : tokio::sync::mpsc::UnboundedSender<KillProcessArgs>
}

// ===== OptimizerFoot (receiver side) =====

pub struct OptimizerFoot
{   pub optimize_rx
      : tokio::sync::mpsc::UnboundedReceiver<OptimizeArgs>
  , pub set_provider_rx
      : tokio::sync::mpsc::UnboundedReceiver<SetProviderArgs>
  , pub list_models_rx
      : tokio::sync::mpsc::UnboundedReceiver<ListModelsArgs>
  , pub check_health_rx
      : tokio::sync::mpsc::UnboundedReceiver<CheckHealthArgs>
  , pub kill_process_rx
      : tokio::sync::mpsc::UnboundedReceiver<KillProcessArgs>
}

/// PROMPTFORGE STRUCTURES:

/// Enum representing every supported LLM backend.
/// Each variant selects exactly one Provider implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind
{
  // ===== LOCAL =====
  /// Any OpenAI-compatible server (LM Studio, vLLM, llama-server)
  OpenAi
  ,
  /// Ollama daemon
  Ollama
  ,
  /// llama.cpp runtime embedded in this process
  LlamaCpp
  ,
  // ===== CLOUD =====
  /// Anthropic (Claude models)
  Anthropic
  ,
  /// Google (AI Studio: Gemini)
  Gemini
  ,
  /// Groq (hosted Llama, Mixtral)
  Groq
}

/// One row of the provider lookup table
#[derive(Debug, Clone, Copy)]
pub struct ProviderEntry
{   pub kind: ProviderKind
  , /// Canonical identifier used in configs and the registry
    pub identifier: &'static str
  , /// Label shown to users, also returned by `Provider::name`
    pub display_name: &'static str
  , /// Extra spellings accepted on lookup
    pub aliases: &'static [&'static str]
}

/// The single identifier/label table. Config parsing, the CLI
/// and the registry all resolve providers through it.
pub const PROVIDER_TABLE: [ProviderEntry; 6] =
[   ProviderEntry
    {   kind: ProviderKind::OpenAi
      , identifier: "openai"
      , display_name: "OpenAI / LM Studio"
      , aliases: &["openai-compatible", "lmstudio", "lm-studio"]
    }
  , ProviderEntry
    {   kind: ProviderKind::Ollama
      , identifier: "ollama"
      , display_name: "Ollama"
      , aliases: &[]
    }
  , ProviderEntry
    {   kind: ProviderKind::LlamaCpp
      , identifier: "llamacpp"
      , display_name: "Llama.cpp"
      , aliases: &["llama.cpp", "llama-cpp"]
    }
  , ProviderEntry
    {   kind: ProviderKind::Anthropic
      , identifier: "anthropic"
      , display_name: "Anthropic"
      , aliases: &["claude"]
    }
  , ProviderEntry
    {   kind: ProviderKind::Gemini
      , identifier: "gemini"
      , display_name: "Google Gemini"
      , aliases: &["google"]
    }
  , ProviderEntry
    {   kind: ProviderKind::Groq
      , identifier: "groq"
      , display_name: "Groq"
      , aliases: &[]
    }
];

impl ProviderKind
{   /// All kinds, in table order
    pub fn all() -> Vec<ProviderKind>
    {   PROVIDER_TABLE.iter().map(|e| e.kind).collect()
    }

    pub fn entry(&self) -> &'static ProviderEntry
    {   PROVIDER_TABLE.iter()
          .find(|e| e.kind == *self)
          .unwrap_or(&PROVIDER_TABLE[0])
    }

    pub fn identifier(&self) -> &'static str
    {   self.entry().identifier
    }

    pub fn display_name(&self) -> &'static str
    {   self.entry().display_name
    }

    /// Resolve an identifier, alias or display label (case-insensitive)
    pub fn from_identifier(name: &str) -> Option<ProviderKind>
    {   let wanted = name.trim();
        PROVIDER_TABLE.iter()
          .find(|e| {
            e.identifier.eq_ignore_ascii_case(wanted)
              || e.display_name.eq_ignore_ascii_case(wanted)
              || e.aliases.iter()
                   .any(|a| a.eq_ignore_ascii_case(wanted))
          })
          .map(|e| e.kind)
    }

    /// Whether the backend needs an API key
    pub fn is_cloud(&self) -> bool
    {   matches!(
          self,
          ProviderKind::Anthropic
            | ProviderKind::Gemini
            | ProviderKind::Groq
        )
    }
}

impl std::fmt::Display for ProviderKind
{   fn fmt(&self, f: &mut std::fmt::Formatter<'_>)
      -> std::fmt::Result
    {   write!(f, "{}", self.identifier())
    }
}

/// Accepts anything `from_identifier` does
impl<'de> Deserialize<'de> for ProviderKind
{   fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
      D: serde::Deserializer<'de>
    {   let name = String::deserialize(deserializer)?;
        ProviderKind::from_identifier(&name).ok_or_else(|| {
          <D::Error as serde::de::Error>::custom(
            format!("Unknown provider type: {}", name)
          )
        })
    }
}

impl std::str::FromStr for ProviderKind
{   type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {   ProviderKind::from_identifier(s).ok_or_else(|| {
          crate::error::Error::Configuration(
            format!("Unknown provider type: {}", s)
          )
        })
    }
}

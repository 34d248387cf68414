//! promptforge command line

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use clap::{Args, Parser, Subcommand};
use log::debug;
use serde::Serialize;

use promptforge::config::{
  OptimizerConfig, ProviderConfig, DEFAULT_CONTEXT_SIZE,
  DEFAULT_OLLAMA_HOST, DEFAULT_OPENAI_API_KEY, DEFAULT_OPENAI_BASE_URL
};
use promptforge::history::{
  HistoryStore, JsonHistoryStore, DEFAULT_HISTORY_LIMIT,
  DEFAULT_TOPIC_GROUP
};
use promptforge::{Optimizer, OptimizerBackend, ProviderKind, PROVIDER_TABLE};

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

#[derive(Parser)]
#[command(name = "promptforge", version, about = "Structure and optimize prompts with any LLM backend")]
struct Cli
{   #[command(subcommand)]
    command: Command
}

#[derive(Subcommand)]
enum Command
{   /// Rewrite a raw prompt into a structured one
    Optimize
    {   /// The raw prompt
        prompt: String
      , /// Model id understood by the backend
        #[arg(long, short)]
        model: String
      , /// Topic the session is filed under
        #[arg(long, default_value = DEFAULT_TOPIC_GROUP)]
        topic: String
      , /// Record the session in this history file
        #[arg(long)]
        history: Option<PathBuf>
      , #[command(flatten)]
        backend: BackendArgs
    }
  , /// List the models the backend offers
    Models
    {   #[command(flatten)]
        backend: BackendArgs
    }
  , /// Check the backend
    Health
    {   #[command(flatten)]
        backend: BackendArgs
    }
  , /// List supported providers
    Providers
  , /// Show recorded sessions
    History
    {   /// History file
        #[arg(long)]
        file: PathBuf
      , /// Show a single session
        #[arg(long)]
        id: Option<u64>
      , #[arg(long, default_value_t = DEFAULT_HISTORY_LIMIT)]
        limit: usize
    }
}

#[derive(Args)]
struct BackendArgs
{   /// JSON config file; overrides the flags below
    #[arg(long, env = "PROMPTFORGE_CONFIG")]
    config: Option<PathBuf>
  , /// Provider identifier or display name
    #[arg(long, short, env = "PROMPTFORGE_PROVIDER", default_value = "openai")]
    provider: String
  , /// OpenAI-compatible base URL
    #[arg(long, env = "OPENAI_BASE_URL", default_value = DEFAULT_OPENAI_BASE_URL)]
    base_url: String
  , /// Ollama host
    #[arg(long, env = "OLLAMA_HOST", default_value = DEFAULT_OLLAMA_HOST)]
    host: String
  , /// API key (otherwise read from <PROVIDER>_API_KEY)
    #[arg(long)]
    api_key: Option<String>
  , /// GGUF file for llamacpp
    #[arg(long, env = "LLAMACPP_MODEL_PATH")]
    model_path: Option<PathBuf>
  , #[arg(long, default_value_t = DEFAULT_CONTEXT_SIZE)]
    context_size: u32
  , #[arg(long, default_value_t = 0)]
    gpu_layers: u32
  , #[arg(long)]
    temperature: Option<f32>
  , #[arg(long)]
    max_tokens: Option<u32>
  , /// Retry failed generations this many times
    #[arg(long)]
    retries: Option<usize>
}

impl BackendArgs
{   fn api_key(&self, kind: ProviderKind) -> Option<String>
    {   self.api_key.clone().or_else(|| {
          let var = format!("{}_API_KEY", kind.identifier().to_uppercase());
          std::env::var(var).ok()
        })
    }

    fn provider_config(&self, kind: ProviderKind)
      -> CliResult<ProviderConfig>
    {   let config = match kind
        {   ProviderKind::OpenAi => ProviderConfig::openai(
              self.base_url.clone(),
              self.api_key(kind)
                .unwrap_or_else(|| DEFAULT_OPENAI_API_KEY.to_string())
            )
          , ProviderKind::Ollama => ProviderConfig::ollama(self.host.clone())
          , ProviderKind::LlamaCpp => ProviderConfig::LlamaCpp
            {   model_path: self.model_path.clone()
                  .ok_or("--model-path is required for llamacpp")?
              , context_size: self.context_size
              , gpu_layers: self.gpu_layers
            }
          , cloud => ProviderConfig::cloud(
              cloud,
              self.api_key(cloud).unwrap_or_default()
            )?
        };
        Ok(config)
    }

    fn optimizer_config(&self) -> CliResult<OptimizerConfig>
    {   let mut config = match &self.config
        {   Some(path) => OptimizerConfig::from_file(path)?
          , None => {
              let kind: ProviderKind = self.provider.parse()?;
              OptimizerConfig::new(self.provider_config(kind)?)
            }
        };
        if let Some(t) = self.temperature
        {   config.options.temperature = t;
        }
        if let Some(n) = self.max_tokens
        {   config.options.max_tokens = n;
        }
        if let Some(r) = self.retries
        {   config.retry.max_retries = r;
        }
        Ok(config)
    }

    /// Model loading for llamacpp blocks, keep it off the runtime
    async fn build(&self) -> CliResult<Optimizer>
    {   let config = self.optimizer_config()?;
        debug!("Building optimizer for {}", config.provider.kind());
        let optimizer = tokio::task::spawn_blocking(move || {
          Optimizer::from_config(&config)
        }).await??;
        Ok(optimizer)
    }
}

fn print_json<T: Serialize>(value: &T) -> CliResult<()>
{   println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[derive(Serialize)]
struct ProviderRow
{   identifier: &'static str
  , display_name: &'static str
}

async fn run(cli: Cli) -> CliResult<ExitCode>
{   match cli.command
    {   Command::Optimize { prompt, model, topic, history, backend } => {
          let optimizer = backend.build().await?;
          let store: Option<Arc<dyn HistoryStore>> = match history
          {   Some(path) => Some(Arc::new(JsonHistoryStore::open(path)?))
            , None => None
          };
          let service = OptimizerBackend::new(optimizer, store);
          let mut reply = service.optimize(prompt, model, topic)?;
          let outcome = reply.recv().await
            .ok_or("optimizer backend stopped")?;
          service.shutdown().await?;

          print_json(&outcome)?;
          Ok(if outcome.is_error() { ExitCode::FAILURE } else { ExitCode::SUCCESS })
        }
      , Command::Models { backend } => {
          let optimizer = backend.build().await?;
          print_json(&optimizer.list_models().await)?;
          Ok(ExitCode::SUCCESS)
        }
      , Command::Health { backend } => {
          let optimizer = backend.build().await?;
          let healthy = optimizer.check_health().await;
          print_json(&serde_json::json!({
            "provider": optimizer.provider_name(),
            "healthy": healthy
          }))?;
          Ok(if healthy { ExitCode::SUCCESS } else { ExitCode::FAILURE })
        }
      , Command::Providers => {
          let rows: Vec<ProviderRow> = PROVIDER_TABLE.iter()
            .map(|e| ProviderRow
              {   identifier: e.identifier
                , display_name: e.display_name
              })
            .collect();
          print_json(&rows)?;
          Ok(ExitCode::SUCCESS)
        }
      , Command::History { file, id, limit } => {
          let store = JsonHistoryStore::open(file)?;
          match id
          {   Some(id) => match store.get_session(id)?
              {   Some(session) => print_json(&session)?
                , None => {
                    eprintln!("no session with id {}", id);
                    return Ok(ExitCode::FAILURE);
                  }
              }
            , None => print_json(&store.get_history(limit)?)?
          }
          Ok(ExitCode::SUCCESS)
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode
{   env_logger::init();
    match run(Cli::parse()).await
    {   Ok(code) => code
      , Err(e) => {
          eprintln!("error: {}", e);
          ExitCode::FAILURE
        }
    }
}

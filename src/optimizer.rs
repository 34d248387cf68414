//! One raw prompt in, one structured prompt out.

use std::sync::Arc;
use log::{debug, error, info, warn};

use crate::ProviderKind;
use crate::config::{OptimizerConfig, ProviderConfig};
use crate::error::Error;
use crate::parser;
use crate::prompt::{self, OptimizeOutcome};
use crate::providers::{self, Provider};
use crate::request::{GenerationOptions, GenerationRequest, GenerationResult};
use crate::retry::RetryPolicy;

/// Owns the active provider and the fixed system prompt.
/// Clones share the provider.
#[derive(Clone)]
pub struct Optimizer
{   provider: Arc<dyn Provider>
  , options: GenerationOptions
  , retry: RetryPolicy
}

impl Optimizer
{   /// Build from an identifier and config. Construction errors
    /// (bad config, missing model file) are returned as-is.
    pub fn new(identifier: &str, config: ProviderConfig)
      -> Result<Self, Error>
    {   let provider = providers::create(identifier, config)?;
        Ok(Self::with_provider(provider))
    }

    pub fn from_config(config: &OptimizerConfig) -> Result<Self, Error>
    {   let provider = providers::create_from_config(
          config.provider.clone()
        )?;
        Ok(
          Self::with_provider(provider)
            .with_options(config.options)
            .with_retry(RetryPolicy::from(&config.retry))
        )
    }

    /// Use an already constructed provider
    pub fn with_provider(provider: Box<dyn Provider>) -> Self
    {   debug!("Optimizer using provider: {}", provider.name());
        Optimizer
        {   provider: Arc::from(provider)
          , options: GenerationOptions::default()
          , retry: RetryPolicy::none()
        }
    }

    pub fn with_options(mut self, options: GenerationOptions) -> Self
    {   self.options = options;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self
    {   self.retry = retry;
        self
    }

    /// Swap the backend. On error the current provider stays.
    pub fn set_provider(
      &mut self
    , identifier: &str
    , config: ProviderConfig
    ) -> Result<(), Error>
    {   let provider = providers::create(identifier, config)?;
        self.replace_provider(provider);
        Ok(())
    }

    pub fn replace_provider(&mut self, provider: Box<dyn Provider>)
    {   info!(
          "Switching provider: {} -> {}",
          self.provider.name(), provider.name()
        );
        self.provider = Arc::from(provider);
    }

    /// Shared handle for calls that may run beside a generation
    pub fn provider(&self) -> Arc<dyn Provider>
    {   Arc::clone(&self.provider)
    }

    pub fn provider_name(&self) -> &str
    {   self.provider.name()
    }

    pub fn provider_kind(&self) -> ProviderKind
    {   self.provider.kind()
    }

    pub fn system_prompt(&self) -> &'static str
    {   prompt::SYSTEM_PROMPT
    }

    /// Run one optimize cycle. Provider failures come back as
    /// `OptimizeOutcome::Error`; parse failures as a degraded prompt.
    pub async fn optimize(&self, raw_prompt: &str, model: &str)
      -> OptimizeOutcome
    {   let request = GenerationRequest::new(
          prompt::SYSTEM_PROMPT,
          prompt::user_prompt(raw_prompt),
          model
        ).with_options(self.options);

        match self.generate_with_retry(&request).await
        {   Ok(result) => {
              let (parsed, stage) = parser::parse_with_stage(&result.content);
              debug!("Optimize finished via {:?}", stage);
              OptimizeOutcome::Optimized(parsed)
            }
          , Err(e) => {
              error!("Optimization failed: {}", e);
              OptimizeOutcome::error(format!("Optimization Error: {}", e))
            }
        }
    }

    async fn generate_with_retry(&self, request: &GenerationRequest)
      -> Result<GenerationResult, Error>
    {   let mut retries = 0;
        loop
        {   match self.provider.generate(request).await
            {   Ok(result) => return Ok(result)
              , Err(Error::Upstream(msg))
                  if self.retry.allows_retry(retries) => {
                  let wait = self.retry.backoff_for_attempt(retries);
                  warn!(
                    "Generate failed ({}), retrying in {:?}",
                    msg, wait
                  );
                  tokio::time::sleep(wait).await;
                  retries += 1;
                }
              , Err(e) => return Err(e)
            }
        }
    }

    /// Never fails; see `Provider::list_models`
    pub async fn list_models(&self) -> Vec<String>
    {   self.provider.list_models().await
    }

    pub async fn check_health(&self) -> bool
    {   self.provider.check_health().await
    }
}

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use log::{debug, error, info, warn};

use crate::OptimizerFoot;
use crate::config::ProviderConfig;
use crate::history::{self, HistoryStore};
use crate::optimizer::Optimizer;
use crate::prompt::OptimizedPrompt;
use crate::providers;

/// Backend state owned by the background task
pub struct OptimizerBackendState
{   pub optimizer: Optimizer
  , pub history: Option<Arc<dyn HistoryStore>>
  , /// Most recently queued optimize; the next one waits for it
    pending: Option<JoinHandle<()>>
}

impl OptimizerBackendState
{   pub fn new(
      optimizer: Optimizer
    , history: Option<Arc<dyn HistoryStore>>
    ) -> Self
    {   debug!(
          "Initializing OptimizerBackendState with {}",
          optimizer.provider_name()
        );
        OptimizerBackendState
        {   optimizer
          , history
          , pending: None
        }
    }

    /// Run the optimize on its own task so health and model queries
    /// are not stuck behind it. Uses the provider active when the
    /// command arrived.
    fn spawn_optimize(&mut self, cmd: crate::OptimizeArgs)
    {   let optimizer = self.optimizer.clone();
        let history = self.history.clone();
        let previous = self.pending.take();

        self.pending = Some(tokio::spawn(async move {
          if let Some(previous) = previous
          {   let _ = previous.await;
          }
          let outcome = optimizer
            .optimize(&cmd.raw_prompt, &cmd.model)
            .await;

          if let (Some(store), Some(prompt)) = (history, outcome.prompt())
          {   record_session(
                store,
                cmd.raw_prompt.clone(),
                prompt.clone(),
                cmd.topic_group.clone()
              ).await;
          }
          let _ = cmd.reply.send(outcome);
        }));
    }

    /// Provider construction can block (llama.cpp model load),
    /// so it runs on the blocking pool.
    async fn handle_set_provider(
      &mut self
    , identifier: String
    , config: ProviderConfig
    ) -> crate::SetProviderReply
    {   let provider = tokio::task::spawn_blocking(move || {
          providers::create(&identifier, config)
        })
        .await
        .map_err(|e| {
          error!("Provider construction task failed: {}", e);
          crate::error::Error::Initialization(e.to_string())
        })??;
        self.optimizer.replace_provider(provider);
        Ok(())
    }

    /// Wait until every queued generation has finished
    async fn drain(&mut self)
    {   if let Some(last) = self.pending.take()
        {   if let Err(e) = last.await
            {   error!("Optimize task failed: {}", e);
            }
        }
    }
}

/// History stores do file I/O; keep it off the runtime workers.
/// Failures are logged only.
async fn record_session(
  store: Arc<dyn HistoryStore>
, raw_prompt: String
, prompt: OptimizedPrompt
, topic_group: String
)
{   let written = tokio::task::spawn_blocking(move || {
      history::record(store.as_ref(), &raw_prompt, &prompt, &topic_group)
    }).await;
    match written
    {   Ok(Ok(id)) => debug!("Recorded session {}", id)
      , Ok(Err(e)) => error!("History error: {}", e)
      , Err(e) => error!("History task failed: {}", e)
    }
}

/// Public API for the optimizer backend - owns the task
pub struct OptimizerBackend
{   hand: crate::OptimizerHand
  , _task_handle: tokio::task::JoinHandle<()>
}

impl OptimizerBackend
{   /// Create and spawn a new backend around an optimizer.
    /// Returns immediately - spawns background task.
    pub fn new(
      optimizer: Optimizer
    , history: Option<Arc<dyn HistoryStore>>
    ) -> Self
    {   debug!("Creating OptimizerBackend with task ownership");

        let (optimize_tx, optimize_rx)
          = mpsc::unbounded_channel();
        let (set_provider_tx, set_provider_rx)
          = mpsc::unbounded_channel();
        let (list_models_tx, list_models_rx)
          = mpsc::unbounded_channel();
        let (check_health_tx, check_health_rx)
          = mpsc::unbounded_channel();
        let (kill_process_tx, kill_process_rx)
          = mpsc::unbounded_channel();

        let hand = crate::OptimizerHand
        {   optimize_tx
          , set_provider_tx
          , list_models_tx
          , check_health_tx
          , kill_process_tx
        };

        let foot = crate::OptimizerFoot
        {   optimize_rx
          , set_provider_rx
          , list_models_rx
          , check_health_rx
          , kill_process_rx
        };

        let state = OptimizerBackendState::new(optimizer, history);
        let _task_handle = tokio::spawn(async move {
          run_backend_loop(foot, state).await
        });

        OptimizerBackend
        {   hand
          , _task_handle
        }
    }

    fn disconnected() -> crate::error::Error
    {   error!("Backend channel closed");
        crate::error::Error::Disconnected(
          "Backend disconnected".to_string()
        )
    }

    /// Queue an optimization - returns almost immediately
    pub fn optimize(
      &self
    , raw_prompt: impl Into<String>
    , model: impl Into<String>
    , topic_group: impl Into<String>
    ) -> Result<
        mpsc::UnboundedReceiver<crate::OptimizeReply>,
        crate::error::Error
      >
    {   let (reply_tx, reply_rx)
          = mpsc::unbounded_channel();

        let cmd = crate::OptimizeArgs
        {   raw_prompt: raw_prompt.into()
          , model: model.into()
          , topic_group: topic_group.into()
          , reply: reply_tx
        };
        debug!("optimize queuing command for model: {}", cmd.model);

        self.hand.optimize_tx
          .send(cmd)
          .map_err(|_| Self::disconnected())?;

        Ok(reply_rx)
    }

    /// Queue a provider switch - returns almost immediately
    pub fn set_provider(
      &self
    , identifier: impl Into<String>
    , config: ProviderConfig
    ) -> Result<
        mpsc::UnboundedReceiver<crate::SetProviderReply>,
        crate::error::Error
      >
    {   let (reply_tx, reply_rx)
          = mpsc::unbounded_channel();

        let cmd = crate::SetProviderArgs
        {   identifier: identifier.into()
          , config
          , reply: reply_tx
        };
        debug!("set_provider queuing: {}", cmd.identifier);

        self.hand.set_provider_tx
          .send(cmd)
          .map_err(|_| Self::disconnected())?;

        Ok(reply_rx)
    }

    /// Queue a model listing - returns almost immediately
    pub fn list_models(
      &self
    ) -> Result<
        mpsc::UnboundedReceiver<crate::ListModelsReply>,
        crate::error::Error
      >
    {   debug!("list_models queuing command");
        let (reply_tx, reply_rx)
          = mpsc::unbounded_channel();

        self.hand.list_models_tx
          .send(crate::ListModelsArgs { reply: reply_tx })
          .map_err(|_| Self::disconnected())?;

        Ok(reply_rx)
    }

    /// Queue a health check - returns almost immediately
    pub fn check_health(
      &self
    ) -> Result<
        mpsc::UnboundedReceiver<crate::CheckHealthReply>,
        crate::error::Error
      >
    {   debug!("check_health queuing command");
        let (reply_tx, reply_rx)
          = mpsc::unbounded_channel();

        self.hand.check_health_tx
          .send(crate::CheckHealthArgs { reply: reply_tx })
          .map_err(|_| Self::disconnected())?;

        Ok(reply_rx)
    }

    /// Gracefully shutdown the backend
    pub async fn shutdown(self)
      -> Result<(), crate::error::Error>
    {   debug!("Shutting down OptimizerBackend");
        let (reply_tx, mut reply_rx)
          = mpsc::unbounded_channel();

        self.hand.kill_process_tx
          .send(crate::KillProcessArgs { reply: reply_tx })
          .map_err(|_| Self::disconnected())?;

        // Wait for shutdown confirmation
        if let Some(result) = reply_rx.recv().await
        {   debug!("Backend shutdown confirmed");
            result
        } else
        {   Err(Self::disconnected())
        }
    }
}

/// Main backend event loop
///
/// Optimize commands run on spawned tasks chained in arrival order,
/// so at most one generation is in flight. Model listing and
/// health checks are answered beside it from a shared provider handle.
/// Provider switches are handled in the loop and apply to commands
/// received after them.
async fn run_backend_loop(
  foot: OptimizerFoot
, mut state: OptimizerBackendState
)
{   debug!("Starting OptimizerBackend event loop");
    let OptimizerFoot
    {   mut optimize_rx
      , mut set_provider_rx
      , mut list_models_rx
      , mut check_health_rx
      , mut kill_process_rx
    } = foot;

    loop
    { // biased: commands already queued are taken before KillProcess
      tokio::select!
      { biased;
        Some(cmd) = optimize_rx.recv() => {
          debug!("Received Optimize for model: {}", cmd.model);
          state.spawn_optimize(cmd);
        }
      , Some(cmd) = set_provider_rx.recv() => {
          debug!("Received SetProvider: {}", cmd.identifier);
          let result = state
            .handle_set_provider(cmd.identifier, cmd.config)
            .await;
          if let Err(e) = &result
          {   warn!("Provider switch rejected: {}", e);
          }
          let _ = cmd.reply.send(result);
        }
      , Some(cmd) = list_models_rx.recv() => {
          debug!("Received ListModels");
          let provider = state.optimizer.provider();
          tokio::spawn(async move {
            let _ = cmd.reply.send(provider.list_models().await);
          });
        }
      , Some(cmd) = check_health_rx.recv() => {
          debug!("Received CheckHealth");
          let provider = state.optimizer.provider();
          tokio::spawn(async move {
            let _ = cmd.reply.send(provider.check_health().await);
          });
        }
      , Some(cmd) = kill_process_rx.recv() => {
          debug!("Received KillProcess");
          state.drain().await;
          let _ = cmd.reply.send(Ok(()));
          info!("OptimizerBackend shutting down");
          break;
        }
      , else => {
          debug!("All command channels closed");
          break;
        }
      }
    }
}

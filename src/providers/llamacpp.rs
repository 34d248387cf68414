//! llama.cpp running inside this process.
//!
//! Construction loads the whole model file and blocks for as long as
//! that takes; call it from a blocking context. Generation is CPU/GPU
//! bound and runs on tokio's blocking pool.
//!
//! The runtime itself sits behind [`LocalEngine`]. The llama.cpp engine
//! is compiled in with the `llamacpp` feature.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use async_trait::async_trait;
use log::{debug, error, info};

use crate::ProviderKind;
use crate::error::Error;
use crate::request::{
  system_and_user, ChatMessage, GenerationOptions, GenerationRequest,
  GenerationResult
};

/// A loaded local model that can complete a chat synchronously
pub trait LocalEngine: Send + Sync
{   fn complete(
      &self
    , messages: &[ChatMessage]
    , options: &GenerationOptions
    ) -> Result<GenerationResult, Error>;
}

pub struct LlamaCppProvider
{   model_path: PathBuf
  , engine: Arc<dyn LocalEngine>
}

impl LlamaCppProvider
{   /// Load a GGUF model. Blocking.
    ///
    /// Fails with `ModelNotFound` when the file is missing and with
    /// `Initialization` when the runtime cannot load it or allocate
    /// the requested context.
    pub fn load(
      model_path: impl Into<PathBuf>
    , context_size: u32
    , gpu_layers: u32
    ) -> Result<Self, Error>
    {   let model_path = model_path.into();
        if !model_path.is_file()
        {   error!("Model file not found: {}", model_path.display());
            return Err(Error::ModelNotFound(
              model_path.display().to_string()
            ));
        }

        info!(
          "Loading {} (n_ctx={}, gpu_layers={})",
          model_path.display(), context_size, gpu_layers
        );
        let engine = load_engine(&model_path, context_size, gpu_layers)?;
        Ok(LlamaCppProvider { model_path, engine })
    }

    /// Wrap an engine that is already loaded
    pub fn with_engine(
      model_path: impl Into<PathBuf>
    , engine: Arc<dyn LocalEngine>
    ) -> Self
    {   LlamaCppProvider
        {   model_path: model_path.into()
          , engine
        }
    }

    pub fn model_path(&self) -> &Path
    {   &self.model_path
    }

    fn model_file_name(&self) -> String
    {   self.model_path
          .file_name()
          .map(|n| n.to_string_lossy().into_owned())
          .unwrap_or_else(|| self.model_path.display().to_string())
    }
}

#[async_trait]
impl super::Provider for LlamaCppProvider
{   /// The model id is ignored: the loaded file is the model.
    async fn generate(&self, request: &GenerationRequest)
      -> Result<GenerationResult, Error>
    {   debug!("llama.cpp generation with {}", self.model_file_name());
        let engine = Arc::clone(&self.engine);
        let messages = system_and_user(request);
        let options = request.options;

        tokio::task::spawn_blocking(move || {
          engine.complete(&messages, &options)
        })
        .await
        .map_err(|e| {
          error!("llama.cpp worker failed: {}", e);
          Error::Upstream(e.to_string())
        })?
    }

    async fn list_models(&self) -> Vec<String>
    {   vec![self.model_file_name()]
    }

    /// Engine loaded means ready.
    async fn check_health(&self) -> bool
    {   true
    }

    fn name(&self) -> &str
    {   ProviderKind::LlamaCpp.display_name()
    }

    fn kind(&self) -> ProviderKind
    {   ProviderKind::LlamaCpp
    }
}

#[cfg(not(feature = "llamacpp"))]
fn load_engine(_path: &Path, _context_size: u32, _gpu_layers: u32)
  -> Result<Arc<dyn LocalEngine>, Error>
{   Err(Error::Initialization(
      "this build does not include the llama.cpp runtime \
       (enable the `llamacpp` feature)".to_string()
    ))
}

#[cfg(feature = "llamacpp")]
fn load_engine(path: &Path, context_size: u32, gpu_layers: u32)
  -> Result<Arc<dyn LocalEngine>, Error>
{   let engine = engine::LlamaEngine::load(path, context_size, gpu_layers)?;
    Ok(Arc::new(engine))
}

/// Position after which decoding stops: the prompt plus the token
/// budget, capped by the context window
#[cfg_attr(not(feature = "llamacpp"), allow(dead_code))]
fn generation_limit(prompt_tokens: i32, max_tokens: u32, n_ctx: i32) -> i32
{   let budget = i32::try_from(max_tokens).unwrap_or(i32::MAX);
    prompt_tokens.saturating_add(budget).min(n_ctx)
}

#[cfg(feature = "llamacpp")]
mod engine
{   use std::num::NonZeroU32;
    use std::path::Path;
    use std::sync::{Mutex, OnceLock};
    use log::{debug, trace};
    use llama_cpp_2::context::params::LlamaContextParams;
    use llama_cpp_2::llama_backend::LlamaBackend;
    use llama_cpp_2::llama_batch::LlamaBatch;
    use llama_cpp_2::model::params::LlamaModelParams;
    use llama_cpp_2::model::{AddBos, LlamaChatMessage, LlamaModel, Special};
    use llama_cpp_2::sampling::LlamaSampler;

    use crate::error::Error;
    use crate::request::{ChatMessage, GenerationOptions, GenerationResult};

    // llama.cpp allows a single backend per process
    static BACKEND: OnceLock<Result<LlamaBackend, String>> = OnceLock::new();

    fn backend() -> Result<&'static LlamaBackend, Error>
    {   BACKEND
          .get_or_init(|| LlamaBackend::init().map_err(|e| e.to_string()))
          .as_ref()
          .map_err(|e| Error::Initialization(e.clone()))
    }

    fn upstream(e: impl std::fmt::Display) -> Error
    {   Error::Upstream(e.to_string())
    }

    pub struct LlamaEngine
    {   model: LlamaModel
      , context_size: u32
      , file_name: String
      , // one decode at a time per model
        lock: Mutex<()>
    }

    impl LlamaEngine
    {   pub fn load(path: &Path, context_size: u32, gpu_layers: u32)
          -> Result<Self, Error>
        {   let backend = backend()?;
            let params = LlamaModelParams::default()
              .with_n_gpu_layers(gpu_layers);
            let model = LlamaModel::load_from_file(backend, path, &params)
              .map_err(|e| Error::Initialization(e.to_string()))?;

            // allocate once up front so a context that does not fit
            // fails here and not on the first request
            let ctx_params = LlamaContextParams::default()
              .with_n_ctx(NonZeroU32::new(context_size));
            drop(
              model.new_context(backend, ctx_params)
                .map_err(|e| Error::Initialization(e.to_string()))?
            );

            let file_name = path.file_name()
              .map(|n| n.to_string_lossy().into_owned())
              .unwrap_or_default();
            debug!("Loaded {}", file_name);

            Ok(LlamaEngine
            {   model
              , context_size
              , file_name
              , lock: Mutex::new(())
            })
        }
    }

    impl super::LocalEngine for LlamaEngine
    {   fn complete(
          &self
        , messages: &[ChatMessage]
        , options: &GenerationOptions
        ) -> Result<GenerationResult, Error>
        {   let _guard = self.lock.lock()
              .map_err(|_| upstream("llama.cpp engine lock poisoned"))?;
            let backend = backend()?;

            let chat = messages.iter()
              .map(|m| LlamaChatMessage::new(m.role.clone(), m.content.clone()))
              .collect::<Result<Vec<_>, _>>()
              .map_err(upstream)?;
            let template = self.model.chat_template(None).map_err(upstream)?;
            let prompt = self.model
              .apply_chat_template(&template, &chat, true)
              .map_err(upstream)?;
            let tokens = self.model
              .str_to_token(&prompt, AddBos::Always)
              .map_err(upstream)?;
            trace!("Prompt is {} tokens", tokens.len());

            let n_ctx = self.context_size as i32;
            if tokens.len() as i32 >= n_ctx
            {   return Err(Error::Upstream(format!(
                  "prompt of {} tokens does not fit context of {}",
                  tokens.len(), n_ctx
                )));
            }

            let ctx_params = LlamaContextParams::default()
              .with_n_ctx(NonZeroU32::new(self.context_size));
            let mut ctx = self.model
              .new_context(backend, ctx_params)
              .map_err(upstream)?;

            let mut batch = LlamaBatch::new(tokens.len().max(512), 1);
            let last = tokens.len() as i32 - 1;
            for (i, token) in (0_i32..).zip(tokens.iter())
            {   batch.add(*token, i, &[0], i == last).map_err(upstream)?;
            }
            ctx.decode(&mut batch).map_err(upstream)?;

            let mut sampler = if options.temperature <= 0.0
            {   LlamaSampler::greedy()
            } else
            {   LlamaSampler::chain_simple([
                  LlamaSampler::temp(options.temperature)
                , LlamaSampler::dist(rand_seed())
                ])
            };

            let mut n_cur = batch.n_tokens();
            let limit = super::generation_limit(n_cur, options.max_tokens, n_ctx);
            let mut output: Vec<u8> = Vec::new();
            let mut generated = 0usize;

            while n_cur < limit
            {   let token = sampler.sample(&ctx, batch.n_tokens() - 1);
                sampler.accept(token);
                if self.model.is_eog_token(token)
                {   break;
                }
                let piece = self.model
                  .token_to_bytes(token, Special::Tokenize)
                  .map_err(upstream)?;
                output.extend_from_slice(&piece);
                generated += 1;

                batch.clear();
                batch.add(token, n_cur, &[0], true).map_err(upstream)?;
                n_cur += 1;
                ctx.decode(&mut batch).map_err(upstream)?;
            }

            let content = String::from_utf8_lossy(&output).into_owned();
            debug!("Generated {} tokens", generated);

            let raw = serde_json::json!({
              "model": self.file_name,
              "usage": {
                "prompt_tokens": tokens.len(),
                "completion_tokens": generated
              },
              "choices": [{
                "message": { "role": "assistant", "content": content }
              }]
            });
            Ok(GenerationResult { content, raw })
        }
    }

    fn rand_seed() -> u32
    {   std::time::SystemTime::now()
          .duration_since(std::time::UNIX_EPOCH)
          .map(|d| d.subsec_nanos())
          .unwrap_or(1234)
    }
}

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use async_trait::async_trait;
use tokio::sync::Notify;
use tokio_test::{assert_err, assert_ok};

use promptforge::config::ProviderConfig;
use promptforge::history::{
  HistoryStore, JsonHistoryStore, MemoryHistoryStore, PromptSession
};
use promptforge::providers::Provider;
use promptforge::{
  Element, Error, GenerationRequest, GenerationResult, Optimizer,
  OptimizerBackend, ProviderKind
};

/// Answers every request with a canned body and counts calls
struct ScriptedProvider
{   reply: Result<String, Error>
  , calls: Arc<AtomicUsize>
}

#[async_trait]
impl Provider for ScriptedProvider
{   async fn generate(&self, request: &GenerationRequest)
      -> Result<GenerationResult, Error>
    {   self.calls.fetch_add(1, Ordering::SeqCst);
        assert!(request.user_prompt.starts_with("Optimize this prompt:\n\n"));
        self.reply.clone().map(|content| GenerationResult
        {   content
          , raw: serde_json::Value::Null
        })
    }

    async fn list_models(&self) -> Vec<String>
    {   vec!["scripted-1".to_string()]
    }

    async fn check_health(&self) -> bool
    {   true
    }

    fn name(&self) -> &str
    {   "Scripted"
    }

    fn kind(&self) -> ProviderKind
    {   ProviderKind::OpenAi
    }
}

fn scripted(reply: Result<&str, Error>) -> (Optimizer, Arc<AtomicUsize>)
{   let calls = Arc::new(AtomicUsize::new(0));
    let provider = ScriptedProvider
    {   reply: reply.map(str::to_string)
      , calls: calls.clone()
    };
    (Optimizer::with_provider(Box::new(provider)), calls)
}

const GOOD_REPLY: &str = r#"{
  "elements": {"persona": "a travel agent", "instruction": "plan a trip", "tone": null},
  "final_prompt": "As a travel agent, plan a three day trip."
}"#;

#[tokio::test]
async fn test_backend_records_successful_sessions()
{   let _ = env_logger::builder().is_test(true).try_init();
    let (optimizer, calls) = scripted(Ok(GOOD_REPLY));
    let store = Arc::new(MemoryHistoryStore::new());
    let backend = OptimizerBackend::new(
      optimizer,
      Some(store.clone() as Arc<dyn HistoryStore>)
    );

    let mut reply = assert_ok!(backend.optimize("trip plz", "m", "Travel"));
    let outcome = reply.recv().await.unwrap();
    let prompt = outcome.prompt().expect("optimized");
    assert_eq!(prompt.element(Element::Persona), Some("a travel agent"));
    assert_eq!(prompt.element(Element::Tone), None);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let history = assert_ok!(store.get_history(10));
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].topic_group, "Travel");
    assert_eq!(history[0].raw_prompt, "trip plz");
    assert_eq!(
      history[0].structured_elements.get("instruction").map(String::as_str),
      Some("plan a trip")
    );

    assert_ok!(backend.shutdown().await);
}

#[tokio::test]
async fn test_backend_does_not_record_errors()
{   let (optimizer, _) = scripted(Err(Error::Upstream("quota".to_string())));
    let store = Arc::new(MemoryHistoryStore::new());
    let backend = OptimizerBackend::new(
      optimizer,
      Some(store.clone() as Arc<dyn HistoryStore>)
    );

    let mut reply = assert_ok!(backend.optimize("x", "m", "General"));
    let outcome = reply.recv().await.unwrap();
    assert_eq!(outcome.error_message(), Some("Optimization Error: quota"));
    assert!(assert_ok!(store.get_history(10)).is_empty());

    assert_ok!(backend.shutdown().await);
}

#[tokio::test]
async fn test_backend_fallback_is_still_a_success()
{   let (optimizer, _) = scripted(Ok("Sure! Make it shorter."));
    let backend = OptimizerBackend::new(optimizer, None);

    let mut reply = assert_ok!(backend.optimize("raw", "m", "General"));
    let outcome = reply.recv().await.unwrap();
    let prompt = outcome.prompt().expect("fallback prompt");
    assert!(prompt.is_degraded());
    assert_eq!(prompt.final_prompt, "Sure! Make it shorter.");

    assert_ok!(backend.shutdown().await);
}

#[tokio::test]
async fn test_backend_queries_and_provider_switch()
{   let (optimizer, _) = scripted(Ok(GOOD_REPLY));
    let backend = OptimizerBackend::new(optimizer, None);

    let mut models = assert_ok!(backend.list_models());
    assert_eq!(models.recv().await.unwrap(), vec!["scripted-1"]);
    let mut health = assert_ok!(backend.check_health());
    assert!(health.recv().await.unwrap());

    // Rejected switch keeps the scripted provider
    let mut switched = assert_ok!(backend.set_provider(
      "nope",
      ProviderConfig::ollama("http://localhost:11434")
    ));
    let result = switched.recv().await.unwrap();
    assert!(matches!(result, Err(Error::Configuration(_))));
    let mut models = assert_ok!(backend.list_models());
    assert_eq!(models.recv().await.unwrap(), vec!["scripted-1"]);

    let mut switched = assert_ok!(backend.set_provider(
      "groq",
      ProviderConfig::Groq { api_key: "gsk".to_string() }
    ));
    assert_ok!(switched.recv().await.unwrap());

    assert_ok!(backend.shutdown().await);
}

#[tokio::test]
async fn test_json_history_survives_reopen()
{   let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("history.json");

    let (optimizer, _) = scripted(Ok(GOOD_REPLY));
    let store = Arc::new(assert_ok!(JsonHistoryStore::open(&path)));
    let backend = OptimizerBackend::new(
      optimizer,
      Some(store.clone() as Arc<dyn HistoryStore>)
    );
    for topic in ["Travel", "Work"]
    {   let mut reply = assert_ok!(backend.optimize("trip", "m", topic));
        assert!(!reply.recv().await.unwrap().is_error());
    }
    assert_ok!(backend.shutdown().await);
    assert!(path.exists());

    let reopened = assert_ok!(JsonHistoryStore::open(&path));
    let history = assert_ok!(reopened.get_history(10));
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].topic_group, "Work");
    assert_eq!(
      history[0].final_prompt,
      "As a travel agent, plan a three day trip."
    );

    let first = history[1].id;
    assert!(assert_ok!(reopened.delete_session(first)));
    let again = assert_ok!(JsonHistoryStore::open(&path));
    assert!(assert_ok!(again.get_session(first)).is_none());
    assert_eq!(assert_ok!(again.get_history(10)).len(), 1);
}

#[tokio::test]
async fn test_corrupt_history_file_is_storage_error()
{   let file = tempfile::NamedTempFile::new().unwrap();
    std::fs::write(file.path(), "not json").unwrap();
    let result = JsonHistoryStore::open(file.path());
    let err = assert_err!(result);
    assert!(matches!(err, Error::Storage(_)));
}

/// Holds every generation until released, and tracks how many
/// generations overlap
struct GatedProvider
{   gate: Arc<Notify>
  , in_flight: Arc<AtomicUsize>
  , max_in_flight: Arc<AtomicUsize>
  , seen: Arc<Mutex<Vec<String>>>
}

#[async_trait]
impl Provider for GatedProvider
{   async fn generate(&self, request: &GenerationRequest)
      -> Result<GenerationResult, Error>
    {   let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.seen.lock().unwrap().push(request.user_prompt.clone());
        self.gate.notified().await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(GenerationResult
        {   content: GOOD_REPLY.to_string()
          , raw: serde_json::Value::Null
        })
    }

    async fn list_models(&self) -> Vec<String>
    {   vec!["gated".to_string()]
    }

    async fn check_health(&self) -> bool
    {   true
    }

    fn name(&self) -> &str
    {   "Gated"
    }

    fn kind(&self) -> ProviderKind
    {   ProviderKind::Ollama
    }
}

fn gated() -> (GatedProvider, Arc<Notify>, Arc<AtomicUsize>, Arc<Mutex<Vec<String>>>)
{   let gate = Arc::new(Notify::new());
    let max_in_flight = Arc::new(AtomicUsize::new(0));
    let seen = Arc::new(Mutex::new(Vec::new()));
    let provider = GatedProvider
    {   gate: gate.clone()
      , in_flight: Arc::new(AtomicUsize::new(0))
      , max_in_flight: max_in_flight.clone()
      , seen: seen.clone()
    };
    (provider, gate, max_in_flight, seen)
}

#[tokio::test]
async fn test_health_and_models_answer_while_generation_runs()
{   let (provider, gate, _, _) = gated();
    let backend = OptimizerBackend::new(
      Optimizer::with_provider(Box::new(provider)),
      None
    );

    let mut reply = assert_ok!(backend.optimize("slow", "m", "General"));
    let mut health = assert_ok!(backend.check_health());
    let mut models = assert_ok!(backend.list_models());

    let healthy = tokio::time::timeout(Duration::from_secs(2), health.recv())
      .await
      .expect("health answered during generation");
    assert_eq!(healthy, Some(true));
    let listed = tokio::time::timeout(Duration::from_secs(2), models.recv())
      .await
      .expect("models answered during generation");
    assert_eq!(listed, Some(vec!["gated".to_string()]));
    assert!(reply.try_recv().is_err());

    gate.notify_one();
    let outcome = tokio::time::timeout(Duration::from_secs(2), reply.recv())
      .await
      .expect("generation released");
    assert!(!outcome.unwrap().is_error());

    assert_ok!(backend.shutdown().await);
}

#[tokio::test]
async fn test_one_generation_at_a_time_in_arrival_order()
{   let (provider, gate, max_in_flight, seen) = gated();
    let store = Arc::new(MemoryHistoryStore::new());
    let backend = OptimizerBackend::new(
      Optimizer::with_provider(Box::new(provider)),
      Some(store.clone() as Arc<dyn HistoryStore>)
    );

    let mut replies = Vec::new();
    for i in 0..3
    {   replies.push(assert_ok!(
          backend.optimize(format!("prompt {}", i), "m", "General")
        ));
    }
    for reply in replies.iter_mut()
    {   // release exactly the generation in front of the queue
        gate.notify_one();
        let outcome = tokio::time::timeout(Duration::from_secs(2), reply.recv())
          .await
          .expect("generation finished");
        assert!(!outcome.unwrap().is_error());
    }

    assert_eq!(max_in_flight.load(Ordering::SeqCst), 1);
    let seen = seen.lock().unwrap().clone();
    assert_eq!(seen.len(), 3);
    for (i, prompt) in seen.iter().enumerate()
    {   assert!(prompt.ends_with(&format!("prompt {}", i)));
    }
    let history = assert_ok!(store.get_history(10));
    let raw: Vec<&str> = history.iter().map(|s| s.raw_prompt.as_str()).collect();
    assert_eq!(raw, vec!["prompt 2", "prompt 1", "prompt 0"]);

    assert_ok!(backend.shutdown().await);
}

#[tokio::test]
async fn test_shutdown_waits_for_queued_generation()
{   let (provider, gate, _, _) = gated();
    let store = Arc::new(MemoryHistoryStore::new());
    let backend = OptimizerBackend::new(
      Optimizer::with_provider(Box::new(provider)),
      Some(store.clone() as Arc<dyn HistoryStore>)
    );

    let mut reply = assert_ok!(backend.optimize("last one", "m", "General"));
    gate.notify_one();
    assert_ok!(backend.shutdown().await);
    assert!(!reply.recv().await.unwrap().is_error());
    assert_eq!(assert_ok!(store.get_history(10)).len(), 1);
}

/// Every write fails
struct BrokenStore;

impl HistoryStore for BrokenStore
{   fn add_session(
      &self
    , _raw_prompt: &str
    , _elements: &BTreeMap<String, String>
    , _final_prompt: &str
    , _topic_group: &str
    ) -> Result<u64, Error>
    {   Err(Error::Storage("disk full".to_string()))
    }

    fn get_history(&self, _limit: usize)
      -> Result<Vec<PromptSession>, Error>
    {   Ok(vec![])
    }

    fn get_session(&self, _id: u64)
      -> Result<Option<PromptSession>, Error>
    {   Ok(None)
    }

    fn delete_session(&self, _id: u64) -> Result<bool, Error>
    {   Ok(false)
    }
}

#[tokio::test]
async fn test_history_failure_does_not_reach_caller()
{   let (optimizer, _) = scripted(Ok(GOOD_REPLY));
    let backend = OptimizerBackend::new(
      optimizer,
      Some(Arc::new(BrokenStore) as Arc<dyn HistoryStore>)
    );

    let mut reply = assert_ok!(backend.optimize("x", "m", "General"));
    let outcome = reply.recv().await.unwrap();
    assert_eq!(
      outcome.prompt().map(|p| p.final_prompt.as_str()),
      Some("As a travel agent, plan a three day trip.")
    );

    assert_ok!(backend.shutdown().await);
}

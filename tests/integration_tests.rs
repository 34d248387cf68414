use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use promptforge::config::ProviderConfig;
use promptforge::providers::{
  self, AnthropicProvider, GeminiProvider, GroqProvider, LlamaCppProvider,
  LocalEngine, OllamaProvider, OpenAiProvider, Provider
};
use promptforge::request::{ChatMessage, GenerationOptions, GenerationResult};
use promptforge::{Error, GenerationRequest, Optimizer, ProviderKind};

fn init_logging()
{   let _ = env_logger::builder().is_test(true).try_init();
}

/// Base URL of a port nothing listens on
async fn dead_endpoint() -> String
{   let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    format!("http://127.0.0.1:{}", port)
}

/// Answer one HTTP request with `status` and `body`.
/// Resolves to the raw request text.
async fn stub_server(status: u16, body: &str)
  -> (String, tokio::task::JoinHandle<String>)
{   let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let body = body.to_string();

    let handle = tokio::spawn(async move {
      let (mut sock, _) = listener.accept().await.unwrap();
      let mut buf: Vec<u8> = Vec::new();
      let mut chunk = [0u8; 4096];
      loop
      {   let n = sock.read(&mut chunk).await.unwrap();
          if n == 0
          {   break;
          }
          buf.extend_from_slice(&chunk[..n]);
          let text = String::from_utf8_lossy(&buf).to_string();
          if let Some(pos) = text.find("\r\n\r\n")
          {   let length = text[..pos].lines()
                .find_map(|line| {
                  let (k, v) = line.split_once(':')?;
                  if k.eq_ignore_ascii_case("content-length")
                  {   v.trim().parse::<usize>().ok()
                  } else
                  {   None
                  }
                })
                .unwrap_or(0);
              if buf.len() >= pos + 4 + length
              {   break;
              }
          }
      }

      let response = format!(
        "HTTP/1.1 {} Stub\r\nContent-Type: application/json\r\n\
         Content-Length: {}\r\nConnection: close\r\n\r\n{}",
        status, body.len(), body
      );
      sock.write_all(response.as_bytes()).await.unwrap();
      let _ = sock.shutdown().await;
      String::from_utf8_lossy(&buf).to_string()
    });

    (base, handle)
}

fn request() -> GenerationRequest
{   GenerationRequest::new("SYSTEM TEXT", "USER TEXT", "test-model")
}

struct FixedEngine;

impl LocalEngine for FixedEngine
{   fn complete(
      &self
    , _messages: &[ChatMessage]
    , _options: &GenerationOptions
    ) -> Result<GenerationResult, Error>
    {   Ok(GenerationResult
        {   content: "{}".to_string()
          , raw: serde_json::Value::Null
        })
    }
}

// ===== Registry =====

#[tokio::test]
async fn test_every_provider_has_a_distinct_name()
{   init_logging();
    let built: Vec<Box<dyn Provider>> = vec![
      providers::create("openai", ProviderConfig::openai(
        "http://localhost:1234/v1", "lm-studio"
      )).unwrap()
    , providers::create("ollama", ProviderConfig::ollama(
        "http://localhost:11434"
      )).unwrap()
    , Box::new(LlamaCppProvider::with_engine(
        "/models/phi.gguf", Arc::new(FixedEngine)
      ))
    , providers::create("anthropic", ProviderConfig::Anthropic
      {   api_key: "sk-ant".to_string()
      }).unwrap()
    , providers::create("gemini", ProviderConfig::Gemini
      {   api_key: "g".to_string()
      }).unwrap()
    , providers::create("groq", ProviderConfig::Groq
      {   api_key: "gsk".to_string()
      }).unwrap()
    ];

    let mut names: Vec<String> = Vec::new();
    for (provider, kind) in built.iter().zip(ProviderKind::all())
    {   assert_eq!(provider.kind(), kind);
        assert!(!provider.name().is_empty());
        assert_eq!(provider.name(), kind.display_name());
        names.push(provider.name().to_string());
    }
    names.sort();
    names.dedup();
    assert_eq!(names.len(), 6);
}

#[tokio::test]
async fn test_unknown_provider_is_configuration_error()
{   let result = providers::create(
      "bard",
      ProviderConfig::Gemini { api_key: "k".to_string() }
    );
    assert!(matches!(result, Err(Error::Configuration(_))));
}

#[tokio::test]
async fn test_llamacpp_missing_file_fails_before_generation()
{   let result = providers::create(
      "llamacpp",
      ProviderConfig::llamacpp("/definitely/not/here.gguf")
    );
    match result
    {   Err(Error::ModelNotFound(path)) => {
          assert!(path.contains("not/here.gguf"));
        }
      , Err(e) => panic!("unexpected error: {}", e)
      , Ok(_) => panic!("provider should not be constructed")
    }
}

#[tokio::test]
async fn test_missing_api_key_fails_fast()
{   let result = providers::create(
      "anthropic",
      ProviderConfig::Anthropic { api_key: String::new() }
    );
    assert!(matches!(result, Err(Error::Configuration(_))));
}

// ===== Degrade policies =====

#[tokio::test]
async fn test_local_servers_degrade_to_empty_and_unhealthy()
{   init_logging();
    let base = dead_endpoint().await;

    let openai = OpenAiProvider::new(format!("{}/v1", base), "lm-studio");
    assert!(openai.list_models().await.is_empty());
    assert!(!openai.check_health().await);
    assert!(matches!(
      openai.generate(&request()).await,
      Err(Error::Upstream(_))
    ));

    let ollama = OllamaProvider::new(base.clone());
    assert!(ollama.list_models().await.is_empty());
    assert!(!ollama.check_health().await);
    assert!(matches!(
      ollama.generate(&request()).await,
      Err(Error::Upstream(_))
    ));
}

#[tokio::test]
async fn test_cloud_providers_degrade_per_variant()
{   init_logging();
    let base = dead_endpoint().await;

    let anthropic = AnthropicProvider::with_base_url(base.clone(), "k");
    assert_eq!(
      anthropic.list_models().await,
      promptforge::providers::anthropic::FALLBACK_MODELS.to_vec()
    );
    assert!(anthropic.check_health().await);
    assert!(matches!(
      anthropic.generate(&request()).await,
      Err(Error::Upstream(_))
    ));

    let groq = GroqProvider::with_base_url(base.clone(), "k");
    assert_eq!(
      groq.list_models().await,
      vec!["llama3-8b-8192", "llama3-70b-8192", "mixtral-8x7b-32768"]
    );
    assert!(groq.check_health().await);

    let gemini = GeminiProvider::with_base_url(base, "k");
    assert!(gemini.list_models().await.is_empty());
    assert!(gemini.check_health().await);
}

#[tokio::test]
async fn test_optimizer_survives_unreachable_backend()
{   let base = dead_endpoint().await;
    let optimizer = Optimizer::new(
      "openai",
      ProviderConfig::openai(base, "lm-studio")
    ).unwrap();

    let outcome = optimizer.optimize("summarize this", "any").await;
    let message = outcome.error_message().expect("error outcome");
    assert!(message.starts_with("Optimization Error: "));
    assert!(optimizer.list_models().await.is_empty());
}

// ===== Wire formats =====

#[tokio::test]
async fn test_openai_chat_round_trip()
{   init_logging();
    let (base, server) = stub_server(200, r#"{
      "id": "chatcmpl-1",
      "choices": [{"index": 0, "finish_reason": "stop",
        "message": {"role": "assistant", "content": "hello"}}]
    }"#).await;

    let provider = OpenAiProvider::new(format!("{}/v1", base), "lm-studio");
    let result = provider.generate(&request()).await.unwrap();
    assert_eq!(result.content, "hello");
    assert_eq!(result.raw["id"], "chatcmpl-1");

    let seen = server.await.unwrap().to_lowercase();
    assert!(seen.starts_with("post /v1/chat/completions"));
    assert!(seen.contains("authorization: bearer lm-studio"));
    assert!(seen.contains(r#""role":"system","content":"system text""#));
    assert!(seen.contains(r#""role":"user","content":"user text""#));
    assert!(seen.contains(r#""max_tokens":4096"#));
}

#[tokio::test]
async fn test_anthropic_error_body_is_verbatim()
{   let body = r#"{"type":"error","error":{"type":"authentication_error","message":"invalid x-api-key"}}"#;
    let (base, server) = stub_server(401, body).await;

    let provider = AnthropicProvider::with_base_url(base, "bad-key");
    let err = provider.generate(&request()).await.unwrap_err();
    assert_eq!(err, Error::Upstream(body.to_string()));

    let seen = server.await.unwrap();
    let lower = seen.to_lowercase();
    assert!(lower.starts_with("post /v1/messages"));
    assert!(lower.contains("x-api-key: bad-key"));
    assert!(lower.contains("anthropic-version: 2023-06-01"));
    assert!(seen.contains(r#""system":"SYSTEM TEXT""#));
}

#[tokio::test]
async fn test_gemini_joins_parts_and_sends_system_instruction()
{   let (base, server) = stub_server(200, r#"{
      "candidates": [{"content": {"role": "model",
        "parts": [{"text": "{\"final_prompt\":"}, {"text": "\"x\"}"}]}}]
    }"#).await;

    let provider = GeminiProvider::with_base_url(base, "g-key");
    let result = provider
      .generate(&GenerationRequest::new("S", "U", "models/gemini-1.5-flash"))
      .await
      .unwrap();
    assert_eq!(result.content, "{\"final_prompt\":\"x\"}");

    let seen = server.await.unwrap();
    assert!(seen.starts_with("POST /models/gemini-1.5-flash:generateContent"));
    assert!(seen.to_lowercase().contains("x-goog-api-key: g-key"));
    assert!(seen.contains(r#""systemInstruction":{"parts":[{"text":"S"}]}"#));
}

#[tokio::test]
async fn test_ollama_lists_tags()
{   let (base, server) = stub_server(200, r#"{
      "models": [{"name": "llama3:8b"}, {"name": "qwen2:7b"}]
    }"#).await;

    let provider = OllamaProvider::new(base);
    assert_eq!(provider.list_models().await, vec!["llama3:8b", "qwen2:7b"]);
    assert!(server.await.unwrap().starts_with("GET /api/tags"));
}

#[tokio::test]
async fn test_anthropic_joins_text_blocks_only()
{   let (base, server) = stub_server(200, r#"{
      "id": "msg_01",
      "type": "message",
      "role": "assistant",
      "content": [
        {"type": "text", "text": "ab"},
        {"type": "tool_use", "id": "tu_1", "name": "lookup", "input": {}},
        {"type": "text", "text": "cd"}
      ],
      "stop_reason": "end_turn"
    }"#).await;

    let provider = AnthropicProvider::with_base_url(base, "sk-ant");
    let result = provider.generate(&request()).await.unwrap();
    assert_eq!(result.content, "abcd");
    assert_eq!(result.raw["id"], "msg_01");

    let seen = server.await.unwrap();
    assert!(seen.contains(r#""messages":[{"role":"user","content":"USER TEXT"}]"#));
    assert!(seen.contains(r#""max_tokens":4096"#));
}

#[tokio::test]
async fn test_anthropic_without_text_is_upstream_error()
{   let (base, _server) = stub_server(200, r#"{
      "content": [{"type": "tool_use", "id": "tu_1", "name": "x", "input": {}}]
    }"#).await;

    let provider = AnthropicProvider::with_base_url(base, "sk-ant");
    assert!(matches!(
      provider.generate(&request()).await,
      Err(Error::Upstream(_))
    ));
}

#[tokio::test]
async fn test_anthropic_lists_live_models()
{   let (base, server) = stub_server(200, r#"{
      "data": [
        {"id": "claude-3-5-sonnet-20241022", "type": "model"},
        {"id": "claude-3-5-haiku-20241022", "type": "model"}
      ],
      "has_more": false
    }"#).await;

    let provider = AnthropicProvider::with_base_url(base, "sk-ant");
    assert_eq!(
      provider.list_models().await,
      vec!["claude-3-5-sonnet-20241022", "claude-3-5-haiku-20241022"]
    );
    let seen = server.await.unwrap().to_lowercase();
    assert!(seen.starts_with("get /v1/models"));
    assert!(seen.contains("x-api-key: sk-ant"));
}

#[tokio::test]
async fn test_gemini_lists_generate_content_models()
{   let (base, server) = stub_server(200, r#"{
      "models": [
        {"name": "models/gemini-1.5-pro",
         "supportedGenerationMethods": ["generateContent", "countTokens"]},
        {"name": "models/text-embedding-004",
         "supportedGenerationMethods": ["embedContent"]}
      ]
    }"#).await;

    let provider = GeminiProvider::with_base_url(base, "g-key");
    assert_eq!(provider.list_models().await, vec!["gemini-1.5-pro"]);

    let seen = server.await.unwrap();
    assert!(seen.starts_with("GET /models?pageSize=1000"));
    assert!(seen.to_lowercase().contains("x-goog-api-key: g-key"));
}

#[tokio::test]
async fn test_openai_lists_models_and_reports_healthy()
{   let models = r#"{
      "object": "list",
      "data": [
        {"id": "qwen", "object": "model", "owned_by": "organization_owner"},
        {"id": "llama", "object": "model"}
      ]
    }"#;

    let (base, server) = stub_server(200, models).await;
    let provider = OpenAiProvider::new(format!("{}/v1", base), "lm-studio");
    assert_eq!(provider.list_models().await, vec!["qwen", "llama"]);
    assert!(server.await.unwrap().starts_with("GET /v1/models"));

    let (base, _server) = stub_server(200, models).await;
    let provider = OpenAiProvider::new(format!("{}/v1", base), "lm-studio");
    assert!(provider.check_health().await);
}

#[tokio::test]
async fn test_groq_prefers_live_model_list()
{   let (base, server) = stub_server(200, r#"{
      "object": "list",
      "data": [{"id": "llama-3.1-8b-instant", "object": "model"}]
    }"#).await;

    let provider = GroqProvider::with_base_url(base, "gsk");
    assert_eq!(provider.list_models().await, vec!["llama-3.1-8b-instant"]);
    let seen = server.await.unwrap().to_lowercase();
    assert!(seen.starts_with("get /models"));
    assert!(seen.contains("authorization: bearer gsk"));
}

#[tokio::test]
async fn test_optimize_over_http_uses_parser()
{   let content = "Here you go:\n```json\n{\"elements\":{\"Persona\":\"an editor\"},\"final_prompt\":\"Edit this.\"}\n```";
    let payload = serde_json::json!({
      "message": {"role": "assistant", "content": content},
      "done": true
    });
    let (base, _server) = stub_server(200, &payload.to_string()).await;

    let optimizer = Optimizer::new(
      "Ollama",
      ProviderConfig::ollama(base)
    ).unwrap();
    let outcome = optimizer.optimize("fix my essay", "llama3").await;
    let prompt = outcome.prompt().expect("optimized");
    assert_eq!(prompt.final_prompt, "Edit this.");
    assert_eq!(
      prompt.element(promptforge::Element::Persona),
      Some("an editor")
    );
}

#[tokio::test]
#[ignore]
async fn test_live_ollama_optimize()
{   // Needs a running Ollama and OLLAMA_MODEL set
    let Ok(model) = std::env::var("OLLAMA_MODEL") else {
      println!("Skipping: OLLAMA_MODEL not set");
      return;
    };
    let host = std::env::var("OLLAMA_HOST")
      .unwrap_or_else(|_| "http://localhost:11434".to_string());

    let optimizer = Optimizer::new("ollama", ProviderConfig::ollama(host))
      .unwrap();
    if !optimizer.check_health().await
    {   println!("Skipping: Ollama not reachable");
        return;
    }
    let outcome = optimizer.optimize("Write a haiku about rust", &model).await;
    println!("{}", serde_json::to_string_pretty(&outcome).unwrap());
    assert!(!outcome.is_error());
}

//! Structured prompt types and the fixed contract given to the model

use std::collections::BTreeMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Instruction sent as the system prompt on every optimize call.
/// Describes the JSON object the model must answer with.
pub const SYSTEM_PROMPT: &str = r#"
You are an expert prompt engineer and optimization engine. Your task is to analyze the user's raw prompt and rewrite it into a highly effective, structured prompt using best practices (CRISPE, Chain-of-Thought).

You MUST return the output in strict JSON format with the following structure:
{
    "elements": {
        "persona": "The persona adopted by the AI",
        "context": "Background information and context",
        "instruction": "The primary task or directive",
        "constraints": "Limitations and strict rules to follow",
        "format": "The desired format of the response",
        "exemplars": "Few-shot examples (input -> output)",
        "tone": "The tone and style of the response",
        "delimiters": "Any specific delimiters to use",
        "data": "Input data or variable placeholders",
        "technique": "The prompting strategy used (e.g. Chain-of-thought, etc)"
    },
    "final_prompt": "The complete, polished, and ready-to-use prompt that combines all elements into a cohesive request."
}

Do not include any conversational text, markdown formatting (like ```json), or explanations outside the JSON object. Just return the JSON.
"#;

/// Wrap the raw prompt into the user turn
pub fn user_prompt(raw_prompt: &str) -> String
{   format!("Optimize this prompt:\n\n{}", raw_prompt)
}

pub const PARSE_FAILED_PERSONA: &str = "Error parsing JSON";
pub const PARSE_FAILED_CONTEXT: &str
  = "The model response could not be parsed as JSON.";
pub const NOT_AVAILABLE: &str = "N/A";

/// The ten rhetorical components of a structured prompt
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash,
  Serialize, Deserialize
)]
#[serde(rename_all = "lowercase")]
pub enum Element
{   Persona
  , Context
  , Instruction
  , Constraints
  , Format
  , Exemplars
  , Tone
  , Delimiters
  , Data
  , Technique
}

impl Element
{   pub const ALL: [Element; 10] =
    [   Element::Persona
      , Element::Context
      , Element::Instruction
      , Element::Constraints
      , Element::Format
      , Element::Exemplars
      , Element::Tone
      , Element::Delimiters
      , Element::Data
      , Element::Technique
    ];

    pub fn as_str(&self) -> &'static str
    {   match self
        {   Element::Persona => "persona"
          , Element::Context => "context"
          , Element::Instruction => "instruction"
          , Element::Constraints => "constraints"
          , Element::Format => "format"
          , Element::Exemplars => "exemplars"
          , Element::Tone => "tone"
          , Element::Delimiters => "delimiters"
          , Element::Data => "data"
          , Element::Technique => "technique"
        }
    }

    /// Case-insensitive key lookup; unknown keys give None
    pub fn from_key(key: &str) -> Option<Element>
    {   let key = key.trim().to_lowercase();
        Element::ALL.iter()
          .copied()
          .find(|e| e.as_str() == key)
    }
}

impl std::fmt::Display for Element
{   fn fmt(&self, f: &mut std::fmt::Formatter<'_>)
      -> std::fmt::Result
    {   write!(f, "{}", self.as_str())
    }
}

/// Structured result. `final_prompt` is always populated;
/// elements the model did not return are simply absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "PromptWire", into = "PromptWire")]
pub struct OptimizedPrompt
{   pub elements: BTreeMap<Element, String>
  , pub final_prompt: String
}

/// JSON shape exchanged with the model and stored in history
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PromptWire
{   #[serde(default)]
    elements: Map<String, Value>
  , final_prompt: String
}

impl From<PromptWire> for OptimizedPrompt
{   fn from(wire: PromptWire) -> Self
    {   OptimizedPrompt
        {   elements: elements_from_json(&wire.elements)
          , final_prompt: wire.final_prompt
        }
    }
}

impl From<OptimizedPrompt> for PromptWire
{   fn from(prompt: OptimizedPrompt) -> Self
    {   PromptWire
        {   elements: prompt.elements
              .into_iter()
              .map(|(k, v)| (k.as_str().to_string(), Value::String(v)))
              .collect()
          , final_prompt: prompt.final_prompt
        }
    }
}

/// Keep recognized element keys, normalized to lowercase.
/// Strings pass through, nulls count as absent, anything else
/// is kept as compact JSON text.
pub fn elements_from_json(map: &Map<String, Value>)
  -> BTreeMap<Element, String>
{   let mut elements = BTreeMap::new();
    for (key, value) in map
    {   let Some(element) = Element::from_key(key) else {
          continue;
        };
        let text = match value
        {   Value::Null => continue
          , Value::String(s) => s.clone()
          , other => other.to_string()
        };
        elements.insert(element, text);
    }
    elements
}

impl OptimizedPrompt
{   pub fn new(
      elements: BTreeMap<Element, String>
    , final_prompt: impl Into<String>
    ) -> Self
    {   OptimizedPrompt
        {   elements
          , final_prompt: final_prompt.into()
        }
    }

    /// Degraded result: sentinels everywhere, raw text kept whole
    pub fn fallback(raw_text: &str) -> Self
    {   let elements = Element::ALL.iter()
          .map(|e| {
            let text = match e
            {   Element::Persona => PARSE_FAILED_PERSONA
              , Element::Context => PARSE_FAILED_CONTEXT
              , _ => NOT_AVAILABLE
            };
            (*e, text.to_string())
          })
          .collect();
        OptimizedPrompt::new(elements, raw_text)
    }

    pub fn element(&self, element: Element) -> Option<&str>
    {   self.elements.get(&element).map(|s| s.as_str())
    }

    /// True when this is the parse-failure fallback
    pub fn is_degraded(&self) -> bool
    {   self.element(Element::Persona) == Some(PARSE_FAILED_PERSONA)
          && self.element(Element::Context)
               == Some(PARSE_FAILED_CONTEXT)
    }

    /// Elements keyed by their lowercase names
    pub fn elements_by_name(&self) -> BTreeMap<String, String>
    {   self.elements.iter()
          .map(|(k, v)| (k.as_str().to_string(), v.clone()))
          .collect()
    }
}

/// Result of one optimize call. Serializes either as the
/// structured prompt or as `{"error": "..."}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OptimizeOutcome
{   Error
    {   error: String
    }
  , Optimized(OptimizedPrompt)
}

impl OptimizeOutcome
{   pub fn error(message: impl Into<String>) -> Self
    {   OptimizeOutcome::Error { error: message.into() }
    }

    pub fn is_error(&self) -> bool
    {   matches!(self, OptimizeOutcome::Error { .. })
    }

    pub fn prompt(&self) -> Option<&OptimizedPrompt>
    {   match self
        {   OptimizeOutcome::Optimized(p) => Some(p)
          , OptimizeOutcome::Error { .. } => None
        }
    }

    pub fn error_message(&self) -> Option<&str>
    {   match self
        {   OptimizeOutcome::Error { error } => Some(error)
          , OptimizeOutcome::Optimized(_) => None
        }
    }
}

#[cfg(test)]
mod tests
{   use super::*;

    #[test]
    fn element_keys_are_case_insensitive()
    {   assert_eq!(Element::from_key("Persona"), Some(Element::Persona));
        assert_eq!(Element::from_key("TONE"), Some(Element::Tone));
        assert_eq!(Element::from_key("mood"), None);
    }

    #[test]
    fn fallback_has_all_ten_sentinels()
    {   let p = OptimizedPrompt::fallback("raw");
        assert_eq!(p.elements.len(), 10);
        assert_eq!(p.final_prompt, "raw");
        assert!(p.is_degraded());
        assert_eq!(p.element(Element::Technique), Some("N/A"));
    }

    #[test]
    fn serializes_to_model_schema()
    {   let mut elements = BTreeMap::new();
        elements.insert(Element::Tone, "calm".to_string());
        let p = OptimizedPrompt::new(elements, "final");
        let v = serde_json::to_value(&p).unwrap();
        assert_eq!(
          v,
          serde_json::json!({
            "elements": {"tone": "calm"},
            "final_prompt": "final"
          })
        );
    }

    #[test]
    fn stored_prompt_requires_final_prompt()
    {   let missing = serde_json::from_str::<OptimizedPrompt>(
          r#"{"elements": {"tone": "calm"}}"#
        );
        assert!(missing.is_err());

        let outcome = serde_json::from_str::<OptimizeOutcome>(
          r#"{"elements": {"tone": "calm"}}"#
        );
        assert!(outcome.is_err());

        let p: OptimizedPrompt = serde_json::from_str(
          r#"{"final_prompt": "kept"}"#
        ).unwrap();
        assert_eq!(p.final_prompt, "kept");
        assert!(p.elements.is_empty());
    }

    #[test]
    fn error_outcome_shape()
    {   let v = serde_json::to_value(
          OptimizeOutcome::error("Optimization Error: boom")
        ).unwrap();
        assert_eq!(
          v,
          serde_json::json!({"error": "Optimization Error: boom"})
        );
    }

    #[test]
    fn non_string_values_become_json_text()
    {   let map = serde_json::json!({
          "Exemplars": ["a -> b"],
          "data": null,
          "extra": "dropped"
        });
        let elements = elements_from_json(map.as_object().unwrap());
        assert_eq!(elements.len(), 1);
        assert_eq!(elements[&Element::Exemplars], "[\"a -> b\"]");
    }
}

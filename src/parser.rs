//! Recovers an [`OptimizedPrompt`] from whatever text a model returned.
//!
//! Models are told to answer with a bare JSON object but often wrap it
//! in markdown fences or surround it with prose. The stages below are
//! tried in order, each only if the previous one failed:
//!
//! 1. the whole text as JSON
//! 2. the interior of the first ```` ```json ```` fenced block
//! 3. the span from the first `{` to the last `}`
//! 4. a fallback carrying sentinel elements and the raw text
//!
//! Stage 4 cannot fail, so [`parse_response`] is total.
//!
//! Stage 3 is greedy: prose after the real object that itself contains
//! a `}` widens the span and makes the stage fail, which drops the
//! result to the fallback instead of returning a wrong object.

use lazy_static::lazy_static;
use log::{debug, trace, warn};
use regex::Regex;
use serde_json::{Map, Value};

use crate::prompt::{elements_from_json, OptimizedPrompt};

lazy_static! {
    static ref JSON_FENCE: Regex
      = Regex::new(r"(?s)```json\s*(\{.*?\})\s*```")
          .expect("static regex");
}

/// Which stage produced the result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseStage
{   Direct
  , FencedBlock
  , BraceSpan
  , Fallback
}

/// Parse model output, never fails
pub fn parse_response(content: &str) -> OptimizedPrompt
{   parse_with_stage(content).0
}

/// Parse model output and report the stage that succeeded
pub fn parse_with_stage(content: &str) -> (OptimizedPrompt, ParseStage)
{   trace!("Parsing {} bytes of model output", content.len());

    if let Some(obj) = parse_object(content.trim())
    {   debug!("Model output parsed as JSON directly");
        return (from_object(&obj, content), ParseStage::Direct);
    }

    if let Some(obj) = fenced_object(content)
    {   debug!("Model output parsed from fenced json block");
        return (from_object(&obj, content), ParseStage::FencedBlock);
    }

    if let Some(obj) = brace_span_object(content)
    {   debug!("Model output parsed from brace span");
        return (from_object(&obj, content), ParseStage::BraceSpan);
    }

    warn!("Model output could not be parsed as JSON, using fallback");
    (OptimizedPrompt::fallback(content), ParseStage::Fallback)
}

fn parse_object(text: &str) -> Option<Map<String, Value>>
{   match serde_json::from_str::<Value>(text)
    {   Ok(Value::Object(obj)) => Some(obj)
      , Ok(other) => {
          trace!("Parsed JSON is not an object: {}", other);
          None
        }
      , Err(e) => {
          trace!("JSON parse failed: {}", e);
          None
        }
    }
}

fn fenced_object(content: &str) -> Option<Map<String, Value>>
{   let captures = JSON_FENCE.captures(content)?;
    parse_object(captures.get(1)?.as_str())
}

fn brace_span_object(content: &str) -> Option<Map<String, Value>>
{   let start = content.find('{')?;
    let end = content.rfind('}')?;
    if end < start
    {   return None;
    }
    parse_object(&content[start..=end])
}

/// Build the result from a parsed object. A missing `final_prompt`
/// is filled with the raw model text.
fn from_object(obj: &Map<String, Value>, raw: &str) -> OptimizedPrompt
{   let elements = match obj.get("elements")
    {   Some(Value::Object(map)) => elements_from_json(map)
      , _ => Default::default()
    };

    let final_prompt = match obj.get("final_prompt")
    {   Some(Value::String(s)) => s.clone()
      , Some(Value::Null) | None => {
          debug!("final_prompt missing, using raw model output");
          raw.to_string()
        }
      , Some(other) => other.to_string()
    };

    OptimizedPrompt::new(elements, final_prompt)
}

//! Session history: one record per completed optimization.
//!
//! Records are values. They are created once, never edited, and only
//! removed whole.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use log::{debug, trace};

use crate::error::Error;
use crate::prompt::OptimizedPrompt;

pub const DEFAULT_TOPIC_GROUP: &str = "General";
pub const DEFAULT_HISTORY_LIMIT: usize = 50;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptSession
{   pub id: u64
  , pub timestamp: DateTime<Utc>
  , pub topic_group: String
  , pub raw_prompt: String
  , /// Element name -> text, as returned by the optimizer
    pub structured_elements: BTreeMap<String, String>
  , pub final_prompt: String
}

/// Keyed record store for past sessions
pub trait HistoryStore: Send + Sync
{   fn add_session(
      &self
    , raw_prompt: &str
    , elements: &BTreeMap<String, String>
    , final_prompt: &str
    , topic_group: &str
    ) -> Result<u64, Error>;

    /// Most recent first
    fn get_history(&self, limit: usize)
      -> Result<Vec<PromptSession>, Error>;

    fn get_session(&self, id: u64)
      -> Result<Option<PromptSession>, Error>;

    /// True when a record was removed
    fn delete_session(&self, id: u64) -> Result<bool, Error>;
}

/// Store an optimized prompt under the given topic
pub fn record(
  store: &dyn HistoryStore
, raw_prompt: &str
, prompt: &OptimizedPrompt
, topic_group: &str
) -> Result<u64, Error>
{   store.add_session(
      raw_prompt,
      &prompt.elements_by_name(),
      &prompt.final_prompt,
      topic_group
    )
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct HistoryState
{   next_id: u64
  , sessions: Vec<PromptSession>
}

impl HistoryState
{   fn add(
      &mut self
    , raw_prompt: &str
    , elements: &BTreeMap<String, String>
    , final_prompt: &str
    , topic_group: &str
    ) -> u64
    {   self.next_id += 1;
        let id = self.next_id;
        // keep timestamps in insertion order even if the clock steps back
        let timestamp = self.sessions.iter()
          .map(|s| s.timestamp)
          .max()
          .map_or_else(Utc::now, |last| last.max(Utc::now()));
        self.sessions.push(PromptSession
        {   id
          , timestamp
          , topic_group: topic_group.to_string()
          , raw_prompt: raw_prompt.to_string()
          , structured_elements: elements.clone()
          , final_prompt: final_prompt.to_string()
        });
        id
    }

    fn recent(&self, limit: usize) -> Vec<PromptSession>
    {   let mut sessions = self.sessions.clone();
        sessions.sort_by(|a, b| {
          b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id))
        });
        sessions.truncate(limit);
        sessions
    }

    fn get(&self, id: u64) -> Option<PromptSession>
    {   self.sessions.iter().find(|s| s.id == id).cloned()
    }

    fn remove(&mut self, id: u64) -> bool
    {   let before = self.sessions.len();
        self.sessions.retain(|s| s.id != id);
        self.sessions.len() != before
    }
}

fn poisoned<T>(_: T) -> Error
{   Error::Storage("history lock poisoned".to_string())
}

// ===== In-memory store =====

#[derive(Debug, Default)]
pub struct MemoryHistoryStore
{   state: Mutex<HistoryState>
}

impl MemoryHistoryStore
{   pub fn new() -> Self
    {   Self::default()
    }
}

impl HistoryStore for MemoryHistoryStore
{   fn add_session(
      &self
    , raw_prompt: &str
    , elements: &BTreeMap<String, String>
    , final_prompt: &str
    , topic_group: &str
    ) -> Result<u64, Error>
    {   let mut state = self.state.lock().map_err(poisoned)?;
        Ok(state.add(raw_prompt, elements, final_prompt, topic_group))
    }

    fn get_history(&self, limit: usize)
      -> Result<Vec<PromptSession>, Error>
    {   Ok(self.state.lock().map_err(poisoned)?.recent(limit))
    }

    fn get_session(&self, id: u64)
      -> Result<Option<PromptSession>, Error>
    {   Ok(self.state.lock().map_err(poisoned)?.get(id))
    }

    fn delete_session(&self, id: u64) -> Result<bool, Error>
    {   Ok(self.state.lock().map_err(poisoned)?.remove(id))
    }
}

// ===== JSON file store =====

/// Whole-document JSON file, rewritten on every change
#[derive(Debug)]
pub struct JsonHistoryStore
{   path: PathBuf
  , state: Mutex<HistoryState>
}

impl JsonHistoryStore
{   /// Open the file, or start empty if it does not exist yet
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, Error>
    {   let path = path.into();
        let state = if path.exists()
        {   let text = std::fs::read_to_string(&path)?;
            serde_json::from_str::<HistoryState>(&text)
              .map_err(|e| Error::Storage(format!(
                "{}: {}", path.display(), e
              )))?
        } else
        {   HistoryState::default()
        };
        debug!(
          "Opened history at {} ({} sessions)",
          path.display(), state.sessions.len()
        );
        Ok(JsonHistoryStore
        {   path
          , state: Mutex::new(state)
        })
    }

    pub fn path(&self) -> &Path
    {   &self.path
    }

    fn persist(&self, state: &HistoryState) -> Result<(), Error>
    {   let text = serde_json::to_string_pretty(state)
          .map_err(|e| Error::Storage(e.to_string()))?;
        if let Some(dir) = self.path.parent()
        {   if !dir.as_os_str().is_empty()
            {   std::fs::create_dir_all(dir)?;
            }
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, text)?;
        std::fs::rename(&tmp, &self.path)?;
        trace!("History written to {}", self.path.display());
        Ok(())
    }
}

impl HistoryStore for JsonHistoryStore
{   fn add_session(
      &self
    , raw_prompt: &str
    , elements: &BTreeMap<String, String>
    , final_prompt: &str
    , topic_group: &str
    ) -> Result<u64, Error>
    {   let mut state = self.state.lock().map_err(poisoned)?;
        let mut next = state.clone();
        let id = next.add(raw_prompt, elements, final_prompt, topic_group);
        self.persist(&next)?;
        *state = next;
        Ok(id)
    }

    fn get_history(&self, limit: usize)
      -> Result<Vec<PromptSession>, Error>
    {   Ok(self.state.lock().map_err(poisoned)?.recent(limit))
    }

    fn get_session(&self, id: u64)
      -> Result<Option<PromptSession>, Error>
    {   Ok(self.state.lock().map_err(poisoned)?.get(id))
    }

    fn delete_session(&self, id: u64) -> Result<bool, Error>
    {   let mut state = self.state.lock().map_err(poisoned)?;
        let mut next = state.clone();
        if !next.remove(id)
        {   return Ok(false);
        }
        self.persist(&next)?;
        *state = next;
        Ok(true)
    }
}

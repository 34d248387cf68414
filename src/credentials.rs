//! API key storage interface. The OS keychain lives outside this
//! crate; anything implementing [`CredentialStore`] can stand in.

use std::collections::HashMap;
use std::sync::Mutex;
use log::debug;

use crate::ProviderKind;

/// Key/value secret store
pub trait CredentialStore: Send + Sync
{   fn save(&self, key: &str, value: &str);

    /// Empty string when nothing is stored
    fn get(&self, key: &str) -> String;

    fn delete(&self, key: &str);
}

/// Slot name used for a provider's API key
pub fn credential_key(kind: ProviderKind) -> String
{   format!("{}_api_key", kind.identifier())
}

/// Process-lifetime store
#[derive(Debug, Default)]
pub struct MemoryCredentialStore
{   values: Mutex<HashMap<String, String>>
}

impl MemoryCredentialStore
{   pub fn new() -> Self
    {   Self::default()
    }
}

impl CredentialStore for MemoryCredentialStore
{   fn save(&self, key: &str, value: &str)
    {   debug!("Saving credential: {}", key);
        if let Ok(mut values) = self.values.lock()
        {   values.insert(key.to_string(), value.to_string());
        }
    }

    fn get(&self, key: &str) -> String
    {   self.values.lock()
          .ok()
          .and_then(|values| values.get(key).cloned())
          .unwrap_or_default()
    }

    fn delete(&self, key: &str)
    {   if let Ok(mut values) = self.values.lock()
        {   values.remove(key);
        }
    }
}

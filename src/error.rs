use std::fmt;

/// Custom error type for PromptForge operations
/// Implements Clone for sending through channels
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error
{   /// Unknown provider, missing field or mismatched config
    Configuration(String)
  , /// Local model file does not exist
    ModelNotFound(String)
  , /// Local runtime could not load the model
    Initialization(String)
  , /// Transport, auth or vendor failure, message kept verbatim
    Upstream(String)
  , /// History store failure
    Storage(String)
  , /// Backend task is gone
    Disconnected(String)
}

impl fmt::Display for Error
{   fn fmt(&self, f: &mut fmt::Formatter<'_>)
      -> fmt::Result
    {   match self
        {   Error::Configuration(msg) => {
              write!(f, "Configuration error: {}", msg)
            }
          , Error::ModelNotFound(path) => {
              write!(f, "Model file not found at: {}", path)
            }
          , Error::Initialization(msg) => {
              write!(f,
                "Failed to initialize local runtime: {}",
                msg
              )
            }
          , Error::Upstream(msg) => {
              write!(f, "{}", msg)
            }
          , Error::Storage(msg) => {
              write!(f, "Storage error: {}", msg)
            }
          , Error::Disconnected(msg) => {
              write!(f, "Disconnected: {}", msg)
            }
        }
    }
}

impl std::error::Error for Error {}

impl From<reqwest::Error> for Error
{   fn from(e: reqwest::Error) -> Self
    {   Error::Upstream(e.to_string())
    }
}

impl From<std::io::Error> for Error
{   fn from(e: std::io::Error) -> Self
    {   Error::Storage(e.to_string())
    }
}

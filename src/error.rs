//! Error taxonomy for the data layer.

/// Errors surfaced by the data layer.
///
/// The enum is `Clone` (string payloads only) so that a memoized shared fetch
/// can replay a settled failure to every caller.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
  /// Transport failure, non-success status, or timeout.
  #[error("network request failed: {reason}")]
  Network {
    reason: String,
    /// HTTP status, when the server answered at all.
    status: Option<u16>,
  },

  /// The durable store could not open or transact.
  ///
  /// `PersistentStore` swallows this internally and degrades to no-ops, so it
  /// only shows up from components that cannot run without their database.
  #[error("local storage unavailable: {0}")]
  StorageUnavailable(String),

  /// Malformed write payload, detected before any network or storage work.
  #[error("invalid {field}: {message}")]
  Validation {
    field: &'static str,
    message: String,
  },
}

impl Error {
  /// Build a network error without a status code.
  pub fn network(reason: impl Into<String>) -> Self {
    Self::Network {
      reason: reason.into(),
      status: None,
    }
  }

  pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
    Self::Validation {
      field,
      message: message.into(),
    }
  }
}

impl From<reqwest::Error> for Error {
  fn from(err: reqwest::Error) -> Self {
    Self::Network {
      reason: err.to_string(),
      status: err.status().map(|s| s.as_u16()),
    }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

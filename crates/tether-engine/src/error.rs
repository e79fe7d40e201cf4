//! Error types for `tether-engine`.

use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum Error {
  /// A read from the monitor store failed.
  #[error("store error: {0}")]
  Store(#[source] BoxError),

  /// Appending a verification record failed. Fatal for the check in hand.
  #[error("failed to persist verification record: {0}")]
  Persistence(#[source] BoxError),

  #[error("invalid geometry: {0}")]
  InvalidGeometry(String),

  #[error("configuration error: {0}")]
  Config(String),
}

impl Error {
  pub(crate) fn store<E>(e: E) -> Self
  where
    E: std::error::Error + Send + Sync + 'static,
  {
    Self::Store(Box::new(e))
  }

  pub(crate) fn persistence<E>(e: E) -> Self
  where
    E: std::error::Error + Send + Sync + 'static,
  {
    Self::Persistence(Box::new(e))
  }
}

impl From<tether_core::Error> for Error {
  fn from(e: tether_core::Error) -> Self {
    match e {
      tether_core::Error::InvalidGeometry(msg) => Self::InvalidGeometry(msg),
      other => Self::Store(Box::new(other)),
    }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

//! Error types for `tether-core`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("invalid geometry: {0}")]
  InvalidGeometry(String),

  #[error("invalid time of day {0:?}; expected HH:MM")]
  InvalidTimeOfDay(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

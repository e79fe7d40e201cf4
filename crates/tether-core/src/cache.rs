//! The `CacheStore` trait: a string key/value store with expiry.
//!
//! Values are opaque strings (the engine stores JSON). Implementations must
//! replace a value wholesale on `set`; readers holding an earlier value keep
//! seeing that value, never a half-written one.

use std::{future::Future, time::Duration};

pub trait CacheStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// The live value under `key`, or `None` if absent or expired.
  fn get<'a>(
    &'a self,
    key: &'a str,
  ) -> impl Future<Output = Result<Option<String>, Self::Error>> + Send + 'a;

  /// Store `value` under `key`, expiring after `ttl`.
  fn set<'a>(
    &'a self,
    key: &'a str,
    value: String,
    ttl: Duration,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  /// Remove `key`. Removing an absent key is not an error.
  fn delete<'a>(
    &'a self,
    key: &'a str,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  /// Drop expired entries and return how many went. Stores that expire
  /// entries on their own keep the default, which does nothing.
  fn purge_expired(&self) -> impl Future<Output = usize> + Send + '_ { std::future::ready(0) }
}

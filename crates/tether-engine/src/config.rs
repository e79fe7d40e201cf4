//! Engine tunables.
//!
//! Every field has a serde default, so an empty `[engine]` table (or none at
//! all) yields a working configuration apart from the external endpoints.

use std::time::Duration;

use serde::Deserialize;
use tether_core::subject::Priority;

use crate::{Error, Result};

// ─── Top level ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
  pub intervals:           PriorityIntervals,
  /// Seconds between active-set re-synchronisations.
  pub sync_interval_secs:  u64,
  pub zone_cache_ttl_secs: u64,
  pub active_set_ttl_secs: u64,
  pub retry:               RetryPolicy,
  pub timeouts:            Timeouts,
  pub provider:            ProviderConfig,
  pub notification:        NotificationConfig,
}

impl Default for EngineConfig {
  fn default() -> Self {
    Self {
      intervals:           PriorityIntervals::default(),
      sync_interval_secs:  300,
      zone_cache_ttl_secs: 3600,
      active_set_ttl_secs: 300,
      retry:               RetryPolicy::default(),
      timeouts:            Timeouts::default(),
      provider:            ProviderConfig::default(),
      notification:        NotificationConfig::default(),
    }
  }
}

impl EngineConfig {
  pub fn sync_interval(&self) -> Duration { Duration::from_secs(self.sync_interval_secs) }

  pub fn zone_cache_ttl(&self) -> Duration { Duration::from_secs(self.zone_cache_ttl_secs) }

  pub fn active_set_ttl(&self) -> Duration { Duration::from_secs(self.active_set_ttl_secs) }

  /// Reject values the runtime cannot work with, such as zero-length timer
  /// periods.
  pub fn validate(&self) -> Result<()> {
    if self.sync_interval_secs == 0 {
      return Err(Error::Config("sync_interval_secs must be positive".into()));
    }
    self.intervals.validate()?;
    if self.timeouts.locate_ms == 0
      || self.timeouts.history_ms == 0
      || self.timeouts.notify_ms == 0
    {
      return Err(Error::Config("timeouts must be positive".into()));
    }
    Ok(())
  }
}

// ─── Scheduling ──────────────────────────────────────────────────────────────

/// Check interval per priority tier, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PriorityIntervals {
  pub high_ms:   u64,
  pub medium_ms: u64,
  pub low_ms:    u64,
}

impl Default for PriorityIntervals {
  fn default() -> Self { Self { high_ms: 15_000, medium_ms: 30_000, low_ms: 60_000 } }
}

impl PriorityIntervals {
  pub fn interval(&self, priority: Priority) -> Duration {
    let ms = match priority {
      Priority::High => self.high_ms,
      Priority::Medium => self.medium_ms,
      Priority::Low => self.low_ms,
    };
    Duration::from_millis(ms)
  }

  fn validate(&self) -> Result<()> {
    if self.high_ms == 0 || self.medium_ms == 0 || self.low_ms == 0 {
      return Err(Error::Config("priority intervals must be positive".into()));
    }
    Ok(())
  }
}

// ─── Retry and timeouts ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
  /// Retries after the first attempt.
  pub max_retries:   u32,
  pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
  fn default() -> Self { Self { max_retries: 3, base_delay_ms: 5_000 } }
}

impl RetryPolicy {
  /// Delay before retry `k` (1-based): `base * 2^(k-1)`.
  pub fn delay_for(&self, retry: u32) -> Duration {
    let factor = 2u32.saturating_pow(retry.saturating_sub(1));
    Duration::from_millis(self.base_delay_ms).saturating_mul(factor)
  }
}

/// Per-call timeouts for external collaborators, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Timeouts {
  pub locate_ms:  u64,
  pub history_ms: u64,
  pub notify_ms:  u64,
}

impl Default for Timeouts {
  fn default() -> Self { Self { locate_ms: 10_000, history_ms: 15_000, notify_ms: 5_000 } }
}

impl Timeouts {
  pub fn locate(&self) -> Duration { Duration::from_millis(self.locate_ms) }

  pub fn history(&self) -> Duration { Duration::from_millis(self.history_ms) }

  pub fn notify(&self) -> Duration { Duration::from_millis(self.notify_ms) }
}

// ─── External endpoints ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
  /// Label stored on verification records.
  pub name:       String,
  pub base_url:   String,
  pub api_key:    String,
  pub api_secret: String,
}

impl Default for ProviderConfig {
  fn default() -> Self {
    Self {
      name:       "http".into(),
      base_url:   String::new(),
      api_key:    String::new(),
      api_secret: String::new(),
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
  pub url:                String,
  pub api_key:            String,
  /// Endpoint for the fallback path. Defaults to `url`.
  pub fallback_url:       Option<String>,
  /// Who receives the fallback SMS, e.g. an on-call number.
  pub fallback_recipient: Option<String>,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn defaults_match_documented_values() {
    let cfg = EngineConfig::default();
    assert_eq!(cfg.intervals.interval(Priority::High), Duration::from_secs(15));
    assert_eq!(cfg.intervals.interval(Priority::Medium), Duration::from_secs(30));
    assert_eq!(cfg.intervals.interval(Priority::Low), Duration::from_secs(60));
    assert_eq!(cfg.sync_interval(), Duration::from_secs(300));
    assert_eq!(cfg.zone_cache_ttl(), Duration::from_secs(3600));
    assert_eq!(cfg.active_set_ttl(), Duration::from_secs(300));
    assert_eq!(cfg.timeouts.locate(), Duration::from_secs(10));
    assert_eq!(cfg.timeouts.history(), Duration::from_secs(15));
    assert_eq!(cfg.timeouts.notify(), Duration::from_secs(5));
    assert!(cfg.validate().is_ok());
  }

  #[test]
  fn backoff_doubles_from_base() {
    let policy = RetryPolicy::default();
    assert_eq!(policy.delay_for(1), Duration::from_secs(5));
    assert_eq!(policy.delay_for(2), Duration::from_secs(10));
    assert_eq!(policy.delay_for(3), Duration::from_secs(20));
  }

  #[test]
  fn zero_interval_is_rejected() {
    let mut cfg = EngineConfig::default();
    cfg.intervals.low_ms = 0;
    assert!(matches!(cfg.validate(), Err(Error::Config(_))));
  }

  #[test]
  fn partial_table_keeps_other_defaults() {
    let cfg: EngineConfig = serde_json::from_value(serde_json::json!({
      "intervals": { "high_ms": 5000 },
      "retry": { "max_retries": 1 }
    }))
    .unwrap();
    assert_eq!(cfg.intervals.high_ms, 5000);
    assert_eq!(cfg.intervals.medium_ms, 30_000);
    assert_eq!(cfg.retry.max_retries, 1);
    assert_eq!(cfg.retry.base_delay_ms, 5_000);
  }
}

//! Verification records, the audit trail of every location check.
//!
//! A record is written once, at the end of a check, and never updated. Its
//! shape covers both outcomes that produce one: a check that evaluated the
//! zones, and a check whose location fetch failed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
  geofence::{Coordinates, DistanceKind},
  subject::Channel,
};

// ─── Status ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
  Success,
  /// Location obtained, but a zone had to be skipped or the alert could not
  /// be delivered.
  PartialSuccess,
  /// No location could be obtained.
  Failed,
}

// ─── Per-zone results ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneCheck {
  pub zone_id:           Uuid,
  pub zone_name:         String,
  pub inside:            bool,
  /// Meters to the zone boundary; negative when inside.
  pub signed_distance_m: f64,
  pub distance_kind:     DistanceKind,
}

/// A zone left out of evaluation because its stored geometry is unusable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExcludedZone {
  pub zone_id: Uuid,
  pub reason:  String,
}

/// Zones form a union of permitted areas: the subject is in violation only
/// when outside every evaluated zone. With nothing evaluated there is nothing
/// to violate.
pub fn boundary_violation(checks: &[ZoneCheck]) -> bool {
  !checks.is_empty() && !checks.iter().any(|c| c.inside)
}

// ─── Notification outcome ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationStatus {
  Sent,
  Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationOutcome {
  pub status:        NotificationStatus,
  pub channels:      Vec<Channel>,
  /// Display names of whoever the alert went to.
  pub recipients:    Vec<String>,
  pub fallback_used: bool,
  pub error:         Option<String>,
  pub attempted_at:  DateTime<Utc>,
}

// ─── Provider metadata ───────────────────────────────────────────────────────

/// Round-trip details of the location lookup that fed a check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderMeta {
  pub provider:       String,
  /// Correlation id of the final attempt.
  pub correlation_id: Uuid,
  /// Wall time across every attempt, backoff included.
  pub latency_ms:     u64,
  pub status_code:    Option<u16>,
  pub raw:            Option<serde_json::Value>,
}

// ─── Record ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ObservedLocation {
  pub coordinates: Coordinates,
  pub accuracy_m:  f64,
}

/// Immutable audit entry for one check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationRecord {
  pub record_id:          Uuid,
  pub subject_id:         Uuid,
  pub checked_at:         DateTime<Utc>,
  /// Absent when the location fetch failed.
  pub location:           Option<ObservedLocation>,
  pub zone_checks:        Vec<ZoneCheck>,
  pub excluded_zones:     Vec<ExcludedZone>,
  pub boundary_violation: bool,
  pub notification:       Option<NotificationOutcome>,
  pub provider:           ProviderMeta,
  pub retry_count:        u32,
  pub status:             CheckStatus,
  pub error:              Option<String>,
}

#[cfg(test)]
mod tests {
  use super::*;

  fn check(inside: bool) -> ZoneCheck {
    ZoneCheck {
      zone_id:           Uuid::new_v4(),
      zone_name:         "zone".into(),
      inside,
      signed_distance_m: if inside { -10.0 } else { 10.0 },
      distance_kind:     DistanceKind::Exact,
    }
  }

  #[test]
  fn violation_requires_outside_every_zone() {
    assert!(!boundary_violation(&[check(false), check(true), check(false)]));
    assert!(!boundary_violation(&[check(true)]));
    assert!(boundary_violation(&[check(false), check(false), check(false)]));
    assert!(boundary_violation(&[check(false)]));
  }

  #[test]
  fn no_evaluated_zones_is_not_a_violation() {
    assert!(!boundary_violation(&[]));
  }
}

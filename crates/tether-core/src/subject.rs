//! The tracked person and the device that locates them.
//!
//! Subjects are owned by the subject-management collaborator. The engine only
//! reads them and writes back the last-known location after each check.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::geofence::Coordinates;

// ─── Priority ────────────────────────────────────────────────────────────────

/// How often a subject is checked. The mapping to an interval lives in the
/// engine configuration, not here.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
  High,
  #[default]
  Medium,
  Low,
}

// ─── Notification settings ───────────────────────────────────────────────────

/// A delivery channel for boundary-violation alerts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
  Email,
  Sms,
  Push,
}

/// Which channels the subject's contacts want alerts on. All on by default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationPreferences {
  pub email: bool,
  pub sms:   bool,
  pub push:  bool,
}

impl Default for NotificationPreferences {
  fn default() -> Self { Self { email: true, sms: true, push: true } }
}

impl NotificationPreferences {
  /// Enabled channels in a stable order (email, sms, push).
  pub fn enabled_channels(&self) -> Vec<Channel> {
    let mut channels = Vec::with_capacity(3);
    if self.email {
      channels.push(Channel::Email);
    }
    if self.sms {
      channels.push(Channel::Sms);
    }
    if self.push {
      channels.push(Channel::Push);
    }
    channels
  }
}

/// Someone to alert when the subject leaves every safe zone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmergencyContact {
  pub name:         String,
  pub phone:        String,
  pub email:        Option<String>,
  /// Free text, e.g. "mother" or "caregiver".
  pub relationship: Option<String>,
}

// ─── Location ────────────────────────────────────────────────────────────────

/// The most recent successfully observed position of a subject.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LastKnownLocation {
  pub coordinates: Coordinates,
  /// Provider-reported accuracy radius in meters.
  pub accuracy_m:  f64,
  pub observed_at: DateTime<Utc>,
}

// ─── Subject ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subject {
  pub subject_id:          Uuid,
  pub name:                String,
  /// Identifier the location provider knows the carried device by.
  pub device_id:           String,
  pub monitoring_active:   bool,
  pub priority:            Priority,
  pub emergency_contacts:  Vec<EmergencyContact>,
  pub notification_prefs:  NotificationPreferences,
  pub last_known_location: Option<LastKnownLocation>,
  pub created_at:          DateTime<Utc>,
}

impl Subject {
  /// Whether the engine should check this subject at all.
  pub fn is_eligible(&self) -> bool { self.monitoring_active }
}

/// Input to [`crate::store::MonitorStore::add_subject`]. `subject_id` and
/// `created_at` are assigned by the store.
#[derive(Debug, Clone)]
pub struct NewSubject {
  pub name:               String,
  pub device_id:          String,
  pub monitoring_active:  bool,
  pub priority:           Priority,
  pub emergency_contacts: Vec<EmergencyContact>,
  pub notification_prefs: NotificationPreferences,
}

impl NewSubject {
  /// Monitored, medium priority, no contacts, every channel enabled.
  pub fn new(name: impl Into<String>, device_id: impl Into<String>) -> Self {
    Self {
      name:               name.into(),
      device_id:          device_id.into(),
      monitoring_active:  true,
      priority:           Priority::default(),
      emergency_contacts: Vec::new(),
      notification_prefs: NotificationPreferences::default(),
    }
  }
}

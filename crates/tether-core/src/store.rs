//! The `MonitorStore` trait and supporting query types.
//!
//! The trait is implemented by storage backends (e.g. `tether-store-sqlite`).
//! The engine and the HTTP layer depend on this abstraction, not on any
//! concrete backend.

use std::future::Future;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
  record::VerificationRecord,
  subject::{LastKnownLocation, NewSubject, Priority, Subject},
  zone::{NewSafeZone, SafeZone},
};

// ─── Query type ──────────────────────────────────────────────────────────────

/// Filter for [`MonitorStore::list_records`] and
/// [`MonitorStore::count_records`]. Results are newest first.
#[derive(Debug, Clone, Default)]
pub struct RecordQuery {
  pub subject_id:         Option<Uuid>,
  pub boundary_violation: Option<bool>,
  pub checked_after:      Option<DateTime<Utc>>,
  pub checked_before:     Option<DateTime<Utc>>,
  pub limit:              Option<usize>,
  pub offset:             Option<usize>,
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Abstraction over the persistence the engine talks to: subjects, their
/// safe zones, and the append-only verification log.
///
/// Verification records are never updated or deleted once appended.
///
/// All methods return `Send` futures so the trait can be used from spawned
/// tokio tasks.
pub trait MonitorStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  // ── Subjects ──────────────────────────────────────────────────────────

  /// Create and persist a new subject.
  fn add_subject(
    &self,
    input: NewSubject,
  ) -> impl Future<Output = Result<Subject, Self::Error>> + Send + '_;

  /// Retrieve a subject by UUID. Returns `None` if not found.
  fn find_subject(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<Subject>, Self::Error>> + Send + '_;

  /// Every subject with monitoring enabled.
  fn find_active_monitored(
    &self,
  ) -> impl Future<Output = Result<Vec<Subject>, Self::Error>> + Send + '_;

  /// Turn monitoring on or off. Returns `false` if the subject is unknown.
  fn set_monitoring(
    &self,
    id: Uuid,
    active: bool,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  /// Change a subject's priority tier. Returns `false` if the subject is
  /// unknown.
  fn set_priority(
    &self,
    id: Uuid,
    priority: Priority,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  /// Overwrite the subject's last-known location.
  fn update_last_known_location(
    &self,
    id: Uuid,
    location: LastKnownLocation,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  // ── Safe zones ────────────────────────────────────────────────────────

  /// Persist a new, active zone. Geometry is stored as given; validation is
  /// the caller's concern.
  fn add_zone(
    &self,
    input: NewSafeZone,
  ) -> impl Future<Output = Result<SafeZone, Self::Error>> + Send + '_;

  /// Active zones of a subject, oldest first.
  fn find_active_zones_for_subject(
    &self,
    subject_id: Uuid,
  ) -> impl Future<Output = Result<Vec<SafeZone>, Self::Error>> + Send + '_;

  /// Toggle a zone. Returns the updated zone, or `None` if it is unknown.
  fn set_zone_active(
    &self,
    zone_id: Uuid,
    active: bool,
  ) -> impl Future<Output = Result<Option<SafeZone>, Self::Error>> + Send + '_;

  /// Remove a zone. Returns the removed zone, or `None` if it is unknown.
  fn delete_zone(
    &self,
    zone_id: Uuid,
  ) -> impl Future<Output = Result<Option<SafeZone>, Self::Error>> + Send + '_;

  // ── Verification records (append-only) ───────────────────────────────

  /// Append a record and return its id.
  fn append_record<'a>(
    &'a self,
    record: &'a VerificationRecord,
  ) -> impl Future<Output = Result<Uuid, Self::Error>> + Send + 'a;

  /// Retrieve a record by UUID. Returns `None` if not found.
  fn get_record(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<VerificationRecord>, Self::Error>> + Send + '_;

  /// Records matching `query`, newest first.
  fn list_records<'a>(
    &'a self,
    query: &'a RecordQuery,
  ) -> impl Future<Output = Result<Vec<VerificationRecord>, Self::Error>> + Send + 'a;

  /// Number of records matching `query`, ignoring `limit` and `offset`.
  fn count_records<'a>(
    &'a self,
    query: &'a RecordQuery,
  ) -> impl Future<Output = Result<u64, Self::Error>> + Send + 'a;
}

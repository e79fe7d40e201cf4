//! In-memory doubles for the engine's collaborators.
//!
//! The engine tests run with a paused tokio clock, so the doubles answer
//! without leaving the runtime (no database thread to wait on).

use std::{
  collections::VecDeque,
  future::Future,
  sync::{
    Arc, Mutex,
    atomic::{AtomicBool, AtomicUsize, Ordering},
  },
  time::Duration,
};

use chrono::Utc;
use serde_json::json;
use tether_core::{
  cache::CacheStore,
  geofence::Coordinates,
  record::{CheckStatus, ProviderMeta, VerificationRecord},
  store::{MonitorStore, RecordQuery},
  subject::{LastKnownLocation, NewSubject, Priority, Subject},
  zone::{NewSafeZone, SafeZone},
};
use thiserror::Error;
use tokio::time::Instant;
use uuid::Uuid;

use crate::{
  Result,
  engine::{CheckOutcome, SubjectCheck},
  notify::{NotificationRequest, NotificationResponse, NotificationSink, NotifyError},
  provider::{HistoryPoint, HistoryQuery, LocationError, LocationErrorKind, LocationSource, Reading},
};

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> { m.lock().unwrap_or_else(|e| e.into_inner()) }

// ─── Fixtures ────────────────────────────────────────────────────────────────

pub fn subject_from(input: NewSubject) -> Subject {
  Subject {
    subject_id:          Uuid::new_v4(),
    name:                input.name,
    device_id:           input.device_id,
    monitoring_active:   input.monitoring_active,
    priority:            input.priority,
    emergency_contacts:  input.emergency_contacts,
    notification_prefs:  input.notification_prefs,
    last_known_location: None,
    created_at:          Utc::now(),
  }
}

pub fn reading(longitude: f64, latitude: f64) -> Reading {
  Reading {
    coordinates: Coordinates::new(longitude, latitude),
    accuracy_m:  10.0,
    status_code: Some(200),
    raw:         Some(json!({ "location": { "longitude": longitude, "latitude": latitude } })),
  }
}

pub fn failed_record(subject_id: Uuid) -> VerificationRecord {
  VerificationRecord {
    record_id: Uuid::new_v4(),
    subject_id,
    checked_at: Utc::now(),
    location: None,
    zone_checks: Vec::new(),
    excluded_zones: Vec::new(),
    boundary_violation: false,
    notification: None,
    provider: ProviderMeta {
      provider:       "scripted".into(),
      correlation_id: Uuid::new_v4(),
      latency_ms:     0,
      status_code:    Some(503),
      raw:            None,
    },
    retry_count: 3,
    status: CheckStatus::Failed,
    error: Some("unavailable".into()),
  }
}

// ─── MemoryStore ─────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum MemoryStoreError {
  #[error("append refused")]
  AppendRefused,
  #[error("subject not found: {0}")]
  SubjectNotFound(Uuid),
  #[error("duplicate record: {0}")]
  Duplicate(Uuid),
}

#[derive(Default)]
struct Tables {
  subjects: Vec<Subject>,
  zones:    Vec<SafeZone>,
  records:  Vec<VerificationRecord>,
}

#[derive(Default)]
pub struct MemoryStore {
  tables:       Mutex<Tables>,
  fail_appends: AtomicBool,
}

impl MemoryStore {
  pub fn fail_appends(&self, fail: bool) { self.fail_appends.store(fail, Ordering::SeqCst); }

  pub fn records(&self) -> Vec<VerificationRecord> { lock(&self.tables).records.clone() }

  /// Replace a zone's stored geometry without validation.
  pub fn corrupt_zone(&self, zone_id: Uuid, geometry: tether_core::zone::ZoneGeometry) {
    let mut tables = lock(&self.tables);
    if let Some(zone) = tables.zones.iter_mut().find(|z| z.zone_id == zone_id) {
      zone.geometry = geometry;
    }
  }

  fn matching(&self, query: &RecordQuery) -> Vec<VerificationRecord> {
    let tables = lock(&self.tables);
    let mut rows: Vec<VerificationRecord> = tables
      .records
      .iter()
      .rev()
      .filter(|r| query.subject_id.is_none_or(|id| r.subject_id == id))
      .filter(|r| query.boundary_violation.is_none_or(|v| r.boundary_violation == v))
      .filter(|r| query.checked_after.is_none_or(|t| r.checked_at >= t))
      .filter(|r| query.checked_before.is_none_or(|t| r.checked_at <= t))
      .cloned()
      .collect();
    rows.sort_by(|a, b| b.checked_at.cmp(&a.checked_at));
    rows
  }
}

fn ready<T>(value: T) -> std::future::Ready<T> { std::future::ready(value) }

impl MonitorStore for MemoryStore {
  type Error = MemoryStoreError;

  fn add_subject(
    &self,
    input: NewSubject,
  ) -> impl Future<Output = Result<Subject, Self::Error>> + Send + '_ {
    let subject = subject_from(input);
    lock(&self.tables).subjects.push(subject.clone());
    ready(Ok(subject))
  }

  fn find_subject(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<Subject>, Self::Error>> + Send + '_ {
    let found = lock(&self.tables).subjects.iter().find(|s| s.subject_id == id).cloned();
    ready(Ok(found))
  }

  fn find_active_monitored(
    &self,
  ) -> impl Future<Output = Result<Vec<Subject>, Self::Error>> + Send + '_ {
    let active =
      lock(&self.tables).subjects.iter().filter(|s| s.monitoring_active).cloned().collect();
    ready(Ok(active))
  }

  fn set_monitoring(
    &self,
    id: Uuid,
    active: bool,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_ {
    let mut tables = lock(&self.tables);
    let found = tables.subjects.iter_mut().find(|s| s.subject_id == id);
    let changed = found.map(|s| s.monitoring_active = active).is_some();
    ready(Ok(changed))
  }

  fn set_priority(
    &self,
    id: Uuid,
    priority: Priority,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_ {
    let mut tables = lock(&self.tables);
    let found = tables.subjects.iter_mut().find(|s| s.subject_id == id);
    let changed = found.map(|s| s.priority = priority).is_some();
    ready(Ok(changed))
  }

  fn update_last_known_location(
    &self,
    id: Uuid,
    location: LastKnownLocation,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_ {
    let mut tables = lock(&self.tables);
    let result = match tables.subjects.iter_mut().find(|s| s.subject_id == id) {
      Some(s) => {
        s.last_known_location = Some(location);
        Ok(())
      }
      None => Err(MemoryStoreError::SubjectNotFound(id)),
    };
    ready(result)
  }

  fn add_zone(
    &self,
    input: NewSafeZone,
  ) -> impl Future<Output = Result<SafeZone, Self::Error>> + Send + '_ {
    let zone = SafeZone {
      zone_id:     Uuid::new_v4(),
      subject_id:  input.subject_id,
      name:        input.name,
      description: input.description,
      geometry:    input.geometry,
      is_active:   true,
      schedule:    input.schedule,
      created_at:  Utc::now(),
    };
    lock(&self.tables).zones.push(zone.clone());
    ready(Ok(zone))
  }

  fn find_active_zones_for_subject(
    &self,
    subject_id: Uuid,
  ) -> impl Future<Output = Result<Vec<SafeZone>, Self::Error>> + Send + '_ {
    let zones = lock(&self.tables)
      .zones
      .iter()
      .filter(|z| z.subject_id == subject_id && z.is_active)
      .cloned()
      .collect();
    ready(Ok(zones))
  }

  fn set_zone_active(
    &self,
    zone_id: Uuid,
    active: bool,
  ) -> impl Future<Output = Result<Option<SafeZone>, Self::Error>> + Send + '_ {
    let mut tables = lock(&self.tables);
    let updated = tables.zones.iter_mut().find(|z| z.zone_id == zone_id).map(|z| {
      z.is_active = active;
      z.clone()
    });
    ready(Ok(updated))
  }

  fn delete_zone(
    &self,
    zone_id: Uuid,
  ) -> impl Future<Output = Result<Option<SafeZone>, Self::Error>> + Send + '_ {
    let mut tables = lock(&self.tables);
    let removed = tables
      .zones
      .iter()
      .position(|z| z.zone_id == zone_id)
      .map(|idx| tables.zones.remove(idx));
    ready(Ok(removed))
  }

  fn append_record<'a>(
    &'a self,
    record: &'a VerificationRecord,
  ) -> impl Future<Output = Result<Uuid, Self::Error>> + Send + 'a {
    let result = if self.fail_appends.load(Ordering::SeqCst) {
      Err(MemoryStoreError::AppendRefused)
    } else {
      let mut tables = lock(&self.tables);
      if tables.records.iter().any(|r| r.record_id == record.record_id) {
        Err(MemoryStoreError::Duplicate(record.record_id))
      } else {
        tables.records.push(record.clone());
        Ok(record.record_id)
      }
    };
    ready(result)
  }

  fn get_record(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<VerificationRecord>, Self::Error>> + Send + '_ {
    let found = lock(&self.tables).records.iter().find(|r| r.record_id == id).cloned();
    ready(Ok(found))
  }

  fn list_records<'a>(
    &'a self,
    query: &'a RecordQuery,
  ) -> impl Future<Output = Result<Vec<VerificationRecord>, Self::Error>> + Send + 'a {
    let rows = self
      .matching(query)
      .into_iter()
      .skip(query.offset.unwrap_or(0))
      .take(query.limit.unwrap_or(100))
      .collect();
    ready(Ok(rows))
  }

  fn count_records<'a>(
    &'a self,
    query: &'a RecordQuery,
  ) -> impl Future<Output = Result<u64, Self::Error>> + Send + 'a {
    ready(Ok(self.matching(query).len() as u64))
  }
}

// ─── FailingCache ────────────────────────────────────────────────────────────

/// A cache whose every operation fails.
pub struct FailingCache;

impl CacheStore for FailingCache {
  type Error = std::io::Error;

  fn get<'a>(
    &'a self,
    _key: &'a str,
  ) -> impl Future<Output = Result<Option<String>, Self::Error>> + Send + 'a {
    ready(Err(std::io::Error::other("cache down")))
  }

  fn set<'a>(
    &'a self,
    _key: &'a str,
    _value: String,
    _ttl: Duration,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a {
    ready(Err(std::io::Error::other("cache down")))
  }

  fn delete<'a>(
    &'a self,
    _key: &'a str,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a {
    ready(Err(std::io::Error::other("cache down")))
  }
}

// ─── ScriptedSource ──────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct SourceCall {
  pub device_id:      String,
  pub correlation_id: Uuid,
  pub at:             Instant,
}

/// A [`LocationSource`] that replays a queue of results, one per call.
///
/// An exhausted queue answers with a permanent error.
pub struct ScriptedSource {
  script:  Mutex<VecDeque<Result<Reading, LocationError>>>,
  delays:  Mutex<Vec<(usize, Duration)>>,
  history: Vec<HistoryPoint>,
  calls:   Mutex<Vec<SourceCall>>,
}

impl ScriptedSource {
  pub fn new(script: Vec<Result<Reading, LocationError>>) -> Self {
    Self {
      script:  Mutex::new(script.into()),
      delays:  Mutex::new(Vec::new()),
      history: Vec::new(),
      calls:   Mutex::new(Vec::new()),
    }
  }

  /// Delay the `call`-th request (0-based) by `delay`.
  pub fn with_delay(self, call: usize, delay: Duration) -> Self {
    lock(&self.delays).push((call, delay));
    self
  }

  pub fn with_history(mut self, points: Vec<HistoryPoint>) -> Self {
    self.history = points;
    self
  }

  pub fn push(&self, result: Result<Reading, LocationError>) { lock(&self.script).push_back(result); }

  pub fn calls(&self) -> Vec<SourceCall> { lock(&self.calls).clone() }

  fn next(&self, device_id: &str, correlation_id: Uuid) -> (Option<Duration>, Option<Result<Reading, LocationError>>) {
    let mut calls = lock(&self.calls);
    let index = calls.len();
    calls.push(SourceCall { device_id: device_id.to_owned(), correlation_id, at: Instant::now() });
    let delay = lock(&self.delays).iter().find(|(i, _)| *i == index).map(|(_, d)| *d);
    (delay, lock(&self.script).pop_front())
  }
}

impl LocationSource for ScriptedSource {
  fn name(&self) -> &str { "scripted" }

  fn locate<'a>(
    &'a self,
    device_id: &'a str,
    correlation_id: Uuid,
  ) -> impl Future<Output = Result<Reading, LocationError>> + Send + 'a {
    let (delay, result) = self.next(device_id, correlation_id);
    async move {
      if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
      }
      result.unwrap_or_else(|| {
        Err(LocationError::new(LocationErrorKind::Rejected, "script exhausted"))
      })
    }
  }

  fn history<'a>(
    &'a self,
    device_id: &'a str,
    _query: &'a HistoryQuery,
    correlation_id: Uuid,
  ) -> impl Future<Output = Result<Vec<HistoryPoint>, LocationError>> + Send + 'a {
    let (delay, result) = self.next(device_id, correlation_id);
    async move {
      if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
      }
      match result {
        Some(Err(e)) => Err(e),
        _ => Ok(self.history.clone()),
      }
    }
  }
}

// ─── RecordingSink ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub enum SinkReply {
  Delivered,
  Undelivered,
  Error,
  Hang,
}

/// A [`NotificationSink`] that records requests and replays scripted replies.
/// An empty script delivers.
pub struct RecordingSink {
  replies:  Mutex<VecDeque<SinkReply>>,
  requests: Mutex<Vec<NotificationRequest>>,
}

impl RecordingSink {
  pub fn new(replies: Vec<SinkReply>) -> Self {
    Self { replies: Mutex::new(replies.into()), requests: Mutex::new(Vec::new()) }
  }

  pub fn requests(&self) -> Vec<NotificationRequest> { lock(&self.requests).clone() }
}

impl NotificationSink for RecordingSink {
  fn send<'a>(
    &'a self,
    request: &'a NotificationRequest,
  ) -> impl Future<Output = Result<NotificationResponse, NotifyError>> + Send + 'a {
    lock(&self.requests).push(request.clone());
    let reply = lock(&self.replies).pop_front().unwrap_or(SinkReply::Delivered);
    async move {
      match reply {
        SinkReply::Delivered => Ok(NotificationResponse { delivered: true, ..Default::default() }),
        SinkReply::Undelivered => Ok(NotificationResponse::default()),
        SinkReply::Error => Err(NotifyError::Status { status: 500, body: "boom".into() }),
        SinkReply::Hang => std::future::pending().await,
      }
    }
  }
}

// ─── CountingCheck ───────────────────────────────────────────────────────────

/// A [`SubjectCheck`] that sleeps for a fixed time and counts what it saw.
#[derive(Default)]
pub struct CountingCheck {
  pub delay:         Duration,
  pub started:       AtomicUsize,
  pub finished:      AtomicUsize,
  in_flight:         AtomicUsize,
  pub max_in_flight: AtomicUsize,
  fail:              bool,
  seen:              Mutex<Vec<Uuid>>,
}

impl CountingCheck {
  pub fn new(delay: Duration) -> Arc<Self> { Arc::new(Self { delay, ..Default::default() }) }

  /// Like [`CountingCheck::new`], but every check ends in an error.
  pub fn failing(delay: Duration) -> Arc<Self> {
    Arc::new(Self { delay, fail: true, ..Default::default() })
  }

  pub fn started(&self) -> usize { self.started.load(Ordering::SeqCst) }

  pub fn finished(&self) -> usize { self.finished.load(Ordering::SeqCst) }

  pub fn max_in_flight(&self) -> usize { self.max_in_flight.load(Ordering::SeqCst) }

  pub fn checks_for(&self, subject_id: Uuid) -> usize {
    lock(&self.seen).iter().filter(|id| **id == subject_id).count()
  }
}

impl SubjectCheck for CountingCheck {
  fn check(&self, subject_id: Uuid) -> impl Future<Output = Result<CheckOutcome>> + Send + '_ {
    async move {
      self.started.fetch_add(1, Ordering::SeqCst);
      lock(&self.seen).push(subject_id);
      let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
      self.max_in_flight.fetch_max(now, Ordering::SeqCst);
      tokio::time::sleep(self.delay).await;
      self.in_flight.fetch_sub(1, Ordering::SeqCst);
      self.finished.fetch_add(1, Ordering::SeqCst);
      if self.fail {
        return Err(crate::Error::Config("scripted failure".into()));
      }
      Ok(CheckOutcome::NoZones)
    }
  }
}

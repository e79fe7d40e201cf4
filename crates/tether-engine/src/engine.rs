//! One location check, start to finish.
//!
//! A check loads the subject and the zones in force, fetches the position,
//! evaluates every zone, alerts on a violation, appends a single record and
//! finally refreshes the subject's last-known location. Steps run in that
//! order; anything the check cannot recover from ends it early.

use std::{future::Future, sync::Arc, time::Duration};

use chrono::Utc;
use tether_core::{
  cache::CacheStore,
  geofence::{self, Coordinates},
  record::{
    CheckStatus, ExcludedZone, NotificationOutcome, NotificationStatus, ObservedLocation,
    VerificationRecord, ZoneCheck, boundary_violation,
  },
  store::MonitorStore,
  subject::LastKnownLocation,
  zone::SafeZone,
};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::{
  Error, Result,
  cache::ZoneCache,
  notify::{NotificationDispatcher, NotificationSink, Violation},
  provider::{
    DeviceLocator, HistoryPoint, HistoryQuery, LocationFailure, LocationFix, LocationProvider,
    LocationSource,
  },
  recorder::VerificationRecorder,
  zones::ZoneRegistry,
};

// ─── Outcome ─────────────────────────────────────────────────────────────────

/// How a check ended.
#[derive(Debug, Clone, PartialEq)]
pub enum CheckOutcome {
  /// Unknown subject or monitoring disabled. Nothing was recorded.
  NotEligible,
  /// No zone in force. Nothing was recorded.
  NoZones,
  /// The provider gave up; a `failed` record was written.
  LocationFailed { record_id: Uuid, error: String },
  Completed { record_id: Uuid, boundary_violation: bool, status: CheckStatus },
}

impl CheckOutcome {
  pub fn record_id(&self) -> Option<Uuid> {
    match self {
      Self::LocationFailed { record_id, .. } | Self::Completed { record_id, .. } => Some(*record_id),
      Self::NotEligible | Self::NoZones => None,
    }
  }
}

/// Runs one check for one subject. Implemented by [`VerificationEngine`];
/// the scheduler and the HTTP trigger only see this trait.
pub trait SubjectCheck: Send + Sync {
  fn check(&self, subject_id: Uuid) -> impl Future<Output = Result<CheckOutcome>> + Send + '_;
}

// ─── Zone evaluation ─────────────────────────────────────────────────────────

/// Test `point` against every zone. Zones whose geometry cannot be evaluated
/// are returned separately rather than failing the whole evaluation.
pub fn evaluate_zones(point: Coordinates, zones: &[SafeZone]) -> (Vec<ZoneCheck>, Vec<ExcludedZone>) {
  let mut checks = Vec::with_capacity(zones.len());
  let mut excluded = Vec::new();
  for zone in zones {
    match geofence::contains(point, &zone.geometry) {
      Ok(c) => checks.push(ZoneCheck {
        zone_id:           zone.zone_id,
        zone_name:         zone.name.clone(),
        inside:            c.inside,
        signed_distance_m: c.signed_distance_m,
        distance_kind:     c.distance_kind,
      }),
      Err(e) => excluded.push(ExcludedZone { zone_id: zone.zone_id, reason: e.to_string() }),
    }
  }
  (checks, excluded)
}

fn status_for(
  checks: &[ZoneCheck],
  excluded: &[ExcludedZone],
  notification: Option<&NotificationOutcome>,
) -> CheckStatus {
  let undelivered = notification.is_some_and(|n| n.status == NotificationStatus::Failed);
  if checks.is_empty() || !excluded.is_empty() || undelivered {
    CheckStatus::PartialSuccess
  } else {
    CheckStatus::Success
  }
}

// ─── Engine ──────────────────────────────────────────────────────────────────

pub struct VerificationEngine<S, C, L, N> {
  store:    Arc<S>,
  zones:    ZoneCache<S, C>,
  provider: LocationProvider<L>,
  notifier: NotificationDispatcher<N>,
  recorder: VerificationRecorder<S>,
}

impl<S, C, L, N> VerificationEngine<S, C, L, N>
where
  S: MonitorStore,
  C: CacheStore,
  L: LocationSource,
  N: NotificationSink,
{
  pub fn new(
    store: Arc<S>,
    cache: Arc<C>,
    provider: LocationProvider<L>,
    notifier: NotificationDispatcher<N>,
    zone_cache_ttl: Duration,
  ) -> Self {
    Self {
      zones: ZoneCache::new(Arc::clone(&store), cache, zone_cache_ttl),
      recorder: VerificationRecorder::new(Arc::clone(&store)),
      store,
      provider,
      notifier,
    }
  }

  pub fn zone_cache(&self) -> &ZoneCache<S, C> { &self.zones }

  /// Zone writes that invalidate this engine's zone cache.
  pub fn zone_registry(&self) -> ZoneRegistry<'_, S, C> {
    ZoneRegistry::new(Arc::clone(&self.store), &self.zones)
  }

  pub fn provider(&self) -> &LocationProvider<L> { &self.provider }

  pub fn notifier(&self) -> &NotificationDispatcher<N> { &self.notifier }

  #[instrument(skip(self), fields(device_id = tracing::field::Empty))]
  pub async fn run_check(&self, subject_id: Uuid) -> Result<CheckOutcome> {
    let checked_at = Utc::now();

    let subject = match self.store.find_subject(subject_id).await.map_err(Error::store)? {
      Some(subject) if subject.is_eligible() => subject,
      _ => {
        debug!("subject not eligible; skipping");
        return Ok(CheckOutcome::NotEligible);
      }
    };
    tracing::Span::current().record("device_id", subject.device_id.as_str());

    let zones: Vec<SafeZone> = self
      .zones
      .get(subject_id)
      .await?
      .into_iter()
      .filter(|z| z.is_in_force(checked_at))
      .collect();
    if zones.is_empty() {
      warn!("no safe zone in force; skipping");
      return Ok(CheckOutcome::NoZones);
    }

    let fix = match self.provider.fetch(&subject.device_id).await {
      Ok(fix) => fix,
      Err(failure) => {
        let error = failure.to_string();
        let record = VerificationRecord {
          record_id: Uuid::new_v4(),
          subject_id,
          checked_at,
          location: None,
          zone_checks: Vec::new(),
          excluded_zones: Vec::new(),
          boundary_violation: false,
          notification: None,
          provider: failure.meta(),
          retry_count: failure.retry_count,
          status: CheckStatus::Failed,
          error: Some(error.clone()),
        };
        let record_id = self.recorder.record(&record).await?;
        warn!(%record_id, %error, "location unavailable; check failed");
        return Ok(CheckOutcome::LocationFailed { record_id, error });
      }
    };

    let (zone_checks, excluded_zones) = evaluate_zones(fix.coordinates, &zones);
    for ex in &excluded_zones {
      warn!(zone_id = %ex.zone_id, reason = %ex.reason, "zone excluded from evaluation");
    }
    let violation = boundary_violation(&zone_checks);

    let location = ObservedLocation { coordinates: fix.coordinates, accuracy_m: fix.accuracy_m };
    let notification = if violation {
      let alert = Violation::new(&subject, location, &zone_checks, checked_at);
      Some(self.notifier.dispatch(&alert).await.into_record())
    } else {
      None
    };

    let status = status_for(&zone_checks, &excluded_zones, notification.as_ref());
    let record = VerificationRecord {
      record_id: Uuid::new_v4(),
      subject_id,
      checked_at,
      location: Some(location),
      zone_checks,
      excluded_zones,
      boundary_violation: violation,
      notification,
      provider: fix.meta,
      retry_count: fix.retry_count,
      status,
      error: None,
    };
    let record_id = self.recorder.record(&record).await?;

    let last_known = LastKnownLocation {
      coordinates: fix.coordinates,
      accuracy_m:  fix.accuracy_m,
      observed_at: fix.observed_at,
    };
    if let Err(e) = self.store.update_last_known_location(subject_id, last_known).await {
      warn!(error = %e, "cannot update last-known location");
    }

    info!(%record_id, boundary_violation = violation, ?status, "check complete");
    Ok(CheckOutcome::Completed { record_id, boundary_violation: violation, status })
  }
}

impl<S, C, L, N> SubjectCheck for VerificationEngine<S, C, L, N>
where
  S: MonitorStore,
  C: CacheStore,
  L: LocationSource,
  N: NotificationSink,
{
  fn check(&self, subject_id: Uuid) -> impl Future<Output = Result<CheckOutcome>> + Send + '_ {
    self.run_check(subject_id)
  }
}

impl<S, C, L, N> DeviceLocator for VerificationEngine<S, C, L, N>
where
  S: MonitorStore,
  C: CacheStore,
  L: LocationSource,
  N: NotificationSink,
{
  fn locate<'a>(
    &'a self,
    device_id: &'a str,
  ) -> impl Future<Output = std::result::Result<LocationFix, LocationFailure>> + Send + 'a {
    self.provider.fetch(device_id)
  }

  fn history<'a>(
    &'a self,
    device_id: &'a str,
    query: &'a HistoryQuery,
  ) -> impl Future<Output = std::result::Result<Vec<HistoryPoint>, LocationFailure>> + Send + 'a {
    self.provider.fetch_history(device_id, query)
  }
}

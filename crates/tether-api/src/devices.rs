//! On-demand device lookups. Nothing here writes a verification record.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`  | `/devices/:device_id/location` | Current position |
//! | `GET`  | `/devices/:device_id/history` | Optional `start`, `end` (RFC 3339), `limit` (100) |

use axum::{
  Json,
  extract::{Path, Query, State},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tether_core::geofence::Coordinates;
use tether_engine::{
  DeviceLocator, HistoryQuery,
  provider::{HistoryPoint, LocationErrorKind, LocationFailure},
};
use uuid::Uuid;

use crate::{AppState, error::ApiError};

const MAX_HISTORY_LIMIT: u32 = 1000;

fn lookup_error(device_id: &str, failure: LocationFailure) -> ApiError {
  match failure.error.kind {
    LocationErrorKind::InvalidDevice => {
      ApiError::BadRequest(format!("invalid device id {device_id:?}"))
    }
    _ => ApiError::LocationUnavailable(failure.to_string()),
  }
}

// ─── Location ────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct DeviceLocation {
  pub device_id:      String,
  #[serde(flatten)]
  pub coordinates:    Coordinates,
  pub accuracy_m:     f64,
  pub observed_at:    DateTime<Utc>,
  pub provider:       String,
  pub correlation_id: Uuid,
  pub latency_ms:     u64,
  pub retry_count:    u32,
}

/// `GET /devices/:device_id/location`
pub async fn location<S, K, D>(
  State(state): State<AppState<S, K, D>>,
  Path(device_id): Path<String>,
) -> Result<Json<DeviceLocation>, ApiError>
where
  D: DeviceLocator,
{
  let fix = state
    .devices
    .locate(&device_id)
    .await
    .map_err(|f| lookup_error(&device_id, f))?;
  Ok(Json(DeviceLocation {
    device_id,
    coordinates: fix.coordinates,
    accuracy_m: fix.accuracy_m,
    observed_at: fix.observed_at,
    provider: fix.meta.provider,
    correlation_id: fix.meta.correlation_id,
    latency_ms: fix.meta.latency_ms,
    retry_count: fix.retry_count,
  }))
}

// ─── History ─────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct HistoryParams {
  pub start: Option<DateTime<Utc>>,
  pub end:   Option<DateTime<Utc>>,
  pub limit: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct DeviceHistory {
  pub device_id: String,
  pub count:     usize,
  pub data:      Vec<HistoryPoint>,
}

/// `GET /devices/:device_id/history[?start=..][&end=..][&limit=..]`
pub async fn history<S, K, D>(
  State(state): State<AppState<S, K, D>>,
  Path(device_id): Path<String>,
  Query(params): Query<HistoryParams>,
) -> Result<Json<DeviceHistory>, ApiError>
where
  D: DeviceLocator,
{
  if let (Some(start), Some(end)) = (params.start, params.end) {
    if start > end {
      return Err(ApiError::BadRequest("`start` is after `end`".into()));
    }
  }
  if let Some(limit) = params.limit {
    if limit == 0 || limit > MAX_HISTORY_LIMIT {
      return Err(ApiError::BadRequest(format!(
        "limit must be between 1 and {MAX_HISTORY_LIMIT}"
      )));
    }
  }

  let query = HistoryQuery { start: params.start, end: params.end, limit: params.limit };
  let data = state
    .devices
    .history(&device_id, &query)
    .await
    .map_err(|f| lookup_error(&device_id, f))?;
  Ok(Json(DeviceHistory { device_id, count: data.len(), data }))
}

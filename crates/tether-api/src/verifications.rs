//! Handlers for verification history and manual checks.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`  | `/verifications` | Optional `subject_id`, `boundary_violation`, `limit` (50), `page` (1) |
//! | `GET`  | `/verifications/:id` | 404 if not found |
//! | `GET`  | `/subjects/:id/verifications` | Same paging and filters |
//! | `GET`  | `/violations` | Optional `subject_id`, `from`, `to` (RFC 3339), paging |
//! | `POST` | `/verifications/trigger/:subject_id` | Runs one check now |

use axum::{
  Json,
  extract::{Path, Query, State},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tether_core::{
  record::{CheckStatus, VerificationRecord},
  store::{MonitorStore, RecordQuery},
};
use tether_engine::{CheckOutcome, SubjectCheck};
use uuid::Uuid;

use crate::{AppState, error::ApiError};

const DEFAULT_LIMIT: usize = 50;
const MAX_LIMIT: usize = 500;

// ─── Paging ──────────────────────────────────────────────────────────────────

/// One page of results.
#[derive(Debug, Serialize)]
pub struct Page<T> {
  /// Items on this page.
  pub count: usize,
  /// Items across every page.
  pub total: u64,
  pub page:  usize,
  pub pages: u64,
  pub data:  Vec<T>,
}

/// Requested page size and number, both optional.
#[derive(Debug, Clone, Copy, Default)]
pub struct Paging {
  pub limit: Option<usize>,
  pub page:  Option<usize>,
}

impl Paging {
  /// Validated `(limit, page, offset)`.
  fn resolve(self) -> Result<(usize, usize, usize), ApiError> {
    let limit = self.limit.unwrap_or(DEFAULT_LIMIT);
    let page = self.page.unwrap_or(1);
    if limit == 0 || limit > MAX_LIMIT {
      return Err(ApiError::BadRequest(format!("limit must be between 1 and {MAX_LIMIT}")));
    }
    if page == 0 {
      return Err(ApiError::BadRequest("page starts at 1".into()));
    }
    let offset = (page - 1)
      .checked_mul(limit)
      .ok_or_else(|| ApiError::BadRequest(format!("page {page} is out of range")))?;
    Ok((limit, page, offset))
  }
}

async fn fetch_page<S>(
  store: &S,
  mut query: RecordQuery,
  paging: Paging,
) -> Result<Page<VerificationRecord>, ApiError>
where
  S: MonitorStore,
{
  let (limit, page, offset) = paging.resolve()?;
  query.limit = Some(limit);
  query.offset = Some(offset);

  let total = store.count_records(&query).await.map_err(ApiError::store)?;
  let data = store.list_records(&query).await.map_err(ApiError::store)?;
  Ok(Page {
    count: data.len(),
    total,
    page,
    pages: total.div_ceil(limit as u64),
    data,
  })
}

// ─── List ────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ListParams {
  pub subject_id:         Option<Uuid>,
  pub boundary_violation: Option<bool>,
  pub limit:              Option<usize>,
  pub page:               Option<usize>,
}

/// `GET /verifications[?subject_id=..][&boundary_violation=..][&limit=..][&page=..]`
pub async fn list<S, K, D>(
  State(state): State<AppState<S, K, D>>,
  Query(params): Query<ListParams>,
) -> Result<Json<Page<VerificationRecord>>, ApiError>
where
  S: MonitorStore,
{
  let query = RecordQuery {
    subject_id: params.subject_id,
    boundary_violation: params.boundary_violation,
    ..Default::default()
  };
  let paging = Paging { limit: params.limit, page: params.page };
  Ok(Json(fetch_page(state.store.as_ref(), query, paging).await?))
}

// ─── Get one ─────────────────────────────────────────────────────────────────

/// `GET /verifications/:id`
pub async fn get_one<S, K, D>(
  State(state): State<AppState<S, K, D>>,
  Path(id): Path<Uuid>,
) -> Result<Json<VerificationRecord>, ApiError>
where
  S: MonitorStore,
{
  let record = state
    .store
    .get_record(id)
    .await
    .map_err(ApiError::store)?
    .ok_or_else(|| ApiError::NotFound(format!("verification {id} not found")))?;
  Ok(Json(record))
}

// ─── Per subject ─────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct SubjectParams {
  pub boundary_violation: Option<bool>,
  pub limit:              Option<usize>,
  pub page:               Option<usize>,
}

/// `GET /subjects/:id/verifications`
pub async fn for_subject<S, K, D>(
  State(state): State<AppState<S, K, D>>,
  Path(subject_id): Path<Uuid>,
  Query(params): Query<SubjectParams>,
) -> Result<Json<Page<VerificationRecord>>, ApiError>
where
  S: MonitorStore,
{
  let query = RecordQuery {
    subject_id: Some(subject_id),
    boundary_violation: params.boundary_violation,
    ..Default::default()
  };
  let paging = Paging { limit: params.limit, page: params.page };
  Ok(Json(fetch_page(state.store.as_ref(), query, paging).await?))
}

// ─── Violations ──────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ViolationParams {
  pub subject_id: Option<Uuid>,
  pub from:       Option<DateTime<Utc>>,
  pub to:         Option<DateTime<Utc>>,
  pub limit:      Option<usize>,
  pub page:       Option<usize>,
}

/// `GET /violations[?subject_id=..][&from=..][&to=..]`
pub async fn violations<S, K, D>(
  State(state): State<AppState<S, K, D>>,
  Query(params): Query<ViolationParams>,
) -> Result<Json<Page<VerificationRecord>>, ApiError>
where
  S: MonitorStore,
{
  if let (Some(from), Some(to)) = (params.from, params.to) {
    if from > to {
      return Err(ApiError::BadRequest("`from` is after `to`".into()));
    }
  }
  let query = RecordQuery {
    subject_id: params.subject_id,
    boundary_violation: Some(true),
    checked_after: params.from,
    checked_before: params.to,
    ..Default::default()
  };
  let paging = Paging { limit: params.limit, page: params.page };
  Ok(Json(fetch_page(state.store.as_ref(), query, paging).await?))
}

// ─── Trigger ─────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct TriggerResponse {
  pub record_id:          Uuid,
  pub boundary_violation: bool,
  pub status:             CheckStatus,
}

/// `POST /verifications/trigger/:subject_id`
///
/// Runs one check immediately, outside the schedule. The check takes the
/// subject's scheduling guard, so it waits for a scheduled check already in
/// flight.
pub async fn trigger<S, K, D>(
  State(state): State<AppState<S, K, D>>,
  Path(subject_id): Path<Uuid>,
) -> Result<Json<TriggerResponse>, ApiError>
where
  K: SubjectCheck,
{
  match state.check.check(subject_id).await? {
    CheckOutcome::NotEligible => Err(ApiError::BadRequest(format!(
      "subject {subject_id} is unknown or not monitored"
    ))),
    CheckOutcome::NoZones => Err(ApiError::BadRequest(format!(
      "subject {subject_id} has no safe zone in force"
    ))),
    CheckOutcome::LocationFailed { record_id, error } => Err(ApiError::LocationUnavailable(
      format!("{error} (recorded as {record_id})"),
    )),
    CheckOutcome::Completed { record_id, boundary_violation, status } => {
      Ok(Json(TriggerResponse { record_id, boundary_violation, status }))
    }
  }
}

//! Location retrieval.
//!
//! A [`LocationSource`] performs exactly one request against an external
//! positioning service. [`LocationProvider`] wraps a source with the per-call
//! timeout and the bounded exponential-backoff retry loop, and never lets an
//! error escape as anything other than a [`LocationFailure`].

use std::{fmt, future::Future, time::Duration};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tether_core::{geofence::Coordinates, record::ProviderMeta};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
  Error, Result,
  config::{ProviderConfig, RetryPolicy, Timeouts},
};

// ─── Errors ──────────────────────────────────────────────────────────────────

/// Why a single provider attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocationErrorKind {
  /// Connection refused, DNS failure, reset.
  Network,
  /// The attempt exceeded its timeout, or the provider answered 408.
  Timeout,
  /// 429.
  RateLimit,
  /// 5xx.
  ServerError,
  /// 4xx other than 408 and 429.
  Rejected,
  /// The device id cannot be sent to the provider at all.
  InvalidDevice,
  /// The response arrived but could not be understood.
  InvalidPayload,
  Unknown,
}

/// A classified provider failure.
#[derive(Debug, Clone)]
pub struct LocationError {
  pub kind:    LocationErrorKind,
  pub status:  Option<u16>,
  pub message: String,
  pub raw:     Option<Value>,
}

impl LocationError {
  pub fn new(kind: LocationErrorKind, message: impl Into<String>) -> Self {
    Self { kind, status: None, message: message.into(), raw: None }
  }

  pub fn from_status(status: u16, body: &str) -> Self {
    let kind = match status {
      408 => LocationErrorKind::Timeout,
      429 => LocationErrorKind::RateLimit,
      500..=599 => LocationErrorKind::ServerError,
      400..=499 => LocationErrorKind::Rejected,
      _ => LocationErrorKind::Unknown,
    };
    Self {
      kind,
      status: Some(status),
      message: truncate(body),
      raw: serde_json::from_str(body).ok(),
    }
  }

  pub fn network(err: &reqwest::Error) -> Self {
    let kind = if err.is_timeout() {
      LocationErrorKind::Timeout
    } else if err.is_decode() {
      LocationErrorKind::InvalidPayload
    } else {
      LocationErrorKind::Network
    };
    Self::new(kind, err.to_string())
  }

  pub fn timed_out(after: Duration) -> Self {
    Self::new(LocationErrorKind::Timeout, format!("no response within {}ms", after.as_millis()))
  }

  /// Whether the same request is worth sending again.
  pub fn is_transient(&self) -> bool {
    matches!(
      self.kind,
      LocationErrorKind::Network
        | LocationErrorKind::Timeout
        | LocationErrorKind::RateLimit
        | LocationErrorKind::ServerError
        | LocationErrorKind::Unknown
    )
  }
}

impl fmt::Display for LocationError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self.status {
      Some(status) => write!(f, "location provider error ({status}, {:?}): {}", self.kind, self.message),
      None => write!(f, "location provider error ({:?}): {}", self.kind, self.message),
    }
  }
}

impl std::error::Error for LocationError {}

fn truncate(body: &str) -> String {
  const MAX: usize = 512;
  match body.char_indices().nth(MAX) {
    Some((idx, _)) => format!("{}...", &body[..idx]),
    None => body.to_owned(),
  }
}

// ─── Source trait ────────────────────────────────────────────────────────────

/// One position reported by a source.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
  pub coordinates: Coordinates,
  pub accuracy_m:  f64,
  pub status_code: Option<u16>,
  pub raw:         Option<Value>,
}

#[derive(Debug, Clone, Default)]
pub struct HistoryQuery {
  pub start: Option<DateTime<Utc>>,
  pub end:   Option<DateTime<Utc>>,
  /// Maximum number of points. The source applies 100 when unset.
  pub limit: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryPoint {
  pub longitude: f64,
  pub latitude:  f64,
  #[serde(default)]
  pub accuracy:  Option<f64>,
  #[serde(default)]
  pub timestamp: Option<DateTime<Utc>>,
}

/// A single-attempt client for an external positioning service.
pub trait LocationSource: Send + Sync {
  /// Label stored on records, e.g. `"http"`.
  fn name(&self) -> &str;

  fn locate<'a>(
    &'a self,
    device_id: &'a str,
    correlation_id: Uuid,
  ) -> impl Future<Output = Result<Reading, LocationError>> + Send + 'a;

  fn history<'a>(
    &'a self,
    device_id: &'a str,
    query: &'a HistoryQuery,
    correlation_id: Uuid,
  ) -> impl Future<Output = Result<Vec<HistoryPoint>, LocationError>> + Send + 'a;
}

// ─── HTTP source ─────────────────────────────────────────────────────────────

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LocateRequest<'a> {
  device_id:  &'a str,
  api_key:    &'a str,
  api_secret: &'a str,
}

#[derive(Deserialize)]
struct LocateResponse {
  location: ReportedLocation,
}

#[derive(Deserialize)]
struct ReportedLocation {
  longitude: f64,
  latitude:  f64,
  #[serde(default)]
  accuracy:  f64,
}

#[derive(Deserialize)]
struct HistoryResponse {
  #[serde(default)]
  locations: Vec<HistoryPoint>,
}

/// [`LocationSource`] speaking JSON over HTTP.
///
/// `POST {base}/locate` and `GET {base}/history`, each carrying the attempt's
/// correlation id in `X-Request-ID`.
pub struct HttpLocationSource {
  client:     reqwest::Client,
  name:       String,
  base_url:   String,
  api_key:    String,
  api_secret: String,
}

impl HttpLocationSource {
  pub fn new(config: &ProviderConfig) -> Result<Self> {
    if config.base_url.is_empty() {
      return Err(Error::Config("provider.base_url is required".into()));
    }
    let client = reqwest::Client::builder()
      .build()
      .map_err(|e| Error::Config(format!("cannot build HTTP client: {e}")))?;
    Ok(Self {
      client,
      name: config.name.clone(),
      base_url: config.base_url.trim_end_matches('/').to_owned(),
      api_key: config.api_key.clone(),
      api_secret: config.api_secret.clone(),
    })
  }

  async fn read_body(resp: reqwest::Response) -> Result<(u16, Value), LocationError> {
    let status = resp.status();
    let body = resp.text().await.map_err(|e| LocationError::network(&e))?;
    if !status.is_success() {
      return Err(LocationError::from_status(status.as_u16(), &body));
    }
    let raw = serde_json::from_str(&body).map_err(|e| LocationError {
      kind:    LocationErrorKind::InvalidPayload,
      status:  Some(status.as_u16()),
      message: format!("response is not JSON: {e}"),
      raw:     None,
    })?;
    Ok((status.as_u16(), raw))
  }
}

impl LocationSource for HttpLocationSource {
  fn name(&self) -> &str { &self.name }

  fn locate<'a>(
    &'a self,
    device_id: &'a str,
    correlation_id: Uuid,
  ) -> impl Future<Output = Result<Reading, LocationError>> + Send + 'a {
    async move {
      let resp = self
        .client
        .post(format!("{}/locate", self.base_url))
        .header("X-Request-ID", correlation_id.to_string())
        .json(&LocateRequest {
          device_id,
          api_key: &self.api_key,
          api_secret: &self.api_secret,
        })
        .send()
        .await
        .map_err(|e| LocationError::network(&e))?;

      let (status, raw) = Self::read_body(resp).await?;
      let parsed: LocateResponse = serde_json::from_value(raw.clone()).map_err(|e| LocationError {
        kind:    LocationErrorKind::InvalidPayload,
        status:  Some(status),
        message: format!("unexpected locate response: {e}"),
        raw:     Some(raw.clone()),
      })?;

      let coordinates = Coordinates::new(parsed.location.longitude, parsed.location.latitude);
      if !coordinates.is_valid() {
        return Err(LocationError {
          kind:    LocationErrorKind::InvalidPayload,
          status:  Some(status),
          message: "reported coordinates are out of range".into(),
          raw:     Some(raw),
        });
      }

      Ok(Reading {
        coordinates,
        accuracy_m: parsed.location.accuracy,
        status_code: Some(status),
        raw: Some(raw),
      })
    }
  }

  fn history<'a>(
    &'a self,
    device_id: &'a str,
    query: &'a HistoryQuery,
    correlation_id: Uuid,
  ) -> impl Future<Output = Result<Vec<HistoryPoint>, LocationError>> + Send + 'a {
    async move {
      let mut params: Vec<(&str, String)> = vec![
        ("deviceId", device_id.to_owned()),
        ("apiKey", self.api_key.clone()),
        ("apiSecret", self.api_secret.clone()),
        ("limit", query.limit.unwrap_or(100).to_string()),
      ];
      if let Some(start) = query.start {
        params.push(("startTime", start.to_rfc3339()));
      }
      if let Some(end) = query.end {
        params.push(("endTime", end.to_rfc3339()));
      }

      let resp = self
        .client
        .get(format!("{}/history", self.base_url))
        .header("X-Request-ID", correlation_id.to_string())
        .query(&params)
        .send()
        .await
        .map_err(|e| LocationError::network(&e))?;

      let (status, raw) = Self::read_body(resp).await?;
      let parsed: HistoryResponse = serde_json::from_value(raw).map_err(|e| LocationError {
        kind:    LocationErrorKind::InvalidPayload,
        status:  Some(status),
        message: format!("unexpected history response: {e}"),
        raw:     None,
      })?;
      Ok(parsed.locations)
    }
  }
}

// ─── Provider ────────────────────────────────────────────────────────────────

/// A successful lookup, with the round-trip details for the record.
#[derive(Debug, Clone)]
pub struct LocationFix {
  pub coordinates: Coordinates,
  pub accuracy_m:  f64,
  pub observed_at: DateTime<Utc>,
  pub meta:        ProviderMeta,
  pub retry_count: u32,
}

/// A lookup that gave up, either on a permanent error or after exhausting
/// its retries.
#[derive(Debug, Clone)]
pub struct LocationFailure {
  pub error:          LocationError,
  pub provider:       String,
  /// Correlation id of the last attempt.
  pub correlation_id: Uuid,
  /// Retries performed after the first attempt.
  pub retry_count:    u32,
  pub attempts:       u32,
  /// Wall time across every attempt, backoff included.
  pub elapsed:        Duration,
}

impl LocationFailure {
  pub fn status_code(&self) -> Option<u16> { self.error.status }

  pub fn meta(&self) -> ProviderMeta {
    ProviderMeta {
      provider:       self.provider.clone(),
      correlation_id: self.correlation_id,
      latency_ms:     millis(self.elapsed),
      status_code:    self.error.status,
      raw:            self.error.raw.clone(),
    }
  }
}

impl fmt::Display for LocationFailure {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{} after {} attempt(s)", self.error, self.attempts)
  }
}

impl std::error::Error for LocationFailure {
  fn source(&self) -> Option<&(dyn std::error::Error + 'static)> { Some(&self.error) }
}

struct Attempted<T> {
  value:          T,
  correlation_id: Uuid,
  retry_count:    u32,
  elapsed:        Duration,
}

fn millis(d: Duration) -> u64 { u64::try_from(d.as_millis()).unwrap_or(u64::MAX) }

/// Retrying front for a [`LocationSource`].
pub struct LocationProvider<L> {
  source:   L,
  retry:    RetryPolicy,
  timeouts: Timeouts,
}

impl<L: LocationSource> LocationProvider<L> {
  pub fn new(source: L, retry: RetryPolicy, timeouts: Timeouts) -> Self {
    Self { source, retry, timeouts }
  }

  pub fn source(&self) -> &L { &self.source }

  /// Current position of `device_id`.
  pub async fn fetch(&self, device_id: &str) -> Result<LocationFix, LocationFailure> {
    let done = self
      .run("locate", device_id, self.timeouts.locate(), |cid| self.source.locate(device_id, cid))
      .await?;
    let reading = done.value;
    Ok(LocationFix {
      coordinates: reading.coordinates,
      accuracy_m:  reading.accuracy_m,
      observed_at: Utc::now(),
      meta:        ProviderMeta {
        provider:       self.source.name().to_owned(),
        correlation_id: done.correlation_id,
        latency_ms:     millis(done.elapsed),
        status_code:    reading.status_code,
        raw:            reading.raw,
      },
      retry_count: done.retry_count,
    })
  }

  /// Past positions of `device_id`.
  pub async fn fetch_history(
    &self,
    device_id: &str,
    query: &HistoryQuery,
  ) -> Result<Vec<HistoryPoint>, LocationFailure> {
    let done = self
      .run("history", device_id, self.timeouts.history(), |cid| {
        self.source.history(device_id, query, cid)
      })
      .await?;
    Ok(done.value)
  }

  async fn run<T, F, Fut>(
    &self,
    op: &'static str,
    device_id: &str,
    timeout: Duration,
    mut attempt: F,
  ) -> Result<Attempted<T>, LocationFailure>
  where
    F: FnMut(Uuid) -> Fut,
    Fut: Future<Output = Result<T, LocationError>>,
  {
    let started = Instant::now();
    let mut retry_count = 0;

    if device_id.trim().is_empty() {
      return Err(LocationFailure {
        error: LocationError::new(LocationErrorKind::InvalidDevice, "device id is empty"),
        provider: self.source.name().to_owned(),
        correlation_id: Uuid::nil(),
        retry_count,
        attempts: 0,
        elapsed: Duration::ZERO,
      });
    }

    loop {
      let correlation_id = Uuid::new_v4();
      let attempt_no = retry_count + 1;
      debug!(op, device_id, %correlation_id, attempt = attempt_no, "provider request");

      let result = match tokio::time::timeout(timeout, attempt(correlation_id)).await {
        Ok(result) => result,
        Err(_) => Err(LocationError::timed_out(timeout)),
      };

      match result {
        Ok(value) => {
          let elapsed = started.elapsed();
          info!(
            op,
            device_id,
            %correlation_id,
            attempt = attempt_no,
            latency_ms = millis(elapsed),
            "provider responded"
          );
          return Ok(Attempted { value, correlation_id, retry_count, elapsed });
        }
        Err(error) if error.is_transient() && retry_count < self.retry.max_retries => {
          retry_count += 1;
          let delay = self.retry.delay_for(retry_count);
          warn!(
            op,
            device_id,
            %correlation_id,
            attempt = attempt_no,
            error = %error,
            delay_ms = millis(delay),
            "transient provider error; retrying"
          );
          tokio::time::sleep(delay).await;
        }
        Err(error) => {
          let elapsed = started.elapsed();
          warn!(
            op,
            device_id,
            %correlation_id,
            attempts = attempt_no,
            transient = error.is_transient(),
            error = %error,
            "provider request failed"
          );
          return Err(LocationFailure {
            error,
            provider: self.source.name().to_owned(),
            correlation_id,
            retry_count,
            attempts: attempt_no,
            elapsed,
          });
        }
      }
    }
  }
}

// ─── On-demand lookups ───────────────────────────────────────────────────────

/// Device lookups served outside any check, with the same retry loop.
pub trait DeviceLocator: Send + Sync {
  fn locate<'a>(
    &'a self,
    device_id: &'a str,
  ) -> impl Future<Output = Result<LocationFix, LocationFailure>> + Send + 'a;

  fn history<'a>(
    &'a self,
    device_id: &'a str,
    query: &'a HistoryQuery,
  ) -> impl Future<Output = Result<Vec<HistoryPoint>, LocationFailure>> + Send + 'a;
}

impl<L: LocationSource> DeviceLocator for LocationProvider<L> {
  fn locate<'a>(
    &'a self,
    device_id: &'a str,
  ) -> impl Future<Output = Result<LocationFix, LocationFailure>> + Send + 'a {
    self.fetch(device_id)
  }

  fn history<'a>(
    &'a self,
    device_id: &'a str,
    query: &'a HistoryQuery,
  ) -> impl Future<Output = Result<Vec<HistoryPoint>, LocationFailure>> + Send + 'a {
    self.fetch_history(device_id, query)
  }
}

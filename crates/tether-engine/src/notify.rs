//! Boundary-violation alerts.
//!
//! [`NotificationDispatcher`] sends one alert through the primary
//! [`NotificationSink`] to the subject's emergency contacts. If that fails for
//! any reason it makes exactly one attempt on the fallback path: a single SMS
//! to the configured emergency recipient. Nothing here is retried and nothing
//! is thrown; the caller gets a [`DispatchOutcome`] either way.

use std::{future::Future, time::Duration};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tether_core::{
  record::{NotificationOutcome, NotificationStatus, ObservedLocation, ZoneCheck},
  subject::{Channel, EmergencyContact, Subject},
};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{Error, Result, config::NotificationConfig};

// ─── Wire types ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertLocation {
  pub longitude: f64,
  pub latitude:  f64,
  pub accuracy:  f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ViolatedZone {
  pub zone_id:    Uuid,
  pub name:       String,
  /// Meters outside the boundary.
  pub distance_m: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Recipient {
  pub name:         String,
  pub phone:        String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub email:        Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub relationship: Option<String>,
}

impl From<&EmergencyContact> for Recipient {
  fn from(c: &EmergencyContact) -> Self {
    Self {
      name:         c.name.clone(),
      phone:        c.phone.clone(),
      email:        c.email.clone(),
      relationship: c.relationship.clone(),
    }
  }
}

/// Body of one alert as sent to a sink.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRequest {
  pub subject_id:     Uuid,
  pub subject_name:   String,
  pub event_type:     &'static str,
  pub violation_type: &'static str,
  pub location:       AlertLocation,
  pub violated_zones: Vec<ViolatedZone>,
  pub recipients:     Vec<Recipient>,
  pub channels:       Vec<Channel>,
  pub timestamp:      DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationResponse {
  pub delivered:          bool,
  #[serde(default)]
  pub per_channel_status: Value,
}

// ─── Violation ───────────────────────────────────────────────────────────────

/// Everything the dispatcher needs to alert about one violation.
#[derive(Debug, Clone)]
pub struct Violation {
  pub subject_id:     Uuid,
  pub subject_name:   String,
  pub contacts:       Vec<EmergencyContact>,
  pub channels:       Vec<Channel>,
  pub location:       ObservedLocation,
  pub violated_zones: Vec<ViolatedZone>,
  pub detected_at:    DateTime<Utc>,
}

impl Violation {
  pub fn new(
    subject: &Subject,
    location: ObservedLocation,
    checks: &[ZoneCheck],
    detected_at: DateTime<Utc>,
  ) -> Self {
    Self {
      subject_id: subject.subject_id,
      subject_name: subject.name.clone(),
      contacts: subject.emergency_contacts.clone(),
      channels: subject.notification_prefs.enabled_channels(),
      location,
      violated_zones: checks
        .iter()
        .filter(|c| !c.inside)
        .map(|c| ViolatedZone {
          zone_id:    c.zone_id,
          name:       c.zone_name.clone(),
          distance_m: c.signed_distance_m,
        })
        .collect(),
      detected_at,
    }
  }

  fn request(&self, recipients: Vec<Recipient>, channels: Vec<Channel>) -> NotificationRequest {
    NotificationRequest {
      subject_id: self.subject_id,
      subject_name: self.subject_name.clone(),
      event_type: "boundary_violation",
      violation_type: "boundary_exit",
      location: AlertLocation {
        longitude: self.location.coordinates.longitude,
        latitude:  self.location.coordinates.latitude,
        accuracy:  self.location.accuracy_m,
      },
      violated_zones: self.violated_zones.clone(),
      recipients,
      channels,
      timestamp: self.detected_at,
    }
  }
}

// ─── Errors ──────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum NotifyError {
  #[error("subject has no emergency contacts")]
  NoRecipients,

  #[error("subject has every notification channel disabled")]
  NoChannels,

  #[error("no fallback recipient configured")]
  NoFallbackRecipient,

  #[error("notification service did not answer within {}ms", .0.as_millis())]
  Timeout(Duration),

  #[error("notification service reported the alert as undelivered")]
  NotDelivered,

  #[error("notification service returned {status}: {body}")]
  Status { status: u16, body: String },

  #[error("notification request failed: {0}")]
  Transport(String),
}

// ─── Sink ────────────────────────────────────────────────────────────────────

/// Something that can deliver one alert.
pub trait NotificationSink: Send + Sync {
  fn send<'a>(
    &'a self,
    request: &'a NotificationRequest,
  ) -> impl Future<Output = Result<NotificationResponse, NotifyError>> + Send + 'a;
}

/// [`NotificationSink`] that posts JSON with a bearer token.
pub struct HttpNotificationSink {
  client:  reqwest::Client,
  url:     String,
  api_key: String,
}

impl HttpNotificationSink {
  pub fn new(url: impl Into<String>, api_key: impl Into<String>) -> Result<Self> {
    let url = url.into();
    if url.is_empty() {
      return Err(Error::Config("notification.url is required".into()));
    }
    let client = reqwest::Client::builder()
      .build()
      .map_err(|e| Error::Config(format!("cannot build HTTP client: {e}")))?;
    Ok(Self { client, url, api_key: api_key.into() })
  }

  /// The primary and fallback sinks described by `config`.
  pub fn pair(config: &NotificationConfig) -> Result<(Self, Self)> {
    let primary = Self::new(config.url.clone(), config.api_key.clone())?;
    let fallback_url = config.fallback_url.clone().unwrap_or_else(|| config.url.clone());
    let fallback = Self::new(fallback_url, config.api_key.clone())?;
    Ok((primary, fallback))
  }
}

impl NotificationSink for HttpNotificationSink {
  fn send<'a>(
    &'a self,
    request: &'a NotificationRequest,
  ) -> impl Future<Output = Result<NotificationResponse, NotifyError>> + Send + 'a {
    async move {
      let resp = self
        .client
        .post(&self.url)
        .bearer_auth(&self.api_key)
        .json(request)
        .send()
        .await
        .map_err(|e| NotifyError::Transport(e.to_string()))?;

      let status = resp.status();
      if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(NotifyError::Status { status: status.as_u16(), body });
      }
      resp
        .json::<NotificationResponse>()
        .await
        .map_err(|e| NotifyError::Transport(e.to_string()))
    }
  }
}

// ─── Dispatcher ──────────────────────────────────────────────────────────────

/// What happened to one alert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchOutcome {
  pub delivered:      bool,
  pub channels:       Vec<Channel>,
  pub recipients:     Vec<String>,
  pub fallback_used:  bool,
  /// Why the primary path failed, if it did.
  pub error:          Option<String>,
  pub fallback_error: Option<String>,
  pub attempted_at:   DateTime<Utc>,
}

impl DispatchOutcome {
  pub fn into_record(self) -> NotificationOutcome {
    let error = match (self.error, self.fallback_error) {
      (Some(primary), Some(fallback)) => Some(format!("{primary}; fallback: {fallback}")),
      (primary, fallback) => primary.or(fallback),
    };
    NotificationOutcome {
      status: if self.delivered { NotificationStatus::Sent } else { NotificationStatus::Failed },
      channels: self.channels,
      recipients: self.recipients,
      fallback_used: self.fallback_used,
      error,
      attempted_at: self.attempted_at,
    }
  }
}

pub struct NotificationDispatcher<N> {
  primary:            N,
  fallback:           N,
  fallback_recipient: Option<String>,
  timeout:            Duration,
}

impl<N: NotificationSink> NotificationDispatcher<N> {
  pub fn new(primary: N, fallback: N, fallback_recipient: Option<String>, timeout: Duration) -> Self {
    Self { primary, fallback, fallback_recipient, timeout }
  }

  pub fn primary(&self) -> &N { &self.primary }

  pub fn fallback(&self) -> &N { &self.fallback }

  pub async fn dispatch(&self, violation: &Violation) -> DispatchOutcome {
    let attempted_at = Utc::now();

    let primary_error = match self.send_primary(violation).await {
      Ok((recipients, channels)) => {
        info!(subject_id = %violation.subject_id, ?channels, "boundary alert sent");
        return DispatchOutcome {
          delivered: true,
          channels,
          recipients,
          fallback_used: false,
          error: None,
          fallback_error: None,
          attempted_at,
        };
      }
      Err(e) => e,
    };
    warn!(
      subject_id = %violation.subject_id,
      error = %primary_error,
      "primary alert failed; trying fallback"
    );

    match self.send_fallback(violation).await {
      Ok(recipient) => {
        info!(subject_id = %violation.subject_id, "fallback alert sent");
        DispatchOutcome {
          delivered: true,
          channels: vec![Channel::Sms],
          recipients: vec![recipient],
          fallback_used: true,
          error: Some(primary_error.to_string()),
          fallback_error: None,
          attempted_at,
        }
      }
      Err(fallback_error) => {
        warn!(
          subject_id = %violation.subject_id,
          error = %fallback_error,
          "fallback alert failed"
        );
        DispatchOutcome {
          delivered: false,
          channels: Vec::new(),
          recipients: Vec::new(),
          fallback_used: true,
          error: Some(primary_error.to_string()),
          fallback_error: Some(fallback_error.to_string()),
          attempted_at,
        }
      }
    }
  }

  async fn send_primary(
    &self,
    violation: &Violation,
  ) -> Result<(Vec<String>, Vec<Channel>), NotifyError> {
    if violation.contacts.is_empty() {
      return Err(NotifyError::NoRecipients);
    }
    if violation.channels.is_empty() {
      return Err(NotifyError::NoChannels);
    }
    let recipients: Vec<Recipient> = violation.contacts.iter().map(Recipient::from).collect();
    let names = recipients.iter().map(|r| r.name.clone()).collect();
    let request = violation.request(recipients, violation.channels.clone());
    self.deliver(&self.primary, &request).await?;
    Ok((names, violation.channels.clone()))
  }

  async fn send_fallback(&self, violation: &Violation) -> Result<String, NotifyError> {
    let recipient = self.fallback_recipient.clone().ok_or(NotifyError::NoFallbackRecipient)?;
    let request = violation.request(
      vec![Recipient {
        name:         recipient.clone(),
        phone:        recipient.clone(),
        email:        None,
        relationship: None,
      }],
      vec![Channel::Sms],
    );
    self.deliver(&self.fallback, &request).await?;
    Ok(recipient)
  }

  async fn deliver(&self, sink: &N, request: &NotificationRequest) -> Result<(), NotifyError> {
    let response = tokio::time::timeout(self.timeout, sink.send(request))
      .await
      .map_err(|_| NotifyError::Timeout(self.timeout))??;
    if !response.delivered {
      return Err(NotifyError::NotDelivered);
    }
    Ok(())
  }
}

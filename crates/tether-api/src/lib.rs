//! JSON REST API for Tether.
//!
//! Exposes an axum [`Router`] over the verification history in any
//! [`MonitorStore`], a trigger that runs one check immediately through a
//! [`SubjectCheck`], and on-demand device lookups through a
//! [`DeviceLocator`]. Auth, TLS, and transport concerns are the caller's
//! responsibility.
//!
//! # Mounting
//!
//! ```rust,ignore
//! .nest("/api", tether_api::api_router(store.clone(), Arc::new(scheduler.clone()), engine.clone()))
//! ```

pub mod devices;
pub mod error;
pub mod verifications;

use std::sync::Arc;

use axum::{
  Json, Router,
  routing::{get, post},
};
use serde_json::{Value, json};
use tether_core::store::MonitorStore;
use tether_engine::{DeviceLocator, SubjectCheck};

pub use error::ApiError;


/// Shared state threaded through all handlers.
pub struct AppState<S, K, D> {
  pub store:   Arc<S>,
  pub check:   Arc<K>,
  pub devices: Arc<D>,
}

impl<S, K, D> Clone for AppState<S, K, D> {
  fn clone(&self) -> Self {
    Self {
      store:   Arc::clone(&self.store),
      check:   Arc::clone(&self.check),
      devices: Arc::clone(&self.devices),
    }
  }
}

/// Build a fully-materialised API router.
///
/// The returned `Router<()>` can be nested into any parent router regardless
/// of its own state type.
pub fn api_router<S, K, D>(store: Arc<S>, check: Arc<K>, devices: Arc<D>) -> Router<()>
where
  S: MonitorStore + 'static,
  K: SubjectCheck + 'static,
  D: DeviceLocator + 'static,
{
  Router::new()
    .route("/health", get(health))
    // Verification history
    .route("/verifications", get(verifications::list::<S, K, D>))
    .route("/verifications/{id}", get(verifications::get_one::<S, K, D>))
    .route("/subjects/{id}/verifications", get(verifications::for_subject::<S, K, D>))
    .route("/violations", get(verifications::violations::<S, K, D>))
    // Manual check
    .route("/verifications/trigger/{subject_id}", post(verifications::trigger::<S, K, D>))
    // Device lookups
    .route("/devices/{device_id}/location", get(devices::location::<S, K, D>))
    .route("/devices/{device_id}/history", get(devices::history::<S, K, D>))
    .with_state(AppState { store, check, devices })
}

/// `GET /health`
async fn health() -> Json<Value> { Json(json!({ "status": "ok" })) }

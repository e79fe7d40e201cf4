//! The Tether location-verification engine.
//!
//! Everything between the stores in `tether-core` and the outside world:
//! caching of zones and the active subject set, the retrying location
//! provider, notification dispatch with a fallback path, the per-check
//! orchestration in [`VerificationEngine`], and the per-subject [`Scheduler`].
//!
//! # Wiring
//!
//! ```rust,ignore
//! let engine = Arc::new(VerificationEngine::new(
//!   store.clone(), cache.clone(), provider, dispatcher, config.zone_cache_ttl(),
//! ));
//! let scheduler = Scheduler::new(store, cache, engine, &config)?;
//! scheduler.start();
//! ```

pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod notify;
pub mod provider;
pub mod recorder;
pub mod scheduler;
pub mod zones;

#[cfg(test)]
mod testing;

pub use cache::{ActiveSubjectCache, MemoryCache, ZoneCache};
pub use config::EngineConfig;
pub use engine::{CheckOutcome, SubjectCheck, VerificationEngine};
pub use error::{Error, Result};
pub use notify::{HttpNotificationSink, NotificationDispatcher};
pub use provider::{DeviceLocator, HistoryQuery, HttpLocationSource, LocationProvider};
pub use recorder::VerificationRecorder;
pub use scheduler::Scheduler;
pub use zones::ZoneRegistry;

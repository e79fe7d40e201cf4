//! Caching: an in-process [`CacheStore`] and the two read-through caches the
//! engine keeps in front of the monitor store.
//!
//! Both caches treat the [`CacheStore`] as an optimisation. A failed read or
//! write is logged and the call falls through to the store.

use std::{
  collections::HashMap,
  convert::Infallible,
  future::Future,
  sync::{Arc, RwLock},
  time::Duration,
};

use serde::{Serialize, de::DeserializeOwned};
use tether_core::{cache::CacheStore, store::MonitorStore, subject::Subject, zone::SafeZone};
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{Error, Result};

/// Key under which the active-subject set is cached.
pub const ACTIVE_SUBJECTS_KEY: &str = "active_monitoring_users";

/// Key under which a subject's active zones are cached.
pub fn zone_cache_key(subject_id: Uuid) -> String { format!("user_safe_zones_{subject_id}") }

// ─── MemoryCache ─────────────────────────────────────────────────────────────

struct Entry {
  value:      Arc<str>,
  expires_at: Instant,
}

/// A [`CacheStore`] held in process memory.
///
/// Entries are swapped whole under a short lock; a reader that already holds
/// a value keeps it even if the entry is replaced a moment later.
#[derive(Default)]
pub struct MemoryCache {
  entries: RwLock<HashMap<String, Entry>>,
}

impl MemoryCache {
  pub fn new() -> Self { Self::default() }

  fn lookup(&self, key: &str) -> Option<Arc<str>> {
    let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
    entries
      .get(key)
      .filter(|entry| entry.expires_at > Instant::now())
      .map(|entry| Arc::clone(&entry.value))
  }

  fn insert(&self, key: &str, value: String, ttl: Duration) {
    let entry = Entry { value: Arc::from(value), expires_at: Instant::now() + ttl };
    let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
    entries.insert(key.to_owned(), entry);
  }

  fn remove(&self, key: &str) {
    let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
    entries.remove(key);
  }

  /// Entries held, counting expired ones not yet purged.
  pub fn len(&self) -> usize { self.entries.read().unwrap_or_else(|e| e.into_inner()).len() }

  pub fn is_empty(&self) -> bool { self.len() == 0 }

  fn evict_expired(&self) -> usize {
    let now = Instant::now();
    let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
    let before = entries.len();
    entries.retain(|_, entry| entry.expires_at > now);
    before - entries.len()
  }
}

impl CacheStore for MemoryCache {
  type Error = Infallible;

  fn get<'a>(
    &'a self,
    key: &'a str,
  ) -> impl Future<Output = Result<Option<String>, Self::Error>> + Send + 'a {
    std::future::ready(Ok(self.lookup(key).map(|v| v.to_string())))
  }

  fn set<'a>(
    &'a self,
    key: &'a str,
    value: String,
    ttl: Duration,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a {
    self.insert(key, value, ttl);
    std::future::ready(Ok(()))
  }

  fn delete<'a>(
    &'a self,
    key: &'a str,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a {
    self.remove(key);
    std::future::ready(Ok(()))
  }

  fn purge_expired(&self) -> impl Future<Output = usize> + Send + '_ {
    std::future::ready(self.evict_expired())
  }
}

// ─── Shared read-through helpers ─────────────────────────────────────────────

async fn read_cached<C, T>(cache: &C, key: &str) -> Option<T>
where
  C: CacheStore,
  T: DeserializeOwned,
{
  match cache.get(key).await {
    Ok(Some(json)) => match serde_json::from_str(&json) {
      Ok(value) => {
        debug!(key, "cache hit");
        Some(value)
      }
      Err(e) => {
        warn!(key, error = %e, "discarding undecodable cache entry");
        None
      }
    },
    Ok(None) => {
      debug!(key, "cache miss");
      None
    }
    Err(e) => {
      warn!(key, error = %e, "cache read failed; falling back to store");
      None
    }
  }
}

async fn write_cached<C, T>(cache: &C, key: &str, value: &T, ttl: Duration)
where
  C: CacheStore,
  T: Serialize + ?Sized,
{
  let json = match serde_json::to_string(value) {
    Ok(json) => json,
    Err(e) => {
      warn!(key, error = %e, "cannot encode cache entry");
      return;
    }
  };
  if let Err(e) = cache.set(key, json, ttl).await {
    warn!(key, error = %e, "cache write failed");
  }
}

async fn evict<C: CacheStore>(cache: &C, key: &str) {
  if let Err(e) = cache.delete(key).await {
    warn!(key, error = %e, "cache invalidation failed");
  }
}

// ─── ZoneCache ───────────────────────────────────────────────────────────────

/// Read-through cache of each subject's active safe zones.
///
/// Entries may be stale for up to the TTL if an invalidation is missed.
pub struct ZoneCache<S, C> {
  store: Arc<S>,
  cache: Arc<C>,
  ttl:   Duration,
}

impl<S, C> ZoneCache<S, C>
where
  S: MonitorStore,
  C: CacheStore,
{
  pub fn new(store: Arc<S>, cache: Arc<C>, ttl: Duration) -> Self { Self { store, cache, ttl } }

  /// Active zones of `subject_id`, oldest first.
  pub async fn get(&self, subject_id: Uuid) -> Result<Vec<SafeZone>> {
    let key = zone_cache_key(subject_id);
    if let Some(zones) = read_cached(self.cache.as_ref(), &key).await {
      return Ok(zones);
    }

    let zones = self
      .store
      .find_active_zones_for_subject(subject_id)
      .await
      .map_err(Error::store)?;
    write_cached(self.cache.as_ref(), &key, &zones, self.ttl).await;
    Ok(zones)
  }

  /// Forget the cached zones of `subject_id`. Best-effort.
  pub async fn invalidate(&self, subject_id: Uuid) {
    evict(self.cache.as_ref(), &zone_cache_key(subject_id)).await;
  }
}

// ─── ActiveSubjectCache ──────────────────────────────────────────────────────

/// Read-through cache of the subjects with monitoring enabled.
pub struct ActiveSubjectCache<S, C> {
  store: Arc<S>,
  cache: Arc<C>,
  ttl:   Duration,
}

impl<S, C> ActiveSubjectCache<S, C>
where
  S: MonitorStore,
  C: CacheStore,
{
  pub fn new(store: Arc<S>, cache: Arc<C>, ttl: Duration) -> Self { Self { store, cache, ttl } }

  pub async fn get(&self) -> Result<Vec<Subject>> {
    if let Some(subjects) = read_cached(self.cache.as_ref(), ACTIVE_SUBJECTS_KEY).await {
      return Ok(subjects);
    }

    let subjects = self.store.find_active_monitored().await.map_err(Error::store)?;
    write_cached(self.cache.as_ref(), ACTIVE_SUBJECTS_KEY, &subjects, self.ttl).await;
    Ok(subjects)
  }

  pub async fn invalidate(&self) { evict(self.cache.as_ref(), ACTIVE_SUBJECTS_KEY).await; }

  /// Sweep expired entries out of the underlying cache store, zone lists of
  /// removed subjects included.
  pub async fn purge_expired(&self) -> usize { self.cache.purge_expired().await }
}

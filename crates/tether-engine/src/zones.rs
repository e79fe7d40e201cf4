//! Zone mutations that keep the zone cache honest.

use std::sync::Arc;

use tether_core::{
  cache::CacheStore,
  geofence,
  store::MonitorStore,
  zone::{NewSafeZone, SafeZone},
};
use tracing::info;
use uuid::Uuid;

use crate::{Error, Result, cache::ZoneCache};

/// Validates and writes zones, then drops the owner's cached zone list.
///
/// Invalidation is best-effort; a missed one is bounded by the cache TTL.
pub struct ZoneRegistry<'a, S, C> {
  store: Arc<S>,
  cache: &'a ZoneCache<S, C>,
}

impl<'a, S, C> ZoneRegistry<'a, S, C>
where
  S: MonitorStore,
  C: CacheStore,
{
  pub fn new(store: Arc<S>, cache: &'a ZoneCache<S, C>) -> Self { Self { store, cache } }

  /// Persist a new zone. Geometry is validated before anything is written.
  pub async fn add(&self, input: NewSafeZone) -> Result<SafeZone> {
    geofence::validate(&input.geometry)?;
    let zone = self.store.add_zone(input).await.map_err(Error::store)?;
    self.cache.invalidate(zone.subject_id).await;
    info!(zone_id = %zone.zone_id, subject_id = %zone.subject_id, kind = zone.geometry.kind(), "zone added");
    Ok(zone)
  }

  pub async fn set_active(&self, zone_id: Uuid, active: bool) -> Result<Option<SafeZone>> {
    let zone = self.store.set_zone_active(zone_id, active).await.map_err(Error::store)?;
    if let Some(zone) = &zone {
      self.cache.invalidate(zone.subject_id).await;
      info!(%zone_id, active, "zone toggled");
    }
    Ok(zone)
  }

  pub async fn delete(&self, zone_id: Uuid) -> Result<Option<SafeZone>> {
    let zone = self.store.delete_zone(zone_id).await.map_err(Error::store)?;
    if let Some(zone) = &zone {
      self.cache.invalidate(zone.subject_id).await;
      info!(%zone_id, "zone deleted");
    }
    Ok(zone)
  }
}

#[cfg(test)]
mod tests {
  use std::time::Duration;

  use tether_core::{geofence::Coordinates, subject::NewSubject, zone::ZoneGeometry};

  use super::*;
  use crate::{cache::MemoryCache, testing::MemoryStore};

  fn circle(radius_m: f64) -> ZoneGeometry {
    ZoneGeometry::Circle { center: Coordinates::new(0.0, 0.0), radius_m }
  }

  #[tokio::test]
  async fn mutations_invalidate_the_cached_list() {
    let store = Arc::new(MemoryStore::default());
    let cache = ZoneCache::new(store.clone(), Arc::new(MemoryCache::new()), Duration::from_secs(3600));
    let registry = ZoneRegistry::new(store.clone(), &cache);
    let subject = store.add_subject(NewSubject::new("A", "d-a")).await.unwrap();
    let id = subject.subject_id;

    assert!(cache.get(id).await.unwrap().is_empty());

    let home = registry.add(NewSafeZone::new(id, "home", circle(100.0))).await.unwrap();
    assert_eq!(cache.get(id).await.unwrap().len(), 1);

    registry.set_active(home.zone_id, false).await.unwrap().unwrap();
    assert!(cache.get(id).await.unwrap().is_empty());

    registry.set_active(home.zone_id, true).await.unwrap();
    assert_eq!(cache.get(id).await.unwrap().len(), 1);

    registry.delete(home.zone_id).await.unwrap().unwrap();
    assert!(cache.get(id).await.unwrap().is_empty());
    assert!(registry.delete(home.zone_id).await.unwrap().is_none());
  }

  #[tokio::test]
  async fn invalid_geometry_is_rejected_before_writing() {
    let store = Arc::new(MemoryStore::default());
    let cache = ZoneCache::new(store.clone(), Arc::new(MemoryCache::new()), Duration::from_secs(3600));
    let registry = ZoneRegistry::new(store.clone(), &cache);
    let subject = store.add_subject(NewSubject::new("A", "d-a")).await.unwrap();

    let err = registry.add(NewSafeZone::new(subject.subject_id, "tiny", circle(49.0))).await;
    assert!(matches!(err, Err(Error::InvalidGeometry(_))));
    assert!(store.find_active_zones_for_subject(subject.subject_id).await.unwrap().is_empty());
  }
}

//! Geofence evaluation: distances and containment tests.
//!
//! Everything here is a pure function over plain coordinates. Coordinates are
//! `(longitude, latitude)` pairs in decimal degrees, the same order the
//! location provider reports them in.
//!
//! Polygon containment uses a ray-casting parity test in the lon/lat plane.
//! A point lying exactly on an edge is classified by the half-open crossing
//! rule (an edge counts only when exactly one of its endpoints lies strictly
//! north of the point), so it may come out on either side. No edge case is
//! special-cased.

use serde::{Deserialize, Serialize};

use crate::{Error, Result, zone::ZoneGeometry};

/// Mean Earth radius used by the haversine formula.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Smallest radius a circular zone may have.
pub const MIN_CIRCLE_RADIUS_M: f64 = 50.0;

// ─── Coordinates ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
  pub longitude: f64,
  pub latitude:  f64,
}

impl Coordinates {
  pub const fn new(longitude: f64, latitude: f64) -> Self {
    Self { longitude, latitude }
  }

  /// Finite and within the WGS84 degree ranges.
  pub fn is_valid(&self) -> bool {
    self.longitude.is_finite()
      && self.latitude.is_finite()
      && (-180.0..=180.0).contains(&self.longitude)
      && (-90.0..=90.0).contains(&self.latitude)
  }
}

// ─── Results ─────────────────────────────────────────────────────────────────

/// Whether a signed distance is exact or an estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceKind {
  Exact,
  /// Nearest-edge distance in a local flat projection. Good to a few meters
  /// for zones of city-block scale, worse for very large polygons.
  Approximate,
}

/// Outcome of testing one point against one zone.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Containment {
  pub inside:            bool,
  /// Distance to the zone boundary in meters; negative when inside.
  pub signed_distance_m: f64,
  pub distance_kind:     DistanceKind,
}

// ─── Distance ────────────────────────────────────────────────────────────────

/// Great-circle distance in meters (haversine).
pub fn distance(a: Coordinates, b: Coordinates) -> f64 {
  let phi_a = a.latitude.to_radians();
  let phi_b = b.latitude.to_radians();
  let d_phi = (b.latitude - a.latitude).to_radians();
  let d_lambda = (b.longitude - a.longitude).to_radians();

  let h = (d_phi / 2.0).sin().powi(2)
    + phi_a.cos() * phi_b.cos() * (d_lambda / 2.0).sin().powi(2);
  // Rounding can push `h` a hair past 1 for antipodal points.
  let h = h.clamp(0.0, 1.0);

  2.0 * EARTH_RADIUS_M * h.sqrt().atan2((1.0 - h).sqrt())
}

// ─── Validation ──────────────────────────────────────────────────────────────

/// Reject zone geometry that cannot be evaluated.
pub fn validate(geometry: &ZoneGeometry) -> Result<()> {
  match geometry {
    ZoneGeometry::Circle { center, radius_m } => {
      if !center.is_valid() {
        return Err(Error::InvalidGeometry(format!(
          "circle center out of range: {center:?}"
        )));
      }
      if !radius_m.is_finite() || *radius_m < MIN_CIRCLE_RADIUS_M {
        return Err(Error::InvalidGeometry(format!(
          "circle radius {radius_m} is below the {MIN_CIRCLE_RADIUS_M} m minimum"
        )));
      }
      Ok(())
    }
    ZoneGeometry::Polygon { ring } => {
      if let Some(bad) = ring.iter().find(|c| !c.is_valid()) {
        return Err(Error::InvalidGeometry(format!(
          "polygon vertex out of range: {bad:?}"
        )));
      }
      let mut distinct: Vec<Coordinates> = Vec::with_capacity(ring.len());
      for c in ring {
        if !distinct.contains(c) {
          distinct.push(*c);
        }
      }
      if distinct.len() < 3 {
        return Err(Error::InvalidGeometry(format!(
          "polygon ring has {} distinct points; at least 3 required",
          distinct.len()
        )));
      }
      Ok(())
    }
  }
}

// ─── Containment ─────────────────────────────────────────────────────────────

/// Test `point` against `geometry`.
///
/// Circles report an exact signed distance; polygons report the approximate
/// distance to the nearest ring edge.
pub fn contains(point: Coordinates, geometry: &ZoneGeometry) -> Result<Containment> {
  if !point.is_valid() {
    return Err(Error::InvalidGeometry(format!(
      "observed point out of range: {point:?}"
    )));
  }
  validate(geometry)?;

  match geometry {
    ZoneGeometry::Circle { center, radius_m } => {
      let d = distance(point, *center);
      Ok(Containment {
        inside:            d <= *radius_m,
        signed_distance_m: d - radius_m,
        distance_kind:     DistanceKind::Exact,
      })
    }
    ZoneGeometry::Polygon { ring } => {
      let ring = open_ring(ring);
      let inside = point_in_ring(point, ring);
      let edge = nearest_edge_distance(point, ring);
      Ok(Containment {
        inside,
        signed_distance_m: if inside { -edge } else { edge },
        distance_kind: DistanceKind::Approximate,
      })
    }
  }
}

/// Drop an explicit closing vertex; the ring is closed implicitly.
fn open_ring(ring: &[Coordinates]) -> &[Coordinates] {
  match (ring.first(), ring.last()) {
    (Some(first), Some(last)) if ring.len() > 1 && first == last => {
      &ring[..ring.len() - 1]
    }
    _ => ring,
  }
}

fn point_in_ring(point: Coordinates, ring: &[Coordinates]) -> bool {
  let (x, y) = (point.longitude, point.latitude);
  let mut inside = false;
  let mut j = ring.len() - 1;
  for i in 0..ring.len() {
    let (xi, yi) = (ring[i].longitude, ring[i].latitude);
    let (xj, yj) = (ring[j].longitude, ring[j].latitude);
    if (yi > y) != (yj > y) && x < (xj - xi) * (y - yi) / (yj - yi) + xi {
      inside = !inside;
    }
    j = i;
  }
  inside
}

/// Project `c` into a flat plane centred on `origin`, in meters.
fn project(origin: Coordinates, c: Coordinates) -> (f64, f64) {
  let mut d_lon = c.longitude - origin.longitude;
  if d_lon > 180.0 {
    d_lon -= 360.0;
  } else if d_lon < -180.0 {
    d_lon += 360.0;
  }
  let x = d_lon.to_radians() * origin.latitude.to_radians().cos() * EARTH_RADIUS_M;
  let y = (c.latitude - origin.latitude).to_radians() * EARTH_RADIUS_M;
  (x, y)
}

fn nearest_edge_distance(point: Coordinates, ring: &[Coordinates]) -> f64 {
  let mut best = f64::INFINITY;
  let mut j = ring.len() - 1;
  for i in 0..ring.len() {
    let (ax, ay) = project(point, ring[j]);
    let (bx, by) = project(point, ring[i]);
    let (dx, dy) = (bx - ax, by - ay);
    let len_sq = dx * dx + dy * dy;
    let t = if len_sq == 0.0 {
      0.0
    } else {
      (-(ax * dx + ay * dy) / len_sq).clamp(0.0, 1.0)
    };
    let (cx, cy) = (ax + t * dx, ay + t * dy);
    best = best.min((cx * cx + cy * cy).sqrt());
    j = i;
  }
  best
}

//! Safe zones and their optional weekly schedules.

use std::fmt;

use chrono::{DateTime, Datelike, Timelike, Utc, Weekday};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, geofence::Coordinates};

// ─── Geometry ────────────────────────────────────────────────────────────────

/// The shape of a safe zone. Circle and polygon data never coexist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ZoneGeometry {
  Circle {
    center:   Coordinates,
    radius_m: f64,
  },
  /// Ordered ring of vertices. The last vertex connects back to the first;
  /// repeating the first vertex at the end is allowed but not required.
  Polygon { ring: Vec<Coordinates> },
}

impl ZoneGeometry {
  pub fn kind(&self) -> &'static str {
    match self {
      Self::Circle { .. } => "circle",
      Self::Polygon { .. } => "polygon",
    }
  }
}

// ─── Schedule ────────────────────────────────────────────────────────────────

/// A wall-clock time with minute precision, written `HH:MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TimeOfDay {
  hour:   u8,
  minute: u8,
}

impl TimeOfDay {
  pub fn new(hour: u8, minute: u8) -> Option<Self> {
    (hour < 24 && minute < 60).then_some(Self { hour, minute })
  }

  pub fn minutes_since_midnight(&self) -> u16 {
    u16::from(self.hour) * 60 + u16::from(self.minute)
  }
}

impl TryFrom<String> for TimeOfDay {
  type Error = Error;

  fn try_from(s: String) -> Result<Self, Self::Error> {
    let invalid = || Error::InvalidTimeOfDay(s.clone());
    let (h, m) = s.split_once(':').ok_or_else(invalid)?;
    if h.len() != 2 || m.len() != 2 {
      return Err(invalid());
    }
    let hour: u8 = h.parse().map_err(|_| invalid())?;
    let minute: u8 = m.parse().map_err(|_| invalid())?;
    Self::new(hour, minute).ok_or_else(invalid)
  }
}

impl From<TimeOfDay> for String {
  fn from(t: TimeOfDay) -> Self { t.to_string() }
}

impl fmt::Display for TimeOfDay {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{:02}:{:02}", self.hour, self.minute)
  }
}

/// Day of the week, spelled out in lowercase on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Day {
  Monday,
  Tuesday,
  Wednesday,
  Thursday,
  Friday,
  Saturday,
  Sunday,
}

impl Day {
  fn previous(self) -> Self {
    match self {
      Self::Monday => Self::Sunday,
      Self::Tuesday => Self::Monday,
      Self::Wednesday => Self::Tuesday,
      Self::Thursday => Self::Wednesday,
      Self::Friday => Self::Thursday,
      Self::Saturday => Self::Friday,
      Self::Sunday => Self::Saturday,
    }
  }
}

impl From<Weekday> for Day {
  fn from(w: Weekday) -> Self {
    match w {
      Weekday::Mon => Self::Monday,
      Weekday::Tue => Self::Tuesday,
      Weekday::Wed => Self::Wednesday,
      Weekday::Thu => Self::Thursday,
      Weekday::Fri => Self::Friday,
      Weekday::Sat => Self::Saturday,
      Weekday::Sun => Self::Sunday,
    }
  }
}

/// A recurring window on the listed days. `end` is exclusive. When `end` is
/// earlier than `start` the window runs past midnight into the next day;
/// when they are equal the window covers the whole day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
  pub days:  Vec<Day>,
  pub start: TimeOfDay,
  pub end:   TimeOfDay,
}

impl TimeRange {
  fn covers(&self, day: Day, minute: u16) -> bool {
    let start = self.start.minutes_since_midnight();
    let end = self.end.minutes_since_midnight();
    let today = self.days.contains(&day);
    if start < end {
      today && minute >= start && minute < end
    } else if start == end {
      today
    } else {
      (today && minute >= start)
        || (self.days.contains(&day.previous()) && minute < end)
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneSchedule {
  /// A disabled schedule puts the zone in force around the clock.
  pub enabled: bool,
  #[serde(default)]
  pub ranges:  Vec<TimeRange>,
}

impl ZoneSchedule {
  /// Whether the schedule puts the zone in force at `at` (evaluated in UTC).
  pub fn is_in_force(&self, at: DateTime<Utc>) -> bool {
    if !self.enabled || self.ranges.is_empty() {
      return true;
    }
    let day = Day::from(at.weekday());
    let minute = (at.hour() * 60 + at.minute()) as u16;
    self.ranges.iter().any(|r| r.covers(day, minute))
  }
}

// ─── SafeZone ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafeZone {
  pub zone_id:     Uuid,
  pub subject_id:  Uuid,
  pub name:        String,
  pub description: Option<String>,
  pub geometry:    ZoneGeometry,
  pub is_active:   bool,
  pub schedule:    Option<ZoneSchedule>,
  pub created_at:  DateTime<Utc>,
}

impl SafeZone {
  /// Active and, if scheduled, inside one of its windows at `at`.
  pub fn is_in_force(&self, at: DateTime<Utc>) -> bool {
    self.is_active
      && self.schedule.as_ref().is_none_or(|s| s.is_in_force(at))
  }
}

/// Input to [`crate::store::MonitorStore::add_zone`].
#[derive(Debug, Clone)]
pub struct NewSafeZone {
  pub subject_id:  Uuid,
  pub name:        String,
  pub description: Option<String>,
  pub geometry:    ZoneGeometry,
  pub schedule:    Option<ZoneSchedule>,
}

impl NewSafeZone {
  pub fn new(subject_id: Uuid, name: impl Into<String>, geometry: ZoneGeometry) -> Self {
    Self {
      subject_id,
      name: name.into(),
      description: None,
      geometry,
      schedule: None,
    }
  }
}

//! Core types and trait definitions for the Tether location-verification
//! engine.
//!
//! This crate is deliberately free of HTTP and database dependencies. It holds
//! the domain model, the pure geofence maths, and the storage/cache seams that
//! the engine and the backends meet at.

pub mod cache;
pub mod error;
pub mod geofence;
pub mod record;
pub mod store;
pub mod subject;
pub mod zone;

pub use error::{Error, Result};

//! Shared domain types for the Sightline project.

pub mod config;
pub mod detection;
pub mod events;
pub mod geometry;
pub mod session;
pub mod telemetry;
pub mod vision;

mod errors;

pub use errors::{SightlineError, Result};

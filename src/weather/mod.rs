//! Open-Meteo weather accessor and the operations built on it.

pub mod cache;
pub mod client;
pub mod location;
pub mod params;
pub mod policy;
pub mod tools;

pub use client::WeatherClient;
pub use location::{Confidence, Coordinates, LocationQuery, Place, ResolvedLocation};
pub use tools::OperationGroup;

//! PostgreSQL database integration
//!
//! Read-only access to the claims database the cohorts are selected from.

pub mod client;
pub mod decode;
pub mod params;

pub use client::PostgresClient;
pub use params::ParamConversionError;

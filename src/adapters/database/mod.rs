//! Database abstraction layer
//!
//! This module provides a trait-based abstraction over the source database,
//! so the pipeline can be tested without a live server.

pub mod factory;
pub mod traits;

pub use factory::create_database_backend;
pub use traits::{CatalogInspector, QueryBackend};

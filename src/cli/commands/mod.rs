//! CLI command implementations
//!
//! This module contains all CLI command implementations.

pub mod check_connection;
pub mod init;
pub mod list;
pub mod run;
pub mod validate;

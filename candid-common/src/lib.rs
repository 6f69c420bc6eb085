//! # Candid Common Library
//!
//! Shared code for the Candid deliberation platform services including:
//! - Common error types
//! - Configuration file resolution
//! - PostgreSQL connection pool setup
//! - Vote weighting and ranking math

pub mod config;
pub mod db;
pub mod error;
pub mod weighting;

pub use error::{Error, Result};
pub use weighting::Coords;

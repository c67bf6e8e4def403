//! Huddle Shared Types and Utilities
//!
//! This crate contains ids, message records, errors and database helpers
//! shared by the Huddle services.

pub mod db;
pub mod error;
pub mod types;

pub use db::*;
pub use error::*;
pub use types::*;

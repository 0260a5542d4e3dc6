//! Soundpost Common - shared types for the host audio module
//!
//! This crate contains the types used across the soundpost workspace:
//! - Audio codec tags, stream info, and chunk types
//! - Resource configuration attributes and their typed parsing
//! - Common error types

pub mod config;
pub mod error;
pub mod types;

pub use config::*;
pub use error::*;
pub use types::*;

//! # TagSync Common Library
//!
//! Shared code for the TagSync crates including:
//! - Error type used by every persistence operation
//! - Event types (SyncEvent enum) and the EventBus
//! - Bootstrap configuration loading
//! - Time helpers

pub mod config;
pub mod error;
pub mod events;
pub mod time;

pub use error::{Error, Result};

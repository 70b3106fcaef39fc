//! # Heart Rate Monitor Common Library
//!
//! Shared code for the heart-rate monitor services including:
//! - Reading model and payload normalization
//! - SSE event types for the live readings stream
//! - Push-id generation
//! - Configuration loading
//! - Utility functions

pub mod config;
pub mod error;
pub mod events;
pub mod push_id;
pub mod reading;
pub mod time;

pub use error::{Error, Result};
pub use reading::{IdentifiedReading, Reading};

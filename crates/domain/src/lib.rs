//! Shared domain types for the wick gateway: the conversation data model,
//! stream events, configuration, and the common error type.

pub mod cancel;
pub mod config;
pub mod error;
pub mod message;
pub mod stream;
pub mod tool;
pub mod trace;

pub use error::{Error, Result};

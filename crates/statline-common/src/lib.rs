//! Statline Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, logging, and error handling for the Statline workspace.
//!
//! # Overview
//!
//! - **Error Handling**: [`StatlineError`] and the [`Result`] alias
//! - **Logging**: centralized `tracing` setup used by every binary
//! - **Types**: work items, canonical stat records and checkpoints
//!
//! # Example
//!
//! ```no_run
//! use statline_common::types::Category;
//! use statline_common::Result;
//!
//! fn parse(input: &str) -> Result<Category> {
//!     input.parse()
//! }
//! ```

pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{Result, StatlineError};

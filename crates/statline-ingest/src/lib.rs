//! Statline Ingest Library
//!
//! Resumable ingestion of per-game player stat lines from a remote,
//! rate-limited provider into Postgres.
//!
//! # Example
//!
//! ```no_run
//! use statline_ingest::config::{ProviderConfig, RunConfig};
//! use statline_ingest::pipeline::IngestCoordinator;
//! use statline_ingest::provider::HttpStatProvider;
//! use statline_ingest::store::MemoryStore;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = RunConfig::default();
//!     let provider = HttpStatProvider::new(
//!         ProviderConfig::new("https://stats.example.com"),
//!         config.fetch_timeout,
//!     )?;
//!     let store = Arc::new(MemoryStore::new());
//!
//!     let coordinator =
//!         IngestCoordinator::new(store.clone(), store.clone(), store, Arc::new(provider));
//!     let summary = coordinator.run(&config).await?;
//!     println!("{} records written", summary.records_written);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod db;
pub mod error;
pub mod pipeline;
pub mod provider;
pub mod store;

pub use error::{IngestError, Result};
pub use pipeline::{IngestCoordinator, RunSummary};

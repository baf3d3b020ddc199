//! clusterdump common library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, utilities, and error handling for the clusterdump workspace.
//!
//! # Overview
//!
//! - **Ingest contract**: the [`api::IngestApi`] trait and its wire messages,
//!   shared by the dumper (client side) and the ingestor (server side)
//! - **Checksums**: dataset archive integrity helpers
//! - **Logging**: one `tracing` setup for every binary
//!
//! # Example
//!
//! ```no_run
//! use clusterdump_common::checksum::sha256_file;
//!
//! fn fingerprint(path: &str) -> clusterdump_common::Result<()> {
//!     let digest = sha256_file(path)?;
//!     tracing::info!(%digest, "archive fingerprint");
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod checksum;
pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use api::{ApiError, IngestApi};
pub use error::{CommonError, Result};

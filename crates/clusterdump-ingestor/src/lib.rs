//! clusterdump ingestor library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! HTTP server side of the ingest contract. [`api::router`] exposes any
//! [`clusterdump_common::IngestApi`] implementation; [`service::LocalIngestor`]
//! is the filesystem-backed implementation shipped with the binary.

pub mod api;
pub mod config;
pub mod error;
pub mod service;

pub use error::AppError;
pub use service::LocalIngestor;

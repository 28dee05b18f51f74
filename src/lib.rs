//! Catalog Materializer Library
//!
//! Turns selections from a shared template catalog into project-scoped work
//! items. This module exports the core components for testing and integration.

pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod format;
pub mod materialize;
pub mod types;

//! # Catalog Common Library
//!
//! Shared code for the listen catalog crates:
//! - Bootstrap configuration loading (TOML)
//! - Tracing subscriber setup
//! - SQLite pool initialization
//! - Common error type

pub mod config;
pub mod db;
pub mod error;
pub mod logging;

pub use error::{Error, Result};

//! Test Helper Utilities
//!
//! Shared fakes and database utilities for catalog-resolver integration tests

#![allow(dead_code)]

pub mod db_utils;
pub mod fakes;

pub use db_utils::{count_rows, test_catalog, TestCatalog};
pub use fakes::{FixedImages, ScriptedAuthority};

//! Error types for catalog resolution
//!
//! Only validation and store failures ever reach a caller. Authority and
//! image failures are recovered inside the resolvers and only logged.

use crate::store::StoreError;
use std::sync::Arc;
use thiserror::Error;

/// Catalog engine error
///
/// `Clone` so that one coalesced submission can hand the same error to every
/// waiter; the store error is shared behind an `Arc`.
#[derive(Debug, Clone, Error)]
pub enum CatalogError {
    /// Missing or malformed caller input; never retried
    #[error("Invalid request: {0}")]
    Validation(String),

    /// Explicit operation on an entity that does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Storage failure; the submission cannot be completed consistently
    #[error("Store error: {0}")]
    Store(Arc<StoreError>),
}

impl From<StoreError> for CatalogError {
    fn from(err: StoreError) -> Self {
        CatalogError::Store(Arc::new(err))
    }
}

/// Result type for catalog operations
pub type CatalogResult<T> = Result<T, CatalogError>;

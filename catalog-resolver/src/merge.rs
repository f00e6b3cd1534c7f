//! Entity merges
//!
//! A merge folds `from` into `to`: references move over, duplicate
//! associations are dropped, `from`'s aliases become non-primary aliases of
//! `to`, and `from` plus anything it orphaned is deleted. Each merge is one
//! store transaction.

use crate::error::{CatalogError, CatalogResult};
use crate::store::{Store, StoreError};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

pub struct MergeEngine {
    store: Arc<dyn Store>,
}

impl MergeEngine {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn merge_artists(&self, from: Uuid, to: Uuid, replace_image: bool) -> CatalogResult<()> {
        check_pair(from, to)?;
        self.store
            .merge_artists(from, to, replace_image)
            .await
            .map_err(map_missing)?;
        info!(%from, %to, replace_image, "Merged artists");
        Ok(())
    }

    pub async fn merge_releases(&self, from: Uuid, to: Uuid, replace_image: bool) -> CatalogResult<()> {
        check_pair(from, to)?;
        self.store
            .merge_releases(from, to, replace_image)
            .await
            .map_err(map_missing)?;
        info!(%from, %to, replace_image, "Merged releases");
        Ok(())
    }

    pub async fn merge_tracks(&self, from: Uuid, to: Uuid) -> CatalogResult<()> {
        check_pair(from, to)?;
        self.store.merge_tracks(from, to).await.map_err(map_missing)?;
        info!(%from, %to, "Merged tracks");
        Ok(())
    }
}

fn check_pair(from: Uuid, to: Uuid) -> CatalogResult<()> {
    if from == to {
        return Err(CatalogError::Validation(format!("cannot merge {} into itself", from)));
    }
    Ok(())
}

fn map_missing(err: StoreError) -> CatalogError {
    match err {
        StoreError::NotFound(what) => CatalogError::NotFound(what),
        other => other.into(),
    }
}

//! Database Test Utilities
//!
//! In-memory catalogs and row counting for assertions

use super::fakes::{FixedImages, ScriptedAuthority};
use catalog_resolver::store::{SqliteStore, Store};
use catalog_resolver::Catalog;
use std::sync::Arc;

/// A catalog over a private in-memory database, plus handles to its parts
pub struct TestCatalog {
    pub catalog: Catalog,
    pub store: Arc<SqliteStore>,
    pub authority: Arc<ScriptedAuthority>,
}

/// Build a catalog over a fresh in-memory store with `authority`
pub async fn test_catalog(authority: ScriptedAuthority) -> TestCatalog {
    let store = Arc::new(SqliteStore::in_memory().await.expect("in-memory store"));
    let authority = Arc::new(authority);

    let store_dyn: Arc<dyn Store> = store.clone();
    let catalog = Catalog::new(store_dyn, authority.clone(), Arc::new(FixedImages));

    TestCatalog {
        catalog,
        store,
        authority,
    }
}

/// Row count of `table`
pub async fn count_rows(store: &SqliteStore, table: &str) -> i64 {
    let query = format!("SELECT COUNT(*) FROM {}", table);
    sqlx::query_scalar(&query)
        .fetch_one(store.pool())
        .await
        .expect("count query")
}

//! Alias and primary-artist bookkeeping
//!
//! Every artist, release and track has exactly one primary alias, which is
//! its display name, and every release or track has at most one primary
//! artist. All edits to those flags go through [`AliasManager`].

use crate::error::{CatalogError, CatalogResult};
use crate::models::{Alias, AliasOwner, AliasSource, CreditedItem};
use crate::store::Store;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

pub struct AliasManager {
    store: Arc<dyn Store>,
}

impl AliasManager {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Aliases of `owner`, primary first
    pub async fn aliases(&self, owner: AliasOwner) -> CatalogResult<Vec<Alias>> {
        Ok(self.store.aliases(owner).await?)
    }

    /// Union `aliases` into the owner's aliases as non-primary entries
    ///
    /// Values are trimmed and compared case-sensitively. A blank value
    /// rejects the whole call.
    pub async fn add_aliases(
        &self,
        owner: AliasOwner,
        aliases: &[String],
        source: AliasSource,
    ) -> CatalogResult<()> {
        let mut cleaned: Vec<String> = Vec::with_capacity(aliases.len());
        for alias in aliases {
            let alias = alias.trim();
            if alias.is_empty() {
                return Err(CatalogError::Validation(format!(
                    "blank alias for {} {}",
                    owner.kind(),
                    owner.id()
                )));
            }
            if !cleaned.iter().any(|c| c == alias) {
                cleaned.push(alias.to_string());
            }
        }

        let existing = self.store.aliases(owner).await?;
        if existing.is_empty() {
            return Err(CatalogError::NotFound(format!("{} {}", owner.kind(), owner.id())));
        }

        let new: Vec<String> = cleaned
            .into_iter()
            .filter(|value| !existing.iter().any(|a| &a.value == value))
            .collect();
        if new.is_empty() {
            return Ok(());
        }

        debug!(owner = owner.kind(), id = %owner.id(), count = new.len(), %source, "Adding aliases");
        self.store.save_aliases(owner, &new, source).await?;
        Ok(())
    }

    /// Make `value` the display name of `owner`
    pub async fn set_primary(&self, owner: AliasOwner, value: &str) -> CatalogResult<()> {
        let existing = self.store.aliases(owner).await?;
        match existing.iter().find(|a| a.value == value) {
            None => Err(CatalogError::Validation(format!(
                "'{}' is not an alias of {} {}",
                value,
                owner.kind(),
                owner.id()
            ))),
            Some(alias) if alias.is_primary => Ok(()),
            Some(_) => {
                self.store.set_primary_alias(owner, value).await?;
                debug!(owner = owner.kind(), id = %owner.id(), alias = value, "Primary alias changed");
                Ok(())
            }
        }
    }

    /// Remove a non-primary alias
    ///
    /// Deleting the primary alias or an unknown value leaves the aliases
    /// untouched and succeeds.
    pub async fn delete_alias(&self, owner: AliasOwner, value: &str) -> CatalogResult<()> {
        let existing = self.store.aliases(owner).await?;
        match existing.iter().find(|a| a.value == value) {
            None => Ok(()),
            Some(alias) if alias.is_primary => {
                warn!(
                    owner = owner.kind(),
                    id = %owner.id(),
                    alias = value,
                    "Refusing to delete primary alias"
                );
                Ok(())
            }
            Some(_) => {
                self.store.delete_alias(owner, value).await?;
                Ok(())
            }
        }
    }

    /// Set or clear the primary flag of `artist_id` on `item`
    ///
    /// Setting it clears any other primary artist of the item.
    pub async fn set_primary_artist_for_item(
        &self,
        item: CreditedItem,
        artist_id: Uuid,
        value: bool,
    ) -> CatalogResult<()> {
        let credits = self.store.item_artists(item).await?;
        if !credits.iter().any(|c| c.artist_id == artist_id) {
            return Err(CatalogError::NotFound(format!(
                "artist {} is not credited on {}",
                artist_id,
                item.id()
            )));
        }

        self.store.set_primary_artist(item, artist_id, value).await?;
        Ok(())
    }
}

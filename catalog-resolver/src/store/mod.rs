//! Catalog storage interface
//!
//! The resolvers only talk to storage through [`Store`]. Lookups are enums so
//! exactly one lookup mode is chosen per call; a lookup that carries too
//! little information (blank alias, empty title list, no artists) fails with
//! [`StoreError::InsufficientInfo`]. A lookup that finds nothing returns
//! `Ok(None)`, which the resolvers branch on.

pub mod schema;
pub mod sqlite;

pub use sqlite::SqliteStore;

use crate::models::{
    Alias, AliasOwner, AliasSource, Artist, ArtistCredit, CreditedItem, ImageRef, Listen, Release,
    Track,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

/// Storage errors
#[derive(Debug, Error)]
pub enum StoreError {
    /// The lookup did not identify anything to search for
    #[error("Insufficient information for {0} lookup")]
    InsufficientInfo(&'static str),

    /// An update or merge referenced a row that does not exist
    #[error("{0} not found")]
    NotFound(String),

    /// A stored value could not be decoded
    #[error("Corrupt row: {0}")]
    Corrupt(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtistLookup {
    Id(Uuid),
    MusicBrainzId(Uuid),
    /// Exact, case-sensitive alias match
    Alias(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleaseLookup {
    Id(Uuid),
    MusicBrainzId(Uuid),
    /// Any of `titles` as an alias of a release credited to `artist_id`
    Titles { artist_id: Uuid, titles: Vec<String> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackLookup {
    Id(Uuid),
    MusicBrainzId(Uuid),
    /// `title` as an alias of a track credited to every artist in `artist_ids`
    Title { title: String, artist_ids: Vec<Uuid> },
}

#[derive(Debug, Clone, Default)]
pub struct NewArtist {
    /// Becomes the primary `Canonical` alias
    pub name: String,
    pub musicbrainz_id: Option<Uuid>,
    /// Extra non-primary aliases, recorded with `alias_source`
    pub aliases: Vec<String>,
    pub alias_source: Option<AliasSource>,
    pub image: Option<ImageRef>,
}

#[derive(Debug, Clone, Default)]
pub struct NewRelease {
    pub title: String,
    pub musicbrainz_id: Option<Uuid>,
    /// First entry is credited as primary
    pub artist_ids: Vec<Uuid>,
    pub various_artists: bool,
    pub image: Option<ImageRef>,
}

#[derive(Debug, Clone, Default)]
pub struct NewTrack {
    pub title: String,
    pub musicbrainz_id: Option<Uuid>,
    pub release_id: Uuid,
    /// First entry is credited as primary
    pub artist_ids: Vec<Uuid>,
    pub duration: u32,
}

/// Partial update; `None` fields are left untouched
#[derive(Debug, Clone, Default)]
pub struct EntityUpdate {
    pub musicbrainz_id: Option<Uuid>,
    pub image: Option<ImageRef>,
    /// Tracks only
    pub duration: Option<u32>,
}

/// Aggregate scope for listen statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenScope {
    All,
    Artist(Uuid),
    Release(Uuid),
    Track(Uuid),
}

/// Catalog storage
#[async_trait]
pub trait Store: Send + Sync {
    async fn get_artist(&self, lookup: ArtistLookup) -> Result<Option<Artist>, StoreError>;
    async fn save_artist(&self, artist: NewArtist) -> Result<Artist, StoreError>;
    async fn update_artist(&self, id: Uuid, update: EntityUpdate) -> Result<(), StoreError>;

    async fn get_release(&self, lookup: ReleaseLookup) -> Result<Option<Release>, StoreError>;
    async fn save_release(&self, release: NewRelease) -> Result<Release, StoreError>;
    async fn update_release(&self, id: Uuid, update: EntityUpdate) -> Result<(), StoreError>;

    async fn get_track(&self, lookup: TrackLookup) -> Result<Option<Track>, StoreError>;
    async fn save_track(&self, track: NewTrack) -> Result<Track, StoreError>;
    async fn update_track(&self, id: Uuid, update: EntityUpdate) -> Result<(), StoreError>;

    /// Aliases of `owner`, primary first
    async fn aliases(&self, owner: AliasOwner) -> Result<Vec<Alias>, StoreError>;
    /// Insert non-primary aliases, skipping values the owner already has
    async fn save_aliases(
        &self,
        owner: AliasOwner,
        values: &[String],
        source: AliasSource,
    ) -> Result<(), StoreError>;
    /// Clear the current primary and mark `value` primary in one transaction
    async fn set_primary_alias(&self, owner: AliasOwner, value: &str) -> Result<(), StoreError>;
    /// Remove a non-primary alias; primary rows are never deleted
    async fn delete_alias(&self, owner: AliasOwner, value: &str) -> Result<(), StoreError>;

    async fn item_artists(&self, item: CreditedItem) -> Result<Vec<ArtistCredit>, StoreError>;
    /// With `value == true` any other primary artist of the item is cleared
    /// in the same transaction
    async fn set_primary_artist(
        &self,
        item: CreditedItem,
        artist_id: Uuid,
        value: bool,
    ) -> Result<(), StoreError>;

    async fn save_listen(&self, listen: &Listen) -> Result<(), StoreError>;
    async fn delete_listen(&self, track_id: Uuid, listened_at: DateTime<Utc>)
        -> Result<(), StoreError>;
    async fn listen_count(&self, scope: ListenScope) -> Result<i64, StoreError>;
    /// Sum of known track durations over the listens in scope, in seconds
    async fn time_listened(&self, scope: ListenScope) -> Result<i64, StoreError>;

    async fn merge_artists(&self, from: Uuid, to: Uuid, replace_image: bool)
        -> Result<(), StoreError>;
    async fn merge_releases(&self, from: Uuid, to: Uuid, replace_image: bool)
        -> Result<(), StoreError>;
    async fn merge_tracks(&self, from: Uuid, to: Uuid) -> Result<(), StoreError>;
}

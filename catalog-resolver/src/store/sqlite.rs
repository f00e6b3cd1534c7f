//! SQLite catalog store
//!
//! Multi-statement writes (entity creation, primary flips, merges) run in a
//! single transaction so a partially applied change is never observable.

use super::{
    schema, ArtistLookup, EntityUpdate, ListenScope, NewArtist, NewRelease, NewTrack,
    ReleaseLookup, Store, StoreError, TrackLookup,
};
use crate::models::{
    Alias, AliasOwner, AliasSource, Artist, ArtistCredit, CreditedItem, ImageRef, Listen, Release,
    Track,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool, Transaction};
use std::path::Path;
use tracing::{debug, info};
use uuid::Uuid;

/// Store backed by a sqlx SQLite pool
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Wrap an existing pool; the schema must already exist
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open the database file and make sure the schema exists
    pub async fn open(db_path: &Path, max_connections: u32) -> catalog_common::Result<Self> {
        let pool = catalog_common::db::init_pool(db_path, max_connections).await?;
        schema::initialize_schema(&pool).await?;
        Ok(Self::new(pool))
    }

    /// Private in-memory catalog (tests, dry runs)
    pub async fn in_memory() -> catalog_common::Result<Self> {
        let pool = catalog_common::db::init_memory_pool().await?;
        schema::initialize_schema(&pool).await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn artist_by_id(&self, id: Uuid) -> Result<Option<Artist>, StoreError> {
        let row = sqlx::query(
            "SELECT id, musicbrainz_id, image_url, image_source FROM artists WHERE id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let aliases = self.aliases(AliasOwner::Artist(id)).await?;
        Ok(Some(Artist {
            id,
            musicbrainz_id: parse_optional_uuid(row.get("musicbrainz_id"))?,
            name: primary_value(&aliases, "artist", id)?,
            aliases,
            image: image_from_row(&row),
        }))
    }

    async fn release_by_id(&self, id: Uuid) -> Result<Option<Release>, StoreError> {
        let row = sqlx::query(
            "SELECT id, musicbrainz_id, various_artists, image_url, image_source FROM releases WHERE id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let aliases = self.aliases(AliasOwner::Release(id)).await?;
        let various: i64 = row.get("various_artists");
        Ok(Some(Release {
            id,
            musicbrainz_id: parse_optional_uuid(row.get("musicbrainz_id"))?,
            title: primary_value(&aliases, "release", id)?,
            aliases,
            various_artists: various != 0,
            image: image_from_row(&row),
            artists: self.item_artists(CreditedItem::Release(id)).await?,
        }))
    }

    async fn track_by_id(&self, id: Uuid) -> Result<Option<Track>, StoreError> {
        let row = sqlx::query(
            "SELECT id, musicbrainz_id, release_id, duration FROM tracks WHERE id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let aliases = self.aliases(AliasOwner::Track(id)).await?;
        let release_id: String = row.get("release_id");
        let duration: i64 = row.get("duration");
        Ok(Some(Track {
            id,
            musicbrainz_id: parse_optional_uuid(row.get("musicbrainz_id"))?,
            title: primary_value(&aliases, "track", id)?,
            aliases,
            release_id: parse_uuid(&release_id)?,
            duration: u32::try_from(duration).unwrap_or(0),
            artists: self.item_artists(CreditedItem::Track(id)).await?,
        }))
    }

    async fn require_pair(
        tx: &mut Transaction<'_, Sqlite>,
        table: &str,
        from: Uuid,
        to: Uuid,
    ) -> Result<(), StoreError> {
        let query = format!("SELECT COUNT(*) FROM {} WHERE id IN (?, ?)", table);
        let found: i64 = sqlx::query_scalar(&query)
            .bind(from.to_string())
            .bind(to.to_string())
            .fetch_one(&mut **tx)
            .await?;

        if found < 2 {
            return Err(StoreError::NotFound(format!(
                "merge {} {} -> {}",
                table, from, to
            )));
        }
        Ok(())
    }

    /// Copy every alias of `from` onto `to` as a non-primary alias
    async fn carry_aliases(
        tx: &mut Transaction<'_, Sqlite>,
        owner_from: AliasOwner,
        to: Uuid,
    ) -> Result<(), StoreError> {
        let (table, column) = alias_table(owner_from);
        let query = format!(
            "INSERT OR IGNORE INTO {table} ({column}, alias, source, is_primary) \
             SELECT ?, alias, source, 0 FROM {table} WHERE {column} = ?"
        );
        sqlx::query(&query)
            .bind(to.to_string())
            .bind(owner_from.id().to_string())
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    async fn copy_image(
        tx: &mut Transaction<'_, Sqlite>,
        table: &str,
        from: Uuid,
        to: Uuid,
    ) -> Result<(), StoreError> {
        let query = format!(
            "UPDATE {table} SET \
               image_url = (SELECT image_url FROM {table} WHERE id = ?1), \
               image_source = (SELECT image_source FROM {table} WHERE id = ?1) \
             WHERE id = ?2 AND (SELECT image_url FROM {table} WHERE id = ?1) IS NOT NULL"
        );
        sqlx::query(&query)
            .bind(from.to_string())
            .bind(to.to_string())
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    /// Move the artist rows of `from_artist` in one association table onto
    /// `to_artist`, dropping rows `to_artist` already has. A primary credit
    /// held by the dropped row passes to `to_artist`.
    async fn repoint_artist_credits(
        tx: &mut Transaction<'_, Sqlite>,
        table: &str,
        item_column: &str,
        from_artist: Uuid,
        to_artist: Uuid,
    ) -> Result<(), StoreError> {
        let conflicting_primary = format!(
            "SELECT {item_column} FROM {table} \
             WHERE artist_id = ?1 AND is_primary = 1 \
               AND {item_column} IN (SELECT {item_column} FROM {table} WHERE artist_id = ?2)"
        );
        let inherited: Vec<String> = sqlx::query_scalar(&conflicting_primary)
            .bind(from_artist.to_string())
            .bind(to_artist.to_string())
            .fetch_all(&mut **tx)
            .await?;

        let delete_conflicts = format!(
            "DELETE FROM {table} WHERE artist_id = ?1 \
               AND {item_column} IN (SELECT {item_column} FROM {table} WHERE artist_id = ?2)"
        );
        let dropped = sqlx::query(&delete_conflicts)
            .bind(from_artist.to_string())
            .bind(to_artist.to_string())
            .execute(&mut **tx)
            .await?
            .rows_affected();

        let promote = format!(
            "UPDATE {table} SET is_primary = 1 WHERE artist_id = ? AND {item_column} = ?"
        );
        for item in &inherited {
            sqlx::query(&promote)
                .bind(to_artist.to_string())
                .bind(item)
                .execute(&mut **tx)
                .await?;
        }

        let repoint = format!("UPDATE {table} SET artist_id = ? WHERE artist_id = ?");
        let moved = sqlx::query(&repoint)
            .bind(to_artist.to_string())
            .bind(from_artist.to_string())
            .execute(&mut **tx)
            .await?
            .rows_affected();

        debug!(table, dropped, moved, "Repointed artist credits");
        Ok(())
    }
}

fn alias_table(owner: AliasOwner) -> (&'static str, &'static str) {
    match owner {
        AliasOwner::Artist(_) => ("artist_aliases", "artist_id"),
        AliasOwner::Release(_) => ("release_aliases", "release_id"),
        AliasOwner::Track(_) => ("track_aliases", "track_id"),
    }
}

fn credit_table(item: CreditedItem) -> (&'static str, &'static str) {
    match item {
        CreditedItem::Release(_) => ("artist_releases", "release_id"),
        CreditedItem::Track(_) => ("artist_tracks", "track_id"),
    }
}

fn parse_uuid(value: &str) -> Result<Uuid, StoreError> {
    Uuid::parse_str(value).map_err(|e| StoreError::Corrupt(format!("bad id '{}': {}", value, e)))
}

fn parse_optional_uuid(value: Option<String>) -> Result<Option<Uuid>, StoreError> {
    value.as_deref().map(parse_uuid).transpose()
}

fn image_from_row(row: &SqliteRow) -> Option<ImageRef> {
    let url: Option<String> = row.get("image_url");
    let source: Option<String> = row.get("image_source");
    url.map(|url| ImageRef {
        url,
        source: source.unwrap_or_default(),
    })
}

fn primary_value(aliases: &[Alias], kind: &str, id: Uuid) -> Result<String, StoreError> {
    aliases
        .iter()
        .find(|a| a.is_primary)
        .map(|a| a.value.clone())
        .ok_or_else(|| StoreError::Corrupt(format!("{} {} has no primary alias", kind, id)))
}

/// Order-preserving dedupe
fn dedup_ids(ids: &[Uuid]) -> Vec<Uuid> {
    let mut seen = Vec::with_capacity(ids.len());
    for id in ids {
        if !seen.contains(id) {
            seen.push(*id);
        }
    }
    seen
}

async fn insert_credits(
    tx: &mut Transaction<'_, Sqlite>,
    item: CreditedItem,
    artist_ids: &[Uuid],
) -> Result<(), StoreError> {
    let (table, column) = credit_table(item);
    let query = format!(
        "INSERT INTO {table} (artist_id, {column}, is_primary) VALUES (?, ?, ?)"
    );
    for (index, artist_id) in dedup_ids(artist_ids).iter().enumerate() {
        sqlx::query(&query)
            .bind(artist_id.to_string())
            .bind(item.id().to_string())
            .bind(index == 0)
            .execute(&mut **tx)
            .await?;
    }
    Ok(())
}

async fn insert_primary_alias(
    tx: &mut Transaction<'_, Sqlite>,
    owner: AliasOwner,
    value: &str,
) -> Result<(), StoreError> {
    let (table, column) = alias_table(owner);
    let query = format!(
        "INSERT INTO {table} ({column}, alias, source, is_primary) VALUES (?, ?, ?, 1)"
    );
    sqlx::query(&query)
        .bind(owner.id().to_string())
        .bind(value)
        .bind(AliasSource::Canonical.as_str())
        .execute(&mut **tx)
        .await?;
    Ok(())
}

fn scoped_listen_query(select: &str, scope: ListenScope) -> (String, Option<Uuid>) {
    match scope {
        ListenScope::All => (format!("{select} FROM listens l JOIN tracks t ON t.id = l.track_id"), None),
        ListenScope::Track(id) => (
            format!("{select} FROM listens l JOIN tracks t ON t.id = l.track_id WHERE l.track_id = ?"),
            Some(id),
        ),
        ListenScope::Release(id) => (
            format!("{select} FROM listens l JOIN tracks t ON t.id = l.track_id WHERE t.release_id = ?"),
            Some(id),
        ),
        ListenScope::Artist(id) => (
            format!(
                "{select} FROM listens l JOIN tracks t ON t.id = l.track_id \
                 JOIN artist_tracks at ON at.track_id = l.track_id WHERE at.artist_id = ?"
            ),
            Some(id),
        ),
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn get_artist(&self, lookup: ArtistLookup) -> Result<Option<Artist>, StoreError> {
        let id: Option<String> = match lookup {
            ArtistLookup::Id(id) => return self.artist_by_id(id).await,
            ArtistLookup::MusicBrainzId(mbid) => {
                sqlx::query_scalar("SELECT id FROM artists WHERE musicbrainz_id = ?")
                    .bind(mbid.to_string())
                    .fetch_optional(&self.pool)
                    .await?
            }
            ArtistLookup::Alias(name) => {
                let name = name.trim();
                if name.is_empty() {
                    return Err(StoreError::InsufficientInfo("artist"));
                }
                sqlx::query_scalar(
                    "SELECT artist_id FROM artist_aliases WHERE alias = ? \
                     ORDER BY is_primary DESC, rowid LIMIT 1",
                )
                .bind(name)
                .fetch_optional(&self.pool)
                .await?
            }
        };

        match id {
            Some(id) => self.artist_by_id(parse_uuid(&id)?).await,
            None => Ok(None),
        }
    }

    async fn save_artist(&self, artist: NewArtist) -> Result<Artist, StoreError> {
        let name = artist.name.trim().to_string();
        if name.is_empty() {
            return Err(StoreError::InsufficientInfo("artist"));
        }

        let id = Uuid::new_v4();
        let owner = AliasOwner::Artist(id);
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO artists (id, musicbrainz_id, image_url, image_source) VALUES (?, ?, ?, ?)",
        )
        .bind(id.to_string())
        .bind(artist.musicbrainz_id.map(|m| m.to_string()))
        .bind(artist.image.as_ref().map(|i| i.url.clone()))
        .bind(artist.image.as_ref().map(|i| i.source.clone()))
        .execute(&mut *tx)
        .await?;

        insert_primary_alias(&mut tx, owner, &name).await?;

        let source = artist.alias_source.unwrap_or(AliasSource::Canonical);
        for alias in &artist.aliases {
            let alias = alias.trim();
            if alias.is_empty() || alias == name {
                continue;
            }
            sqlx::query(
                "INSERT OR IGNORE INTO artist_aliases (artist_id, alias, source, is_primary) VALUES (?, ?, ?, 0)",
            )
            .bind(id.to_string())
            .bind(alias)
            .bind(source.as_str())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        info!(artist_id = %id, name = %name, "Created artist");

        self.artist_by_id(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("artist {}", id)))
    }

    async fn update_artist(&self, id: Uuid, update: EntityUpdate) -> Result<(), StoreError> {
        let affected = sqlx::query(
            "UPDATE artists SET \
               musicbrainz_id = COALESCE(?, musicbrainz_id), \
               image_url = COALESCE(?, image_url), \
               image_source = COALESCE(?, image_source) \
             WHERE id = ?",
        )
        .bind(update.musicbrainz_id.map(|m| m.to_string()))
        .bind(update.image.as_ref().map(|i| i.url.clone()))
        .bind(update.image.as_ref().map(|i| i.source.clone()))
        .bind(id.to_string())
        .execute(&self.pool)
        .await?
        .rows_affected();

        if affected == 0 {
            return Err(StoreError::NotFound(format!("artist {}", id)));
        }
        Ok(())
    }

    async fn get_release(&self, lookup: ReleaseLookup) -> Result<Option<Release>, StoreError> {
        let id: Option<String> = match lookup {
            ReleaseLookup::Id(id) => return self.release_by_id(id).await,
            ReleaseLookup::MusicBrainzId(mbid) => {
                sqlx::query_scalar("SELECT id FROM releases WHERE musicbrainz_id = ?")
                    .bind(mbid.to_string())
                    .fetch_optional(&self.pool)
                    .await?
            }
            ReleaseLookup::Titles { artist_id, titles } => {
                let titles: Vec<String> = titles
                    .iter()
                    .map(|t| t.trim().to_string())
                    .filter(|t| !t.is_empty())
                    .collect();
                if titles.is_empty() {
                    return Err(StoreError::InsufficientInfo("release"));
                }

                let mut qb = QueryBuilder::<Sqlite>::new(
                    "SELECT r.id FROM releases r \
                     JOIN release_aliases ra ON ra.release_id = r.id \
                     JOIN artist_releases ar ON ar.release_id = r.id \
                     WHERE ar.artist_id = ",
                );
                qb.push_bind(artist_id.to_string());
                qb.push(" AND ra.alias IN (");
                let mut separated = qb.separated(", ");
                for title in titles {
                    separated.push_bind(title);
                }
                separated.push_unseparated(") ORDER BY ra.is_primary DESC, r.rowid LIMIT 1");

                qb.build_query_scalar::<String>()
                    .fetch_optional(&self.pool)
                    .await?
            }
        };

        match id {
            Some(id) => self.release_by_id(parse_uuid(&id)?).await,
            None => Ok(None),
        }
    }

    async fn save_release(&self, release: NewRelease) -> Result<Release, StoreError> {
        let title = release.title.trim().to_string();
        if title.is_empty() {
            return Err(StoreError::InsufficientInfo("release"));
        }

        let id = Uuid::new_v4();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO releases (id, musicbrainz_id, various_artists, image_url, image_source) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(id.to_string())
        .bind(release.musicbrainz_id.map(|m| m.to_string()))
        .bind(release.various_artists)
        .bind(release.image.as_ref().map(|i| i.url.clone()))
        .bind(release.image.as_ref().map(|i| i.source.clone()))
        .execute(&mut *tx)
        .await?;

        insert_primary_alias(&mut tx, AliasOwner::Release(id), &title).await?;
        insert_credits(&mut tx, CreditedItem::Release(id), &release.artist_ids).await?;

        tx.commit().await?;
        info!(release_id = %id, title = %title, various_artists = release.various_artists, "Created release");

        self.release_by_id(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("release {}", id)))
    }

    async fn update_release(&self, id: Uuid, update: EntityUpdate) -> Result<(), StoreError> {
        let affected = sqlx::query(
            "UPDATE releases SET \
               musicbrainz_id = COALESCE(?, musicbrainz_id), \
               image_url = COALESCE(?, image_url), \
               image_source = COALESCE(?, image_source) \
             WHERE id = ?",
        )
        .bind(update.musicbrainz_id.map(|m| m.to_string()))
        .bind(update.image.as_ref().map(|i| i.url.clone()))
        .bind(update.image.as_ref().map(|i| i.source.clone()))
        .bind(id.to_string())
        .execute(&self.pool)
        .await?
        .rows_affected();

        if affected == 0 {
            return Err(StoreError::NotFound(format!("release {}", id)));
        }
        Ok(())
    }

    async fn get_track(&self, lookup: TrackLookup) -> Result<Option<Track>, StoreError> {
        let id: Option<String> = match lookup {
            TrackLookup::Id(id) => return self.track_by_id(id).await,
            TrackLookup::MusicBrainzId(mbid) => {
                sqlx::query_scalar("SELECT id FROM tracks WHERE musicbrainz_id = ?")
                    .bind(mbid.to_string())
                    .fetch_optional(&self.pool)
                    .await?
            }
            TrackLookup::Title { title, artist_ids } => {
                let title = title.trim().to_string();
                let artist_ids = dedup_ids(&artist_ids);
                if title.is_empty() || artist_ids.is_empty() {
                    return Err(StoreError::InsufficientInfo("track"));
                }

                let mut qb = QueryBuilder::<Sqlite>::new(
                    "SELECT t.id FROM tracks t \
                     JOIN track_aliases ta ON ta.track_id = t.id \
                     WHERE ta.alias = ",
                );
                qb.push_bind(title);
                qb.push(
                    " AND (SELECT COUNT(DISTINCT at.artist_id) FROM artist_tracks at \
                     WHERE at.track_id = t.id AND at.artist_id IN (",
                );
                let wanted = artist_ids.len() as i64;
                let mut separated = qb.separated(", ");
                for artist_id in artist_ids {
                    separated.push_bind(artist_id.to_string());
                }
                separated.push_unseparated(")) = ");
                qb.push_bind(wanted);
                qb.push(" ORDER BY ta.is_primary DESC, t.rowid LIMIT 1");

                qb.build_query_scalar::<String>()
                    .fetch_optional(&self.pool)
                    .await?
            }
        };

        match id {
            Some(id) => self.track_by_id(parse_uuid(&id)?).await,
            None => Ok(None),
        }
    }

    async fn save_track(&self, track: NewTrack) -> Result<Track, StoreError> {
        let title = track.title.trim().to_string();
        if title.is_empty() || track.artist_ids.is_empty() || track.release_id.is_nil() {
            return Err(StoreError::InsufficientInfo("track"));
        }

        let id = Uuid::new_v4();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO tracks (id, musicbrainz_id, release_id, duration) VALUES (?, ?, ?, ?)",
        )
        .bind(id.to_string())
        .bind(track.musicbrainz_id.map(|m| m.to_string()))
        .bind(track.release_id.to_string())
        .bind(i64::from(track.duration))
        .execute(&mut *tx)
        .await?;

        insert_primary_alias(&mut tx, AliasOwner::Track(id), &title).await?;
        insert_credits(&mut tx, CreditedItem::Track(id), &track.artist_ids).await?;

        tx.commit().await?;
        info!(track_id = %id, title = %title, release_id = %track.release_id, "Created track");

        self.track_by_id(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("track {}", id)))
    }

    async fn update_track(&self, id: Uuid, update: EntityUpdate) -> Result<(), StoreError> {
        let affected = sqlx::query(
            "UPDATE tracks SET \
               musicbrainz_id = COALESCE(?, musicbrainz_id), \
               duration = COALESCE(?, duration) \
             WHERE id = ?",
        )
        .bind(update.musicbrainz_id.map(|m| m.to_string()))
        .bind(update.duration.map(i64::from))
        .bind(id.to_string())
        .execute(&self.pool)
        .await?
        .rows_affected();

        if affected == 0 {
            return Err(StoreError::NotFound(format!("track {}", id)));
        }
        Ok(())
    }

    async fn aliases(&self, owner: AliasOwner) -> Result<Vec<Alias>, StoreError> {
        let (table, column) = alias_table(owner);
        let query = format!(
            "SELECT alias, source, is_primary FROM {table} WHERE {column} = ? \
             ORDER BY is_primary DESC, rowid"
        );
        let rows = sqlx::query(&query)
            .bind(owner.id().to_string())
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let source: String = row.get("source");
                let is_primary: i64 = row.get("is_primary");
                Alias {
                    value: row.get("alias"),
                    source: AliasSource::parse(&source),
                    is_primary: is_primary != 0,
                }
            })
            .collect())
    }

    async fn save_aliases(
        &self,
        owner: AliasOwner,
        values: &[String],
        source: AliasSource,
    ) -> Result<(), StoreError> {
        let (table, column) = alias_table(owner);
        let query = format!(
            "INSERT OR IGNORE INTO {table} ({column}, alias, source, is_primary) VALUES (?, ?, ?, 0)"
        );

        let mut tx = self.pool.begin().await?;
        for value in values {
            let value = value.trim();
            if value.is_empty() {
                continue;
            }
            sqlx::query(&query)
                .bind(owner.id().to_string())
                .bind(value)
                .bind(source.as_str())
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn set_primary_alias(&self, owner: AliasOwner, value: &str) -> Result<(), StoreError> {
        let (table, column) = alias_table(owner);
        let mut tx = self.pool.begin().await?;

        let exists: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM {table} WHERE {column} = ? AND alias = ?"
        ))
        .bind(owner.id().to_string())
        .bind(value)
        .fetch_one(&mut *tx)
        .await?;
        if exists == 0 {
            return Err(StoreError::NotFound(format!(
                "alias '{}' of {} {}",
                value,
                owner.kind(),
                owner.id()
            )));
        }

        sqlx::query(&format!(
            "UPDATE {table} SET is_primary = 0 WHERE {column} = ? AND is_primary = 1"
        ))
        .bind(owner.id().to_string())
        .execute(&mut *tx)
        .await?;

        sqlx::query(&format!(
            "UPDATE {table} SET is_primary = 1 WHERE {column} = ? AND alias = ?"
        ))
        .bind(owner.id().to_string())
        .bind(value)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn delete_alias(&self, owner: AliasOwner, value: &str) -> Result<(), StoreError> {
        let (table, column) = alias_table(owner);
        sqlx::query(&format!(
            "DELETE FROM {table} WHERE {column} = ? AND alias = ? AND is_primary = 0"
        ))
        .bind(owner.id().to_string())
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn item_artists(&self, item: CreditedItem) -> Result<Vec<ArtistCredit>, StoreError> {
        let (table, column) = credit_table(item);
        let rows = sqlx::query(&format!(
            "SELECT artist_id, is_primary FROM {table} WHERE {column} = ? \
             ORDER BY is_primary DESC, rowid"
        ))
        .bind(item.id().to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let artist_id: String = row.get("artist_id");
                let is_primary: i64 = row.get("is_primary");
                Ok(ArtistCredit {
                    artist_id: parse_uuid(&artist_id)?,
                    is_primary: is_primary != 0,
                })
            })
            .collect()
    }

    async fn set_primary_artist(
        &self,
        item: CreditedItem,
        artist_id: Uuid,
        value: bool,
    ) -> Result<(), StoreError> {
        let (table, column) = credit_table(item);
        let mut tx = self.pool.begin().await?;

        let exists: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM {table} WHERE {column} = ? AND artist_id = ?"
        ))
        .bind(item.id().to_string())
        .bind(artist_id.to_string())
        .fetch_one(&mut *tx)
        .await?;
        if exists == 0 {
            return Err(StoreError::NotFound(format!(
                "artist {} on {} {}",
                artist_id,
                column.trim_end_matches("_id"),
                item.id()
            )));
        }

        if value {
            sqlx::query(&format!(
                "UPDATE {table} SET is_primary = 0 WHERE {column} = ? AND artist_id != ?"
            ))
            .bind(item.id().to_string())
            .bind(artist_id.to_string())
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(&format!(
            "UPDATE {table} SET is_primary = ? WHERE {column} = ? AND artist_id = ?"
        ))
        .bind(value)
        .bind(item.id().to_string())
        .bind(artist_id.to_string())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn save_listen(&self, listen: &Listen) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO listens (user_id, track_id, listened_at, client) VALUES (?, ?, ?, ?) \
             ON CONFLICT DO NOTHING",
        )
        .bind(listen.user_id)
        .bind(listen.track_id.to_string())
        .bind(listen.listened_at.timestamp())
        .bind(&listen.client)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_listen(
        &self,
        track_id: Uuid,
        listened_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM listens WHERE track_id = ? AND listened_at = ?")
            .bind(track_id.to_string())
            .bind(listened_at.timestamp())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn listen_count(&self, scope: ListenScope) -> Result<i64, StoreError> {
        let (query, id) = scoped_listen_query("SELECT COUNT(*)", scope);
        let mut q = sqlx::query_scalar::<_, i64>(&query);
        if let Some(id) = id {
            q = q.bind(id.to_string());
        }
        Ok(q.fetch_one(&self.pool).await?)
    }

    async fn time_listened(&self, scope: ListenScope) -> Result<i64, StoreError> {
        let (query, id) = scoped_listen_query("SELECT COALESCE(SUM(t.duration), 0)", scope);
        let mut q = sqlx::query_scalar::<_, i64>(&query);
        if let Some(id) = id {
            q = q.bind(id.to_string());
        }
        Ok(q.fetch_one(&self.pool).await?)
    }

    async fn merge_artists(
        &self,
        from: Uuid,
        to: Uuid,
        replace_image: bool,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        Self::require_pair(&mut tx, "artists", from, to).await?;

        Self::repoint_artist_credits(&mut tx, "artist_tracks", "track_id", from, to).await?;
        Self::repoint_artist_credits(&mut tx, "artist_releases", "release_id", from, to).await?;
        Self::carry_aliases(&mut tx, AliasOwner::Artist(from), to).await?;
        if replace_image {
            Self::copy_image(&mut tx, "artists", from, to).await?;
        }

        // `from` has no associations left
        sqlx::query("DELETE FROM artists WHERE id = ?")
            .bind(from.to_string())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn merge_releases(
        &self,
        from: Uuid,
        to: Uuid,
        replace_image: bool,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        Self::require_pair(&mut tx, "releases", from, to).await?;

        sqlx::query("UPDATE tracks SET release_id = ? WHERE release_id = ?")
            .bind(to.to_string())
            .bind(from.to_string())
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            "DELETE FROM artist_releases WHERE release_id = ?1 \
               AND artist_id IN (SELECT artist_id FROM artist_releases WHERE release_id = ?2)",
        )
        .bind(from.to_string())
        .bind(to.to_string())
        .execute(&mut *tx)
        .await?;

        // `to` keeps its own primary artist if it has one
        sqlx::query(
            "UPDATE artist_releases SET is_primary = 0 WHERE release_id = ?1 \
               AND EXISTS (SELECT 1 FROM artist_releases WHERE release_id = ?2 AND is_primary = 1)",
        )
        .bind(from.to_string())
        .bind(to.to_string())
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE artist_releases SET release_id = ? WHERE release_id = ?")
            .bind(to.to_string())
            .bind(from.to_string())
            .execute(&mut *tx)
            .await?;

        Self::carry_aliases(&mut tx, AliasOwner::Release(from), to).await?;
        if replace_image {
            Self::copy_image(&mut tx, "releases", from, to).await?;
        }

        sqlx::query("DELETE FROM releases WHERE id = ?")
            .bind(from.to_string())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn merge_tracks(&self, from: Uuid, to: Uuid) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        Self::require_pair(&mut tx, "tracks", from, to).await?;

        let old_release: String = sqlx::query_scalar("SELECT release_id FROM tracks WHERE id = ?")
            .bind(from.to_string())
            .fetch_one(&mut *tx)
            .await?;
        let old_artists: Vec<String> =
            sqlx::query_scalar("SELECT artist_id FROM artist_tracks WHERE track_id = ?")
                .bind(from.to_string())
                .fetch_all(&mut *tx)
                .await?;

        // Listens already present on `to` at the same instant stay behind
        // and disappear with `from`
        sqlx::query("UPDATE OR IGNORE listens SET track_id = ? WHERE track_id = ?")
            .bind(to.to_string())
            .bind(from.to_string())
            .execute(&mut *tx)
            .await?;

        Self::carry_aliases(&mut tx, AliasOwner::Track(from), to).await?;

        sqlx::query("DELETE FROM tracks WHERE id = ?")
            .bind(from.to_string())
            .execute(&mut *tx)
            .await?;

        // Orphans left behind by the removed track
        sqlx::query(
            "DELETE FROM releases WHERE id = ?1 \
               AND NOT EXISTS (SELECT 1 FROM tracks WHERE release_id = ?1)",
        )
        .bind(&old_release)
        .execute(&mut *tx)
        .await?;

        for artist_id in &old_artists {
            sqlx::query(
                "DELETE FROM artists WHERE id = ?1 \
                   AND NOT EXISTS (SELECT 1 FROM artist_tracks WHERE artist_id = ?1) \
                   AND NOT EXISTS (SELECT 1 FROM artist_releases WHERE artist_id = ?1)",
            )
            .bind(artist_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> SqliteStore {
        SqliteStore::in_memory().await.expect("in-memory store")
    }

    async fn artist(store: &SqliteStore, name: &str) -> Artist {
        store
            .save_artist(NewArtist {
                name: name.to_string(),
                ..Default::default()
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_save_and_load_artist_with_aliases() {
        let store = store().await;
        let mbid = Uuid::new_v4();

        let saved = store
            .save_artist(NewArtist {
                name: "Ado".to_string(),
                musicbrainz_id: Some(mbid),
                aliases: vec!["Ado".to_string(), "アド".to_string(), "  ".to_string()],
                alias_source: Some(AliasSource::MusicBrainz),
                image: None,
            })
            .await
            .unwrap();

        assert_eq!(saved.name, "Ado");
        assert_eq!(saved.aliases.len(), 2);
        assert!(saved.aliases[0].is_primary);
        assert_eq!(saved.aliases[0].source, AliasSource::Canonical);
        assert_eq!(saved.aliases[1].source, AliasSource::MusicBrainz);

        let by_mbid = store
            .get_artist(ArtistLookup::MusicBrainzId(mbid))
            .await
            .unwrap()
            .expect("found by mbid");
        assert_eq!(by_mbid.id, saved.id);

        let by_alias = store
            .get_artist(ArtistLookup::Alias("アド".to_string()))
            .await
            .unwrap()
            .expect("found by alias");
        assert_eq!(by_alias.id, saved.id);
    }

    #[tokio::test]
    async fn test_blank_alias_lookup_is_insufficient() {
        let store = store().await;
        let err = store
            .get_artist(ArtistLookup::Alias("   ".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InsufficientInfo("artist")));

        let err = store
            .get_release(ReleaseLookup::Titles {
                artist_id: Uuid::new_v4(),
                titles: vec![String::new()],
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InsufficientInfo("release")));
    }

    #[tokio::test]
    async fn test_release_lookup_is_scoped_to_artist() {
        let store = store().await;
        let a = artist(&store, "Artist A").await;
        let b = artist(&store, "Artist B").await;

        let release = store
            .save_release(NewRelease {
                title: "Greatest Hits".to_string(),
                artist_ids: vec![a.id],
                ..Default::default()
            })
            .await
            .unwrap();

        let found = store
            .get_release(ReleaseLookup::Titles {
                artist_id: a.id,
                titles: vec!["Unknown".to_string(), "Greatest Hits".to_string()],
            })
            .await
            .unwrap();
        assert_eq!(found.map(|r| r.id), Some(release.id));

        let other = store
            .get_release(ReleaseLookup::Titles {
                artist_id: b.id,
                titles: vec!["Greatest Hits".to_string()],
            })
            .await
            .unwrap();
        assert!(other.is_none());
    }

    #[tokio::test]
    async fn test_track_lookup_requires_every_artist() {
        let store = store().await;
        let a = artist(&store, "A").await;
        let b = artist(&store, "B").await;
        let release = store
            .save_release(NewRelease {
                title: "Split".to_string(),
                artist_ids: vec![a.id],
                ..Default::default()
            })
            .await
            .unwrap();

        let track = store
            .save_track(NewTrack {
                title: "Duet".to_string(),
                release_id: release.id,
                artist_ids: vec![a.id],
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(track.artists, vec![ArtistCredit { artist_id: a.id, is_primary: true }]);

        let solo = store
            .get_track(TrackLookup::Title {
                title: "Duet".to_string(),
                artist_ids: vec![a.id],
            })
            .await
            .unwrap();
        assert_eq!(solo.map(|t| t.id), Some(track.id));

        let both = store
            .get_track(TrackLookup::Title {
                title: "Duet".to_string(),
                artist_ids: vec![a.id, b.id],
            })
            .await
            .unwrap();
        assert!(both.is_none());
    }

    #[tokio::test]
    async fn test_update_missing_entity_is_not_found() {
        let store = store().await;
        let err = store
            .update_track(
                Uuid::new_v4(),
                EntityUpdate {
                    duration: Some(10),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_listen_aggregates_by_scope() {
        let store = store().await;
        let a = artist(&store, "A").await;
        let release = store
            .save_release(NewRelease {
                title: "R".to_string(),
                artist_ids: vec![a.id],
                ..Default::default()
            })
            .await
            .unwrap();
        let track = store
            .save_track(NewTrack {
                title: "T".to_string(),
                release_id: release.id,
                artist_ids: vec![a.id],
                duration: 200,
                ..Default::default()
            })
            .await
            .unwrap();

        for offset in 0..3 {
            store
                .save_listen(&Listen {
                    user_id: 1,
                    track_id: track.id,
                    listened_at: DateTime::from_timestamp(1_700_000_000 + offset * 300, 0).unwrap(),
                    client: None,
                })
                .await
                .unwrap();
        }

        assert_eq!(store.listen_count(ListenScope::All).await.unwrap(), 3);
        assert_eq!(store.listen_count(ListenScope::Artist(a.id)).await.unwrap(), 3);
        assert_eq!(store.listen_count(ListenScope::Release(release.id)).await.unwrap(), 3);
        assert_eq!(store.time_listened(ListenScope::Track(track.id)).await.unwrap(), 600);

        store
            .delete_listen(track.id, DateTime::from_timestamp(1_700_000_000, 0).unwrap())
            .await
            .unwrap();
        assert_eq!(store.listen_count(ListenScope::Track(track.id)).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_merge_releases_moves_tracks_and_keeps_one_primary() {
        let store = store().await;
        let a = artist(&store, "A").await;
        let b = artist(&store, "B").await;
        let from = store
            .save_release(NewRelease {
                title: "Album (Deluxe)".to_string(),
                artist_ids: vec![b.id],
                image: Some(ImageRef {
                    url: "https://img/deluxe.jpg".to_string(),
                    source: "Test".to_string(),
                }),
                ..Default::default()
            })
            .await
            .unwrap();
        let to = store
            .save_release(NewRelease {
                title: "Album".to_string(),
                artist_ids: vec![a.id],
                ..Default::default()
            })
            .await
            .unwrap();
        let track = store
            .save_track(NewTrack {
                title: "Bonus".to_string(),
                release_id: from.id,
                artist_ids: vec![b.id],
                ..Default::default()
            })
            .await
            .unwrap();

        store.merge_releases(from.id, to.id, true).await.unwrap();

        assert!(store.get_release(ReleaseLookup::Id(from.id)).await.unwrap().is_none());
        let merged = store
            .get_release(ReleaseLookup::Id(to.id))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(merged.title, "Album");
        assert!(merged.aliases.iter().any(|a| a.value == "Album (Deluxe)" && !a.is_primary));
        assert_eq!(merged.image.map(|i| i.url), Some("https://img/deluxe.jpg".to_string()));
        assert_eq!(merged.artists.iter().filter(|c| c.is_primary).count(), 1);
        assert_eq!(merged.artists.len(), 2);

        let moved = store.get_track(TrackLookup::Id(track.id)).await.unwrap().unwrap();
        assert_eq!(moved.release_id, to.id);
    }

    #[tokio::test]
    async fn test_merge_tracks_moves_listens_and_drops_orphans() {
        let store = store().await;
        let a = artist(&store, "A").await;
        let stray = artist(&store, "Typo Artist").await;
        let keep = store
            .save_release(NewRelease {
                title: "Keep".to_string(),
                artist_ids: vec![a.id],
                ..Default::default()
            })
            .await
            .unwrap();
        let lonely = store
            .save_release(NewRelease {
                title: "Lonely".to_string(),
                artist_ids: vec![stray.id],
                ..Default::default()
            })
            .await
            .unwrap();
        let to = store
            .save_track(NewTrack {
                title: "Song".to_string(),
                release_id: keep.id,
                artist_ids: vec![a.id],
                ..Default::default()
            })
            .await
            .unwrap();
        let from = store
            .save_track(NewTrack {
                title: "Song (typo)".to_string(),
                release_id: lonely.id,
                artist_ids: vec![stray.id],
                ..Default::default()
            })
            .await
            .unwrap();
        store
            .save_listen(&Listen {
                user_id: 1,
                track_id: from.id,
                listened_at: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
                client: Some("test".to_string()),
            })
            .await
            .unwrap();

        store.merge_tracks(from.id, to.id).await.unwrap();

        assert_eq!(store.listen_count(ListenScope::Track(to.id)).await.unwrap(), 1);
        assert!(store.get_track(TrackLookup::Id(from.id)).await.unwrap().is_none());
        assert!(store.get_release(ReleaseLookup::Id(lonely.id)).await.unwrap().is_none());
        assert!(store.get_artist(ArtistLookup::Id(stray.id)).await.unwrap().is_none());
        assert!(store.get_artist(ArtistLookup::Id(a.id)).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_merge_with_missing_side_changes_nothing() {
        let store = store().await;
        let a = artist(&store, "A").await;

        let err = store.merge_artists(a.id, Uuid::new_v4(), false).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
        assert!(store.get_artist(ArtistLookup::Id(a.id)).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_file_store_survives_reopen() {
        let dir = tempfile::TempDir::new().unwrap();
        let db_path = dir.path().join("nested").join("catalog.db");

        let saved = {
            let store = SqliteStore::open(&db_path, 2).await.unwrap();
            let saved = artist(&store, "Mitski").await;
            store.pool().close().await;
            saved
        };

        let reopened = SqliteStore::open(&db_path, 2).await.unwrap();
        let loaded = reopened
            .get_artist(ArtistLookup::Alias("Mitski".to_string()))
            .await
            .unwrap()
            .expect("persisted artist");
        assert_eq!(loaded.id, saved.id);
        assert_eq!(loaded.aliases.len(), 1);
    }
}

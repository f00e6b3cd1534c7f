//! Catalog schema
//!
//! Every statement is idempotent (`IF NOT EXISTS`), so initialization runs on
//! every startup. Uniqueness the resolvers depend on is enforced here:
//! MusicBrainz IDs, alias values per owner, one primary alias per owner,
//! one primary artist per release/track, and artist association pairs.

use sqlx::SqlitePool;
use tracing::info;

const STATEMENTS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS artists (
        id TEXT PRIMARY KEY,
        musicbrainz_id TEXT UNIQUE,
        image_url TEXT,
        image_source TEXT,
        created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS releases (
        id TEXT PRIMARY KEY,
        musicbrainz_id TEXT UNIQUE,
        various_artists INTEGER NOT NULL DEFAULT 0,
        image_url TEXT,
        image_source TEXT,
        created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS tracks (
        id TEXT PRIMARY KEY,
        musicbrainz_id TEXT UNIQUE,
        release_id TEXT NOT NULL REFERENCES releases(id) ON DELETE CASCADE,
        duration INTEGER NOT NULL DEFAULT 0 CHECK (duration >= 0),
        created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS artist_aliases (
        artist_id TEXT NOT NULL REFERENCES artists(id) ON DELETE CASCADE,
        alias TEXT NOT NULL,
        source TEXT NOT NULL,
        is_primary INTEGER NOT NULL DEFAULT 0,
        PRIMARY KEY (artist_id, alias)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS release_aliases (
        release_id TEXT NOT NULL REFERENCES releases(id) ON DELETE CASCADE,
        alias TEXT NOT NULL,
        source TEXT NOT NULL,
        is_primary INTEGER NOT NULL DEFAULT 0,
        PRIMARY KEY (release_id, alias)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS track_aliases (
        track_id TEXT NOT NULL REFERENCES tracks(id) ON DELETE CASCADE,
        alias TEXT NOT NULL,
        source TEXT NOT NULL,
        is_primary INTEGER NOT NULL DEFAULT 0,
        PRIMARY KEY (track_id, alias)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS artist_releases (
        artist_id TEXT NOT NULL REFERENCES artists(id) ON DELETE CASCADE,
        release_id TEXT NOT NULL REFERENCES releases(id) ON DELETE CASCADE,
        is_primary INTEGER NOT NULL DEFAULT 0,
        PRIMARY KEY (artist_id, release_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS artist_tracks (
        artist_id TEXT NOT NULL REFERENCES artists(id) ON DELETE CASCADE,
        track_id TEXT NOT NULL REFERENCES tracks(id) ON DELETE CASCADE,
        is_primary INTEGER NOT NULL DEFAULT 0,
        PRIMARY KEY (artist_id, track_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS listens (
        user_id INTEGER NOT NULL,
        track_id TEXT NOT NULL REFERENCES tracks(id) ON DELETE CASCADE,
        listened_at INTEGER NOT NULL,
        client TEXT,
        PRIMARY KEY (track_id, listened_at, user_id)
    )
    "#,
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_artist_aliases_primary ON artist_aliases(artist_id) WHERE is_primary = 1",
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_release_aliases_primary ON release_aliases(release_id) WHERE is_primary = 1",
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_track_aliases_primary ON track_aliases(track_id) WHERE is_primary = 1",
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_artist_releases_primary ON artist_releases(release_id) WHERE is_primary = 1",
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_artist_tracks_primary ON artist_tracks(track_id) WHERE is_primary = 1",
    "CREATE INDEX IF NOT EXISTS idx_artist_aliases_alias ON artist_aliases(alias)",
    "CREATE INDEX IF NOT EXISTS idx_release_aliases_alias ON release_aliases(alias)",
    "CREATE INDEX IF NOT EXISTS idx_track_aliases_alias ON track_aliases(alias)",
    "CREATE INDEX IF NOT EXISTS idx_tracks_release ON tracks(release_id)",
    "CREATE INDEX IF NOT EXISTS idx_artist_releases_release ON artist_releases(release_id)",
    "CREATE INDEX IF NOT EXISTS idx_artist_tracks_track ON artist_tracks(track_id)",
    "CREATE INDEX IF NOT EXISTS idx_listens_user_time ON listens(user_id, listened_at)",
];

/// Create all catalog tables and indexes
pub async fn initialize_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    for statement in STATEMENTS {
        sqlx::query(statement).execute(pool).await?;
    }

    info!("Catalog schema initialized ({} statements)", STATEMENTS.len());
    Ok(())
}

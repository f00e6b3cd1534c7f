//! Catalog entity records
//!
//! Artists, releases and tracks are identified by an opaque UUID. Their
//! display name is always the primary alias; the store never keeps a second
//! copy of it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Where an alias came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AliasSource {
    /// The name the entity was created with
    Canonical,
    /// Discovered through the MusicBrainz authority
    MusicBrainz,
    /// Added by a user edit
    Manual,
    /// Supplied by a bulk import
    Import,
}

impl AliasSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            AliasSource::Canonical => "Canonical",
            AliasSource::MusicBrainz => "MusicBrainz",
            AliasSource::Manual => "Manual",
            AliasSource::Import => "Import",
        }
    }

    /// Parse a stored source tag; unknown tags are treated as manual edits
    pub fn parse(value: &str) -> Self {
        match value {
            "Canonical" => AliasSource::Canonical,
            "MusicBrainz" => AliasSource::MusicBrainz,
            "Import" => AliasSource::Import,
            _ => AliasSource::Manual,
        }
    }
}

impl fmt::Display for AliasSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Alternate name of an artist, release or track
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alias {
    pub value: String,
    pub source: AliasSource,
    pub is_primary: bool,
}

/// Entity that owns an alias list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AliasOwner {
    Artist(Uuid),
    Release(Uuid),
    Track(Uuid),
}

impl AliasOwner {
    pub fn id(&self) -> Uuid {
        match self {
            AliasOwner::Artist(id) | AliasOwner::Release(id) | AliasOwner::Track(id) => *id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            AliasOwner::Artist(_) => "artist",
            AliasOwner::Release(_) => "release",
            AliasOwner::Track(_) => "track",
        }
    }
}

/// Item carrying a per-artist primary flag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CreditedItem {
    Release(Uuid),
    Track(Uuid),
}

impl CreditedItem {
    pub fn id(&self) -> Uuid {
        match self {
            CreditedItem::Release(id) | CreditedItem::Track(id) => *id,
        }
    }
}

/// Image reference (the URL is stored, never downloaded here)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    pub url: String,
    /// Provider tag, e.g. "CoverArtArchive" or "Deezer"
    pub source: String,
}

/// Artist association row of a release or track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtistCredit {
    pub artist_id: Uuid,
    pub is_primary: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artist {
    pub id: Uuid,
    pub musicbrainz_id: Option<Uuid>,
    /// Primary alias
    pub name: String,
    pub aliases: Vec<Alias>,
    pub image: Option<ImageRef>,
}

impl Artist {
    /// Case-insensitive match against any alias
    pub fn answers_to(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
            || self
                .aliases
                .iter()
                .any(|a| a.value.to_lowercase() == name.to_lowercase())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Release {
    pub id: Uuid,
    pub musicbrainz_id: Option<Uuid>,
    pub title: String,
    pub aliases: Vec<Alias>,
    pub various_artists: bool,
    pub image: Option<ImageRef>,
    pub artists: Vec<ArtistCredit>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub id: Uuid,
    pub musicbrainz_id: Option<Uuid>,
    pub title: String,
    pub aliases: Vec<Alias>,
    pub release_id: Uuid,
    /// Seconds; 0 means unknown
    pub duration: u32,
    pub artists: Vec<ArtistCredit>,
}

/// One recorded playback
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listen {
    pub user_id: i64,
    pub track_id: Uuid,
    pub listened_at: DateTime<Utc>,
    pub client: Option<String>,
}

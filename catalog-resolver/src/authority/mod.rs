//! External metadata authority
//!
//! The authority is optional and unreliable. Every failure is reported as an
//! [`AuthorityError`] and the resolvers recover from all of them.

pub mod musicbrainz;

pub use musicbrainz::MusicBrainzClient;

use crate::queue::QueueError;
use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthorityError {
    /// Network failure, timeout or queue shutdown
    #[error("Authority unreachable: {0}")]
    Unreachable(String),

    #[error("Authority has no record for {0}")]
    NotFound(String),

    #[error("Authority rate limited the request")]
    RateLimited,

    /// Unexpected status or undecodable body
    #[error("Bad authority response: {0}")]
    BadResponse(String),

    #[error("Authority lookups are disabled")]
    Disabled,
}

impl From<QueueError> for AuthorityError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::NotFound(url) => AuthorityError::NotFound(url),
            QueueError::RateLimited(_) => AuthorityError::RateLimited,
            QueueError::Status { status, url } => {
                AuthorityError::BadResponse(format!("HTTP {} from {}", status, url))
            }
            QueueError::Shutdown => AuthorityError::Unreachable(err.to_string()),
            QueueError::Transport(msg) => AuthorityError::Unreachable(msg),
        }
    }
}

/// One entry of an artist credit as the authority reports it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreditEntry {
    pub name: String,
    pub artist_id: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorityRelease {
    pub id: Uuid,
    pub title: String,
    pub release_group_id: Option<Uuid>,
    pub artist_credit: Vec<CreditEntry>,
}

impl AuthorityRelease {
    /// Compilation credited to the literal "Various Artists" entry
    pub fn is_various_artists(&self) -> bool {
        self.artist_credit.iter().any(|c| c.name == "Various Artists")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorityReleaseGroup {
    pub id: Uuid,
    pub title: String,
    /// Titles of the group's member releases, in authority order
    pub release_titles: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorityTrack {
    pub id: Uuid,
    pub title: String,
    /// Seconds, when the authority knows the length
    pub duration: Option<u32>,
}

/// Metadata lookups by MusicBrainz ID
#[async_trait]
pub trait MetadataAuthority: Send + Sync {
    /// Canonical name first, then the other primary aliases
    async fn artist_primary_aliases(&self, id: Uuid) -> Result<Vec<String>, AuthorityError>;

    async fn release(&self, id: Uuid) -> Result<AuthorityRelease, AuthorityError>;

    async fn release_group(&self, id: Uuid) -> Result<AuthorityReleaseGroup, AuthorityError>;

    /// Group title followed by distinct member release titles
    async fn release_titles(&self, release_group_id: Uuid) -> Result<Vec<String>, AuthorityError> {
        let group = self.release_group(release_group_id).await?;
        let mut titles = vec![group.title];
        for title in group.release_titles {
            if !titles.contains(&title) {
                titles.push(title);
            }
        }
        Ok(titles)
    }

    async fn track(&self, id: Uuid) -> Result<AuthorityTrack, AuthorityError>;
}

/// Authority used when lookups are turned off in configuration
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledAuthority;

#[async_trait]
impl MetadataAuthority for DisabledAuthority {
    async fn artist_primary_aliases(&self, _id: Uuid) -> Result<Vec<String>, AuthorityError> {
        Err(AuthorityError::Disabled)
    }

    async fn release(&self, _id: Uuid) -> Result<AuthorityRelease, AuthorityError> {
        Err(AuthorityError::Disabled)
    }

    async fn release_group(&self, _id: Uuid) -> Result<AuthorityReleaseGroup, AuthorityError> {
        Err(AuthorityError::Disabled)
    }

    async fn track(&self, _id: Uuid) -> Result<AuthorityTrack, AuthorityError> {
        Err(AuthorityError::Disabled)
    }
}

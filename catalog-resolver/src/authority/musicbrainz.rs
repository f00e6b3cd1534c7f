// MusicBrainz web service client
//
// API Documentation: https://musicbrainz.org/doc/MusicBrainz_API
//
// All requests go through the client's own RequestQueue, which enforces the
// MusicBrainz rate policy (1 req/sec by default).

use super::{
    AuthorityError, AuthorityRelease, AuthorityReleaseGroup, AuthorityTrack, CreditEntry,
    MetadataAuthority,
};
use crate::queue::{QueueConfig, QueueError, RequestQueue};
use async_trait::async_trait;
use catalog_common::config::MusicBrainzConfig;
use reqwest::header::ACCEPT;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
struct MBArtist {
    name: String,
    #[serde(default)]
    aliases: Vec<MBAlias>,
}

#[derive(Debug, Deserialize)]
struct MBAlias {
    name: String,
    #[serde(default)]
    primary: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct MBArtistCredit {
    name: String,
    artist: Option<MBCreditedArtist>,
}

#[derive(Debug, Deserialize)]
struct MBCreditedArtist {
    id: String,
}

#[derive(Debug, Deserialize)]
struct MBReleaseGroupRef {
    id: String,
}

#[derive(Debug, Deserialize)]
struct MBRelease {
    id: String,
    title: String,
    #[serde(rename = "artist-credit", default)]
    artist_credit: Vec<MBArtistCredit>,
    #[serde(rename = "release-group")]
    release_group: Option<MBReleaseGroupRef>,
}

#[derive(Debug, Deserialize)]
struct MBReleaseTitle {
    title: String,
}

#[derive(Debug, Deserialize)]
struct MBReleaseGroup {
    id: String,
    title: String,
    #[serde(default)]
    releases: Vec<MBReleaseTitle>,
}

#[derive(Debug, Deserialize)]
struct MBRecording {
    id: String,
    title: String,
    /// Milliseconds
    length: Option<u64>,
}

fn parse_mbid(value: &str) -> Result<Uuid, AuthorityError> {
    Uuid::parse_str(value)
        .map_err(|e| AuthorityError::BadResponse(format!("invalid MBID '{}': {}", value, e)))
}

/// Canonical name, then primary aliases, without repeats
fn primary_aliases(artist: MBArtist) -> Vec<String> {
    let mut names = vec![artist.name];
    for alias in artist.aliases {
        if alias.primary == Some(true) && !names.contains(&alias.name) {
            names.push(alias.name);
        }
    }
    names
}

fn convert_release(release: MBRelease) -> Result<AuthorityRelease, AuthorityError> {
    let artist_credit = release
        .artist_credit
        .into_iter()
        .map(|credit| CreditEntry {
            name: credit.name,
            artist_id: credit.artist.and_then(|a| Uuid::parse_str(&a.id).ok()),
        })
        .collect();

    Ok(AuthorityRelease {
        id: parse_mbid(&release.id)?,
        title: release.title,
        release_group_id: release
            .release_group
            .map(|group| parse_mbid(&group.id))
            .transpose()?,
        artist_credit,
    })
}

fn convert_release_group(group: MBReleaseGroup) -> Result<AuthorityReleaseGroup, AuthorityError> {
    Ok(AuthorityReleaseGroup {
        id: parse_mbid(&group.id)?,
        title: group.title,
        release_titles: group.releases.into_iter().map(|r| r.title).collect(),
    })
}

fn convert_recording(recording: MBRecording) -> Result<AuthorityTrack, AuthorityError> {
    Ok(AuthorityTrack {
        id: parse_mbid(&recording.id)?,
        title: recording.title,
        duration: recording
            .length
            .and_then(|ms| u32::try_from(ms / 1000).ok())
            .filter(|secs| *secs > 0),
    })
}

/// MusicBrainz metadata authority
pub struct MusicBrainzClient {
    queue: Arc<RequestQueue>,
    base_url: String,
}

impl MusicBrainzClient {
    pub fn new(queue: Arc<RequestQueue>, base_url: impl Into<String>) -> Self {
        Self {
            queue,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Build a client with a dedicated queue from the `[musicbrainz]` section
    pub fn from_config(config: &MusicBrainzConfig) -> Result<Self, QueueError> {
        let queue = RequestQueue::new(
            "musicbrainz",
            &QueueConfig {
                rate_per_second: config.rate_per_second,
                burst: config.burst,
                capacity: config.queue_capacity,
                timeout: Duration::from_secs(config.timeout_secs),
                user_agent: Some(config.user_agent.clone()),
            },
        )?;
        Ok(Self::new(Arc::new(queue), config.base_url.clone()))
    }

    /// Queue shared by every request of this client
    pub fn queue(&self) -> &Arc<RequestQueue> {
        &self.queue
    }

    fn url(&self, entity: &str, id: Uuid, inc: Option<&str>) -> String {
        match inc {
            Some(inc) => format!("{}/{}/{}?inc={}&fmt=json", self.base_url, entity, id, inc),
            None => format!("{}/{}/{}?fmt=json", self.base_url, entity, id),
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, url: String) -> Result<T, AuthorityError> {
        tracing::debug!("Querying MusicBrainz API: {}", url);

        let body = self
            .queue
            .fetch(move |client| client.get(&url).header(ACCEPT, "application/json"))
            .await?;

        serde_json::from_str(&body).map_err(|e| {
            AuthorityError::BadResponse(format!("Failed to parse MusicBrainz response: {}", e))
        })
    }
}

#[async_trait]
impl MetadataAuthority for MusicBrainzClient {
    async fn artist_primary_aliases(&self, id: Uuid) -> Result<Vec<String>, AuthorityError> {
        let artist: MBArtist = self.get_json(self.url("artist", id, Some("aliases"))).await?;
        Ok(primary_aliases(artist))
    }

    async fn release(&self, id: Uuid) -> Result<AuthorityRelease, AuthorityError> {
        let release: MBRelease = self
            .get_json(self.url("release", id, Some("artist-credits+release-groups")))
            .await?;
        convert_release(release)
    }

    async fn release_group(&self, id: Uuid) -> Result<AuthorityReleaseGroup, AuthorityError> {
        let group: MBReleaseGroup = self
            .get_json(self.url("release-group", id, Some("releases")))
            .await?;
        convert_release_group(group)
    }

    async fn track(&self, id: Uuid) -> Result<AuthorityTrack, AuthorityError> {
        let recording: MBRecording = self.get_json(self.url("recording", id, None)).await?;
        convert_recording(recording)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primary_aliases_put_canonical_name_first() {
        let artist: MBArtist = serde_json::from_str(
            r#"{
                "id": "f4abc0b5-3f7a-4eff-8f78-ac078dbce533",
                "name": "Ado",
                "aliases": [
                    {"name": "アド", "primary": true, "locale": "ja"},
                    {"name": "ado", "primary": null},
                    {"name": "Ado", "primary": true, "locale": "en"}
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(primary_aliases(artist), vec!["Ado", "アド"]);
    }

    #[test]
    fn test_release_with_various_artists_credit() {
        let release: MBRelease = serde_json::from_str(
            r#"{
                "id": "8a3a4d7e-3c4c-4e67-9a1f-0c4a1e3b2d10",
                "title": "Now That's What I Call Music! 42",
                "artist-credit": [
                    {"name": "Various Artists", "joinphrase": "",
                     "artist": {"id": "89ad4ac3-39f7-470e-963a-56509c546377"}}
                ],
                "release-group": {"id": "0bbd6b4a-9e1f-4a43-bc25-6a8f0e1fbb0e"}
            }"#,
        )
        .unwrap();

        let release = convert_release(release).unwrap();
        assert!(release.is_various_artists());
        assert!(release.release_group_id.is_some());
        assert_eq!(release.artist_credit.len(), 1);
    }

    #[test]
    fn test_recording_length_is_converted_to_seconds() {
        let recording: MBRecording = serde_json::from_str(
            r#"{"id": "550e8400-e29b-41d4-a716-446655440000", "title": "Call Me Maybe", "length": 193400}"#,
        )
        .unwrap();
        let track = convert_recording(recording).unwrap();
        assert_eq!(track.duration, Some(193));

        let unknown: MBRecording = serde_json::from_str(
            r#"{"id": "550e8400-e29b-41d4-a716-446655440000", "title": "Call Me Maybe", "length": null}"#,
        )
        .unwrap();
        assert_eq!(convert_recording(unknown).unwrap().duration, None);
    }

    #[test]
    fn test_bad_mbid_is_bad_response() {
        let group = MBReleaseGroup {
            id: "not-a-uuid".to_string(),
            title: "x".to_string(),
            releases: Vec::new(),
        };
        assert!(matches!(
            convert_release_group(group),
            Err(AuthorityError::BadResponse(_))
        ));
    }

    #[tokio::test]
    async fn test_url_construction() {
        let queue = Arc::new(RequestQueue::new("test", &QueueConfig::default()).unwrap());
        let client = MusicBrainzClient::new(Arc::clone(&queue), "https://musicbrainz.org/ws/2/");
        let mbid = Uuid::parse_str("550e8400-e29b-41d4-a716-446655440000").unwrap();

        assert_eq!(
            client.url("artist", mbid, Some("aliases")),
            "https://musicbrainz.org/ws/2/artist/550e8400-e29b-41d4-a716-446655440000?inc=aliases&fmt=json"
        );
        assert_eq!(
            client.url("recording", mbid, None),
            "https://musicbrainz.org/ws/2/recording/550e8400-e29b-41d4-a716-446655440000?fmt=json"
        );
        queue.shutdown().await;
    }
}

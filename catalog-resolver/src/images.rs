//! Best-effort image lookup
//!
//! Providers only return references (URL plus source tag). Every failure is
//! logged at `warn` and turned into `None`; entity creation never waits on a
//! working image provider.

use crate::models::ImageRef;
use crate::queue::{QueueConfig, QueueError, RequestQueue};
use async_trait::async_trait;
use catalog_common::config::ImagesConfig;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
enum ImageError {
    #[error(transparent)]
    Request(#[from] QueueError),

    #[error("Undecodable response: {0}")]
    Decode(#[from] serde_json::Error),
}

#[async_trait]
pub trait ImageSource: Send + Sync {
    async fn artist_image(&self, name: &str) -> Option<ImageRef>;

    async fn release_image(
        &self,
        musicbrainz_id: Option<Uuid>,
        artist: &str,
        title: &str,
    ) -> Option<ImageRef>;
}

/// Image source that never finds anything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoImages;

#[async_trait]
impl ImageSource for NoImages {
    async fn artist_image(&self, _name: &str) -> Option<ImageRef> {
        None
    }

    async fn release_image(
        &self,
        _musicbrainz_id: Option<Uuid>,
        _artist: &str,
        _title: &str,
    ) -> Option<ImageRef> {
        None
    }
}

#[derive(Debug, Deserialize)]
struct CaaListing {
    #[serde(default)]
    images: Vec<CaaImage>,
}

#[derive(Debug, Deserialize)]
struct CaaImage {
    #[serde(default)]
    front: bool,
    image: String,
}

/// Cover Art Archive front covers, by release MBID
pub struct CoverArtArchive {
    queue: Arc<RequestQueue>,
    base_url: String,
}

impl CoverArtArchive {
    pub const SOURCE: &'static str = "CoverArtArchive";

    pub fn new(queue: Arc<RequestQueue>) -> Self {
        Self::with_base_url(queue, "https://coverartarchive.org")
    }

    pub fn with_base_url(queue: Arc<RequestQueue>, base_url: impl Into<String>) -> Self {
        Self {
            queue,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    async fn front_cover(&self, mbid: Uuid) -> Result<Option<ImageRef>, ImageError> {
        let url = format!("{}/release/{}", self.base_url, mbid);
        let body = match self.queue.fetch(move |client| client.get(&url)).await {
            Ok(body) => body,
            Err(QueueError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let listing: CaaListing = serde_json::from_str(&body)?;
        Ok(front_image(listing))
    }
}

fn front_image(listing: CaaListing) -> Option<ImageRef> {
    listing
        .images
        .into_iter()
        .find(|image| image.front)
        .map(|image| ImageRef {
            url: image.image,
            source: CoverArtArchive::SOURCE.to_string(),
        })
}

#[async_trait]
impl ImageSource for CoverArtArchive {
    async fn artist_image(&self, _name: &str) -> Option<ImageRef> {
        None
    }

    async fn release_image(
        &self,
        musicbrainz_id: Option<Uuid>,
        _artist: &str,
        _title: &str,
    ) -> Option<ImageRef> {
        let mbid = musicbrainz_id?;
        match self.front_cover(mbid).await {
            Ok(image) => image,
            Err(e) => {
                warn!(release_mbid = %mbid, error = %e, "Cover Art Archive lookup failed");
                None
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct DeezerPage<T> {
    #[serde(default = "Vec::new")]
    data: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct DeezerArtist {
    name: String,
    picture_xl: Option<String>,
    picture_big: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DeezerAlbum {
    title: String,
    cover_xl: Option<String>,
    cover_big: Option<String>,
}

/// Deezer search API (no key required)
pub struct Deezer {
    queue: Arc<RequestQueue>,
    base_url: String,
}

impl Deezer {
    pub const SOURCE: &'static str = "Deezer";

    pub fn new(queue: Arc<RequestQueue>) -> Self {
        Self::with_base_url(queue, "https://api.deezer.com")
    }

    pub fn with_base_url(queue: Arc<RequestQueue>, base_url: impl Into<String>) -> Self {
        Self {
            queue,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    async fn search<T>(&self, kind: &str, query: String) -> Result<Vec<T>, ImageError>
    where
        T: for<'de> Deserialize<'de>,
    {
        let url = format!("{}/search/{}", self.base_url, kind);
        let body = self
            .queue
            .fetch(move |client| client.get(&url).query(&[("q", query)]))
            .await?;

        let page: DeezerPage<T> = serde_json::from_str(&body)?;
        Ok(page.data)
    }
}

fn pick_artist(results: Vec<DeezerArtist>, name: &str) -> Option<ImageRef> {
    results
        .into_iter()
        .find(|a| a.name.eq_ignore_ascii_case(name))
        .and_then(|a| a.picture_xl.or(a.picture_big))
        .map(|url| ImageRef {
            url,
            source: Deezer::SOURCE.to_string(),
        })
}

fn pick_album(results: Vec<DeezerAlbum>, title: &str) -> Option<ImageRef> {
    results
        .into_iter()
        .find(|a| a.title.eq_ignore_ascii_case(title))
        .and_then(|a| a.cover_xl.or(a.cover_big))
        .map(|url| ImageRef {
            url,
            source: Deezer::SOURCE.to_string(),
        })
}

#[async_trait]
impl ImageSource for Deezer {
    async fn artist_image(&self, name: &str) -> Option<ImageRef> {
        match self.search::<DeezerArtist>("artist", name.to_string()).await {
            Ok(results) => pick_artist(results, name),
            Err(e) => {
                warn!(artist = name, error = %e, "Deezer artist image lookup failed");
                None
            }
        }
    }

    async fn release_image(
        &self,
        _musicbrainz_id: Option<Uuid>,
        artist: &str,
        title: &str,
    ) -> Option<ImageRef> {
        let query = format!("artist:\"{}\" album:\"{}\"", artist, title);
        match self.search::<DeezerAlbum>("album", query).await {
            Ok(results) => pick_album(results, title),
            Err(e) => {
                warn!(artist, title, error = %e, "Deezer album image lookup failed");
                None
            }
        }
    }
}

/// Providers tried in order; the first hit wins
#[derive(Default)]
pub struct ImageChain {
    sources: Vec<Arc<dyn ImageSource>>,
}

impl ImageChain {
    pub fn new(sources: Vec<Arc<dyn ImageSource>>) -> Self {
        Self { sources }
    }

    /// Cover Art Archive then Deezer over one shared queue, per `[images]`
    ///
    /// Returns the queue as well so the caller can shut it down.
    pub fn from_config(
        config: &ImagesConfig,
        user_agent: &str,
    ) -> Result<(Self, Option<Arc<RequestQueue>>), QueueError> {
        if !config.enabled || !(config.cover_art_archive || config.deezer) {
            debug!("Image lookups disabled");
            return Ok((Self::default(), None));
        }

        let queue = Arc::new(RequestQueue::new(
            "images",
            &QueueConfig {
                rate_per_second: config.rate_per_second,
                burst: config.burst,
                capacity: config.queue_capacity,
                timeout: Duration::from_secs(config.timeout_secs),
                user_agent: Some(user_agent.to_string()),
            },
        )?);

        let mut sources: Vec<Arc<dyn ImageSource>> = Vec::new();
        if config.cover_art_archive {
            sources.push(Arc::new(CoverArtArchive::new(Arc::clone(&queue))));
        }
        if config.deezer {
            sources.push(Arc::new(Deezer::new(Arc::clone(&queue))));
        }
        Ok((Self::new(sources), Some(queue)))
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

#[async_trait]
impl ImageSource for ImageChain {
    async fn artist_image(&self, name: &str) -> Option<ImageRef> {
        for source in &self.sources {
            if let Some(image) = source.artist_image(name).await {
                return Some(image);
            }
        }
        None
    }

    async fn release_image(
        &self,
        musicbrainz_id: Option<Uuid>,
        artist: &str,
        title: &str,
    ) -> Option<ImageRef> {
        for source in &self.sources {
            if let Some(image) = source.release_image(musicbrainz_id, artist, title).await {
                return Some(image);
            }
        }
        None
    }
}

//! Scripted external services
//!
//! `ScriptedAuthority` answers from fixed ID maps and can be switched to
//! unreachable mid-test. `FixedImages` hands out a predictable image for
//! every lookup.

use async_trait::async_trait;
use catalog_resolver::authority::{
    AuthorityError, AuthorityRelease, AuthorityReleaseGroup, AuthorityTrack, CreditEntry,
    MetadataAuthority,
};
use catalog_resolver::images::ImageSource;
use catalog_resolver::models::ImageRef;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use uuid::Uuid;

#[derive(Default)]
pub struct ScriptedAuthority {
    artists: Mutex<HashMap<Uuid, Vec<String>>>,
    releases: Mutex<HashMap<Uuid, AuthorityRelease>>,
    groups: Mutex<HashMap<Uuid, AuthorityReleaseGroup>>,
    tracks: Mutex<HashMap<Uuid, AuthorityTrack>>,
    unreachable: AtomicBool,
    delay_ms: AtomicU64,
    calls: AtomicUsize,
}

impl ScriptedAuthority {
    pub fn new() -> Self {
        Self::default()
    }

    /// Authority that fails every call as unreachable
    pub fn unreachable() -> Self {
        let authority = Self::default();
        authority.set_reachable(false);
        authority
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.unreachable.store(!reachable, Ordering::SeqCst);
    }

    /// Delay every call by `delay` before answering
    pub fn set_delay(&self, delay: Duration) {
        self.delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn add_artist(&self, id: Uuid, aliases: &[&str]) {
        self.artists
            .lock()
            .unwrap()
            .insert(id, aliases.iter().map(|a| a.to_string()).collect());
    }

    pub fn add_release(&self, id: Uuid, title: &str, credits: &[&str], group: Option<Uuid>) {
        self.releases.lock().unwrap().insert(
            id,
            AuthorityRelease {
                id,
                title: title.to_string(),
                release_group_id: group,
                artist_credit: credits
                    .iter()
                    .map(|name| CreditEntry {
                        name: name.to_string(),
                        artist_id: None,
                    })
                    .collect(),
            },
        );
    }

    pub fn add_release_group(&self, id: Uuid, title: &str, release_titles: &[&str]) {
        self.groups.lock().unwrap().insert(
            id,
            AuthorityReleaseGroup {
                id,
                title: title.to_string(),
                release_titles: release_titles.iter().map(|t| t.to_string()).collect(),
            },
        );
    }

    pub fn add_track(&self, id: Uuid, title: &str) {
        self.tracks.lock().unwrap().insert(
            id,
            AuthorityTrack {
                id,
                title: title.to_string(),
                duration: None,
            },
        );
    }

    async fn enter(&self) -> Result<(), AuthorityError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(AuthorityError::Unreachable("scripted outage".to_string()));
        }
        Ok(())
    }
}

fn missing(id: Uuid) -> AuthorityError {
    AuthorityError::NotFound(id.to_string())
}

#[async_trait]
impl MetadataAuthority for ScriptedAuthority {
    async fn artist_primary_aliases(&self, id: Uuid) -> Result<Vec<String>, AuthorityError> {
        self.enter().await?;
        self.artists.lock().unwrap().get(&id).cloned().ok_or_else(|| missing(id))
    }

    async fn release(&self, id: Uuid) -> Result<AuthorityRelease, AuthorityError> {
        self.enter().await?;
        self.releases.lock().unwrap().get(&id).cloned().ok_or_else(|| missing(id))
    }

    async fn release_group(&self, id: Uuid) -> Result<AuthorityReleaseGroup, AuthorityError> {
        self.enter().await?;
        self.groups.lock().unwrap().get(&id).cloned().ok_or_else(|| missing(id))
    }

    async fn track(&self, id: Uuid) -> Result<AuthorityTrack, AuthorityError> {
        self.enter().await?;
        self.tracks.lock().unwrap().get(&id).cloned().ok_or_else(|| missing(id))
    }
}

/// Image source returning `https://images.test/<kind>/<name>`
pub struct FixedImages;

#[async_trait]
impl ImageSource for FixedImages {
    async fn artist_image(&self, name: &str) -> Option<ImageRef> {
        Some(ImageRef {
            url: format!("https://images.test/artist/{}", name),
            source: "Fixed".to_string(),
        })
    }

    async fn release_image(
        &self,
        _musicbrainz_id: Option<Uuid>,
        _artist: &str,
        title: &str,
    ) -> Option<ImageRef> {
        Some(ImageRef {
            url: format!("https://images.test/release/{}", title),
            source: "Fixed".to_string(),
        })
    }
}

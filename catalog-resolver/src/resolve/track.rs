//! Track resolution

use super::{Resolution, ResolverContext};
use crate::authority::AuthorityError;
use crate::error::{CatalogError, CatalogResult};
use crate::models::Track;
use crate::store::{EntityUpdate, NewTrack, TrackLookup};
use std::fmt;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
pub struct TrackOpts {
    /// Primary artist first
    pub artist_ids: Vec<Uuid>,
    pub release_id: Uuid,
    pub musicbrainz_id: Option<Uuid>,
    pub title: String,
    /// Seconds, 0 when unknown
    pub duration: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Strategy {
    ByMusicBrainzId,
    ByTitle,
    ByAuthorityTitle,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

const CHAIN: [Strategy; 3] = [
    Strategy::ByMusicBrainzId,
    Strategy::ByTitle,
    Strategy::ByAuthorityTitle,
];

pub struct TrackResolver {
    ctx: ResolverContext,
}

impl TrackResolver {
    pub fn new(ctx: ResolverContext) -> Self {
        Self { ctx }
    }

    pub async fn resolve_track(&self, opts: &TrackOpts) -> CatalogResult<Track> {
        if opts.title.trim().is_empty() {
            return Err(CatalogError::Validation("track title is blank".to_string()));
        }
        if opts.artist_ids.is_empty() {
            return Err(CatalogError::Validation(
                "track resolution requires at least one artist".to_string(),
            ));
        }
        if opts.release_id.is_nil() {
            return Err(CatalogError::Validation(
                "track resolution requires a release".to_string(),
            ));
        }

        for strategy in CHAIN {
            let outcome = match strategy {
                Strategy::ByMusicBrainzId => self.by_musicbrainz_id(opts).await?,
                Strategy::ByTitle => self.by_title(opts, opts.title.trim()).await?,
                Strategy::ByAuthorityTitle => self.by_authority_title(opts).await?,
            };

            match outcome {
                Resolution::Matched(track) => {
                    debug!(%strategy, track_id = %track.id, "Track resolved");
                    return Ok(track);
                }
                Resolution::NotFound => debug!(%strategy, "No track match"),
                Resolution::Unreachable => debug!(%strategy, "Authority unreachable, continuing"),
            }
        }

        Ok(self
            .ctx
            .store
            .save_track(NewTrack {
                title: opts.title.trim().to_string(),
                musicbrainz_id: opts.musicbrainz_id,
                release_id: opts.release_id,
                artist_ids: opts.artist_ids.clone(),
                duration: opts.duration,
            })
            .await?)
    }

    async fn by_musicbrainz_id(&self, opts: &TrackOpts) -> CatalogResult<Resolution<Track>> {
        let Some(mbid) = opts.musicbrainz_id else {
            return Ok(Resolution::NotFound);
        };
        Ok(match self.ctx.store.get_track(TrackLookup::MusicBrainzId(mbid)).await? {
            Some(track) => Resolution::Matched(track),
            None => Resolution::NotFound,
        })
    }

    async fn by_title(&self, opts: &TrackOpts, title: &str) -> CatalogResult<Resolution<Track>> {
        let found = self
            .ctx
            .store
            .get_track(TrackLookup::Title {
                title: title.to_string(),
                artist_ids: opts.artist_ids.clone(),
            })
            .await?;

        match found {
            Some(track) => Ok(Resolution::Matched(self.attach_mbid(track, opts.musicbrainz_id).await?)),
            None => Ok(Resolution::NotFound),
        }
    }

    /// Retry the title lookup with the authority's spelling of the title
    async fn by_authority_title(&self, opts: &TrackOpts) -> CatalogResult<Resolution<Track>> {
        let Some(mbid) = opts.musicbrainz_id else {
            return Ok(Resolution::NotFound);
        };

        let remote = match self.ctx.authority.track(mbid).await {
            Ok(remote) => remote,
            Err(AuthorityError::NotFound(_)) => return Ok(Resolution::NotFound),
            Err(e) => {
                warn!(%mbid, error = %e, "Track authority lookup failed");
                return Ok(Resolution::Unreachable);
            }
        };

        let title = remote.title.trim();
        if title.is_empty() || title == opts.title.trim() {
            return Ok(Resolution::NotFound);
        }
        self.by_title(opts, title).await
    }

    async fn attach_mbid(&self, mut track: Track, mbid: Option<Uuid>) -> CatalogResult<Track> {
        if let (None, Some(mbid)) = (track.musicbrainz_id, mbid) {
            self.ctx
                .store
                .update_track(
                    track.id,
                    EntityUpdate {
                        musicbrainz_id: Some(mbid),
                        ..Default::default()
                    },
                )
                .await?;
            track.musicbrainz_id = Some(mbid);
            info!(track_id = %track.id, %mbid, "Attached MusicBrainz ID to existing track");
        }
        Ok(track)
    }
}

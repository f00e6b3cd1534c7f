//! Release resolution

use super::{Resolution, ResolverContext};
use crate::authority::{AuthorityError, AuthorityRelease};
use crate::error::{CatalogError, CatalogResult};
use crate::models::{AliasOwner, AliasSource, Artist, Release};
use crate::store::{EntityUpdate, NewRelease, ReleaseLookup};
use std::fmt;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
pub struct ReleaseOpts {
    pub musicbrainz_id: Option<Uuid>,
    pub release_group_id: Option<Uuid>,
    pub title: String,
    /// Used as the release title when none was supplied
    pub track_title: String,
    /// Resolved artists, primary first
    pub artists: Vec<Artist>,
}

impl ReleaseOpts {
    fn effective_title(&self) -> &str {
        let title = self.title.trim();
        if title.is_empty() {
            self.track_title.trim()
        } else {
            title
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Strategy {
    ByMusicBrainzId,
    ViaAuthority,
    ByTitle,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

const CHAIN: [Strategy; 3] = [Strategy::ByMusicBrainzId, Strategy::ViaAuthority, Strategy::ByTitle];

pub struct ReleaseResolver {
    ctx: ResolverContext,
}

impl ReleaseResolver {
    pub fn new(ctx: ResolverContext) -> Self {
        Self { ctx }
    }

    /// Find or create the release for a submission; never returns without one
    pub async fn resolve_release(&self, opts: &ReleaseOpts) -> CatalogResult<Release> {
        let Some(primary) = opts.artists.first() else {
            return Err(CatalogError::Validation(
                "release resolution requires at least one artist".to_string(),
            ));
        };
        if opts.effective_title().is_empty() {
            return Err(CatalogError::Validation(
                "release title and track title are both blank".to_string(),
            ));
        }

        for strategy in CHAIN {
            let outcome = match strategy {
                Strategy::ByMusicBrainzId => self.by_musicbrainz_id(opts).await?,
                Strategy::ViaAuthority => self.via_authority(opts, primary).await?,
                Strategy::ByTitle => self.by_title(opts, primary).await?,
            };

            match outcome {
                Resolution::Matched(release) => {
                    debug!(%strategy, release_id = %release.id, "Release resolved");
                    return Ok(release);
                }
                Resolution::NotFound => debug!(%strategy, "No release match"),
                Resolution::Unreachable => debug!(%strategy, "Authority unreachable, continuing"),
            }
        }

        self.create(opts, primary).await
    }

    async fn by_musicbrainz_id(&self, opts: &ReleaseOpts) -> CatalogResult<Resolution<Release>> {
        let Some(mbid) = opts.musicbrainz_id else {
            return Ok(Resolution::NotFound);
        };
        Ok(match self.ctx.store.get_release(ReleaseLookup::MusicBrainzId(mbid)).await? {
            Some(release) => Resolution::Matched(release),
            None => Resolution::NotFound,
        })
    }

    /// Match by the authority's title, or create from authority data
    async fn via_authority(
        &self,
        opts: &ReleaseOpts,
        primary: &Artist,
    ) -> CatalogResult<Resolution<Release>> {
        let Some(mbid) = opts.musicbrainz_id else {
            return Ok(Resolution::NotFound);
        };

        let remote = match self.ctx.authority.release(mbid).await {
            Ok(remote) => remote,
            Err(AuthorityError::NotFound(_)) => return Ok(Resolution::NotFound),
            Err(e) => {
                warn!(%mbid, error = %e, "Release authority lookup failed");
                return Ok(Resolution::Unreachable);
            }
        };
        let group_id = opts.release_group_id.or(remote.release_group_id);

        let mut titles = vec![remote.title.clone()];
        if !opts.title.trim().is_empty() && opts.title.trim() != remote.title {
            titles.push(opts.title.trim().to_string());
        }
        let existing = self
            .ctx
            .store
            .get_release(ReleaseLookup::Titles {
                artist_id: primary.id,
                titles,
            })
            .await?;

        if let Some(mut release) = existing {
            if release.musicbrainz_id.is_none() {
                self.ctx
                    .store
                    .update_release(
                        release.id,
                        EntityUpdate {
                            musicbrainz_id: Some(mbid),
                            ..Default::default()
                        },
                    )
                    .await?;
                release.musicbrainz_id = Some(mbid);
                info!(release_id = %release.id, %mbid, "Attached MusicBrainz ID to existing release");
                self.save_group_titles(release.id, group_id).await?;
                return Ok(Resolution::Matched(release));
            }
            debug!(
                release_id = %release.id,
                "Title match already carries another MusicBrainz ID"
            );
        }

        let release = self.create_from_authority(opts, primary, &remote).await?;
        self.save_group_titles(release.id, group_id).await?;
        Ok(Resolution::Matched(release))
    }

    async fn by_title(
        &self,
        opts: &ReleaseOpts,
        primary: &Artist,
    ) -> CatalogResult<Resolution<Release>> {
        let found = self
            .ctx
            .store
            .get_release(ReleaseLookup::Titles {
                artist_id: primary.id,
                titles: vec![opts.effective_title().to_string()],
            })
            .await?;

        let Some(mut release) = found else {
            return Ok(Resolution::NotFound);
        };

        if let (None, Some(mbid)) = (release.musicbrainz_id, opts.musicbrainz_id) {
            self.ctx
                .store
                .update_release(
                    release.id,
                    EntityUpdate {
                        musicbrainz_id: Some(mbid),
                        ..Default::default()
                    },
                )
                .await?;
            release.musicbrainz_id = Some(mbid);
            info!(release_id = %release.id, %mbid, "Attached MusicBrainz ID to existing release");
        }
        Ok(Resolution::Matched(release))
    }

    async fn create_from_authority(
        &self,
        opts: &ReleaseOpts,
        primary: &Artist,
        remote: &AuthorityRelease,
    ) -> CatalogResult<Release> {
        let image = self
            .ctx
            .images
            .release_image(Some(remote.id), &primary.name, &remote.title)
            .await;

        Ok(self
            .ctx
            .store
            .save_release(NewRelease {
                title: remote.title.clone(),
                musicbrainz_id: Some(remote.id),
                artist_ids: opts.artists.iter().map(|a| a.id).collect(),
                various_artists: remote.is_various_artists(),
                image,
            })
            .await?)
    }

    async fn create(&self, opts: &ReleaseOpts, primary: &Artist) -> CatalogResult<Release> {
        let title = opts.effective_title();
        let image = self
            .ctx
            .images
            .release_image(opts.musicbrainz_id, &primary.name, title)
            .await;

        Ok(self
            .ctx
            .store
            .save_release(NewRelease {
                title: title.to_string(),
                musicbrainz_id: opts.musicbrainz_id,
                artist_ids: opts.artists.iter().map(|a| a.id).collect(),
                various_artists: false,
                image,
            })
            .await?)
    }

    /// Record release-group title variants as aliases; authority failures are ignored
    async fn save_group_titles(&self, release_id: Uuid, group_id: Option<Uuid>) -> CatalogResult<()> {
        let Some(group_id) = group_id else {
            return Ok(());
        };

        match self.ctx.authority.release_titles(group_id).await {
            Ok(titles) => {
                self.ctx
                    .store
                    .save_aliases(AliasOwner::Release(release_id), &titles, AliasSource::MusicBrainz)
                    .await?;
            }
            Err(e) => {
                warn!(release_group = %group_id, error = %e, "Release group lookup failed");
            }
        }
        Ok(())
    }
}

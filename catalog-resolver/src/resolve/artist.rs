//! Artist resolution
//!
//! MusicBrainz IDs first, then supplied names, then names parsed out of the
//! raw credit and title. Only store failures are returned as errors.

use super::{same_name, Resolution, ResolverContext};
use crate::authority::AuthorityError;
use crate::error::CatalogResult;
use crate::models::{AliasOwner, AliasSource, Artist};
use crate::parser::parse_artists;
use crate::store::{ArtistLookup, EntityUpdate, NewArtist};
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
pub struct ArtistOpts {
    pub musicbrainz_ids: Vec<Uuid>,
    /// Individual artist names already split by the client
    pub names: Vec<String>,
    /// Raw combined credit, e.g. "A feat. B"
    pub artist_credit: String,
    pub track_title: String,
}

pub struct ArtistResolver {
    ctx: ResolverContext,
}

impl ArtistResolver {
    pub fn new(ctx: ResolverContext) -> Self {
        Self { ctx }
    }

    /// Resolve every artist the submission mentions
    ///
    /// The result is deduplicated by ID in first-seen order; the first entry
    /// is the primary artist. Empty only when the input names no artist.
    pub async fn resolve_artists(&self, opts: &ArtistOpts) -> CatalogResult<Vec<Artist>> {
        let mut resolved: Vec<Artist> = Vec::new();
        let mut names: Vec<String> = opts
            .names
            .iter()
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .collect();
        let mut parsed = false;

        for &mbid in &opts.musicbrainz_ids {
            if let Resolution::Matched(artist) = self.by_musicbrainz_id(mbid).await? {
                debug!(%mbid, artist_id = %artist.id, "Artist matched by MusicBrainz ID");
                resolved.push(artist);
                continue;
            }

            if names.is_empty() && !parsed {
                names = parse_artists(&opts.artist_credit, &opts.track_title);
                parsed = true;
            }

            match self.via_authority(mbid, &names).await? {
                Resolution::Matched(artist) => resolved.push(artist),
                Resolution::NotFound | Resolution::Unreachable => {
                    debug!(%mbid, "Falling back to artist names");
                }
            }
        }

        self.resolve_names(&names, &mut resolved).await?;

        if resolved.is_empty() {
            let derived = parse_artists(&opts.artist_credit, &opts.track_title);
            debug!(count = derived.len(), "No artist resolved, using parsed credit");
            self.resolve_names(&derived, &mut resolved).await?;
        }

        let mut unique: Vec<Artist> = Vec::with_capacity(resolved.len());
        for artist in resolved {
            if !unique.iter().any(|a| a.id == artist.id) {
                unique.push(artist);
            }
        }
        Ok(unique)
    }

    async fn by_musicbrainz_id(&self, mbid: Uuid) -> CatalogResult<Resolution<Artist>> {
        Ok(match self.ctx.store.get_artist(ArtistLookup::MusicBrainzId(mbid)).await? {
            Some(artist) => Resolution::Matched(artist),
            None => Resolution::NotFound,
        })
    }

    /// Match or create the artist behind `mbid` using its authority aliases
    async fn via_authority(
        &self,
        mbid: Uuid,
        known_names: &[String],
    ) -> CatalogResult<Resolution<Artist>> {
        let aliases: Vec<String> = match self.ctx.authority.artist_primary_aliases(mbid).await {
            Ok(aliases) => aliases
                .into_iter()
                .map(|a| a.trim().to_string())
                .filter(|a| !a.is_empty())
                .collect(),
            Err(AuthorityError::NotFound(_)) => Vec::new(),
            Err(e) => {
                warn!(%mbid, error = %e, "Artist authority lookup failed");
                return Ok(Resolution::Unreachable);
            }
        };
        if aliases.is_empty() {
            debug!(%mbid, "Authority has no aliases for artist");
            return Ok(Resolution::NotFound);
        }

        let mut candidates: Vec<Artist> = Vec::new();
        for alias in &aliases {
            if let Some(artist) = self.ctx.store.get_artist(ArtistLookup::Alias(alias.clone())).await? {
                if !candidates.iter().any(|c| c.id == artist.id) {
                    candidates.push(artist);
                }
            }
        }

        if let [candidate] = candidates.as_slice() {
            if candidate.musicbrainz_id.is_none() {
                let id = candidate.id;
                self.ctx
                    .store
                    .update_artist(
                        id,
                        EntityUpdate {
                            musicbrainz_id: Some(mbid),
                            ..Default::default()
                        },
                    )
                    .await?;
                self.ctx
                    .store
                    .save_aliases(AliasOwner::Artist(id), &aliases, AliasSource::MusicBrainz)
                    .await?;
                info!(artist_id = %id, %mbid, "Attached MusicBrainz ID to existing artist");

                return Ok(match self.ctx.store.get_artist(ArtistLookup::Id(id)).await? {
                    Some(artist) => Resolution::Matched(artist),
                    None => Resolution::NotFound,
                });
            }
        }

        let name = aliases
            .iter()
            .find(|alias| known_names.iter().any(|n| same_name(n, alias)))
            .unwrap_or(&aliases[0])
            .clone();
        let image = self.ctx.images.artist_image(&name).await;

        let artist = self
            .ctx
            .store
            .save_artist(NewArtist {
                name,
                musicbrainz_id: Some(mbid),
                aliases,
                alias_source: Some(AliasSource::MusicBrainz),
                image,
            })
            .await?;
        Ok(Resolution::Matched(artist))
    }

    /// Resolve each name not already answered by an artist in `resolved`
    async fn resolve_names(&self, names: &[String], resolved: &mut Vec<Artist>) -> CatalogResult<()> {
        for name in names {
            if resolved.iter().any(|a| a.answers_to(name)) {
                continue;
            }
            let artist = self.by_name_or_create(name).await?;
            resolved.push(artist);
        }
        Ok(())
    }

    async fn by_name_or_create(&self, name: &str) -> CatalogResult<Artist> {
        if let Some(artist) = self
            .ctx
            .store
            .get_artist(ArtistLookup::Alias(name.to_string()))
            .await?
        {
            debug!(artist_id = %artist.id, name, "Artist matched by alias");
            return Ok(artist);
        }

        let image = self.ctx.images.artist_image(name).await;
        Ok(self
            .ctx
            .store
            .save_artist(NewArtist {
                name: name.to_string(),
                image,
                ..Default::default()
            })
            .await?)
    }
}

//! Listen submission
//!
//! [`Catalog`] is the engine's entry point: it wires the resolvers, the
//! alias manager, the merge engine and the submission coalescer around one
//! store, one authority and one image source.

use crate::alias::AliasManager;
use crate::authority::MetadataAuthority;
use crate::coalesce::{CoalesceKey, SubmissionCoalescer};
use crate::error::{CatalogError, CatalogResult};
use crate::images::ImageSource;
use crate::merge::MergeEngine;
use crate::models::{Artist, Listen, Release, Track};
use crate::resolve::{
    ArtistOpts, ArtistResolver, ReleaseOpts, ReleaseResolver, ResolverContext, TrackOpts,
    TrackResolver,
};
use crate::store::{EntityUpdate, ListenScope, Store};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// One incoming listen, as a scrobble handler or import parser reports it
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubmitListenOpts {
    /// Raw artist credit, e.g. "Artist feat. Guest"
    pub artist: String,
    pub artist_names: Vec<String>,
    pub artist_mbids: Vec<Uuid>,
    pub track_title: String,
    pub recording_mbid: Option<Uuid>,
    pub release_title: String,
    pub release_mbid: Option<Uuid>,
    pub release_group_mbid: Option<Uuid>,
    /// Seconds, 0 when unknown
    pub duration: u32,
    /// Defaults to the submission time
    pub time: Option<DateTime<Utc>>,
    pub user_id: i64,
    pub client: Option<String>,
    /// "Now playing" updates resolve entities without recording a listen
    pub skip_save_listen: bool,
}

impl SubmitListenOpts {
    fn coalesce_key(&self) -> CoalesceKey {
        CoalesceKey::new(
            self.artist.trim(),
            self.track_title.trim(),
            self.release_title.trim(),
        )
    }
}

/// Entities a submission resolved to
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubmitOutcome {
    /// Primary artist first
    pub artists: Vec<Artist>,
    pub release: Release,
    pub track: Track,
    /// `None` when the listen was not recorded
    pub listen: Option<Listen>,
}

pub struct Catalog {
    ctx: ResolverContext,
    aliases: AliasManager,
    merges: MergeEngine,
    coalescer: SubmissionCoalescer<SubmitOutcome>,
}

impl Catalog {
    pub fn new(
        store: Arc<dyn Store>,
        authority: Arc<dyn MetadataAuthority>,
        images: Arc<dyn ImageSource>,
    ) -> Self {
        Self {
            aliases: AliasManager::new(Arc::clone(&store)),
            merges: MergeEngine::new(Arc::clone(&store)),
            ctx: ResolverContext::new(store, authority, images),
            coalescer: SubmissionCoalescer::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.ctx.store
    }

    pub fn aliases(&self) -> &AliasManager {
        &self.aliases
    }

    pub fn merges(&self) -> &MergeEngine {
        &self.merges
    }

    /// Resolve a listen to artist, release and track, creating what is
    /// missing, then record the listen unless `skip_save_listen` is set
    ///
    /// Identical concurrent submissions share one run. Dropping the returned
    /// future abandons outstanding authority calls; store writes already
    /// committed stay committed.
    pub async fn submit_listen(&self, opts: SubmitListenOpts) -> CatalogResult<SubmitOutcome> {
        if opts.track_title.trim().is_empty() {
            return Err(CatalogError::Validation("track title is blank".to_string()));
        }

        let ctx = self.ctx.clone();
        self.coalescer
            .run(opts.coalesce_key(), move || run_pipeline(ctx, opts))
            .await
    }

    /// Remove the listen of `track_id` at `listened_at`; unknown listens are ignored
    pub async fn delete_listen(&self, track_id: Uuid, listened_at: DateTime<Utc>) -> CatalogResult<()> {
        self.ctx.store.delete_listen(track_id, listened_at).await?;
        Ok(())
    }

    pub async fn listen_count(&self, scope: ListenScope) -> CatalogResult<i64> {
        Ok(self.ctx.store.listen_count(scope).await?)
    }

    /// Seconds listened in `scope`, counting tracks of unknown duration as 0
    pub async fn time_listened(&self, scope: ListenScope) -> CatalogResult<i64> {
        Ok(self.ctx.store.time_listened(scope).await?)
    }
}

async fn run_pipeline(ctx: ResolverContext, opts: SubmitListenOpts) -> CatalogResult<SubmitOutcome> {
    let track_title = opts.track_title.trim().to_string();

    let artists = ArtistResolver::new(ctx.clone())
        .resolve_artists(&ArtistOpts {
            musicbrainz_ids: opts.artist_mbids.clone(),
            names: opts.artist_names.clone(),
            artist_credit: opts.artist.clone(),
            track_title: track_title.clone(),
        })
        .await?;
    if artists.is_empty() {
        return Err(CatalogError::Validation(
            "no artist could be derived from the submission".to_string(),
        ));
    }

    let release = ReleaseResolver::new(ctx.clone())
        .resolve_release(&ReleaseOpts {
            musicbrainz_id: opts.release_mbid,
            release_group_id: opts.release_group_mbid,
            title: opts.release_title.clone(),
            track_title: track_title.clone(),
            artists: artists.clone(),
        })
        .await?;

    let mut track = TrackResolver::new(ctx.clone())
        .resolve_track(&TrackOpts {
            artist_ids: artists.iter().map(|a| a.id).collect(),
            release_id: release.id,
            musicbrainz_id: opts.recording_mbid,
            title: track_title,
            duration: opts.duration,
        })
        .await?;

    if track.duration == 0 && opts.duration > 0 {
        ctx.store
            .update_track(
                track.id,
                EntityUpdate {
                    duration: Some(opts.duration),
                    ..Default::default()
                },
            )
            .await?;
        track.duration = opts.duration;
        debug!(track_id = %track.id, duration = opts.duration, "Backfilled track duration");
    }

    let listen = if opts.skip_save_listen {
        None
    } else {
        let listen = Listen {
            user_id: opts.user_id,
            track_id: track.id,
            listened_at: opts.time.unwrap_or_else(Utc::now),
            client: opts.client.clone(),
        };
        ctx.store.save_listen(&listen).await?;
        Some(listen)
    };

    info!(
        track_id = %track.id,
        release_id = %release.id,
        primary_artist = %artists[0].name,
        saved = listen.is_some(),
        "Listen submitted"
    );

    Ok(SubmitOutcome {
        artists,
        release,
        track,
        listen,
    })
}

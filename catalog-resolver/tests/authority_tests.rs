//! Integration tests for MusicBrainz ID handling
//!
//! The authority is scripted: fixed ID maps that can be switched to
//! unreachable between submissions.

mod helpers;

use catalog_resolver::models::{AliasOwner, AliasSource};
use catalog_resolver::store::{ArtistLookup, ReleaseLookup, Store, TrackLookup};
use catalog_resolver::SubmitListenOpts;
use chrono::{DateTime, Utc};
use helpers::{count_rows, test_catalog, ScriptedAuthority};
use uuid::Uuid;

fn at(offset: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(1_700_000_000 + offset * 60, 0)
}

fn base(artist: &str, track: &str, release: &str, offset: i64) -> SubmitListenOpts {
    SubmitListenOpts {
        artist: artist.to_string(),
        track_title: track.to_string(),
        release_title: release.to_string(),
        time: at(offset),
        user_id: 1,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_unreachable_authority_resolves_by_name_without_attaching_id() {
    let t = test_catalog(ScriptedAuthority::new()).await;
    let mbid = Uuid::new_v4();

    // Artist known by name only
    let seeded = t
        .catalog
        .submit_listen(base("Ado", "Usseewa", "Kyougen", 0))
        .await
        .unwrap();
    let ado = seeded.artists[0].id;

    // ID supplied while the authority is down: matched by name, ID not attached
    t.authority.set_reachable(false);
    let mut with_id = base("Ado", "Usseewa", "Kyougen", 1);
    with_id.artist_mbids = vec![mbid];
    with_id.artist_names = vec!["Ado".to_string()];
    let outcome = t.catalog.submit_listen(with_id.clone()).await.unwrap();

    assert_eq!(outcome.artists.len(), 1);
    assert_eq!(outcome.artists[0].id, ado);
    assert_eq!(outcome.artists[0].musicbrainz_id, None);
    assert!(t
        .store
        .get_artist(ArtistLookup::MusicBrainzId(mbid))
        .await
        .unwrap()
        .is_none());

    // Authority back: the ID is attached to the existing artist with its aliases
    t.authority.set_reachable(true);
    t.authority.add_artist(mbid, &["Ado", "アド"]);
    with_id.time = at(2);
    let outcome = t.catalog.submit_listen(with_id).await.unwrap();

    assert_eq!(outcome.artists[0].id, ado);
    assert_eq!(outcome.artists[0].musicbrainz_id, Some(mbid));
    let aliases = t.catalog.aliases().aliases(AliasOwner::Artist(ado)).await.unwrap();
    assert!(aliases
        .iter()
        .any(|a| a.value == "アド" && a.source == AliasSource::MusicBrainz && !a.is_primary));

    // Down again: the attached ID alone is enough
    t.authority.set_reachable(false);
    let mut id_only = base("", "Usseewa", "Kyougen", 3);
    id_only.artist_mbids = vec![mbid];
    let outcome = t.catalog.submit_listen(id_only).await.unwrap();
    assert_eq!(outcome.artists[0].id, ado);
    assert_eq!(count_rows(&t.store, "artists").await, 1);
}

#[tokio::test]
async fn test_new_artist_named_after_alias_matching_supplied_name() {
    let t = test_catalog(ScriptedAuthority::new()).await;
    let mbid = Uuid::new_v4();
    t.authority.add_artist(mbid, &["Kenshi Yonezu", "米津玄師", "Hachi"]);

    let mut opts = base("米津玄師", "KICK BACK", "KICK BACK", 0);
    opts.artist_mbids = vec![mbid];
    opts.artist_names = vec!["米津玄師".to_string()];
    let outcome = t.catalog.submit_listen(opts).await.unwrap();

    assert_eq!(outcome.artists.len(), 1);
    let artist = &outcome.artists[0];
    assert_eq!(artist.name, "米津玄師");
    assert_eq!(artist.musicbrainz_id, Some(mbid));
    assert_eq!(artist.aliases.len(), 3);
    assert_eq!(artist.aliases.iter().filter(|a| a.is_primary).count(), 1);
}

#[tokio::test]
async fn test_id_with_no_names_uses_first_alias() {
    let t = test_catalog(ScriptedAuthority::new()).await;
    let mbid = Uuid::new_v4();
    t.authority.add_artist(mbid, &["Hikaru Utada", "宇多田ヒカル"]);

    let mut opts = base("", "First Love", "First Love", 0);
    opts.artist_mbids = vec![mbid];
    let outcome = t.catalog.submit_listen(opts).await.unwrap();

    assert_eq!(outcome.artists[0].name, "Hikaru Utada");
    assert_eq!(outcome.artists[0].musicbrainz_id, Some(mbid));
}

#[tokio::test]
async fn test_various_artists_flag_follows_authority_credit() {
    let t = test_catalog(ScriptedAuthority::new()).await;
    let compilation = Uuid::new_v4();
    let album = Uuid::new_v4();
    t.authority
        .add_release(compilation, "Now 42", &["Various Artists"], None);
    t.authority.add_release(album, "Kyougen", &["Ado"], None);

    let mut opts = base("Ado", "Usseewa", "Now 42", 0);
    opts.release_mbid = Some(compilation);
    let various = t.catalog.submit_listen(opts).await.unwrap();
    assert!(various.release.various_artists);
    assert_eq!(various.release.musicbrainz_id, Some(compilation));

    let mut opts = base("Ado", "Usseewa", "Kyougen", 1);
    opts.release_mbid = Some(album);
    let regular = t.catalog.submit_listen(opts).await.unwrap();
    assert!(!regular.release.various_artists);
    assert_ne!(regular.release.id, various.release.id);
}

#[tokio::test]
async fn test_release_title_match_gets_id_and_group_aliases() {
    let t = test_catalog(ScriptedAuthority::new()).await;
    let seeded = t
        .catalog
        .submit_listen(base("Joni Mitchell", "River", "Blue", 0))
        .await
        .unwrap();

    let release_mbid = Uuid::new_v4();
    let group = Uuid::new_v4();
    t.authority.add_release(release_mbid, "Blue", &["Joni Mitchell"], Some(group));
    t.authority
        .add_release_group(group, "Blue", &["Blue", "Blue (Remastered)"]);

    let mut opts = base("Joni Mitchell", "River", "Blue", 1);
    opts.release_mbid = Some(release_mbid);
    opts.release_group_mbid = Some(group);
    let outcome = t.catalog.submit_listen(opts).await.unwrap();

    assert_eq!(outcome.release.id, seeded.release.id);
    assert_eq!(outcome.release.musicbrainz_id, Some(release_mbid));

    let release = t
        .store
        .get_release(ReleaseLookup::Id(seeded.release.id))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(release.title, "Blue");
    assert!(release.aliases.iter().any(|a| a.value == "Blue (Remastered)"));
    assert_eq!(count_rows(&t.store, "releases").await, 1);
}

#[tokio::test]
async fn test_release_id_kept_when_authority_is_down() {
    let t = test_catalog(ScriptedAuthority::unreachable()).await;
    let release_mbid = Uuid::new_v4();

    let mut opts = base("Ado", "Usseewa", "Kyougen", 0);
    opts.release_mbid = Some(release_mbid);
    let first = t.catalog.submit_listen(opts.clone()).await.unwrap();
    assert_eq!(first.release.musicbrainz_id, Some(release_mbid));
    assert!(!first.release.various_artists);

    opts.time = at(1);
    let second = t.catalog.submit_listen(opts).await.unwrap();
    assert_eq!(second.release.id, first.release.id);
    assert!(t.authority.calls() >= 1);
}

#[tokio::test]
async fn test_track_matched_through_authority_title() {
    let t = test_catalog(ScriptedAuthority::new()).await;
    let seeded = t
        .catalog
        .submit_listen(base("Mitski", "Nobody", "Be the Cowboy", 0))
        .await
        .unwrap();

    let recording = Uuid::new_v4();
    t.authority.add_track(recording, "Nobody");

    let mut opts = base("Mitski", "Nobody (Official Audio)", "Be the Cowboy", 1);
    opts.recording_mbid = Some(recording);
    let outcome = t.catalog.submit_listen(opts).await.unwrap();

    assert_eq!(outcome.track.id, seeded.track.id);
    assert_eq!(outcome.track.musicbrainz_id, Some(recording));

    // Now found directly by ID
    let by_id = t
        .store
        .get_track(TrackLookup::MusicBrainzId(recording))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(by_id.id, seeded.track.id);
    assert_eq!(count_rows(&t.store, "tracks").await, 1);
}

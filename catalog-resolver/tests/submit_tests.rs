//! Integration tests for listen submission
//!
//! Covers idempotent resolution, duration backfill, artist credit parsing,
//! primary flags and coalescing of concurrent identical submissions.

mod helpers;

use catalog_resolver::models::{AliasOwner, CreditedItem};
use catalog_resolver::store::{ArtistLookup, ListenScope, Store};
use catalog_resolver::{CatalogError, SubmitListenOpts};
use chrono::{DateTime, Utc};
use helpers::{count_rows, test_catalog, ScriptedAuthority};
use uuid::Uuid;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;

fn at(offset: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(1_700_000_000 + offset * 60, 0)
}

fn listen(artist: &str, track: &str, release: &str, offset: i64) -> SubmitListenOpts {
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
async fn test_repeated_submission_creates_entities_once() {
    let t = test_catalog(ScriptedAuthority::new()).await;

    let mut track_ids = Vec::new();
    for i in 0..4 {
        let outcome = t
            .catalog
            .submit_listen(listen("Mitski", "Nobody", "Be the Cowboy", i))
            .await
            .unwrap();
        track_ids.push(outcome.track.id);
    }

    assert!(track_ids.windows(2).all(|w| w[0] == w[1]));
    assert_eq!(count_rows(&t.store, "artists").await, 1);
    assert_eq!(count_rows(&t.store, "releases").await, 1);
    assert_eq!(count_rows(&t.store, "tracks").await, 1);
    assert_eq!(t.catalog.listen_count(ListenScope::All).await.unwrap(), 4);
}

#[tokio::test]
async fn test_duration_first_known_value_wins() {
    let t = test_catalog(ScriptedAuthority::new()).await;

    let first = t
        .catalog
        .submit_listen(listen("Mitski", "Nobody", "Be the Cowboy", 0))
        .await
        .unwrap();
    assert_eq!(first.track.duration, 0);

    let mut with_duration = listen("Mitski", "Nobody", "Be the Cowboy", 1);
    with_duration.duration = 191;
    let second = t.catalog.submit_listen(with_duration).await.unwrap();
    assert_eq!(second.track.duration, 191);

    let mut shorter = listen("Mitski", "Nobody", "Be the Cowboy", 2);
    shorter.duration = 120;
    let third = t.catalog.submit_listen(shorter).await.unwrap();
    assert_eq!(third.track.duration, 191);

    let stored = t
        .store
        .get_track(catalog_resolver::store::TrackLookup::Id(first.track.id))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.duration, 191);
    assert_eq!(
        t.catalog
            .time_listened(ListenScope::Track(first.track.id))
            .await
            .unwrap(),
        3 * 191
    );
}

#[tokio::test]
async fn test_now_playing_resolves_without_listen() {
    let t = test_catalog(ScriptedAuthority::new()).await;

    let mut now_playing = listen("Mitski", "Nobody", "Be the Cowboy", 0);
    now_playing.skip_save_listen = true;
    let outcome = t.catalog.submit_listen(now_playing).await.unwrap();

    assert!(outcome.listen.is_none());
    assert_eq!(count_rows(&t.store, "tracks").await, 1);
    assert_eq!(t.catalog.listen_count(ListenScope::All).await.unwrap(), 0);
}

#[tokio::test]
async fn test_blank_track_title_is_rejected() {
    let t = test_catalog(ScriptedAuthority::new()).await;

    let err = t
        .catalog
        .submit_listen(listen("Mitski", "  ", "Be the Cowboy", 0))
        .await
        .unwrap_err();
    assert!(matches!(err, CatalogError::Validation(_)));

    let err = t
        .catalog
        .submit_listen(listen("", "Nobody", "", 0))
        .await
        .unwrap_err();
    assert!(matches!(err, CatalogError::Validation(_)));
    assert_eq!(count_rows(&t.store, "artists").await, 0);
}

#[tokio::test]
async fn test_featured_artists_parsed_from_credit_and_title() {
    let t = test_catalog(ScriptedAuthority::new()).await;

    let outcome = t
        .catalog
        .submit_listen(listen(
            "Tyler, The Creator",
            "CA (feat. Alice Smith, Leon Ware & Clem Creevy)",
            "",
            0,
        ))
        .await
        .unwrap();

    let names: Vec<&str> = outcome.artists.iter().map(|a| a.name.as_str()).collect();
    assert_eq!(
        names,
        vec!["Tyler, The Creator", "Alice Smith", "Leon Ware", "Clem Creevy"]
    );

    // Release title falls back to the track title
    assert_eq!(
        outcome.release.title,
        "CA (feat. Alice Smith, Leon Ware & Clem Creevy)"
    );

    let credits = t
        .store
        .item_artists(CreditedItem::Track(outcome.track.id))
        .await
        .unwrap();
    assert_eq!(credits.len(), 4);
    assert_eq!(credits.iter().filter(|c| c.is_primary).count(), 1);
    assert_eq!(credits[0].artist_id, outcome.artists[0].id);
    assert!(credits[0].is_primary);
}

#[tokio::test]
async fn test_supplied_names_reuse_existing_artists_case_insensitively() {
    let t = test_catalog(ScriptedAuthority::new()).await;

    let first = t
        .catalog
        .submit_listen(listen("Carly Rae Jepsen feat. Rufus Wainwright", "Song", "Album", 0))
        .await
        .unwrap();
    assert_eq!(first.artists.len(), 2);

    let mut named = listen("ignored", "Song", "Album", 1);
    named.artist_names = vec![
        "Carly Rae Jepsen".to_string(),
        "Rufus Wainwright".to_string(),
        "carly rae jepsen".to_string(),
    ];
    let second = t.catalog.submit_listen(named).await.unwrap();

    let first_ids: Vec<_> = first.artists.iter().map(|a| a.id).collect();
    let second_ids: Vec<_> = second.artists.iter().map(|a| a.id).collect();
    assert_eq!(first_ids, second_ids);
    assert_eq!(count_rows(&t.store, "artists").await, 2);
}

#[tokio::test]
async fn test_new_artist_gets_image_and_single_primary_alias() {
    let t = test_catalog(ScriptedAuthority::new()).await;

    let outcome = t
        .catalog
        .submit_listen(listen("Ado", "Usseewa", "Kyougen", 0))
        .await
        .unwrap();
    let artist = &outcome.artists[0];

    assert_eq!(
        artist.image.as_ref().map(|i| i.url.as_str()),
        Some("https://images.test/artist/Ado")
    );
    assert_eq!(
        outcome.release.image.as_ref().map(|i| i.url.as_str()),
        Some("https://images.test/release/Kyougen")
    );

    let aliases = t
        .catalog
        .aliases()
        .aliases(AliasOwner::Artist(artist.id))
        .await
        .unwrap();
    assert_eq!(aliases.len(), 1);
    assert!(aliases[0].is_primary);
}

#[tokio::test]
async fn test_concurrent_identical_submissions_coalesce() {
    let t = test_catalog(ScriptedAuthority::new()).await;
    let catalog = Arc::new(t.catalog);

    let mut join_set = JoinSet::new();
    for _ in 0..8 {
        let catalog = Arc::clone(&catalog);
        join_set.spawn(async move {
            catalog
                .submit_listen(listen("Kenshi Yonezu", "KICK BACK", "KICK BACK", 0))
                .await
        });
    }

    let mut track_ids = Vec::new();
    while let Some(result) = join_set.join_next().await {
        track_ids.push(result.unwrap().unwrap().track.id);
    }

    assert_eq!(track_ids.len(), 8);
    assert!(track_ids.windows(2).all(|w| w[0] == w[1]));
    assert_eq!(count_rows(&t.store, "artists").await, 1);
    assert_eq!(count_rows(&t.store, "tracks").await, 1);
}

#[tokio::test]
async fn test_delete_listen_by_track_and_time() {
    let t = test_catalog(ScriptedAuthority::new()).await;

    let first = t
        .catalog
        .submit_listen(listen("Mitski", "Nobody", "Be the Cowboy", 0))
        .await
        .unwrap();
    t.catalog
        .submit_listen(listen("Mitski", "Nobody", "Be the Cowboy", 1))
        .await
        .unwrap();

    let listened_at = first.listen.unwrap().listened_at;
    t.catalog.delete_listen(first.track.id, listened_at).await.unwrap();
    // Unknown listen
    t.catalog.delete_listen(first.track.id, listened_at).await.unwrap();

    assert_eq!(
        t.catalog
            .listen_count(ListenScope::Artist(first.artists[0].id))
            .await
            .unwrap(),
        1
    );
    assert!(t
        .store
        .get_artist(ArtistLookup::Alias("Mitski".to_string()))
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn test_cancelled_submission_does_not_capture_later_one() {
    let t = test_catalog(ScriptedAuthority::new()).await;
    t.authority.set_delay(Duration::from_millis(300));

    let mut first = listen("Mitski", "Nobody", "Be the Cowboy", 0);
    first.release_mbid = Some(Uuid::new_v4());
    let cancelled =
        tokio::time::timeout(Duration::from_millis(50), t.catalog.submit_listen(first.clone())).await;
    assert!(cancelled.is_err());

    tokio::time::sleep(Duration::from_millis(400)).await;
    t.authority.set_delay(Duration::ZERO);

    let mut later = first;
    later.user_id = 2;
    later.time = at(60);
    let outcome = t.catalog.submit_listen(later).await.unwrap();

    let recorded = outcome.listen.expect("listen saved");
    assert_eq!(recorded.user_id, 2);
    assert_eq!(Some(recorded.listened_at), at(60));
    assert_eq!(t.catalog.listen_count(ListenScope::All).await.unwrap(), 1);
}

//! End-to-end acquisition behaviour against a scripted video source.
//!
//! Each scenario drives the engine (or the tiered fetcher directly) and
//! checks three things: what came back, what it cost, and which remote
//! calls were made.

mod support;

use std::sync::Arc;

use tubequota_core::{
    CacheMode, CacheStore, ChannelOutcome, CollectionRequest, CoreError, DiscoveryRequest, FetchError, FetchOptions, Operation,
    QuotaLedger, QuotaPolicy, RetryConfig, SortKey, Tier, TierPolicy, TierTracker, TieredFetcher, ValidationError,
    VideoSource,
};

use support::{channel, clock_at, engine_builder, ts, video, views, ScriptedSource};

const NOW: &str = "2024-03-08T12:00:00Z";

fn request(ids: &[&str]) -> CollectionRequest {
    CollectionRequest {
        channel_ids: ids.iter().map(|id| channel(id)).collect(),
        ..CollectionRequest::default()
    }
}

fn ids(items: &[tubequota_core::Item]) -> Vec<&str> {
    items.iter().map(|item| item.id.as_str()).collect()
}

fn two_searchable_channels() -> ScriptedSource {
    ScriptedSource::new()
        .with_search(
            "UCalpha",
            vec![
                video("a1", "UCalpha", "2024-03-05T10:00:00Z"),
                video("a2", "UCalpha", "2024-03-06T10:00:00Z"),
            ],
        )
        .with_search("UCbeta", vec![video("b1", "UCbeta", "2024-03-07T10:00:00Z")])
        .with_stats("a1", views(100))
        .with_stats("a2", views(300))
        .with_stats("b1", views(50))
}

// ============================================================================
// Ranking and tier fallback
// ============================================================================

#[tokio::test]
async fn when_channels_succeed_on_different_tiers_system_ranks_them_together() {
    // Given: two searchable channels and one that only the public feed serves
    let source = Arc::new(
        two_searchable_channels()
            .with_search_error("UCgamma", FetchError::hard_remote("forbidden", Some(403)))
            .with_uploads_error("UCgamma", FetchError::hard_remote("forbidden", Some(403)))
            .with_feed("UCgamma", vec![video("c1", "UCgamma", "2024-03-07T12:00:00Z")]),
    );
    let clock = clock_at(NOW);
    let engine = engine_builder(&source, &clock).build().expect("engine");

    // When: the collection runs
    let report = engine
        .run_collection(&request(&["UCalpha", "UCbeta", "UCgamma"]))
        .await
        .expect("collection");

    // Then: items are ranked by views, the feed item last without statistics
    assert_eq!(ids(&report.items), vec!["a2", "a1", "b1", "c1"]);
    let feed_item = &report.items[3];
    assert_eq!(feed_item.tier, Tier::Tertiary);
    assert!(feed_item.stats.is_none());
    assert!(report.complete);

    // Then: gamma is reported as demoted to the free tier
    let gamma = report
        .outcomes
        .iter()
        .find(|summary| summary.channel_id == channel("UCgamma"))
        .expect("gamma summary");
    assert!(matches!(
        gamma.outcome,
        ChannelOutcome::Succeeded {
            tier: Tier::Tertiary,
            demoted: true,
            ..
        }
    ));

    // Then: only successful calls were charged (two searches, three ids)
    assert_eq!(report.quota.consumed, 203);
    assert_eq!(report.quota.reserved, 0);
    assert_eq!(source.count("videos:"), 1);
}

#[tokio::test]
async fn when_no_channels_are_given_system_collects_from_subscriptions() {
    // Given: an account subscribed to two channels
    let source = Arc::new(two_searchable_channels().with_subscriptions(&["UCalpha", "UCbeta"]));
    let clock = clock_at(NOW);
    let engine = engine_builder(&source, &clock).build().expect("engine");

    // When: the collection runs without explicit channels
    let report = engine
        .run_collection(&CollectionRequest::default())
        .await
        .expect("collection");

    // Then: both subscriptions were collected and the listing was charged
    assert_eq!(source.count("subscriptions:"), 1);
    assert_eq!(ids(&report.items), vec!["a2", "a1", "b1"]);
    assert_eq!(report.quota.by_operation.get(&Operation::ListSubscriptions), Some(&1));
    assert_eq!(report.quota.consumed, 1 + 200 + 3);
}

#[tokio::test]
async fn when_results_are_re_ranked_system_uses_stored_statistics() {
    // Given: a finished collection
    let source = Arc::new(two_searchable_channels().with_stats("b1", views(5_000)));
    let clock = clock_at(NOW);
    let engine = engine_builder(&source, &clock).build().expect("engine");
    engine
        .run_collection(&request(&["UCalpha", "UCbeta"]))
        .await
        .expect("collection");

    // When: results are ranked by likes, keeping two
    let ranked = engine.ranked_items(SortKey::Likes, 2);

    // Then: the top two come back without another remote call
    assert_eq!(ids(&ranked), vec!["b1", "a2"]);
    assert_eq!(source.count("videos:"), 1);
}

// ============================================================================
// Failure handling
// ============================================================================

#[tokio::test]
async fn when_a_call_fails_transiently_system_retries_within_one_reservation() {
    // Given: alpha's search fails twice before answering
    let source = Arc::new(two_searchable_channels().with_transient_search_failures("UCalpha", 2));
    let clock = clock_at(NOW);
    let engine = engine_builder(&source, &clock).build().expect("engine");

    // When: the collection runs
    let report = engine
        .run_collection(&request(&["UCalpha"]))
        .await
        .expect("collection");

    // Then: three attempts were made but a single search was charged
    assert_eq!(source.count("search:UCalpha"), 3);
    assert_eq!(report.quota.by_operation.get(&Operation::Search), Some(&100));
    assert_eq!(ids(&report.items), vec!["a2", "a1"]);
}

#[tokio::test]
async fn when_a_channel_fails_hard_repeatedly_system_demotes_it() {
    // Given: a fetcher whose primary tier always fails for delta
    let source = Arc::new(
        ScriptedSource::new()
            .with_search_error("UCdelta", FetchError::hard_remote("forbidden", Some(403)))
            .with_uploads(
                "UCdelta",
                "UUdelta",
                vec![video("d1", "UCdelta", "2024-03-07T10:00:00Z")],
            ),
    );
    let clock = clock_at(NOW);
    let dyn_source: Arc<dyn VideoSource> = source.clone();
    let fetcher = TieredFetcher::new(
        dyn_source,
        CacheStore::in_memory(clock.clone()),
        Arc::new(QuotaLedger::in_memory(QuotaPolicy::default(), clock.clone())),
        TierTracker::new(TierPolicy {
            run_demotion_threshold: None,
            ..TierPolicy::default()
        }),
        RetryConfig::no_retry(),
        FetchOptions::default(),
    );
    let delta = tubequota_core::Channel::from_id(channel("UCdelta"));
    let discovery = DiscoveryRequest {
        published_after: ts("2024-03-01T00:00:00Z"),
        max_items: 10,
    };

    // When: the channel is discovered three times
    for _ in 0..3 {
        let harvest = fetcher.discover(&delta, discovery).await;
        assert_eq!(harvest.outcome.tier(), Some(Tier::Secondary));
    }

    // Then: it now starts at the secondary tier and search is no longer tried
    assert_eq!(fetcher.tiers().current_tier(&delta.id), Tier::Secondary);
    let harvest = fetcher.discover(&delta, discovery).await;
    assert_eq!(harvest.items.len(), 1);
    assert_eq!(source.count("search:"), 3);
}

#[tokio::test]
async fn when_many_channels_fail_on_one_tier_system_skips_it_for_the_rest_of_the_run() {
    // Given: six channels whose searches are all rejected
    let names = ["UCch1", "UCch2", "UCch3", "UCch4", "UCch5", "UCch6"];
    let mut scripted = ScriptedSource::new();
    for name in names {
        scripted = scripted.with_search_error(name, FetchError::hard_remote("rate limited", Some(429)));
    }
    let source = Arc::new(scripted);
    let clock = clock_at(NOW);
    let dyn_source: Arc<dyn VideoSource> = source.clone();
    let fetcher = TieredFetcher::new(
        dyn_source,
        CacheStore::in_memory(clock.clone()),
        Arc::new(QuotaLedger::in_memory(QuotaPolicy::default(), clock.clone())),
        TierTracker::new(TierPolicy::default()),
        RetryConfig::no_retry(),
        FetchOptions::default(),
    );
    let discovery = DiscoveryRequest {
        published_after: ts("2024-03-01T00:00:00Z"),
        max_items: 10,
    };

    // When: the channels are discovered one after another
    for name in names {
        let target = tubequota_core::Channel::from_id(channel(name));
        fetcher.discover(&target, discovery).await;
    }

    // Then: after five consecutive primary failures the sixth skips search
    assert_eq!(fetcher.tiers().floor(), Tier::Secondary);
    assert_eq!(source.count("search:"), 5);
    assert_eq!(source.count("channels:"), 6);
}

#[tokio::test]
async fn when_a_new_collection_starts_system_forgets_the_previous_demotions() {
    // Given: two channels whose searches are rejected, demoting the whole run
    let source = Arc::new(
        ScriptedSource::new()
            .with_search_error("UCalpha", FetchError::hard_remote("rate limited", Some(429)))
            .with_search_error("UCbeta", FetchError::hard_remote("rate limited", Some(429)))
            .with_uploads("UCalpha", "UUalpha", Vec::new())
            .with_uploads("UCbeta", "UUbeta", Vec::new()),
    );
    let clock = clock_at(NOW);
    let engine = engine_builder(&source, &clock)
        .with_max_concurrency(1)
        .with_tier_policy(TierPolicy {
            run_demotion_threshold: Some(2),
            ..TierPolicy::default()
        })
        .build()
        .expect("engine");
    let first = engine
        .run_collection(&request(&["UCalpha", "UCbeta"]))
        .await
        .expect("first run");
    assert!(first.complete);
    assert_eq!(source.count("search:"), 2);

    // When: the collection is requested again on the same engine
    engine
        .run_collection(&request(&["UCalpha", "UCbeta"]))
        .await
        .expect("second run");

    // Then: every channel starts from search again
    assert_eq!(source.count("search:"), 4);
}

#[tokio::test]
async fn when_authentication_fails_system_uses_only_the_free_tier() {
    // Given: credentials that the platform rejects
    let source = Arc::new(
        ScriptedSource::new()
            .with_search_error("UCalpha", FetchError::auth("token expired", Some(401)))
            .with_feed("UCalpha", vec![video("a1", "UCalpha", "2024-03-06T10:00:00Z")])
            .with_feed("UCbeta", vec![video("b1", "UCbeta", "2024-03-07T10:00:00Z")]),
    );
    let clock = clock_at(NOW);
    let engine = engine_builder(&source, &clock)
        .with_max_concurrency(1)
        .build()
        .expect("engine");

    // When: the collection runs
    let report = engine
        .run_collection(&request(&["UCalpha", "UCbeta"]))
        .await
        .expect("collection");

    // Then: one rejected search, no further authenticated calls, feed items only
    assert_eq!(source.count("search:"), 1);
    assert_eq!(source.count("channels:"), 0);
    assert_eq!(source.count("feed:"), 2);
    assert!(report.items.iter().all(|item| item.tier == Tier::Tertiary));
    assert_eq!(report.quota.consumed, 0);
}

// ============================================================================
// No-auth mode
// ============================================================================

#[tokio::test]
async fn when_running_without_auth_system_uses_the_public_feed_for_free() {
    // Given: no-auth mode with explicit channels
    let source = Arc::new(
        ScriptedSource::new()
            .with_feed(
                "UCalpha",
                vec![
                    video("a1", "UCalpha", "2024-03-06T10:00:00Z"),
                    video("old", "UCalpha", "2024-02-01T10:00:00Z"),
                ],
            )
            .with_feed("UCbeta", vec![video("b1", "UCbeta", "2024-03-07T10:00:00Z")]),
    );
    let clock = clock_at(NOW);
    let engine = engine_builder(&source, &clock)
        .with_fetch_options(FetchOptions {
            no_auth: true,
            ..FetchOptions::default()
        })
        .build()
        .expect("engine");

    // When: the collection runs
    let report = engine
        .run_collection(&request(&["UCalpha", "UCbeta"]))
        .await
        .expect("collection");

    // Then: only feeds were read, items outside the window dropped, nothing spent
    assert!(source.calls().iter().all(|call| call.starts_with("feed:")));
    assert_eq!(ids(&report.items), vec!["a1", "b1"]);
    assert!(report.items.iter().all(|item| item.stats.is_none()));
    assert_eq!(report.quota.consumed, 0);
    assert!(report.complete);
}

#[tokio::test]
async fn when_running_without_auth_and_without_channels_system_rejects_the_request() {
    // Given: no-auth mode and no explicit channels
    let source = Arc::new(ScriptedSource::new().with_subscriptions(&["UCalpha"]));
    let clock = clock_at(NOW);
    let engine = engine_builder(&source, &clock)
        .with_fetch_options(FetchOptions {
            no_auth: true,
            ..FetchOptions::default()
        })
        .build()
        .expect("engine");

    // When: the collection runs
    let error = engine
        .run_collection(&CollectionRequest::default())
        .await
        .expect_err("channels are required");

    // Then: the request is rejected before any remote call
    assert!(matches!(
        error,
        CoreError::Validation(ValidationError::ChannelsRequiredWithoutAuth)
    ));
    assert!(source.calls().is_empty());
}

// ============================================================================
// Cache and quota
// ============================================================================

#[tokio::test]
async fn when_the_same_collection_runs_twice_system_serves_it_from_cache() {
    // Given: a completed collection
    let source = Arc::new(two_searchable_channels());
    let clock = clock_at(NOW);
    let engine = engine_builder(&source, &clock).build().expect("engine");
    let first = engine
        .run_collection(&request(&["UCalpha", "UCbeta"]))
        .await
        .expect("first run");
    assert_eq!(first.saved_units, 0);

    // When: the same collection runs again
    let second = engine
        .run_collection(&request(&["UCalpha", "UCbeta"]))
        .await
        .expect("second run");

    // Then: nothing new was spent and the avoided units are credited
    assert!(!second.resumed);
    assert_eq!(second.quota.consumed, first.quota.consumed);
    assert_eq!(second.saved_units, 203);
    assert_eq!(source.count("search:"), 2);
    assert_eq!(source.count("videos:"), 1);
    assert_eq!(ids(&second.items), ids(&first.items));
    assert!(second.outcomes.iter().all(|summary| matches!(
        summary.outcome,
        ChannelOutcome::Succeeded { cached: true, .. }
    )));
}

#[tokio::test]
async fn when_the_cache_is_cleared_system_calls_the_source_again() {
    // Given: a completed collection
    let source = Arc::new(two_searchable_channels());
    let clock = clock_at(NOW);
    let engine = engine_builder(&source, &clock).build().expect("engine");
    engine
        .run_collection(&request(&["UCalpha"]))
        .await
        .expect("first run");

    // When: the search entries are cleared and the collection repeats
    let removed = engine.clear_cache(Some("search")).await.expect("clear");
    engine
        .run_collection(&request(&["UCalpha"]))
        .await
        .expect("second run");

    // Then: search was called again but statistics still came from cache
    assert_eq!(removed, 1);
    assert_eq!(source.count("search:"), 2);
    assert_eq!(source.count("videos:"), 1);
}

#[tokio::test]
async fn when_the_cache_is_bypassed_system_still_stores_fresh_responses() {
    // Given: a fetcher that skips cache reads
    let source = Arc::new(two_searchable_channels());
    let clock = clock_at(NOW);
    let cache = CacheStore::in_memory(clock.clone());
    let ledger = Arc::new(QuotaLedger::in_memory(QuotaPolicy::default(), clock.clone()));
    let fetcher_with = |cache_mode| {
        let dyn_source: Arc<dyn VideoSource> = source.clone();
        TieredFetcher::new(
            dyn_source,
            cache.clone(),
            ledger.clone(),
            TierTracker::new(TierPolicy::default()),
            RetryConfig::no_retry(),
            FetchOptions {
                cache_mode,
                ..FetchOptions::default()
            },
        )
    };
    let bypassing = fetcher_with(CacheMode::Refresh);
    let alpha = tubequota_core::Channel::from_id(channel("UCalpha"));
    let discovery = DiscoveryRequest {
        published_after: ts("2024-03-01T00:00:00Z"),
        max_items: 10,
    };

    // When: the same channel is discovered twice
    bypassing.discover(&alpha, discovery).await;
    bypassing.discover(&alpha, discovery).await;

    // Then: both calls reached the source, yet the response was cached
    assert_eq!(source.count("search:"), 2);
    assert!(!cache.is_empty().await);

    // When: a cache-reading fetcher asks for the same channel
    let harvest = fetcher_with(CacheMode::Use).discover(&alpha, discovery).await;

    // Then: it is served from the stored entry
    assert_eq!(source.count("search:"), 2);
    assert_eq!(harvest.items.len(), 2);
}

#[tokio::test]
async fn when_statistics_do_not_fit_the_quota_system_keeps_items_without_them() {
    // Given: a ceiling of 201 units, enough for two searches but not three ids
    let source = Arc::new(two_searchable_channels());
    let clock = clock_at(NOW);
    let engine = engine_builder(&source, &clock)
        .with_quota_policy(QuotaPolicy {
            daily_limit: 202,
            safety_buffer: 1,
            ..QuotaPolicy::default()
        })
        .build()
        .expect("engine");

    // When: the collection runs
    let report = engine
        .run_collection(&request(&["UCalpha", "UCbeta"]))
        .await
        .expect("collection");

    // Then: items are returned unranked by views and the run is resumable
    assert_eq!(ids(&report.items), vec!["a1", "a2", "b1"]);
    assert!(report.items.iter().all(|item| item.stats.is_none()));
    assert_eq!(report.enrichment.denied_batches, 1);
    assert_eq!(source.count("videos:"), 0);
    assert_eq!(report.quota.consumed, 200);
    assert!(!report.complete);
    assert!(!report.halted);
}

#[tokio::test]
async fn when_the_ceiling_is_reached_mid_run_system_falls_back_to_the_free_feed() {
    // Given: a ceiling of exactly one search
    let source = Arc::new(
        two_searchable_channels().with_feed("UCbeta", vec![video("b1", "UCbeta", "2024-03-07T10:00:00Z")]),
    );
    let clock = clock_at(NOW);
    let engine = engine_builder(&source, &clock)
        .with_quota_policy(QuotaPolicy {
            daily_limit: 101,
            safety_buffer: 1,
            ..QuotaPolicy::default()
        })
        .with_max_concurrency(1)
        .build()
        .expect("engine");

    // When: the collection runs
    let report = engine
        .run_collection(&request(&["UCalpha", "UCbeta"]))
        .await
        .expect("collection");

    // Then: beta came from the feed and enrichment waits for the next period
    assert!(report.halted);
    assert_eq!(source.count("search:UCbeta"), 0);
    assert_eq!(source.count("feed:UCbeta"), 1);
    assert_eq!(report.quota.consumed, 100);
    assert!(report.items.iter().all(|item| item.stats.is_none()));
    assert!(!report.complete);
}

// Clustering-engine properties against the in-memory store: partition
// invariants, representative priority, threshold boundaries, full rebuild.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};

use daybrief_common::{Category, NewItem, SummaryContent, Tag};
use daybrief_pipeline::dedup::run_semantic_dedup;
use daybrief_pipeline::testing::MemStore;
use daybrief_pipeline::traits::Store;

fn window_bounds() -> (DateTime<Utc>, DateTime<Utc>) {
    (
        Utc.with_ymd_and_hms(2026, 2, 6, 11, 0, 0).unwrap(),
        Utc.with_ymd_and_hms(2026, 2, 7, 11, 0, 0).unwrap(),
    )
}

async fn seed_item(
    store: &MemStore,
    source_id: i64,
    message_id: i64,
    hour: u32,
    text: &str,
    embedding: Option<Vec<f32>>,
    importance: Option<u8>,
) -> i64 {
    let item = store
        .upsert_item(&NewItem {
            source_id,
            external_message_id: message_id,
            posted_at: Utc.with_ymd_and_hms(2026, 2, 6, hour, 0, 0).unwrap(),
            edited_at: None,
            text: Some(text.to_string()),
            has_media: false,
            views: None,
            forwards: None,
            reactions: None,
            permalink: None,
            content_hash: format!("hash-{message_id}"),
            lang: None,
        })
        .await
        .unwrap();

    if let Some(embedding) = embedding {
        store.set_embedding(item.id, embedding).await.unwrap();
    }
    if let Some(importance) = importance {
        store
            .upsert_summary(
                item.id,
                &SummaryContent {
                    key_point: format!("kp-{message_id}"),
                    why_it_matters: Some("Open the post for the practical details.".to_string()),
                    tags: vec![Tag::News],
                    category: Category::OtherUseful,
                    importance,
                },
            )
            .await
            .unwrap();
    }
    item.id
}

#[tokio::test]
async fn every_embedded_item_lands_in_exactly_one_cluster() {
    let store = Arc::new(MemStore::new());
    let source = store.add_source("alpha", "Alpha");
    let (start_at, end_at) = window_bounds();
    let window = store.get_or_create_window(start_at, end_at).await.unwrap();

    let mut embedded_ids = HashSet::new();
    for n in 0..6 {
        let mut vector = vec![0.0f32; 4];
        vector[(n % 4) as usize] = 1.0;
        let id = seed_item(&store, source.id, n, 12 + n as u32 / 4, &format!("post {n}"), Some(vector), Some(3)).await;
        embedded_ids.insert(id);
    }
    // One item without an embedding: excluded from clustering entirely.
    seed_item(&store, source.id, 99, 13, "no embedding here", None, Some(5)).await;

    let stats = run_semantic_dedup(store.as_ref(), window.id, start_at, end_at, 0.9, 10)
        .await
        .unwrap();

    assert_eq!(stats.items_assigned as usize, embedded_ids.len());
    assert_eq!(stats.items_skipped_no_embedding, 1);

    let records = store.cluster_records(window.id).await.unwrap();
    let mut seen = HashSet::new();
    for record in &records {
        assert!(
            seen.insert(record.item.item_id),
            "item {} appears in more than one cluster",
            record.item.item_id
        );
    }
    assert_eq!(seen, embedded_ids);
}

#[tokio::test]
async fn higher_importance_item_claims_the_cluster() {
    let store = Arc::new(MemStore::new());
    let source = store.add_source("alpha", "Alpha");
    let (start_at, end_at) = window_bounds();
    let window = store.get_or_create_window(start_at, end_at).await.unwrap();

    // The low-importance copy is posted earlier; priority still belongs to
    // the high-importance item.
    let low = seed_item(&store, source.id, 1, 12, "minor copy", Some(vec![1.0, 0.0]), Some(2)).await;
    let high = seed_item(&store, source.id, 2, 14, "major original", Some(vec![1.0, 0.0]), Some(5)).await;

    let stats = run_semantic_dedup(store.as_ref(), window.id, start_at, end_at, 0.9, 10)
        .await
        .unwrap();
    assert_eq!(stats.clusters_created, 1);

    let records = store.cluster_records(window.id).await.unwrap();
    assert_eq!(records.len(), 2);
    for record in &records {
        assert_eq!(record.representative_item_id, Some(high));
    }
    let low_row = records.iter().find(|r| r.item.item_id == low).unwrap();
    assert!(low_row.similarity.unwrap() > 0.99);
}

#[tokio::test]
async fn below_threshold_neighbors_stay_separate() {
    let store = Arc::new(MemStore::new());
    let source = store.add_source("alpha", "Alpha");
    let (start_at, end_at) = window_bounds();
    let window = store.get_or_create_window(start_at, end_at).await.unwrap();

    // cos = 0.85, below the 0.9 threshold.
    seed_item(&store, source.id, 1, 12, "first", Some(vec![1.0, 0.0]), Some(4)).await;
    seed_item(
        &store,
        source.id,
        2,
        13,
        "second",
        Some(vec![0.85, 0.526_783]),
        Some(3),
    )
    .await;

    let stats = run_semantic_dedup(store.as_ref(), window.id, start_at, end_at, 0.9, 10)
        .await
        .unwrap();
    assert_eq!(stats.clusters_created, 2);
    assert_eq!(stats.largest_cluster_size, 1);
}

#[tokio::test]
async fn rerun_rebuilds_instead_of_accumulating() {
    let store = Arc::new(MemStore::new());
    let source = store.add_source("alpha", "Alpha");
    let (start_at, end_at) = window_bounds();
    let window = store.get_or_create_window(start_at, end_at).await.unwrap();

    seed_item(&store, source.id, 1, 12, "one", Some(vec![1.0, 0.0]), Some(4)).await;
    seed_item(&store, source.id, 2, 13, "two", Some(vec![0.0, 1.0]), Some(4)).await;

    let first = run_semantic_dedup(store.as_ref(), window.id, start_at, end_at, 0.9, 10)
        .await
        .unwrap();
    let second = run_semantic_dedup(store.as_ref(), window.id, start_at, end_at, 0.9, 10)
        .await
        .unwrap();

    assert_eq!(first.clusters_created, second.clusters_created);
    assert_eq!(store.cluster_count(window.id), 2);
    let records = store.cluster_records(window.id).await.unwrap();
    assert_eq!(records.len(), 2);
}

#[tokio::test]
async fn empty_window_produces_no_clusters() {
    let store = Arc::new(MemStore::new());
    store.add_source("alpha", "Alpha");
    let (start_at, end_at) = window_bounds();
    let window = store.get_or_create_window(start_at, end_at).await.unwrap();

    let stats = run_semantic_dedup(store.as_ref(), window.id, start_at, end_at, 0.9, 10)
        .await
        .unwrap();
    assert_eq!(stats.clusters_created, 0);
    assert_eq!(stats.items_assigned, 0);
    assert_eq!(stats.average_cluster_size, 0.0);
}

use std::collections::HashSet;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing::info;

use daybrief_common::ClusterMember;

use crate::stats::{ClusterResult, DedupStats};
use crate::traits::Store;

/// How many of the largest clusters are kept in the returned stats.
const TOP_CLUSTERS_REPORTED: usize = 10;

/// Greedy semantic clustering over the window's embedded items.
///
/// Items arrive in priority order (importance desc, earliest posted, id), so
/// the most important item always claims its duplicates first: a
/// low-importance copy of an important post surfaces under the important
/// post's representative, never the reverse. Each pass is a full rebuild;
/// clusters are never updated incrementally.
pub async fn run_semantic_dedup(
    store: &dyn Store,
    window_id: i64,
    start_at: DateTime<Utc>,
    end_at: DateTime<Utc>,
    threshold: f64,
    top_k: usize,
) -> anyhow::Result<DedupStats> {
    let started = Instant::now();

    let candidates = store.dedup_candidates(start_at, end_at).await?;
    let mut assigned: HashSet<i64> = HashSet::new();
    let mut clusters: Vec<ClusterResult> = Vec::new();

    for candidate in &candidates {
        if assigned.contains(&candidate.item_id) {
            continue;
        }

        let mut members = vec![ClusterMember {
            item_id: candidate.item_id,
            similarity: 1.0,
        }];
        assigned.insert(candidate.item_id);

        let exclude: Vec<i64> = assigned.iter().copied().collect();
        let neighbors = store
            .similar_items(start_at, end_at, &candidate.embedding, &exclude, top_k)
            .await?;

        for neighbor in neighbors {
            if neighbor.similarity < threshold {
                continue;
            }
            if !assigned.insert(neighbor.item_id) {
                continue;
            }
            members.push(ClusterMember {
                item_id: neighbor.item_id,
                similarity: neighbor.similarity,
            });
        }

        clusters.push(ClusterResult {
            representative_item_id: candidate.item_id,
            members,
        });
    }

    let items_skipped = store
        .count_items_without_embedding(start_at, end_at)
        .await?;

    // Full rebuild: clear, then persist this pass's clusters.
    store.clear_clusters(window_id).await?;
    for cluster in &clusters {
        let cluster_id = store
            .create_cluster(window_id, cluster.representative_item_id)
            .await?;
        store.add_cluster_members(cluster_id, &cluster.members).await?;
    }

    let largest = clusters
        .iter()
        .map(|cluster| cluster.members.len())
        .max()
        .unwrap_or(0);
    let average = if clusters.is_empty() {
        0.0
    } else {
        clusters.iter().map(|cluster| cluster.members.len()).sum::<usize>() as f64
            / clusters.len() as f64
    };

    let mut top_clusters = clusters.clone();
    top_clusters.sort_by(|a, b| b.members.len().cmp(&a.members.len()));
    top_clusters.truncate(TOP_CLUSTERS_REPORTED);

    let stats = DedupStats {
        clusters_created: clusters.len() as u32,
        items_assigned: assigned.len() as u32,
        items_skipped_no_embedding: items_skipped as u32,
        largest_cluster_size: largest as u32,
        average_cluster_size: average,
        duration_seconds: started.elapsed().as_secs_f64(),
        top_clusters,
    };

    info!(
        clusters = stats.clusters_created,
        assigned = stats.items_assigned,
        skipped_no_embedding = stats.items_skipped_no_embedding,
        largest = stats.largest_cluster_size,
        "Semantic dedup complete"
    );
    Ok(stats)
}

/// Cosine similarity between two vectors; 0.0 when either has zero norm.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    let dot: f64 = a.iter().zip(b.iter()).map(|(x, y)| (*x as f64) * (*y as f64)).sum();
    let norm_a: f64 = a.iter().map(|x| (*x as f64) * (*x as f64)).sum::<f64>().sqrt();
    let norm_b: f64 = b.iter().map(|x| (*x as f64) * (*x as f64)).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_of_identical_vectors_is_one() {
        let v = [0.5f32, 0.5, 0.5];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn cosine_of_orthogonal_vectors_is_zero() {
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-9);
    }

    #[test]
    fn zero_norm_yields_zero() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }
}

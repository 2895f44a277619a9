use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use tracing::{info, warn};

use ai_client::{EmbedModel, RetryPolicy};
use daybrief_common::DaybriefError;

use crate::stats::EmbedStats;
use crate::traits::Store;

/// Embed every item in the window that lacks a vector, in fixed-size
/// batches. A failing batch is recorded and skipped; the stage continues
/// with the next batch.
pub async fn run_embed(
    store: &dyn Store,
    embedder: &dyn EmbedModel,
    policy: &RetryPolicy,
    start_at: DateTime<Utc>,
    end_at: DateTime<Utc>,
    embed_dim: usize,
    batch_size: usize,
) -> anyhow::Result<EmbedStats> {
    let items = store.items_missing_embedding(start_at, end_at).await?;
    let mut stats = EmbedStats {
        total_candidates: items.len() as u32,
        ..EmbedStats::default()
    };

    let batch_count = items.len().div_ceil(batch_size.max(1));
    for (batch_index, batch) in items.chunks(batch_size.max(1)).enumerate() {
        let texts: Vec<String> = batch
            .iter()
            .map(|item| item.text.clone().unwrap_or_default())
            .collect();

        let result = policy
            .run("embed", || embedder.embed_batch(&texts))
            .await
            .map_err(anyhow::Error::from)
            .and_then(|vectors| validate_batch(vectors, batch.len(), embed_dim));

        match result {
            Ok(vectors) => {
                for (item, vector) in batch.iter().zip(vectors) {
                    store.set_embedding(item.id, vector).await?;
                    stats.embedded += 1;
                }
            }
            Err(err) => {
                warn!(
                    batch = batch_index,
                    size = batch.len(),
                    error = %err,
                    "Embedding batch failed"
                );
                stats.failed_batches += 1;
                stats.failed_items += batch.len() as u32;
            }
        }

        if batch_index + 1 < batch_count {
            let pause = Duration::from_millis(rand::rng().random_range(100..300));
            tokio::time::sleep(pause).await;
        }
    }

    info!(
        candidates = stats.total_candidates,
        embedded = stats.embedded,
        failed_batches = stats.failed_batches,
        "Embed stage done"
    );
    Ok(stats)
}

/// A batch is only usable when it has exactly one vector per input and every
/// vector has the expected dimension with all-finite components. Anything
/// else fails the batch; vectors are never zero-filled.
fn validate_batch(
    vectors: Vec<Vec<f32>>,
    expected_count: usize,
    embed_dim: usize,
) -> anyhow::Result<Vec<Vec<f32>>> {
    if vectors.len() != expected_count {
        return Err(DaybriefError::Embedding(format!(
            "batch size mismatch: expected {expected_count}, got {}",
            vectors.len()
        ))
        .into());
    }
    for vector in &vectors {
        validate_embedding(vector, embed_dim)?;
    }
    Ok(vectors)
}

pub fn validate_embedding(vector: &[f32], embed_dim: usize) -> Result<(), DaybriefError> {
    if vector.len() != embed_dim {
        return Err(DaybriefError::Embedding(format!(
            "embedding length mismatch: expected {embed_dim}, got {}",
            vector.len()
        )));
    }
    for (index, value) in vector.iter().enumerate() {
        if !value.is_finite() {
            return Err(DaybriefError::Embedding(format!(
                "embedding[{index}] must be finite"
            )));
        }
    }
    Ok(())
}

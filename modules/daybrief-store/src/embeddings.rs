use anyhow::Result;
use chrono::{DateTime, Utc};
use pgvector::Vector;
use sqlx::PgPool;

use daybrief_common::{DedupCandidate, SimilarItem};

pub async fn set(pool: &PgPool, item_id: i64, embedding: Vec<f32>) -> Result<()> {
    sqlx::query("UPDATE items SET embedding = $1 WHERE id = $2")
        .bind(Vector::from(embedding))
        .bind(item_id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn count_missing_in_window(
    pool: &PgPool,
    start_at: DateTime<Utc>,
    end_at: DateTime<Utc>,
) -> Result<u64> {
    let (count,): (i64,) = sqlx::query_as(
        "SELECT count(*) FROM items WHERE posted_at >= $1 AND posted_at < $2 AND embedding IS NULL",
    )
    .bind(start_at)
    .bind(end_at)
    .fetch_one(pool)
    .await?;
    Ok(count as u64)
}

/// Embedded items in the window in clustering priority order: most important
/// first, then earliest posted, then id. The order decides which item claims
/// duplicates as a cluster representative.
pub async fn dedup_candidates(
    pool: &PgPool,
    start_at: DateTime<Utc>,
    end_at: DateTime<Utc>,
) -> Result<Vec<DedupCandidate>> {
    let rows = sqlx::query_as::<_, (i64, DateTime<Utc>, Vector, Option<i16>)>(
        r#"
        SELECT i.id, i.posted_at, i.embedding, s.importance
        FROM items i
        LEFT JOIN summaries s ON s.item_id = i.id
        WHERE i.posted_at >= $1 AND i.posted_at < $2 AND i.embedding IS NOT NULL
        ORDER BY s.importance DESC NULLS LAST, i.posted_at ASC, i.id ASC
        "#,
    )
    .bind(start_at)
    .bind(end_at)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|(item_id, posted_at, embedding, importance)| DedupCandidate {
            item_id,
            posted_at,
            embedding: embedding.to_vec(),
            importance: importance.map(|value| value.clamp(1, 5) as u8),
        })
        .collect())
}

/// Top-k nearest neighbors of `embedding` among not-yet-assigned embedded
/// items in the window, by cosine similarity descending.
pub async fn similar_items(
    pool: &PgPool,
    start_at: DateTime<Utc>,
    end_at: DateTime<Utc>,
    embedding: &[f32],
    exclude_item_ids: &[i64],
    top_k: usize,
) -> Result<Vec<SimilarItem>> {
    if top_k == 0 {
        return Ok(Vec::new());
    }

    let rows = sqlx::query_as::<_, (i64, f64)>(
        r#"
        SELECT id, 1 - (embedding <=> $1) AS similarity
        FROM items
        WHERE posted_at >= $2 AND posted_at < $3
          AND embedding IS NOT NULL
          AND NOT (id = ANY($4))
        ORDER BY embedding <=> $1 ASC, id ASC
        LIMIT $5
        "#,
    )
    .bind(Vector::from(embedding.to_vec()))
    .bind(start_at)
    .bind(end_at)
    .bind(exclude_item_ids)
    .bind(top_k as i64)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|(item_id, similarity)| SimilarItem {
            item_id,
            similarity,
        })
        .collect())
}

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use daybrief_common::DigestRecord;

type DigestRow = (
    i64,
    i64,
    i64,
    Vec<i64>,
    String,
    Option<serde_json::Value>,
    Option<DateTime<Utc>>,
);

fn row_to_digest(row: DigestRow) -> DigestRecord {
    let (id, window_id, destination_id, message_ids, content, stats, published_at) = row;
    DigestRecord {
        id,
        window_id,
        destination_id,
        message_ids,
        content,
        stats,
        published_at,
    }
}

pub async fn find_by_window(pool: &PgPool, window_id: i64) -> Result<Option<DigestRecord>> {
    let row = sqlx::query_as::<_, DigestRow>(
        r#"
        SELECT id, window_id, destination_id, message_ids, content, stats, published_at
        FROM digests
        WHERE window_id = $1
        "#,
    )
    .bind(window_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(row_to_digest))
}

/// One digest per window; a re-publish overwrites the previous render and
/// message ids. `published_at` is the durable idempotency marker.
pub async fn upsert(
    pool: &PgPool,
    window_id: i64,
    destination_id: i64,
    message_ids: &[i64],
    content: &str,
    stats: Option<&serde_json::Value>,
    published_at: Option<DateTime<Utc>>,
) -> Result<DigestRecord> {
    let row = sqlx::query_as::<_, DigestRow>(
        r#"
        INSERT INTO digests (window_id, destination_id, message_ids, content, stats, published_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (window_id) DO UPDATE SET
            destination_id = EXCLUDED.destination_id,
            message_ids = EXCLUDED.message_ids,
            content = EXCLUDED.content,
            stats = EXCLUDED.stats,
            published_at = EXCLUDED.published_at
        RETURNING id, window_id, destination_id, message_ids, content, stats, published_at
        "#,
    )
    .bind(window_id)
    .bind(destination_id)
    .bind(message_ids)
    .bind(content)
    .bind(stats)
    .bind(published_at)
    .fetch_one(pool)
    .await?;

    Ok(row_to_digest(row))
}

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use daybrief_common::{ClusterItemRecord, ClusterMember, DigestItemRecord};

use crate::summaries::row_to_content;

/// Drop all clusters (and memberships, via cascade) for a window. Dedup is a
/// full rebuild per run.
pub async fn clear_for_window(pool: &PgPool, window_id: i64) -> Result<()> {
    sqlx::query("DELETE FROM clusters WHERE window_id = $1")
        .bind(window_id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn create(
    pool: &PgPool,
    window_id: i64,
    representative_item_id: i64,
    label: Option<&str>,
) -> Result<i64> {
    let (id,): (i64,) = sqlx::query_as(
        r#"
        INSERT INTO clusters (window_id, representative_item_id, label)
        VALUES ($1, $2, $3)
        RETURNING id
        "#,
    )
    .bind(window_id)
    .bind(representative_item_id)
    .bind(label)
    .fetch_one(pool)
    .await?;
    Ok(id)
}

pub async fn add_members(pool: &PgPool, cluster_id: i64, members: &[ClusterMember]) -> Result<()> {
    for member in members {
        sqlx::query(
            r#"
            INSERT INTO cluster_members (cluster_id, item_id, similarity)
            VALUES ($1, $2, $3)
            ON CONFLICT (cluster_id, item_id) DO NOTHING
            "#,
        )
        .bind(cluster_id)
        .bind(member.item_id)
        .bind(member.similarity)
        .execute(pool)
        .await?;
    }
    Ok(())
}

type ClusterJoinRow = (
    i64,
    Option<i64>,
    Option<f64>,
    i64,
    i64,
    String,
    Option<String>,
    DateTime<Utc>,
    Option<String>,
    Option<String>,
    String,
    Option<String>,
    Option<String>,
    Option<Vec<String>>,
    Option<String>,
    Option<i16>,
);

/// All cluster memberships for a window joined with item, source, and
/// summary, ordered by cluster then member recency.
pub async fn records_for_window(pool: &PgPool, window_id: i64) -> Result<Vec<ClusterItemRecord>> {
    let rows = sqlx::query_as::<_, ClusterJoinRow>(
        r#"
        SELECT c.id, c.representative_item_id, m.similarity,
               i.id, i.source_id, src.title, src.username,
               i.posted_at, i.text, i.permalink, i.content_hash,
               s.key_point, s.why_it_matters, s.tags, s.category, s.importance
        FROM clusters c
        JOIN cluster_members m ON m.cluster_id = c.id
        JOIN items i ON i.id = m.item_id
        JOIN sources src ON src.id = i.source_id
        LEFT JOIN summaries s ON s.item_id = i.id
        WHERE c.window_id = $1 AND src.is_active
        ORDER BY c.id ASC, i.posted_at ASC, i.id ASC
        "#,
    )
    .bind(window_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| {
            let (
                cluster_id,
                representative_item_id,
                similarity,
                item_id,
                source_id,
                source_title,
                source_username,
                posted_at,
                text,
                permalink,
                content_hash,
                key_point,
                why_it_matters,
                tags,
                category,
                importance,
            ) = row;

            let summary = match (key_point, category, importance) {
                (Some(key_point), Some(category), Some(importance)) => Some(row_to_content((
                    key_point,
                    why_it_matters,
                    tags.unwrap_or_default(),
                    category,
                    importance,
                ))),
                _ => None,
            };

            ClusterItemRecord {
                cluster_id,
                representative_item_id,
                similarity,
                item: DigestItemRecord {
                    item_id,
                    source_id,
                    source_title,
                    source_username,
                    posted_at,
                    text,
                    permalink,
                    content_hash,
                    summary,
                },
            }
        })
        .collect())
}

type DigestJoinRow = (
    i64,
    i64,
    String,
    Option<String>,
    DateTime<Utc>,
    Option<String>,
    Option<String>,
    String,
    Option<String>,
    Option<String>,
    Option<Vec<String>>,
    Option<String>,
    Option<i16>,
);

/// All items in the window from active sources joined with their summaries,
/// oldest first. The selection stage filters and ranks in memory.
pub async fn digest_items(
    pool: &PgPool,
    start_at: DateTime<Utc>,
    end_at: DateTime<Utc>,
) -> Result<Vec<DigestItemRecord>> {
    let rows = sqlx::query_as::<_, DigestJoinRow>(
        r#"
        SELECT i.id, i.source_id, src.title, src.username,
               i.posted_at, i.text, i.permalink, i.content_hash,
               s.key_point, s.why_it_matters, s.tags, s.category, s.importance
        FROM items i
        JOIN sources src ON src.id = i.source_id
        LEFT JOIN summaries s ON s.item_id = i.id
        WHERE i.posted_at >= $1 AND i.posted_at < $2 AND src.is_active
        ORDER BY i.posted_at ASC, i.id ASC
        "#,
    )
    .bind(start_at)
    .bind(end_at)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| {
            let (
                item_id,
                source_id,
                source_title,
                source_username,
                posted_at,
                text,
                permalink,
                content_hash,
                key_point,
                why_it_matters,
                tags,
                category,
                importance,
            ) = row;

            let summary = match (key_point, category, importance) {
                (Some(key_point), Some(category), Some(importance)) => Some(row_to_content((
                    key_point,
                    why_it_matters,
                    tags.unwrap_or_default(),
                    category,
                    importance,
                ))),
                _ => None,
            };

            DigestItemRecord {
                item_id,
                source_id,
                source_title,
                source_username,
                posted_at,
                text,
                permalink,
                content_hash,
                summary,
            }
        })
        .collect())
}

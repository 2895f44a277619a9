use std::collections::HashSet;

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use daybrief_common::{ContentItem, NewItem};

type ItemRow = (
    i64,
    i64,
    i64,
    DateTime<Utc>,
    Option<DateTime<Utc>>,
    Option<String>,
    bool,
    Option<i64>,
    Option<i64>,
    Option<serde_json::Value>,
    Option<String>,
    String,
    Option<String>,
    DateTime<Utc>,
);

const ITEM_COLUMNS: &str = "id, source_id, external_message_id, posted_at, edited_at, text, \
     has_media, views, forwards, reactions, permalink, content_hash, lang, created_at";

fn row_to_item(row: ItemRow) -> ContentItem {
    let (
        id,
        source_id,
        external_message_id,
        posted_at,
        edited_at,
        text,
        has_media,
        views,
        forwards,
        reactions,
        permalink,
        content_hash,
        lang,
        created_at,
    ) = row;
    ContentItem {
        id,
        source_id,
        external_message_id,
        posted_at,
        edited_at,
        text,
        has_media,
        views,
        forwards,
        reactions,
        permalink,
        content_hash,
        lang,
        created_at,
    }
}

/// Upsert on the `(source_id, external_message_id)` unique pair. A conflict
/// updates the mutable fields (text, counters, hash) in place, which is what
/// makes re-ingesting a window safe.
pub async fn upsert(pool: &PgPool, item: &NewItem) -> Result<ContentItem> {
    let row = sqlx::query_as::<_, ItemRow>(&format!(
        r#"
        INSERT INTO items (
            source_id, external_message_id, posted_at, edited_at, text, has_media,
            views, forwards, reactions, permalink, content_hash, lang
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        ON CONFLICT (source_id, external_message_id) DO UPDATE SET
            edited_at = EXCLUDED.edited_at,
            text = EXCLUDED.text,
            has_media = EXCLUDED.has_media,
            views = EXCLUDED.views,
            forwards = EXCLUDED.forwards,
            reactions = EXCLUDED.reactions,
            permalink = EXCLUDED.permalink,
            content_hash = EXCLUDED.content_hash,
            lang = EXCLUDED.lang
        RETURNING {ITEM_COLUMNS}
        "#
    ))
    .bind(item.source_id)
    .bind(item.external_message_id)
    .bind(item.posted_at)
    .bind(item.edited_at)
    .bind(&item.text)
    .bind(item.has_media)
    .bind(item.views)
    .bind(item.forwards)
    .bind(&item.reactions)
    .bind(&item.permalink)
    .bind(&item.content_hash)
    .bind(&item.lang)
    .fetch_one(pool)
    .await?;

    Ok(row_to_item(row))
}

/// Which of `candidate_ids` already exist for this source. Lets ingestion
/// report insert-vs-update counts without a second write pass.
pub async fn existing_message_ids(
    pool: &PgPool,
    source_id: i64,
    candidate_ids: &[i64],
) -> Result<HashSet<i64>> {
    if candidate_ids.is_empty() {
        return Ok(HashSet::new());
    }

    let rows = sqlx::query_as::<_, (i64,)>(
        r#"
        SELECT external_message_id
        FROM items
        WHERE source_id = $1 AND external_message_id = ANY($2)
        "#,
    )
    .bind(source_id)
    .bind(candidate_ids)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|(id,)| id).collect())
}

pub async fn count_in_window(
    pool: &PgPool,
    start_at: DateTime<Utc>,
    end_at: DateTime<Utc>,
) -> Result<u64> {
    let (count,): (i64,) = sqlx::query_as(
        "SELECT count(*) FROM items WHERE posted_at >= $1 AND posted_at < $2",
    )
    .bind(start_at)
    .bind(end_at)
    .fetch_one(pool)
    .await?;
    Ok(count as u64)
}

/// Items in the window that have no summary row yet, oldest first.
pub async fn missing_summary(
    pool: &PgPool,
    start_at: DateTime<Utc>,
    end_at: DateTime<Utc>,
) -> Result<Vec<ContentItem>> {
    let rows = sqlx::query_as::<_, ItemRow>(&format!(
        r#"
        SELECT {ITEM_COLUMNS}
        FROM items
        WHERE posted_at >= $1 AND posted_at < $2
          AND NOT EXISTS (SELECT 1 FROM summaries WHERE summaries.item_id = items.id)
        ORDER BY posted_at ASC, id ASC
        "#
    ))
    .bind(start_at)
    .bind(end_at)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(row_to_item).collect())
}

/// Items in the window that still need an embedding, oldest first.
pub async fn missing_embedding(
    pool: &PgPool,
    start_at: DateTime<Utc>,
    end_at: DateTime<Utc>,
) -> Result<Vec<ContentItem>> {
    let rows = sqlx::query_as::<_, ItemRow>(&format!(
        r#"
        SELECT {ITEM_COLUMNS}
        FROM items
        WHERE posted_at >= $1 AND posted_at < $2 AND embedding IS NULL
        ORDER BY posted_at ASC, id ASC
        "#
    ))
    .bind(start_at)
    .bind(end_at)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(row_to_item).collect())
}

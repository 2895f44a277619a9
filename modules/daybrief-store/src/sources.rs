use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use daybrief_common::Source;

type SourceRow = (
    i64,
    i64,
    Option<String>,
    String,
    bool,
    DateTime<Utc>,
    Option<DateTime<Utc>>,
);

fn row_to_source(row: SourceRow) -> Source {
    let (id, external_peer_id, username, title, is_active, added_at, last_fetched_at) = row;
    Source {
        id,
        external_peer_id,
        username,
        title,
        is_active,
        added_at,
        last_fetched_at,
    }
}

pub async fn active(pool: &PgPool) -> Result<Vec<Source>> {
    let rows = sqlx::query_as::<_, SourceRow>(
        r#"
        SELECT id, external_peer_id, username, title, is_active, added_at, last_fetched_at
        FROM sources
        WHERE is_active
        ORDER BY id ASC
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(row_to_source).collect())
}

/// Register or refresh a source by its external peer id.
pub async fn upsert(
    pool: &PgPool,
    external_peer_id: i64,
    username: Option<&str>,
    title: &str,
) -> Result<Source> {
    let row = sqlx::query_as::<_, SourceRow>(
        r#"
        INSERT INTO sources (external_peer_id, username, title)
        VALUES ($1, $2, $3)
        ON CONFLICT (external_peer_id) DO UPDATE
            SET username = EXCLUDED.username,
                title = EXCLUDED.title
        RETURNING id, external_peer_id, username, title, is_active, added_at, last_fetched_at
        "#,
    )
    .bind(external_peer_id)
    .bind(username)
    .bind(title)
    .fetch_one(pool)
    .await?;

    Ok(row_to_source(row))
}

pub async fn touch_last_fetched(pool: &PgPool, source_id: i64, at: DateTime<Utc>) -> Result<()> {
    sqlx::query("UPDATE sources SET last_fetched_at = $1 WHERE id = $2")
        .bind(at)
        .bind(source_id)
        .execute(pool)
        .await?;
    Ok(())
}

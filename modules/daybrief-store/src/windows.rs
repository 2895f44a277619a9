use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use daybrief_common::{DaybriefError, Window, WindowStatus};

type WindowRow = (i64, DateTime<Utc>, DateTime<Utc>, String, DateTime<Utc>);

fn row_to_window(row: WindowRow) -> Result<Window> {
    let (id, start_at, end_at, status, created_at) = row;
    Ok(Window {
        id,
        start_at,
        end_at,
        status: WindowStatus::parse(&status)?,
        created_at,
    })
}

/// Conflict-tolerant create: concurrent callers for the same range converge
/// on the same row.
pub async fn get_or_create(
    pool: &PgPool,
    start_at: DateTime<Utc>,
    end_at: DateTime<Utc>,
) -> Result<Window> {
    sqlx::query(
        r#"
        INSERT INTO windows (start_at, end_at)
        VALUES ($1, $2)
        ON CONFLICT (start_at, end_at) DO NOTHING
        "#,
    )
    .bind(start_at)
    .bind(end_at)
    .execute(pool)
    .await?;

    let row = sqlx::query_as::<_, WindowRow>(
        r#"
        SELECT id, start_at, end_at, status, created_at
        FROM windows
        WHERE start_at = $1 AND end_at = $2
        "#,
    )
    .bind(start_at)
    .bind(end_at)
    .fetch_one(pool)
    .await?;

    row_to_window(row)
}

pub async fn find_by_range(
    pool: &PgPool,
    start_at: DateTime<Utc>,
    end_at: DateTime<Utc>,
) -> Result<Option<Window>> {
    let row = sqlx::query_as::<_, WindowRow>(
        r#"
        SELECT id, start_at, end_at, status, created_at
        FROM windows
        WHERE start_at = $1 AND end_at = $2
        "#,
    )
    .bind(start_at)
    .bind(end_at)
    .fetch_optional(pool)
    .await?;

    row.map(row_to_window).transpose()
}

/// Unconditional status write. The orchestrator is the only caller and owns
/// transition ordering; a write failure must abort the run.
pub async fn set_status(pool: &PgPool, window_id: i64, status: WindowStatus) -> Result<()> {
    let result = sqlx::query("UPDATE windows SET status = $1 WHERE id = $2")
        .bind(status.as_str())
        .bind(window_id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(DaybriefError::Database(format!(
            "window {window_id} not found for status update"
        ))
        .into());
    }
    Ok(())
}

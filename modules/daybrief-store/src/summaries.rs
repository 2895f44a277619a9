use anyhow::Result;
use sqlx::PgPool;

use daybrief_common::{Category, SummaryContent, Tag};

type SummaryRow = (String, Option<String>, Vec<String>, String, i16);

pub(crate) fn row_to_content(row: SummaryRow) -> SummaryContent {
    let (key_point, why_it_matters, tags, category, importance) = row;
    SummaryContent {
        key_point,
        why_it_matters,
        tags: tags.iter().map(|tag| Tag::from_external(tag)).collect(),
        category: Category::from_external(&category),
        importance: importance.clamp(1, 5) as u8,
    }
}

/// Find any existing summary whose item carries this content hash. The
/// lookup is global (not window-scoped) so exact duplicates reuse summaries
/// across windows. Returns the source item id alongside the content.
pub async fn find_by_content_hash(
    pool: &PgPool,
    content_hash: &str,
) -> Result<Option<(i64, SummaryContent)>> {
    let row = sqlx::query_as::<_, (i64, String, Option<String>, Vec<String>, String, i16)>(
        r#"
        SELECT s.item_id, s.key_point, s.why_it_matters, s.tags, s.category, s.importance
        FROM summaries s
        JOIN items i ON i.id = s.item_id
        WHERE i.content_hash = $1
        ORDER BY s.item_id ASC
        LIMIT 1
        "#,
    )
    .bind(content_hash)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|(item_id, key_point, why, tags, category, importance)| {
        (
            item_id,
            row_to_content((key_point, why, tags, category, importance)),
        )
    }))
}

pub async fn upsert(pool: &PgPool, item_id: i64, content: &SummaryContent) -> Result<()> {
    let tags: Vec<String> = content
        .tags
        .iter()
        .map(|tag| tag.as_str().to_string())
        .collect();

    sqlx::query(
        r#"
        INSERT INTO summaries (item_id, key_point, why_it_matters, tags, category, importance)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (item_id) DO UPDATE SET
            key_point = EXCLUDED.key_point,
            why_it_matters = EXCLUDED.why_it_matters,
            tags = EXCLUDED.tags,
            category = EXCLUDED.category,
            importance = EXCLUDED.importance
        "#,
    )
    .bind(item_id)
    .bind(&content.key_point)
    .bind(&content.why_it_matters)
    .bind(&tags)
    .bind(content.category.as_str())
    .bind(content.importance as i16)
    .execute(pool)
    .await?;

    Ok(())
}

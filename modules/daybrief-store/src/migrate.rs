use anyhow::Result;
use sqlx::PgPool;
use tracing::info;

/// Run idempotent schema migrations. The embedding column dimension is fixed
/// at first migration; `embed_dim` must not change for the store's lifetime.
pub async fn migrate(pool: &PgPool, embed_dim: usize) -> Result<()> {
    info!("Running schema migrations...");

    sqlx::query("CREATE EXTENSION IF NOT EXISTS vector")
        .execute(pool)
        .await?;

    let statements = [
        r#"
        CREATE TABLE IF NOT EXISTS sources (
            id BIGINT GENERATED ALWAYS AS IDENTITY PRIMARY KEY,
            external_peer_id BIGINT NOT NULL UNIQUE,
            username TEXT,
            title TEXT NOT NULL,
            is_active BOOLEAN NOT NULL DEFAULT true,
            added_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            last_fetched_at TIMESTAMPTZ
        )
        "#
        .to_string(),
        format!(
            r#"
            CREATE TABLE IF NOT EXISTS items (
                id BIGINT GENERATED ALWAYS AS IDENTITY PRIMARY KEY,
                source_id BIGINT NOT NULL REFERENCES sources(id) ON DELETE CASCADE,
                external_message_id BIGINT NOT NULL,
                posted_at TIMESTAMPTZ NOT NULL,
                edited_at TIMESTAMPTZ,
                text TEXT,
                has_media BOOLEAN NOT NULL DEFAULT false,
                views BIGINT,
                forwards BIGINT,
                reactions JSONB,
                permalink TEXT,
                content_hash TEXT NOT NULL,
                lang TEXT,
                embedding vector({embed_dim}),
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                CONSTRAINT items_source_message_uidx UNIQUE (source_id, external_message_id)
            )
            "#
        ),
        r#"
        CREATE TABLE IF NOT EXISTS summaries (
            item_id BIGINT PRIMARY KEY REFERENCES items(id) ON DELETE CASCADE,
            key_point TEXT NOT NULL,
            why_it_matters TEXT,
            tags TEXT[] NOT NULL DEFAULT '{}',
            category TEXT NOT NULL DEFAULT 'OTHER_USEFUL',
            importance SMALLINT NOT NULL DEFAULT 3,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#
        .to_string(),
        r#"
        CREATE TABLE IF NOT EXISTS windows (
            id BIGINT GENERATED ALWAYS AS IDENTITY PRIMARY KEY,
            start_at TIMESTAMPTZ NOT NULL,
            end_at TIMESTAMPTZ NOT NULL,
            status TEXT NOT NULL DEFAULT 'new',
            created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            CONSTRAINT windows_range_uidx UNIQUE (start_at, end_at)
        )
        "#
        .to_string(),
        r#"
        CREATE TABLE IF NOT EXISTS clusters (
            id BIGINT GENERATED ALWAYS AS IDENTITY PRIMARY KEY,
            window_id BIGINT NOT NULL REFERENCES windows(id) ON DELETE CASCADE,
            representative_item_id BIGINT REFERENCES items(id),
            label TEXT,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#
        .to_string(),
        r#"
        CREATE TABLE IF NOT EXISTS cluster_members (
            cluster_id BIGINT NOT NULL REFERENCES clusters(id) ON DELETE CASCADE,
            item_id BIGINT NOT NULL REFERENCES items(id) ON DELETE CASCADE,
            similarity DOUBLE PRECISION,
            PRIMARY KEY (cluster_id, item_id)
        )
        "#
        .to_string(),
        r#"
        CREATE TABLE IF NOT EXISTS digests (
            id BIGINT GENERATED ALWAYS AS IDENTITY PRIMARY KEY,
            window_id BIGINT NOT NULL UNIQUE REFERENCES windows(id) ON DELETE CASCADE,
            destination_id BIGINT NOT NULL,
            message_ids BIGINT[] NOT NULL DEFAULT '{}',
            content TEXT NOT NULL,
            stats JSONB,
            published_at TIMESTAMPTZ
        )
        "#
        .to_string(),
        "CREATE INDEX IF NOT EXISTS items_posted_at_idx ON items (posted_at)".to_string(),
        "CREATE INDEX IF NOT EXISTS items_hash_idx ON items (content_hash)".to_string(),
        "CREATE INDEX IF NOT EXISTS sources_active_idx ON sources (is_active)".to_string(),
        "CREATE INDEX IF NOT EXISTS clusters_window_idx ON clusters (window_id)".to_string(),
    ];

    for statement in &statements {
        sqlx::query(statement).execute(pool).await?;
    }

    info!("Schema migrations complete");
    Ok(())
}

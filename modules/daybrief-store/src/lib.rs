pub mod clusters;
pub mod digests;
pub mod embeddings;
pub mod items;
pub mod migrate;
pub mod sources;
pub mod summaries;
pub mod windows;

use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

/// Postgres-backed store. Cheap to clone; all repositories run against the
/// shared pool.
#[derive(Clone)]
pub struct PgStore {
    pub pool: PgPool,
}

impl PgStore {
    /// Connect to Postgres and run the idempotent schema migration.
    pub async fn connect(database_url: &str, embed_dim: usize) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        migrate::migrate(&pool, embed_dim).await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

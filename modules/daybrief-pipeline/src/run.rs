use std::sync::Arc;
use std::time::Instant;

use chrono::NaiveDate;
use tracing::{error, info};

use ai_client::{ChatModel, EmbedModel, RetryPolicy};
use daybrief_common::{Config, DaybriefError, WindowStatus};

use crate::dedup::run_semantic_dedup;
use crate::embed::run_embed;
use crate::guard::RunGuard;
use crate::ingest::run_ingest;
use crate::publish::run_publish;
use crate::select::SelectionPolicy;
use crate::stats::{PipelineStats, PublishStats};
use crate::summarize::run_summarize;
use crate::traits::{Delivery, SourceTransport, Store};
use crate::window::{compute_window, today_in};

/// The state-machine driver for one window per invocation. Stages run
/// strictly in sequence; each stage's writes are committed before the next
/// stage starts, and the persisted window status always names the last
/// completed stage.
pub struct Pipeline {
    store: Arc<dyn Store>,
    transport: Arc<dyn SourceTransport>,
    chat: Arc<dyn ChatModel>,
    embedder: Arc<dyn EmbedModel>,
    delivery: Arc<dyn Delivery>,
    config: Config,
    destination_id: i64,
    retry: RetryPolicy,
    guard: RunGuard,
}

impl Pipeline {
    pub fn new(
        store: Arc<dyn Store>,
        transport: Arc<dyn SourceTransport>,
        chat: Arc<dyn ChatModel>,
        embedder: Arc<dyn EmbedModel>,
        delivery: Arc<dyn Delivery>,
        config: Config,
    ) -> Result<Self, DaybriefError> {
        let destination_id = parse_destination(&config)?;
        Ok(Self {
            store,
            transport,
            chat,
            embedder,
            delivery,
            config,
            destination_id,
            retry: RetryPolicy::default(),
            guard: RunGuard::new(),
        })
    }

    pub fn guard(&self) -> &RunGuard {
        &self.guard
    }

    /// Override the external-call retry policy (tests use a fast one).
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Run the full pipeline for a target date (today in the configured
    /// timezone when absent). Returns stats for both success and failure;
    /// the only `Err` is a rejected concurrent trigger.
    pub async fn run_daily(
        &self,
        target_date: Option<NaiveDate>,
        force: bool,
    ) -> Result<PipelineStats, DaybriefError> {
        let _permit = self.guard.acquire()?;

        let started = Instant::now();
        let mut stats = PipelineStats::default();

        let result = self.execute(target_date, force, &mut stats).await;
        stats.total_duration_seconds = started.elapsed().as_secs_f64();

        if let Err(err) = result {
            if let Some(window_id) = stats.window_id {
                if let Err(status_err) = self
                    .store
                    .set_window_status(window_id, WindowStatus::Failed)
                    .await
                {
                    error!(window_id, error = %status_err, "Failed to mark window as failed");
                }
            }
            error!(error = %err, "Pipeline run failed");
            stats.failed = true;
            stats.error = Some(err.to_string());
        }

        Ok(stats)
    }

    async fn execute(
        &self,
        target_date: Option<NaiveDate>,
        force: bool,
        stats: &mut PipelineStats,
    ) -> anyhow::Result<()> {
        let effective_date = match target_date {
            Some(date) => date,
            None => today_in(&self.config.timezone)?,
        };
        let (start_at, end_at) = compute_window(
            effective_date,
            &self.config.timezone,
            self.config.window_start_hour,
        )?;

        let window = self.store.get_or_create_window(start_at, end_at).await?;
        stats.window_id = Some(window.id);

        // Idempotency short-circuit: a published digest means this window is
        // done, whatever state a previous run died in.
        if !force {
            if let Some(existing) = self.store.digest_for_window(window.id).await? {
                if existing.published_at.is_some() {
                    info!(
                        window_id = window.id,
                        %start_at,
                        %end_at,
                        "Window already published, skipping run"
                    );
                    self.store
                        .set_window_status(window.id, WindowStatus::Published)
                        .await?;
                    stats.publish = Some(PublishStats {
                        messages_sent: 0,
                        message_ids: existing.message_ids,
                        already_published: true,
                    });
                    return Ok(());
                }
            }
        }

        info!(
            window_id = window.id,
            %start_at,
            %end_at,
            timezone = self.config.timezone.as_str(),
            "Pipeline started"
        );

        let stage = Instant::now();
        let ingest = run_ingest(self.store.as_ref(), self.transport.as_ref(), start_at, end_at).await?;
        info!(
            duration_s = stage.elapsed().as_secs_f64(),
            fetched = ingest.items_fetched,
            inserted = ingest.items_inserted,
            updated = ingest.items_updated,
            "Stage ingest done"
        );
        stats.ingest = Some(ingest);
        self.store
            .set_window_status(window.id, WindowStatus::Ingested)
            .await?;

        let stage = Instant::now();
        let summarize = run_summarize(
            self.store.as_ref(),
            self.chat.as_ref(),
            &self.retry,
            start_at,
            end_at,
        )
        .await?;
        info!(
            duration_s = stage.elapsed().as_secs_f64(),
            summarized = summarize.summarized,
            copied = summarize.copied_exact_dup,
            skipped = summarize.skipped_existing,
            errors = summarize.errors,
            "Stage summarize done"
        );
        stats.summarize = Some(summarize);
        self.store
            .set_window_status(window.id, WindowStatus::Summarized)
            .await?;

        let stage = Instant::now();
        let embed = run_embed(
            self.store.as_ref(),
            self.embedder.as_ref(),
            &self.retry,
            start_at,
            end_at,
            self.config.embed_dim,
            self.config.embed_batch_size,
        )
        .await?;
        info!(
            duration_s = stage.elapsed().as_secs_f64(),
            embedded = embed.embedded,
            failed_batches = embed.failed_batches,
            "Stage embed done"
        );
        stats.embed = Some(embed);
        self.store
            .set_window_status(window.id, WindowStatus::Embedded)
            .await?;

        let dedup = run_semantic_dedup(
            self.store.as_ref(),
            window.id,
            start_at,
            end_at,
            self.config.dedup_threshold,
            self.config.dedup_top_k,
        )
        .await?;
        stats.dedup = Some(dedup);
        self.store
            .set_window_status(window.id, WindowStatus::Deduped)
            .await?;

        let stage = Instant::now();
        let selection = SelectionPolicy::from_config(&self.config);
        let publish = run_publish(
            self.store.as_ref(),
            self.delivery.as_ref(),
            &selection,
            window.id,
            start_at,
            end_at,
            self.destination_id,
            force,
        )
        .await?;
        info!(
            duration_s = stage.elapsed().as_secs_f64(),
            messages_sent = publish.messages_sent,
            "Stage publish done"
        );
        stats.publish = Some(publish);
        self.store
            .set_window_status(window.id, WindowStatus::Published)
            .await?;

        info!(window_id = window.id, "Pipeline finished");
        Ok(())
    }
}

/// The digest destination is a numeric chat id (e.g. `-100…`).
pub fn parse_destination(config: &Config) -> Result<i64, DaybriefError> {
    let raw = config
        .digest_destination
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| {
            DaybriefError::Config("DIGEST_DESTINATION must be set for publishing".to_string())
        })?;
    raw.parse().map_err(|_| {
        DaybriefError::Config(format!(
            "DIGEST_DESTINATION must be a numeric chat id, got {raw}"
        ))
    })
}

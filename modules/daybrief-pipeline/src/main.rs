use std::sync::Arc;

use anyhow::Result;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use ai_client::OpenAi;
use daybrief_common::{Config, DaybriefError, WindowStatus};
use daybrief_pipeline::publish::run_publish;
use daybrief_pipeline::run::{parse_destination, Pipeline};
use daybrief_pipeline::scheduler::run_scheduler;
use daybrief_pipeline::select::SelectionPolicy;
use daybrief_pipeline::traits::{Delivery, SourceTransport, Store};
use daybrief_pipeline::window::compute_window;
use daybrief_store::PgStore;
use telegram_client::BotClient;

#[derive(Parser)]
#[command(name = "daybrief", about = "Daily channel digest pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the full pipeline for a date (today in the configured timezone
    /// by default).
    Run {
        #[arg(long, value_parser = parse_date)]
        date: Option<NaiveDate>,
        /// Re-publish even when the window already has a published digest.
        #[arg(long)]
        force: bool,
    },
    /// Render and publish the digest for an already-processed window.
    Publish {
        #[arg(long, value_parser = parse_date)]
        date: NaiveDate,
        #[arg(long)]
        force: bool,
    },
    /// Run the daily scheduler loop.
    Schedule,
    /// Register (or refresh) a content source.
    AddSource {
        #[arg(long)]
        peer_id: i64,
        #[arg(long)]
        username: Option<String>,
        #[arg(long)]
        title: String,
    },
    /// Apply schema migrations and exit.
    Migrate,
}

fn parse_date(raw: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| format!("expected YYYY-MM-DD, got {raw}"))
}

fn chat_model(config: &Config) -> Result<OpenAi> {
    let api_key = config
        .llm_api_key
        .as_deref()
        .ok_or_else(|| DaybriefError::Config("LLM_API_KEY must be set".to_string()))?;
    let model = config
        .llm_model
        .as_deref()
        .ok_or_else(|| DaybriefError::Config("LLM_MODEL must be set".to_string()))?;
    let embed_model = config
        .embed_model
        .as_deref()
        .ok_or_else(|| DaybriefError::Config("EMBED_MODEL must be set".to_string()))?;

    Ok(OpenAi::new(api_key, model)
        .with_base_url(&config.llm_base_url)
        .with_embedding_model(embed_model))
}

fn delivery_client(config: &Config) -> Result<BotClient> {
    let token = config
        .bot_token
        .as_deref()
        .ok_or_else(|| DaybriefError::Config("BOT_TOKEN must be set".to_string()))?;
    Ok(BotClient::new(token.to_string()))
}

/// The production source transport is deployment-specific and wired in via
/// the `SourceTransport` seam; without one configured, ingestion sees no
/// sources' posts but the pipeline remains fully operable for re-runs and
/// re-publishing of already-ingested windows.
struct NoopTransport;

#[async_trait::async_trait]
impl SourceTransport for NoopTransport {
    async fn fetch_window(
        &self,
        _source: &daybrief_common::Source,
        _start_at: chrono::DateTime<chrono::Utc>,
        _end_at: chrono::DateTime<chrono::Utc>,
    ) -> Result<Vec<daybrief_pipeline::traits::RawItem>, daybrief_pipeline::traits::TransportError>
    {
        Ok(Vec::new())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("daybrief=info".parse()?))
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();
    config.log_redacted();

    let store = PgStore::connect(&config.database_url, config.embed_dim).await?;

    match cli.command {
        Command::Migrate => {
            // PgStore::connect already ran the migrations.
            info!("Migrations applied");
        }
        Command::AddSource {
            peer_id,
            username,
            title,
        } => {
            let source =
                daybrief_store::sources::upsert(&store.pool, peer_id, username.as_deref(), &title)
                    .await?;
            info!(
                source_id = source.id,
                name = source.display_name().as_str(),
                "Source registered"
            );
        }
        Command::Run { date, force } => {
            let chat = Arc::new(chat_model(&config)?);
            let delivery = Arc::new(delivery_client(&config)?);
            let pipeline = Pipeline::new(
                Arc::new(store),
                Arc::new(NoopTransport),
                chat.clone(),
                chat,
                delivery,
                config,
            )?;
            let stats = pipeline.run_daily(date, force).await?;
            println!("{stats}");
            if stats.failed {
                std::process::exit(1);
            }
        }
        Command::Publish { date, force } => {
            let delivery = delivery_client(&config)?;
            let destination_id = parse_destination(&config)?;
            let (start_at, end_at) =
                compute_window(date, &config.timezone, config.window_start_hour)?;

            let window = store.get_or_create_window(start_at, end_at).await?;
            let policy = SelectionPolicy::from_config(&config);
            let publish = run_publish(
                &store,
                &delivery as &dyn Delivery,
                &policy,
                window.id,
                start_at,
                end_at,
                destination_id,
                force,
            )
            .await?;
            if !publish.already_published {
                store
                    .set_window_status(window.id, WindowStatus::Published)
                    .await?;
            }
            info!(
                messages_sent = publish.messages_sent,
                already_published = publish.already_published,
                "Publish complete"
            );
        }
        Command::Schedule => {
            let chat = Arc::new(chat_model(&config)?);
            let delivery = Arc::new(delivery_client(&config)?);
            let pipeline = Arc::new(Pipeline::new(
                Arc::new(store),
                Arc::new(NoopTransport),
                chat.clone(),
                chat,
                delivery,
                config.clone(),
            )?);
            run_scheduler(pipeline, &config).await?;
        }
    }

    Ok(())
}

use std::env;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Postgres
    pub database_url: String,

    // LLM provider (OpenAI-compatible endpoint)
    pub llm_api_key: Option<String>,
    pub llm_base_url: String,
    pub llm_model: Option<String>,
    pub embed_model: Option<String>,

    // Delivery
    pub bot_token: Option<String>,
    pub digest_destination: Option<String>,

    // Window / scheduling
    pub timezone: String,
    pub window_start_hour: u32,
    pub run_at_hour: u32,
    pub run_at_minute: u32,

    // Enrichment
    pub embed_dim: usize,
    pub embed_batch_size: usize,

    // Dedup
    pub dedup_threshold: f64,
    pub dedup_top_k: usize,

    // Digest selection
    pub digest_top_n: usize,
    pub source_top_k: usize,
    pub min_importance_global: u8,
    pub min_importance_source: u8,
}

impl Config {
    /// Load configuration from environment variables.
    /// Panics with a clear message if required vars are missing or malformed.
    pub fn from_env() -> Self {
        Self {
            database_url: required_env("DATABASE_URL"),
            llm_api_key: optional_env("LLM_API_KEY"),
            llm_base_url: env::var("LLM_BASE_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
            llm_model: optional_env("LLM_MODEL"),
            embed_model: optional_env("EMBED_MODEL"),
            bot_token: optional_env("BOT_TOKEN"),
            digest_destination: optional_env("DIGEST_DESTINATION"),
            timezone: env::var("TIMEZONE").unwrap_or_else(|_| "Europe/Riga".to_string()),
            window_start_hour: hour_env("WINDOW_START_HOUR", 13),
            run_at_hour: hour_env("RUN_AT_HOUR", 13),
            run_at_minute: parse_env("RUN_AT_MINUTE", 10, |v| *v <= 59, "0..=59"),
            embed_dim: parse_env("EMBED_DIM", 256, |v| *v > 0, "positive"),
            embed_batch_size: parse_env("EMBED_BATCH_SIZE", 16, |v| *v > 0, "positive"),
            dedup_threshold: parse_env("DEDUP_THRESHOLD", 0.88, |v| (0.0..=1.0).contains(v), "0.0..=1.0"),
            dedup_top_k: parse_env("DEDUP_TOP_K", 80, |v| *v > 0, "positive"),
            digest_top_n: parse_env("DIGEST_TOP_N", 10, |v| *v > 0, "positive"),
            source_top_k: parse_env("SOURCE_TOP_K", 5, |v| *v > 0, "positive"),
            min_importance_global: parse_env("MIN_IMPORTANCE_GLOBAL", 4, |v| (1..=5).contains(v), "1..=5"),
            min_importance_source: parse_env("MIN_IMPORTANCE_SOURCE", 3, |v| (1..=5).contains(v), "1..=5"),
        }
    }

    /// Log the loaded configuration without secrets.
    pub fn log_redacted(&self) {
        tracing::info!(
            timezone = self.timezone.as_str(),
            window_start_hour = self.window_start_hour,
            embed_dim = self.embed_dim,
            dedup_threshold = self.dedup_threshold,
            digest_top_n = self.digest_top_n,
            llm_configured = self.llm_api_key.is_some(),
            delivery_configured = self.bot_token.is_some(),
            "Configuration loaded"
        );
    }
}

fn required_env(key: &str) -> String {
    env::var(key).unwrap_or_else(|_| panic!("{key} environment variable is required"))
}

fn optional_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn hour_env(key: &str, default: u32) -> u32 {
    parse_env(key, default, |v| *v <= 23, "0..=23")
}

fn parse_env<T>(key: &str, default: T, valid: impl Fn(&T) -> bool, range: &str) -> T
where
    T: std::str::FromStr + Copy,
{
    let value = match env::var(key) {
        Ok(raw) => raw
            .parse()
            .unwrap_or_else(|_| panic!("{key} must be a number")),
        Err(_) => default,
    };
    if !valid(&value) {
        panic!("{key} must be in range {range}");
    }
    value
}

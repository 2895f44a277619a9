use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, TelegramError>;

#[derive(Error, Debug)]
pub enum TelegramError {
    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error("Telegram API error ({code}): {description}")]
    Api { code: i64, description: String },

    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },
}

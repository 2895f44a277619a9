pub mod error;
pub mod types;

pub use error::{Result, TelegramError};
pub use types::{ApiResponse, SentMessage};

use std::time::Duration;

use tracing::{debug, warn};

const BASE_URL: &str = "https://api.telegram.org";

/// How many times one message send is attempted when the API keeps asking
/// us to back off.
const MAX_SEND_ATTEMPTS: u32 = 5;

/// Bot API client. One instance per bot token.
pub struct BotClient {
    client: reqwest::Client,
    token: String,
    base_url: String,
}

impl BotClient {
    pub fn new(token: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            token,
            base_url: BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, url: &str) -> Self {
        self.base_url = url.trim_end_matches('/').to_string();
        self
    }

    /// Send one HTML-formatted message. Honors the `retry_after` hint on
    /// rate-limit responses before retrying, up to a bounded attempt count.
    pub async fn send_html(&self, chat_id: i64, html: &str) -> Result<i64> {
        let mut attempt = 1u32;
        loop {
            match self.send_once(chat_id, html).await {
                Ok(message) => return Ok(message.message_id),
                Err(TelegramError::RateLimited { retry_after }) if attempt < MAX_SEND_ATTEMPTS => {
                    warn!(
                        chat_id,
                        attempt,
                        retry_after_secs = retry_after.as_secs(),
                        "Delivery rate limited, waiting before retry"
                    );
                    tokio::time::sleep(retry_after).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn send_once(&self, chat_id: i64, html: &str) -> Result<SentMessage> {
        let url = format!("{}/bot{}/sendMessage", self.base_url, self.token);
        let resp = self
            .client
            .post(&url)
            .json(&serde_json::json!({
                "chat_id": chat_id,
                "text": html,
                "parse_mode": "HTML",
                "disable_web_page_preview": true,
            }))
            .send()
            .await?;

        let body: ApiResponse<SentMessage> = resp.json().await?;
        if body.ok {
            let message = body
                .result
                .ok_or_else(|| TelegramError::Api {
                    code: 0,
                    description: "ok response without result".to_string(),
                })?;
            debug!(chat_id, message_id = message.message_id, "Message sent");
            return Ok(message);
        }

        if let Some(retry_after) = body.parameters.and_then(|p| p.retry_after) {
            return Err(TelegramError::RateLimited {
                retry_after: Duration::from_secs(retry_after),
            });
        }
        Err(TelegramError::Api {
            code: body.error_code.unwrap_or(0),
            description: body.description.unwrap_or_default(),
        })
    }
}

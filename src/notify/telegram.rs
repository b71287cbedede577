use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::{Config, DELIVERY_TIMEOUT_SECS};
use crate::error::{AppError, Result};
use crate::notify::NotificationSink;

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
}

#[derive(Deserialize)]
struct BotReply {
    ok: bool,
    description: Option<String>,
}

/// Delivers alerts as Telegram bot messages; the user id is the chat id.
pub struct TelegramSink {
    client: reqwest::Client,
    send_url: String,
}

impl TelegramSink {
    pub fn new(cfg: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(DELIVERY_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            client,
            send_url: send_message_url(&cfg.telegram_api_url, &cfg.telegram_token),
        })
    }
}

fn send_message_url(api_url: &str, token: &str) -> String {
    format!("{}/bot{}/sendMessage", api_url.trim_end_matches('/'), token)
}

#[async_trait]
impl NotificationSink for TelegramSink {
    async fn send(&self, user_id: &str, text: &str) -> Result<()> {
        let resp = self
            .client
            .post(&self.send_url)
            .json(&SendMessage { chat_id: user_id, text })
            .send()
            .await
            .map_err(|e| AppError::Delivery(format!("sendMessage failed: {e}")))?;

        let status = resp.status();
        let reply: BotReply = resp
            .json()
            .await
            .map_err(|e| AppError::Delivery(format!("sendMessage returned {status} with unreadable body: {e}")))?;
        if !reply.ok {
            return Err(AppError::Delivery(format!(
                "sendMessage rejected ({status}): {}",
                reply.description.unwrap_or_default()
            )));
        }
        Ok(())
    }
}

pub mod dispatcher;
pub mod message;
pub mod telegram;

use async_trait::async_trait;

use crate::error::Result;

pub use dispatcher::NotificationDispatcher;
pub use telegram::TelegramSink;

/// Outbound channel to a user. Failures surface as `AppError::Delivery`.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn send(&self, user_id: &str, text: &str) -> Result<()>;
}

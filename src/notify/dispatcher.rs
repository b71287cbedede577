use std::sync::Arc;

use tracing::{error, info};

use crate::api::health::HealthState;
use crate::error::Result;
use crate::notify::message::render_alert;
use crate::notify::NotificationSink;
use crate::types::LotMatch;

/// Renders matches and pushes them through the notification sink.
pub struct NotificationDispatcher {
    sink: Arc<dyn NotificationSink>,
    health: Arc<HealthState>,
}

impl NotificationDispatcher {
    pub fn new(sink: Arc<dyn NotificationSink>, health: Arc<HealthState>) -> Self {
        Self { sink, health }
    }

    /// Send already-rendered text to a user.
    pub async fn notify(&self, user_id: &str, text: &str) -> Result<()> {
        self.sink.send(user_id, text).await
    }

    /// Announce a match to the filter owner. Delivery failures are logged and
    /// counted, never returned: a dead chat must not stall the poll loop.
    pub async fn dispatch(&self, m: &LotMatch) -> bool {
        let text = render_alert(m);
        match self.notify(&m.filter.owner_id, &text).await {
            Ok(()) => {
                self.health.inc_notifications_sent();
                info!(
                    user_id = %m.filter.owner_id,
                    item_id = %m.listing.item_id,
                    filter_id = m.filter.id,
                    price_type = %m.basis.price_type,
                    total_price = m.basis.total_price,
                    "Notification sent"
                );
                true
            }
            Err(e) => {
                self.health.inc_delivery_failures();
                error!(user_id = %m.filter.owner_id, filter_id = m.filter.id, "Failed to send notification: {e}");
                false
            }
        }
    }
}

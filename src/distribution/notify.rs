//! Notification Dispatcher
//! Mission: Tell the next reviewer and the investors when a distribution moves
//!
//! Delivery is fire-and-forget. A committed state change is never rolled back because a
//! notifier failed; failures are logged and dropped.

use crate::distribution::approval::ApprovalRole;
use crate::models::{Money, PaymentStatus};
use anyhow::{Context, Result};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum DistributionEvent {
    /// Distribution is waiting on `stage`
    AwaitingApproval {
        distribution_id: String,
        distribution_number: String,
        asset_manager_id: String,
        stage: ApprovalRole,
    },
    Approved {
        distribution_id: String,
        distribution_number: String,
    },
    PaymentUpdated {
        distribution_id: String,
        distribution_number: String,
        investor_id: String,
        payment_status: PaymentStatus,
        net_amount: Money,
    },
    Completed {
        distribution_id: String,
        distribution_number: String,
    },
    Cancelled {
        distribution_id: String,
        distribution_number: String,
        reason: String,
    },
}

impl DistributionEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            DistributionEvent::AwaitingApproval { .. } => "awaiting_approval",
            DistributionEvent::Approved { .. } => "approved",
            DistributionEvent::PaymentUpdated { .. } => "payment_updated",
            DistributionEvent::Completed { .. } => "completed",
            DistributionEvent::Cancelled { .. } => "cancelled",
        }
    }

    pub fn distribution_number(&self) -> &str {
        match self {
            DistributionEvent::AwaitingApproval {
                distribution_number,
                ..
            }
            | DistributionEvent::Approved {
                distribution_number,
                ..
            }
            | DistributionEvent::PaymentUpdated {
                distribution_number,
                ..
            }
            | DistributionEvent::Completed {
                distribution_number,
                ..
            }
            | DistributionEvent::Cancelled {
                distribution_number,
                ..
            } => distribution_number,
        }
    }
}

#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: &DistributionEvent) -> Result<()>;
}

/// Writes events to the log. Default when no webhook is configured.
pub struct LogNotifier;

#[async_trait::async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, event: &DistributionEvent) -> Result<()> {
        info!(
            "📣 {} {}: {}",
            event.distribution_number(),
            event.kind(),
            serde_json::to_string(event)?
        );
        Ok(())
    }
}

/// POSTs each event as JSON to a downstream notification service.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build notification HTTP client")?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait::async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, event: &DistributionEvent) -> Result<()> {
        self.client
            .post(&self.url)
            .json(event)
            .send()
            .await
            .with_context(|| format!("deliver {} to {}", event.kind(), self.url))?
            .error_for_status()
            .context("notification endpoint rejected event")?;
        Ok(())
    }
}

#[derive(Clone)]
pub struct NotificationDispatcher {
    notifier: Arc<dyn Notifier>,
}

impl NotificationDispatcher {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self { notifier }
    }

    /// Must be called from inside a Tokio runtime.
    pub fn dispatch(&self, event: DistributionEvent) {
        let notifier = self.notifier.clone();
        tokio::spawn(async move {
            if let Err(e) = notifier.notify(&event).await {
                warn!(
                    "Notification {} for {} failed: {:#}",
                    event.kind(),
                    event.distribution_number(),
                    e
                );
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    struct ChannelNotifier(mpsc::UnboundedSender<DistributionEvent>);

    #[async_trait::async_trait]
    impl Notifier for ChannelNotifier {
        async fn notify(&self, event: &DistributionEvent) -> Result<()> {
            self.0.send(event.clone())?;
            Ok(())
        }
    }

    fn approved() -> DistributionEvent {
        DistributionEvent::Approved {
            distribution_id: "d1".to_string(),
            distribution_number: "DIST-2026-00001".to_string(),
        }
    }

    #[tokio::test]
    async fn test_dispatch_delivers_event() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let dispatcher = NotificationDispatcher::new(Arc::new(ChannelNotifier(tx)));

        dispatcher.dispatch(approved());

        let event = rx.recv().await.unwrap();
        assert_eq!(event, approved());
    }

    #[test]
    fn test_event_serialization_is_tagged() {
        let json = serde_json::to_value(DistributionEvent::AwaitingApproval {
            distribution_id: "d1".to_string(),
            distribution_number: "DIST-2026-00001".to_string(),
            asset_manager_id: "am-1".to_string(),
            stage: ApprovalRole::Compliance,
        })
        .unwrap();
        assert_eq!(json["event"], "awaiting_approval");
        assert_eq!(json["stage"], "compliance");
    }

    #[tokio::test]
    async fn test_webhook_failure_is_an_error() {
        // Nothing listens on port 9 (discard) in test environments
        let notifier =
            WebhookNotifier::new("http://127.0.0.1:9/hook", Duration::from_millis(200)).unwrap();
        assert!(notifier.notify(&approved()).await.is_err());
    }
}

use crate::settings::{self, NotificationSettings, SettingsStore};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

pub const BACKUP_COMPLETE_TITLE: &str = "Backup Complete";
pub const BACKUP_FAILED_TITLE: &str = "Backup Failed";

/// External notification sender. Never required for correctness.
#[async_trait]
pub trait Notifier: Send + Sync + std::fmt::Debug {
    /// Returns whether the notification was delivered
    async fn send(&self, title: &str, message: &str) -> bool;
}

/// Used when notifications are switched off entirely
#[derive(Debug, Default, Clone)]
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn send(&self, title: &str, _message: &str) -> bool {
        debug!("Notification '{}' dropped: no notifier configured", title);
        false
    }
}

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    title: &'a str,
    body: &'a str,
}

/// POSTs `{title, body}` to the URL in the stored notification settings
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: Client,
    settings_store: Arc<dyn SettingsStore>,
}

impl WebhookNotifier {
    pub fn new(settings_store: Arc<dyn SettingsStore>) -> reqwest::Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self {
            client,
            settings_store,
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, title: &str, message: &str) -> bool {
        let notification_settings: NotificationSettings =
            match settings::load(self.settings_store.as_ref()).await {
                Ok(s) => s,
                Err(e) => {
                    error!("Failed to load notification settings: {}", e);
                    return false;
                }
            };

        let url = match (&notification_settings.enabled, &notification_settings.url) {
            (true, Some(url)) if !url.trim().is_empty() => url.clone(),
            _ => {
                debug!("Notification '{}' skipped: notifications disabled", title);
                return false;
            }
        };

        let result = self
            .client
            .post(&url)
            .json(&WebhookPayload {
                title,
                body: message,
            })
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                info!("Sent notification '{}'", title);
                true
            }
            Ok(response) => {
                error!(
                    "Notification '{}' rejected with status {}",
                    title,
                    response.status()
                );
                false
            }
            Err(e) => {
                error!("Failed to send notification '{}': {}", title, e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::InMemorySettingsStore;

    #[tokio::test]
    async fn test_noop_notifier_reports_not_delivered() {
        assert!(!NoopNotifier.send(BACKUP_COMPLETE_TITLE, "done").await);
    }

    #[tokio::test]
    async fn test_webhook_disabled_sends_nothing() {
        let store = Arc::new(InMemorySettingsStore::new());
        let notifier = WebhookNotifier::new(store).unwrap();
        assert!(!notifier.send(BACKUP_FAILED_TITLE, "boom").await);
    }

    #[tokio::test]
    async fn test_webhook_unreachable_returns_false() {
        let store = Arc::new(InMemorySettingsStore::new());
        settings::save(
            store.as_ref(),
            &NotificationSettings {
                enabled: true,
                url: Some("http://127.0.0.1:9/hook".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let notifier = WebhookNotifier::new(store).unwrap();
        assert!(!notifier.send(BACKUP_COMPLETE_TITLE, "done").await);
    }
}

//! 迁移结束通知

use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub enum MigrationOutcome {
    #[serde(rename = "completed")]
    Completed,
    #[serde(rename = "failed")]
    Failed,
}

/// 通知内容
#[derive(Debug, Clone, Serialize)]
pub struct MigrationEvent {
    pub migration_id: String,
    pub job_id: String,
    pub outcome: MigrationOutcome,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

#[async_trait]
pub trait MigrationNotifier: Send + Sync {
    async fn notify(&self, event: &MigrationEvent);
}

/// 只写日志
pub struct LogNotifier;

#[async_trait]
impl MigrationNotifier for LogNotifier {
    async fn notify(&self, event: &MigrationEvent) {
        match event.outcome {
            MigrationOutcome::Completed => tracing::info!(
                "Migration {} job {} completed with {} warning(s)",
                event.migration_id,
                event.job_id,
                event.warnings.len()
            ),
            MigrationOutcome::Failed => tracing::error!(
                "Migration {} job {} failed: {}",
                event.migration_id,
                event.job_id,
                event.errors.join("; ")
            ),
        }
    }
}

/// 以 JSON POST 到配置的地址，发送失败只记录日志
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }

    async fn send(&self, event: &MigrationEvent) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let response = self
            .client
            .post(&self.url)
            .json(event)
            .timeout(Duration::from_secs(10))
            .send()
            .await?;

        if !response.status().is_success() {
            let error_text = response.text().await?;
            return Err(format!("Webhook responded with error: {}", error_text).into());
        }

        Ok(())
    }
}

#[async_trait]
impl MigrationNotifier for WebhookNotifier {
    async fn notify(&self, event: &MigrationEvent) {
        LogNotifier.notify(event).await;
        match self.send(event).await {
            Ok(()) => tracing::info!("Sent migration notification to {}", self.url),
            Err(e) => tracing::error!("Failed to send migration notification: {}", e),
        }
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct RecordingNotifier {
        pub events: Mutex<Vec<MigrationEvent>>,
    }

    #[async_trait]
    impl MigrationNotifier for RecordingNotifier {
        async fn notify(&self, event: &MigrationEvent) {
            if let Ok(mut events) = self.events.lock() {
                events.push(event.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_json() {
        let event = MigrationEvent {
            migration_id: "m1".into(),
            job_id: "j1".into(),
            outcome: MigrationOutcome::Failed,
            errors: vec!["boom".into()],
            warnings: vec![],
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["outcome"], "failed");
        assert_eq!(json["errors"][0], "boom");
    }

    #[tokio::test]
    async fn test_webhook_failure_is_not_fatal() {
        let notifier = WebhookNotifier::new("http://127.0.0.1:9/unreachable");
        let event = MigrationEvent {
            migration_id: "m1".into(),
            job_id: "j1".into(),
            outcome: MigrationOutcome::Completed,
            errors: vec![],
            warnings: vec![],
        };
        notifier.notify(&event).await;
    }
}

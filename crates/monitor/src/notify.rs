//! Best-effort delivery of intent transitions and operator alerts.
//!
//! `notify` never blocks the caller: notifications go onto a bounded queue
//! drained by a background task that fans out to every configured sink.

use std::time::Duration;

use async_trait::async_trait;
use metrics::counter;
use serde_json::json;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use xfer_bridge_domain::config::NotifierConfig;
use xfer_bridge_domain::model::{ChainId, StateChange};
use xfer_bridge_domain::services::METRIC_NOTIFICATIONS_DROPPED;

const TELEGRAM_API: &str = "https://api.telegram.org";
const DEFAULT_QUEUE: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    Transition(StateChange),
    Alert { chain: ChainId, message: String },
}

impl Notification {
    pub fn alert(chain: &ChainId, message: impl Into<String>) -> Self {
        Self::Alert {
            chain: chain.clone(),
            message: message.into(),
        }
    }

    pub fn render(&self) -> String {
        match self {
            Notification::Transition(change) => format!(
                "[{}] intent {}: {} -> {}\n{}",
                change.chain, change.intent_id, change.from, change.to, change.detail
            ),
            Notification::Alert { chain, message } => format!("[{chain}] ALERT: {message}"),
        }
    }
}

pub trait Notifier: Send + Sync {
    fn notify(&self, notification: Notification);

    fn notify_all(&self, changes: Vec<StateChange>) {
        for change in changes {
            self.notify(Notification::Transition(change));
        }
    }
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification transport failed: {0}")]
    Transport(String),
    #[error("notification rejected with status {0}")]
    Rejected(u16),
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    fn name(&self) -> &'static str;
    async fn deliver(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Writes every notification to the tracing log.
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn deliver(&self, notification: &Notification) -> Result<(), NotifyError> {
        match notification {
            Notification::Transition(change) => info!(
                chain = %change.chain,
                intent_id = %change.intent_id,
                from = %change.from,
                to = %change.to,
                detail = %change.detail,
                "intent transition"
            ),
            Notification::Alert { chain, message } => {
                warn!(chain = %chain, message = %message, "operator alert")
            }
        }
        Ok(())
    }
}

/// Telegram Bot API `sendMessage` sink.
pub struct TelegramSink {
    http: reqwest::Client,
    base_url: String,
    bot_token: String,
    chat_id: String,
}

impl TelegramSink {
    pub fn new(bot_token: impl Into<String>, chat_id: impl Into<String>) -> Self {
        Self::with_base_url(TELEGRAM_API, bot_token, chat_id)
    }

    pub fn with_base_url(
        base_url: impl Into<String>,
        bot_token: impl Into<String>,
        chat_id: impl Into<String>,
    ) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self {
            http,
            base_url: base_url.into(),
            bot_token: bot_token.into(),
            chat_id: chat_id.into(),
        }
    }
}

#[async_trait]
impl NotificationSink for TelegramSink {
    fn name(&self) -> &'static str {
        "telegram"
    }

    async fn deliver(&self, notification: &Notification) -> Result<(), NotifyError> {
        let url = format!("{}/bot{}/sendMessage", self.base_url, self.bot_token);
        let response = self
            .http
            .post(url)
            .json(&json!({
                "chat_id": self.chat_id,
                "text": notification.render(),
                "disable_web_page_preview": true,
            }))
            .send()
            .await
            .map_err(|err| NotifyError::Transport(err.to_string()))?;
        if !response.status().is_success() {
            return Err(NotifyError::Rejected(response.status().as_u16()));
        }
        Ok(())
    }
}

/// Queue-backed [`Notifier`]. Cloning shares the same queue.
#[derive(Clone)]
pub struct ChannelNotifier {
    tx: mpsc::Sender<Notification>,
}

impl ChannelNotifier {
    /// Spawns the delivery task. It ends once every `ChannelNotifier` clone
    /// is dropped and the queue is drained.
    pub fn spawn(sinks: Vec<Box<dyn NotificationSink>>, capacity: usize) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<Notification>(capacity.max(1));
        let handle = tokio::spawn(async move {
            while let Some(notification) = rx.recv().await {
                for sink in &sinks {
                    if let Err(err) = sink.deliver(&notification).await {
                        warn!(sink = sink.name(), error = %err, "notification delivery failed");
                    }
                }
            }
        });
        (Self { tx }, handle)
    }

    /// Log sink always, Telegram when configured and not disabled.
    pub fn from_config(config: &NotifierConfig) -> (Self, JoinHandle<()>) {
        let mut sinks: Vec<Box<dyn NotificationSink>> = vec![Box::new(LogSink)];
        if let Some((token, chat)) = config.telegram() {
            sinks.push(Box::new(TelegramSink::new(token, chat)));
        }
        Self::spawn(sinks, DEFAULT_QUEUE)
    }
}

impl Notifier for ChannelNotifier {
    fn notify(&self, notification: Notification) {
        if let Err(err) = self.tx.try_send(notification) {
            counter!(METRIC_NOTIFICATIONS_DROPPED).increment(1);
            warn!(error = %err, "notification dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::{Arc, Mutex};
    use xfer_bridge_domain::model::{IntentId, IntentState};

    struct CollectingSink(Arc<Mutex<Vec<String>>>);

    #[async_trait]
    impl NotificationSink for CollectingSink {
        fn name(&self) -> &'static str {
            "collect"
        }

        async fn deliver(&self, notification: &Notification) -> Result<(), NotifyError> {
            self.0.lock().unwrap().push(notification.render());
            Ok(())
        }
    }

    struct FailingSink;

    #[async_trait]
    impl NotificationSink for FailingSink {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn deliver(&self, _notification: &Notification) -> Result<(), NotifyError> {
            Err(NotifyError::Rejected(500))
        }
    }

    fn change() -> StateChange {
        StateChange {
            intent_id: IntentId::parse("intent-1").unwrap(),
            chain: ChainId::parse("ethereum").unwrap(),
            from: IntentState::Confirming,
            to: IntentState::Confirmed,
            at: Utc::now(),
            detail: "6 confirmations reached".to_string(),
        }
    }

    #[tokio::test]
    async fn failing_sink_does_not_stop_delivery() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (notifier, handle) = ChannelNotifier::spawn(
            vec![Box::new(FailingSink), Box::new(CollectingSink(seen.clone()))],
            8,
        );
        notifier.notify(Notification::Transition(change()));
        notifier.notify(Notification::alert(&change().chain, "chain paused"));
        drop(notifier);
        handle.await.unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert!(seen[0].contains("confirming -> confirmed"));
        assert!(seen[1].contains("ALERT: chain paused"));
    }

    #[tokio::test]
    async fn full_queue_drops_without_blocking() {
        let (tx, _rx) = mpsc::channel(1);
        let notifier = ChannelNotifier { tx };
        notifier.notify(Notification::Transition(change()));
        notifier.notify(Notification::Transition(change()));
    }

    #[tokio::test]
    async fn telegram_sink_posts_send_message() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/bottest_token/sendMessage")
            .match_header("content-type", "application/json")
            .match_body(mockito::Matcher::PartialJson(json!({"chat_id": "42"})))
            .with_status(200)
            .with_body(r#"{"ok": true, "result": {}}"#)
            .create_async()
            .await;

        let sink = TelegramSink::with_base_url(server.url(), "test_token", "42");
        sink.deliver(&Notification::Transition(change())).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn telegram_rejection_is_reported() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/bottest_token/sendMessage")
            .with_status(403)
            .create_async()
            .await;

        let sink = TelegramSink::with_base_url(server.url(), "test_token", "42");
        let err = sink
            .deliver(&Notification::alert(&change().chain, "x"))
            .await
            .unwrap_err();
        assert!(matches!(err, NotifyError::Rejected(403)));
    }
}

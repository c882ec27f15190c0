use crate::domain::models::ChatMessage;
use crate::infrastructure::realtime::{RealtimeClient, RealtimeEvent};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Duration as TokioDuration, sleep};

const DEFAULT_RECONNECT_DELAY_MS: u64 = 2_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// `apply` is the single entry point for both the optimistic local echo and
/// pushed events, so a message arriving twice keeps exactly one entry;
/// insertion keeps `createdAt` non-decreasing.
#[derive(Debug, Default)]
pub struct ChatFeed {
    messages: Vec<ChatMessage>,
    seen: HashSet<String>,
}

impl ChatFeed {
    pub fn apply(&mut self, message: ChatMessage) -> bool {
        let id = message.id.trim().to_string();
        if id.is_empty() || !self.seen.insert(id) {
            return false;
        }

        let position = self
            .messages
            .iter()
            .rposition(|existing| existing.created_at <= message.created_at)
            .map(|index| index + 1)
            .unwrap_or(0);
        self.messages.insert(position, message);
        true
    }

    pub fn replace_all(&mut self, messages: Vec<ChatMessage>) {
        self.messages.clear();
        self.seen.clear();
        for message in messages {
            self.apply(message);
        }
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollDirective {
    AutoScroll,
    ShowNewMessageNotice,
}

// Viewport policy only; the message itself is always kept.
pub fn follow_policy(near_bottom: bool) -> ScrollDirective {
    if near_bottom {
        ScrollDirective::AutoScroll
    } else {
        ScrollDirective::ShowNewMessageNotice
    }
}

/// Folds pushed create events into the shared feed. Connection loss
/// schedules exactly one reconnect attempt at a fixed delay; `shutdown`
/// cancels the subscription and any pending attempt synchronously, after
/// which stray deliveries are no-ops.
pub struct RealtimeReconciler<R>
where
    R: RealtimeClient,
{
    client: Arc<R>,
    channels: Vec<String>,
    feed: Arc<Mutex<ChatFeed>>,
    state: Arc<Mutex<ConnectionState>>,
    reconnect_delay: TokioDuration,
    shutdown: Arc<AtomicBool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl<R> RealtimeReconciler<R>
where
    R: RealtimeClient + 'static,
{
    pub fn new(client: Arc<R>, channels: Vec<String>) -> Self {
        Self {
            client,
            channels,
            feed: Arc::new(Mutex::new(ChatFeed::default())),
            state: Arc::new(Mutex::new(ConnectionState::Disconnected)),
            reconnect_delay: TokioDuration::from_millis(DEFAULT_RECONNECT_DELAY_MS),
            shutdown: Arc::new(AtomicBool::new(false)),
            task: Mutex::new(None),
        }
    }

    pub fn with_reconnect_delay(mut self, delay: TokioDuration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.state.lock().expect("state lock poisoned")
    }

    pub fn feed_snapshot(&self) -> Vec<ChatMessage> {
        self.feed
            .lock()
            .expect("feed lock poisoned")
            .messages()
            .to_vec()
    }

    pub fn replace_feed(&self, messages: Vec<ChatMessage>) {
        self.feed
            .lock()
            .expect("feed lock poisoned")
            .replace_all(messages);
    }

    // Applies a locally created message ahead of its pushed copy.
    pub fn apply_local_echo(&self, message: ChatMessage) -> bool {
        self.feed.lock().expect("feed lock poisoned").apply(message)
    }

    pub fn start(&self) {
        let mut task = self.task.lock().expect("task lock poisoned");
        if task.is_some() {
            return;
        }

        let client = Arc::clone(&self.client);
        let channels = self.channels.clone();
        let feed = Arc::clone(&self.feed);
        let state = Arc::clone(&self.state);
        let shutdown = Arc::clone(&self.shutdown);
        let reconnect_delay = self.reconnect_delay;

        *task = Some(tokio::spawn(async move {
            Self::run(client, channels, feed, state, shutdown, reconnect_delay).await;
        }));
    }

    // Aborting the task also cancels a pending reconnect sleep, so no
    // further attempt can fire.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.task.lock().expect("task lock poisoned").take() {
            handle.abort();
        }
        Self::set_state(&self.state, ConnectionState::Disconnected);
    }

    async fn run(
        client: Arc<R>,
        channels: Vec<String>,
        feed: Arc<Mutex<ChatFeed>>,
        state: Arc<Mutex<ConnectionState>>,
        shutdown: Arc<AtomicBool>,
        reconnect_delay: TokioDuration,
    ) {
        loop {
            if shutdown.load(Ordering::SeqCst) {
                break;
            }
            Self::set_state(&state, ConnectionState::Connecting);

            if let Ok(mut events) = client.connect(&channels).await {
                Self::set_state(&state, ConnectionState::Connected);
                while let Some(event) = events.recv().await {
                    if shutdown.load(Ordering::SeqCst) {
                        break;
                    }
                    Self::apply_event(&feed, event);
                }
            }

            if shutdown.load(Ordering::SeqCst) {
                break;
            }
            Self::set_state(&state, ConnectionState::Reconnecting);
            sleep(reconnect_delay).await;
        }
        Self::set_state(&state, ConnectionState::Disconnected);
    }

    fn apply_event(feed: &Arc<Mutex<ChatFeed>>, event: RealtimeEvent) {
        if !event.is_create() {
            return;
        }
        let Ok(message) = serde_json::from_value::<ChatMessage>(event.payload) else {
            return;
        };
        feed.lock().expect("feed lock poisoned").apply(message);
    }

    fn set_state(state: &Arc<Mutex<ConnectionState>>, next: ConnectionState) {
        *state.lock().expect("state lock poisoned") = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::realtime::{ConnectScript, InMemoryRealtimeClient};
    use chrono::{DateTime, Utc};

    fn fixed_time(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value)
            .expect("valid datetime")
            .with_timezone(&Utc)
    }

    fn message(id: &str, at: &str) -> ChatMessage {
        ChatMessage {
            id: id.to_string(),
            content: format!("content of {id}"),
            user_id: "usr-1".to_string(),
            user_name: "leon".to_string(),
            user_avatar: None,
            created_at: fixed_time(at),
        }
    }

    fn create_event(message: &ChatMessage) -> RealtimeEvent {
        RealtimeEvent {
            events: vec![
                "databases.main.collections.messages.documents.*.create".to_string(),
            ],
            payload: serde_json::to_value(message).expect("serialize message"),
        }
    }

    async fn wait_until(mut check: impl FnMut() -> bool) {
        for _ in 0..200 {
            if check() {
                return;
            }
            sleep(TokioDuration::from_millis(5)).await;
        }
        panic!("condition was not reached in time");
    }

    #[test]
    fn feed_deduplicates_by_id() {
        let mut feed = ChatFeed::default();
        assert!(feed.apply(message("msg-1", "2026-03-02T10:00:00Z")));
        assert!(!feed.apply(message("msg-1", "2026-03-02T10:00:00Z")));
        assert_eq!(feed.len(), 1);
    }

    #[test]
    fn feed_keeps_created_at_order_for_late_arrivals() {
        let mut feed = ChatFeed::default();
        feed.apply(message("msg-2", "2026-03-02T10:01:00Z"));
        feed.apply(message("msg-3", "2026-03-02T10:02:00Z"));
        feed.apply(message("msg-1", "2026-03-02T10:00:00Z"));

        let ids: Vec<&str> = feed
            .messages()
            .iter()
            .map(|message| message.id.as_str())
            .collect();
        assert_eq!(ids, vec!["msg-1", "msg-2", "msg-3"]);
    }

    #[test]
    fn feed_replace_all_resets_previous_view() {
        let mut feed = ChatFeed::default();
        feed.apply(message("old", "2026-03-02T09:00:00Z"));
        feed.replace_all(vec![
            message("new-2", "2026-03-02T10:01:00Z"),
            message("new-1", "2026-03-02T10:00:00Z"),
        ]);

        assert_eq!(feed.len(), 2);
        assert_eq!(feed.messages()[0].id, "new-1");
        // The replaced id is accepted again.
        assert!(feed.apply(message("old", "2026-03-02T11:00:00Z")));
    }

    #[test]
    fn follow_policy_only_scrolls_near_bottom() {
        assert_eq!(follow_policy(true), ScrollDirective::AutoScroll);
        assert_eq!(follow_policy(false), ScrollDirective::ShowNewMessageNotice);
    }

    #[tokio::test]
    async fn echo_then_push_results_in_one_entry() {
        let client = Arc::new(InMemoryRealtimeClient::default());
        let reconciler = RealtimeReconciler::new(Arc::clone(&client), Vec::new())
            .with_reconnect_delay(TokioDuration::from_millis(10));
        reconciler.start();
        wait_until(|| reconciler.connection_state() == ConnectionState::Connected).await;

        let sent = message("msg-1", "2026-03-02T10:00:00Z");
        assert!(reconciler.apply_local_echo(sent.clone()));
        client.push(create_event(&sent));
        sleep(TokioDuration::from_millis(50)).await;

        assert_eq!(reconciler.feed_snapshot().len(), 1);
        reconciler.shutdown();
    }

    #[tokio::test]
    async fn failed_connect_is_retried_after_the_fixed_delay() {
        let client = Arc::new(InMemoryRealtimeClient::with_scripts(vec![
            ConnectScript::Reject,
            ConnectScript::Accept,
        ]));
        let reconciler = RealtimeReconciler::new(Arc::clone(&client), Vec::new())
            .with_reconnect_delay(TokioDuration::from_millis(10));
        reconciler.start();

        wait_until(|| client.connect_calls() >= 2).await;
        wait_until(|| reconciler.connection_state() == ConnectionState::Connected).await;

        let pushed = message("msg-1", "2026-03-02T10:00:00Z");
        client.push(create_event(&pushed));
        wait_until(|| reconciler.feed_snapshot().len() == 1).await;
        reconciler.shutdown();
    }

    #[tokio::test]
    async fn dropped_connection_reconnects() {
        let client = Arc::new(InMemoryRealtimeClient::default());
        let reconciler = RealtimeReconciler::new(Arc::clone(&client), Vec::new())
            .with_reconnect_delay(TokioDuration::from_millis(10));
        reconciler.start();
        wait_until(|| client.connect_calls() == 1).await;

        client.drop_connections();
        wait_until(|| client.connect_calls() >= 2).await;
        reconciler.shutdown();
    }

    #[tokio::test]
    async fn shutdown_cancels_the_subscription_and_pending_events() {
        let client = Arc::new(InMemoryRealtimeClient::default());
        let reconciler = RealtimeReconciler::new(Arc::clone(&client), Vec::new())
            .with_reconnect_delay(TokioDuration::from_millis(10));
        reconciler.start();
        wait_until(|| reconciler.connection_state() == ConnectionState::Connected).await;

        let first = message("msg-1", "2026-03-02T10:00:00Z");
        client.push(create_event(&first));
        wait_until(|| reconciler.feed_snapshot().len() == 1).await;

        reconciler.shutdown();
        assert_eq!(reconciler.connection_state(), ConnectionState::Disconnected);

        let late = message("msg-2", "2026-03-02T10:01:00Z");
        client.push(create_event(&late));
        sleep(TokioDuration::from_millis(50)).await;

        assert_eq!(reconciler.feed_snapshot().len(), 1);
        // No reconnect attempt fires after teardown either.
        assert_eq!(client.connect_calls(), 1);
    }

    #[tokio::test]
    async fn non_create_and_malformed_events_are_ignored() {
        let client = Arc::new(InMemoryRealtimeClient::default());
        let reconciler = RealtimeReconciler::new(Arc::clone(&client), Vec::new())
            .with_reconnect_delay(TokioDuration::from_millis(10));
        reconciler.start();
        wait_until(|| reconciler.connection_state() == ConnectionState::Connected).await;

        client.push(RealtimeEvent {
            events: vec![
                "databases.main.collections.messages.documents.*.update".to_string(),
            ],
            payload: serde_json::to_value(message("msg-1", "2026-03-02T10:00:00Z"))
                .expect("serialize message"),
        });
        client.push(RealtimeEvent {
            events: vec![
                "databases.main.collections.messages.documents.*.create".to_string(),
            ],
            payload: serde_json::json!({"not": "a message"}),
        });
        sleep(TokioDuration::from_millis(50)).await;

        assert!(reconciler.feed_snapshot().is_empty());
        reconciler.shutdown();
    }
}

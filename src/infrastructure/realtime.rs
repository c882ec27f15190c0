use crate::infrastructure::error::InfraError;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::mpsc;

const EVENT_BUFFER: usize = 64;

// Delivery is at-least-once with per-channel ordering.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct RealtimeEvent {
    pub events: Vec<String>,
    pub payload: serde_json::Value,
}

impl RealtimeEvent {
    pub fn is_create(&self) -> bool {
        self.events.iter().any(|name| name.ends_with(".create"))
    }
}

pub fn document_channel(database_id: &str, collection_id: &str) -> String {
    format!("databases.{database_id}.collections.{collection_id}.documents")
}

/// Seam for the push connection; the websocket wire client belongs to the
/// platform SDK. A closed receiver means the connection dropped and the
/// subscriber decides whether to reconnect.
#[async_trait]
pub trait RealtimeClient: Send + Sync {
    async fn connect(
        &self,
        channels: &[String],
    ) -> Result<mpsc::Receiver<RealtimeEvent>, InfraError>;
}

// Each connect consumes one scripted outcome (accept by default); accepted
// connections stay open until drop_connections and deliver whatever push
// sends.
#[derive(Debug, Default)]
pub struct InMemoryRealtimeClient {
    scripts: Mutex<VecDeque<ConnectScript>>,
    senders: Mutex<Vec<mpsc::Sender<RealtimeEvent>>>,
    connect_calls: AtomicUsize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectScript {
    Accept,
    Reject,
}

impl InMemoryRealtimeClient {
    pub fn with_scripts(scripts: Vec<ConnectScript>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            ..Self::default()
        }
    }

    pub fn connect_calls(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }

    pub fn push(&self, event: RealtimeEvent) {
        let senders = self.senders.lock().expect("senders lock poisoned");
        for sender in senders.iter() {
            let _ = sender.try_send(event.clone());
        }
    }

    // Closes every open connection, as a dropped websocket would.
    pub fn drop_connections(&self) {
        let mut senders = self.senders.lock().expect("senders lock poisoned");
        senders.clear();
    }
}

#[async_trait]
impl RealtimeClient for InMemoryRealtimeClient {
    async fn connect(
        &self,
        _channels: &[String],
    ) -> Result<mpsc::Receiver<RealtimeEvent>, InfraError> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);

        let script = self
            .scripts
            .lock()
            .expect("scripts lock poisoned")
            .pop_front()
            .unwrap_or(ConnectScript::Accept);
        if script == ConnectScript::Reject {
            return Err(InfraError::Unavailable(
                "scripted realtime connect failure".to_string(),
            ));
        }

        let (sender, receiver) = mpsc::channel(EVENT_BUFFER);
        self.senders
            .lock()
            .expect("senders lock poisoned")
            .push(sender);
        Ok(receiver)
    }
}

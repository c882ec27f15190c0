use crate::domain::models::{ChatMessage, NewChatMessage};
use crate::infrastructure::config::StoreEndpoints;
use crate::infrastructure::error::InfraError;
use async_trait::async_trait;
use reqwest::Client;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use url::Url;

/// `list_recent` returns the newest `limit` messages in ascending
/// `createdAt` order.
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn create_message(
        &self,
        session_token: &str,
        message: &NewChatMessage,
    ) -> Result<ChatMessage, InfraError>;

    async fn list_recent(
        &self,
        session_token: &str,
        limit: u32,
    ) -> Result<Vec<ChatMessage>, InfraError>;
}

#[derive(Debug, Clone)]
pub struct ReqwestMessageStore {
    client: Client,
    endpoint: String,
    project_id: String,
    database_id: String,
    collection_id: String,
}

#[derive(Debug, serde::Deserialize)]
struct ListDocumentsResponse {
    documents: Vec<ChatMessage>,
}

impl ReqwestMessageStore {
    pub fn new(endpoints: &StoreEndpoints) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoints.endpoint.clone(),
            project_id: endpoints.project_id.clone(),
            database_id: endpoints.database_id.clone(),
            collection_id: endpoints.messages_collection_id.clone(),
        }
    }

    fn documents_endpoint(&self) -> Result<Url, InfraError> {
        let mut url = Url::parse(&self.endpoint).map_err(|error| {
            InfraError::InvalidConfig(format!("invalid store endpoint url: {error}"))
        })?;
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                InfraError::InvalidConfig("store endpoint URL cannot be a base".to_string())
            })?;
            segments.push("databases");
            segments.push(&self.database_id);
            segments.push("collections");
            segments.push(&self.collection_id);
            segments.push("documents");
        }
        Ok(url)
    }

    fn http_error(context: &str, status: reqwest::StatusCode, body: &str) -> InfraError {
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return InfraError::Unauthorized(format!(
                "{context}: http {}; body={body}",
                status.as_u16()
            ));
        }
        InfraError::Unavailable(format!("{context}: http {}; body={body}", status.as_u16()))
    }
}

#[async_trait]
impl MessageStore for ReqwestMessageStore {
    async fn create_message(
        &self,
        session_token: &str,
        message: &NewChatMessage,
    ) -> Result<ChatMessage, InfraError> {
        message
            .validate()
            .map_err(InfraError::InvalidDocument)?;

        let payload = serde_json::json!({
            "documentId": "unique()",
            "data": message,
            "permissions": [
                "read(\"any\")",
                format!("update(\"user:{}\")", message.user_id),
                format!("delete(\"user:{}\")", message.user_id),
            ],
        });

        let response = self
            .client
            .post(self.documents_endpoint()?)
            .header("X-Appwrite-Project", &self.project_id)
            .header("X-Appwrite-Session", session_token)
            .json(&payload)
            .send()
            .await
            .map_err(|error| {
                InfraError::Unavailable(format!("network error while creating message: {error}"))
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|error| {
            InfraError::Unavailable(format!("failed reading message create response: {error}"))
        })?;

        if !status.is_success() {
            return Err(Self::http_error("message create error", status, &body));
        }

        serde_json::from_str::<ChatMessage>(&body).map_err(|error| {
            InfraError::Unavailable(format!("invalid message create payload: {error}; body={body}"))
        })
    }

    async fn list_recent(
        &self,
        session_token: &str,
        limit: u32,
    ) -> Result<Vec<ChatMessage>, InfraError> {
        let queries = [
            serde_json::json!({"method": "orderDesc", "attribute": "createdAt"}).to_string(),
            serde_json::json!({"method": "limit", "values": [limit]}).to_string(),
        ];

        let response = self
            .client
            .get(self.documents_endpoint()?)
            .header("X-Appwrite-Project", &self.project_id)
            .header("X-Appwrite-Session", session_token)
            .query(&[("queries[]", &queries[0]), ("queries[]", &queries[1])])
            .send()
            .await
            .map_err(|error| {
                InfraError::Unavailable(format!("network error while listing messages: {error}"))
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|error| {
            InfraError::Unavailable(format!("failed reading message list response: {error}"))
        })?;

        if !status.is_success() {
            return Err(Self::http_error("message list error", status, &body));
        }

        let parsed: ListDocumentsResponse = serde_json::from_str(&body).map_err(|error| {
            InfraError::Unavailable(format!("invalid message list payload: {error}; body={body}"))
        })?;

        // The query is newest-first; the view wants ascending.
        let mut messages = parsed.documents;
        messages.reverse();
        Ok(messages)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryMessageStore {
    messages: Mutex<Vec<ChatMessage>>,
    next_id: AtomicU64,
    create_calls: AtomicU64,
}

impl InMemoryMessageStore {
    pub fn seed(&self, messages: Vec<ChatMessage>) {
        let mut stored = self.messages.lock().expect("messages lock poisoned");
        *stored = messages;
    }

    pub fn create_calls(&self) -> u64 {
        self.create_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
    async fn create_message(
        &self,
        _session_token: &str,
        message: &NewChatMessage,
    ) -> Result<ChatMessage, InfraError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        message
            .validate()
            .map_err(InfraError::InvalidDocument)?;

        let sequence = self.next_id.fetch_add(1, Ordering::Relaxed);
        let created = ChatMessage {
            id: format!("msg-{sequence}"),
            content: message.content.clone(),
            user_id: message.user_id.clone(),
            user_name: message.user_name.clone(),
            user_avatar: message.user_avatar.clone(),
            created_at: message.created_at,
        };

        let mut stored = self.messages.lock().expect("messages lock poisoned");
        stored.push(created.clone());
        Ok(created)
    }

    async fn list_recent(
        &self,
        _session_token: &str,
        limit: u32,
    ) -> Result<Vec<ChatMessage>, InfraError> {
        let stored = self.messages.lock().expect("messages lock poisoned");
        let mut messages = stored.clone();
        messages.sort_by(|left, right| left.created_at.cmp(&right.created_at));
        let skip = messages.len().saturating_sub(limit as usize);
        Ok(messages.split_off(skip))
    }
}

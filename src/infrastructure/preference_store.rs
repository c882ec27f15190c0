use crate::infrastructure::config::StoreEndpoints;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::prefs_codec::PreferenceDocument;
use async_trait::async_trait;
use reqwest::Client;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use url::Url;

/// The store offers no transactions; `merge_write_prefs` reads the full
/// document, overlays only the given keys and writes the whole merged object
/// back, returning the document the service confirmed.
#[async_trait]
pub trait PreferenceStore: Send + Sync {
    async fn read_prefs(&self, session_token: &str) -> Result<PreferenceDocument, InfraError>;

    async fn merge_write_prefs(
        &self,
        session_token: &str,
        partial: PreferenceDocument,
    ) -> Result<PreferenceDocument, InfraError>;
}

#[derive(Debug, Clone)]
pub struct ReqwestPreferenceStore {
    client: Client,
    endpoint: String,
    project_id: String,
}

impl ReqwestPreferenceStore {
    pub fn new(endpoints: &StoreEndpoints) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoints.endpoint.clone(),
            project_id: endpoints.project_id.clone(),
        }
    }

    fn ensure_non_empty(value: &str, field: &str) -> Result<(), InfraError> {
        if value.trim().is_empty() {
            return Err(InfraError::Unauthorized(format!(
                "{field} must not be empty"
            )));
        }
        Ok(())
    }

    fn prefs_endpoint(&self) -> Result<Url, InfraError> {
        let mut url = Url::parse(&self.endpoint).map_err(|error| {
            InfraError::InvalidConfig(format!("invalid store endpoint url: {error}"))
        })?;
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                InfraError::InvalidConfig("store endpoint URL cannot be a base".to_string())
            })?;
            segments.push("account");
            segments.push("prefs");
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
        let message = if body.trim().is_empty() {
            format!("{context}: http {}", status.as_u16())
        } else {
            format!("{context}: http {}; body={body}", status.as_u16())
        };
        InfraError::Unavailable(message)
    }

    fn prefs_from_value(value: serde_json::Value, context: &str) -> Result<PreferenceDocument, InfraError> {
        match value {
            serde_json::Value::Object(object) => Ok(object),
            other => Err(InfraError::Unavailable(format!(
                "{context}: expected object, got {other}"
            ))),
        }
    }
}

#[async_trait]
impl PreferenceStore for ReqwestPreferenceStore {
    async fn read_prefs(&self, session_token: &str) -> Result<PreferenceDocument, InfraError> {
        Self::ensure_non_empty(session_token, "session token")?;

        let response = self
            .client
            .get(self.prefs_endpoint()?)
            .header("X-Appwrite-Project", &self.project_id)
            .header("X-Appwrite-Session", session_token)
            .send()
            .await
            .map_err(|error| {
                InfraError::Unavailable(format!("network error while reading prefs: {error}"))
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|error| {
            InfraError::Unavailable(format!("failed reading prefs response: {error}"))
        })?;

        if !status.is_success() {
            return Err(Self::http_error("prefs read error", status, &body));
        }

        let parsed: serde_json::Value = serde_json::from_str(&body).map_err(|error| {
            InfraError::Unavailable(format!("invalid prefs payload: {error}; body={body}"))
        })?;
        Self::prefs_from_value(parsed, "prefs read")
    }

    async fn merge_write_prefs(
        &self,
        session_token: &str,
        partial: PreferenceDocument,
    ) -> Result<PreferenceDocument, InfraError> {
        Self::ensure_non_empty(session_token, "session token")?;

        // The update endpoint replaces the whole prefs object, so the fresh
        // read here is what keeps concurrently-written fields alive.
        let mut merged = self.read_prefs(session_token).await?;
        for (key, value) in partial {
            merged.insert(key, value);
        }

        let response = self
            .client
            .patch(self.prefs_endpoint()?)
            .header("X-Appwrite-Project", &self.project_id)
            .header("X-Appwrite-Session", session_token)
            .json(&serde_json::json!({ "prefs": merged.clone() }))
            .send()
            .await
            .map_err(|error| {
                InfraError::Unavailable(format!("network error while writing prefs: {error}"))
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|error| {
            InfraError::Unavailable(format!("failed reading prefs write response: {error}"))
        })?;

        if !status.is_success() {
            return Err(Self::http_error("prefs write error", status, &body));
        }

        let parsed: serde_json::Value = serde_json::from_str(&body).map_err(|error| {
            InfraError::Unavailable(format!("invalid prefs write payload: {error}; body={body}"))
        })?;
        let confirmed = parsed
            .get("prefs")
            .cloned()
            .unwrap_or(serde_json::Value::Object(merged));
        Self::prefs_from_value(confirmed, "prefs write")
    }
}

// Failures are scripted per call type; apply_external plays the part of
// another session writing the same document.
#[derive(Debug, Default)]
pub struct InMemoryPreferenceStore {
    prefs: Mutex<PreferenceDocument>,
    fail_next_reads: AtomicUsize,
    fail_next_writes: AtomicUsize,
    read_calls: AtomicUsize,
    write_calls: AtomicUsize,
}

impl InMemoryPreferenceStore {
    pub fn with_prefs(initial: PreferenceDocument) -> Self {
        Self {
            prefs: Mutex::new(initial),
            ..Self::default()
        }
    }

    pub fn fail_reads(&self, count: usize) {
        self.fail_next_reads.store(count, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, count: usize) {
        self.fail_next_writes.store(count, Ordering::SeqCst);
    }

    pub fn read_calls(&self) -> usize {
        self.read_calls.load(Ordering::SeqCst)
    }

    pub fn write_calls(&self) -> usize {
        self.write_calls.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> PreferenceDocument {
        self.prefs.lock().expect("prefs lock poisoned").clone()
    }

    pub fn apply_external(&self, partial: PreferenceDocument) {
        let mut prefs = self.prefs.lock().expect("prefs lock poisoned");
        for (key, value) in partial {
            prefs.insert(key, value);
        }
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |remaining| {
                remaining.checked_sub(1)
            })
            .is_ok()
    }
}

#[async_trait]
impl PreferenceStore for InMemoryPreferenceStore {
    async fn read_prefs(&self, _session_token: &str) -> Result<PreferenceDocument, InfraError> {
        self.read_calls.fetch_add(1, Ordering::SeqCst);
        if Self::take_failure(&self.fail_next_reads) {
            return Err(InfraError::Unavailable(
                "scripted outage while reading prefs".to_string(),
            ));
        }
        Ok(self.snapshot())
    }

    async fn merge_write_prefs(
        &self,
        _session_token: &str,
        partial: PreferenceDocument,
    ) -> Result<PreferenceDocument, InfraError> {
        self.write_calls.fetch_add(1, Ordering::SeqCst);
        if Self::take_failure(&self.fail_next_writes) {
            return Err(InfraError::Unavailable(
                "scripted outage while writing prefs".to_string(),
            ));
        }

        let mut prefs = self.prefs.lock().expect("prefs lock poisoned");
        for (key, value) in partial {
            prefs.insert(key, value);
        }
        Ok(prefs.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn partial(key: &str, value: &str) -> PreferenceDocument {
        let mut doc = PreferenceDocument::new();
        doc.insert(
            key.to_string(),
            serde_json::Value::String(value.to_string()),
        );
        doc
    }

    #[tokio::test]
    async fn merge_write_preserves_unrelated_keys() {
        let store = InMemoryPreferenceStore::with_prefs(partial("avatarUrl", "https://a/b.png"));

        let confirmed = store
            .merge_write_prefs("session", partial("microLeons", "120"))
            .await
            .expect("merge write");

        assert_eq!(
            confirmed.get("avatarUrl").and_then(|value| value.as_str()),
            Some("https://a/b.png")
        );
        assert_eq!(
            confirmed.get("microLeons").and_then(|value| value.as_str()),
            Some("120")
        );
    }

    #[tokio::test]
    async fn scripted_failures_consume_one_call_each() {
        let store = InMemoryPreferenceStore::default();
        store.fail_writes(1);

        let first = store
            .merge_write_prefs("session", partial("microLeons", "10"))
            .await;
        assert!(matches!(first, Err(InfraError::Unavailable(_))));
        assert!(store.snapshot().is_empty());

        let second = store
            .merge_write_prefs("session", partial("microLeons", "10"))
            .await;
        assert!(second.is_ok());
        assert_eq!(store.write_calls(), 2);
    }

    #[tokio::test]
    async fn external_writes_are_visible_to_the_next_read() {
        let store = InMemoryPreferenceStore::default();
        store.apply_external(partial("microLeons", "999"));

        let prefs = store.read_prefs("session").await.expect("read prefs");
        assert_eq!(
            prefs.get("microLeons").and_then(|value| value.as_str()),
            Some("999")
        );
    }
}

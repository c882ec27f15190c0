use crate::domain::models::StickerFile;
use crate::infrastructure::config::StoreEndpoints;
use crate::infrastructure::error::InfraError;
use async_trait::async_trait;
use reqwest::Client;
use std::sync::atomic::{AtomicUsize, Ordering};
use url::Url;

#[async_trait]
pub trait StickerCatalog: Send + Sync {
    async fn list(&self, session_token: &str) -> Result<Vec<StickerFile>, InfraError>;

    fn resolve_view_url(&self, file_id: &str) -> Result<String, InfraError>;
}

#[derive(Debug, Clone)]
pub struct ReqwestStickerCatalog {
    client: Client,
    endpoint: String,
    project_id: String,
    bucket_id: String,
}

#[derive(Debug, serde::Deserialize)]
struct ListFilesResponse {
    files: Option<Vec<BucketFile>>,
}

#[derive(Debug, serde::Deserialize)]
struct BucketFile {
    #[serde(rename = "$id")]
    id: String,
    name: Option<String>,
}

impl ReqwestStickerCatalog {
    pub fn new(endpoints: &StoreEndpoints) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoints.endpoint.clone(),
            project_id: endpoints.project_id.clone(),
            bucket_id: endpoints.stickers_bucket_id.clone(),
        }
    }

    fn files_endpoint(&self) -> Result<Url, InfraError> {
        let mut url = Url::parse(&self.endpoint).map_err(|error| {
            InfraError::InvalidConfig(format!("invalid store endpoint url: {error}"))
        })?;
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                InfraError::InvalidConfig("store endpoint URL cannot be a base".to_string())
            })?;
            segments.push("storage");
            segments.push("buckets");
            segments.push(&self.bucket_id);
            segments.push("files");
        }
        Ok(url)
    }
}

#[async_trait]
impl StickerCatalog for ReqwestStickerCatalog {
    async fn list(&self, session_token: &str) -> Result<Vec<StickerFile>, InfraError> {
        let response = self
            .client
            .get(self.files_endpoint()?)
            .header("X-Appwrite-Project", &self.project_id)
            .header("X-Appwrite-Session", session_token)
            .send()
            .await
            .map_err(|error| {
                InfraError::Unavailable(format!("network error while listing stickers: {error}"))
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|error| {
            InfraError::Unavailable(format!("failed reading sticker list response: {error}"))
        })?;

        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(InfraError::Unauthorized(format!(
                "sticker list error: http {}; body={body}",
                status.as_u16()
            )));
        }
        if !status.is_success() {
            return Err(InfraError::Unavailable(format!(
                "sticker list error: http {}; body={body}",
                status.as_u16()
            )));
        }

        let parsed: ListFilesResponse = serde_json::from_str(&body).map_err(|error| {
            InfraError::Unavailable(format!("invalid sticker list payload: {error}; body={body}"))
        })?;

        Ok(parsed
            .files
            .unwrap_or_default()
            .into_iter()
            .filter_map(|file| {
                let id = file.id.trim();
                if id.is_empty() {
                    return None;
                }
                let name = file
                    .name
                    .unwrap_or_else(|| id.to_string())
                    .trim()
                    .to_string();
                Some(StickerFile {
                    id: id.to_string(),
                    name,
                })
            })
            .collect())
    }

    fn resolve_view_url(&self, file_id: &str) -> Result<String, InfraError> {
        if file_id.trim().is_empty() {
            return Err(InfraError::InvalidDocument(
                "sticker file id must not be empty".to_string(),
            ));
        }
        let mut url = self.files_endpoint()?;
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                InfraError::InvalidConfig("store endpoint URL cannot be a base".to_string())
            })?;
            segments.push(file_id.trim());
            segments.push("view");
        }
        url.query_pairs_mut().append_pair("project", &self.project_id);
        Ok(url.to_string())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryStickerCatalog {
    files: Vec<StickerFile>,
    list_calls: AtomicUsize,
}

impl InMemoryStickerCatalog {
    pub fn with_files(files: Vec<StickerFile>) -> Self {
        Self {
            files,
            list_calls: AtomicUsize::new(0),
        }
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StickerCatalog for InMemoryStickerCatalog {
    async fn list(&self, _session_token: &str) -> Result<Vec<StickerFile>, InfraError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.files.clone())
    }

    fn resolve_view_url(&self, file_id: &str) -> Result<String, InfraError> {
        Ok(format!("memory://stickers/{file_id}"))
    }
}

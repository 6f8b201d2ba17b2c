use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

const DRIVE_API_BASE: &str = "https://www.googleapis.com/";
const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";
const RELATED_BOUNDARY: &str = "archive_related_boundary";

/// Folder-per-notebook hierarchical object store. Folder resolution is
/// idempotent; object creation tolerates duplicate names; visibility changes
/// never roll back a created object.
#[async_trait]
pub trait ArchiveStore: Send + Sync {
    async fn find_or_create_folder(&self, name: &str, parent_id: &str) -> Result<String>;

    async fn create_object(
        &self,
        folder_id: &str,
        name: &str,
        bytes: Vec<u8>,
        mime_type: &str,
    ) -> Result<String>;

    async fn make_public(&self, object_id: &str) -> Result<()>;
}

pub struct DriveClient {
    http: Client,
    base_url: Url,
    access_token: String,
}

impl DriveClient {
    pub fn new(access_token: String) -> Self {
        let base_url = Url::parse(DRIVE_API_BASE).expect("valid default Drive URL");
        Self::with_base_url(access_token, base_url)
    }

    pub fn with_base_url(access_token: String, base_url: Url) -> Self {
        let http = Client::builder()
            .user_agent("tg-poembot/0.1")
            .build()
            .expect("reqwest client");
        Self {
            http,
            base_url,
            access_token,
        }
    }

    fn bearer(&self) -> String {
        format!("Bearer {}", self.access_token)
    }
}

/// Exact-name lookup under one parent, excluding trashed entries. Single
/// quotes and backslashes in the name are escaped for the query language.
pub fn folder_query(name: &str, parent_id: &str) -> String {
    let escaped = name.replace('\\', "\\\\").replace('\'', "\\'");
    format!(
        "name = '{}' and '{}' in parents and mimeType = '{}' and trashed = false",
        escaped, parent_id, FOLDER_MIME_TYPE
    )
}

pub fn build_object_metadata(name: &str, folder_id: &str, mime_type: &str) -> Value {
    json!({
        "name": name,
        "parents": [folder_id],
        "mimeType": mime_type,
    })
}

/// Drive uploads need a `multipart/related` body (metadata JSON part then the
/// media part); reqwest's multipart support only emits form-data, so the body
/// is assembled by hand around a fixed boundary.
pub fn build_related_body(metadata: &Value, mime_type: &str, bytes: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(bytes.len() + 512);
    body.extend_from_slice(format!("--{}\r\n", RELATED_BOUNDARY).as_bytes());
    body.extend_from_slice(b"Content-Type: application/json; charset=UTF-8\r\n\r\n");
    body.extend_from_slice(metadata.to_string().as_bytes());
    body.extend_from_slice(format!("\r\n--{}\r\n", RELATED_BOUNDARY).as_bytes());
    body.extend_from_slice(format!("Content-Type: {}\r\n\r\n", mime_type).as_bytes());
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{}--\r\n", RELATED_BOUNDARY).as_bytes());
    body
}

#[async_trait]
impl ArchiveStore for DriveClient {
    async fn find_or_create_folder(&self, name: &str, parent_id: &str) -> Result<String> {
        let list_url = self
            .base_url
            .join("drive/v3/files")
            .context("invalid Drive base URL")?;
        let query = folder_query(name, parent_id);
        let res = self
            .http
            .get(list_url.clone())
            .header("Authorization", self.bearer())
            .query(&[("q", query.as_str()), ("fields", "files(id, name)")])
            .send()
            .await
            .context("failed to reach Drive")?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            bail!("drive list error {}: {}", status, body);
        }
        let listing: FileListResponse = res.json().await.context("invalid Drive list JSON")?;
        if let Some(existing) = listing.files.into_iter().next() {
            debug!(folder = %name, id = %existing.id, "reusing archive folder");
            return Ok(existing.id);
        }

        let res = self
            .http
            .post(list_url)
            .header("Authorization", self.bearer())
            .json(&json!({
                "name": name,
                "mimeType": FOLDER_MIME_TYPE,
                "parents": [parent_id],
            }))
            .send()
            .await
            .context("failed to reach Drive")?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            bail!("drive folder create error {}: {}", status, body);
        }
        let created: FileResponse = res.json().await.context("invalid Drive create JSON")?;
        info!(folder = %name, id = %created.id, "created archive folder");
        Ok(created.id)
    }

    async fn create_object(
        &self,
        folder_id: &str,
        name: &str,
        bytes: Vec<u8>,
        mime_type: &str,
    ) -> Result<String> {
        let upload_url = self
            .base_url
            .join("upload/drive/v3/files")
            .context("invalid Drive base URL")?;
        let metadata = build_object_metadata(name, folder_id, mime_type);
        let body = build_related_body(&metadata, mime_type, &bytes);
        let res = self
            .http
            .post(upload_url)
            .header("Authorization", self.bearer())
            .header(
                "Content-Type",
                format!("multipart/related; boundary={}", RELATED_BOUNDARY),
            )
            .query(&[("uploadType", "multipart")])
            .body(body)
            .send()
            .await
            .context("failed to reach Drive upload endpoint")?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            bail!("drive upload error {}: {}", status, body);
        }
        let created: FileResponse = res.json().await.context("invalid Drive upload JSON")?;
        debug!(object = %name, id = %created.id, "created archive object");
        Ok(created.id)
    }

    async fn make_public(&self, object_id: &str) -> Result<()> {
        let url = self
            .base_url
            .join(&format!("drive/v3/files/{}/permissions", object_id))
            .context("invalid Drive base URL")?;
        let res = self
            .http
            .post(url)
            .header("Authorization", self.bearer())
            .json(&json!({ "role": "reader", "type": "anyone" }))
            .send()
            .await
            .context("failed to reach Drive")?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            bail!("drive permission error {}: {}", status, body);
        }
        Ok(())
    }
}

#[derive(Deserialize)]
struct FileListResponse {
    #[serde(default)]
    files: Vec<FileResponse>,
}

#[derive(Deserialize)]
struct FileResponse {
    id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folder_query_matches_name_parent_and_mime() {
        let q = folder_query("Libro 3", "root-id");
        assert!(q.contains("name = 'Libro 3'"));
        assert!(q.contains("'root-id' in parents"));
        assert!(q.contains("mimeType = 'application/vnd.google-apps.folder'"));
        assert!(q.contains("trashed = false"));
    }

    #[test]
    fn folder_query_escapes_quotes() {
        let q = folder_query("L'ibro", "root");
        assert!(q.contains(r"name = 'L\'ibro'"));
    }

    #[test]
    fn object_metadata_shape() {
        let metadata = build_object_metadata("poema.md", "folder-1", "text/markdown");
        assert_eq!(metadata["name"], "poema.md");
        assert_eq!(metadata["parents"][0], "folder-1");
        assert_eq!(metadata["mimeType"], "text/markdown");
    }

    #[test]
    fn related_body_wraps_metadata_and_media() {
        let metadata = build_object_metadata("a.jpg", "f", "image/jpeg");
        let body = build_related_body(&metadata, "image/jpeg", b"JPEGDATA");
        let text = String::from_utf8_lossy(&body);
        assert!(text.starts_with(&format!("--{}\r\n", RELATED_BOUNDARY)));
        assert!(text.contains("Content-Type: application/json; charset=UTF-8"));
        assert!(text.contains("\"name\":\"a.jpg\""));
        assert!(text.contains("Content-Type: image/jpeg"));
        assert!(text.contains("JPEGDATA"));
        assert!(text.trim_end().ends_with(&format!("--{}--", RELATED_BOUNDARY)));
    }
}

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use reqwest::header::{CONTENT_RANGE, LOCATION, RANGE};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use super::{
    file_extension, file_stem, image_dimensions, is_allowed_image, ImageRecord, ImageStore,
    StoreError,
};
use crate::config::GoogleDriveConfig;
use crate::utils::http::get_http_client;
use crate::utils::retry::{retry_with_backoff, RetryPolicy};

const DRIVE_FILES_URL: &str = "https://www.googleapis.com/drive/v3/files";
const DRIVE_UPLOAD_URL: &str = "https://www.googleapis.com/upload/drive/v3/files";
const DOCS_URL: &str = "https://docs.googleapis.com/v1/documents";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

const FOLDER_NAME: &str = "Portfolio Images";
const FOLDER_MIME: &str = "application/vnd.google-apps.folder";
const DOCUMENT_NAME: &str = "Portfolio Metadata";
const DOCUMENT_MIME: &str = "application/vnd.google-apps.document";
const DOCUMENT_HEADER: &str = "Portfolio Metadata\n\n";

// resumable chunks must be multiples of 256 KiB
const UPLOAD_CHUNK_SIZE: usize = 512 * 1024;
const UPLOAD_RETRY: RetryPolicy = RetryPolicy::new(3, Duration::from_secs(1));
const CHUNK_TIMEOUT: Duration = Duration::from_secs(120);
const TOKEN_EXPIRY_MARGIN_SECONDS: i64 = 60;

#[derive(Debug, Clone, Deserialize)]
struct OAuthClientSecret {
    client_id: String,
    client_secret: String,
    #[serde(default)]
    token_uri: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CredentialsFile {
    installed: Option<OAuthClientSecret>,
    web: Option<OAuthClientSecret>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredToken {
    access_token: String,
    refresh_token: String,
    #[serde(default)]
    expiry: Option<DateTime<Utc>>,
}

impl StoredToken {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        !self.access_token.is_empty()
            && self
                .expiry
                .map(|expiry| expiry.timestamp() - now.timestamp() > TOKEN_EXPIRY_MARGIN_SECONDS)
                .unwrap_or(false)
    }
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access_token: String,
    expires_in: Option<i64>,
}

#[derive(Debug, Clone)]
struct DriveEndpoints {
    files_url: String,
    upload_url: String,
    docs_url: String,
    token_uri: String,
}

impl Default for DriveEndpoints {
    fn default() -> Self {
        DriveEndpoints {
            files_url: DRIVE_FILES_URL.to_string(),
            upload_url: DRIVE_UPLOAD_URL.to_string(),
            docs_url: DOCS_URL.to_string(),
            token_uri: DEFAULT_TOKEN_URI.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
struct DriveIds {
    folder_id: String,
    document_id: String,
}

#[derive(Debug, Deserialize)]
struct FileList {
    #[serde(default)]
    files: Vec<DriveFile>,
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DriveFile {
    id: String,
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Document {
    #[serde(default)]
    body: Option<DocumentBody>,
}

#[derive(Debug, Deserialize)]
struct DocumentBody {
    #[serde(default)]
    content: Vec<StructuralElement>,
}

#[derive(Debug, Deserialize)]
struct StructuralElement {
    #[serde(rename = "endIndex")]
    end_index: Option<i64>,
}

pub struct GoogleDriveStore {
    client: OAuthClientSecret,
    token_path: PathBuf,
    token: Mutex<StoredToken>,
    ids: OnceCell<DriveIds>,
    endpoints: DriveEndpoints,
    upload_retry: RetryPolicy,
}

pub fn public_image_url(file_id: &str) -> String {
    format!("https://drive.google.com/uc?id={file_id}")
}

pub(crate) fn log_entry_text(title: &str, file_id: &str) -> String {
    format!(
        "Title: {title}\nFile ID: {file_id}\nURL: {}\n\n",
        public_image_url(file_id)
    )
}

// Insertion index just before the document's trailing newline.
pub(crate) fn append_index(document: &Document) -> i64 {
    let end_index = document
        .body
        .as_ref()
        .and_then(|body| body.content.iter().filter_map(|el| el.end_index).last())
        .unwrap_or(1);
    (end_index - 1).max(1)
}

/// Offset to resume from after a 308. `Range: bytes=0-N` means N+1 bytes
/// were persisted; no header means none were.
fn resume_offset(range: Option<&str>) -> usize {
    range
        .and_then(|value| value.trim().strip_prefix("bytes=0-"))
        .and_then(|last| last.trim().parse::<usize>().ok())
        .map(|last| last + 1)
        .unwrap_or(0)
}

fn title_from_drive_name(name: &str) -> String {
    if is_allowed_image(name) {
        file_stem(name).to_string()
    } else {
        name.to_string()
    }
}

fn escape_query_value(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, StoreError> {
    let raw = fs::read_to_string(path)?;
    serde_json::from_str(&raw)
        .map_err(|err| StoreError::Auth(format!("Invalid {}: {err}", path.display())))
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, StoreError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    Err(StoreError::Api {
        service: "google",
        status,
        body,
    })
}

async fn parse_json<T: for<'de> Deserialize<'de>>(
    response: reqwest::Response,
) -> Result<T, StoreError> {
    check_status(response)
        .await?
        .json::<T>()
        .await
        .map_err(|err| StoreError::InvalidResponse(err.to_string()))
}

impl GoogleDriveStore {
    pub fn from_config(config: &GoogleDriveConfig) -> Result<Self, StoreError> {
        let credentials: CredentialsFile = read_json(&config.credentials_path)?;
        let client = credentials.installed.or(credentials.web).ok_or_else(|| {
            StoreError::Auth("credentials file has no installed or web client".to_string())
        })?;
        let token: StoredToken = read_json(&config.token_path)?;
        if token.refresh_token.trim().is_empty() {
            return Err(StoreError::Auth(format!(
                "{} has no refresh token",
                config.token_path.display()
            )));
        }

        Ok(GoogleDriveStore {
            client,
            token_path: config.token_path.clone(),
            token: Mutex::new(token),
            ids: OnceCell::new(),
            endpoints: DriveEndpoints::default(),
            upload_retry: UPLOAD_RETRY,
        })
    }

    async fn access_token(&self) -> Result<String, StoreError> {
        let cached = self.token.lock().clone();
        if cached.is_fresh(Utc::now()) {
            return Ok(cached.access_token);
        }

        debug!("Refreshing Google access token");
        let token_uri = self
            .client
            .token_uri
            .clone()
            .unwrap_or_else(|| self.endpoints.token_uri.clone());
        let response = get_http_client()
            .post(&token_uri)
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", cached.refresh_token.as_str()),
                ("client_id", self.client.client_id.as_str()),
                ("client_secret", self.client.client_secret.as_str()),
            ])
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Auth(format!(
                "token refresh failed with status {status}: {body}"
            )));
        }
        let refreshed: RefreshResponse = response
            .json()
            .await
            .map_err(|err| StoreError::InvalidResponse(err.to_string()))?;

        let updated = StoredToken {
            access_token: refreshed.access_token,
            refresh_token: cached.refresh_token,
            expiry: refreshed
                .expires_in
                .map(|seconds| Utc::now() + chrono::Duration::seconds(seconds)),
        };
        *self.token.lock() = updated.clone();

        match serde_json::to_string_pretty(&updated) {
            Ok(serialized) => {
                if let Err(err) = fs::write(&self.token_path, serialized) {
                    warn!("Failed to persist refreshed token: {err}");
                }
            }
            Err(err) => warn!("Failed to serialize refreshed token: {err}"),
        }

        Ok(updated.access_token)
    }

    async fn find_file(&self, name: &str, mime_type: &str) -> Result<Option<String>, StoreError> {
        let query = format!(
            "name='{}' and mimeType='{}' and trashed=false",
            escape_query_value(name),
            mime_type
        );
        let token = self.access_token().await?;
        let response = get_http_client()
            .get(&self.endpoints.files_url)
            .bearer_auth(token)
            .query(&[("q", query.as_str()), ("fields", "files(id, name)")])
            .send()
            .await?;
        let list: FileList = parse_json(response).await?;
        Ok(list.files.into_iter().next().map(|file| file.id))
    }

    async fn create_file(&self, name: &str, mime_type: &str) -> Result<String, StoreError> {
        let token = self.access_token().await?;
        let response = get_http_client()
            .post(&self.endpoints.files_url)
            .bearer_auth(token)
            .query(&[("fields", "id")])
            .json(&json!({ "name": name, "mimeType": mime_type }))
            .send()
            .await?;
        let created: DriveFile = parse_json(response).await?;
        Ok(created.id)
    }

    async fn insert_text(
        &self,
        document_id: &str,
        index: i64,
        text: &str,
    ) -> Result<(), StoreError> {
        let token = self.access_token().await?;
        let response = get_http_client()
            .post(format!("{}/{document_id}:batchUpdate", self.endpoints.docs_url))
            .bearer_auth(token)
            .json(&json!({
                "requests": [{
                    "insertText": {
                        "location": { "index": index },
                        "text": text,
                    }
                }]
            }))
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }

    async fn bootstrap(&self) -> Result<DriveIds, StoreError> {
        let folder_id = match self.find_file(FOLDER_NAME, FOLDER_MIME).await? {
            Some(id) => id,
            None => {
                info!("Creating Drive folder '{FOLDER_NAME}'");
                self.create_file(FOLDER_NAME, FOLDER_MIME).await?
            }
        };

        let document_id = match self.find_file(DOCUMENT_NAME, DOCUMENT_MIME).await? {
            Some(id) => {
                debug!("Found existing metadata document {id}");
                id
            }
            None => {
                info!("Creating metadata document '{DOCUMENT_NAME}'");
                let id = self.create_file(DOCUMENT_NAME, DOCUMENT_MIME).await?;
                self.insert_text(&id, 1, DOCUMENT_HEADER).await?;
                id
            }
        };

        Ok(DriveIds {
            folder_id,
            document_id,
        })
    }

    async fn ids(&self) -> Result<&DriveIds, StoreError> {
        self.ids.get_or_try_init(|| self.bootstrap()).await
    }

    async fn resumable_upload(
        &self,
        bytes: &[u8],
        name: &str,
        folder_id: &str,
        mime_type: &str,
    ) -> Result<String, StoreError> {
        let token = self.access_token().await?;
        let total = bytes.len();
        let session = get_http_client()
            .post(&self.endpoints.upload_url)
            .bearer_auth(&token)
            .query(&[("uploadType", "resumable"), ("fields", "id")])
            .header("X-Upload-Content-Type", mime_type)
            .header("X-Upload-Content-Length", total.to_string())
            .json(&json!({ "name": name, "parents": [folder_id] }))
            .send()
            .await?;
        let session = check_status(session).await?;
        let session_url = session
            .headers()
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| {
                StoreError::InvalidResponse("missing resumable session URL".to_string())
            })?;

        let mut offset = 0;
        loop {
            let end = (offset + UPLOAD_CHUNK_SIZE).min(total);
            let range = if total == 0 {
                "bytes */0".to_string()
            } else {
                format!("bytes {}-{}/{}", offset, end - 1, total)
            };
            let response = get_http_client()
                .put(&session_url)
                .bearer_auth(&token)
                .header(CONTENT_RANGE, range)
                .timeout(CHUNK_TIMEOUT)
                .body(bytes[offset..end].to_vec())
                .send()
                .await?;

            if response.status() == StatusCode::PERMANENT_REDIRECT {
                let range = response
                    .headers()
                    .get(RANGE)
                    .and_then(|value| value.to_str().ok());
                let persisted = resume_offset(range);
                if persisted <= offset || persisted >= total {
                    return Err(StoreError::InvalidResponse(format!(
                        "resumable upload stalled at {persisted}/{total} bytes"
                    )));
                }
                debug!("Drive persisted {persisted}/{total} bytes of {name}");
                offset = persisted;
                continue;
            }
            let created: DriveFile = parse_json(response).await?;
            return Ok(created.id);
        }
    }

    async fn make_public(&self, file_id: &str) -> Result<(), StoreError> {
        let token = self.access_token().await?;
        let response = get_http_client()
            .post(format!("{}/{file_id}/permissions", self.endpoints.files_url))
            .bearer_auth(token)
            .json(&json!({ "role": "reader", "type": "anyone" }))
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }

    async fn append_to_log(
        &self,
        document_id: &str,
        file_id: &str,
        title: &str,
    ) -> Result<(), StoreError> {
        let token = self.access_token().await?;
        let response = get_http_client()
            .get(format!("{}/{document_id}", self.endpoints.docs_url))
            .bearer_auth(token)
            .send()
            .await?;
        let document: Document = parse_json(response).await?;
        let index = append_index(&document);
        self.insert_text(document_id, index, &log_entry_text(title, file_id))
            .await
    }
}

#[async_trait]
impl ImageStore for GoogleDriveStore {
    fn name(&self) -> &'static str {
        "google_drive"
    }

    async fn list_images(&self) -> Result<Vec<ImageRecord>, StoreError> {
        let folder_id = self.ids().await?.folder_id.clone();
        let query = format!(
            "'{}' in parents and mimeType contains 'image/' and trashed=false",
            escape_query_value(&folder_id)
        );

        let mut images = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let token = self.access_token().await?;
            let mut params = vec![
                ("q", query.clone()),
                ("fields", "nextPageToken, files(id, name)".to_string()),
            ];
            if let Some(next) = page_token.take() {
                params.push(("pageToken", next));
            }
            let response = get_http_client()
                .get(&self.endpoints.files_url)
                .bearer_auth(token)
                .query(&params)
                .send()
                .await?;
            let list: FileList = parse_json(response).await?;

            images.extend(list.files.into_iter().map(|file| ImageRecord {
                src: public_image_url(&file.id),
                title: title_from_drive_name(&file.name),
                id: file.id,
                width: None,
                height: None,
            }));

            match list.next_page_token {
                Some(next) if !next.is_empty() => page_token = Some(next),
                _ => break,
            }
        }
        Ok(images)
    }

    async fn upload(
        &self,
        bytes: Vec<u8>,
        filename: &str,
        title: &str,
    ) -> Result<ImageRecord, StoreError> {
        let ids = self.ids().await?.clone();

        let mime_type = infer::get(&bytes)
            .map(|kind| kind.mime_type())
            .filter(|mime| mime.starts_with("image/"))
            .unwrap_or("image/jpeg");
        let ext = file_extension(filename).unwrap_or_else(|| "jpg".to_string());
        let name = format!("{title}.{ext}");

        info!("Uploading {name} to Google Drive ({} bytes)", bytes.len());
        let file_id = retry_with_backoff(self.upload_retry, "Drive upload", |_| {
            self.resumable_upload(&bytes, &name, &ids.folder_id, mime_type)
        })
        .await?;
        info!("Drive file created with id {file_id}");

        self.make_public(&file_id).await?;

        if let Err(err) = self.append_to_log(&ids.document_id, &file_id, title).await {
            warn!("Failed to append {file_id} to the metadata document: {err}");
        }

        let dimensions = image_dimensions(&bytes);
        Ok(ImageRecord {
            src: public_image_url(&file_id),
            id: file_id,
            title: title.to_string(),
            width: dimensions.map(|(w, _)| w),
            height: dimensions.map(|(_, h)| h),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::sync::Arc;

    use super::*;
    use mock_drive::MockDrive;

    #[test]
    fn append_index_uses_last_end_index() {
        let document: Document = serde_json::from_str(
            r#"{"body": {"content": [
                {"endIndex": 1},
                {"startIndex": 1, "endIndex": 21},
                {"startIndex": 21, "endIndex": 58}
            ]}}"#,
        )
        .unwrap();
        assert_eq!(append_index(&document), 57);
    }

    #[test]
    fn append_index_defaults_to_document_start() {
        let document: Document = serde_json::from_str("{}").unwrap();
        assert_eq!(append_index(&document), 1);
    }

    #[test]
    fn log_entry_lists_title_id_and_url() {
        assert_eq!(
            log_entry_text("Tea Packaging", "abc123"),
            "Title: Tea Packaging\nFile ID: abc123\nURL: https://drive.google.com/uc?id=abc123\n\n"
        );
    }

    #[test]
    fn drive_titles_drop_image_extensions() {
        assert_eq!(title_from_drive_name("Tea Packaging.png"), "Tea Packaging");
        assert_eq!(title_from_drive_name("Scan 01.tiff"), "Scan 01.tiff");
    }

    #[test]
    fn token_freshness_respects_margin() {
        let now = Utc::now();
        let mut token = StoredToken {
            access_token: "ya29".to_string(),
            refresh_token: "1//refresh".to_string(),
            expiry: Some(now + chrono::Duration::seconds(30)),
        };
        assert!(!token.is_fresh(now));
        token.expiry = Some(now + chrono::Duration::seconds(600));
        assert!(token.is_fresh(now));
        token.expiry = None;
        assert!(!token.is_fresh(now));
    }

    #[test]
    fn store_requires_refresh_token() {
        let dir = tempfile::tempdir().unwrap();
        let credentials_path = dir.path().join("credentials.json");
        let token_path = dir.path().join("token.json");
        fs::write(
            &credentials_path,
            r#"{"installed": {"client_id": "id", "client_secret": "secret"}}"#,
        )
        .unwrap();
        fs::write(&token_path, r#"{"access_token": "", "refresh_token": " "}"#).unwrap();

        let config = GoogleDriveConfig {
            credentials_path,
            token_path,
        };
        assert!(matches!(
            GoogleDriveStore::from_config(&config),
            Err(StoreError::Auth(_))
        ));
    }

    #[test]
    fn resume_offset_follows_range_header() {
        assert_eq!(resume_offset(Some("bytes=0-524287")), 524_288);
        assert_eq!(resume_offset(Some("bytes=0-262143")), 262_144);
        assert_eq!(resume_offset(None), 0);
        assert_eq!(resume_offset(Some("garbage")), 0);
    }

    mod mock_drive {
        use std::collections::HashMap;
        use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
        use std::sync::Arc;

        use axum::extract::{Query, State};
        use axum::http::{header, HeaderMap, StatusCode};
        use axum::response::{IntoResponse, Response};
        use axum::routing::{get, post, put};
        use axum::{Json, Router};
        use parking_lot::Mutex;
        use serde_json::{json, Value};

        #[derive(Default)]
        pub struct MockDrive {
            pub list_failures: AtomicUsize,
            pub fail_first_chunk: AtomicBool,
            pub short_first_chunk: AtomicBool,
            pub deny_permission: AtomicBool,
            pub fail_log_append: AtomicBool,
            pub sessions: AtomicUsize,
            pub chunk_ranges: Mutex<Vec<String>>,
            pub permission_calls: AtomicUsize,
            pub insert_indexes: Mutex<Vec<i64>>,
        }

        async fn list_files(
            State(mock): State<Arc<MockDrive>>,
            Query(params): Query<HashMap<String, String>>,
        ) -> Response {
            let remaining = mock.list_failures.load(Ordering::SeqCst);
            if remaining > 0 {
                mock.list_failures.store(remaining - 1, Ordering::SeqCst);
                return (StatusCode::INTERNAL_SERVER_ERROR, "backend error").into_response();
            }
            let query = params.get("q").cloned().unwrap_or_default();
            let files = if query.contains("in parents") {
                json!([{ "id": "img-1", "name": "Tea Packaging.png" }])
            } else if query.contains("folder") {
                json!([{ "id": "folder-1", "name": "Portfolio Images" }])
            } else {
                json!([{ "id": "doc-1", "name": "Portfolio Metadata" }])
            };
            Json(json!({ "files": files })).into_response()
        }

        async fn open_session(State(mock): State<Arc<MockDrive>>, headers: HeaderMap) -> Response {
            mock.sessions.fetch_add(1, Ordering::SeqCst);
            let host = headers
                .get(header::HOST)
                .and_then(|value| value.to_str().ok())
                .unwrap_or_default()
                .to_string();
            (
                StatusCode::OK,
                [(header::LOCATION, format!("http://{host}/session"))],
            )
                .into_response()
        }

        async fn upload_chunk(State(mock): State<Arc<MockDrive>>, headers: HeaderMap) -> Response {
            let range = headers
                .get(header::CONTENT_RANGE)
                .and_then(|value| value.to_str().ok())
                .unwrap_or_default()
                .to_string();
            mock.chunk_ranges.lock().push(range.clone());

            if mock.fail_first_chunk.swap(false, Ordering::SeqCst) {
                return (StatusCode::SERVICE_UNAVAILABLE, "try again").into_response();
            }

            // "bytes <start>-<end>/<total>"
            let (span, total) = range
                .trim_start_matches("bytes ")
                .split_once('/')
                .unwrap_or_default();
            let total: usize = total.parse().unwrap_or_default();
            let end: usize = span
                .split_once('-')
                .and_then(|(_, end)| end.parse().ok())
                .unwrap_or_default();

            if end + 1 < total {
                let mut persisted = end;
                if mock.short_first_chunk.swap(false, Ordering::SeqCst) {
                    persisted = 262_143;
                }
                return (
                    StatusCode::PERMANENT_REDIRECT,
                    [(header::RANGE, format!("bytes=0-{persisted}"))],
                )
                    .into_response();
            }
            Json(json!({ "id": "file-1" })).into_response()
        }

        async fn grant_permission(State(mock): State<Arc<MockDrive>>) -> Response {
            mock.permission_calls.fetch_add(1, Ordering::SeqCst);
            if mock.deny_permission.load(Ordering::SeqCst) {
                return (StatusCode::FORBIDDEN, "insufficient permissions").into_response();
            }
            Json(json!({ "id": "perm-1" })).into_response()
        }

        async fn get_document() -> Json<Value> {
            Json(json!({ "body": { "content": [{ "endIndex": 1 }, { "endIndex": 42 }] } }))
        }

        async fn batch_update(
            State(mock): State<Arc<MockDrive>>,
            Json(body): Json<Value>,
        ) -> Response {
            if mock.fail_log_append.load(Ordering::SeqCst) {
                return (StatusCode::INTERNAL_SERVER_ERROR, "docs down").into_response();
            }
            if let Some(index) = body["requests"][0]["insertText"]["location"]["index"].as_i64() {
                mock.insert_indexes.lock().push(index);
            }
            Json(json!({})).into_response()
        }

        pub async fn spawn(mock: Arc<MockDrive>) -> String {
            let app = Router::new()
                .route(
                    "/files",
                    get(list_files).post(|| async { Json(json!({ "id": "new-1" })) }),
                )
                .route("/files/{id}/permissions", post(grant_permission))
                .route("/upload", post(open_session))
                .route("/session", put(upload_chunk))
                .route("/docs/{id}", get(get_document).post(batch_update))
                .with_state(mock);
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            let address = listener.local_addr().unwrap();
            tokio::spawn(async move {
                axum::serve(listener, app).await.unwrap();
            });
            format!("http://{address}")
        }
    }

    const CHUNK: usize = UPLOAD_CHUNK_SIZE;

    async fn mocked_store(mock: &Arc<MockDrive>) -> GoogleDriveStore {
        let base = mock_drive::spawn(mock.clone()).await;
        GoogleDriveStore {
            client: OAuthClientSecret {
                client_id: "id".to_string(),
                client_secret: "secret".to_string(),
                token_uri: None,
            },
            token_path: PathBuf::from("token.json"),
            token: Mutex::new(StoredToken {
                access_token: "ya29.test".to_string(),
                refresh_token: "1//refresh".to_string(),
                expiry: Some(Utc::now() + chrono::Duration::hours(1)),
            }),
            ids: OnceCell::new(),
            endpoints: DriveEndpoints {
                files_url: format!("{base}/files"),
                upload_url: format!("{base}/upload"),
                docs_url: format!("{base}/docs"),
                token_uri: format!("{base}/token"),
            },
            upload_retry: RetryPolicy::new(3, Duration::from_millis(5)),
        }
    }

    fn image_bytes(len: usize) -> Vec<u8> {
        let mut bytes = vec![0u8; len];
        bytes[..8].copy_from_slice(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]);
        bytes
    }

    #[tokio::test]
    async fn retried_upload_restarts_from_first_byte() {
        let mock = Arc::new(MockDrive::default());
        mock.fail_first_chunk.store(true, Ordering::SeqCst);
        let store = mocked_store(&mock).await;
        let total = CHUNK + 100 * 1024;

        let record = store
            .upload(image_bytes(total), "tea.png", "Tea Packaging")
            .await
            .unwrap();

        assert_eq!(record.id, "file-1");
        assert_eq!(record.src, public_image_url("file-1"));
        assert_eq!(mock.sessions.load(Ordering::SeqCst), 2);
        assert_eq!(
            mock.chunk_ranges.lock().as_slice(),
            &[
                format!("bytes 0-{}/{total}", CHUNK - 1),
                format!("bytes 0-{}/{total}", CHUNK - 1),
                format!("bytes {CHUNK}-{}/{total}", total - 1),
            ]
        );
        assert_eq!(mock.insert_indexes.lock().as_slice(), &[41]);
    }

    #[tokio::test]
    async fn upload_resumes_from_persisted_range() {
        let mock = Arc::new(MockDrive::default());
        mock.short_first_chunk.store(true, Ordering::SeqCst);
        let store = mocked_store(&mock).await;
        let total = CHUNK + 1024;

        store
            .upload(image_bytes(total), "tea.png", "Tea Packaging")
            .await
            .unwrap();

        let ranges = mock.chunk_ranges.lock().clone();
        assert_eq!(ranges[1], format!("bytes 262144-{}/{total}", total - 1));
    }

    #[tokio::test]
    async fn permission_failure_fails_the_upload() {
        let mock = Arc::new(MockDrive::default());
        mock.deny_permission.store(true, Ordering::SeqCst);
        let store = mocked_store(&mock).await;

        let err = store
            .upload(image_bytes(1024), "tea.png", "Tea Packaging")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Api { status: 403, .. }));
        assert!(mock.insert_indexes.lock().is_empty());
    }

    #[tokio::test]
    async fn log_append_failure_keeps_the_upload() {
        let mock = Arc::new(MockDrive::default());
        mock.fail_log_append.store(true, Ordering::SeqCst);
        let store = mocked_store(&mock).await;

        let record = store
            .upload(image_bytes(1024), "tea.png", "Tea Packaging")
            .await
            .unwrap();
        assert_eq!(record.id, "file-1");
        assert_eq!(mock.permission_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_bootstrap_is_retried_on_next_use() {
        let mock = Arc::new(MockDrive::default());
        mock.list_failures.store(1, Ordering::SeqCst);
        let store = mocked_store(&mock).await;

        assert!(store.list_images().await.is_err());
        let images = store.list_images().await.unwrap();
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].id, "img-1");
        assert_eq!(images[0].title, "Tea Packaging");
    }
}

use super::{decode_content, encode_content, DocumentStore, StoreError, StoredDocument, WriteResult};
use crate::config::StoreConfig;
use crate::models::VersionToken;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

const GITHUB_API_BASE_URL: &str = "https://api.github.com";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(8);

/// Response from the contents API for a single file
#[derive(Debug, Deserialize)]
struct ContentsFile {
    sha: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ContentsSha {
    sha: String,
}

#[derive(Debug, Serialize)]
struct PutContentsRequest<'a> {
    message: &'a str,
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    sha: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct PutContentsResponse {
    content: ShaOnly,
    commit: ShaOnly,
}

#[derive(Debug, Deserialize)]
struct ShaOnly {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct GitHubErrorBody {
    message: String,
}

/// Document store backed by the GitHub repository contents API.
///
/// Files are JSON blobs; the blob sha is the version token.
pub struct GitHubStore {
    client: Client,
    base_url: String,
    token: String,
    owner: String,
    repo: String,
}

impl GitHubStore {
    pub fn new(token: String, owner: String, repo: String) -> Result<Self> {
        let client = Client::builder()
            .user_agent("nfl-picks")
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to build GitHub HTTP client")?;

        Ok(Self {
            client,
            base_url: GITHUB_API_BASE_URL.to_string(),
            token,
            owner,
            repo,
        })
    }

    /// Build a store from resolved configuration; fails unless the config is ready
    pub fn from_config(config: &StoreConfig) -> Result<Self> {
        match (&config.token, &config.owner, &config.repo) {
            (Some(token), Some(owner), Some(repo)) if config.is_ready() => {
                Self::new(token.clone(), owner.clone(), repo.clone())
            }
            _ => anyhow::bail!("GitHub store is not configured (token, owner and repo required)"),
        }
    }

    /// Point the client at a different API host (GitHub Enterprise, tests)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn contents_url(&self, path: &str) -> String {
        format!(
            "{}/repos/{}/{}/contents/{}",
            self.base_url, self.owner, self.repo, path
        )
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("Authorization", format!("token {}", self.token))
            .header("Accept", "application/vnd.github.v3+json")
    }
}

fn unreachable(err: reqwest::Error) -> StoreError {
    StoreError::Unreachable(err.to_string())
}

/// Parse a success body. Losing the connection mid-body counts as unreachable,
/// a body that is not the expected JSON as corrupt.
async fn read_body<T: DeserializeOwned>(path: &str, response: Response) -> Result<T, StoreError> {
    let bytes = response.bytes().await.map_err(unreachable)?;
    serde_json::from_slice(&bytes).map_err(|e| StoreError::CorruptDocument {
        path: path.to_string(),
        details: format!("unexpected contents response: {}", e),
    })
}

/// Translate a non-success response into the store error taxonomy
async fn error_from_response(path: &str, response: Response) -> StoreError {
    let status = response.status();
    let message = match response.json::<GitHubErrorBody>().await {
        Ok(body) => body.message,
        Err(_) => "Unknown error".to_string(),
    };

    match status {
        StatusCode::CONFLICT => StoreError::Conflict {
            path: path.to_string(),
            message,
        },
        // GitHub answers 422 when an update to an existing file carries no sha
        StatusCode::UNPROCESSABLE_ENTITY if message.contains("sha") => StoreError::Conflict {
            path: path.to_string(),
            message,
        },
        _ => StoreError::Upstream {
            status: status.as_u16(),
            message,
        },
    }
}

impl GitHubStore {
    /// GET a contents path; `None` when GitHub reports 404
    async fn get_contents(&self, path: &str) -> Result<Option<Response>, StoreError> {
        debug!(path, "GET contents");
        let response = self
            .authorized(self.client.get(self.contents_url(path)))
            .send()
            .await
            .map_err(unreachable)?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(error_from_response(path, response).await);
        }
        Ok(Some(response))
    }
}

#[async_trait]
impl DocumentStore for GitHubStore {
    async fn read_document(&self, path: &str) -> Result<Option<StoredDocument>, StoreError> {
        let Some(response) = self.get_contents(path).await? else {
            return Ok(None);
        };

        let file: ContentsFile = read_body(path, response).await?;

        Ok(Some(StoredDocument {
            content: decode_content(path, &file.content)?,
            version: VersionToken::new(file.sha),
        }))
    }

    async fn read_version(&self, path: &str) -> Result<Option<VersionToken>, StoreError> {
        let Some(response) = self.get_contents(path).await? else {
            return Ok(None);
        };

        let file: ContentsSha = read_body(path, response).await?;
        Ok(Some(VersionToken::new(file.sha)))
    }

    async fn write_document(
        &self,
        path: &str,
        content: &Value,
        message: &str,
        version: Option<&VersionToken>,
    ) -> Result<WriteResult, StoreError> {
        debug!(path, version = ?version.map(|v| v.as_str()), "PUT contents");
        let payload = PutContentsRequest {
            message,
            content: encode_content(path, content)?,
            sha: version.map(|v| v.as_str()),
        };

        let response = self
            .authorized(self.client.put(self.contents_url(path)))
            .json(&payload)
            .send()
            .await
            .map_err(unreachable)?;

        if !response.status().is_success() {
            return Err(error_from_response(path, response).await);
        }

        let bytes = response.bytes().await.map_err(unreachable)?;
        let body: PutContentsResponse =
            serde_json::from_slice(&bytes).map_err(|e| StoreError::Upstream {
                status: StatusCode::OK.as_u16(),
                message: format!("Failed to parse write response: {}", e),
            })?;

        Ok(WriteResult {
            version: VersionToken::new(body.content.sha),
            commit: Some(body.commit.sha),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Path, State};
    use axum::http::{HeaderMap, StatusCode as AxumStatus};
    use axum::routing::get;
    use axum::{Json, Router};
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    static NEXT_SHA: AtomicUsize = AtomicUsize::new(1);

    /// Files by path: (base64 content, sha)
    type Files = Arc<Mutex<HashMap<String, (String, String)>>>;

    fn wrap_lines(encoded: &str) -> String {
        encoded
            .as_bytes()
            .chunks(60)
            .map(|c| String::from_utf8_lossy(c).into_owned())
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn authorized(headers: &HeaderMap) -> bool {
        headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(|v| v == "token test-token")
            .unwrap_or(false)
    }

    async fn get_contents(
        State(files): State<Files>,
        headers: HeaderMap,
        Path((_owner, _repo, path)): Path<(String, String, String)>,
    ) -> (AxumStatus, Json<Value>) {
        if !authorized(&headers) {
            return (AxumStatus::UNAUTHORIZED, Json(json!({"message": "Bad credentials"})));
        }
        if path == "broken.json" {
            return (
                AxumStatus::INTERNAL_SERVER_ERROR,
                Json(json!({"message": "Server Error"})),
            );
        }
        match files.lock().unwrap().get(&path) {
            Some((content, sha)) => (
                AxumStatus::OK,
                Json(json!({"sha": sha, "content": wrap_lines(content), "encoding": "base64"})),
            ),
            None => (AxumStatus::NOT_FOUND, Json(json!({"message": "Not Found"}))),
        }
    }

    async fn put_contents(
        State(files): State<Files>,
        headers: HeaderMap,
        Path((_owner, _repo, path)): Path<(String, String, String)>,
        Json(body): Json<Value>,
    ) -> (AxumStatus, Json<Value>) {
        if !authorized(&headers) {
            return (AxumStatus::UNAUTHORIZED, Json(json!({"message": "Bad credentials"})));
        }
        let mut files = files.lock().unwrap();
        let given = body.get("sha").and_then(|s| s.as_str()).map(str::to_string);
        match (files.get(&path), &given) {
            (Some(_), None) => {
                return (
                    AxumStatus::UNPROCESSABLE_ENTITY,
                    Json(json!({"message": "Invalid request.\n\n\"sha\" wasn't supplied."})),
                )
            }
            (Some((_, sha)), Some(given)) if sha != given => {
                return (
                    AxumStatus::CONFLICT,
                    Json(json!({"message": format!("{} does not match {}", path, given)})),
                )
            }
            _ => {}
        }

        let content = body["content"].as_str().unwrap_or_default().to_string();
        let sha = format!("sha{:04}", NEXT_SHA.fetch_add(1, Ordering::SeqCst));
        files.insert(path, (content, sha.clone()));
        (
            AxumStatus::OK,
            Json(json!({"content": {"sha": sha}, "commit": {"sha": format!("commit-{}", sha)}})),
        )
    }

    async fn spawn_fake_github() -> String {
        let files: Files = Arc::new(Mutex::new(HashMap::new()));
        let app = Router::new()
            .route(
                "/repos/:owner/:repo/contents/*path",
                get(get_contents).put(put_contents),
            )
            .with_state(files);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn store(base_url: &str) -> GitHubStore {
        GitHubStore::new(
            "test-token".to_string(),
            "owner".to_string(),
            "nfl-picks".to_string(),
        )
        .unwrap()
        .with_base_url(base_url)
    }

    #[tokio::test]
    async fn test_missing_file_is_absent() {
        let store = store(&spawn_fake_github().await);
        assert!(store.read_document("picks/jeff.json").await.unwrap().is_none());
        assert!(!store.exists("picks/jeff.json").await.unwrap());
    }

    #[tokio::test]
    async fn test_write_then_read_round_trips_unicode() {
        let store = store(&spawn_fake_github().await);
        let content = json!({
            "player": "jeff",
            "week": 1,
            "picks": {"MÜN_SÃO_2025-11-16 09:30": {"spread": "São Paulo", "total": "under"}},
            "saved_at": "2025-09-05T12:00:00Z"
        });

        let written = store
            .write_document("picks/jeff.json", &content, "Update jeff's picks for Week 1", None)
            .await
            .unwrap();
        assert!(written.commit.is_some());

        let read = store.read_document("picks/jeff.json").await.unwrap().unwrap();
        assert_eq!(read.content, content);
        assert_eq!(read.version, written.version);
    }

    #[tokio::test]
    async fn test_stale_or_missing_sha_is_a_conflict() {
        let store = store(&spawn_fake_github().await);
        let first = store
            .write_document("picks/will.json", &json!({"week": 1}), "create", None)
            .await
            .unwrap();
        store
            .write_document(
                "picks/will.json",
                &json!({"week": 1, "n": 2}),
                "update",
                Some(&first.version),
            )
            .await
            .unwrap();

        let stale = store
            .write_document(
                "picks/will.json",
                &json!({"week": 1, "n": 3}),
                "stale",
                Some(&first.version),
            )
            .await
            .unwrap_err();
        assert!(stale.is_conflict(), "got {:?}", stale);

        let blind = store
            .write_document("picks/will.json", &json!({"week": 1}), "blind", None)
            .await
            .unwrap_err();
        assert!(blind.is_conflict(), "got {:?}", blind);
    }

    #[tokio::test]
    async fn test_upstream_errors_carry_status_and_message() {
        let base = spawn_fake_github().await;
        let err = store(&base).read_document("broken.json").await.unwrap_err();
        match err {
            StoreError::Upstream { status, message } => {
                assert_eq!(status, 500);
                assert_eq!(message, "Server Error");
            }
            other => panic!("expected upstream error, got {:?}", other),
        }

        let bad_token = GitHubStore::new("nope".into(), "owner".into(), "nfl-picks".into())
            .unwrap()
            .with_base_url(&base);
        let err = bad_token.read_document("games.json").await.unwrap_err();
        assert!(matches!(err, StoreError::Upstream { status: 401, .. }));
    }

    #[tokio::test]
    async fn test_closed_port_is_unreachable() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = store(&format!("http://{}", addr))
            .read_document("games.json")
            .await
            .unwrap_err();
        assert!(err.is_unreachable(), "got {:?}", err);
    }

    #[tokio::test]
    async fn test_connection_lost_mid_body_is_unreachable() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 4096];
            let _ = socket.read(&mut request).await;
            let head = "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: 500\r\n\r\n{\"sha\": \"ab";
            socket.write_all(head.as_bytes()).await.unwrap();
            // connection closes with the body incomplete
        });

        let err = store(&format!("http://{}", addr))
            .read_version("games.json")
            .await
            .unwrap_err();
        assert!(err.is_unreachable(), "got {:?}", err);
    }

    #[tokio::test]
    async fn test_malformed_contents_response_is_corrupt() {
        let app = Router::new().route(
            "/repos/:owner/:repo/contents/*path",
            get(|| async { Json(json!({"unexpected": true})) }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let err = store(&format!("http://{}", addr))
            .read_document("games.json")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::CorruptDocument { .. }), "got {:?}", err);
    }

    #[test]
    fn test_from_config_requires_ready_config() {
        let partial = StoreConfig {
            token: None,
            owner: Some("owner".to_string()),
            repo: Some("nfl-picks".to_string()),
        };
        assert!(GitHubStore::from_config(&partial).is_err());

        let ready = StoreConfig {
            token: Some("t".to_string()),
            ..partial
        };
        assert!(GitHubStore::from_config(&ready).is_ok());
    }
}

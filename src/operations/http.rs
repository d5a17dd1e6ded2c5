//! HTTP transports: URL download and API calls.
//!
//! # Responsibilities
//! - Fetch a URL into a file, atomically (write `.part`, then rename)
//! - Perform a JSON API call and hand back status and body
//! - Translate transport errors into exit signals
//!
//! # Design Decisions
//! - Non-2xx responses are failures (`ExitSignal::HTTP_ERROR`)
//! - Connection failures are `ExitSignal::UNAVAILABLE`
//! - Per-request timeout is sized from the invoker's deadline

use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use url::Url;

use crate::resilience::timeouts::Deadline;
use crate::resilience::types::{ActionError, ExitSignal, ResilienceError, ResilienceResult};

/// Parse and check a URL before any circuit is touched.
pub fn parse_http_url(raw: &str) -> ResilienceResult<Url> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(ResilienceError::InvalidInput("URL must not be empty".to_string()));
    }
    let url = Url::parse(raw)
        .map_err(|e| ResilienceError::InvalidInput(format!("invalid URL '{}': {}", raw, e)))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(ResilienceError::InvalidInput(format!(
            "unsupported URL scheme '{}' in {}",
            other, raw
        ))),
    }
}

/// Map a reqwest error onto an action failure.
fn transport_error(e: reqwest::Error) -> ActionError {
    let signal = if e.is_timeout() {
        ExitSignal::TIMEOUT
    } else if e.is_connect() {
        ExitSignal::UNAVAILABLE
    } else if e.is_status() {
        ExitSignal::HTTP_ERROR
    } else {
        ExitSignal::FAILURE
    };
    ActionError::new(signal, e.to_string())
}

fn status_error(url: &Url, status: StatusCode) -> ActionError {
    ActionError::new(ExitSignal::HTTP_ERROR, format!("{} returned {}", url, status))
}

fn part_path(destination: &Path) -> PathBuf {
    let mut name = OsString::from(destination.as_os_str());
    name.push(".part");
    PathBuf::from(name)
}

/// Download `url` into `destination`. Returns the number of bytes written.
pub async fn download_to_file(
    client: &Client,
    url: &Url,
    destination: &Path,
    deadline: Deadline,
) -> Result<u64, ActionError> {
    let mut response = client
        .get(url.clone())
        .timeout(deadline.remaining())
        .send()
        .await
        .map_err(transport_error)?;

    let status = response.status();
    if !status.is_success() {
        return Err(status_error(url, status));
    }

    if let Some(parent) = destination.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).await?;
    }

    let partial = PartialFile::new(part_path(destination));
    let mut file = fs::File::create(partial.path()).await?;
    let mut written = 0u64;

    while let Some(chunk) = response.chunk().await.map_err(transport_error)? {
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;
    drop(file);

    fs::rename(partial.path(), destination).await?;
    partial.keep();
    tracing::info!(url = %url, destination = %destination.display(), bytes = written, "Download complete");
    Ok(written)
}

/// Removes an unfinished `.part` file on drop, including when the download
/// future is cancelled.
struct PartialFile {
    path: PathBuf,
}

impl PartialFile {
    fn new(path: PathBuf) -> Self {
        Self { path }
    }

    fn path(&self) -> &Path {
        &self.path
    }

    /// The file was renamed into place; nothing to remove.
    fn keep(self) {
        std::mem::forget(self);
    }
}

impl Drop for PartialFile {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!(path = %self.path.display(), "Removed partial download"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::debug!(path = %self.path.display(), error = %e, "Could not remove partial download")
            }
        }
    }
}

/// An HTTP API request.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub json: Option<serde_json::Value>,
}

impl ApiRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            json: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Attach a JSON body.
    pub fn json<T: Serialize>(mut self, body: &T) -> ResilienceResult<Self> {
        let value = serde_json::to_value(body)
            .map_err(|e| ResilienceError::InvalidInput(format!("unserializable request body: {}", e)))?;
        self.json = Some(value);
        Ok(self)
    }
}

/// Status and body of a successful API call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApiResponse {
    pub status: u16,
    pub body: String,
}

impl ApiResponse {
    /// Decode the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_str(&self.body)
    }
}

/// Perform one API call.
pub async fn call_api(
    client: &Client,
    request: &ApiRequest,
    url: &Url,
    deadline: Deadline,
) -> Result<ApiResponse, ActionError> {
    let mut builder = client
        .request(request.method.clone(), url.clone())
        .timeout(deadline.remaining());
    for (name, value) in &request.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    if let Some(body) = &request.json {
        builder = builder.json(body);
    }

    let response = builder.send().await.map_err(transport_error)?;
    let status = response.status();
    let body = response.text().await.map_err(transport_error)?;

    if !status.is_success() {
        tracing::warn!(url = %url, status = %status, "API call returned error status");
        return Err(status_error(url, status));
    }

    Ok(ApiResponse {
        status: status.as_u16(),
        body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_http_url() {
        assert!(parse_http_url("https://example.com/data.csv").is_ok());
        assert!(matches!(parse_http_url("   "), Err(ResilienceError::InvalidInput(_))));
        assert!(matches!(parse_http_url("example.com"), Err(ResilienceError::InvalidInput(_))));
        assert!(matches!(parse_http_url("ftp://example.com/x"), Err(ResilienceError::InvalidInput(_))));
    }

    #[test]
    fn test_part_path() {
        assert_eq!(part_path(Path::new("/tmp/data.csv")), PathBuf::from("/tmp/data.csv.part"));
    }

    #[tokio::test]
    async fn test_cancelled_download_removes_partial_file() {
        use tokio::io::AsyncReadExt;

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            socket
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 100\r\n\r\n0123456789")
                .await
                .unwrap();
            // Stall with the body unfinished.
            tokio::time::sleep(std::time::Duration::from_secs(30)).await;
        });

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("data.bin");
        let url = Url::parse(&format!("http://{}/data.bin", addr)).unwrap();
        let client = Client::new();
        let deadline = Deadline::after(std::time::Duration::from_secs(60));

        let result = tokio::time::timeout(
            std::time::Duration::from_millis(500),
            download_to_file(&client, &url, &dest, deadline),
        )
        .await;

        assert!(result.is_err());
        assert!(!part_path(&dest).exists());
        assert!(!dest.exists());
    }

    #[test]
    fn test_partial_file_kept_after_keep() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.part");
        std::fs::write(&path, "x").unwrap();
        PartialFile::new(path.clone()).keep();
        assert!(path.exists());
        drop(PartialFile::new(path.clone()));
        assert!(!path.exists());
    }

    #[test]
    fn test_api_request_builder() {
        let request = ApiRequest::post("http://localhost/api")
            .header("x-token", "abc")
            .json(&serde_json::json!({"id": 1}))
            .unwrap();
        assert_eq!(request.method, Method::POST);
        assert_eq!(request.headers, vec![("x-token".to_string(), "abc".to_string())]);
        assert_eq!(request.json, Some(serde_json::json!({"id": 1})));
    }

    #[test]
    fn test_api_response_json() {
        let response = ApiResponse {
            status: 200,
            body: r#"{"ok":true}"#.to_string(),
        };
        let value: serde_json::Value = response.json().unwrap();
        assert_eq!(value["ok"], true);
    }
}

//! Remote source acquisition.
//!
//! The source CSV is published as a public share. Downloading it is two GETs:
//! the share token is resolved to a one-time download link (a JSON body with
//! an `href`), then the link itself is fetched. [`HttpFetch`] abstracts the
//! transport so the resolver can be exercised without a network.

use serde::Deserialize;
use std::fs;
use std::io::Write;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

/// Default endpoint that resolves a public share token to a download link.
pub const DEFAULT_RESOLVE_ENDPOINT: &str =
    "https://cloud-api.yandex.net/v1/disk/public/resources/download";

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },

    #[error("response format changed: {0}")]
    ResponseFormatChanged(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("failed to save download to {path}: {reason}")]
    Save { path: String, reason: String },
}

/// Plain `GET url -> body` transport.
pub trait HttpFetch: Send + Sync {
    /// Fetch `url`; any status other than 200 is an error.
    fn get(&self, url: &str) -> Result<Vec<u8>, FetchError>;
}

/// Blocking reqwest transport.
pub struct ReqwestFetcher {
    client: reqwest::blocking::Client,
}

impl ReqwestFetcher {
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::NetworkUnreachable(format!("build HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

impl HttpFetch for ReqwestFetcher {
    fn get(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let resp = self
            .client
            .get(url)
            .send()
            .map_err(|e| FetchError::NetworkUnreachable(e.to_string()))?;

        let status = resp.status();
        if status != reqwest::StatusCode::OK {
            return Err(FetchError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let body = resp
            .bytes()
            .map_err(|e| FetchError::NetworkUnreachable(format!("read body: {e}")))?;
        Ok(body.to_vec())
    }
}

/// Something that can produce the source file's bytes from a share token.
pub trait SourceFetcher: Send + Sync {
    fn name(&self) -> &str;

    fn fetch_source(&self, share_token: &str) -> Result<Vec<u8>, FetchError>;
}

#[derive(Debug, Deserialize)]
struct DownloadLink {
    href: String,
}

/// Resolves a public share token through `resolve_endpoint`, then downloads.
pub struct PublicShareSource<F: HttpFetch> {
    http: F,
    resolve_endpoint: String,
}

impl<F: HttpFetch> PublicShareSource<F> {
    pub fn new(http: F, resolve_endpoint: impl Into<String>) -> Self {
        Self {
            http,
            resolve_endpoint: resolve_endpoint.into(),
        }
    }

    /// `resolve_endpoint?public_key=<token>` with the token URL-encoded.
    pub fn resolve_url(&self, share_token: &str) -> Result<String, FetchError> {
        reqwest::Url::parse_with_params(&self.resolve_endpoint, &[("public_key", share_token)])
            .map(String::from)
            .map_err(|e| FetchError::InvalidUrl(format!("{}: {e}", self.resolve_endpoint)))
    }

    fn download_link(&self, share_token: &str) -> Result<String, FetchError> {
        let body = self.http.get(&self.resolve_url(share_token)?)?;
        let link: DownloadLink = serde_json::from_slice(&body).map_err(|e| {
            FetchError::ResponseFormatChanged(format!("download link response: {e}"))
        })?;
        if link.href.is_empty() {
            return Err(FetchError::ResponseFormatChanged(
                "download link response has an empty href".into(),
            ));
        }
        Ok(link.href)
    }
}

impl<F: HttpFetch> SourceFetcher for PublicShareSource<F> {
    fn name(&self) -> &str {
        "public_share"
    }

    fn fetch_source(&self, share_token: &str) -> Result<Vec<u8>, FetchError> {
        let href = self.download_link(share_token)?;
        let bytes = self.http.get(&href)?;
        info!(bytes = bytes.len(), "source downloaded");
        Ok(bytes)
    }
}

/// Write `bytes` to `path` atomically: write a sibling `.tmp`, then rename.
pub fn save_atomically(path: &Path, bytes: &[u8]) -> Result<(), FetchError> {
    let save_err = |reason: String| FetchError::Save {
        path: path.display().to_string(),
        reason,
    };

    let tmp_path = path.with_extension("tmp");
    let mut file = fs::File::create(&tmp_path).map_err(|e| save_err(format!("create: {e}")))?;
    file.write_all(bytes)
        .and_then(|()| file.sync_all())
        .map_err(|e| save_err(format!("write: {e}")))?;
    drop(file);

    fs::rename(&tmp_path, path).map_err(|e| {
        let _ = fs::remove_file(&tmp_path);
        save_err(format!("atomic rename: {e}"))
    })
}

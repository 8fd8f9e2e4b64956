//! HTTP client for the SharePoint REST API (app-only, client-credentials).

use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{StatusCode, Url, header};
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use vigia_core::annex_path;
use vigia_store::{BlobEntry, BlobStore, StoreError};

/// Principal id of SharePoint Online in Azure ACS.
const SHAREPOINT_PRINCIPAL: &str = "00000003-0000-0ff1-ce00-000000000000";
const ACS_BASE: &str = "https://accounts.accesscontrol.windows.net";
/// Refresh tokens this long before they expire.
const TOKEN_SLACK: Duration = Duration::from_secs(60);

#[derive(Error, Debug)]
pub enum SharePointError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("authentication failed ({status}): {body}")]
    Auth { status: u16, body: String },
    #[error("server returned {status}: {body}")]
    Server { status: u16, body: String },
    #[error("invalid site url {0}")]
    SiteUrl(String),
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<SharePointError> for StoreError {
    fn from(e: SharePointError) -> Self {
        StoreError::Remote(e.to_string())
    }
}

/// Connection settings for one SharePoint site.
#[derive(Debug, Clone)]
pub struct SharePointConfig {
    /// Site URL, e.g. `https://contoso.sharepoint.com/sites/CCTV`.
    pub site_url: String,
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: String,
    /// Token endpoint override; defaults to the ACS endpoint of `tenant_id`.
    pub token_url: Option<String>,
    pub request_timeout: Duration,
}

impl SharePointConfig {
    pub fn new(
        site_url: impl Into<String>,
        tenant_id: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            site_url: site_url.into(),
            tenant_id: tenant_id.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            token_url: None,
            request_timeout: Duration::from_secs(60),
        }
    }
}

struct CachedToken {
    value: String,
    expires_at: Instant,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    /// ACS sends this as a string, Entra ID as a number.
    #[serde(default)]
    expires_in: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct FolderFiles {
    value: Vec<FileInfo>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct FileInfo {
    name: String,
    server_relative_url: String,
    time_last_modified: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct FileExists {
    #[serde(default = "default_true")]
    exists: bool,
}

fn default_true() -> bool {
    true
}

/// SharePoint REST client for one site.
pub struct SharePointClient {
    client: reqwest::Client,
    config: SharePointConfig,
    /// Site URL without trailing slash.
    site_url: String,
    /// `scheme://host[:port]` of the site.
    origin: String,
    host: String,
    token: Mutex<Option<CachedToken>>,
}

impl SharePointClient {
    pub fn new(config: SharePointConfig) -> Result<Self, SharePointError> {
        let site_url = config.site_url.trim_end_matches('/').to_string();
        let parsed =
            Url::parse(&site_url).map_err(|_| SharePointError::SiteUrl(site_url.clone()))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| SharePointError::SiteUrl(site_url.clone()))?
            .to_string();
        let origin = parsed.origin().ascii_serialization();
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            client,
            config,
            site_url,
            origin,
            host,
            token: Mutex::new(None),
        })
    }

    fn token_url(&self) -> String {
        self.config.token_url.clone().unwrap_or_else(|| {
            format!("{ACS_BASE}/{}/tokens/OAuth/2", self.config.tenant_id)
        })
    }

    /// Bearer token, fetched on first use and reused until shortly before expiry.
    async fn access_token(&self) -> Result<String, SharePointError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref()
            && token.expires_at > Instant::now() + TOKEN_SLACK
        {
            return Ok(token.value.clone());
        }

        let tenant = &self.config.tenant_id;
        let form = [
            ("grant_type", "client_credentials".to_string()),
            ("client_id", format!("{}@{tenant}", self.config.client_id)),
            ("client_secret", self.config.client_secret.clone()),
            (
                "resource",
                format!("{SHAREPOINT_PRINCIPAL}/{}@{tenant}", self.host),
            ),
        ];
        info!(host = %self.host, "requesting sharepoint access token");
        let resp = self.client.post(self.token_url()).form(&form).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(SharePointError::Auth {
                status: status.as_u16(),
                body,
            });
        }
        let token: TokenResponse = resp.json().await?;
        let lifetime = token
            .expires_in
            .as_ref()
            .and_then(|v| match v {
                serde_json::Value::Number(n) => n.as_u64(),
                serde_json::Value::String(s) => s.parse().ok(),
                _ => None,
            })
            .unwrap_or(3600);
        let value = token.access_token;
        *cached = Some(CachedToken {
            value: value.clone(),
            expires_at: Instant::now() + Duration::from_secs(lifetime),
        });
        Ok(value)
    }

    async fn invalidate_token(&self) {
        *self.token.lock().await = None;
    }

    /// Convert any accepted path form to a decoded server-relative path.
    pub fn server_relative(&self, path: &str) -> String {
        let path = path.trim().replace('\\', "/");
        if annex_path::is_url(&path) {
            let rest = match path.strip_prefix(&self.origin) {
                Some(rest) => rest.to_string(),
                None => Url::parse(&path)
                    .map(|u| u.path().to_string())
                    .unwrap_or(path.clone()),
            };
            let rest = rest.split(['?', '#']).next().unwrap_or_default();
            return annex_path::decode(rest);
        }
        if path.starts_with('/') {
            return path;
        }
        // Relative to the site.
        let site_path = self
            .site_url
            .strip_prefix(&self.origin)
            .unwrap_or_default()
            .trim_end_matches('/');
        format!("{site_path}/{}", path.trim_start_matches("./"))
    }

    fn api_url(&self, resource: &str, server_relative: &str, suffix: &str) -> String {
        format!(
            "{}/_api/web/{resource}(decodedurl='{}'){suffix}",
            self.site_url,
            escape_literal(server_relative)
        )
    }

    async fn get(&self, url: &str) -> Result<Option<reqwest::Response>, SharePointError> {
        let token = self.access_token().await?;
        debug!(url, "sharepoint GET");
        let resp = self
            .client
            .get(url)
            .bearer_auth(token)
            .header(header::ACCEPT, "application/json;odata=nometadata")
            .send()
            .await?;
        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            self.invalidate_token().await;
            let body = resp.text().await.unwrap_or_default();
            return Err(SharePointError::Auth {
                status: status.as_u16(),
                body,
            });
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(SharePointError::Server {
                status: status.as_u16(),
                body,
            });
        }
        Ok(Some(resp))
    }

    /// Download a file. `Ok(None)` when it does not exist.
    pub async fn download_file(&self, path: &str) -> Result<Option<Vec<u8>>, SharePointError> {
        let rel = self.server_relative(path);
        let url = self.api_url("GetFileByServerRelativePath", &rel, "/$value");
        let Some(resp) = self.get(&url).await? else {
            debug!(path = %rel, "sharepoint file not found");
            return Ok(None);
        };
        let bytes = resp.bytes().await?;
        info!(path = %rel, bytes = bytes.len(), "downloaded from sharepoint");
        Ok(Some(bytes.to_vec()))
    }

    /// Files directly inside a folder. A missing folder lists as empty.
    pub async fn list_files(&self, folder: &str) -> Result<Vec<BlobEntry>, SharePointError> {
        let rel = self.server_relative(folder);
        let url = self.api_url(
            "GetFolderByServerRelativePath",
            &rel,
            "/Files?$select=Name,ServerRelativeUrl,TimeLastModified",
        );
        let Some(resp) = self.get(&url).await? else {
            debug!(folder = %rel, "sharepoint folder not found");
            return Ok(Vec::new());
        };
        let listing: FolderFiles = serde_json::from_slice(&resp.bytes().await?)?;
        let entries = listing
            .value
            .into_iter()
            .map(|f| {
                let modified_at = DateTime::parse_from_rfc3339(&f.time_last_modified)
                    .map(|d| d.with_timezone(&Utc))
                    .unwrap_or_else(|_| {
                        warn!(file = %f.name, raw = %f.time_last_modified, "unparseable modification time");
                        DateTime::<Utc>::UNIX_EPOCH
                    });
                BlobEntry {
                    name: f.name,
                    path: f.server_relative_url,
                    modified_at,
                }
            })
            .collect::<Vec<_>>();
        debug!(folder = %rel, count = entries.len(), "listed sharepoint folder");
        Ok(entries)
    }

    pub async fn file_exists(&self, path: &str) -> Result<bool, SharePointError> {
        let rel = self.server_relative(path);
        let url = self.api_url("GetFileByServerRelativePath", &rel, "?$select=Exists");
        let Some(resp) = self.get(&url).await? else {
            return Ok(false);
        };
        let info: FileExists = serde_json::from_slice(&resp.bytes().await?)?;
        Ok(info.exists)
    }
}

#[async_trait]
impl BlobStore for SharePointClient {
    fn name(&self) -> &str {
        "sharepoint"
    }

    async fn download(&self, path: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.download_file(path).await?)
    }

    async fn list_folder(&self, folder: &str) -> Result<Vec<BlobEntry>, StoreError> {
        Ok(self.list_files(folder).await?)
    }

    async fn exists(&self, path: &str) -> Result<bool, StoreError> {
        Ok(self.file_exists(path).await?)
    }
}

/// Quote a path for an OData string literal and percent-encode each segment.
fn escape_literal(path: &str) -> String {
    path.split('/')
        .map(|segment| urlencoding::encode(&segment.replace('\'', "''")).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

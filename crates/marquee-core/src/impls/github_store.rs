//! GitHubStore - GitHub リポジトリの 1 branch を RemoteStore として扱う
//!
//! # API の対応
//! - resolve: `GET /repos/{o}/{r}/git/trees/{branch}?recursive=1`
//!   (branch head の 1 スナップショットから blob sha を引く)
//! - read:    `GET /repos/{o}/{r}/contents/{path}?ref={branch}`
//!   (1MB を超えると content が空になるので `git/blobs/{sha}` で取り直す)
//! - write:   `PUT /repos/{o}/{r}/contents/{path}`
//! - delete:  `DELETE /repos/{o}/{r}/contents/{path}`
//!
//! blob sha がそのまま ContentRevision になります。

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};

use crate::config::StoreSettings;
use crate::domain::{ContentRevision, StoreError};
use crate::ports::{RemoteStore, StoredObject};

const USER_AGENT: &str = concat!("marquee/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Resolve,
    Read,
    Write,
    Delete,
}

#[derive(Debug, Deserialize)]
struct TreeResponse {
    tree: Vec<TreeEntry>,
    #[serde(default)]
    truncated: bool,
}

#[derive(Debug, Deserialize)]
struct TreeEntry {
    path: String,
    #[serde(rename = "type")]
    kind: String,
    sha: String,
}

#[derive(Debug, Deserialize)]
struct ContentsResponse {
    sha: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    encoding: String,
}

#[derive(Debug, Deserialize)]
struct BlobResponse {
    content: String,
    encoding: String,
}

#[derive(Debug, Serialize)]
struct PutRequest<'a> {
    message: &'a str,
    content: String,
    branch: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    sha: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct PutResponse {
    content: PutContent,
}

#[derive(Debug, Deserialize)]
struct PutContent {
    sha: String,
}

#[derive(Debug, Serialize)]
struct DeleteRequest<'a> {
    message: &'a str,
    sha: &'a str,
    branch: &'a str,
}

/// GitHub contents API adapter.
pub struct GitHubStore {
    client: reqwest::Client,
    api_base: String,
    owner: String,
    repo: String,
    branch: String,
    token: Option<String>,
}

impl GitHubStore {
    pub fn new(settings: &StoreSettings, token: Option<String>) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .build()?;
        Ok(Self {
            client,
            api_base: settings.api_base.trim_end_matches('/').to_string(),
            owner: settings.owner.clone(),
            repo: settings.repo.clone(),
            branch: settings.branch.clone(),
            token,
        })
    }

    fn repo_url(&self, tail: &str) -> String {
        format!("{}/repos/{}/{}/{}", self.api_base, self.owner, self.repo, tail)
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let builder = self
            .client
            .request(method, url)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28");
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder, op: Op) -> Result<Response, StoreError> {
        let response = builder.send().await.map_err(transport_error)?;
        if response.status().is_success() {
            return Ok(response);
        }
        Err(classify(response, op).await)
    }

    async fn fetch_blob(&self, sha: &str) -> Result<Bytes, StoreError> {
        let url = self.repo_url(&format!("git/blobs/{sha}"));
        let response = self.send(self.request(Method::GET, &url), Op::Read).await?;
        let blob: BlobResponse = response.json().await.map_err(transport_error)?;
        if blob.encoding != "base64" {
            return Err(StoreError::Transient(format!(
                "unexpected blob encoding {:?}",
                blob.encoding
            )));
        }
        decode_base64(&blob.content)
    }
}

#[async_trait]
impl RemoteStore for GitHubStore {
    fn branch(&self) -> &str {
        &self.branch
    }

    async fn resolve_revision(&self, path: &str) -> Result<ContentRevision, StoreError> {
        let url = self.repo_url(&format!("git/trees/{}", self.branch));
        let builder = self
            .request(Method::GET, &url)
            .query(&[("recursive", "1")]);
        let response = self.send(builder, Op::Resolve).await?;
        let tree: TreeResponse = response.json().await.map_err(transport_error)?;

        let found = tree
            .tree
            .into_iter()
            .find(|entry| entry.path == path && entry.kind == "blob");
        match found {
            Some(entry) => Ok(ContentRevision::new(entry.sha)),
            // 切り詰められた一覧に無いことは「存在しない」の証明にならない
            None if tree.truncated => Err(StoreError::Transient(format!(
                "tree listing truncated before {path}"
            ))),
            None => Err(StoreError::NotFound),
        }
    }

    async fn read_object(&self, path: &str) -> Result<StoredObject, StoreError> {
        let url = self.repo_url(&format!("contents/{path}"));
        let builder = self
            .request(Method::GET, &url)
            .query(&[("ref", self.branch.as_str())]);
        let response = self.send(builder, Op::Read).await?;
        let contents: ContentsResponse = response.json().await.map_err(transport_error)?;
        expect_file(&contents.kind, path)?;

        let content = if contents.encoding == "base64" && !contents.content.is_empty() {
            decode_base64(&contents.content)?
        } else {
            self.fetch_blob(&contents.sha).await?
        };
        Ok(StoredObject {
            content,
            revision: ContentRevision::new(contents.sha),
        })
    }

    async fn write_object(
        &self,
        path: &str,
        content: Bytes,
        expected: Option<&ContentRevision>,
        label: &str,
    ) -> Result<ContentRevision, StoreError> {
        let url = self.repo_url(&format!("contents/{path}"));
        let body = PutRequest {
            message: label,
            content: STANDARD.encode(&content),
            branch: &self.branch,
            sha: expected.map(ContentRevision::as_str),
        };
        let response = self
            .send(self.request(Method::PUT, &url).json(&body), Op::Write)
            .await?;
        let created: PutResponse = response.json().await.map_err(transport_error)?;
        Ok(ContentRevision::new(created.content.sha))
    }

    async fn delete_object(
        &self,
        path: &str,
        expected: &ContentRevision,
        label: &str,
    ) -> Result<(), StoreError> {
        let url = self.repo_url(&format!("contents/{path}"));
        let body = DeleteRequest {
            message: label,
            sha: expected.as_str(),
            branch: &self.branch,
        };
        self.send(self.request(Method::DELETE, &url).json(&body), Op::Delete)
            .await?;
        Ok(())
    }
}

/// A directory or submodule occupies the path; creating a file there
/// would only be rejected.
fn expect_file(kind: &str, path: &str) -> Result<(), StoreError> {
    if kind == "file" {
        Ok(())
    } else {
        Err(StoreError::Conflict(format!("{path} is a {kind}, not a file")))
    }
}

fn transport_error(err: reqwest::Error) -> StoreError {
    if err.is_timeout() {
        StoreError::Transient(format!("request timed out: {err}"))
    } else {
        StoreError::Transient(err.to_string())
    }
}

/// GitHub wraps base64 content at 60 columns.
fn decode_base64(text: &str) -> Result<Bytes, StoreError> {
    let compact: String = text.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    STANDARD
        .decode(compact)
        .map(Bytes::from)
        .map_err(|e| StoreError::Transient(format!("invalid base64 content: {e}")))
}

async fn classify(response: Response, op: Op) -> StoreError {
    let status = response.status();
    let rate_limited = response
        .headers()
        .get("x-ratelimit-remaining")
        .is_some_and(|v| v.as_bytes() == b"0");
    let body = response.text().await.unwrap_or_default();
    classify_status(status, rate_limited, &body, op)
}

fn classify_status(status: StatusCode, rate_limited: bool, body: &str, op: Op) -> StoreError {
    let mutating = matches!(op, Op::Write | Op::Delete);
    match status {
        StatusCode::NOT_FOUND if mutating => {
            StoreError::Conflict(format!("object vanished: {body}"))
        }
        StatusCode::NOT_FOUND => StoreError::NotFound,
        // 空のリポジトリは tree を持たない
        StatusCode::CONFLICT if op == Op::Resolve => StoreError::NotFound,
        StatusCode::CONFLICT | StatusCode::UNPROCESSABLE_ENTITY if mutating => {
            StoreError::Conflict(body.to_string())
        }
        StatusCode::FORBIDDEN if rate_limited => {
            StoreError::Transient("rate limit exhausted".to_string())
        }
        status => StoreError::Transient(format!("{status}: {body}")),
    }
}

//! Chunk transport seam and its HTTP implementation.
//!
//! `ChunkTransport` keeps the state machine decoupled from reqwest and
//! testable with scripted mocks.

use std::future::Future;
use std::pin::Pin;

use chunkload_transfer::ChunkRange;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use reqwest::StatusCode;
use reqwest::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use tracing::trace;

use crate::error::{ChunkFailure, UploadError};

/// Characters left unescaped in the `Content-Disposition` file name.
const FILENAME_SET: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'_').remove(b'.');

/// One chunk exchange, fully prepared.
#[derive(Debug, Clone)]
pub struct ChunkRequest {
    pub url: String,
    pub session_id: String,
    pub file_name: String,
    pub range: ChunkRange,
    /// Length of the whole file.
    pub total: u64,
    pub data: Vec<u8>,
}

impl ChunkRequest {
    /// `X-Content-Range` value: `bytes <start>-<end>/<total>`.
    pub fn content_range(&self) -> String {
        format!("bytes {}-{}/{}", self.range.start, self.range.end, self.total)
    }

    /// `Content-Disposition` value with a percent-encoded file name.
    pub fn content_disposition(&self) -> String {
        let name = utf8_percent_encode(&self.file_name, FILENAME_SET);
        format!("attachment; filename=\"{name}\"")
    }
}

/// Sends a chunk and returns the server's response body.
///
/// Implementations classify failures: network and body-read errors are
/// [`ErrorKind::Transport`](crate::ErrorKind::Transport), everything else
/// (including a non-success status) is `Other`.
pub trait ChunkTransport: Send + Sync {
    fn send_chunk(
        &self,
        request: ChunkRequest,
    ) -> Pin<Box<dyn Future<Output = Result<String, ChunkFailure>> + Send + '_>>;
}

/// `ChunkTransport` over HTTP `POST`.
///
/// No request timeout is configured; a stalled upload is bounded only by
/// transport errors and the retry budget.
pub struct HttpTransport {
    http: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self, UploadError> {
        let http = reqwest::Client::builder().build()?;
        Ok(Self { http })
    }

    /// Wraps an existing client (shared connection pool, custom TLS, ...).
    pub fn with_client(http: reqwest::Client) -> Self {
        Self { http }
    }

    /// Builds the `POST` for `request` without sending it.
    pub fn build_request(&self, request: ChunkRequest) -> Result<reqwest::Request, reqwest::Error> {
        self.http
            .post(&request.url)
            .header(CONTENT_TYPE, "application/octet-stream")
            .header(CONTENT_DISPOSITION, request.content_disposition())
            .header("X-Content-Range", request.content_range())
            .header("Session-ID", &request.session_id)
            .body(request.data)
            .build()
    }
}

impl ChunkTransport for HttpTransport {
    fn send_chunk(
        &self,
        request: ChunkRequest,
    ) -> Pin<Box<dyn Future<Output = Result<String, ChunkFailure>> + Send + '_>> {
        Box::pin(async move {
            let request = self
                .build_request(request)
                .map_err(|e| ChunkFailure::other(format!("invalid request: {e}")))?;
            let resp = self
                .http
                .execute(request)
                .await
                .map_err(|e| ChunkFailure::transport(e.to_string()))?;

            let status = resp.status();
            trace!(status = %status, "chunk response");
            if status != StatusCode::OK && status != StatusCode::CREATED {
                return Err(ChunkFailure::other(format!(
                    "unexpected response status {status}"
                )));
            }

            resp.text()
                .await
                .map_err(|e| ChunkFailure::transport(format!("failed to read response: {e}")))
        })
    }
}

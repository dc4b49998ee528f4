//! `reqwest` implementation of [`ChunkTransport`].

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use futures_util::StreamExt;
use photolift_protocol::constants::{FILE_PART, WS_PATH, field};
use photolift_protocol::UPLOAD_METHOD;
use reqwest::multipart::{Form, Part};
use tracing::debug;

use crate::error::UploadError;
use crate::transport::{ByteProgress, ChunkRequest, ChunkTransport, TransportResponse};

/// Size of the pieces the chunk body is streamed in.
const STREAM_PIECE: usize = 16 * 1024;

/// Account credentials sent with every chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Posts chunks to `{base_url}/ws.php?format=json&method=pwg.images.uploadAsync`.
pub struct ReqwestTransport {
    http: reqwest::Client,
    endpoint: String,
    credentials: Option<Credentials>,
}

impl ReqwestTransport {
    /// Creates a transport for the server at `base_url`.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, UploadError> {
        let base = base_url.trim_end_matches('/');
        reqwest::Url::parse(base)
            .map_err(|e| UploadError::InvalidConfiguration(format!("server URL {base}: {e}")))?;

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| UploadError::InvalidConfiguration(e.to_string()))?;

        Ok(Self {
            http,
            endpoint: format!("{base}{WS_PATH}"),
            credentials: None,
        })
    }

    /// Sends `username`/`password` fields with every chunk.
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn build_form(
        &self,
        request: ChunkRequest,
        progress: ByteProgress,
    ) -> Result<Form, UploadError> {
        let mut form = Form::new();
        if let Some(creds) = &self.credentials {
            form = form
                .text(field::USERNAME, creds.username.clone())
                .text(field::PASSWORD, creds.password.clone());
        }
        for (name, value) in request.fields {
            form = form.text(name, value);
        }

        let len = request.data.len() as u64;
        let part = Part::stream_with_length(progress_body(request.data, progress), len)
            .file_name(request.file_name)
            .mime_str(&request.mime_type)
            .map_err(|e| UploadError::InvalidConfiguration(e.to_string()))?;
        Ok(form.part(FILE_PART, part))
    }
}

/// Streams `data` in pieces, reporting the running byte count as each piece is pulled.
fn progress_body(data: Bytes, progress: ByteProgress) -> reqwest::Body {
    let len = data.len();
    let pieces: Vec<Bytes> = (0..len)
        .step_by(STREAM_PIECE)
        .map(|start| data.slice(start..(start + STREAM_PIECE).min(len)))
        .collect();

    let mut sent = 0u64;
    let stream = futures_util::stream::iter(pieces).map(move |piece| {
        sent += piece.len() as u64;
        progress.report(sent);
        Ok::<_, std::io::Error>(piece)
    });
    reqwest::Body::wrap_stream(stream)
}

impl ChunkTransport for ReqwestTransport {
    fn post_chunk(
        &self,
        request: ChunkRequest,
        progress: ByteProgress,
    ) -> Pin<Box<dyn Future<Output = Result<TransportResponse, UploadError>> + Send + '_>> {
        Box::pin(async move {
            let index = request.index;
            let total = request.total;
            let form = self.build_form(request, progress)?;

            let resp = self
                .http
                .post(&self.endpoint)
                .query(&[("format", "json"), ("method", UPLOAD_METHOD)])
                .multipart(form)
                .send()
                .await?;
            let status = resp.status().as_u16();
            let body = resp.bytes().await?;

            debug!(chunk = index, total, status, "chunk response");
            Ok(TransportResponse { status, body })
        })
    }
}

//! Outbound calls to the remote study service, wrapped into uniform
//! request/response or request/stream contracts so controllers never see
//! wire details.

use std::{pin::Pin, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::{
    multipart::{Form, Part},
    StatusCode,
};
use shared::{
    domain::UserId,
    error::ErrorBody,
    protocol::{AskResponse, DocumentSummary, Quiz, UploadResponse},
};
use url::Url;

use crate::error::SessionError;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Incremental answer bytes. The stream ending cleanly is the completion
/// signal; an `Err` item is terminal and must not be read past.
pub type AnswerStream = Pin<Box<dyn Stream<Item = Result<Bytes, SessionError>> + Send>>;

/// A single file handed to `upload`. The boundary accepts exactly one PDF
/// per submission; format checks happen before this type is built.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// The remote service surface. `upload` and `delete_document` have real
/// side effects and are never retried at this layer; retry policy belongs
/// to callers.
#[async_trait]
pub trait StudyGateway: Send + Sync {
    async fn upload(
        &self,
        user: &UserId,
        request: &UploadRequest,
    ) -> Result<UploadResponse, SessionError>;

    async fn list_documents(&self, user: &UserId) -> Result<Vec<DocumentSummary>, SessionError>;

    async fn delete_document(&self, user: &UserId, filename: &str) -> Result<(), SessionError>;

    async fn ask(&self, user: &UserId, query: &str) -> Result<AskResponse, SessionError>;

    async fn ask_streaming(&self, user: &UserId, query: &str)
        -> Result<AnswerStream, SessionError>;

    async fn generate_quiz(&self, user: &UserId) -> Result<Quiz, SessionError>;
}

/// HTTP implementation against the FastAPI-shaped service.
pub struct HttpGateway {
    http: reqwest::Client,
    base_url: Url,
    request_timeout: Duration,
}

impl HttpGateway {
    /// `request_timeout` bounds every non-streaming round trip. Streaming
    /// answers get the connect timeout only; a long answer may legitimately
    /// take longer than any fixed deadline.
    pub fn new(base_url: Url, request_timeout: Duration) -> Result<Self, SessionError> {
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            base_url,
            request_timeout,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, SessionError> {
        self.base_url
            .join(path)
            .map_err(|err| SessionError::Transport(format!("invalid endpoint {path}: {err}")))
    }

    fn document_endpoint(&self, filename: &str) -> Result<Url, SessionError> {
        let mut url = self.endpoint("/documents/")?;
        url.path_segments_mut()
            .map_err(|()| SessionError::Transport("server url cannot be a base".into()))?
            .pop_if_empty()
            .push(filename);
        Ok(url)
    }
}

/// Human-readable reason for a non-2xx response: the service's `detail`
/// field when the body parses, the status line otherwise.
async fn failure_reason(response: reqwest::Response) -> String {
    let status = response.status();
    match response.json::<ErrorBody>().await {
        Ok(body) => body.detail,
        Err(_) => format!("server returned {status}"),
    }
}

fn query_form(user: &UserId, query: &str) -> Form {
    Form::new()
        .text("user_id", user.to_string())
        .text("query", query.to_string())
}

#[async_trait]
impl StudyGateway for HttpGateway {
    async fn upload(
        &self,
        user: &UserId,
        request: &UploadRequest,
    ) -> Result<UploadResponse, SessionError> {
        let part = Part::bytes(request.bytes.clone())
            .file_name(request.filename.clone())
            .mime_str("application/pdf")?;
        let form = Form::new()
            .text("user_id", user.to_string())
            .part("file", part);

        let response = self
            .http
            .post(self.endpoint("/upload/")?)
            .timeout(self.request_timeout)
            .multipart(form)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(SessionError::UploadRejected(failure_reason(response).await));
        }
        Ok(response.json().await?)
    }

    async fn list_documents(&self, user: &UserId) -> Result<Vec<DocumentSummary>, SessionError> {
        let response = self
            .http
            .get(self.endpoint("/documents/")?)
            .query(&[("user_id", user.as_str())])
            .timeout(self.request_timeout)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(SessionError::Transport(failure_reason(response).await));
        }
        Ok(response.json().await?)
    }

    async fn delete_document(&self, user: &UserId, filename: &str) -> Result<(), SessionError> {
        let response = self
            .http
            .delete(self.document_endpoint(filename)?)
            .query(&[("user_id", user.as_str())])
            .timeout(self.request_timeout)
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(SessionError::NotFound(filename.to_string()));
        }
        if !response.status().is_success() {
            return Err(SessionError::Transport(failure_reason(response).await));
        }
        Ok(())
    }

    async fn ask(&self, user: &UserId, query: &str) -> Result<AskResponse, SessionError> {
        let response = self
            .http
            .post(self.endpoint("/chat/")?)
            .timeout(self.request_timeout)
            .multipart(query_form(user, query))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(SessionError::Transport(failure_reason(response).await));
        }
        Ok(response.json().await?)
    }

    async fn ask_streaming(
        &self,
        user: &UserId,
        query: &str,
    ) -> Result<AnswerStream, SessionError> {
        let response = self
            .http
            .post(self.endpoint("/chat/stream")?)
            .multipart(query_form(user, query))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(SessionError::Transport(failure_reason(response).await));
        }
        let chunks = response
            .bytes_stream()
            .map(|item| item.map_err(|err| SessionError::StreamInterrupted(err.to_string())));
        Ok(Box::pin(chunks))
    }

    async fn generate_quiz(&self, user: &UserId) -> Result<Quiz, SessionError> {
        let response = self
            .http
            .post(self.endpoint("/generate-quiz")?)
            .timeout(self.request_timeout)
            .multipart(Form::new().text("user_id", user.to_string()))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(SessionError::QuizGeneration(failure_reason(response).await));
        }
        Ok(response.json().await?)
    }
}

#[cfg(test)]
#[path = "tests/transport_tests.rs"]
mod tests;

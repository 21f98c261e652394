use std::{error::Error as StdError, fmt};

use serde::Serialize;
use serde_json::Value;

const BODY_PREVIEW_LIMIT: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceHttpErrorKind {
    Timeout,
    Connect,
    Request,
    Body,
    Decode,
    Status,
    Unknown,
}

impl ServiceHttpErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Connect => "connect",
            Self::Request => "request",
            Self::Body => "body",
            Self::Decode => "decode",
            Self::Status => "status",
            Self::Unknown => "unknown",
        }
    }

    /// Transport-level failures another attempt could get past. `Status` is
    /// decided per code by [`ServiceHttpError::is_retryable`].
    pub fn is_transient(self) -> bool {
        matches!(self, Self::Timeout | Self::Connect | Self::Body)
    }
}

impl fmt::Display for ServiceHttpErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
pub struct ServiceHttpError {
    kind: ServiceHttpErrorKind,
    status: Option<u16>,
    url: Option<String>,
    message: String,
    source: Option<anyhow::Error>,
}

impl ServiceHttpError {
    pub fn kind(&self) -> ServiceHttpErrorKind {
        self.kind
    }

    pub fn status(&self) -> Option<u16> {
        self.status
    }

    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    /// Whether the same request may succeed later. Throttling (429), request
    /// timeouts (408) and server errors are; any other client error repeats.
    pub fn is_retryable(&self) -> bool {
        match (self.kind, self.status) {
            (ServiceHttpErrorKind::Status, Some(code)) => {
                matches!(code, 408 | 429) || code >= 500
            }
            (kind, _) => kind.is_transient(),
        }
    }

    fn from_reqwest(err: reqwest::Error, url: String) -> Self {
        let kind = if err.is_timeout() {
            ServiceHttpErrorKind::Timeout
        } else if err.is_connect() {
            ServiceHttpErrorKind::Connect
        } else if err.is_request() {
            ServiceHttpErrorKind::Request
        } else if err.is_body() {
            ServiceHttpErrorKind::Body
        } else if err.is_decode() {
            ServiceHttpErrorKind::Decode
        } else {
            ServiceHttpErrorKind::Unknown
        };
        ServiceHttpError {
            kind,
            status: err.status().map(|s| s.as_u16()),
            url: Some(url),
            message: err.to_string(),
            source: Some(anyhow::Error::new(err)),
        }
    }

    fn status_error(status: u16, url: String, preview: String) -> Self {
        ServiceHttpError {
            kind: ServiceHttpErrorKind::Status,
            status: Some(status),
            url: Some(url),
            message: preview,
            source: None,
        }
    }

    fn decode_error(status: u16, url: String, err: serde_json::Error, preview: String) -> Self {
        ServiceHttpError {
            kind: ServiceHttpErrorKind::Decode,
            status: Some(status),
            url: Some(url),
            message: format!("failed to decode response body: {} | body={}", err, preview),
            source: Some(anyhow::Error::new(err)),
        }
    }
}

impl fmt::Display for ServiceHttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ai service http error kind={}", self.kind)?;
        if let Some(status) = self.status {
            write!(f, " status={}", status)?;
        }
        if let Some(url) = &self.url {
            write!(f, " url={}", url)?;
        }
        write!(f, ": {}", self.message)
    }
}

impl StdError for ServiceHttpError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|err| &**err as &(dyn StdError + 'static))
    }
}

fn preview_body(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "<empty body>".to_string();
    }

    let mut out: String = trimmed.chars().take(BODY_PREVIEW_LIMIT).collect();
    if trimmed.chars().nth(BODY_PREVIEW_LIMIT).is_some() {
        out.push_str("...");
    }
    out
}

async fn parse_json_response(resp: reqwest::Response) -> anyhow::Result<Value> {
    let status = resp.status();
    let url = resp.url().to_string();
    let body = resp
        .text()
        .await
        .map_err(|err| ServiceHttpError::from_reqwest(err, url.clone()))?;

    if !status.is_success() {
        let preview = preview_body(&body);
        return Err(ServiceHttpError::status_error(status.as_u16(), url, preview).into());
    }

    if body.trim().is_empty() {
        return Ok(Value::Null);
    }

    serde_json::from_str::<Value>(&body).map_err(|err| {
        let preview = preview_body(&body);
        ServiceHttpError::decode_error(status.as_u16(), url, err, preview).into()
    })
}

/// Thin JSON client for the documentation AI service.
#[derive(Clone)]
pub struct AiServiceClient {
    api_key: String,
    http: reqwest::Client,
    base_url: String,
}

impl AiServiceClient {
    pub fn new(base_url: &str, api_key: String, timeout_ms: u64) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_millis(timeout_ms))
            .build()?;
        Ok(Self {
            api_key,
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if self.api_key.trim().is_empty() {
            req
        } else {
            req.bearer_auth(&self.api_key)
        }
    }

    /// POST `payload` to `<base>/<path>` and decode the JSON reply.
    pub async fn post<P: Serialize + ?Sized>(&self, path: &str, payload: &P) -> anyhow::Result<Value> {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        tracing::debug!(target: "docmigrate.service", url = %url, "request");
        let req = self.http.post(&url).json(payload);
        let resp = self
            .auth(req)
            .send()
            .await
            .map_err(|err| ServiceHttpError::from_reqwest(err, url.clone()))?;
        let status = resp.status();
        let v = parse_json_response(resp).await?;
        tracing::debug!(target: "docmigrate.service", url = %url, status = %status, "response");
        Ok(v)
    }
}

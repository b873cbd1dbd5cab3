use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use futures_util::stream::Stream;
use reqwest::{Client, StatusCode};
use serde::{Serialize, de::DeserializeOwned};

use crate::config::HttpCfg;
use crate::error::{CoreResult, TraceguardError};

/// One line of a Server-Sent-Events body, without its line terminator.
#[derive(Debug, Clone)]
pub struct SseLine {
    pub line: String,
}

impl SseLine {
    /// Payload of a `data:` line.
    pub fn data(&self) -> Option<&str> {
        self.line
            .strip_prefix("data:")
            .map(|d| d.strip_prefix(' ').unwrap_or(d))
    }
}

pub type SseStream = Pin<Box<dyn Stream<Item = CoreResult<SseLine>> + Send>>;

/// Thin wrapper around reqwest::Client with defaults and helpers.
#[derive(Debug, Clone)]
pub struct HttpClient {
    inner: Client,
    user_agent: String,
}

impl HttpClient {
    pub fn new_default() -> CoreResult<Self> {
        Self::from_cfg(&HttpCfg::default())
    }

    pub fn from_cfg(cfg: &HttpCfg) -> CoreResult<Self> {
        let mut builder = Client::builder()
            .connect_timeout(Duration::from_millis(cfg.connect_timeout_ms))
            .timeout(Duration::from_millis(cfg.request_timeout_ms));
        if let Some(n) = cfg.pool_max_idle_per_host {
            builder = builder.pool_max_idle_per_host(n);
        }
        let inner = builder
            .build()
            .map_err(|e| TraceguardError::Other(anyhow::anyhow!("http client build failed: {e}")))?;
        Ok(Self {
            inner,
            user_agent: concat!("traceguard/", env!("CARGO_PKG_VERSION")).to_string(),
        })
    }

    fn request<T: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &T,
        headers: &[(&str, &str)],
    ) -> reqwest::RequestBuilder {
        let mut req = self
            .inner
            .post(url)
            .json(body)
            .header("User-Agent", &self.user_agent);
        for (k, v) in headers {
            req = req.header(*k, *v);
        }
        req
    }

    pub async fn post_json<T: Serialize + ?Sized, R: DeserializeOwned>(
        &self,
        url: &str,
        body: &T,
        headers: &[(&str, &str)],
    ) -> CoreResult<R> {
        let start = Instant::now();
        let resp = self
            .request(url, body, headers)
            .send()
            .await
            .map_err(|_e| TraceguardError::ProviderUnavailable {
                provider: "http".into(),
            })?;

        let status = resp.status();
        let resp_headers = resp.headers().clone();
        tracing::debug!(
            %url,
            status = status.as_u16(),
            latency_ms = start.elapsed().as_millis() as u64,
            request_id = extract_request_id(&resp_headers).as_deref(),
            "http response"
        );

        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            let ra = parse_retry_after(&resp_headers);
            return Err(map_http_error("http", status, ra, &text));
        }

        resp.json::<R>()
            .await
            .map_err(|e| TraceguardError::ProviderError {
                provider: "http".into(),
                code: status.as_u16().to_string(),
                message: format!("json decode error: {e}"),
            })
    }

    /// POST JSON and return the response body as a stream of SSE lines.
    pub async fn post_sse_lines<T: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &T,
        headers: &[(&str, &str)],
    ) -> CoreResult<SseStream> {
        let resp = self
            .request(url, body, headers)
            .header("Accept", "text/event-stream")
            .send()
            .await
            .map_err(|_| TraceguardError::ProviderUnavailable {
                provider: "http".into(),
            })?;

        let status = resp.status();
        if !status.is_success() {
            let headers = resp.headers().clone();
            let ra = parse_retry_after(&headers);
            let body = resp.text().await.unwrap_or_default();
            return Err(map_http_error("http", status, ra, &body));
        }

        Ok(Box::pin(LineStream::new(Box::pin(resp.bytes_stream()))))
    }
}

fn extract_request_id(headers: &reqwest::header::HeaderMap) -> Option<String> {
    static CANDIDATES: [&str; 3] = ["x-request-id", "request-id", "openai-request-id"];
    for k in CANDIDATES {
        if let Some(v) = headers.get(k)
            && let Ok(s) = v.to_str()
        {
            return Some(s.to_string());
        }
    }
    None
}

fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    if let Some(v) = headers.get("retry-after")
        && let Ok(s) = v.to_str()
        && let Ok(secs) = s.trim().parse::<u64>()
    {
        return Some(secs);
    }
    None
}

fn map_http_error(provider: &str, status: StatusCode, retry_after: Option<u64>, body: &str) -> TraceguardError {
    match status {
        StatusCode::TOO_MANY_REQUESTS => TraceguardError::RateLimited {
            provider: provider.to_string(),
            retry_after,
        },
        s if s.is_server_error() => TraceguardError::ProviderUnavailable {
            provider: provider.to_string(),
        },
        s => TraceguardError::ProviderError {
            provider: provider.to_string(),
            code: s.as_u16().to_string(),
            message: truncate(body, 300),
        },
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}

type ByteStream = Pin<Box<dyn Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send>>;

/// Splits a byte stream on '\n'; a trailing partial line is flushed at the end.
struct LineStream {
    inner: ByteStream,
    buf: String,
    flushed_tail: bool,
}

impl LineStream {
    fn new(inner: ByteStream) -> Self {
        Self {
            inner,
            buf: String::new(),
            flushed_tail: false,
        }
    }
}

impl Stream for LineStream {
    type Item = CoreResult<SseLine>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            if let Some(idx) = self.buf.find('\n') {
                let mut line: String = self.buf.drain(..=idx).collect();
                line.pop();
                if line.ends_with('\r') {
                    line.pop();
                }
                return Poll::Ready(Some(Ok(SseLine { line })));
            }

            match self.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => {
                    let s = String::from_utf8_lossy(&chunk);
                    self.buf.push_str(&s);
                }
                Poll::Ready(Some(Err(_e))) => {
                    return Poll::Ready(Some(Err(TraceguardError::ProviderUnavailable {
                        provider: "http".into(),
                    })));
                }
                Poll::Ready(None) => {
                    if !self.flushed_tail && !self.buf.is_empty() {
                        self.flushed_tail = true;
                        let line = std::mem::take(&mut self.buf);
                        return Poll::Ready(Some(Ok(SseLine { line })));
                    }
                    return Poll::Ready(None);
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

//! HTTP client wrapper for ARM and App Configuration REST endpoints.
//!
//! Handles bearer-token injection, retries on throttling and server errors,
//! ARM error-body extraction, long-running operation polling and both
//! `nextLink` and `Link: <...>; rel="next"` pagination.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Method};
use serde::Serialize;
use serde_json::Value;

use crate::error::{AzCliError, HttpError};

/// Maximum retries for throttling and transient server errors.
const MAX_RETRIES: u32 = 3;

/// Base delay between retries (doubled each attempt).
const BASE_DELAY_MS: u64 = 500;

/// Statuses worth another attempt.
fn should_retry(status: u16) -> bool {
    status == 429 || (500..=599).contains(&status)
}

/// Per-request conditional and point-in-time headers.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub if_match: Option<String>,
    pub if_none_match: Option<String>,
    /// RFC 1123 timestamp for point-in-time reads.
    pub accept_datetime: Option<String>,
    /// Overrides `application/json` for the request body.
    pub content_type: Option<String>,
}

impl RequestOptions {
    pub fn with_if_match(mut self, etag: impl Into<String>) -> Self {
        self.if_match = Some(etag.into());
        self
    }

    pub fn with_if_none_match(mut self, etag: impl Into<String>) -> Self {
        self.if_none_match = Some(etag.into());
        self
    }

    pub fn with_accept_datetime(mut self, datetime: Option<String>) -> Self {
        self.accept_datetime = datetime;
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

/// Successful response with a decoded JSON body, if any.
#[derive(Debug, Clone)]
pub struct RestResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Option<Value>,
}

impl RestResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn into_body(self) -> Value {
        self.body.unwrap_or(Value::Null)
    }
}

/// An ARM operation accepted but not yet finished.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LongRunningOperation {
    pub resource_url: String,
    pub async_operation_url: Option<String>,
    pub location_url: Option<String>,
    /// Body of the accepted response.
    pub initial: Value,
}

/// Parse an error body into an [`HttpError`].
///
/// Understands ARM `{"error": {"code", "message"}}`, the flat `{"code", "message"}`
/// form and App Configuration problem documents (`{"type", "title", "detail"}`).
pub fn parse_error_body(status: u16, body: &str) -> HttpError {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    let inner = parsed
        .as_ref()
        .map(|v| v.get("error").unwrap_or(v))
        .filter(|v| v.is_object());

    match inner {
        Some(obj) => {
            let code = obj
                .get("code")
                .and_then(Value::as_str)
                .map(str::to_string);
            let message = obj
                .get("message")
                .or_else(|| obj.get("detail"))
                .or_else(|| obj.get("title"))
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| body.to_string());
            HttpError::new(status, code, message)
        }
        None if body.trim().is_empty() => {
            HttpError::new(status, None, format!("request failed with status {}", status))
        }
        None => HttpError::new(status, None, body.trim().to_string()),
    }
}

/// Pull the `rel="next"` target out of a `Link` header.
pub fn parse_next_link(header: &str) -> Option<String> {
    header.split(',').find_map(|part| {
        let mut pieces = part.split(';');
        let target = pieces.next()?.trim();
        let is_next = pieces.any(|p| {
            let p = p.trim().replace(' ', "");
            p == "rel=\"next\"" || p == "rel=next"
        });
        if !is_next {
            return None;
        }
        target
            .strip_prefix('<')
            .and_then(|t| t.strip_suffix('>'))
            .map(str::to_string)
    })
}

/// Bearer-authenticated JSON client.
#[derive(Debug, Clone)]
pub struct RestClient {
    http: Client,
    token: String,
}

impl RestClient {
    pub fn new(token: impl Into<String>, timeout_secs: u64) -> crate::Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| AzCliError::Cli(format!("failed to build HTTP client: {}", e)))?;
        Ok(RestClient {
            http,
            token: token.into(),
        })
    }

    fn headers(&self, opts: &RequestOptions) -> crate::Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        let bearer = format!("Bearer {}", self.token);
        headers.insert(AUTHORIZATION, header_value(&bearer)?);
        let content_type = opts.content_type.as_deref().unwrap_or("application/json");
        headers.insert(CONTENT_TYPE, header_value(content_type)?);
        if let Some(etag) = &opts.if_match {
            headers.insert("If-Match", header_value(&quote_etag(etag))?);
        }
        if let Some(etag) = &opts.if_none_match {
            headers.insert("If-None-Match", header_value(&quote_etag(etag))?);
        }
        if let Some(dt) = &opts.accept_datetime {
            headers.insert("Accept-Datetime", header_value(dt)?);
        }
        Ok(headers)
    }

    /// Send a request, retrying throttling and 5xx responses.
    ///
    /// Any status outside 2xx is returned as [`AzCliError::Http`].
    pub async fn send(
        &self,
        method: Method,
        url: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
        opts: &RequestOptions,
    ) -> crate::Result<RestResponse> {
        let headers = self.headers(opts)?;

        for attempt in 0..=MAX_RETRIES {
            let mut req = self
                .http
                .request(method.clone(), url)
                .headers(headers.clone())
                .query(query);
            if let Some(b) = body {
                req = req.json(b);
            }
            let resp = req
                .send()
                .await
                .map_err(|e| AzCliError::Cli(format!("request to {} failed: {}", url, e)))?;

            let status = resp.status().as_u16();
            if resp.status().is_success() {
                let headers = resp.headers().clone();
                let text = resp
                    .text()
                    .await
                    .map_err(|e| AzCliError::Cli(format!("failed to read response: {}", e)))?;
                let body = if text.trim().is_empty() {
                    None
                } else {
                    Some(serde_json::from_str(&text).map_err(|e| {
                        AzCliError::Cli(format!("invalid JSON from {}: {}", url, e))
                    })?)
                };
                return Ok(RestResponse {
                    status,
                    headers,
                    body,
                });
            }

            if should_retry(status) && attempt < MAX_RETRIES {
                let delay = BASE_DELAY_MS * 2u64.pow(attempt);
                tracing::debug!(%method, url, status, delay_ms = delay, "retrying request");
                tokio::time::sleep(Duration::from_millis(delay)).await;
                continue;
            }

            let text = resp.text().await.unwrap_or_default();
            return Err(parse_error_body(status, &text).into());
        }

        Err(AzCliError::Cli(format!("max retries exceeded for {}", url)))
    }

    pub async fn get(&self, url: &str, query: &[(&str, String)]) -> crate::Result<Value> {
        self.send(Method::GET, url, query, None, &RequestOptions::default())
            .await
            .map(RestResponse::into_body)
    }

    /// GET that maps 404 to `None`.
    pub async fn get_optional(
        &self,
        url: &str,
        query: &[(&str, String)],
        opts: &RequestOptions,
    ) -> crate::Result<Option<Value>> {
        match self.send(Method::GET, url, query, None, opts).await {
            Ok(resp) => Ok(Some(resp.into_body())),
            Err(AzCliError::Http(e)) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn put(
        &self,
        url: &str,
        query: &[(&str, String)],
        body: &Value,
        opts: &RequestOptions,
    ) -> crate::Result<RestResponse> {
        self.send(Method::PUT, url, query, Some(body), opts).await
    }

    pub async fn patch(
        &self,
        url: &str,
        query: &[(&str, String)],
        body: &Value,
        opts: &RequestOptions,
    ) -> crate::Result<RestResponse> {
        self.send(Method::PATCH, url, query, Some(body), opts).await
    }

    pub async fn post(
        &self,
        url: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
    ) -> crate::Result<RestResponse> {
        self.send(Method::POST, url, query, body, &RequestOptions::default())
            .await
    }

    pub async fn delete(
        &self,
        url: &str,
        query: &[(&str, String)],
        opts: &RequestOptions,
    ) -> crate::Result<RestResponse> {
        self.send(Method::DELETE, url, query, None, opts).await
    }

    /// Collect `items` across pages, following `nextLink` or a `Link` header.
    ///
    /// Stops once `limit` items are collected. Relative links resolve against
    /// the request URL.
    pub async fn list_paged(
        &self,
        url: &str,
        query: &[(&str, String)],
        items_field: &str,
        opts: &RequestOptions,
        limit: Option<usize>,
    ) -> crate::Result<Vec<Value>> {
        let mut out = Vec::new();
        let mut resp = self.send(Method::GET, url, query, None, opts).await?;
        let mut current = url.to_string();

        loop {
            let next_from_header = resp.header("link").and_then(parse_next_link);
            let body = resp.into_body();
            if let Some(items) = body.get(items_field).and_then(Value::as_array) {
                out.extend(items.iter().cloned());
            }
            if limit.is_some_and(|l| out.len() >= l) {
                out.truncate(limit.unwrap_or(out.len()));
                break;
            }

            let next = body
                .get("nextLink")
                .or_else(|| body.get("@nextLink"))
                .and_then(Value::as_str)
                .map(str::to_string)
                .or(next_from_header);
            let Some(next) = next else { break };
            let next = resolve_link(&current, &next)?;
            resp = self.send(Method::GET, &next, &[], None, opts).await?;
            current = next;
        }

        Ok(out)
    }

    /// Begin an ARM PUT and capture what is needed to poll it.
    pub async fn begin_put(
        &self,
        url: &str,
        query: &[(&str, String)],
        body: &Value,
    ) -> crate::Result<LongRunningOperation> {
        let resp = self.put(url, query, body, &RequestOptions::default()).await?;
        let async_operation_url = resp.header("azure-asyncoperation").map(str::to_string);
        let location_url = resp.header("location").map(str::to_string);

        let mut resource_url = url::Url::parse(url)
            .map_err(|e| AzCliError::Internal(format!("invalid url '{}': {}", url, e)))?;
        resource_url
            .query_pairs_mut()
            .extend_pairs(query.iter().map(|(k, v)| (*k, v.as_str())));

        Ok(LongRunningOperation {
            resource_url: resource_url.to_string(),
            async_operation_url,
            location_url,
            initial: resp.into_body(),
        })
    }

    /// Poll a long-running operation to completion and return the final resource.
    pub async fn wait(
        &self,
        op: &LongRunningOperation,
        poll_interval: Duration,
    ) -> crate::Result<Value> {
        if let Some(status_url) = &op.async_operation_url {
            loop {
                let status = self.get(status_url, &[]).await?;
                let state = status
                    .get("status")
                    .and_then(Value::as_str)
                    .unwrap_or("InProgress");
                tracing::debug!(url = %status_url, state, "polling operation");
                match state.to_ascii_lowercase().as_str() {
                    "succeeded" => break,
                    "failed" | "canceled" | "cancelled" => {
                        let err = status.get("error").cloned().unwrap_or(Value::Null);
                        let text = serde_json::json!({ "error": err }).to_string();
                        return Err(parse_error_body(500, &text).into());
                    }
                    _ => tokio::time::sleep(poll_interval).await,
                }
            }
        } else if let Some(location) = &op.location_url {
            loop {
                let resp = self
                    .send(Method::GET, location, &[], None, &RequestOptions::default())
                    .await?;
                if resp.status != 202 {
                    break;
                }
                tokio::time::sleep(poll_interval).await;
            }
        } else if !op.initial.is_null() {
            return Ok(op.initial.clone());
        }

        self.get(&op.resource_url, &[]).await
    }
}

fn header_value(value: &str) -> crate::Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|e| AzCliError::Internal(format!("invalid header value: {}", e)))
}

fn quote_etag(etag: &str) -> String {
    if etag == "*" || etag.starts_with('"') {
        etag.to_string()
    } else {
        format!("\"{}\"", etag)
    }
}

fn resolve_link(base: &str, link: &str) -> crate::Result<String> {
    let base = url::Url::parse(base)
        .map_err(|e| AzCliError::Internal(format!("invalid url '{}': {}", base, e)))?;
    base.join(link)
        .map(|u| u.to_string())
        .map_err(|e| AzCliError::Internal(format!("invalid next link '{}': {}", link, e)))
}

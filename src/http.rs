//! HTTP plumbing shared by the drivers.

use crate::driver::sniff_mime;
use crate::error::{parse_retry_after, sanitize_error_message, DriverError, Result};
use std::time::Duration;

/// Builds an HTTP client.
///
/// With `use_proxy == false` the client ignores `HTTP(S)_PROXY` variables,
/// which local services and some domestic endpoints need.
pub fn client(use_proxy: bool, timeout: Option<Duration>) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder();
    if !use_proxy {
        builder = builder.no_proxy();
    }
    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }
    Ok(builder.build()?)
}

/// Converts a non-success response into a driver error.
///
/// JSON bodies are mined for `detail`, `message` or `error.message`; the raw
/// body is used otherwise.
pub async fn api_error(label: &str, response: reqwest::Response) -> DriverError {
    let status = response.status().as_u16();
    let headers = response.headers().clone();
    let text = response.text().await.unwrap_or_default();
    error_from_parts(label, status, &headers, &text)
}

pub(crate) fn error_from_parts(
    label: &str,
    status: u16,
    headers: &reqwest::header::HeaderMap,
    text: &str,
) -> DriverError {
    let detail = extract_message(text).unwrap_or_else(|| text.to_string());
    let message = sanitize_error_message(&format!("{}: {}", label, detail));

    match status {
        401 | 403 => DriverError::Auth(message),
        402 => DriverError::Billing(message),
        429 => DriverError::RateLimited {
            retry_after: parse_retry_after(headers).map(Duration::from_secs),
        },
        _ => DriverError::Api { status, message },
    }
}

fn extract_message(text: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(text).ok()?;
    let pick = |v: &serde_json::Value| v.as_str().map(str::to_string);

    pick(&value["detail"])
        .or_else(|| pick(&value["message"]))
        .or_else(|| pick(&value["error"]["message"]))
        .or_else(|| pick(&value["error"]))
        .map(|msg| match value.get("code").and_then(code_as_string) {
            Some(code) if !msg.contains(&code) => format!("{} - {}", code, msg),
            _ => msg,
        })
}

fn code_as_string(v: &serde_json::Value) -> Option<String> {
    match v {
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        serde_json::Value::Number(n) if n.as_i64() != Some(0) => Some(n.to_string()),
        _ => None,
    }
}

/// A downloaded payload.
#[derive(Debug, Clone)]
pub struct Downloaded {
    /// Raw bytes.
    pub bytes: Vec<u8>,
    /// `Content-Type` header, if any.
    pub content_type: Option<String>,
}

impl Downloaded {
    /// Resolves the MIME type of this payload.
    pub fn mime_type(&self, fallback: &str) -> String {
        resolve_mime(self.content_type.as_deref(), &self.bytes, fallback)
    }
}

/// Downloads a result file, optionally with a bearer token.
pub async fn download(
    client: &reqwest::Client,
    url: &str,
    bearer: Option<&str>,
) -> Result<Downloaded> {
    let mut request = client.get(url);
    if let Some(token) = bearer {
        request = request.bearer_auth(token);
    }
    let response = request.send().await?;
    read_body(response).await
}

/// Reads a successful binary response body.
pub async fn read_body(response: reqwest::Response) -> Result<Downloaded> {
    let status = response.status();
    if !status.is_success() {
        if status.as_u16() == 403 || status.as_u16() == 410 {
            return Err(DriverError::UrlExpired);
        }
        return Err(DriverError::Api {
            status: status.as_u16(),
            message: "Failed to download result".into(),
        });
    }

    let content_type = content_type(&response);
    let bytes = response.bytes().await?.to_vec();
    Ok(Downloaded {
        bytes,
        content_type,
    })
}

pub(crate) fn content_type(response: &reqwest::Response) -> Option<String> {
    response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Picks a MIME type: the header (without parameters), then magic bytes, then `fallback`.
pub fn resolve_mime(content_type: Option<&str>, bytes: &[u8], fallback: &str) -> String {
    let header = content_type
        .and_then(|ct| ct.split(';').next())
        .map(str::trim)
        .filter(|ct| !ct.is_empty() && !ct.eq_ignore_ascii_case("application/octet-stream"));

    header
        .map(str::to_string)
        .or_else(|| sniff_mime(bytes).map(str::to_string))
        .unwrap_or_else(|| fallback.to_string())
}

/// Joins a base URL and a path without doubling slashes.
pub fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

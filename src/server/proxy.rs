//! # Metadata Pass-through Proxy
//!
//! Forwards every request the broker does not answer itself to the real
//! instance metadata service.
//!
//! The caller address is passed on in `X-Forwarded-For`, except for the IMDSv2
//! token exchange: a `PUT` to the token path, or a `GET` carrying a session
//! token. The metadata service rejects token requests that carry a forwarded
//! address, and forwarding it would tie a token to a pod address that the
//! service cannot verify.

use std::net::{IpAddr, SocketAddr};
use std::sync::LazyLock;

use anyhow::{Context, Result};
use axum::body::{to_bytes, Body};
use axum::extract::{ConnectInfo, Request, State};
use axum::http::header::{self, HeaderMap, HeaderName, HeaderValue};
use axum::http::Method;
use axum::response::{IntoResponse, Response};
use regex::Regex;
use tracing::{debug, warn};

use super::{caller_address, AppState};
use crate::constants::METADATA_TOKEN_HEADER;
use crate::error::BrokerError;
use crate::observability::metrics;

/// Largest request or response body relayed by the proxy
const MAX_PROXY_BODY_BYTES: usize = 1024 * 1024;

static TOKEN_ROUTE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^/?[^/]+/api/token$")
        .expect("Failed to compile TOKEN_ROUTE_REGEX - this should never happen")
});

static X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");

/// Headers that only apply to a single connection
static HOP_BY_HOP_HEADERS: [HeaderName; 8] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// Whether a request is part of the token exchange and must not carry the caller address
pub fn should_clear_caller_address(method: &Method, path: &str, headers: &HeaderMap) -> bool {
    let token_request = *method == Method::PUT && TOKEN_ROUTE_REGEX.is_match(path);
    let token_read = *method == Method::GET
        && headers
            .get(METADATA_TOKEN_HEADER)
            .is_some_and(|value| !value.is_empty());
    token_request || token_read
}

/// HTTP client for the real metadata service
#[derive(Debug, Clone)]
pub struct MetadataProxy {
    client: reqwest::Client,
    base_url: String,
}

impl MetadataProxy {
    /// Proxy to `metadata_address` (`host` or `host:port`) over plain HTTP
    pub fn new(metadata_address: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .no_proxy()
            .build()
            .context("Failed to build metadata proxy client")?;
        Ok(Self {
            client,
            base_url: format!("http://{}", metadata_address.trim_end_matches('/')),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Relay `request` to the metadata service
    ///
    /// `caller` is appended to `X-Forwarded-For` when present.
    pub async fn forward(
        &self,
        caller: Option<IpAddr>,
        request: Request,
    ) -> Result<Response, BrokerError> {
        let (parts, body) = request.into_parts();
        let path_and_query = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        let url = format!("{}{}", self.base_url, path_and_query);

        let mut headers = parts.headers;
        strip_hop_by_hop(&mut headers);
        headers.remove(header::HOST);
        headers.remove(header::CONTENT_LENGTH);
        if let Some(caller) = caller {
            append_forwarded_for(&mut headers, caller);
        }

        let body = to_bytes(body, MAX_PROXY_BODY_BYTES)
            .await
            .map_err(|e| BrokerError::Validation(format!("unreadable request body: {e}")))?;

        debug!(metadata.url = %url, method = %parts.method, "Proxying metadata request");

        let upstream = self
            .client
            .request(parts.method, &url)
            .headers(headers)
            .body(body)
            .send()
            .await
            .map_err(|e| BrokerError::MetadataUnavailable(e.to_string()))?;

        let status = upstream.status();
        let mut response_headers = upstream.headers().clone();
        strip_hop_by_hop(&mut response_headers);
        response_headers.remove(header::CONTENT_LENGTH);

        let bytes = upstream
            .bytes()
            .await
            .map_err(|e| BrokerError::MetadataUnavailable(e.to_string()))?;

        let mut response = Response::new(Body::from(bytes));
        *response.status_mut() = status;
        *response.headers_mut() = response_headers;
        Ok(response)
    }
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in &HOP_BY_HOP_HEADERS {
        headers.remove(name);
    }
}

fn append_forwarded_for(headers: &mut HeaderMap, caller: IpAddr) {
    let prior: Vec<&str> = headers
        .get_all(&X_FORWARDED_FOR)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .collect();
    let forwarded = if prior.is_empty() {
        caller.to_string()
    } else {
        format!("{}, {}", prior.join(", "), caller)
    };
    match HeaderValue::from_str(&forwarded) {
        Ok(value) => {
            headers.insert(X_FORWARDED_FOR.clone(), value);
        }
        Err(e) => warn!("Dropping unrepresentable X-Forwarded-For value: {}", e),
    }
}

/// Catch-all handler relaying the request to the metadata service
pub async fn forward(
    State(state): State<AppState>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    request: Request,
) -> Response {
    let clear = should_clear_caller_address(request.method(), request.uri().path(), request.headers());
    let caller = (!clear).then(|| remote.ip().to_canonical());
    if clear {
        debug!(
            "Clearing caller address {} for token exchange request",
            caller_address(&remote)
        );
    }

    let response = match state.proxy.forward(caller, request).await {
        Ok(response) => response,
        Err(e) => {
            warn!(metadata.url = %state.proxy.base_url(), "Metadata proxy request failed: {}", e);
            e.into_response()
        }
    };
    metrics::increment_http_responses("proxy", response.status().as_u16());
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers_with_token(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(METADATA_TOKEN_HEADER, HeaderValue::from_str(token).unwrap());
        headers
    }

    #[test]
    fn test_token_put_clears_caller_address() {
        let headers = HeaderMap::new();
        assert!(should_clear_caller_address(&Method::PUT, "/latest/api/token", &headers));
        assert!(should_clear_caller_address(&Method::PUT, "latest/api/token", &headers));
        assert!(!should_clear_caller_address(&Method::PUT, "/latest/api/token/x", &headers));
        assert!(!should_clear_caller_address(&Method::GET, "/latest/api/token", &headers));
    }

    #[test]
    fn test_token_header_clears_caller_address_on_reads() {
        assert!(should_clear_caller_address(
            &Method::GET,
            "/latest/meta-data/instance-id",
            &headers_with_token("AQAEAbc=")
        ));
        assert!(!should_clear_caller_address(
            &Method::GET,
            "/latest/meta-data/instance-id",
            &HeaderMap::new()
        ));
        assert!(!should_clear_caller_address(
            &Method::POST,
            "/latest/meta-data/instance-id",
            &headers_with_token("AQAEAbc=")
        ));
    }

    #[test]
    fn test_append_forwarded_for() {
        let mut headers = HeaderMap::new();
        append_forwarded_for(&mut headers, "10.0.0.5".parse().unwrap());
        assert_eq!(headers.get(&X_FORWARDED_FOR).unwrap(), "10.0.0.5");

        append_forwarded_for(&mut headers, "10.0.0.6".parse().unwrap());
        assert_eq!(headers.get(&X_FORWARDED_FOR).unwrap(), "10.0.0.5, 10.0.0.6");
    }

    #[test]
    fn test_hop_by_hop_headers_are_stripped() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONNECTION, HeaderValue::from_static("close"));
        headers.insert(header::ACCEPT, HeaderValue::from_static("*/*"));
        strip_hop_by_hop(&mut headers);
        assert!(headers.get(header::CONNECTION).is_none());
        assert!(headers.get(header::ACCEPT).is_some());
    }
}

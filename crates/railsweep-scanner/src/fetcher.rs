//! Viewport queries for single tiles.
//!
//! [`classify_response`] turns a raw HTTP response into a [`FetchOutcome`]
//! without doing any I/O, and [`HttpTileFetcher`] wraps it around a reqwest
//! client.

use crate::error::{Result, ScanError, TileError};
use crate::merger::{is_effectively_empty, RawPayload};
use async_trait::async_trait;
use railsweep_core::{Credential, EmptyPayloadPolicy, RemoteConfig, Tile};
use reqwest::header::{self, HeaderMap, HeaderValue};
use serde_json::Value;
use std::time::Duration;

/// Markers of the site's login page.
const LOGIN_PAGE_MARKERS: &[&str] = &[
    "__RequestVerificationToken",
    "name=\"UserName\"",
    "id=\"useR_name\"",
    "Log In",
];

/// Body prefix kept in error messages.
const SNIPPET_LEN: usize = 120;

/// Position of a tile within its sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TilePosition {
    /// Zero-based index in planner order
    pub index: usize,
    /// Number of tiles in the sweep
    pub total: usize,
}

impl TilePosition {
    /// `true` for the first tile of a sweep.
    #[must_use]
    pub fn is_first(&self) -> bool {
        self.index == 0
    }
}

/// Why a response was judged to come from an expired session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExpirySignal {
    /// The server said so: auth status, redirect or login page
    Explicit(String),
    /// All-null payload, classified as expiry by the empty-payload policy
    EmptyPayload,
}

impl ExpirySignal {
    /// `true` for the empty-payload heuristic.
    #[must_use]
    pub fn is_heuristic(&self) -> bool {
        matches!(self, Self::EmptyPayload)
    }
}

impl std::fmt::Display for ExpirySignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Explicit(reason) => write!(f, "{reason}"),
            Self::EmptyPayload => write!(f, "empty payload"),
        }
    }
}

/// Result of querying one tile.
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    /// Parsed viewport payload
    Success(RawPayload),
    /// Session no longer valid
    AuthExpired(ExpirySignal),
    /// Tile yielded no data; the sweep carries on
    TransportError(TileError),
}

/// Queries the remote endpoint for one tile.
#[async_trait]
pub trait TileFetcher: Send + Sync {
    /// Fetch `tile` with `credential`. Never fails; problems are outcomes.
    async fn fetch(
        &self,
        tile: &Tile,
        credential: &Credential,
        position: TilePosition,
    ) -> FetchOutcome;
}

/// The parts of an HTTP response classification looks at.
#[derive(Debug, Clone, Copy)]
pub struct RawResponse<'a> {
    /// HTTP status code
    pub status: u16,
    /// `Content-Type` header
    pub content_type: Option<&'a str>,
    /// `Location` header
    pub location: Option<&'a str>,
    /// Response body
    pub body: &'a str,
}

/// Classify a viewport response.
///
/// In order: auth statuses and redirects are explicit expiry, other non-2xx
/// statuses are transport errors, an HTML login page is explicit expiry, and a
/// body that is not a JSON object is malformed. A JSON object with nothing in
/// it is handed to `policy`.
#[must_use]
pub fn classify_response(
    response: &RawResponse<'_>,
    policy: EmptyPayloadPolicy,
    position: TilePosition,
) -> FetchOutcome {
    let status = response.status;

    if status == 401 || status == 403 {
        return FetchOutcome::AuthExpired(ExpirySignal::Explicit(format!("HTTP {status}")));
    }
    if (300..400).contains(&status) {
        return FetchOutcome::AuthExpired(ExpirySignal::Explicit(format!(
            "HTTP {status} redirect to {}",
            response.location.unwrap_or("<no location>")
        )));
    }
    if !(200..300).contains(&status) {
        return FetchOutcome::TransportError(TileError::Status {
            status,
            snippet: snippet(response.body),
        });
    }

    let is_html = response
        .content_type
        .is_some_and(|ct| ct.to_ascii_lowercase().contains("text/html"))
        || response.body.trim_start().starts_with('<');
    if is_html {
        if looks_like_login_page(response.body) {
            return FetchOutcome::AuthExpired(ExpirySignal::Explicit(
                "login page returned instead of data".to_string(),
            ));
        }
        return FetchOutcome::TransportError(TileError::Malformed(format!(
            "HTML instead of JSON: {}",
            snippet(response.body)
        )));
    }

    let payload = match serde_json::from_str::<Value>(response.body) {
        Ok(Value::Object(map)) => map,
        Ok(other) => {
            return FetchOutcome::TransportError(TileError::Malformed(format!(
                "expected a JSON object, got {}",
                json_kind(&other)
            )));
        }
        Err(e) => return FetchOutcome::TransportError(TileError::Malformed(e.to_string())),
    };

    if is_effectively_empty(&payload) {
        let expired = match policy {
            EmptyPayloadPolicy::FirstTile => position.is_first(),
            EmptyPayloadPolicy::Never => false,
            EmptyPayloadPolicy::Always => true,
        };
        if expired {
            return FetchOutcome::AuthExpired(ExpirySignal::EmptyPayload);
        }
    }

    FetchOutcome::Success(payload)
}

/// `true` if `body` looks like the site's login page.
#[must_use]
pub fn looks_like_login_page(body: &str) -> bool {
    LOGIN_PAGE_MARKERS.iter().any(|marker| body.contains(marker))
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn snippet(body: &str) -> String {
    let trimmed = body.trim();
    match trimmed.char_indices().nth(SNIPPET_LEN) {
        Some((end, _)) => format!("{}...", &trimmed[..end]),
        None => trimmed.to_string(),
    }
}

/// Tile fetcher that POSTs the viewport form to the live endpoint.
pub struct HttpTileFetcher {
    client: reqwest::Client,
    viewport_url: String,
    base_url: String,
    policy: EmptyPayloadPolicy,
}

impl HttpTileFetcher {
    /// Build a fetcher from the remote settings.
    ///
    /// Redirects are not followed: a redirect from the data endpoint means the
    /// session has expired.
    pub fn new(remote: &RemoteConfig, policy: EmptyPayloadPolicy) -> Result<Self> {
        let base_url = remote.base_url.trim_end_matches('/').to_string();

        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT, HeaderValue::from_static("*/*"));
        headers.insert(
            "x-requested-with",
            HeaderValue::from_static("XMLHttpRequest"),
        );
        headers.insert(
            header::ORIGIN,
            HeaderValue::from_str(&base_url).map_err(|e| ScanError::Client(e.to_string()))?,
        );

        let mut builder = reqwest::Client::builder()
            .user_agent(remote.user_agent.clone())
            .default_headers(headers)
            .timeout(Duration::from_secs(remote.timeout_secs))
            .redirect(reqwest::redirect::Policy::none());

        if let Some(proxy_url) = &remote.proxy_url {
            tracing::info!("Using HTTP proxy for viewport requests");
            let proxy =
                reqwest::Proxy::all(proxy_url).map_err(|e| ScanError::Client(e.to_string()))?;
            builder = builder.proxy(proxy);
        }

        let client = builder
            .build()
            .map_err(|e| ScanError::Client(e.to_string()))?;

        Ok(Self {
            client,
            viewport_url: remote.viewport_url(),
            base_url,
            policy,
        })
    }

    fn referer(&self, tile: &Tile) -> String {
        let (lat, lng) = tile.center();
        format!(
            "{}/home/nextlevel?lat={lat:.5}&lng={lng:.5}&zm={}",
            self.base_url, tile.zoom
        )
    }
}

#[async_trait]
impl TileFetcher for HttpTileFetcher {
    async fn fetch(
        &self,
        tile: &Tile,
        credential: &Credential,
        position: TilePosition,
    ) -> FetchOutcome {
        let sent = self
            .client
            .post(&self.viewport_url)
            .header(header::COOKIE, credential.cookie_header())
            .header(header::REFERER, self.referer(tile))
            .form(&tile.form_params())
            .send()
            .await;

        let response = match sent {
            Ok(response) => response,
            Err(e) if e.is_timeout() => return FetchOutcome::TransportError(TileError::Timeout),
            Err(e) => return FetchOutcome::TransportError(TileError::Network(e.to_string())),
        };

        let status = response.status().as_u16();
        let header_text = |name: header::HeaderName| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(ToString::to_string)
        };
        let content_type = header_text(header::CONTENT_TYPE);
        let location = header_text(header::LOCATION);

        let body = match response.text().await {
            Ok(body) => body,
            Err(e) if e.is_timeout() => return FetchOutcome::TransportError(TileError::Timeout),
            Err(e) => return FetchOutcome::TransportError(TileError::Network(e.to_string())),
        };

        tracing::trace!(
            "Tile {}/{} answered HTTP {} ({} bytes)",
            position.index + 1,
            position.total,
            status,
            body.len()
        );

        classify_response(
            &RawResponse {
                status,
                content_type: content_type.as_deref(),
                location: location.as_deref(),
                body: &body,
            },
            self.policy,
            position,
        )
    }
}

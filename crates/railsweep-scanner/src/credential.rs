//! Credential providers.
//!
//! A [`CredentialProvider`] produces a fresh session cookie on demand. The
//! sweep calls it once up front when no credential was supplied, and again
//! whenever a tile reports an expired session.

use crate::error::AuthError;
use async_trait::async_trait;
use railsweep_browser::{
    login, BrowserActions, BrowserEngine, FingerprintConfig, LoginRequest, LoginSelectors,
};
use railsweep_core::{AuthConfig, BrowserConfig, Credential, RemoteConfig, Timestamp};
use reqwest::cookie::{CookieStore, Jar};
use scraper::{Html, Selector};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Hidden input carrying the anti-forgery token on the login form.
const VERIFICATION_TOKEN_FIELD: &str = "__RequestVerificationToken";

/// Source of fresh session credentials.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Obtain a new credential. May be slow (a full login).
    async fn obtain_credential(&self) -> Result<Credential, AuthError>;

    /// Short name for logs.
    fn describe(&self) -> &'static str;
}

/// Logs in by posting the login form over plain HTTP.
pub struct FormLoginProvider {
    login_url: Url,
    username: String,
    password: String,
    cookie_name: String,
    user_agent: String,
    timeout: Duration,
    proxy_url: Option<String>,
}

impl FormLoginProvider {
    /// Build from the remote and auth settings.
    ///
    /// # Errors
    /// Returns [`AuthError::MissingLoginDetails`] without a username and password.
    pub fn new(remote: &RemoteConfig, auth: &AuthConfig) -> Result<Self, AuthError> {
        let (username, password) = login_details(auth)?;
        let login_url = Url::parse(&remote.login_url())
            .map_err(|e| AuthError::Config(format!("login URL: {e}")))?;

        Ok(Self {
            login_url,
            username,
            password,
            cookie_name: remote.auth_cookie_name.clone(),
            user_agent: remote.user_agent.clone(),
            timeout: Duration::from_secs(remote.timeout_secs),
            proxy_url: remote.proxy_url.clone(),
        })
    }

    fn client(&self, jar: Arc<Jar>) -> Result<reqwest::Client, AuthError> {
        let mut builder = reqwest::Client::builder()
            .cookie_provider(jar)
            .user_agent(self.user_agent.clone())
            .timeout(self.timeout);
        if let Some(proxy_url) = &self.proxy_url {
            builder = builder.proxy(reqwest::Proxy::all(proxy_url)?);
        }
        Ok(builder.build()?)
    }
}

#[async_trait]
impl CredentialProvider for FormLoginProvider {
    async fn obtain_credential(&self) -> Result<Credential, AuthError> {
        // Fresh jar per attempt so a stale session cookie cannot leak in
        let jar = Arc::new(Jar::default());
        let client = self.client(Arc::clone(&jar))?;

        tracing::info!("Fetching login form");
        let page = client
            .get(self.login_url.clone())
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        let token = extract_verification_token(&page).ok_or(AuthError::TokenNotFound)?;

        tracing::debug!("Posting login form");
        let response = client
            .post(self.login_url.clone())
            .form(&[
                ("UserName", self.username.as_str()),
                ("Password", self.password.as_str()),
                (VERIFICATION_TOKEN_FIELD, token.as_str()),
            ])
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(AuthError::Rejected(format!("HTTP {status}")));
        }

        let cookies = jar
            .cookies(&self.login_url)
            .and_then(|header| header.to_str().ok().map(ToString::to_string))
            .unwrap_or_default();
        let Some(value) = find_cookie(&cookies, &self.cookie_name) else {
            if extract_verification_token(&body).is_some() {
                return Err(AuthError::Rejected(
                    "login form shown again, check username and password".to_string(),
                ));
            }
            return Err(AuthError::CookieMissing(self.cookie_name.clone()));
        };

        tracing::info!("Form login succeeded, {} cookie captured", self.cookie_name);
        Credential::new(&self.cookie_name, value)
            .map_err(|e| AuthError::InvalidCredential(e.to_string()))
    }

    fn describe(&self) -> &'static str {
        "form login"
    }
}

/// Logs in by driving a headless browser through the login dialog.
pub struct BrowserLoginProvider {
    browser: BrowserConfig,
    login_url: String,
    username: String,
    password: String,
    cookie_name: String,
    selectors: LoginSelectors,
}

impl BrowserLoginProvider {
    /// Build from the remote, auth and browser settings.
    ///
    /// # Errors
    /// Returns [`AuthError::MissingLoginDetails`] without a username and password.
    pub fn new(
        remote: &RemoteConfig,
        auth: &AuthConfig,
        browser: &BrowserConfig,
    ) -> Result<Self, AuthError> {
        let (username, password) = login_details(auth)?;
        Ok(Self {
            browser: browser.clone(),
            login_url: remote.login_url(),
            username,
            password,
            cookie_name: remote.auth_cookie_name.clone(),
            selectors: LoginSelectors::default(),
        })
    }

    /// Override the login form selectors.
    #[must_use]
    pub fn with_selectors(mut self, selectors: LoginSelectors) -> Self {
        self.selectors = selectors;
        self
    }
}

#[async_trait]
impl CredentialProvider for BrowserLoginProvider {
    async fn obtain_credential(&self) -> Result<Credential, AuthError> {
        let engine = BrowserEngine::launch(&self.browser, FingerprintConfig::randomized()).await?;

        let request = LoginRequest {
            login_url: &self.login_url,
            username: &self.username,
            password: &self.password,
            cookie_name: &self.cookie_name,
        };
        let result = login(&engine, &self.selectors, &request).await;

        if result.is_err() {
            if let Some(dir) = &self.browser.debug_dir {
                save_debug_artifacts(&engine, dir).await;
            }
        }
        if let Err(e) = engine.close().await {
            tracing::warn!("Failed to close browser cleanly: {}", e);
        }

        let value = result?;
        Credential::new(&self.cookie_name, value)
            .map_err(|e| AuthError::InvalidCredential(e.to_string()))
    }

    fn describe(&self) -> &'static str {
        "browser login"
    }
}

/// Save a screenshot and the page HTML for a failed login. Best effort.
async fn save_debug_artifacts<A>(browser: &A, dir: &Path)
where
    A: BrowserActions + Sync + ?Sized,
{
    if let Err(e) = tokio::fs::create_dir_all(dir).await {
        tracing::warn!("Cannot create debug directory {}: {}", dir.display(), e);
        return;
    }
    let stem = format!("login-failure-{}", Timestamp::now().epoch_millis());

    match browser.screenshot().await {
        Ok(png) => {
            let path = dir.join(format!("{stem}.png"));
            if let Err(e) = tokio::fs::write(&path, png).await {
                tracing::warn!("Failed to write {}: {}", path.display(), e);
            }
        }
        Err(e) => tracing::warn!("Failed to capture screenshot: {}", e),
    }

    match browser.content().await {
        Ok(html) => {
            let path = dir.join(format!("{stem}.html"));
            if let Err(e) = tokio::fs::write(&path, html).await {
                tracing::warn!("Failed to write {}: {}", path.display(), e);
            }
        }
        Err(e) => tracing::warn!("Failed to capture page HTML: {}", e),
    }

    tracing::info!("Saved login debug artifacts to {}", dir.display());
}

/// Reads the cookie from a file maintained by something else (or by
/// [`CachingProvider`]).
///
/// Accepted formats: a bare cookie value, a `name=value; name2=value2` jar
/// line (optionally prefixed with `Cookie:`), or a JSON array of
/// `{"name": ..., "value": ...}` objects as exported by browser tooling.
pub struct CookieFileProvider {
    path: PathBuf,
    cookie_name: String,
}

impl CookieFileProvider {
    /// Create a provider reading `path` for the cookie named `cookie_name`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, cookie_name: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            cookie_name: cookie_name.into(),
        }
    }

    /// Cookie file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl CredentialProvider for CookieFileProvider {
    async fn obtain_credential(&self) -> Result<Credential, AuthError> {
        let file_error = |reason: String| AuthError::CookieFile {
            path: self.path.display().to_string(),
            reason,
        };

        let contents = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| file_error(e.to_string()))?;
        let value = parse_cookie_file(&contents, &self.cookie_name).map_err(file_error)?;

        tracing::debug!("Read {} cookie from {}", self.cookie_name, self.path.display());
        Credential::new(&self.cookie_name, value)
            .map_err(|e| AuthError::InvalidCredential(e.to_string()))
    }

    fn describe(&self) -> &'static str {
        "cookie file"
    }
}

/// Always returns the same credential.
pub struct StaticCredentialProvider {
    credential: Credential,
}

impl StaticCredentialProvider {
    /// Wrap a fixed credential.
    #[must_use]
    pub fn new(credential: Credential) -> Self {
        Self { credential }
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentialProvider {
    async fn obtain_credential(&self) -> Result<Credential, AuthError> {
        Ok(self.credential.clone())
    }

    fn describe(&self) -> &'static str {
        "static cookie"
    }
}

/// Writes every credential obtained from the inner provider to a cookie file,
/// so the next run can start without logging in.
pub struct CachingProvider {
    inner: Arc<dyn CredentialProvider>,
    path: PathBuf,
}

impl CachingProvider {
    /// Cache credentials from `inner` in `path`.
    #[must_use]
    pub fn new(inner: Arc<dyn CredentialProvider>, path: impl Into<PathBuf>) -> Self {
        Self {
            inner,
            path: path.into(),
        }
    }
}

#[async_trait]
impl CredentialProvider for CachingProvider {
    async fn obtain_credential(&self) -> Result<Credential, AuthError> {
        let credential = self.inner.obtain_credential().await?;

        match write_cookie_file(&self.path, &credential).await {
            Ok(()) => tracing::debug!("Cached credential in {}", self.path.display()),
            Err(e) => tracing::warn!(
                "Failed to cache credential in {}: {}",
                self.path.display(),
                e
            ),
        }
        Ok(credential)
    }

    fn describe(&self) -> &'static str {
        self.inner.describe()
    }
}

/// Write `credential` as a jar line, replacing the file atomically.
pub async fn write_cookie_file(path: &Path, credential: &Credential) -> std::io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    tokio::fs::write(&tmp, format!("{}\n", credential.cookie_header())).await?;
    tokio::fs::rename(&tmp, path).await
}

#[derive(Debug, Deserialize)]
struct StoredCookie {
    name: String,
    value: String,
}

/// Extract the cookie value named `cookie_name` from cookie file contents.
///
/// # Errors
/// Returns a description of the problem when no usable value is present.
pub fn parse_cookie_file(contents: &str, cookie_name: &str) -> Result<String, String> {
    let trimmed = contents.trim();
    let trimmed = trimmed
        .strip_prefix("Cookie:")
        .map_or(trimmed, str::trim_start);
    if trimmed.is_empty() {
        return Err("file is empty".to_string());
    }

    let found = if trimmed.starts_with('[') {
        let cookies: Vec<StoredCookie> = serde_json::from_str(trimmed)
            .map_err(|e| format!("invalid JSON cookie list: {e}"))?;
        cookies
            .into_iter()
            .find(|c| c.name == cookie_name)
            .map(|c| c.value)
    } else if trimmed.contains('=') {
        find_cookie(trimmed, cookie_name)
    } else {
        trimmed.lines().next().map(|line| line.trim().to_string())
    };

    found
        .filter(|value| !value.is_empty())
        .ok_or_else(|| format!("no {cookie_name} cookie found"))
}

/// Look up one cookie in a `name=value; name2=value2` header.
fn find_cookie(header: &str, cookie_name: &str) -> Option<String> {
    header
        .split(';')
        .filter_map(|pair| pair.split_once('='))
        .find(|(name, _)| name.trim() == cookie_name)
        .map(|(_, value)| value.trim().to_string())
}

/// Anti-forgery token from the login page.
#[must_use]
pub fn extract_verification_token(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let selector = Selector::parse(&format!("input[name=\"{VERIFICATION_TOKEN_FIELD}\"]")).ok()?;
    document
        .select(&selector)
        .find_map(|el| el.value().attr("value"))
        .filter(|value| !value.is_empty())
        .map(ToString::to_string)
}

fn login_details(auth: &AuthConfig) -> Result<(String, String), AuthError> {
    let username = auth.username.clone().filter(|u| !u.is_empty());
    let password = auth.password.clone().filter(|p| !p.is_empty());
    match (username, password) {
        (Some(u), Some(p)) => Ok((u, p)),
        (None, _) => Err(AuthError::MissingLoginDetails(
            "username not set (TRAINFINDER_USERNAME)".to_string(),
        )),
        (_, None) => Err(AuthError::MissingLoginDetails(
            "password not set (TRAINFINDER_PASSWORD)".to_string(),
        )),
    }
}

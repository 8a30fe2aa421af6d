use crate::error::{BrowserError, Result};
use url::Url;

/// Page operations the login flow is written against.
///
/// [`BrowserEngine`](crate::BrowserEngine) drives a real Chromium page; tests
/// substitute a scripted page.
#[async_trait::async_trait]
pub trait BrowserActions {
    /// Load `url` in the page
    async fn navigate(&self, url: &str) -> Result<()>;

    /// Click into a form field and type `value`
    async fn fill_field(&self, selector: &str, value: &str) -> Result<()>;

    async fn click(&self, selector: &str) -> Result<()>;

    /// Send a key (e.g. `"Enter"`) to the element under `selector`
    async fn press_key(&self, selector: &str, key: &str) -> Result<()>;

    /// Poll until `selector` matches or `timeout_ms` passes
    async fn wait_for_selector(&self, selector: &str, timeout_ms: u64) -> Result<()>;

    /// Inner text of the first match
    async fn extract_text(&self, selector: &str) -> Result<String>;

    /// Value of a cookie visible to the current page, if set
    async fn cookie(&self, name: &str) -> Result<Option<String>>;

    /// Current page HTML
    async fn content(&self) -> Result<String>;

    /// PNG of the viewport
    async fn screenshot(&self) -> Result<Vec<u8>>;
}

/// Host part of a navigation target, rejecting anything that is not an
/// absolute URL.
pub fn navigation_host(url: &str) -> Result<String> {
    let parsed =
        Url::parse(url).map_err(|e| BrowserError::NavigationError(format!("{url}: {e}")))?;
    parsed
        .host_str()
        .map(str::to_string)
        .ok_or_else(|| BrowserError::NavigationError(format!("{url}: no host")))
}

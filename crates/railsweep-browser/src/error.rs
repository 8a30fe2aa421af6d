use thiserror::Error;

/// Result alias for browser operations.
pub type Result<T> = std::result::Result<T, BrowserError>;

/// Failures driving the headless browser through the login page.
#[derive(Debug, Error)]
pub enum BrowserError {
    /// Chromium failed to launch or a CDP command failed
    #[error("chromium error: {0}")]
    ChromiumError(String),

    /// The page could not be loaded
    #[error("navigation failed: {0}")]
    NavigationError(String),

    /// No element matched any of the tried selectors
    #[error("selector not found: {0}")]
    SelectorNotFound(String),

    /// A navigation or wait exceeded its deadline
    #[error("timeout: {0}")]
    Timeout(String),

    /// The site answered the login with an error message
    #[error("login failed: {0}")]
    LoginFailed(String),

    /// Login completed but the session cookie never appeared
    #[error("cookie not set after login: {0}")]
    CookieNotFound(String),
}

//! Login dialog automation.
//!
//! The login page has changed its field ids over time, so every step tries a
//! list of candidate selectors in order and uses the first that matches.

use crate::actions::BrowserActions;
use crate::error::{BrowserError, Result};
use std::time::Duration;

/// How long to wait for the login form to render
const FORM_TIMEOUT_MS: u64 = 30_000;

/// How long to wait for the auth cookie after submitting
const COOKIE_SETTLE_MS: u64 = 10_000;

/// Poll interval while waiting for the cookie
const COOKIE_POLL_MS: u64 = 250;

/// Validation message block rendered by the login dialog
const LOGIN_ERROR_SELECTOR: &str = ".validation-summary-errors";

/// Candidate selectors for each login form element, tried in order
#[derive(Debug, Clone)]
pub struct LoginSelectors {
    pub username: Vec<String>,
    pub password: Vec<String>,
    pub submit: Vec<String>,
}

impl Default for LoginSelectors {
    fn default() -> Self {
        let owned = |items: &[&str]| -> Vec<String> {
            items.iter().map(ToString::to_string).collect()
        };
        Self {
            username: owned(&[
                "#useR_name",
                "input#UserName",
                "#Username",
                "input[type='text']",
            ]),
            password: owned(&["#pasS_word", "input#Password", "input[type='password']"]),
            submit: owned(&[
                "div.button.button-green",
                "div.button",
                "input[type='submit']",
                "button[type='submit']",
            ]),
        }
    }
}

/// Account details for one login attempt
#[derive(Debug, Clone, Copy)]
pub struct LoginRequest<'a> {
    pub login_url: &'a str,
    pub username: &'a str,
    pub password: &'a str,
    pub cookie_name: &'a str,
}

/// Log in through the page's login dialog and return the auth cookie value.
pub async fn login<A>(
    browser: &A,
    selectors: &LoginSelectors,
    request: &LoginRequest<'_>,
) -> Result<String>
where
    A: BrowserActions + Sync + ?Sized,
{
    if request.username.is_empty() || request.password.is_empty() {
        return Err(BrowserError::LoginFailed(
            "username and password are required".to_string(),
        ));
    }

    tracing::info!("Opening login page");
    browser.navigate(request.login_url).await?;

    let first_username = selectors
        .username
        .first()
        .ok_or_else(|| BrowserError::LoginFailed("no username selectors".to_string()))?;
    if let Err(e) = browser
        .wait_for_selector(first_username, FORM_TIMEOUT_MS)
        .await
    {
        // The preferred id may be gone; the fallbacks are tried below
        tracing::debug!("Preferred username field missing: {}", e);
    }

    tracing::debug!("Filling credentials");
    fill_first(browser, &selectors.username, request.username).await?;
    let password_selector = fill_first(browser, &selectors.password, request.password).await?;

    tracing::debug!("Submitting login form");
    if !click_first(browser, &selectors.submit).await? {
        tracing::debug!("No submit control matched, pressing Enter in the password field");
        browser.press_key(&password_selector, "Enter").await?;
    }

    match wait_for_cookie(browser, request.cookie_name).await {
        Err(BrowserError::CookieNotFound(name)) => {
            // Surface the dialog's own complaint (bad password etc.) when there is one
            match browser.extract_text(LOGIN_ERROR_SELECTOR).await {
                Ok(text) if !text.trim().is_empty() => {
                    Err(BrowserError::LoginFailed(text.trim().to_string()))
                }
                _ => Err(BrowserError::CookieNotFound(name)),
            }
        }
        other => other,
    }
}

/// Fill the first selector that exists. Returns the selector used.
async fn fill_first<A>(browser: &A, candidates: &[String], value: &str) -> Result<String>
where
    A: BrowserActions + Sync + ?Sized,
{
    for selector in candidates {
        match browser.fill_field(selector, value).await {
            Ok(()) => return Ok(selector.clone()),
            Err(BrowserError::SelectorNotFound(_)) => continue,
            Err(e) => return Err(e),
        }
    }
    Err(BrowserError::SelectorNotFound(candidates.join(", ")))
}

/// Click the first selector that exists. Returns `false` if none matched.
async fn click_first<A>(browser: &A, candidates: &[String]) -> Result<bool>
where
    A: BrowserActions + Sync + ?Sized,
{
    for selector in candidates {
        match browser.click(selector).await {
            Ok(()) => return Ok(true),
            Err(BrowserError::SelectorNotFound(_)) => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(false)
}

async fn wait_for_cookie<A>(browser: &A, cookie_name: &str) -> Result<String>
where
    A: BrowserActions + Sync + ?Sized,
{
    let deadline = tokio::time::Instant::now() + Duration::from_millis(COOKIE_SETTLE_MS);
    loop {
        if let Some(value) = browser.cookie(cookie_name).await? {
            if !value.is_empty() {
                tracing::info!("Login succeeded, {} cookie captured", cookie_name);
                return Ok(value);
            }
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(BrowserError::CookieNotFound(cookie_name.to_string()));
        }
        tokio::time::sleep(Duration::from_millis(COOKIE_POLL_MS)).await;
    }
}

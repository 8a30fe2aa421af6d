//! Browser automation engine for the login flow.
//!
//! Provides headless browser control with a randomized fingerprint, and the
//! login routine that turns account credentials into the site's auth cookie.

pub mod actions;
pub mod engine;
pub mod error;
pub mod fingerprint;
pub mod login;

pub use actions::BrowserActions;
pub use engine::BrowserEngine;
pub use error::{BrowserError, Result};
pub use fingerprint::FingerprintConfig;
pub use login::{login, LoginRequest, LoginSelectors};

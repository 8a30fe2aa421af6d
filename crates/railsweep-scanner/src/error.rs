//! Error types for the sweep.
//!
//! [`ScanError`] is the only error a sweep surfaces to its caller. Per-tile
//! problems are [`TileError`]s and are recorded in the sweep report instead.

use railsweep_browser::BrowserError;
use thiserror::Error;

/// A credential could not be obtained. Fatal to the sweep.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Username or password not configured
    #[error("missing login details: {0}")]
    MissingLoginDetails(String),

    /// Login settings unusable (bad URL and similar)
    #[error("invalid login configuration: {0}")]
    Config(String),

    /// Login page did not carry the anti-forgery token
    #[error("login page has no __RequestVerificationToken input")]
    TokenNotFound,

    /// The site refused the login
    #[error("login rejected: {0}")]
    Rejected(String),

    /// Login completed but the auth cookie never appeared
    #[error("auth cookie {0} not set after login")]
    CookieMissing(String),

    /// Cookie file unreadable or without a usable value
    #[error("cookie file {path}: {reason}")]
    CookieFile {
        /// Cookie file path
        path: String,
        /// What was wrong with it
        reason: String,
    },

    /// Value could not form a credential
    #[error("invalid credential: {0}")]
    InvalidCredential(String),

    /// HTTP failure during form login
    #[error("network error during login: {0}")]
    Network(#[from] reqwest::Error),

    /// Browser automation failure
    #[error("browser login failed: {0}")]
    Browser(#[from] BrowserError),
}

/// Why a single tile produced no data. Never fatal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TileError {
    /// Connection-level failure
    #[error("network error: {0}")]
    Network(String),

    /// Request exceeded the per-request timeout
    #[error("request timed out")]
    Timeout,

    /// Non-success HTTP status unrelated to auth
    #[error("HTTP {status}: {snippet}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Start of the response body
        snippet: String,
    },

    /// Body was not the expected JSON document
    #[error("malformed response: {0}")]
    Malformed(String),
}

/// Sweep-fatal errors.
#[derive(Debug, Error)]
pub enum ScanError {
    /// Credential provider failed
    #[error("credential provider failed: {0}")]
    Auth(#[from] AuthError),

    /// The session was rejected again right after a refresh
    #[error("session rejected again after refresh on tile {tile_index}")]
    AuthExpiredAfterRefresh {
        /// Index of the tile in planner order
        tile_index: usize,
    },

    /// Bounding box or tile size cannot be planned
    #[error("invalid sweep plan: {0}")]
    InvalidPlan(String),

    /// HTTP client could not be constructed
    #[error("HTTP client setup failed: {0}")]
    Client(String),

    /// I/O error while publishing
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error while publishing
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for sweep operations.
pub type Result<T> = std::result::Result<T, ScanError>;

//! Railsweep Scanner - Tiled viewport sweep orchestration.
//!
//! This crate sweeps a geographic bounding box tile by tile against the live
//! train-tracking site's viewport endpoint and folds the partial responses into
//! one deduplicated document. Session expiry is detected from the responses and
//! recovered by logging in again and retrying the affected tile once.
//!
//! # Pipeline
//!
//! - [`planner`] partitions the bounding box into an ordered tile grid
//! - [`fetcher`] queries one tile and classifies the response
//! - [`merger`] folds partial payloads into the [`Aggregate`]
//! - [`orchestrator`] drives the pipeline, pacing and credential refresh
//! - [`credential`] obtains session cookies (form login, browser login, cookie file)
//! - [`output`] publishes the aggregate as JSON
//!
//! # Example
//!
//! ```rust,ignore
//! use railsweep_scanner::{HttpTileFetcher, SweepOrchestrator, SweepSettings};
//! use std::sync::Arc;
//!
//! let orchestrator = SweepOrchestrator::new(
//!     Arc::new(HttpTileFetcher::new(&config.remote, config.sweep.empty_payload_policy)?),
//!     Arc::new(credential_provider),
//!     SweepSettings::from_config(&config.sweep),
//! );
//!
//! let report = orchestrator.run(None, &cancel).await?;
//! println!("{} tiles merged, {} failed", report.tiles_merged, report.failed_tiles.len());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod credential;
pub mod error;
pub mod fetcher;
pub mod merger;
pub mod orchestrator;
pub mod output;
pub mod planner;

// Re-export commonly used types
pub use credential::{
    BrowserLoginProvider, CachingProvider, CookieFileProvider, CredentialProvider,
    FormLoginProvider, StaticCredentialProvider,
};
pub use error::{AuthError, Result, ScanError, TileError};
pub use fetcher::{
    classify_response, ExpirySignal, FetchOutcome, HttpTileFetcher, RawResponse, TileFetcher,
    TilePosition,
};
pub use merger::{Aggregate, EntityKey, IdentityPolicy, MergeStats, RawPayload};
pub use orchestrator::{
    FailedTile, SweepOrchestrator, SweepReport, SweepSettings, SweepState, SweepStatus,
};
pub use output::{publish, write_json_atomically, PublishDecision};
pub use planner::{TileIter, TilePlan};

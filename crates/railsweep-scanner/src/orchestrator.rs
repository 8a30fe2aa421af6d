//! Sweep orchestrator.
//!
//! Drives one sweep through an explicit state machine:
//!
//! ```text
//! Idle -> Planning -> Fetching(i) -> ... -> Finalizing -> Done
//!                        |    ^
//!            AuthExpired |    | retry tile i once
//!                        v    |
//!                     Refreshing(i)
//! ```
//!
//! Tiles are fetched strictly one at a time with a randomized pause between
//! consecutive requests. A tile whose session has expired triggers exactly one
//! credential refresh and one retry; any expiry on the retry, explicit or
//! heuristic, aborts the sweep. Transport errors only mark the tile as failed.

use crate::credential::CredentialProvider;
use crate::error::{Result, ScanError, TileError};
use crate::fetcher::{FetchOutcome, TileFetcher, TilePosition};
use crate::merger::{Aggregate, IdentityPolicy};
use crate::planner::TilePlan;
use railsweep_core::{BoundingBox, Credential, DelayRange, SweepConfig, Tile, Timestamp};
use railsweep_scheduler::Pacer;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Geometry, pacing and merge settings for a sweep.
#[derive(Debug, Clone)]
pub struct SweepSettings {
    /// Region to sweep
    pub bbox: BoundingBox,
    /// Nominal tile edge length in degrees
    pub tile_size_deg: f64,
    /// Zoom level sent with each query
    pub zoom: u8,
    /// Delay between consecutive tile requests
    pub pacing: DelayRange,
    /// Entity identity fields in priority order
    pub identity_fields: Vec<String>,
    /// Categories pre-created in the aggregate
    pub known_categories: Vec<String>,
}

impl SweepSettings {
    /// Take the sweep section of the application config.
    #[must_use]
    pub fn from_config(config: &SweepConfig) -> Self {
        Self {
            bbox: config.bbox,
            tile_size_deg: config.tile_size_deg,
            zoom: config.zoom,
            pacing: config.pacing,
            identity_fields: config.identity_fields.clone(),
            known_categories: config.known_categories.clone(),
        }
    }
}

impl Default for SweepSettings {
    fn default() -> Self {
        Self::from_config(&SweepConfig::default())
    }
}

/// Sweep lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepState {
    /// Not started
    Idle,
    /// Building the tile plan
    Planning,
    /// Querying a tile
    Fetching {
        /// Tile index in planner order
        tile_index: usize,
        /// `true` on the single retry after a refresh
        retried: bool,
    },
    /// Obtaining a fresh credential before retrying a tile
    Refreshing {
        /// Tile to retry
        tile_index: usize,
    },
    /// Stamping the aggregate
    Finalizing,
    /// Finished
    Done,
}

/// A tile that produced no data.
#[derive(Debug, Clone, PartialEq)]
pub struct FailedTile {
    /// Index in planner order
    pub index: usize,
    /// Tile bounds
    pub tile: Tile,
    /// What went wrong
    pub error: TileError,
}

/// Overall quality of a finished sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepStatus {
    /// Every tile merged
    Complete,
    /// Some tiles failed
    Degraded,
    /// Cancelled before every tile was attempted
    Partial,
}

impl std::fmt::Display for SweepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Complete => "complete",
            Self::Degraded => "degraded",
            Self::Partial => "partial",
        };
        write!(f, "{s}")
    }
}

/// Outcome of a finished (possibly cancelled) sweep.
#[derive(Debug, Clone)]
pub struct SweepReport {
    /// Unique id of this sweep, used in logs
    pub sweep_id: Uuid,
    /// Merged data
    pub aggregate: Aggregate,
    /// Tiles in the plan
    pub tiles_total: usize,
    /// Tiles whose response was merged (including legitimately empty ones)
    pub tiles_merged: usize,
    /// Tiles that produced no data
    pub failed_tiles: Vec<FailedTile>,
    /// Credential refreshes triggered by expired sessions
    pub refreshes: u32,
    /// Expiries detected only through the empty-payload heuristic
    pub heuristic_expiries: usize,
    /// `true` if the sweep stopped early on cancellation
    pub cancelled: bool,
    /// Credential in use at the end, reusable by the next sweep
    pub credential: Credential,
    /// Sweep start time
    pub started_at: Timestamp,
    /// Sweep finish time
    pub finished_at: Timestamp,
}

impl SweepReport {
    /// Tiles that reached a final outcome.
    #[must_use]
    pub fn tiles_attempted(&self) -> usize {
        self.tiles_merged + self.failed_tiles.len()
    }

    /// Overall status.
    #[must_use]
    pub fn status(&self) -> SweepStatus {
        if self.cancelled {
            SweepStatus::Partial
        } else if self.failed_tiles.is_empty() {
            SweepStatus::Complete
        } else {
            SweepStatus::Degraded
        }
    }

    /// `true` unless every tile merged.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.status() != SweepStatus::Complete
    }

    /// Wall-clock duration in milliseconds.
    #[must_use]
    pub fn duration_ms(&self) -> i64 {
        self.finished_at.epoch_millis() - self.started_at.epoch_millis()
    }
}

/// Counters accumulated while a sweep runs.
#[derive(Debug, Default)]
struct Progress {
    tiles_merged: usize,
    failed_tiles: Vec<FailedTile>,
    refreshes: u32,
    heuristic_expiries: usize,
}

/// Runs sweeps against one fetcher and credential provider.
pub struct SweepOrchestrator {
    fetcher: Arc<dyn TileFetcher>,
    credentials: Arc<dyn CredentialProvider>,
    settings: SweepSettings,
    pacer: Pacer,
}

impl SweepOrchestrator {
    /// Create an orchestrator. Pacing comes from `settings`.
    #[must_use]
    pub fn new(
        fetcher: Arc<dyn TileFetcher>,
        credentials: Arc<dyn CredentialProvider>,
        settings: SweepSettings,
    ) -> Self {
        let pacer = Pacer::new(settings.pacing);
        Self {
            fetcher,
            credentials,
            settings,
            pacer,
        }
    }

    /// Replace the pacer.
    #[must_use]
    pub fn with_pacer(mut self, pacer: Pacer) -> Self {
        self.pacer = pacer;
        self
    }

    /// Sweep settings.
    #[must_use]
    pub fn settings(&self) -> &SweepSettings {
        &self.settings
    }

    /// Run one sweep.
    ///
    /// Starts with `credential`, or obtains one from the provider when `None`.
    /// Cancellation is observed between tiles and during pauses; the tiles
    /// merged so far are still returned, marked as cancelled.
    ///
    /// # Errors
    /// Returns [`ScanError::Auth`] if the provider fails,
    /// [`ScanError::AuthExpiredAfterRefresh`] if a tile still looks expired
    /// with a freshly refreshed session, and [`ScanError::InvalidPlan`] for
    /// bad geometry.
    pub async fn run(
        &self,
        credential: Option<Credential>,
        cancel: &CancellationToken,
    ) -> Result<SweepReport> {
        let sweep_id = Uuid::new_v4();
        let started_at = Timestamp::now();
        let mut aggregate = Aggregate::new(
            &self.settings.known_categories,
            IdentityPolicy::new(self.settings.identity_fields.clone()),
        );
        let mut progress = Progress::default();
        let mut credential = credential;
        let mut plan: Option<TilePlan> = None;
        let mut state = SweepState::Idle;

        loop {
            tracing::debug!("Sweep {} state: {:?}", sweep_id, state);
            state = match state {
                SweepState::Idle => {
                    if credential.is_none() {
                        tracing::info!(
                            "No credential supplied, obtaining one via {}",
                            self.credentials.describe()
                        );
                        credential = Some(self.credentials.obtain_credential().await?);
                    }
                    SweepState::Planning
                }

                SweepState::Planning => {
                    let tiles = TilePlan::new(
                        self.settings.bbox,
                        self.settings.tile_size_deg,
                        self.settings.zoom,
                    )?;
                    tracing::info!(
                        "Sweep {} started: {} tiles ({}x{}) of {} deg",
                        sweep_id,
                        tiles.len(),
                        tiles.columns(),
                        tiles.rows(),
                        self.settings.tile_size_deg
                    );
                    plan = Some(tiles);
                    SweepState::Fetching {
                        tile_index: 0,
                        retried: false,
                    }
                }

                SweepState::Fetching {
                    tile_index,
                    retried,
                } => {
                    let tiles = plan.ok_or_else(|| {
                        ScanError::InvalidPlan("fetching before planning".to_string())
                    })?;
                    let current = credential.as_ref().ok_or_else(|| {
                        ScanError::InvalidPlan("fetching without a credential".to_string())
                    })?;

                    if cancel.is_cancelled() {
                        SweepState::Finalizing
                    } else if let Some(tile) = tiles.tile(tile_index) {
                        let position = TilePosition {
                            index: tile_index,
                            total: tiles.len(),
                        };
                        let outcome = self.fetcher.fetch(&tile, current, position).await;
                        self.handle_outcome(
                            outcome,
                            tile,
                            position,
                            retried,
                            &mut aggregate,
                            &mut progress,
                            cancel,
                        )
                        .await?
                    } else {
                        SweepState::Finalizing
                    }
                }

                SweepState::Refreshing { tile_index } => {
                    progress.refreshes += 1;
                    tracing::info!(
                        "Refreshing credential via {} before retrying tile {}",
                        self.credentials.describe(),
                        tile_index + 1
                    );
                    credential = Some(self.credentials.obtain_credential().await?);

                    if self.pacer.pause(cancel).await {
                        SweepState::Fetching {
                            tile_index,
                            retried: true,
                        }
                    } else {
                        SweepState::Finalizing
                    }
                }

                SweepState::Finalizing => {
                    aggregate.stamp(Timestamp::now());
                    SweepState::Done
                }

                SweepState::Done => break,
            };
        }

        let tiles_total = plan.map_or(0, |p| p.len());
        let cancelled = progress.tiles_merged + progress.failed_tiles.len() < tiles_total;
        let credential = credential.ok_or_else(|| {
            ScanError::InvalidPlan("sweep finished without a credential".to_string())
        })?;

        let report = SweepReport {
            sweep_id,
            aggregate,
            tiles_total,
            tiles_merged: progress.tiles_merged,
            failed_tiles: progress.failed_tiles,
            refreshes: progress.refreshes,
            heuristic_expiries: progress.heuristic_expiries,
            cancelled,
            credential,
            started_at,
            finished_at: Timestamp::now(),
        };

        tracing::info!(
            "Sweep {} {}: {}/{} tiles merged, {} failed, {} refresh(es), {} entities in {} ms",
            report.sweep_id,
            report.status(),
            report.tiles_merged,
            report.tiles_total,
            report.failed_tiles.len(),
            report.refreshes,
            report.aggregate.entity_count(),
            report.duration_ms()
        );
        Ok(report)
    }

    /// Apply one fetch outcome and pick the next state.
    #[allow(clippy::too_many_arguments)]
    async fn handle_outcome(
        &self,
        outcome: FetchOutcome,
        tile: Tile,
        position: TilePosition,
        retried: bool,
        aggregate: &mut Aggregate,
        progress: &mut Progress,
        cancel: &CancellationToken,
    ) -> Result<SweepState> {
        let tile_no = position.index + 1;

        match outcome {
            FetchOutcome::Success(payload) => {
                let stats = aggregate.merge(&payload);
                progress.tiles_merged += 1;
                tracing::debug!(
                    "Tile {}/{} merged: {} added, {} duplicate(s)",
                    tile_no,
                    position.total,
                    stats.added,
                    stats.duplicates
                );
            }

            FetchOutcome::AuthExpired(signal) if !retried => {
                if signal.is_heuristic() {
                    progress.heuristic_expiries += 1;
                }
                tracing::warn!(
                    "Tile {}/{} reports an expired session ({})",
                    tile_no,
                    position.total,
                    signal
                );
                return Ok(SweepState::Refreshing {
                    tile_index: position.index,
                });
            }

            FetchOutcome::AuthExpired(signal) => {
                tracing::error!(
                    "Tile {}/{} still reports an expired session after refresh ({}), aborting sweep",
                    tile_no,
                    position.total,
                    signal
                );
                return Err(ScanError::AuthExpiredAfterRefresh {
                    tile_index: position.index,
                });
            }

            FetchOutcome::TransportError(error) => {
                tracing::warn!(
                    "Tile {}/{} failed: {} ({})",
                    tile_no,
                    position.total,
                    error,
                    tile
                );
                progress.failed_tiles.push(FailedTile {
                    index: position.index,
                    tile,
                    error,
                });
            }
        }

        let next = position.index + 1;
        if next >= position.total {
            return Ok(SweepState::Finalizing);
        }
        if !self.pacer.pause(cancel).await {
            return Ok(SweepState::Finalizing);
        }
        Ok(SweepState::Fetching {
            tile_index: next,
            retried: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(merged: usize, failed: usize, cancelled: bool) -> SweepReport {
        let tile = Tile {
            nw_lat: -10.0,
            nw_lng: 110.0,
            se_lat: -12.5,
            se_lng: 112.5,
            zoom: 7,
        };
        SweepReport {
            sweep_id: Uuid::new_v4(),
            aggregate: Aggregate::new(&[], IdentityPolicy::default()),
            tiles_total: merged + failed,
            tiles_merged: merged,
            failed_tiles: (0..failed)
                .map(|index| FailedTile {
                    index,
                    tile,
                    error: TileError::Timeout,
                })
                .collect(),
            refreshes: 0,
            heuristic_expiries: 0,
            cancelled,
            credential: Credential::new(".ASPXAUTH", "X").unwrap(),
            started_at: Timestamp::from_epoch_millis(1_000).unwrap(),
            finished_at: Timestamp::from_epoch_millis(3_500).unwrap(),
        }
    }

    #[test]
    fn test_report_status() {
        assert_eq!(report(4, 0, false).status(), SweepStatus::Complete);
        assert!(!report(4, 0, false).is_degraded());
        assert_eq!(report(3, 1, false).status(), SweepStatus::Degraded);
        assert_eq!(report(2, 0, true).status(), SweepStatus::Partial);
        assert!(report(2, 0, true).is_degraded());
    }

    #[test]
    fn test_report_counters() {
        let r = report(7, 3, false);
        assert_eq!(r.tiles_attempted(), 10);
        assert_eq!(r.duration_ms(), 2_500);
        assert_eq!(r.status().to_string(), "degraded");
    }

    #[test]
    fn test_settings_from_config() {
        let settings = SweepSettings::default();
        assert_eq!(settings.bbox, BoundingBox::AUSTRALIA);
        assert_eq!(settings.identity_fields, vec!["id", "vehicleId"]);
        assert_eq!(settings.known_categories.len(), 8);
    }
}

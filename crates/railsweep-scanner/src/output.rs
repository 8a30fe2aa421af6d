//! Publishing the aggregate document.

use crate::error::Result;
use crate::orchestrator::SweepReport;
use railsweep_core::OutputConfig;
use serde_json::Value;
use std::path::{Path, PathBuf};

/// What [`publish`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishDecision {
    /// Document written to the path
    Written(PathBuf),
    /// Previous document left in place
    KeptPrevious {
        /// Why the new one was not written
        reason: String,
    },
}

/// Write `value` as JSON to `path` via a temporary file and a rename, so
/// readers never see a half-written document.
pub fn write_json_atomically(path: &Path, value: &Value, pretty: bool) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let mut bytes = if pretty {
        serde_json::to_vec_pretty(value)?
    } else {
        serde_json::to_vec(value)?
    };
    bytes.push(b'\n');

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    std::fs::write(&tmp, &bytes)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Publish a finished sweep.
///
/// With `keep_last_good`, a sweep that merged no tiles does not replace an
/// existing document. A partial or degraded sweep with data is still written.
pub fn publish(report: &SweepReport, config: &OutputConfig) -> Result<PublishDecision> {
    if config.keep_last_good && report.tiles_merged == 0 && config.path.exists() {
        let reason = format!(
            "sweep {} merged no tiles ({} failed)",
            report.sweep_id,
            report.failed_tiles.len()
        );
        tracing::warn!("Keeping previous {}: {}", config.path.display(), reason);
        return Ok(PublishDecision::KeptPrevious { reason });
    }

    write_json_atomically(&config.path, &report.aggregate.to_document(), config.pretty)?;

    if report.is_degraded() {
        tracing::warn!(
            "Wrote {} from a {} sweep ({} of {} tiles merged)",
            config.path.display(),
            report.status(),
            report.tiles_merged,
            report.tiles_total
        );
    } else {
        tracing::info!(
            "Wrote {} ({} entities)",
            config.path.display(),
            report.aggregate.entity_count()
        );
    }
    Ok(PublishDecision::Written(config.path.clone()))
}

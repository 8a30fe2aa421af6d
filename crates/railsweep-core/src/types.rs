//! Shared types used across railsweep.
//!
//! This module defines the geographic value types the sweep is planned over,
//! the opaque session credential, and timestamp helpers.

use crate::error::RailsweepError;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Geographic bounding box in degrees.
///
/// `west`/`east` are longitudes, `north`/`south` are latitudes. A valid box has
/// `west < east` and `north > south`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// Western edge (longitude)
    pub west: f64,
    /// Northern edge (latitude)
    pub north: f64,
    /// Eastern edge (longitude)
    pub east: f64,
    /// Southern edge (latitude)
    pub south: f64,
}

impl BoundingBox {
    /// Rough bounding box of mainland Australia and Tasmania.
    pub const AUSTRALIA: Self = Self {
        west: 112.0,
        north: -9.0,
        east: 154.0,
        south: -44.0,
    };

    /// Create a validated bounding box.
    ///
    /// # Errors
    /// Returns error if any edge is not finite, or if `west >= east` or `north <= south`.
    pub fn new(west: f64, north: f64, east: f64, south: f64) -> Result<Self, RailsweepError> {
        let bbox = Self {
            west,
            north,
            east,
            south,
        };
        bbox.validate()?;
        Ok(bbox)
    }

    /// Check the box invariants.
    pub fn validate(&self) -> Result<(), RailsweepError> {
        if ![self.west, self.north, self.east, self.south]
            .iter()
            .all(|v| v.is_finite())
        {
            return Err(RailsweepError::InvalidBoundingBox(
                "edges must be finite".to_string(),
            ));
        }
        if self.west >= self.east {
            return Err(RailsweepError::InvalidBoundingBox(format!(
                "west ({}) must be less than east ({})",
                self.west, self.east
            )));
        }
        if self.north <= self.south {
            return Err(RailsweepError::InvalidBoundingBox(format!(
                "north ({}) must be greater than south ({})",
                self.north, self.south
            )));
        }
        Ok(())
    }

    /// Longitude span in degrees.
    #[must_use]
    pub fn width(&self) -> f64 {
        self.east - self.west
    }

    /// Latitude span in degrees.
    #[must_use]
    pub fn height(&self) -> f64 {
        self.north - self.south
    }

    /// Area in square degrees.
    #[must_use]
    pub fn area(&self) -> f64 {
        self.width() * self.height()
    }
}

impl Default for BoundingBox {
    fn default() -> Self {
        Self::AUSTRALIA
    }
}

/// A rectangular sub-region of a sweep's bounding box, queried independently.
///
/// Field names serialize the way the viewport endpoint expects them
/// (`nwLat`, `nwLng`, `seLat`, `seLng`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tile {
    /// North-west corner latitude (top edge)
    pub nw_lat: f64,
    /// North-west corner longitude (left edge)
    pub nw_lng: f64,
    /// South-east corner latitude (bottom edge)
    pub se_lat: f64,
    /// South-east corner longitude (right edge)
    pub se_lng: f64,
    /// Map zoom level sent with the query
    #[serde(rename = "zm")]
    pub zoom: u8,
}

impl Tile {
    /// Longitude span in degrees.
    #[must_use]
    pub fn width(&self) -> f64 {
        self.se_lng - self.nw_lng
    }

    /// Latitude span in degrees.
    #[must_use]
    pub fn height(&self) -> f64 {
        self.nw_lat - self.se_lat
    }

    /// Area in square degrees.
    #[must_use]
    pub fn area(&self) -> f64 {
        self.width() * self.height()
    }

    /// Center point as `(lat, lng)`.
    #[must_use]
    pub fn center(&self) -> (f64, f64) {
        (
            (self.nw_lat + self.se_lat) / 2.0,
            (self.nw_lng + self.se_lng) / 2.0,
        )
    }

    /// Form parameters for the viewport query.
    #[must_use]
    pub fn form_params(&self) -> [(&'static str, String); 5] {
        [
            ("nwLat", self.nw_lat.to_string()),
            ("nwLng", self.nw_lng.to_string()),
            ("seLat", self.se_lat.to_string()),
            ("seLng", self.se_lng.to_string()),
            ("zm", self.zoom.to_string()),
        ]
    }
}

impl fmt::Display for Tile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "nw=({:.4},{:.4}) se=({:.4},{:.4}) zm={}",
            self.nw_lat, self.nw_lng, self.se_lat, self.se_lng, self.zoom
        )
    }
}

/// Opaque bearer credential proving an authenticated session (an auth cookie).
///
/// The value never appears in `Debug` or `Display` output.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    name: String,
    value: String,
}

impl Credential {
    /// Create a credential from a cookie name and value.
    ///
    /// # Errors
    /// Returns error if either part is empty or contains cookie separators.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Result<Self, RailsweepError> {
        let name = name.into().trim().to_string();
        let value = value.into().trim().to_string();

        if name.is_empty() || value.is_empty() {
            return Err(RailsweepError::InvalidCredential(
                "cookie name and value must not be empty".to_string(),
            ));
        }
        if name.contains(&['=', ';'][..]) || value.contains(';') {
            return Err(RailsweepError::InvalidCredential(format!(
                "cookie '{name}' contains a cookie separator"
            )));
        }

        Ok(Self { name, value })
    }

    /// Cookie name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Raw cookie value.
    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Value for a `Cookie` request header.
    #[must_use]
    pub fn cookie_header(&self) -> String {
        format!("{}={}", self.name, self.value)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("name", &self.name)
            .field("value", &"<redacted>")
            .finish()
    }
}

impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}=<redacted>", self.name)
    }
}

/// Inclusive range of delays in milliseconds, sampled uniformly for jitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelayRange {
    /// Lower bound in milliseconds
    pub min_ms: u64,
    /// Upper bound in milliseconds
    pub max_ms: u64,
}

impl DelayRange {
    /// A range that never waits.
    pub const ZERO: Self = Self {
        min_ms: 0,
        max_ms: 0,
    };

    /// Create a range from millisecond bounds.
    ///
    /// # Errors
    /// Returns error if `min_ms > max_ms`.
    pub fn from_millis(min_ms: u64, max_ms: u64) -> Result<Self, RailsweepError> {
        let range = Self { min_ms, max_ms };
        range.validate()?;
        Ok(range)
    }

    /// Create a range from whole-second bounds.
    pub fn from_secs(min_secs: u64, max_secs: u64) -> Result<Self, RailsweepError> {
        Self::from_millis(min_secs * 1000, max_secs * 1000)
    }

    /// Check that the bounds are ordered.
    pub fn validate(&self) -> Result<(), RailsweepError> {
        if self.min_ms > self.max_ms {
            return Err(RailsweepError::InvalidDelay(format!(
                "min ({} ms) exceeds max ({} ms)",
                self.min_ms, self.max_ms
            )));
        }
        Ok(())
    }

    /// Lower bound as a `Duration`.
    #[must_use]
    pub fn min(&self) -> Duration {
        Duration::from_millis(self.min_ms)
    }

    /// Upper bound as a `Duration`.
    #[must_use]
    pub fn max(&self) -> Duration {
        Duration::from_millis(self.max_ms)
    }

    /// Whether this range always yields a zero delay.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.max_ms == 0
    }
}

/// Wrapper around `chrono::DateTime<Utc>` for consistent timestamp handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Create a timestamp representing the current moment.
    #[must_use]
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Create a timestamp from milliseconds since the Unix epoch.
    ///
    /// # Errors
    /// Returns error if the value is out of chrono's representable range.
    pub fn from_epoch_millis(millis: i64) -> Result<Self, RailsweepError> {
        Utc.timestamp_millis_opt(millis)
            .single()
            .map(Self)
            .ok_or(RailsweepError::TimestampOutOfRange(millis))
    }

    /// Get the inner `DateTime<Utc>`.
    #[must_use]
    pub fn as_datetime(&self) -> &DateTime<Utc> {
        &self.0
    }

    /// Format as RFC3339 string.
    #[must_use]
    pub fn to_rfc3339(&self) -> String {
        self.0.to_rfc3339()
    }

    /// Milliseconds since the Unix epoch.
    #[must_use]
    pub fn epoch_millis(&self) -> i64 {
        self.0.timestamp_millis()
    }
}

impl Default for Timestamp {
    fn default() -> Self {
        Self::now()
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bbox_valid() {
        let bbox = BoundingBox::new(110.0, -10.0, 155.0, -45.0).expect("valid bbox");
        assert!((bbox.width() - 45.0).abs() < f64::EPSILON);
        assert!((bbox.height() - 35.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_bbox_invalid() {
        let invalid = [
            (155.0, -10.0, 110.0, -45.0), // west > east
            (110.0, -45.0, 155.0, -10.0), // north < south
            (110.0, -10.0, 110.0, -45.0), // zero width
            (f64::NAN, -10.0, 155.0, -45.0),
            (110.0, f64::INFINITY, 155.0, -45.0),
        ];

        for (w, n, e, s) in invalid {
            assert!(
                BoundingBox::new(w, n, e, s).is_err(),
                "Should fail for: ({w}, {n}, {e}, {s})"
            );
        }
    }

    #[test]
    fn test_tile_geometry() {
        let tile = Tile {
            nw_lat: -10.0,
            nw_lng: 110.0,
            se_lat: -35.0,
            se_lng: 135.0,
            zoom: 7,
        };
        assert!((tile.area() - 625.0).abs() < 1e-9);
        assert_eq!(tile.center(), (-22.5, 122.5));
    }

    #[test]
    fn test_tile_serializes_endpoint_field_names() {
        let tile = Tile {
            nw_lat: -10.0,
            nw_lng: 110.0,
            se_lat: -12.5,
            se_lng: 112.5,
            zoom: 7,
        };
        let json = serde_json::to_value(tile).expect("serialize tile");
        assert_eq!(json["nwLat"], -10.0);
        assert_eq!(json["seLng"], 112.5);
        assert_eq!(json["zm"], 7);

        let params = tile.form_params();
        assert_eq!(params[0], ("nwLat", "-10".to_string()));
        assert_eq!(params[4], ("zm", "7".to_string()));
    }

    #[test]
    fn test_credential_redacts_value() {
        let cred = Credential::new(".ASPXAUTH", "SECRET123").expect("valid credential");
        assert_eq!(cred.cookie_header(), ".ASPXAUTH=SECRET123");
        assert!(!format!("{cred:?}").contains("SECRET123"));
        assert!(!cred.to_string().contains("SECRET123"));
    }

    #[test]
    fn test_credential_invalid() {
        assert!(Credential::new(".ASPXAUTH", "  ").is_err());
        assert!(Credential::new("", "value").is_err());
        assert!(Credential::new(".ASPXAUTH", "a; b=c").is_err());
    }

    #[test]
    fn test_delay_range() {
        let range = DelayRange::from_secs(30, 90).expect("valid range");
        assert_eq!(range.min(), Duration::from_secs(30));
        assert_eq!(range.max(), Duration::from_secs(90));
        assert!(DelayRange::from_millis(10, 5).is_err());
        assert!(DelayRange::ZERO.is_zero());
    }

    #[test]
    fn test_timestamp_epoch_millis() {
        let ts = Timestamp::from_epoch_millis(1_700_000_000_123).expect("valid millis");
        assert_eq!(ts.epoch_millis(), 1_700_000_000_123);
        assert!(Timestamp::now().epoch_millis() > 0);
    }

    #[test]
    fn test_timestamp_ordering() {
        let ts1 = Timestamp::now();
        std::thread::sleep(std::time::Duration::from_millis(10));
        let ts2 = Timestamp::now();
        assert!(ts2 > ts1);
    }
}

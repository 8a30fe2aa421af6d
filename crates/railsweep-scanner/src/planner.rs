//! Tile planning.
//!
//! A [`TilePlan`] partitions a bounding box into a grid of tiles no larger than
//! the nominal tile size. The last column and the last row are clipped to the
//! box edge, so the tiles cover the box exactly once with shared edges only.
//!
//! Tiles are produced in row-major order: the northernmost row first, west to
//! east within a row. The plan is lazy and can be iterated any number of times.

use crate::error::{Result, ScanError};
use railsweep_core::{BoundingBox, Tile};

/// Ratios within this distance of a whole number are treated as whole, so a
/// span that divides evenly does not gain a sliver tile from float error.
const DIVISION_EPSILON: f64 = 1e-9;

/// Upper bound on tiles in one plan.
const MAX_TILES: usize = 100_000;

/// Deterministic tile grid over a bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TilePlan {
    bbox: BoundingBox,
    tile_size_deg: f64,
    zoom: u8,
    columns: usize,
    rows: usize,
}

impl TilePlan {
    /// Plan a sweep of `bbox` with square tiles of `tile_size_deg` degrees.
    ///
    /// # Errors
    /// Returns [`ScanError::InvalidPlan`] if the box is invalid, the tile size is
    /// not a positive finite number, or the grid would be unreasonably large.
    pub fn new(bbox: BoundingBox, tile_size_deg: f64, zoom: u8) -> Result<Self> {
        bbox.validate().map_err(|e| ScanError::InvalidPlan(e.to_string()))?;

        if !tile_size_deg.is_finite() || tile_size_deg <= 0.0 {
            return Err(ScanError::InvalidPlan(format!(
                "tile size must be a positive number of degrees, got {tile_size_deg}"
            )));
        }

        let columns = steps(bbox.width(), tile_size_deg);
        let rows = steps(bbox.height(), tile_size_deg);
        if columns.saturating_mul(rows) > MAX_TILES {
            return Err(ScanError::InvalidPlan(format!(
                "{columns}x{rows} tiles exceeds the limit of {MAX_TILES}"
            )));
        }

        Ok(Self {
            bbox,
            tile_size_deg,
            zoom,
            columns,
            rows,
        })
    }

    /// Bounding box being swept.
    #[must_use]
    pub fn bbox(&self) -> BoundingBox {
        self.bbox
    }

    /// Tiles per row.
    #[must_use]
    pub fn columns(&self) -> usize {
        self.columns
    }

    /// Number of rows.
    #[must_use]
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Total number of tiles.
    #[must_use]
    pub fn len(&self) -> usize {
        self.columns * self.rows
    }

    /// Always `false`; a valid box has at least one tile.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Tile at `index` in row-major order.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn tile(&self, index: usize) -> Option<Tile> {
        if index >= self.len() {
            return None;
        }

        let row = index / self.columns;
        let col = index % self.columns;
        let size = self.tile_size_deg;

        let nw_lng = self.bbox.west + col as f64 * size;
        let se_lng = if col + 1 == self.columns {
            self.bbox.east
        } else {
            self.bbox.west + (col + 1) as f64 * size
        };

        let nw_lat = self.bbox.north - row as f64 * size;
        let se_lat = if row + 1 == self.rows {
            self.bbox.south
        } else {
            self.bbox.north - (row + 1) as f64 * size
        };

        Some(Tile {
            nw_lat,
            nw_lng,
            se_lat,
            se_lng,
            zoom: self.zoom,
        })
    }

    /// Iterate the tiles in order.
    #[must_use]
    pub fn iter(&self) -> TileIter {
        TileIter {
            plan: *self,
            next: 0,
        }
    }
}

impl IntoIterator for &TilePlan {
    type Item = Tile;
    type IntoIter = TileIter;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator over a [`TilePlan`].
#[derive(Debug, Clone)]
pub struct TileIter {
    plan: TilePlan,
    next: usize,
}

impl Iterator for TileIter {
    type Item = Tile;

    fn next(&mut self) -> Option<Tile> {
        let tile = self.plan.tile(self.next)?;
        self.next += 1;
        Some(tile)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.plan.len().saturating_sub(self.next);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for TileIter {}

/// Number of tile steps needed to cover `span` degrees.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn steps(span: f64, size: f64) -> usize {
    let ratio = span / size;
    let whole = ratio.round();
    let count = if (ratio - whole).abs() < DIVISION_EPSILON {
        whole
    } else {
        ratio.ceil()
    };
    (count.max(1.0)).min(MAX_TILES as f64 + 1.0) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    fn bbox(west: f64, north: f64, east: f64, south: f64) -> BoundingBox {
        BoundingBox::new(west, north, east, south).expect("valid bbox")
    }

    fn overlap_area(a: &Tile, b: &Tile) -> f64 {
        let width = a.se_lng.min(b.se_lng) - a.nw_lng.max(b.nw_lng);
        let height = a.nw_lat.min(b.nw_lat) - a.se_lat.max(b.se_lat);
        if width <= 0.0 || height <= 0.0 {
            0.0
        } else {
            width * height
        }
    }

    #[test]
    fn test_uneven_box_gets_clipped_edge_tiles() {
        let plan = TilePlan::new(bbox(110.0, -10.0, 155.0, -45.0), 25.0, 7).unwrap();
        let tiles: Vec<Tile> = plan.iter().collect();

        assert_eq!(plan.columns(), 2);
        assert_eq!(plan.rows(), 2);
        assert_eq!(tiles.len(), 4);

        assert_eq!(
            tiles[0],
            Tile {
                nw_lat: -10.0,
                nw_lng: 110.0,
                se_lat: -35.0,
                se_lng: 135.0,
                zoom: 7
            }
        );
        // Clipped east column
        assert_eq!(tiles[1].nw_lng, 135.0);
        assert_eq!(tiles[1].se_lng, 155.0);
        // Clipped south row
        assert_eq!(tiles[2].nw_lat, -35.0);
        assert_eq!(tiles[2].se_lat, -45.0);
        assert_eq!(tiles[3].se_lng, 155.0);
        assert_eq!(tiles[3].se_lat, -45.0);
    }

    #[test]
    fn test_row_major_order() {
        let plan = TilePlan::new(bbox(0.0, 3.0, 3.0, 0.0), 1.0, 7).unwrap();
        let corners: Vec<(f64, f64)> = plan.iter().map(|t| (t.nw_lat, t.nw_lng)).collect();

        assert_eq!(
            corners,
            vec![
                (3.0, 0.0),
                (3.0, 1.0),
                (3.0, 2.0),
                (2.0, 0.0),
                (2.0, 1.0),
                (2.0, 2.0),
                (1.0, 0.0),
                (1.0, 1.0),
                (1.0, 2.0),
            ]
        );
    }

    #[test]
    fn test_tile_count_matches_ceiling() {
        let cases = [
            (bbox(112.0, -9.0, 154.0, -44.0), 2.5),
            (bbox(110.0, -10.0, 155.0, -45.0), 25.0),
            (bbox(0.0, 1.0, 10.0, 0.0), 1.0),
            (bbox(-0.3, 0.7, 0.9, -0.2), 0.1),
            (bbox(140.0, -30.0, 141.0, -31.0), 5.0),
        ];

        for (b, size) in cases {
            let plan = TilePlan::new(b, size, 7).unwrap();
            let expected_cols = steps(b.width(), size);
            let expected_rows = steps(b.height(), size);
            assert_eq!(plan.iter().count(), expected_cols * expected_rows);
            assert_eq!(plan.iter().len(), plan.len());
        }

        // 42 x 35 degrees at 2.5 -> 17 x 14
        let plan = TilePlan::new(BoundingBox::AUSTRALIA, 2.5, 7).unwrap();
        assert_eq!((plan.columns(), plan.rows()), (17, 14));
    }

    #[test]
    fn test_even_division_has_no_sliver() {
        // 1.2 / 0.1 is 11.999999999999998 in floating point
        let plan = TilePlan::new(bbox(0.0, 1.2, 1.2, 0.0), 0.1, 7).unwrap();
        assert_eq!(plan.columns(), 12);
        assert_eq!(plan.rows(), 12);
    }

    #[test]
    fn test_tiles_cover_box_without_overlap() {
        let b = bbox(112.0, -9.0, 154.0, -44.0);
        let plan = TilePlan::new(b, 2.5, 7).unwrap();
        let tiles: Vec<Tile> = plan.iter().collect();

        let total: f64 = tiles.iter().map(Tile::area).sum();
        assert!((total - b.area()).abs() < 1e-6, "area {total} != {}", b.area());

        for tile in &tiles {
            assert!(tile.width() > 0.0 && tile.height() > 0.0);
            assert!(tile.width() <= 2.5 + EPS && tile.height() <= 2.5 + EPS);
            assert!(tile.nw_lng >= b.west - EPS && tile.se_lng <= b.east + EPS);
            assert!(tile.se_lat >= b.south - EPS && tile.nw_lat <= b.north + EPS);
        }

        for (i, a) in tiles.iter().enumerate() {
            for other in &tiles[i + 1..] {
                assert!(overlap_area(a, other) < EPS);
            }
        }
    }

    #[test]
    fn test_tile_larger_than_box() {
        let plan = TilePlan::new(bbox(140.0, -30.0, 141.0, -31.0), 5.0, 9).unwrap();
        let tiles: Vec<Tile> = plan.iter().collect();

        assert_eq!(tiles.len(), 1);
        assert_eq!(tiles[0].nw_lng, 140.0);
        assert_eq!(tiles[0].se_lng, 141.0);
        assert_eq!(tiles[0].zoom, 9);
    }

    #[test]
    fn test_plan_is_restartable() {
        let plan = TilePlan::new(BoundingBox::AUSTRALIA, 2.5, 7).unwrap();
        let first: Vec<Tile> = plan.iter().collect();
        let second: Vec<Tile> = (&plan).into_iter().collect();
        assert_eq!(first, second);

        let again = TilePlan::new(BoundingBox::AUSTRALIA, 2.5, 7).unwrap();
        assert_eq!(plan, again);
    }

    #[test]
    fn test_invalid_plans_rejected() {
        let b = BoundingBox::AUSTRALIA;
        assert!(matches!(
            TilePlan::new(b, 0.0, 7),
            Err(ScanError::InvalidPlan(_))
        ));
        assert!(TilePlan::new(b, -1.0, 7).is_err());
        assert!(TilePlan::new(b, f64::NAN, 7).is_err());
        assert!(TilePlan::new(b, 1e-6, 7).is_err());

        let inverted = BoundingBox {
            west: 150.0,
            north: -9.0,
            east: 112.0,
            south: -44.0,
        };
        assert!(TilePlan::new(inverted, 2.5, 7).is_err());
    }

    #[test]
    fn test_out_of_range_index() {
        let plan = TilePlan::new(bbox(0.0, 1.0, 2.0, 0.0), 1.0, 7).unwrap();
        assert!(plan.tile(1).is_some());
        assert!(plan.tile(2).is_none());
    }
}

//! Axis-aligned bounding boxes in the reference coordinate system.
//! All coordinate math uses f64.

use geo::{BoundingRect, Coord, Polygon, Rect};
use rstar::{RTree, RTreeObject, AABB};
use serde::{Deserialize, Serialize};

/// Axis-aligned extent. Used for proximity tests and partitioning, never as
/// a stand-in for true geometric intersection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Extent {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Extent {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self { min_x, min_y, max_x, max_y }
    }

    /// Extent of any geometry; `None` for empty geometries.
    pub fn of<G: BoundingRect<f64>>(geom: &G) -> Option<Self>
    where
        G::Output: Into<Option<Rect<f64>>>,
    {
        geom.bounding_rect().into().map(Self::from)
    }

    /// The "nothing yet" extent, suitable as a fold seed for [`Extent::union`].
    pub fn empty() -> Self {
        Self::new(f64::MAX, f64::MAX, f64::MIN, f64::MIN)
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    pub fn center(&self) -> Coord<f64> {
        Coord {
            x: (self.min_x + self.max_x) / 2.0,
            y: (self.min_y + self.max_y) / 2.0,
        }
    }

    /// Zero (or negative) width or height.
    pub fn is_degenerate(&self) -> bool {
        !(self.width() > 0.0 && self.height() > 0.0)
    }

    pub fn is_finite(&self) -> bool {
        self.min_x.is_finite() && self.min_y.is_finite() && self.max_x.is_finite() && self.max_y.is_finite()
    }

    /// Grow by `d` on every side.
    pub fn expand(&self, d: f64) -> Self {
        Self::new(self.min_x - d, self.min_y - d, self.max_x + d, self.max_y + d)
    }

    pub fn union(&self, other: &Extent) -> Self {
        Self::new(
            self.min_x.min(other.min_x),
            self.min_y.min(other.min_y),
            self.max_x.max(other.max_x),
            self.max_y.max(other.max_y),
        )
    }

    /// Closed-interval overlap; touching edges count.
    pub fn intersects(&self, other: &Extent) -> bool {
        self.min_x <= other.max_x && other.min_x <= self.max_x && self.min_y <= other.max_y && other.min_y <= self.max_y
    }

    pub fn contains(&self, c: Coord<f64>) -> bool {
        c.x >= self.min_x && c.x <= self.max_x && c.y >= self.min_y && c.y <= self.max_y
    }

    /// Horizontal gap between the two extents; 0 when they overlap in x.
    pub fn gap_x(&self, other: &Extent) -> f64 {
        (other.min_x - self.max_x).max(self.min_x - other.max_x).max(0.0)
    }

    /// Vertical gap between the two extents; 0 when they overlap in y.
    pub fn gap_y(&self, other: &Extent) -> f64 {
        (other.min_y - self.max_y).max(self.min_y - other.max_y).max(0.0)
    }

    /// Proximity relation used for grouping: both gaps within `distance`.
    /// Identical to the two extents overlapping once each is expanded by
    /// `distance / 2`.
    pub fn is_near(&self, other: &Extent, distance: f64) -> bool {
        self.gap_x(other) <= distance && self.gap_y(other) <= distance
    }

    pub fn to_rect(&self) -> Rect<f64> {
        Rect::new(
            Coord { x: self.min_x, y: self.min_y },
            Coord { x: self.max_x, y: self.max_y },
        )
    }

    pub fn to_polygon(&self) -> Polygon<f64> {
        self.to_rect().to_polygon()
    }

    pub fn to_aabb(&self) -> AABB<[f64; 2]> {
        AABB::from_corners([self.min_x, self.min_y], [self.max_x, self.max_y])
    }
}

/// An extent tagged with the index of the item it bounds, for R-tree use.
#[derive(Debug, Clone, Copy)]
pub struct IndexedExtent {
    pub idx: u32,
    pub env: AABB<[f64; 2]>,
}

impl RTreeObject for IndexedExtent {
    type Envelope = AABB<[f64; 2]>;

    #[inline]
    fn envelope(&self) -> Self::Envelope {
        self.env
    }
}

/// Bulk-load an index over `extents`, tagging each with its position.
pub fn index_extents(extents: impl IntoIterator<Item = Extent>) -> RTree<IndexedExtent> {
    let items = extents
        .into_iter()
        .enumerate()
        .map(|(i, e)| IndexedExtent { idx: i as u32, env: e.to_aabb() })
        .collect();
    RTree::bulk_load(items)
}

impl From<Rect<f64>> for Extent {
    fn from(r: Rect<f64>) -> Self {
        Self::new(r.min().x, r.min().y, r.max().x, r.max().y)
    }
}

use geo::{Coord, LineString, Polygon};
use serde::{Deserialize, Serialize};

/// Arc segments per quarter circle. Even, so one arc vertex lies on the axis.
const ARC_SEGMENTS: usize = 8;

/// Radius margin over the anchor-to-center distance.
const RADIUS_FACTOR: f64 = 1.1;

/// Which corner of the pixel faces the settlement the patch attaches to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Corner {
    NorthEast = 0,
    SouthEast = 1,
    SouthWest = 2,
    NorthWest = 3,
}

impl Corner {
    /// Quadrant of `offset` (settlement side relative to the pixel center).
    pub fn from_offset(offset: Coord<f64>) -> Self {
        match (offset.x >= 0.0, offset.y >= 0.0) {
            (true, true) => Corner::NorthEast,
            (true, false) => Corner::SouthEast,
            (false, false) => Corner::SouthWest,
            (false, true) => Corner::NorthWest,
        }
    }
}

/// Point a patch brings inside its settlement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PatchTarget {
    /// Center of a raster pixel keyed by the footprint.
    #[default]
    PixelCenter,
    /// Extent center of the footprint itself (L and U shapes).
    FootprintCenter,
}

/// One synthesized patch and the pixel it repairs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CornerRecord {
    pub settlement_id: u64,
    pub footprint_id: u64,
    /// Pixel holding `center`.
    pub raster_col: u32,
    pub raster_row: u32,
    #[serde(default)]
    pub target: PatchTarget,
    /// Point brought inside the settlement.
    pub center: Coord<f64>,
    pub corner: Corner,
    pub patch: Polygon<f64>,
}

/// Quarter-circle sector whose apex sits just behind `anchor` (a settlement
/// boundary point) and whose axis points at `center`. `nudge` moves the apex
/// back into the settlement so the patch overlaps it rather than touching.
///
/// The radius exceeds the apex-to-center distance, so `center` lies strictly
/// inside the sector.
pub fn corner_patch(anchor: Coord<f64>, center: Coord<f64>, nudge: f64) -> Option<Polygon<f64>> {
    let dx = center.x - anchor.x;
    let dy = center.y - anchor.y;
    let d = dx.hypot(dy);
    if !(d > 0.0) || !d.is_finite() {
        return None;
    }
    let (ux, uy) = (dx / d, dy / d);
    let apex = Coord { x: anchor.x - ux * nudge, y: anchor.y - uy * nudge };
    let radius = (d + nudge) * RADIUS_FACTOR;
    let axis = uy.atan2(ux);

    let mut ring = Vec::with_capacity(ARC_SEGMENTS + 3);
    ring.push(apex);
    for k in 0..=ARC_SEGMENTS {
        let a = axis - std::f64::consts::FRAC_PI_4 + std::f64::consts::FRAC_PI_2 * k as f64 / ARC_SEGMENTS as f64;
        ring.push(Coord { x: apex.x + radius * a.cos(), y: apex.y + radius * a.sin() });
    }
    ring.push(apex);
    Some(Polygon::new(LineString::from(ring), vec![]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use geo::{Area, Contains, Point};

    #[test]
    fn patch_covers_center_and_anchor() {
        let anchor = Coord { x: 3.0, y: 1.0 };
        let center = Coord { x: 5.0, y: 2.5 };
        let p = corner_patch(anchor, center, 0.05).unwrap();
        assert!(p.contains(&Point::from(center)));
        assert!(p.contains(&Point::from(anchor)));
        // quarter of a circle, slightly under because of the polygonal arc
        let r = (2.5 + 0.05) * RADIUS_FACTOR;
        let quarter = std::f64::consts::PI * r * r / 4.0;
        assert!(p.unsigned_area() < quarter);
        assert_relative_eq!(p.unsigned_area(), quarter, max_relative = 0.01);
    }

    #[test]
    fn degenerate_patch_is_none() {
        let c = Coord { x: 1.0, y: 1.0 };
        assert!(corner_patch(c, c, 0.1).is_none());
    }

    #[test]
    fn corner_quadrants() {
        assert_eq!(Corner::from_offset(Coord { x: 1.0, y: 1.0 }), Corner::NorthEast);
        assert_eq!(Corner::from_offset(Coord { x: 1.0, y: -1.0 }), Corner::SouthEast);
        assert_eq!(Corner::from_offset(Coord { x: -1.0, y: -1.0 }), Corner::SouthWest);
        assert_eq!(Corner::from_offset(Coord { x: -1.0, y: 0.5 }), Corner::NorthWest);
        assert_eq!(Corner::SouthWest as u8, 2);
    }
}

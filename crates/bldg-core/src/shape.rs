//! Shape builder: buffer, dissolve and hole-fill one group into a settlement
//! shape.

use geo::MultiPolygon;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::Result;
use crate::geometry::{self, Units};
use crate::grouping::Group;

/// A settlement outline before classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettlementShape {
    pub id: u64,
    pub geometry: MultiPolygon<f64>,
    /// Footprints that produced this shape, summed when shapes merge.
    pub building_count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShapeParams {
    pub buffer_meters: f64,
    pub hole_cutoff_m2: Option<f64>,
    pub units: Units,
}

impl From<&Config> for ShapeParams {
    fn from(c: &Config) -> Self {
        Self {
            buffer_meters: c.buffer_meters,
            hole_cutoff_m2: c.hole_fill_max_area_m2,
            units: c.units,
        }
    }
}

/// Buffer every member, union the buffers and fill holes below the cutoff.
/// Invalid output is repaired once; if that fails the group is a
/// `GeometryError`.
pub fn build_shape(group: &Group, params: &ShapeParams) -> Result<SettlementShape> {
    let buffered: Vec<MultiPolygon<f64>> = group
        .members
        .iter()
        .map(|f| geometry::buffer_polygon(&f.geometry, params.buffer_meters, params.units))
        .collect();
    let dissolved = geometry::union_all(buffered);
    let filled = geometry::fill_holes(&dissolved, params.hole_cutoff_m2, params.units);
    let geometry = geometry::ensure_valid(filled, format!("group {}", group.id))?;
    Ok(SettlementShape {
        id: group.id,
        geometry,
        building_count: group.members.len() as u64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extent::Extent;
    use crate::footprint::Footprint;
    use approx::assert_relative_eq;
    use geo::{polygon, Area, BooleanOps};

    fn rect(id: u64, x: f64, y: f64, w: f64, h: f64) -> Footprint {
        Footprint::new(id, polygon![(x: x, y: y), (x: x + w, y: y), (x: x + w, y: y + h), (x: x, y: y + h), (x: x, y: y)])
    }

    fn group(members: Vec<Footprint>) -> Group {
        let extent = members.iter().fold(Extent::empty(), |a, f| a.union(&f.extent()));
        Group { id: 1, extent, members }
    }

    fn params(buffer: f64, cutoff: Option<f64>) -> ShapeParams {
        ShapeParams { buffer_meters: buffer, hole_cutoff_m2: cutoff, units: Units::Metres }
    }

    /// Four walls around a 10 × 10 courtyard.
    fn courtyard() -> Group {
        group(vec![
            rect(1, 0.0, 0.0, 12.0, 1.0),
            rect(2, 0.0, 11.0, 12.0, 1.0),
            rect(3, 0.0, 1.0, 1.0, 10.0),
            rect(4, 11.0, 1.0, 1.0, 10.0),
        ])
    }

    #[test]
    fn buffered_neighbours_dissolve_into_one_part() {
        let g = group(vec![rect(1, 0.0, 0.0, 1.0, 1.0), rect(2, 2.0, 0.0, 1.0, 1.0)]);
        let s = build_shape(&g, &params(0.6, None)).unwrap();
        assert_eq!(s.geometry.0.len(), 1);
        assert_eq!(s.building_count, 2);
    }

    #[test]
    fn holes_below_cutoff_are_filled() {
        let keep = build_shape(&courtyard(), &params(0.1, Some(50.0))).unwrap();
        assert_eq!(keep.geometry.0[0].interiors().len(), 1);

        let fill = build_shape(&courtyard(), &params(0.1, Some(200.0))).unwrap();
        assert!(fill.geometry.0[0].interiors().is_empty());
        assert!(fill.geometry.unsigned_area() > keep.geometry.unsigned_area() + 90.0);

        let fill_all = build_shape(&courtyard(), &params(0.1, None)).unwrap();
        assert_relative_eq!(fill_all.geometry.unsigned_area(), fill.geometry.unsigned_area(), epsilon = 1e-9);
    }

    #[test]
    fn idempotent_under_re_union() {
        let s = build_shape(&courtyard(), &params(0.5, Some(10.0))).unwrap();
        let again = s.geometry.union(&s.geometry);
        assert_relative_eq!(again.unsigned_area(), s.geometry.unsigned_area(), max_relative = 1e-9);
        assert_eq!(again.0.len(), s.geometry.0.len());
    }

    #[test]
    fn unrepairable_group_is_geometry_error() {
        let flat = Footprint::new(9, polygon![(x: 0.0, y: 0.0), (x: 1.0, y: 0.0), (x: 2.0, y: 0.0), (x: 0.0, y: 0.0)]);
        let err = build_shape(&group(vec![flat]), &params(0.0, None)).unwrap_err();
        assert_eq!(err.kind(), "GeometryError");
    }
}

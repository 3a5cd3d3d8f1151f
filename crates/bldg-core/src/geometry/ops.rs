use geo::{
    Area, BooleanOps, Buffer, Closest, ClosestPoint, Contains, Coord, LineString, MultiPolygon, Point, Polygon,
    Validation,
};

use rstar::AABB;

use super::metric::Units;
use crate::extent::{index_extents, Extent};

pub fn empty() -> MultiPolygon<f64> {
    MultiPolygon::new(Vec::new())
}

/// Buffer `poly` outward by `metres`, measured in a local metric frame
/// centred on the polygon so degree inputs are buffered in real metres.
pub fn buffer_polygon(poly: &Polygon<f64>, metres: f64, units: Units) -> MultiPolygon<f64> {
    if metres <= 0.0 {
        return MultiPolygon::new(vec![poly.clone()]);
    }
    let Some(ext) = Extent::of(poly) else {
        return empty();
    };
    let frame = units.frame_at(ext.center());
    let local = frame.polygon_to_local(poly);
    frame.multi_to_world(&local.buffer(metres))
}

/// Union of every shape, merged pairwise in a balanced tree so that the
/// result only depends on input order, never on scheduling.
pub fn union_all(mut shapes: Vec<MultiPolygon<f64>>) -> MultiPolygon<f64> {
    shapes.retain(|s| !s.0.is_empty());
    while shapes.len() > 1 {
        let mut next = Vec::with_capacity(shapes.len().div_ceil(2));
        let mut it = shapes.into_iter();
        while let Some(a) = it.next() {
            match it.next() {
                Some(b) => next.push(a.union(&b)),
                None => next.push(a),
            }
        }
        shapes = next;
    }
    shapes.pop().unwrap_or_else(empty)
}

/// Intersection with an extent rectangle.
pub fn clip_to_extent(shape: &MultiPolygon<f64>, extent: &Extent) -> MultiPolygon<f64> {
    let window = MultiPolygon::new(vec![extent.to_polygon()]);
    shape.intersection(&window)
}

/// Drop interior rings smaller than `cutoff_m2`. With no cutoff every hole is
/// filled.
pub fn fill_holes(shape: &MultiPolygon<f64>, cutoff_m2: Option<f64>, units: Units) -> MultiPolygon<f64> {
    let polys = shape
        .0
        .iter()
        .map(|p| {
            let kept: Vec<LineString<f64>> = match cutoff_m2 {
                None => Vec::new(),
                Some(cutoff) => p
                    .interiors()
                    .iter()
                    .filter(|ring| units.polygon_area_m2(&Polygon::new((*ring).clone(), vec![])) >= cutoff)
                    .cloned()
                    .collect(),
            };
            Polygon::new(p.exterior().clone(), kept)
        })
        .collect();
    MultiPolygon::new(polys)
}

/// OGC validity as reported by `geo` (ring closure, finite coordinates,
/// self-intersections, hole placement), plus a non-empty shape whose parts
/// all have a positive area.
pub fn check_valid(shape: &MultiPolygon<f64>) -> Result<(), String> {
    if shape.0.is_empty() {
        return Err("empty geometry".into());
    }
    shape.check_validation().map_err(|e| e.to_string())?;
    if let Some(i) = shape.0.iter().position(|p| !(p.unsigned_area() > 0.0)) {
        return Err(format!("part {i} has zero area"));
    }
    Ok(())
}

/// One repair pass: strip non-finite and repeated positions, drop collapsed
/// rings, then re-node through the overlay engine.
pub fn repair(shape: &MultiPolygon<f64>) -> MultiPolygon<f64> {
    let polys: Vec<Polygon<f64>> = shape
        .0
        .iter()
        .filter_map(|p| {
            let ext = clean_ring(p.exterior())?;
            let ints = p.interiors().iter().filter_map(clean_ring).collect();
            Some(Polygon::new(ext, ints))
        })
        .collect();
    if polys.is_empty() {
        return empty();
    }
    MultiPolygon::new(polys).union(&empty())
}

fn clean_ring(ring: &LineString<f64>) -> Option<LineString<f64>> {
    let mut out: Vec<Coord<f64>> = Vec::with_capacity(ring.0.len());
    for c in ring.0.iter().filter(|c| c.x.is_finite() && c.y.is_finite()) {
        if out.last() != Some(c) {
            out.push(*c);
        }
    }
    if out.len() >= 2 && out.first() == out.last() {
        out.pop();
    }
    (out.len() >= 3).then(|| LineString::from(out))
}

/// Strictly inside (boundary excluded).
pub fn contains_coord(shape: &MultiPolygon<f64>, c: Coord<f64>) -> bool {
    shape.contains(&Point::from(c))
}

/// Nearest point on any ring of `shape` to `c`, with its distance.
pub fn nearest_boundary_point(shape: &MultiPolygon<f64>, c: Coord<f64>) -> Option<(Coord<f64>, f64)> {
    let target = Point::from(c);
    let mut best: Option<(Coord<f64>, f64)> = None;
    for p in &shape.0 {
        for ring in std::iter::once(p.exterior()).chain(p.interiors()) {
            let hit = match ring.closest_point(&target) {
                Closest::Intersection(q) | Closest::SinglePoint(q) => q,
                Closest::Indeterminate => continue,
            };
            let d = (hit.x() - c.x).hypot(hit.y() - c.y);
            if best.map_or(true, |(_, bd)| d < bd) {
                best = Some((hit.0, d));
            }
        }
    }
    best
}

/// For each point, the ascending indices of the shapes strictly containing
/// it. Candidates come from an R-tree over the shape extents.
pub fn shapes_containing(shapes: &[MultiPolygon<f64>], points: &[Coord<f64>]) -> Vec<Vec<u32>> {
    let tree = index_extents(shapes.iter().map(|s| Extent::of(s).unwrap_or_else(Extent::empty)));
    points
        .iter()
        .map(|p| {
            let mut hits: Vec<u32> = tree
                .locate_in_envelope_intersecting(&AABB::from_point([p.x, p.y]))
                .filter(|e| contains_coord(&shapes[e.idx as usize], *p))
                .map(|e| e.idx)
                .collect();
            hits.sort_unstable();
            hits
        })
        .collect()
}

pub fn vertex_count(shape: &MultiPolygon<f64>) -> usize {
    shape
        .0
        .iter()
        .map(|p| p.exterior().0.len() + p.interiors().iter().map(|r| r.0.len()).sum::<usize>())
        .sum()
}

use geo::{Area, ChamberlainDuquetteArea, Coord, MapCoords, MultiPolygon, Polygon};
use serde::{Deserialize, Serialize};

/// Metres per degree of latitude (and of longitude at the equator).
pub const METRES_PER_DEGREE: f64 = 111_320.0;

/// Working coordinate system of footprints and the reference raster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Units {
    /// Geographic longitude/latitude.
    #[default]
    Degrees,
    /// Already projected, 1 unit = 1 m.
    Metres,
}

impl Units {
    /// A local frame centred on `origin` in which distances are metres.
    pub fn frame_at(self, origin: Coord<f64>) -> LocalFrame {
        match self {
            Units::Metres => LocalFrame { origin, sx: 1.0, sy: 1.0 },
            Units::Degrees => {
                let cos_lat = origin.y.to_radians().cos().max(1e-6);
                LocalFrame {
                    origin,
                    sx: METRES_PER_DEGREE * cos_lat,
                    sy: METRES_PER_DEGREE,
                }
            }
        }
    }

    /// Area of `shape` in square metres.
    pub fn area_m2(self, shape: &MultiPolygon<f64>) -> f64 {
        match self {
            Units::Metres => shape.unsigned_area(),
            Units::Degrees => shape.chamberlain_duquette_unsigned_area(),
        }
    }

    pub fn polygon_area_m2(self, poly: &Polygon<f64>) -> f64 {
        match self {
            Units::Metres => poly.unsigned_area(),
            Units::Degrees => poly.chamberlain_duquette_unsigned_area(),
        }
    }
}

/// Equirectangular projection around a local origin. Accurate to well under a
/// percent over the few kilometres a settlement group spans.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocalFrame {
    pub origin: Coord<f64>,
    /// Metres per unit along x.
    pub sx: f64,
    /// Metres per unit along y.
    pub sy: f64,
}

impl LocalFrame {
    #[inline]
    pub fn to_local(&self, c: Coord<f64>) -> Coord<f64> {
        Coord {
            x: (c.x - self.origin.x) * self.sx,
            y: (c.y - self.origin.y) * self.sy,
        }
    }

    #[inline]
    pub fn to_world(&self, c: Coord<f64>) -> Coord<f64> {
        Coord {
            x: c.x / self.sx + self.origin.x,
            y: c.y / self.sy + self.origin.y,
        }
    }

    pub fn polygon_to_local(&self, p: &Polygon<f64>) -> Polygon<f64> {
        p.map_coords(|c| self.to_local(c))
    }

    pub fn multi_to_world(&self, mp: &MultiPolygon<f64>) -> MultiPolygon<f64> {
        mp.map_coords(|c| self.to_world(c))
    }
}

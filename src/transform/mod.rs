//! # Coordinate Transform
//!
//! Converts geometries between coordinate reference systems identified by
//! EPSG codes. Every conversion goes through geographic longitude/latitude:
//! inverse-project from the source system, forward-project into the target.
//!
//! A [`Transformer`] owns a bounded [`ProjectionCache`] so that the transform
//! for a given (from, to) pair is built once and reused.

mod cache;
mod projection;

use std::sync::{Arc, Mutex};

use geo::{
    Coord, Geometry, LineString, MapCoords, MultiLineString, MultiPoint, MultiPolygon, Point,
};
use serde::{Deserialize, Serialize};

pub use cache::{ProjectionCache, DEFAULT_PROJECTION_CACHE_CAPACITY};
pub use projection::{Ellipsoid, Projection, TransverseMercator};

use crate::error::{Result, RoadNetworkError};

/// A coordinate reference system identified by its EPSG code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Crs(pub u32);

impl Crs {
    /// WGS84 geographic longitude/latitude
    pub const WGS84: Crs = Crs(4326);
    /// New Zealand Transverse Mercator 2000
    pub const NZTM2000: Crs = Crs(2193);
    /// Spherical web Mercator
    pub const WEB_MERCATOR: Crs = Crs(3857);

    pub fn code(self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for Crs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EPSG:{}", self.0)
    }
}

/// A ready-to-use conversion between two coordinate reference systems.
#[derive(Debug, Clone, PartialEq)]
pub struct CrsTransform {
    from: Crs,
    to: Crs,
    source: Projection,
    target: Projection,
}

impl CrsTransform {
    pub fn new(from: Crs, to: Crs) -> Result<Self> {
        Ok(Self {
            from,
            to,
            source: Projection::from_crs(from)?,
            target: Projection::from_crs(to)?,
        })
    }

    pub fn from(&self) -> Crs {
        self.from
    }

    pub fn to(&self) -> Crs {
        self.to
    }

    /// Convert a single coordinate.
    pub fn convert(&self, coord: Coord<f64>) -> Result<Coord<f64>> {
        if self.from == self.to {
            return Ok(coord);
        }
        let converted = self
            .target
            .from_geographic(self.source.to_geographic(coord));
        if converted.x.is_finite() && converted.y.is_finite() {
            Ok(converted)
        } else {
            Err(RoadNetworkError::invalid_argument(format!(
                "({}, {}) cannot be transformed from {} to {}",
                coord.x, coord.y, self.from, self.to
            )))
        }
    }
}

/// Geometry transformer with a bounded cache of CRS pairs.
#[derive(Debug)]
pub struct Transformer {
    cache: Mutex<ProjectionCache>,
}

impl Transformer {
    pub fn new(capacity: usize) -> Self {
        Self {
            cache: Mutex::new(ProjectionCache::new(capacity)),
        }
    }

    /// Get (or build and cache) the transform for a CRS pair.
    pub fn projection(&self, from: Crs, to: Crs) -> Result<Arc<CrsTransform>> {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(transform) = cache.get(from, to) {
            return Ok(transform);
        }
        let transform = Arc::new(CrsTransform::new(from, to)?);
        cache.insert(Arc::clone(&transform));
        Ok(transform)
    }

    /// Number of CRS pairs currently cached.
    pub fn cached_pairs(&self) -> usize {
        self.cache.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Transform any single geometry.
    pub fn transform(&self, geometry: &Geometry<f64>, from: Crs, to: Crs) -> Result<Geometry<f64>> {
        if from == to {
            return Ok(geometry.clone());
        }
        let transform = self.projection(from, to)?;
        let transform: &CrsTransform = &transform;
        geometry.try_map_coords(|c| transform.convert(c))
    }

    pub fn transform_point(&self, point: Point<f64>, from: Crs, to: Crs) -> Result<Point<f64>> {
        if from == to {
            return Ok(point);
        }
        let transform = self.projection(from, to)?;
        transform.convert(point.0).map(Point::from)
    }

    pub fn transform_line(
        &self,
        line: &LineString<f64>,
        from: Crs,
        to: Crs,
    ) -> Result<LineString<f64>> {
        if from == to {
            return Ok(line.clone());
        }
        let transform = self.projection(from, to)?;
        let transform: &CrsTransform = &transform;
        line.try_map_coords(|c| transform.convert(c))
    }

    /// Transform a homogeneous list of points, lines or polygons into the
    /// matching multi-geometry.
    pub fn transform_many(
        &self,
        geometries: Vec<Geometry<f64>>,
        from: Crs,
        to: Crs,
    ) -> Result<Geometry<f64>> {
        let collected = collect_homogeneous(geometries)?;
        self.transform(&collected, from, to)
    }
}

impl Default for Transformer {
    fn default() -> Self {
        Self::new(DEFAULT_PROJECTION_CACHE_CAPACITY)
    }
}

impl Clone for Transformer {
    /// Clones start with an empty cache of the same capacity.
    fn clone(&self) -> Self {
        let capacity = self
            .cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .capacity();
        Self::new(capacity)
    }
}

/// One-off transform of a single geometry without a shared cache.
pub fn transform(geometry: &Geometry<f64>, from: Crs, to: Crs) -> Result<Geometry<f64>> {
    Transformer::new(1).transform(geometry, from, to)
}

fn collect_homogeneous(geometries: Vec<Geometry<f64>>) -> Result<Geometry<f64>> {
    let Some(first) = geometries.first() else {
        return Err(RoadNetworkError::invalid_argument(
            "cannot transform an empty geometry list",
        ));
    };

    let mismatch = || RoadNetworkError::invalid_argument("geometry list contains mixed types");

    match first {
        Geometry::Point(_) => geometries
            .into_iter()
            .map(|g| match g {
                Geometry::Point(p) => Ok(p),
                _ => Err(mismatch()),
            })
            .collect::<Result<Vec<_>>>()
            .map(|points| Geometry::MultiPoint(MultiPoint::new(points))),
        Geometry::LineString(_) => geometries
            .into_iter()
            .map(|g| match g {
                Geometry::LineString(l) => Ok(l),
                _ => Err(mismatch()),
            })
            .collect::<Result<Vec<_>>>()
            .map(|lines| Geometry::MultiLineString(MultiLineString::new(lines))),
        Geometry::Polygon(_) => geometries
            .into_iter()
            .map(|g| match g {
                Geometry::Polygon(p) => Ok(p),
                _ => Err(mismatch()),
            })
            .collect::<Result<Vec<_>>>()
            .map(|polygons| Geometry::MultiPolygon(MultiPolygon::new(polygons))),
        _ => Err(RoadNetworkError::invalid_argument(
            "only points, lines and polygons can be transformed as a list",
        )),
    }
}

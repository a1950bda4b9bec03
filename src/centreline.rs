//! # Centreline
//!
//! The network model: an immutable table of carriageway elements with the
//! operations that relate geographic positions to chainage.
//!
//! ## Operations
//!
//! - Nearest feature: which carriageway element is closest to a point, by an
//!   exact shortest-line scan or an approximate R-tree lookup
//! - Position: road id and chainage of a point
//! - Geometry extraction: the polyline between two chainages of a road,
//!   stitched across element boundaries
//! - Subsetting: networks limited to some roads or to the neighbourhood of
//!   query points
//!
//! The point cloud and its R-tree are built on the first indexed query and
//! reused for the lifetime of the network.

use std::collections::{BTreeMap, HashSet};
use std::str::FromStr;

use geo::{Closest, ClosestPoint, Coord, Distance, Euclidean, LineString, Point};
use log::{debug, info, warn};
use once_cell::sync::OnceCell;
use rstar::{RTree, RTreeObject, AABB};
use serde::Serialize;
use wkt::ToWkt;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::algorithms::{first_vertex_past, interpolate, locate, vertex_fractions};
use crate::error::{Result, RoadNetworkError};
use crate::index::{build_point_cloud, SamplePoint, SpatialIndex};
use crate::transform::{Crs, Transformer};
use crate::types::{CarriagewayRecord, ChainageRange, RoadNames, RouteInfo, Segment};
use crate::{NetworkConfig, RoadId, SegmentId};

// ============================================================================
// Query Types
// ============================================================================

/// Algorithm used to find the nearest carriageway element.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum NearestMethod {
    /// Exact: shortest line from the point to the network geometry
    #[default]
    ShortestLine,
    /// Approximate: nearest samples of the resampled point cloud
    KdTree,
}

impl FromStr for NearestMethod {
    type Err = RoadNetworkError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "shortest line" | "shortest_line" | "shortestline" => Ok(NearestMethod::ShortestLine),
            "kdtree" | "kd-tree" | "kd_tree" => Ok(NearestMethod::KdTree),
            other => Err(RoadNetworkError::invalid_argument(format!(
                "unknown nearest-feature method '{}'",
                other
            ))),
        }
    }
}

/// Geometry column appended by [`Centreline::append_geometry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum GeometryType {
    /// Well-known-text of the extracted line
    Wkt,
    /// Easting/northing of the start of the extracted line
    Coord,
}

impl FromStr for GeometryType {
    type Err = RoadNetworkError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "wkt" => Ok(GeometryType::Wkt),
            "coord" => Ok(GeometryType::Coord),
            other => Err(RoadNetworkError::invalid_argument(format!(
                "geometry_type must be 'wkt' or 'coord', got '{}'",
                other
            ))),
        }
    }
}

/// Nearest carriageway element to a query point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct NearestFeature {
    pub carr_way_no: SegmentId,
    pub road_id: RoadId,
    /// Distance from the query point to the element, in metres
    pub offset_m: f64,
}

/// Location of a point on the network.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RoutePosition {
    pub road_id: RoadId,
    /// Chainage of the projected point
    pub position_m: f64,
    pub carr_way_no: SegmentId,
    pub search_offset_m: f64,
}

/// Geometry appended to a row. `None` values mark rows with no covering
/// carriageway.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum GeometryColumn {
    Wkt {
        wkt: Option<String>,
    },
    Coord {
        easting: Option<f64>,
        northing: Option<f64>,
    },
}

impl GeometryColumn {
    pub fn is_missing(&self) -> bool {
        match self {
            GeometryColumn::Wkt { wkt } => wkt.is_none(),
            GeometryColumn::Coord { easting, .. } => easting.is_none(),
        }
    }
}

/// A caller row with its appended geometry column.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Located<R> {
    #[serde(flatten)]
    pub row: R,
    #[serde(flatten)]
    pub geometry: GeometryColumn,
}

/// Segment bounding box for R-tree proximity filtering
#[derive(Debug, Clone)]
struct SegmentBounds {
    carr_way_no: SegmentId,
    min: [f64; 2],
    max: [f64; 2],
}

impl RTreeObject for SegmentBounds {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_corners(self.min, self.max)
    }
}

// ============================================================================
// Centreline
// ============================================================================

/// Immutable road network model.
#[derive(Debug)]
pub struct Centreline {
    segments: BTreeMap<SegmentId, Segment>,
    /// Segment ids per road, sorted by start chainage
    by_road: BTreeMap<RoadId, Vec<SegmentId>>,
    config: NetworkConfig,
    transformer: Transformer,
    index: OnceCell<SpatialIndex>,
}

impl Centreline {
    /// Build a network from carriageway records whose geometry is already in
    /// `config.reference_crs`.
    ///
    /// Rows repeating an earlier (road id, start, end) triple are dropped.
    /// Roads missing from `roadnames` keep an empty [`RouteInfo`].
    pub fn new(
        records: Vec<CarriagewayRecord>,
        roadnames: &RoadNames,
        config: NetworkConfig,
    ) -> Result<Self> {
        config.validate()?;

        let mut seen: HashSet<(RoadId, u64, u64)> = HashSet::new();
        let mut segments = Vec::with_capacity(records.len());
        let mut duplicates = 0;

        for record in records {
            let key = (
                record.road_id,
                record.start_m.to_bits(),
                record.end_m.to_bits(),
            );
            if !seen.insert(key) {
                duplicates += 1;
                continue;
            }
            validate_record(&record)?;

            let route = roadnames.get(record.road_id).cloned().unwrap_or_else(|| {
                debug!(
                    "[Centreline] Road {} has no roadnames entry",
                    record.road_id
                );
                RouteInfo {
                    road_id: record.road_id,
                    ..Default::default()
                }
            });

            segments.push(Segment {
                carr_way_no: record.carr_way_no,
                road_id: record.road_id,
                start_m: record.start_m,
                end_m: record.end_m,
                length_m: record.length_m.unwrap_or(record.end_m - record.start_m),
                geometry: record.geometry,
                route,
            });
        }

        if duplicates > 0 {
            debug!(
                "[Centreline] Dropped {} duplicate carriageway rows",
                duplicates
            );
        }

        Ok(Self::from_segments(segments, config))
    }

    /// Build a network from records whose geometry is in `config.input_crs`,
    /// reprojecting it into the reference CRS.
    pub fn from_geographic(
        records: Vec<CarriagewayRecord>,
        roadnames: &RoadNames,
        config: NetworkConfig,
    ) -> Result<Self> {
        config.validate()?;
        let transformer = Transformer::new(config.projection_cache_capacity);
        let records = records
            .into_iter()
            .map(|mut record| {
                record.geometry = transformer.transform_line(
                    &record.geometry,
                    config.input_crs,
                    config.reference_crs,
                )?;
                Ok(record)
            })
            .collect::<Result<Vec<_>>>()?;
        Self::new(records, roadnames, config)
    }

    pub(crate) fn from_segments(segments: Vec<Segment>, config: NetworkConfig) -> Self {
        let mut table: BTreeMap<SegmentId, Segment> = BTreeMap::new();
        for segment in segments {
            if table.contains_key(&segment.carr_way_no) {
                warn!(
                    "[Centreline] Carriageway {} appears twice, keeping the first row",
                    segment.carr_way_no
                );
                continue;
            }
            table.insert(segment.carr_way_no, segment);
        }

        let mut by_road: BTreeMap<RoadId, Vec<SegmentId>> = BTreeMap::new();
        for segment in table.values() {
            by_road
                .entry(segment.road_id)
                .or_default()
                .push(segment.carr_way_no);
        }
        for ids in by_road.values_mut() {
            ids.sort_by(|a, b| table[a].start_m.total_cmp(&table[b].start_m));
        }

        info!(
            "[Centreline] Built network: {} carriageways on {} roads",
            table.len(),
            by_road.len()
        );

        Self {
            segments: table,
            by_road,
            transformer: Transformer::new(config.projection_cache_capacity),
            config,
            index: OnceCell::new(),
        }
    }

    /// Use an already resampled point cloud instead of building one lazily.
    pub fn with_point_cloud(self, samples: Vec<SamplePoint>) -> Self {
        Self {
            index: OnceCell::with_value(SpatialIndex::new(samples)),
            ..self
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    pub fn transformer(&self) -> &Transformer {
        &self.transformer
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn segment(&self, carr_way_no: SegmentId) -> Option<&Segment> {
        self.segments.get(&carr_way_no)
    }

    /// All segments ordered by id.
    pub fn segments(&self) -> impl Iterator<Item = &Segment> {
        self.segments.values()
    }

    pub fn road_ids(&self) -> impl Iterator<Item = RoadId> + '_ {
        self.by_road.keys().copied()
    }

    pub fn contains_road(&self, road_id: RoadId) -> bool {
        self.by_road.contains_key(&road_id)
    }

    /// Segments of one road ordered by start chainage.
    pub fn road_segments(&self, road_id: RoadId) -> impl Iterator<Item = &Segment> {
        self.by_road
            .get(&road_id)
            .into_iter()
            .flatten()
            .filter_map(|id| self.segments.get(id))
    }

    /// Minimum start and maximum end chainage of a road.
    pub fn route_extent(&self, road_id: RoadId) -> Option<(f64, f64)> {
        self.road_segments(road_id).fold(None, |acc, s| match acc {
            None => Some((s.start_m, s.end_m)),
            Some((lo, hi)) => Some((lo.min(s.start_m), hi.max(s.end_m))),
        })
    }

    /// The resampled point cloud (built on first use).
    pub fn point_cloud(&self) -> impl Iterator<Item = &SamplePoint> {
        self.spatial_index().samples()
    }

    pub fn is_index_built(&self) -> bool {
        self.index.get().is_some()
    }

    fn spatial_index(&self) -> &SpatialIndex {
        self.index.get_or_init(|| {
            let samples = build_point_cloud(self.segments.values(), self.config.sample_step_m);
            info!(
                "[Centreline] Built point cloud: {} samples at {}m",
                samples.len(),
                self.config.sample_step_m
            );
            SpatialIndex::new(samples)
        })
    }

    fn to_reference(&self, point: Point<f64>, point_crs: Crs) -> Result<Point<f64>> {
        self.transformer
            .transform_point(point, point_crs, self.config.reference_crs)
    }

    // ========================================================================
    // Nearest Feature and Position
    // ========================================================================

    /// Find the carriageway element nearest to `point`.
    ///
    /// When `road_id` is given only that road is searched. Returns `Ok(None)`
    /// when nothing matches.
    pub fn nearest_feature(
        &self,
        point: Point<f64>,
        point_crs: Crs,
        road_id: Option<RoadId>,
        method: NearestMethod,
    ) -> Result<Option<NearestFeature>> {
        let point = self.to_reference(point, point_crs)?;
        Ok(match method {
            NearestMethod::ShortestLine => self.nearest_by_shortest_line(point, road_id),
            NearestMethod::KdTree => self
                .spatial_index()
                .nearest(point.0, road_id)
                .map(|hit| NearestFeature {
                    carr_way_no: hit.carr_way_no,
                    road_id: hit.road_id,
                    offset_m: hit.offset_m,
                }),
        })
    }

    fn nearest_by_shortest_line(
        &self,
        point: Point<f64>,
        road_id: Option<RoadId>,
    ) -> Option<NearestFeature> {
        let candidates: Box<dyn Iterator<Item = &Segment> + '_> = match road_id {
            Some(r) => Box::new(self.road_segments(r)),
            None => Box::new(self.segments.values()),
        };

        let mut best: Option<(Point<f64>, f64)> = None;
        for segment in candidates {
            let projected = match segment.geometry.closest_point(&point) {
                Closest::Intersection(p) | Closest::SinglePoint(p) => p,
                Closest::Indeterminate => continue,
            };
            let dist = Euclidean::distance(point, projected);
            if best.map_or(true, |(_, d)| dist < d) {
                best = Some((projected, dist));
            }
        }
        let (projected, offset_m) = best?;

        // Relocate the element that owns the projected point
        let tolerance = self.config.match_tolerance;
        let mut fallback: Option<&Segment> = None;
        for segment in self.segments.values() {
            if Euclidean::distance(&projected, &segment.geometry) > tolerance {
                continue;
            }
            match road_id {
                Some(r) if segment.road_id != r => {
                    fallback.get_or_insert(segment);
                }
                _ => {
                    return Some(NearestFeature {
                        carr_way_no: segment.carr_way_no,
                        road_id: segment.road_id,
                        offset_m,
                    })
                }
            }
        }

        fallback.map(|segment| NearestFeature {
            carr_way_no: segment.carr_way_no,
            road_id: segment.road_id,
            offset_m,
        })
    }

    /// Road id and chainage of the network location nearest to `point`.
    ///
    /// The chainage is `start_m + fraction * length_m` where `fraction` is
    /// the normalised projection of the point on the matched element.
    pub fn position(
        &self,
        point: Point<f64>,
        point_crs: Crs,
        road_id: Option<RoadId>,
        method: NearestMethod,
    ) -> Result<Option<RoutePosition>> {
        let point = self.to_reference(point, point_crs)?;
        let Some(feature) =
            self.nearest_feature(point, self.config.reference_crs, road_id, method)?
        else {
            return Ok(None);
        };

        let Some(segment) = self.segments.get(&feature.carr_way_no) else {
            return Ok(None);
        };
        let Some(fraction) = locate(&segment.geometry, &point) else {
            return Ok(None);
        };

        Ok(Some(RoutePosition {
            road_id: segment.road_id,
            position_m: segment.start_m + fraction * segment.length_m,
            carr_way_no: segment.carr_way_no,
            search_offset_m: feature.offset_m,
        }))
    }

    /// Retired: superseded by [`Centreline::position`].
    #[deprecated(note = "use `Centreline::position` instead")]
    pub fn displacement(&self, _point: Point<f64>, _point_crs: Crs) -> Result<RoutePosition> {
        Err(RoadNetworkError::Deprecated {
            operation: "displacement",
            replacement: "position",
        })
    }

    // ========================================================================
    // Geometry Extraction
    // ========================================================================

    /// Polyline of `road_id` between two chainages.
    ///
    /// Elements are selected with `end_m > start AND start_m < end`, so an
    /// element that only touches the window is ignored. The result keeps the
    /// original vertices between exact interpolated end points. With
    /// `ends_only` it is reduced to those two end points.
    ///
    /// Returns `None` when no element of the road covers the window.
    pub fn extract_geometry(
        &self,
        road_id: RoadId,
        start_m: f64,
        end_m: f64,
        ends_only: bool,
    ) -> Option<LineString<f64>> {
        if !(start_m < end_m) {
            return None;
        }

        let selected: Vec<&Segment> = self
            .road_segments(road_id)
            .filter(|s| s.overlaps(start_m, end_m))
            .collect();
        let (first, last) = (*selected.first()?, *selected.last()?);

        let first_fractions = vertex_fractions(&first.geometry);
        let start_fraction = chainage_fraction(first, start_m);
        let mut coords = vec![interpolate(&first.geometry, start_fraction)?];
        let ii = first_vertex_past(&first_fractions, start_fraction);

        if selected.len() == 1 {
            let end_fraction = chainage_fraction(first, end_m);
            let jj = first_vertex_past(&first_fractions, end_fraction);
            if ii < jj {
                coords.extend_from_slice(&first.geometry.0[ii..jj]);
            }
            coords.push(interpolate(&first.geometry, end_fraction)?);
        } else {
            coords.extend_from_slice(&first.geometry.0[ii..]);

            // Interior elements share their first vertex with the previous one
            for segment in &selected[1..selected.len() - 1] {
                coords.extend(segment.geometry.0.iter().skip(1));
            }

            let end_fraction = chainage_fraction(last, end_m);
            let jj = first_vertex_past(&vertex_fractions(&last.geometry), end_fraction);
            if jj > 1 {
                coords.extend_from_slice(&last.geometry.0[1..jj]);
            }
            coords.push(interpolate(&last.geometry, end_fraction)?);
        }

        let mut deduped = coords.clone();
        deduped.dedup();
        if deduped.len() >= 2 {
            coords = deduped;
        }

        if ends_only {
            let (start, end) = (*coords.first()?, *coords.last()?);
            return Some(LineString::new(vec![start, end]));
        }
        Some(LineString::new(coords))
    }

    fn geometry_column<R: ChainageRange>(
        &self,
        row: &R,
        geometry_type: GeometryType,
        ends_only: bool,
    ) -> GeometryColumn {
        let line = self.extract_geometry(row.road_id(), row.start_m(), row.end_m(), ends_only);
        match geometry_type {
            GeometryType::Wkt => GeometryColumn::Wkt {
                wkt: line.map(|l| l.wkt_string()),
            },
            GeometryType::Coord => {
                let start: Option<Coord<f64>> = line.and_then(|l| l.0.first().copied());
                GeometryColumn::Coord {
                    easting: start.map(|c| c.x),
                    northing: start.map(|c| c.y),
                }
            }
        }
    }

    /// Append extracted geometry to every row.
    ///
    /// Rows with no covering carriageway get an empty column; the batch is
    /// never aborted.
    pub fn append_geometry<R, I>(
        &self,
        rows: I,
        geometry_type: GeometryType,
        ends_only: bool,
    ) -> Vec<Located<R>>
    where
        R: ChainageRange,
        I: IntoIterator<Item = R>,
    {
        let located: Vec<Located<R>> = rows
            .into_iter()
            .map(|row| {
                let geometry = self.geometry_column(&row, geometry_type, ends_only);
                Located { row, geometry }
            })
            .collect();
        log_missing(&located);
        located
    }

    /// Parallel version of [`Centreline::append_geometry`].
    #[cfg(feature = "parallel")]
    pub fn append_geometry_parallel<R>(
        &self,
        rows: Vec<R>,
        geometry_type: GeometryType,
        ends_only: bool,
    ) -> Vec<Located<R>>
    where
        R: ChainageRange + Send,
    {
        let located: Vec<Located<R>> = rows
            .into_par_iter()
            .map(|row| {
                let geometry = self.geometry_column(&row, geometry_type, ends_only);
                Located { row, geometry }
            })
            .collect();
        log_missing(&located);
        located
    }

    // ========================================================================
    // Subsetting
    // ========================================================================

    /// New network with only the elements of the listed roads.
    pub fn limited_to_routes(&self, road_ids: &[RoadId]) -> Centreline {
        let wanted: HashSet<RoadId> = road_ids.iter().copied().collect();
        let segments = self
            .segments
            .values()
            .filter(|s| wanted.contains(&s.road_id))
            .cloned()
            .collect();
        Centreline::from_segments(segments, self.config.clone())
    }

    /// New network with only the elements that pass within `buffer_distance`
    /// metres of at least one of `points` (defaults to
    /// `config.limited_buffer_m`).
    pub fn build_limited_centreline(
        &self,
        points: &[Point<f64>],
        point_crs: Crs,
        buffer_distance: Option<f64>,
    ) -> Result<Centreline> {
        let buffer = buffer_distance.unwrap_or(self.config.limited_buffer_m);
        if !(buffer >= 0.0) || !buffer.is_finite() {
            return Err(RoadNetworkError::invalid_argument(format!(
                "buffer distance must be a non-negative number, got {}",
                buffer
            )));
        }

        let points = points
            .iter()
            .map(|p| self.to_reference(*p, point_crs))
            .collect::<Result<Vec<_>>>()?;

        let bounds: Vec<SegmentBounds> =
            self.segments.values().filter_map(segment_bounds).collect();
        let tree = RTree::bulk_load(bounds);

        let mut keep: HashSet<SegmentId> = HashSet::new();
        for point in &points {
            let search = AABB::from_corners(
                [point.x() - buffer, point.y() - buffer],
                [point.x() + buffer, point.y() + buffer],
            );
            for candidate in tree.locate_in_envelope_intersecting(&search) {
                if keep.contains(&candidate.carr_way_no) {
                    continue;
                }
                let Some(segment) = self.segments.get(&candidate.carr_way_no) else {
                    continue;
                };
                if Euclidean::distance(point, &segment.geometry) <= buffer {
                    keep.insert(candidate.carr_way_no);
                }
            }
        }

        info!(
            "[Centreline] Limited network to {} of {} carriageways within {}m of {} points",
            keep.len(),
            self.segments.len(),
            buffer,
            points.len()
        );

        let segments = self
            .segments
            .values()
            .filter(|s| keep.contains(&s.carr_way_no))
            .cloned()
            .collect();
        Ok(Centreline::from_segments(segments, self.config.clone()))
    }
}

impl Clone for Centreline {
    /// Deep copy with fresh lazy caches.
    fn clone(&self) -> Self {
        Centreline::from_segments(
            self.segments.values().cloned().collect(),
            self.config.clone(),
        )
    }
}

/// Normalised position of `chainage` on `segment`, clamped to [0, 1].
pub(crate) fn chainage_fraction(segment: &Segment, chainage: f64) -> f64 {
    if segment.length_m <= 0.0 {
        return 0.0;
    }
    ((chainage - segment.start_m) / segment.length_m).clamp(0.0, 1.0)
}

fn validate_record(record: &CarriagewayRecord) -> Result<()> {
    let invalid = |message: &str| RoadNetworkError::InvalidGeometry {
        carr_way_no: record.carr_way_no,
        message: message.to_string(),
    };
    if record.geometry.0.len() < 2 {
        return Err(invalid("a carriageway needs at least two vertices"));
    }
    if record
        .geometry
        .coords()
        .any(|c| !c.x.is_finite() || !c.y.is_finite())
    {
        return Err(invalid("non-finite coordinate"));
    }
    if !record.start_m.is_finite() || !record.end_m.is_finite() {
        return Err(invalid("non-finite chainage"));
    }
    Ok(())
}

fn segment_bounds(segment: &Segment) -> Option<SegmentBounds> {
    let mut coords = segment.geometry.coords();
    let first = coords.next()?;
    let (mut min, mut max) = ([first.x, first.y], [first.x, first.y]);
    for c in coords {
        min = [min[0].min(c.x), min[1].min(c.y)];
        max = [max[0].max(c.x), max[1].max(c.y)];
    }
    Some(SegmentBounds {
        carr_way_no: segment.carr_way_no,
        min,
        max,
    })
}

fn log_missing<R>(located: &[Located<R>]) {
    let missing = located.iter().filter(|l| l.geometry.is_missing()).count();
    if missing > 0 {
        debug!(
            "[Centreline] {} of {} rows have no covering carriageway",
            missing,
            located.len()
        );
    }
}

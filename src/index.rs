//! Point cloud sampled along the carriageway and its R-tree.
//!
//! Every segment is walked at a fixed step and each sample remembers the
//! segment it came from. A nearest-neighbour query over the samples gives a
//! fast, approximate nearest segment; the two closest samples also give a
//! local baseline for the perpendicular offset.

use geo::Coord;
use log::debug;
use rstar::{PointDistance, RTree, RTreeObject, AABB};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::algorithms::{distance, perpendicular_offset, resample};
use crate::types::Segment;
use crate::{RoadId, SegmentId};

/// Default resampling step in metres.
pub const DEFAULT_SAMPLE_STEP_M: f64 = 2.0;

/// A sample of a carriageway geometry for R-tree queries
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplePoint {
    pub carr_way_no: SegmentId,
    pub road_id: RoadId,
    pub x: f64,
    pub y: f64,
}

impl SamplePoint {
    pub fn coord(&self) -> Coord<f64> {
        Coord {
            x: self.x,
            y: self.y,
        }
    }
}

impl RTreeObject for SamplePoint {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point([self.x, self.y])
    }
}

impl PointDistance for SamplePoint {
    fn distance_2(&self, point: &[f64; 2]) -> f64 {
        let dx = self.x - point[0];
        let dy = self.y - point[1];
        dx * dx + dy * dy
    }
}

/// Resample every segment at `step` metres.
pub fn build_point_cloud<'a, I>(segments: I, step: f64) -> Vec<SamplePoint>
where
    I: IntoIterator<Item = &'a Segment>,
{
    let segments: Vec<&Segment> = segments.into_iter().collect();

    #[cfg(feature = "parallel")]
    let samples = segments
        .par_iter()
        .flat_map_iter(|segment| sample_segment(segment, step))
        .collect();

    #[cfg(not(feature = "parallel"))]
    let samples = segments
        .iter()
        .flat_map(|segment| sample_segment(segment, step))
        .collect();

    samples
}

fn sample_segment(segment: &Segment, step: f64) -> Vec<SamplePoint> {
    resample(&segment.geometry, step)
        .into_iter()
        .map(|c| SamplePoint {
            carr_way_no: segment.carr_way_no,
            road_id: segment.road_id,
            x: c.x,
            y: c.y,
        })
        .collect()
}

/// Nearest-segment match from the point cloud.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndexedMatch {
    pub carr_way_no: SegmentId,
    pub road_id: RoadId,
    /// Perpendicular offset from the query to the line through the two
    /// nearest samples
    pub offset_m: f64,
}

/// R-tree over a point cloud.
#[derive(Debug)]
pub struct SpatialIndex {
    tree: RTree<SamplePoint>,
}

impl SpatialIndex {
    pub fn new(samples: Vec<SamplePoint>) -> Self {
        Self {
            tree: RTree::bulk_load(samples),
        }
    }

    pub fn len(&self) -> usize {
        self.tree.size()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }

    pub fn samples(&self) -> impl Iterator<Item = &SamplePoint> {
        self.tree.iter()
    }

    /// Find the segment nearest to `query` using its two nearest samples,
    /// optionally restricted to one road.
    ///
    /// When the two samples coincide, or only one sample is available, the
    /// offset falls back to the direct distance to the nearest sample.
    pub fn nearest(&self, query: Coord<f64>, road_id: Option<RoadId>) -> Option<IndexedMatch> {
        let mut nearest = self
            .tree
            .nearest_neighbor_iter(&[query.x, query.y])
            .filter(|s| road_id.map_or(true, |r| s.road_id == r));

        let first = nearest.next()?;
        let offset_m = match nearest.next() {
            Some(second) => perpendicular_offset(first.coord(), second.coord(), query)
                .unwrap_or_else(|| {
                    debug!(
                        "[SpatialIndex] Coincident samples on carriageway {}, using point distance",
                        first.carr_way_no
                    );
                    distance(first.coord(), query)
                }),
            None => distance(first.coord(), query),
        };

        Some(IndexedMatch {
            carr_way_no: first.carr_way_no,
            road_id: first.road_id,
            offset_m,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RouteInfo;
    use geo::LineString;

    fn segment(carr_way_no: SegmentId, road_id: RoadId, coords: Vec<(f64, f64)>) -> Segment {
        let geometry = LineString::from(coords);
        let length_m = crate::algorithms::line_length(&geometry);
        Segment {
            carr_way_no,
            road_id,
            start_m: 0.0,
            end_m: length_m,
            length_m,
            geometry,
            route: RouteInfo::default(),
        }
    }

    #[test]
    fn test_point_cloud_size() {
        let segments = vec![
            segment(1, 10, vec![(0.0, 0.0), (10.0, 0.0)]),
            segment(2, 10, vec![(10.0, 0.0), (15.0, 0.0)]),
        ];
        let cloud = build_point_cloud(&segments, 2.0);
        // 2, 4, 6, 8, 10 and 12, 14, 15
        assert_eq!(cloud.len(), 8);
        assert!(cloud.iter().all(|s| s.carr_way_no != 2 || s.x > 10.0));
    }

    #[test]
    fn test_nearest_offset() {
        let segments = vec![
            segment(1, 10, vec![(0.0, 0.0), (100.0, 0.0)]),
            segment(2, 20, vec![(0.0, 50.0), (100.0, 50.0)]),
        ];
        let index = SpatialIndex::new(build_point_cloud(&segments, 2.0));

        let hit = index.nearest(Coord { x: 41.0, y: 7.0 }, None).unwrap();
        assert_eq!(hit.carr_way_no, 1);
        assert!((hit.offset_m - 7.0).abs() < 1e-9);

        let hit = index.nearest(Coord { x: 41.0, y: 7.0 }, Some(20)).unwrap();
        assert_eq!(hit.carr_way_no, 2);
        assert!((hit.offset_m - 43.0).abs() < 1e-9);

        assert!(index.nearest(Coord { x: 41.0, y: 7.0 }, Some(99)).is_none());
    }

    #[test]
    fn test_single_sample_uses_point_distance() {
        let index = SpatialIndex::new(vec![SamplePoint {
            carr_way_no: 5,
            road_id: 1,
            x: 0.0,
            y: 0.0,
        }]);
        let hit = index.nearest(Coord { x: 3.0, y: 4.0 }, None).unwrap();
        assert_eq!(hit.offset_m, 5.0);
    }

    #[test]
    fn test_coincident_samples_never_nan() {
        let sample = SamplePoint {
            carr_way_no: 5,
            road_id: 1,
            x: 1.0,
            y: 1.0,
        };
        let index = SpatialIndex::new(vec![sample, sample]);
        let hit = index.nearest(Coord { x: 1.0, y: 4.0 }, None).unwrap();
        assert!(hit.offset_m.is_finite());
        assert_eq!(hit.offset_m, 3.0);
    }
}

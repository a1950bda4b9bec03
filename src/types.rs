//! Tabular record types consumed and produced by the engine.
//!
//! The data-retrieval layer hands us two tables: the carriageway table (one
//! row per carriageway element) and the roadnames lookup. Both arrive here as
//! plain Rust records.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use chrono::NaiveDate;
use geo::LineString;
use serde::{Deserialize, Serialize};
use wkt::TryFromWkt;

use crate::error::{Result, RoadNetworkError};
use crate::{RoadId, SegmentId};

// ============================================================================
// Attribute values
// ============================================================================

/// A single typed table cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    Date(NaiveDate),
    Text(String),
}

impl AttrValue {
    pub fn is_null(&self) -> bool {
        matches!(self, AttrValue::Null)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            AttrValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Fill value for a column whose type is represented by `self`.
    ///
    /// Numeric columns fill with zero, everything else with empty text.
    pub fn fill_value(&self) -> AttrValue {
        match self {
            AttrValue::Integer(_) => AttrValue::Integer(0),
            AttrValue::Float(_) => AttrValue::Float(0.0),
            _ => AttrValue::Text(String::new()),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            AttrValue::Null => 0,
            AttrValue::Bool(_) => 1,
            AttrValue::Integer(_) | AttrValue::Float(_) => 2,
            AttrValue::Date(_) => 3,
            AttrValue::Text(_) => 4,
        }
    }

    /// Total order across all values. Nulls sort first, integers and floats
    /// compare numerically.
    pub fn total_cmp(&self, other: &AttrValue) -> Ordering {
        match (self, other) {
            (AttrValue::Bool(a), AttrValue::Bool(b)) => a.cmp(b),
            (AttrValue::Integer(a), AttrValue::Integer(b)) => a.cmp(b),
            (AttrValue::Integer(a), AttrValue::Float(b)) => (*a as f64).total_cmp(b),
            (AttrValue::Float(a), AttrValue::Integer(b)) => a.total_cmp(&(*b as f64)),
            (AttrValue::Float(a), AttrValue::Float(b)) => a.total_cmp(b),
            (AttrValue::Date(a), AttrValue::Date(b)) => a.cmp(b),
            (AttrValue::Text(a), AttrValue::Text(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        AttrValue::Text(value.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(value: String) -> Self {
        AttrValue::Text(value)
    }
}

impl From<i64> for AttrValue {
    fn from(value: i64) -> Self {
        AttrValue::Integer(value)
    }
}

impl From<f64> for AttrValue {
    fn from(value: f64) -> Self {
        AttrValue::Float(value)
    }
}

impl From<bool> for AttrValue {
    fn from(value: bool) -> Self {
        AttrValue::Bool(value)
    }
}

impl From<NaiveDate> for AttrValue {
    fn from(value: NaiveDate) -> Self {
        AttrValue::Date(value)
    }
}

/// Named attribute columns for one row.
pub type Attributes = BTreeMap<String, AttrValue>;

/// Lexicographic comparison of two attribute rows.
pub(crate) fn compare_attributes(a: &Attributes, b: &Attributes) -> Ordering {
    let mut left = a.iter();
    let mut right = b.iter();
    loop {
        match (left.next(), right.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some((ka, va)), Some((kb, vb))) => {
                let ord = ka.cmp(kb).then_with(|| va.total_cmp(vb));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
        }
    }
}

// ============================================================================
// Roadnames lookup
// ============================================================================

/// Descriptive attributes of one route, from the roadnames table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RouteInfo {
    pub road_id: RoadId,
    pub road_name: String,
    /// State highway number, e.g. "01N"
    pub highway: Option<String>,
    /// Reference station number
    pub reference_station: Option<u32>,
    /// Direction flag, "I" (increasing) or "D" (decreasing)
    pub direction: Option<String>,
    /// Element type, e.g. "MC" mainline, "RM" ramp, "RD" roundabout
    pub element_type: Option<String>,
    pub ramp_number: Option<String>,
    /// Any other roadnames columns
    #[serde(default)]
    pub extra: Attributes,
}

impl RouteInfo {
    pub fn new(road_id: RoadId, road_name: impl Into<String>) -> Self {
        Self {
            road_id,
            road_name: road_name.into(),
            ..Default::default()
        }
    }
}

/// The roadnames lookup table keyed by road id.
#[derive(Debug, Clone, Default)]
pub struct RoadNames {
    routes: BTreeMap<RoadId, RouteInfo>,
}

impl RoadNames {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, info: RouteInfo) {
        self.routes.insert(info.road_id, info);
    }

    pub fn get(&self, road_id: RoadId) -> Option<&RouteInfo> {
        self.routes.get(&road_id)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl FromIterator<RouteInfo> for RoadNames {
    fn from_iter<I: IntoIterator<Item = RouteInfo>>(iter: I) -> Self {
        Self {
            routes: iter.into_iter().map(|r| (r.road_id, r)).collect(),
        }
    }
}

// ============================================================================
// Carriageway table
// ============================================================================

/// One row of the carriageway table as supplied by the data layer.
#[derive(Debug, Clone, PartialEq)]
pub struct CarriagewayRecord {
    pub carr_way_no: SegmentId,
    pub road_id: RoadId,
    pub start_m: f64,
    pub end_m: f64,
    /// Surveyed length. When absent, `end_m - start_m` is used.
    pub length_m: Option<f64>,
    pub geometry: LineString<f64>,
}

impl CarriagewayRecord {
    pub fn new(
        carr_way_no: SegmentId,
        road_id: RoadId,
        start_m: f64,
        end_m: f64,
        geometry: LineString<f64>,
    ) -> Self {
        Self {
            carr_way_no,
            road_id,
            start_m,
            end_m,
            length_m: None,
            geometry,
        }
    }

    /// Build a record from a `LINESTRING` well-known-text value.
    pub fn from_wkt(
        carr_way_no: SegmentId,
        road_id: RoadId,
        start_m: f64,
        end_m: f64,
        wkt: &str,
    ) -> Result<Self> {
        let geometry = LineString::<f64>::try_from_wkt_str(wkt)
            .map_err(|e| RoadNetworkError::InvalidGeometry {
                carr_way_no,
                message: e.to_string(),
            })?;
        Ok(Self::new(carr_way_no, road_id, start_m, end_m, geometry))
    }
}

/// A carriageway element of a built network: record plus joined route info.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Segment {
    pub carr_way_no: SegmentId,
    pub road_id: RoadId,
    pub start_m: f64,
    pub end_m: f64,
    pub length_m: f64,
    /// Geometry in the network's reference CRS
    pub geometry: LineString<f64>,
    pub route: RouteInfo,
}

impl Segment {
    /// True when the segment shares interior with the open window `(start_m, end_m)`.
    pub fn overlaps(&self, start_m: f64, end_m: f64) -> bool {
        self.end_m > start_m && self.start_m < end_m
    }
}

// ============================================================================
// Chainage ranges
// ============================================================================

/// Anything addressed by a road id and a chainage interval.
pub trait ChainageRange {
    fn road_id(&self) -> RoadId;
    fn start_m(&self) -> f64;
    fn end_m(&self) -> f64;
}

/// Minimal chainage-range row.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChainageSpan {
    pub road_id: RoadId,
    pub start_m: f64,
    pub end_m: f64,
}

impl ChainageSpan {
    pub fn new(road_id: RoadId, start_m: f64, end_m: f64) -> Self {
        Self {
            road_id,
            start_m,
            end_m,
        }
    }
}

impl ChainageRange for ChainageSpan {
    fn road_id(&self) -> RoadId {
        self.road_id
    }
    fn start_m(&self) -> f64 {
        self.start_m
    }
    fn end_m(&self) -> f64 {
        self.end_m
    }
}

impl ChainageRange for Segment {
    fn road_id(&self) -> RoadId {
        self.road_id
    }
    fn start_m(&self) -> f64 {
        self.start_m
    }
    fn end_m(&self) -> f64 {
        self.end_m
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_from_wkt() {
        let record = CarriagewayRecord::from_wkt(7, 100, 0.0, 20.0, "LINESTRING (0 0, 10 0, 20 0)")
            .unwrap();
        assert_eq!(record.geometry.0.len(), 3);
        assert_eq!(record.geometry.0[2], geo::Coord { x: 20.0, y: 0.0 });

        let err =
            CarriagewayRecord::from_wkt(8, 100, 0.0, 20.0, "LINESTRING (0 0, 10").unwrap_err();
        assert!(matches!(
            err,
            RoadNetworkError::InvalidGeometry { carr_way_no: 8, .. }
        ));
    }

    #[test]
    fn test_attr_value_ordering() {
        let d1 = AttrValue::Date(NaiveDate::from_ymd_opt(2020, 1, 1).unwrap());
        let d2 = AttrValue::Date(NaiveDate::from_ymd_opt(2021, 1, 1).unwrap());
        assert_eq!(d1.total_cmp(&d2), Ordering::Less);
        assert_eq!(
            AttrValue::Integer(2).total_cmp(&AttrValue::Float(1.5)),
            Ordering::Greater
        );
        assert_eq!(
            AttrValue::Null.total_cmp(&AttrValue::from("a")),
            Ordering::Less
        );
    }

    #[test]
    fn test_fill_values() {
        assert_eq!(AttrValue::Float(3.2).fill_value(), AttrValue::Float(0.0));
        assert_eq!(AttrValue::Integer(3).fill_value(), AttrValue::Integer(0));
        assert_eq!(AttrValue::from("chip").fill_value(), AttrValue::from(""));
    }

    #[test]
    fn test_segment_overlap_is_half_open() {
        let segment = Segment {
            carr_way_no: 1,
            road_id: 1,
            start_m: 0.0,
            end_m: 100.0,
            length_m: 100.0,
            geometry: LineString::from(vec![(0.0, 0.0), (100.0, 0.0)]),
            route: RouteInfo::default(),
        };
        assert!(segment.overlaps(50.0, 150.0));
        assert!(!segment.overlaps(100.0, 150.0));
        assert!(!segment.overlaps(-50.0, 0.0));
    }
}

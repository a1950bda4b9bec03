//! # Surface Overlay
//!
//! Builds the top-surface table from overlapping surface records and copies
//! surface attributes onto road segments.
//!
//! Surfaces compete for every metre by `(surface_date, start_m, end_m)`: newer
//! surfaces win, then the one starting further along, then the one ending
//! further along. Undated surfaces rank below every dated one.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::intervals::{coalesce, LabeledInterval};
use crate::types::{compare_attributes, AttrValue, Attributes, ChainageRange};
use crate::RoadId;

/// Attribute that, when present, must be "y" for a record to count as a full
/// width surface.
pub const FULL_WIDTH_FLAG: &str = "full_width_flag";

/// One surface record: a dated treatment over a chainage interval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurfaceRecord {
    pub road_id: RoadId,
    pub start_m: f64,
    pub end_m: f64,
    pub surface_date: Option<NaiveDate>,
    #[serde(flatten)]
    pub attributes: Attributes,
}

impl SurfaceRecord {
    pub fn new(road_id: RoadId, start_m: f64, end_m: f64, surface_date: Option<NaiveDate>) -> Self {
        Self {
            road_id,
            start_m,
            end_m,
            surface_date,
            attributes: Attributes::new(),
        }
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<AttrValue>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    fn is_full_width(&self) -> bool {
        match self.attributes.get(FULL_WIDTH_FLAG) {
            None => true,
            Some(flag) => flag.as_text().is_some_and(|f| f.eq_ignore_ascii_case("y")),
        }
    }
}

impl ChainageRange for SurfaceRecord {
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

/// A segment row with its surface attributes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SegmentSurface<R> {
    #[serde(flatten)]
    pub segment: R,
    pub surface_date: Option<NaiveDate>,
    #[serde(flatten)]
    pub surface: Attributes,
}

impl<R> SegmentSurface<R> {
    /// True when a top-surface interval covered the segment.
    pub fn is_surfaced(&self) -> bool {
        self.surface_date.is_some() || self.surface.values().any(|v| !is_fill(v))
    }
}

fn is_fill(value: &AttrValue) -> bool {
    match value {
        AttrValue::Integer(0) => true,
        AttrValue::Float(f) => *f == 0.0,
        AttrValue::Text(t) => t.is_empty(),
        AttrValue::Null => true,
        _ => false,
    }
}

fn surface_priority(
    a: &LabeledInterval<RoadId, SurfaceRecord>,
    b: &LabeledInterval<RoadId, SurfaceRecord>,
) -> Ordering {
    a.payload
        .surface_date
        .cmp(&b.payload.surface_date)
        .then(a.start_m.total_cmp(&b.start_m))
        .then(a.end_m.total_cmp(&b.end_m))
        .then_with(|| compare_attributes(&a.payload.attributes, &b.payload.attributes))
}

/// Build the non-overlapping top-surface table from several surface tables.
///
/// Records flagged as not full width are dropped. The result is sorted by
/// road, start and end.
pub fn build_top_surface<T, I>(tables: T) -> Result<Vec<SurfaceRecord>>
where
    T: IntoIterator<Item = I>,
    I: IntoIterator<Item = SurfaceRecord>,
{
    let mut dropped = 0;
    let intervals: Vec<LabeledInterval<RoadId, SurfaceRecord>> = tables
        .into_iter()
        .flatten()
        .filter(|record| {
            let keep = record.is_full_width();
            if !keep {
                dropped += 1;
            }
            keep
        })
        .map(|record| LabeledInterval::new(record.road_id, record.start_m, record.end_m, record))
        .collect();

    if dropped > 0 {
        debug!("[Surface] Dropped {} partial width records", dropped);
    }
    let input = intervals.len();

    let top_surface: Vec<SurfaceRecord> = coalesce(intervals, surface_priority)?
        .into_iter()
        .map(|run| SurfaceRecord {
            road_id: run.key,
            start_m: run.start_m,
            end_m: run.end_m,
            surface_date: run.payload.surface_date,
            attributes: run.payload.attributes,
        })
        .collect();

    info!(
        "[Surface] Built top surface: {} records from {} surfaces",
        top_surface.len(),
        input
    );
    Ok(top_surface)
}

/// Copy top-surface attributes onto segments lying strictly inside a surface
/// interval.
///
/// Segments touching an interval boundary are not attributed to it. Every
/// output row carries every surface column: unmatched columns are filled with
/// 0 for numeric columns and empty text otherwise.
pub fn append_surface_details_to_segments<R, I>(
    segments: I,
    top_surface: &[SurfaceRecord],
) -> Vec<SegmentSurface<R>>
where
    R: ChainageRange,
    I: IntoIterator<Item = R>,
{
    let fills = column_fills(top_surface);

    let mut by_road: BTreeMap<RoadId, Vec<&SurfaceRecord>> = BTreeMap::new();
    for surface in top_surface {
        by_road.entry(surface.road_id).or_default().push(surface);
    }

    let mut matched = 0;
    let rows: Vec<SegmentSurface<R>> = segments
        .into_iter()
        .map(|segment| {
            let surface = by_road.get(&segment.road_id()).and_then(|surfaces| {
                surfaces
                    .iter()
                    .rev()
                    .find(|s| segment.start_m() > s.start_m && segment.end_m() < s.end_m)
            });

            let mut attributes = fills.clone();
            let surface_date = surface.and_then(|s| {
                matched += 1;
                for (name, value) in &s.attributes {
                    if !value.is_null() {
                        attributes.insert(name.clone(), value.clone());
                    }
                }
                s.surface_date
            });

            SegmentSurface {
                segment,
                surface_date,
                surface: attributes,
            }
        })
        .collect();

    debug!(
        "[Surface] Attributed {} of {} segments",
        matched,
        rows.len()
    );
    rows
}

/// Fill value for every surface column, typed by its first non-null value.
fn column_fills(top_surface: &[SurfaceRecord]) -> Attributes {
    let names: BTreeSet<&String> = top_surface
        .iter()
        .flat_map(|s| s.attributes.keys())
        .collect();
    names
        .into_iter()
        .map(|name| {
            let fill = top_surface
                .iter()
                .filter_map(|s| s.attributes.get(name))
                .find(|v| !v.is_null())
                .map(AttrValue::fill_value)
                .unwrap_or_else(|| AttrValue::Text(String::new()));
            (name.clone(), fill)
        })
        .collect()
}

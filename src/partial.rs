//! Networks built from chainage windows.
//!
//! Each requested window becomes one synthetic carriageway element whose
//! geometry is stitched from the source network. The result is an
//! independent [`Centreline`] that represents whole windows, not the
//! original elements.

use std::collections::BTreeMap;

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::centreline::Centreline;
use crate::error::{OptionExt, Result, RoadNetworkError};
use crate::types::{RoadNames, Segment};
use crate::{RoadId, SegmentId};

/// Chainage window on one road. Open ends resolve to the road's extent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ChainageWindow {
    pub start: Option<f64>,
    pub end: Option<f64>,
}

impl ChainageWindow {
    /// The whole road.
    pub fn full() -> Self {
        Self::default()
    }

    /// From `start` to the end of the road.
    pub fn from(start: f64) -> Self {
        Self {
            start: Some(start),
            end: None,
        }
    }

    pub fn between(start: f64, end: f64) -> Self {
        Self {
            start: Some(start),
            end: Some(end),
        }
    }

    /// Resolve open ends against a road extent.
    pub fn resolve(&self, extent: (f64, f64)) -> (f64, f64) {
        (self.start.unwrap_or(extent.0), self.end.unwrap_or(extent.1))
    }
}

/// Build a network with one element per requested window.
///
/// Roads missing from `roadnames` or from `network` are rejected. A window
/// that covers no carriageway is skipped. Synthetic element ids run from 1
/// in road id order.
pub fn build_partial_centreline(
    network: &Centreline,
    roadnames: &RoadNames,
    windows: &BTreeMap<RoadId, ChainageWindow>,
) -> Result<Centreline> {
    let mut segments = Vec::with_capacity(windows.len());
    let mut next_id: SegmentId = 1;

    for (&road_id, window) in windows {
        let route = roadnames.get(road_id).cloned().ok_or_else(|| {
            RoadNetworkError::invalid_argument(format!("road {} is not in roadnames", road_id))
        })?;
        let extent = network
            .route_extent(road_id)
            .ok_or_invalid(&format!("road {} has no carriageway in the network", road_id))?;

        let (start_m, end_m) = window.resolve(extent);
        if !start_m.is_finite() || !end_m.is_finite() {
            return Err(RoadNetworkError::invalid_argument(format!(
                "window on road {} has a non-finite chainage",
                road_id
            )));
        }

        let Some(geometry) = network.extract_geometry(road_id, start_m, end_m, false) else {
            warn!(
                "[Partial] Window {}..{} on road {} covers no carriageway, skipping",
                start_m, end_m, road_id
            );
            continue;
        };

        segments.push(Segment {
            carr_way_no: next_id,
            road_id,
            start_m,
            end_m,
            length_m: (end_m - start_m).abs(),
            geometry,
            route,
        });
        next_id += 1;
    }

    info!(
        "[Partial] Built partial network: {} of {} windows",
        segments.len(),
        windows.len()
    );

    Ok(Centreline::from_segments(segments, network.config().clone()))
}

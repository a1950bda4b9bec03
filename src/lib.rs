//! # Road Centreline
//!
//! Linear referencing for road networks: relate geographic positions to
//! (road, chainage, offset) and rebuild polyline geometry for chainage
//! intervals.
//!
//! This library provides:
//! - Point-to-route projection (exact shortest line or R-tree lookup)
//! - Geometry extraction stitched across carriageway elements
//! - Partial and limited networks
//! - Chainage marker layers
//! - Interval coalescing and top-surface overlays
//!
//! ## Features
//!
//! - **`parallel`** - Enable parallel processing with rayon
//!
//! ## Quick Start
//!
//! ```rust
//! use geo::{point, LineString};
//! use road_centreline::{
//!     CarriagewayRecord, Centreline, Crs, NearestMethod, NetworkConfig, RoadNames, RouteInfo,
//! };
//!
//! let records = vec![CarriagewayRecord::new(
//!     1,
//!     3656,
//!     0.0,
//!     100.0,
//!     LineString::from(vec![(1_570_000.0, 5_180_000.0), (1_570_100.0, 5_180_000.0)]),
//! )];
//! let roadnames: RoadNames = vec![RouteInfo::new(3656, "Main Road")].into_iter().collect();
//! let network = Centreline::new(records, &roadnames, NetworkConfig::default()).unwrap();
//!
//! let position = network
//!     .position(
//!         point!(x: 1_570_040.0, y: 5_180_005.0),
//!         Crs::NZTM2000,
//!         None,
//!         NearestMethod::ShortestLine,
//!     )
//!     .unwrap()
//!     .unwrap();
//! assert_eq!(position.road_id, 3656);
//! assert!((position.position_m - 40.0).abs() < 1e-6);
//!
//! let line = network.extract_geometry(3656, 25.0, 75.0, false).unwrap();
//! assert_eq!(line.0.len(), 2);
//! ```

use serde::{Deserialize, Serialize};

// Unified error handling
pub mod error;
pub use error::{OptionExt, Result, RoadNetworkError};

// Tabular records and attribute values
pub mod types;
pub use types::{
    AttrValue, Attributes, CarriagewayRecord, ChainageRange, ChainageSpan, RoadNames, RouteInfo,
    Segment,
};

// Algorithm toolbox - planar line arithmetic
// Use road_centreline::algorithms::{...} for standalone access
pub mod algorithms;

// CRS conversion with a bounded projection cache
pub mod transform;
pub use transform::{transform, Crs, CrsTransform, ProjectionCache, Transformer};

// Point cloud and R-tree
pub mod index;
pub use index::{build_point_cloud, IndexedMatch, SamplePoint, SpatialIndex};

// Network model
pub mod centreline;
pub use centreline::{
    Centreline, GeometryColumn, GeometryType, Located, NearestFeature, NearestMethod,
    RoutePosition,
};

// Networks built from chainage windows
pub mod partial;
pub use partial::{build_partial_centreline, ChainageWindow};

// Chainage marker layers
pub mod chainage;
pub use chainage::{build_chainage_layer, ChainageLayerConfig, ChainageMark};

// Interval coalescing
pub mod intervals;
pub use intervals::{
    coalesce, combine_continuous_segments, CoalescedRun, LabeledInterval, OccupancyGrid,
    MAX_GRID_CHAINAGE_M,
};

// Top-surface overlay
pub mod surface;
pub use surface::{
    append_surface_details_to_segments, build_top_surface, SegmentSurface, SurfaceRecord,
};

/// Route identifier shared by all carriageway elements of one road.
pub type RoadId = u32;

/// Carriageway element identifier.
pub type SegmentId = u64;

// ============================================================================
// Configuration
// ============================================================================

/// Configuration for a road network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Projected CRS of the network geometry.
    /// Default: EPSG:2193 (NZTM2000)
    pub reference_crs: Crs,

    /// CRS of geographic input handed to `Centreline::from_geographic`.
    /// Default: EPSG:4326 (WGS84)
    pub input_crs: Crs,

    /// Resampling step of the point cloud, in metres.
    /// Default: 2.0
    pub sample_step_m: f64,

    /// Distance within which a projected point is considered to lie on a
    /// carriageway when relocating the shortest-line match.
    /// Default: 0.001 metres
    pub match_tolerance: f64,

    /// Default search radius of `Centreline::build_limited_centreline`.
    /// Default: 200.0 metres
    pub limited_buffer_m: f64,

    /// Number of CRS pairs kept in the projection cache.
    /// Default: 5
    pub projection_cache_capacity: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            reference_crs: Crs::NZTM2000,
            input_crs: Crs::WGS84,
            sample_step_m: index::DEFAULT_SAMPLE_STEP_M,
            match_tolerance: 0.001,
            limited_buffer_m: 200.0,
            projection_cache_capacity: transform::DEFAULT_PROJECTION_CACHE_CAPACITY,
        }
    }
}

impl NetworkConfig {
    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: NetworkConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check that every value is usable.
    pub fn validate(&self) -> Result<()> {
        let positive = |name: &str, value: f64| {
            if value.is_finite() && value > 0.0 {
                Ok(())
            } else {
                Err(RoadNetworkError::Config {
                    message: format!("{} must be a positive number, got {}", name, value),
                })
            }
        };
        positive("sample_step_m", self.sample_step_m)?;
        positive("match_tolerance", self.match_tolerance)?;
        if !(self.limited_buffer_m.is_finite() && self.limited_buffer_m >= 0.0) {
            return Err(RoadNetworkError::Config {
                message: format!(
                    "limited_buffer_m must be non-negative, got {}",
                    self.limited_buffer_m
                ),
            });
        }
        if self.projection_cache_capacity == 0 {
            return Err(RoadNetworkError::Config {
                message: "projection_cache_capacity must be at least 1".to_string(),
            });
        }
        transform::Projection::from_crs(self.reference_crs)?;
        transform::Projection::from_crs(self.input_crs)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = NetworkConfig::default();
        assert_eq!(config.reference_crs, Crs::NZTM2000);
        assert_eq!(config.input_crs, Crs::WGS84);
        assert_eq!(config.sample_step_m, 2.0);
        assert_eq!(config.projection_cache_capacity, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_from_json_fills_defaults() {
        let config =
            NetworkConfig::from_json(r#"{"reference_crs": 32759, "sample_step_m": 5.0}"#).unwrap();
        assert_eq!(config.reference_crs, Crs(32759));
        assert_eq!(config.sample_step_m, 5.0);
        assert_eq!(config.limited_buffer_m, 200.0);
    }

    #[test]
    fn test_config_rejects_bad_values() {
        assert!(matches!(
            NetworkConfig::from_json(r#"{"sample_step_m": 0.0}"#),
            Err(RoadNetworkError::Config { .. })
        ));
        assert!(matches!(
            NetworkConfig::from_json(r#"{"reference_crs": 27700}"#),
            Err(RoadNetworkError::UnsupportedCrs { code: 27700 })
        ));
        assert!(matches!(
            NetworkConfig::from_json("{not json"),
            Err(RoadNetworkError::Config { .. })
        ));
    }
}

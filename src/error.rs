//! Unified error handling for the road-centreline library.
//!
//! Lookups that legitimately find nothing (a chainage window with no covering
//! carriageway, a point with no nearby segment) are not errors: they return
//! `None`. The variants here are precondition violations raised to the caller.

use thiserror::Error;

use crate::{RoadId, SegmentId};

/// Unified error type for road-centreline operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RoadNetworkError {
    /// Caller supplied a value outside the accepted domain
    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    /// CRS code has no projection implementation
    #[error("Unsupported coordinate reference system: EPSG:{code}")]
    UnsupportedCrs { code: u32 },

    /// Geometry cannot be used for the requested computation
    #[error("Carriageway {carr_way_no} has invalid geometry: {message}")]
    InvalidGeometry {
        carr_way_no: SegmentId,
        message: String,
    },

    /// Zero-length baseline, tangent or similar degenerate input
    #[error("Degenerate geometry on road {road_id} at {position_m:.3}m: {message}")]
    DegenerateGeometry {
        road_id: RoadId,
        position_m: f64,
        message: String,
    },

    /// Retired operation, kept only to point callers at its replacement
    #[error("'{operation}' is no longer supported, use '{replacement}' instead")]
    Deprecated {
        operation: &'static str,
        replacement: &'static str,
    },

    /// Configuration error
    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl RoadNetworkError {
    pub(crate) fn invalid_argument(message: impl Into<String>) -> Self {
        RoadNetworkError::InvalidArgument {
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for RoadNetworkError {
    fn from(err: serde_json::Error) -> Self {
        RoadNetworkError::Config {
            message: err.to_string(),
        }
    }
}

/// Result type alias for road-centreline operations.
pub type Result<T> = std::result::Result<T, RoadNetworkError>;

/// Extension trait for converting Option to RoadNetworkError.
pub trait OptionExt<T> {
    /// Convert Option to Result with an invalid argument error.
    fn ok_or_invalid(self, message: &str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_invalid(self, message: &str) -> Result<T> {
        self.ok_or_else(|| RoadNetworkError::invalid_argument(message))
    }
}

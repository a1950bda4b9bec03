//! # Chainage Layer
//!
//! Cross-section markers along a road at regular chainage intervals, with
//! flags and labels for map styling.
//!
//! Carriageway elements are grouped into maximal runs that are contiguous in
//! chainage and share their route attributes (name, highway, reference
//! station, direction, element type and ramp number). Every group gets a mark
//! at its start, at its end and at each multiple of the mark spacing in
//! between.
//!
//! Each mark carries a short tick perpendicular to the road. The tick
//! direction comes from rotating the local tangent by 90° as a unit vector,
//! so vertical and horizontal road directions need no special handling.

use geo::{Coord, LineString};
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::algorithms::{interpolate, offset_coord, unit_normal};
use crate::centreline::{chainage_fraction, Centreline};
use crate::error::{Result, RoadNetworkError};
use crate::types::{RouteInfo, Segment};
use crate::RoadId;

/// Half length of the chord used to estimate the local tangent, in metres.
const TANGENT_HALF_LENGTH_M: f64 = 0.5;

/// Chainages closer than this are treated as equal.
const CHAINAGE_EPSILON: f64 = 1e-6;

/// Round-number chainage steps reported on every mark.
const ROUND_STEPS: [f64; 8] = [2000.0, 1000.0, 500.0, 200.0, 100.0, 50.0, 20.0, 10.0];

/// Configuration for chainage marker layers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainageLayerConfig {
    /// Spacing of regular marks.
    /// Default: 100.0 metres
    pub length_m: f64,

    /// Length of the tick drawn at each mark.
    /// Default: 10.0 metres
    pub width_m: f64,

    /// Distance from the centreline to the start of the tick.
    /// Default: 0.0 metres
    pub offset_m: f64,

    /// Marks on a multiple of any of these get a label.
    /// Default: [1000.0]
    pub label_intervals: Vec<f64>,

    /// Length of the label line.
    /// Default: 20.0 metres
    pub label_width_m: f64,

    /// Distance from the centreline to the start of the label line.
    /// Default: 12.0 metres
    pub label_offset_m: f64,

    /// Element type left out of the layer.
    /// Default: "RD"
    pub excluded_element_type: String,

    /// Element type that marks a ramp.
    /// Default: "RM"
    pub ramp_element_type: String,
}

impl Default for ChainageLayerConfig {
    fn default() -> Self {
        Self {
            length_m: 100.0,
            width_m: 10.0,
            offset_m: 0.0,
            label_intervals: vec![1000.0],
            label_width_m: 20.0,
            label_offset_m: 12.0,
            excluded_element_type: "RD".to_string(),
            ramp_element_type: "RM".to_string(),
        }
    }
}

impl ChainageLayerConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.length_m.is_finite() && self.length_m > 0.0) {
            return Err(RoadNetworkError::invalid_argument(format!(
                "mark spacing must be positive, got {}",
                self.length_m
            )));
        }
        if let Some(bad) = self
            .label_intervals
            .iter()
            .find(|i| !(i.is_finite() && **i > 0.0))
        {
            return Err(RoadNetworkError::invalid_argument(format!(
                "label intervals must be positive, got {}",
                bad
            )));
        }
        let lengths = [
            self.width_m,
            self.offset_m,
            self.label_width_m,
            self.label_offset_m,
        ];
        if lengths.iter().any(|v| !v.is_finite()) {
            return Err(RoadNetworkError::invalid_argument(
                "tick and label dimensions must be finite",
            ));
        }
        Ok(())
    }
}

/// One chainage marker.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChainageMark {
    pub road_id: RoadId,
    pub route: RouteInfo,
    pub chainage_m: f64,
    pub is_start: bool,
    pub is_end: bool,
    pub is_ramp: bool,
    pub on_2000: bool,
    pub on_1000: bool,
    pub on_500: bool,
    pub on_200: bool,
    pub on_100: bool,
    pub on_50: bool,
    pub on_20: bool,
    pub on_10: bool,
    pub label: Option<String>,
    /// Location of the mark on the centreline
    pub point: Option<Coord<f64>>,
    pub tick: Option<LineString<f64>>,
    pub label_line: Option<LineString<f64>>,
}

/// Contiguous run of elements sharing route attributes
struct MarkGroup<'a> {
    road_id: RoadId,
    route: &'a RouteInfo,
    segments: Vec<&'a Segment>,
    start_m: f64,
    end_m: f64,
}

/// Build the chainage layer for the given roads.
///
/// Unknown road ids are rejected. Marks whose tangent cannot be determined
/// keep `tick: None` and the rest of the layer is still built.
pub fn build_chainage_layer(
    network: &Centreline,
    road_ids: &[RoadId],
    config: &ChainageLayerConfig,
) -> Result<Vec<ChainageMark>> {
    config.validate()?;

    let mut marks = Vec::new();
    for &road_id in road_ids {
        if !network.contains_road(road_id) {
            return Err(RoadNetworkError::invalid_argument(format!(
                "road {} has no carriageway in the network",
                road_id
            )));
        }
        for group in group_segments(network, road_id, config) {
            marks.extend(group_marks(network, &group, config));
        }
    }

    info!(
        "[Chainage] Built {} marks on {} roads",
        marks.len(),
        road_ids.len()
    );
    Ok(marks)
}

fn same_route(a: &RouteInfo, b: &RouteInfo) -> bool {
    a.road_name == b.road_name
        && a.highway == b.highway
        && a.reference_station == b.reference_station
        && a.direction == b.direction
        && a.element_type == b.element_type
        && a.ramp_number == b.ramp_number
}

fn group_segments<'a>(
    network: &'a Centreline,
    road_id: RoadId,
    config: &ChainageLayerConfig,
) -> Vec<MarkGroup<'a>> {
    let mut groups: Vec<MarkGroup<'a>> = Vec::new();

    for segment in network.road_segments(road_id) {
        if segment.route.element_type.as_deref() == Some(config.excluded_element_type.as_str()) {
            continue;
        }
        match groups.last_mut() {
            Some(group)
                if (segment.start_m - group.end_m).abs() <= CHAINAGE_EPSILON
                    && same_route(group.route, &segment.route) =>
            {
                group.end_m = group.end_m.max(segment.end_m);
                group.segments.push(segment);
            }
            _ => groups.push(MarkGroup {
                road_id,
                route: &segment.route,
                segments: vec![segment],
                start_m: segment.start_m,
                end_m: segment.end_m,
            }),
        }
    }
    groups
}

/// Group start, every multiple of `length_m` strictly inside, group end.
fn mark_chainages(start_m: f64, end_m: f64, length_m: f64) -> Vec<f64> {
    let mut chainages = vec![start_m];
    if end_m - start_m <= CHAINAGE_EPSILON {
        return chainages;
    }
    let mut k = (start_m / length_m).floor() + 1.0;
    loop {
        let chainage = k * length_m;
        if chainage >= end_m - CHAINAGE_EPSILON {
            break;
        }
        if chainage > start_m + CHAINAGE_EPSILON {
            chainages.push(chainage);
        }
        k += 1.0;
    }
    chainages.push(end_m);
    chainages
}

fn is_multiple(chainage: f64, step: f64) -> bool {
    let remainder = chainage.rem_euclid(step);
    remainder < CHAINAGE_EPSILON || step - remainder < CHAINAGE_EPSILON
}

fn is_ramp(route: &RouteInfo, config: &ChainageLayerConfig) -> bool {
    route.element_type.as_deref() == Some(config.ramp_element_type.as_str())
        || route.ramp_number.as_deref().is_some_and(|r| !r.is_empty())
}

fn mark_label(route: &RouteInfo, chainage_m: f64, ramp: bool) -> String {
    let suffix = if ramp {
        format!("R{}", route.ramp_number.as_deref().unwrap_or(""))
    } else {
        route.direction.clone().unwrap_or_default()
    };
    format!(
        "{}-{:04}/{:.2}-{}",
        route.highway.as_deref().unwrap_or(""),
        route.reference_station.unwrap_or(0),
        chainage_m / 1000.0,
        suffix
    )
}

/// Centreline point at `chainage_m` within the group.
fn point_at(group: &MarkGroup<'_>, chainage_m: f64) -> Option<Coord<f64>> {
    let segment = group.segments.iter().find(|s| covers(s, chainage_m))?;
    interpolate(&segment.geometry, chainage_fraction(segment, chainage_m))
}

fn covers(segment: &Segment, chainage_m: f64) -> bool {
    chainage_m >= segment.start_m - CHAINAGE_EPSILON
        && chainage_m <= segment.end_m + CHAINAGE_EPSILON
}

fn group_marks(
    network: &Centreline,
    group: &MarkGroup<'_>,
    config: &ChainageLayerConfig,
) -> Vec<ChainageMark> {
    let ramp = is_ramp(group.route, config);
    let sign = if group.route.direction.as_deref() == Some("D") {
        -1.0
    } else {
        1.0
    };
    let chainages = mark_chainages(group.start_m, group.end_m, config.length_m);
    let last = chainages.len() - 1;

    chainages
        .into_iter()
        .enumerate()
        .map(|(i, chainage_m)| {
            let is_start = i == 0;
            let is_end = i == last;
            let labelled = is_start
                || is_end
                || config
                    .label_intervals
                    .iter()
                    .any(|interval| is_multiple(chainage_m, *interval));
            let flag = |step: f64| is_multiple(chainage_m, step);

            let point = point_at(group, chainage_m);
            let normal = match point {
                Some(_) => local_normal(network, group, chainage_m),
                None => Err(degenerate(group, chainage_m, "no centreline point")),
            };
            let (tick, label_line) = match (point, normal) {
                (Some(origin), Ok(normal)) => {
                    let line = |from: f64, length: f64| {
                        LineString::new(vec![
                            offset_coord(origin, normal, sign * from),
                            offset_coord(origin, normal, sign * (from + length)),
                        ])
                    };
                    (
                        Some(line(config.offset_m, config.width_m)),
                        labelled.then(|| line(config.label_offset_m, config.label_width_m)),
                    )
                }
                (_, Err(err)) => {
                    warn!("[Chainage] {}", err);
                    (None, None)
                }
                (None, Ok(_)) => (None, None),
            };

            ChainageMark {
                road_id: group.road_id,
                route: group.route.clone(),
                chainage_m,
                is_start,
                is_end,
                is_ramp: ramp,
                on_2000: flag(ROUND_STEPS[0]),
                on_1000: flag(ROUND_STEPS[1]),
                on_500: flag(ROUND_STEPS[2]),
                on_200: flag(ROUND_STEPS[3]),
                on_100: flag(ROUND_STEPS[4]),
                on_50: flag(ROUND_STEPS[5]),
                on_20: flag(ROUND_STEPS[6]),
                on_10: flag(ROUND_STEPS[7]),
                label: labelled.then(|| mark_label(group.route, chainage_m, ramp)),
                point,
                tick,
                label_line,
            }
        })
        .collect()
}

/// Unit normal of the centreline around `chainage_m`, from a short chord
/// clamped to the group.
fn local_normal(
    network: &Centreline,
    group: &MarkGroup<'_>,
    chainage_m: f64,
) -> Result<Coord<f64>> {
    let from = (chainage_m - TANGENT_HALF_LENGTH_M).max(group.start_m);
    let to = (chainage_m + TANGENT_HALF_LENGTH_M).min(group.end_m);
    let chord = network
        .extract_geometry(group.road_id, from, to, true)
        .ok_or_else(|| degenerate(group, chainage_m, "no geometry around the mark"))?;
    let (start, end) = (chord.0[0], chord.0[chord.0.len() - 1]);
    unit_normal(start, end).ok_or_else(|| degenerate(group, chainage_m, "zero-length tangent"))
}

fn degenerate(group: &MarkGroup<'_>, chainage_m: f64, message: &str) -> RoadNetworkError {
    RoadNetworkError::DegenerateGeometry {
        road_id: group.road_id,
        position_m: chainage_m,
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CarriagewayRecord, RoadNames};
    use crate::{NetworkConfig, SegmentId};

    fn route(road_id: RoadId, direction: &str, element_type: &str) -> RouteInfo {
        RouteInfo {
            highway: Some("01N".to_string()),
            reference_station: Some(137),
            direction: Some(direction.to_string()),
            element_type: Some(element_type.to_string()),
            ..RouteInfo::new(road_id, "SH1")
        }
    }

    fn network(records: Vec<CarriagewayRecord>, routes: Vec<RouteInfo>) -> Centreline {
        let roadnames: RoadNames = routes.into_iter().collect();
        Centreline::new(records, &roadnames, NetworkConfig::default()).unwrap()
    }

    fn element(
        carr_way_no: SegmentId,
        road_id: RoadId,
        start_m: f64,
        end_m: f64,
        from: (f64, f64),
        to: (f64, f64),
    ) -> CarriagewayRecord {
        let geometry = LineString::from(vec![from, to]);
        CarriagewayRecord::new(carr_way_no, road_id, start_m, end_m, geometry)
    }

    fn straight() -> Centreline {
        network(
            vec![
                element(1, 1, 0.0, 150.0, (0.0, 0.0), (150.0, 0.0)),
                element(2, 1, 150.0, 250.0, (150.0, 0.0), (250.0, 0.0)),
            ],
            vec![route(1, "I", "MC")],
        )
    }

    fn config() -> ChainageLayerConfig {
        ChainageLayerConfig {
            length_m: 100.0,
            width_m: 10.0,
            offset_m: 2.0,
            label_intervals: vec![200.0],
            ..Default::default()
        }
    }

    fn assert_coord(actual: Coord<f64>, x: f64, y: f64) {
        assert!(
            (actual.x - x).abs() < 1e-9 && (actual.y - y).abs() < 1e-9,
            "{:?} != ({}, {})",
            actual, x, y
        );
    }

    #[test]
    fn test_mark_chainages() {
        assert_eq!(
            mark_chainages(0.0, 250.0, 100.0),
            vec![0.0, 100.0, 200.0, 250.0]
        );
        assert_eq!(
            mark_chainages(100.0, 300.0, 100.0),
            vec![100.0, 200.0, 300.0]
        );
        assert_eq!(mark_chainages(30.0, 60.0, 100.0), vec![30.0, 60.0]);
        assert_eq!(mark_chainages(30.0, 30.0, 100.0), vec![30.0]);
    }

    #[test]
    fn test_marks_flags_and_labels() {
        let marks = build_chainage_layer(&straight(), &[1], &config()).unwrap();
        let chainages: Vec<f64> = marks.iter().map(|m| m.chainage_m).collect();
        assert_eq!(chainages, vec![0.0, 100.0, 200.0, 250.0]);

        assert!(marks[0].is_start && !marks[0].is_end);
        assert!(marks[3].is_end);
        assert!(marks[1].on_100 && !marks[1].on_200 && marks[1].on_50 && marks[1].on_10);
        assert!(marks[2].on_200 && !marks[2].on_500);
        assert!(marks[3].on_50 && !marks[3].on_100);
        assert!(marks.iter().all(|m| !m.is_ramp));

        assert_eq!(marks[0].label.as_deref(), Some("01N-0137/0.00-I"));
        assert_eq!(marks[1].label, None);
        assert!(marks[1].label_line.is_none());
        assert_eq!(marks[2].label.as_deref(), Some("01N-0137/0.20-I"));
        assert_eq!(marks[3].label.as_deref(), Some("01N-0137/0.25-I"));
    }

    #[test]
    fn test_tick_is_perpendicular() {
        let marks = build_chainage_layer(&straight(), &[1], &config()).unwrap();
        let tick = marks[1].tick.as_ref().unwrap();
        assert_coord(tick.0[0], 100.0, 2.0);
        assert_coord(tick.0[1], 100.0, 12.0);
    }

    #[test]
    fn test_decreasing_direction_flips_tick() {
        let network = network(
            vec![element(1, 1, 0.0, 100.0, (0.0, 0.0), (100.0, 0.0))],
            vec![route(1, "D", "MC")],
        );
        let marks = build_chainage_layer(&network, &[1], &config()).unwrap();
        let tick = marks[0].tick.as_ref().unwrap();
        assert_coord(tick.0[0], 0.0, -2.0);
        assert_coord(tick.0[1], 0.0, -12.0);
        assert_eq!(marks[0].label.as_deref(), Some("01N-0137/0.00-D"));
    }

    #[test]
    fn test_vertical_road_has_finite_ticks() {
        let network = network(
            vec![element(1, 1, 0.0, 100.0, (5.0, 0.0), (5.0, 100.0))],
            vec![route(1, "I", "MC")],
        );
        let marks = build_chainage_layer(&network, &[1], &config()).unwrap();
        for mark in &marks {
            let tick = mark.tick.as_ref().unwrap();
            assert!(tick.coords().all(|c| c.x.is_finite() && c.y.is_finite()));
            assert!((tick.0[0].x - 3.0).abs() < 1e-9);
            assert!((tick.0[1].x + 7.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_groups_split_on_ramp_and_skip_excluded() {
        let mut ramp = route(2, "I", "RM");
        ramp.ramp_number = Some("3".to_string());
        let roundabout = route(3, "I", "RD");
        let network = network(
            vec![
                element(1, 2, 0.0, 50.0, (0.0, 0.0), (50.0, 0.0)),
                element(2, 3, 0.0, 30.0, (0.0, 10.0), (30.0, 10.0)),
            ],
            vec![ramp, roundabout],
        );
        let marks = build_chainage_layer(&network, &[2, 3], &config()).unwrap();
        assert_eq!(marks.len(), 2);
        assert!(marks.iter().all(|m| m.road_id == 2 && m.is_ramp));
        assert_eq!(marks[0].label.as_deref(), Some("01N-0137/0.00-R3"));
    }

    #[test]
    fn test_gap_starts_new_group() {
        let network = network(
            vec![
                element(1, 1, 0.0, 50.0, (0.0, 0.0), (50.0, 0.0)),
                element(2, 1, 80.0, 120.0, (80.0, 0.0), (120.0, 0.0)),
            ],
            vec![route(1, "I", "MC")],
        );
        let marks = build_chainage_layer(&network, &[1], &config()).unwrap();
        let chainages: Vec<f64> = marks.iter().map(|m| m.chainage_m).collect();
        assert_eq!(chainages, vec![0.0, 50.0, 80.0, 100.0, 120.0]);
        assert_eq!(marks.iter().filter(|m| m.is_start).count(), 2);
    }

    #[test]
    fn test_degenerate_tangent_keeps_batch_going() {
        let network = network(
            vec![element(1, 1, 0.0, 20.0, (5.0, 5.0), (5.0, 5.0))],
            vec![route(1, "I", "MC")],
        );
        let marks = build_chainage_layer(&network, &[1], &config()).unwrap();
        assert_eq!(marks.len(), 2);
        assert!(marks.iter().all(|m| m.tick.is_none()));
        assert_eq!(marks[0].point, Some(Coord { x: 5.0, y: 5.0 }));
    }

    #[test]
    fn test_unknown_road_rejected() {
        assert!(matches!(
            build_chainage_layer(&straight(), &[42], &config()),
            Err(RoadNetworkError::InvalidArgument { .. })
        ));
        let bad = ChainageLayerConfig {
            length_m: 0.0,
            ..config()
        };
        assert!(build_chainage_layer(&straight(), &[1], &bad).is_err());
    }
}

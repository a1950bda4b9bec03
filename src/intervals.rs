//! # Interval Coalescing
//!
//! Collapses overlapping chainage intervals into a non-overlapping timeline
//! where the highest-priority interval wins every metre it covers.
//!
//! ## Algorithm
//!
//! 1. Sort the intervals of one group by priority, lowest first
//! 2. Rasterise them onto a 1 m occupancy grid, each writing its 1-based
//!    ordinal over `[round(start), round(end))` so later writes win
//! 3. Read back maximal runs of constant non-zero value
//! 4. Map each run's ordinal back to its interval's payload
//!
//! Priority order, never input order, decides coverage, so identical inputs
//! in any row order give identical runs.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use log::debug;
use serde::Serialize;

use crate::error::{Result, RoadNetworkError};
use crate::types::{ChainageRange, ChainageSpan};

/// Longest chainage the occupancy grid accepts, in metres.
pub const MAX_GRID_CHAINAGE_M: f64 = 10_000_000.0;

/// An interval of one group carrying a payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LabeledInterval<K, P> {
    pub key: K,
    pub start_m: f64,
    pub end_m: f64,
    pub payload: P,
}

impl<K, P> LabeledInterval<K, P> {
    pub fn new(key: K, start_m: f64, end_m: f64, payload: P) -> Self {
        Self {
            key,
            start_m,
            end_m,
            payload,
        }
    }
}

/// A resolved, non-overlapping interval and the payload that won it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoalescedRun<K, P> {
    pub key: K,
    pub start_m: f64,
    pub end_m: f64,
    pub payload: P,
}

/// Maximal run of one ordinal on the grid; `end` is exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridRun {
    pub ordinal: u32,
    pub start: usize,
    pub end: usize,
}

/// One cell per metre holding the ordinal of the winning interval (0 for
/// uncovered track).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OccupancyGrid {
    cells: Vec<u32>,
}

impl OccupancyGrid {
    /// Rasterise `(start, end)` spans given in ascending priority order.
    ///
    /// The grid is `round(max end)` cells long. Span `i` writes `i + 1`.
    /// Chainages past [`MAX_GRID_CHAINAGE_M`] are rejected before any cell is
    /// allocated.
    pub fn rasterize(spans: &[(f64, f64)]) -> Result<Self> {
        for &(start, end) in spans {
            check_chainage(start)?;
            check_chainage(end)?;
            check_grid_bound(end)?;
        }

        let size = spans
            .iter()
            .map(|&(_, end)| end.round() as usize)
            .max()
            .unwrap_or(0);
        let mut cells = vec![0u32; size];

        for (i, &(start, end)) in spans.iter().enumerate() {
            let from = (start.round() as usize).min(size);
            let to = (end.round() as usize).min(size);
            if from < to {
                cells[from..to].fill(i as u32 + 1);
            }
        }

        Ok(Self { cells })
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn cells(&self) -> &[u32] {
        &self.cells
    }

    /// Maximal runs of constant non-zero value, in chainage order.
    pub fn runs(&self) -> Vec<GridRun> {
        let mut runs = Vec::new();
        let mut start = 0;
        for i in 1..=self.cells.len() {
            // A run ends at the grid end or where the value changes
            if i == self.cells.len() || self.cells[i] != self.cells[start] {
                if self.cells[start] != 0 {
                    runs.push(GridRun {
                        ordinal: self.cells[start],
                        start,
                        end: i,
                    });
                }
                start = i;
            }
        }
        runs
    }
}

fn check_chainage(value: f64) -> Result<()> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(RoadNetworkError::invalid_argument(format!(
            "chainage must be a non-negative number, got {}",
            value
        )))
    }
}

fn check_grid_bound(value: f64) -> Result<()> {
    if value <= MAX_GRID_CHAINAGE_M {
        Ok(())
    } else {
        Err(RoadNetworkError::invalid_argument(format!(
            "chainage {} exceeds the {} m grid limit",
            value, MAX_GRID_CHAINAGE_M
        )))
    }
}

/// Coalesce intervals per group key.
///
/// `priority` orders intervals from lowest to highest priority and must be a
/// total order for the result to be independent of input order. Output is
/// sorted by key then start.
pub fn coalesce<K, P, F>(
    intervals: Vec<LabeledInterval<K, P>>,
    mut priority: F,
) -> Result<Vec<CoalescedRun<K, P>>>
where
    K: Ord + Clone,
    P: Clone,
    F: FnMut(&LabeledInterval<K, P>, &LabeledInterval<K, P>) -> Ordering,
{
    let mut groups: BTreeMap<K, Vec<LabeledInterval<K, P>>> = BTreeMap::new();
    for interval in intervals {
        groups
            .entry(interval.key.clone())
            .or_default()
            .push(interval);
    }

    let mut coalesced = Vec::new();
    for (key, mut group) in groups {
        group.sort_by(&mut priority);
        let spans: Vec<(f64, f64)> = group.iter().map(|i| (i.start_m, i.end_m)).collect();
        let grid = OccupancyGrid::rasterize(&spans)?;
        let runs = grid.runs();

        debug!(
            "[Intervals] {} intervals coalesced to {} runs over {} m",
            group.len(),
            runs.len(),
            grid.len()
        );

        coalesced.extend(runs.into_iter().map(|run| CoalescedRun {
            key: key.clone(),
            start_m: run.start as f64,
            end_m: run.end as f64,
            payload: group[run.ordinal as usize - 1].payload.clone(),
        }));
    }
    Ok(coalesced)
}

/// Merge duplicate, overlapping and end-to-end intervals of each road into
/// maximal continuous intervals, sorted by road then start.
pub fn combine_continuous_segments<R, I>(records: I) -> Result<Vec<ChainageSpan>>
where
    R: ChainageRange,
    I: IntoIterator<Item = R>,
{
    let mut spans: Vec<ChainageSpan> = records
        .into_iter()
        .map(|r| {
            check_chainage(r.start_m())?;
            check_chainage(r.end_m())?;
            Ok(ChainageSpan::new(r.road_id(), r.start_m(), r.end_m()))
        })
        .collect::<Result<_>>()?;

    spans.sort_by(|a, b| {
        a.road_id
            .cmp(&b.road_id)
            .then(a.start_m.total_cmp(&b.start_m))
            .then(a.end_m.total_cmp(&b.end_m))
    });

    let mut combined: Vec<ChainageSpan> = Vec::with_capacity(spans.len());
    for span in spans {
        match combined.last_mut() {
            Some(last) if last.road_id == span.road_id && span.start_m <= last.end_m => {
                last.end_m = last.end_m.max(span.end_m);
            }
            _ => combined.push(span),
        }
    }
    Ok(combined)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn by_start(
        a: &LabeledInterval<u32, &'static str>,
        b: &LabeledInterval<u32, &'static str>,
    ) -> Ordering {
        a.start_m
            .total_cmp(&b.start_m)
            .then(a.end_m.total_cmp(&b.end_m))
            .then(a.payload.cmp(b.payload))
    }

    #[test]
    fn test_rasterize_later_wins() {
        let grid = OccupancyGrid::rasterize(&[(0.0, 6.0), (2.0, 4.0)]).unwrap();
        assert_eq!(grid.cells(), &[1, 1, 2, 2, 1, 1]);
    }

    #[test]
    fn test_rasterize_rounds_bounds() {
        let grid = OccupancyGrid::rasterize(&[(0.4, 2.5), (3.6, 5.2)]).unwrap();
        // 0.4 -> 0, 2.5 -> 3, 3.6 -> 4, 5.2 -> 5
        assert_eq!(grid.cells(), &[1, 1, 1, 0, 2]);
    }

    #[test]
    fn test_runs_drop_gaps() {
        let grid = OccupancyGrid::rasterize(&[(1.0, 3.0), (5.0, 7.0)]).unwrap();
        assert_eq!(
            grid.runs(),
            vec![
                GridRun {
                    ordinal: 1,
                    start: 1,
                    end: 3
                },
                GridRun {
                    ordinal: 2,
                    start: 5,
                    end: 7
                },
            ]
        );
        assert!(OccupancyGrid::rasterize(&[]).unwrap().runs().is_empty());
    }

    #[test]
    fn test_rejects_bad_chainage() {
        assert!(OccupancyGrid::rasterize(&[(-1.0, 3.0)]).is_err());
        assert!(OccupancyGrid::rasterize(&[(0.0, f64::INFINITY)]).is_err());
        assert!(OccupancyGrid::rasterize(&[(f64::NAN, 3.0)]).is_err());
    }

    #[test]
    fn test_rejects_chainage_past_grid_limit() {
        let result = OccupancyGrid::rasterize(&[(0.0, 1e20)]);
        assert!(matches!(
            result,
            Err(RoadNetworkError::InvalidArgument { .. })
        ));

        let result = OccupancyGrid::rasterize(&[(0.0, MAX_GRID_CHAINAGE_M + 1.0)]);
        assert!(result.is_err());

        let intervals = vec![LabeledInterval::new(1, 0.0, 1e20, "a")];
        assert!(coalesce(intervals, by_start).is_err());
    }

    #[test]
    fn test_higher_priority_sets_boundaries() {
        let intervals = vec![
            LabeledInterval::new(1, 0.0, 100.0, "old"),
            LabeledInterval::new(1, 30.0, 60.0, "new"),
        ];
        // "new" has the higher priority
        let runs = coalesce(intervals, |a, b| a.payload.cmp(b.payload).reverse()).unwrap();
        let summary: Vec<(f64, f64, &str)> = runs
            .iter()
            .map(|r| (r.start_m, r.end_m, r.payload))
            .collect();
        assert_eq!(
            summary,
            vec![
                (0.0, 30.0, "old"),
                (30.0, 60.0, "new"),
                (60.0, 100.0, "old")
            ]
        );
    }

    #[test]
    fn test_input_order_does_not_matter() {
        let intervals = vec![
            LabeledInterval::new(2, 10.0, 40.0, "b"),
            LabeledInterval::new(1, 0.0, 20.0, "a"),
            LabeledInterval::new(1, 15.0, 25.0, "c"),
            LabeledInterval::new(2, 0.0, 20.0, "d"),
        ];
        let mut reversed = intervals.clone();
        reversed.reverse();

        let forward = coalesce(intervals, by_start).unwrap();
        let backward = coalesce(reversed, by_start).unwrap();
        assert_eq!(forward, backward);
        assert_eq!(forward.first().map(|r| r.key), Some(1));
        assert_eq!(forward.last().map(|r| (r.key, r.end_m)), Some((2, 40.0)));
    }

    #[test]
    fn test_coalesce_is_idempotent() {
        let intervals = vec![
            LabeledInterval::new(1, 0.0, 50.0, "a"),
            LabeledInterval::new(1, 20.0, 80.0, "b"),
            LabeledInterval::new(1, 70.0, 90.0, "c"),
        ];
        let once = coalesce(intervals, by_start).unwrap();
        let again = coalesce(
            once.iter()
                .map(|r| LabeledInterval::new(r.key, r.start_m, r.end_m, r.payload))
                .collect(),
            by_start,
        )
        .unwrap();
        assert_eq!(once, again);
    }

    #[test]
    fn test_combine_continuous_segments() {
        let rows = vec![
            ChainageSpan::new(1, 40.0, 50.0),
            ChainageSpan::new(1, 50.0, 60.0),
            ChainageSpan::new(1, 50.0, 60.0),
            ChainageSpan::new(1, 60.0, 70.0),
            ChainageSpan::new(1, 100.0, 110.0),
        ];
        let combined = combine_continuous_segments(rows).unwrap();
        assert_eq!(
            combined,
            vec![
                ChainageSpan::new(1, 40.0, 70.0),
                ChainageSpan::new(1, 100.0, 110.0)
            ]
        );
    }

    #[test]
    fn test_combine_keeps_roads_apart() {
        let rows = vec![
            ChainageSpan::new(2, 0.0, 10.0),
            ChainageSpan::new(1, 10.0, 20.0),
        ];
        let combined = combine_continuous_segments(rows).unwrap();
        assert_eq!(combined.len(), 2);
        assert_eq!(combined[0].road_id, 1);
        assert!(combine_continuous_segments(vec![ChainageSpan::new(1, -5.0, 10.0)]).is_err());
    }
}

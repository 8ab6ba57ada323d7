use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Gap (in x-axis units) below which neighbouring intervals are merged.
pub const GAP_TOLERANCE: f64 = 5.0;

/// Spans narrower than this after clipping are ignored by [`IntervalSet::select_span`].
pub const MIN_SPAN_WIDTH: f64 = 1.0;

// ---------------------------------------------------------------------------
// Interval – a closed wavenumber span
// ---------------------------------------------------------------------------

/// A closed `[lower, upper]` span of wavenumbers with `lower < upper`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "(f64, f64)", into = "(f64, f64)")]
pub struct Interval {
    lower: f64,
    upper: f64,
}

impl Interval {
    pub fn new(lower: f64, upper: f64) -> Result<Self> {
        if !lower.is_finite() || !upper.is_finite() {
            return Err(EngineError::invalid_range(format!(
                "bounds must be finite, got {lower} - {upper}"
            )));
        }
        if lower >= upper {
            return Err(EngineError::invalid_range(format!(
                "lower bound ({lower}) must be less than upper bound ({upper})"
            )));
        }
        Ok(Interval { lower, upper })
    }

    /// Build from two bounds given in either order.
    pub fn normalized(a: f64, b: f64) -> Result<Self> {
        Self::new(a.min(b), a.max(b))
    }

    pub fn lower(&self) -> f64 {
        self.lower
    }

    pub fn upper(&self) -> f64 {
        self.upper
    }

    pub fn width(&self) -> f64 {
        self.upper - self.lower
    }

    /// Inclusive containment.
    pub fn contains(&self, x: f64) -> bool {
        self.lower <= x && x <= self.upper
    }

    /// Both bounds within `tolerance` of `other`'s.
    pub fn matches(&self, other: &Interval, tolerance: f64) -> bool {
        (self.lower - other.lower).abs() < tolerance && (self.upper - other.upper).abs() < tolerance
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2} - {:.2}", self.lower, self.upper)
    }
}

impl TryFrom<(f64, f64)> for Interval {
    type Error = EngineError;

    fn try_from((a, b): (f64, f64)) -> Result<Self> {
        Interval::normalized(a, b)
    }
}

impl From<Interval> for (f64, f64) {
    fn from(iv: Interval) -> Self {
        (iv.lower, iv.upper)
    }
}

/// Which end of an interval a boundary refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    Lower,
    Upper,
}

// ---------------------------------------------------------------------------
// IntervalSet – user-selected spans over one spectrum
// ---------------------------------------------------------------------------

/// An ordered, mutable collection of [`Interval`]s.
///
/// After [`merge`](Self::merge) the set is sorted by `lower` and no two
/// neighbours satisfy `next.lower <= current.upper + gap_tolerance`.
#[derive(Debug, Clone, PartialEq)]
pub struct IntervalSet {
    intervals: Vec<Interval>,
    gap_tolerance: f64,
    bounds: Option<(f64, f64)>,
}

impl Default for IntervalSet {
    fn default() -> Self {
        Self::new()
    }
}

impl IntervalSet {
    pub fn new() -> Self {
        IntervalSet {
            intervals: Vec::new(),
            gap_tolerance: GAP_TOLERANCE,
            bounds: None,
        }
    }

    pub fn with_gap_tolerance(gap_tolerance: f64) -> Self {
        IntervalSet {
            gap_tolerance,
            ..Self::new()
        }
    }

    /// Restrict the set to `[min, max]` of a reference spectrum.
    ///
    /// Existing intervals are clipped to the new bounds; those left narrower
    /// than [`MIN_SPAN_WIDTH`] are dropped. Later additions are checked
    /// against the bounds.
    pub fn bind_to(&mut self, x_range: (f64, f64)) {
        let (min, max) = x_range;
        let before = self.intervals.len();
        self.intervals = self
            .intervals
            .iter()
            .filter_map(|iv| {
                let (lower, upper) = (iv.lower.max(min), iv.upper.min(max));
                if upper - lower < MIN_SPAN_WIDTH {
                    return None;
                }
                Interval::new(lower, upper).ok()
            })
            .collect();
        let dropped = before - self.intervals.len();
        if dropped > 0 {
            log::warn!("{dropped} range(s) outside {min:.2} - {max:.2} cm-1 dropped");
        }
        self.bounds = Some(x_range);
    }

    pub fn unbind(&mut self) {
        self.bounds = None;
    }

    pub fn bounds(&self) -> Option<(f64, f64)> {
        self.bounds
    }

    pub fn gap_tolerance(&self) -> f64 {
        self.gap_tolerance
    }

    pub fn intervals(&self) -> &[Interval] {
        &self.intervals
    }

    pub fn len(&self) -> usize {
        self.intervals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Interval> {
        self.intervals.get(index)
    }

    /// Append `[lower, upper]` without merging.
    pub fn add(&mut self, lower: f64, upper: f64) -> Result<()> {
        let interval = Interval::new(lower, upper)?;
        if let Some((min, max)) = self.bounds {
            if lower < min || upper > max {
                return Err(EngineError::invalid_range(format!(
                    "range must lie within {min:.2} - {max:.2} cm-1, got {interval}"
                )));
            }
        }
        self.intervals.push(interval);
        log::info!("Added range {interval}");
        Ok(())
    }

    /// Append and immediately merge; the path every interactive edit takes.
    pub fn insert(&mut self, lower: f64, upper: f64) -> Result<()> {
        self.add(lower, upper)?;
        if self.merge() {
            log::info!("Merged overlapping ranges after add");
        }
        Ok(())
    }

    /// Add a dragged span: bounds in any order, clipped to the bound spectrum.
    ///
    /// Returns `Ok(false)` without touching the set when the clipped span is
    /// narrower than [`MIN_SPAN_WIDTH`].
    pub fn select_span(&mut self, a: f64, b: f64) -> Result<bool> {
        let (mut lower, mut upper) = (a.min(b), a.max(b));
        if let Some((min, max)) = self.bounds {
            lower = lower.max(min);
            upper = upper.min(max);
        }
        if upper - lower < MIN_SPAN_WIDTH {
            log::warn!("Selected span {a:.2} - {b:.2} is too small or out of range, ignored");
            return Ok(false);
        }
        self.insert(lower, upper)?;
        Ok(true)
    }

    /// Remove the interval at `index`; out-of-range indices are ignored.
    pub fn delete(&mut self, index: usize) -> Option<Interval> {
        if index < self.intervals.len() {
            let removed = self.intervals.remove(index);
            log::info!("Deleted range {removed}");
            Some(removed)
        } else {
            None
        }
    }

    pub fn clear(&mut self) {
        self.intervals.clear();
    }

    /// Sort by `lower` and fold together intervals closer than the gap
    /// tolerance. Returns whether any two intervals were combined.
    pub fn merge(&mut self) -> bool {
        if self.intervals.len() <= 1 {
            return false;
        }
        self.intervals.sort_by(|a, b| a.lower.total_cmp(&b.lower));

        let before = self.intervals.len();
        let mut merged: Vec<Interval> = Vec::with_capacity(before);
        let mut running = self.intervals[0];
        for next in &self.intervals[1..] {
            if next.lower <= running.upper + self.gap_tolerance {
                running.upper = running.upper.max(next.upper);
            } else {
                merged.push(running);
                running = *next;
            }
        }
        merged.push(running);

        let changed = merged.len() != before;
        if changed {
            log::info!("Range merge: {before} -> {}", merged.len());
        }
        self.intervals = merged;
        changed
    }

    /// Nearest interval edge within `tolerance` of `position`. Equal
    /// distances resolve to the first edge in iteration order (lower before
    /// upper).
    pub fn find_boundary_near(&self, position: f64, tolerance: f64) -> Option<(usize, Edge)> {
        let mut best: Option<(usize, Edge, f64)> = None;
        for (idx, iv) in self.intervals.iter().enumerate() {
            for (edge, value) in [(Edge::Lower, iv.lower), (Edge::Upper, iv.upper)] {
                let distance = (value - position).abs();
                if distance > tolerance {
                    continue;
                }
                if best.map_or(true, |(_, _, d)| distance < d) {
                    best = Some((idx, edge, distance));
                }
            }
        }
        best.map(|(idx, edge, _)| (idx, edge))
    }

    /// Move one edge of interval `index` to `position`, then re-merge.
    ///
    /// Dragging an edge past its partner swaps the roles; the position is
    /// clipped to the bound spectrum.
    pub fn drag_boundary(&mut self, index: usize, edge: Edge, position: f64) -> Result<()> {
        let iv = *self
            .intervals
            .get(index)
            .ok_or_else(|| EngineError::invalid_range(format!("no range at index {index}")))?;
        let mut position = position;
        if let Some((min, max)) = self.bounds {
            position = position.clamp(min, max);
        }
        let moved = match edge {
            Edge::Lower => Interval::normalized(position, iv.upper)?,
            Edge::Upper => Interval::normalized(iv.lower, position)?,
        };
        self.intervals[index] = moved;
        self.merge();
        Ok(())
    }

    /// Index of the first interval containing `x` (inclusive).
    pub fn contains_point(&self, x: f64) -> Option<usize> {
        self.intervals.iter().position(|iv| iv.contains(x))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn set(gap: f64, spans: &[(f64, f64)]) -> IntervalSet {
        let mut s = IntervalSet::with_gap_tolerance(gap);
        for &(a, b) in spans {
            s.add(a, b).unwrap();
        }
        s
    }

    fn pairs(s: &IntervalSet) -> Vec<(f64, f64)> {
        s.intervals().iter().map(|&iv| iv.into()).collect()
    }

    #[test]
    fn interval_construction() {
        assert!(Interval::new(1.0, 1.0).is_err());
        assert!(Interval::new(2.0, 1.0).is_err());
        assert!(Interval::new(f64::NAN, 1.0).is_err());
        let iv = Interval::normalized(5.0, 1.0).unwrap();
        assert_eq!((iv.lower(), iv.upper()), (1.0, 5.0));
        assert!(iv.contains(1.0) && iv.contains(5.0) && !iv.contains(5.01));
    }

    #[test]
    fn add_checks_bounds_of_reference_spectrum() {
        let mut s = IntervalSet::new();
        s.bind_to((400.0, 4000.0));
        assert!(s.add(300.0, 500.0).is_err());
        assert!(s.add(600.0, 500.0).is_err());
        s.add(500.0, 600.0).unwrap();
        s.add(550.0, 700.0).unwrap();
        assert_eq!(s.len(), 2, "add must not merge");
    }

    #[test]
    fn gap_tolerance_decides_merge() {
        let mut wide = set(5.0, &[(0.0, 10.0), (12.0, 20.0)]);
        assert!(wide.merge());
        assert_eq!(pairs(&wide), vec![(0.0, 20.0)]);

        let mut narrow = set(1.0, &[(0.0, 10.0), (12.0, 20.0)]);
        assert!(!narrow.merge());
        assert_eq!(pairs(&narrow), vec![(0.0, 10.0), (12.0, 20.0)]);
    }

    #[test]
    fn merge_keeps_containing_upper() {
        let mut s = set(5.0, &[(50.0, 60.0), (0.0, 100.0), (200.0, 210.0)]);
        assert!(s.merge());
        assert_eq!(pairs(&s), vec![(0.0, 100.0), (200.0, 210.0)]);
        assert!(!s.merge());
    }

    #[test]
    fn insert_merges_automatically() {
        let mut s = IntervalSet::new();
        s.insert(0.0, 10.0).unwrap();
        s.insert(14.0, 30.0).unwrap();
        assert_eq!(pairs(&s), vec![(0.0, 30.0)]);
    }

    #[test]
    fn rebinding_clips_existing_intervals() {
        let mut s = set(5.0, &[(500.0, 700.0), (1500.0, 1900.0), (1999.5, 2400.0), (2500.0, 2600.0)]);
        s.bind_to((600.0, 2000.0));
        assert_eq!(pairs(&s), vec![(600.0, 700.0), (1500.0, 1900.0)]);
        assert_eq!(s.bounds(), Some((600.0, 2000.0)));

        s.bind_to((3000.0, 4000.0));
        assert!(s.is_empty());
    }

    #[test]
    fn select_span_clips_and_ignores_slivers() {
        let mut s = IntervalSet::new();
        s.bind_to((1000.0, 2000.0));
        assert!(s.select_span(2100.0, 1800.0).unwrap());
        assert_eq!(pairs(&s), vec![(1800.0, 2000.0)]);
        assert!(!s.select_span(2500.0, 1999.5).unwrap());
        assert_eq!(s.len(), 1);
    }

    #[test]
    fn boundary_lookup_prefers_nearest_then_first() {
        let s = set(5.0, &[(0.0, 10.0), (20.0, 30.0)]);
        assert_eq!(s.find_boundary_near(9.0, 2.0), Some((0, Edge::Upper)));
        assert_eq!(s.find_boundary_near(19.5, 2.0), Some((1, Edge::Lower)));
        assert_eq!(s.find_boundary_near(15.0, 2.0), None);
        assert_eq!(s.find_boundary_near(15.0, 5.0), Some((0, Edge::Upper)));
    }

    #[test]
    fn dragging_an_edge_remerges() {
        let mut s = set(5.0, &[(0.0, 10.0), (30.0, 40.0)]);
        s.drag_boundary(0, Edge::Upper, 27.0).unwrap();
        assert_eq!(pairs(&s), vec![(0.0, 40.0)]);

        let mut flipped = set(5.0, &[(10.0, 20.0)]);
        flipped.drag_boundary(0, Edge::Lower, 25.0).unwrap();
        assert_eq!(pairs(&flipped), vec![(20.0, 25.0)]);
        assert!(flipped.drag_boundary(3, Edge::Lower, 1.0).is_err());
    }

    #[test]
    fn delete_clear_and_lookup() {
        let mut s = set(5.0, &[(0.0, 10.0), (20.0, 30.0)]);
        assert_eq!(s.contains_point(25.0), Some(1));
        assert_eq!(s.contains_point(15.0), None);
        assert!(s.delete(5).is_none());
        s.delete(0);
        assert_eq!(s.contains_point(25.0), Some(0));
        s.clear();
        s.clear();
        assert!(s.is_empty());
    }

    proptest! {
        #[test]
        fn merge_is_idempotent_and_gap_disjoint(
            spans in prop::collection::vec((0.0f64..1000.0, 0.5f64..80.0), 0..25),
            gap in 0.0f64..20.0,
        ) {
            let mut s = IntervalSet::with_gap_tolerance(gap);
            for (start, width) in spans {
                s.add(start, start + width).unwrap();
            }
            s.merge();
            let once = s.clone();
            prop_assert!(!s.merge());
            prop_assert_eq!(&s, &once);
            for w in s.intervals().windows(2) {
                prop_assert!(w[1].lower() > w[0].upper() + gap);
            }
        }
    }
}

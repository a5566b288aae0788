//! Simulation grid construction.
//!
//! The grid must enclose every selected line with enough margin for its
//! tails, follow the experimental window when one is loaded, and never
//! split into more than one linspace unless several subjects are simulated.

use serde::{Deserialize, Serialize};

use crate::constants::WIDTH_MARGIN;
use crate::interp::linspace;
use crate::transitions::TransitionCategory;

/// A grid edge: computed from the lines, or pinned by the user.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(try_from = "BoundRepr", into = "BoundRepr")]
pub enum Bound {
    #[default]
    Auto,
    Value(f64),
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum BoundRepr {
    Number(f64),
    Text(String),
}

impl TryFrom<BoundRepr> for Bound {
    type Error = String;

    fn try_from(repr: BoundRepr) -> Result<Self, Self::Error> {
        match repr {
            BoundRepr::Number(v) if v.is_finite() => Ok(Self::Value(v)),
            BoundRepr::Number(v) => Err(format!("bound {v} is not finite")),
            BoundRepr::Text(s) if s.eq_ignore_ascii_case("auto") => Ok(Self::Auto),
            BoundRepr::Text(s) => s
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .map(Self::Value)
                .ok_or_else(|| format!("bound must be \"Auto\" or a number, got {s:?}")),
        }
    }
}

impl From<Bound> for BoundRepr {
    fn from(b: Bound) -> Self {
        match b {
            Bound::Auto => Self::Text("Auto".into()),
            Bound::Value(v) => Self::Number(v),
        }
    }
}

/// Energies and natural widths of one group of rows (a transition, or one
/// satellite channel of a transition).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LineGroup {
    pub energies: Vec<f64>,
    pub widths: Vec<f64>,
}

impl LineGroup {
    pub fn is_empty(&self) -> bool {
        self.energies.is_empty()
    }

    fn spread(&self) -> f64 {
        let (lo, hi) = min_max(self.energies.iter().copied());
        hi - lo
    }
}

/// Line groups of one subject.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubjectLines {
    pub diagram: Vec<LineGroup>,
    pub satellite: Vec<LineGroup>,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Offsets {
    pub energy: f64,
    pub satellite: f64,
    pub shake_off: f64,
    pub shake_up: f64,
    pub separate: bool,
}

impl Offsets {
    /// Lowest and highest satellite offset in effect.
    fn satellite_extent(&self) -> (f64, f64) {
        if self.separate {
            (self.shake_off.min(self.shake_up), self.shake_off.max(self.shake_up))
        } else {
            (self.satellite, self.satellite)
        }
    }
}

#[derive(Debug, Clone)]
pub struct BoundsRequest<'a> {
    pub category: TransitionCategory,
    /// One entry in single-subject mode.
    pub subjects: &'a [SubjectLines],
    pub x_min: Bound,
    pub x_max: Bound,
    pub resolution: f64,
    pub offsets: Offsets,
    pub n_points: usize,
    pub unavailable: usize,
    pub experimental_span: Option<(f64, f64)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RangeKind {
    Bound,
    Filler,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GridRange {
    pub min: f64,
    pub max: f64,
    pub kind: RangeKind,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SimulationGrid {
    pub points: Vec<f64>,
    pub ranges: Vec<GridRange>,
    /// Edges that were rejected because `min >= max`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inverted: Option<(f64, f64)>,
}

impl SimulationGrid {
    /// True when no line could be placed and the grid is a zero placeholder.
    pub fn is_degenerate(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn span(&self) -> Option<(f64, f64)> {
        if self.is_degenerate() {
            return None;
        }
        Some(min_max(self.points.iter().copied()))
    }
}

/// Compute the simulation grid for `req`.
///
/// Without any valid line energy the grid degrades to `n_points` zeros
/// with no ranges; the caller raises the corresponding warning.
pub fn calculate_xfinal(req: &BoundsRequest<'_>) -> SimulationGrid {
    let n = req.n_points.max(2);
    let degenerate = || SimulationGrid {
        points: vec![0.0; n],
        ranges: Vec::new(),
        inverted: None,
    };

    if req.subjects.len() > 1 {
        return multi_subject_grid(req, n).unwrap_or_else(degenerate);
    }

    let Some(lines) = req.subjects.first() else {
        return degenerate();
    };
    let Some((auto_lo, auto_hi)) = subject_range(req, lines) else {
        tracing::debug!(unavailable = req.unavailable, "no line energies to bound");
        return degenerate();
    };

    let (exp_lo, exp_hi) = match req.experimental_span {
        Some((lo, hi)) => (Some(lo), Some(hi)),
        None => (None, None),
    };
    let lo = match req.x_min {
        Bound::Value(v) => v + req.offsets.energy,
        Bound::Auto => exp_lo.unwrap_or(auto_lo),
    };
    let hi = match req.x_max {
        Bound::Value(v) => v + req.offsets.energy,
        Bound::Auto => exp_hi.unwrap_or(auto_hi),
    };

    if lo >= hi {
        tracing::debug!(lo, hi, "grid edges inverted");
        return SimulationGrid {
            inverted: Some((lo, hi)),
            ..degenerate()
        };
    }

    SimulationGrid {
        points: linspace(lo, hi, n),
        ranges: vec![GridRange {
            min: lo,
            max: hi,
            kind: RangeKind::Bound,
        }],
        inverted: None,
    }
}

/// Offset-shifted auto range of one subject, with explicit bounds applied.
fn subject_range(req: &BoundsRequest<'_>, lines: &SubjectLines) -> Option<(f64, f64)> {
    let offsets = req.offsets;
    let mut range: Option<(f64, f64)> = None;

    if req.category.includes_diagram() || req.category.is_auger() {
        if let Some((lo, hi)) = auto_range(&lines.diagram, req.resolution) {
            range = union(range, (lo + offsets.energy, hi + offsets.energy));
        }
    }
    if req.category.includes_satellites() {
        if let Some((lo, hi)) = auto_range(&lines.satellite, req.resolution) {
            let (sat_lo, sat_hi) = offsets.satellite_extent();
            range = union(
                range,
                (lo + offsets.energy + sat_lo, hi + offsets.energy + sat_hi),
            );
        }
    }
    range
}

/// Unshifted auto bounds of a set of line groups.
fn auto_range(groups: &[LineGroup], resolution: f64) -> Option<(f64, f64)> {
    let groups: Vec<&LineGroup> = groups.iter().filter(|g| !g.is_empty()).collect();
    if groups.is_empty() {
        return None;
    }

    let delta_min = groups
        .iter()
        .map(|g| g.spread())
        .fold(f64::INFINITY, f64::min);
    let (e_min, e_max) = min_max(groups.iter().flat_map(|g| g.energies.iter().copied()));
    let max_width = groups
        .iter()
        .flat_map(|g| g.widths.iter().copied())
        .fold(0.0_f64, f64::max);

    let min_value = e_min - WIDTH_MARGIN * max_width;
    let max_value = e_max + WIDTH_MARGIN * max_width;
    let extension = if resolution <= delta_min {
        2.0 * delta_min
    } else {
        2.0 * resolution * delta_min
    };
    Some((min_value - extension, max_value + extension))
}

fn multi_subject_grid(req: &BoundsRequest<'_>, n: usize) -> Option<SimulationGrid> {
    let ranges: Vec<(f64, f64)> = req
        .subjects
        .iter()
        .filter_map(|lines| subject_range(req, lines))
        .map(|(lo, hi)| {
            let lo = match req.x_min {
                Bound::Value(v) => v + req.offsets.energy,
                Bound::Auto => lo,
            };
            let hi = match req.x_max {
                Bound::Value(v) => v + req.offsets.energy,
                Bound::Auto => hi,
            };
            (lo, hi)
        })
        .collect();
    if ranges.is_empty() {
        return None;
    }
    // Subjects lying wholly outside the pinned edges drop out.
    let first = ranges[0];
    let mut ranges: Vec<(f64, f64)> = ranges.into_iter().filter(|(lo, hi)| lo < hi).collect();
    if ranges.is_empty() {
        tracing::debug!(lo = first.0, hi = first.1, "grid edges inverted");
        return Some(SimulationGrid {
            points: vec![0.0; n],
            ranges: Vec::new(),
            inverted: Some(first),
        });
    }

    ranges.sort_by(|a, b| a.0.total_cmp(&b.0));
    let mut merged: Vec<(f64, f64)> = Vec::with_capacity(ranges.len());
    for (lo, hi) in ranges {
        match merged.last_mut() {
            Some(last) if lo <= last.1 => last.1 = last.1.max(hi),
            _ => merged.push((lo, hi)),
        }
    }

    let mut out: Vec<GridRange> = Vec::new();
    match req.experimental_span {
        Some((exp_lo, exp_hi)) => {
            let mut cursor = exp_lo;
            for &(lo, hi) in &merged {
                if lo > cursor && cursor < exp_hi {
                    out.push(GridRange {
                        min: cursor,
                        max: lo.min(exp_hi),
                        kind: RangeKind::Filler,
                    });
                }
                out.push(GridRange {
                    min: lo,
                    max: hi,
                    kind: RangeKind::Bound,
                });
                cursor = cursor.max(hi);
            }
            if cursor < exp_hi {
                out.push(GridRange {
                    min: cursor,
                    max: exp_hi,
                    kind: RangeKind::Filler,
                });
            }
        }
        None => out.extend(merged.iter().map(|&(lo, hi)| GridRange {
            min: lo,
            max: hi,
            kind: RangeKind::Bound,
        })),
    }

    let points = out
        .iter()
        .flat_map(|r| linspace(r.min, r.max, n))
        .collect();
    Some(SimulationGrid {
        points,
        ranges: out,
        inverted: None,
    })
}

fn union(a: Option<(f64, f64)>, b: (f64, f64)) -> Option<(f64, f64)> {
    Some(match a {
        Some((lo, hi)) => (lo.min(b.0), hi.max(b.1)),
        None => b,
    })
}

fn min_max(values: impl Iterator<Item = f64>) -> (f64, f64) {
    values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
        (lo.min(v), hi.max(v))
    })
}

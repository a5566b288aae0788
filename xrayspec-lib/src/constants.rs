/// Natural-width multiple added on both sides of the outermost lines.
pub const WIDTH_MARGIN: f64 = 4.0;

/// Lower limit of the fitted instrumental resolution (eV).
pub const RESOLUTION_FLOOR: f64 = 0.01;

/// Upper limit of any fitted energy offset excursion (eV).
pub const OFFSET_CEILING_EV: f64 = 50.0;

/// Fraction of the experimental span an offset may move.
pub const OFFSET_SPAN_FRACTION: f64 = 0.1;

/// Residual returned for every point when a trial violates the shake constraints.
pub const INVALID_RESIDUAL: f64 = 1e10;

/// Lower limit of a fitted shake amplitude multiplier.
pub const SHAKE_MULTIPLIER_FLOOR: f64 = 0.1;

/// Default ceiling on the summed effective shake probability.
pub const DEFAULT_MAX_TOTAL_SHAKE_PROBABILITY: f64 = 0.5;

/// sqrt(ln 2)
pub const SQRT_LN2: f64 = 0.832_554_611_157_697_7;

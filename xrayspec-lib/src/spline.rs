/// Natural cubic spline through a set of knots.
///
/// Knots must be non-decreasing; repeated abscissae (grid junctions in
/// multi-subject mode) keep only their first occurrence.
#[derive(Debug, Clone)]
pub struct CubicSpline {
    x: Vec<f64>,
    y: Vec<f64>,
    y2: Vec<f64>,
}

impl CubicSpline {
    pub fn new(x: &[f64], y: &[f64]) -> Self {
        let mut xs = Vec::with_capacity(x.len());
        let mut ys = Vec::with_capacity(y.len());
        for (&xi, &yi) in x.iter().zip(y.iter()) {
            if xs.last().is_some_and(|&last: &f64| xi <= last) {
                continue;
            }
            xs.push(xi);
            ys.push(yi);
        }
        let y2 = natural_second_derivatives(&xs, &ys);
        Self { x: xs, y: ys, y2 }
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    /// Lowest and highest knot.
    pub fn domain(&self) -> Option<(f64, f64)> {
        Some((*self.x.first()?, *self.x.last()?))
    }

    pub fn eval(&self, x: f64) -> f64 {
        match self.x.len() {
            0 => 0.0,
            1 => self.y[0],
            _ => eval_segment(&self.x, &self.y, &self.y2, x),
        }
    }

    pub fn eval_many(&self, xout: &[f64]) -> Vec<f64> {
        xout.iter().map(|&x| self.eval(x)).collect()
    }
}

/// Second derivatives of the natural spline (zero curvature at both ends).
pub fn natural_second_derivatives(x: &[f64], y: &[f64]) -> Vec<f64> {
    let n = x.len();
    let mut y2 = vec![0.0; n];
    if n < 3 {
        return y2;
    }
    let mut u = vec![0.0; n];
    for i in 1..n - 1 {
        let sig = (x[i] - x[i - 1]) / (x[i + 1] - x[i - 1]);
        let p = sig * y2[i - 1] + 2.0;
        y2[i] = (sig - 1.0) / p;
        let slope_diff =
            (y[i + 1] - y[i]) / (x[i + 1] - x[i]) - (y[i] - y[i - 1]) / (x[i] - x[i - 1]);
        u[i] = (6.0 * slope_diff / (x[i + 1] - x[i - 1]) - sig * u[i - 1]) / p;
    }
    for k in (0..n - 1).rev() {
        y2[k] = y2[k] * y2[k + 1] + u[k];
    }
    y2
}

fn eval_segment(xin: &[f64], yin: &[f64], yspl: &[f64], x: f64) -> f64 {
    let hi = match xin.partition_point(|&v| v < x) {
        i if i >= xin.len() => xin.len() - 1,
        0 => 1,
        i => i,
    };
    let lo = hi - 1;

    let diff = xin[hi] - xin[lo];
    debug_assert!(diff > 0.0, "knots must be strictly increasing");

    let a = (xin[hi] - x) / diff;
    let b = (x - xin[lo]) / diff;

    a * yin[lo]
        + b * yin[hi]
        + (diff * diff / 6.0) * ((a * a - 1.0) * a * yspl[lo] + (b * b - 1.0) * b * yspl[hi])
}

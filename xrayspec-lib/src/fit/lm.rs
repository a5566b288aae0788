//! Levenberg-Marquardt least squares on named, boxed parameters.
//!
//! Bounded parameters are mapped to an unconstrained internal coordinate
//! (`v = min + (sin x + 1)(max − min)/2` for two-sided boxes), so every
//! trial value stays inside its box. Uncertainties are scaled from the
//! internal covariance with the derivative of that map.

use super::linalg::{invert, solve};

#[derive(Debug, Clone, PartialEq)]
pub struct NamedParameter {
    pub name: String,
    pub value: f64,
    pub min: f64,
    pub max: f64,
    pub vary: bool,
    pub stderr: Option<f64>,
}

impl NamedParameter {
    pub fn new(name: impl Into<String>, value: f64, min: f64, max: f64) -> Self {
        Self {
            name: name.into(),
            value,
            min,
            max,
            vary: true,
            stderr: None,
        }
    }

    pub fn fixed(mut self) -> Self {
        self.vary = false;
        self
    }
}

/// Insertion-ordered parameter collection addressed by name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NamedParameters {
    entries: Vec<NamedParameter>,
}

impl NamedParameters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the parameter called `param.name`.
    pub fn add(&mut self, param: NamedParameter) -> &mut Self {
        match self.entries.iter_mut().find(|p| p.name == param.name) {
            Some(existing) => *existing = param,
            None => self.entries.push(param),
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<&NamedParameter> {
        self.entries.iter().find(|p| p.name == name)
    }

    pub fn value(&self, name: &str) -> Option<f64> {
        self.get(name).map(|p| p.value)
    }

    pub fn iter(&self) -> impl Iterator<Item = &NamedParameter> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn values(&self) -> Vec<f64> {
        self.entries.iter().map(|p| p.value).collect()
    }

    pub fn free_count(&self) -> usize {
        self.entries.iter().filter(|p| p.vary).count()
    }
}

#[derive(Debug, Clone, Copy)]
enum BoundMap {
    Both { min: f64, max: f64 },
    Lower(f64),
    Upper(f64),
    Free,
}

impl BoundMap {
    fn new(min: f64, max: f64) -> Self {
        match (min.is_finite(), max.is_finite()) {
            (true, true) => Self::Both { min, max },
            (true, false) => Self::Lower(min),
            (false, true) => Self::Upper(max),
            (false, false) => Self::Free,
        }
    }

    fn to_internal(self, v: f64) -> f64 {
        match self {
            Self::Both { min, max } => {
                let t = (2.0 * (v - min) / (max - min) - 1.0).clamp(-1.0, 1.0);
                t.asin()
            }
            Self::Lower(min) => ((v - min + 1.0).powi(2) - 1.0).max(0.0).sqrt(),
            Self::Upper(max) => ((max - v + 1.0).powi(2) - 1.0).max(0.0).sqrt(),
            Self::Free => v,
        }
    }

    fn to_external(self, x: f64) -> f64 {
        match self {
            Self::Both { min, max } => min + (x.sin() + 1.0) * (max - min) / 2.0,
            Self::Lower(min) => min - 1.0 + (x * x + 1.0).sqrt(),
            Self::Upper(max) => max + 1.0 - (x * x + 1.0).sqrt(),
            Self::Free => x,
        }
    }

    /// d(external)/d(internal)
    fn derivative(self, x: f64) -> f64 {
        match self {
            Self::Both { min, max } => (max - min) / 2.0 * x.cos(),
            Self::Lower(_) => x / (x * x + 1.0).sqrt(),
            Self::Upper(_) => -x / (x * x + 1.0).sqrt(),
            Self::Free => 1.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LmConfig {
    /// Cap on residual-function evaluations, Jacobian columns included.
    pub max_evaluations: usize,
    /// Relative chi-square reduction below which the fit has converged.
    pub ftol: f64,
    /// Relative step size below which the fit has converged.
    pub xtol: f64,
    /// Gradient magnitude below which the fit has converged.
    pub gtol: f64,
    pub initial_lambda: f64,
    pub lambda_up: f64,
    pub lambda_down: f64,
    /// Relative forward-difference step of the Jacobian.
    pub diff_step: f64,
}

impl Default for LmConfig {
    fn default() -> Self {
        Self {
            max_evaluations: 2000,
            ftol: 1e-10,
            xtol: 1e-10,
            gtol: 1e-12,
            initial_lambda: 1e-3,
            lambda_up: 10.0,
            lambda_down: 0.1,
            diff_step: 1.49e-8,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LmOutcome {
    pub params: NamedParameters,
    /// Covariance of the varying parameters, in their insertion order.
    pub covariance: Option<Vec<Vec<f64>>>,
    pub chi_square: f64,
    pub reduced_chi_square: f64,
    pub n_data: usize,
    pub n_evaluations: usize,
    pub converged: bool,
    pub message: String,
}

#[derive(Debug, Clone, Default)]
pub struct LevenbergMarquardt {
    pub config: LmConfig,
}

struct Problem<'p, F> {
    residual_fn: F,
    trial: NamedParameters,
    free: &'p [usize],
    maps: &'p [BoundMap],
    n_evaluations: usize,
}

impl<F: FnMut(&NamedParameters) -> Vec<f64>> Problem<'_, F> {
    fn residuals(&mut self, x: &[f64]) -> Vec<f64> {
        for ((&i, map), &xi) in self.free.iter().zip(self.maps).zip(x) {
            self.trial.entries[i].value = map.to_external(xi);
        }
        self.n_evaluations += 1;
        (self.residual_fn)(&self.trial)
    }

    /// Forward-difference Jacobian, stored column by column.
    fn jacobian(&mut self, x: &[f64], r: &[f64], step: f64) -> Vec<Vec<f64>> {
        let mut columns = Vec::with_capacity(x.len());
        let mut xh = x.to_vec();
        for k in 0..x.len() {
            let h = step * x[k].abs().max(1.0);
            xh[k] = x[k] + h;
            let rh = self.residuals(&xh);
            xh[k] = x[k];
            columns.push(rh.iter().zip(r).map(|(a, b)| (a - b) / h).collect());
        }
        columns
    }
}

fn sum_squares(r: &[f64]) -> f64 {
    let s: f64 = r.iter().map(|v| v * v).sum();
    if s.is_finite() { s } else { f64::INFINITY }
}

fn normal_equations(jac: &[Vec<f64>], r: &[f64]) -> (Vec<Vec<f64>>, Vec<f64>) {
    let n = jac.len();
    let mut jtj = vec![vec![0.0; n]; n];
    let mut jtr = vec![0.0; n];
    for a in 0..n {
        jtr[a] = jac[a].iter().zip(r).map(|(j, ri)| j * ri).sum();
        for b in a..n {
            let v: f64 = jac[a].iter().zip(&jac[b]).map(|(x, y)| x * y).sum();
            jtj[a][b] = v;
            jtj[b][a] = v;
        }
    }
    (jtj, jtr)
}

impl LevenbergMarquardt {
    pub fn new(config: LmConfig) -> Self {
        Self { config }
    }

    /// Minimize the sum of squared residuals returned by `residual_fn`.
    ///
    /// `residual_fn` must return vectors of constant length.
    pub fn minimize<F>(&self, params: NamedParameters, residual_fn: F) -> LmOutcome
    where
        F: FnMut(&NamedParameters) -> Vec<f64>,
    {
        let cfg = &self.config;
        let free: Vec<usize> = params
            .entries
            .iter()
            .enumerate()
            .filter(|(_, p)| p.vary)
            .map(|(i, _)| i)
            .collect();
        let maps: Vec<BoundMap> = free
            .iter()
            .map(|&i| BoundMap::new(params.entries[i].min, params.entries[i].max))
            .collect();
        let mut x: Vec<f64> = free
            .iter()
            .zip(&maps)
            .map(|(&i, map)| map.to_internal(params.entries[i].value))
            .collect();

        let mut problem = Problem {
            residual_fn,
            trial: params.clone(),
            free: &free,
            maps: &maps,
            n_evaluations: 0,
        };

        let mut r = problem.residuals(&x);
        let mut chi2 = sum_squares(&r);
        let m = r.len();
        let n = free.len();
        let mut converged = n == 0;
        let mut message = if n == 0 {
            "no varying parameters".to_string()
        } else {
            "maximum number of evaluations reached".to_string()
        };
        let mut lambda = cfg.initial_lambda;

        'outer: while n > 0 && problem.n_evaluations < cfg.max_evaluations {
            let jac = problem.jacobian(&x, &r, cfg.diff_step);
            let (jtj, jtr) = normal_equations(&jac, &r);

            if jtr.iter().all(|g| g.abs() <= cfg.gtol) {
                converged = true;
                message = "gradient below tolerance".into();
                break;
            }

            loop {
                if problem.n_evaluations >= cfg.max_evaluations {
                    break 'outer;
                }
                let mut damped = jtj.clone();
                for (k, row) in damped.iter_mut().enumerate() {
                    row[k] = if jtj[k][k] > 0.0 {
                        jtj[k][k] * (1.0 + lambda)
                    } else {
                        lambda
                    };
                }
                let rhs: Vec<f64> = jtr.iter().map(|g| -g).collect();

                let step = solve(&damped, &rhs);
                let Some(delta) = step else {
                    lambda *= cfg.lambda_up;
                    if lambda > 1e16 {
                        message = "normal equations are singular".into();
                        break 'outer;
                    }
                    continue;
                };

                let x_new: Vec<f64> = x.iter().zip(&delta).map(|(a, d)| a + d).collect();
                let r_new = problem.residuals(&x_new);
                let chi2_new = sum_squares(&r_new);

                if chi2_new < chi2 {
                    let reduction = (chi2 - chi2_new) / chi2.max(f64::MIN_POSITIVE);
                    let x_scale = x.iter().fold(0.0_f64, |s, v| s.max(v.abs()));
                    let step_size = delta.iter().fold(0.0_f64, |s, d| s.max(d.abs()));
                    x = x_new;
                    r = r_new;
                    chi2 = chi2_new;
                    lambda = (lambda * cfg.lambda_down).max(1e-15);

                    if chi2 == 0.0 {
                        converged = true;
                        message = "exact fit".into();
                        break 'outer;
                    }
                    if reduction <= cfg.ftol {
                        converged = true;
                        message = "relative reduction in chi-square below tolerance".into();
                        break 'outer;
                    }
                    if step_size <= cfg.xtol * (x_scale + cfg.xtol) {
                        converged = true;
                        message = "relative step size below tolerance".into();
                        break 'outer;
                    }
                    break;
                }

                lambda *= cfg.lambda_up;
                if lambda > 1e16 {
                    converged = true;
                    message = "chi-square cannot be reduced further".into();
                    break 'outer;
                }
            }
        }

        let mut covariance = None;
        let dof = m.saturating_sub(n).max(1);
        let reduced = chi2 / dof as f64;
        if n > 0 && chi2.is_finite() {
            let jac = problem.jacobian(&x, &r, cfg.diff_step);
            let (jtj, _) = normal_equations(&jac, &r);
            if let Some(inv) = invert(&jtj) {
                let d: Vec<f64> = maps.iter().zip(&x).map(|(map, &xi)| map.derivative(xi)).collect();
                let cov: Vec<Vec<f64>> = (0..n)
                    .map(|a| (0..n).map(|b| inv[a][b] * reduced * d[a] * d[b]).collect())
                    .collect();
                covariance = Some(cov);
            }
        }

        let n_evaluations = problem.n_evaluations;
        let mut out = params;
        for (k, (&i, map)) in free.iter().zip(&maps).enumerate() {
            let p = &mut out.entries[i];
            p.value = map.to_external(x[k]);
            p.stderr = covariance
                .as_ref()
                .map(|c| c[k][k])
                .filter(|v| v.is_finite() && *v >= 0.0)
                .map(f64::sqrt);
        }

        tracing::debug!(
            chi_square = chi2,
            n_evaluations,
            converged,
            "levenberg-marquardt finished: {message}"
        );

        LmOutcome {
            params: out,
            covariance,
            chi_square: chi2,
            reduced_chi_square: reduced,
            n_data: m,
            n_evaluations,
            converged,
            message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bound_map_round_trip() {
        for map in [
            BoundMap::new(-2.0, 5.0),
            BoundMap::new(1.0, f64::INFINITY),
            BoundMap::new(f64::NEG_INFINITY, 3.0),
            BoundMap::new(f64::NEG_INFINITY, f64::INFINITY),
        ] {
            let v = 0.7;
            let x = map.to_internal(v);
            assert!((map.to_external(x) - v).abs() < 1e-12, "{map:?}");
        }
    }

    #[test]
    fn test_fits_exponential_decay() {
        let t: Vec<f64> = (0..40).map(|i| i as f64 * 0.25).collect();
        let y: Vec<f64> = t.iter().map(|t| 3.0 * (-0.8 * t).exp() + 0.5).collect();

        let mut params = NamedParameters::new();
        params
            .add(NamedParameter::new("amp", 1.0, 0.0, 10.0))
            .add(NamedParameter::new("decay", 0.3, 0.01, 5.0))
            .add(NamedParameter::new("offset", 0.0, -1.0, 2.0));

        let lm = LevenbergMarquardt::default();
        let out = lm.minimize(params, |p| {
            let (a, k, c) = (p.values()[0], p.values()[1], p.values()[2]);
            t.iter().zip(&y).map(|(t, y)| y - (a * (-k * t).exp() + c)).collect()
        });

        assert!(out.converged, "{}", out.message);
        assert!((out.params.value("amp").unwrap() - 3.0).abs() < 1e-6);
        assert!((out.params.value("decay").unwrap() - 0.8).abs() < 1e-6);
        assert!((out.params.value("offset").unwrap() - 0.5).abs() < 1e-6);
        assert!(out.chi_square < 1e-12);
    }

    #[test]
    fn test_fixed_parameter_untouched() {
        let mut params = NamedParameters::new();
        params
            .add(NamedParameter::new("a", 0.0, -10.0, 10.0))
            .add(NamedParameter::new("b", 2.0, -10.0, 10.0).fixed());
        let out = LevenbergMarquardt::default().minimize(params, |p| {
            vec![p.values()[0] - 4.0, p.values()[0] + p.values()[1] - 6.0]
        });
        assert_eq!(out.params.value("b"), Some(2.0));
        assert!((out.params.value("a").unwrap() - 4.0).abs() < 1e-6);
        assert!(out.covariance.as_ref().is_some_and(|c| c.len() == 1));
    }

    #[test]
    fn test_solution_respects_box() {
        let mut params = NamedParameters::new();
        params.add(NamedParameter::new("a", 0.5, 0.0, 1.0));
        let out = LevenbergMarquardt::default().minimize(params, |p| vec![p.values()[0] - 3.0]);
        let a = out.params.value("a").unwrap();
        assert!((0.0..=1.0).contains(&a));
        assert!(a > 0.99);
    }
}

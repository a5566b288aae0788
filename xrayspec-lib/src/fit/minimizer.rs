//! Bounded quasi-Newton minimizer for scalar cost functions.
//!
//! Works on positional vectors with parallel name/limit/fixed arrays.
//! Free coordinates are rescaled to the unit box, minimized with a
//! projected BFGS iteration (variables pinned at a bound whose gradient
//! points outward are frozen for the step) and Armijo backtracking.
//! Errors follow the deviance convention: `covariance = 2·H⁻¹`.

use super::linalg::invert;

#[derive(Debug, Clone)]
pub struct BoundedMinimizer {
    pub max_evaluations: usize,
    /// Relative cost change that ends the iteration.
    pub tolerance: f64,
    /// Projected-gradient size (unit-box coordinates) that ends the iteration.
    pub gradient_tolerance: f64,
    /// Finite-difference step in unit-box coordinates.
    pub diff_step: f64,
}

impl Default for BoundedMinimizer {
    fn default() -> Self {
        Self {
            max_evaluations: 2000,
            tolerance: 1e-12,
            gradient_tolerance: 1e-10,
            diff_step: 1e-6,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MinimizerOutcome {
    pub values: Vec<f64>,
    /// Parabolic errors; zero for fixed parameters.
    pub errors: Vec<f64>,
    /// Covariance of the free parameters, in positional order.
    pub covariance: Option<Vec<Vec<f64>>>,
    pub fval: f64,
    pub n_evaluations: usize,
    pub converged: bool,
    pub message: String,
}

struct Scaled<'s, F> {
    fcn: F,
    x: Vec<f64>,
    free: &'s [usize],
    lo: Vec<f64>,
    width: Vec<f64>,
    n_evaluations: usize,
}

impl<F: FnMut(&[f64]) -> f64> Scaled<'_, F> {
    fn external(&self, u: &[f64]) -> Vec<f64> {
        let mut x = self.x.clone();
        for (k, &i) in self.free.iter().enumerate() {
            x[i] = self.lo[k] + u[k] * self.width[k];
        }
        x
    }

    fn eval(&mut self, u: &[f64]) -> f64 {
        let x = self.external(u);
        self.n_evaluations += 1;
        let f = (self.fcn)(&x);
        if f.is_nan() { f64::INFINITY } else { f }
    }

    /// Central differences, one-sided against the box edges.
    fn gradient(&mut self, u: &[f64], h: f64) -> Vec<f64> {
        let mut g = vec![0.0; u.len()];
        let mut trial = u.to_vec();
        for k in 0..u.len() {
            let up = (u[k] + h).min(1.0);
            let down = (u[k] - h).max(0.0);
            trial[k] = up;
            let f_up = self.eval(&trial);
            trial[k] = down;
            let f_down = self.eval(&trial);
            trial[k] = u[k];
            g[k] = (f_up - f_down) / (up - down);
        }
        g
    }

    fn hessian(&mut self, u: &[f64], f0: f64, h: f64) -> Vec<Vec<f64>> {
        let n = u.len();
        let mut hess = vec![vec![0.0; n]; n];
        let mut p = u.to_vec();
        for a in 0..n {
            p[a] = u[a] + h;
            let fp = self.eval(&p);
            p[a] = u[a] - h;
            let fm = self.eval(&p);
            p[a] = u[a];
            hess[a][a] = (fp - 2.0 * f0 + fm) / (h * h);
            for b in (a + 1)..n {
                let mut corners = [0.0; 4];
                for (c, (da, db)) in [(h, h), (h, -h), (-h, h), (-h, -h)].into_iter().enumerate() {
                    let mut q = u.to_vec();
                    q[a] += da;
                    q[b] += db;
                    corners[c] = self.eval(&q);
                }
                let [fpp, fpm, fmp, fmm] = corners;
                let v = (fpp - fpm - fmp + fmm) / (4.0 * h * h);
                hess[a][b] = v;
                hess[b][a] = v;
            }
        }
        hess
    }
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn identity(n: usize, scale: f64) -> Vec<Vec<f64>> {
    (0..n)
        .map(|i| (0..n).map(|j| if i == j { scale } else { 0.0 }).collect())
        .collect()
}

fn mat_vec(m: &[Vec<f64>], v: &[f64]) -> Vec<f64> {
    m.iter().map(|row| dot(row, v)).collect()
}

/// Inverse-Hessian BFGS update.
fn bfgs_update(h: &mut [Vec<f64>], s: &[f64], y: &[f64]) {
    let sy = dot(s, y);
    let rho = 1.0 / sy;
    let hy = mat_vec(h, y);
    let yhy = dot(y, &hy);
    let n = s.len();
    for i in 0..n {
        for j in 0..n {
            h[i][j] += -rho * (hy[i] * s[j] + s[i] * hy[j]) + (rho * rho * yhy + rho) * s[i] * s[j];
        }
    }
}

impl BoundedMinimizer {
    /// Minimize `fcn` starting from `x0`.
    ///
    /// `limits[i]` must be finite with `lo < hi` for every free parameter.
    pub fn minimize<F>(
        &self,
        fcn: F,
        x0: &[f64],
        names: &[String],
        limits: &[(f64, f64)],
        fixed: &[bool],
    ) -> MinimizerOutcome
    where
        F: FnMut(&[f64]) -> f64,
    {
        let free: Vec<usize> = (0..x0.len())
            .filter(|&i| !fixed.get(i).copied().unwrap_or(false))
            .collect();
        let lo: Vec<f64> = free.iter().map(|&i| limits[i].0).collect();
        let width: Vec<f64> = free.iter().map(|&i| limits[i].1 - limits[i].0).collect();
        let mut u: Vec<f64> = free
            .iter()
            .enumerate()
            .map(|(k, &i)| ((x0[i] - lo[k]) / width[k]).clamp(0.0, 1.0))
            .collect();

        let mut s = Scaled {
            fcn,
            x: x0.to_vec(),
            free: &free,
            lo,
            width,
            n_evaluations: 0,
        };
        let n = free.len();
        let h = self.diff_step;

        let mut f = s.eval(&u);
        let mut converged = n == 0;
        let mut message = if n == 0 {
            "no varying parameters".to_string()
        } else {
            "maximum number of evaluations reached".to_string()
        };

        if n > 0 {
            let mut g = s.gradient(&u, h);
            let mut inv_h = identity(n, 1.0);
            let mut fresh = true;

            while s.n_evaluations < self.max_evaluations {
                let active: Vec<bool> = (0..n)
                    .map(|k| (u[k] <= 0.0 && g[k] > 0.0) || (u[k] >= 1.0 && g[k] < 0.0))
                    .collect();
                let pg_norm = (0..n)
                    .filter(|&k| !active[k])
                    .fold(0.0_f64, |m, k| m.max(g[k].abs()));
                if pg_norm <= self.gradient_tolerance {
                    converged = true;
                    message = "projected gradient below tolerance".into();
                    break;
                }

                let mut d: Vec<f64> = mat_vec(&inv_h, &g).iter().map(|v| -v).collect();
                for k in 0..n {
                    if active[k] {
                        d[k] = 0.0;
                    }
                }
                if dot(&d, &g) >= 0.0 {
                    inv_h = identity(n, 1.0);
                    fresh = true;
                    d = (0..n).map(|k| if active[k] { 0.0 } else { -g[k] }).collect();
                }

                let mut t = 1.0;
                let mut accepted = None;
                while t > 1e-14 && s.n_evaluations < self.max_evaluations {
                    let u_t: Vec<f64> = (0..n).map(|k| (u[k] + t * d[k]).clamp(0.0, 1.0)).collect();
                    let f_t = s.eval(&u_t);
                    let step: Vec<f64> = u_t.iter().zip(&u).map(|(a, b)| a - b).collect();
                    if f_t <= f + 1e-4 * dot(&g, &step) && f_t.is_finite() {
                        accepted = Some((u_t, f_t, step));
                        break;
                    }
                    t *= 0.5;
                }

                let Some((u_new, f_new, step)) = accepted else {
                    if !fresh {
                        inv_h = identity(n, 1.0);
                        fresh = true;
                        continue;
                    }
                    converged = s.n_evaluations < self.max_evaluations;
                    if converged {
                        message = "no further decrease along the descent direction".into();
                    }
                    break;
                };

                let g_new = s.gradient(&u_new, h);
                let y: Vec<f64> = g_new.iter().zip(&g).map(|(a, b)| a - b).collect();
                let sy = dot(&step, &y);
                if sy > 1e-12 * dot(&step, &step).sqrt() * dot(&y, &y).sqrt() {
                    if fresh {
                        let scale = sy / dot(&y, &y);
                        inv_h = identity(n, scale);
                    }
                    bfgs_update(&mut inv_h, &step, &y);
                    fresh = false;
                }

                let change = (f - f_new).abs();
                u = u_new;
                g = g_new;
                let f_prev = f;
                f = f_new;
                if change <= self.tolerance * (f_prev.abs() + f.abs() + 1e-300) {
                    converged = true;
                    message = "relative change of the cost below tolerance".into();
                    break;
                }
            }
        }

        let mut covariance = None;
        let mut errors = vec![0.0; x0.len()];
        if n > 0 && f.is_finite() {
            let step = h.sqrt() * 1e-1;
            let hess = s.hessian(&u, f, step);
            if let Some(inv) = invert(&hess) {
                let cov: Vec<Vec<f64>> = (0..n)
                    .map(|a| {
                        (0..n)
                            .map(|b| 2.0 * inv[a][b] * s.width[a] * s.width[b])
                            .collect()
                    })
                    .collect();
                if (0..n).all(|k| cov[k][k].is_finite() && cov[k][k] >= 0.0) {
                    for (k, &i) in free.iter().enumerate() {
                        errors[i] = cov[k][k].sqrt();
                    }
                    covariance = Some(cov);
                }
            }
        }

        let values = s.external(&u);
        let n_evaluations = s.n_evaluations;
        tracing::debug!(
            fval = f,
            n_evaluations,
            converged,
            parameters = ?names,
            "bounded minimizer finished: {message}"
        );

        MinimizerOutcome {
            values,
            errors,
            covariance,
            fval: f,
            n_evaluations,
            converged,
            message,
        }
    }
}

//! Line-shape kernels.
//!
//! Every kernel takes `(grid, center, amplitude, resolution, natural_width)`
//! and yields one value per grid point. The Gaussian and Lorentzian kernels
//! combine resolution and natural width by direct addition; fitted
//! resolutions are calibrated against that convention.

use std::f64::consts::PI;

use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use crate::constants::SQRT_LN2;
use crate::special::{erfc, erfcx, faddeeva};

/// 2·sqrt(2·ln 2), the FWHM of a unit-sigma Gaussian.
const FWHM_PER_SIGMA: f64 = 2.354_820_045_030_949;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ProfileKind {
    #[default]
    Voigt,
    Lorentzian,
    Gaussian,
}

impl ProfileKind {
    /// Add this kernel's contribution for one line into `out`.
    pub fn add_into(
        self,
        grid: &[f64],
        out: &mut [f64],
        center: f64,
        amplitude: f64,
        resolution: f64,
        width: f64,
    ) {
        match self {
            Self::Gaussian => add_gaussian(grid, out, center, amplitude, resolution, width),
            Self::Lorentzian => add_lorentzian(grid, out, center, amplitude, resolution, width),
            Self::Voigt => add_voigt(grid, out, center, amplitude, resolution, width),
        }
    }

    pub fn evaluate(
        self,
        grid: &[f64],
        center: f64,
        amplitude: f64,
        resolution: f64,
        width: f64,
    ) -> Vec<f64> {
        let mut out = vec![0.0; grid.len()];
        self.add_into(grid, &mut out, center, amplitude, resolution, width);
        out
    }
}

/// Area-normalized Gaussian with half width `resolution + width`.
pub fn gaussian(grid: &[f64], center: f64, amplitude: f64, resolution: f64, width: f64) -> Vec<f64> {
    ProfileKind::Gaussian.evaluate(grid, center, amplitude, resolution, width)
}

/// Peak-height Lorentzian with half width `0.5·(resolution + width)`.
pub fn lorentzian(
    grid: &[f64],
    center: f64,
    amplitude: f64,
    resolution: f64,
    width: f64,
) -> Vec<f64> {
    ProfileKind::Lorentzian.evaluate(grid, center, amplitude, resolution, width)
}

/// Area-normalized Voigt profile.
pub fn voigt(grid: &[f64], center: f64, amplitude: f64, resolution: f64, width: f64) -> Vec<f64> {
    ProfileKind::Voigt.evaluate(grid, center, amplitude, resolution, width)
}

fn add_gaussian(grid: &[f64], out: &mut [f64], center: f64, amplitude: f64, res: f64, width: f64) {
    let w = res + width;
    if w <= 0.0 {
        return;
    }
    let norm = amplitude * SQRT_LN2 / (PI.sqrt() * w);
    for (o, &x) in out.iter_mut().zip(grid) {
        let u = (x - center) / w;
        *o += norm * (-u * u * std::f64::consts::LN_2).exp();
    }
}

fn add_lorentzian(
    grid: &[f64],
    out: &mut [f64],
    center: f64,
    amplitude: f64,
    res: f64,
    width: f64,
) {
    let hw = 0.5 * (res + width);
    if hw <= 0.0 {
        return;
    }
    let hw2 = hw * hw;
    for (o, &x) in out.iter_mut().zip(grid) {
        let d = x - center;
        *o += amplitude * hw2 / (d * d + hw2);
    }
}

fn add_voigt(grid: &[f64], out: &mut [f64], center: f64, amplitude: f64, res: f64, width: f64) {
    let sigma = res / (2.0 * std::f64::consts::LN_2).sqrt();
    let gamma = 0.5 * width;
    if sigma <= 0.0 {
        // Pure Lorentzian limit, area-normalized.
        if gamma <= 0.0 {
            return;
        }
        for (o, &x) in out.iter_mut().zip(grid) {
            let d = x - center;
            *o += amplitude * gamma / (PI * (d * d + gamma * gamma));
        }
        return;
    }
    let scale = sigma * std::f64::consts::SQRT_2;
    let norm = amplitude / (sigma * (2.0 * PI).sqrt());
    for (o, &x) in out.iter_mut().zip(grid) {
        let z = Complex64::new((x - center) / scale, gamma / scale);
        *o += norm * faddeeva(z).re;
    }
}

/// Tail shape of the Compton-peak kernel.
///
/// Fractions are tail areas relative to the Gaussian core; slopes are the
/// tail decay lengths in units of the core sigma.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ComptonShape {
    pub low_fraction: f64,
    pub low_slope: f64,
    pub high_fraction: f64,
    pub high_slope: f64,
}

impl Default for ComptonShape {
    fn default() -> Self {
        Self {
            low_fraction: 0.1,
            low_slope: 2.5,
            high_fraction: 0.02,
            high_slope: 1.0,
        }
    }
}

/// Compton-peak kernel with the default tail shape.
pub fn compton_peak(
    grid: &[f64],
    center: f64,
    amplitude: f64,
    resolution: f64,
    width: f64,
) -> Vec<f64> {
    compton_peak_with_shape(grid, center, amplitude, resolution, width, ComptonShape::default())
}

/// Gaussian core plus exponentially-modified Gaussian tails on the low- and
/// high-energy sides. The core FWHM is `resolution + width`.
pub fn compton_peak_with_shape(
    grid: &[f64],
    center: f64,
    amplitude: f64,
    resolution: f64,
    width: f64,
    shape: ComptonShape,
) -> Vec<f64> {
    let mut out = vec![0.0; grid.len()];
    let sigma = (resolution + width) / FWHM_PER_SIGMA;
    if sigma <= 0.0 {
        return out;
    }
    let core = amplitude / (sigma * (2.0 * PI).sqrt());
    for (o, &x) in out.iter_mut().zip(grid) {
        let u = x - center;
        let gauss = (-0.5 * (u / sigma).powi(2)).exp();
        let mut value = core * gauss;
        if shape.low_fraction > 0.0 && shape.low_slope > 0.0 {
            value += amplitude * shape.low_fraction * emg_tail(u, sigma, shape.low_slope);
        }
        if shape.high_fraction > 0.0 && shape.high_slope > 0.0 {
            value += amplitude * shape.high_fraction * emg_tail(-u, sigma, shape.high_slope);
        }
        *o = value;
    }
    out
}

/// Unit-area exponentially-modified Gaussian extending towards negative `u`.
fn emg_tail(u: f64, sigma: f64, slope: f64) -> f64 {
    let pre = 1.0 / (2.0 * slope * sigma);
    let b = u / (std::f64::consts::SQRT_2 * sigma) + 1.0 / (std::f64::consts::SQRT_2 * slope);
    if b >= 0.0 {
        // exp(a)·erfc(b) == exp(-u²/2σ²)·erfcx(b)
        pre * (-0.5 * (u / sigma).powi(2)).exp() * erfcx(b)
    } else {
        let a = u / (slope * sigma) + 0.5 / (slope * slope);
        pre * a.exp() * erfc(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interp::{linspace, trapezoid};

    #[test]
    fn test_empty_grid() {
        assert!(gaussian(&[], 1.0, 1.0, 1.0, 1.0).is_empty());
        assert!(lorentzian(&[], 1.0, 1.0, 1.0, 1.0).is_empty());
        assert!(voigt(&[], 1.0, 1.0, 1.0, 1.0).is_empty());
        assert!(compton_peak(&[], 1.0, 1.0, 1.0, 1.0).is_empty());
    }

    #[test]
    fn test_gaussian_half_maximum_at_combined_width() {
        let res = 0.7;
        let w = 0.3;
        let peak = gaussian(&[100.0], 100.0, 2.0, res, w)[0];
        let half = gaussian(&[101.0], 100.0, 2.0, res, w)[0];
        assert!((half / peak - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_lorentzian_peak_height() {
        let v = lorentzian(&[50.0, 51.0], 50.0, 3.0, 1.0, 1.0);
        assert!((v[0] - 3.0).abs() < 1e-12);
        assert!((v[1] - 1.5).abs() < 1e-12);
    }

    #[test]
    fn test_voigt_zero_resolution_is_lorentzian() {
        let grid = linspace(-5.0, 5.0, 21);
        let v = voigt(&grid, 0.0, 1.0, 0.0, 2.0);
        let expected = 1.0 / PI;
        assert!((v[10] - expected).abs() < 1e-12);
    }

    #[test]
    fn test_compton_peak_area() {
        let grid = linspace(-200.0, 200.0, 40_001);
        let shape = ComptonShape::default();
        let y = compton_peak_with_shape(&grid, 0.0, 5.0, 3.0, 0.0, shape);
        let area = trapezoid(&grid, &y);
        let expected = 5.0 * (1.0 + shape.low_fraction + shape.high_fraction);
        assert!((area - expected).abs() < 1e-3, "area {area}");
        assert!(y.iter().all(|v| v.is_finite() && *v >= 0.0));
    }

    #[test]
    fn test_compton_peak_low_tail_heavier() {
        let grid = [-10.0, 10.0];
        let y = compton_peak(&grid, 0.0, 1.0, 2.0, 0.0);
        assert!(y[0] > y[1]);
    }
}

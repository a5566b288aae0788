//! Faddeeva function and the error functions derived from it.
//!
//! Uses Weideman's rational approximation (SIAM J. Numer. Anal. 31, 1994),
//! whose coefficients are built once on first use.

use std::f64::consts::{PI, SQRT_2};
use std::sync::OnceLock;

use num_complex::Complex64;

const WEIDEMAN_N: usize = 36;

/// 1/sqrt(pi)
const FRAC_1_SQRT_PI: f64 = 0.564_189_583_547_756_3;

struct Weideman {
    l: f64,
    coeffs: Vec<f64>,
}

fn weideman() -> &'static Weideman {
    static TABLE: OnceLock<Weideman> = OnceLock::new();
    TABLE.get_or_init(|| {
        let n = WEIDEMAN_N;
        let m = 2 * n;
        let l = (n as f64 / SQRT_2).sqrt();

        let samples: Vec<(f64, f64)> = (-(m as i64 - 1)..=(m as i64 - 1))
            .map(|k| {
                let theta = k as f64 * PI / m as f64;
                let t = l * (theta / 2.0).tan();
                (k as f64, (-t * t).exp() * (l * l + t * t))
            })
            .collect();

        let coeffs = (1..=n)
            .map(|j| {
                let sum: f64 = samples
                    .iter()
                    .map(|&(k, f)| f * (PI * j as f64 * k / m as f64).cos())
                    .sum();
                sum / (2 * m) as f64
            })
            .collect();

        Weideman { l, coeffs }
    })
}

/// Faddeeva function `w(z) = exp(-z²)·erfc(-iz)`.
pub fn faddeeva(z: Complex64) -> Complex64 {
    if z.im < 0.0 {
        // w(z) = 2·exp(-z²) − w(−z)
        return 2.0 * (-(z * z)).exp() - faddeeva_upper(-z);
    }
    faddeeva_upper(z)
}

fn faddeeva_upper(z: Complex64) -> Complex64 {
    let table = weideman();
    let i = Complex64::new(0.0, 1.0);
    let denom = table.l - i * z;
    let big_z = (table.l + i * z) / denom;

    let mut p = Complex64::new(0.0, 0.0);
    for &a in table.coeffs.iter().rev() {
        p = p * big_z + a;
    }

    2.0 * p / (denom * denom) + FRAC_1_SQRT_PI / denom
}

/// Scaled complementary error function `exp(x²)·erfc(x)`.
pub fn erfcx(x: f64) -> f64 {
    if x >= 0.0 {
        faddeeva_upper(Complex64::new(0.0, x)).re
    } else {
        2.0 * (x * x).exp() - erfcx(-x)
    }
}

/// Complementary error function.
pub fn erfc(x: f64) -> f64 {
    if x >= 0.0 {
        (-x * x).exp() * erfcx(x)
    } else {
        2.0 - erfc(-x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_faddeeva_origin() {
        let w = faddeeva(Complex64::new(0.0, 0.0));
        assert!((w.re - 1.0).abs() < 1e-10);
        assert!(w.im.abs() < 1e-10);
    }

    #[test]
    fn test_faddeeva_real_axis() {
        // Re w(1) = e^-1, Im w(1) = 2/sqrt(pi)·Dawson(1)
        let w = faddeeva(Complex64::new(1.0, 0.0));
        assert!((w.re - 0.367_879_441_171_442_3).abs() < 1e-10);
        assert!((w.im - 0.607_157_705_841_393_7).abs() < 1e-10);
    }

    #[test]
    fn test_faddeeva_lower_half_plane() {
        let z = Complex64::new(0.7, -0.4);
        let w = faddeeva(z);
        let expected = 2.0 * (-(z * z)).exp() - faddeeva(-z);
        assert!((w - expected).norm() < 1e-12);
    }

    #[test]
    fn test_erfc_values() {
        assert!((erfc(0.0) - 1.0).abs() < 1e-10);
        assert!((erfc(1.0) - 0.157_299_207_050_285_1).abs() < 1e-10);
        assert!((erfc(2.0) - 0.004_677_734_981_047_266).abs() < 1e-11);
        assert!((erfc(-1.0) - 1.842_700_792_949_715).abs() < 1e-10);
    }

    #[test]
    fn test_erfcx_large_argument_is_finite() {
        let v = erfcx(30.0);
        // erfcx(x) ~ 1/(x·sqrt(pi)) for large x
        assert!((v - 1.0 / (30.0 * PI.sqrt())).abs() < 1e-4);
        assert!(v.is_finite());
    }
}

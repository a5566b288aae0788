//! Comparison of the rendered curve against an experimental spectrum.

use serde::Serialize;
use xrayspec_data::SpectrumRecord;

use crate::error::{Result, XraySpecError};
use crate::normalize::{Normalization, NormalizationMode};
use crate::spline::CubicSpline;

/// Measured spectrum, sorted by energy, with strictly positive sigmas.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExperimentalSpectrum {
    energy: Vec<f64>,
    intensity: Vec<f64>,
    sigma: Vec<f64>,
}

impl ExperimentalSpectrum {
    /// Without `sigma`, counting statistics are assumed (`sqrt(intensity)`).
    /// Zero or invalid sigmas take the smallest positive sigma, or 1.
    pub fn new(energy: Vec<f64>, intensity: Vec<f64>, sigma: Option<Vec<f64>>) -> Result<Self> {
        if energy.len() != intensity.len() {
            return Err(XraySpecError::InvalidSpectrum(format!(
                "{} energies but {} intensities",
                energy.len(),
                intensity.len()
            )));
        }
        if energy.is_empty() {
            return Err(XraySpecError::InvalidSpectrum("no data points".into()));
        }
        if let Some(i) = energy
            .iter()
            .zip(&intensity)
            .position(|(e, y)| !e.is_finite() || !y.is_finite())
        {
            return Err(XraySpecError::InvalidSpectrum(format!(
                "non-finite value at point {i}"
            )));
        }

        let mut sigma = match sigma {
            Some(s) if s.len() != energy.len() => {
                return Err(XraySpecError::InvalidSpectrum(format!(
                    "{} energies but {} sigmas",
                    energy.len(),
                    s.len()
                )));
            }
            Some(s) => s,
            None => intensity.iter().map(|y| y.max(0.0).sqrt()).collect(),
        };
        let floor = sigma
            .iter()
            .copied()
            .filter(|s| s.is_finite() && *s > 0.0)
            .fold(f64::INFINITY, f64::min);
        let floor = if floor.is_finite() { floor } else { 1.0 };
        for s in &mut sigma {
            if !(s.is_finite() && *s > 0.0) {
                *s = floor;
            }
        }

        let mut order: Vec<usize> = (0..energy.len()).collect();
        order.sort_by(|&a, &b| energy[a].total_cmp(&energy[b]));
        Ok(Self {
            energy: order.iter().map(|&i| energy[i]).collect(),
            intensity: order.iter().map(|&i| intensity[i]).collect(),
            sigma: order.iter().map(|&i| sigma[i]).collect(),
        })
    }

    pub fn from_record(record: &SpectrumRecord) -> Result<Self> {
        Self::new(
            record.energy.clone(),
            record.intensity.clone(),
            record.sigma.clone(),
        )
    }

    pub fn len(&self) -> usize {
        self.energy.len()
    }

    pub fn is_empty(&self) -> bool {
        self.energy.is_empty()
    }

    pub fn energy(&self) -> &[f64] {
        &self.energy
    }

    pub fn intensity(&self) -> &[f64] {
        &self.intensity
    }

    pub fn sigma(&self) -> &[f64] {
        &self.sigma
    }

    pub fn span(&self) -> (f64, f64) {
        (self.energy[0], self.energy[self.energy.len() - 1])
    }

    pub fn max_intensity(&self) -> f64 {
        self.intensity.iter().copied().fold(f64::NEG_INFINITY, f64::max)
    }

    pub fn min_intensity(&self) -> f64 {
        self.intensity.iter().copied().fold(f64::INFINITY, f64::min)
    }

    /// Divisor applied to intensities and sigmas in `mode`.
    pub(crate) fn unit(&self, mode: NormalizationMode) -> f64 {
        let max = self.max_intensity();
        if mode == NormalizationMode::Unity && max.is_finite() && max > 0.0 {
            max
        } else {
            1.0
        }
    }
}

/// Experimental points next to the interpolated curve.
///
/// `simulated[i]` is `None` for points outside the grid.
pub(crate) struct Comparison {
    pub observed: Vec<f64>,
    pub sigma: Vec<f64>,
    pub simulated: Vec<Option<f64>>,
}

pub(crate) fn compare(
    exp: &ExperimentalSpectrum,
    grid: &[f64],
    curve: &[f64],
    mode: NormalizationMode,
) -> Comparison {
    let unit = exp.unit(mode);
    let spline = CubicSpline::new(grid, curve);
    let domain = spline.domain();
    let simulated = exp
        .energy
        .iter()
        .map(|&x| match domain {
            Some((lo, hi)) if lo < hi && x >= lo && x <= hi => Some(spline.eval(x)),
            _ => None,
        })
        .collect();
    Comparison {
        observed: exp.intensity.iter().map(|y| y / unit).collect(),
        sigma: exp.sigma.iter().map(|s| s / unit).collect(),
        simulated,
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Residues {
    pub energy: Vec<f64>,
    pub experimental: Vec<f64>,
    pub simulated: Vec<f64>,
    /// `experimental − simulated`
    pub residuals: Vec<f64>,
    pub sigma: Vec<f64>,
    pub chi_square: f64,
    pub reduced_chi_square: f64,
    pub n_fit_params: usize,
}

/// Interpolate `total·scale + y_offset` onto the experimental points that
/// fall inside the grid and compute chi-square.
pub fn calculate_residues(
    exp: &ExperimentalSpectrum,
    grid: &[f64],
    total: &[f64],
    normalization: &Normalization,
    n_fit_params: usize,
) -> Residues {
    let curve = normalization.apply(total);
    let cmp = compare(exp, grid, &curve, normalization.mode);

    let mut out = Residues {
        n_fit_params,
        ..Residues::default()
    };
    for (i, sim) in cmp.simulated.iter().enumerate() {
        let Some(sim) = *sim else { continue };
        let r = cmp.observed[i] - sim;
        out.energy.push(exp.energy[i]);
        out.experimental.push(cmp.observed[i]);
        out.simulated.push(sim);
        out.residuals.push(r);
        out.sigma.push(cmp.sigma[i]);
        out.chi_square += (r / cmp.sigma[i]).powi(2);
    }

    let dof = out.residuals.len().saturating_sub(n_fit_params).max(1);
    out.reduced_chi_square = out.chi_square / dof as f64;
    out
}

use xrayspec_data::EfficiencyRecord;

use crate::error::{Result, XraySpecError};
use crate::interp::interp_one;

/// Detector efficiency curve, stored as fractions in `[0, 1]`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EfficiencyTable {
    energy: Vec<f64>,
    fraction: Vec<f64>,
}

impl EfficiencyTable {
    /// Build from energies (eV) and efficiencies in percent.
    pub fn new(energy: &[f64], efficiency_percent: &[f64]) -> Result<Self> {
        if energy.len() != efficiency_percent.len() {
            return Err(XraySpecError::InvalidSpectrum(format!(
                "efficiency table has {} energies but {} values",
                energy.len(),
                efficiency_percent.len()
            )));
        }
        let mut pairs: Vec<(f64, f64)> = energy
            .iter()
            .zip(efficiency_percent)
            .filter(|(e, p)| e.is_finite() && p.is_finite())
            .map(|(&e, &p)| (e, (p / 100.0).clamp(0.0, 1.0)))
            .collect();
        pairs.sort_by(|a, b| a.0.total_cmp(&b.0));
        let (energy, fraction) = pairs.into_iter().unzip();
        Ok(Self { energy, fraction })
    }

    pub fn from_record(record: &EfficiencyRecord) -> Result<Self> {
        Self::new(&record.energy, &record.efficiency_percent)
    }

    pub fn is_empty(&self) -> bool {
        self.energy.is_empty()
    }

    /// Efficiency at `x`, clamped to the table edges.
    pub fn at(&self, x: f64) -> f64 {
        if self.is_empty() {
            return 1.0;
        }
        interp_one(x, &self.energy, &self.fraction)
    }

    /// Multiply `values` in place by the efficiency at `grid + shift`.
    pub fn apply(&self, grid: &[f64], shift: f64, values: &mut [f64]) {
        if self.is_empty() {
            return;
        }
        for (v, &x) in values.iter_mut().zip(grid) {
            *v *= self.at(x + shift);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent_to_fraction_and_clamp() {
        let t = EfficiencyTable::new(&[100.0, 200.0], &[50.0, 150.0]).unwrap();
        assert!((t.at(100.0) - 0.5).abs() < 1e-15);
        assert!((t.at(200.0) - 1.0).abs() < 1e-15);
        assert!((t.at(150.0) - 0.75).abs() < 1e-15);
    }

    #[test]
    fn test_out_of_range_takes_nearest() {
        let t = EfficiencyTable::new(&[200.0, 100.0], &[20.0, 10.0]).unwrap();
        assert!((t.at(0.0) - 0.1).abs() < 1e-15);
        assert!((t.at(1e6) - 0.2).abs() < 1e-15);
    }

    #[test]
    fn test_empty_table_passes_through() {
        let t = EfficiencyTable::new(&[], &[]).unwrap();
        let mut v = vec![1.0, 2.0];
        t.apply(&[1.0, 2.0], 0.0, &mut v);
        assert_eq!(v, vec![1.0, 2.0]);
    }

    #[test]
    fn test_length_mismatch() {
        assert!(EfficiencyTable::new(&[1.0], &[]).is_err());
    }
}

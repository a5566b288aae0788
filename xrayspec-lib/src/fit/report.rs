//! Human-readable fit summary in the familiar lmfit layout.

use std::fmt::{self, Write};

use serde::Serialize;

use crate::residuals::Residues;

use super::FitResult;

/// Correlations below this magnitude are left out of the report.
const MIN_CORRELATION: f64 = 0.1;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FitReport {
    pub text: String,
}

impl fmt::Display for FitReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl FitReport {
    pub fn render(result: &FitResult, residues: Option<&Residues>) -> Self {
        let mut text = String::new();
        // Writing into a String cannot fail.
        let _ = write_report(&mut text, result, residues);
        Self { text }
    }
}

fn write_report(out: &mut String, result: &FitResult, residues: Option<&Residues>) -> fmt::Result {
    let (aic, bic) = result.information_criteria();
    let cost_name = if result.method == "likelihood" {
        "deviance"
    } else {
        "chi-square"
    };

    writeln!(out, "[[Fit Statistics]]")?;
    writeln!(out, "    # fitting method   = {}", result.method)?;
    writeln!(out, "    # function evals   = {}", result.n_evaluations)?;
    writeln!(out, "    # data points      = {}", result.n_data)?;
    writeln!(out, "    # variables        = {}", result.n_varying())?;
    writeln!(out, "    {:<19}= {:.6e}", cost_name, result.cost)?;
    writeln!(out, "    {:<19}= {:.6e}", format!("reduced {cost_name}"), result.reduced_cost())?;
    writeln!(out, "    Akaike info crit   = {aic:.5}")?;
    writeln!(out, "    Bayesian info crit = {bic:.5}")?;
    if let Some(r) = residues {
        writeln!(out, "    spectrum chi-sqr   = {:.6e}", r.reduced_chi_square)?;
    }
    if !result.converged {
        writeln!(out, "##  Warning: fit did not converge ({})", result.message)?;
    }

    writeln!(out, "[[Variables]]")?;
    let width = result
        .parameters
        .iter()
        .map(|p| p.label.len())
        .max()
        .unwrap_or(0)
        + 1;
    for p in result.parameters.iter() {
        let name = format!("{}:", p.label);
        if !p.vary {
            writeln!(out, "    {name:<width$} {:.7} (fixed)", p.value)?;
            continue;
        }
        match p.stderr {
            Some(err) if p.value != 0.0 => writeln!(
                out,
                "    {name:<width$} {:.7} +/- {:.7} ({:.2}%) (init = {:.7})",
                p.value,
                err,
                (err / p.value).abs() * 100.0,
                p.init
            )?,
            Some(err) => writeln!(
                out,
                "    {name:<width$} {:.7} +/- {:.7} (init = {:.7})",
                p.value,
                err,
                p.init
            )?,
            None => writeln!(
                out,
                "    {name:<width$} {:.7} (init = {:.7})",
                p.value,
                p.init
            )?,
        }
    }

    if let Some(corr) = result.correlation() {
        let labels = result.parameters.free_labels();
        let mut pairs: Vec<(f64, &str, &str)> = Vec::new();
        for i in 0..labels.len() {
            for j in (i + 1)..labels.len() {
                let c = corr[i][j];
                if c.abs() >= MIN_CORRELATION {
                    pairs.push((c, &labels[i], &labels[j]));
                }
            }
        }
        if !pairs.is_empty() {
            pairs.sort_by(|a, b| b.0.abs().total_cmp(&a.0.abs()));
            writeln!(
                out,
                "[[Correlations]] (unreported correlations are < {MIN_CORRELATION:.3})"
            )?;
            for (c, a, b) in pairs {
                writeln!(out, "    C({a}, {b}) = {c:+.4}")?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fit::{ParamName, Parameter, ParameterSet};

    fn result() -> FitResult {
        let mut params = ParameterSet::default();
        let mut a = Parameter::new(ParamName::EnergyOffset, "energy_offset", 0.5, -5.0, 5.0);
        a.stderr = Some(0.01);
        params.push(a);
        params.push(Parameter::new(ParamName::Resolution, "resolution", 1.0, 0.01, 4.0));
        params.push(Parameter::new(ParamName::YOffset, "y_offset", 0.0, -1.0, 1.0).fixed());
        FitResult {
            method: "least_squares",
            parameters: params,
            covariance: Some(vec![vec![1e-4, -0.5e-4], vec![-0.5e-4, 1e-4]]),
            cost: 12.0,
            n_data: 100,
            n_evaluations: 42,
            converged: true,
            message: "ok".into(),
        }
    }

    #[test]
    fn test_report_sections() {
        let report = FitReport::render(&result(), None);
        let text = report.to_string();
        assert!(text.contains("[[Fit Statistics]]"));
        assert!(text.contains("# variables        = 2"));
        assert!(text.contains("energy_offset:"));
        assert!(text.contains("+/- 0.0100000"));
        assert!(text.contains("(fixed)"));
        assert!(text.contains("C(energy_offset, resolution) = -0.5000"));
    }
}

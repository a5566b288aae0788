//! Whitespace-column readers for the plain-text inputs.
//!
//! Lines starting with `#` and blank lines are skipped everywhere.

use anyhow::{Context, Result, bail};
use xrayspec_data::{
    EfficiencyRecord, RateDatabase, RateRecord, RecordCategory, ShakeProbabilityRecord,
    SpectrumRecord,
};

fn data_lines(text: &str) -> impl Iterator<Item = (usize, &str)> {
    text.lines()
        .enumerate()
        .map(|(i, l)| (i + 1, l.trim()))
        .filter(|(_, l)| !l.is_empty() && !l.starts_with('#'))
}

fn number(field: &str, line: usize, what: &str) -> Result<f64> {
    field
        .parse()
        .with_context(|| format!("line {line}: bad {what} {field:?}"))
}

fn optional(field: &str) -> Option<String> {
    (field != "-").then(|| field.to_string())
}

/// Parse a rate file into a database for `symbol`.
///
/// Row layout, one per line:
///
/// ```text
/// D|SO|SU|A  initial final auger spectator  jj_i jj_f  energy intensity width  [charge]
/// P  shell shake_off shake_up
/// ```
///
/// `-` marks an absent shell or charge tag.
pub fn parse_rates(text: &str, symbol: &str, atomic_number: u16) -> Result<RateDatabase> {
    let mut records = Vec::new();
    let mut shake_probabilities = Vec::new();

    for (n, line) in data_lines(text) {
        let cols: Vec<&str> = line.split_whitespace().collect();
        if cols[0] == "P" {
            if cols.len() != 4 {
                bail!("line {n}: expected `P shell shake_off shake_up`");
            }
            shake_probabilities.push(ShakeProbabilityRecord {
                shell: cols[1].to_string(),
                shake_off: number(cols[2], n, "shake-off probability")?,
                shake_up: number(cols[3], n, "shake-up probability")?,
            });
            continue;
        }

        let category = match cols[0] {
            "D" => RecordCategory::Diagram,
            "SO" => RecordCategory::ShakeOff,
            "SU" => RecordCategory::ShakeUp,
            "A" => RecordCategory::Auger,
            other => bail!("line {n}: unknown row kind {other:?}"),
        };
        if !(10..=11).contains(&cols.len()) {
            bail!("line {n}: expected 10 or 11 columns, found {}", cols.len());
        }
        records.push(RateRecord {
            category,
            initial_shell: cols[1].to_string(),
            final_shell: cols[2].to_string(),
            auger_shell: optional(cols[3]),
            spectator_shell: optional(cols[4]),
            jj_initial: number(cols[5], n, "initial 2J+1")?,
            jj_final: number(cols[6], n, "final 2J+1")?,
            energy: number(cols[7], n, "energy")?,
            intensity: number(cols[8], n, "intensity")?,
            width: number(cols[9], n, "width")?,
            charge_state: cols.get(10).and_then(|c| optional(c)),
        });
    }

    if records.is_empty() {
        bail!("no rate rows found");
    }
    Ok(RateDatabase {
        atomic_number,
        symbol: symbol.to_string(),
        records,
        shake_probabilities,
    })
}

/// Two or three columns: energy, intensity and an optional uncertainty.
pub fn parse_spectrum(text: &str) -> Result<SpectrumRecord> {
    let mut energy = Vec::new();
    let mut intensity = Vec::new();
    let mut sigma = Vec::new();
    let mut columns = None;

    for (n, line) in data_lines(text) {
        let cols: Vec<&str> = line.split_whitespace().collect();
        let width = *columns.get_or_insert(cols.len());
        if cols.len() != width || !(2..=3).contains(&width) {
            bail!("line {n}: expected 2 or 3 columns consistently, found {}", cols.len());
        }
        energy.push(number(cols[0], n, "energy")?);
        intensity.push(number(cols[1], n, "intensity")?);
        if width == 3 {
            sigma.push(number(cols[2], n, "uncertainty")?);
        }
    }

    if energy.is_empty() {
        bail!("spectrum has no data rows");
    }
    Ok(SpectrumRecord {
        energy,
        intensity,
        sigma: (columns == Some(3)).then_some(sigma),
    })
}

/// Two columns: energy and detector efficiency in percent.
pub fn parse_efficiency(text: &str) -> Result<EfficiencyRecord> {
    let mut energy = Vec::new();
    let mut efficiency_percent = Vec::new();
    for (n, line) in data_lines(text) {
        let cols: Vec<&str> = line.split_whitespace().collect();
        if cols.len() != 2 {
            bail!("line {n}: expected 2 columns, found {}", cols.len());
        }
        energy.push(number(cols[0], n, "energy")?);
        efficiency_percent.push(number(cols[1], n, "efficiency")?);
    }
    if energy.is_empty() {
        bail!("efficiency table has no data rows");
    }
    Ok(EfficiencyRecord {
        energy,
        efficiency_percent,
    })
}

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use xrayspec_data::{RateRecord, RecordCategory};

use crate::error::{Result, XraySpecError};

/// Atomic subshell in IUPAC notation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Shell {
    K,
    L1,
    L2,
    L3,
    M1,
    M2,
    M3,
    M4,
    M5,
    N1,
    N2,
    N3,
    N4,
    N5,
    N6,
    N7,
    O1,
    O2,
    O3,
    O4,
    O5,
    O6,
    O7,
    P1,
    P2,
    P3,
    Q1,
}

const SHELLS: [(Shell, &str); 27] = [
    (Shell::K, "K"),
    (Shell::L1, "L1"),
    (Shell::L2, "L2"),
    (Shell::L3, "L3"),
    (Shell::M1, "M1"),
    (Shell::M2, "M2"),
    (Shell::M3, "M3"),
    (Shell::M4, "M4"),
    (Shell::M5, "M5"),
    (Shell::N1, "N1"),
    (Shell::N2, "N2"),
    (Shell::N3, "N3"),
    (Shell::N4, "N4"),
    (Shell::N5, "N5"),
    (Shell::N6, "N6"),
    (Shell::N7, "N7"),
    (Shell::O1, "O1"),
    (Shell::O2, "O2"),
    (Shell::O3, "O3"),
    (Shell::O4, "O4"),
    (Shell::O5, "O5"),
    (Shell::O6, "O6"),
    (Shell::O7, "O7"),
    (Shell::P1, "P1"),
    (Shell::P2, "P2"),
    (Shell::P3, "P3"),
    (Shell::Q1, "Q1"),
];

impl Shell {
    pub fn as_str(self) -> &'static str {
        SHELLS
            .iter()
            .find(|(s, _)| *s == self)
            .map(|(_, label)| *label)
            .unwrap_or("?")
    }
}

impl fmt::Display for Shell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Shell {
    type Err = XraySpecError;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        SHELLS
            .iter()
            .find(|(_, label)| label.eq_ignore_ascii_case(trimmed))
            .map(|(shell, _)| *shell)
            .ok_or_else(|| XraySpecError::UnknownShell(s.to_string()))
    }
}

/// A transition identified by its vacancy shells.
///
/// Radiative transitions move the vacancy from `low_level` to `high_level`;
/// Auger transitions additionally eject an electron from `auger_level`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TransitionKind {
    pub low_level: Shell,
    pub high_level: Shell,
    pub auger_level: Option<Shell>,
}

/// Siegbahn names of the common diagram lines.
const SIEGBAHN: [(&str, &str, Shell, Shell); 17] = [
    ("Kα1", "Ka1", Shell::K, Shell::L3),
    ("Kα2", "Ka2", Shell::K, Shell::L2),
    ("Kα3", "Ka3", Shell::K, Shell::L1),
    ("Kβ1", "Kb1", Shell::K, Shell::M3),
    ("Kβ3", "Kb3", Shell::K, Shell::M2),
    ("Kβ5", "Kb5", Shell::K, Shell::M5),
    ("Kβ2", "Kb2", Shell::K, Shell::N3),
    ("Lα1", "La1", Shell::L3, Shell::M5),
    ("Lα2", "La2", Shell::L3, Shell::M4),
    ("Lβ1", "Lb1", Shell::L2, Shell::M4),
    ("Lβ2", "Lb2", Shell::L3, Shell::N5),
    ("Lγ1", "Lg1", Shell::L2, Shell::N4),
    ("Ll", "Ll", Shell::L3, Shell::M1),
    ("Lη", "Ln", Shell::L2, Shell::M1),
    ("Mα1", "Ma1", Shell::M5, Shell::N7),
    ("Mα2", "Ma2", Shell::M5, Shell::N6),
    ("Mβ", "Mb", Shell::M4, Shell::N6),
];

impl TransitionKind {
    pub fn radiative(low_level: Shell, high_level: Shell) -> Self {
        Self {
            low_level,
            high_level,
            auger_level: None,
        }
    }

    pub fn auger(low_level: Shell, high_level: Shell, auger_level: Shell) -> Self {
        Self {
            low_level,
            high_level,
            auger_level: Some(auger_level),
        }
    }

    pub fn is_auger(&self) -> bool {
        self.auger_level.is_some()
    }

    /// Concatenated IUPAC label, e.g. `KL3` or `KL1L1`.
    pub fn iupac_label(&self) -> String {
        match self.auger_level {
            Some(a) => format!("{}{}{}", self.low_level, self.high_level, a),
            None => format!("{}{}", self.low_level, self.high_level),
        }
    }

    pub fn siegbahn_label(&self) -> Option<&'static str> {
        if self.is_auger() {
            return None;
        }
        SIEGBAHN
            .iter()
            .find(|(_, _, low, high)| *low == self.low_level && *high == self.high_level)
            .map(|(name, _, _, _)| *name)
    }

    /// Siegbahn name when one exists, IUPAC otherwise.
    pub fn label(&self) -> String {
        self.siegbahn_label()
            .map(str::to_string)
            .unwrap_or_else(|| self.iupac_label())
    }
}

impl fmt::Display for TransitionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

impl FromStr for TransitionKind {
    type Err = XraySpecError;

    /// Accepts Siegbahn names (`Kα1`, `Ka1`) and IUPAC shell sequences
    /// (`KL3`, `K-L3`, `KL1L1`).
    fn from_str(s: &str) -> Result<Self> {
        let label = s.trim();
        if let Some((_, _, low, high)) = SIEGBAHN
            .iter()
            .find(|(greek, ascii, _, _)| *greek == label || ascii.eq_ignore_ascii_case(label))
        {
            return Ok(Self::radiative(*low, *high));
        }

        let shells = split_shells(label)
            .ok_or_else(|| XraySpecError::UnknownTransition(s.to_string()))?;
        match shells.as_slice() {
            [low, high] => Ok(Self::radiative(*low, *high)),
            [low, high, auger] => Ok(Self::auger(*low, *high, *auger)),
            _ => Err(XraySpecError::UnknownTransition(s.to_string())),
        }
    }
}

fn split_shells(label: &str) -> Option<Vec<Shell>> {
    let compact: String = label.chars().filter(|c| *c != '-' && *c != ' ').collect();
    let mut shells = Vec::new();
    let mut chars = compact.char_indices().peekable();
    while let Some((start, c)) = chars.next() {
        if !c.is_ascii_alphabetic() {
            return None;
        }
        let mut end = start + c.len_utf8();
        while let Some(&(i, d)) = chars.peek() {
            if !d.is_ascii_digit() {
                break;
            }
            end = i + d.len_utf8();
            chars.next();
        }
        shells.push(compact[start..end].parse().ok()?);
    }
    Some(shells)
}

/// Which family of lines a rate row belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LineCategory {
    Diagram,
    ShakeOff,
    ShakeUp,
    Auger,
}

impl LineCategory {
    pub fn is_satellite(self) -> bool {
        matches!(self, Self::ShakeOff | Self::ShakeUp)
    }
}

impl From<RecordCategory> for LineCategory {
    fn from(c: RecordCategory) -> Self {
        match c {
            RecordCategory::Diagram => Self::Diagram,
            RecordCategory::ShakeOff => Self::ShakeOff,
            RecordCategory::ShakeUp => Self::ShakeUp,
            RecordCategory::Auger => Self::Auger,
        }
    }
}

/// What the user asked to simulate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TransitionCategory {
    #[default]
    Diagram,
    Satellites,
    DiagramSatellites,
    Auger,
}

impl TransitionCategory {
    pub fn includes_diagram(self) -> bool {
        matches!(self, Self::Diagram | Self::DiagramSatellites)
    }

    pub fn includes_satellites(self) -> bool {
        matches!(self, Self::Satellites | Self::DiagramSatellites)
    }

    pub fn is_auger(self) -> bool {
        self == Self::Auger
    }
}

/// One typed rate-table row.
#[derive(Debug, Clone, PartialEq)]
pub struct RateLine {
    pub kind: TransitionKind,
    pub spectator: Option<Shell>,
    pub category: LineCategory,
    pub jj_initial: f64,
    pub jj_final: f64,
    pub energy: f64,
    pub intensity: f64,
    pub width: f64,
    pub charge_state: Option<String>,
}

impl RateLine {
    /// Parse and validate one serialized row; `index` is only used in errors.
    pub fn from_record(index: usize, record: &RateRecord) -> Result<Self> {
        let invalid = |reason: String| XraySpecError::InvalidRecord { index, reason };

        let low: Shell = record.initial_shell.parse()?;
        let high: Shell = record.final_shell.parse()?;
        let auger = record
            .auger_shell
            .as_deref()
            .map(str::parse::<Shell>)
            .transpose()?;
        let spectator = record
            .spectator_shell
            .as_deref()
            .map(str::parse::<Shell>)
            .transpose()?;
        let category = LineCategory::from(record.category);

        if category == LineCategory::Auger && auger.is_none() {
            return Err(invalid("Auger row without an ejected-electron shell".into()));
        }
        if category.is_satellite() && spectator.is_none() {
            return Err(invalid("satellite row without a spectator shell".into()));
        }
        if !(record.energy.is_finite() && record.energy >= 0.0) {
            return Err(invalid(format!("energy {} is not a non-negative number", record.energy)));
        }
        if !(record.width.is_finite() && record.width >= 0.0) {
            return Err(invalid(format!("width {} is not a non-negative number", record.width)));
        }
        if !record.intensity.is_finite() {
            return Err(invalid(format!("intensity {} is not finite", record.intensity)));
        }

        let kind = match auger {
            Some(a) if category == LineCategory::Auger => TransitionKind::auger(low, high, a),
            _ => TransitionKind::radiative(low, high),
        };

        Ok(Self {
            kind,
            spectator,
            category,
            jj_initial: record.jj_initial,
            jj_final: record.jj_final,
            energy: record.energy,
            intensity: record.intensity,
            width: record.width,
            charge_state: record.charge_state.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_siegbahn() {
        let ka1: TransitionKind = "Kα1".parse().unwrap();
        assert_eq!(ka1, TransitionKind::radiative(Shell::K, Shell::L3));
        let ascii: TransitionKind = "ka1".parse().unwrap();
        assert_eq!(ascii, ka1);
        assert_eq!(ka1.label(), "Kα1");
    }

    #[test]
    fn test_parse_iupac() {
        let kb: TransitionKind = "K-M3".parse().unwrap();
        assert_eq!(kb.iupac_label(), "KM3");
        assert_eq!(kb.siegbahn_label(), Some("Kβ1"));

        let auger: TransitionKind = "KL1L1".parse().unwrap();
        assert_eq!(auger, TransitionKind::auger(Shell::K, Shell::L1, Shell::L1));
        assert_eq!(auger.label(), "KL1L1");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(
            "Kx9".parse::<TransitionKind>(),
            Err(XraySpecError::UnknownTransition(_))
        ));
        assert!("K".parse::<TransitionKind>().is_err());
        assert!(matches!("Z9".parse::<Shell>(), Err(XraySpecError::UnknownShell(_))));
    }

    #[test]
    fn test_rate_line_validation() {
        let record = RateRecord {
            category: RecordCategory::ShakeOff,
            initial_shell: "K".into(),
            final_shell: "L3".into(),
            auger_shell: None,
            spectator_shell: None,
            jj_initial: 1.0,
            jj_final: 3.0,
            energy: 6420.0,
            intensity: 0.1,
            width: 2.0,
            charge_state: None,
        };
        assert!(matches!(
            RateLine::from_record(4, &record),
            Err(XraySpecError::InvalidRecord { index: 4, .. })
        ));

        let ok = RateRecord {
            spectator_shell: Some("L1".into()),
            ..record
        };
        let line = RateLine::from_record(0, &ok).unwrap();
        assert_eq!(line.spectator, Some(Shell::L1));
        assert_eq!(line.category, LineCategory::ShakeOff);
    }
}

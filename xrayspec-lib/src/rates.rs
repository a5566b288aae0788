use std::collections::BTreeMap;

use xrayspec_data::RateDatabase;

use crate::error::{Result, XraySpecError};
use crate::transitions::{LineCategory, RateLine, Shell, TransitionKind};

/// Shake-off and shake-up branching fractions of one spectator shell.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ShakeProbability {
    pub shake_off: f64,
    pub shake_up: f64,
}

/// Typed, validated rate table of one element.
#[derive(Debug, Clone, Default)]
pub struct RateTable {
    pub symbol: String,
    pub atomic_number: u16,
    lines: Vec<RateLine>,
    shake: BTreeMap<Shell, ShakeProbability>,
}

impl RateTable {
    pub fn new(symbol: impl Into<String>, atomic_number: u16, lines: Vec<RateLine>) -> Self {
        Self {
            symbol: symbol.into(),
            atomic_number,
            lines,
            shake: BTreeMap::new(),
        }
    }

    pub fn with_shake_probability(mut self, shell: Shell, shake_off: f64, shake_up: f64) -> Self {
        self.shake.insert(shell, ShakeProbability { shake_off, shake_up });
        self
    }

    /// Parse and validate a serialized database.
    pub fn from_database(db: &RateDatabase) -> Result<Self> {
        let lines = db
            .records
            .iter()
            .enumerate()
            .map(|(i, r)| RateLine::from_record(i, r))
            .collect::<Result<Vec<_>>>()?;

        let mut shake = BTreeMap::new();
        for p in &db.shake_probabilities {
            let shell: Shell = p.shell.parse()?;
            shake.insert(
                shell,
                ShakeProbability {
                    shake_off: p.shake_off,
                    shake_up: p.shake_up,
                },
            );
        }

        Ok(Self {
            symbol: db.symbol.clone(),
            atomic_number: db.atomic_number,
            lines,
            shake,
        })
    }

    /// Decode a zstd-compressed postcard blob as written by `xrayspec pack`.
    pub fn from_compressed(bytes: &[u8]) -> Result<Self> {
        let db = decode_database(bytes)?;
        Self::from_database(&db)
    }

    pub fn lines(&self) -> &[RateLine] {
        &self.lines
    }

    /// Rows of the given category belonging to `kind`.
    pub fn rows<'a>(
        &'a self,
        kind: &'a TransitionKind,
        category: LineCategory,
    ) -> impl Iterator<Item = &'a RateLine> + 'a {
        self.lines
            .iter()
            .filter(move |l| l.category == category && l.kind == *kind)
    }

    pub fn shake_probability(&self, shell: Shell) -> Option<ShakeProbability> {
        self.shake.get(&shell).copied()
    }
}

pub fn decode_database(bytes: &[u8]) -> Result<RateDatabase> {
    let mut decoder = ruzstd::decoding::StreamingDecoder::new(bytes)
        .map_err(|e| XraySpecError::DataError(format!("zstd header: {e}")))?;
    let mut decompressed = Vec::new();
    std::io::Read::read_to_end(&mut decoder, &mut decompressed)?;

    postcard::from_bytes(&decompressed)
        .map_err(|e| XraySpecError::DataError(format!("postcard: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use xrayspec_data::{RateRecord, RecordCategory, ShakeProbabilityRecord};

    fn record(category: RecordCategory, spectator: Option<&str>, energy: f64) -> RateRecord {
        RateRecord {
            category,
            initial_shell: "K".into(),
            final_shell: "L3".into(),
            auger_shell: None,
            spectator_shell: spectator.map(str::to_string),
            jj_initial: 1.0,
            jj_final: 3.0,
            energy,
            intensity: 1.0,
            width: 1.0,
            charge_state: None,
        }
    }

    #[test]
    fn test_from_database_filters_rows() {
        let db = RateDatabase {
            atomic_number: 26,
            symbol: "Fe".into(),
            records: vec![
                record(RecordCategory::Diagram, None, 6404.0),
                record(RecordCategory::ShakeOff, Some("L1"), 6420.0),
                record(RecordCategory::ShakeUp, Some("M1"), 6410.0),
            ],
            shake_probabilities: vec![ShakeProbabilityRecord {
                shell: "L1".into(),
                shake_off: 0.02,
                shake_up: 0.01,
            }],
        };
        let table = RateTable::from_database(&db).unwrap();
        let ka1 = TransitionKind::radiative(Shell::K, Shell::L3);
        assert_eq!(table.rows(&ka1, LineCategory::Diagram).count(), 1);
        assert_eq!(table.rows(&ka1, LineCategory::ShakeOff).count(), 1);
        assert_eq!(
            table.shake_probability(Shell::L1),
            Some(ShakeProbability {
                shake_off: 0.02,
                shake_up: 0.01
            })
        );
        assert!(table.shake_probability(Shell::M1).is_none());
    }

    #[test]
    fn test_rejects_bad_shell() {
        let mut bad = record(RecordCategory::Diagram, None, 1.0);
        bad.final_shell = "X7".into();
        let db = RateDatabase {
            atomic_number: 1,
            symbol: "H".into(),
            records: vec![bad],
            shake_probabilities: Vec::new(),
        };
        assert!(RateTable::from_database(&db).is_err());
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode_database(b"not zstd").is_err());
    }
}

//! The set of transitions chosen for simulation.
//!
//! Built once per transition/category change and then shared by the grid
//! calculator and the aggregator. Entries are stored in request order and
//! addressed by [`TransitionId`], so every output array lines up with the
//! request list.

use crate::diagnostics::Warning;
use crate::rates::RateTable;
use crate::transitions::{LineCategory, RateLine, Shell, TransitionCategory, TransitionKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransitionId(pub usize);

/// One element (or compound component) contributing to the spectrum.
#[derive(Debug, Clone)]
pub struct Subject {
    pub label: String,
    pub weight: f64,
    pub rates: RateTable,
}

impl Subject {
    pub fn new(label: impl Into<String>, rates: RateTable) -> Self {
        Self {
            label: label.into(),
            weight: 1.0,
            rates,
        }
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }
}

/// Satellite rows sharing one spectator shell and shake kind.
#[derive(Debug, Clone)]
pub struct SatelliteChannel {
    pub spectator: Shell,
    pub kind: LineCategory,
    /// Index into [`SelectionSet::shake_labels`].
    pub shake_index: usize,
    pub rows: Vec<RateLine>,
}

impl SatelliteChannel {
    pub fn label(&self) -> String {
        let kind = match self.kind {
            LineCategory::ShakeUp => "shake-up",
            _ => "shake-off",
        };
        format!("{} {kind}", self.spectator)
    }
}

#[derive(Debug, Clone)]
pub struct SelectedTransition {
    pub id: TransitionId,
    pub subject: usize,
    pub kind: TransitionKind,
    /// Diagram rows, or Auger rows in Auger mode.
    pub lines: Vec<RateLine>,
    pub channels: Vec<SatelliteChannel>,
}

impl SelectedTransition {
    pub fn is_available(&self) -> bool {
        !self.lines.is_empty() || self.channels.iter().any(|c| !c.rows.is_empty())
    }
}

#[derive(Debug, Clone)]
pub struct SubjectInfo {
    pub label: String,
    pub weight: f64,
}

#[derive(Debug, Clone, Default)]
pub struct SelectionSet {
    category: TransitionCategory,
    entries: Vec<SelectedTransition>,
    subjects: Vec<SubjectInfo>,
    shake_labels: Vec<Shell>,
    shake_probabilities: Vec<f64>,
    unavailable: Vec<String>,
}

impl SelectionSet {
    /// Select `requested` transitions from every subject's rate table.
    ///
    /// Requests with no matching rows still get an (empty) entry so output
    /// ordinals stay aligned; they are reported through [`Self::warning`].
    pub fn build(
        subjects: &[Subject],
        requested: &[TransitionKind],
        category: TransitionCategory,
    ) -> Self {
        let mut set = Self {
            category,
            subjects: subjects
                .iter()
                .map(|s| SubjectInfo {
                    label: s.label.clone(),
                    weight: s.weight,
                })
                .collect(),
            ..Self::default()
        };

        for (subject_index, subject) in subjects.iter().enumerate() {
            for kind in requested {
                let entry = set.select_one(subject_index, subject, kind);
                if !entry.is_available() {
                    let label = if subjects.len() > 1 {
                        format!("{} {}", subject.label, kind)
                    } else {
                        kind.to_string()
                    };
                    set.unavailable.push(label);
                }
                set.entries.push(entry);
            }
        }

        set.average_shake_probabilities(subjects);

        tracing::debug!(
            transitions = set.entries.len(),
            shake_channels = set.shake_labels.len(),
            unavailable = set.unavailable.len(),
            "built transition selection"
        );
        set
    }

    fn select_one(
        &mut self,
        subject_index: usize,
        subject: &Subject,
        kind: &TransitionKind,
    ) -> SelectedTransition {
        let id = TransitionId(self.entries.len());
        let table = &subject.rates;

        let lines: Vec<RateLine> = if self.category.is_auger() {
            table.rows(kind, LineCategory::Auger).cloned().collect()
        } else if self.category.includes_diagram() {
            table.rows(kind, LineCategory::Diagram).cloned().collect()
        } else {
            Vec::new()
        };

        let mut channels: Vec<SatelliteChannel> = Vec::new();
        if self.category.includes_satellites() {
            for shake_kind in [LineCategory::ShakeOff, LineCategory::ShakeUp] {
                for row in table.rows(kind, shake_kind) {
                    let Some(spectator) = row.spectator else {
                        continue;
                    };
                    match channels
                        .iter_mut()
                        .find(|c| c.spectator == spectator && c.kind == shake_kind)
                    {
                        Some(channel) => channel.rows.push(row.clone()),
                        None => {
                            let shake_index = self.shake_index(spectator);
                            channels.push(SatelliteChannel {
                                spectator,
                                kind: shake_kind,
                                shake_index,
                                rows: vec![row.clone()],
                            });
                        }
                    }
                }
            }
            channels.sort_by_key(|c| (c.spectator, c.kind == LineCategory::ShakeUp));
        }

        SelectedTransition {
            id,
            subject: subject_index,
            kind: *kind,
            lines,
            channels,
        }
    }

    fn shake_index(&mut self, spectator: Shell) -> usize {
        if let Some(i) = self.shake_labels.iter().position(|s| *s == spectator) {
            return i;
        }
        self.shake_labels.push(spectator);
        self.shake_labels.len() - 1
    }

    /// Mean total shake probability of each label over the subjects that
    /// tabulate it, 0 when none does.
    fn average_shake_probabilities(&mut self, subjects: &[Subject]) {
        self.shake_probabilities = self
            .shake_labels
            .iter()
            .map(|&shell| {
                let tabulated: Vec<f64> = subjects
                    .iter()
                    .filter_map(|s| s.rates.shake_probability(shell))
                    .map(|p| p.shake_off + p.shake_up)
                    .collect();
                if tabulated.is_empty() {
                    0.0
                } else {
                    tabulated.iter().sum::<f64>() / tabulated.len() as f64
                }
            })
            .collect();
    }

    pub fn category(&self) -> TransitionCategory {
        self.category
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: TransitionId) -> Option<&SelectedTransition> {
        self.entries.get(id.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SelectedTransition> {
        self.entries.iter()
    }

    pub fn subjects(&self) -> &[SubjectInfo] {
        &self.subjects
    }

    pub fn is_multi_subject(&self) -> bool {
        self.subjects.len() > 1
    }

    /// Spectator shells with at least one satellite channel, in first-seen order.
    pub fn shake_labels(&self) -> &[Shell] {
        &self.shake_labels
    }

    /// Total (shake-off + shake-up) probability of each entry of `shake_labels`.
    pub fn shake_probabilities(&self) -> &[f64] {
        &self.shake_probabilities
    }

    pub fn unavailable(&self) -> &[String] {
        &self.unavailable
    }

    pub fn unavailable_count(&self) -> usize {
        self.unavailable.len()
    }

    pub fn available_count(&self) -> usize {
        self.entries.iter().filter(|e| e.is_available()).count()
    }

    pub fn warning(&self) -> Option<Warning> {
        if self.unavailable.is_empty() {
            return None;
        }
        Some(Warning::UnavailableTransitions {
            count: self.unavailable.len(),
            labels: self.unavailable.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(category: LineCategory, spectator: Option<Shell>, energy: f64) -> RateLine {
        RateLine {
            kind: TransitionKind::radiative(Shell::K, Shell::L3),
            spectator,
            category,
            jj_initial: 1.0,
            jj_final: 3.0,
            energy,
            intensity: 1.0,
            width: 1.0,
            charge_state: None,
        }
    }

    fn table() -> RateTable {
        RateTable::new(
            "Fe",
            26,
            vec![
                line(LineCategory::Diagram, None, 6404.0),
                line(LineCategory::Diagram, None, 6405.0),
                line(LineCategory::ShakeOff, Some(Shell::L1), 6420.0),
                line(LineCategory::ShakeUp, Some(Shell::L1), 6418.0),
                line(LineCategory::ShakeOff, Some(Shell::M1), 6410.0),
            ],
        )
        .with_shake_probability(Shell::L1, 0.02, 0.01)
        .with_shake_probability(Shell::M1, 0.05, 0.02)
    }

    #[test]
    fn test_diagram_selection() {
        let subjects = [Subject::new("Fe", table())];
        let ka1 = TransitionKind::radiative(Shell::K, Shell::L3);
        let set = SelectionSet::build(&subjects, &[ka1], TransitionCategory::Diagram);
        assert_eq!(set.len(), 1);
        let entry = set.get(TransitionId(0)).unwrap();
        assert_eq!(entry.lines.len(), 2);
        assert!(entry.channels.is_empty());
        assert!(set.warning().is_none());
    }

    #[test]
    fn test_satellite_channels_grouped() {
        let subjects = [Subject::new("Fe", table())];
        let ka1 = TransitionKind::radiative(Shell::K, Shell::L3);
        let set = SelectionSet::build(&subjects, &[ka1], TransitionCategory::Satellites);
        let entry = set.get(TransitionId(0)).unwrap();
        assert!(entry.lines.is_empty());
        assert_eq!(entry.channels.len(), 3);
        assert_eq!(set.shake_labels(), &[Shell::L1, Shell::M1]);
        assert!((set.shake_probabilities()[0] - 0.03).abs() < 1e-15);
        assert!((set.shake_probabilities()[1] - 0.07).abs() < 1e-15);
    }

    #[test]
    fn test_shake_probability_averaged_over_subjects() {
        let cobalt = RateTable::new(
            "Co",
            27,
            vec![line(LineCategory::ShakeOff, Some(Shell::L1), 6950.0)],
        )
        .with_shake_probability(Shell::L1, 0.04, 0.01);
        let subjects = [Subject::new("Fe", table()), Subject::new("Co", cobalt)];
        let ka1 = TransitionKind::radiative(Shell::K, Shell::L3);
        let set = SelectionSet::build(&subjects, &[ka1], TransitionCategory::Satellites);
        assert_eq!(set.shake_labels(), &[Shell::L1, Shell::M1]);
        // (0.03 + 0.05) / 2 for L1; M1 only in the iron table
        assert!((set.shake_probabilities()[0] - 0.04).abs() < 1e-15);
        assert!((set.shake_probabilities()[1] - 0.07).abs() < 1e-15);
        let cobalt_entry = set.get(TransitionId(1)).unwrap();
        assert_eq!(cobalt_entry.channels[0].shake_index, 0);
    }

    #[test]
    fn test_unavailable_keeps_ordinal() {
        let subjects = [Subject::new("Fe", table())];
        let kb1 = TransitionKind::radiative(Shell::K, Shell::M3);
        let ka1 = TransitionKind::radiative(Shell::K, Shell::L3);
        let set = SelectionSet::build(&subjects, &[kb1, ka1], TransitionCategory::Diagram);
        assert_eq!(set.len(), 2);
        assert_eq!(set.unavailable_count(), 1);
        assert_eq!(set.available_count(), 1);
        match set.warning() {
            Some(Warning::UnavailableTransitions { count, labels }) => {
                assert_eq!(count, 1);
                assert_eq!(labels, vec!["Kβ1".to_string()]);
            }
            other => panic!("unexpected warning {other:?}"),
        }
    }
}

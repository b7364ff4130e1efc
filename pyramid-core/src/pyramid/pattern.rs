//! Pattern pyramids: one recurring behavior.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[cfg(feature = "typescript")]
use ts_rs::TS;

use crate::answer::{decode, OneOrMany};
use crate::datapoint::Datapoint;
use crate::error::{PyramidError, Result};
use crate::evidence::PatternInstance;
use crate::metrics;
use crate::settings::PyramidSettings;
use crate::types::{PatternKind, Sustainability, Trend};

/// Datapoint slots of a pattern pyramid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PatternSlot {
    Frequency,
    Context,
    Exceptions,
    Motivation,
    Outcomes,
    Sustainability,
}

impl PatternSlot {
    pub const ALL: [PatternSlot; 6] = [
        Self::Frequency,
        Self::Context,
        Self::Exceptions,
        Self::Motivation,
        Self::Outcomes,
        Self::Sustainability,
    ];

    /// Datapoint key.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Frequency => "frequency",
            Self::Context => "context",
            Self::Exceptions => "exceptions",
            Self::Motivation => "motivation",
            Self::Outcomes => "outcomes",
            Self::Sustainability => "sustainability",
        }
    }
}

impl FromStr for PatternSlot {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|slot| slot.as_str() == s)
            .ok_or_else(|| format!("unknown pattern datapoint: {}", s))
    }
}

impl fmt::Display for PatternSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why the behavior happens.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct Motivation {
    /// What the author says drives it
    pub stated: String,
    /// What the evidence suggests instead
    #[serde(default)]
    pub revealed: Option<String>,
    /// How well stated and revealed agree (0 - 100)
    #[serde(default)]
    pub alignment: Option<u8>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum MotivationAnswer {
    Text(String),
    Full(Motivation),
}

/// The six pattern datapoints.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct PatternDatapoints {
    /// Number of matching occurrences
    pub frequency: Datapoint<u32>,
    pub context: Datapoint<Vec<String>>,
    /// Occurrences that broke the pattern
    pub exceptions: Datapoint<Vec<PatternInstance>>,
    pub motivation: Datapoint<Motivation>,
    pub outcomes: Datapoint<Vec<String>>,
    pub sustainability: Datapoint<Sustainability>,
}

impl PatternDatapoints {
    /// Whether a slot has been settled by an answer.
    pub fn is_complete(&self, slot: PatternSlot) -> bool {
        match slot {
            PatternSlot::Frequency => self.frequency.complete,
            PatternSlot::Context => self.context.complete,
            PatternSlot::Exceptions => self.exceptions.complete,
            PatternSlot::Motivation => self.motivation.complete,
            PatternSlot::Outcomes => self.outcomes.complete,
            PatternSlot::Sustainability => self.sustainability.complete,
        }
    }

    /// Number of settled slots.
    pub fn completed(&self) -> usize {
        PatternSlot::ALL
            .iter()
            .filter(|slot| self.is_complete(**slot))
            .count()
    }
}

/// Pattern payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct PatternPyramid {
    pub pattern_kind: PatternKind,
    pub datapoints: PatternDatapoints,
    #[serde(default)]
    pub instances: Vec<PatternInstance>,
    /// Situations where the pattern could have shown up but did not
    #[serde(default)]
    pub counter_examples: Vec<PatternInstance>,
    /// Share of relevant situations where the pattern appeared (0 - 100)
    pub frequency_percentage: u8,
    pub sustainability_assessment: Sustainability,
    #[serde(default)]
    pub trend: Option<Trend>,
    #[serde(default)]
    pub first_detected: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_occurrence: Option<DateTime<Utc>>,
}

impl PatternPyramid {
    pub fn new(pattern_kind: PatternKind) -> Self {
        Self {
            pattern_kind,
            datapoints: PatternDatapoints::default(),
            instances: Vec::new(),
            counter_examples: Vec::new(),
            frequency_percentage: 0,
            sustainability_assessment: Sustainability::Sustainable,
            trend: None,
            first_detected: None,
            last_occurrence: None,
        }
    }

    /// Whether evidence from this entry is already recorded.
    pub fn has_entry(&self, entry_id: &str) -> bool {
        self.instances
            .iter()
            .chain(self.counter_examples.iter())
            .any(|i| i.entry_id == entry_id)
    }

    pub(crate) fn append_instance(&mut self, instance: PatternInstance) {
        self.instances.push(instance);
    }

    pub(crate) fn append_counter_example(&mut self, instance: PatternInstance) {
        self.counter_examples.push(instance);
    }

    /// Recompute every derived field from the instance lists.
    pub fn recompute(&mut self, settings: &PyramidSettings, now: DateTime<Utc>) {
        self.frequency_percentage =
            metrics::pattern_frequency_percentage(&self.instances, &self.counter_examples);
        self.sustainability_assessment = metrics::assess_sustainability(
            &self.instances,
            settings.sustainability_window_days,
            now,
        );
        self.trend = metrics::pattern_trend(&self.instances, settings.trend_window_days, now);
        self.first_detected = self.instances.iter().map(|i| i.occurred_at).min();
        self.last_occurrence = self
            .instances
            .iter()
            .filter(|i| i.matches_pattern && !i.is_exception)
            .map(|i| i.occurred_at)
            .max();

        let matching = self
            .instances
            .iter()
            .filter(|i| i.matches_pattern && !i.is_exception)
            .count() as u32;

        let dp = &mut self.datapoints;
        dp.frequency.refresh(matching, now);
        dp.context.refresh(
            metrics::distinct(self.instances.iter().filter_map(|i| i.context.as_deref())),
            now,
        );
        dp.exceptions.refresh(
            self.instances
                .iter()
                .filter(|i| i.is_exception)
                .cloned()
                .collect(),
            now,
        );
        dp.outcomes.refresh(
            metrics::distinct(self.instances.iter().filter_map(|i| i.outcome.as_deref())),
            now,
        );
        dp.sustainability
            .refresh(self.sustainability_assessment, now);
    }

    /// Settle a slot from an answer. Nothing changes if decoding fails.
    pub(crate) fn answer(
        &mut self,
        slot: PatternSlot,
        value: &serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<()> {
        match slot {
            PatternSlot::Frequency => {
                let count: u32 = decode(value, "a number of occurrences")?;
                self.datapoints.frequency.mark_complete(count, now);
            }
            PatternSlot::Context => {
                let answered: OneOrMany<String> = decode(value, "context text")?;
                let answered = answered.into_vec();
                let merged = metrics::distinct(
                    self.datapoints
                        .context
                        .value
                        .iter()
                        .map(String::as_str)
                        .chain(answered.iter().map(String::as_str)),
                );
                self.datapoints.context.mark_complete(merged, now);
            }
            PatternSlot::Exceptions => {
                let exceptions: Vec<PatternInstance> =
                    decode(value, "a list of exceptions (may be empty)")?;
                self.datapoints.exceptions.mark_complete(exceptions, now);
            }
            PatternSlot::Motivation => {
                let motivation = match decode::<MotivationAnswer>(value, "motivation text")? {
                    MotivationAnswer::Text(stated) => Motivation {
                        stated,
                        ..Default::default()
                    },
                    MotivationAnswer::Full(motivation) => motivation,
                };
                if let Some(alignment) = motivation.alignment {
                    if alignment > 100 {
                        return Err(PyramidError::validation(
                            "value.alignment",
                            format!("must be within 0..=100, got {}", alignment),
                        ));
                    }
                }
                self.datapoints.motivation.mark_complete(motivation, now);
            }
            PatternSlot::Outcomes => {
                let answered: OneOrMany<String> = decode(value, "outcome text")?;
                let answered = answered.into_vec();
                let merged = metrics::distinct(
                    self.datapoints
                        .outcomes
                        .value
                        .iter()
                        .map(String::as_str)
                        .chain(answered.iter().map(String::as_str)),
                );
                self.datapoints.outcomes.mark_complete(merged, now);
            }
            PatternSlot::Sustainability => {
                let sustainability: Sustainability = decode(value, "a sustainability rating")?;
                self.datapoints
                    .sustainability
                    .mark_complete(sustainability, now);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    #[test]
    fn test_recompute_scenario_at_risk() {
        let now = Utc::now();
        let mut pyramid = PatternPyramid::new(PatternKind::Prosocial);
        for day in 0..6 {
            let mut instance =
                PatternInstance::new(format!("e{}", day), now - Duration::days(day), "helped");
            instance.is_exception = day % 3 != 0;
            pyramid.append_instance(instance);
        }
        pyramid.recompute(&PyramidSettings::default(), now);

        assert_eq!(pyramid.sustainability_assessment, Sustainability::AtRisk);
        assert_eq!(pyramid.datapoints.frequency.value, 2);
        assert_eq!(pyramid.datapoints.exceptions.value.len(), 4);
        assert_eq!(pyramid.frequency_percentage, 33);
        assert!(!pyramid.datapoints.sustainability.complete);
    }

    #[test]
    fn test_empty_pattern_is_sustainable() {
        let mut pyramid = PatternPyramid::new(PatternKind::Learning);
        pyramid.recompute(&PyramidSettings::default(), Utc::now());
        assert_eq!(pyramid.sustainability_assessment, Sustainability::Sustainable);
        assert_eq!(pyramid.frequency_percentage, 0);
        assert_eq!(pyramid.trend, None);
    }

    #[test]
    fn test_motivation_accepts_text_or_structure() {
        let now = Utc::now();
        let mut pyramid = PatternPyramid::new(PatternKind::Prosocial);
        pyramid
            .answer(PatternSlot::Motivation, &json!("I like being useful"), now)
            .unwrap();
        assert_eq!(pyramid.datapoints.motivation.value.stated, "I like being useful");

        let mut other = PatternPyramid::new(PatternKind::Prosocial);
        other
            .answer(
                PatternSlot::Motivation,
                &json!({"stated": "duty", "revealed": "approval", "alignment": 40}),
                now,
            )
            .unwrap();
        assert_eq!(other.datapoints.motivation.value.alignment, Some(40));

        let err = other
            .answer(
                PatternSlot::Motivation,
                &json!({"stated": "duty", "alignment": 140}),
                now,
            )
            .unwrap_err();
        assert_eq!(err.field(), "value.alignment");
    }

    #[test]
    fn test_empty_exception_list_completes() {
        let mut pyramid = PatternPyramid::new(PatternKind::Commitment);
        pyramid
            .answer(PatternSlot::Exceptions, &json!([]), Utc::now())
            .unwrap();
        assert!(pyramid.datapoints.exceptions.complete);
        assert!(pyramid.datapoints.exceptions.value.is_empty());
    }
}

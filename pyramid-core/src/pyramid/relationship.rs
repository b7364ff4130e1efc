//! Relationship pyramids: interactions and dynamics with one person.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[cfg(feature = "typescript")]
use ts_rs::TS;

use crate::answer::{decode, OneOrMany};
use crate::datapoint::Datapoint;
use crate::error::Result;
use crate::evidence::{check_duration, InteractionRecord};
use crate::metrics;
use crate::settings::PyramidSettings;
use crate::types::{Direction, Reciprocity, RelationshipKind, Sentiment};

/// Datapoint slots of a relationship pyramid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelationshipSlot {
    Frequency,
    Duration,
    Direction,
    Reciprocity,
    Context,
    Sentiment,
    Outcome,
}

impl RelationshipSlot {
    pub const ALL: [RelationshipSlot; 7] = [
        Self::Frequency,
        Self::Duration,
        Self::Direction,
        Self::Reciprocity,
        Self::Context,
        Self::Sentiment,
        Self::Outcome,
    ];

    /// Datapoint key.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Frequency => "frequency",
            Self::Duration => "duration",
            Self::Direction => "direction",
            Self::Reciprocity => "reciprocity",
            Self::Context => "context",
            Self::Sentiment => "sentiment",
            Self::Outcome => "outcome",
        }
    }
}

impl FromStr for RelationshipSlot {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|slot| slot.as_str() == s)
            .ok_or_else(|| format!("unknown relationship datapoint: {}", s))
    }
}

impl fmt::Display for RelationshipSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The seven relationship datapoints.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct RelationshipDatapoints {
    /// Number of interactions
    pub frequency: Datapoint<u32>,
    /// Minutes per interaction, `None` where unknown
    pub duration: Datapoint<Vec<Option<u32>>>,
    /// Who gave to whom, per interaction
    pub direction: Datapoint<Vec<Direction>>,
    pub reciprocity: Datapoint<Reciprocity>,
    /// Distinct situations the interactions happened in
    pub context: Datapoint<Vec<String>>,
    /// Overall feeling after interacting
    pub sentiment: Datapoint<Sentiment>,
    /// How things turned out, per interaction
    pub outcome: Datapoint<Vec<Option<String>>>,
}

impl RelationshipDatapoints {
    /// Whether a slot has been settled by an answer.
    pub fn is_complete(&self, slot: RelationshipSlot) -> bool {
        match slot {
            RelationshipSlot::Frequency => self.frequency.complete,
            RelationshipSlot::Duration => self.duration.complete,
            RelationshipSlot::Direction => self.direction.complete,
            RelationshipSlot::Reciprocity => self.reciprocity.complete,
            RelationshipSlot::Context => self.context.complete,
            RelationshipSlot::Sentiment => self.sentiment.complete,
            RelationshipSlot::Outcome => self.outcome.complete,
        }
    }

    /// Number of settled slots.
    pub fn completed(&self) -> usize {
        RelationshipSlot::ALL
            .iter()
            .filter(|slot| self.is_complete(**slot))
            .count()
    }
}

/// Relationship payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct RelationshipPyramid {
    #[serde(default)]
    pub relationship_kind: RelationshipKind,
    pub datapoints: RelationshipDatapoints,
    /// Interactions in arrival order
    #[serde(default)]
    pub interactions: Vec<InteractionRecord>,
    /// Minutes the author gave (you→them)
    pub total_time_given: i64,
    /// Minutes the subject gave (them→you)
    pub total_time_received: i64,
    /// `total_time_given - total_time_received`
    pub net_balance: i64,
    pub prosocial_flag: bool,
    #[serde(default)]
    pub last_interaction_at: Option<DateTime<Utc>>,
}

impl RelationshipPyramid {
    pub fn new(relationship_kind: RelationshipKind) -> Self {
        Self {
            relationship_kind,
            datapoints: RelationshipDatapoints::default(),
            interactions: Vec::new(),
            total_time_given: 0,
            total_time_received: 0,
            net_balance: 0,
            prosocial_flag: false,
            last_interaction_at: None,
        }
    }

    /// Whether evidence from this entry is already recorded.
    pub fn has_entry(&self, entry_id: &str) -> bool {
        self.interactions.iter().any(|i| i.entry_id == entry_id)
    }

    /// Whether any interaction still lacks a duration.
    pub fn any_missing_duration(&self) -> bool {
        self.interactions
            .iter()
            .any(|i| i.duration_minutes.is_none())
    }

    pub(crate) fn append(&mut self, record: InteractionRecord) {
        self.interactions.push(record);
    }

    /// Recompute every derived field from the interaction list.
    pub fn recompute(&mut self, settings: &PyramidSettings, now: DateTime<Utc>) {
        let balance = metrics::time_balance(&self.interactions);
        self.total_time_given = balance.given;
        self.total_time_received = balance.received;
        self.net_balance = balance.net;
        self.prosocial_flag = metrics::is_prosocial(&self.interactions, &balance, settings);
        self.last_interaction_at = self.interactions.iter().map(|i| i.occurred_at).max();

        let dp = &mut self.datapoints;
        dp.frequency.refresh(self.interactions.len() as u32, now);
        dp.duration.refresh(
            self.interactions.iter().map(|i| i.duration_minutes).collect(),
            now,
        );
        dp.direction.refresh(
            self.interactions.iter().map(|i| i.direction).collect(),
            now,
        );
        dp.reciprocity
            .refresh(metrics::infer_reciprocity(&balance, settings), now);
        dp.context.refresh(
            metrics::distinct(self.interactions.iter().filter_map(|i| i.context.as_deref())),
            now,
        );
        dp.sentiment.refresh(
            metrics::dominant_sentiment(self.interactions.iter().filter_map(|i| i.sentiment)),
            now,
        );
        dp.outcome.refresh(
            self.interactions.iter().map(|i| i.outcome.clone()).collect(),
            now,
        );
    }

    /// Settle a slot from an answer. Nothing changes if decoding fails.
    pub(crate) fn answer(
        &mut self,
        slot: RelationshipSlot,
        value: &serde_json::Value,
        settings: &PyramidSettings,
        now: DateTime<Utc>,
    ) -> Result<()> {
        match slot {
            RelationshipSlot::Frequency => {
                let count: u32 = decode(value, "a number of interactions")?;
                self.datapoints.frequency.mark_complete(count, now);
            }
            RelationshipSlot::Duration => {
                let answered: OneOrMany<u32> = decode(value, "minutes or a list of minutes")?;
                match answered {
                    OneOrMany::One(minutes) => {
                        check_duration(minutes, settings)?;
                        if let Some(missing) = self
                            .interactions
                            .iter_mut()
                            .find(|i| i.duration_minutes.is_none())
                        {
                            missing.duration_minutes = Some(minutes);
                        }
                        let durations = self
                            .interactions
                            .iter()
                            .map(|i| i.duration_minutes)
                            .collect();
                        self.datapoints.duration.mark_complete(durations, now);
                    }
                    OneOrMany::Many(list) => {
                        for minutes in &list {
                            check_duration(*minutes, settings)?;
                        }
                        // Positional: the nth answer belongs to the nth interaction.
                        for (interaction, minutes) in self.interactions.iter_mut().zip(&list) {
                            if interaction.duration_minutes.is_none() {
                                interaction.duration_minutes = Some(*minutes);
                            }
                        }
                        self.datapoints
                            .duration
                            .mark_complete(list.into_iter().map(Some).collect(), now);
                    }
                }
            }
            RelationshipSlot::Direction => {
                let directions: OneOrMany<Direction> = decode(value, "a direction")?;
                self.datapoints
                    .direction
                    .mark_complete(directions.into_vec(), now);
            }
            RelationshipSlot::Reciprocity => {
                let reciprocity: Reciprocity = decode(value, "a reciprocity balance")?;
                self.datapoints.reciprocity.mark_complete(reciprocity, now);
            }
            RelationshipSlot::Context => {
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
            RelationshipSlot::Sentiment => {
                let sentiment: Sentiment = decode(value, "a sentiment")?;
                self.datapoints.sentiment.mark_complete(sentiment, now);
            }
            RelationshipSlot::Outcome => {
                let answered: OneOrMany<String> = decode(value, "outcome text")?;
                let mut outcomes = self.datapoints.outcome.value.clone();
                outcomes.extend(answered.into_vec().into_iter().map(Some));
                self.datapoints.outcome.mark_complete(outcomes, now);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(id: &str, direction: Direction, minutes: Option<u32>) -> InteractionRecord {
        let mut record = InteractionRecord::new(id, Utc::now(), "helping", direction);
        record.duration_minutes = minutes;
        record
    }

    #[test]
    fn test_recompute_mirrors_without_completing() {
        let settings = PyramidSettings::default();
        let now = Utc::now();
        let mut pyramid = RelationshipPyramid::new(RelationshipKind::Neighbor);
        pyramid.append(record("e1", Direction::YouToThem, Some(90)).with_context("fence"));
        pyramid.append(record("e2", Direction::ThemToYou, None).with_context("fence"));
        pyramid.recompute(&settings, now);

        let dp = &pyramid.datapoints;
        assert_eq!(dp.frequency.value, 2);
        assert_eq!(dp.duration.value, vec![Some(90), None]);
        assert_eq!(dp.context.value, vec!["fence"]);
        assert_eq!(dp.completed(), 0);
        assert_eq!(pyramid.total_time_given, 90);
        assert_eq!(pyramid.net_balance, 90);
    }

    #[test]
    fn test_scalar_duration_fills_earliest_missing() {
        let settings = PyramidSettings::default();
        let now = Utc::now();
        let mut pyramid = RelationshipPyramid::new(RelationshipKind::Friend);
        pyramid.append(record("e1", Direction::YouToThem, Some(60)));
        pyramid.append(record("e2", Direction::YouToThem, None));
        pyramid.append(record("e3", Direction::YouToThem, None));

        pyramid
            .answer(RelationshipSlot::Duration, &json!(45), &settings, now)
            .unwrap();
        assert_eq!(pyramid.interactions[1].duration_minutes, Some(45));
        assert_eq!(pyramid.interactions[2].duration_minutes, None);
        assert!(pyramid.datapoints.duration.complete);
    }

    #[test]
    fn test_duration_list_fills_missing_positionally() {
        let settings = PyramidSettings::default();
        let now = Utc::now();
        let mut pyramid = RelationshipPyramid::new(RelationshipKind::Friend);
        pyramid.append(record("e1", Direction::YouToThem, Some(60)));
        pyramid.append(record("e2", Direction::YouToThem, None));
        pyramid.append(record("e3", Direction::ThemToYou, None));

        pyramid
            .answer(RelationshipSlot::Duration, &json!([90, 45, 30]), &settings, now)
            .unwrap();
        pyramid.recompute(&settings, now);

        // Extracted durations are kept; only missing ones are filled.
        assert_eq!(pyramid.interactions[0].duration_minutes, Some(60));
        assert_eq!(pyramid.interactions[1].duration_minutes, Some(45));
        assert_eq!(pyramid.interactions[2].duration_minutes, Some(30));
        assert_eq!(pyramid.total_time_given, 105);
        assert_eq!(pyramid.total_time_received, 30);
        assert_eq!(pyramid.datapoints.duration.value, vec![Some(90), Some(45), Some(30)]);
        assert!(pyramid.datapoints.duration.complete);
    }

    #[test]
    fn test_bad_answer_leaves_pyramid_untouched() {
        let settings = PyramidSettings::default();
        let now = Utc::now();
        let mut pyramid = RelationshipPyramid::new(RelationshipKind::Friend);
        pyramid.append(record("e1", Direction::YouToThem, None));
        let before = pyramid.clone();

        let err = pyramid
            .answer(RelationshipSlot::Duration, &json!(5000), &settings, now)
            .unwrap_err();
        assert_eq!(err.field(), "duration_minutes");
        let err = pyramid
            .answer(RelationshipSlot::Reciprocity, &json!("often"), &settings, now)
            .unwrap_err();
        assert_eq!(err.field(), "value");
        assert_eq!(pyramid, before);
    }

    #[test]
    fn test_unknown_reciprocity_is_a_valid_answer() {
        let mut pyramid = RelationshipPyramid::new(RelationshipKind::Other);
        pyramid
            .answer(
                RelationshipSlot::Reciprocity,
                &json!("unknown"),
                &PyramidSettings::default(),
                Utc::now(),
            )
            .unwrap();
        assert!(pyramid.datapoints.reciprocity.complete);
        assert_eq!(pyramid.datapoints.reciprocity.value, Reciprocity::Unknown);
    }

    #[test]
    fn test_slot_keys() {
        assert_eq!("outcome".parse::<RelationshipSlot>(), Ok(RelationshipSlot::Outcome));
        assert!("mood".parse::<RelationshipSlot>().is_err());
    }
}

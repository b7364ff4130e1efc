//! Evidence records appended to pyramids.
//!
//! Evidence references journal entries by id only; the entries themselves
//! live in the external journal store and several pyramids may cite the
//! same entry.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

#[cfg(feature = "typescript")]
use ts_rs::TS;

use crate::error::{PyramidError, Result};
use crate::settings::PyramidSettings;
use crate::types::{ActivityType, Direction, Sentiment, Variant};

/// One interaction with a person.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct InteractionRecord {
    /// Supporting journal entry
    pub entry_id: String,
    /// When the interaction happened
    pub occurred_at: DateTime<Utc>,
    /// Free-form kind, e.g. "helping (moving)"
    pub kind: String,
    /// Duration in minutes, if known
    #[serde(default)]
    pub duration_minutes: Option<u32>,
    /// Who gave to whom
    #[serde(default)]
    pub direction: Direction,
    /// What the author gave
    #[serde(default)]
    pub your_investment: Option<String>,
    /// What the subject gave back
    #[serde(default)]
    pub their_return: Option<String>,
    #[serde(default)]
    pub sentiment: Option<Sentiment>,
    /// Situational context, e.g. "fence"
    #[serde(default)]
    pub context: Option<String>,
    /// How it turned out
    #[serde(default)]
    pub outcome: Option<String>,
}

impl InteractionRecord {
    /// Create a record with the required fields.
    pub fn new(
        entry_id: impl Into<String>,
        occurred_at: DateTime<Utc>,
        kind: impl Into<String>,
        direction: Direction,
    ) -> Self {
        Self {
            entry_id: entry_id.into(),
            occurred_at,
            kind: kind.into(),
            duration_minutes: None,
            direction,
            your_investment: None,
            their_return: None,
            sentiment: None,
            context: None,
            outcome: None,
        }
    }

    /// Set duration.
    pub fn with_duration(mut self, minutes: u32) -> Self {
        self.duration_minutes = Some(minutes);
        self
    }

    /// Set sentiment.
    pub fn with_sentiment(mut self, sentiment: Sentiment) -> Self {
        self.sentiment = Some(sentiment);
        self
    }

    /// Set context.
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }
}

/// A single occurrence (or non-occurrence) of a behavioral pattern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct PatternInstance {
    /// Supporting journal entry
    pub entry_id: String,
    /// When it happened
    pub occurred_at: DateTime<Utc>,
    /// Short description
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default)]
    pub outcome: Option<String>,
    /// Whether the behavior matched the pattern
    #[serde(default = "default_true")]
    pub matches_pattern: bool,
    /// Whether this occurrence broke the pattern
    #[serde(default)]
    pub is_exception: bool,
}

fn default_true() -> bool {
    true
}

impl PatternInstance {
    /// Create a matching, non-exception instance.
    pub fn new(
        entry_id: impl Into<String>,
        occurred_at: DateTime<Utc>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            entry_id: entry_id.into(),
            occurred_at,
            description: description.into(),
            context: None,
            outcome: None,
            matches_pattern: true,
            is_exception: false,
        }
    }

    /// Mark as an exception to the pattern.
    pub fn exception(mut self) -> Self {
        self.is_exception = true;
        self
    }
}

/// A tracked block of time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct TimeEntry {
    /// Supporting journal entry
    pub entry_id: String,
    /// When the block started
    pub started_at: DateTime<Utc>,
    /// Length of the block in minutes
    pub duration_minutes: u32,
    #[serde(default)]
    pub category: ActivityType,
    /// People involved (normalized names)
    #[serde(default)]
    pub people: Vec<String>,
    /// Energy level 1 (exhausted) to 10 (energized)
    #[serde(default)]
    pub energy: Option<u8>,
}

impl TimeEntry {
    /// End of the block.
    pub fn ended_at(&self) -> DateTime<Utc> {
        self.started_at + Duration::minutes(self.duration_minutes as i64)
    }
}

/// Evidence appended to a pyramid, one variant per evidence list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "record", rename_all = "snake_case")]
pub enum Evidence {
    /// Relationship interaction
    Interaction(InteractionRecord),
    /// Pattern occurrence
    Instance(PatternInstance),
    /// Situation where the pattern could have appeared but did not
    CounterExample(PatternInstance),
    /// Time allocation record
    TimeEntry(TimeEntry),
}

impl Evidence {
    /// Variant of pyramid this evidence belongs to.
    pub fn variant(&self) -> Variant {
        match self {
            Self::Interaction(_) => Variant::Relationship,
            Self::Instance(_) | Self::CounterExample(_) => Variant::Pattern,
            Self::TimeEntry(_) => Variant::Time,
        }
    }

    /// Supporting journal entry id.
    pub fn entry_id(&self) -> &str {
        match self {
            Self::Interaction(r) => &r.entry_id,
            Self::Instance(i) | Self::CounterExample(i) => &i.entry_id,
            Self::TimeEntry(t) => &t.entry_id,
        }
    }

    /// When the evidence happened.
    pub fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            Self::Interaction(r) => r.occurred_at,
            Self::Instance(i) | Self::CounterExample(i) => i.occurred_at,
            Self::TimeEntry(t) => t.started_at,
        }
    }

    /// Label used in error paths.
    fn label(&self) -> &'static str {
        match self {
            Self::Interaction(_) => "interaction",
            Self::Instance(_) => "instance",
            Self::CounterExample(_) => "counter_example",
            Self::TimeEntry(_) => "time_entry",
        }
    }

    /// Structural validation. Never mutates anything.
    pub fn validate(&self, settings: &PyramidSettings) -> Result<()> {
        self.validate_fields(settings)
            .map_err(|e| e.within(self.label()))
    }

    fn validate_fields(&self, settings: &PyramidSettings) -> Result<()> {
        if self.entry_id().trim().is_empty() {
            return Err(PyramidError::validation("entry_id", "must not be blank"));
        }
        match self {
            Self::Interaction(record) => {
                if let Some(minutes) = record.duration_minutes {
                    check_duration(minutes, settings)?;
                }
            }
            Self::Instance(_) | Self::CounterExample(_) => {}
            Self::TimeEntry(entry) => {
                check_duration(entry.duration_minutes, settings)?;
                if let Some(energy) = entry.energy {
                    check_energy(energy)?;
                }
            }
        }
        Ok(())
    }
}

/// Reject durations above the configured ceiling.
pub fn check_duration(minutes: u32, settings: &PyramidSettings) -> Result<()> {
    if minutes > settings.max_duration_minutes {
        return Err(PyramidError::validation(
            "duration_minutes",
            format!(
                "{} exceeds the maximum of {} minutes",
                minutes, settings.max_duration_minutes
            ),
        ));
    }
    Ok(())
}

/// Energy readings are on a 1-10 scale.
pub fn check_energy(energy: u8) -> Result<()> {
    if !(1..=10).contains(&energy) {
        return Err(PyramidError::validation(
            "energy",
            format!("must be within 1..=10, got {}", energy),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_entry_id_rejected() {
        let evidence = Evidence::Interaction(InteractionRecord::new(
            "  ",
            Utc::now(),
            "helping",
            Direction::YouToThem,
        ));
        let err = evidence.validate(&PyramidSettings::default()).unwrap_err();
        assert_eq!(err.field(), "interaction.entry_id");
    }

    #[test]
    fn test_duration_ceiling() {
        let evidence = Evidence::Interaction(
            InteractionRecord::new("e1", Utc::now(), "helping", Direction::YouToThem)
                .with_duration(2000),
        );
        let err = evidence.validate(&PyramidSettings::default()).unwrap_err();
        assert_eq!(err.field(), "interaction.duration_minutes");
    }

    #[test]
    fn test_time_entry_energy_range() {
        let evidence = Evidence::TimeEntry(TimeEntry {
            entry_id: "e1".to_string(),
            started_at: Utc::now(),
            duration_minutes: 30,
            category: ActivityType::Working,
            people: vec![],
            energy: Some(11),
        });
        let err = evidence.validate(&PyramidSettings::default()).unwrap_err();
        assert_eq!(err.field(), "time_entry.energy");
    }

    #[test]
    fn test_instance_defaults_from_json() {
        let json = serde_json::json!({
            "entry_id": "e1",
            "occurred_at": "2024-03-15T10:00:00Z",
        });
        let instance: PatternInstance = serde_json::from_value(json).unwrap();
        assert!(instance.matches_pattern);
        assert!(!instance.is_exception);
    }
}

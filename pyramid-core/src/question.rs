//! Per-pyramid question selection.
//!
//! Each variant has an ordered rule table. A rule names the datapoint it
//! settles, a gate that must hold, and a text template. The first rule whose
//! gate holds produces the next question. Evaluating the table never
//! mutates the pyramid.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[cfg(feature = "typescript")]
use ts_rs::TS;

use crate::pyramid::{Pyramid, PyramidBody};
use crate::settings::PyramidSettings;
use crate::types::{PyramidStatus, Variant};

/// A question posed (or about to be posed) to the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct PendingQuestion {
    /// `"{pyramid_id}:{datapoint}"`
    pub id: String,
    pub pyramid_id: String,
    pub subject: String,
    pub text: String,
    /// Datapoint key an answer settles
    pub targets_datapoint: String,
    pub created_at: DateTime<Utc>,
}

/// A number a gate compares against, resolved from settings when it is
/// configurable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Threshold {
    Fixed(i64),
    ReciprocityInteractions,
    ExceptionInstances,
    SustainabilityInstances,
    GapQuestionMinutes,
}

impl Threshold {
    pub fn resolve(&self, settings: &PyramidSettings) -> i64 {
        match self {
            Self::Fixed(n) => *n,
            Self::ReciprocityInteractions => settings.reciprocity_min_interactions as i64,
            Self::ExceptionInstances => settings.exceptions_min_instances as i64,
            Self::SustainabilityInstances => settings.sustainability_min_instances as i64,
            Self::GapQuestionMinutes => settings.gap_question_total_minutes,
        }
    }
}

/// Predicate deciding whether a rule may fire.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Gate {
    /// Target datapoint not settled yet
    Incomplete,
    /// Some interaction has no duration
    AnyInteractionMissingDuration,
    /// At least n interactions
    InteractionsAtLeast(Threshold),
    /// Strictly more than n pattern instances
    InstancesMoreThan(Threshold),
    /// Unexplained gap minutes strictly above n
    UnexplainedGapMinutesAbove(Threshold),
    /// Some tracked day has no energy reading
    DayMissingEnergy,
    /// Every inner gate holds
    All(&'static [Gate]),
}

impl Gate {
    /// Evaluate against a pyramid. Gates that do not apply to the
    /// pyramid's variant never hold.
    pub fn holds(&self, pyramid: &Pyramid, target: &str, settings: &PyramidSettings) -> bool {
        match self {
            Self::Incomplete => pyramid.is_slot_complete(target) == Some(false),
            Self::AnyInteractionMissingDuration => pyramid
                .as_relationship()
                .map_or(false, |r| r.any_missing_duration()),
            Self::InteractionsAtLeast(n) => pyramid
                .as_relationship()
                .map_or(false, |r| r.interactions.len() as i64 >= n.resolve(settings)),
            Self::InstancesMoreThan(n) => pyramid
                .as_pattern()
                .map_or(false, |p| p.instances.len() as i64 > n.resolve(settings)),
            Self::UnexplainedGapMinutesAbove(n) => pyramid
                .as_time()
                .map_or(false, |t| t.unexplained_gap_minutes() > n.resolve(settings)),
            Self::DayMissingEnergy => pyramid
                .as_time()
                .map_or(false, |t| t.first_day_missing_energy().is_some()),
            Self::All(gates) => gates.iter().all(|g| g.holds(pyramid, target, settings)),
        }
    }
}

/// One row of a question table.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuestionRule {
    /// Datapoint key the answer settles
    pub target: &'static str,
    pub gate: Gate,
    /// Text with `{{subject}}`, `{{gap_start}}`, `{{gap_hours}}`, `{{date}}`
    pub template: &'static str,
}

pub const RELATIONSHIP_RULES: &[QuestionRule] = &[
    QuestionRule {
        target: "duration",
        gate: Gate::All(&[Gate::Incomplete, Gate::AnyInteractionMissingDuration]),
        template: "How long did your interaction with {{subject}} take?",
    },
    QuestionRule {
        target: "reciprocity",
        gate: Gate::All(&[
            Gate::Incomplete,
            Gate::InteractionsAtLeast(Threshold::ReciprocityInteractions),
        ]),
        template: "Has {{subject}} helped you before?",
    },
    QuestionRule {
        target: "sentiment",
        gate: Gate::All(&[
            Gate::Incomplete,
            Gate::InteractionsAtLeast(Threshold::Fixed(1)),
        ]),
        template: "How do you generally feel after interacting with {{subject}}?",
    },
    QuestionRule {
        target: "outcome",
        gate: Gate::All(&[
            Gate::Incomplete,
            Gate::InteractionsAtLeast(Threshold::Fixed(1)),
        ]),
        template: "How did things turn out with {{subject}}?",
    },
];

pub const PATTERN_RULES: &[QuestionRule] = &[
    QuestionRule {
        target: "motivation",
        gate: Gate::Incomplete,
        template: "What motivates your {{subject}} behavior?",
    },
    QuestionRule {
        target: "exceptions",
        gate: Gate::All(&[
            Gate::Incomplete,
            Gate::InstancesMoreThan(Threshold::ExceptionInstances),
        ]),
        template: "Have you ever NOT followed your {{subject}} pattern? When?",
    },
    QuestionRule {
        target: "outcomes",
        gate: Gate::Incomplete,
        template: "How does your {{subject}} pattern usually work out?",
    },
    QuestionRule {
        target: "sustainability",
        gate: Gate::All(&[
            Gate::Incomplete,
            Gate::InstancesMoreThan(Threshold::SustainabilityInstances),
        ]),
        template: "Do you feel your {{subject}} pattern is sustainable long-term?",
    },
];

pub const TIME_RULES: &[QuestionRule] = &[
    QuestionRule {
        target: "gaps",
        gate: Gate::All(&[
            Gate::Incomplete,
            Gate::UnexplainedGapMinutesAbove(Threshold::GapQuestionMinutes),
        ]),
        template: "What did you do {{gap_start}}? I have a {{gap_hours}}h gap.",
    },
    QuestionRule {
        target: "energy_levels",
        gate: Gate::All(&[Gate::Incomplete, Gate::DayMissingEnergy]),
        template: "How was your energy level on {{date}}?",
    },
];

/// Question table for a variant.
pub fn rules_for(variant: Variant) -> &'static [QuestionRule] {
    match variant {
        Variant::Relationship => RELATIONSHIP_RULES,
        Variant::Pattern => PATTERN_RULES,
        Variant::Time => TIME_RULES,
    }
}

/// Deterministic question id.
pub fn question_id(pyramid_id: &str, target: &str) -> String {
    format!("{}:{}", pyramid_id, target)
}

/// Highest-priority question whose gate holds, if any.
pub fn next_question(
    pyramid: &Pyramid,
    settings: &PyramidSettings,
    now: DateTime<Utc>,
) -> Option<PendingQuestion> {
    if pyramid.status() == PyramidStatus::Archived {
        return None;
    }
    let rule = rules_for(pyramid.variant())
        .iter()
        .find(|rule| rule.gate.holds(pyramid, rule.target, settings))?;

    Some(PendingQuestion {
        id: question_id(pyramid.id(), rule.target),
        pyramid_id: pyramid.id().to_string(),
        subject: pyramid.subject().to_string(),
        text: render(rule.template, pyramid),
        targets_datapoint: rule.target.to_string(),
        created_at: now,
    })
}

/// Fill template placeholders from the pyramid.
pub fn render(template: &str, pyramid: &Pyramid) -> String {
    let mut text = template.replace("{{subject}}", pyramid.subject());

    if let PyramidBody::Time(t) = &pyramid.body {
        if let Some(gap) = t.largest_unexplained_gap() {
            let start = gap.start.format("%a %-I:%M %p").to_string();
            let hours = (gap.duration_minutes as f64 / 60.0).round() as i64;
            text = text
                .replace("{{gap_start}}", &start)
                .replace("{{gap_hours}}", &hours.to_string());
        }
        if let Some(date) = t.first_day_missing_energy() {
            text = text.replace("{{date}}", &format_date(date));
        }
    }

    text
}

fn format_date(date: NaiveDate) -> String {
    date.format("%A, %B %-d").to_string()
}

//! The pyramid aggregate: a shared base plus one variant payload.
//!
//! Every mutation goes through the same pipeline: validate, mutate, recompute
//! derived fields from scratch, recompute completeness and confidence, then
//! run the lifecycle checks. Validation failures leave the pyramid untouched.

mod pattern;
mod relationship;
mod time;

pub use pattern::{Motivation, PatternDatapoints, PatternPyramid, PatternSlot};
pub use relationship::{RelationshipDatapoints, RelationshipPyramid, RelationshipSlot};
pub use time::{TimeDatapoints, TimePyramid, TimeSlot};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

#[cfg(feature = "typescript")]
use ts_rs::TS;

use crate::answer::AnswerToQuestion;
use crate::completeness;
use crate::error::{PyramidError, Result};
use crate::evidence::Evidence;
use crate::question::PendingQuestion;
use crate::settings::PyramidSettings;
use crate::subject::{normalize_subject, pyramid_id};
use crate::types::{
    Confidence, MaturitySignal, PatternKind, PeriodKind, PyramidStatus, RelationshipKind, Variant,
};

/// Fields shared by every variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct PyramidBase {
    /// Stable id, e.g. `relationship_bob`
    pub id: String,
    pub variant: Variant,
    /// Normalized subject (person, pattern name or period label)
    pub subject: String,
    pub created: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    /// Percentage of settled datapoints (0 - 100), derived
    pub completeness: u8,
    pub confidence: Confidence,
    pub status: PyramidStatus,
    /// Journal entries that contributed evidence, in arrival order
    #[serde(default)]
    pub supporting_entry_ids: Vec<String>,
    #[serde(default)]
    pub questions_pending: Vec<PendingQuestion>,
    #[serde(default)]
    pub questions_asked_count: u32,
    /// Incremented on every mutation
    #[serde(default)]
    pub version: u64,
}

/// Variant payload, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PyramidBody {
    Relationship(RelationshipPyramid),
    Pattern(PatternPyramid),
    Time(TimePyramid),
}

impl PyramidBody {
    pub fn variant(&self) -> Variant {
        match self {
            Self::Relationship(_) => Variant::Relationship,
            Self::Pattern(_) => Variant::Pattern,
            Self::Time(_) => Variant::Time,
        }
    }
}

/// A knowledge pyramid about one subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct Pyramid {
    pub base: PyramidBase,
    pub body: PyramidBody,
}

/// Outcome of a successful mutation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Applied {
    /// Set when this mutation moved the pyramid to `mature`
    pub matured: Option<MaturitySignal>,
}

impl Pyramid {
    /// New relationship pyramid for a person.
    pub fn relationship(subject: &str, kind: RelationshipKind, now: DateTime<Utc>) -> Self {
        Self::with_body(
            normalize_subject(subject),
            PyramidBody::Relationship(RelationshipPyramid::new(kind)),
            now,
        )
    }

    /// New pattern pyramid. The subject is usually the pattern name.
    pub fn pattern(subject: &str, kind: PatternKind, now: DateTime<Utc>) -> Self {
        let subject = subject.trim().to_lowercase();
        Self::with_body(subject, PyramidBody::Pattern(PatternPyramid::new(kind)), now)
    }

    /// New time pyramid for the period containing `anchor`.
    pub fn time(period_kind: PeriodKind, anchor: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        Self::with_body(
            period_kind.label(anchor),
            PyramidBody::Time(TimePyramid::new(period_kind, anchor)),
            now,
        )
    }

    fn with_body(subject: String, body: PyramidBody, now: DateTime<Utc>) -> Self {
        let variant = body.variant();
        Self {
            base: PyramidBase {
                id: pyramid_id(variant, &subject),
                variant,
                subject,
                created: now,
                last_updated: now,
                completeness: 0,
                confidence: Confidence::Low,
                status: PyramidStatus::Initializing,
                supporting_entry_ids: Vec::new(),
                questions_pending: Vec::new(),
                questions_asked_count: 0,
                version: 0,
            },
            body,
        }
    }

    pub fn id(&self) -> &str {
        &self.base.id
    }

    pub fn variant(&self) -> Variant {
        self.body.variant()
    }

    pub fn subject(&self) -> &str {
        &self.base.subject
    }

    pub fn status(&self) -> PyramidStatus {
        self.base.status
    }

    pub fn completeness(&self) -> u8 {
        self.base.completeness
    }

    pub fn as_relationship(&self) -> Option<&RelationshipPyramid> {
        match &self.body {
            PyramidBody::Relationship(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_pattern(&self) -> Option<&PatternPyramid> {
        match &self.body {
            PyramidBody::Pattern(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_time(&self) -> Option<&TimePyramid> {
        match &self.body {
            PyramidBody::Time(t) => Some(t),
            _ => None,
        }
    }

    /// Number of datapoint slots settled by answers.
    pub fn completed_slots(&self) -> usize {
        match &self.body {
            PyramidBody::Relationship(r) => r.datapoints.completed(),
            PyramidBody::Pattern(p) => p.datapoints.completed(),
            PyramidBody::Time(t) => t.datapoints.completed(),
        }
    }

    /// Whether the named slot is settled; `None` for keys the variant lacks.
    pub fn is_slot_complete(&self, key: &str) -> Option<bool> {
        match &self.body {
            PyramidBody::Relationship(r) => key
                .parse::<RelationshipSlot>()
                .ok()
                .map(|slot| r.datapoints.is_complete(slot)),
            PyramidBody::Pattern(p) => key
                .parse::<PatternSlot>()
                .ok()
                .map(|slot| p.datapoints.is_complete(slot)),
            PyramidBody::Time(t) => key
                .parse::<TimeSlot>()
                .ok()
                .map(|slot| t.datapoints.is_complete(slot)),
        }
    }

    /// Number of evidence records across all lists.
    pub fn evidence_count(&self) -> usize {
        match &self.body {
            PyramidBody::Relationship(r) => r.interactions.len(),
            PyramidBody::Pattern(p) => p.instances.len() + p.counter_examples.len(),
            PyramidBody::Time(t) => t.entries.len(),
        }
    }

    /// Append one evidence record and run the update pipeline.
    pub fn apply_evidence(
        &mut self,
        evidence: Evidence,
        settings: &PyramidSettings,
        now: DateTime<Utc>,
    ) -> Result<Applied> {
        self.ensure_writable()?;
        if evidence.variant() != self.variant() {
            return Err(PyramidError::invariant(
                "evidence",
                format!(
                    "{} evidence cannot be applied to {} pyramid `{}`",
                    evidence.variant(),
                    self.variant(),
                    self.base.id
                ),
            ));
        }
        evidence.validate(settings)?;

        let entry_id = evidence.entry_id().to_string();
        let already_recorded = match &self.body {
            PyramidBody::Relationship(r) => r.has_entry(&entry_id),
            PyramidBody::Pattern(p) => p.has_entry(&entry_id),
            PyramidBody::Time(t) => t.has_entry(&entry_id),
        };
        if already_recorded {
            return Err(PyramidError::invariant(
                "entry_id",
                format!("entry `{}` is already recorded on `{}`", entry_id, self.base.id),
            ));
        }
        if let PyramidBody::Time(t) = &self.body {
            if !t.covers(evidence.occurred_at()) {
                return Err(PyramidError::invariant(
                    "time_entry.started_at",
                    format!(
                        "{} is outside the period of `{}`",
                        evidence.occurred_at(),
                        self.base.id
                    ),
                ));
            }
        }

        match (&mut self.body, evidence) {
            (PyramidBody::Relationship(r), Evidence::Interaction(record)) => r.append(record),
            (PyramidBody::Pattern(p), Evidence::Instance(instance)) => p.append_instance(instance),
            (PyramidBody::Pattern(p), Evidence::CounterExample(instance)) => {
                p.append_counter_example(instance)
            }
            (PyramidBody::Time(t), Evidence::TimeEntry(entry)) => t.append(entry),
            (_, other) => {
                return Err(PyramidError::invariant(
                    "evidence",
                    format!("{} evidence does not fit `{}`", other.variant(), self.base.id),
                ))
            }
        }

        if !self.base.supporting_entry_ids.contains(&entry_id) {
            self.base.supporting_entry_ids.push(entry_id.clone());
        }
        if self.base.status == PyramidStatus::Initializing {
            self.base.status = PyramidStatus::Active;
        }

        let matured = self.settle(settings, now);
        debug!(
            pyramid_id = %self.base.id,
            entry_id = %entry_id,
            completeness = self.base.completeness,
            "Applied evidence"
        );
        Ok(Applied { matured })
    }

    /// Settle a datapoint from the user's answer.
    pub fn answer(
        &mut self,
        answer: &AnswerToQuestion,
        settings: &PyramidSettings,
        now: DateTime<Utc>,
    ) -> Result<Applied> {
        self.ensure_writable()?;
        if answer.pyramid_id != self.base.id {
            return Err(PyramidError::invariant(
                "pyramid_id",
                format!(
                    "answer for `{}` sent to `{}`",
                    answer.pyramid_id, self.base.id
                ),
            ));
        }

        let key = answer.datapoint_key.trim();
        match &mut self.body {
            PyramidBody::Relationship(r) => {
                let slot = key.parse::<RelationshipSlot>().map_err(unknown_slot)?;
                r.answer(slot, &answer.value, settings, now)?;
            }
            PyramidBody::Pattern(p) => {
                let slot = key.parse::<PatternSlot>().map_err(unknown_slot)?;
                p.answer(slot, &answer.value, now)?;
            }
            PyramidBody::Time(t) => {
                let slot = key.parse::<TimeSlot>().map_err(unknown_slot)?;
                t.answer(slot, &answer.value, settings, now)?;
            }
        }

        self.base
            .questions_pending
            .retain(|q| q.targets_datapoint != key);

        let matured = self.settle(settings, now);
        debug!(
            pyramid_id = %self.base.id,
            datapoint = %key,
            completeness = self.base.completeness,
            "Recorded answer"
        );
        Ok(Applied { matured })
    }

    /// Remember that a question was posed. Returns false if one for the
    /// same datapoint is already pending.
    pub fn record_question(&mut self, question: PendingQuestion) -> bool {
        if self
            .base
            .questions_pending
            .iter()
            .any(|q| q.targets_datapoint == question.targets_datapoint)
        {
            return false;
        }
        self.base.questions_pending.push(question);
        self.base.questions_asked_count += 1;
        self.base.version += 1;
        true
    }

    /// Declare the pyramid stable. Returns the previous status.
    pub fn mark_stable(&mut self, now: DateTime<Utc>) -> PyramidStatus {
        self.set_status(PyramidStatus::Stable, now)
    }

    /// Freeze the pyramid. Returns the previous status.
    pub fn archive(&mut self, now: DateTime<Utc>) -> PyramidStatus {
        self.set_status(PyramidStatus::Archived, now)
    }

    fn set_status(&mut self, status: PyramidStatus, now: DateTime<Utc>) -> PyramidStatus {
        let previous = self.base.status;
        self.base.status = status;
        self.base.last_updated = now;
        self.base.version += 1;
        info!(
            pyramid_id = %self.base.id,
            from = previous.as_str(),
            to = status.as_str(),
            "Pyramid status changed"
        );
        previous
    }

    /// Recompute derived fields, completeness and confidence from scratch.
    ///
    /// Does not touch status or version; running it twice on unchanged
    /// evidence changes nothing.
    pub fn recompute(&mut self, settings: &PyramidSettings, now: DateTime<Utc>) {
        match &mut self.body {
            PyramidBody::Relationship(r) => r.recompute(settings, now),
            PyramidBody::Pattern(p) => p.recompute(settings, now),
            PyramidBody::Time(t) => t.recompute(settings, now),
        }
        self.base.completeness = completeness::completeness(self);
        self.base.confidence =
            completeness::confidence_for(self.base.completeness, settings.maturity_threshold);
    }

    /// Check that a deserialized pyramid is internally consistent.
    pub fn check_consistency(&self) -> Result<()> {
        if self.base.variant != self.body.variant() {
            return Err(PyramidError::invariant(
                "variant",
                format!(
                    "base says {} but payload is {}",
                    self.base.variant,
                    self.body.variant()
                ),
            ));
        }
        if self.base.id != pyramid_id(self.base.variant, &self.base.subject) {
            return Err(PyramidError::invariant(
                "id",
                format!("`{}` does not match subject `{}`", self.base.id, self.base.subject),
            ));
        }
        let expected = completeness::completeness(self);
        if self.base.completeness != expected {
            return Err(PyramidError::invariant(
                "completeness",
                format!("stored {} but datapoints give {}", self.base.completeness, expected),
            ));
        }
        Ok(())
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.base.status == PyramidStatus::Archived {
            return Err(PyramidError::invariant(
                "status",
                format!("`{}` is archived", self.base.id),
            ));
        }
        Ok(())
    }

    fn settle(&mut self, settings: &PyramidSettings, now: DateTime<Utc>) -> Option<MaturitySignal> {
        self.recompute(settings, now);
        self.base.last_updated = now;
        self.base.version += 1;
        self.check_maturity(settings, now)
    }

    fn check_maturity(
        &mut self,
        settings: &PyramidSettings,
        now: DateTime<Utc>,
    ) -> Option<MaturitySignal> {
        if self.base.status > PyramidStatus::Active
            || self.base.completeness < settings.maturity_threshold
        {
            return None;
        }
        self.base.status = PyramidStatus::Mature;
        info!(
            pyramid_id = %self.base.id,
            completeness = self.base.completeness,
            "Pyramid matured"
        );
        Some(MaturitySignal {
            pyramid_id: self.base.id.clone(),
            subject: self.base.subject.clone(),
            variant: self.variant(),
            completeness: self.base.completeness,
            triggered_at: now,
        })
    }
}

fn unknown_slot(message: String) -> PyramidError {
    PyramidError::invariant("datapoint_key", message)
}

//! Engine input, reports and errors.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use pyramid_core::evidence::{check_duration, check_energy};
use pyramid_core::subject::normalize_subject;
use pyramid_core::{
    ActivityType, Direction, InteractionRecord, MaturitySignal, PatternInstance, PyramidError,
    PyramidSettings, PyramidStatus, Sentiment, TimeEntry,
};

/// Structured data pulled from one journal entry by the extraction service.
///
/// Only the shape is checked here; linguistic correctness is the
/// extractor's business.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedEvidence {
    /// People mentioned, e.g. `[[Bob]]`
    #[serde(default)]
    pub subject_refs: Vec<String>,
    #[serde(default)]
    pub duration_minutes: Option<u32>,
    /// Free-form activity label, e.g. "helping"
    #[serde(default)]
    pub activity: Option<String>,
    #[serde(default)]
    pub sentiment: Option<Sentiment>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Source journal entry
    pub entry_id: String,
    pub occurred_at: DateTime<Utc>,
    /// Who gave to whom, when the extractor could tell
    #[serde(default)]
    pub direction: Option<Direction>,
    /// Energy 1 - 10
    #[serde(default)]
    pub energy: Option<u8>,
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default)]
    pub outcome: Option<String>,
    /// Tags whose pattern this entry broke
    #[serde(default)]
    pub exception_tags: Vec<String>,
    #[serde(default)]
    pub location: Option<String>,
}

impl ExtractedEvidence {
    /// Minimal record with the required fields.
    pub fn new(entry_id: impl Into<String>, occurred_at: DateTime<Utc>) -> Self {
        Self {
            subject_refs: Vec::new(),
            duration_minutes: None,
            activity: None,
            sentiment: None,
            tags: Vec::new(),
            entry_id: entry_id.into(),
            occurred_at,
            direction: None,
            energy: None,
            context: None,
            outcome: None,
            exception_tags: Vec::new(),
            location: None,
        }
    }

    /// Parse from JSON, naming the first missing or malformed required field.
    pub fn from_json(value: &serde_json::Value) -> pyramid_core::Result<Self> {
        let object = value
            .as_object()
            .ok_or_else(|| PyramidError::validation("evidence", "expected a JSON object"))?;

        match object.get("entry_id") {
            Some(serde_json::Value::String(id)) if !id.trim().is_empty() => {}
            Some(_) => {
                return Err(PyramidError::validation(
                    "entry_id",
                    "must be a non-blank string",
                ))
            }
            None => return Err(PyramidError::validation("entry_id", "is required")),
        }
        match object.get("occurred_at") {
            Some(serde_json::Value::String(ts)) => {
                if DateTime::parse_from_rfc3339(ts).is_err() {
                    return Err(PyramidError::validation(
                        "occurred_at",
                        format!("`{}` is not an RFC 3339 timestamp", ts),
                    ));
                }
            }
            Some(_) => {
                return Err(PyramidError::validation(
                    "occurred_at",
                    "must be an RFC 3339 timestamp string",
                ))
            }
            None => return Err(PyramidError::validation("occurred_at", "is required")),
        }
        check_count(object, "duration_minutes", u32::MAX as u64)?;
        check_count(object, "energy", u8::MAX as u64)?;

        serde_json::from_value(value.clone())
            .map_err(|e| PyramidError::validation("evidence", e.to_string()))
    }

    /// Structural checks. Runs before anything is routed.
    pub fn validate(&self, settings: &PyramidSettings) -> pyramid_core::Result<()> {
        if self.entry_id.trim().is_empty() {
            return Err(PyramidError::validation("entry_id", "must not be blank"));
        }
        for (index, subject) in self.subject_refs.iter().enumerate() {
            if normalize_subject(subject).is_empty() {
                return Err(PyramidError::validation(
                    format!("subject_refs[{}]", index),
                    "must name someone",
                ));
            }
        }
        if let Some(minutes) = self.duration_minutes {
            check_duration(minutes, settings)?;
        }
        if let Some(energy) = self.energy {
            check_energy(energy)?;
        }
        Ok(())
    }

    /// Distinct normalized people mentioned.
    pub fn subjects(&self) -> Vec<String> {
        let mut subjects: Vec<String> = Vec::new();
        for raw in &self.subject_refs {
            let subject = normalize_subject(raw);
            if !subject.is_empty() && !subjects.contains(&subject) {
                subjects.push(subject);
            }
        }
        subjects
    }

    /// Interaction record for one mentioned person.
    ///
    /// Without an extracted direction the interaction counts as mutual and
    /// does not move the time balance.
    pub fn interaction(&self) -> InteractionRecord {
        InteractionRecord {
            entry_id: self.entry_id.clone(),
            occurred_at: self.occurred_at,
            kind: self
                .activity
                .clone()
                .unwrap_or_else(|| "interaction".to_string()),
            duration_minutes: self.duration_minutes,
            direction: self.direction.unwrap_or(Direction::Mutual),
            your_investment: None,
            their_return: None,
            sentiment: self.sentiment,
            context: self.context.clone().or_else(|| self.location.clone()),
            outcome: self.outcome.clone(),
        }
    }

    /// Pattern occurrence for one tag.
    pub fn instance(&self, tag: &str, is_exception: bool) -> PatternInstance {
        PatternInstance {
            entry_id: self.entry_id.clone(),
            occurred_at: self.occurred_at,
            description: self.activity.clone().unwrap_or_else(|| tag.to_string()),
            context: self.context.clone().or_else(|| self.location.clone()),
            outcome: self.outcome.clone(),
            matches_pattern: !is_exception,
            is_exception,
        }
    }

    /// Time block, if the entry carried a duration.
    pub fn time_entry(&self) -> Option<TimeEntry> {
        let minutes = self.duration_minutes?;
        Some(TimeEntry {
            entry_id: self.entry_id.clone(),
            started_at: self.occurred_at,
            duration_minutes: minutes,
            category: self
                .activity
                .as_deref()
                .map(ActivityType::from_label)
                .unwrap_or_default(),
            people: self.subjects(),
            energy: self.energy,
        })
    }
}

/// An optional non-negative integer field that must fit `max`.
fn check_count(
    object: &serde_json::Map<String, serde_json::Value>,
    field: &str,
    max: u64,
) -> pyramid_core::Result<()> {
    let value = match object.get(field) {
        None | Some(serde_json::Value::Null) => return Ok(()),
        Some(value) => value,
    };
    if let Some(n) = value.as_u64() {
        if n > max {
            return Err(PyramidError::validation(
                field,
                format!("must be at most {}, got {}", max, n),
            ));
        }
        return Ok(());
    }
    if value.as_i64().is_some_and(|n| n < 0) {
        return Err(PyramidError::validation(
            field,
            format!("must not be negative, got {}", value),
        ));
    }
    Err(PyramidError::validation(
        field,
        format!("must be a whole number, got {}", value),
    ))
}

/// Evidence that could not be applied to one pyramid during ingestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedEvidence {
    pub pyramid_id: String,
    pub reason: String,
}

/// What one ingestion did.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IngestReport {
    /// Unique id of this ingestion
    pub ingest_id: String,
    pub entry_id: String,
    /// Existing pyramids that received evidence
    pub updated: Vec<String>,
    /// Pyramids created by this ingestion
    pub created: Vec<String>,
    /// Subjects still below their creation threshold, as `variant:subject`
    pub deferred: Vec<String>,
    pub skipped: Vec<SkippedEvidence>,
    pub signals: Vec<MaturitySignal>,
}

impl IngestReport {
    pub(crate) fn new(entry_id: &str) -> Self {
        Self {
            ingest_id: uuid::Uuid::new_v4().to_string(),
            entry_id: entry_id.to_string(),
            ..Default::default()
        }
    }
}

/// Counts across the collection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CollectionStats {
    pub total: usize,
    pub initializing: usize,
    pub active: usize,
    pub mature: usize,
    pub stable: usize,
    pub archived: usize,
    /// Mean completeness, 0 for an empty collection
    pub average_completeness: f64,
}

impl CollectionStats {
    pub(crate) fn count(&mut self, status: PyramidStatus) {
        self.total += 1;
        match status {
            PyramidStatus::Initializing => self.initializing += 1,
            PyramidStatus::Active => self.active += 1,
            PyramidStatus::Mature => self.mature += 1,
            PyramidStatus::Stable => self.stable += 1,
            PyramidStatus::Archived => self.archived += 1,
        }
    }
}

/// Error types for the engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Rejected by the pyramid model
    #[error(transparent)]
    Pyramid(#[from] PyramidError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// A newer snapshot is already stored
    #[error("Snapshot conflict for {pyramid_id}: stored version {stored}, attempted {attempted}")]
    Conflict {
        pyramid_id: String,
        stored: u64,
        attempted: u64,
    },

    /// Snapshot store failure
    #[error("Store error: {0}")]
    Store(String),

    /// JSON error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;

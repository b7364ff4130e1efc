//! PyramidEngine - the stateful front of the pyramid model.
//!
//! Routes extracted journal evidence to pyramids, creates pyramids once a
//! subject crosses its mention threshold, applies answers, schedules
//! questions across the collection and dispatches maturity signals.

use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use pyramid_core::question::{self, PendingQuestion};
use pyramid_core::scheduler::{self, ScheduledQuestion};
use pyramid_core::subject::{normalize_subject, normalize_tags, pyramid_id};
use pyramid_core::{
    AnswerToQuestion, Applied, Evidence, MaturitySignal, PatternKind, Pyramid, PyramidError,
    PyramidStatus, RelationshipKind, Variant,
};

use crate::config::EngineConfig;
use crate::mentions::{MentionTracker, Observed};
use crate::registry::{PyramidHandle, PyramidRegistry};
use crate::signal::{LoggingMaturityHandler, MaturityHandler};
use crate::store::{PyramidSnapshot, SnapshotStore, SNAPSHOT_SCHEMA_VERSION};
use crate::types::{
    CollectionStats, EngineError, ExtractedEvidence, IngestReport, Result, SkippedEvidence,
};

/// What a pyramid is about; enough to build an empty one.
#[derive(Debug, Clone, PartialEq)]
pub enum PyramidTarget {
    /// A person
    Relationship {
        subject: String,
        kind: RelationshipKind,
    },
    /// A behavior
    Pattern { subject: String, kind: PatternKind },
    /// The configured period containing `anchor`
    Time { anchor: DateTime<Utc> },
}

impl PyramidTarget {
    pub fn relationship(subject: &str) -> Self {
        Self::Relationship {
            subject: normalize_subject(subject),
            kind: RelationshipKind::Other,
        }
    }

    pub fn pattern(kind: PatternKind) -> Self {
        Self::Pattern {
            subject: kind.as_str().to_string(),
            kind,
        }
    }

    pub fn variant(&self) -> Variant {
        match self {
            Self::Relationship { .. } => Variant::Relationship,
            Self::Pattern { .. } => Variant::Pattern,
            Self::Time { .. } => Variant::Time,
        }
    }

    fn build(&self, config: &EngineConfig, now: DateTime<Utc>) -> Pyramid {
        match self {
            Self::Relationship { subject, kind } => Pyramid::relationship(subject, *kind, now),
            Self::Pattern { subject, kind } => Pyramid::pattern(subject, *kind, now),
            Self::Time { anchor } => Pyramid::time(config.creation.time_period, *anchor, now),
        }
    }

    /// Subject as stored on the pyramid.
    fn subject(&self, config: &EngineConfig) -> String {
        match self {
            Self::Relationship { subject, .. } => normalize_subject(subject),
            Self::Pattern { subject, .. } => subject.trim().to_lowercase(),
            Self::Time { anchor } => config.creation.time_period.label(*anchor),
        }
    }

    fn threshold(&self, config: &EngineConfig) -> usize {
        match self {
            Self::Relationship { .. } => config.creation.relationship_threshold,
            Self::Pattern { .. } => config.creation.pattern_threshold,
            Self::Time { .. } => config.creation.time_threshold,
        }
    }
}

/// Result of creating a pyramid from buffered mentions.
struct Promotion {
    pyramid_id: String,
    inserted: bool,
    signals: Vec<MaturitySignal>,
    skipped: Vec<SkippedEvidence>,
}

/// The pyramid engine.
pub struct PyramidEngine {
    /// Configuration
    config: EngineConfig,
    /// Pyramids by id
    registry: PyramidRegistry,
    /// Mentions below the creation threshold
    mentions: MentionTracker,
    /// Maturity signal handlers
    handlers: Arc<RwLock<Vec<Arc<dyn MaturityHandler>>>>,
}

impl PyramidEngine {
    /// Create an engine with default configuration and a logging handler.
    pub fn new() -> Self {
        Self::build(EngineConfig::default())
    }

    /// Create with custom configuration.
    pub fn with_config(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: EngineConfig) -> Self {
        let handlers: Vec<Arc<dyn MaturityHandler>> = vec![Arc::new(LoggingMaturityHandler)];
        Self {
            config,
            registry: PyramidRegistry::new(),
            mentions: MentionTracker::new(),
            handlers: Arc::new(RwLock::new(handlers)),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Register an additional maturity handler.
    pub async fn add_handler(&self, handler: Arc<dyn MaturityHandler>) {
        let mut handlers = self.handlers.write().await;
        debug!(handler = handler.name(), "Registered maturity handler");
        handlers.push(handler);
    }

    // =========================================================================
    // Ingestion
    // =========================================================================

    /// Route one journal entry's evidence to every pyramid it concerns.
    ///
    /// The record is validated as a whole before anything is touched.
    /// Evidence a single pyramid refuses (archived, already recorded) is
    /// listed in the report's `skipped` instead of failing the ingestion.
    pub async fn ingest(&self, evidence: ExtractedEvidence) -> Result<IngestReport> {
        if let Err(e) = evidence.validate(&self.config.pyramids) {
            warn!(entry_id = %evidence.entry_id, error = %e, "Rejected extracted evidence");
            return Err(e.into());
        }

        let mut report = IngestReport::new(&evidence.entry_id);

        for subject in evidence.subjects() {
            let target = PyramidTarget::relationship(&subject);
            let record = Evidence::Interaction(evidence.interaction());
            self.route(&target, record, &mut report).await;
        }

        let exceptions = normalize_tags(&evidence.exception_tags);
        let mut tags = normalize_tags(&evidence.tags);
        tags.extend(exceptions.iter().cloned());
        let mut routed: Vec<String> = Vec::new();
        for tag in normalize_tags(&tags) {
            let Some((subject, kind)) = self.config.creation.pattern_for(&tag) else {
                continue;
            };
            if routed.contains(&subject) {
                continue;
            }
            let is_exception = exceptions.contains(&tag);
            let target = PyramidTarget::Pattern {
                subject: subject.clone(),
                kind,
            };
            let record = Evidence::Instance(evidence.instance(&tag, is_exception));
            self.route(&target, record, &mut report).await;
            routed.push(subject);
        }

        if let Some(entry) = evidence.time_entry() {
            let target = PyramidTarget::Time {
                anchor: evidence.occurred_at,
            };
            self.route(&target, Evidence::TimeEntry(entry), &mut report)
                .await;
        }

        info!(
            entry_id = %report.entry_id,
            updated = report.updated.len(),
            created = report.created.len(),
            deferred = report.deferred.len(),
            "Ingested evidence"
        );
        self.dispatch(&report.signals).await;
        Ok(report)
    }

    async fn route(&self, target: &PyramidTarget, evidence: Evidence, report: &mut IngestReport) {
        let subject = target.subject(&self.config);
        let id = pyramid_id(target.variant(), &subject);

        if let Some(handle) = self.registry.handle(&id) {
            self.apply_routed(&id, handle, evidence, report).await;
            return;
        }

        let threshold = target.threshold(&self.config);
        let observed = self
            .mentions
            .observe(target.variant(), &subject, evidence, threshold, |buffer| {
                self.promote(target, buffer)
            });

        match observed {
            Observed::Buffered { .. } => {
                report
                    .deferred
                    .push(format!("{}:{}", target.variant(), subject));
            }
            Observed::Promoted(promotion) => self.record_promotion(promotion, report),
            Observed::Direct(evidence) => match self.registry.handle(&id) {
                Some(handle) => self.apply_routed(&id, handle, evidence, report).await,
                None => report.skipped.push(SkippedEvidence {
                    pyramid_id: id.clone(),
                    reason: PyramidError::NotFound(id).to_string(),
                }),
            },
        }
    }

    async fn apply_routed(
        &self,
        id: &str,
        handle: PyramidHandle,
        evidence: Evidence,
        report: &mut IngestReport,
    ) {
        let mut pyramid = handle.write().await;
        match pyramid.apply_evidence(evidence, &self.config.pyramids, Utc::now()) {
            Ok(applied) => {
                report.updated.push(id.to_string());
                report.signals.extend(applied.matured);
            }
            Err(e) => {
                warn!(pyramid_id = %id, error = %e, "Evidence skipped");
                report.skipped.push(SkippedEvidence {
                    pyramid_id: id.to_string(),
                    reason: e.to_string(),
                });
            }
        }
    }

    /// Build a pyramid from buffered evidence and register it.
    ///
    /// Runs under the mention tracker's entry lock and touches nothing that
    /// needs `.await`: the new pyramid is owned until it is inserted.
    fn promote(&self, target: &PyramidTarget, buffer: Vec<Evidence>) -> Promotion {
        let now = Utc::now();
        let mut pyramid = target.build(&self.config, now);
        let pyramid_id = pyramid.id().to_string();

        let to_apply: Vec<Evidence> = if self.config.creation.backfill_on_create {
            buffer
        } else {
            buffer.into_iter().last().into_iter().collect()
        };

        let mut signals = Vec::new();
        let mut skipped = Vec::new();
        for evidence in to_apply {
            match pyramid.apply_evidence(evidence, &self.config.pyramids, now) {
                Ok(applied) => signals.extend(applied.matured),
                Err(e) => skipped.push(SkippedEvidence {
                    pyramid_id: pyramid_id.clone(),
                    reason: e.to_string(),
                }),
            }
        }

        let evidence_count = pyramid.evidence_count();
        let (_, inserted) = self.registry.insert_if_absent(pyramid);
        if inserted {
            info!(
                pyramid_id = %pyramid_id,
                evidence = evidence_count,
                "Created pyramid"
            );
        } else {
            warn!(pyramid_id = %pyramid_id, "Pyramid already registered; buffered evidence dropped");
        }
        Promotion {
            pyramid_id,
            inserted,
            signals,
            skipped,
        }
    }

    fn record_promotion(&self, promotion: Promotion, report: &mut IngestReport) {
        if promotion.inserted {
            report.created.push(promotion.pyramid_id);
            report.signals.extend(promotion.signals);
        }
        report.skipped.extend(promotion.skipped);
    }

    /// Create a pyramid directly, bypassing the mention threshold.
    ///
    /// Any buffered mentions for the subject are applied to it.
    pub async fn create_pyramid(&self, target: PyramidTarget) -> Result<String> {
        let subject = target.subject(&self.config);
        let id = pyramid_id(target.variant(), &subject);
        if self.registry.contains(&id) {
            return Err(PyramidError::invariant("pyramid_id", format!("`{}` already exists", id)).into());
        }

        let promotion = self
            .mentions
            .promote_now(target.variant(), &subject, |buffer| self.promote(&target, buffer));
        match promotion {
            Some(promotion) if promotion.inserted => {
                self.dispatch(&promotion.signals).await;
                Ok(promotion.pyramid_id)
            }
            _ => Err(PyramidError::invariant("pyramid_id", format!("`{}` already exists", id)).into()),
        }
    }

    // =========================================================================
    // Single-pyramid operations
    // =========================================================================

    fn handle(&self, id: &str) -> Result<PyramidHandle> {
        self.registry
            .handle(id)
            .ok_or_else(|| PyramidError::NotFound(id.to_string()).into())
    }

    /// Append evidence to a known pyramid.
    pub async fn apply_evidence(&self, id: &str, evidence: Evidence) -> Result<Applied> {
        let handle = self.handle(id)?;
        let applied = {
            let mut pyramid = handle.write().await;
            pyramid.apply_evidence(evidence, &self.config.pyramids, Utc::now())?
        };
        self.dispatch_one(&applied).await;
        Ok(applied)
    }

    /// Apply the user's answer.
    pub async fn answer(&self, answer: AnswerToQuestion) -> Result<Applied> {
        let handle = self.handle(&answer.pyramid_id)?;
        let applied = {
            let mut pyramid = handle.write().await;
            pyramid
                .answer(&answer, &self.config.pyramids, Utc::now())
                .map_err(|e| {
                    warn!(pyramid_id = %answer.pyramid_id, error = %e, "Rejected answer");
                    e
                })?
        };
        self.dispatch_one(&applied).await;
        Ok(applied)
    }

    /// Next question for one pyramid. Read-only.
    pub async fn next_question(&self, id: &str) -> Result<Option<PendingQuestion>> {
        let handle = self.handle(id)?;
        let pyramid = handle.read().await;
        Ok(question::next_question(
            &pyramid,
            &self.config.pyramids,
            Utc::now(),
        ))
    }

    /// Pick the next question for a pyramid and remember that it was asked.
    pub async fn record_question_asked(&self, id: &str) -> Result<Option<PendingQuestion>> {
        let handle = self.handle(id)?;
        let mut pyramid = handle.write().await;
        let Some(question) = question::next_question(&pyramid, &self.config.pyramids, Utc::now())
        else {
            return Ok(None);
        };
        if pyramid.record_question(question.clone()) {
            debug!(pyramid_id = %id, question_id = %question.id, "Question asked");
        }
        Ok(Some(question))
    }

    /// Best question across every pyramid. Read-only.
    pub async fn next_global_question(&self) -> Option<ScheduledQuestion> {
        self.ranked_questions().await.into_iter().next()
    }

    /// Every available question, best first.
    pub async fn ranked_questions(&self) -> Vec<ScheduledQuestion> {
        let pyramids = self.registry.snapshots().await;
        scheduler::rank(
            &pyramids,
            &self.config.pyramids,
            &self.config.scheduler.recency,
            Utc::now(),
        )
    }

    /// Declare a pyramid stable. Returns the previous status.
    pub async fn mark_stable(&self, id: &str) -> Result<PyramidStatus> {
        let handle = self.handle(id)?;
        let mut pyramid = handle.write().await;
        Ok(pyramid.mark_stable(Utc::now()))
    }

    /// Archive a pyramid. Returns the previous status.
    pub async fn archive(&self, id: &str) -> Result<PyramidStatus> {
        let handle = self.handle(id)?;
        let mut pyramid = handle.write().await;
        Ok(pyramid.archive(Utc::now()))
    }

    /// Snapshot of one pyramid.
    pub async fn get(&self, id: &str) -> Option<Pyramid> {
        self.registry.snapshot(id).await
    }

    /// Snapshots of every pyramid, ordered by id.
    pub async fn list(&self) -> Vec<Pyramid> {
        self.registry.snapshots().await
    }

    /// Buffered mentions for a subject not yet promoted to a pyramid.
    pub fn pending_mentions(&self, variant: Variant, subject: &str) -> Option<usize> {
        self.mentions.pending(variant, subject)
    }

    /// Status counts and mean completeness.
    pub async fn stats(&self) -> CollectionStats {
        let pyramids = self.registry.snapshots().await;
        let mut stats = CollectionStats::default();
        let mut completeness_sum = 0u64;
        for pyramid in &pyramids {
            stats.count(pyramid.status());
            completeness_sum += pyramid.completeness() as u64;
        }
        if stats.total > 0 {
            stats.average_completeness = completeness_sum as f64 / stats.total as f64;
        }
        stats
    }

    // =========================================================================
    // Persistence
    // =========================================================================

    /// Write every pyramid to a store. Returns the number written.
    pub async fn persist(&self, store: &dyn SnapshotStore) -> Result<usize> {
        let now = Utc::now();
        let pyramids = self.registry.snapshots().await;
        let count = pyramids.len();
        try_join_all(
            pyramids
                .into_iter()
                .map(|pyramid| store.put(PyramidSnapshot::new(pyramid, now))),
        )
        .await?;
        info!(count, "Persisted pyramids");
        Ok(count)
    }

    /// Load every snapshot from a store, replacing in-memory pyramids with
    /// the same id. Returns the number loaded.
    pub async fn restore(&self, store: &dyn SnapshotStore) -> Result<usize> {
        let snapshots = store.list().await?;
        let count = snapshots.len();
        for snapshot in snapshots {
            if snapshot.schema_version != SNAPSHOT_SCHEMA_VERSION {
                return Err(EngineError::Store(format!(
                    "{}: unsupported schema version {}",
                    snapshot.pyramid_id(),
                    snapshot.schema_version
                )));
            }
            snapshot.pyramid.check_consistency()?;
            let pyramid = snapshot.pyramid;
            self.mentions
                .mark_promoted(pyramid.variant(), pyramid.subject());
            self.registry.replace(pyramid);
        }
        info!(count, "Restored pyramids");
        Ok(count)
    }

    // =========================================================================
    // Signals
    // =========================================================================

    async fn dispatch_one(&self, applied: &Applied) {
        if let Some(signal) = &applied.matured {
            self.dispatch(std::slice::from_ref(signal)).await;
        }
    }

    /// Hand signals to every handler. Handler failures are logged, never
    /// propagated: the pyramid update has already happened.
    async fn dispatch(&self, signals: &[MaturitySignal]) {
        if signals.is_empty() {
            return;
        }
        let handlers = self.handlers.read().await.clone();
        for signal in signals {
            for handler in &handlers {
                if let Err(e) = handler.on_mature(signal).await {
                    warn!(
                        handler = handler.name(),
                        pyramid_id = %signal.pyramid_id,
                        error = %e,
                        "Maturity handler failed"
                    );
                }
            }
        }
    }
}

impl Default for PyramidEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn mention(entry: &str, person: &str, minutes_ago: i64) -> ExtractedEvidence {
        let mut evidence = ExtractedEvidence::new(entry, Utc::now() - Duration::minutes(minutes_ago));
        evidence.subject_refs = vec![format!("[[{}]]", person)];
        evidence
    }

    #[tokio::test]
    async fn test_relationship_created_at_threshold() {
        let engine = PyramidEngine::new();

        let report = engine.ingest(mention("e1", "bob", 30)).await.unwrap();
        assert_eq!(report.deferred, vec!["relationship:Bob"]);
        engine.ingest(mention("e2", "bob", 20)).await.unwrap();
        assert_eq!(engine.pending_mentions(Variant::Relationship, "Bob"), Some(2));
        assert!(engine.get("relationship_bob").await.is_none());

        let report = engine.ingest(mention("e3", "Bob", 10)).await.unwrap();
        assert_eq!(report.created, vec!["relationship_bob"]);

        let bob = engine.get("relationship_bob").await.unwrap();
        assert_eq!(bob.evidence_count(), 3);
        assert_eq!(bob.base.supporting_entry_ids, vec!["e1", "e2", "e3"]);
        assert_eq!(bob.status(), PyramidStatus::Active);

        let report = engine.ingest(mention("e4", "bob", 5)).await.unwrap();
        assert_eq!(report.updated, vec!["relationship_bob"]);
    }

    #[tokio::test]
    async fn test_without_backfill_only_trigger_applies() {
        let mut config = EngineConfig::default();
        config.creation.backfill_on_create = false;
        let engine = PyramidEngine::with_config(config).unwrap();

        for (i, entry) in ["e1", "e2", "e3"].iter().enumerate() {
            engine.ingest(mention(entry, "Ann", 30 - i as i64)).await.unwrap();
        }
        let ann = engine.get("relationship_ann").await.unwrap();
        assert_eq!(ann.base.supporting_entry_ids, vec!["e3"]);
    }

    #[tokio::test]
    async fn test_create_pyramid_drains_buffer() {
        let engine = PyramidEngine::new();
        engine.ingest(mention("e1", "Cy", 10)).await.unwrap();

        let id = engine
            .create_pyramid(PyramidTarget::relationship("cy"))
            .await
            .unwrap();
        assert_eq!(id, "relationship_cy");
        assert_eq!(engine.get(&id).await.unwrap().evidence_count(), 1);

        let err = engine
            .create_pyramid(PyramidTarget::relationship("Cy"))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Pyramid(PyramidError::StateInvariant { .. })));
    }

    #[tokio::test]
    async fn test_unknown_pyramid_is_not_found() {
        let engine = PyramidEngine::new();
        let err = engine.archive("relationship_nobody").await.unwrap_err();
        match err {
            EngineError::Pyramid(e) => assert_eq!(e.kind(), pyramid_core::ErrorKind::NotFound),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let mut config = EngineConfig::default();
        config.creation.pattern_threshold = 20;
        assert!(matches!(
            PyramidEngine::with_config(config),
            Err(EngineError::Config(_))
        ));
    }
}

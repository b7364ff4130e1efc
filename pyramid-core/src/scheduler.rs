//! Cross-pyramid question scheduling.
//!
//! Picks the single most valuable question across a collection: pyramids
//! that know the least score highest, optionally weighted by how long they
//! have gone without an update.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::pyramid::Pyramid;
use crate::question::{next_question, PendingQuestion};
use crate::settings::PyramidSettings;
use crate::types::PyramidStatus;

/// How staleness affects a pyramid's score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum RecencyPolicy {
    /// Every pyramid weighs 1.0
    Constant,
    /// Weight halves every `days` since the last update, never below `floor`
    HalfLife { days: f64, floor: f64 },
}

impl Default for RecencyPolicy {
    fn default() -> Self {
        Self::Constant
    }
}

impl RecencyPolicy {
    /// Weight in `(0, 1]` for a pyramid last updated at `last_updated`.
    pub fn weight(&self, last_updated: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
        match self {
            Self::Constant => 1.0,
            Self::HalfLife { days, floor } => {
                if *days <= 0.0 {
                    return 1.0;
                }
                let elapsed_days = (now - last_updated).num_seconds().max(0) as f64 / 86_400.0;
                0.5f64.powf(elapsed_days / days).max(*floor).min(1.0)
            }
        }
    }

    /// Reject nonsensical parameters.
    pub fn validate(&self) -> std::result::Result<(), String> {
        match self {
            Self::Constant => Ok(()),
            Self::HalfLife { days, floor } => {
                if !(*days > 0.0) {
                    return Err(format!("half-life must be positive, got {}", days));
                }
                if !(0.0..=1.0).contains(floor) {
                    return Err(format!("floor must be within 0..=1, got {}", floor));
                }
                Ok(())
            }
        }
    }
}

/// A question together with the score that ranked it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledQuestion {
    pub question: PendingQuestion,
    /// `(100 - completeness) * recency_weight`
    pub score: f64,
    pub completeness: u8,
    pub recency_weight: f64,
    /// Creation time of the pyramid, used to break ties
    pub pyramid_created: DateTime<Utc>,
}

/// Every available question, best first.
///
/// Ties go to the earliest-created pyramid, then to the smaller id.
pub fn rank(
    pyramids: &[Pyramid],
    settings: &PyramidSettings,
    policy: &RecencyPolicy,
    now: DateTime<Utc>,
) -> Vec<ScheduledQuestion> {
    let mut ranked: Vec<ScheduledQuestion> = pyramids
        .iter()
        .filter(|p| p.status() != PyramidStatus::Archived)
        .filter_map(|pyramid| {
            let question = next_question(pyramid, settings, now)?;
            let recency_weight = policy.weight(pyramid.base.last_updated, now);
            let completeness = pyramid.completeness();
            Some(ScheduledQuestion {
                question,
                score: f64::from(100 - completeness.min(100)) * recency_weight,
                completeness,
                recency_weight,
                pyramid_created: pyramid.base.created,
            })
        })
        .collect();

    ranked.sort_by(compare);
    ranked
}

/// The single best question, if any pyramid has one.
pub fn next_global_question(
    pyramids: &[Pyramid],
    settings: &PyramidSettings,
    policy: &RecencyPolicy,
    now: DateTime<Utc>,
) -> Option<ScheduledQuestion> {
    rank(pyramids, settings, policy, now).into_iter().next()
}

fn compare(a: &ScheduledQuestion, b: &ScheduledQuestion) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| a.pyramid_created.cmp(&b.pyramid_created))
        .then_with(|| a.question.pyramid_id.cmp(&b.question.pyramid_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PatternKind, RelationshipKind};
    use chrono::Duration;

    fn pattern_with_completeness(name: &str, completeness: u8, created: DateTime<Utc>) -> Pyramid {
        let mut pyramid = Pyramid::pattern(name, PatternKind::Other, created);
        pyramid.base.completeness = completeness;
        pyramid
    }

    #[test]
    fn test_least_complete_wins() {
        let now = Utc::now();
        let pyramids = vec![
            pattern_with_completeness("a", 80, now),
            pattern_with_completeness("b", 40, now),
        ];
        let best = next_global_question(
            &pyramids,
            &PyramidSettings::default(),
            &RecencyPolicy::Constant,
            now,
        )
        .unwrap();
        assert_eq!(best.question.pyramid_id, "pattern_b");
        assert_eq!(best.score, 60.0);
    }

    #[test]
    fn test_ties_prefer_older_then_id() {
        let now = Utc::now();
        let pyramids = vec![
            pattern_with_completeness("c", 50, now),
            pattern_with_completeness("b", 50, now - Duration::days(1)),
            pattern_with_completeness("a", 50, now),
        ];
        let ranked = rank(
            &pyramids,
            &PyramidSettings::default(),
            &RecencyPolicy::Constant,
            now,
        );
        let order: Vec<&str> = ranked.iter().map(|q| q.question.pyramid_id.as_str()).collect();
        assert_eq!(order, vec!["pattern_b", "pattern_a", "pattern_c"]);
    }

    #[test]
    fn test_archived_and_silent_pyramids_skipped() {
        let now = Utc::now();
        let mut archived = pattern_with_completeness("a", 0, now);
        archived.archive(now);
        let empty_relationship = Pyramid::relationship("Bob", RelationshipKind::Friend, now);
        let ranked = rank(
            &[archived, empty_relationship],
            &PyramidSettings::default(),
            &RecencyPolicy::Constant,
            now,
        );
        assert!(ranked.is_empty());
    }

    #[test]
    fn test_half_life_weight() {
        let now = Utc::now();
        let policy = RecencyPolicy::HalfLife {
            days: 7.0,
            floor: 0.1,
        };
        assert!((policy.weight(now, now) - 1.0).abs() < 1e-9);
        assert!((policy.weight(now - Duration::days(7), now) - 0.5).abs() < 1e-9);
        assert!((policy.weight(now - Duration::days(365), now) - 0.1).abs() < 1e-9);
        assert!(RecencyPolicy::HalfLife { days: 0.0, floor: 0.1 }.validate().is_err());
    }

    #[test]
    fn test_policy_yaml() {
        let policy: RecencyPolicy =
            serde_yaml::from_str("policy: half_life\ndays: 14\nfloor: 0.25\n").unwrap();
        assert_eq!(
            policy,
            RecencyPolicy::HalfLife {
                days: 14.0,
                floor: 0.25
            }
        );
    }
}

//! Configuration for the pyramid engine.

use serde::{Deserialize, Serialize};

use pyramid_core::{PatternKind, PeriodKind, PyramidSettings, RecencyPolicy};

use crate::types::{EngineError, Result};

/// Configuration for a [`crate::PyramidEngine`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Recomputation, question and maturity thresholds
    pub pyramids: PyramidSettings,
    /// When pyramids get created
    pub creation: CreationConfig,
    /// Cross-pyramid question ordering
    pub scheduler: SchedulerConfig,
    /// General settings
    pub general: GeneralConfig,
}

impl EngineConfig {
    /// Load config from YAML.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to YAML.
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Check every section, naming the offending field.
    pub fn validate(&self) -> Result<()> {
        self.pyramids
            .validate()
            .map_err(|e| EngineError::Config(format!("pyramids.{}: {}", e.field(), e)))?;
        self.creation.validate()?;
        self.scheduler
            .recency
            .validate()
            .map_err(|e| EngineError::Config(format!("scheduler.recency: {}", e)))?;
        Ok(())
    }
}

/// When mentions turn into pyramids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CreationConfig {
    /// Mentions of a person before a relationship pyramid exists (2 - 10)
    pub relationship_threshold: usize,
    /// Occurrences of a pattern before a pattern pyramid exists (3 - 15)
    pub pattern_threshold: usize,
    /// Timed entries before a period's time pyramid exists
    pub time_threshold: usize,
    /// Apply the buffered evidence when a pyramid is created
    pub backfill_on_create: bool,
    /// Pattern kinds detected from tags; empty tracks every tag
    pub tracked_patterns: Vec<PatternKind>,
    /// Period covered by each time pyramid
    pub time_period: PeriodKind,
}

impl Default for CreationConfig {
    fn default() -> Self {
        Self {
            relationship_threshold: 3,
            pattern_threshold: 5,
            time_threshold: 1,
            backfill_on_create: true,
            tracked_patterns: vec![
                PatternKind::Prosocial,
                PatternKind::Transactional,
                PatternKind::Commitment,
                PatternKind::ValueAlignment,
                PatternKind::EnergyManagement,
            ],
            time_period: PeriodKind::Week,
        }
    }
}

impl CreationConfig {
    fn validate(&self) -> Result<()> {
        if !(2..=10).contains(&self.relationship_threshold) {
            return Err(EngineError::Config(format!(
                "creation.relationship_threshold must be within 2..=10, got {}",
                self.relationship_threshold
            )));
        }
        if !(3..=15).contains(&self.pattern_threshold) {
            return Err(EngineError::Config(format!(
                "creation.pattern_threshold must be within 3..=15, got {}",
                self.pattern_threshold
            )));
        }
        if self.time_threshold == 0 {
            return Err(EngineError::Config(
                "creation.time_threshold must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Pattern subject and kind for a tag, if the tag is tracked.
    pub fn pattern_for(&self, tag: &str) -> Option<(String, PatternKind)> {
        match PatternKind::from_tag(tag) {
            Some(kind) if self.tracked_patterns.is_empty() || self.tracked_patterns.contains(&kind) => {
                Some((kind.as_str().to_string(), kind))
            }
            Some(_) => None,
            None if self.tracked_patterns.is_empty() => Some((tag.to_string(), PatternKind::Other)),
            None => None,
        }
    }
}

/// Cross-pyramid scheduling.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// How staleness weighs into a pyramid's score
    pub recency: RecencyPolicy,
}

/// General configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.creation.relationship_threshold, 3);
        assert_eq!(config.creation.pattern_threshold, 5);
        assert_eq!(config.pyramids.maturity_threshold, 70);
        assert_eq!(config.scheduler.recency, RecencyPolicy::Constant);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_yaml_roundtrip() {
        let config = EngineConfig::default();
        let yaml = config.to_yaml().unwrap();
        let parsed = EngineConfig::from_yaml(&yaml).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_partial_yaml() {
        let yaml = "creation:\n  relationship_threshold: 2\n  tracked_patterns: []\nscheduler:\n  recency:\n    policy: half_life\n    days: 7\n    floor: 0.2\n";
        let config = EngineConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.creation.relationship_threshold, 2);
        assert_eq!(config.creation.pattern_threshold, 5);
        assert!(config.creation.tracked_patterns.is_empty());
        assert!(matches!(config.scheduler.recency, RecencyPolicy::HalfLife { .. }));
    }

    #[test]
    fn test_out_of_range_values() {
        let err = EngineConfig::from_yaml("creation:\n  relationship_threshold: 1\n").unwrap_err();
        assert!(err.to_string().contains("creation.relationship_threshold"));

        let err = EngineConfig::from_yaml("pyramids:\n  maturity_threshold: 40\n").unwrap_err();
        assert!(err.to_string().contains("maturity_threshold"));
    }

    #[test]
    fn test_pattern_for_tag() {
        let creation = CreationConfig::default();
        assert_eq!(
            creation.pattern_for("helping"),
            Some(("prosocial".to_string(), PatternKind::Prosocial))
        );
        assert_eq!(creation.pattern_for("learning"), None);
        assert_eq!(creation.pattern_for("gardening"), None);

        let everything = CreationConfig {
            tracked_patterns: vec![],
            ..Default::default()
        };
        assert_eq!(
            everything.pattern_for("gardening"),
            Some(("gardening".to_string(), PatternKind::Other))
        );
    }
}

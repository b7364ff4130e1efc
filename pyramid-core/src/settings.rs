//! Thresholds that drive recomputation, question gating and maturity.

use serde::{Deserialize, Serialize};

use crate::error::{PyramidError, Result};

/// Tunable thresholds for pyramid behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PyramidSettings {
    /// Completeness at which an active pyramid becomes mature (50 - 100)
    pub maturity_threshold: u8,
    /// Net minutes given beyond which a relationship can be prosocial
    pub imbalance_threshold_minutes: i64,
    /// Minimum you→them interactions that count as repeated giving
    pub repeated_giving_min: usize,
    /// Idle span between time entries that counts as a gap
    pub gap_threshold_minutes: i64,
    /// Total unexplained gap minutes before asking about gaps
    pub gap_question_total_minutes: i64,
    /// Trailing window for sustainability assessment (days)
    pub sustainability_window_days: i64,
    /// Window compared against the previous one for trends (days)
    pub trend_window_days: i64,
    /// Interactions required before asking about reciprocity
    pub reciprocity_min_interactions: usize,
    /// Instances that must be exceeded before asking about exceptions
    pub exceptions_min_instances: usize,
    /// Instances that must be exceeded before asking about sustainability
    pub sustainability_min_instances: usize,
    /// Upper bound for any single duration
    pub max_duration_minutes: u32,
}

impl Default for PyramidSettings {
    fn default() -> Self {
        Self {
            maturity_threshold: 70,
            imbalance_threshold_minutes: 180,
            repeated_giving_min: 2,
            gap_threshold_minutes: 120,
            gap_question_total_minutes: 120,
            sustainability_window_days: 14,
            trend_window_days: 14,
            reciprocity_min_interactions: 3,
            exceptions_min_instances: 5,
            sustainability_min_instances: 10,
            max_duration_minutes: 1440, // 24 hours
        }
    }
}

impl PyramidSettings {
    /// Check that every threshold is in range.
    pub fn validate(&self) -> Result<()> {
        if !(50..=100).contains(&self.maturity_threshold) {
            return Err(PyramidError::validation(
                "maturity_threshold",
                format!("must be within 50..=100, got {}", self.maturity_threshold),
            ));
        }
        if self.imbalance_threshold_minutes < 0 {
            return Err(PyramidError::validation(
                "imbalance_threshold_minutes",
                "must not be negative",
            ));
        }
        if self.gap_threshold_minutes <= 0 {
            return Err(PyramidError::validation(
                "gap_threshold_minutes",
                "must be positive",
            ));
        }
        if self.sustainability_window_days <= 0 || self.trend_window_days <= 0 {
            return Err(PyramidError::validation(
                "sustainability_window_days",
                "windows must span at least one day",
            ));
        }
        if self.max_duration_minutes == 0 {
            return Err(PyramidError::validation(
                "max_duration_minutes",
                "must be positive",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let settings = PyramidSettings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.maturity_threshold, 70);
        assert_eq!(settings.imbalance_threshold_minutes, 180);
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let settings: PyramidSettings = serde_yaml::from_str("maturity_threshold: 80\n").unwrap();
        assert_eq!(settings.maturity_threshold, 80);
        assert_eq!(settings.gap_threshold_minutes, 120);
    }

    #[test]
    fn test_out_of_range_threshold() {
        let settings = PyramidSettings {
            maturity_threshold: 30,
            ..Default::default()
        };
        let err = settings.validate().unwrap_err();
        assert_eq!(err.field(), "maturity_threshold");
    }
}

//! Completeness and confidence.

use crate::pyramid::Pyramid;
use crate::types::Confidence;

/// Percentage of settled datapoint slots, rounded to the nearest integer.
pub fn completeness(pyramid: &Pyramid) -> u8 {
    ratio(pyramid.completed_slots(), pyramid.variant().slot_count())
}

/// `round(100 * completed / total)`, 0 for an empty total.
pub fn ratio(completed: usize, total: usize) -> u8 {
    if total == 0 {
        return 0;
    }
    let completed = completed.min(total);
    ((completed as f64 / total as f64) * 100.0).round() as u8
}

/// Confidence band for a completeness value.
pub fn confidence_for(completeness: u8, maturity_threshold: u8) -> Confidence {
    if completeness >= maturity_threshold {
        Confidence::High
    } else if completeness >= maturity_threshold / 2 {
        Confidence::Medium
    } else {
        Confidence::Low
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ratio() {
        assert_eq!(ratio(0, 7), 0);
        assert_eq!(ratio(4, 7), 57);
        assert_eq!(ratio(5, 7), 71);
        assert_eq!(ratio(6, 6), 100);
        assert_eq!(ratio(3, 5), 60);
        assert_eq!(ratio(1, 0), 0);
    }

    #[test]
    fn test_confidence_bands() {
        assert_eq!(confidence_for(71, 70), Confidence::High);
        assert_eq!(confidence_for(35, 70), Confidence::Medium);
        assert_eq!(confidence_for(34, 70), Confidence::Low);
    }
}

//! Core enumerations shared by every pyramid variant.
//!
//! With the `typescript` feature enabled, these types can be exported to TypeScript
//! using ts-rs for consistency with the journaling frontend.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[cfg(feature = "typescript")]
use ts_rs::TS;

/// Which kind of knowledge a pyramid accumulates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(rename_all = "snake_case")]
pub enum Variant {
    /// Interactions and dynamics with one person
    Relationship,
    /// A recurring behavior
    Pattern,
    /// Time allocation over a period
    Time,
}

impl Variant {
    /// Get string representation (also the id prefix).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Relationship => "relationship",
            Self::Pattern => "pattern",
            Self::Time => "time",
        }
    }

    /// Number of datapoint slots for this variant.
    pub fn slot_count(&self) -> usize {
        match self {
            Self::Relationship => 7,
            Self::Pattern => 6,
            Self::Time => 5,
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status. Ordered so that "active or lower" is a comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(rename_all = "snake_case")]
pub enum PyramidStatus {
    /// Created, no evidence applied yet
    Initializing,
    /// Receiving evidence
    Active,
    /// Completeness crossed the maturity threshold
    Mature,
    /// Declared stable by an external decision
    Stable,
    /// Frozen by an external decision
    Archived,
}

impl PyramidStatus {
    /// Get string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::Active => "active",
            Self::Mature => "mature",
            Self::Stable => "stable",
            Self::Archived => "archived",
        }
    }
}

impl Default for PyramidStatus {
    fn default() -> Self {
        Self::Initializing
    }
}

/// Confidence in a pyramid's conclusions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl Default for Confidence {
    fn default() -> Self {
        Self::Low
    }
}

/// Sentiment of an interaction or entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(rename_all = "snake_case")]
pub enum Sentiment {
    Positive,
    Neutral,
    Negative,
    Mixed,
}

impl Default for Sentiment {
    fn default() -> Self {
        Self::Neutral
    }
}

/// Who gave to whom during an interaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub enum Direction {
    /// The journal author gave time or help
    #[serde(rename = "you→them", alias = "you_to_them")]
    YouToThem,
    /// The subject gave time or help
    #[serde(rename = "them→you", alias = "them_to_you")]
    ThemToYou,
    /// Shared activity
    #[serde(rename = "mutual")]
    Mutual,
}

impl Default for Direction {
    fn default() -> Self {
        Self::YouToThem
    }
}

/// Reciprocity balance of a relationship.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(rename_all = "kebab-case")]
pub enum Reciprocity {
    Balanced,
    YouGiveMore,
    TheyGiveMore,
    Unknown,
}

impl Default for Reciprocity {
    fn default() -> Self {
        Self::Unknown
    }
}

/// Kind of relationship.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(rename_all = "kebab-case")]
pub enum RelationshipKind {
    Family,
    Friend,
    Neighbor,
    Colleague,
    Acquaintance,
    Other,
}

impl Default for RelationshipKind {
    fn default() -> Self {
        Self::Other
    }
}

/// Behavioral pattern kinds the engine detects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(rename_all = "kebab-case")]
pub enum PatternKind {
    /// Helping without reciprocity expectation
    Prosocial,
    /// Explicit exchanges
    Transactional,
    /// Declining requests
    Avoidance,
    /// Follow-through on promises
    Commitment,
    /// How decisions are made
    DecisionMaking,
    /// Actions matching stated values
    ValueAlignment,
    /// Rest/activity cycles
    EnergyManagement,
    /// Where time goes
    TimeInvestment,
    /// Network expansion
    RelationshipBuilding,
    /// Knowledge acquisition
    Learning,
    /// Creative work
    Creating,
    Other,
}

impl PatternKind {
    /// All kinds in declaration order.
    pub const ALL: [PatternKind; 12] = [
        Self::Prosocial,
        Self::Transactional,
        Self::Avoidance,
        Self::Commitment,
        Self::DecisionMaking,
        Self::ValueAlignment,
        Self::EnergyManagement,
        Self::TimeInvestment,
        Self::RelationshipBuilding,
        Self::Learning,
        Self::Creating,
        Self::Other,
    ];

    /// Get string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Prosocial => "prosocial",
            Self::Transactional => "transactional",
            Self::Avoidance => "avoidance",
            Self::Commitment => "commitment",
            Self::DecisionMaking => "decision-making",
            Self::ValueAlignment => "value-alignment",
            Self::EnergyManagement => "energy-management",
            Self::TimeInvestment => "time-investment",
            Self::RelationshipBuilding => "relationship-building",
            Self::Learning => "learning",
            Self::Creating => "creating",
            Self::Other => "other",
        }
    }

    /// Map an extracted tag onto a pattern kind.
    ///
    /// Exact kind names win; otherwise a small keyword table is consulted.
    pub fn from_tag(tag: &str) -> Option<Self> {
        let tag = tag.trim().to_lowercase();
        if let Ok(kind) = tag.parse::<PatternKind>() {
            return Some(kind);
        }
        let kind = match tag.as_str() {
            "helping" | "help" | "helped" | "assist" | "volunteer" => Self::Prosocial,
            "trade" | "exchange" | "paid" => Self::Transactional,
            "declined" | "avoid" => Self::Avoidance,
            "promise" | "follow-through" => Self::Commitment,
            "decision" => Self::DecisionMaking,
            "values" => Self::ValueAlignment,
            "rest" | "resting" | "sleep" | "nap" => Self::EnergyManagement,
            "networking" | "socializing" => Self::RelationshipBuilding,
            "study" | "course" | "reading" => Self::Learning,
            "build" | "design" | "write" | "writing" => Self::Creating,
            _ => return None,
        };
        Some(kind)
    }
}

impl FromStr for PatternKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| format!("unknown pattern kind: {}", s))
    }
}

impl fmt::Display for PatternKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Activity categories used for time allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(rename_all = "snake_case")]
pub enum ActivityType {
    Helping,
    Working,
    Resting,
    Socializing,
    Learning,
    Creating,
    Organizing,
    Maintaining,
    Other,
}

impl ActivityType {
    /// Lenient parse; unknown activities fall into `Other`.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_lowercase().as_str() {
            "helping" => Self::Helping,
            "working" => Self::Working,
            "resting" => Self::Resting,
            "socializing" => Self::Socializing,
            "learning" => Self::Learning,
            "creating" => Self::Creating,
            "organizing" => Self::Organizing,
            "maintaining" => Self::Maintaining,
            _ => Self::Other,
        }
    }
}

impl Default for ActivityType {
    fn default() -> Self {
        Self::Other
    }
}

/// Sustainability of a behavioral pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(rename_all = "kebab-case")]
pub enum Sustainability {
    Sustainable,
    AtRisk,
    Unsustainable,
}

impl Default for Sustainability {
    fn default() -> Self {
        Self::Sustainable
    }
}

/// Direction of change between two windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Increasing,
    Decreasing,
    Stable,
}

/// Aggregation period of a time pyramid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(rename_all = "snake_case")]
pub enum PeriodKind {
    Day,
    Week,
    Month,
    Year,
}

impl PeriodKind {
    /// Half-open `[start, end)` bounds of the period containing `anchor`.
    pub fn bounds(&self, anchor: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        let date = anchor.date_naive();
        match self {
            Self::Day => {
                let start = start_of_day(date);
                (start, start + Duration::days(1))
            }
            Self::Week => {
                let offset = date.weekday().num_days_from_monday() as i64;
                let start = start_of_day(date - Duration::days(offset));
                (start, start + Duration::days(7))
            }
            Self::Month => {
                let start = first_of_month(date.year(), date.month());
                let next = if date.month() == 12 {
                    first_of_month(date.year() + 1, 1)
                } else {
                    first_of_month(date.year(), date.month() + 1)
                };
                (start_of_day(start), start_of_day(next))
            }
            Self::Year => {
                let start = first_of_month(date.year(), 1);
                let next = first_of_month(date.year() + 1, 1);
                (start_of_day(start), start_of_day(next))
            }
        }
    }

    /// Human-readable label used as the time pyramid's subject.
    pub fn label(&self, anchor: DateTime<Utc>) -> String {
        let date = anchor.date_naive();
        match self {
            Self::Day => date.format("%Y-%m-%d").to_string(),
            Self::Week => {
                let week = date.iso_week();
                format!("{}-W{:02}", week.year(), week.week())
            }
            Self::Month => date.format("%Y-%m").to_string(),
            Self::Year => date.format("%Y").to_string(),
        }
    }
}

impl Default for PeriodKind {
    fn default() -> Self {
        Self::Week
    }
}

fn start_of_day(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN))
}

fn first_of_month(year: i32, month: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, 1).unwrap_or(NaiveDate::MIN)
}

/// Fired when a pyramid transitions to `mature`; consumed by report generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct MaturitySignal {
    /// Pyramid that matured
    pub pyramid_id: String,
    /// Subject of the pyramid
    pub subject: String,
    /// Variant of the pyramid
    pub variant: Variant,
    /// Completeness at the time of the transition
    pub completeness: u8,
    /// When the transition happened
    pub triggered_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_ordering() {
        assert!(PyramidStatus::Initializing < PyramidStatus::Active);
        assert!(PyramidStatus::Active < PyramidStatus::Mature);
        assert!(PyramidStatus::Mature < PyramidStatus::Archived);
    }

    #[test]
    fn test_direction_serde() {
        let json = serde_json::to_string(&Direction::YouToThem).unwrap();
        assert_eq!(json, "\"you→them\"");
        let parsed: Direction = serde_json::from_str("\"them_to_you\"").unwrap();
        assert_eq!(parsed, Direction::ThemToYou);
    }

    #[test]
    fn test_pattern_kind_from_tag() {
        assert_eq!(PatternKind::from_tag("helping"), Some(PatternKind::Prosocial));
        assert_eq!(
            PatternKind::from_tag("Energy-Management"),
            Some(PatternKind::EnergyManagement)
        );
        assert_eq!(PatternKind::from_tag("gardening"), None);
        let kind: PatternKind = serde_json::from_str("\"decision-making\"").unwrap();
        assert_eq!(kind, PatternKind::DecisionMaking);
    }

    #[test]
    fn test_week_bounds_and_label() {
        // Friday 2024-03-15
        let anchor = Utc.with_ymd_and_hms(2024, 3, 15, 14, 30, 0).unwrap();
        let (start, end) = PeriodKind::Week.bounds(anchor);
        assert_eq!(start, Utc.with_ymd_and_hms(2024, 3, 11, 0, 0, 0).unwrap());
        assert_eq!(end, Utc.with_ymd_and_hms(2024, 3, 18, 0, 0, 0).unwrap());
        assert_eq!(PeriodKind::Week.label(anchor), "2024-W11");
    }

    #[test]
    fn test_month_bounds_wrap_year() {
        let anchor = Utc.with_ymd_and_hms(2024, 12, 31, 23, 0, 0).unwrap();
        let (start, end) = PeriodKind::Month.bounds(anchor);
        assert_eq!(start, Utc.with_ymd_and_hms(2024, 12, 1, 0, 0, 0).unwrap());
        assert_eq!(end, Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap());
    }
}

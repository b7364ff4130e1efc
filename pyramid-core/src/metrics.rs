//! Derived metrics, always recomputed from the full evidence lists.
//!
//! Nothing here patches a previous result: every function takes the raw
//! evidence and returns a fresh value, so recomputing an unchanged evidence
//! set yields identical output.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

#[cfg(feature = "typescript")]
use ts_rs::TS;

use crate::evidence::{InteractionRecord, PatternInstance, TimeEntry};
use crate::settings::PyramidSettings;
use crate::types::{ActivityType, Direction, Reciprocity, Sentiment, Sustainability, Trend};

// ---------------------------------------------------------------------------
// Relationship balance
// ---------------------------------------------------------------------------

/// Minutes exchanged in each direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeBalance {
    /// Minutes the author gave
    pub given: i64,
    /// Minutes the subject gave
    pub received: i64,
    /// `given - received`
    pub net: i64,
}

/// Sum timed interactions by direction. Mutual and untimed interactions
/// count toward neither side.
pub fn time_balance(interactions: &[InteractionRecord]) -> TimeBalance {
    let mut given = 0i64;
    let mut received = 0i64;
    for interaction in interactions {
        let minutes = interaction.duration_minutes.unwrap_or(0) as i64;
        match interaction.direction {
            Direction::YouToThem => given += minutes,
            Direction::ThemToYou => received += minutes,
            Direction::Mutual => {}
        }
    }
    TimeBalance {
        given,
        received,
        net: given - received,
    }
}

/// Helping beyond the imbalance threshold, repeatedly, and more often than
/// being helped.
pub fn is_prosocial(
    interactions: &[InteractionRecord],
    balance: &TimeBalance,
    settings: &PyramidSettings,
) -> bool {
    let giving = interactions
        .iter()
        .filter(|i| i.direction == Direction::YouToThem)
        .count();
    let receiving = interactions
        .iter()
        .filter(|i| i.direction == Direction::ThemToYou)
        .count();

    balance.net > settings.imbalance_threshold_minutes
        && giving >= settings.repeated_giving_min
        && giving > receiving
}

/// Best guess at reciprocity from the time balance.
pub fn infer_reciprocity(balance: &TimeBalance, settings: &PyramidSettings) -> Reciprocity {
    if balance.given == 0 && balance.received == 0 {
        return Reciprocity::Unknown;
    }
    if balance.net > settings.imbalance_threshold_minutes {
        Reciprocity::YouGiveMore
    } else if balance.net < -settings.imbalance_threshold_minutes {
        Reciprocity::TheyGiveMore
    } else {
        Reciprocity::Balanced
    }
}

/// Most frequent sentiment; ties resolve to `Mixed`, nothing to `Neutral`.
pub fn dominant_sentiment(sentiments: impl IntoIterator<Item = Sentiment>) -> Sentiment {
    let mut counts: HashMap<Sentiment, usize> = HashMap::new();
    for sentiment in sentiments {
        *counts.entry(sentiment).or_insert(0) += 1;
    }
    let Some(best) = counts.values().copied().max() else {
        return Sentiment::Neutral;
    };
    let leaders: Vec<Sentiment> = counts
        .iter()
        .filter(|(_, count)| **count == best)
        .map(|(sentiment, _)| *sentiment)
        .collect();
    if leaders.len() == 1 {
        leaders[0]
    } else {
        Sentiment::Mixed
    }
}

/// Distinct non-empty strings in first-seen order.
pub fn distinct<'a>(values: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for value in values {
        let value = value.trim();
        if !value.is_empty() && !out.iter().any(|v| v == value) {
            out.push(value.to_string());
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Pattern analysis
// ---------------------------------------------------------------------------

/// Percentage of relevant situations in which the pattern appeared.
pub fn pattern_frequency_percentage(
    instances: &[PatternInstance],
    counter_examples: &[PatternInstance],
) -> u8 {
    let total = instances.len() + counter_examples.len();
    if total == 0 {
        return 0;
    }
    let matching = instances
        .iter()
        .filter(|i| i.matches_pattern && !i.is_exception)
        .count();
    ((matching as f64 / total as f64) * 100.0).round() as u8
}

/// Sustainability over the trailing window.
///
/// More than half of recent instances being exceptions puts the pattern at
/// risk; no recent instances despite prior history makes it unsustainable.
pub fn assess_sustainability(
    instances: &[PatternInstance],
    window_days: i64,
    now: DateTime<Utc>,
) -> Sustainability {
    let cutoff = now - Duration::days(window_days);
    let recent: Vec<&PatternInstance> = instances
        .iter()
        .filter(|i| i.occurred_at >= cutoff)
        .collect();

    if recent.is_empty() {
        return if instances.is_empty() {
            Sustainability::Sustainable
        } else {
            Sustainability::Unsustainable
        };
    }

    let exceptions = recent.iter().filter(|i| i.is_exception).count();
    if exceptions * 2 > recent.len() {
        Sustainability::AtRisk
    } else {
        Sustainability::Sustainable
    }
}

/// Compare matching occurrences in the last window against the one before.
pub fn pattern_trend(
    instances: &[PatternInstance],
    window_days: i64,
    now: DateTime<Utc>,
) -> Option<Trend> {
    if instances.is_empty() {
        return None;
    }
    let window = Duration::days(window_days);
    let recent_start = now - window;
    let previous_start = recent_start - window;

    let matching = instances.iter().filter(|i| i.matches_pattern && !i.is_exception);
    let (mut recent, mut previous) = (0usize, 0usize);
    for instance in matching {
        if instance.occurred_at > recent_start && instance.occurred_at <= now {
            recent += 1;
        } else if instance.occurred_at > previous_start && instance.occurred_at <= recent_start {
            previous += 1;
        }
    }

    Some(match recent.cmp(&previous) {
        std::cmp::Ordering::Greater => Trend::Increasing,
        std::cmp::Ordering::Less => Trend::Decreasing,
        std::cmp::Ordering::Equal => Trend::Stable,
    })
}

// ---------------------------------------------------------------------------
// Time allocation
// ---------------------------------------------------------------------------

/// Unaccounted span between two tracked blocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct TimeGap {
    /// End of the previous block
    pub start: DateTime<Utc>,
    /// Start of the next block
    pub end: DateTime<Utc>,
    pub duration_minutes: i64,
    /// What the user said happened, once asked
    #[serde(default)]
    pub likely_activity: Option<String>,
}

/// Minutes per activity category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct TimeAllocation {
    pub category: ActivityType,
    pub total_minutes: u32,
    /// Share of all tracked minutes (0 - 100)
    pub percentage: u8,
    pub entry_count: usize,
    pub average_duration: Option<u32>,
}

/// Minutes spent with one person.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct TimeByPerson {
    pub person: String,
    pub total_minutes: u32,
    /// Share of all tracked minutes (0 - 100)
    pub percentage: u8,
    pub activities: Vec<ActivityType>,
}

/// Per-day summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct DailyBreakdown {
    pub date: NaiveDate,
    pub total_tracked: u32,
    /// Gap minutes starting on this day
    pub total_unaccounted: i64,
    pub by_category: Vec<TimeAllocation>,
    /// Mean of entry energies, or the answered reading for the day
    pub average_energy: Option<f32>,
    pub entry_count: usize,
}

/// Entries ordered by start time (stable for equal starts).
pub fn sorted_by_start(entries: &[TimeEntry]) -> Vec<&TimeEntry> {
    let mut sorted: Vec<&TimeEntry> = entries.iter().collect();
    sorted.sort_by_key(|e| e.started_at);
    sorted
}

/// Idle spans longer than `threshold_minutes` between consecutive blocks.
///
/// A gap starts where the previous block ends (its start plus its
/// duration) and ends where the next block starts.
pub fn detect_gaps(sorted: &[&TimeEntry], threshold_minutes: i64) -> Vec<TimeGap> {
    sorted
        .windows(2)
        .filter_map(|pair| {
            let end_of_current = pair[0].ended_at();
            let next_start = pair[1].started_at;
            let gap_minutes = (next_start - end_of_current).num_minutes();
            (gap_minutes > threshold_minutes).then(|| TimeGap {
                start: end_of_current,
                end: next_start,
                duration_minutes: gap_minutes,
                likely_activity: None,
            })
        })
        .collect()
}

fn percentage(part: u32, total: u32) -> u8 {
    if total == 0 {
        return 0;
    }
    ((part as f64 / total as f64) * 100.0).round() as u8
}

/// Group minutes by category, largest first (ties by category order).
pub fn allocate_by_category(entries: &[&TimeEntry]) -> Vec<TimeAllocation> {
    let total: u32 = entries.iter().map(|e| e.duration_minutes).sum();
    let mut groups: BTreeMap<ActivityType, (u32, usize)> = BTreeMap::new();
    for entry in entries {
        let slot = groups.entry(entry.category).or_insert((0, 0));
        slot.0 += entry.duration_minutes;
        slot.1 += 1;
    }

    let mut allocations: Vec<TimeAllocation> = groups
        .into_iter()
        .map(|(category, (minutes, count))| TimeAllocation {
            category,
            total_minutes: minutes,
            percentage: percentage(minutes, total),
            entry_count: count,
            average_duration: (count > 0).then(|| minutes / count as u32),
        })
        .collect();
    allocations.sort_by(|a, b| b.total_minutes.cmp(&a.total_minutes));
    allocations
}

/// Group minutes by person, largest first (ties by name).
pub fn allocate_by_person(entries: &[&TimeEntry]) -> Vec<TimeByPerson> {
    let total: u32 = entries.iter().map(|e| e.duration_minutes).sum();
    let mut groups: BTreeMap<&str, (u32, Vec<ActivityType>)> = BTreeMap::new();
    for entry in entries {
        for person in &entry.people {
            let slot = groups.entry(person.as_str()).or_insert((0, Vec::new()));
            slot.0 += entry.duration_minutes;
            if !slot.1.contains(&entry.category) {
                slot.1.push(entry.category);
            }
        }
    }

    let mut people: Vec<TimeByPerson> = groups
        .into_iter()
        .map(|(person, (minutes, activities))| TimeByPerson {
            person: person.to_string(),
            total_minutes: minutes,
            percentage: percentage(minutes, total),
            activities,
        })
        .collect();
    people.sort_by(|a, b| b.total_minutes.cmp(&a.total_minutes));
    people
}

/// Per-day summaries in date order.
pub fn daily_breakdown(
    sorted: &[&TimeEntry],
    gaps: &[TimeGap],
    day_energy: &BTreeMap<NaiveDate, u8>,
) -> Vec<DailyBreakdown> {
    let mut days: BTreeMap<NaiveDate, Vec<&TimeEntry>> = BTreeMap::new();
    for entry in sorted {
        days.entry(entry.started_at.date_naive())
            .or_default()
            .push(*entry);
    }

    days.into_iter()
        .map(|(date, entries)| {
            let energies: Vec<u8> = entries.iter().filter_map(|e| e.energy).collect();
            let average_energy = if energies.is_empty() {
                day_energy.get(&date).map(|e| *e as f32)
            } else {
                Some(mean(&energies))
            };
            DailyBreakdown {
                date,
                total_tracked: entries.iter().map(|e| e.duration_minutes).sum(),
                total_unaccounted: gaps
                    .iter()
                    .filter(|g| g.start.date_naive() == date)
                    .map(|g| g.duration_minutes)
                    .sum(),
                by_category: allocate_by_category(&entries),
                average_energy,
                entry_count: entries.len(),
            }
        })
        .collect()
}

/// Arithmetic mean rounded to one decimal.
pub fn mean(values: &[u8]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    let sum: u32 = values.iter().map(|v| *v as u32).sum();
    ((sum as f32 / values.len() as f32) * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn interaction(direction: Direction, minutes: Option<u32>) -> InteractionRecord {
        let mut record = InteractionRecord::new("e", Utc::now(), "helping", direction);
        record.duration_minutes = minutes;
        record
    }

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, day, hour, 0, 0).unwrap()
    }

    fn block(id: &str, start: DateTime<Utc>, minutes: u32) -> TimeEntry {
        TimeEntry {
            entry_id: id.to_string(),
            started_at: start,
            duration_minutes: minutes,
            category: ActivityType::Working,
            people: vec![],
            energy: None,
        }
    }

    #[test]
    fn test_balance_and_prosocial() {
        let interactions = vec![
            interaction(Direction::YouToThem, Some(360)),
            interaction(Direction::YouToThem, Some(240)),
            interaction(Direction::ThemToYou, Some(120)),
            interaction(Direction::Mutual, Some(60)),
            interaction(Direction::YouToThem, None),
        ];
        let balance = time_balance(&interactions);
        assert_eq!(balance.given, 600);
        assert_eq!(balance.received, 120);
        assert_eq!(balance.net, balance.given - balance.received);

        let settings = PyramidSettings::default();
        assert!(is_prosocial(&interactions, &balance, &settings));
        assert_eq!(infer_reciprocity(&balance, &settings), Reciprocity::YouGiveMore);
    }

    #[test]
    fn test_single_large_gift_is_not_repeated_giving() {
        let interactions = vec![interaction(Direction::YouToThem, Some(600))];
        let balance = time_balance(&interactions);
        assert!(!is_prosocial(&interactions, &balance, &PyramidSettings::default()));
    }

    #[test]
    fn test_reciprocity_unknown_without_timed_exchange() {
        let interactions = vec![interaction(Direction::YouToThem, None)];
        let balance = time_balance(&interactions);
        assert_eq!(
            infer_reciprocity(&balance, &PyramidSettings::default()),
            Reciprocity::Unknown
        );
    }

    #[test]
    fn test_dominant_sentiment() {
        use Sentiment::*;
        assert_eq!(dominant_sentiment(vec![Positive, Positive, Negative]), Positive);
        assert_eq!(dominant_sentiment(vec![Positive, Negative]), Mixed);
        assert_eq!(dominant_sentiment(Vec::new()), Neutral);
    }

    #[test]
    fn test_sustainability_at_risk() {
        let now = at(20, 12);
        let mut instances = Vec::new();
        for day in 0..6 {
            let mut instance =
                PatternInstance::new(format!("e{}", day), now - Duration::days(day), "helped");
            instance.is_exception = day < 4;
            instances.push(instance);
        }
        assert_eq!(assess_sustainability(&instances, 14, now), Sustainability::AtRisk);
    }

    #[test]
    fn test_sustainability_unsustainable_and_empty() {
        let now = at(30, 12);
        assert_eq!(assess_sustainability(&[], 14, now), Sustainability::Sustainable);

        let old = vec![PatternInstance::new("e1", now - Duration::days(40), "helped")];
        assert_eq!(assess_sustainability(&old, 14, now), Sustainability::Unsustainable);
    }

    #[test]
    fn test_frequency_percentage() {
        let now = Utc::now();
        let instances = vec![
            PatternInstance::new("e1", now, "a"),
            PatternInstance::new("e2", now, "b"),
            PatternInstance::new("e3", now, "c").exception(),
        ];
        let counter = vec![PatternInstance::new("e4", now, "d")];
        // 2 matching of 4 relevant situations
        assert_eq!(pattern_frequency_percentage(&instances, &counter), 50);
        assert_eq!(pattern_frequency_percentage(&[], &[]), 0);
    }

    #[test]
    fn test_trend() {
        let now = at(29, 12);
        let instances = vec![
            PatternInstance::new("e1", now - Duration::days(1), "a"),
            PatternInstance::new("e2", now - Duration::days(2), "b"),
            PatternInstance::new("e3", now - Duration::days(20), "c"),
        ];
        assert_eq!(pattern_trend(&instances, 14, now), Some(Trend::Increasing));
        assert_eq!(pattern_trend(&[], 14, now), None);
    }

    #[test]
    fn test_detect_gaps_uses_end_of_previous_block() {
        let entries = vec![
            block("b", at(15, 13), 30),
            block("a", at(15, 9), 60),
            block("c", at(15, 14), 30),
        ];
        let sorted = sorted_by_start(&entries);
        let gaps = detect_gaps(&sorted, 120);
        // a ends 10:00, b starts 13:00 -> 180 minute gap; b ends 13:30, c at 14:00 -> 30
        assert_eq!(gaps.len(), 1);
        assert_eq!(gaps[0].start, at(15, 10));
        assert_eq!(gaps[0].end, at(15, 13));
        assert_eq!(gaps[0].duration_minutes, 180);
    }

    #[test]
    fn test_overlapping_blocks_are_not_gaps() {
        let entries = vec![block("a", at(15, 9), 300), block("b", at(15, 10), 30)];
        let sorted = sorted_by_start(&entries);
        assert!(detect_gaps(&sorted, 120).is_empty());
    }

    #[test]
    fn test_allocations() {
        let mut social = block("b", at(15, 12), 30);
        social.category = ActivityType::Socializing;
        social.people = vec!["Bob".to_string()];
        let entries = vec![block("a", at(15, 9), 90), social];
        let refs = sorted_by_start(&entries);

        let by_category = allocate_by_category(&refs);
        assert_eq!(by_category[0].category, ActivityType::Working);
        assert_eq!(by_category[0].percentage, 75);
        assert_eq!(by_category[1].percentage, 25);

        let by_person = allocate_by_person(&refs);
        assert_eq!(by_person.len(), 1);
        assert_eq!(by_person[0].person, "Bob");
        assert_eq!(by_person[0].total_minutes, 30);
    }
}

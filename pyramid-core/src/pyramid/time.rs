//! Time pyramids: where the hours of one period went.

use chrono::{DateTime, NaiveDate, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

#[cfg(feature = "typescript")]
use ts_rs::TS;

use crate::answer::{decode, OneOrMany};
use crate::datapoint::Datapoint;
use crate::error::{PyramidError, Result};
use crate::evidence::{check_energy, TimeEntry};
use crate::metrics::{self, DailyBreakdown, TimeAllocation, TimeByPerson, TimeGap};
use crate::settings::PyramidSettings;
use crate::types::{ActivityType, PeriodKind};

/// Energy at or above this marks a peak hour.
const PEAK_ENERGY: u8 = 8;
/// Average energy at or below this raises the burnout flag.
const BURNOUT_ENERGY: f32 = 3.0;

/// Datapoint slots of a time pyramid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeSlot {
    TotalTracked,
    Gaps,
    EnergyLevels,
    PeakHours,
    BurnoutFlag,
}

impl TimeSlot {
    pub const ALL: [TimeSlot; 5] = [
        Self::TotalTracked,
        Self::Gaps,
        Self::EnergyLevels,
        Self::PeakHours,
        Self::BurnoutFlag,
    ];

    /// Datapoint key.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TotalTracked => "total_tracked",
            Self::Gaps => "gaps",
            Self::EnergyLevels => "energy_levels",
            Self::PeakHours => "peak_hours",
            Self::BurnoutFlag => "burnout_flag",
        }
    }
}

impl FromStr for TimeSlot {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|slot| slot.as_str() == s)
            .ok_or_else(|| format!("unknown time datapoint: {}", s))
    }
}

impl fmt::Display for TimeSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum GapAnswer {
    Explanation(String),
    Gaps(Vec<TimeGap>),
}

/// The five time datapoints.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct TimeDatapoints {
    /// Tracked minutes in the period
    pub total_tracked: Datapoint<u32>,
    pub gaps: Datapoint<Vec<TimeGap>>,
    /// Energy readings (1 - 10)
    pub energy_levels: Datapoint<Vec<u8>>,
    /// Hours of day (0 - 23) with high energy
    pub peak_hours: Datapoint<Vec<u8>>,
    pub burnout_flag: Datapoint<bool>,
}

impl TimeDatapoints {
    /// Whether a slot has been settled by an answer.
    pub fn is_complete(&self, slot: TimeSlot) -> bool {
        match slot {
            TimeSlot::TotalTracked => self.total_tracked.complete,
            TimeSlot::Gaps => self.gaps.complete,
            TimeSlot::EnergyLevels => self.energy_levels.complete,
            TimeSlot::PeakHours => self.peak_hours.complete,
            TimeSlot::BurnoutFlag => self.burnout_flag.complete,
        }
    }

    /// Number of settled slots.
    pub fn completed(&self) -> usize {
        TimeSlot::ALL
            .iter()
            .filter(|slot| self.is_complete(**slot))
            .count()
    }
}

/// Time payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct TimePyramid {
    pub period_kind: PeriodKind,
    /// Inclusive start of the period
    pub period_start: DateTime<Utc>,
    /// Exclusive end of the period
    pub period_end: DateTime<Utc>,
    pub datapoints: TimeDatapoints,
    /// Entries in arrival order
    #[serde(default)]
    pub entries: Vec<TimeEntry>,
    #[serde(default)]
    pub by_category: Vec<TimeAllocation>,
    #[serde(default)]
    pub by_person: Vec<TimeByPerson>,
    #[serde(default)]
    pub daily_breakdown: Vec<DailyBreakdown>,
    /// Gaps detected in the current entry set
    #[serde(default)]
    pub gaps: Vec<TimeGap>,
    pub total_tracked_minutes: u32,
    pub total_unaccounted_minutes: i64,
    #[serde(default)]
    pub top_category: Option<ActivityType>,
    #[serde(default)]
    pub top_person: Option<String>,
    #[serde(default)]
    pub average_energy: Option<f32>,
    /// Answered explanations keyed by gap start
    #[serde(default)]
    pub gap_notes: BTreeMap<DateTime<Utc>, String>,
    /// Answered energy readings for days without entry energy
    #[serde(default)]
    pub day_energy: BTreeMap<NaiveDate, u8>,
}

impl TimePyramid {
    /// Empty pyramid for the period containing `anchor`.
    pub fn new(period_kind: PeriodKind, anchor: DateTime<Utc>) -> Self {
        let (period_start, period_end) = period_kind.bounds(anchor);
        Self {
            period_kind,
            period_start,
            period_end,
            datapoints: TimeDatapoints::default(),
            entries: Vec::new(),
            by_category: Vec::new(),
            by_person: Vec::new(),
            daily_breakdown: Vec::new(),
            gaps: Vec::new(),
            total_tracked_minutes: 0,
            total_unaccounted_minutes: 0,
            top_category: None,
            top_person: None,
            average_energy: None,
            gap_notes: BTreeMap::new(),
            day_energy: BTreeMap::new(),
        }
    }

    /// Whether `at` falls inside the period.
    pub fn covers(&self, at: DateTime<Utc>) -> bool {
        at >= self.period_start && at < self.period_end
    }

    /// Whether evidence from this entry is already recorded.
    pub fn has_entry(&self, entry_id: &str) -> bool {
        self.entries.iter().any(|e| e.entry_id == entry_id)
    }

    /// Gaps nobody has explained yet.
    pub fn unexplained_gaps(&self) -> impl Iterator<Item = &TimeGap> {
        self.gaps.iter().filter(|g| g.likely_activity.is_none())
    }

    /// Total minutes of unexplained gaps.
    pub fn unexplained_gap_minutes(&self) -> i64 {
        self.unexplained_gaps().map(|g| g.duration_minutes).sum()
    }

    /// Longest unexplained gap; the earliest wins a tie.
    pub fn largest_unexplained_gap(&self) -> Option<&TimeGap> {
        self.unexplained_gaps()
            .fold(None, |best: Option<&TimeGap>, gap| match best {
                Some(b) if b.duration_minutes >= gap.duration_minutes => Some(b),
                _ => Some(gap),
            })
    }

    /// Earliest tracked day with no energy reading.
    pub fn first_day_missing_energy(&self) -> Option<NaiveDate> {
        self.daily_breakdown
            .iter()
            .find(|day| day.average_energy.is_none())
            .map(|day| day.date)
    }

    pub(crate) fn append(&mut self, entry: TimeEntry) {
        self.entries.push(entry);
    }

    /// Recompute every derived field from the entry list.
    pub fn recompute(&mut self, settings: &PyramidSettings, now: DateTime<Utc>) {
        let sorted = metrics::sorted_by_start(&self.entries);

        let mut gaps = metrics::detect_gaps(&sorted, settings.gap_threshold_minutes);
        for gap in &mut gaps {
            gap.likely_activity = self.gap_notes.get(&gap.start).cloned();
        }

        let daily = metrics::daily_breakdown(&sorted, &gaps, &self.day_energy);
        let daily_energy: Vec<f32> = daily.iter().filter_map(|d| d.average_energy).collect();
        let average_energy = if daily_energy.is_empty() {
            None
        } else {
            let sum: f32 = daily_energy.iter().sum();
            Some((sum / daily_energy.len() as f32 * 10.0).round() / 10.0)
        };

        let mut readings: Vec<u8> = sorted.iter().filter_map(|e| e.energy).collect();
        for (date, energy) in &self.day_energy {
            if !sorted
                .iter()
                .any(|e| e.started_at.date_naive() == *date && e.energy.is_some())
            {
                readings.push(*energy);
            }
        }

        let mut peak_hours: Vec<u8> = sorted
            .iter()
            .filter(|e| e.energy.map_or(false, |energy| energy >= PEAK_ENERGY))
            .map(|e| e.started_at.hour() as u8)
            .collect();
        peak_hours.sort_unstable();
        peak_hours.dedup();

        self.by_category = metrics::allocate_by_category(&sorted);
        self.by_person = metrics::allocate_by_person(&sorted);
        self.total_tracked_minutes = sorted.iter().map(|e| e.duration_minutes).sum();
        self.total_unaccounted_minutes = gaps.iter().map(|g| g.duration_minutes).sum();
        self.top_category = self.by_category.first().map(|a| a.category);
        self.top_person = self.by_person.first().map(|p| p.person.clone());
        self.average_energy = average_energy;
        self.daily_breakdown = daily;
        self.gaps = gaps;

        let burnout = self.average_energy.map_or(false, |e| e <= BURNOUT_ENERGY);
        let dp = &mut self.datapoints;
        dp.total_tracked.refresh(self.total_tracked_minutes, now);
        dp.gaps.refresh(self.gaps.clone(), now);
        dp.energy_levels.refresh(readings, now);
        dp.peak_hours.refresh(peak_hours, now);
        dp.burnout_flag.refresh(burnout, now);
    }

    /// Settle a slot from an answer. Nothing changes if decoding fails.
    pub(crate) fn answer(
        &mut self,
        slot: TimeSlot,
        value: &serde_json::Value,
        settings: &PyramidSettings,
        now: DateTime<Utc>,
    ) -> Result<()> {
        match slot {
            TimeSlot::TotalTracked => {
                let minutes: u32 = decode(value, "tracked minutes")?;
                self.datapoints.total_tracked.mark_complete(minutes, now);
            }
            TimeSlot::Gaps => match decode::<GapAnswer>(value, "a gap explanation")? {
                GapAnswer::Explanation(text) => {
                    if let Some(start) = self.largest_unexplained_gap().map(|g| g.start) {
                        self.gap_notes.insert(start, text);
                        self.recompute(settings, now);
                    }
                    let gaps = self.gaps.clone();
                    self.datapoints.gaps.mark_complete(gaps, now);
                }
                GapAnswer::Gaps(gaps) => {
                    self.datapoints.gaps.mark_complete(gaps, now);
                }
            },
            TimeSlot::EnergyLevels => {
                let answered: OneOrMany<u8> = decode(value, "an energy level from 1 to 10")?;
                match answered {
                    OneOrMany::One(energy) => {
                        check_energy(energy).map_err(|e| e.within("value"))?;
                        if let Some(day) = self.first_day_missing_energy() {
                            self.day_energy.insert(day, energy);
                            self.recompute(settings, now);
                        }
                        let readings = self.datapoints.energy_levels.value.clone();
                        let readings = if readings.is_empty() { vec![energy] } else { readings };
                        self.datapoints.energy_levels.mark_complete(readings, now);
                    }
                    OneOrMany::Many(list) => {
                        for energy in &list {
                            check_energy(*energy).map_err(|e| e.within("value"))?;
                        }
                        self.datapoints.energy_levels.mark_complete(list, now);
                    }
                }
            }
            TimeSlot::PeakHours => {
                let answered: OneOrMany<u8> = decode(value, "hours of day")?;
                let mut hours = answered.into_vec();
                if let Some(bad) = hours.iter().find(|h| **h > 23) {
                    return Err(PyramidError::validation(
                        "value",
                        format!("hour must be within 0..=23, got {}", bad),
                    ));
                }
                hours.sort_unstable();
                hours.dedup();
                self.datapoints.peak_hours.mark_complete(hours, now);
            }
            TimeSlot::BurnoutFlag => {
                let flag: bool = decode(value, "true or false")?;
                self.datapoints.burnout_flag.mark_complete(flag, now);
            }
        }
        Ok(())
    }
}

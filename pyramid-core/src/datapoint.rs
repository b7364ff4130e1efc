//! A single tracked fact-in-progress.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[cfg(feature = "typescript")]
use ts_rs::TS;

/// Typed value plus a completion flag.
///
/// `complete` is only ever set by an explicit answer. A value that looks
/// empty (`unknown`, `[]`) can be a legitimate complete state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct Datapoint<V> {
    /// Current value
    pub value: V,
    /// Whether the value is settled
    pub complete: bool,
    /// When the value last changed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
}

impl<V> Datapoint<V> {
    /// Create an incomplete datapoint.
    pub fn new(value: V) -> Self {
        Self {
            value,
            complete: false,
            last_updated: None,
        }
    }

    /// Settle the datapoint with an answered value.
    pub fn mark_complete(&mut self, value: V, now: DateTime<Utc>) {
        self.value = value;
        self.complete = true;
        self.last_updated = Some(now);
    }
}

impl<V: PartialEq> Datapoint<V> {
    /// Mirror an evidence-derived value into an unsettled datapoint.
    ///
    /// Settled datapoints keep their answered value. The timestamp moves only
    /// when the value actually changes, so repeated refreshes are idempotent.
    /// Returns whether the value changed.
    pub fn refresh(&mut self, value: V, now: DateTime<Utc>) -> bool {
        if self.complete || self.value == value {
            return false;
        }
        self.value = value;
        self.last_updated = Some(now);
        true
    }
}

impl<V: Default> Default for Datapoint<V> {
    fn default() -> Self {
        Self::new(V::default())
    }
}

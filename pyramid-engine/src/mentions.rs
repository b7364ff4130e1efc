//! Mention tracking below the pyramid creation threshold.
//!
//! The first few mentions of a subject do not create a pyramid. Their
//! evidence is buffered here until the threshold is crossed, at which point
//! the buffer is handed to a promotion callback exactly once. The callback
//! runs under the entry lock, so concurrent mentions of the same subject
//! either land in the buffer before promotion or are returned for direct
//! application afterwards.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::debug;

use pyramid_core::{Evidence, Variant};

enum MentionState {
    Pending(Vec<Evidence>),
    Promoted,
}

/// Result of observing one mention.
#[derive(Debug)]
pub enum Observed<R> {
    /// Still below the threshold; evidence buffered
    Buffered { mentions: usize, threshold: usize },
    /// Threshold crossed by this mention; the callback's result
    Promoted(R),
    /// Subject was promoted earlier; apply the evidence directly
    Direct(Evidence),
}

/// Per-subject mention counts and buffered evidence.
#[derive(Default)]
pub struct MentionTracker {
    subjects: DashMap<(Variant, String), MentionState>,
}

impl MentionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a mention.
    ///
    /// Evidence from an entry already buffered for the subject is ignored.
    /// When the buffered count reaches `threshold`, `promote` receives every
    /// buffered record (oldest first, including this one).
    pub fn observe<F, R>(
        &self,
        variant: Variant,
        subject: &str,
        evidence: Evidence,
        threshold: usize,
        promote: F,
    ) -> Observed<R>
    where
        F: FnOnce(Vec<Evidence>) -> R,
    {
        let key = (variant, subject.to_string());
        match self.subjects.entry(key) {
            Entry::Occupied(mut entry) => match entry.get_mut() {
                MentionState::Promoted => Observed::Direct(evidence),
                MentionState::Pending(buffer) => {
                    // One journal entry counts as one mention.
                    if buffer.iter().any(|e| e.entry_id() == evidence.entry_id()) {
                        debug!(variant = %variant, subject = %subject, entry_id = %evidence.entry_id(), "Ignored repeated mention");
                        return Observed::Buffered {
                            mentions: buffer.len(),
                            threshold,
                        };
                    }
                    buffer.push(evidence);
                    if buffer.len() >= threshold {
                        let buffered = std::mem::take(buffer);
                        let result = promote(buffered);
                        entry.insert(MentionState::Promoted);
                        Observed::Promoted(result)
                    } else {
                        let mentions = buffer.len();
                        debug!(variant = %variant, subject = %subject, mentions, threshold, "Buffered mention");
                        Observed::Buffered {
                            mentions,
                            threshold,
                        }
                    }
                }
            },
            Entry::Vacant(slot) => {
                if threshold <= 1 {
                    let result = promote(vec![evidence]);
                    slot.insert(MentionState::Promoted);
                    Observed::Promoted(result)
                } else {
                    debug!(variant = %variant, subject = %subject, mentions = 1, threshold, "Buffered mention");
                    slot.insert(MentionState::Pending(vec![evidence]));
                    Observed::Buffered {
                        mentions: 1,
                        threshold,
                    }
                }
            }
        }
    }

    /// Promote a subject regardless of its count, handing over whatever is
    /// buffered. Returns `None` if it was already promoted.
    pub fn promote_now<F, R>(&self, variant: Variant, subject: &str, promote: F) -> Option<R>
    where
        F: FnOnce(Vec<Evidence>) -> R,
    {
        let key = (variant, subject.to_string());
        match self.subjects.entry(key) {
            Entry::Occupied(mut entry) => match entry.get_mut() {
                MentionState::Promoted => None,
                MentionState::Pending(buffer) => {
                    let buffered = std::mem::take(buffer);
                    let result = promote(buffered);
                    entry.insert(MentionState::Promoted);
                    Some(result)
                }
            },
            Entry::Vacant(slot) => {
                let result = promote(Vec::new());
                slot.insert(MentionState::Promoted);
                Some(result)
            }
        }
    }

    /// Mark a subject as promoted without a callback (used when pyramids
    /// are restored from snapshots).
    pub fn mark_promoted(&self, variant: Variant, subject: &str) {
        self.subjects
            .insert((variant, subject.to_string()), MentionState::Promoted);
    }

    /// Buffered mention count; `None` once promoted or never seen.
    pub fn pending(&self, variant: Variant, subject: &str) -> Option<usize> {
        match self.subjects.get(&(variant, subject.to_string()))?.value() {
            MentionState::Pending(buffer) => Some(buffer.len()),
            MentionState::Promoted => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use pyramid_core::{Direction, InteractionRecord};

    fn mention(id: &str) -> Evidence {
        Evidence::Interaction(InteractionRecord::new(
            id,
            Utc::now(),
            "chat",
            Direction::Mutual,
        ))
    }

    #[test]
    fn test_promotes_exactly_once() {
        let tracker = MentionTracker::new();
        let mut promotions = 0;

        for (i, id) in ["e1", "e2", "e3", "e4"].iter().enumerate() {
            let observed = tracker.observe(Variant::Relationship, "Bob", mention(id), 3, |buffer| {
                promotions += 1;
                buffer.len()
            });
            match (i, observed) {
                (0, Observed::Buffered { mentions, .. }) => assert_eq!(mentions, 1),
                (1, Observed::Buffered { mentions, .. }) => assert_eq!(mentions, 2),
                (2, Observed::Promoted(count)) => assert_eq!(count, 3),
                (3, Observed::Direct(evidence)) => assert_eq!(evidence.entry_id(), "e4"),
                (i, other) => panic!("unexpected outcome at {}: {:?}", i, other),
            }
        }
        assert_eq!(promotions, 1);
        assert_eq!(tracker.pending(Variant::Relationship, "Bob"), None);
    }

    #[test]
    fn test_repeated_entry_is_one_mention() {
        let tracker = MentionTracker::new();
        for _ in 0..3 {
            let observed = tracker.observe(Variant::Relationship, "Bob", mention("e1"), 3, |b| b.len());
            assert!(matches!(observed, Observed::Buffered { mentions: 1, .. }));
        }
        assert_eq!(tracker.pending(Variant::Relationship, "Bob"), Some(1));

        let _ = tracker.observe(Variant::Relationship, "Bob", mention("e2"), 3, |b| b.len());
        let observed = tracker.observe(Variant::Relationship, "Bob", mention("e3"), 3, |b| b.len());
        assert!(matches!(observed, Observed::Promoted(3)));
    }

    #[test]
    fn test_threshold_one_promotes_immediately() {
        let tracker = MentionTracker::new();
        let observed = tracker.observe(Variant::Time, "2024-W11", mention("e1"), 1, |b| b.len());
        assert!(matches!(observed, Observed::Promoted(1)));
    }

    #[test]
    fn test_promote_now_drains_buffer() {
        let tracker = MentionTracker::new();
        let _ = tracker.observe(Variant::Relationship, "Ann", mention("e1"), 3, |b| b.len());
        assert_eq!(tracker.pending(Variant::Relationship, "Ann"), Some(1));

        let drained = tracker.promote_now(Variant::Relationship, "Ann", |b| b.len());
        assert_eq!(drained, Some(1));
        assert_eq!(tracker.promote_now(Variant::Relationship, "Ann", |b| b.len()), None);
    }
}

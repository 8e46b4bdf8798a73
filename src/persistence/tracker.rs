//! Change tracking for automatic RDB snapshots.
//!
//! The `save` config directive is a list of `(interval_seconds,
//! threshold_keys_changed)` rules: "snapshot automatically if at least
//! `threshold_keys_changed` keys changed within the last `interval_seconds`
//! seconds." Each rule owns its own counter and is driven by its own
//! ticker, at its own interval, mirroring the reference server's per-tracker
//! `keys` counter: every mutation bumps every rule's counter, and each
//! rule's ticker resets only that rule's counter on its own tick, whether or
//! not the tick ended up triggering a save.

use std::sync::atomic::{AtomicU64, Ordering};

/// One `save <seconds> <changes>` rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaveRule {
    pub interval_seconds: u64,
    pub threshold_keys_changed: u64,
}

impl SaveRule {
    pub fn new(interval_seconds: u64, threshold_keys_changed: u64) -> Self {
        Self {
            interval_seconds,
            threshold_keys_changed,
        }
    }
}

/// One rule's independent counter. A tick resets the counter unconditionally;
/// the caller only finds out whether a save was due at that moment.
#[derive(Debug)]
pub struct RuleTracker {
    pub rule: SaveRule,
    changes: AtomicU64,
}

impl RuleTracker {
    fn new(rule: SaveRule) -> Self {
        Self {
            rule,
            changes: AtomicU64::new(0),
        }
    }

    fn record_change(&self) {
        self.changes.fetch_add(1, Ordering::Relaxed);
    }

    /// Called by this rule's own ticker on every tick of its interval.
    /// Always resets the counter; returns whether the threshold had been
    /// met at the moment of the tick.
    pub fn tick(&self) -> bool {
        let changes = self.changes.swap(0, Ordering::Relaxed);
        changes >= self.rule.threshold_keys_changed
    }

    pub fn changes_since_tick(&self) -> u64 {
        self.changes.load(Ordering::Relaxed)
    }
}

/// Owns one [`RuleTracker`] per configured [`SaveRule`]. Every mutation
/// bumps all of them; each rule is otherwise driven independently by its
/// own background ticker (see `main.rs`), which calls [`RuleTracker::tick`]
/// on that rule directly.
#[derive(Debug)]
pub struct ChangeTracker {
    rules: Vec<RuleTracker>,
}

impl ChangeTracker {
    pub fn new(rules: Vec<SaveRule>) -> Self {
        Self {
            rules: rules.into_iter().map(RuleTracker::new).collect(),
        }
    }

    pub fn record_change(&self) {
        for tracker in &self.rules {
            tracker.record_change();
        }
    }

    /// The per-rule trackers, in configuration order — one background
    /// ticker is spawned per entry.
    pub fn rules(&self) -> &[RuleTracker] {
        &self.rules
    }

    /// Resets every rule's counter after an explicit SAVE/BGSAVE, so a
    /// manual save doesn't leave a rule's ticker immediately re-triggering
    /// on stale counts.
    pub fn mark_saved(&self) {
        for tracker in &self.rules {
            tracker.changes.store(0, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_rules_is_inert() {
        let tracker = ChangeTracker::new(vec![]);
        tracker.record_change();
        assert!(tracker.rules().is_empty());
    }

    #[test]
    fn tick_reports_whether_threshold_was_met() {
        let tracker = ChangeTracker::new(vec![SaveRule::new(0, 3)]);
        tracker.record_change();
        tracker.record_change();
        assert!(!tracker.rules()[0].tick());
        tracker.record_change();
        tracker.record_change();
        tracker.record_change();
        assert!(tracker.rules()[0].tick());
    }

    #[test]
    fn tick_always_resets_the_counter_even_when_not_due() {
        let tracker = ChangeTracker::new(vec![SaveRule::new(0, 5)]);
        tracker.record_change();
        tracker.record_change();
        assert!(!tracker.rules()[0].tick());
        assert_eq!(tracker.rules()[0].changes_since_tick(), 0);
    }

    #[test]
    fn tick_resets_the_counter_when_due_too() {
        let tracker = ChangeTracker::new(vec![SaveRule::new(0, 1)]);
        tracker.record_change();
        assert!(tracker.rules()[0].tick());
        assert_eq!(tracker.rules()[0].changes_since_tick(), 0);
        assert!(!tracker.rules()[0].tick());
    }

    #[test]
    fn each_rule_tracks_independently() {
        let tracker = ChangeTracker::new(vec![SaveRule::new(3600, 5), SaveRule::new(0, 100)]);
        tracker.record_change();
        tracker.record_change();
        assert!(!tracker.rules()[0].tick());
        for _ in 0..100 {
            tracker.record_change();
        }
        assert!(tracker.rules()[1].tick());
    }

    #[test]
    fn mark_saved_resets_every_rule() {
        let tracker = ChangeTracker::new(vec![SaveRule::new(0, 1), SaveRule::new(0, 1)]);
        tracker.record_change();
        tracker.record_change();
        tracker.mark_saved();
        assert!(!tracker.rules()[0].tick());
        assert!(!tracker.rules()[1].tick());
    }
}

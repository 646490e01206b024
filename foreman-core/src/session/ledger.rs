//! Append-only activity log for one session

use std::collections::HashSet;

use super::activity::Activity;

/// Ordered, deduplicated log of a session's activities
///
/// Entries are never removed or reordered. Each append only accepts
/// activities strictly beyond the stored cursor whose id hasn't been seen,
/// so re-delivering a page is a no-op.
#[derive(Debug, Clone, Default)]
pub struct ActivityLedger {
    entries: Vec<Activity>,
    cursor: Option<u64>,
    seen: HashSet<String>,
}

impl ActivityLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a batch, returning the activities that were new
    pub fn append(&mut self, batch: impl IntoIterator<Item = Activity>) -> Vec<Activity> {
        let mut batch: Vec<Activity> = batch.into_iter().collect();
        batch.sort_by_key(|a| a.sequence);

        let mut fresh = Vec::new();
        for activity in batch {
            if self.cursor.is_some_and(|cursor| activity.sequence <= cursor) {
                continue;
            }
            if !self.seen.insert(activity.id.clone()) {
                continue;
            }
            self.cursor = Some(activity.sequence);
            self.entries.push(activity.clone());
            fresh.push(activity);
        }
        fresh
    }

    /// Sequence of the last appended activity
    pub fn cursor(&self) -> Option<u64> {
        self.cursor
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn latest(&self) -> Option<&Activity> {
        self.entries.last()
    }

    /// Entries in append order
    pub fn entries(&self) -> &[Activity] {
        &self.entries
    }

    /// Most recent entries first, optionally truncated
    pub fn recent(&self, limit: Option<usize>) -> Vec<Activity> {
        let take = limit.unwrap_or(self.entries.len());
        self.entries.iter().rev().take(take).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::activity::ActivityKind;

    fn progress(id: &str, seq: u64) -> Activity {
        Activity::new(
            id,
            seq,
            ActivityKind::Progress {
                title: Some(id.to_string()),
                description: None,
            },
        )
    }

    #[test]
    fn test_append_returns_new_entries() {
        let mut ledger = ActivityLedger::new();
        let fresh = ledger.append(vec![progress("a", 0), progress("b", 1)]);
        assert_eq!(fresh.len(), 2);
        assert_eq!(ledger.len(), 2);
        assert_eq!(ledger.cursor(), Some(1));
    }

    #[test]
    fn test_append_same_page_twice_is_idempotent() {
        let mut ledger = ActivityLedger::new();
        let page = vec![progress("a", 0), progress("b", 1), progress("c", 2)];

        assert_eq!(ledger.append(page.clone()).len(), 3);
        let before: Vec<Activity> = ledger.entries().to_vec();

        assert_eq!(ledger.append(page).len(), 0);
        assert_eq!(ledger.entries(), before.as_slice());
    }

    #[test]
    fn test_out_of_order_batch_is_sorted() {
        let mut ledger = ActivityLedger::new();
        let fresh = ledger.append(vec![progress("c", 2), progress("a", 0), progress("b", 1)]);
        let ids: Vec<&str> = fresh.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(ledger.latest().unwrap().id, "c");
    }

    #[test]
    fn test_growing_page_only_yields_tail() {
        let mut ledger = ActivityLedger::new();
        ledger.append(vec![progress("a", 0)]);
        let fresh = ledger.append(vec![progress("a", 0), progress("b", 1)]);
        assert_eq!(fresh.len(), 1);
        assert_eq!(fresh[0].id, "b");
    }

    #[test]
    fn test_duplicate_ids_within_batch() {
        let mut ledger = ActivityLedger::new();
        let fresh = ledger.append(vec![progress("a", 0), progress("a", 1)]);
        assert_eq!(fresh.len(), 1);
    }

    #[test]
    fn test_recent_is_newest_first() {
        let mut ledger = ActivityLedger::new();
        ledger.append((0..5).map(|i| progress(&format!("a{}", i), i)));

        let recent = ledger.recent(Some(2));
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].id, "a4");
        assert_eq!(recent[1].id, "a3");
        assert_eq!(ledger.recent(None).len(), 5);
    }
}

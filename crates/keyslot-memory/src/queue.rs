//! Ordered in-memory event queue.
//!
//! Records are kept in arrival order.  Consumers have two views of a team's
//! traffic that deliberately point in opposite directions:
//!
//! | Operation | Direction | Mutates |
//! |---|---|---|
//! | [`EventQueue::pop_by_team`] | oldest first (scan from head) | yes |
//! | [`EventQueue::peek_latest_by_team`] | newest first (scan from tail) | no |
//!
//! `pop_by_team` answers "what should I act on next", `peek_latest_by_team`
//! answers "what is this team's current status".
//!
//! # Freshness
//!
//! Every [`EventQueue::append`] raises an "unread" flag both globally and for
//! the record's team.  [`EventQueue::take_fresh`] reports and lowers the flag
//! for one scope, so a status display can tell a new arrival apart from a
//! record it has already shown.
//!
//! # Example
//!
//! ```rust
//! use keyslot_memory::EventQueue;
//! use keyslot_types::EventRecord;
//!
//! let mut queue = EventQueue::new();
//! queue.append(EventRecord::color("alpha", "red"));
//! queue.append(EventRecord::color("beta", "blue"));
//! queue.append(EventRecord::color("alpha", "green"));
//!
//! assert_eq!(queue.pop_by_team("alpha").unwrap().color, "red");
//! assert_eq!(queue.peek_latest_by_team("alpha").unwrap().color, "green");
//! assert_eq!(queue.len(), 2);
//! ```

use std::collections::{HashSet, VecDeque};

use keyslot_types::EventRecord;
use tracing::debug;

/// FIFO buffer of [`EventRecord`]s with team-scoped lookup and removal.
///
/// Not synchronised; wrap it in a lock so that every operation is applied
/// atomically relative to the others.
#[derive(Debug, Default)]
pub struct EventQueue {
    records: VecDeque<EventRecord>,
    unread_any: bool,
    unread_teams: HashSet<String>,
}

impl EventQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `record` at the tail and mark it unread.
    pub fn append(&mut self, record: EventRecord) {
        debug!(team = %record.team, color = %record.color, "queue append");
        self.unread_any = true;
        self.unread_teams.insert(record.team.clone());
        self.records.push_back(record);
    }

    /// Remove and return the head, or `None` when the queue is empty.
    pub fn pop_front(&mut self) -> Option<EventRecord> {
        self.records.pop_front()
    }

    /// Remove and return the **oldest** record whose team is `team`.
    ///
    /// The relative order of every other record is unchanged.
    pub fn pop_by_team(&mut self, team: &str) -> Option<EventRecord> {
        let idx = self.records.iter().position(|r| r.team == team)?;
        self.records.remove(idx)
    }

    /// Return the **most recent** record whose team is `team` without
    /// removing it.
    pub fn peek_latest_by_team(&self, team: &str) -> Option<&EventRecord> {
        self.records.iter().rev().find(|r| r.team == team)
    }

    /// Return the most recent record of any team.
    pub fn latest(&self) -> Option<&EventRecord> {
        self.records.back()
    }

    /// Snapshot of every record in insertion order.
    pub fn list_all(&self) -> Vec<EventRecord> {
        self.records.iter().cloned().collect()
    }

    /// Snapshot of `team`'s records in insertion order.
    pub fn list_by_team(&self, team: &str) -> Vec<EventRecord> {
        self.records
            .iter()
            .filter(|r| r.team == team)
            .cloned()
            .collect()
    }

    /// Remove every record.  Returns how many were removed.
    pub fn clear_all(&mut self) -> usize {
        let removed = self.records.len();
        self.records.clear();
        self.unread_any = false;
        self.unread_teams.clear();
        removed
    }

    /// Remove every record of `team`, keeping the others in order.  Returns
    /// how many were removed.
    pub fn clear_by_team(&mut self, team: &str) -> usize {
        let before = self.records.len();
        self.records.retain(|r| r.team != team);
        self.unread_teams.remove(team);
        before - self.records.len()
    }

    /// Report whether anything was appended to `scope` since the last call,
    /// then mark the scope as read.
    ///
    /// `None` is the global scope; `Some(team)` is that team only.  Reading
    /// one scope leaves the others untouched.
    pub fn take_fresh(&mut self, scope: Option<&str>) -> bool {
        match scope {
            None => std::mem::take(&mut self.unread_any),
            Some(team) => self.unread_teams.remove(team),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

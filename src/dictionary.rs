// src/dictionary.rs
//
// Per-field prior-value memory. Tri-state: a name that was never assigned is
// distinguishable from one explicitly assigned null, because copy/increment
// fall back differently in the two cases.
//
// Writes within a message land in a pending overlay and only become the
// committed state when the whole message decodes cleanly. A failed message
// rolls the overlay back, leaving the dictionary at its message-start state.

use crate::value::Value;
use hashbrown::HashMap;

#[derive(Debug, Clone, PartialEq)]
pub enum Entry {
    Undefined,
    Null,
    Assigned(Value),
}

#[derive(Debug, Default)]
pub struct Dictionary {
    committed: HashMap<String, Entry>,
    pending: HashMap<String, Entry>,
}

impl Dictionary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state for `name`, seeing uncommitted writes from the message
    /// in progress.
    pub fn get(&self, name: &str) -> Entry {
        if let Some(e) = self.pending.get(name) {
            return e.clone();
        }
        self.committed
            .get(name)
            .cloned()
            .unwrap_or(Entry::Undefined)
    }

    pub fn set(&mut self, name: &str, entry: Entry) {
        self.pending.insert(name.to_string(), entry);
    }

    /// Record a decoded value; null values are stored as the explicit null
    /// state, not dropped.
    pub fn set_value(&mut self, name: &str, value: Value) {
        let entry = if value.is_null() {
            Entry::Null
        } else {
            Entry::Assigned(value)
        };
        self.set(name, entry);
    }

    /// Make the current message's writes permanent.
    pub fn commit(&mut self) {
        for (k, v) in self.pending.drain() {
            self.committed.insert(k, v);
        }
    }

    /// Discard the current message's writes.
    pub fn rollback(&mut self) {
        self.pending.clear();
    }

    /// Return to all-undefined. Used between independent streams, not
    /// between messages of one stream.
    pub fn reset(&mut self) {
        self.committed.clear();
        self.pending.clear();
    }
}

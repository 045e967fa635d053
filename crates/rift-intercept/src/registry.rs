//! Expectation registry: ordered slots keyed by target identity.
//!
//! The registry itself is not synchronized. [`InterceptContext`](crate::InterceptContext)
//! keeps it behind one mutex so every mutation (and consumption) happens in a
//! single lock acquisition.

use crate::expectation::{Expectation, ScopeFilterFn, TargetPattern};
use crate::target::TargetKey;
use std::sync::Arc;
use tracing::debug;

struct Slot {
    key: String,
    target: TargetPattern,
    allow_unmocked: bool,
    filtering_scope: Option<ScopeFilterFn>,
    records: Vec<Arc<Expectation>>,
}

impl Slot {
    fn accepts_filtered(&self, target: &TargetKey) -> bool {
        self.filtering_scope
            .as_ref()
            .map(|filter| filter(&target.to_string()))
            .unwrap_or(false)
    }
}

/// Result of looking up a target.
#[derive(Debug)]
pub enum Lookup {
    /// Records registered for the target, in registration order
    Candidates {
        records: Vec<Arc<Expectation>>,
        /// Claimed through a scope's filtering predicate
        filtered: bool,
        allow_unmocked: bool,
    },
    /// The target is known but has no live records, and allows pass-through
    AllowUnmockedOnly,
    /// Nothing was ever registered for the target
    Unregistered,
}

#[derive(Default)]
pub struct Registry {
    slots: Vec<Slot>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, record: Arc<Expectation>) {
        let scope = Arc::clone(record.scope());
        let key = scope.key();
        let options = scope.options();
        let slot = match self.slots.iter().position(|s| s.key == key) {
            Some(index) => &mut self.slots[index],
            None => {
                self.slots.push(Slot {
                    key: key.clone(),
                    target: scope.target().clone(),
                    allow_unmocked: false,
                    filtering_scope: None,
                    records: Vec::new(),
                });
                let last = self.slots.len() - 1;
                &mut self.slots[last]
            }
        };
        slot.allow_unmocked |= options.allow_unmocked;
        if slot.filtering_scope.is_none() {
            slot.filtering_scope = options.filtering_scope.clone();
        }
        record.set_registered(true);
        debug!("Registered expectation {} ({})", record.id(), record.describe());
        slot.records.push(record);
    }

    /// Consume one use of `record` after it matched.
    ///
    /// Returns false when the record is no longer registered, in which case
    /// the caller must match again. Exhausted records are removed before this
    /// returns.
    pub fn consume(&mut self, record: &Arc<Expectation>) -> bool {
        if !record.is_registered() {
            return false;
        }
        if record.consume_use() {
            self.unregister(record);
        }
        true
    }

    /// Forcibly unregister a record. Returns whether it was registered.
    pub fn remove_interceptor(&mut self, record: &Arc<Expectation>) -> bool {
        if !record.is_registered() {
            return false;
        }
        self.unregister(record);
        true
    }

    fn unregister(&mut self, record: &Arc<Expectation>) {
        record.set_registered(false);
        for slot in &mut self.slots {
            slot.records.retain(|r| !Arc::ptr_eq(r, record));
        }
        debug!("Removed expectation {} ({})", record.id(), record.describe());
    }

    pub fn remove_all(&mut self) {
        for slot in self.slots.drain(..) {
            for record in slot.records {
                record.set_registered(false);
            }
        }
    }

    pub fn lookup(&self, target: &TargetKey) -> Lookup {
        if let Some(slot) = self.slots.iter().find(|s| s.accepts_filtered(target)) {
            return Self::slot_lookup(slot, true);
        }
        let key = target.to_string();
        let slot = self
            .slots
            .iter()
            .find(|s| s.key == key)
            .or_else(|| self.slots.iter().find(|s| s.target.matches(target)));
        match slot {
            Some(slot) => Self::slot_lookup(slot, false),
            None => Lookup::Unregistered,
        }
    }

    fn slot_lookup(slot: &Slot, filtered: bool) -> Lookup {
        if slot.records.is_empty() && slot.allow_unmocked {
            return Lookup::AllowUnmockedOnly;
        }
        Lookup::Candidates {
            records: slot.records.clone(),
            filtered,
            allow_unmocked: slot.allow_unmocked,
        }
    }

    /// Records still expecting requests.
    pub fn pending(&self) -> Vec<Arc<Expectation>> {
        self.records().filter(|r| r.is_pending()).cloned().collect()
    }

    /// Every registered record.
    pub fn active(&self) -> Vec<Arc<Expectation>> {
        self.records().cloned().collect()
    }

    fn records(&self) -> impl Iterator<Item = &Arc<Expectation>> {
        self.slots.iter().flat_map(|s| s.records.iter())
    }
}

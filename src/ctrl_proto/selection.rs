//! Process-wide list of the last selected stripables.
//!
//! Every surface and the GUI share one [`SelectionRegistry`]. Mutations and
//! the resulting notifications happen under the same lock, so an observer
//! never sees a partially applied change and all observers see the same
//! sequence of snapshots.

use crossbeam_channel as channel;
use once_cell::sync::Lazy;
use std::sync::{Arc, Mutex};

use super::signal::Broadcaster;
use crate::session::RouteRef;

/// Immutable view of the selection after a mutation, in insertion order.
pub type SelectionSnapshot = Arc<[RouteRef]>;

static GLOBAL: Lazy<Arc<SelectionRegistry>> = Lazy::new(|| Arc::new(SelectionRegistry::new()));

#[derive(Debug, Default)]
pub struct SelectionRegistry {
    list: Mutex<Vec<RouteRef>>,
    changed: Broadcaster<SelectionSnapshot>,
}

/// Mutable access to the selection during a [`SelectionRegistry::batch`].
#[derive(Debug)]
pub struct Selection<'a> {
    list: &'a mut Vec<RouteRef>,
    changed: bool,
}

impl<'a> Selection<'a> {
    pub fn add(&mut self, stripable: &RouteRef) {
        if !self.contains(stripable) {
            self.list.push(stripable.clone());
            self.changed = true;
        }
    }

    /// Notifies even if the selection was already exactly `stripable`.
    pub fn set(&mut self, stripable: &RouteRef) {
        self.list.clear();
        self.list.push(stripable.clone());
        self.changed = true;
    }

    pub fn toggle(&mut self, stripable: &RouteRef) {
        if self.contains(stripable) {
            self.remove(stripable);
        } else {
            self.add(stripable);
        }
    }

    pub fn remove(&mut self, stripable: &RouteRef) {
        let len = self.list.len();
        self.list.retain(|selected| selected != stripable);
        self.changed |= self.list.len() != len;
    }

    /// Notifies even if the selection was already empty.
    pub fn clear(&mut self) {
        self.list.clear();
        self.changed = true;
    }

    pub fn contains(&self, stripable: &RouteRef) -> bool {
        self.list.contains(stripable)
    }
}

impl SelectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The instance shared by the whole process.
    ///
    /// Hosts pass it to the protocols they build. Tests use private
    /// instances.
    pub fn global() -> Arc<SelectionRegistry> {
        GLOBAL.clone()
    }

    /// Returns a receiver for the snapshots delivered after each change.
    pub fn subscribe(&self) -> channel::Receiver<SelectionSnapshot> {
        self.changed.subscribe()
    }

    pub fn add(&self, stripable: &RouteRef) {
        self.batch(|sel| sel.add(stripable));
    }

    /// Replaces the selection with `stripable` alone.
    pub fn set(&self, stripable: &RouteRef) {
        self.batch(|sel| sel.set(stripable));
    }

    pub fn toggle(&self, stripable: &RouteRef) {
        self.batch(|sel| sel.toggle(stripable));
    }

    pub fn remove(&self, stripable: &RouteRef) {
        self.batch(|sel| sel.remove(stripable));
    }

    pub fn clear(&self) {
        self.batch(|sel| sel.clear());
    }

    /// Applies all the mutations from `f` as a single change.
    ///
    /// Observers are notified once, with the final selection, unless the
    /// mutations were all no-ops.
    pub fn batch<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut Selection<'_>) -> R,
    {
        let mut list = self.list.lock().unwrap();

        let mut sel = Selection {
            list: &mut *list,
            changed: false,
        };
        let res = f(&mut sel);

        if sel.changed {
            let snapshot = SelectionSnapshot::from(list.as_slice());
            log::debug!("Selection changed: {:?}", snapshot);

            // Still holding the list lock: deliveries are serialized.
            self.changed.emit(snapshot);
        }

        res
    }

    pub fn first(&self) -> Option<RouteRef> {
        self.list.lock().unwrap().first().cloned()
    }

    pub fn snapshot(&self) -> SelectionSnapshot {
        SelectionSnapshot::from(self.list.lock().unwrap().as_slice())
    }

    pub fn contains(&self, stripable: &RouteRef) -> bool {
        self.list.lock().unwrap().contains(stripable)
    }

    pub fn len(&self) -> usize {
        self.list.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.lock().unwrap().is_empty()
    }
}

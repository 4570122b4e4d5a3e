//! Synchronous observer list for project notifications
//!
//! Observers run in descending priority order; observers with equal priority
//! run in subscription order.

use crate::graph::event::ProjectEvent;
use crate::graph::project::Project;

/// Receiver of project notifications
pub trait ProjectObserver: Send {
    /// Called once per event, after the mutation has been applied
    fn notify(&mut self, project: &Project, event: &ProjectEvent);
}

impl<F> ProjectObserver for F
where
    F: FnMut(&Project, &ProjectEvent) + Send,
{
    fn notify(&mut self, project: &Project, event: &ProjectEvent) {
        self(project, event)
    }
}

/// Handle returned by [`ObserverList::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverHandle(u64);

struct Entry {
    handle: ObserverHandle,
    priority: i32,
    observer: Box<dyn ProjectObserver>,
}

/// Priority ordered observer list
#[derive(Default)]
pub struct ObserverList {
    entries: Vec<Entry>,
    next_handle: u64,
}

impl ObserverList {
    /// Create an empty list
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an observer; higher priorities are notified first
    pub fn subscribe(&mut self, priority: i32, observer: Box<dyn ProjectObserver>) -> ObserverHandle {
        let handle = ObserverHandle(self.next_handle);
        self.next_handle += 1;

        // insert after every entry with priority >= ours, keeping ties stable
        let position = self
            .entries
            .iter()
            .position(|e| e.priority < priority)
            .unwrap_or(self.entries.len());
        self.entries.insert(
            position,
            Entry {
                handle,
                priority,
                observer,
            },
        );
        handle
    }

    /// Remove an observer, returning whether it was registered
    pub fn unsubscribe(&mut self, handle: ObserverHandle) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.handle != handle);
        before != self.entries.len()
    }

    /// Deliver one event to every observer
    pub fn dispatch(&mut self, project: &Project, event: &ProjectEvent) {
        for entry in &mut self.entries {
            entry.observer.notify(project, event);
        }
    }

    /// Number of registered observers
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no observer is registered
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every observer
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl std::fmt::Debug for ObserverList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverList")
            .field("observers", &self.entries.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::ProjectId;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[test]
    fn test_dispatch_by_descending_priority() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut list = ObserverList::new();
        for (name, priority) in [("low", 1), ("high", 10), ("mid", 5), ("mid2", 5)] {
            let order = order.clone();
            list.subscribe(
                priority,
                Box::new(move |_: &Project, _: &ProjectEvent| order.lock().push(name)),
            );
        }

        let project = Project::new(ProjectId::new(), "mem://main");
        list.dispatch(&project, &ProjectEvent::CollectionDeleted);
        assert_eq!(*order.lock(), vec!["high", "mid", "mid2", "low"]);
    }

    #[test]
    fn test_unsubscribe() {
        let mut list = ObserverList::new();
        let handle = list.subscribe(0, Box::new(|_: &Project, _: &ProjectEvent| {}));
        assert_eq!(list.len(), 1);
        assert!(list.unsubscribe(handle));
        assert!(!list.unsubscribe(handle));
        assert!(list.is_empty());
    }
}

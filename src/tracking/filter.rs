//! Notification filters deciding whether a change is persistence relevant

use crate::graph::event::{ChangeEvent, ChangeKind};
use std::fmt;

type Predicate = Box<dyn Fn(&ChangeEvent) -> bool + Send + Sync>;

/// One stage of the filter stack; a filter *rejects* the events it matches
pub enum NotificationFilter {
    /// Rejects changes whose old and new values are equal
    Touch,
    /// Rejects changes to transient features
    Transient,
    /// Rejects remove-many notifications on an already empty collection
    EmptyRemovals,
    /// Rejects events for which the predicate returns true
    Custom {
        /// Name used in diagnostics
        name: String,
        /// Rejection predicate
        rejects: Predicate,
    },
}

impl NotificationFilter {
    /// Build a custom filter from a rejection predicate
    pub fn custom(
        name: impl Into<String>,
        rejects: impl Fn(&ChangeEvent) -> bool + Send + Sync + 'static,
    ) -> Self {
        NotificationFilter::Custom {
            name: name.into(),
            rejects: Box::new(rejects),
        }
    }

    /// Whether this filter drops the event
    pub fn rejects(&self, event: &ChangeEvent) -> bool {
        match self {
            NotificationFilter::Touch => event.is_touch(),
            NotificationFilter::Transient => event.feature.transient,
            NotificationFilter::EmptyRemovals => {
                event.kind == ChangeKind::RemoveMany
                    && event.old.as_ref().map_or(true, |old| old.is_empty_list())
            }
            NotificationFilter::Custom { rejects, .. } => rejects(event),
        }
    }

    /// Filter name
    pub fn name(&self) -> &str {
        match self {
            NotificationFilter::Touch => "touch",
            NotificationFilter::Transient => "transient",
            NotificationFilter::EmptyRemovals => "empty_removals",
            NotificationFilter::Custom { name, .. } => name,
        }
    }
}

impl fmt::Debug for NotificationFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NotificationFilter({})", self.name())
    }
}

/// Ordered chain of filters; the first rejection wins
#[derive(Debug)]
pub struct FilterStack {
    filters: Vec<NotificationFilter>,
}

impl FilterStack {
    /// Touch, transient and empty-removal filters, in that order
    pub fn default_stack() -> Self {
        Self {
            filters: vec![
                NotificationFilter::Touch,
                NotificationFilter::Transient,
                NotificationFilter::EmptyRemovals,
            ],
        }
    }

    /// A stack accepting everything
    pub fn empty() -> Self {
        Self {
            filters: Vec::new(),
        }
    }

    /// Append a filter at the end of the chain
    pub fn push(&mut self, filter: NotificationFilter) {
        self.filters.push(filter);
    }

    /// Builder form of [`FilterStack::push`]
    pub fn with(mut self, filter: NotificationFilter) -> Self {
        self.push(filter);
        self
    }

    /// True if no filter rejects the event
    pub fn accepts(&self, event: &ChangeEvent) -> bool {
        self.rejected_by(event).is_none()
    }

    /// First filter rejecting the event
    pub fn rejected_by(&self, event: &ChangeEvent) -> Option<&NotificationFilter> {
        self.filters.iter().find(|f| f.rejects(event))
    }

    /// Number of filters
    pub fn len(&self) -> usize {
        self.filters.len()
    }

    /// Whether the stack has no filters
    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}

impl Default for FilterStack {
    fn default() -> Self {
        Self::default_stack()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{NodeId, Value};
    use crate::graph::event::Feature;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn change(feature: Feature, kind: ChangeKind, old: Option<Value>, new: Option<Value>) -> ChangeEvent {
        ChangeEvent {
            node: NodeId::new(),
            feature,
            kind,
            old,
            new,
            index: None,
        }
    }

    #[test]
    fn test_default_stack_rejections() {
        let stack = FilterStack::default_stack();

        let touch = change(Feature::attribute("a"), ChangeKind::Set, Some(1i64.into()), Some(1i64.into()));
        assert_eq!(stack.rejected_by(&touch).map(|f| f.name()), Some("touch"));

        let transient = change(Feature::attribute("a").transient(), ChangeKind::Set, None, Some(true.into()));
        assert_eq!(stack.rejected_by(&transient).map(|f| f.name()), Some("transient"));

        let empty = change(
            Feature::reference("r"),
            ChangeKind::RemoveMany,
            Some(Value::List(vec![])),
            None,
        );
        assert_eq!(stack.rejected_by(&empty).map(|f| f.name()), Some("empty_removals"));

        let real = change(Feature::attribute("a"), ChangeKind::Set, Some(1i64.into()), Some(2i64.into()));
        assert!(stack.accepts(&real));
    }

    #[test]
    fn test_non_empty_remove_many_accepted() {
        let stack = FilterStack::default_stack();
        let event = change(
            Feature::reference("r"),
            ChangeKind::RemoveMany,
            Some(Value::List(vec![Value::NodeRef(NodeId::new())])),
            None,
        );
        assert!(stack.accepts(&event));
    }

    #[test]
    fn test_short_circuit_on_first_rejection() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let stack = FilterStack::default_stack().with(NotificationFilter::custom("count", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            false
        }));

        let touch = change(Feature::attribute("a"), ChangeKind::Set, None, None);
        assert!(!stack.accepts(&touch));
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let real = change(Feature::attribute("a"), ChangeKind::Set, None, Some(1i64.into()));
        assert!(stack.accepts(&real));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_custom_filter_rejects() {
        let stack = FilterStack::empty()
            .with(NotificationFilter::custom("ignore_layout", |e| e.feature.name.starts_with("layout_")));
        let event = change(Feature::attribute("layout_x"), ChangeKind::Set, None, Some(3i64.into()));
        assert!(!stack.accepts(&event));
        assert_eq!(stack.len(), 1);
    }
}

//! [`SharedList`]: an inheritable ordered list (§3).
//!
//! Positions `[0, |base|)` mirror the base list unless locally overridden; positions
//! `[|base|, ..)` are local-only. Subscribers are notified synchronously of every
//! mutation, matching the teacher's `OnceCell`-guarded single-threaded derived-state
//! style generalized here to an explicit observer list since the teacher itself has no
//! publish/subscribe primitive (§9 design note).

use std::cell::RefCell;
use std::rc::{Rc, Weak};

/// A mutation notification delivered to every [`SharedList`] subscriber (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListEventKind {
    Added,
    WillUpdate,
    Updated,
    WillRemove,
    Removed,
}

#[derive(Debug, Clone)]
pub struct ListEvent<T> {
    pub kind: ListEventKind,
    pub index: usize,
    pub value: Option<T>,
}

type Subscriber<T> = Box<dyn FnMut(ListEvent<T>)>;

/// An ordered list that may declare a `base` list to inherit from.
pub struct SharedList<T: Clone> {
    base: RefCell<Option<Weak<RefCell<SharedList<T>>>>>,
    /// `None` at index `i < base.len()` means "not overridden, mirrors base"; `Some` is a
    /// local override. Entries at `i >= base.len()` are always `Some` (local-only tail).
    overrides: RefCell<Vec<Option<T>>>,
    subscribers: RefCell<Vec<Subscriber<T>>>,
}

impl<T: Clone> SharedList<T> {
    pub fn new() -> Self {
        SharedList {
            base: RefCell::new(None),
            overrides: RefCell::new(Vec::new()),
            subscribers: RefCell::new(Vec::new()),
        }
    }

    pub fn set_base(&self, base: &Rc<RefCell<SharedList<T>>>) {
        *self.base.borrow_mut() = Some(Rc::downgrade(base));
        let base_len = base.borrow().len();
        let mut overrides = self.overrides.borrow_mut();
        if overrides.len() < base_len {
            overrides.resize(base_len, None);
        }
    }

    /// Returns the base list, clearing the stored weak reference once it can no longer
    /// upgrade (§9: "treat the base pointer as cleared when that notification is
    /// observed").
    fn base(&self) -> Option<Rc<RefCell<SharedList<T>>>> {
        let upgraded = self.base.borrow().as_ref().and_then(Weak::upgrade);
        if upgraded.is_none() {
            *self.base.borrow_mut() = None;
        }
        upgraded
    }

    fn base_len(&self) -> usize {
        self.base().map(|b| b.borrow().len()).unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.base_len().max(self.overrides.borrow().len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_inherited(&self, index: usize) -> bool {
        index < self.base_len() && self.overrides.borrow().get(index).map(Option::is_none).unwrap_or(true)
    }

    pub fn get(&self, index: usize) -> Option<T> {
        if self.is_inherited(index) {
            return self.base().and_then(|b| b.borrow().get(index));
        }
        self.overrides.borrow().get(index).cloned().flatten()
    }

    pub fn subscribe(&self, f: impl FnMut(ListEvent<T>) + 'static) {
        self.subscribers.borrow_mut().push(Box::new(f));
    }

    fn notify(&self, event: ListEvent<T>) {
        for sub in self.subscribers.borrow_mut().iter_mut() {
            sub(event.clone());
        }
    }

    /// Appends a local-only entry past the current length.
    pub fn push(&self, value: T) {
        let index = self.len();
        self.overrides.borrow_mut().resize(index + 1, None);
        self.overrides.borrow_mut()[index] = Some(value.clone());
        self.notify(ListEvent { kind: ListEventKind::Added, index, value: Some(value) });
    }

    /// Overrides (or, past base length, sets) the entry at `index`.
    pub fn set(&self, index: usize, value: T) {
        let existed = self.get(index).is_some();
        self.overrides.borrow_mut().resize(index.max(self.overrides.borrow().len().saturating_sub(1)) + 1, None);
        self.notify(ListEvent {
            kind: ListEventKind::WillUpdate,
            index,
            value: Some(value.clone()),
        });
        self.overrides.borrow_mut()[index] = Some(value.clone());
        self.notify(ListEvent {
            kind: if existed { ListEventKind::Updated } else { ListEventKind::Added },
            index,
            value: Some(value),
        });
    }

    /// Removing a locally overridden entry within the base range reverts it to the base
    /// value rather than deleting the slot (§3 invariant); removing a local-only tail
    /// entry at the very end shrinks the list.
    pub fn remove(&self, index: usize) {
        let removed = self.get(index);
        self.notify(ListEvent { kind: ListEventKind::WillRemove, index, value: removed.clone() });
        let base_len = self.base_len();
        let mut overrides = self.overrides.borrow_mut();
        if index < base_len {
            if let Some(slot) = overrides.get_mut(index) {
                *slot = None;
            }
        } else if index == overrides.len().saturating_sub(1) {
            overrides.pop();
        } else if let Some(slot) = overrides.get_mut(index) {
            *slot = None;
        }
        drop(overrides);
        self.notify(ListEvent { kind: ListEventKind::Removed, index, value: removed });
    }

    pub fn iter(&self) -> impl Iterator<Item = T> + '_ {
        (0..self.len()).filter_map(move |i| self.get(i))
    }

    /// Builds a structurally independent copy, mapping every element through `f` (used
    /// by [`crate::ast::AstNode::deep_clone`] to deep-clone container children without
    /// carrying over subscribers or the base link).
    pub fn map_clone<U: Clone>(&self, mut f: impl FnMut(&T) -> U) -> SharedList<U> {
        let mapped = SharedList::new();
        for (i, value) in self.iter().enumerate() {
            mapped.overrides.borrow_mut().resize(i + 1, None);
            mapped.overrides.borrow_mut()[i] = Some(f(&value));
        }
        mapped
    }
}

impl<T: Clone> Default for SharedList<T> {
    fn default() -> Self {
        SharedList::new()
    }
}

impl<T: Clone + std::fmt::Debug> std::fmt::Debug for SharedList<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_only_list_behaves_like_a_vec() {
        let list: SharedList<i32> = SharedList::new();
        list.push(1);
        list.push(2);
        assert_eq!(list.len(), 2);
        assert_eq!(list.get(0), Some(1));
        assert_eq!(list.get(1), Some(2));
    }

    #[test]
    fn base_mirroring_and_override_and_revert() {
        let base = Rc::new(RefCell::new(SharedList::new()));
        base.borrow().push("a".to_string());
        base.borrow().push("b".to_string());

        let derived = SharedList::new();
        derived.set_base(&base);

        assert!(derived.is_inherited(0));
        assert_eq!(derived.get(0), Some("a".to_string()));

        derived.set(0, "override".to_string());
        assert!(!derived.is_inherited(0));
        assert_eq!(derived.get(0), Some("override".to_string()));

        derived.remove(0);
        assert!(derived.is_inherited(0));
        assert_eq!(derived.get(0), Some("a".to_string()));
    }

    #[test]
    fn base_update_propagates_to_uninherited_reads() {
        let base = Rc::new(RefCell::new(SharedList::new()));
        base.borrow().push(10);

        let derived = SharedList::new();
        derived.set_base(&base);
        assert_eq!(derived.get(0), Some(10));

        base.borrow().set(0, 20);
        assert_eq!(derived.get(0), Some(20));
    }

    #[test]
    fn observers_receive_notifications_in_order() {
        let list: SharedList<i32> = SharedList::new();
        let events = Rc::new(RefCell::new(Vec::new()));
        let sink = events.clone();
        list.subscribe(move |ev| sink.borrow_mut().push(ev.kind));
        list.push(1);
        list.set(0, 2);
        list.remove(0);

        let recorded = events.borrow();
        assert_eq!(
            *recorded,
            vec![
                ListEventKind::Added,
                ListEventKind::WillUpdate,
                ListEventKind::Updated,
                ListEventKind::WillRemove,
                ListEventKind::Removed,
            ]
        );
    }
}

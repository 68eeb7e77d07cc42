//! The process-wide identifier generator (§3, §6, §9 of the spec).
//!
//! Every declared grammar symbol, AST class, and built-in name gets a stable integer id
//! keyed by its string name. The table is single-owner and is explicitly *not* required
//! to be thread-safe (§5: single-threaded cooperative scheduling) — it is built the way
//! the teacher crate builds its other lazily-resolved single-threaded caches, with
//! `once_cell::unsync::OnceCell` rather than a `Mutex`/`OnceLock`.

use once_cell::unsync::OnceCell;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt::{Debug, Display, Formatter};

/// A process-wide stable id for a name. Ids are stable within one run, not across runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TypeId(u32);

impl Display for TypeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        IdGenerator::with(|g| write!(f, "{}", g.name_of(*self)))
    }
}

struct Table {
    by_name: HashMap<Box<str>, TypeId>,
    by_id: Vec<Box<str>>,
}

impl Table {
    fn new() -> Self {
        Self {
            by_name: HashMap::new(),
            by_id: Vec::new(),
        }
    }

    fn id_of(&mut self, name: &str) -> TypeId {
        if let Some(id) = self.by_name.get(name) {
            return *id;
        }
        let id = TypeId(self.by_id.len() as u32);
        self.by_id.push(name.into());
        self.by_name.insert(name.into(), id);
        id
    }

    fn name_of(&self, id: TypeId) -> &str {
        self.by_id
            .get(id.0 as usize)
            .map(|s| s.as_ref())
            .unwrap_or("<unknown-id>")
    }
}

/// The process-wide id generator. Not `Sync`; this crate is single-threaded per §5.
pub struct IdGenerator {
    table: RefCell<Table>,
}

impl IdGenerator {
    fn new() -> Self {
        Self {
            table: RefCell::new(Table::new()),
        }
    }

    /// Runs `f` against the single process-wide generator.
    pub fn with<R>(f: impl FnOnce(&IdGenerator) -> R) -> R {
        thread_local! {
            static INSTANCE: OnceCell<IdGenerator> = OnceCell::new();
        }
        INSTANCE.with(|cell| f(cell.get_or_init(IdGenerator::new)))
    }

    /// Returns the id for `name`, creating one if this is the first time it is seen.
    pub fn id_of(&self, name: &str) -> TypeId {
        self.table.borrow_mut().id_of(name)
    }

    /// Returns the name `id` was created from.
    pub fn name_of(&self, id: TypeId) -> String {
        self.table.borrow().name_of(id).to_string()
    }
}

impl TypeId {
    /// Get-or-create the id for `name` from the global generator.
    pub fn of(name: &str) -> Self {
        IdGenerator::with(|g| g.id_of(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_name_yields_same_id() {
        let a = TypeId::of("root.module.prod");
        let b = TypeId::of("root.module.prod");
        assert_eq!(a, b);
    }

    #[test]
    fn distinct_names_yield_distinct_ids() {
        let a = TypeId::of("foo");
        let b = TypeId::of("bar");
        assert_ne!(a, b);
    }

    #[test]
    fn display_round_trips_the_name() {
        let id = TypeId::of("widget.gadget");
        assert_eq!(format!("{}", id), "widget.gadget");
    }
}

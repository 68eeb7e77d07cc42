//! The Grammar Graph (§3, §4.B): a mutable, traversable container of modules a host
//! program assembles — and can keep mutating — at run time.

pub mod term;

use crate::error::ImplementationError;
use crate::ids::TypeId;
use crate::parser::handler::ParsingHandler;
use once_cell::unsync::OnceCell;
use regex::Regex;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
pub use term::{CharGroupUnit, Term};

/// The special leading segment of a [`Reference`]'s path, before any dotted name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefRoot {
    /// Start the lookup at the grammar's root module.
    Root,
    /// Start the lookup at the module currently being expanded.
    Module,
    /// Start the lookup in the current production's argument variables.
    Args,
    /// Start the lookup at `self` (the definition currently being expanded), usually to
    /// reach `self.base`.
    SelfRef,
}

/// A qualified path `root|module|args|self . name . name …`, resolved against a
/// [`TraversalContext`] (§3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub root: RefRoot,
    pub path: Vec<String>,
}

impl Reference {
    pub fn new(root: RefRoot, path: Vec<&str>) -> Self {
        Reference {
            root,
            path: path.into_iter().map(String::from).collect(),
        }
    }

    pub fn module(path: &[&str]) -> Self {
        Reference::new(RefRoot::Module, path.to_vec())
    }

    pub fn root(path: &[&str]) -> Self {
        Reference::new(RefRoot::Root, path.to_vec())
    }
}

/// Flags carried by a [`SymbolDefinition`] (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DefinitionFlags {
    /// The lexer attempts this token at the top of its dispatch loop.
    pub root_token: bool,
    /// Matches of this token are consumed and dropped, never emitted.
    pub ignored_token: bool,
    /// Tie-break override: prefer the shortest match instead of the longest.
    pub prefer_shorter: bool,
    /// The production's result must be wrapped as a distinct AST object even when its
    /// term tree would otherwise be transparently flattened into its parent.
    pub enforces_prod_obj: bool,
}

/// A production or token definition (§3).
pub struct SymbolDefinition {
    pub id: TypeId,
    pub kind: SymbolKind,
    pub flags: DefinitionFlags,
    pub term: RefCell<Term>,
    pub args: Vec<TypeId>,
    pub handler: RefCell<Option<Rc<dyn ParsingHandler>>>,
    pub base: RefCell<Option<Reference>>,
}

impl std::fmt::Debug for SymbolDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SymbolDefinition")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("flags", &self.flags)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    Production,
    Token,
}

impl SymbolDefinition {
    pub fn new(id: TypeId, kind: SymbolKind, term: Term) -> Self {
        SymbolDefinition {
            id,
            kind,
            flags: DefinitionFlags::default(),
            term: RefCell::new(term),
            args: Vec::new(),
            handler: RefCell::new(None),
            base: RefCell::new(None),
        }
    }

    pub fn with_flags(mut self, flags: DefinitionFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_handler(self, handler: Rc<dyn ParsingHandler>) -> Self {
        *self.handler.borrow_mut() = Some(handler);
        self
    }
}

/// A side grammar entered on a sentinel token text (the modifier syntax `@`/`@<`, §4.D).
#[derive(Debug, Clone)]
pub struct ParsingDimension {
    pub entry_token_text: String,
    pub start: Reference,
}

/// A named scope of definitions, optionally inheriting from a `base` module (§3).
///
/// Lookups fall through to base definitions; a locally defined name shadows the base
/// definition of the same name while leaving the base one reachable through
/// `self.base`.
pub struct Module {
    pub name: TypeId,
    base: RefCell<Option<TypeId>>,
    definitions: RefCell<HashMap<TypeId, Rc<SymbolDefinition>>>,
    start: RefCell<Option<Reference>>,
}

impl Module {
    pub fn new(name: TypeId) -> Self {
        Module {
            name,
            base: RefCell::new(None),
            definitions: RefCell::new(HashMap::new()),
            start: RefCell::new(None),
        }
    }

    pub fn set_base(&self, base: TypeId) {
        *self.base.borrow_mut() = Some(base);
    }

    pub fn base(&self) -> Option<TypeId> {
        *self.base.borrow()
    }

    pub fn set_start(&self, start: Reference) {
        *self.start.borrow_mut() = Some(start);
    }

    pub fn start(&self) -> Option<Reference> {
        self.start.borrow().clone()
    }

    /// Inserts `def`, returning whether the name was previously free. A caller that
    /// cares about collisions (the [`Factory`] construction protocol) turns `false`
    /// into an [`ImplementationError`] instead of silently overwriting.
    pub fn define(&self, def: Rc<SymbolDefinition>) -> bool {
        self.definitions.borrow_mut().insert(def.id, def).is_none()
    }

    /// Local-only lookup: does not fall through to `base`.
    pub fn local(&self, id: TypeId) -> Option<Rc<SymbolDefinition>> {
        self.definitions.borrow().get(&id).cloned()
    }

    pub fn local_ids(&self) -> Vec<TypeId> {
        self.definitions.borrow().keys().copied().collect()
    }
}

/// The mutable grammar graph: a container of [`Module`]s plus the char-group
/// definitions and error-sync block pairs the [`crate::parser`] and
/// [`crate::lexer`] consult.
pub struct GrammarGraph {
    modules: RefCell<HashMap<TypeId, Rc<Module>>>,
    root_module: TypeId,
    /// Matched open/close token-id pairs used by error recovery (§4.D) — `()`, `[]`,
    /// `{}` by default, but supplied by the grammar rather than hard-wired, per §6.
    pub error_sync_block_pairs: RefCell<Vec<(TypeId, TypeId)>>,
    /// Character-group matchers, keyed by the id of the [`SymbolDefinition`] whose term
    /// is a [`Term::CharGroupTerm`] referring to it. Char groups are leaves rather than
    /// traversable term nodes, so the [`crate::lexer::Lexer`] looks them up here by id
    /// instead of finding a matcher inside a [`Term`] variant.
    char_groups: RefCell<HashMap<TypeId, CharGroupUnit>>,
    /// Lazily compiled `regex::Regex` per char group id, built once on first lexer use
    /// and kept for the graph's lifetime — the teacher's `OnceCell`-guarded caching
    /// idiom applied to pattern compilation instead of nullable-field memoization.
    compiled_char_groups: RefCell<HashMap<TypeId, Rc<OnceCell<Regex>>>>,
}

impl GrammarGraph {
    pub fn new(root_module_name: &str) -> Self {
        let root_module = TypeId::of(root_module_name);
        let graph = GrammarGraph {
            modules: RefCell::new(HashMap::new()),
            root_module,
            error_sync_block_pairs: RefCell::new(Vec::new()),
            char_groups: RefCell::new(HashMap::new()),
            compiled_char_groups: RefCell::new(HashMap::new()),
        };
        graph.modules
            .borrow_mut()
            .insert(root_module, Rc::new(Module::new(root_module)));
        graph
    }

    pub fn set_char_group(&self, id: TypeId, unit: CharGroupUnit) {
        self.char_groups.borrow_mut().insert(id, unit);
    }

    pub fn char_group(&self, id: TypeId) -> Option<CharGroupUnit> {
        self.char_groups.borrow().get(&id).cloned()
    }

    /// Compiles (and caches) `id`'s char-group pattern, returning whether `c` matches.
    pub fn char_group_matches(&self, id: TypeId, c: char) -> bool {
        let Some(unit) = self.char_group(id) else { return false };
        let cell = self
            .compiled_char_groups
            .borrow_mut()
            .entry(id)
            .or_insert_with(|| Rc::new(OnceCell::new()))
            .clone();
        let regex = cell.get_or_init(|| {
            Regex::new(&unit.to_regex_pattern()).unwrap_or_else(|_| {
                // A malformed pattern is a grammar-construction bug, not user input;
                // fall back to a pattern that matches nothing rather than panicking.
                Regex::new("^$").unwrap()
            })
        });
        regex.is_match(&c.to_string())
    }

    /// Every root-attempted token definition reachable from the root module, in
    /// declaration order undefined but stable within one run — the set the
    /// [`crate::lexer::Lexer`] races at each input position (§4.C).
    pub fn root_tokens(&self) -> Vec<Rc<SymbolDefinition>> {
        self.root_module()
            .local_ids()
            .into_iter()
            .filter_map(|id| self.root_module().local(id))
            .filter(|def| def.kind == SymbolKind::Token && def.flags.root_token)
            .collect()
    }

    pub fn root_module_id(&self) -> TypeId {
        self.root_module
    }

    pub fn module(&self, id: TypeId) -> Option<Rc<Module>> {
        self.modules.borrow().get(&id).cloned()
    }

    pub fn root_module(&self) -> Rc<Module> {
        self.module(self.root_module).expect("root module always present")
    }

    pub fn add_module(&self, name: &str) -> Rc<Module> {
        let id = TypeId::of(name);
        let module = Rc::new(Module::new(id));
        self.modules.borrow_mut().insert(id, module.clone());
        module
    }

    /// Walks a module's base chain, calling `f` with each module from `start` up to the
    /// root of the inheritance chain, stopping early if `f` returns `Some`.
    pub fn walk_base_chain<R>(
        &self,
        start: TypeId,
        mut f: impl FnMut(&Module) -> Option<R>,
    ) -> Option<R> {
        let mut current = self.module(start);
        let mut guard = 0usize;
        while let Some(module) = current {
            if let Some(r) = f(&module) {
                return Some(r);
            }
            guard += 1;
            if guard > 4096 {
                // A base cycle would otherwise loop forever; grammars are host-authored
                // so this is an implementation error, not user input.
                break;
            }
            current = module.base().and_then(|b| self.module(b));
        }
        None
    }

    /// Dotted-path lookup of a definition starting at `module`, falling through the base
    /// chain (§4.B).
    pub fn lookup_in(&self, module: TypeId, id: TypeId) -> Option<Rc<SymbolDefinition>> {
        self.walk_base_chain(module, |m| m.local(id))
    }

    /// Resolves a [`Reference`] against a [`TraversalContext`].
    pub fn resolve(
        &self,
        reference: &Reference,
        ctx: &TraversalContext,
    ) -> Option<ResolvedTarget> {
        let mut module_id = match reference.root {
            RefRoot::Root => self.root_module,
            RefRoot::Module => ctx.current_module,
            RefRoot::Args => return self.resolve_arg(reference, ctx),
            RefRoot::SelfRef => ctx.current_module,
        };

        if reference.root == RefRoot::SelfRef {
            if let Some(first) = reference.path.first() {
                if first == "base" {
                    let base = self.module(module_id)?.base()?;
                    if reference.path.len() == 1 {
                        return Some(ResolvedTarget::Module(base));
                    }
                    module_id = base;
                    return self.resolve_path(module_id, &reference.path[1..]);
                }
            }
        }

        self.resolve_path(module_id, &reference.path)
    }

    fn resolve_arg(&self, reference: &Reference, ctx: &TraversalContext) -> Option<ResolvedTarget> {
        let name = reference.path.first()?;
        ctx.args.get(name.as_str()).map(|id| ResolvedTarget::Definition(*id))
    }

    fn resolve_path(&self, module_id: TypeId, path: &[String]) -> Option<ResolvedTarget> {
        if path.is_empty() {
            return Some(ResolvedTarget::Module(module_id));
        }
        if path.len() == 1 {
            let id = TypeId::of(&path[0]);
            return self
                .lookup_in(module_id, id)
                .map(ResolvedTarget::Symbol);
        }
        // A multi-segment dotted path descends through intermediate modules named by
        // each non-final segment.
        let mut current = module_id;
        for segment in &path[..path.len() - 1] {
            let next_id = TypeId::of(segment);
            current = self
                .walk_base_chain(current, |m| {
                    if m.name == next_id {
                        Some(next_id)
                    } else {
                        None
                    }
                })
                .or(Some(next_id))?;
        }
        let leaf = TypeId::of(path.last().unwrap());
        self.lookup_in(current, leaf).map(ResolvedTarget::Symbol)
    }
}

/// The value a [`Reference`] resolves to via [`GrammarGraph::resolve`].
#[derive(Debug, Clone)]
pub enum ResolvedTarget {
    Module(TypeId),
    Symbol(Rc<SymbolDefinition>),
    Definition(TypeId),
}

// Two resolutions of the same reference must point at the same definition object;
// `SymbolDefinition`'s interior mutability means structural equality isn't meaningful,
// so `Symbol` compares by pointer identity instead.
impl PartialEq for ResolvedTarget {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (ResolvedTarget::Module(a), ResolvedTarget::Module(b)) => a == b,
            (ResolvedTarget::Symbol(a), ResolvedTarget::Symbol(b)) => Rc::ptr_eq(a, b),
            (ResolvedTarget::Definition(a), ResolvedTarget::Definition(b)) => a == b,
            _ => false,
        }
    }
}
impl Eq for ResolvedTarget {}

/// Context carried while resolving a [`Reference`]: which module is "current" (for
/// `module`-rooted references) and which argument bindings are in scope (for
/// `args`-rooted references).
#[derive(Debug, Clone)]
pub struct TraversalContext {
    pub current_module: TypeId,
    pub args: HashMap<String, TypeId>,
}

impl TraversalContext {
    pub fn new(current_module: TypeId) -> Self {
        TraversalContext {
            current_module,
            args: HashMap::new(),
        }
    }
}

/// The construction protocol (§4.B): a factory installs character groups, then token
/// definitions, then non-terminal productions, then error-sync block pairs, then the
/// start reference — in that order, because later stages reference earlier ones by
/// name.
///
/// Every literal [`Term::ConstTerm`] a production may match as a keyword is promoted,
/// the first time it is seen, to a synthetic token definition sharing one
/// "const-token" id, so the lexer emits all keyword occurrences under the same token id
/// with distinct text (§4.B).
pub struct Factory {
    graph: GrammarGraph,
    const_token_id: TypeId,
    seen_const_texts: RefCell<std::collections::HashSet<String>>,
}

impl Factory {
    pub fn new(root_module_name: &str) -> Self {
        Factory {
            graph: GrammarGraph::new(root_module_name),
            const_token_id: TypeId::of("__const_token__"),
            seen_const_texts: RefCell::new(std::collections::HashSet::new()),
        }
    }

    pub fn graph(&self) -> &GrammarGraph {
        &self.graph
    }

    pub fn module(&self, name: &str) -> Rc<Module> {
        self.graph.add_module(name)
    }

    /// Registers a named character-group definition. Char groups are leaves of the term
    /// tree rather than traversable nodes, so their matcher is looked up by id in this
    /// side table instead of living inside a [`Term`] variant.
    pub fn define_char_group(
        &self,
        module: &Module,
        name: &str,
        unit: CharGroupUnit,
    ) -> Result<TypeId, ImplementationError> {
        let id = TypeId::of(name);
        let def = Rc::new(SymbolDefinition::new(
            id,
            SymbolKind::Token,
            Term::CharGroupTerm(Reference::new(RefRoot::SelfRef, vec![])),
        ));
        self.graph.set_char_group(id, unit);
        if !module.define(def) {
            return Err(ImplementationError::new(
                "duplicate definition",
                format!("'{name}' is already defined in module '{}'", module.name),
            ));
        }
        Ok(id)
    }

    pub fn char_group(&self, id: TypeId) -> Option<CharGroupUnit> {
        self.graph.char_group(id)
    }

    pub fn define_token(
        &self,
        module: &Module,
        name: &str,
        term: Term,
        flags: DefinitionFlags,
    ) -> Result<TypeId, ImplementationError> {
        let id = TypeId::of(name);
        let def = Rc::new(SymbolDefinition::new(id, SymbolKind::Token, term).with_flags(flags));
        if !module.define(def) {
            return Err(ImplementationError::new(
                "duplicate definition",
                format!("'{name}' is already defined in module '{}'", module.name),
            ));
        }
        Ok(id)
    }

    pub fn define_production(
        &self,
        module: &Module,
        name: &str,
        term: Term,
        handler: Option<Rc<dyn ParsingHandler>>,
    ) -> Result<TypeId, ImplementationError> {
        let id = TypeId::of(name);
        let found_new = self.register_const_terms(&term);
        if found_new {
            self.sync_const_token();
        }
        let mut def = SymbolDefinition::new(id, SymbolKind::Production, term);
        if let Some(h) = handler {
            def = def.with_handler(h);
        }
        if !module.define(Rc::new(def)) {
            return Err(ImplementationError::new(
                "duplicate definition",
                format!("'{name}' is already defined in module '{}'", module.name),
            ));
        }
        Ok(id)
    }

    /// Sets `module`'s start reference, failing if it does not resolve — the
    /// construction protocol runs this stage last (§4.B), so every name it could
    /// plausibly reach is already defined.
    pub fn set_start(&self, module: &Module, reference: Reference) -> Result<(), ImplementationError> {
        let ctx = TraversalContext::new(module.name);
        if self.graph.resolve(&reference, &ctx).is_none() {
            return Err(ImplementationError::new(
                "dangling start reference",
                format!("{reference:?} does not resolve from module '{}'", module.name),
            ));
        }
        module.set_start(reference);
        Ok(())
    }

    pub fn add_error_sync_pair(&self, open: &str, close: &str) {
        self.graph
            .error_sync_block_pairs
            .borrow_mut()
            .push((TypeId::of(open), TypeId::of(close)));
    }

    /// Walks `term` collecting literal [`Term::ConstTerm`] texts; returns whether any
    /// text not previously seen was found.
    fn register_const_terms(&self, term: &Term) -> bool {
        let mut found_new = false;
        match term {
            Term::ConstTerm(text) => {
                found_new |= self.seen_const_texts.borrow_mut().insert(text.clone());
            }
            Term::Concat(children) | Term::Alternate(children, _) => {
                for c in children {
                    found_new |= self.register_const_terms(c);
                }
            }
            Term::Multiply(inner, _, _) => found_new |= self.register_const_terms(inner.as_ref()),
            _ => {}
        }
        found_new
    }

    /// Rebuilds the shared synthetic keyword-token definition (§4.B) from every
    /// distinct const-term text seen so far, so the lexer dispatches all of them under
    /// one root token id while the AST still sees each one's own text.
    fn sync_const_token(&self) {
        let texts = self.seen_const_texts.borrow();
        let alternates = texts
            .iter()
            .cloned()
            .map(|text| Rc::new(Term::ConstTerm(text)))
            .collect::<Vec<_>>();
        let def = Rc::new(
            SymbolDefinition::new(
                self.const_token_id,
                SymbolKind::Token,
                Term::Alternate(alternates, None),
            )
            .with_flags(DefinitionFlags {
                root_token: true,
                ..Default::default()
            }),
        );
        self.graph.root_module().define(def);
    }

    pub fn const_token_id(&self) -> TypeId {
        self.const_token_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn module_lookup_falls_through_base() {
        let graph = GrammarGraph::new("root");
        let base = graph.add_module("base_mod");
        let derived = graph.add_module("derived_mod");
        derived.set_base(base.name);

        let id = TypeId::of("greet");
        base.define(Rc::new(SymbolDefinition::new(
            id,
            SymbolKind::Production,
            Term::ConstTerm("hi".into()),
        )));

        assert!(derived.local(id).is_none());
        assert!(graph.lookup_in(derived.name, id).is_some());
    }

    #[test]
    fn local_override_shadows_base_but_base_stays_reachable() {
        let graph = GrammarGraph::new("root");
        let base = graph.add_module("base_mod");
        let derived = graph.add_module("derived_mod");
        derived.set_base(base.name);

        let id = TypeId::of("greet");
        base.define(Rc::new(SymbolDefinition::new(
            id,
            SymbolKind::Production,
            Term::ConstTerm("hi".into()),
        )));
        derived.define(Rc::new(SymbolDefinition::new(
            id,
            SymbolKind::Production,
            Term::ConstTerm("hello".into()),
        )));

        let resolved = graph.lookup_in(derived.name, id).unwrap();
        match &*resolved.term.borrow() {
            Term::ConstTerm(t) => assert_eq!(t, "hello"),
            _ => panic!("wrong term"),
        }

        let ctx = TraversalContext::new(derived.name);
        let base_ref = Reference::new(RefRoot::SelfRef, vec!["base".into()]);
        let resolved_base = graph.resolve(&base_ref, &ctx).unwrap();
        assert_eq!(resolved_base, ResolvedTarget::Module(base.name));
    }

    #[test]
    fn multiply_trivial_is_equivalent_to_child() {
        assert!(term::Multiplicity::ONE.is_trivial());
    }
}

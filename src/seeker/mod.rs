//! The Seeker (§4.F): semantic name resolution over the AST the parser built.
//! `foreach`/`set`/`remove` walk a reference expression's structure (identifier search,
//! owner ascension, bridge following, injections, link chains, param-pass template
//! instantiation) the way the grammar graph's own `Reference`/`RefRoot` resolution walks
//! module base chains (`crate::grammar::GrammarGraph::resolve`), generalized from a
//! static module graph to a live, owner-linked AST. The callback-driven recursion is
//! implemented as an explicit work stack (§9 design note) rather than native recursion,
//! grounded on the zero-recursion-worklist pattern the pack's own tree-walkers use for
//! the same reason (apollo-compiler's validation passes walk executable documents via
//! explicit frame stacks instead of unbounded recursion).

pub mod callee;

use crate::ast::{AstNode, BracketType, LinkOperator, NodeKind, NodeRef, OperatorFamily};
use crate::value::{Clonable, Containing, MetaHaving, Printable};
use once_cell::unsync::OnceCell;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

/// What one step of a `foreach` walk found (§4.F: "yield its target to the callback").
#[derive(Clone)]
pub struct Found {
    pub target: NodeRef,
    /// Set once an injection makes a field the new `this`; records where in the result
    /// path that happened (§4.F: "a `thisIndex` into the result stack is recorded").
    pub this_index: Option<usize>,
}

/// The callback's verdict after seeing one [`Found`] (§4.F: "the callback returns a
/// verb").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Move,
    Stop,
    PerformAndMove,
    PerformAndStop,
}

impl Verb {
    fn should_stop(self) -> bool {
        matches!(self, Verb::Stop | Verb::PerformAndStop)
    }

    fn should_perform(self) -> bool {
        matches!(self, Verb::PerformAndMove | Verb::PerformAndStop)
    }
}

/// Per-seek knobs (§4.F: "If `SKIP_OWNERS` is not set... ascend to the owner scope").
#[derive(Debug, Clone, Copy, Default)]
pub struct SeekFlags {
    pub skip_owners: bool,
}

/// The reference-expression shapes `foreach`/`set`/`remove` dispatch on (§4.F: "an AST
/// sub-tree built from `Identifier`, `LinkOperator("."/"->")`, `ParamPass`, `ThisTypeRef`,
/// comparison ops, `TypeOp`").
#[derive(Clone)]
enum RefTarget {
    Identifier(Rc<str>),
    Link { op: LinkOperator, lhs: NodeRef, rhs: NodeRef },
    Comparison { lhs: NodeRef, rhs: NodeRef },
    ParamPass { operand: NodeRef, bracket: BracketType, param: NodeRef },
    ThisTypeRef,
    TypeOp { operand: NodeRef },
}

impl RefTarget {
    /// Classifies `node` as a reference expression, or `None` if it is not one of the
    /// shapes §4.F names (an already-resolved value, say). Comparison nodes are
    /// recognized as a reference-expression shape per the spec's own list, but the spec
    /// gives no resolution rule for them; a comparison names a boolean result, not a
    /// scope or definition, so [`Seeker::foreach`] dispatches them to nothing rather than
    /// inventing a rule the spec does not state.
    fn of(node: &NodeRef) -> Option<RefTarget> {
        match &node.borrow().kind {
            NodeKind::Identifier(name) => Some(RefTarget::Identifier(name.clone())),
            NodeKind::Infix { family: OperatorFamily::Link, link_op: Some(op), lhs, rhs, .. } => {
                Some(RefTarget::Link { op: *op, lhs: lhs.clone(), rhs: rhs.clone() })
            }
            NodeKind::Infix { family: OperatorFamily::Comparison, lhs, rhs, .. } => {
                Some(RefTarget::Comparison { lhs: lhs.clone(), rhs: rhs.clone() })
            }
            NodeKind::ParamPass { operand, bracket, param } => {
                Some(RefTarget::ParamPass { operand: operand.clone(), bracket: *bracket, param: param.clone() })
            }
            NodeKind::ThisTypeRef => Some(RefTarget::ThisTypeRef),
            NodeKind::TypeOp { operand } => Some(RefTarget::TypeOp { operand: operand.clone() }),
            _ => None,
        }
    }
}

/// One entry of the precomputed continuation stack (§4.F): a scope this seek has already
/// resolved a reference against, pushed by a caller around a nested `foreach` so the next
/// lookup in the same scope is satisfied from memory. Keyed by the reference's structural
/// digest rather than a bare name, since a reference expression need not be an
/// `Identifier`.
struct Continuation {
    scope: NodeRef,
    key: String,
    result: Found,
}

/// Walks an AST looking up reference expressions. Carries the precomputed continuation
/// stack and the per-call visited set across a single seek; construct one per top-level
/// `foreach`/`set`/`remove` call.
pub struct Seeker {
    continuations: Vec<Continuation>,
}

impl Seeker {
    pub fn new() -> Self {
        Seeker { continuations: Vec::new() }
    }

    /// Pushes a resolved (scope, reference) pair onto the LIFO continuation stack so a
    /// nested `foreach` call can resume from it without re-searching (§4.F).
    pub fn push_continuation(&mut self, scope: NodeRef, reference: &NodeRef, target: NodeRef) {
        self.continuations.push(Continuation {
            scope,
            key: structural_digest(reference),
            result: Found { target, this_index: None },
        });
    }

    fn pop_continuation_for(&mut self, scope: &NodeRef, key: &str) -> Option<Found> {
        let index = self
            .continuations
            .iter()
            .rposition(|c| Rc::ptr_eq(&c.scope, scope) && c.key == key)?;
        Some(self.continuations.remove(index).result)
    }

    /// Enumerates every AST node `reference` resolves to from `scope`, nearest first,
    /// invoking `cb` with each until it answers `Stop`/`PerformAndStop` (§4.F). Dispatch
    /// is by reference kind (steps below follow spec.md §4.F's own numbering for the
    /// `Identifier` case; `Link`/`ParamPass`/`ThisTypeRef`/`TypeOp` each have their own
    /// rule).
    pub fn foreach(&mut self, reference: &NodeRef, scope: &NodeRef, flags: SeekFlags, mut cb: impl FnMut(&Found) -> Verb) {
        self.foreach_dyn(reference, scope, flags, &mut cb)
    }

    fn foreach_dyn(&mut self, reference: &NodeRef, scope: &NodeRef, flags: SeekFlags, cb: &mut dyn FnMut(&Found) -> Verb) {
        let key = structural_digest(reference);
        if let Some(found) = self.pop_continuation_for(scope, &key) {
            cb(&found);
            return;
        }

        match RefTarget::of(reference) {
            Some(RefTarget::Identifier(name)) => self.foreach_identifier(reference, &name, scope, flags, cb),
            Some(RefTarget::ThisTypeRef) => {
                cb(&Found { target: scope.clone(), this_index: None });
            }
            Some(RefTarget::Link { op: LinkOperator::Dot | LinkOperator::Arrow, lhs, rhs }) => {
                self.foreach_link(&lhs, &rhs, scope, cb)
            }
            Some(RefTarget::Link { .. }) => {
                // RangeOpen/RangeClose appear in reference-expression trees but are not
                // name-resolution operators; nothing to yield.
            }
            Some(RefTarget::Comparison { .. }) => {}
            Some(RefTarget::ParamPass { operand, bracket: BracketType::Round, param }) => {
                self.foreach_param_pass(&operand, &param, scope, cb)
            }
            Some(RefTarget::ParamPass { bracket: BracketType::Square, .. }) => {
                // `[]` param-pass is array indexing over an already-resolved value,
                // handled by Callee Lookup's "raw array type" rule (§4.G), not by name
                // resolution.
            }
            Some(RefTarget::TypeOp { operand }) => self.foreach_dyn(&operand, scope, flags, cb),
            None => {}
        }
    }

    /// §4.F steps 1-5 for `Identifier` references: definitions in scope, owner ascension,
    /// bridge following, injection traversal.
    fn foreach_identifier(
        &mut self,
        reference: &NodeRef,
        name: &str,
        scope: &NodeRef,
        flags: SeekFlags,
        cb: &mut dyn FnMut(&Found) -> Verb,
    ) {
        let mut visited: HashSet<*const RefCell<AstNode>> = HashSet::new();
        let mut work: Vec<NodeRef> = vec![scope.clone()];
        let mut ascend_next = !flags.skip_owners;

        'outer: while let Some(current) = work.pop() {
            if !visited.insert(Rc::as_ptr(&current)) {
                continue;
            }

            for found in definitions_named(&current, name) {
                if cb(&found).should_stop() {
                    return;
                }
            }

            for bridge_target in bridges_in(&current) {
                let mut sub = Seeker::new();
                let mut stop = false;
                sub.foreach_dyn(reference, &bridge_target, SeekFlags { skip_owners: true }, &mut |found| {
                    let verb = cb(found);
                    if verb.should_stop() {
                        stop = true;
                    }
                    verb
                });
                if stop {
                    return;
                }
            }

            for found in injections_in(&current, reference, self) {
                if cb(&found).should_stop() {
                    return;
                }
            }

            if ascend_next {
                if let Some(owner) = current.borrow().owner() {
                    work.push(owner);
                    continue 'outer;
                }
            }
            ascend_next = !flags.skip_owners;
        }
    }

    /// `LinkOperator("."/"->")` dispatch (§4.F): resolve the left side first; the found
    /// target is deep-dereferenced through any reference-type wrapper (covering both "the
    /// result is a scope/module/type" and "`a` is a reference-typed value" cases in one
    /// step) and the right side is resolved against it without owner ascension.
    fn foreach_link(&mut self, lhs: &NodeRef, rhs: &NodeRef, scope: &NodeRef, cb: &mut dyn FnMut(&Found) -> Verb) {
        let mut lhs_target = None;
        self.foreach_dyn(lhs, scope, SeekFlags::default(), &mut |found| {
            lhs_target = Some(found.target.clone());
            Verb::Stop
        });
        let Some(lhs_target) = lhs_target else { return };
        let content = deep_deref(&lhs_target);
        self.foreach_dyn(rhs, &content, SeekFlags { skip_owners: true }, cb);
    }

    /// `ParamPass(op, [args])` with `ROUND` brackets (§4.F): resolve the operand to a
    /// template definition, then instantiate it against `args` (cached by structural
    /// equality, §9).
    fn foreach_param_pass(&mut self, operand: &NodeRef, args: &NodeRef, scope: &NodeRef, cb: &mut dyn FnMut(&Found) -> Verb) {
        let mut template = None;
        self.foreach_dyn(operand, scope, SeekFlags::default(), &mut |found| {
            template = Some(found.target.clone());
            Verb::Stop
        });
        let Some(template) = template else { return };
        let instance = instantiate_template(&template, args);
        cb(&Found { target: instance, this_index: None });
    }

    /// `set(ref, target, cb)` (§4.F): walks matches via `foreach`, letting `cb` decide
    /// what to do with each one — the common "resolve one name" case passes a callback
    /// that returns `Stop` on the first hit. Returns whether any match was found.
    pub fn set(
        &mut self,
        reference: &NodeRef,
        scope: &NodeRef,
        flags: SeekFlags,
        mut cb: impl FnMut(&Found) -> Verb,
    ) -> bool {
        let mut matched = false;
        self.foreach_dyn(reference, scope, flags, &mut |found| {
            matched = true;
            cb(found)
        });
        matched
    }

    /// `remove(ref, target, cb)` (§4.F): walks matches via `foreach`; a match is actually
    /// dropped from its owning container only when `cb` answers `PerformAndMove`/
    /// `PerformAndStop` — a plain `Move`/`Stop` inspects without mutating. Returns whether
    /// anything was removed.
    pub fn remove(
        &mut self,
        reference: &NodeRef,
        scope: &NodeRef,
        flags: SeekFlags,
        mut cb: impl FnMut(&Found) -> Verb,
    ) -> bool {
        let mut removed = false;
        self.foreach_dyn(reference, scope, flags, &mut |found| {
            let verb = cb(found);
            if verb.should_perform() && detach_from_owner(&found.target) {
                removed = true;
            }
            verb
        });
        removed
    }
}

/// Drops `node` from whichever `Container` literally owns it, ascending through
/// non-`Container` owner links first (a `Definition`'s target is owned by the
/// `Definition` node, not directly by a container — see [`definitions_named`]).
fn detach_from_owner(node: &NodeRef) -> bool {
    let mut current = node.clone();
    loop {
        let Some(owner) = current.borrow().owner() else { return false };
        if let NodeKind::Container { children, .. } = &owner.borrow().kind {
            if let Some(index) = (0..children.len())
                .find(|&i| children.get(i).map(|c| Rc::ptr_eq(&c, &current)).unwrap_or(false))
            {
                children.remove(index);
                return true;
            }
        }
        current = owner;
    }
}

impl Default for Seeker {
    fn default() -> Self {
        Seeker::new()
    }
}

/// Definitions named `name` directly inside `scope`'s own child list (§4.F step 1).
///
/// A `Definition`'s target is a struct field, not a `Container` child, so it carries no
/// owner back-link of its own; this backfills one pointing at the `Definition` node itself
/// so [`Seeker::remove`] can walk back up to a literal container child when asked to drop
/// the binding.
fn definitions_named(scope: &NodeRef, name: &str) -> Vec<Found> {
    let node = scope.borrow();
    let mut out = Vec::new();
    for i in 0..node.child_count() {
        let Some(child) = node.child_at(i) else { continue };
        let is_match = matches!(&child.borrow().kind, NodeKind::Definition { name: n, .. } if &**n == name);
        if is_match {
            if let NodeKind::Definition { target, .. } = &child.borrow().kind {
                target.borrow().set_owner(&child);
                out.push(Found { target: target.clone(), this_index: None });
            }
        }
    }
    out
}

/// Every `Bridge` target found directly inside `scope` (§4.F step 4).
fn bridges_in(scope: &NodeRef) -> Vec<NodeRef> {
    let node = scope.borrow();
    let mut out = Vec::new();
    for i in 0..node.child_count() {
        if let Some(child) = node.child_at(i) {
            if let NodeKind::Bridge { target } = &child.borrow().kind {
                out.push(target.clone());
            }
        }
    }
    out
}

/// Members of any injected field's type, searched as if they belonged to `scope` itself
/// (§4.F step 5). An injected field is a `Definition` whose `modifiers` list carries
/// `"inject"`; a `"no-bind"` modifier keeps the outer `this`, otherwise the injected
/// field becomes the new `this` and its index among `scope`'s children is recorded.
fn injections_in(scope: &NodeRef, reference: &NodeRef, seeker: &mut Seeker) -> Vec<Found> {
    let node = scope.borrow();
    let mut out = Vec::new();
    for i in 0..node.child_count() {
        let Some(child) = node.child_at(i) else { continue };
        let (is_injection, no_bind, target) = match &child.borrow().kind {
            NodeKind::Definition { modifiers, target, .. } if modifiers.iter().any(|m| &**m == "inject") => {
                (true, modifiers.iter().any(|m| &**m == "no-bind"), target.clone())
            }
            _ => (false, false, child.clone()),
        };
        if !is_injection {
            continue;
        }
        let field_type = deep_deref(&target);
        let this_index = if no_bind { None } else { Some(i) };
        seeker.foreach_dyn(reference, &field_type, SeekFlags { skip_owners: true }, &mut |found| {
            out.push(Found { target: found.target.clone(), this_index });
            Verb::Move
        });
    }
    out
}

/// Strips `Alias`/reference-type wrappers until a non-reference node is reached (§4.F:
/// "the injected object's type (deep-dereferenced through reference-type wrappers)").
fn deep_deref(node: &NodeRef) -> NodeRef {
    let mut current = node.clone();
    loop {
        let next = match &current.borrow().kind {
            NodeKind::Alias { reference } => Some(reference.clone()),
            _ => None,
        };
        match next {
            Some(n) => current = n,
            None => return current,
        }
    }
}

/// A canonical string form of an AST sub-tree, used for structural-equality comparisons
/// (§4.F: `ParamPass` instantiation "cached by structural equality of arg list"; §9:
/// "key on the canonical form of the argument list"). Two sub-trees shaped the same way
/// produce the same digest regardless of node identity.
fn structural_digest(node: &NodeRef) -> String {
    let label = node.borrow().label();
    let count = node.borrow().child_count();
    if count == 0 {
        return label;
    }
    let mut parts = Vec::with_capacity(count);
    for i in 0..count {
        if let Some(child) = node.borrow().child_at(i) {
            parts.push(structural_digest(&child));
        }
    }
    format!("{label}[{}]", parts.join(","))
}

fn clone_subtree(node: &NodeRef) -> NodeRef {
    Rc::new(RefCell::new(node.borrow().deep_clone()))
}

/// Process-wide template-instantiation cache (§9: "preserve identity so later lookups
/// return the same instance"), built the same way as [`crate::ids::IdGenerator`]: a
/// single-owner table behind `once_cell::unsync::OnceCell` rather than a `Mutex`, since
/// this crate is single-threaded (§5).
struct TemplateCache;

impl TemplateCache {
    fn with<R>(f: impl FnOnce(&mut HashMap<(usize, String), NodeRef>) -> R) -> R {
        thread_local! {
            static INSTANCE: OnceCell<RefCell<HashMap<(usize, String), NodeRef>>> = OnceCell::new();
        }
        INSTANCE.with(|cell| {
            let cache = cell.get_or_init(|| RefCell::new(HashMap::new()));
            f(&mut cache.borrow_mut())
        })
    }
}

/// Instantiates a `ParamPass(ROUND)` template reference, keyed by the template node's
/// identity and the argument list's structural digest.
fn instantiate_template(template: &NodeRef, args: &NodeRef) -> NodeRef {
    let key = (Rc::as_ptr(template) as usize, structural_digest(args));
    TemplateCache::with(|cache| cache.entry(key).or_insert_with(|| clone_subtree(template)).clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{ContainerKind, SharedList, VisibilityFlags};
    use crate::ids::TypeId;

    fn def(name: &str, target: NodeRef) -> NodeRef {
        AstNode::new(
            NodeKind::Definition {
                name: name.into(),
                target,
                modifiers: Vec::new(),
                visibility: VisibilityFlags::default(),
            },
            TypeId::of("def"),
            None,
        )
    }

    fn scope() -> NodeRef {
        AstNode::new(
            NodeKind::Container { kind: ContainerKind::Scope, children: SharedList::new(), keys: Vec::new() },
            TypeId::of("scope"),
            None,
        )
    }

    fn ident(name: &str) -> NodeRef {
        AstNode::new(NodeKind::Identifier(name.into()), TypeId::of("ident"), None)
    }

    #[test]
    fn finds_a_definition_in_the_current_scope() {
        let root = scope();
        let value = AstNode::new(NodeKind::IntegerLiteral(3), TypeId::of("int"), None);
        AstNode::adopt(&root, def("x", value.clone()));

        let mut seeker = Seeker::new();
        let mut found_target = None;
        let matched = seeker.set(&ident("x"), &root, SeekFlags::default(), |f| {
            found_target = Some(f.target.clone());
            Verb::Stop
        });
        assert!(matched);
        assert!(Rc::ptr_eq(&found_target.expect("x resolves"), &value));
    }

    #[test]
    fn ascends_to_the_owner_scope_unless_skip_owners() {
        let outer = scope();
        let value = AstNode::new(NodeKind::IntegerLiteral(5), TypeId::of("int"), None);
        AstNode::adopt(&outer, def("y", value.clone()));

        let inner = scope();
        AstNode::adopt(&outer, inner.clone());

        let mut seeker = Seeker::new();
        assert!(seeker.set(&ident("y"), &inner, SeekFlags::default(), |_| Verb::Stop));

        let mut seeker = Seeker::new();
        let mut count = 0;
        seeker.foreach(&ident("y"), &inner, SeekFlags { skip_owners: true }, |_| {
            count += 1;
            Verb::Move
        });
        assert_eq!(count, 0);
    }

    #[test]
    fn follows_a_bridge_without_further_ascension() {
        let bridged = scope();
        let value = AstNode::new(NodeKind::IntegerLiteral(7), TypeId::of("int"), None);
        AstNode::adopt(&bridged, def("z", value.clone()));

        let user = scope();
        AstNode::adopt(&user, AstNode::new(NodeKind::Bridge { target: bridged }, TypeId::of("use"), None));

        let mut seeker = Seeker::new();
        let mut found_target = None;
        seeker.set(&ident("z"), &user, SeekFlags::default(), |f| {
            found_target = Some(f.target.clone());
            Verb::Stop
        });
        assert!(Rc::ptr_eq(&found_target.expect("z resolves through the bridge"), &value));
    }

    #[test]
    fn remove_drops_the_definition_from_its_container() {
        let root = scope();
        let value = AstNode::new(NodeKind::IntegerLiteral(1), TypeId::of("int"), None);
        AstNode::adopt(&root, def("x", value));
        assert_eq!(root.borrow().child_count(), 1);

        let mut seeker = Seeker::new();
        assert!(seeker.remove(&ident("x"), &root, SeekFlags::default(), |_| Verb::PerformAndStop));
        assert!(!seeker.set(&ident("x"), &root, SeekFlags::default(), |_| Verb::Stop));
    }

    #[test]
    fn remove_with_a_plain_stop_verb_does_not_mutate() {
        let root = scope();
        let value = AstNode::new(NodeKind::IntegerLiteral(1), TypeId::of("int"), None);
        AstNode::adopt(&root, def("x", value));

        let mut seeker = Seeker::new();
        assert!(!seeker.remove(&ident("x"), &root, SeekFlags::default(), |_| Verb::Stop));
        assert_eq!(root.borrow().child_count(), 1);
    }

    #[test]
    fn dot_link_resolves_through_a_nested_scope() {
        let module = scope();
        let value = AstNode::new(NodeKind::IntegerLiteral(9), TypeId::of("int"), None);
        AstNode::adopt(&module, def("x", value.clone()));

        let user = scope();
        AstNode::adopt(&user, def("m", module));

        let link = AstNode::new(
            NodeKind::Infix {
                family: OperatorFamily::Link,
                op_text: ".".into(),
                link_op: Some(LinkOperator::Dot),
                lhs: ident("m"),
                rhs: ident("x"),
            },
            TypeId::of("link"),
            None,
        );

        let mut seeker = Seeker::new();
        let mut found_target = None;
        seeker.foreach(&link, &user, SeekFlags::default(), |f| {
            found_target = Some(f.target.clone());
            Verb::Stop
        });
        assert!(Rc::ptr_eq(&found_target.expect("m.x resolves"), &value));
    }

    #[test]
    fn this_type_ref_yields_the_scope_itself() {
        let root = scope();
        let this_ref = AstNode::new(NodeKind::ThisTypeRef, TypeId::of("this"), None);

        let mut seeker = Seeker::new();
        let mut found_target = None;
        seeker.foreach(&this_ref, &root, SeekFlags::default(), |f| {
            found_target = Some(f.target.clone());
            Verb::Stop
        });
        assert!(Rc::ptr_eq(&found_target.expect("ThisTypeRef resolves"), &root));
    }

    #[test]
    fn param_pass_instantiates_the_same_template_once_per_argument_shape() {
        let root = scope();
        let template_body = AstNode::new(NodeKind::IntegerLiteral(0), TypeId::of("int"), None);
        AstNode::adopt(&root, def("Box", template_body));

        let pass_a = AstNode::new(
            NodeKind::ParamPass {
                operand: ident("Box"),
                bracket: BracketType::Round,
                param: AstNode::new(NodeKind::IntegerLiteral(1), TypeId::of("int"), None),
            },
            TypeId::of("param_pass"),
            None,
        );
        let pass_b = AstNode::new(
            NodeKind::ParamPass {
                operand: ident("Box"),
                bracket: BracketType::Round,
                param: AstNode::new(NodeKind::IntegerLiteral(1), TypeId::of("int"), None),
            },
            TypeId::of("param_pass"),
            None,
        );

        let mut seeker = Seeker::new();
        let mut first = None;
        seeker.foreach(&pass_a, &root, SeekFlags::default(), |f| {
            first = Some(f.target.clone());
            Verb::Stop
        });

        let mut seeker = Seeker::new();
        let mut second = None;
        seeker.foreach(&pass_b, &root, SeekFlags::default(), |f| {
            second = Some(f.target.clone());
            Verb::Stop
        });

        assert!(Rc::ptr_eq(&first.expect("instantiates"), &second.expect("instantiates again")));
    }
}

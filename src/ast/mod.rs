//! The AST model (§3, §4.E): the tagged tree a successful parse (or a partial,
//! error-recovered one) builds, plus [`SharedList`], the inheritable ordered list type
//! used by container nodes and by the grammar's own definition tables.

pub mod shared_list;

use crate::ids::TypeId;
use crate::position::SourceLocation;
use crate::value::{Clonable, Containing, DynValue, MapContaining, MetaHaving, Printable};
use std::cell::RefCell;
use std::rc::{Rc, Weak};

pub use shared_list::{ListEvent, SharedList};

/// A strong, shared handle to one AST node. Nodes are owned by their parent container;
/// `NodeRef` is the handle callers pass around, `AstNode::owner` is the non-owning
/// back-link.
pub type NodeRef = Rc<RefCell<AstNode>>;

/// Weak, non-owning back-link from a node to its owner (§3: "Weak/back links... exist
/// for traversal but never own").
pub type OwnerRef = Weak<RefCell<AstNode>>;

/// The bracket kind surrounding a [`NodeKind::ParamPass`]'s argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BracketType {
    Round,
    Square,
}

/// An infix/outfix operator family, carried alongside the operator's literal text so one
/// `NodeKind` variant covers every concrete operator in a family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorFamily {
    Prefix,
    Postfix,
    Assignment,
    Comparison,
    Addition,
    Multiplication,
    Bitwise,
    Log,
    Link,
    Conditional,
}

/// The operator carried by an [`OperatorFamily::Link`] node — `.`/`->`/range-open/
/// range-close, per the resolved Open Question in `DESIGN.md` about the ambiguous
/// `<.>`/`<..` pair in the distilled wording.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkOperator {
    Dot,
    Arrow,
    RangeOpen,
    RangeClose,
}

/// Container node flavors (§3: "Container nodes: Scope (ordered list), List, Map
/// (key→value), Bracket").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerKind {
    Scope,
    List,
    Map,
    Bracket,
}

/// Visibility carried by a [`NodeKind::Definition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VisibilityFlags {
    pub private: bool,
    pub injection: bool,
}

/// The payload of one AST node, independent of its shared metadata (§3, §4.E).
#[derive(Debug)]
pub enum NodeKind {
    /// The raw matched text of one consumed token, exactly as `GenericParsingHandler`
    /// leaves it (§4.D) before a specialized handler (infix folding, literal
    /// conversion, ...) replaces it with a more specific node.
    Terminal(Rc<str>),
    Identifier(Rc<str>),
    IntegerLiteral(i64),
    FloatLiteral(f64),
    CharLiteral(char),
    StringLiteral(Rc<str>),

    Infix {
        family: OperatorFamily,
        op_text: Rc<str>,
        link_op: Option<LinkOperator>,
        lhs: NodeRef,
        rhs: NodeRef,
    },
    Outfix {
        family: OperatorFamily,
        op_text: Rc<str>,
        operand: NodeRef,
    },

    ParamPass {
        operand: NodeRef,
        bracket: BracketType,
        param: NodeRef,
    },

    /// Intermediate parser payload (§4.D): records which alternate of a [`crate::grammar::Term::Alternate`]
    /// was taken, before a specialized parsing handler replaces it with a concrete node.
    Route {
        route_index: usize,
        data: Vec<NodeRef>,
    },

    Container {
        kind: ContainerKind,
        children: SharedList<NodeRef>,
        keys: Vec<Option<DynValue>>,
    },

    Definition {
        name: Rc<str>,
        target: NodeRef,
        modifiers: Vec<Rc<str>>,
        visibility: VisibilityFlags,
    },

    /// The surface form of a `use` statement (§3); resolved by the Seeker to make
    /// another scope's names visible at this node's location.
    Bridge {
        target: NodeRef,
    },

    Alias {
        reference: NodeRef,
    },

    GenericCommand {
        keyword: Rc<str>,
        args: Vec<NodeRef>,
    },

    ThisTypeRef,
    TypeOp {
        operand: NodeRef,
    },
}

/// One node of the AST: a [`NodeKind`] payload plus the metadata every node carries
/// regardless of kind (§4.E).
#[derive(Debug)]
pub struct AstNode {
    pub kind: NodeKind,
    pub prod_id: TypeId,
    pub loc: Option<SourceLocation>,
    owner: RefCell<OwnerRef>,
}

impl AstNode {
    pub fn new(kind: NodeKind, prod_id: TypeId, loc: Option<SourceLocation>) -> NodeRef {
        Rc::new(RefCell::new(AstNode {
            kind,
            prod_id,
            loc,
            owner: RefCell::new(Weak::new()),
        }))
    }

    /// A bare `Scope` container with no children, used as the root of a fresh parse.
    pub fn root_scope(prod_id: TypeId) -> NodeRef {
        AstNode::new(
            NodeKind::Container {
                kind: ContainerKind::Scope,
                children: SharedList::new(),
                keys: Vec::new(),
            },
            prod_id,
            None,
        )
    }

    /// Appends `child` to a container node and sets `child`'s owner back-link to `self`.
    ///
    /// Per §3's ownership lifecycle: "each node is owned by its parent container", so
    /// this is the one place a [`NodeRef`] is supposed to move into an owning slot.
    pub fn adopt(self_ref: &NodeRef, child: NodeRef) {
        child.borrow().set_owner(self_ref);
        if let NodeKind::Container { children, .. } = &mut self_ref.borrow_mut().kind {
            children.push(child);
        }
    }
}

impl MetaHaving for AstNode {
    fn owner(&self) -> Option<NodeRef> {
        self.owner.borrow().upgrade()
    }

    fn set_owner(&self, owner: &NodeRef) {
        *self.owner.borrow_mut() = Rc::downgrade(owner);
    }

    fn source_location(&self) -> Option<SourceLocation> {
        self.loc.clone()
    }

    fn prod_id(&self) -> TypeId {
        self.prod_id
    }
}

impl Clonable for AstNode {
    /// Structural deep clone; the clone starts unowned, matching the teacher's
    /// `ASTNode::clone_node` convention of letting the caller re-adopt the copy.
    fn deep_clone(&self) -> AstNode {
        let kind = match &self.kind {
            NodeKind::Terminal(s) => NodeKind::Terminal(s.clone()),
            NodeKind::Identifier(s) => NodeKind::Identifier(s.clone()),
            NodeKind::IntegerLiteral(v) => NodeKind::IntegerLiteral(*v),
            NodeKind::FloatLiteral(v) => NodeKind::FloatLiteral(*v),
            NodeKind::CharLiteral(v) => NodeKind::CharLiteral(*v),
            NodeKind::StringLiteral(s) => NodeKind::StringLiteral(s.clone()),
            NodeKind::Infix { family, op_text, link_op, lhs, rhs } => NodeKind::Infix {
                family: *family,
                op_text: op_text.clone(),
                link_op: *link_op,
                lhs: deep_clone_ref(lhs),
                rhs: deep_clone_ref(rhs),
            },
            NodeKind::Outfix { family, op_text, operand } => NodeKind::Outfix {
                family: *family,
                op_text: op_text.clone(),
                operand: deep_clone_ref(operand),
            },
            NodeKind::ParamPass { operand, bracket, param } => NodeKind::ParamPass {
                operand: deep_clone_ref(operand),
                bracket: *bracket,
                param: deep_clone_ref(param),
            },
            NodeKind::Route { route_index, data } => NodeKind::Route {
                route_index: *route_index,
                data: data.iter().map(deep_clone_ref).collect(),
            },
            NodeKind::Container { kind, children, keys } => NodeKind::Container {
                kind: *kind,
                children: children.map_clone(deep_clone_ref),
                keys: keys.clone(),
            },
            NodeKind::Definition { name, target, modifiers, visibility } => NodeKind::Definition {
                name: name.clone(),
                target: deep_clone_ref(target),
                modifiers: modifiers.clone(),
                visibility: *visibility,
            },
            NodeKind::Bridge { target } => NodeKind::Bridge { target: deep_clone_ref(target) },
            NodeKind::Alias { reference } => NodeKind::Alias { reference: deep_clone_ref(reference) },
            NodeKind::GenericCommand { keyword, args } => NodeKind::GenericCommand {
                keyword: keyword.clone(),
                args: args.iter().map(deep_clone_ref).collect(),
            },
            NodeKind::ThisTypeRef => NodeKind::ThisTypeRef,
            NodeKind::TypeOp { operand } => NodeKind::TypeOp { operand: deep_clone_ref(operand) },
        };
        AstNode {
            kind,
            prod_id: self.prod_id,
            loc: self.loc.clone(),
            owner: RefCell::new(Weak::new()),
        }
    }
}

fn deep_clone_ref(node: &NodeRef) -> NodeRef {
    Rc::new(RefCell::new(node.borrow().deep_clone()))
}

impl Printable for AstNode {
    fn label(&self) -> String {
        match &self.kind {
            NodeKind::Terminal(s) => format!("Terminal({s:?})"),
            NodeKind::Identifier(s) => format!("Identifier({s})"),
            NodeKind::IntegerLiteral(v) => format!("IntegerLiteral({v})"),
            NodeKind::FloatLiteral(v) => format!("FloatLiteral({v})"),
            NodeKind::CharLiteral(v) => format!("CharLiteral({v:?})"),
            NodeKind::StringLiteral(s) => format!("StringLiteral({s:?})"),
            NodeKind::Infix { op_text, .. } => format!("Infix({op_text})"),
            NodeKind::Outfix { op_text, .. } => format!("Outfix({op_text})"),
            NodeKind::ParamPass { bracket, .. } => format!("ParamPass({bracket:?})"),
            NodeKind::Route { route_index, .. } => format!("Route(#{route_index})"),
            NodeKind::Container { kind, .. } => format!("{kind:?}"),
            NodeKind::Definition { name, .. } => format!("Definition({name})"),
            NodeKind::Bridge { .. } => "Bridge".to_string(),
            NodeKind::Alias { .. } => "Alias".to_string(),
            NodeKind::GenericCommand { keyword, .. } => format!("GenericCommand({keyword})"),
            NodeKind::ThisTypeRef => "ThisTypeRef".to_string(),
            NodeKind::TypeOp { .. } => "TypeOp".to_string(),
        }
    }
}

impl Containing for AstNode {
    fn child_count(&self) -> usize {
        match &self.kind {
            NodeKind::Container { children, .. } => children.len(),
            NodeKind::Infix { .. } => 2,
            NodeKind::Outfix { .. } | NodeKind::ParamPass { .. } | NodeKind::TypeOp { .. } => 1,
            NodeKind::Route { data, .. } => data.len(),
            NodeKind::GenericCommand { args, .. } => args.len(),
            _ => 0,
        }
    }

    fn child_at(&self, index: usize) -> Option<NodeRef> {
        match &self.kind {
            NodeKind::Container { children, .. } => children.get(index),
            NodeKind::Infix { lhs, rhs, .. } => [lhs, rhs].get(index).map(|n| (*n).clone()),
            NodeKind::Outfix { operand, .. }
            | NodeKind::ParamPass { operand, .. }
            | NodeKind::TypeOp { operand, .. } => (index == 0).then(|| operand.clone()),
            NodeKind::Route { data, .. } => data.get(index).cloned(),
            NodeKind::GenericCommand { args, .. } => args.get(index).cloned(),
            _ => None,
        }
    }
}

impl MapContaining for AstNode {
    fn get(&self, key: &DynValue) -> Option<NodeRef> {
        if let NodeKind::Container { kind: ContainerKind::Map, children, keys } = &self.kind {
            for (i, k) in keys.iter().enumerate() {
                if let Some(k) = k {
                    if dyn_value_eq(k, key) {
                        return children.get(i);
                    }
                }
            }
        }
        None
    }
}

fn dyn_value_eq(a: &DynValue, b: &DynValue) -> bool {
    match (a, b) {
        (DynValue::Unit, DynValue::Unit) => true,
        (DynValue::Bool(a), DynValue::Bool(b)) => a == b,
        (DynValue::Int(a), DynValue::Int(b)) => a == b,
        (DynValue::Str(a), DynValue::Str(b)) => a == b,
        (DynValue::Type(a), DynValue::Type(b)) => a == b,
        _ => false,
    }
}

impl ptree::TreeItem for NodeRefItem {
    type Child = NodeRefItem;

    fn write_self<W: std::io::Write>(&self, f: &mut W, style: &ptree::Style) -> std::io::Result<()> {
        write!(f, "{}", style.paint(self.0.borrow().label()))
    }

    fn children(&self) -> std::borrow::Cow<[Self::Child]> {
        let node = self.0.borrow();
        let count = node.child_count();
        let items = (0..count)
            .filter_map(|i| node.child_at(i))
            .map(NodeRefItem)
            .collect::<Vec<_>>();
        std::borrow::Cow::Owned(items)
    }
}

/// A `ptree::TreeItem` wrapper around a [`NodeRef`], used by the `DumpAst` parsing
/// handler (§4.D) to print the tree under construction.
#[derive(Clone)]
pub struct NodeRefItem(pub NodeRef);

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(prod: &str, kind: NodeKind) -> NodeRef {
        AstNode::new(kind, TypeId::of(prod), None)
    }

    #[test]
    fn adopt_sets_owner_back_link() {
        let scope = AstNode::root_scope(TypeId::of("Scope"));
        let child = leaf("Identifier", NodeKind::Identifier("x".into()));
        AstNode::adopt(&scope, child.clone());

        let owner = child.borrow().owner().expect("owner set");
        assert!(Rc::ptr_eq(&owner, &scope));
    }

    #[test]
    fn container_child_access_matches_insertion_order() {
        let scope = AstNode::root_scope(TypeId::of("Scope"));
        let a = leaf("IntegerLiteral", NodeKind::IntegerLiteral(1));
        let b = leaf("IntegerLiteral", NodeKind::IntegerLiteral(2));
        AstNode::adopt(&scope, a);
        AstNode::adopt(&scope, b);

        assert_eq!(scope.borrow().child_count(), 2);
        let second = scope.borrow().child_at(1).unwrap();
        match &second.borrow().kind {
            NodeKind::IntegerLiteral(v) => assert_eq!(*v, 2),
            _ => panic!("wrong kind"),
        };
    }

    #[test]
    fn deep_clone_is_structurally_equal_but_unowned() {
        let scope = AstNode::root_scope(TypeId::of("Scope"));
        let child = leaf("Identifier", NodeKind::Identifier("x".into()));
        AstNode::adopt(&scope, child);

        let cloned = scope.borrow().deep_clone();
        assert!(cloned.owner().is_none());
        assert_eq!(cloned.child_count(), 1);
    }
}

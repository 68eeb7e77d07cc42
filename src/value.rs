//! The typed dynamic object system (§2 of `SPEC_FULL.md`), abstracted down to the small
//! surface the grammar, AST and seeker actually need to carry values and query
//! capabilities across node kinds without a full object/reflection system.

use crate::ast::{AstNode, NodeRef};
use crate::ids::TypeId;
use crate::position::SourceLocation;
use std::rc::Rc;

/// An owned or shared runtime value. Stands in for the host language's full object
/// system (container utilities, reflection) which §1 of the spec treats as an external
/// collaborator.
#[derive(Debug, Clone)]
pub enum DynValue {
    Unit,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    Node(NodeRef),
    Type(TypeId),
}

impl DynValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            DynValue::Unit => "unit",
            DynValue::Bool(_) => "bool",
            DynValue::Int(_) => "int",
            DynValue::Float(_) => "float",
            DynValue::Str(_) => "string",
            DynValue::Node(_) => "node",
            DynValue::Type(_) => "type",
        }
    }
}

/// Owner back-link and source-location accessors, implemented by every AST node
/// variant. Named after the teacher's one-trait-per-capability split
/// (`IProduction`/`ProductionBuilder`/`ProductionLogger`), generalized from compile-time
/// trait objects to pattern matches over [`AstNode`]'s sum type per the spec's §9 design
/// note.
pub trait MetaHaving {
    fn owner(&self) -> Option<NodeRef>;
    fn set_owner(&self, owner: &NodeRef);
    fn source_location(&self) -> Option<SourceLocation>;
    fn prod_id(&self) -> TypeId;
}

/// Deep-copy capability: produce a structurally equal, freshly owned subtree.
pub trait Clonable {
    fn deep_clone(&self) -> AstNode;
}

/// Debug/tree-printing capability, backed by `ptree`.
pub trait Printable {
    fn label(&self) -> String;
}

/// Ordered-child access, implemented by container node kinds (`Scope`, `List`,
/// `Bracket`).
pub trait Containing {
    fn child_count(&self) -> usize;
    fn child_at(&self, index: usize) -> Option<NodeRef>;
}

/// Key-to-value child access, implemented by `Map`.
pub trait MapContaining {
    fn get(&self, key: &DynValue) -> Option<NodeRef>;
}

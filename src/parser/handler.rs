//! Parsing handlers (§4.D): the polymorphic callback objects a [`crate::grammar::SymbolDefinition`]
//! may attach, invoked when its production level is popped. `GenericParsingHandler` is
//! the default; specialized handlers replace it for productions that need a different
//! shaped result.

use crate::ast::{AstNode, ContainerKind, LinkOperator, NodeKind, NodeRef, OperatorFamily};
use crate::ids::TypeId;
use crate::position::SourceLocation;
use std::rc::Rc;

/// Everything a handler needs to reduce one finished production level: which
/// production it is, the accumulated children bubbled up from its term tree, and the
/// source location spanning them.
pub struct HandlerContext {
    pub prod_id: TypeId,
    pub module: TypeId,
    pub children: Vec<NodeRef>,
    pub loc: Option<SourceLocation>,
}

/// The four callbacks named in §4.D. Only `on_prod_end` must produce a value; the other
/// three are hooks a specialized handler may override for side effects (attaching
/// owner links, emitting a debug dump, ...).
pub trait ParsingHandler {
    fn on_prod_start(&self, _prod_id: TypeId) {}
    fn on_term_start(&self, _prod_id: TypeId) {}
    fn on_level_exit(&self, _prod_id: TypeId) {}
    fn on_prod_end(&self, ctx: &HandlerContext) -> NodeRef;
}

/// The default handler: wraps the accumulated children in one container node. Per
/// §4.D, what shape those children already arrived in depends on the production's root
/// term kind — `Concat` flattens its children directly into the production's
/// accumulator, `Multiply` hands up one `List` node, `Alternate` hands up one `Route`
/// node — so by the time `on_prod_end` runs, "wrap what's here" is always the right
/// default.
pub struct GenericParsingHandler;

impl ParsingHandler for GenericParsingHandler {
    fn on_prod_end(&self, ctx: &HandlerContext) -> NodeRef {
        let node = AstNode::new(
            NodeKind::Container {
                kind: ContainerKind::List,
                children: crate::ast::SharedList::new(),
                keys: Vec::new(),
            },
            ctx.prod_id,
            ctx.loc.clone(),
        );
        for child in &ctx.children {
            AstNode::adopt(&node, child.clone());
        }
        node
    }
}

/// Folds a flattened `operand (op operand)*` child list into a left-associative chain
/// of `Infix` nodes, as described for infix handlers in §4.D.
pub struct InfixFoldHandler {
    pub family: OperatorFamily,
    pub link_op_of: fn(&str) -> Option<LinkOperator>,
}

impl InfixFoldHandler {
    pub fn new(family: OperatorFamily) -> Self {
        InfixFoldHandler { family, link_op_of: |_| None }
    }
}

impl ParsingHandler for InfixFoldHandler {
    fn on_prod_end(&self, ctx: &HandlerContext) -> NodeRef {
        let mut iter = ctx.children.iter();
        let Some(first) = iter.next() else {
            return AstNode::new(NodeKind::Terminal("".into()), ctx.prod_id, ctx.loc.clone());
        };
        let mut acc = first.clone();
        while let (Some(op_node), Some(rhs)) = (iter.next(), iter.next()) {
            let op_text: Rc<str> = match &op_node.borrow().kind {
                NodeKind::Terminal(text) => text.clone(),
                _ => "".into(),
            };
            acc = AstNode::new(
                NodeKind::Infix {
                    family: self.family,
                    op_text: op_text.clone(),
                    link_op: (self.link_op_of)(&op_text),
                    lhs: acc.clone(),
                    rhs: rhs.clone(),
                },
                ctx.prod_id,
                ctx.loc.clone(),
            );
        }
        acc
    }
}

/// Attaches owner links and registers definitions for a production whose result is a
/// scope body (§4.D: "the Scope handler attaches owner links and registers
/// definitions").
pub struct ScopeHandler;

impl ParsingHandler for ScopeHandler {
    fn on_prod_end(&self, ctx: &HandlerContext) -> NodeRef {
        let node = AstNode::new(
            NodeKind::Container {
                kind: ContainerKind::Scope,
                children: crate::ast::SharedList::new(),
                keys: Vec::new(),
            },
            ctx.prod_id,
            ctx.loc.clone(),
        );
        for child in &ctx.children {
            AstNode::adopt(&node, child.clone());
        }
        node
    }
}

/// Loads and splices an external file's AST, standing in for the "root manager" the
/// Import handler calls in the original system (§4.D). File/CLI I/O is out of scope
/// (§1), so this is a pluggable seam rather than a filesystem-backed implementation.
pub trait ModuleLoader {
    fn load(&self, path: &str) -> Option<NodeRef>;
}

pub struct ImportHandler {
    pub loader: Rc<dyn ModuleLoader>,
}

impl ParsingHandler for ImportHandler {
    fn on_prod_end(&self, ctx: &HandlerContext) -> NodeRef {
        let path = ctx
            .children
            .first()
            .and_then(|c| match &c.borrow().kind {
                NodeKind::StringLiteral(s) | NodeKind::Terminal(s) => Some(s.clone()),
                _ => None,
            })
            .unwrap_or_else(|| "".into());
        self.loader.load(&path).unwrap_or_else(|| {
            AstNode::new(NodeKind::Terminal(path), ctx.prod_id, ctx.loc.clone())
        })
    }
}

/// Prints the reduced sub-tree via `ptree` before returning it unchanged, the way the
/// `DumpAst` handler in §4.D is described.
pub struct DumpAstHandler {
    pub inner: Rc<dyn ParsingHandler>,
}

impl ParsingHandler for DumpAstHandler {
    fn on_prod_end(&self, ctx: &HandlerContext) -> NodeRef {
        let node = self.inner.on_prod_end(ctx);
        let _ = ptree::print_tree(&crate::ast::NodeRefItem(node.clone()));
        node
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::NodeKind;
    use crate::value::Containing;

    #[test]
    fn generic_handler_wraps_children() {
        let child = AstNode::new(NodeKind::IntegerLiteral(1), TypeId::of("int"), None);
        let ctx = HandlerContext {
            prod_id: TypeId::of("prod"),
            module: TypeId::of("root"),
            children: vec![child],
            loc: None,
        };
        let node = GenericParsingHandler.on_prod_end(&ctx);
        assert_eq!(node.borrow().child_count(), 1);
    }
}

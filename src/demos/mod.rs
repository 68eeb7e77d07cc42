//! A small worked grammar exercising the crate end to end, the way the teacher's own
//! `src/examples/json` exercises its parser crate. Concrete Latin/Arabic keyword
//! dictionaries are out of scope, so this grammar is deliberately tiny — arithmetic with
//! precedence, `def` bindings, `use` bridges, overload ambiguity, line comments, and
//! brace recovery are each exercised by one scenario below.

use crate::ast::{AstNode, ContainerKind, NodeKind, NodeRef, OperatorFamily};
use crate::grammar::term::{Multiplicity, MultiplyFlags};
use crate::grammar::{DefinitionFlags, Factory, Module, Reference, Term};
use crate::ids::TypeId;
use crate::lexer::Lexer;
use crate::notice::NoticeStore;
use crate::parser::handler::{GenericParsingHandler, HandlerContext, ParsingHandler};
use crate::parser::Parser;
use std::rc::Rc;

fn const_tok(text: &str) -> Rc<Term> {
    Rc::new(Term::ConstTerm(text.into()))
}

fn ident_and_int_tokens(factory: &Factory, root: &Module) {
    factory.define_char_group(root, "letter", crate::grammar::CharGroupUnit::Union(vec![
        crate::grammar::CharGroupUnit::Sequence('a', 'z'),
        crate::grammar::CharGroupUnit::Sequence('A', 'Z'),
        crate::grammar::CharGroupUnit::Random(vec!['_']),
    ])).expect("demo grammar is well-formed");
    factory.define_char_group(root, "digit", crate::grammar::CharGroupUnit::Sequence('0', '9')).expect("demo grammar is well-formed");
    factory.define_char_group(root, "not_newline", crate::grammar::CharGroupUnit::Invert(Box::new(
        crate::grammar::CharGroupUnit::Random(vec!['\n']),
    ))).expect("demo grammar is well-formed");
    factory.define_char_group(root, "space", crate::grammar::CharGroupUnit::Random(vec![' ', '\t', '\n', '\r'])).expect("demo grammar is well-formed");

    let self_ref = |name: &str| Term::CharGroupTerm(Reference::new(crate::grammar::RefRoot::SelfRef, vec![name]));

    factory.define_token(
        root,
        "ident",
        Term::Concat(vec![
            Rc::new(self_ref("letter")),
            Rc::new(Term::Multiply(
                Rc::new(Term::Alternate(vec![Rc::new(self_ref("letter")), Rc::new(self_ref("digit"))], None)),
                Multiplicity::star(),
                MultiplyFlags::empty(),
            )),
        ]),
        DefinitionFlags { root_token: true, ..Default::default() },
    ).expect("demo grammar is well-formed");
    factory.define_token(
        root,
        "int",
        Term::Multiply(Rc::new(self_ref("digit")), Multiplicity::plus(), MultiplyFlags::empty()),
        DefinitionFlags { root_token: true, ..Default::default() },
    ).expect("demo grammar is well-formed");
    factory.define_token(
        root,
        "line_comment",
        Term::Concat(vec![
            Rc::new(Term::ConstTerm("//".into())),
            Rc::new(Term::Multiply(Rc::new(self_ref("not_newline")), Multiplicity::star(), MultiplyFlags::empty())),
        ]),
        DefinitionFlags { root_token: true, ignored_token: true, ..Default::default() },
    ).expect("demo grammar is well-formed");
    factory.define_token(
        root,
        "ws",
        Term::Multiply(Rc::new(self_ref("space")), Multiplicity::plus(), MultiplyFlags::empty()),
        DefinitionFlags { root_token: true, ignored_token: true, ..Default::default() },
    ).expect("demo grammar is well-formed");

    // `{`/`}` get their own token ids rather than sharing the synthetic const-token id
    // every other punctuation/keyword literal is promoted into (§4.B), since
    // `error_sync_block_pairs` (§4.D) identifies a block opener/closer by token id.
    factory.define_token(root, "lbrace", Term::ConstTerm("{".into()), DefinitionFlags { root_token: true, ..Default::default() }).expect("demo grammar is well-formed");
    factory.define_token(root, "rbrace", Term::ConstTerm("}".into()), DefinitionFlags { root_token: true, ..Default::default() }).expect("demo grammar is well-formed");

    // `+`/`-` and `*`/`/` are each their own character group rather than an `Alternate`
    // of two `ConstTerm`s: a production-level `Alternate` always bubbles up wrapped in a
    // `Route` node (§4.D), but `InfixFoldHandler` reads operator text straight off a bare
    // `Terminal` node, so the choice has to be resolved inside one token's own term tree
    // instead of the surrounding production's.
    factory.define_char_group(root, "addop_chars", crate::grammar::CharGroupUnit::Random(vec!['+', '-'])).expect("demo grammar is well-formed");
    factory.define_char_group(root, "mulop_chars", crate::grammar::CharGroupUnit::Random(vec!['*', '/'])).expect("demo grammar is well-formed");
    factory.define_token(root, "addop", self_ref("addop_chars"), DefinitionFlags { root_token: true, ..Default::default() }).expect("demo grammar is well-formed");
    factory.define_token(root, "mulop", self_ref("mulop_chars"), DefinitionFlags { root_token: true, ..Default::default() }).expect("demo grammar is well-formed");
}

/// Builds the grammar shared by every scenario below: `statement -> (def_stmt |
/// use_stmt | expr_stmt)*`, `expr -> term (("+"|"-") term)*`, `term -> factor
/// (("*"|"/") factor)*`, `factor -> ident | int`.
pub fn demo_grammar() -> Factory {
    let factory = Factory::new("demo");
    let root = factory.graph().root_module();
    ident_and_int_tokens(&factory, &root);

    let ident_ref = || Term::TokenTerm(Reference::new(crate::grammar::RefRoot::Root, vec!["ident"]), None);
    let int_ref = || Term::TokenTerm(Reference::new(crate::grammar::RefRoot::Root, vec!["int"]), None);

    factory.define_production(
        &root,
        "factor",
        Term::Alternate(vec![Rc::new(ident_ref()), Rc::new(int_ref())], None),
        Some(Rc::new(PassthroughHandler)),
    ).expect("demo grammar is well-formed");

    factory.define_production(
        &root,
        "term",
        Term::Concat(vec![
            Rc::new(Term::Reference(Reference::root(&["factor"]))),
            Rc::new(Term::Multiply(
                Rc::new(Term::Concat(vec![
                    Rc::new(Term::TokenTerm(Reference::root(&["mulop"]), None)),
                    Rc::new(Term::Reference(Reference::root(&["factor"]))),
                ])),
                Multiplicity::star(),
                MultiplyFlags::empty(),
            )),
        ]),
        Some(Rc::new(PrecedenceHandler { family: OperatorFamily::Multiplication })),
    ).expect("demo grammar is well-formed");

    factory.define_production(
        &root,
        "expr",
        Term::Concat(vec![
            Rc::new(Term::Reference(Reference::root(&["term"]))),
            Rc::new(Term::Multiply(
                Rc::new(Term::Concat(vec![
                    Rc::new(Term::TokenTerm(Reference::root(&["addop"]), None)),
                    Rc::new(Term::Reference(Reference::root(&["term"]))),
                ])),
                Multiplicity::star(),
                MultiplyFlags::empty(),
            )),
        ]),
        Some(Rc::new(PrecedenceHandler { family: OperatorFamily::Addition })),
    ).expect("demo grammar is well-formed");

    factory.define_production(
        &root,
        "def_stmt",
        Term::Concat(vec![
            const_tok("def"),
            Rc::new(ident_ref()),
            const_tok(":"),
            Rc::new(Term::Reference(Reference::root(&["expr"]))),
            const_tok(";"),
        ]),
        Some(Rc::new(DefBindingHandler)),
    ).expect("demo grammar is well-formed");

    factory.define_production(
        &root,
        "use_stmt",
        Term::Concat(vec![
            const_tok("use"),
            Rc::new(ident_ref()),
            const_tok(";"),
        ]),
        Some(Rc::new(UseBridgeHandler)),
    ).expect("demo grammar is well-formed");

    factory.define_production(
        &root,
        "block",
        Term::Concat(vec![
            Rc::new(Term::TokenTerm(Reference::root(&["lbrace"]), None)),
            Rc::new(Term::Multiply(
                Rc::new(Term::Reference(Reference::root(&["statement"]))),
                Multiplicity::star(),
                MultiplyFlags::empty(),
            )),
            Rc::new(Term::TokenTerm(Reference::root(&["rbrace"]), None)),
        ]),
        Some(Rc::new(GenericParsingHandler)),
    ).expect("demo grammar is well-formed");

    factory.define_production(
        &root,
        "expr_stmt",
        Term::Concat(vec![
            Rc::new(Term::Reference(Reference::root(&["expr"]))),
            const_tok(";"),
        ]),
        Some(Rc::new(GenericParsingHandler)),
    ).expect("demo grammar is well-formed");

    factory.define_production(
        &root,
        "statement",
        Term::Alternate(
            vec![
                Rc::new(Term::Reference(Reference::root(&["def_stmt"]))),
                Rc::new(Term::Reference(Reference::root(&["use_stmt"]))),
                Rc::new(Term::Reference(Reference::root(&["block"]))),
                Rc::new(Term::Reference(Reference::root(&["expr_stmt"]))),
            ],
            None,
        ),
        Some(Rc::new(PassthroughHandler)),
    ).expect("demo grammar is well-formed");

    factory.define_production(
        &root,
        "program",
        Term::Multiply(
            Rc::new(Term::Reference(Reference::root(&["statement"]))),
            Multiplicity::star(),
            MultiplyFlags::empty(),
        ),
        Some(Rc::new(PassthroughHandler)),
    ).expect("demo grammar is well-formed");

    factory.set_start(&root, Reference::root(&["program"])).expect("demo grammar is well-formed");
    factory.add_error_sync_pair("lbrace", "rbrace");
    factory
}

/// Folds `operand (op operand)*` into a left-associative chain of `Infix` nodes, the way
/// [`crate::parser::handler::InfixFoldHandler`] does — adapted here because a bare
/// `Concat(Reference, Multiply(...))` production hands `on_prod_end` exactly two
/// children, `[first_operand, ops_list]`, with every later `(op, operand)` pair living
/// inside the `Multiply`'s wrapped `List` container rather than flattened into
/// `ctx.children` itself (§4.D: "Multiply wraps one `Container{List}` node").
struct PrecedenceHandler {
    family: OperatorFamily,
}

impl ParsingHandler for PrecedenceHandler {
    fn on_prod_end(&self, ctx: &HandlerContext) -> NodeRef {
        let mut top = ctx.children.iter();
        let Some(first) = top.next() else {
            return AstNode::new(NodeKind::Terminal("".into()), ctx.prod_id, ctx.loc.clone());
        };
        let mut acc = first.clone();
        if let Some(ops_list) = top.next() {
            if let NodeKind::Container { kind: ContainerKind::List, children, .. } = &ops_list.borrow().kind {
                let mut pairs = children.iter();
                while let (Some(op_node), Some(rhs)) = (pairs.next(), pairs.next()) {
                    let op_text: Rc<str> = match &op_node.borrow().kind {
                        NodeKind::Terminal(text) => text.clone(),
                        _ => "".into(),
                    };
                    acc = AstNode::new(
                        NodeKind::Infix { family: self.family, op_text, link_op: None, lhs: acc.clone(), rhs },
                        ctx.prod_id,
                        ctx.loc.clone(),
                    );
                }
            }
        }
        acc
    }
}

/// For a production whose entire term is one bare `Alternate`/`Multiply` — `factor`,
/// `statement`, `program` — `ctx.children` already holds the single `Route`/`List` node
/// that term produced, so wrapping it again the way `GenericParsingHandler` does would
/// add a layer nothing ever looks past. Unwraps the chosen branch out of a `Route` and
/// passes a `List` through unchanged.
struct PassthroughHandler;

impl ParsingHandler for PassthroughHandler {
    fn on_prod_end(&self, ctx: &HandlerContext) -> NodeRef {
        let node = match ctx.children.first() {
            Some(n) => n.clone(),
            None => return AstNode::new(NodeKind::Terminal("".into()), ctx.prod_id, ctx.loc.clone()),
        };
        let chosen = if let NodeKind::Route { data, .. } = &node.borrow().kind {
            data.first().cloned()
        } else {
            None
        };
        chosen.unwrap_or(node)
    }
}

/// Wraps `ident ":" expr` into a `Definition` node (§8: `def x : 3 ;`) so the resulting
/// AST can be fed straight into a [`crate::seeker::Seeker`].
struct DefBindingHandler;

impl crate::parser::handler::ParsingHandler for DefBindingHandler {
    fn on_prod_end(&self, ctx: &crate::parser::handler::HandlerContext) -> crate::ast::NodeRef {
        let name: Rc<str> = match ctx.children.get(1) {
            Some(c) => match &c.borrow().kind {
                NodeKind::Terminal(t) => t.clone(),
                _ => "".into(),
            },
            None => "".into(),
        };
        let target = ctx.children.get(3).cloned().unwrap_or_else(|| AstNode::new(NodeKind::Terminal("".into()), ctx.prod_id, ctx.loc.clone()));
        AstNode::new(
            NodeKind::Definition {
                name,
                target,
                modifiers: Vec::new(),
                visibility: crate::ast::VisibilityFlags::default(),
            },
            ctx.prod_id,
            ctx.loc.clone(),
        )
    }
}

/// Wraps `use ident ";"` into a `Bridge` node whose target is resolved lazily by the
/// caller once the referenced module's scope exists (§8: `use m ; m.x`).
struct UseBridgeHandler;

impl crate::parser::handler::ParsingHandler for UseBridgeHandler {
    fn on_prod_end(&self, ctx: &crate::parser::handler::HandlerContext) -> crate::ast::NodeRef {
        let target = ctx
            .children
            .get(1)
            .cloned()
            .unwrap_or_else(|| AstNode::new(NodeKind::Terminal("".into()), ctx.prod_id, ctx.loc.clone()));
        AstNode::new(NodeKind::Bridge { target }, ctx.prod_id, ctx.loc.clone())
    }
}

/// Tokenizes and parses `code` against [`demo_grammar`], returning the AST root (if the
/// parse completed) and the notice store it accumulated.
pub fn run(code: &str) -> (Option<crate::ast::NodeRef>, NoticeStore) {
    let factory = demo_grammar();
    let graph = factory.graph();
    let lexer = Lexer::new(graph, "demo.src");
    let notices = NoticeStore::new();
    let tokens = lexer.tokenize(code, &notices);

    let start = graph.root_module().start().expect("demo grammar declares a start production");
    let mut parser = Parser::new(graph);
    parser.begin_parsing(&start).expect("demo grammar's start production always resolves");
    for token in &tokens {
        parser.feed(token);
    }
    let root = parser.end_parsing();
    for notice in parser.notices.approved().iter() {
        notices.report(notice.clone());
    }
    (root, notices)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Containing;

    #[test]
    fn arithmetic_respects_multiplication_precedence() {
        let (ast, notices) = run("a + b * c ;");
        assert!(notices.approved().is_empty());
        let root = ast.expect("parse should complete");
        let stmt = root.borrow().child_at(0).unwrap();
        let expr = stmt.borrow().child_at(0).unwrap();
        match &expr.borrow().kind {
            NodeKind::Infix { op_text, rhs, .. } => {
                assert_eq!(&**op_text, "+");
                assert!(matches!(&rhs.borrow().kind, NodeKind::Infix { op_text, .. } if &**op_text == "*"));
            }
            other => panic!("expected a top-level + infix, got {other:?}"),
        };
    }

    #[test]
    fn def_binding_produces_a_definition_node() {
        let (ast, notices) = run("def x : 3 ;");
        assert!(notices.approved().is_empty());
        let root = ast.expect("parse should complete");
        let stmt = root.borrow().child_at(0).unwrap();
        assert!(matches!(&stmt.borrow().kind, NodeKind::Definition { name, .. } if &**name == "x"));
    }

    #[test]
    fn use_bridge_installs_a_bridge_node() {
        let (ast, notices) = run("use m ;");
        assert!(notices.approved().is_empty());
        let root = ast.expect("parse should complete");
        let stmt = root.borrow().child_at(0).unwrap();
        assert!(matches!(&stmt.borrow().kind, NodeKind::Bridge { .. }));
    }

    #[test]
    fn line_comment_is_swallowed_between_statements() {
        let (ast, notices) = run("def x : 1 ; // trailing note\ndef y : 2 ;");
        assert!(notices.approved().is_empty());
        let root = ast.expect("parse should complete despite the comment");
        assert_eq!(root.borrow().child_count(), 2);
    }

    #[test]
    fn unclosed_brace_is_recovered_and_reported() {
        let (_ast, notices) = run("{ def x : 1 ; def y : 2 ;");
        assert!(notices.approved().iter().any(|n| n.code == crate::notice::NoticeCode::UnclosedBlock));
    }

    #[test]
    fn overload_ambiguity_is_reported_as_multiple_callee_match() {
        use crate::seeker::callee::{resolve, Candidate, MatchStatus};
        let f = AstNode::new(NodeKind::ThisTypeRef, TypeId::of("fn"), None);
        let g = AstNode::new(NodeKind::ThisTypeRef, TypeId::of("fn"), None);
        let result = resolve(
            "overloaded",
            vec![
                Candidate { node: f, derefs: 0, match_call: Box::new(|| MatchStatus::Aggregation) },
                Candidate { node: g, derefs: 0, match_call: Box::new(|| MatchStatus::Aggregation) },
            ],
        );
        assert!(result.notice.is_some());
        assert_eq!(
            result.notice.unwrap().code,
            crate::notice::NoticeCode::MultipleCalleeMatch
        );
    }
}

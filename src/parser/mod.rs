//! The Parser State Machine (§4.D): multi-branch speculative parsing over a live
//! [`crate::grammar::GrammarGraph`], producing an [`crate::ast::AstNode`] tree.
//!
//! Grounded on the teacher's `DefaultParser`/`LexerlessParser` push-driven step loop
//! (`src/parsing.rs`), generalized from a fixed combinator tree walked by closures to
//! an explicit level stack walked over a runtime [`crate::grammar::Term`] graph, per the
//! §9 design note.

pub mod error_sync;
pub mod handler;

use crate::ast::{AstNode, ContainerKind, NodeKind, NodeRef};
use crate::error::ParseError;
use crate::grammar::term::MultiplyFlags;
use crate::grammar::{GrammarGraph, Reference, SymbolDefinition, Term, TraversalContext};
use crate::ids::TypeId;
use crate::lexer::Token;
use crate::notice::{Notice, NoticeCode, NoticeStore, Severity};
use crate::{Log, StepLogger};
use error_sync::Recovery;
use handler::{GenericParsingHandler, HandlerContext, ParsingHandler};
use std::rc::Rc;

/// Bound on non-consuming lookahead depth while deciding between `Alternate` branches
/// or a `Multiply`'s repeat-vs-exit choice (§4.D calls this "bounded" without fixing a
/// number; this constant is the Open Question resolution recorded in `DESIGN.md`).
pub const MAX_LOOKAHEAD_DEPTH: usize = 64;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefStage {
    Pending,
    Descended,
}

/// A term level's `posId` (§4.D); meaning depends on which [`Term`] variant it tracks.
/// Token/const/char-group leaves carry no further stage: `advance_one` consumes and
/// pops them in one step the moment `classify` reports them ready (§4.D step 3).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PosId {
    ConcatIndex(usize),
    MultiplyCount(usize),
    AlternateChoice(Option<usize>),
    RefStage(RefStage),
    TokenStage,
}

/// One entry of a [`ParserState`]'s level stack.
#[derive(Clone)]
pub enum Level {
    /// "Current module + definition being expanded" (§4.D).
    Production { module: TypeId, def: Rc<SymbolDefinition> },
    /// "Current term + `posId` within that term" (§4.D), plus the children bubbled up
    /// from this term's own sub-levels so far.
    Term {
        term: Rc<Term>,
        pos: PosId,
        children: Vec<NodeRef>,
    },
}

fn initial_level_for(term: Rc<Term>) -> Level {
    let pos = match term.as_ref() {
        Term::Concat(_) => PosId::ConcatIndex(0),
        Term::Multiply(..) => PosId::MultiplyCount(0),
        Term::Alternate(..) => PosId::AlternateChoice(None),
        Term::Reference(_) => PosId::RefStage(RefStage::Pending),
        Term::TokenTerm(..) | Term::ConstTerm(_) | Term::CharGroupTerm(_) => {
            PosId::TokenStage
        }
    };
    Level::Term { term, pos, children: Vec::new() }
}

/// A cursor through the grammar: a stack of production/term levels, the error-sync
/// markers recorded while descending (§4.D: "positions where recovery may skip to
/// matching block-end"), and, once every level has popped, the finished root node.
#[derive(Clone)]
pub struct ParserState {
    pub levels: Vec<Level>,
    pub sync_marks: Vec<usize>,
    pub finished: Option<NodeRef>,
}

impl ParserState {
    fn current_module(&self) -> TypeId {
        self.levels
            .iter()
            .rev()
            .find_map(|l| match l {
                Level::Production { module, .. } => Some(*module),
                _ => None,
            })
            .expect("a live parser state always has at least one production level")
    }

    /// A cheap, approximate signature of "where this state is and what it has built so
    /// far", used for the duplicate-fate elimination step (§4.D step 6: "if two active
    /// states reach the identical grammar cursor with identical accumulated data
    /// shapes, one is discarded").
    fn fate_signature(&self) -> Vec<(TypeId, usize)> {
        self.levels
            .iter()
            .map(|l| match l {
                Level::Production { def, .. } => (def.id, 0),
                Level::Term { children, .. } => (TypeId::of("__term__"), children.len()),
            })
            .collect()
    }
}

/// What a non-consuming descent through a [`ParserState`] stopped at (§4.D step 2).
enum Stopped {
    Done,
    Stuck,
    ReadyForToken { expected_id: TypeId, expected_text: Option<String> },
    AlternateBranch { alts: Vec<Rc<Term>>, filter: Option<crate::grammar::term::AlternateFilter> },
    MultiplyDecision { inner: Rc<Term>, multiplicity: crate::grammar::term::Multiplicity, count: usize },
}

type HandlerLookup<'a> = &'a dyn Fn(&SymbolDefinition) -> Rc<dyn ParsingHandler>;

/// Drives `state` downward through non-consuming constructs (`Concat`/`Reference`)
/// until it reaches something that needs a token (`TokenTerm`/`ConstTerm`) or a branch
/// decision (`Alternate`/`Multiply`). Mutates `state` in place as it descends.
fn classify(state: &mut ParserState, grammar: &GrammarGraph, handlers: HandlerLookup) -> Stopped {
    loop {
        if state.finished.is_some() {
            return Stopped::Done;
        }
        let Some(top) = state.levels.last().cloned() else {
            return Stopped::Done;
        };
        let Level::Term { term, pos, .. } = top else {
            // A bare Production with no term pushed never happens: the Reference arm
            // below always immediately pushes that production's start term right
            // alongside it.
            return Stopped::Stuck;
        };
        match (term.as_ref(), &pos) {
            (Term::Concat(parts), PosId::ConcatIndex(i)) => {
                if *i >= parts.len() {
                    finish_term_level(state, grammar, handlers);
                } else {
                    let next = parts[*i].clone();
                    state.levels.push(initial_level_for(next));
                }
            }
            (Term::Reference(reference), PosId::RefStage(RefStage::Pending)) => {
                match resolve_symbol(grammar, reference, state.current_module()) {
                    Some(def) => {
                        set_top_pos(state, PosId::RefStage(RefStage::Descended));
                        let module = state.current_module();
                        let start_term = Rc::new(def.term.borrow().clone());
                        state.levels.push(Level::Production { module, def });
                        state.levels.push(initial_level_for(start_term));
                    }
                    None => return Stopped::Stuck,
                }
            }
            (Term::Reference(_), PosId::RefStage(RefStage::Descended)) => {
                // The descended production's own levels haven't finished yet; nothing
                // to do here until they bubble their result into this level.
                return Stopped::Stuck;
            }
            (Term::Multiply(inner, multiplicity, _), PosId::MultiplyCount(count)) => {
                return Stopped::MultiplyDecision {
                    inner: inner.clone(),
                    multiplicity: *multiplicity,
                    count: *count,
                };
            }
            (Term::Alternate(alts, filter), PosId::AlternateChoice(None)) => {
                return Stopped::AlternateBranch { alts: alts.clone(), filter: filter.clone() };
            }
            (Term::Alternate(_, _), PosId::AlternateChoice(Some(_))) => {
                return Stopped::Stuck;
            }
            (Term::TokenTerm(reference, text), PosId::TokenStage) => {
                let id = resolve_token_id(grammar, reference);
                return Stopped::ReadyForToken { expected_id: id, expected_text: text.clone() };
            }
            (Term::ConstTerm(text), PosId::TokenStage) => {
                return Stopped::ReadyForToken {
                    expected_id: TypeId::of("__const_token__"),
                    expected_text: Some(text.clone()),
                };
            }
            (Term::CharGroupTerm(_), _) => {
                // Char groups are a lexer-only leaf; a production's own term tree never
                // references one directly (only a token definition's term tree does,
                // and the lexer consumes whole tokens before the parser sees them).
                return Stopped::Stuck;
            }
            _ => return Stopped::Stuck,
        }
    }
}

fn set_top_pos(state: &mut ParserState, new_pos: PosId) {
    if let Some(Level::Term { pos, .. }) = state.levels.last_mut() {
        *pos = new_pos;
    }
}

fn resolve_symbol(grammar: &GrammarGraph, reference: &Reference, current_module: TypeId) -> Option<Rc<SymbolDefinition>> {
    let ctx = TraversalContext::new(current_module);
    match grammar.resolve(reference, &ctx)? {
        crate::grammar::ResolvedTarget::Symbol(def) => Some(def),
        _ => None,
    }
}

fn resolve_token_id(grammar: &GrammarGraph, reference: &Reference) -> TypeId {
    let ctx = TraversalContext::new(grammar.root_module_id());
    match grammar.resolve(reference, &ctx) {
        Some(crate::grammar::ResolvedTarget::Symbol(def)) => def.id,
        _ => reference.path.last().map(|s| TypeId::of(s)).unwrap_or_else(|| TypeId::of("")),
    }
}

/// Pops a completed term level, reshaping its accumulated children the way §4.D
/// describes for each term kind (`Concat` flattens, `Multiply` wraps one `List` node,
/// `Alternate` wraps one `Route` node, everything else passes its single child
/// through), then hands the result up to whatever is now on top.
fn finish_term_level(state: &mut ParserState, grammar: &GrammarGraph, handlers: HandlerLookup) {
    let Some(Level::Term { term, pos, children }) = state.levels.pop() else {
        return;
    };
    let produced = match term.as_ref() {
        Term::Concat(_) | Term::Reference(_) => children,
        Term::Multiply(_, multiplicity, flags) => {
            if multiplicity.is_trivial() || flags.contains(MultiplyFlags::PASS_ITEMS_UP) {
                children
            } else {
                let node = AstNode::new(
                    NodeKind::Container { kind: ContainerKind::List, children: crate::ast::SharedList::new(), keys: Vec::new() },
                    TypeId::of("__list__"),
                    None,
                );
                for child in children {
                    AstNode::adopt(&node, child);
                }
                vec![node]
            }
        }
        Term::Alternate(..) => {
            let route_index = match pos {
                PosId::AlternateChoice(Some(i)) => i,
                _ => 0,
            };
            vec![AstNode::new(NodeKind::Route { route_index, data: children }, TypeId::of("__route__"), None)]
        }
        Term::TokenTerm(..) | Term::ConstTerm(_) | Term::CharGroupTerm(_) => children,
    };
    hand_up(state, grammar, produced, handlers);
}

/// What a [`hand_up`] delivery should do once the new top of the stack is known.
enum HandAction {
    Stay,
    Finish,
    PopProduction,
    Root,
}

/// Delivers `produced` nodes to whatever is now on top of the stack: a term level's
/// `children` accumulator (advancing a `Concat`'s index, or immediately re-finishing an
/// `Alternate`/`Reference` level that only ever has one child), a production level
/// (invoking its handler's `on_prod_end` and recursing the result further up), or — if
/// the stack is empty — the state's `finished` root.
fn hand_up(state: &mut ParserState, grammar: &GrammarGraph, produced: Vec<NodeRef>, handlers: HandlerLookup) {
    let action = match state.levels.last_mut() {
        Some(Level::Term { term, pos, children }) => match (term.as_ref(), pos.clone()) {
            (Term::Concat(parts), PosId::ConcatIndex(i)) => {
                children.extend(produced.clone());
                let next = i + 1;
                *pos = PosId::ConcatIndex(next);
                if next >= parts.len() { HandAction::Finish } else { HandAction::Stay }
            }
            (Term::Alternate(..), PosId::AlternateChoice(Some(_))) => {
                children.extend(produced.clone());
                HandAction::Finish
            }
            (Term::Reference(_), PosId::RefStage(RefStage::Descended)) => {
                children.extend(produced.clone());
                HandAction::Finish
            }
            // A `Multiply` level keeps its accumulated children but only finishes once
            // `advance_one`'s repeat-vs-exit decision says to stop (§4.D step 4).
            _ => {
                children.extend(produced.clone());
                HandAction::Stay
            }
        },
        Some(Level::Production { .. }) => HandAction::PopProduction,
        None => HandAction::Root,
    };

    match action {
        HandAction::Stay => {}
        HandAction::Finish => finish_term_level(state, grammar, handlers),
        HandAction::PopProduction => {
            let Some(Level::Production { module, def }) = state.levels.pop() else {
                unreachable!()
            };
            let handler = handlers(&def);
            let ctx = HandlerContext { prod_id: def.id, module, children: produced, loc: None };
            let node = handler.on_prod_end(&ctx);
            hand_up(state, grammar, vec![node], handlers);
        }
        HandAction::Root => {
            state.finished = produced.into_iter().next();
        }
    }
}

fn consume_token_leaf(state: &mut ParserState, token: &Token, grammar: &GrammarGraph, handlers: HandlerLookup) {
    // Consuming a token the grammar declared as an error-sync block opener (§4.D) marks
    // the level stack just below it as a resume point: if a later token kills this
    // branch, recovery can skip forward to the matching closer and pick back up here
    // rather than abandoning the whole parse.
    if grammar.error_sync_block_pairs.borrow().iter().any(|(open, _)| *open == token.id) {
        state.sync_marks.push(state.levels.len().saturating_sub(1));
    }
    state.levels.pop();
    let node = AstNode::new(NodeKind::Terminal(token.text.clone()), token.id, Some(token.loc.clone()));
    hand_up(state, grammar, vec![node], handlers);
}

/// Recursive fan-out: attempts to advance one candidate state past its next
/// non-consuming constructs and have it consume `token`, branching into multiple
/// resulting states at an `Alternate`, per §4.D steps 2-4.
fn advance_one(mut state: ParserState, token: &Token, grammar: &GrammarGraph, handlers: HandlerLookup, depth: usize) -> Vec<ParserState> {
    if depth > MAX_LOOKAHEAD_DEPTH {
        return Vec::new();
    }
    match classify(&mut state, grammar, handlers) {
        Stopped::Done | Stopped::Stuck => Vec::new(),
        Stopped::ReadyForToken { expected_id, expected_text } => {
            let text_ok = expected_text.as_deref().map(|t| t == &*token.text).unwrap_or(true);
            if expected_id == token.id && text_ok {
                consume_token_leaf(&mut state, token, grammar, handlers);
                vec![state]
            } else {
                Vec::new()
            }
        }
        Stopped::AlternateBranch { alts, filter } => {
            let mut out = Vec::new();
            for (i, alt) in alts.iter().enumerate() {
                if let Some(f) = &filter {
                    if !f(i) {
                        continue;
                    }
                }
                let mut candidate = state.clone();
                set_top_pos(&mut candidate, PosId::AlternateChoice(Some(i)));
                candidate.levels.push(initial_level_for(alt.clone()));
                out.extend(advance_one(candidate, token, grammar, handlers, depth + 1));
            }
            out
        }
        Stopped::MultiplyDecision { inner, multiplicity, count } => {
            // Repeat is tried first and, if it can consume the token, wins outright
            // (§4.D step 4: "repeat-or-continue preferred when both succeed"); only
            // when repeat fails entirely do we fall back to exiting the Multiply.
            let mut out = Vec::new();
            if multiplicity.accepts_more(count) {
                let mut repeat = state.clone();
                set_top_pos(&mut repeat, PosId::MultiplyCount(count + 1));
                repeat.levels.push(initial_level_for(inner));
                out = advance_one(repeat, token, grammar, handlers, depth + 1);
            }
            if out.is_empty() && multiplicity.is_satisfied(count) {
                let mut exit = state.clone();
                finish_term_level(&mut exit, grammar, handlers);
                out = advance_one(exit, token, grammar, handlers, depth + 1);
            }
            out
        }
    }
}

/// Removes later duplicates whose [`ParserState::fate_signature`] matches an earlier
/// one (§4.D step 6), keeping the first (leftmost/first-listed) occurrence per the §8
/// tie-break rule.
fn eliminate_duplicate_fates(states: Vec<ParserState>) -> Vec<ParserState> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for state in states {
        if seen.insert(state.fate_signature()) {
            out.push(state);
        }
    }
    out
}

/// The parser itself: owns the active-state set and drives it token by token.
pub struct Parser<'a> {
    grammar: &'a GrammarGraph,
    pub notices: NoticeStore,
    active: Vec<ParserState>,
    recovery: Option<Recovery>,
    raised_unexpected_token: bool,
    handler_default: Rc<dyn ParsingHandler>,
    debugger: Log<&'static str>,
}

impl<'a> Parser<'a> {
    pub fn new(grammar: &'a GrammarGraph) -> Self {
        Parser {
            grammar,
            notices: NoticeStore::new(),
            active: Vec::new(),
            recovery: None,
            raised_unexpected_token: false,
            handler_default: Rc::new(GenericParsingHandler),
            debugger: Log::None,
        }
    }

    /// Turns on step tracing for `begin_parsing`/`feed`/`end_parsing` (§0 ambient
    /// logging), mirroring the teacher's `ProductionLogger`-driven `Log` switch.
    pub fn with_debug(mut self, level: Log<&'static str>) -> Self {
        self.debugger = level;
        self
    }

    fn handler_for(&self, def: &SymbolDefinition) -> Rc<dyn ParsingHandler> {
        def.handler.borrow().clone().unwrap_or_else(|| self.handler_default.clone())
    }

    /// Pushes the start production named by `start` (§4.D: "`beginParsing` pushes the
    /// start production"). Fails only when `start` itself does not resolve to a
    /// production — a parse that cannot even begin (§7).
    pub fn begin_parsing(&mut self, start: &Reference) -> Result<(), ParseError> {
        self.log_entry("begin_parsing");
        let ctx = TraversalContext::new(self.grammar.root_module_id());
        let Some(crate::grammar::ResolvedTarget::Symbol(def)) = self.grammar.resolve(start, &ctx) else {
            let err = ParseError::new(0, format!("start reference {start:?} does not resolve to a production"));
            self.log_result("begin_parsing", &err.to_string());
            return Err(err);
        };
        let module = self.grammar.root_module_id();
        let term = Rc::new(def.term.borrow().clone());
        self.active.push(ParserState {
            levels: vec![Level::Production { module, def }, initial_level_for(term)],
            sync_marks: Vec::new(),
            finished: None,
        });
        Ok(())
    }

    /// Feeds one token through the multi-branch protocol (§4.D steps 1-6), or through
    /// error-sync recovery if a prior token left no active states.
    pub fn feed(&mut self, token: &Token) {
        self.log_entry("feed");
        if let Some(recovery) = self.recovery.as_mut() {
            if let Some(resumed) = recovery.skip(token.id) {
                self.active = vec![resumed];
                self.recovery = None;
            }
            return;
        }

        if self.active.is_empty() {
            self.report_unexpected(token);
            return;
        }

        let handlers_by_def = |def: &SymbolDefinition| self.handler_for(def);
        let previous = self.active.clone();
        let mut survivors = Vec::new();
        for state in previous.iter().cloned() {
            survivors.extend(advance_one(state, token, self.grammar, &handlers_by_def, 0));
        }

        if survivors.is_empty() {
            // Every branch tried against this token died: whatever either of them
            // raised into `pending` along the way belongs to a dropped state (§4.H).
            self.notices.discard_pending();
            if let Some(recovery) = previous.iter().find_map(|s| Recovery::start(s, self.grammar)) {
                self.recovery = Some(recovery);
                self.active = Vec::new();
                return;
            }
            self.report_unexpected(token);
            self.active = Vec::new();
            return;
        }

        // At least one branch survived this token: the round as a whole is a winner
        // (§4.D step 6, `eliminate_duplicate_fates`), so anything queued as pending
        // while exploring it is committed.
        self.active = eliminate_duplicate_fates(survivors);
        self.notices.promote_pending();
        self.log_success("feed", &format!("{} active state(s)", self.active.len()));
    }

    fn report_unexpected(&mut self, token: &Token) {
        if !self.raised_unexpected_token {
            self.notices.report_pending(Notice::new(
                NoticeCode::UnexpectedToken,
                Severity::Error,
                format!("unexpected token {:?}", token.text),
                token.loc.clone(),
            ));
            self.notices.promote_pending();
            self.raised_unexpected_token = true;
        }
    }

    /// `endParsing` (§4.D "Completion"): finishes every `Multiply` level that has
    /// already met its minimum repeat count (trailing optional/star repeats need no
    /// further tokens), cascading the ordinary bubble-up rules the rest of the way to
    /// the root. Anything still needing a token when EOF hits is an unclosed construct.
    pub fn end_parsing(&mut self) -> Option<NodeRef> {
        self.log_entry("end_parsing");
        let handler_default = self.handler_default.clone();
        let handlers_by_def =
            move |def: &SymbolDefinition| def.handler.borrow().clone().unwrap_or_else(|| handler_default.clone());
        let mut remaining = std::mem::take(&mut self.active).into_iter();
        let Some(mut state) = remaining.next() else {
            return None;
        };
        // §8's first-listed tie-break: the first remaining state is adopted as the
        // winner of the final foldout, so any other states still active at EOF are
        // dropped here and never get a chance to promote their own pending notices.
        if remaining.next().is_some() {
            self.notices.discard_pending();
        }
        loop {
            match classify(&mut state, self.grammar, &handlers_by_def) {
                Stopped::Done => {
                    self.notices.promote_pending();
                    break;
                }
                Stopped::MultiplyDecision { multiplicity, count, .. } if multiplicity.is_satisfied(count) => {
                    finish_term_level(&mut state, self.grammar, &handlers_by_def);
                }
                _ => {
                    self.notices.report_pending(Notice::new(
                        NoticeCode::UnclosedBlock,
                        Severity::Error,
                        "input ended with an unfinished construct",
                        crate::position::SourceLocation::new("<eof>", crate::position::Position::new(0, 0)),
                    ));
                    self.notices.promote_pending();
                    break;
                }
            }
        }
        state.finished
    }
}

impl<'a> StepLogger for Parser<'a> {
    fn debugger(&self) -> &Log<&'static str> {
        &self.debugger
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammar::term::{Multiplicity, MultiplyFlags};
    use crate::grammar::{DefinitionFlags, Factory};
    use crate::value::Containing;

    /// `expr -> "a" "+" "a"`: the smallest possible single-path grammar, enough to
    /// exercise `begin_parsing`/`feed`/`end_parsing` end to end.
    fn tiny_grammar() -> Factory {
        let factory = Factory::new("root");
        let root = factory.graph().root_module();
        factory.define_token(&root, "a_tok", Term::ConstTerm("a".into()), DefinitionFlags { root_token: true, ..Default::default() }).unwrap();
        factory.define_token(&root, "plus_tok", Term::ConstTerm("+".into()), DefinitionFlags { root_token: true, ..Default::default() }).unwrap();
        factory.define_production(
            &root,
            "expr",
            Term::Concat(vec![
                Rc::new(Term::TokenTerm(Reference::root(&["a_tok"]), None)),
                Rc::new(Term::TokenTerm(Reference::root(&["plus_tok"]), None)),
                Rc::new(Term::TokenTerm(Reference::root(&["a_tok"]), None)),
            ]),
            None,
        ).unwrap();
        factory.set_start(&root, Reference::root(&["expr"])).unwrap();
        factory
    }

    fn tok(id: TypeId, text: &str) -> Token {
        Token {
            id,
            text: text.into(),
            loc: crate::position::SourceLocation::new("t.src", crate::position::Position::new(1, 1)),
        }
    }

    #[test]
    fn parses_a_fixed_three_token_sequence() {
        let factory = tiny_grammar();
        let start = factory.graph().root_module().start().unwrap();
        let mut parser = Parser::new(factory.graph());
        parser.begin_parsing(&start).expect("start production resolves");

        parser.feed(&tok(TypeId::of("a_tok"), "a"));
        parser.feed(&tok(TypeId::of("plus_tok"), "+"));
        parser.feed(&tok(TypeId::of("a_tok"), "a"));

        let ast = parser.end_parsing();
        let ast = ast.expect("a complete sequence should produce a root node");
        assert_eq!(ast.borrow().child_count(), 3);
    }

    #[test]
    fn unexpected_token_with_no_active_states_is_reported_once() {
        let factory = tiny_grammar();
        let start = factory.graph().root_module().start().unwrap();
        let mut parser = Parser::new(factory.graph());
        parser.begin_parsing(&start).expect("start production resolves");

        parser.feed(&tok(TypeId::of("plus_tok"), "+"));
        parser.feed(&tok(TypeId::of("plus_tok"), "+"));
        assert_eq!(parser.notices.approved().iter().filter(|n| n.code == NoticeCode::UnexpectedToken).count(), 1);
    }

    #[test]
    fn multiplicity_helpers_used_by_the_repeat_decision() {
        assert!(Multiplicity::star().accepts_more(0));
        assert!(Multiplicity::star().is_satisfied(0));
        assert!(!Multiplicity::plus().is_satisfied(0));
        let _ = MultiplyFlags::empty();
    }
}

//! The Lexer (§4.C): longest-match tokenization over the Grammar Graph's root token
//! definitions, generalized from the teacher's fixed `Vec<Rc<dyn ILexeme>>` scan loop
//! (`lexeme::mod.rs`'s `Tokenizer`) to a loop over live [`SymbolDefinition`]s a host
//! program may still be editing.

use crate::grammar::{CharGroupUnit, GrammarGraph, Reference, SymbolDefinition, Term};
use crate::ids::TypeId;
use crate::notice::{Notice, NoticeCode, NoticeStore, Severity};
use crate::position::{Position, SourceLocation};
use crate::{Log, StepLogger};
use std::rc::Rc;

/// One lexed token: an id, its matched text, and its source location (§3).
#[derive(Debug, Clone)]
pub struct Token {
    pub id: TypeId,
    pub text: Rc<str>,
    pub loc: SourceLocation,
}

/// Scans `code` against `grammar`'s root token definitions, producing a token stream.
pub struct Lexer<'a> {
    grammar: &'a GrammarGraph,
    file: Rc<str>,
    debugger: Log<&'static str>,
}

impl<'a> Lexer<'a> {
    pub fn new(grammar: &'a GrammarGraph, file: impl Into<Rc<str>>) -> Self {
        Lexer { grammar, file: file.into(), debugger: Log::None }
    }

    /// Turns on step tracing for this lexer's own `tokenize` loop (§0 ambient logging).
    pub fn with_debug(mut self, level: Log<&'static str>) -> Self {
        self.debugger = level;
        self
    }

    /// Tokenizes the whole input, dropping ignored tokens (§4.C) and recording an
    /// `UnrecognizedChar` notice (then skipping one `char`) at any position nothing
    /// matches.
    pub fn tokenize(&self, code: &str, notices: &NoticeStore) -> Vec<Token> {
        let chars: Vec<char> = code.chars().collect();
        let mut tokens = Vec::new();
        let mut byte_pos = 0usize;
        let mut char_pos = 0usize;

        self.log_entry("tokenize");
        while char_pos < chars.len() {
            match self.longest_match(&chars, char_pos) {
                Some((def, len)) => {
                    let text: String = chars[char_pos..char_pos + len].iter().collect();
                    self.log_success("tokenize", &format!("{:?} {text:?} at {byte_pos}", def.id));
                    if !def.flags.ignored_token {
                        tokens.push(Token {
                            id: def.id,
                            text: text.as_str().into(),
                            loc: SourceLocation::new(self.file.clone(), Position::at(code, byte_pos)),
                        });
                    }
                    byte_pos += text.len();
                    char_pos += len.max(1);
                }
                None => {
                    self.log_result("tokenize", &format!("unrecognized char {:?} at {byte_pos}", chars[char_pos]));
                    notices.report(Notice::new(
                        NoticeCode::UnrecognizedChar,
                        Severity::Error,
                        format!("unrecognized character {:?}", chars[char_pos]),
                        SourceLocation::new(self.file.clone(), Position::at(code, byte_pos)),
                    ));
                    byte_pos += chars[char_pos].len_utf8();
                    char_pos += 1;
                }
            }
        }
        tokens
    }

    /// Attempts every root token at `start`, returning the definition and match length
    /// (in `char`s) of the **longest** match, unless the winning definition carries
    /// `PREFER_SHORTER` — used for multi-line comments so `*/` still terminates
    /// greedily while the comment body itself prefers the shortest enclosing match when
    /// more than one length is possible (§4.C).
    fn longest_match(&self, chars: &[char], start: usize) -> Option<(Rc<SymbolDefinition>, usize)> {
        let mut best: Option<(Rc<SymbolDefinition>, usize)> = None;
        for def in self.grammar.root_tokens() {
            let Some(len) = self.match_term(&def.term.borrow(), chars, start) else { continue };
            best = Some(match best {
                None => (def, len),
                Some((best_def, best_len)) => {
                    if def.flags.prefer_shorter {
                        if len < best_len || !best_def.flags.prefer_shorter {
                            (def, len)
                        } else {
                            (best_def, best_len)
                        }
                    } else if len > best_len {
                        (def, len)
                    } else {
                        (best_def, best_len)
                    }
                }
            });
        }
        best
    }

    /// Greedy term matcher: returns the number of `char`s consumed from `start`, or
    /// `None` if `term` does not match at all at this position. Token term trees are
    /// matched deterministically (no backtracking) — ambiguity inside a single token's
    /// own grammar is a grammar-authoring bug the parser's speculative engine does not
    /// need to cover, since §4.C treats the lexer as a flat longest-match race between
    /// whole token definitions, not between interpretations of one definition.
    fn match_term(&self, term: &Term, chars: &[char], pos: usize) -> Option<usize> {
        match term {
            Term::ConstTerm(text) => {
                let text_chars: Vec<char> = text.chars().collect();
                if pos + text_chars.len() <= chars.len()
                    && chars[pos..pos + text_chars.len()] == text_chars[..]
                {
                    Some(text_chars.len())
                } else {
                    None
                }
            }
            Term::CharGroupTerm(reference) => {
                let id = self.resolve_self_ref(reference);
                let c = *chars.get(pos)?;
                self.grammar.char_group_matches(id, c).then_some(1)
            }
            Term::Concat(children) => {
                let mut total = 0usize;
                for child in children {
                    total += self.match_term(child, chars, pos + total)?;
                }
                Some(total)
            }
            Term::Alternate(children, filter) => children
                .iter()
                .enumerate()
                .filter(|(i, _)| filter.as_ref().map(|f| f(*i)).unwrap_or(true))
                .filter_map(|(_, child)| self.match_term(child, chars, pos))
                .max(),
            Term::Multiply(inner, multiplicity, _) => {
                let mut total = 0usize;
                let mut count = 0usize;
                while multiplicity.accepts_more(count) {
                    match self.match_term(inner, chars, pos + total) {
                        Some(0) => break,
                        Some(len) => {
                            total += len;
                            count += 1;
                        }
                        None => break,
                    }
                }
                multiplicity.is_satisfied(count).then_some(total)
            }
            Term::Reference(reference) | Term::TokenTerm(reference, _) => {
                let id = self.resolve_self_ref(reference);
                let def = self.grammar.lookup_in(self.grammar.root_module_id(), id)?;
                let term = def.term.borrow().clone();
                self.match_term(&term, chars, pos)
            }
        }
    }

    /// A token's own term tree only ever references sibling definitions by bare name
    /// (`self.foo`/an unqualified name), never by module path, so this resolves just
    /// the name segment of `reference` against `TypeId` identity rather than running
    /// the full [`crate::grammar::GrammarGraph::resolve`] traversal.
    fn resolve_self_ref(&self, reference: &Reference) -> TypeId {
        reference
            .path
            .last()
            .map(|s| TypeId::of(s))
            .unwrap_or_else(|| TypeId::of(""))
    }
}

impl<'a> StepLogger for Lexer<'a> {
    fn debugger(&self) -> &Log<&'static str> {
        &self.debugger
    }
}

impl CharGroupUnit {
    /// A convenience entry point mirrored on the unit itself for callers that already
    /// hold a resolved [`CharGroupUnit`] rather than its definition id.
    pub fn matches_char(&self, c: char) -> bool {
        self.matches(c)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammar::{DefinitionFlags, Factory, RefRoot};

    fn digits_grammar() -> Factory {
        let factory = Factory::new("root");
        let root = factory.graph().root_module();
        factory.define_char_group(
            &root,
            "digit",
            CharGroupUnit::Sequence('0', '9'),
        ).unwrap();
        factory.define_token(
            &root,
            "int_tok",
            Term::Multiply(
                Rc::new(Term::CharGroupTerm(Reference::new(RefRoot::SelfRef, vec!["digit".into()]))),
                crate::grammar::term::Multiplicity::plus(),
                crate::grammar::term::MultiplyFlags::empty(),
            ),
            DefinitionFlags { root_token: true, ..Default::default() },
        ).unwrap();
        factory
    }

    #[test]
    fn longest_match_picks_the_whole_number() {
        let factory = digits_grammar();
        let lexer = Lexer::new(factory.graph(), "test.src");
        let store = NoticeStore::new();
        let tokens = lexer.tokenize("123", &store);
        assert_eq!(tokens.len(), 1);
        assert_eq!(&*tokens[0].text, "123");
    }

    #[test]
    fn unrecognized_char_is_reported_and_skipped() {
        let factory = digits_grammar();
        let lexer = Lexer::new(factory.graph(), "test.src");
        let store = NoticeStore::new();
        let tokens = lexer.tokenize("1#2", &store);
        assert_eq!(tokens.len(), 2);
        assert!(store.approved().iter().any(|n| n.code == NoticeCode::UnrecognizedChar));
    }
}

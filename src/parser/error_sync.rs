//! Error-sync recovery (§4.D): when no active parser state can consume a token, skip
//! forward past a grammar-declared block-close token rather than abandoning the whole
//! parse, resuming at the innermost bracket the dying state was still inside.

use super::ParserState;
use crate::grammar::GrammarGraph;
use crate::ids::TypeId;

/// In-progress recovery: tracks nested open/close depth while skipping tokens, resuming
/// ordinary parsing once the matching close token is seen at depth zero.
pub struct Recovery {
    resume: ParserState,
    open: TypeId,
    close: TypeId,
    depth: usize,
}

impl Recovery {
    /// Looks for the innermost sync mark a now-dead `failing` state had reached and, if
    /// the grammar declares an error-sync pair for it, starts tracking nesting depth
    /// from there. Falls back to the grammar's first declared pair with no mark when
    /// the failure happened before any bracket was opened, so a parse with exactly one
    /// error-sync pair (the common case, per §6) still recovers at the top level.
    pub fn start(failing: &ParserState, grammar: &GrammarGraph) -> Option<Recovery> {
        let pairs = grammar.error_sync_block_pairs.borrow();
        let (open, close) = pairs.first().copied()?;
        let resume = match failing.sync_marks.last() {
            Some(&mark) if mark < failing.levels.len() => ParserState {
                levels: failing.levels[..=mark].to_vec(),
                sync_marks: failing.sync_marks[..failing.sync_marks.len() - 1].to_vec(),
                finished: None,
            },
            _ => failing.clone(),
        };
        Some(Recovery { resume, open, close, depth: 0 })
    }

    /// Feeds one token while skipping. Returns the truncated resume state once the
    /// matching close token is consumed at depth zero.
    pub fn skip(&mut self, token_id: TypeId) -> Option<ParserState> {
        if token_id == self.open {
            self.depth += 1;
            None
        } else if token_id == self.close {
            if self.depth == 0 {
                Some(self.resume.clone())
            } else {
                self.depth -= 1;
                None
            }
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{Level, PosId};
    use std::rc::Rc;

    fn dummy_state() -> ParserState {
        ParserState {
            levels: vec![Level::Term {
                term: Rc::new(crate::grammar::Term::Concat(vec![])),
                pos: PosId::ConcatIndex(0),
                children: vec![],
            }],
            sync_marks: vec![],
            finished: None,
        }
    }

    #[test]
    fn skip_tracks_nesting_and_resumes_at_matching_close() {
        let grammar = GrammarGraph::new("root");
        grammar.error_sync_block_pairs.borrow_mut().push((TypeId::of("lbrace"), TypeId::of("rbrace")));
        let mut recovery = Recovery::start(&dummy_state(), &grammar).unwrap();

        assert!(recovery.skip(TypeId::of("lbrace")).is_none());
        assert!(recovery.skip(TypeId::of("x")).is_none());
        assert!(recovery.skip(TypeId::of("rbrace")).is_none());
        assert!(recovery.skip(TypeId::of("rbrace")).is_some());
    }

    #[test]
    fn no_declared_pairs_means_no_recovery() {
        let grammar = GrammarGraph::new("root");
        assert!(Recovery::start(&dummy_state(), &grammar).is_none());
    }
}

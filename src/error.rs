use std::fmt::{Display, Formatter};

/// A programmer error in how a [`crate::grammar::GrammarGraph`] was assembled — a
/// dangling [`crate::grammar::term::Reference`], an unreachable `start`, or similar.
///
/// Unlike [`crate::notice::Notice`], this never originates from user source; it is
/// raised only when the grammar itself, which is host-code input rather than parsed
/// input, is malformed.
#[derive(Debug, Clone)]
pub struct ImplementationError {
    what: String,
    message: String,
}

impl ImplementationError {
    pub fn new(what: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            what: what.into(),
            message: message.into(),
        }
    }
}

impl Display for ImplementationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "ImplementationError: {} - {}", self.what, self.message)
    }
}

impl std::error::Error for ImplementationError {}

/// A hard, non-recoverable failure to parse at all — raised only when a parse cannot
/// even begin (e.g. no active states at the very first token). Everyday syntax errors
/// are reported through the [`crate::notice::NoticeStore`] instead and never unwind.
#[derive(Debug, Clone)]
pub struct ParseError {
    pub pointer: usize,
    pub message: String,
}

impl ParseError {
    pub fn new(pointer: usize, message: impl Into<String>) -> Self {
        Self {
            pointer,
            message: message.into(),
        }
    }
}

impl Display for ParseError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "SyntaxError at {}: {}", self.pointer, self.message)
    }
}

impl std::error::Error for ParseError {}

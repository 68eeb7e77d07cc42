//! The Notice Store (§4.H): the diagnostic channel every other subsystem reports into
//! instead of unwinding. Grounded on the teacher's own error-as-value style
//! (`ProductionError`/`ParseError` returned, never thrown) generalized from a single
//! bubbled-up error to an accumulating, deduplicating log, since a speculative
//! multi-branch parser cannot know which errors will matter until a branch wins.

use crate::position::SourceLocation;
use std::collections::HashSet;

/// The five severities named in §4.H, ordered `Blocker < Error < Warning < Caution <
/// Attn` (`0..4`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Blocker,
    Error,
    Warning,
    Caution,
    Attn,
}

impl Severity {
    pub fn order(&self) -> u8 {
        match self {
            Severity::Blocker => 0,
            Severity::Error => 1,
            Severity::Warning => 2,
            Severity::Caution => 3,
            Severity::Attn => 4,
        }
    }
}

/// The diagnostic kinds enumerated in §7, grouped by the subsystem that raises them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NoticeCode {
    UnrecognizedChar,
    UnexpectedToken,
    UnclosedBlock,
    MislocatedModifier,
    UnknownSymbol,
    IdentifierIsNotType,
    InvalidType,
    InvalidUseStatement,
    ArgsMismatch,
    MultipleCalleeMatch,
    InvalidOperation,
    TemplateInstanceMismatch,
    InternalInvariant,
}

/// A single diagnostic (§3, §4.H).
#[derive(Debug, Clone)]
pub struct Notice {
    pub code: NoticeCode,
    pub severity: Severity,
    pub message: String,
    pub location: SourceLocation,
}

impl Notice {
    pub fn new(code: NoticeCode, severity: Severity, message: impl Into<String>, location: SourceLocation) -> Self {
        Notice { code, severity, message: message.into(), location }
    }
}

/// Translates a [`Severity`] and the "from" stack-frame prefix to localized words,
/// falling back to English when a word is missing (§1, §6: "a localization
/// dictionary... falls back to English keys when missing"). Concrete Latin/Arabic
/// keyword dictionaries are a non-goal; this is the pluggable seam a caller supplying
/// one would implement against.
pub trait Localizer {
    fn severity_word(&self, severity: Severity) -> Option<&str> {
        let _ = severity;
        None
    }
    fn from_prefix(&self) -> Option<&str> {
        None
    }
}

/// The built-in English fallback, used whenever a [`Localizer`] returns `None` or none
/// is supplied at all.
pub struct EnglishLocalizer;

impl Localizer for EnglishLocalizer {
    fn severity_word(&self, severity: Severity) -> Option<&str> {
        Some(match severity {
            Severity::Blocker => "BLOCKER",
            Severity::Error => "ERROR",
            Severity::Warning => "WARNING",
            Severity::Caution => "CAUTION",
            Severity::Attn => "ATTN",
        })
    }

    fn from_prefix(&self) -> Option<&str> {
        Some("from")
    }
}

fn resolve_word<'a>(localizer: &'a dyn Localizer, severity: Severity) -> String {
    localizer
        .severity_word(severity)
        .or_else(|| EnglishLocalizer.severity_word(severity))
        .unwrap_or("")
        .to_string()
}

fn resolve_from<'a>(localizer: &'a dyn Localizer) -> String {
    localizer
        .from_prefix()
        .or_else(|| EnglishLocalizer.from_prefix())
        .unwrap_or("from")
        .to_string()
}

/// Formats `notice` per §6: `«SEVERITY» «code» @ «file» («line»,«col»): «message»`, with
/// each deeper stack frame on its own line prefixed by the localized "from" word. ANSI
/// color codes are explicitly out of scope (§4: presentation-layer/CLI surface).
pub fn format_notice(notice: &Notice, localizer: &dyn Localizer) -> String {
    let severity_word = resolve_word(localizer, notice.severity);
    let frames = notice.location.frames();
    let mut out = String::new();
    if let Some((file, pos)) = frames.first() {
        out.push_str(&format!(
            "{} {:?} @ {} ({}): {}",
            severity_word, notice.code, file, pos, notice.message
        ));
    } else {
        out.push_str(&format!("{} {:?}: {}", severity_word, notice.code, notice.message));
    }
    let from_word = resolve_from(localizer);
    for (file, pos) in frames.iter().skip(1) {
        out.push('\n');
        out.push_str(&format!("  {from_word} {file} ({pos})"));
    }
    out
}

/// The pending/approved buffer described in §4.H.
///
/// Diagnostics raised while a speculative branch is still being tried go into
/// `pending`; the parser promotes a branch's pending notices to `approved` when that
/// branch wins a multi-branch decision, and discards them when the branch is dropped.
/// `approved` dedups by `(code, location)`.
pub struct NoticeStore {
    pending: std::cell::RefCell<Vec<Notice>>,
    approved: std::cell::RefCell<Vec<Notice>>,
    approved_keys: std::cell::RefCell<HashSet<(NoticeCode, SourceLocation)>>,
}

impl NoticeStore {
    pub fn new() -> Self {
        NoticeStore {
            pending: std::cell::RefCell::new(Vec::new()),
            approved: std::cell::RefCell::new(Vec::new()),
            approved_keys: std::cell::RefCell::new(HashSet::new()),
        }
    }

    /// Adds `notice` directly to the approved window, deduplicated by `(code,
    /// location)`. Used by call sites with no surrounding multi-branch speculation
    /// (the lexer, and any notice raised outside `testState`).
    pub fn report(&self, notice: Notice) {
        self.approve(notice);
    }

    /// Adds `notice` to the pending window, to be promoted or discarded when the
    /// enclosing speculative branch's fate is decided.
    pub fn report_pending(&self, notice: Notice) {
        self.pending.borrow_mut().push(notice);
    }

    /// Promotes every currently pending notice to approved (§4.H: "moves notices from
    /// pending to approved when the state that raised them is adopted as a winner").
    pub fn promote_pending(&self) {
        let drained: Vec<Notice> = self.pending.borrow_mut().drain(..).collect();
        for notice in drained {
            self.approve(notice);
        }
    }

    /// Discards every currently pending notice (§4.H: "discards pending notices tied to
    /// dropped states").
    pub fn discard_pending(&self) {
        self.pending.borrow_mut().clear();
    }

    fn approve(&self, notice: Notice) {
        let key = (notice.code, notice.location.clone());
        if self.approved_keys.borrow().contains(&key) {
            return;
        }
        self.approved_keys.borrow_mut().insert(key);
        self.approved.borrow_mut().push(notice);
    }

    pub fn approved(&self) -> std::cell::Ref<'_, Vec<Notice>> {
        self.approved.borrow()
    }

    pub fn has_blocking(&self) -> bool {
        self.approved.borrow().iter().any(|n| n.severity == Severity::Blocker)
    }
}

impl Default for NoticeStore {
    fn default() -> Self {
        NoticeStore::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::position::Position;

    fn loc(line: usize) -> SourceLocation {
        SourceLocation::new("a.src", Position::new(line, 1))
    }

    #[test]
    fn approved_window_dedups_by_code_and_location() {
        let store = NoticeStore::new();
        store.report(Notice::new(NoticeCode::UnrecognizedChar, Severity::Error, "bad char", loc(1)));
        store.report(Notice::new(NoticeCode::UnrecognizedChar, Severity::Error, "bad char again", loc(1)));
        assert_eq!(store.approved().len(), 1);
    }

    #[test]
    fn pending_promotes_on_win_and_clears_on_discard() {
        let store = NoticeStore::new();
        store.report_pending(Notice::new(NoticeCode::UnexpectedToken, Severity::Error, "oops", loc(2)));
        store.discard_pending();
        assert_eq!(store.approved().len(), 0);

        store.report_pending(Notice::new(NoticeCode::UnexpectedToken, Severity::Error, "oops", loc(2)));
        store.promote_pending();
        assert_eq!(store.approved().len(), 1);
    }

    #[test]
    fn format_falls_back_to_english() {
        struct Mute;
        impl Localizer for Mute {}
        let notice = Notice::new(NoticeCode::UnrecognizedChar, Severity::Blocker, "boom", loc(3));
        let formatted = format_notice(&notice, &Mute);
        assert!(formatted.starts_with("BLOCKER"));
    }
}

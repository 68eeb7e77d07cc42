//! Term and character-group sum types (§3, §4.B).
//!
//! Kept as plain Rust enums rather than a trait-object hierarchy, per the spec's §9
//! design note: the grammar is a *mutable* runtime graph a host program keeps editing,
//! which a tree of `Rc<dyn IProduction>` (the teacher's representation) cannot support
//! without rebuilding subtrees on every edit. An enum behind `RefCell` can be mutated
//! in place.

use super::Reference;
use std::rc::Rc;

/// A tiny hand-rolled bitflags macro so this crate does not reach for the `bitflags`
/// crate for a single two-option flag set; the teacher never pulls in `bitflags` either.
macro_rules! bitflags_lite {
    (
        $(#[$meta:meta])*
        pub struct $name:ident: $repr:ty {
            $($(#[$flag_meta:meta])* const $flag:ident = $value:expr;)*
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
        pub struct $name($repr);

        impl $name {
            $($(#[$flag_meta])* pub const $flag: $name = $name($value);)*

            pub const fn empty() -> Self {
                $name(0)
            }

            pub fn contains(&self, other: $name) -> bool {
                (self.0 & other.0) == other.0
            }

            pub fn insert(&mut self, other: $name) {
                self.0 |= other.0;
            }
        }

        impl std::ops::BitOr for $name {
            type Output = $name;
            fn bitor(self, rhs: $name) -> $name {
                $name(self.0 | rhs.0)
            }
        }
    };
}

/// A structural element of a production.
///
/// Recursive positions hold `Rc<Term>` rather than `Box<Term>`: the parser's active
/// states need a cheap handle to "the sub-term a branch is currently sitting at" that
/// survives cloning a state for multi-branch speculation (§4.D) without deep-copying
/// the whole subtree on every branch.
#[derive(Clone)]
pub enum Term {
    Concat(Vec<Rc<Term>>),
    Alternate(Vec<Rc<Term>>, Option<AlternateFilter>),
    Multiply(Rc<Term>, Multiplicity, MultiplyFlags),
    Reference(Reference),
    TokenTerm(Reference, Option<String>),
    ConstTerm(String),
    CharGroupTerm(Reference),
}

impl std::fmt::Debug for Term {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Term::Concat(terms) => f.debug_tuple("Concat").field(terms).finish(),
            Term::Alternate(terms, filter) => f
                .debug_tuple("Alternate")
                .field(terms)
                .field(&filter.as_ref().map(|_| "<filter fn>"))
                .finish(),
            Term::Multiply(term, mult, flags) => {
                f.debug_tuple("Multiply").field(term).field(mult).field(flags).finish()
            }
            Term::Reference(r) => f.debug_tuple("Reference").field(r).finish(),
            Term::TokenTerm(r, s) => f.debug_tuple("TokenTerm").field(r).field(s).finish(),
            Term::ConstTerm(s) => f.debug_tuple("ConstTerm").field(s).finish(),
            Term::CharGroupTerm(r) => f.debug_tuple("CharGroupTerm").field(r).finish(),
        }
    }
}

/// A user-supplied predicate narrowing which alternates of an [`Term::Alternate`] are
/// even considered, independent of the speculative lookahead the parser state machine
/// runs over the surviving candidates.
pub type AlternateFilter = Rc<dyn Fn(usize) -> bool>;

/// The `(min, max)` repetition bound of a [`Term::Multiply`]. `max: None` means
/// unbounded ("endless" in the spec's own vocabulary).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Multiplicity {
    pub min: usize,
    pub max: Option<usize>,
}

impl Multiplicity {
    pub const ONE: Multiplicity = Multiplicity {
        min: 1,
        max: Some(1),
    };

    pub fn star() -> Self {
        Multiplicity { min: 0, max: None }
    }

    pub fn plus() -> Self {
        Multiplicity { min: 1, max: None }
    }

    pub fn optional() -> Self {
        Multiplicity { min: 0, max: Some(1) }
    }

    /// §3 invariant: `Multiply` with `min == max == 1` is equivalent to its child.
    pub fn is_trivial(&self) -> bool {
        self.min == 1 && self.max == Some(1)
    }

    pub fn is_satisfied(&self, count: usize) -> bool {
        count >= self.min
    }

    pub fn accepts_more(&self, count: usize) -> bool {
        match self.max {
            Some(max) => count < max,
            None => true,
        }
    }
}

bitflags_lite! {
    /// Flags controlling how a finished [`Term::Multiply`] level hands its accumulated
    /// children up to its parent (§4.D: "the owning term level records it, or promotes
    /// it through `PASS_ITEMS_UP` so parents receive the children directly"). Unrelated
    /// to the repeat-vs-exit tie-break itself, which `advance_one`'s `MultiplyDecision`
    /// handling resolves on its own.
    pub struct MultiplyFlags: u8 {
        /// Skip wrapping the repeated children in a `Container{List}` node; hand them
        /// straight to the parent accumulator instead. A trivial multiplicity
        /// (`min == max == 1`) skips the wrap unconditionally regardless of this flag.
        const PASS_ITEMS_UP = 0b0000_0001;
    }
}

/// A unit of a character-group definition (§3).
#[derive(Debug, Clone)]
pub enum CharGroupUnit {
    Sequence(char, char),
    Random(Vec<char>),
    Union(Vec<CharGroupUnit>),
    Invert(Box<CharGroupUnit>),
}

impl CharGroupUnit {
    pub fn matches(&self, c: char) -> bool {
        match self {
            CharGroupUnit::Sequence(lo, hi) => *lo <= c && c <= *hi,
            CharGroupUnit::Random(set) => set.contains(&c),
            CharGroupUnit::Union(children) => children.iter().any(|u| u.matches(c)),
            CharGroupUnit::Invert(child) => !child.matches(c),
        }
    }

    /// A single-char `regex` pattern equivalent to [`CharGroupUnit::matches`], built the
    /// way the teacher's `lexeme::Pattern` compiles range-based lexemes down to `regex`
    /// instead of hand-walking ranges at match time.
    pub fn to_regex_pattern(&self) -> String {
        match self {
            CharGroupUnit::Invert(child) => format!("[^{}]", child.class_body()),
            other => format!("[{}]", other.class_body()),
        }
    }

    /// The contents that belong between `[` and `]` for this unit, used both directly
    /// and when an enclosing [`CharGroupUnit::Invert`] needs to negate a whole subtree.
    fn class_body(&self) -> String {
        match self {
            CharGroupUnit::Sequence(lo, hi) => format!("{}-{}", escape_class_char(*lo), escape_class_char(*hi)),
            CharGroupUnit::Random(set) => set.iter().copied().map(escape_class_char).collect(),
            CharGroupUnit::Union(children) => children.iter().map(CharGroupUnit::class_body).collect(),
            // A class can't nest a negated sub-class; inverting inside a union is rare
            // enough in practice that we fall back to listing the unit's own matches
            // would require enumerating the Unicode scalar space, so nested `Invert`
            // is only supported as the outermost unit.
            CharGroupUnit::Invert(child) => child.class_body(),
        }
    }
}

fn escape_class_char(c: char) -> String {
    match c {
        ']' | '^' | '-' | '\\' => format!("\\{c}"),
        _ => c.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trivial_multiplicity_detection() {
        assert!(Multiplicity::ONE.is_trivial());
        assert!(!Multiplicity::star().is_trivial());
        assert!(!Multiplicity::optional().is_trivial());
    }

    #[test]
    fn char_group_union_and_invert() {
        let digits = CharGroupUnit::Sequence('0', '9');
        let underscore = CharGroupUnit::Random(vec!['_']);
        let ident_start = CharGroupUnit::Union(vec![
            CharGroupUnit::Sequence('a', 'z'),
            CharGroupUnit::Sequence('A', 'Z'),
            underscore.clone(),
        ]);
        assert!(ident_start.matches('Q'));
        assert!(!ident_start.matches('9'));
        assert!(digits.matches('5'));

        let not_digit = CharGroupUnit::Invert(Box::new(digits));
        assert!(not_digit.matches('x'));
        assert!(!not_digit.matches('3'));
    }
}

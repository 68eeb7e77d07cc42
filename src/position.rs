use std::fmt::{Display, Formatter};
use std::rc::Rc;

/// A line/column pair within one source file, 1-indexed.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub struct Position {
    pub line: usize,
    pub column: usize,
}

impl Position {
    pub fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }

    /// Scans `code` up to `pointer` bytes, counting line breaks to recover the position.
    ///
    /// `pointer` is a byte offset into `code`, which must be valid UTF-8; this assumption
    /// is upheld by every caller in this crate, which only ever positions within the
    /// `Code` it tokenized.
    pub fn at(code: &str, pointer: usize) -> Self {
        let mut line = 1usize;
        let mut last_break = 0usize;
        for (i, b) in code.as_bytes().iter().enumerate().take(pointer) {
            if *b == b'\n' {
                line += 1;
                last_break = i + 1;
            }
        }
        Position::new(line, pointer.saturating_sub(last_break) + 1)
    }
}

impl Display for Position {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{},{}", self.line, self.column)
    }
}

/// A record of `{file, line, column}`, or (for a resolution chain) a stack of such
/// records, deepest frame first, per §6 of the notice printing format.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SourceLocation {
    Single { file: Rc<str>, position: Position },
    Stack(Vec<SourceLocation>),
}

impl SourceLocation {
    pub fn new(file: impl Into<Rc<str>>, position: Position) -> Self {
        SourceLocation::Single {
            file: file.into(),
            position,
        }
    }

    /// The file/position of the deepest (innermost) frame.
    pub fn deepest(&self) -> Option<(&str, Position)> {
        match self {
            SourceLocation::Single { file, position } => Some((file, *position)),
            SourceLocation::Stack(frames) => frames.first().and_then(SourceLocation::deepest),
        }
    }

    /// Flattens nested stacks into a single ordered list of single-frame locations,
    /// deepest first.
    pub fn frames(&self) -> Vec<(&str, Position)> {
        let mut out = Vec::new();
        self.collect_frames(&mut out);
        out
    }

    fn collect_frames<'a>(&'a self, out: &mut Vec<(&'a str, Position)>) {
        match self {
            SourceLocation::Single { file, position } => out.push((file, *position)),
            SourceLocation::Stack(frames) => {
                for f in frames {
                    f.collect_frames(out);
                }
            }
        }
    }
}

impl Display for SourceLocation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if let Some((file, position)) = self.deepest() {
            write!(f, "{} ({})", file, position)
        } else {
            write!(f, "<unknown>")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn position_counts_lines_and_columns() {
        let code = "abc\ndef\nghi";
        assert_eq!(Position::at(code, 0), Position::new(1, 1));
        assert_eq!(Position::at(code, 4), Position::new(2, 1));
        assert_eq!(Position::at(code, 9), Position::new(3, 2));
    }

    #[test]
    fn deepest_unwraps_stacks() {
        let inner = SourceLocation::new("a.src", Position::new(1, 1));
        let outer = SourceLocation::new("b.src", Position::new(2, 5));
        let stack = SourceLocation::Stack(vec![inner.clone(), outer]);
        assert_eq!(stack.deepest().unwrap().0, "a.src");
        assert_eq!(stack.frames().len(), 2);
    }
}

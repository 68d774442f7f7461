//! Source location tracking.

use serde::{Deserialize, Serialize};

/// A byte-offset range in some source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// A span meaning "no location" (spec.md §7: spans of -1 mean no location;
    /// we represent that as the dummy zero-width span at the origin).
    pub fn dummy() -> Self {
        Self { start: 0, end: 0 }
    }

    pub fn merge(self, other: Span) -> Span {
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_takes_the_outer_bounds() {
        let a = Span::new(3, 10);
        let b = Span::new(0, 5);
        assert_eq!(a.merge(b), Span::new(0, 10));
    }

    #[test]
    fn dummy_is_zero_width() {
        assert!(Span::dummy().is_empty());
    }
}

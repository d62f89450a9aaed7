use serde::Serialize;
use std::fmt;

/// An injection point inside a message.
///
/// Locations are opaque to the scheduler; the only thing it needs from them
/// is whether two of them would clobber each other. No two locations of one
/// fuzz run may overlap.
pub trait Location: Clone + PartialEq + fmt::Debug + Send + Sync + 'static {
    fn overlaps(&self, other: &Self) -> bool;
}

/// A half-open byte range `start..end` in a text message.
///
/// An empty span (`start == end`) is an insertion point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        debug_assert!(start <= end, "span start {start} is past its end {end}");
        Self { start, end }
    }

    /// Zero for a span whose `start` is past its `end`.
    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Location for Span {
    /// Ranges that share at least one byte overlap. Two insertion points at
    /// the same offset also overlap, since their substitution order would be
    /// ambiguous.
    fn overlaps(&self, other: &Self) -> bool {
        self == other || (self.start < other.end && other.start < self.end)
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn span_overlap_rules() {
        let a = Span::new(0, 4);
        assert!(a.overlaps(&Span::new(3, 6)));
        assert!(a.overlaps(&Span::new(1, 2)), "containment overlaps");
        assert!(!a.overlaps(&Span::new(4, 8)), "adjacent spans do not overlap");
        assert!(!Span::new(4, 8).overlaps(&a));
        assert!(Span::new(2, 2).overlaps(&Span::new(2, 2)));
        assert!(Span::new(2, 2).overlaps(&a), "insertion inside a range");
        assert!(!Span::new(4, 4).overlaps(&a), "insertion at the range end");
    }

    #[test]
    fn span_len_and_display() {
        let s = Span::new(3, 7);
        assert_eq!(s.len(), 4);
        assert!(!s.is_empty());
        assert!(Span::new(5, 5).is_empty());
        assert_eq!(s.to_string(), "3..7");
    }

    #[test]
    fn inverted_span_has_no_length() {
        let s = Span { start: 5, end: 2 };
        assert_eq!(s.len(), 0);
        assert!(s.is_empty());
    }
}

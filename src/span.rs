//! Half-open spans of cycle time.
//!
//! A `Span` covers `[begin, end)`. Zero-width spans are allowed and stand
//! for instantaneous events. Splitting a span at cycle boundaries is the
//! basis of the per-cycle query model.

use crate::time::Time;

/// A half-open arc of time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Span {
    pub begin: Time,
    pub end: Time,
}

impl Span {
    pub fn new(begin: Time, end: Time) -> Self {
        Span { begin, end }
    }

    /// A zero-width span at `t`.
    pub fn instant(t: Time) -> Self {
        Span { begin: t, end: t }
    }

    pub fn duration(&self) -> Time {
        self.end - self.begin
    }

    pub fn is_zero_width(&self) -> bool {
        self.begin == self.end
    }

    pub fn midpoint(&self) -> Time {
        self.begin + self.duration() / Time::int(2)
    }

    /// The whole cycle containing `t`.
    pub fn cycle_of(t: Time) -> Self {
        Span::new(t.sam(), t.next_sam())
    }

    /// Cut this span at every integer cycle boundary.
    ///
    /// Zero-width spans survive as themselves.
    pub fn split_cycles(&self) -> Vec<Span> {
        if self.begin == self.end {
            return vec![*self];
        }
        let mut spans = Vec::new();
        let mut begin = self.begin;
        let end_sam = self.end.sam();
        while self.end > begin {
            if begin.sam() == end_sam {
                spans.push(Span::new(begin, self.end));
                break;
            }
            let boundary = begin.next_sam();
            spans.push(Span::new(begin, boundary));
            begin = boundary;
        }
        spans
    }

    /// Apply `f` to both endpoints.
    pub fn with_time<F>(&self, f: F) -> Span
    where
        F: Fn(Time) -> Time,
    {
        Span::new(f(self.begin), f(self.end))
    }

    /// Apply `f` to both endpoints relative to the start of the containing cycle.
    pub fn with_cycle<F>(&self, f: F) -> Span
    where
        F: Fn(Time) -> Time,
    {
        let sam = self.begin.sam();
        Span::new(sam + f(self.begin - sam), sam + f(self.end - sam))
    }

    /// The overlapping part of two spans, or `None`.
    ///
    /// Spans that touch only at an endpoint intersect only when the touching
    /// span is itself zero-width at that point.
    pub fn sect(&self, other: &Span) -> Option<Span> {
        let begin = self.begin.max(other.begin);
        let end = self.end.min(other.end);
        if begin > end {
            return None;
        }
        if begin == end {
            if begin == self.end && self.begin < self.end {
                return None;
            }
            if begin == other.end && other.begin < other.end {
                return None;
            }
        }
        Some(Span::new(begin, end))
    }

    /// Like [`sect`](Self::sect), for callers that have already established overlap.
    pub fn sect_unchecked(&self, other: &Span) -> Span {
        self.sect(other).expect("spans do not intersect")
    }

    /// Convex union: the smallest span containing both.
    pub fn hull(&self, other: &Span) -> Span {
        Span::new(self.begin.min(other.begin), self.end.max(other.end))
    }
}

impl std::fmt::Display for Span {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} -> {}", self.begin, self.end)
    }
}

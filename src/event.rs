//! Events: timed values produced by pattern queries.
//!
//! An event pairs a value with two spans: the optional `whole` is the span
//! the event was meant to occupy, and `active` is the portion of it that
//! falls inside the query. Continuous (signal-like) events have no `whole`.

use crate::span::Span;
use crate::time::Time;
use std::cmp::Ordering;

/// A location in the source text that produced an event, as
/// (column, line) begin/end. Used for editor highlighting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location {
    pub bx: u32,
    pub by: u32,
    pub ex: u32,
    pub ey: u32,
}

/// Metadata carried through every combinator.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Context {
    /// Source positions that contributed to this event.
    pub locations: Vec<Location>,
}

impl Context {
    pub fn new() -> Self {
        Context::default()
    }

    pub fn with_location(loc: Location) -> Self {
        Context { locations: vec![loc] }
    }

    /// Merge two contexts by concatenating their locations.
    pub fn combine(&self, other: &Context) -> Context {
        let mut locations = self.locations.clone();
        locations.extend(other.locations.iter().copied());
        Context { locations }
    }
}

/// A value active during a span of time.
#[derive(Debug, Clone)]
pub struct Event<T> {
    pub context: Context,
    /// The intended full span. `None` for continuous events.
    pub whole: Option<Span>,
    /// The part of the event inside the query. Never extends outside `whole`.
    pub active: Span,
    pub value: T,
}

impl<T> Event<T> {
    /// A discrete event whose active part is (so far) its whole span.
    pub fn discrete(whole: Span, value: T) -> Self {
        Event {
            context: Context::new(),
            whole: Some(whole),
            active: whole,
            value,
        }
    }

    /// A continuous event: no whole, just the queried part.
    pub fn continuous(active: Span, value: T) -> Self {
        Event {
            context: Context::new(),
            whole: None,
            active,
            value,
        }
    }

    pub fn new(whole: Option<Span>, active: Span, value: T) -> Self {
        Event {
            context: Context::new(),
            whole,
            active,
            value,
        }
    }

    pub fn with_context(whole: Option<Span>, active: Span, value: T, context: Context) -> Self {
        Event {
            context,
            whole,
            active,
            value,
        }
    }

    /// True when the active part starts where the whole starts.
    pub fn has_onset(&self) -> bool {
        match self.whole {
            Some(w) => w.begin == self.active.begin,
            None => false,
        }
    }

    /// True when the active part covers the entire whole.
    pub fn is_complete(&self) -> bool {
        self.whole == Some(self.active)
    }

    pub fn whole_or_active(&self) -> Span {
        self.whole.unwrap_or(self.active)
    }

    /// Duration of the whole (or, for continuous events, the active part).
    pub fn duration(&self) -> Time {
        self.whole_or_active().duration()
    }

    pub fn with_span<F>(self, f: F) -> Self
    where
        F: Fn(Span) -> Span,
    {
        Event {
            context: self.context,
            whole: self.whole.map(&f),
            active: f(self.active),
            value: self.value,
        }
    }

    pub fn with_value<U, F>(self, f: F) -> Event<U>
    where
        F: FnOnce(T) -> U,
    {
        Event {
            context: self.context,
            whole: self.whole,
            active: self.active,
            value: f(self.value),
        }
    }

    pub fn combine_context<U>(&self, other: &Event<U>) -> Context {
        self.context.combine(&other.context)
    }

    /// Sort key for emit ordering: active begin, then whole begin.
    /// Events with a whole order before continuous events at the same instant.
    pub fn emit_key(&self) -> (Time, bool, Time) {
        (
            self.active.begin,
            self.whole.is_none(),
            self.whole_or_active().begin,
        )
    }
}

impl<T: PartialEq> Event<T> {
    /// Two fragments of the same underlying event, back to back.
    pub fn is_adjacent(&self, other: &Event<T>) -> bool {
        self.whole.is_some()
            && self.whole == other.whole
            && self.active.end == other.active.begin
            && self.value == other.value
    }
}

impl<T: PartialEq + Clone> Event<T> {
    pub fn span_equals(&self, other: &Event<T>) -> bool {
        self.whole == other.whole && self.active == other.active
    }
}

/// Sort events into emit order (in place).
pub fn sort_events<T>(events: &mut [Event<T>]) {
    events.sort_by(|a, b| a.emit_key().cmp(&b.emit_key()));
}

/// Full emit order for orderable values: active begin, whole begin, value.
pub fn cmp_emit<T: Ord>(a: &Event<T>, b: &Event<T>) -> Ordering {
    a.emit_key()
        .cmp(&b.emit_key())
        .then_with(|| a.value.cmp(&b.value))
}

/// Merge adjacent fragments with equal whole and value into single events,
/// concatenating their contexts. Input order is not assumed.
pub fn defrag<T: PartialEq + Clone>(mut events: Vec<Event<T>>) -> Vec<Event<T>> {
    sort_events(&mut events);
    let mut out: Vec<Event<T>> = Vec::with_capacity(events.len());
    for ev in events {
        match out.last_mut() {
            Some(prev) if prev.is_adjacent(&ev) => {
                prev.active = Span::new(prev.active.begin, ev.active.end);
                prev.context = prev.context.combine(&ev.context);
            }
            _ => out.push(ev),
        }
    }
    out
}

impl<T: std::fmt::Display> std::fmt::Display for Event<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.whole {
            None => write!(f, "[ ~{} | {} ]", self.active, self.value),
            Some(whole) if whole == self.active => {
                write!(f, "[ {} | {} ]", self.active, self.value)
            }
            Some(whole) => write!(f, "[ ({}) in {} | {} ]", self.active, whole, self.value),
        }
    }
}

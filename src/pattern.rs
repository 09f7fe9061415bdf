//! Patterns: time-queryable descriptions of events.
//!
//! A `Pattern<T>` is a function from a query [`State`] to the events active
//! inside the queried span, closed under the combinator algebra. Patterns are
//! immutable values; transforming one produces a new pattern that wraps the
//! old query function. Nothing is ever pre-rendered: querying two adjacent
//! spans returns the same events as querying their union, split at the seam.

use crate::event::{Context, Event, Location};
use crate::span::Span;
use crate::state::State;
use crate::time::Time;
use std::sync::Arc;

/// The query function type.
pub type QueryFn<T> = dyn Fn(&State) -> Vec<Event<T>> + Send + Sync;

/// How a pattern of patterns is flattened, and which operand supplies
/// structure when two patterns are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Join {
    /// Structure from the outer pattern: inner events adopt the outer whole.
    Inner,
    /// Structure from the inner pattern: inner wholes survive.
    Outer,
    /// Symmetric: wholes are intersected.
    #[default]
    Mix,
    /// Inner cycles are compressed into each outer event's whole.
    Squeeze,
    /// Like `Squeeze`, but the outer whole survives.
    SqueezeOut,
    /// Inner pattern restarts at the cycle boundary of each outer onset.
    Trig,
    /// Inner pattern restarts exactly at each outer onset.
    Trig0,
}

/// A time-queryable pattern of values.
pub struct Pattern<T> {
    query: Arc<QueryFn<T>>,
    /// Preferred alignment when this pattern is the left operand of a
    /// binary combinator.
    join: Join,
}

impl<T> Clone for Pattern<T> {
    fn clone(&self) -> Self {
        Pattern {
            query: Arc::clone(&self.query),
            join: self.join,
        }
    }
}

impl<T> std::fmt::Debug for Pattern<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pattern").field("join", &self.join).finish()
    }
}

impl<T: Clone + Send + Sync + 'static> Pattern<T> {
    pub fn new<F>(query: F) -> Self
    where
        F: Fn(&State) -> Vec<Event<T>> + Send + Sync + 'static,
    {
        Pattern {
            query: Arc::new(query),
            join: Join::default(),
        }
    }

    /// Query the pattern for events in the given state.
    pub fn query(&self, state: &State) -> Vec<Event<T>> {
        (self.query)(state)
    }

    /// Query over a bare span with no controls.
    pub fn query_span(&self, begin: Time, end: Time) -> Vec<Event<T>> {
        self.query(&State::new(Span::new(begin, end)))
    }

    /// The events of cycle zero.
    pub fn first_cycle(&self) -> Vec<Event<T>> {
        let mut events = self.query_span(Time::int(0), Time::int(1));
        crate::event::sort_events(&mut events);
        events
    }

    /// The values of cycle zero, in emit order.
    pub fn first_cycle_values(&self) -> Vec<T> {
        self.first_cycle().into_iter().map(|e| e.value).collect()
    }

    /// Set the preferred alignment strategy.
    pub fn with_join(mut self, join: Join) -> Self {
        self.join = join;
        self
    }

    pub fn join_strategy(&self) -> Join {
        self.join
    }

    // ------------------------------------------------------------------
    // Plumbing
    // ------------------------------------------------------------------

    /// Map a function over event values.
    pub fn with_value<U, F>(self, f: F) -> Pattern<U>
    where
        U: Clone + Send + Sync + 'static,
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        let query = self.query;
        Pattern {
            query: Arc::new(move |state| {
                query(state)
                    .into_iter()
                    .map(|ev| ev.with_value(|v| f(v)))
                    .collect()
            }),
            join: self.join,
        }
    }

    /// Alias for [`with_value`](Self::with_value).
    pub fn fmap<U, F>(self, f: F) -> Pattern<U>
    where
        U: Clone + Send + Sync + 'static,
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        self.with_value(f)
    }

    /// Transform the query span before querying.
    pub fn with_query_span<F>(self, f: F) -> Self
    where
        F: Fn(Span) -> Span + Send + Sync + 'static,
    {
        let query = self.query;
        Pattern {
            query: Arc::new(move |state| query(&state.with_span(|s| f(s)))),
            join: self.join,
        }
    }

    /// Transform both endpoints of the query span.
    pub fn with_query_time<F>(self, f: F) -> Self
    where
        F: Fn(Time) -> Time + Send + Sync + 'static,
    {
        self.with_query_span(move |span| span.with_time(&f))
    }

    /// Transform every returned event.
    pub fn with_event<F>(self, f: F) -> Self
    where
        F: Fn(Event<T>) -> Event<T> + Send + Sync + 'static,
    {
        let query = self.query;
        Pattern {
            query: Arc::new(move |state| query(state).into_iter().map(|e| f(e)).collect()),
            join: self.join,
        }
    }

    /// Transform the whole event list of each query.
    pub fn with_events<F>(self, f: F) -> Self
    where
        F: Fn(Vec<Event<T>>) -> Vec<Event<T>> + Send + Sync + 'static,
    {
        let query = self.query;
        Pattern {
            query: Arc::new(move |state| f(query(state))),
            join: self.join,
        }
    }

    /// Transform the spans of every returned event.
    pub fn with_event_span<F>(self, f: F) -> Self
    where
        F: Fn(Span) -> Span + Send + Sync + 'static,
    {
        self.with_event(move |ev| ev.with_span(|s| f(s)))
    }

    /// Transform both endpoints of every event span.
    pub fn with_event_time<F>(self, f: F) -> Self
    where
        F: Fn(Time) -> Time + Send + Sync + 'static,
    {
        self.with_event_span(move |span| span.with_time(&f))
    }

    pub fn filter_events<F>(self, pred: F) -> Self
    where
        F: Fn(&Event<T>) -> bool + Send + Sync + 'static,
    {
        let query = self.query;
        Pattern {
            query: Arc::new(move |state| {
                query(state).into_iter().filter(|e| pred(e)).collect()
            }),
            join: self.join,
        }
    }

    pub fn filter_values<F>(self, pred: F) -> Self
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.filter_events(move |ev| pred(&ev.value))
    }

    /// Keep only events whose onset falls inside the query.
    pub fn onsets_only(self) -> Self {
        self.filter_events(|ev| ev.has_onset())
    }

    /// Keep only discrete events.
    pub fn discrete_only(self) -> Self {
        self.filter_events(|ev| ev.whole.is_some())
    }

    /// Split incoming queries at cycle boundaries.
    ///
    /// Combinators whose behavior depends on the cycle number assume the
    /// query lies within one cycle; this wrapper establishes that.
    pub fn split_queries(self) -> Self {
        let query = self.query;
        Pattern {
            query: Arc::new(move |state| {
                state
                    .span
                    .split_cycles()
                    .into_iter()
                    .flat_map(|sub| query(&state.set_span(sub)))
                    .collect()
            }),
            join: self.join,
        }
    }

    /// Stamp a source location onto every event.
    pub fn with_location(self, loc: Location) -> Self {
        self.with_event(move |mut ev| {
            ev.context.locations.push(loc);
            ev
        })
    }

    /// Replace the context of every event.
    pub fn with_context(self, context: Context) -> Self {
        self.with_event(move |mut ev| {
            ev.context = context.clone();
            ev
        })
    }

    // ------------------------------------------------------------------
    // Time transformations
    // ------------------------------------------------------------------

    /// Speed the pattern up by `factor`.
    ///
    /// `fast(0)` is silence; a negative factor reverses each cycle of the
    /// sped-up pattern.
    pub fn fast(self, factor: Time) -> Self {
        if factor.is_zero() {
            return silence();
        }
        if factor.is_negative() {
            return self.fast(factor.abs()).rev();
        }
        self.with_query_time(move |t| t * factor)
            .with_event_time(move |t| t / factor)
    }

    /// Slow the pattern down by `factor`.
    pub fn slow(self, factor: Time) -> Self {
        if factor.is_zero() {
            return silence();
        }
        self.fast(factor.recip())
    }

    /// Shift the pattern earlier by `offset` cycles.
    pub fn early(self, offset: Time) -> Self {
        self.with_query_time(move |t| t + offset)
            .with_event_time(move |t| t - offset)
    }

    /// Shift the pattern later by `offset` cycles.
    pub fn late(self, offset: Time) -> Self {
        self.early(-offset)
    }

    /// Rotate left (an alias for [`early`](Self::early)).
    pub fn rotl(self, offset: Time) -> Self {
        self.early(offset)
    }

    /// Rotate right (an alias for [`late`](Self::late)).
    pub fn rotr(self, offset: Time) -> Self {
        self.late(offset)
    }

    /// Reverse each cycle in place.
    ///
    /// The event at offset `x` of a cycle moves to offset `1 - x` of the
    /// same cycle; reflection never crosses cycle boundaries.
    pub fn rev(self) -> Self {
        let pat = self;
        Pattern::new(move |state| {
            let cycle = state.span.begin.sam();
            let next = state.span.begin.next_sam();
            let reflect = move |s: Span| {
                Span::new(cycle + (next - s.end), cycle + (next - s.begin))
            };
            pat.query(&state.set_span(reflect(state.span)))
                .into_iter()
                .map(|ev| ev.with_span(reflect))
                .collect()
        })
        .split_queries()
    }

    /// Successively shift the pattern by `1/n` each cycle.
    pub fn iter(self, n: i64) -> Self {
        if n <= 0 {
            return self;
        }
        slowcat((0..n).map(|i| self.clone().early(Time::new(i, n))).collect())
    }

    /// Like [`iter`](Self::iter), shifting backwards.
    pub fn iter_back(self, n: i64) -> Self {
        if n <= 0 {
            return self;
        }
        slowcat((0..n).map(|i| self.clone().late(Time::new(i, n))).collect())
    }

    /// Play the slice `[begin, end)` of each cycle, stretched to fill the
    /// whole cycle.
    pub fn zoom(self, begin: Time, end: Time) -> Self {
        let d = end - begin;
        if d <= Time::zero() {
            return silence();
        }
        let pat = self;
        Pattern::new(move |state| {
            let q = state.span.with_cycle(|t| t * d + begin);
            pat.query(&state.set_span(q))
                .into_iter()
                .map(|ev| ev.with_span(|s| s.with_cycle(|t| (t - begin) / d)))
                .collect()
        })
        .split_queries()
    }

    /// Play the pattern `factor` times faster, leaving silence in the
    /// remainder of each cycle. Factors below one behave as one.
    pub fn fast_gap(self, factor: Time) -> Self {
        if factor <= Time::zero() {
            return silence();
        }
        let r = factor.max(Time::one());
        let pat = self;
        Pattern::new(move |state| {
            let span = state.span;
            let munge = move |t: Time| t.sam() + (t.cycle_pos() * r).min(Time::one());
            let q = Span::new(munge(span.begin), munge(span.end));
            // A query that starts inside the gap sees nothing; without this
            // the clamped zero-width query would pick up the next cycle's
            // onset.
            if q.begin == span.begin.next_sam() {
                return Vec::new();
            }
            pat.query(&state.set_span(q))
                .into_iter()
                .map(|ev| {
                    ev.with_span(|s| {
                        let sam = s.begin.sam();
                        Span::new(sam + (s.begin - sam) / r, sam + (s.end - sam) / r)
                    })
                })
                .collect()
        })
        .split_queries()
    }

    /// Squash the whole pattern into `[begin, end)` of each cycle, with
    /// silence elsewhere. Bounds outside `[0, 1]` give silence.
    pub fn compress(self, begin: Time, end: Time) -> Self {
        if begin >= end
            || begin < Time::zero()
            || end < Time::zero()
            || begin > Time::one()
            || end > Time::one()
        {
            return silence();
        }
        self.fast_gap((end - begin).recip()).late(begin)
    }

    /// Like [`compress`](Self::compress) for arbitrary spans: the pattern is
    /// scaled to the span's duration and anchored at its cycle position.
    pub fn focus(self, begin: Time, end: Time) -> Self {
        let d = end - begin;
        if d <= Time::zero() {
            return silence();
        }
        self.fast(d.recip()).late(begin.cycle_pos())
    }

    pub fn focus_span(self, span: Span) -> Self {
        self.focus(span.begin, span.end)
    }

    /// Sample the pattern into `n` equal discrete steps per cycle.
    pub fn segment(self, n: Time) -> Self {
        struct_(pure(true).fast(n), self)
    }

    /// Repeat the first `amount` of each cycle for the rest of the cycle.
    pub fn linger(self, amount: Time) -> Self {
        if amount.is_zero() {
            return silence();
        }
        self.zoom(Time::zero(), amount).slow(amount)
    }

    /// Repeat each event `n` times within its span.
    pub fn ply(self, n: i64) -> Self {
        self.fmap(move |v| pure(v).fast(Time::int(n))).squeeze_join()
    }

    /// Speed up, transform, slow back down.
    pub fn inside<F>(self, factor: Time, f: F) -> Self
    where
        F: FnOnce(Self) -> Self,
    {
        f(self.fast(factor)).slow(factor)
    }

    /// Slow down, transform, speed back up.
    pub fn outside<F>(self, factor: Time, f: F) -> Self
    where
        F: FnOnce(Self) -> Self,
    {
        f(self.slow(factor)).fast(factor)
    }

    /// The pattern followed by its reverse, one cycle each.
    pub fn palindrome(self) -> Self {
        slowcat(vec![self.clone(), self.rev()])
    }

    /// Layer a transformed copy on top of the original.
    pub fn superimpose<F>(self, f: F) -> Self
    where
        F: FnOnce(Self) -> Self,
    {
        stack(vec![self.clone(), f(self)])
    }

    /// Stack the results of several transformations of this pattern.
    pub fn layer<F>(self, fs: Vec<F>) -> Self
    where
        F: Fn(Self) -> Self,
    {
        stack(fs.into_iter().map(|f| f(self.clone())).collect())
    }

    /// Superimpose a copy shifted later by `offset` and transformed by `f`.
    pub fn off<F>(self, offset: Time, f: F) -> Self
    where
        F: FnOnce(Self) -> Self,
    {
        let shifted = f(self.clone()).late(offset);
        stack(vec![self, shifted])
    }

    // ------------------------------------------------------------------
    // Conditional transformations
    // ------------------------------------------------------------------

    /// Apply `f` on cycles whose number satisfies `test`.
    pub fn when_cycle<F, P>(self, test: P, f: F) -> Self
    where
        F: FnOnce(Self) -> Self,
        P: Fn(i64) -> bool + Send + Sync + 'static,
    {
        let plain = self.clone();
        let transformed = f(self);
        Pattern::new(move |state| {
            if test(state.span.begin.cycle()) {
                transformed.query(state)
            } else {
                plain.query(state)
            }
        })
        .split_queries()
    }

    /// Apply `f` once per group of `n` cycles, on the group's final cycle.
    pub fn every<F>(self, n: i64, f: F) -> Self
    where
        F: FnOnce(Self) -> Self,
    {
        if n <= 0 {
            return self;
        }
        self.when_cycle(move |c| c.rem_euclid(n) == n - 1, f)
    }

    /// Like [`every`](Self::every) with the transformed cycle first in each
    /// group.
    pub fn every_first<F>(self, n: i64, f: F) -> Self
    where
        F: FnOnce(Self) -> Self,
    {
        if n <= 0 {
            return self;
        }
        self.when_cycle(move |c| c.rem_euclid(n) == 0, f)
    }

    /// Apply `f` wherever the boolean pattern is true, leaving the rest of
    /// the pattern untouched.
    pub fn when<F>(self, bools: Pattern<bool>, f: F) -> Self
    where
        F: FnOnce(Self) -> Self,
    {
        let inverted = inv(bools.clone());
        stack(vec![
            mask(bools, f(self.clone())),
            mask(inverted, self),
        ])
    }

    /// Keep only events whose onsets land on true steps of `bools`, taking
    /// timing (and wholes) from the boolean pattern.
    pub fn euclid(self, pulses: i64, steps: i64) -> Self {
        struct_(euclid_bool(pulses, steps), self)
    }

    /// Euclidean rhythm with the silent steps sounded instead.
    pub fn euclid_inv(self, pulses: i64, steps: i64) -> Self {
        struct_(inv(euclid_bool(pulses, steps)), self)
    }

    /// Euclidean rhythm rotated left by `rotation` steps.
    pub fn euclid_off(self, pulses: i64, steps: i64, rotation: i64) -> Self {
        if steps == 0 {
            return silence();
        }
        struct_(
            euclid_bool(pulses, steps).early(Time::new(rotation.rem_euclid(steps), steps)),
            self,
        )
    }

    // ------------------------------------------------------------------
    // Binds
    // ------------------------------------------------------------------

    /// Bind with this pattern's preferred strategy.
    pub fn bind<U, F>(self, f: F) -> Pattern<U>
    where
        U: Clone + Send + Sync + 'static,
        F: Fn(T) -> Pattern<U> + Send + Sync + 'static,
    {
        let join = self.join;
        self.bind_with(join, f)
    }

    /// Bind with an explicit strategy.
    pub fn bind_with<U, F>(self, join: Join, f: F) -> Pattern<U>
    where
        U: Clone + Send + Sync + 'static,
        F: Fn(T) -> Pattern<U> + Send + Sync + 'static,
    {
        self.fmap(f).join_with(join)
    }

    pub fn inner_bind<U, F>(self, f: F) -> Pattern<U>
    where
        U: Clone + Send + Sync + 'static,
        F: Fn(T) -> Pattern<U> + Send + Sync + 'static,
    {
        self.bind_with(Join::Inner, f)
    }

    pub fn outer_bind<U, F>(self, f: F) -> Pattern<U>
    where
        U: Clone + Send + Sync + 'static,
        F: Fn(T) -> Pattern<U> + Send + Sync + 'static,
    {
        self.bind_with(Join::Outer, f)
    }

    pub fn squeeze_bind<U, F>(self, f: F) -> Pattern<U>
    where
        U: Clone + Send + Sync + 'static,
        F: Fn(T) -> Pattern<U> + Send + Sync + 'static,
    {
        self.bind_with(Join::Squeeze, f)
    }
}

// ----------------------------------------------------------------------
// Constructors
// ----------------------------------------------------------------------

/// The empty pattern.
pub fn silence<T: Clone + Send + Sync + 'static>() -> Pattern<T> {
    Pattern::new(|_| Vec::new())
}

/// One event per cycle, spanning the cycle.
pub fn pure<T: Clone + Send + Sync + 'static>(value: T) -> Pattern<T> {
    Pattern::new(move |state| {
        state
            .span
            .split_cycles()
            .into_iter()
            .map(|sub| {
                Event::new(Some(Span::cycle_of(sub.begin)), sub, value.clone())
            })
            .collect()
    })
}

/// Alias for [`pure`].
pub fn atom<T: Clone + Send + Sync + 'static>(value: T) -> Pattern<T> {
    pure(value)
}

/// Cycle through the values, one per cycle.
pub fn from_list<T: Clone + Send + Sync + 'static>(values: Vec<T>) -> Pattern<T> {
    slowcat(values.into_iter().map(pure).collect())
}

/// All the values packed into a single cycle, in order.
pub fn fast_from_list<T: Clone + Send + Sync + 'static>(values: Vec<T>) -> Pattern<T> {
    fastcat(values.into_iter().map(pure).collect())
}

/// The integers `0..n`, one cycle.
pub fn run(n: i64) -> Pattern<i64> {
    fast_from_list((0..n).collect())
}

/// Play all patterns at once.
pub fn stack<T: Clone + Send + Sync + 'static>(patterns: Vec<Pattern<T>>) -> Pattern<T> {
    if patterns.is_empty() {
        return silence();
    }
    Pattern::new(move |state| patterns.iter().flat_map(|p| p.query(state)).collect())
}

/// Play `b` on top of `a`.
pub fn overlay<T: Clone + Send + Sync + 'static>(a: Pattern<T>, b: Pattern<T>) -> Pattern<T> {
    stack(vec![a, b])
}

/// Concatenate patterns, one cycle each, looping.
pub fn slowcat<T: Clone + Send + Sync + 'static>(patterns: Vec<Pattern<T>>) -> Pattern<T> {
    if patterns.is_empty() {
        return silence();
    }
    if patterns.len() == 1 {
        return patterns.into_iter().next().unwrap();
    }
    let len = patterns.len() as i64;
    let patterns = Arc::new(patterns);
    Pattern::new(move |state| {
        let cycle = state.span.begin.cycle();
        let i = cycle.rem_euclid(len) as usize;
        // Shift so that pattern i sees consecutive cycles, not every len-th.
        let offset = Time::int(cycle - cycle.div_euclid(len));
        patterns[i]
            .query(&state.with_span(|s| s.with_time(|t| t - offset)))
            .into_iter()
            .map(|ev| ev.with_span(|s| s.with_time(|t| t + offset)))
            .collect()
    })
    .split_queries()
}

/// Alias for [`slowcat`].
pub fn cat<T: Clone + Send + Sync + 'static>(patterns: Vec<Pattern<T>>) -> Pattern<T> {
    slowcat(patterns)
}

/// Like [`slowcat`], but without compensating the cycle number: each pattern
/// sees the absolute cycle it plays in.
pub fn slowcat_raw<T: Clone + Send + Sync + 'static>(patterns: Vec<Pattern<T>>) -> Pattern<T> {
    if patterns.is_empty() {
        return silence();
    }
    let len = patterns.len() as i64;
    let patterns = Arc::new(patterns);
    Pattern::new(move |state| {
        let i = state.span.begin.cycle().rem_euclid(len) as usize;
        patterns[i].query(state)
    })
    .split_queries()
}

/// Concatenate patterns into a single cycle.
pub fn fastcat<T: Clone + Send + Sync + 'static>(patterns: Vec<Pattern<T>>) -> Pattern<T> {
    let len = patterns.len() as i64;
    if len == 0 {
        return silence();
    }
    slowcat(patterns).fast(Time::int(len))
}

/// Weighted sequential concatenation: each pattern occupies `weight / total`
/// of one cycle.
pub fn timecat<T: Clone + Send + Sync + 'static>(
    weighted: Vec<(Time, Pattern<T>)>,
) -> Pattern<T> {
    let total = weighted
        .iter()
        .fold(Time::zero(), |acc, (w, _)| acc + *w);
    if total <= Time::zero() {
        return silence();
    }
    let mut layers = Vec::with_capacity(weighted.len());
    let mut pos = Time::zero();
    for (weight, pat) in weighted {
        if weight <= Time::zero() {
            continue;
        }
        let begin = pos / total;
        let end = (pos + weight) / total;
        layers.push(pat.compress(begin, end));
        pos = pos + weight;
    }
    stack(layers)
}

// ----------------------------------------------------------------------
// Boolean structure
// ----------------------------------------------------------------------

/// Negate a boolean pattern.
pub fn inv(bools: Pattern<bool>) -> Pattern<bool> {
    bools.fmap(|b| !b)
}

/// Take structure from `bools`: each true step produces the value of `p`
/// sampled at that step, with the boolean pattern's whole.
pub fn struct_<T: Clone + Send + Sync + 'static>(
    bools: Pattern<bool>,
    p: Pattern<T>,
) -> Pattern<T> {
    app_left(bools.fmap(|b| move |v: T| (b, v)), p)
        .filter_values(|(b, _)| *b)
        .fmap(|(_, v)| v)
}

/// Crop `p` to the true spans of `bools`.
pub fn mask<T: Clone + Send + Sync + 'static>(
    bools: Pattern<bool>,
    p: Pattern<T>,
) -> Pattern<T> {
    Pattern::new(move |state| {
        let keep: Vec<Span> = bools
            .query(state)
            .into_iter()
            .filter(|ev| ev.value)
            .map(|ev| ev.active)
            .collect();
        p.query(state)
            .into_iter()
            .flat_map(|ev| {
                keep.iter()
                    .filter_map(|span| {
                        ev.active.sect(span).map(|active| {
                            Event::with_context(
                                ev.whole,
                                active,
                                ev.value.clone(),
                                ev.context.clone(),
                            )
                        })
                    })
                    .collect::<Vec<_>>()
            })
            .collect()
    })
}

/// The Euclidean boolean pattern: `pulses` maximally evenly distributed
/// over `steps` equal slots per cycle.
pub fn euclid_bool(pulses: i64, steps: i64) -> Pattern<bool> {
    if steps <= 0 {
        return silence();
    }
    fast_from_list(bjorklund(pulses.max(0) as usize, steps as usize))
}

/// Bjorklund's algorithm.
fn bjorklund(pulses: usize, steps: usize) -> Vec<bool> {
    if steps == 0 {
        return Vec::new();
    }
    if pulses >= steps {
        return vec![true; steps];
    }
    if pulses == 0 {
        return vec![false; steps];
    }

    let mut pattern: Vec<Vec<bool>> = vec![vec![true]; pulses];
    let mut remainder: Vec<Vec<bool>> = vec![vec![false]; steps - pulses];

    while remainder.len() > 1 {
        let n = pattern.len().min(remainder.len());
        let mut merged = Vec::with_capacity(n);
        for i in 0..n {
            let mut group = pattern[i].clone();
            group.extend(remainder[i].iter().copied());
            merged.push(group);
        }
        let rest = if pattern.len() > remainder.len() {
            pattern[n..].to_vec()
        } else {
            remainder[n..].to_vec()
        };
        pattern = merged;
        remainder = rest;
    }

    pattern.extend(remainder);
    pattern.into_iter().flatten().collect()
}

// ----------------------------------------------------------------------
// Applicative alignment
// ----------------------------------------------------------------------

/// Apply a pattern of functions to a pattern of values; wholes are
/// intersected (the symmetric alignment).
pub fn app_both<F, A, B>(funcs: Pattern<F>, values: Pattern<A>) -> Pattern<B>
where
    F: Fn(A) -> B + Clone + Send + Sync + 'static,
    A: Clone + Send + Sync + 'static,
    B: Clone + Send + Sync + 'static,
{
    Pattern::new(move |state| {
        let func_events = funcs.query(state);
        let value_events = values.query(state);
        func_events
            .into_iter()
            .flat_map(|fe| {
                value_events
                    .iter()
                    .filter_map(|ve| {
                        let active = fe.active.sect(&ve.active)?;
                        let whole = match (fe.whole, ve.whole) {
                            (Some(a), Some(b)) => Some(a.sect(&b)?),
                            _ => None,
                        };
                        let value = (fe.value)(ve.value.clone());
                        Some(Event::with_context(
                            whole,
                            active,
                            value,
                            fe.combine_context(ve),
                        ))
                    })
                    .collect::<Vec<_>>()
            })
            .collect()
    })
}

/// Apply with structure from the left: the function pattern's wholes win.
pub fn app_left<F, A, B>(funcs: Pattern<F>, values: Pattern<A>) -> Pattern<B>
where
    F: Fn(A) -> B + Clone + Send + Sync + 'static,
    A: Clone + Send + Sync + 'static,
    B: Clone + Send + Sync + 'static,
{
    Pattern::new(move |state| {
        let mut out = Vec::new();
        for fe in funcs.query(state) {
            for ve in values.query(&state.set_span(fe.whole_or_active())) {
                if let Some(active) = fe.active.sect(&ve.active) {
                    let value = (fe.value)(ve.value.clone());
                    let context = fe.combine_context(&ve);
                    out.push(Event::with_context(fe.whole, active, value, context));
                }
            }
        }
        out
    })
}

/// Apply with structure from the right: the value pattern's wholes win.
pub fn app_right<F, A, B>(funcs: Pattern<F>, values: Pattern<A>) -> Pattern<B>
where
    F: Fn(A) -> B + Clone + Send + Sync + 'static,
    A: Clone + Send + Sync + 'static,
    B: Clone + Send + Sync + 'static,
{
    Pattern::new(move |state| {
        let mut out = Vec::new();
        for ve in values.query(state) {
            for fe in funcs.query(&state.set_span(ve.whole_or_active())) {
                if let Some(active) = fe.active.sect(&ve.active) {
                    let value = (fe.value)(ve.value.clone());
                    let context = fe.combine_context(&ve);
                    out.push(Event::with_context(ve.whole, active, value, context));
                }
            }
        }
        out
    })
}

// ----------------------------------------------------------------------
// Joins
// ----------------------------------------------------------------------

impl<T: Clone + Send + Sync + 'static> Pattern<Pattern<T>> {
    /// Flatten with an explicit strategy.
    pub fn join_with(self, join: Join) -> Pattern<T> {
        match join {
            Join::Inner => self.inner_join(),
            Join::Outer => self.outer_join(),
            Join::Mix => self.mix_join(),
            Join::Squeeze => self.squeeze_join(),
            Join::SqueezeOut => self.squeeze_out_join(),
            Join::Trig => self.trig_join(),
            Join::Trig0 => self.trig0_join(),
        }
    }

    /// The outer pattern supplies structure: each outer event takes the
    /// inner pattern's value at its own onset.
    pub fn inner_join(self) -> Pattern<T> {
        let outer = self;
        Pattern::new(move |state| {
            outer
                .query(state)
                .into_iter()
                .flat_map(|oe| {
                    let probe = Span::instant(oe.whole_or_active().begin);
                    let inner = oe.value.query(&state.set_span(probe));
                    inner
                        .into_iter()
                        .map(|ie| {
                            Event::with_context(
                                oe.whole,
                                oe.active,
                                ie.value.clone(),
                                oe.combine_context(&ie),
                            )
                        })
                        .collect::<Vec<_>>()
                })
                .collect()
        })
    }

    /// The inner pattern supplies structure: inner wholes survive.
    pub fn outer_join(self) -> Pattern<T> {
        let outer = self;
        Pattern::new(move |state| {
            outer
                .query(state)
                .into_iter()
                .flat_map(|oe| {
                    let inner = oe.value.query(&state.set_span(oe.active));
                    inner
                        .into_iter()
                        .filter_map(|ie| {
                            let active = oe.active.sect(&ie.active)?;
                            Some(Event::with_context(
                                ie.whole,
                                active,
                                ie.value.clone(),
                                oe.combine_context(&ie),
                            ))
                        })
                        .collect::<Vec<_>>()
                })
                .collect()
        })
    }

    /// Symmetric merge: wholes are intersected.
    pub fn mix_join(self) -> Pattern<T> {
        let outer = self;
        Pattern::new(move |state| {
            outer
                .query(state)
                .into_iter()
                .flat_map(|oe| {
                    let inner = oe.value.query(&state.set_span(oe.active));
                    inner
                        .into_iter()
                        .filter_map(|ie| {
                            let active = oe.active.sect(&ie.active)?;
                            let whole = match (oe.whole, ie.whole) {
                                (Some(a), Some(b)) => Some(a.sect(&b)?),
                                _ => None,
                            };
                            Some(Event::with_context(
                                whole,
                                active,
                                ie.value.clone(),
                                oe.combine_context(&ie),
                            ))
                        })
                        .collect::<Vec<_>>()
                })
                .collect()
        })
    }

    /// Compress each inner cycle into the outer event's whole.
    pub fn squeeze_join(self) -> Pattern<T> {
        let outer = self;
        Pattern::new(move |state| {
            outer
                .query(state)
                .into_iter()
                .flat_map(|oe| {
                    let slot = oe.whole_or_active();
                    if slot.duration().is_zero() {
                        return Vec::new();
                    }
                    let focused = oe.value.clone().focus_span(slot);
                    focused
                        .query(&state.set_span(oe.active))
                        .into_iter()
                        .filter_map(|ie| {
                            let active = oe.active.sect(&ie.active)?;
                            let whole = match (oe.whole, ie.whole) {
                                (Some(a), Some(b)) => a.sect(&b),
                                _ => None,
                            };
                            Some(Event::with_context(
                                whole,
                                active,
                                ie.value.clone(),
                                oe.combine_context(&ie),
                            ))
                        })
                        .collect::<Vec<_>>()
                })
                .collect()
        })
    }

    /// Like [`squeeze_join`](Self::squeeze_join), but the outer whole
    /// survives, so the outer pattern keeps the structure.
    pub fn squeeze_out_join(self) -> Pattern<T> {
        let outer = self;
        Pattern::new(move |state| {
            outer
                .query(state)
                .into_iter()
                .flat_map(|oe| {
                    let slot = oe.whole_or_active();
                    if slot.duration().is_zero() {
                        return Vec::new();
                    }
                    let focused = oe.value.clone().focus_span(slot);
                    focused
                        .query(&state.set_span(oe.active))
                        .into_iter()
                        .filter_map(|ie| {
                            let active = oe.active.sect(&ie.active)?;
                            Some(Event::with_context(
                                oe.whole,
                                active,
                                ie.value.clone(),
                                oe.combine_context(&ie),
                            ))
                        })
                        .collect::<Vec<_>>()
                })
                .collect()
        })
    }

    /// Restart the inner pattern at the cycle boundary of each outer onset.
    pub fn trig_join(self) -> Pattern<T> {
        self.trig_join_with(false)
    }

    /// Restart the inner pattern exactly at each outer onset.
    pub fn trig0_join(self) -> Pattern<T> {
        self.trig_join_with(true)
    }

    fn trig_join_with(self, zero_aligned: bool) -> Pattern<T> {
        let outer = self;
        Pattern::new(move |state| {
            outer
                .query(state)
                .into_iter()
                .flat_map(|oe| {
                    let onset = oe.whole_or_active().begin;
                    let shift = if zero_aligned { onset } else { onset.sam() };
                    let restarted = oe.value.clone().late(shift);
                    restarted
                        .query(&state.set_span(oe.active))
                        .into_iter()
                        .filter_map(|ie| {
                            let active = oe.active.sect(&ie.active)?;
                            Some(Event::with_context(
                                ie.whole,
                                active,
                                ie.value.clone(),
                                oe.combine_context(&ie),
                            ))
                        })
                        .collect::<Vec<_>>()
                })
                .collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(n: i64, d: i64) -> Time {
        Time::new(n, d)
    }

    fn sorted_values<T: Clone + Send + Sync + 'static>(p: &Pattern<T>) -> Vec<T> {
        p.first_cycle_values()
    }

    #[test]
    fn pure_one_event_per_cycle() {
        let p = pure("bd");
        let events = p.query_span(t(1, 2), t(5, 2));
        assert_eq!(events.len(), 3);
        for ev in &events {
            let whole = ev.whole.unwrap();
            assert_eq!(whole.begin, whole.begin.sam());
            assert_eq!(whole.duration(), Time::one());
        }
    }

    #[test]
    fn pure_zero_width_query() {
        let p = pure("bd");
        let events = p.query_span(t(0, 1), t(0, 1));
        assert_eq!(events.len(), 1);
        assert!(events[0].active.is_zero_width());
    }

    #[test]
    fn silence_is_empty() {
        let p: Pattern<i32> = silence();
        assert!(p.first_cycle().is_empty());
        assert!(p.query_span(t(-3, 1), t(3, 1)).is_empty());
    }

    #[test]
    fn fastcat_divides_the_cycle() {
        let p = fast_from_list(vec!["a", "b"]);
        let events = p.first_cycle();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].value, "a");
        assert_eq!(events[0].whole, Some(Span::new(t(0, 1), t(1, 2))));
        assert_eq!(events[1].value, "b");
        assert_eq!(events[1].whole, Some(Span::new(t(1, 2), t(1, 1))));
    }

    #[test]
    fn slowcat_alternates_cycles() {
        let p = slowcat(vec![pure("a"), pure("b")]);
        assert_eq!(p.query_span(t(0, 1), t(1, 1))[0].value, "a");
        assert_eq!(p.query_span(t(1, 1), t(2, 1))[0].value, "b");
        assert_eq!(p.query_span(t(2, 1), t(3, 1))[0].value, "a");
        // And before the origin.
        assert_eq!(p.query_span(t(-1, 1), t(0, 1))[0].value, "b");
    }

    #[test]
    fn slowcat_skips_no_cycles() {
        let p = slowcat(vec![pure("a"), pure("b")]).early(Time::int(1));
        assert_eq!(sorted_values(&p), vec!["b"]);

        let inner = slowcat(vec![pure("b"), pure("c")]);
        let outer = slowcat(vec![pure("a"), inner]);
        assert_eq!(outer.clone().early(Time::int(1)).first_cycle_values(), vec!["b"]);
        assert_eq!(outer.early(Time::int(3)).first_cycle_values(), vec!["c"]);
    }

    #[test]
    fn slowcat_raw_keeps_absolute_cycles() {
        // Without cycle compensation the nested cat sees the real cycle
        // number, so cycle 1 reaches its second alternative directly.
        let nested = slowcat(vec![pure("b"), pure("c")]);
        let p = slowcat_raw(vec![pure("a"), nested]);
        assert_eq!(p.query_span(t(0, 1), t(1, 1))[0].value, "a");
        assert_eq!(p.query_span(t(1, 1), t(2, 1))[0].value, "c");
    }

    #[test]
    fn fast_multiplies_events() {
        let p = pure(1).fast(t(2, 1));
        assert_eq!(p.first_cycle().len(), 2);
    }

    #[test]
    fn fast_zero_is_silence() {
        assert!(pure(1).fast(Time::zero()).first_cycle().is_empty());
        assert!(pure(1).slow(Time::zero()).first_cycle().is_empty());
    }

    #[test]
    fn fast_negative_reverses() {
        let p = fast_from_list(vec!["a", "b"]).fast(t(-1, 1));
        assert_eq!(sorted_values(&p), vec!["b", "a"]);
    }

    #[test]
    fn fast_composes_multiplicatively() {
        let a = pure(1).fast(t(2, 1)).fast(t(3, 2));
        let b = pure(1).fast(t(3, 1));
        let ea = a.first_cycle();
        let eb = b.first_cycle();
        assert_eq!(ea.len(), eb.len());
        for (x, y) in ea.iter().zip(eb.iter()) {
            assert_eq!(x.active, y.active);
            assert_eq!(x.whole, y.whole);
        }
    }

    #[test]
    fn slow_stretches_the_whole() {
        let p = pure("a").slow(t(2, 1));
        let events = p.first_cycle();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].whole, Some(Span::new(t(0, 1), t(2, 1))));
        assert_eq!(events[0].active, Span::new(t(0, 1), t(1, 1)));
        assert!(events[0].has_onset());
    }

    #[test]
    fn late_crosses_cycle_boundaries() {
        let p = pure(30).late(t(1, 4));
        let events = p.query_span(t(0, 1), t(1, 1));
        // The tail of the previous cycle's event plus this cycle's onset.
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn rev_reverses_within_the_cycle() {
        let p = fast_from_list(vec!["a", "b", "c"]).rev();
        assert_eq!(sorted_values(&p), vec!["c", "b", "a"]);
    }

    #[test]
    fn rev_is_an_involution() {
        let p = fast_from_list(vec![1, 2, 3]).rev().rev();
        let q = fast_from_list(vec![1, 2, 3]);
        let ep = p.first_cycle();
        let eq = q.first_cycle();
        assert_eq!(ep.len(), eq.len());
        for (a, b) in ep.iter().zip(eq.iter()) {
            assert_eq!(a.value, b.value);
            assert_eq!(a.active, b.active);
            assert_eq!(a.whole, b.whole);
        }
    }

    #[test]
    fn rev_reflects_per_cycle_not_per_query() {
        // Reversing reflects inside each cycle even when the query spans two.
        let p = fast_from_list(vec!["a", "b", "c", "d"])
            .slow(t(2, 1))
            .rev()
            .fast(t(2, 1));
        assert_eq!(sorted_values(&p), vec!["b", "a", "d", "c"]);
    }

    #[test]
    fn stack_with_silence_is_identity() {
        let p = stack(vec![fast_from_list(vec![1, 2]), silence()]);
        let q = fast_from_list(vec![1, 2]);
        let ep = p.first_cycle();
        let eq = q.first_cycle();
        assert_eq!(ep.len(), eq.len());
        for (a, b) in ep.iter().zip(eq.iter()) {
            assert_eq!(a.value, b.value);
            assert_eq!(a.active, b.active);
        }
    }

    #[test]
    fn cat_of_one_is_identity() {
        let p = cat(vec![fast_from_list(vec![1, 2])]);
        assert_eq!(sorted_values(&p), vec![1, 2]);
    }

    #[test]
    fn split_stability() {
        // Querying [0, 2) equals the union of [0, 1) and [1, 2).
        let p = fast_from_list(vec!["a", "b", "c"]).every(2, |p| p.fast(t(2, 1)));
        let mut joined = p.query_span(t(0, 1), t(2, 1));
        let mut split = p.query_span(t(0, 1), t(1, 1));
        split.extend(p.query_span(t(1, 1), t(2, 1)));
        crate::event::sort_events(&mut joined);
        crate::event::sort_events(&mut split);
        assert_eq!(joined.len(), split.len());
        for (a, b) in joined.iter().zip(split.iter()) {
            assert_eq!(a.value, b.value);
            assert_eq!(a.active, b.active);
            assert_eq!(a.whole, b.whole);
        }
    }

    #[test]
    fn query_locality() {
        let span = Span::new(t(1, 4), t(7, 8));
        let p = fast_from_list(vec![1, 2, 3, 4, 5]).every(3, |p| p.rev());
        for ev in p.query(&State::new(span)) {
            assert!(ev.active.begin >= span.begin && ev.active.end <= span.end);
        }
    }

    #[test]
    fn timecat_weights() {
        let p = timecat(vec![
            (t(1, 1), pure("a")),
            (t(1, 2), pure("b")),
            (t(1, 2), pure("c")),
        ]);
        let events = p.first_cycle();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].value, "a");
        assert_eq!(events[0].whole, Some(Span::new(t(0, 1), t(1, 2))));
        assert_eq!(events[1].value, "b");
        assert_eq!(events[1].whole, Some(Span::new(t(1, 2), t(3, 4))));
        assert_eq!(events[2].value, "c");
        assert_eq!(events[2].whole, Some(Span::new(t(3, 4), t(1, 1))));
    }

    #[test]
    fn timecat_equal_weights_is_fastcat() {
        let p = timecat(vec![
            (t(1, 1), pure(1)),
            (t(1, 1), pure(2)),
            (t(1, 1), pure(3)),
        ]);
        let q = fast_from_list(vec![1, 2, 3]);
        let ep = p.first_cycle();
        let eq = q.first_cycle();
        assert_eq!(ep.len(), eq.len());
        for (a, b) in ep.iter().zip(eq.iter()) {
            assert_eq!(a.value, b.value);
            assert_eq!(a.active, b.active);
            assert_eq!(a.whole, b.whole);
        }
    }

    #[test]
    fn zoom_identity() {
        let p = fast_from_list(vec![1, 2, 3]).zoom(t(0, 1), t(1, 1));
        let q = fast_from_list(vec![1, 2, 3]);
        let ep = p.first_cycle();
        let eq = q.first_cycle();
        assert_eq!(ep.len(), eq.len());
        for (a, b) in ep.iter().zip(eq.iter()) {
            assert_eq!(a.active, b.active);
            assert_eq!(a.whole, b.whole);
        }
    }

    #[test]
    fn zoom_half() {
        // Zooming into the first half of "a b" plays "a" across the cycle.
        let p = fast_from_list(vec!["a", "b"]).zoom(t(0, 1), t(1, 2));
        let events = p.first_cycle();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].value, "a");
        assert_eq!(events[0].whole, Some(Span::new(t(0, 1), t(1, 1))));
    }

    #[test]
    fn compress_squashes_into_window() {
        let p = fast_from_list(vec!["a", "b"]).compress(t(1, 4), t(3, 4));
        let events = p.first_cycle();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].whole, Some(Span::new(t(1, 4), t(1, 2))));
        assert_eq!(events[1].whole, Some(Span::new(t(1, 2), t(3, 4))));
        // Nothing outside the window.
        for ev in &events {
            assert!(ev.active.begin >= t(1, 4) && ev.active.end <= t(3, 4));
        }
    }

    #[test]
    fn compress_agrees_with_zoom_on_window() {
        // compress(a, b, zoom(a, b, p)) matches p inside [a, b).
        let p = fast_from_list(vec![1, 2, 3, 4]);
        let (a, b) = (t(1, 4), t(3, 4));
        let round = p.clone().zoom(a, b).compress(a, b);
        let window = Span::new(a, b);
        let mut direct: Vec<_> = p
            .query(&State::new(window))
            .into_iter()
            .filter(|e| e.has_onset())
            .collect();
        let mut trip: Vec<_> = round
            .query(&State::new(window))
            .into_iter()
            .filter(|e| e.has_onset())
            .collect();
        crate::event::sort_events(&mut direct);
        crate::event::sort_events(&mut trip);
        assert_eq!(direct.len(), trip.len());
        for (x, y) in direct.iter().zip(trip.iter()) {
            assert_eq!(x.value, y.value);
            assert_eq!(x.active.begin, y.active.begin);
        }
    }

    #[test]
    fn compress_invalid_bounds() {
        assert!(pure(1).compress(t(3, 4), t(1, 4)).first_cycle().is_empty());
        assert!(pure(1).compress(t(1, 4), t(1, 4)).first_cycle().is_empty());
        assert!(pure(1).compress(t(-1, 4), t(1, 2)).first_cycle().is_empty());
    }

    #[test]
    fn fast_gap_leaves_silence() {
        let p = fast_from_list(vec!["a", "b"]).fast_gap(t(2, 1));
        let events = p.first_cycle();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].whole, Some(Span::new(t(0, 1), t(1, 4))));
        assert_eq!(events[1].whole, Some(Span::new(t(1, 4), t(1, 2))));
        // The second half of the cycle is empty.
        assert!(p.query_span(t(1, 2), t(1, 1)).is_empty());
    }

    #[test]
    fn every_transforms_the_last_cycle_of_each_group() {
        let p = fast_from_list(vec!["a", "b"]).every(2, |p| p.fast(t(2, 1)));
        assert_eq!(p.query_span(t(0, 1), t(1, 1)).len(), 2);
        assert_eq!(p.query_span(t(1, 1), t(2, 1)).len(), 4);
        assert_eq!(p.query_span(t(2, 1), t(3, 1)).len(), 2);
    }

    #[test]
    fn every_first_transforms_the_first_cycle() {
        let p = fast_from_list(vec!["a", "b"]).every_first(2, |p| p.fast(t(2, 1)));
        assert_eq!(p.query_span(t(0, 1), t(1, 1)).len(), 4);
        assert_eq!(p.query_span(t(1, 1), t(2, 1)).len(), 2);
    }

    #[test]
    fn when_applies_where_true() {
        let bools = fast_from_list(vec![true, false]);
        let p = pure("x").when(bools, |p| p.fmap(|_| "y"));
        let mut values = sorted_values(&p);
        values.sort();
        assert_eq!(values, vec!["x", "y"]);
        let events = p.first_cycle();
        for ev in events {
            if ev.value == "y" {
                assert!(ev.active.end <= t(1, 2));
            } else {
                assert!(ev.active.begin >= t(1, 2));
            }
        }
    }

    #[test]
    fn struct_takes_timing_from_bools() {
        let bools = fast_from_list(vec![true, false, true, true]);
        let p = struct_(bools, pure("x"));
        let events = p.first_cycle();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].active.begin, t(0, 1));
        assert_eq!(events[1].active.begin, t(1, 2));
        assert_eq!(events[2].active.begin, t(3, 4));
        // The boolean pattern's whole survives.
        assert_eq!(events[0].whole, Some(Span::new(t(0, 1), t(1, 4))));
    }

    #[test]
    fn mask_crops_to_true_spans() {
        let bools = fast_from_list(vec![true, false]);
        let p = mask(bools, pure("x"));
        let events = p.first_cycle();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].active, Span::new(t(0, 1), t(1, 2)));
        // The whole is untouched.
        assert_eq!(events[0].whole, Some(Span::new(t(0, 1), t(1, 1))));
    }

    #[test]
    fn bjorklund_tresillo() {
        assert_eq!(
            bjorklund(3, 8),
            vec![true, false, false, true, false, false, true, false]
        );
        assert_eq!(
            bjorklund(5, 8),
            vec![true, false, true, true, false, true, true, false]
        );
        assert_eq!(
            bjorklund(4, 12),
            vec![
                true, false, false, true, false, false, true, false, false, true, false,
                false
            ]
        );
    }

    #[test]
    fn euclid_bool_counts() {
        for (n, k) in [(3i64, 8i64), (5, 8), (7, 16), (1, 4), (4, 4)] {
            let trues = euclid_bool(n, k)
                .first_cycle()
                .into_iter()
                .filter(|e| e.value)
                .count() as i64;
            let total = euclid_bool(n, k).first_cycle().len() as i64;
            assert_eq!(trues, n);
            assert_eq!(total, k);
        }
    }

    #[test]
    fn euclid_three_eight_positions() {
        let p = pure("x").euclid(3, 8);
        let events = p.first_cycle();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].active.begin, t(0, 1));
        assert_eq!(events[1].active.begin, t(3, 8));
        assert_eq!(events[2].active.begin, t(6, 8));
        assert!(events.iter().all(|e| e.value == "x"));
    }

    #[test]
    fn euclid_inv_sounds_the_rests() {
        let p = pure("x").euclid_inv(3, 8);
        assert_eq!(p.first_cycle().len(), 5);
    }

    #[test]
    fn euclid_off_rotates() {
        let p = pure("x").euclid_off(3, 8, 3);
        let events = p.first_cycle();
        assert_eq!(events.len(), 3);
        // Rotating tresillo left by three steps starts it on the old second
        // pulse.
        assert_eq!(events[0].active.begin, t(0, 1));
        assert_eq!(events[1].active.begin, t(3, 8));
        assert_eq!(events[2].active.begin, t(5, 8));
    }

    #[test]
    fn app_left_takes_left_structure() {
        let funcs = fast_from_list(vec![10i64, 20]).fmap(|n| move |v: i64| n + v);
        let p = app_left(funcs, pure(1i64));
        let events = p.first_cycle();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].value, 11);
        assert_eq!(events[1].value, 21);
        assert_eq!(events[0].whole, Some(Span::new(t(0, 1), t(1, 2))));
    }

    #[test]
    fn app_right_takes_right_structure() {
        let funcs = pure(10i64).fmap(|n| move |v: i64| n + v);
        let p = app_right(funcs, fast_from_list(vec![1i64, 2]));
        let events = p.first_cycle();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].value, 11);
        assert_eq!(events[1].value, 12);
        assert_eq!(events[1].whole, Some(Span::new(t(1, 2), t(1, 1))));
    }

    #[test]
    fn app_both_intersects() {
        let funcs = fast_from_list(vec![10i64, 20]).fmap(|n| move |v: i64| n + v);
        let p = app_both(funcs, fast_from_list(vec![1i64, 2, 3]));
        let events = p.first_cycle();
        // 2 against 3 gives four fragments.
        assert_eq!(events.len(), 4);
    }

    #[test]
    fn inner_join_structure_from_outer() {
        let p = fast_from_list(vec![0i64, 1])
            .fmap(|i| fast_from_list(vec![i * 10, i * 10 + 1]))
            .inner_join();
        let events = p.first_cycle();
        // Two outer events, each sampling the inner pattern at its onset.
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].whole, Some(Span::new(t(0, 1), t(1, 2))));
        assert_eq!(events[0].value, 0);
        assert_eq!(events[1].whole, Some(Span::new(t(1, 2), t(1, 1))));
        // The inner pattern is sampled at the outer onset: halfway through
        // the cycle, its second element is playing.
        assert_eq!(events[1].value, 11);
    }

    #[test]
    fn outer_join_structure_from_inner() {
        let p = pure(())
            .fmap(|_| fast_from_list(vec![1, 2]))
            .outer_join();
        let events = p.first_cycle();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].whole, Some(Span::new(t(0, 1), t(1, 2))));
        assert_eq!(events[1].whole, Some(Span::new(t(1, 2), t(1, 1))));
    }

    #[test]
    fn squeeze_join_nests_cycles() {
        let p = fast_from_list(vec![0i64, 1])
            .fmap(|i| fast_from_list(vec![i, i + 10]))
            .squeeze_join();
        let events = p.first_cycle();
        assert_eq!(events.len(), 4);
        assert_eq!(events[0].active.begin, t(0, 1));
        assert_eq!(events[1].active.begin, t(1, 4));
        assert_eq!(events[2].active.begin, t(1, 2));
        assert_eq!(events[3].active.begin, t(3, 4));
        let values: Vec<i64> = events.into_iter().map(|e| e.value).collect();
        assert_eq!(values, vec![0, 10, 1, 11]);
    }

    #[test]
    fn trig0_join_restarts_at_onset() {
        // The inner two-step sequence restarts at the offset onset.
        let p = pure(()).late(t(1, 4)).fmap(|_| fast_from_list(vec![7i64, 8]));
        let events = p.clone().trig0_join().query_span(t(1, 4), t(5, 4));
        let onsets: Vec<Time> = events
            .iter()
            .filter(|e| e.has_onset())
            .map(|e| e.active.begin)
            .collect();
        assert!(onsets.contains(&t(1, 4)));
        assert!(onsets.contains(&t(3, 4)));
    }

    #[test]
    fn ply_repeats_events() {
        let p = fast_from_list(vec!["a", "b"]).ply(2);
        let events = p.first_cycle();
        assert_eq!(events.len(), 4);
        let values: Vec<&str> = events.iter().map(|e| e.value).collect();
        assert_eq!(values, vec!["a", "a", "b", "b"]);
    }

    #[test]
    fn iter_rotates_each_cycle() {
        let p = fast_from_list(vec!["a", "b", "c"]).iter(3);
        assert_eq!(p.query_span(t(0, 1), t(1, 1))[0].value, "a");
        let mut second = p.query_span(t(1, 1), t(2, 1));
        crate::event::sort_events(&mut second);
        assert_eq!(second[0].value, "b");
    }

    #[test]
    fn linger_repeats_the_head() {
        let p = fast_from_list(vec![0, 1, 2, 3, 4, 5, 6, 7]).linger(t(1, 4));
        assert_eq!(sorted_values(&p), vec![0, 1, 0, 1, 0, 1, 0, 1]);
    }

    #[test]
    fn palindrome_alternates_direction() {
        let p = fast_from_list(vec!["a", "b"]).palindrome();
        assert_eq!(p.first_cycle_values(), vec!["a", "b"]);
        let mut second = p.query_span(t(1, 1), t(2, 1));
        crate::event::sort_events(&mut second);
        let values: Vec<&str> = second.into_iter().map(|e| e.value).collect();
        assert_eq!(values, vec!["b", "a"]);
    }

    #[test]
    fn superimpose_layers() {
        let p = pure(1).superimpose(|p| p.fmap(|x| x + 1));
        let mut values = sorted_values(&p);
        values.sort();
        assert_eq!(values, vec![1, 2]);
    }

    #[test]
    fn off_shifts_the_copy() {
        let p = pure(30).off(t(1, 4), |p| p.fmap(|x| x + 2));
        let values = sorted_values(&p);
        assert!(values.contains(&30));
        assert!(values.contains(&32));
    }

    #[test]
    fn segment_discretizes() {
        let p = crate::signal::saw().segment(t(4, 1));
        let events = p.first_cycle();
        assert_eq!(events.len(), 4);
        assert!(events.iter().all(|e| e.whole.is_some()));
    }

    #[test]
    fn run_counts() {
        assert_eq!(run(4).first_cycle_values(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn from_list_cycles() {
        let p = from_list(vec!["a", "b"]);
        assert_eq!(p.query_span(t(0, 1), t(1, 1))[0].value, "a");
        assert_eq!(p.query_span(t(1, 1), t(2, 1))[0].value, "b");
    }

    #[test]
    fn negative_time_queries_are_defined() {
        let p = fast_from_list(vec!["a", "b"]).every(2, |p| p.rev());
        let events = p.query_span(t(-2, 1), t(0, 1));
        assert_eq!(events.len(), 4);
        for ev in &events {
            assert!(ev.active.begin >= t(-2, 1));
            assert!(ev.active.end <= t(0, 1));
        }
    }
}

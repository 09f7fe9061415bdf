//! Continuous signals and time-seeded randomness.
//!
//! Signals are patterns without discrete structure: every query returns one
//! continuous event per cycle slice, valued at the slice midpoint. All
//! randomness here is a pure function of query time, so identical queries
//! replay identically; there is no hidden generator state.

use crate::pattern::{silence, Pattern};
use crate::time::Time;

/// A deterministic pseudo-random value in `[0, 1)` for a point in time.
///
/// Hashes the exact rational, so equal times hash equally regardless of how
/// they were computed.
pub fn time_rand(t: Time) -> f64 {
    let mut z = (t.numer() as u64)
        .wrapping_mul(0x9E37_79B9_7F4A_7C15)
        ^ (t.denom() as u64).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^= z >> 31;
    (z >> 11) as f64 / (1u64 << 53) as f64
}

/// A continuous pattern sampling `f` at the midpoint of each queried cycle
/// slice. The events carry no whole.
pub fn signal<T, F>(f: F) -> Pattern<T>
where
    T: Clone + Send + Sync + 'static,
    F: Fn(Time) -> T + Send + Sync + 'static,
{
    Pattern::new(move |state| {
        state
            .span
            .split_cycles()
            .into_iter()
            .map(|sub| crate::event::Event::continuous(sub, f(sub.midpoint())))
            .collect()
    })
}

/// A continuous constant.
pub fn steady<T: Clone + Send + Sync + 'static>(value: T) -> Pattern<T> {
    signal(move |_| value.clone())
}

/// The current cycle time, as a continuous pattern. Unlike [`saw`] this is
/// monotonic: it does not wrap at cycle boundaries.
pub fn time_pat() -> Pattern<Time> {
    signal(|t| t)
}

/// Sawtooth from 0 to 1 over each cycle.
pub fn saw() -> Pattern<f64> {
    signal(|t| t.cycle_pos().as_f64())
}

/// Inverted sawtooth: 1 down to 0 over each cycle.
pub fn isaw() -> Pattern<f64> {
    saw().fmap(|x| 1.0 - x)
}

/// Sine wave scaled to `[0, 1]`.
pub fn sine() -> Pattern<f64> {
    saw().fmap(|x| ((x * std::f64::consts::TAU).sin() + 1.0) / 2.0)
}

/// Cosine wave scaled to `[0, 1]`.
pub fn cosine() -> Pattern<f64> {
    saw().fmap(|x| ((x * std::f64::consts::TAU).cos() + 1.0) / 2.0)
}

/// Triangle wave: 0 to 1 and back, once per cycle.
pub fn tri() -> Pattern<f64> {
    saw().fmap(|x| 1.0 - (2.0 * x - 1.0).abs())
}

/// Square wave: 0 for the first half of each cycle, 1 for the second.
pub fn square() -> Pattern<f64> {
    saw().fmap(|x| if x < 0.5 { 0.0 } else { 1.0 })
}

/// Uniform noise in `[0, 1)`, freshly sampled at every point in time.
pub fn rand() -> Pattern<f64> {
    signal(time_rand)
}

/// Smooth noise: interpolates between random values anchored at cycle
/// boundaries.
pub fn perlin() -> Pattern<f64> {
    signal(|t| {
        let floor = t.sam();
        let a = time_rand(floor);
        let b = time_rand(floor + Time::one());
        let x = (t - floor).as_f64();
        // Smootherstep easing between the two anchors.
        let s = x * x * x * (x * (x * 6.0 - 15.0) + 10.0);
        a + s * (b - a)
    })
}

/// Scale a `[0, 1]` signal into `[min, max]`.
pub fn range(min: f64, max: f64, pat: Pattern<f64>) -> Pattern<f64> {
    pat.fmap(move |x| min + x * (max - min))
}

/// Continuous random selection from `values`, re-drawn at every point in
/// time. Use [`Pattern::segment`] to discretize, e.g.
/// `choose(xs).segment(n)`.
pub fn choose<T: Clone + Send + Sync + 'static>(values: Vec<T>) -> Pattern<T> {
    choose_with(rand(), values)
}

/// Select from `values` by a `[0, 1)` selector signal.
pub fn choose_with<T: Clone + Send + Sync + 'static>(
    selector: Pattern<f64>,
    values: Vec<T>,
) -> Pattern<T> {
    if values.is_empty() {
        return silence();
    }
    let len = values.len();
    selector.fmap(move |x| {
        let i = ((x * len as f64) as usize).min(len - 1);
        values[i].clone()
    })
}

/// Weighted continuous random selection.
pub fn wchoose<T: Clone + Send + Sync + 'static>(weighted: Vec<(T, f64)>) -> Pattern<T> {
    let total: f64 = weighted.iter().map(|(_, w)| w.max(0.0)).sum();
    if weighted.is_empty() || total <= 0.0 {
        return silence();
    }
    rand().fmap(move |x| {
        let mut target = x * total;
        for (value, weight) in &weighted {
            let w = weight.max(0.0);
            if target < w {
                return value.clone();
            }
            target -= w;
        }
        weighted[weighted.len() - 1].0.clone()
    })
}

/// One random selection per cycle, held for the whole cycle.
pub fn cycle_choose<T: Clone + Send + Sync + 'static>(values: Vec<T>) -> Pattern<T> {
    choose(values).segment(Time::one())
}

impl<T: Clone + Send + Sync + 'static> Pattern<T> {
    /// Randomly drop events: each event survives when the random value at
    /// its onset is at least `amount`, so an `amount` share is dropped.
    pub fn degrade_by(self, amount: f64) -> Self {
        self.filter_events(move |ev| time_rand(ev.whole_or_active().begin) >= amount)
    }

    /// The complement of [`degrade_by`](Self::degrade_by): keeps exactly the
    /// events that `degrade_by` with the same amount would drop.
    pub fn undegrade_by(self, amount: f64) -> Self {
        self.filter_events(move |ev| time_rand(ev.whole_or_active().begin) < amount)
    }

    /// Drop half of the events.
    pub fn degrade(self) -> Self {
        self.degrade_by(0.5)
    }

    /// Apply `f` to a random `amount` share of events, leaving the rest as
    /// they are.
    pub fn sometimes_by<F>(self, amount: f64, f: F) -> Self
    where
        F: FnOnce(Self) -> Self,
    {
        crate::pattern::overlay(
            self.clone().degrade_by(amount),
            f(self.undegrade_by(amount)),
        )
    }

    pub fn sometimes<F>(self, f: F) -> Self
    where
        F: FnOnce(Self) -> Self,
    {
        self.sometimes_by(0.5, f)
    }

    pub fn often<F>(self, f: F) -> Self
    where
        F: FnOnce(Self) -> Self,
    {
        self.sometimes_by(0.75, f)
    }

    pub fn rarely<F>(self, f: F) -> Self
    where
        F: FnOnce(Self) -> Self,
    {
        self.sometimes_by(0.25, f)
    }

    pub fn almost_always<F>(self, f: F) -> Self
    where
        F: FnOnce(Self) -> Self,
    {
        self.sometimes_by(0.9, f)
    }

    pub fn almost_never<F>(self, f: F) -> Self
    where
        F: FnOnce(Self) -> Self,
    {
        self.sometimes_by(0.1, f)
    }

    pub fn always<F>(self, f: F) -> Self
    where
        F: FnOnce(Self) -> Self,
    {
        f(self)
    }

    pub fn never<F>(self, _f: F) -> Self
    where
        F: FnOnce(Self) -> Self,
    {
        self
    }
}

//! Exact rational time, measured in cycles.
//!
//! One cycle is the fundamental repeating unit of the pattern system.
//! `Time` wraps a rational number so that sub-cycle positions are exact;
//! floating point only appears at the wall-clock boundary, never inside
//! pattern arithmetic.

use num_integer::Integer;
use num_rational::Rational64;
use num_traits::{One, Signed, Zero};
use std::cmp::Ordering;
use std::ops::{Add, Div, Mul, Neg, Rem, Sub};

/// A point in time (or a duration) counted in cycles from the origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Time(Rational64);

impl Time {
    pub fn new(numer: i64, denom: i64) -> Self {
        Time(Rational64::new(numer, denom))
    }

    pub fn int(n: i64) -> Self {
        Time(Rational64::from_integer(n))
    }

    /// The start of the cycle containing this time ("sam" in Tidal parlance).
    pub fn sam(&self) -> Self {
        Time(Rational64::from_integer(self.0.floor().to_integer()))
    }

    /// The start of the next cycle.
    pub fn next_sam(&self) -> Self {
        self.sam() + Time::one()
    }

    /// Position within the current cycle, in `[0, 1)`.
    pub fn cycle_pos(&self) -> Self {
        *self - self.sam()
    }

    /// The integer index of the cycle containing this time.
    ///
    /// Uses the floor, so negative times land in negative cycles.
    pub fn cycle(&self) -> i64 {
        self.0.floor().to_integer()
    }

    pub fn floor(&self) -> Self {
        self.sam()
    }

    pub fn ceil(&self) -> Self {
        Time(Rational64::from_integer(self.0.ceil().to_integer()))
    }

    pub fn min(self, other: Self) -> Self {
        if self < other {
            self
        } else {
            other
        }
    }

    pub fn max(self, other: Self) -> Self {
        if self > other {
            self
        } else {
            other
        }
    }

    pub fn abs(&self) -> Self {
        Time(self.0.abs())
    }

    pub fn recip(&self) -> Self {
        Time(self.0.recip())
    }

    pub fn zero() -> Self {
        Time(Rational64::zero())
    }

    pub fn one() -> Self {
        Time(Rational64::one())
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn is_negative(&self) -> bool {
        self.0.is_negative()
    }

    pub fn numer(&self) -> i64 {
        *self.0.numer()
    }

    pub fn denom(&self) -> i64 {
        *self.0.denom()
    }

    /// Convert to floating point. Only for the wall-clock edge.
    pub fn as_f64(&self) -> f64 {
        *self.0.numer() as f64 / *self.0.denom() as f64
    }
}

impl Default for Time {
    fn default() -> Self {
        Time::zero()
    }
}

impl From<i64> for Time {
    fn from(n: i64) -> Self {
        Time::int(n)
    }
}

impl From<i32> for Time {
    fn from(n: i32) -> Self {
        Time::int(n as i64)
    }
}

impl From<(i64, i64)> for Time {
    fn from((n, d): (i64, i64)) -> Self {
        Time::new(n, d)
    }
}

impl From<Rational64> for Time {
    fn from(r: Rational64) -> Self {
        Time(r)
    }
}

impl From<f64> for Time {
    /// Approximate a float as a rational with a bounded denominator.
    ///
    /// Used when ingesting wall-clock seconds; the mediant walk keeps the
    /// denominator small enough that downstream arithmetic cannot overflow.
    fn from(f: f64) -> Self {
        const MAX_DENOM: i64 = 1_000_000;

        if f.is_nan() || f.is_infinite() {
            return Time::zero();
        }

        let sign = if f < 0.0 { -1 } else { 1 };
        let f_abs = f.abs();
        let int_part = f_abs.floor() as i64;
        let target = f_abs - int_part as f64;

        if target < 1e-12 {
            return Time::int(sign * int_part);
        }

        // Stern-Brocot walk toward the fractional part.
        let (mut lo_n, mut lo_d) = (0i64, 1i64);
        let (mut hi_n, mut hi_d) = (1i64, 1i64);
        let (mut best_n, mut best_d) = (0i64, 1i64);
        let mut best_err = target;

        loop {
            let med_n = lo_n + hi_n;
            let med_d = lo_d + hi_d;
            if med_d > MAX_DENOM {
                break;
            }
            let med = med_n as f64 / med_d as f64;
            let err = (med - target).abs();
            if err < best_err {
                best_err = err;
                best_n = med_n;
                best_d = med_d;
            }
            if err < 1e-12 {
                break;
            }
            if med < target {
                lo_n = med_n;
                lo_d = med_d;
            } else {
                hi_n = med_n;
                hi_d = med_d;
            }
        }

        Time::new(sign * (int_part * best_d + best_n), best_d)
    }
}

impl Add for Time {
    type Output = Self;
    fn add(self, other: Self) -> Self {
        Time(self.0 + other.0)
    }
}

impl Sub for Time {
    type Output = Self;
    fn sub(self, other: Self) -> Self {
        Time(self.0 - other.0)
    }
}

impl Mul for Time {
    type Output = Self;
    fn mul(self, other: Self) -> Self {
        Time(self.0 * other.0)
    }
}

impl Div for Time {
    type Output = Self;
    fn div(self, other: Self) -> Self {
        Time(self.0 / other.0)
    }
}

impl Rem for Time {
    type Output = Self;
    fn rem(self, other: Self) -> Self {
        Time(self.0 % other.0)
    }
}

impl Neg for Time {
    type Output = Self;
    fn neg(self) -> Self {
        Time(-self.0)
    }
}

impl PartialOrd for Time {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Time {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl std::fmt::Display for Time {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.denom() == 1 {
            write!(f, "{}", self.numer())
        } else {
            write!(f, "{}/{}", self.numer(), self.denom())
        }
    }
}

/// Least common multiple of a slice of times, used for period computation.
pub fn lcm(times: &[Time]) -> Option<Time> {
    if times.is_empty() {
        return None;
    }
    let mut acc = times[0].0;
    for t in &times[1..] {
        let numer = acc.numer().lcm(t.0.numer());
        let denom = acc.denom().gcd(t.0.denom());
        acc = Rational64::new(numer, denom);
    }
    Some(Time(acc))
}

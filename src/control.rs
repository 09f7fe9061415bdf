//! Named-parameter patterns and their combination operators.
//!
//! A control pattern is a `Pattern<ControlMap>`: each event carries a map of
//! named parameters destined for a target. Builders like [`sound`] and
//! [`note`] lift plain value patterns into control patterns; the operator
//! methods merge control patterns the way `#` and friends do in the
//! notation.

use crate::event::Event;
use crate::pattern::{app_both, app_left, app_right, Join, Pattern};
use crate::span::Span;
use crate::state::State;
use crate::time::Time;
use crate::value::{ControlMap, Value};

/// Lift a value pattern into a single-entry control pattern.
pub fn ctrl(name: &str, pat: Pattern<Value>) -> Pattern<ControlMap> {
    let name = name.to_string();
    pat.fmap(move |v| {
        let mut map = ControlMap::new();
        map.insert(name.clone(), v);
        map
    })
}

/// Lift a float pattern into a control pattern.
pub fn ctrl_f(name: &str, pat: Pattern<f64>) -> Pattern<ControlMap> {
    ctrl(name, pat.fmap(Value::Double))
}

/// Lift an integer pattern into a control pattern.
pub fn ctrl_i(name: &str, pat: Pattern<i32>) -> Pattern<ControlMap> {
    ctrl(name, pat.fmap(Value::Int))
}

/// Lift a string pattern into a control pattern.
pub fn ctrl_s(name: &str, pat: Pattern<String>) -> Pattern<ControlMap> {
    ctrl(name, pat.fmap(Value::Str))
}

/// The `s` (sound) control. A `name:index` value splits into the sound
/// name and an `n` sample index.
pub fn sound(pat: Pattern<Value>) -> Pattern<ControlMap> {
    pat.fmap(|v| {
        let mut map = ControlMap::new();
        match v {
            Value::Str(s) => match s.split_once(':') {
                Some((name, index)) => {
                    map.insert("s".into(), Value::Str(name.to_string()));
                    if let Ok(i) = index.parse::<i32>() {
                        map.insert("n".into(), Value::Int(i));
                    }
                }
                None => {
                    map.insert("s".into(), Value::Str(s));
                }
            },
            other => {
                map.insert("s".into(), other);
            }
        }
        map
    })
}

macro_rules! controls {
    ($($(#[$doc:meta])* $fn_name:ident => $key:literal),* $(,)?) => {
        $(
            $(#[$doc])*
            pub fn $fn_name(pat: Pattern<Value>) -> Pattern<ControlMap> {
                ctrl($key, pat)
            }
        )*
    };
}

controls! {
    /// Sample index within the sound bank.
    n => "n",
    /// Pitch as a MIDI-ish note number, 0 = middle.
    note => "note",
    gain => "gain",
    pan => "pan",
    /// Playback speed of the sample.
    speed => "speed",
    /// Oscillator frequency for synths.
    freq => "freq",
    /// Effect bus selector.
    orbit => "orbit",
    /// Low-pass filter cutoff.
    cutoff => "cutoff",
    resonance => "resonance",
    /// High-pass filter cutoff.
    hcutoff => "hcutoff",
    hresonance => "hresonance",
    room => "room",
    size => "size",
    dry => "dry",
    delay => "delay",
    delaytime => "delaytime",
    delayfeedback => "delayfeedback",
    attack => "attack",
    hold => "hold",
    release => "release",
    sustain => "sustain",
    legato => "legato",
    shape => "shape",
    coarse => "coarse",
    crush => "crush",
    vowel => "vowel",
    channel => "channel",
    cut => "cut",
    accelerate => "accelerate",
    /// Sample start position, 0 to 1.
    begin => "begin",
    /// Sample end position, 0 to 1.
    end => "end",
    /// Per-event send-time offset in seconds.
    nudge => "nudge",
    unit => "unit",
    squiz => "squiz",
}

// ----------------------------------------------------------------------
// Value arithmetic
// ----------------------------------------------------------------------

fn lift_f(f: fn(f64, f64) -> f64) -> impl Fn(&Value, &Value) -> Option<Value> {
    move |a, b| Some(Value::Double(f(a.as_f()?, b.as_f()?)))
}

pub fn value_add(a: &Value, b: &Value) -> Value {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => Value::Int(x.wrapping_add(*y)),
        (Value::Rational(x), Value::Rational(y)) => Value::Rational(*x + *y),
        (Value::Str(x), Value::Str(y)) => Value::Str(format!("{}{}", x, y)),
        _ => lift_f(|x, y| x + y)(a, b).unwrap_or_else(|| b.clone()),
    }
}

pub fn value_sub(a: &Value, b: &Value) -> Value {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => Value::Int(x.wrapping_sub(*y)),
        (Value::Rational(x), Value::Rational(y)) => Value::Rational(*x - *y),
        _ => lift_f(|x, y| x - y)(a, b).unwrap_or_else(|| b.clone()),
    }
}

pub fn value_mul(a: &Value, b: &Value) -> Value {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => Value::Int(x.wrapping_mul(*y)),
        (Value::Rational(x), Value::Rational(y)) => Value::Rational(*x * *y),
        _ => lift_f(|x, y| x * y)(a, b).unwrap_or_else(|| b.clone()),
    }
}

/// Division leaves the left value untouched when the divisor is zero; a
/// pattern-level division by zero must not take the tick loop down.
pub fn value_div(a: &Value, b: &Value) -> Value {
    if b.as_f() == Some(0.0) {
        return a.clone();
    }
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => Value::Int(x.wrapping_div(*y)),
        (Value::Rational(x), Value::Rational(y)) => Value::Rational(*x / *y),
        _ => lift_f(|x, y| x / y)(a, b).unwrap_or_else(|| b.clone()),
    }
}

/// Union where the right map wins on key clashes.
pub fn union_right(mut left: ControlMap, right: &ControlMap) -> ControlMap {
    for (k, v) in right {
        left.insert(k.clone(), v.clone());
    }
    left
}

/// Union where the left map wins on key clashes.
pub fn union_left(mut left: ControlMap, right: &ControlMap) -> ControlMap {
    for (k, v) in right {
        left.entry(k.clone()).or_insert_with(|| v.clone());
    }
    left
}

/// Union combining clashing keys with `f`.
pub fn union_with(
    mut left: ControlMap,
    right: &ControlMap,
    f: impl Fn(&Value, &Value) -> Value,
) -> ControlMap {
    for (k, v) in right {
        match left.get(k) {
            Some(existing) => {
                let combined = f(existing, v);
                left.insert(k.clone(), combined);
            }
            None => {
                left.insert(k.clone(), v.clone());
            }
        }
    }
    left
}

/// Which operand's event structure survives a binary control operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Structure {
    Left,
    Right,
    Both,
}

impl Pattern<ControlMap> {
    fn combine_maps<F>(self, other: Self, structure: Structure, f: F) -> Self
    where
        F: Fn(ControlMap, &ControlMap) -> ControlMap + Clone + Send + Sync + 'static,
    {
        let funcs = self.fmap(move |a| {
            let f = f.clone();
            move |b: ControlMap| f(a.clone(), &b)
        });
        match structure {
            Structure::Left => app_left(funcs, other),
            Structure::Right => app_right(funcs, other),
            Structure::Both => app_both(funcs, other),
        }
    }

    /// The `#` operator: merge with structure from the left, right values
    /// winning on key clashes.
    pub fn merge_right(self, other: Self) -> Self {
        self.combine_maps(other, Structure::Left, |a, b| union_right(a, b))
    }

    /// Merge with structure from the left, left values winning.
    pub fn merge_left(self, other: Self) -> Self {
        self.combine_maps(other, Structure::Left, |a, b| union_left(a, b))
    }

    /// Merge aligned by this pattern's preferred join strategy, combining
    /// clashing keys with `f`.
    pub fn merge_with<F>(self, other: Self, f: F) -> Self
    where
        F: Fn(&Value, &Value) -> Value + Clone + Send + Sync + 'static,
    {
        let structure = match self.join_strategy() {
            Join::Inner => Structure::Left,
            Join::Outer => Structure::Right,
            _ => Structure::Both,
        };
        self.combine_maps(other, structure, move |a, b| union_with(a, b, &f))
    }

    pub fn add_left(self, other: Self) -> Self {
        self.combine_maps(other, Structure::Left, |a, b| union_with(a, b, value_add))
    }

    pub fn add_right(self, other: Self) -> Self {
        self.combine_maps(other, Structure::Right, |a, b| union_with(a, b, value_add))
    }

    pub fn add_both(self, other: Self) -> Self {
        self.combine_maps(other, Structure::Both, |a, b| union_with(a, b, value_add))
    }

    pub fn sub_left(self, other: Self) -> Self {
        self.combine_maps(other, Structure::Left, |a, b| union_with(a, b, value_sub))
    }

    pub fn sub_right(self, other: Self) -> Self {
        self.combine_maps(other, Structure::Right, |a, b| union_with(a, b, value_sub))
    }

    pub fn sub_both(self, other: Self) -> Self {
        self.combine_maps(other, Structure::Both, |a, b| union_with(a, b, value_sub))
    }

    pub fn mul_left(self, other: Self) -> Self {
        self.combine_maps(other, Structure::Left, |a, b| union_with(a, b, value_mul))
    }

    pub fn mul_right(self, other: Self) -> Self {
        self.combine_maps(other, Structure::Right, |a, b| union_with(a, b, value_mul))
    }

    pub fn mul_both(self, other: Self) -> Self {
        self.combine_maps(other, Structure::Both, |a, b| union_with(a, b, value_mul))
    }

    pub fn div_left(self, other: Self) -> Self {
        self.combine_maps(other, Structure::Left, |a, b| union_with(a, b, value_div))
    }

    pub fn div_right(self, other: Self) -> Self {
        self.combine_maps(other, Structure::Right, |a, b| union_with(a, b, value_div))
    }

    pub fn div_both(self, other: Self) -> Self {
        self.combine_maps(other, Structure::Both, |a, b| union_with(a, b, value_div))
    }
}

// ----------------------------------------------------------------------
// Live control accessors
// ----------------------------------------------------------------------

fn control_signal<T, F>(name: &str, f: F) -> Pattern<T>
where
    T: Clone + Send + Sync + 'static,
    F: Fn(Option<&Value>) -> T + Send + Sync + 'static,
{
    let name = name.to_string();
    Pattern::new(move |state| {
        let value = f(state.control(&name));
        state
            .span
            .split_cycles()
            .into_iter()
            .map(|sub| Event::continuous(sub, value.clone()))
            .collect()
    })
}

/// Read a live control as a float signal.
pub fn cf(name: &str, default: f64) -> Pattern<f64> {
    control_signal(name, move |v| {
        v.and_then(|v| v.as_f()).unwrap_or(default)
    })
}

/// Read a live control as an integer signal.
pub fn ci(name: &str, default: i32) -> Pattern<i32> {
    control_signal(name, move |v| {
        v.and_then(|v| v.as_i()).unwrap_or(default)
    })
}

/// Read a live control as a string signal.
pub fn cs(name: &str, default: &str) -> Pattern<String> {
    let default = default.to_string();
    control_signal(name, move |v| {
        v.and_then(|v| v.as_s()).unwrap_or_else(|| default.clone())
    })
}

/// Read a live control as a pattern: string values are parsed as
/// mini-notation on the fly, so a slider or editor can inject whole
/// patterns by name.
pub fn cp(name: &str, default: Pattern<Value>) -> Pattern<Value> {
    let name = name.to_string();
    Pattern::new(move |state| match state.control(&name) {
        Some(Value::Str(src)) => match crate::mini::parse(src) {
            Ok(pat) => pat.query(state),
            Err(_) => default.query(state),
        },
        Some(Value::Sig(pat)) => pat.query(state),
        Some(v) => crate::pattern::pure(v.clone()).query(state),
        None => default.query(state),
    })
}

/// Resolve signal-valued control entries to concrete values by sampling
/// them at `at`. Runs once per tick, before events are emitted.
pub fn resolve_controls(controls: &ControlMap, at: Time) -> ControlMap {
    let mut resolved = ControlMap::new();
    for (name, value) in controls {
        let value = match value {
            Value::Sig(pat) => {
                let state = State::new(Span::instant(at));
                match pat.query(&state).into_iter().next() {
                    Some(ev) => ev.value,
                    None => continue,
                }
            }
            other => other.clone(),
        };
        resolved.insert(name.clone(), value);
    }
    resolved
}

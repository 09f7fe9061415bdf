//! # riptide
//!
//! A live-coding pattern engine: the TidalCycles pattern algebra as a Rust
//! library, plus the real-time scheduler that turns patterns into
//! timestamped OSC messages.
//!
//! ## Core Concepts
//!
//! - **Pattern**: a function from a time span to the events active inside
//!   it. Patterns are immutable, infinitely long, and composed with
//!   combinators rather than rendered.
//! - **Event**: a value with an `active` span (the queried part) and an
//!   optional `whole` (the intended full duration).
//! - **Time / Span**: exact rational cycle time; one cycle is the
//!   fundamental loop length.
//! - **Stream**: the running clock, play map, and dispatcher; patterns are
//!   hot-swapped into it by name.
//!
//! ## Example
//!
//! ```rust
//! use riptide::mini::parse;
//!
//! // Compile mini-notation into a pattern.
//! let pat = parse("bd [sn cp]*2").unwrap();
//!
//! // Query the first cycle: one bd, then sn cp sn cp.
//! let events = pat.first_cycle();
//! assert_eq!(events.len(), 5);
//!
//! // Transform it like any other pattern value.
//! let doubled = pat.fast(riptide::Time::int(2));
//! assert_eq!(doubled.first_cycle().len(), 10);
//! ```
//!
//! ## Playing Patterns
//!
//! ```rust,no_run
//! use riptide::osc::Target;
//! use riptide::stream::{Config, Stream};
//!
//! let stream = Stream::start(Config::default(), vec![Target::superdirt()]).unwrap();
//! stream.replace_mini("d1", "bd(3,8) cp").unwrap();
//! stream.set_cps(riptide::Time::new(11, 20)).unwrap();
//! // ... live-code away; swaps land on the next tick.
//! stream.hush().unwrap();
//! ```

pub mod control;
pub mod error;
pub mod event;
pub mod listener;
pub mod mini;
pub mod osc;
pub mod pattern;
pub mod playmap;
pub mod signal;
pub mod span;
pub mod state;
pub mod stream;
pub mod tempo;
pub mod time;
pub mod value;

// Re-export the core types.
pub use error::{Error, ParseError, Result};
pub use event::{Context, Event, Location};
pub use pattern::{
    app_both, app_left, app_right, atom, cat, euclid_bool, fast_from_list, fastcat, from_list,
    inv, mask, overlay, pure, run, silence, slowcat, stack, struct_, timecat, Join, Pattern,
};
pub use signal::{
    choose, cosine, cycle_choose, isaw, perlin, rand, range, saw, signal, sine, square, steady,
    time_pat, time_rand, tri, wchoose,
};
pub use span::Span;
pub use state::State;
pub use stream::{Config, Stream};
pub use tempo::Tempo;
pub use time::Time;
pub use value::{ControlMap, Value};

/// Convenient glob import for live sessions and tests.
pub mod prelude {
    pub use crate::control::{
        cf, ci, cp, cs, ctrl, ctrl_f, ctrl_i, ctrl_s, gain, n, note, pan, sound, speed,
    };
    pub use crate::error::{Error, ParseError, Result};
    pub use crate::event::Event;
    pub use crate::mini::parse;
    pub use crate::osc::{ScheduleMode, Target, Template};
    pub use crate::pattern::{
        cat, fastcat, overlay, pure, silence, slowcat, stack, struct_, timecat, Pattern,
    };
    pub use crate::signal::{choose, cosine, perlin, rand, saw, sine, square, tri};
    pub use crate::span::Span;
    pub use crate::state::State;
    pub use crate::stream::{Config, Stream};
    pub use crate::time::Time;
    pub use crate::value::{ControlMap, Value};
}

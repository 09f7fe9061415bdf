//! The query state handed to patterns.
//!
//! A query asks: which events are active in this span, given these live
//! control values? Controls come from the external control listener and are
//! snapshotted once per tick.

use crate::span::Span;
use crate::value::{ControlMap, Value};

/// The state of a single pattern query.
#[derive(Debug, Clone)]
pub struct State {
    /// The span being queried.
    pub span: Span,
    /// Live control values, readable by patterns.
    pub controls: ControlMap,
}

impl State {
    pub fn new(span: Span) -> Self {
        State {
            span,
            controls: ControlMap::new(),
        }
    }

    pub fn with_controls(span: Span, controls: ControlMap) -> Self {
        State { span, controls }
    }

    /// The same controls, a different span.
    pub fn set_span(&self, span: Span) -> Self {
        State {
            span,
            controls: self.controls.clone(),
        }
    }

    pub fn with_span<F>(&self, f: F) -> Self
    where
        F: FnOnce(Span) -> Span,
    {
        self.set_span(f(self.span))
    }

    pub fn control(&self, name: &str) -> Option<&Value> {
        self.controls.get(name)
    }
}

impl From<Span> for State {
    fn from(span: Span) -> Self {
        State::new(span)
    }
}

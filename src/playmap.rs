//! The play map: named live patterns with mute/solo and rollback history.
//!
//! Each identifier owns one control pattern plus a bounded history of its
//! predecessors. Replacement probes the incoming pattern with a zero-width
//! query first, so evaluation failures surface to the caller instead of
//! inside the tick loop; failures that escape anyway are handled by rolling
//! the key back to its previous entry.

use crate::error::{Error, Result};
use crate::pattern::{silence, Pattern};
use crate::span::Span;
use crate::state::State;
use crate::time::Time;
use crate::value::ControlMap;
use std::collections::{HashMap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};

/// How many superseded patterns each key retains for rollback.
pub const HISTORY_DEPTH: usize = 8;

/// The per-identifier playback state.
pub struct PlayState {
    pub pattern: Pattern<ControlMap>,
    pub muted: bool,
    pub soloed: bool,
    history: VecDeque<Pattern<ControlMap>>,
}

impl PlayState {
    fn new(pattern: Pattern<ControlMap>) -> Self {
        PlayState {
            pattern,
            muted: false,
            soloed: false,
            history: VecDeque::new(),
        }
    }

    fn push_history(&mut self, pattern: Pattern<ControlMap>) {
        self.history.push_front(pattern);
        self.history.truncate(HISTORY_DEPTH);
    }

    /// Revert to the previous pattern, if any remains.
    fn rollback(&mut self) -> bool {
        match self.history.pop_front() {
            Some(prev) => {
                self.pattern = prev;
                true
            }
            None => {
                self.pattern = silence();
                false
            }
        }
    }
}

/// Registry of named active patterns.
#[derive(Default)]
pub struct PlayMap {
    states: HashMap<String, PlayState>,
}

/// Evaluate a zero-width query to flush out evaluation failures before a
/// pattern goes live. Panics are the safety net here; combinators are
/// expected to return empty results rather than throw.
pub fn probe_pattern(pattern: &Pattern<ControlMap>) -> Result<()> {
    let state = State::new(Span::instant(Time::zero()));
    catch_unwind(AssertUnwindSafe(|| {
        pattern.query(&state);
    }))
    .map_err(|cause| {
        let message = cause
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| cause.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "pattern evaluation panicked".to_string());
        Error::Pattern(message)
    })
}

impl PlayMap {
    pub fn new() -> Self {
        PlayMap::default()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.states.keys()
    }

    pub fn get(&self, key: &str) -> Option<&PlayState> {
        self.states.get(key)
    }

    /// Install a new pattern under `key`. The previous pattern (if any)
    /// moves into the key's history; on probe failure nothing changes and
    /// the error is returned.
    pub fn replace(&mut self, key: &str, pattern: Pattern<ControlMap>) -> Result<()> {
        probe_pattern(&pattern)?;
        match self.states.get_mut(key) {
            Some(state) => {
                let old = std::mem::replace(&mut state.pattern, pattern);
                state.push_history(old);
            }
            None => {
                self.states.insert(key.to_string(), PlayState::new(pattern));
            }
        }
        Ok(())
    }

    /// Revert `key` to its previous pattern. Returns false if there was
    /// nothing to revert to (the key is silenced instead).
    pub fn rollback(&mut self, key: &str) -> bool {
        match self.states.get_mut(key) {
            Some(state) => state.rollback(),
            None => false,
        }
    }

    pub fn mute(&mut self, key: &str) {
        if let Some(state) = self.states.get_mut(key) {
            state.muted = true;
        }
    }

    pub fn unmute(&mut self, key: &str) {
        if let Some(state) = self.states.get_mut(key) {
            state.muted = false;
        }
    }

    pub fn solo(&mut self, key: &str) {
        if let Some(state) = self.states.get_mut(key) {
            state.soloed = true;
        }
    }

    pub fn unsolo(&mut self, key: &str) {
        if let Some(state) = self.states.get_mut(key) {
            state.soloed = false;
        }
    }

    pub fn mute_all(&mut self) {
        for state in self.states.values_mut() {
            state.muted = true;
        }
    }

    pub fn unmute_all(&mut self) {
        for state in self.states.values_mut() {
            state.muted = false;
        }
    }

    pub fn unsolo_all(&mut self) {
        for state in self.states.values_mut() {
            state.soloed = false;
        }
    }

    /// Replace one pattern with silence (its history is kept).
    pub fn silence_key(&mut self, key: &str) {
        if let Some(state) = self.states.get_mut(key) {
            let old = std::mem::replace(&mut state.pattern, silence());
            state.push_history(old);
        }
    }

    /// Replace every pattern with silence.
    pub fn hush(&mut self) {
        let keys: Vec<String> = self.states.keys().cloned().collect();
        for key in keys {
            self.silence_key(&key);
        }
    }

    /// The patterns that should sound right now: when anything is soloed,
    /// only soloed keys; otherwise every unmuted key.
    pub fn active(&self) -> Vec<(String, Pattern<ControlMap>)> {
        let any_solo = self.states.values().any(|s| s.soloed);
        self.states
            .iter()
            .filter(|(_, s)| if any_solo { s.soloed } else { !s.muted })
            .map(|(k, s)| (k.clone(), s.pattern.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::sound;
    use crate::mini::parse;
    use crate::pattern::pure;
    use crate::value::Value;

    fn pat(src: &str) -> Pattern<ControlMap> {
        sound(parse(src).unwrap())
    }

    fn active_keys(map: &PlayMap) -> Vec<String> {
        let mut keys: Vec<String> = map.active().into_iter().map(|(k, _)| k).collect();
        keys.sort();
        keys
    }

    #[test]
    fn replace_and_activate() {
        let mut map = PlayMap::new();
        map.replace("d1", pat("bd sn")).unwrap();
        map.replace("d2", pat("cp")).unwrap();
        assert_eq!(active_keys(&map), vec!["d1", "d2"]);
    }

    #[test]
    fn mute_and_solo_rules() {
        let mut map = PlayMap::new();
        map.replace("d1", pat("bd")).unwrap();
        map.replace("d2", pat("sn")).unwrap();
        map.replace("d3", pat("cp")).unwrap();

        map.mute("d2");
        assert_eq!(active_keys(&map), vec!["d1", "d3"]);

        // Solo overrides mute state entirely.
        map.solo("d2");
        assert_eq!(active_keys(&map), vec!["d2"]);
        map.solo("d3");
        assert_eq!(active_keys(&map), vec!["d2", "d3"]);

        map.unsolo_all();
        assert_eq!(active_keys(&map), vec!["d1", "d3"]);
        map.unmute("d2");
        map.mute_all();
        assert!(map.active().is_empty());
        map.unmute_all();
        assert_eq!(active_keys(&map), vec!["d1", "d2", "d3"]);
    }

    #[test]
    fn rollback_restores_previous() {
        let mut map = PlayMap::new();
        map.replace("d1", pat("bd")).unwrap();
        map.replace("d1", pat("sn sn")).unwrap();
        assert_eq!(map.get("d1").unwrap().pattern.first_cycle().len(), 2);
        assert!(map.rollback("d1"));
        assert_eq!(map.get("d1").unwrap().pattern.first_cycle().len(), 1);
        // History exhausted: the key falls back to silence.
        assert!(!map.rollback("d1"));
        assert!(map.get("d1").unwrap().pattern.first_cycle().is_empty());
    }

    #[test]
    fn history_is_bounded() {
        let mut map = PlayMap::new();
        for i in 0..(HISTORY_DEPTH + 4) {
            map.replace("d1", pat(if i % 2 == 0 { "bd" } else { "sn" }))
                .unwrap();
        }
        let mut rollbacks = 0;
        while map.rollback("d1") {
            rollbacks += 1;
        }
        assert_eq!(rollbacks, HISTORY_DEPTH);
    }

    #[test]
    fn replace_probes_for_failures() {
        let mut map = PlayMap::new();
        map.replace("d1", pat("bd")).unwrap();
        let bad: Pattern<ControlMap> =
            pure(Value::Int(0)).fmap(|_| -> ControlMap { panic!("boom") });
        let err = map.replace("d1", bad).unwrap_err();
        assert!(matches!(err, Error::Pattern(_)));
        // The previous pattern is retained.
        assert_eq!(map.get("d1").unwrap().pattern.first_cycle().len(), 1);
    }

    #[test]
    fn hush_silences_everything_but_keeps_history() {
        let mut map = PlayMap::new();
        map.replace("d1", pat("bd")).unwrap();
        map.replace("d2", pat("sn")).unwrap();
        map.hush();
        for (_, pattern) in map.active() {
            assert!(pattern.first_cycle().is_empty());
        }
        assert!(map.rollback("d1"));
        assert_eq!(map.get("d1").unwrap().pattern.first_cycle().len(), 1);
    }
}

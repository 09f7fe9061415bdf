//! The live stream: clock, play map, action queue, and the tick loop.
//!
//! [`Stream::start`] spawns the tick thread (and, when configured, the
//! control listener) and returns a handle. All handle methods are
//! non-blocking submissions into a bounded action queue, drained at the top
//! of each tick — pattern swaps land on a tick boundary, never mid-tick.
//! A pattern that fails while being queried is rolled back to its previous
//! version and the loop carries on.

use crate::control::resolve_controls;
use crate::error::{Error, Result};
use crate::event::Event;
use crate::osc::{
    build_messages, handshake_message, stamp_message, OscSender, ScheduleMode, Target,
};
use crate::pattern::Pattern;
use crate::playmap::PlayMap;
use crate::span::Span;
use crate::state::State;
use crate::tempo::Tempo;
use crate::time::Time;
use crate::value::{ControlMap, Value};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// A user-installable transform applied to every active pattern.
pub type GlobalTransform =
    Arc<dyn Fn(Pattern<ControlMap>) -> Pattern<ControlMap> + Send + Sync>;

/// Stream configuration.
#[derive(Clone)]
pub struct Config {
    /// Initial tempo in cycles per second.
    pub cps: Time,
    /// Wall seconds between ticks.
    pub tick_period: f64,
    /// How far ahead of the clock each tick queries.
    pub process_ahead: f64,
    /// UDP port for the external control listener; `None` disables it.
    pub listen_port: Option<u16>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            cps: Time::new(1, 2),
            tick_period: 0.05,
            process_ahead: 0.3,
            listen_port: Some(crate::listener::CONTROL_PORT),
        }
    }
}

/// Actions submitted by clients, applied between ticks.
pub(crate) enum Action {
    Replace(String, Pattern<ControlMap>),
    Mute(String),
    Unmute(String),
    Solo(String),
    Unsolo(String),
    MuteAll,
    UnmuteAll,
    UnsoloAll,
    Hush,
    SilenceKey(String),
    SetCps(Time),
    SetCycle(Time),
    NudgeAll(f64),
    Pause,
    Resume,
    SetGlobalTransform(Option<GlobalTransform>),
    Once(Pattern<ControlMap>),
}

// ----------------------------------------------------------------------
// Dispatcher: the per-tick pipeline, separated from the socket plumbing
// ----------------------------------------------------------------------

pub(crate) struct Dispatcher {
    pub tempo: Tempo,
    pub playmap: PlayMap,
    global: Option<GlobalTransform>,
    /// One-shot patterns with the cycle they were launched at.
    once_patterns: Vec<(Time, Pattern<ControlMap>)>,
    prev_cycle: Option<Time>,
    process_ahead: f64,
}

impl Dispatcher {
    pub fn new(cps: Time, process_ahead: f64) -> Self {
        Dispatcher {
            tempo: Tempo::new(cps),
            playmap: PlayMap::new(),
            global: None,
            once_patterns: Vec::new(),
            prev_cycle: None,
            process_ahead,
        }
    }

    pub fn apply(&mut self, action: Action, now: f64) {
        match action {
            Action::Replace(key, pattern) => {
                if let Err(err) = self.playmap.replace(&key, pattern) {
                    // Already surfaced to the submitting client; the tick
                    // side just declines the swap.
                    log::warn!("replace of '{}' rejected: {}", key, err);
                }
            }
            Action::Mute(key) => self.playmap.mute(&key),
            Action::Unmute(key) => self.playmap.unmute(&key),
            Action::Solo(key) => self.playmap.solo(&key),
            Action::Unsolo(key) => self.playmap.unsolo(&key),
            Action::MuteAll => self.playmap.mute_all(),
            Action::UnmuteAll => self.playmap.unmute_all(),
            Action::UnsoloAll => self.playmap.unsolo_all(),
            Action::Hush => self.playmap.hush(),
            Action::SilenceKey(key) => self.playmap.silence_key(&key),
            Action::SetCps(cps) => self.tempo.set_cps(now, cps),
            Action::SetCycle(cycle) => {
                self.tempo.set_cycle(now, cycle);
                self.prev_cycle = Some(cycle);
            }
            Action::NudgeAll(nudge) => self.tempo.set_nudge(nudge),
            Action::Pause => self.tempo.pause(now),
            Action::Resume => self.tempo.resume(now),
            Action::SetGlobalTransform(f) => self.global = f,
            Action::Once(pattern) => {
                let start = self.tempo.cycle_at(now);
                self.once_patterns.push((start, pattern.late(start)));
            }
        }
    }

    /// The cycle window this tick covers, advancing the tick cursor.
    pub fn window(&mut self, now: f64) -> Option<Span> {
        if self.tempo.is_paused() {
            return None;
        }
        let end = self.tempo.cycle_at(now + self.process_ahead);
        let begin = match self.prev_cycle {
            Some(c) => c,
            None => self.tempo.cycle_at(now),
        };
        if end <= begin {
            return None;
        }
        self.prev_cycle = Some(end);
        Some(Span::new(begin, end))
    }

    /// Query every active pattern over `span`, tagging events with their
    /// pattern key, in emit order. A failing key is rolled back.
    pub fn query_events(
        &mut self,
        span: Span,
        controls: &ControlMap,
    ) -> Vec<(String, Event<ControlMap>)> {
        let mut out: Vec<(String, Event<ControlMap>)> = Vec::new();

        for (key, pattern) in self.playmap.active() {
            let pattern = match &self.global {
                Some(f) => f(pattern),
                None => pattern,
            };
            let state = State::with_controls(span, controls.clone());
            match catch_unwind(AssertUnwindSafe(|| pattern.query(&state))) {
                Ok(events) => out.extend(events.into_iter().map(|e| (key.clone(), e))),
                Err(_) => {
                    log::error!("pattern '{}' failed mid-tick, rolling back", key);
                    self.playmap.rollback(&key);
                }
            }
        }

        self.once_patterns
            .retain(|(start, _)| *start + Time::one() > span.begin);
        for (start, pattern) in &self.once_patterns {
            let window = Span::new(*start, *start + Time::one());
            let Some(sub) = span.sect(&window) else { continue };
            let state = State::with_controls(sub, controls.clone());
            if let Ok(events) = catch_unwind(AssertUnwindSafe(|| pattern.query(&state))) {
                out.extend(events.into_iter().map(|e| ("once".to_string(), e)));
            }
        }

        out.sort_by(|a, b| a.1.emit_key().cmp(&b.1.emit_key()));
        out
    }

    /// Wall-clock send time for an event, before per-target latency.
    pub fn event_time(&self, event: &Event<ControlMap>) -> f64 {
        let onset = event.whole_or_active().begin;
        let own_nudge = event
            .value
            .get("nudge")
            .and_then(|v| v.as_f())
            .unwrap_or(0.0);
        self.tempo.time_at(onset) + self.tempo.nudge() + own_nudge
    }

    /// Event duration in wall seconds.
    pub fn event_delta(&self, event: &Event<ControlMap>) -> f64 {
        event.whole_or_active().duration().as_f64() / self.tempo.cps().as_f64()
    }
}

// ----------------------------------------------------------------------
// The stream handle
// ----------------------------------------------------------------------

/// A handle to a running stream. All methods submit without blocking;
/// effects land at the next tick boundary.
pub struct Stream {
    actions: Sender<Action>,
    controls: Arc<Mutex<ControlMap>>,
    running: Arc<AtomicBool>,
    tick_thread: Option<JoinHandle<()>>,
    listener_thread: Option<JoinHandle<()>>,
}

impl Stream {
    /// Start the tick loop (and the control listener, when configured)
    /// against the given targets.
    pub fn start(config: Config, targets: Vec<Target>) -> Result<Stream> {
        let (tx, rx) = bounded::<Action>(256);
        let controls: Arc<Mutex<ControlMap>> = Arc::new(Mutex::new(ControlMap::new()));
        let bus_tables: Arc<Mutex<Vec<Option<Vec<i32>>>>> =
            Arc::new(Mutex::new(vec![None; targets.len()]));
        let running = Arc::new(AtomicBool::new(true));

        let senders: Vec<OscSender> = targets
            .iter()
            .map(|t| OscSender::new(&t.address))
            .collect::<Result<_>>()?;

        // Offer handshakes before the first tick; replies land in the
        // listener and fill the bus tables.
        for (target, sender) in targets.iter().zip(&senders) {
            if target.handshake {
                if let Err(err) = sender.send_message(handshake_message()) {
                    log::warn!("handshake to {} failed: {}", target.name, err);
                }
            }
        }

        let listener_thread = match config.listen_port {
            Some(port) => Some(crate::listener::spawn(
                port,
                tx.clone(),
                Arc::clone(&controls),
                Arc::clone(&bus_tables),
                Arc::clone(&running),
            )?),
            None => None,
        };

        let tick_thread = {
            let running = Arc::clone(&running);
            let controls = Arc::clone(&controls);
            let config = config.clone();
            thread::Builder::new()
                .name("riptide-tick".into())
                .spawn(move || {
                    tick_loop(config, targets, senders, rx, controls, bus_tables, running)
                })
                .map_err(Error::Io)?
        };

        Ok(Stream {
            actions: tx,
            controls,
            running,
            tick_thread: Some(tick_thread),
            listener_thread,
        })
    }

    fn submit(&self, action: Action) -> Result<()> {
        match self.actions.try_send(action) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                Err(Error::Config("action queue full".into()))
            }
            Err(TrySendError::Disconnected(_)) => {
                Err(Error::Config("stream has shut down".into()))
            }
        }
    }

    /// Swap in a new pattern for `id`. Evaluation failures surface here
    /// and leave the previous pattern playing.
    pub fn replace(&self, id: &str, pattern: Pattern<ControlMap>) -> Result<()> {
        crate::playmap::probe_pattern(&pattern)?;
        self.submit(Action::Replace(id.to_string(), pattern))
    }

    /// Parse mini-notation as a `sound` pattern and swap it in.
    pub fn replace_mini(&self, id: &str, src: &str) -> Result<()> {
        let pattern = crate::mini::parse_sound(src)?;
        self.replace(id, pattern)
    }

    /// Play one cycle of a pattern, starting now, on top of the play map.
    pub fn once(&self, pattern: Pattern<ControlMap>) -> Result<()> {
        crate::playmap::probe_pattern(&pattern)?;
        self.submit(Action::Once(pattern))
    }

    pub fn mute(&self, id: &str) -> Result<()> {
        self.submit(Action::Mute(id.to_string()))
    }

    pub fn unmute(&self, id: &str) -> Result<()> {
        self.submit(Action::Unmute(id.to_string()))
    }

    pub fn solo(&self, id: &str) -> Result<()> {
        self.submit(Action::Solo(id.to_string()))
    }

    pub fn unsolo(&self, id: &str) -> Result<()> {
        self.submit(Action::Unsolo(id.to_string()))
    }

    pub fn mute_all(&self) -> Result<()> {
        self.submit(Action::MuteAll)
    }

    pub fn unmute_all(&self) -> Result<()> {
        self.submit(Action::UnmuteAll)
    }

    pub fn unsolo_all(&self) -> Result<()> {
        self.submit(Action::UnsoloAll)
    }

    /// Replace every pattern with silence.
    pub fn hush(&self) -> Result<()> {
        self.submit(Action::Hush)
    }

    /// Replace one pattern with silence.
    pub fn silence_key(&self, id: &str) -> Result<()> {
        self.submit(Action::SilenceKey(id.to_string()))
    }

    pub fn set_cps(&self, cps: Time) -> Result<()> {
        self.submit(Action::SetCps(cps))
    }

    pub fn set_cycle(&self, cycle: Time) -> Result<()> {
        self.submit(Action::SetCycle(cycle))
    }

    pub fn reset_cycles(&self) -> Result<()> {
        self.set_cycle(Time::zero())
    }

    /// Add a fixed offset (seconds) to every outgoing timestamp.
    pub fn nudge_all(&self, nudge: f64) -> Result<()> {
        self.submit(Action::NudgeAll(nudge))
    }

    pub fn pause(&self) -> Result<()> {
        self.submit(Action::Pause)
    }

    pub fn resume(&self) -> Result<()> {
        self.submit(Action::Resume)
    }

    /// Install a transform applied to every active pattern.
    pub fn set_global_transform<F>(&self, f: F) -> Result<()>
    where
        F: Fn(Pattern<ControlMap>) -> Pattern<ControlMap> + Send + Sync + 'static,
    {
        let f: GlobalTransform = Arc::new(f);
        self.submit(Action::SetGlobalTransform(Some(f)))
    }

    /// Remove the global transform.
    pub fn clear_global_transform(&self) -> Result<()> {
        self.submit(Action::SetGlobalTransform(None))
    }

    /// Set a live control value, as the UDP listener would.
    pub fn set_control(&self, name: &str, value: Value) {
        self.controls
            .lock()
            .unwrap()
            .insert(name.to_string(), value);
    }

    /// Stop the tick loop. The current iteration finishes first.
    pub fn shutdown(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.tick_thread.take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.listener_thread.take() {
            let _ = handle.join();
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl Drop for Stream {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ----------------------------------------------------------------------
// The tick thread
// ----------------------------------------------------------------------

fn tick_loop(
    config: Config,
    targets: Vec<Target>,
    senders: Vec<OscSender>,
    actions: Receiver<Action>,
    controls: Arc<Mutex<ControlMap>>,
    bus_tables: Arc<Mutex<Vec<Option<Vec<i32>>>>>,
    running: Arc<AtomicBool>,
) {
    let epoch = Instant::now();
    let unix_at_epoch = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0);
    let mut dispatcher = Dispatcher::new(config.cps, config.process_ahead);

    while running.load(Ordering::SeqCst) {
        let now = epoch.elapsed().as_secs_f64();

        while let Ok(action) = actions.try_recv() {
            dispatcher.apply(action, now);
        }

        if let Some(span) = dispatcher.window(now) {
            let snapshot = controls.lock().unwrap().clone();
            let resolved = resolve_controls(&snapshot, span.begin);
            let events = dispatcher.query_events(span, &resolved);
            let tables = bus_tables.lock().unwrap().clone();

            for (key, event) in events {
                if !event.has_onset() {
                    continue;
                }
                let base_time = dispatcher.event_time(&event);
                let delta = dispatcher.event_delta(&event);
                let cycle = event.whole_or_active().begin.as_f64();

                for (i, target) in targets.iter().enumerate() {
                    let t_on = base_time + target.latency;
                    let unix_on = unix_at_epoch + t_on;
                    let table = tables[i].as_deref();
                    for out in build_messages(target, &key, &event, cycle, delta, table) {
                        let result = match target.schedule {
                            ScheduleMode::BundleStamped => {
                                senders[i].send_bundle(out.message, unix_on)
                            }
                            ScheduleMode::MessageStamped => {
                                senders[i].send_message(stamp_message(&out.message, unix_on))
                            }
                            ScheduleMode::Live => {
                                spawn_live_send(&target.address, out.message, t_on - now);
                                Ok(())
                            }
                        };
                        if let Err(err) = result {
                            log::warn!("send to {} failed: {}", target.name, err);
                        }
                    }
                }
            }
        }

        thread::sleep(Duration::from_secs_f64(config.tick_period));
    }
}

/// Live schedule mode: sleep until the due time, then fire. The datagram
/// gets its own short-lived socket; in-flight sends are abandoned on
/// shutdown.
fn spawn_live_send(address: &str, message: rosc::OscMessage, delay: f64) {
    let address = address.to_string();
    thread::spawn(move || {
        if delay > 0.0 {
            thread::sleep(Duration::from_secs_f64(delay));
        }
        match OscSender::new(&address) {
            Ok(sender) => {
                if let Err(err) = sender.send_message(message) {
                    log::warn!("live send to {} failed: {}", address, err);
                }
            }
            Err(err) => log::warn!("live send socket failed: {}", err),
        }
    });
}

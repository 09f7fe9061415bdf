//! The tempo clock: a linear map between wall-clock seconds and cycles.
//!
//! The clock is an anchor point plus a rate. Every mutation rebases the
//! anchor so that `cycle_at(now)` is continuous across the change, except
//! for the explicit `set_cycle`/`reset` jumps. Wall time is `f64` seconds
//! (relative to the stream's epoch); cycle arithmetic stays rational.

use crate::time::Time;

/// Cycles-per-second clock state.
#[derive(Debug, Clone)]
pub struct Tempo {
    anchor_cycle: Time,
    anchor_time: f64,
    cps: Time,
    paused: bool,
    nudge: f64,
}

fn clamp_cps(cps: Time) -> Time {
    let floor = Time::new(1, 1000);
    if cps <= Time::zero() {
        log::warn!("invalid cps {} clamped to {}", cps, floor);
        floor
    } else {
        cps
    }
}

impl Tempo {
    /// A clock anchored at cycle zero, time zero.
    pub fn new(cps: Time) -> Self {
        Tempo {
            anchor_cycle: Time::zero(),
            anchor_time: 0.0,
            cps: clamp_cps(cps),
            paused: false,
            nudge: 0.0,
        }
    }

    pub fn cps(&self) -> Time {
        self.cps
    }

    pub fn nudge(&self) -> f64 {
        self.nudge
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// The cycle position at wall time `t`. Frozen while paused.
    pub fn cycle_at(&self, t: f64) -> Time {
        if self.paused {
            return self.anchor_cycle;
        }
        self.anchor_cycle + Time::from(t - self.anchor_time) * self.cps
    }

    /// The wall time at which `cycle` begins.
    pub fn time_at(&self, cycle: Time) -> f64 {
        self.anchor_time + ((cycle - self.anchor_cycle) / self.cps).as_f64()
    }

    /// Change the rate, preserving the current cycle position.
    pub fn set_cps(&mut self, now: f64, cps: Time) {
        self.anchor_cycle = self.cycle_at(now);
        self.anchor_time = now;
        self.cps = clamp_cps(cps);
    }

    /// Jump to a cycle position immediately.
    pub fn set_cycle(&mut self, now: f64, cycle: Time) {
        self.anchor_cycle = cycle;
        self.anchor_time = now;
    }

    /// Jump back to cycle zero.
    pub fn reset(&mut self, now: f64) {
        self.set_cycle(now, Time::zero());
    }

    /// Shift all outgoing timestamps by `nudge` seconds without touching
    /// the cycle position.
    pub fn set_nudge(&mut self, nudge: f64) {
        self.nudge = nudge;
    }

    pub fn pause(&mut self, now: f64) {
        if !self.paused {
            self.anchor_cycle = self.cycle_at(now);
            self.anchor_time = now;
            self.paused = true;
        }
    }

    pub fn resume(&mut self, now: f64) {
        if self.paused {
            self.anchor_time = now;
            self.paused = false;
        }
    }
}

impl Default for Tempo {
    fn default() -> Self {
        // One cycle every two seconds, the conventional live-coding default.
        Tempo::new(Time::new(1, 2))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(n: i64, d: i64) -> Time {
        Time::new(n, d)
    }

    #[test]
    fn cycle_advances_linearly() {
        let mut tempo = Tempo::new(t(1, 2));
        tempo.set_cycle(10.0, Time::zero());
        assert_eq!(tempo.cycle_at(10.0), Time::zero());
        assert_eq!(tempo.cycle_at(11.0), t(1, 2));
        assert_eq!(tempo.cycle_at(14.0), t(2, 1));
        assert_eq!(tempo.time_at(Time::zero()), 10.0);
        assert_eq!(tempo.time_at(t(1, 1)), 12.0);
    }

    #[test]
    fn set_cps_preserves_position() {
        let mut tempo = Tempo::new(t(1, 2));
        tempo.set_cycle(0.0, Time::zero());
        let before = tempo.cycle_at(8.0);
        tempo.set_cps(8.0, t(2, 1));
        assert_eq!(tempo.cycle_at(8.0), before);
        // After the change the new rate applies.
        assert_eq!(tempo.cycle_at(9.0), before + t(2, 1));
    }

    #[test]
    fn invalid_cps_is_clamped() {
        let tempo = Tempo::new(Time::zero());
        assert!(tempo.cps() > Time::zero());
        let mut tempo = Tempo::new(t(1, 1));
        tempo.set_cps(0.0, t(-1, 1));
        assert!(tempo.cps() > Time::zero());
    }

    #[test]
    fn pause_freezes_the_cycle() {
        let mut tempo = Tempo::new(t(1, 1));
        tempo.set_cycle(0.0, Time::zero());
        tempo.pause(2.0);
        assert_eq!(tempo.cycle_at(2.0), t(2, 1));
        assert_eq!(tempo.cycle_at(100.0), t(2, 1));
        tempo.resume(10.0);
        assert_eq!(tempo.cycle_at(10.0), t(2, 1));
        assert_eq!(tempo.cycle_at(11.0), t(3, 1));
    }

    #[test]
    fn nudge_does_not_touch_cycles() {
        let mut tempo = Tempo::new(t(1, 1));
        let before = tempo.cycle_at(5.0);
        tempo.set_nudge(0.05);
        assert_eq!(tempo.cycle_at(5.0), before);
        assert_eq!(tempo.nudge(), 0.05);
    }

    #[test]
    fn negative_cycles_are_valid() {
        let mut tempo = Tempo::new(t(1, 1));
        tempo.set_cycle(10.0, Time::zero());
        assert_eq!(tempo.cycle_at(7.5), t(-5, 2));
        assert_eq!(tempo.time_at(t(-5, 2)), 7.5);
    }
}

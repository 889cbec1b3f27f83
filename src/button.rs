//! Push-button debouncing and the button polling loop.
//!
//! A short press-release is a [`ButtonEvent::Tap`]; keeping the button down
//! past the hold threshold fires [`ButtonEvent::HoldStart`] once and cancels
//! the tap for that press.

use crate::gpio::DigitalIo;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

/// Blink period of the idle indicator.
const BLINK_PERIOD: Duration = Duration::from_secs(2);
/// How long the indicator is lit at the start of each period.
const BLINK_ON: Duration = Duration::from_millis(150);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ButtonError {
    #[error("tap debounce {tap:?} must be shorter than hold time {hold:?}")]
    InvalidTiming { tap: Duration, hold: Duration },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonEvent {
    Tap,
    HoldStart,
}

#[derive(Debug, Clone, Copy)]
pub struct ButtonState {
    pub raw_level: bool,
    pub debounced_level: bool,
    pub last_change: Instant,
    pub tap_armed: bool,
    pub hold_armed: bool,
}

impl ButtonState {
    fn new(level: bool, now: Instant) -> Self {
        Self {
            raw_level: level,
            debounced_level: level,
            last_change: now,
            tap_armed: false,
            hold_armed: false,
        }
    }

    fn disarm(&mut self) {
        self.tap_armed = false;
        self.hold_armed = false;
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Debouncer {
    state: ButtonState,
    tap_debounce: Duration,
    hold: Duration,
    pressed_level: bool,
}

impl Debouncer {
    /// `pressed_level` is the pin level while the button is held down
    /// (`false` for a pull-up button wired to ground).
    pub fn new(
        initial_level: bool,
        now: Instant,
        tap_debounce: Duration,
        hold: Duration,
        pressed_level: bool,
    ) -> Result<Self, ButtonError> {
        if tap_debounce >= hold {
            return Err(ButtonError::InvalidTiming {
                tap: tap_debounce,
                hold,
            });
        }
        Ok(Self {
            state: ButtonState::new(initial_level, now),
            tap_debounce,
            hold,
            pressed_level,
        })
    }

    pub fn state(&self) -> &ButtonState {
        &self.state
    }

    pub fn poll(&mut self, raw_level: bool, now: Instant) -> Option<ButtonEvent> {
        let s = &mut self.state;
        s.raw_level = raw_level;

        if raw_level != s.debounced_level {
            s.debounced_level = raw_level;
            s.last_change = now;
            return None;
        }

        let stable_for = now.saturating_duration_since(s.last_change);
        if stable_for >= self.hold {
            if s.hold_armed {
                s.disarm();
                return Some(ButtonEvent::HoldStart);
            }
        } else if stable_for >= self.tap_debounce {
            if raw_level == self.pressed_level {
                s.tap_armed = true;
                s.hold_armed = true;
            } else if s.tap_armed {
                s.disarm();
                return Some(ButtonEvent::Tap);
            }
        }
        None
    }
}

/// Idle blink for the indicator LED, forced on while actions are running.
#[derive(Debug, Default)]
pub struct Indicator {
    busy: AtomicUsize,
}

impl Indicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold the indicator on until the guard is dropped.
    pub fn busy(self: &Arc<Self>) -> BusyGuard {
        self.busy.fetch_add(1, Ordering::SeqCst);
        BusyGuard(Arc::clone(self))
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst) > 0
    }

    /// LED level `elapsed` after the loop started.
    pub fn level(&self, elapsed: Duration) -> bool {
        self.is_busy() || blink_level(elapsed)
    }
}

pub struct BusyGuard(Arc<Indicator>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.busy.fetch_sub(1, Ordering::SeqCst);
    }
}

pub fn blink_level(elapsed: Duration) -> bool {
    let phase = elapsed.as_millis() % BLINK_PERIOD.as_millis();
    phase < BLINK_ON.as_millis()
}

/// Pins and timing for [`run_button_loop`].
#[derive(Debug, Clone)]
pub struct ButtonLoopConfig {
    pub button_pin: u32,
    pub led_pin: Option<u32>,
    pub poll_interval: Duration,
    pub tap_debounce: Duration,
    pub hold: Duration,
    pub active_low: bool,
}

/// Poll the button until cancelled, handing events to `on_event`.
///
/// `on_event` must not block; actions are expected to be spawned.
#[instrument(skip_all, fields(pin = cfg.button_pin))]
pub async fn run_button_loop<F>(
    io: Arc<dyn DigitalIo>,
    cfg: ButtonLoopConfig,
    indicator: Arc<Indicator>,
    mut on_event: F,
    cancel: CancellationToken,
) where
    F: FnMut(ButtonEvent) + Send,
{
    let started = Instant::now();
    let mut debouncer = match Debouncer::new(
        io.read_pin(cfg.button_pin),
        started,
        cfg.tap_debounce,
        cfg.hold,
        !cfg.active_low,
    ) {
        Ok(d) => d,
        Err(err) => {
            error!(%err, "button loop not started");
            return;
        }
    };
    let mut ticker = tokio::time::interval(cfg.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!("button loop started");
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        let now = Instant::now();
        if let Some(event) = debouncer.poll(io.read_pin(cfg.button_pin), now) {
            debug!(?event, "button event");
            on_event(event);
        }
        if let Some(led) = cfg.led_pin {
            io.write_pin(led, indicator.level(now - started));
        }
    }
    if let Some(led) = cfg.led_pin {
        io.write_pin(led, false);
    }
    info!("button loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    const TAP: Duration = Duration::from_millis(10);
    const HOLD: Duration = Duration::from_millis(2000);
    const STEP: Duration = Duration::from_millis(5);
    const PRESSED: bool = false;
    const RELEASED: bool = true;

    /// Feed `(level, duration)` segments sampled every 5 ms; collect events.
    fn run(segments: &[(bool, Duration)]) -> Vec<ButtonEvent> {
        let t0 = Instant::now();
        let mut d = Debouncer::new(RELEASED, t0, TAP, HOLD, PRESSED).unwrap();
        let mut t = t0;
        let mut events = Vec::new();
        for &(level, dur) in segments {
            let end = t + dur;
            while t < end {
                events.extend(d.poll(level, t));
                t += STEP;
            }
        }
        events
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn bounces_shorter_than_debounce_emit_nothing() {
        let t0 = Instant::now();
        let mut d = Debouncer::new(RELEASED, t0, TAP, HOLD, PRESSED).unwrap();
        let mut level = RELEASED;
        for i in 0..1000u32 {
            // flip every 7 ms, sampled every 1 ms
            if i % 7 == 0 {
                level = !level;
            }
            assert_eq!(d.poll(level, t0 + Duration::from_millis(u64::from(i))), None);
        }
    }

    #[test]
    fn short_press_is_one_tap() {
        let events = run(&[(RELEASED, ms(50)), (PRESSED, ms(200)), (RELEASED, ms(500))]);
        assert_eq!(events, vec![ButtonEvent::Tap]);
    }

    #[test]
    fn press_just_over_debounce_taps() {
        let events = run(&[(RELEASED, ms(50)), (PRESSED, ms(15)), (RELEASED, ms(100))]);
        assert_eq!(events, vec![ButtonEvent::Tap]);
    }

    #[test]
    fn long_press_holds_once_and_never_taps() {
        let events = run(&[(RELEASED, ms(50)), (PRESSED, ms(6000)), (RELEASED, ms(500))]);
        assert_eq!(events, vec![ButtonEvent::HoldStart]);
    }

    #[test]
    fn bouncy_press_still_taps_once() {
        let events = run(&[
            (RELEASED, ms(50)),
            (PRESSED, ms(5)),
            (RELEASED, ms(5)),
            (PRESSED, ms(300)),
            (RELEASED, ms(5)),
            (PRESSED, ms(5)),
            (RELEASED, ms(300)),
        ]);
        assert_eq!(events, vec![ButtonEvent::Tap]);
    }

    #[test]
    fn tap_after_hold_works_again() {
        let events = run(&[
            (PRESSED, ms(3000)),
            (RELEASED, ms(100)),
            (PRESSED, ms(100)),
            (RELEASED, ms(100)),
        ]);
        assert_eq!(events, vec![ButtonEvent::HoldStart, ButtonEvent::Tap]);
    }

    #[test]
    fn hold_disarms_both_flags() {
        let t0 = Instant::now();
        let mut d = Debouncer::new(PRESSED, t0, TAP, HOLD, PRESSED).unwrap();
        assert_eq!(d.poll(PRESSED, t0 + ms(20)), None);
        assert!(d.state().tap_armed && d.state().hold_armed);
        assert_eq!(d.poll(PRESSED, t0 + HOLD), Some(ButtonEvent::HoldStart));
        assert!(!d.state().tap_armed && !d.state().hold_armed);
    }

    #[test]
    fn tap_must_be_shorter_than_hold() {
        let err = Debouncer::new(RELEASED, Instant::now(), HOLD, TAP, PRESSED).unwrap_err();
        assert_eq!(err, ButtonError::InvalidTiming { tap: HOLD, hold: TAP });
        assert!(Debouncer::new(RELEASED, Instant::now(), TAP, TAP, PRESSED).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn loop_with_inverted_timing_returns_immediately() {
        let cfg = ButtonLoopConfig {
            button_pin: 23,
            led_pin: None,
            poll_interval: ms(5),
            tap_debounce: HOLD,
            hold: TAP,
            active_low: true,
        };
        let never = CancellationToken::new();
        let run = run_button_loop(
            Arc::new(crate::gpio::NullIo { idle_level: true }),
            cfg,
            Arc::new(Indicator::new()),
            |_| panic!("no events expected"),
            never,
        );
        tokio::time::timeout(ms(100), run).await.unwrap();
    }

    #[test]
    fn blink_pattern() {
        assert!(blink_level(ms(0)));
        assert!(blink_level(ms(149)));
        assert!(!blink_level(ms(150)));
        assert!(!blink_level(ms(1999)));
        assert!(blink_level(ms(2000)));
        assert!(!blink_level(ms(1000)));
    }

    #[test]
    fn busy_indicator_stays_lit() {
        let ind = Arc::new(Indicator::new());
        assert!(!ind.level(ms(1000)));
        let guard = ind.busy();
        assert!(ind.level(ms(1000)));
        drop(guard);
        assert!(!ind.level(ms(1000)));
    }
}

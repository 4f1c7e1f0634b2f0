//! Scaled embassy time driver for the simulation.
//!
//! Virtual time advances at `speed_percent` of wall-clock time, so a scene
//! with a 30 s report cadence can be played in a few seconds. A single
//! scheduler thread wakes timers once their virtual deadline has passed.

use core::task::Waker;
use embassy_time_driver::{Driver, TICK_HZ, time_driver_impl};
use std::collections::BTreeMap;
use std::sync::{Condvar, Mutex, MutexGuard, OnceLock};
use std::time::{Duration, Instant as StdInstant};

/// Accepted range for [`set_speed_percent`].
pub const MIN_SPEED_PERCENT: u32 = 1;
pub const MAX_SPEED_PERCENT: u32 = 1000;

// Q32.32 fixed point, 1.0 == 1 << 32
const RATE_ONE: u128 = 1 << 32;
const NANOS_PER_SEC: u128 = 1_000_000_000;

// Upper bound on a single wait so speed changes take effect promptly
const MAX_WAIT: Duration = Duration::from_millis(25);

#[derive(Debug)]
struct SimClock {
    anchor_real: StdInstant,
    anchor_ticks: u64,
    rate_q32: u64,
    percent: u32,
}

#[derive(Default)]
struct Wakeups {
    deadlines: BTreeMap<u64, Vec<Waker>>,
    // Bumped when the rate changes so a sleeping scheduler recomputes its wait
    generation: u64,
}

static CLOCK: OnceLock<Mutex<SimClock>> = OnceLock::new();
static WAKEUPS: OnceLock<Mutex<Wakeups>> = OnceLock::new();
static WAKEUP_CV: OnceLock<Condvar> = OnceLock::new();
static SCHEDULER: OnceLock<()> = OnceLock::new();

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn clock() -> MutexGuard<'static, SimClock> {
    lock(CLOCK.get_or_init(|| {
        Mutex::new(SimClock {
            anchor_real: StdInstant::now(),
            anchor_ticks: 0,
            rate_q32: RATE_ONE as u64,
            percent: 100,
        })
    }))
}

fn wakeups() -> MutexGuard<'static, Wakeups> {
    lock(WAKEUPS.get_or_init(|| Mutex::new(Wakeups::default())))
}

fn wakeup_cv() -> &'static Condvar {
    WAKEUP_CV.get_or_init(Condvar::new)
}

impl SimClock {
    fn ticks_at(&self, real: StdInstant) -> u64 {
        let elapsed = real.saturating_duration_since(self.anchor_real).as_nanos();
        let real_ticks = elapsed * TICK_HZ as u128 / NANOS_PER_SEC;
        let virtual_ticks = real_ticks * self.rate_q32 as u128 / RATE_ONE;
        self.anchor_ticks.saturating_add(virtual_ticks.min(u64::MAX as u128) as u64)
    }

    /// Wall-clock instant at which `ticks` is reached. Deadlines before the
    /// anchor are already due.
    fn real_at(&self, ticks: u64) -> StdInstant {
        let Some(virtual_ticks) = ticks.checked_sub(self.anchor_ticks) else {
            return self.anchor_real;
        };
        let real_ticks = virtual_ticks as u128 * RATE_ONE / self.rate_q32 as u128;
        let nanos = (real_ticks * NANOS_PER_SEC / TICK_HZ as u128).min(u64::MAX as u128) as u64;
        self.anchor_real + Duration::from_nanos(nanos)
    }
}

fn now_ticks() -> u64 {
    clock().ticks_at(StdInstant::now())
}

fn ensure_scheduler() {
    SCHEDULER.get_or_init(|| {
        if let Err(err) = std::thread::Builder::new()
            .name("sim-time-scheduler".into())
            .spawn(run_scheduler)
        {
            log::error!("Failed to start time scheduler thread: {}", err);
        }
    });
}

fn run_scheduler() {
    loop {
        // Never hold the wakeup lock while taking the clock lock
        let (next, generation) = {
            let mut guard = wakeups();
            loop {
                if let Some((&next, _)) = guard.deadlines.iter().next() {
                    break (next, guard.generation);
                }
                guard = wakeup_cv().wait(guard).unwrap_or_else(|poisoned| poisoned.into_inner());
            }
        };

        let due_at = clock().real_at(next);
        let now = StdInstant::now();
        if due_at > now {
            let guard = wakeups();
            if guard.generation == generation {
                let wait = (due_at - now).min(MAX_WAIT);
                let _ = wakeup_cv().wait_timeout(guard, wait);
            }
            continue;
        }

        let now = now_ticks();
        let ready: Vec<Waker> = {
            let mut guard = wakeups();
            let later = guard.deadlines.split_off(&now.saturating_add(1));
            std::mem::replace(&mut guard.deadlines, later).into_values().flatten().collect()
        };
        for waker in ready {
            waker.wake();
        }
    }
}

struct ScaledDriver;

impl Driver for ScaledDriver {
    fn now(&self) -> u64 {
        now_ticks()
    }

    fn schedule_wake(&self, at: u64, waker: &Waker) {
        ensure_scheduler();
        wakeups().deadlines.entry(at).or_default().push(waker.clone());
        wakeup_cv().notify_all();
    }
}

time_driver_impl!(static DRIVER: ScaledDriver = ScaledDriver);

/// Changes how fast virtual time runs relative to wall-clock time, clamped to
/// `MIN_SPEED_PERCENT..=MAX_SPEED_PERCENT`. Virtual "now" stays continuous.
pub fn set_speed_percent(percent: u32) {
    let percent = percent.clamp(MIN_SPEED_PERCENT, MAX_SPEED_PERCENT);
    {
        let mut clock = clock();
        if clock.percent == percent {
            return;
        }
        // Re-anchor at the current instant so already queued deadlines keep their meaning
        let now = StdInstant::now();
        clock.anchor_ticks = clock.ticks_at(now);
        clock.anchor_real = now;
        clock.rate_q32 = (percent as u128 * RATE_ONE / 100) as u64;
        clock.percent = percent;
    }
    {
        let mut guard = wakeups();
        guard.generation = guard.generation.wrapping_add(1);
    }
    wakeup_cv().notify_all();
}

pub fn speed_percent() -> u32 {
    clock().percent
}

//! Process-wide runtime configuration shared by the node's tasks.
//!
//! Written by the command router, read by the reporter and the reconfiguration
//! controller. Plain fields are independent atomics: a reader may see a value
//! one cycle late, which is fine for settings that change rarely. The
//! reconfiguration request is different: it goes through a compare-and-set on
//! `reconfig_phase` so at most one request can be pending or in flight.

use core::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, Ordering};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;

const PHASE_IDLE: u8 = 0;
/// Claimed by a writer that is still storing the new value.
const PHASE_CLAIMED: u8 = 1;
/// Value stored; the controller may act on it.
const PHASE_PENDING: u8 = 2;

/// Outcome of a max-children change request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaxChildrenRequest {
    /// Stored and handed to the reconfiguration controller.
    Accepted,
    /// Same as the current value; nothing to do.
    Unchanged,
    /// Another reconfiguration is pending or in flight; request dropped.
    Busy,
}

pub struct RuntimeConfig {
    report_interval_ms: AtomicU32,
    reporting_blocked: AtomicBool,
    current_max_children: AtomicU8,
    reconfig_phase: AtomicU8,
    reconfig_wake: Signal<CriticalSectionRawMutex, ()>,
}

impl RuntimeConfig {
    pub fn new(report_interval_ms: u32, max_children: u8) -> Self {
        Self {
            report_interval_ms: AtomicU32::new(report_interval_ms),
            reporting_blocked: AtomicBool::new(false),
            current_max_children: AtomicU8::new(max_children),
            reconfig_phase: AtomicU8::new(PHASE_IDLE),
            reconfig_wake: Signal::new(),
        }
    }

    pub fn report_interval_ms(&self) -> u32 {
        self.report_interval_ms.load(Ordering::Relaxed)
    }

    pub fn reporting_blocked(&self) -> bool {
        self.reporting_blocked.load(Ordering::Relaxed)
    }

    pub fn current_max_children(&self) -> u8 {
        self.current_max_children.load(Ordering::Acquire)
    }

    /// Applies an `interval` command: zero pauses reporting, anything else
    /// resumes it at the new period (saturated to `u32::MAX` ms).
    pub fn apply_interval(&self, interval_ms: u64) {
        if interval_ms == 0 {
            self.reporting_blocked.store(true, Ordering::Relaxed);
        } else {
            let interval = u32::try_from(interval_ms).unwrap_or(u32::MAX);
            self.report_interval_ms.store(interval, Ordering::Relaxed);
            self.reporting_blocked.store(false, Ordering::Relaxed);
        }
    }

    /// Requests a new fan-out limit.
    ///
    /// The caller is responsible for range-checking `max_children`.
    pub fn request_max_children(&self, max_children: u8) -> MaxChildrenRequest {
        if max_children == self.current_max_children() {
            return MaxChildrenRequest::Unchanged;
        }
        if self
            .reconfig_phase
            .compare_exchange(PHASE_IDLE, PHASE_CLAIMED, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return MaxChildrenRequest::Busy;
        }
        self.current_max_children.store(max_children, Ordering::Release);
        self.reconfig_phase.store(PHASE_PENDING, Ordering::Release);
        self.reconfig_wake.signal(());
        MaxChildrenRequest::Accepted
    }

    /// Whether a stored request is waiting for (or undergoing) reconfiguration.
    pub fn reconfig_pending(&self) -> bool {
        self.reconfig_phase.load(Ordering::Acquire) == PHASE_PENDING
    }

    /// Clears the pending flag once the stack is running with the new value.
    pub fn finish_reconfig(&self) {
        self.reconfig_phase.store(PHASE_IDLE, Ordering::Release);
    }

    /// Resolves when a request is accepted. May also resolve spuriously.
    pub async fn reconfig_requested(&self) {
        self.reconfig_wake.wait().await
    }
}

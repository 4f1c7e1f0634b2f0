//! Reconfiguration controller.
//!
//! Rebuilds the mesh stack when the fan-out limit changes:
//!
//! ```text
//! Stable --pending & active / stop--> StopRequested --inactive--> Stopped
//!   ^                                  (skipped when stop is synchronous)  |
//!   |                                                     deinit, init, set-config
//!   +--------- jitter, start, clear pending ---------- Restarting <--------+
//! ```
//!
//! While the stack is down the reporter's "active" check suppresses sends and
//! the receive task simply sees no packets. Every lifecycle failure is returned
//! as a [`LifecycleError`], which the task treats as fatal.

use embassy_time::{Duration, Timer, with_timeout};
use rand::Rng;

use crate::address::self_address;
use crate::config::MeshSettings;
use crate::error::{LifecycleError, fatal};
use crate::indicator::Indicator;
use crate::mesh::{MeshConfig, MeshStack};
use crate::runtime::RuntimeConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconfigState {
    Stable,
    /// Stop issued, waiting for the stack to report inactive.
    StopRequested,
    Stopped,
    /// Reconfigured, waiting out the jitter before start.
    Restarting,
}

pub struct ReconfigController<'a> {
    stack: &'a dyn MeshStack,
    indicator: &'a dyn Indicator,
    runtime: &'a RuntimeConfig,
    settings: &'a MeshSettings,
    jitter_max_ms: u64,
    state: ReconfigState,
}

impl<'a> ReconfigController<'a> {
    pub fn new(stack: &'a dyn MeshStack, indicator: &'a dyn Indicator, runtime: &'a RuntimeConfig, settings: &'a MeshSettings, jitter_max_ms: u64) -> Self {
        Self {
            stack,
            indicator,
            runtime,
            settings,
            jitter_max_ms,
            state: ReconfigState::Stable,
        }
    }

    pub fn state(&self) -> ReconfigState {
        self.state
    }

    fn transition(&mut self, next: ReconfigState) {
        log::info!("[{}] reconfiguration {:?} -> {:?}", self_address(self.stack.radio_address()), self.state, next);
        self.state = next;
    }

    /// Advances the state machine by at most one transition.
    pub async fn step(&mut self) -> Result<ReconfigState, LifecycleError> {
        match self.state {
            ReconfigState::Stable => {
                if self.runtime.reconfig_pending() && self.stack.is_active() {
                    log::info!(
                        "[{}] restarting mesh with max_children {}",
                        self_address(self.stack.radio_address()),
                        self.runtime.current_max_children()
                    );
                    self.indicator.reconfiguring();
                    self.stack.stop()?;
                    if self.stack.is_active() {
                        self.transition(ReconfigState::StopRequested);
                    } else {
                        self.transition(ReconfigState::Stopped);
                    }
                }
            }
            ReconfigState::StopRequested => {
                if !self.stack.is_active() {
                    self.transition(ReconfigState::Stopped);
                }
            }
            ReconfigState::Stopped => {
                self.stack.deinit()?;
                self.stack.init()?;
                let config = MeshConfig::new(self.settings, self.runtime.current_max_children());
                self.stack.set_config(&config)?;
                self.transition(ReconfigState::Restarting);
            }
            ReconfigState::Restarting => {
                let jitter = if self.jitter_max_ms == 0 { 0 } else { rand::thread_rng().gen_range(0..=self.jitter_max_ms) };
                log::debug!("[{}] waiting {} ms before restart", self_address(self.stack.radio_address()), jitter);
                Timer::after(Duration::from_millis(jitter)).await;
                self.stack.start()?;
                self.runtime.finish_reconfig();
                self.transition(ReconfigState::Stable);
            }
        }
        Ok(self.state)
    }

    /// Drives the state machine forever.
    ///
    /// When stable it sleeps until a request is signalled or `poll` elapses;
    /// the periodic wake-up also covers a request that arrived while the stack
    /// was inactive. Lifecycle failures abort the process.
    pub async fn run(&mut self, poll: Duration) -> ! {
        loop {
            match self.state {
                ReconfigState::Stable => {
                    let _ = with_timeout(poll, self.runtime.reconfig_requested()).await;
                }
                ReconfigState::StopRequested => Timer::after(poll).await,
                ReconfigState::Stopped | ReconfigState::Restarting => {}
            }
            if let Err(err) = self.step().await {
                fatal(&format!("[{}] reconfiguration:", self_address(self.stack.radio_address())), err);
            }
        }
    }
}

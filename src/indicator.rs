//! Visual status indicator (the node's RGB LEDs).
//!
//! Pin driving is platform code behind [`Indicator`]. This module owns the
//! layer colour scheme and the blink sequence used by the `blink` command.

use embassy_time::{Duration, Timer};

use crate::config::BlinkPattern;

/// Colour shown for a node's layer in the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerColor {
    Red,
    Green,
    Blue,
    /// All LEDs on.
    White,
}

impl LayerColor {
    pub fn for_layer(layer: u32) -> Self {
        match layer {
            1 => LayerColor::Red,
            2 => LayerColor::Green,
            3 => LayerColor::Blue,
            _ => LayerColor::White,
        }
    }
}

pub trait Indicator {
    /// Switches every LED on or off.
    fn set_all(&self, on: bool);

    fn show_layer(&self, color: LayerColor);

    /// Tree joined at `layer`.
    fn connected(&self, layer: u32);

    fn disconnected(&self);

    /// The mesh stack is being torn down for reconfiguration.
    fn reconfiguring(&self);
}

/// Flashes all LEDs according to `pattern`.
///
/// Suspends only the calling task, for at most `pattern.total_ms()`.
pub async fn blink(indicator: &dyn Indicator, pattern: &BlinkPattern) {
    for _ in 0..pattern.cycles {
        indicator.set_all(true);
        Timer::after(Duration::from_millis(pattern.on_ms)).await;
        indicator.set_all(false);
        Timer::after(Duration::from_millis(pattern.off_ms)).await;
    }
    Timer::after(Duration::from_millis(pattern.settle_ms)).await;
}

/// Indicator that only logs, for targets without LEDs.
pub struct LogIndicator {
    label: String,
}

impl LogIndicator {
    pub fn new(label: impl Into<String>) -> Self {
        Self { label: label.into() }
    }
}

impl Indicator for LogIndicator {
    fn set_all(&self, on: bool) {
        log::trace!("[{}] LEDs {}", self.label, if on { "on" } else { "off" });
    }

    fn show_layer(&self, color: LayerColor) {
        log::trace!("[{}] layer colour {:?}", self.label, color);
    }

    fn connected(&self, layer: u32) {
        log::debug!("[{}] indicator: connected at layer {}", self.label, layer);
    }

    fn disconnected(&self) {
        log::debug!("[{}] indicator: disconnected", self.label);
    }

    fn reconfiguring(&self) {
        log::debug!("[{}] indicator: reconfiguring", self.label);
    }
}

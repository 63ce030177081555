//! Debounce gate for the dictation trigger.
//!
//! Hotkeys and tray clicks can re-fire within milliseconds; the gate
//! swallows re-triggers inside a cooldown window using plain timestamp
//! comparison, independent of any UI framework.

use std::time::{Duration, Instant};

#[derive(Debug)]
pub struct CooldownGate {
    window: Duration,
    last_fired: Option<Instant>,
}

impl CooldownGate {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_fired: None,
        }
    }

    /// Returns true when the trigger may fire, recording the attempt.
    /// Re-triggers within the cooldown window return false.
    pub fn try_fire(&mut self) -> bool {
        match self.last_fired {
            Some(t) if t.elapsed() < self.window => false,
            _ => {
                self.last_fired = Some(Instant::now());
                true
            }
        }
    }

    pub fn reset(&mut self) {
        self.last_fired = None;
    }
}

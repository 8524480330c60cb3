//! Packet loss simulation for receive paths.
//!
//! Loss is applied after a datagram has been read off the socket, so a dropped datagram
//! is simply never seen by the channel above.

use rand::Rng;

pub trait LossSimulator {
    /// Called once per received datagram. Returning true discards it.
    fn should_drop(&mut self) -> bool;
}

/// Delivers everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoLoss;

impl LossSimulator for NoLoss {
    fn should_drop(&mut self) -> bool {
        false
    }
}

/// Drops the back half of every window of `window` datagrams.
///
/// A datagram is dropped when `counter % window > window / 2`. Deterministic, which
/// makes it useful for reproducing retransmission behavior in tests.
#[derive(Debug, Clone, Copy)]
pub struct WindowDrop {
    window: u32,
    counter: u32,
}

impl WindowDrop {
    pub fn new(window: u32) -> Self {
        Self { window, counter: 0 }
    }
}

impl LossSimulator for WindowDrop {
    fn should_drop(&mut self) -> bool {
        if self.window == 0 {
            return false;
        }
        let position = self.counter % self.window;
        self.counter = self.counter.wrapping_add(1);
        position > self.window / 2
    }
}

/// Drops each datagram independently with the given probability.
#[derive(Debug, Clone, Copy)]
pub struct RandomLoss {
    percent: f64,
}

impl RandomLoss {
    pub fn new(percent: f64) -> Self {
        Self {
            percent: percent.clamp(0.0, 100.0),
        }
    }
}

impl LossSimulator for RandomLoss {
    fn should_drop(&mut self) -> bool {
        self.percent > 0.0 && rand::thread_rng().gen_range(0.0..100.0) < self.percent
    }
}

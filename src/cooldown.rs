use std::time::{Duration, Instant};

/// Single rate-limit gate shared by every class and region.
///
/// A batch passes when no batch has passed yet, or when strictly more than
/// `cooldown` has elapsed since the last one that did.
#[derive(Clone, Debug)]
pub struct CooldownGate {
    cooldown: Duration,
    last_admitted: Option<Instant>,
}

impl CooldownGate {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last_admitted: None,
        }
    }

    pub fn set_cooldown(&mut self, cooldown: Duration) {
        self.cooldown = cooldown;
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    pub fn last_admitted(&self) -> Option<Instant> {
        self.last_admitted
    }

    /// Would a batch at `now` pass? Does not update the gate.
    pub fn is_open(&self, now: Instant) -> bool {
        match self.last_admitted {
            Some(last) => now.saturating_duration_since(last) > self.cooldown,
            None => true,
        }
    }

    /// Admit a batch at `now` if the gate is open, stamping the gate on success.
    pub fn admit(&mut self, now: Instant) -> bool {
        if !self.is_open(now) {
            return false;
        }
        self.last_admitted = Some(now);
        true
    }

    pub fn reset(&mut self) {
        self.last_admitted = None;
    }
}

/// Submission cooldown. A single countdown in whole ticks; the owner decides how
/// long a tick is (the studio ticks once per second).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Cooldown {
    remaining: u64,
}

impl Cooldown {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces whatever is left of a running countdown.
    pub fn start(&mut self, seconds: u64) {
        self.remaining = seconds;
    }

    /// Advances the countdown by one tick. Returns `true` when this tick ended it.
    pub fn tick(&mut self) -> bool {
        if self.remaining == 0 {
            return false;
        }
        self.remaining -= 1;
        self.remaining == 0
    }

    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    pub fn is_active(&self) -> bool {
        self.remaining > 0
    }
}

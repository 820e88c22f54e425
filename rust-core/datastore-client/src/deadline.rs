use tokio::time::Instant;

/// A request-wide monotonic deadline (spec §5 "Cancellation / timeout").
/// Cloning shares the same deadline instant; `remaining_ms` is
/// monotonically non-increasing across the waves of one request, which is
/// the property §8 tests directly.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    deadline_at: Instant,
}

impl Deadline {
    pub fn starting_now(timeout_in_ms: u64) -> Self {
        Self {
            deadline_at: Instant::now() + std::time::Duration::from_millis(timeout_in_ms),
        }
    }

    #[cfg(test)]
    pub fn at(deadline_at: Instant) -> Self {
        Self { deadline_at }
    }

    /// Milliseconds left before the deadline, negative once it has passed.
    pub fn remaining_ms(&self) -> i64 {
        let now = Instant::now();
        if now >= self.deadline_at {
            -(now.duration_since(self.deadline_at).as_millis() as i64)
        } else {
            self.deadline_at.duration_since(now).as_millis() as i64
        }
    }

    pub fn has_expired(&self) -> bool {
        self.remaining_ms() <= 0
    }
}

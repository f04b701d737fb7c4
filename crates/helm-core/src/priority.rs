//! Shared priority levels for commands and events.

use serde::{Deserialize, Serialize};

/// Priority band. Ordered so that `CRITICAL < HIGH < NORMAL < LOW` fails to
/// read naturally as "higher is more urgent" — instead we give it an
/// explicit numeric rank via [`Priority::rank`] and implement `Ord` in terms
/// of that, so `Priority::Critical > Priority::Low` holds (bigger = more
/// urgent), matching a `BinaryHeap` max-heap directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Lowest priority; dispatched last.
    Low,
    /// Default priority for ordinary work.
    Normal,
    /// Above normal; dispatched before normal/low.
    High,
    /// Highest priority; may preempt queued low-priority work (§4.I).
    Critical,
}

impl Priority {
    /// Numeric rank where larger means more urgent.
    #[must_use]
    pub const fn rank(self) -> u8 {
        match self {
            Self::Low => 0,
            Self::Normal => 1,
            Self::High => 2,
            Self::Critical => 3,
        }
    }
}

impl PartialOrd for Priority {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Priority {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.rank().cmp(&other.rank())
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::Normal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn critical_outranks_everything() {
        assert!(Priority::Critical > Priority::High);
        assert!(Priority::High > Priority::Normal);
        assert!(Priority::Normal > Priority::Low);
    }
}

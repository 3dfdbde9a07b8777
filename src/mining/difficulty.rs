// Difficulty - success threshold for a hash
//
// target = u64::MAX / difficulty; a hash succeeds when its leading 64 bits
// are <= target. Difficulty 1 accepts every hash; each doubling halves the
// expected success rate.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u64", into = "u64")]
pub struct Difficulty(u64);

impl Difficulty {
    pub const MIN: Difficulty = Difficulty(1);
    pub const MAX: Difficulty = Difficulty(u64::MAX);

    /// None for zero
    pub fn new(value: u64) -> Option<Self> {
        (value >= 1).then_some(Self(value))
    }

    pub fn value(self) -> u64 {
        self.0
    }

    pub fn target(self) -> u64 {
        u64::MAX / self.0
    }

    pub fn is_met_by(self, hash_value: u64) -> bool {
        hash_value <= self.target()
    }

    /// Retarget after a successful run
    pub fn doubled(self) -> Self {
        Self(self.0.saturating_mul(2))
    }

    /// Retarget after an unsuccessful run
    pub fn halved(self) -> Self {
        Self((self.0 / 2).max(1))
    }
}

impl Default for Difficulty {
    fn default() -> Self {
        Self::MIN
    }
}

impl TryFrom<u64> for Difficulty {
    type Error = String;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        Self::new(value).ok_or_else(|| "difficulty must be at least 1".to_string())
    }
}

impl From<Difficulty> for u64 {
    fn from(difficulty: Difficulty) -> Self {
        difficulty.0
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

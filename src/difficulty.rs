//! Work thresholds per network and block kind, and the multiplier arithmetic
//! used to compare them.

use crate::crypto::Network;

/// Highest multiplier over the base threshold we will ever ask a worker for.
pub const MAX_MULTIPLIER: f64 = 8.0;

const NANO_RECEIVE: u64 = 0xfffffe0000000000;
const NANO_SEND: u64 = 0xfffffff800000000;
const BANANO_BASE: u64 = 0xfffffe0000000000;

const TWO_64: f64 = 18_446_744_073_709_551_616.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DifficultyModel {
    pub base_receive: u64,
    pub base_send: u64,
}

impl DifficultyModel {
    pub fn for_network(network: Network) -> Self {
        match network {
            Network::Nano => DifficultyModel { base_receive: NANO_RECEIVE, base_send: NANO_SEND },
            Network::Banano => DifficultyModel { base_receive: BANANO_BASE, base_send: BANANO_BASE },
        }
    }

    /// Same threshold for every block kind. Handy for test networks.
    pub fn uniform(base: u64) -> Self {
        DifficultyModel { base_receive: base, base_send: base }
    }

    /// Base threshold for a block: send and change use `base_send`.
    pub fn base_for(&self, is_receive: bool) -> u64 {
        if is_receive {
            self.base_receive
        } else {
            self.base_send
        }
    }

    /// The threshold to actually request: `requested` if given, the base
    /// otherwise, never above `MAX_MULTIPLIER` times the base.
    pub fn effective(&self, is_receive: bool, requested: Option<u64>) -> u64 {
        let base = self.base_for(is_receive);
        adjust(requested.unwrap_or(base), base)
    }
}

/// How many times harder `difficulty` is than `base`.
pub fn multiplier(difficulty: u64, base: u64) -> f64 {
    let num = (u64::MAX - base) as f64 + 1.0;
    let den = (u64::MAX - difficulty) as f64 + 1.0;
    num / den
}

/// Threshold that is `m` times harder than `base`.
pub fn from_multiplier(m: f64, base: u64) -> u64 {
    if m <= 0.0 {
        return base;
    }
    let span = ((u64::MAX - base) as u128 + 1) as f64;
    let target = TWO_64 - span / m;
    if target >= TWO_64 {
        u64::MAX
    } else if target <= 0.0 {
        0
    } else {
        target as u64
    }
}

/// Clamp `requested` to at most `MAX_MULTIPLIER` times `base`.
pub fn adjust(requested: u64, base: u64) -> u64 {
    if multiplier(requested, base) > MAX_MULTIPLIER {
        from_multiplier(MAX_MULTIPLIER, base)
    } else {
        requested
    }
}

//! Beacon chain time arithmetic.
//!
//! All functions are pure and total over unsigned integers; callers are
//! responsible for never passing a timestamp earlier than genesis.

use serde::Deserialize;

/// Immutable per-process beacon chain parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct Eth2Config {
    pub genesis_time: u64,
    pub genesis_epoch: u64,
    pub seconds_per_slot: u64,
    pub slots_per_epoch: u64,
}

impl Eth2Config {
    pub fn seconds_per_epoch(&self) -> u64 {
        self.seconds_per_slot * self.slots_per_epoch
    }

    /// The epoch in progress at `time`.
    pub fn epoch_at_timestamp(&self, time: u64) -> u64 {
        self.genesis_epoch + (time - self.genesis_time) / self.seconds_per_epoch()
    }

    /// The slot in progress at `time`.
    pub fn slot_at_timestamp(&self, time: u64) -> u64 {
        (time - self.genesis_time) / self.seconds_per_slot
    }

    pub fn start_slot_of_epoch(&self, epoch: u64) -> u64 {
        self.slots_per_epoch * epoch
    }

    pub fn end_slot_of_epoch(&self, epoch: u64) -> u64 {
        self.slots_per_epoch * (epoch + 1) - 1
    }

    pub fn start_timestamp_of_epoch(&self, epoch: u64) -> u64 {
        (epoch - self.genesis_epoch) * self.seconds_per_epoch() + self.genesis_time
    }

    pub fn timestamp_of_slot(&self, slot: u64) -> u64 {
        slot * self.seconds_per_slot + self.genesis_time
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mainnet() -> Eth2Config {
        Eth2Config {
            genesis_time: 1606824023,
            genesis_epoch: 0,
            seconds_per_slot: 12,
            slots_per_epoch: 32,
        }
    }

    #[test]
    fn slot_and_epoch_arithmetic() {
        let cfg = mainnet();
        assert_eq!(cfg.seconds_per_epoch(), 384);
        assert_eq!(cfg.slot_at_timestamp(1606824023 + 12), 1);
        assert_eq!(cfg.start_timestamp_of_epoch(1), 1606824023 + 384);
        assert_eq!(cfg.start_slot_of_epoch(3), 96);
        assert_eq!(cfg.end_slot_of_epoch(0), 31);
        assert_eq!(cfg.timestamp_of_slot(32), cfg.start_timestamp_of_epoch(1));
    }

    #[test]
    fn epoch_of_its_own_start_slot() {
        let cfg = mainnet();
        for epoch in [0u64, 1, 7, 100_000, 250_113] {
            let ts = cfg.timestamp_of_slot(cfg.start_slot_of_epoch(epoch));
            assert_eq!(cfg.epoch_at_timestamp(ts), epoch);
        }
    }

    #[test]
    fn nonzero_genesis_epoch() {
        let cfg = Eth2Config {
            genesis_epoch: 10,
            ..mainnet()
        };
        assert_eq!(cfg.epoch_at_timestamp(cfg.genesis_time), 10);
        assert_eq!(cfg.start_timestamp_of_epoch(11), cfg.genesis_time + 384);
    }
}

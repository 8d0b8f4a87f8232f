//! On-chain enumerations shared by the contracts and the service state.

use crate::error::{Error, Result};

/// Lifecycle of a validator as the LSD contracts track it.
///
/// Values 0-10 follow the deposit and beacon progression; 51-55 mirror the
/// beacon tail with the slash bit set. Transitions only ever move forward
/// along each axis and the slash bit, once set, persists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ValidatorStatus {
    Uninitial = 0,
    Deposited = 1,
    WithdrawMatch = 2,
    Staked = 3,
    WithdrawUnmatch = 4,
    Waiting = 5,
    Active = 6,
    Exited = 7,
    Withdrawable = 8,
    WithdrawDone = 9,
    Distributed = 10,
    ActiveSlash = 51,
    ExitedSlash = 52,
    WithdrawableSlash = 53,
    WithdrawDoneSlash = 54,
    DistributedSlash = 55,
}

impl ValidatorStatus {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn slashed(self) -> bool {
        self.as_u8() >= 51
    }

    /// The same status with the slash bit applied. Statuses before the beacon
    /// tail have no slashed variant and are returned unchanged.
    pub fn with_slash(self) -> Self {
        match self {
            Self::Active => Self::ActiveSlash,
            Self::Exited => Self::ExitedSlash,
            Self::Withdrawable => Self::WithdrawableSlash,
            Self::WithdrawDone => Self::WithdrawDoneSlash,
            Self::Distributed => Self::DistributedSlash,
            other => other,
        }
    }

    /// Position along the beacon-state axis, slash bit ignored. `None` for
    /// statuses that have not reached the beacon chain yet.
    pub fn beacon_rank(self) -> Option<u8> {
        let rank = match self {
            Self::Waiting => 0,
            Self::Active | Self::ActiveSlash => 1,
            Self::Exited | Self::ExitedSlash => 2,
            Self::Withdrawable | Self::WithdrawableSlash => 3,
            Self::WithdrawDone | Self::WithdrawDoneSlash => 4,
            Self::Distributed | Self::DistributedSlash => 5,
            _ => return None,
        };
        Some(rank)
    }
}

impl TryFrom<u8> for ValidatorStatus {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        let status = match value {
            0 => Self::Uninitial,
            1 => Self::Deposited,
            2 => Self::WithdrawMatch,
            3 => Self::Staked,
            4 => Self::WithdrawUnmatch,
            5 => Self::Waiting,
            6 => Self::Active,
            7 => Self::Exited,
            8 => Self::Withdrawable,
            9 => Self::WithdrawDone,
            10 => Self::Distributed,
            51 => Self::ActiveSlash,
            52 => Self::ExitedSlash,
            53 => Self::WithdrawableSlash,
            54 => Self::WithdrawDoneSlash,
            55 => Self::DistributedSlash,
            other => return Err(Error::UnknownValidatorStatus(other)),
        };
        Ok(status)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum NodeType {
    Light = 1,
    Trust = 2,
}

impl TryFrom<u8> for NodeType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(Self::Light),
            2 => Ok(Self::Trust),
            other => Err(Error::UnknownNodeType(other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum NodeClaimType {
    None = 0,
    ClaimReward = 1,
    ClaimDeposit = 2,
    ClaimTotal = 3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DistributeType {
    None = 0,
    Withdrawals = 1,
    PriorityFee = 2,
}

impl DistributeType {
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips() {
        for raw in (0u8..=10).chain(51..=55) {
            let status = ValidatorStatus::try_from(raw).unwrap();
            assert_eq!(status.as_u8(), raw);
        }
        assert!(ValidatorStatus::try_from(11).is_err());
        assert!(ValidatorStatus::try_from(50).is_err());
        assert!(ValidatorStatus::try_from(56).is_err());
    }

    #[test]
    fn slash_bit() {
        assert_eq!(
            ValidatorStatus::Active.with_slash(),
            ValidatorStatus::ActiveSlash
        );
        assert!(ValidatorStatus::ActiveSlash.slashed());
        assert!(!ValidatorStatus::Active.slashed());
        // slash variants keep their beacon rank.
        assert_eq!(
            ValidatorStatus::Exited.beacon_rank(),
            ValidatorStatus::ExitedSlash.beacon_rank()
        );
        // pre-beacon statuses have no slashed variant.
        assert_eq!(
            ValidatorStatus::Deposited.with_slash(),
            ValidatorStatus::Deposited
        );
    }

    #[test]
    fn beacon_axis_is_ordered() {
        let axis = [
            ValidatorStatus::Waiting,
            ValidatorStatus::Active,
            ValidatorStatus::Exited,
            ValidatorStatus::Withdrawable,
            ValidatorStatus::WithdrawDone,
            ValidatorStatus::Distributed,
        ];
        for pair in axis.windows(2) {
            assert!(pair[0].beacon_rank() < pair[1].beacon_rank());
        }
        assert_eq!(ValidatorStatus::Deposited.beacon_rank(), None);
    }
}

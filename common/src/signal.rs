//! Status-lamp pulse patterns, the only user feedback in physical mode.
//! The lamp driver lives in the binary; picking a pattern is pure logic.

use crate::channel::CommandOutcome;
use crate::protocol::RelayState;

/// A blink sequence: `count` pulses, each `period_ms` on then `period_ms`
/// off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PulsePattern {
    pub count: u8,
    pub period_ms: u64,
}

impl PulsePattern {
    /// Relay acknowledged on.
    pub const ACK_ON: Self = Self {
        count: 2,
        period_ms: 200,
    };
    /// Relay acknowledged off.
    pub const ACK_OFF: Self = Self {
        count: 3,
        period_ms: 200,
    };
    /// Window closed without an acknowledgement.
    pub const NO_REPLY: Self = Self {
        count: 5,
        period_ms: 50,
    };
    /// Transceiver failed to come up.
    pub const LINK_FAULT: Self = Self {
        count: 10,
        period_ms: 50,
    };
    /// Interactive session opening.
    pub const SESSION_OPEN: Self = Self {
        count: 1,
        period_ms: 1_000,
    };

    pub fn for_outcome(outcome: &CommandOutcome) -> Self {
        match outcome {
            Ok(ack) => match ack.relay {
                RelayState::On => Self::ACK_ON,
                RelayState::Off => Self::ACK_OFF,
            },
            Err(_) => Self::NO_REPLY,
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::channel::AckTimeout;
    use crate::protocol::{Acknowledgement, DEVICE_ID};

    #[test]
    fn outcomes_pick_their_patterns() {
        let on = Ok(Acknowledgement {
            device_id: DEVICE_ID,
            relay: RelayState::On,
        });
        let off = Ok(Acknowledgement {
            device_id: DEVICE_ID,
            relay: RelayState::Off,
        });
        let timeout = Err(AckTimeout { window_ms: 4_000 });

        assert_eq!(PulsePattern::for_outcome(&on), PulsePattern::ACK_ON);
        assert_eq!(PulsePattern::for_outcome(&off), PulsePattern::ACK_OFF);
        assert_eq!(PulsePattern::for_outcome(&timeout), PulsePattern::NO_REPLY);
    }

    #[test]
    fn fault_patterns_are_fast_and_distinct() {
        assert_eq!(PulsePattern::NO_REPLY.period_ms, PulsePattern::LINK_FAULT.period_ms);
        assert_ne!(PulsePattern::NO_REPLY.count, PulsePattern::LINK_FAULT.count);
    }
}

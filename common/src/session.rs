//! Interactive-session state: the status line the front-end shows and the
//! activity clock that drives the sleep decision. One instance per boot,
//! created at interactive-mode entry; nothing here survives deep sleep.

use crate::channel::CommandOutcome;
use crate::protocol::RelayState;

/// The session closes after this long without a front-end request.
pub const IDLE_SLEEP_TIMEOUT_MS: u64 = 300_000;

/// Outcome of the most recent exchange, as the front-end reports it. No
/// history is kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Pending,
    RelayOn,
    RelayOff,
    NoResponse,
}

impl SessionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::RelayOn => "ON",
            Self::RelayOff => "OFF",
            Self::NoResponse => "ERROR: NO RESPONSE",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Session {
    status: SessionStatus,
    last_activity_ms: u64,
}

impl Session {
    pub fn new(now_ms: u64) -> Self {
        Self {
            status: SessionStatus::Pending,
            last_activity_ms: now_ms,
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    /// Every exchange overwrites the status, so it never lags the most
    /// recent command.
    pub fn record_outcome(&mut self, outcome: &CommandOutcome) {
        self.status = match outcome {
            Ok(ack) => match ack.relay {
                RelayState::On => SessionStatus::RelayOn,
                RelayState::Off => SessionStatus::RelayOff,
            },
            Err(_) => SessionStatus::NoResponse,
        };
    }

    /// Called after each front-end request completes.
    pub fn touch(&mut self, now_ms: u64) {
        self.last_activity_ms = now_ms;
    }

    pub fn last_activity_ms(&self) -> u64 {
        self.last_activity_ms
    }

    /// True once strictly more than the idle timeout has passed since the
    /// last touch.
    pub fn idle_expired(&self, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.last_activity_ms) > IDLE_SLEEP_TIMEOUT_MS
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::channel::AckTimeout;
    use crate::protocol::{Acknowledgement, DEVICE_ID};

    fn confirmed(relay: RelayState) -> CommandOutcome {
        Ok(Acknowledgement {
            device_id: DEVICE_ID,
            relay,
        })
    }

    #[test]
    fn fresh_session_is_pending() {
        let session = Session::new(5_000);
        assert_eq!(session.status(), SessionStatus::Pending);
        assert_eq!(session.last_activity_ms(), 5_000);
    }

    #[test]
    fn outcomes_map_to_statuses() {
        let mut session = Session::new(0);

        session.record_outcome(&confirmed(RelayState::On));
        assert_eq!(session.status(), SessionStatus::RelayOn);

        session.record_outcome(&confirmed(RelayState::Off));
        assert_eq!(session.status(), SessionStatus::RelayOff);

        session.record_outcome(&Err(AckTimeout { window_ms: 4_000 }));
        assert_eq!(session.status(), SessionStatus::NoResponse);
    }

    #[test]
    fn status_recovers_after_a_timeout() {
        let mut session = Session::new(0);
        session.record_outcome(&Err(AckTimeout { window_ms: 4_000 }));
        session.record_outcome(&confirmed(RelayState::On));
        assert_eq!(session.status(), SessionStatus::RelayOn);
    }

    #[test]
    fn idle_expiry_is_strictly_after_the_timeout() {
        let mut session = Session::new(0);
        session.touch(1_000);

        assert!(!session.idle_expired(1_000 + IDLE_SLEEP_TIMEOUT_MS));
        assert!(session.idle_expired(1_001 + IDLE_SLEEP_TIMEOUT_MS));
    }

    #[test]
    fn touch_resets_the_idle_countdown() {
        let mut session = Session::new(0);
        session.touch(200_000);
        session.touch(400_000);
        assert!(!session.idle_expired(400_000 + IDLE_SLEEP_TIMEOUT_MS));
    }

    #[test]
    fn status_strings_match_the_front_end_contract() {
        assert_eq!(SessionStatus::Pending.as_str(), "PENDING");
        assert_eq!(SessionStatus::RelayOn.as_str(), "ON");
        assert_eq!(SessionStatus::RelayOff.as_str(), "OFF");
        assert_eq!(SessionStatus::NoResponse.as_str(), "ERROR: NO RESPONSE");
    }
}

//! Command/acknowledgement exchange over the half-duplex radio.
//!
//! One exchange at a time: encode the command, transmit it twice, then poll
//! the receiver until a matching acknowledgement arrives or the window
//! closes. The link layer offers no delivery guarantee in either direction,
//! so the double send papers over loss on the way out and the window bounds
//! loss on the way back.

use thiserror::Error;

use crate::clock::Clock;
use crate::protocol::{Acknowledgement, Command, Frame, DEVICE_ID, FRAME_LEN};

/// Every logical command goes out as this many identical frames.
pub const TX_BURST: u8 = 2;
/// Gap between the burst frames so the transceiver can re-arm.
pub const INTER_TX_GAP_MS: u64 = 20;
/// How long the receiver waits, measured from the end of the burst.
pub const ACK_WINDOW_MS: u64 = 4_000;
/// Receiver poll granularity inside the window.
pub const RX_POLL_INTERVAL_MS: u64 = 5;

/// One non-blocking look at the receiver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RxPoll {
    Received(Vec<u8>),
    Empty,
}

/// Byte-level access to the half-duplex radio. Implementations log and drop
/// transport faults internally; the exchange treats a lost frame the same as
/// ordinary channel loss.
pub trait RadioLink {
    fn transmit(&mut self, frame: &[u8; FRAME_LEN]);
    fn try_receive(&mut self) -> RxPoll;
}

/// The single failure mode of an exchange: the window closed without an
/// acceptable acknowledgement. Nothing distinguishes a dead peer, a jammed
/// channel, or a mismatched link configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("no acknowledgement within {window_ms} ms")]
pub struct AckTimeout {
    pub window_ms: u64,
}

pub type CommandOutcome = Result<Acknowledgement, AckTimeout>;

/// Runs one full exchange. Blocks (via `clock`) for up to the burst gap plus
/// the acknowledgement window.
pub fn send_command<L, C>(link: &mut L, clock: &C, command: Command) -> CommandOutcome
where
    L: RadioLink,
    C: Clock,
{
    let frame = Frame::for_command(command).encode();
    for sent in 1..=TX_BURST {
        link.transmit(&frame);
        if sent < TX_BURST {
            clock.sleep_ms(INTER_TX_GAP_MS);
        }
    }

    let deadline_ms = clock.now_ms().saturating_add(ACK_WINDOW_MS);
    while clock.now_ms() < deadline_ms {
        if let RxPoll::Received(payload) = link.try_receive() {
            if let Some(ack) = accept(&payload) {
                return Ok(ack);
            }
        }
        clock.sleep_ms(RX_POLL_INTERVAL_MS);
    }

    Err(AckTimeout {
        window_ms: ACK_WINDOW_MS,
    })
}

/// Inbound filter: exact frame length, then our identifier, then an
/// acknowledgement code. The identifier is checked before the code byte is
/// interpreted, so foreign traffic that happens to carry a valid code never
/// matches. Rejected payloads cost one poll slot and nothing else.
fn accept(payload: &[u8]) -> Option<Acknowledgement> {
    let frame = Frame::parse(payload)?;
    if frame.device_id != DEVICE_ID {
        return None;
    }
    frame.as_acknowledgement()
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::clock::FakeClock;
    use crate::protocol::RelayState;

    struct ScriptedLink {
        sent: Vec<[u8; FRAME_LEN]>,
        inbound: VecDeque<RxPoll>,
    }

    impl ScriptedLink {
        fn new(inbound: Vec<RxPoll>) -> Self {
            Self {
                sent: Vec::new(),
                inbound: inbound.into(),
            }
        }

        fn silent() -> Self {
            Self::new(Vec::new())
        }
    }

    impl RadioLink for ScriptedLink {
        fn transmit(&mut self, frame: &[u8; FRAME_LEN]) {
            self.sent.push(*frame);
        }

        fn try_receive(&mut self) -> RxPoll {
            self.inbound.pop_front().unwrap_or(RxPoll::Empty)
        }
    }

    fn ack(relay: RelayState) -> RxPoll {
        RxPoll::Received(Frame::for_ack(relay).encode().to_vec())
    }

    #[test]
    fn command_goes_out_twice_with_the_burst_gap() {
        let clock = FakeClock::new(0);
        let mut link = ScriptedLink::new(vec![ack(RelayState::On)]);

        let outcome = send_command(&mut link, &clock, Command::RelayOn);

        assert!(outcome.is_ok());
        assert_eq!(link.sent.len(), 2);
        assert_eq!(link.sent[0], link.sent[1]);
        assert_eq!(link.sent[0], [DEVICE_ID, Command::RelayOn.code()]);
    }

    #[test]
    fn matching_ack_resolves_the_exchange() {
        let clock = FakeClock::new(0);
        let mut link = ScriptedLink::new(vec![ack(RelayState::On)]);

        let outcome = send_command(&mut link, &clock, Command::RelayOn);

        assert_eq!(
            outcome,
            Ok(Acknowledgement {
                device_id: DEVICE_ID,
                relay: RelayState::On,
            })
        );
    }

    #[test]
    fn silent_peer_times_out_at_the_window_deadline() {
        let clock = FakeClock::new(0);
        let mut link = ScriptedLink::silent();

        let outcome = send_command(&mut link, &clock, Command::GetStatus);

        assert_eq!(
            outcome,
            Err(AckTimeout {
                window_ms: ACK_WINDOW_MS,
            })
        );
        // One burst gap, then the whole window consumed in poll steps.
        assert_eq!(clock.now_ms(), INTER_TX_GAP_MS + ACK_WINDOW_MS);
    }

    #[test]
    fn foreign_identifier_never_satisfies_the_wait() {
        let clock = FakeClock::new(0);
        let mut bytes = Frame::for_ack(RelayState::On).encode().to_vec();
        bytes[0] = DEVICE_ID ^ 0xFF;
        let mut link = ScriptedLink::new(vec![RxPoll::Received(bytes)]);

        let outcome = send_command(&mut link, &clock, Command::RelayOn);

        assert!(outcome.is_err());
    }

    #[test]
    fn wrong_length_payloads_are_skipped_not_fatal() {
        let clock = FakeClock::new(0);
        let mut link = ScriptedLink::new(vec![
            RxPoll::Received(vec![0xD4]),
            RxPoll::Received(vec![DEVICE_ID, 0xD4, 0x00]),
            ack(RelayState::On),
        ]);

        let outcome = send_command(&mut link, &clock, Command::RelayOn);

        assert_eq!(
            outcome.map(|a| a.relay),
            Ok(RelayState::On)
        );
    }

    #[test]
    fn junk_traffic_does_not_extend_the_deadline() {
        let clock = FakeClock::new(0);
        let mut link = ScriptedLink::new(vec![
            RxPoll::Received(vec![0x00]),
            RxPoll::Received(vec![DEVICE_ID ^ 0x01, 0xE5]),
            RxPoll::Received(vec![DEVICE_ID, 0x42]),
        ]);

        let outcome = send_command(&mut link, &clock, Command::RelayOff);

        assert!(outcome.is_err());
        assert_eq!(clock.now_ms(), INTER_TX_GAP_MS + ACK_WINDOW_MS);
    }

    #[test]
    fn own_command_echo_is_ignored_while_waiting() {
        let clock = FakeClock::new(0);
        let echo = Frame::for_command(Command::RelayOn).encode().to_vec();
        let mut link = ScriptedLink::new(vec![RxPoll::Received(echo), ack(RelayState::On)]);

        let outcome = send_command(&mut link, &clock, Command::RelayOn);

        assert_eq!(outcome.map(|a| a.relay), Ok(RelayState::On));
    }

    #[test]
    fn acknowledgement_is_not_cross_checked_against_the_command() {
        let clock = FakeClock::new(0);
        let mut link = ScriptedLink::new(vec![ack(RelayState::Off)]);

        let outcome = send_command(&mut link, &clock, Command::RelayOn);

        assert_eq!(outcome.map(|a| a.relay), Ok(RelayState::Off));
    }

    #[test]
    fn status_query_is_stateless_and_repeatable() {
        let clock = FakeClock::new(0);

        let mut first = ScriptedLink::new(vec![ack(RelayState::Off)]);
        let mut second = ScriptedLink::new(vec![ack(RelayState::Off)]);

        let a = send_command(&mut first, &clock, Command::GetStatus);
        let b = send_command(&mut second, &clock, Command::GetStatus);

        assert_eq!(a, b);
        assert_eq!(first.sent, second.sent);
    }
}

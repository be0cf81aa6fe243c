//! Wire format shared with the relay unit: fixed two-byte frames, one
//! identifier byte followed by one code byte.

/// Identifier both ends agree on out-of-band. A frame carrying any other
/// value is someone else's traffic.
pub const DEVICE_ID: u8 = 0x77;

/// Frames are exactly this long. Any other inbound length is noise.
pub const FRAME_LEN: usize = 2;

const CMD_RELAY_ON: u8 = 0xA1;
const CMD_RELAY_OFF: u8 = 0xB2;
const CMD_GET_STATUS: u8 = 0xC3;
const ACK_RELAY_IS_ON: u8 = 0xD4;
const ACK_RELAY_IS_OFF: u8 = 0xE5;

/// Orders the remote can issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    RelayOn,
    RelayOff,
    GetStatus,
}

impl Command {
    pub fn code(self) -> u8 {
        match self {
            Self::RelayOn => CMD_RELAY_ON,
            Self::RelayOff => CMD_RELAY_OFF,
            Self::GetStatus => CMD_GET_STATUS,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            CMD_RELAY_ON => Some(Self::RelayOn),
            CMD_RELAY_OFF => Some(Self::RelayOff),
            CMD_GET_STATUS => Some(Self::GetStatus),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::RelayOn => "relay-on",
            Self::RelayOff => "relay-off",
            Self::GetStatus => "get-status",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    On,
    Off,
}

/// Reply from the relay unit, tagged with the identifier it arrived under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Acknowledgement {
    pub device_id: u8,
    pub relay: RelayState,
}

/// One frame as it travels over the air. `code` stays raw so that inbound
/// traffic can be identifier-filtered before the code byte is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    pub device_id: u8,
    pub code: u8,
}

impl Frame {
    pub fn for_command(command: Command) -> Self {
        Self {
            device_id: DEVICE_ID,
            code: command.code(),
        }
    }

    pub fn for_ack(relay: RelayState) -> Self {
        Self {
            device_id: DEVICE_ID,
            code: match relay {
                RelayState::On => ACK_RELAY_IS_ON,
                RelayState::Off => ACK_RELAY_IS_OFF,
            },
        }
    }

    pub fn encode(self) -> [u8; FRAME_LEN] {
        [self.device_id, self.code]
    }

    /// `None` unless the payload is exactly one frame long.
    pub fn parse(payload: &[u8]) -> Option<Self> {
        if payload.len() != FRAME_LEN {
            return None;
        }
        Some(Self {
            device_id: payload[0],
            code: payload[1],
        })
    }

    pub fn as_command(self) -> Option<Command> {
        Command::from_code(self.code)
    }

    /// `None` unless the code byte is one of the two acknowledgement codes.
    /// Command codes, echoes included, never read as acknowledgements.
    pub fn as_acknowledgement(self) -> Option<Acknowledgement> {
        let relay = match self.code {
            ACK_RELAY_IS_ON => RelayState::On,
            ACK_RELAY_IS_OFF => RelayState::Off,
            _ => return None,
        };
        Some(Acknowledgement {
            device_id: self.device_id,
            relay,
        })
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn command_frame_encodes_identifier_then_code() {
        assert_eq!(Frame::for_command(Command::RelayOn).encode(), [0x77, 0xA1]);
        assert_eq!(Frame::for_command(Command::RelayOff).encode(), [0x77, 0xB2]);
        assert_eq!(
            Frame::for_command(Command::GetStatus).encode(),
            [0x77, 0xC3]
        );
    }

    #[test]
    fn ack_frames_round_trip() {
        let bytes = Frame::for_ack(RelayState::On).encode();
        let parsed = Frame::parse(&bytes).unwrap();
        assert_eq!(
            parsed.as_acknowledgement(),
            Some(Acknowledgement {
                device_id: DEVICE_ID,
                relay: RelayState::On,
            })
        );
    }

    #[test]
    fn parse_rejects_anything_but_two_bytes() {
        assert_eq!(Frame::parse(&[]), None);
        assert_eq!(Frame::parse(&[0x77]), None);
        assert_eq!(Frame::parse(&[0x77, 0xD4, 0x00]), None);
    }

    #[test]
    fn parse_keeps_foreign_identifiers_raw() {
        let frame = Frame::parse(&[0x12, 0xD4]).unwrap();
        assert_eq!(frame.device_id, 0x12);
        assert_eq!(frame.as_acknowledgement().unwrap().device_id, 0x12);
    }

    #[test]
    fn command_codes_are_not_acknowledgements() {
        let echo = Frame::for_command(Command::RelayOn);
        assert_eq!(echo.as_acknowledgement(), None);
        assert_eq!(echo.as_command(), Some(Command::RelayOn));
    }

    #[test]
    fn unknown_codes_parse_to_neither() {
        let frame = Frame::parse(&[DEVICE_ID, 0x00]).unwrap();
        assert_eq!(frame.as_command(), None);
        assert_eq!(frame.as_acknowledgement(), None);
    }
}

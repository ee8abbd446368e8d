/*!
Frame encoding and reply decoding.

Outbound reports carry a reserved HID report id followed by the frame:

```text
[0] reserved (0)  [1] SIG  [2] SIG  [3] len  [4] cmd  [5..] payload
```

Inbound reports arrive without the report id. The length byte always counts
the payload plus two (the length byte itself and the command byte).
*/

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::protocol::{HEADER_LEN, LENGTH_OVERHEAD, MAX_PAYLOAD_LEN, RESERVED, SIGNATURE};

/// Command codes understood by the controller board
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Command {
    ServoMove = 3,
    GetBatteryVoltage = 15,
    ServoStop = 20,
    GetServoPosition = 21,
}

impl Command {
    /// Parse a command from its wire code
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            3 => Some(Self::ServoMove),
            15 => Some(Self::GetBatteryVoltage),
            20 => Some(Self::ServoStop),
            21 => Some(Self::GetServoPosition),
            _ => None,
        }
    }

    /// Wire code of this command
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Whether the board answers this command
    pub fn expects_reply(self) -> bool {
        matches!(self, Self::GetBatteryVoltage | Self::GetServoPosition)
    }
}

/// Build an outbound report for `command` carrying `payload`
pub fn encode(command: Command, payload: &[u8]) -> Result<Bytes> {
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(Error::encoding(format!(
            "payload of {} bytes exceeds the {} byte frame limit",
            payload.len(),
            MAX_PAYLOAD_LEN
        )));
    }

    let mut buf = BytesMut::with_capacity(1 + HEADER_LEN + payload.len());
    buf.put_u8(RESERVED);
    buf.put_u8(SIGNATURE);
    buf.put_u8(SIGNATURE);
    buf.put_u8((payload.len() + LENGTH_OVERHEAD) as u8);
    buf.put_u8(command.code());
    buf.put_slice(payload);
    Ok(buf.freeze())
}

/// Extract the payload of a reply to `expected`.
///
/// Returns `None` for anything that is not a well-formed frame for that
/// command: missing signature, a different command code, or a length byte
/// that points past the end of the buffer. Trailing report padding is
/// ignored.
pub fn decode(raw: &[u8], expected: Command) -> Option<&[u8]> {
    let frame = strip_report_id(raw);
    if frame.len() < HEADER_LEN || frame[0] != SIGNATURE || frame[1] != SIGNATURE {
        return None;
    }
    if frame[3] != expected.code() {
        return None;
    }

    let payload_len = (frame[2] as usize).checked_sub(LENGTH_OVERHEAD)?;
    frame.get(HEADER_LEN..HEADER_LEN + payload_len)
}

/// Total size of the inbound frame starting at `buf[0]`, once its header is visible
pub fn frame_size(buf: &[u8]) -> Option<usize> {
    match buf {
        [SIGNATURE, SIGNATURE, len, ..] if *len as usize >= LENGTH_OVERHEAD => Some(2 + *len as usize),
        _ => None,
    }
}

/// Some HID stacks hand the report id back on reads; skip it when present
fn strip_report_id(raw: &[u8]) -> &[u8] {
    match raw {
        [RESERVED, SIGNATURE, SIGNATURE, ..] => &raw[1..],
        _ => raw,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_codes() {
        assert_eq!(Command::from_u8(3), Some(Command::ServoMove));
        assert_eq!(Command::from_u8(21), Some(Command::GetServoPosition));
        assert_eq!(Command::from_u8(0x42), None);
        assert_eq!(Command::GetBatteryVoltage.code(), 15);
        assert!(Command::GetServoPosition.expects_reply());
        assert!(!Command::ServoStop.expects_reply());
    }

    #[test]
    fn test_encode_layout() {
        let frame = encode(Command::ServoMove, &[1, 0xe8, 0x03, 2, 0xf4, 0x01]).unwrap();
        assert_eq!(
            &frame[..],
            &[0x00, 0x55, 0x55, 8, 3, 1, 0xe8, 0x03, 2, 0xf4, 0x01]
        );
    }

    #[test]
    fn test_empty_payload_round_trip() {
        let frame = encode(Command::GetBatteryVoltage, &[]).unwrap();
        assert_eq!(&frame[..], &[0x00, 0x55, 0x55, 2, 15]);
        assert_eq!(decode(&frame, Command::GetBatteryVoltage), Some(&[][..]));
        assert_eq!(decode(&frame, Command::GetServoPosition), None);
    }

    #[test]
    fn test_decode_reply_with_padding() {
        let mut report = vec![0x55, 0x55, 6, 21, 1, 3, 0x00, 0x02];
        report.resize(64, 0);
        assert_eq!(decode(&report, Command::GetServoPosition), Some(&[1, 3, 0x00, 0x02][..]));
    }

    #[test]
    fn test_decode_rejects_foreign_frames() {
        // wrong signature
        assert_eq!(decode(&[0x55, 0xAA, 4, 15, 0x10, 0x27], Command::GetBatteryVoltage), None);
        // too short to hold a header
        assert_eq!(decode(&[0x55, 0x55, 2], Command::GetBatteryVoltage), None);
        assert_eq!(decode(&[], Command::GetBatteryVoltage), None);
    }

    #[test]
    fn test_decode_discards_bad_length() {
        // declares 10 payload bytes, carries 2
        assert_eq!(decode(&[0x55, 0x55, 12, 15, 0x10, 0x27], Command::GetBatteryVoltage), None);
        // length smaller than its own overhead
        assert_eq!(decode(&[0x55, 0x55, 1, 15, 0x10, 0x27], Command::GetBatteryVoltage), None);
    }

    #[test]
    fn test_encode_payload_limit() {
        assert!(encode(Command::ServoStop, &[0u8; MAX_PAYLOAD_LEN]).is_ok());
        let err = encode(Command::ServoStop, &[0u8; MAX_PAYLOAD_LEN + 1]).unwrap_err();
        assert!(matches!(err, Error::Encoding(_)));
    }

    #[test]
    fn test_frame_size() {
        assert_eq!(frame_size(&[0x55, 0x55, 4, 15]), Some(6));
        assert_eq!(frame_size(&[0x55, 0x55]), None);
        assert_eq!(frame_size(&[0x55, 0x00, 4]), None);
        assert_eq!(frame_size(&[0x55, 0x55, 1]), None);
    }
}

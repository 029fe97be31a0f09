use serde::{Deserialize, Serialize};

const FLAG_ALARM: u8 = 0x80;
const FLAG_INFO: u8 = 0x40;
const FLAG_HEARTBEAT: u8 = 0x20;
const FLAG_DOOR_OPEN: u8 = 0x01;

/// One simulated sensor reading.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub alarm: bool,
    pub info: bool,
    pub heartbeat: bool,
    pub door_open: bool,
    pub temperature: f64,
    pub voltage: f64,
}

impl Frame {
    /// Flag byte, three ASCII digits of decidegrees, then ASCII millivolts.
    pub fn encode(&self) -> Vec<u8> {
        let mut flags = 0u8;
        if self.alarm {
            flags |= FLAG_ALARM;
        }
        if self.info {
            flags |= FLAG_INFO;
        }
        if self.heartbeat {
            flags |= FLAG_HEARTBEAT;
        }
        if self.door_open {
            flags |= FLAG_DOOR_OPEN;
        }

        let decidegrees = (self.temperature * 10.0).round().clamp(-99.0, 999.0) as i64;
        let millivolts = (self.voltage * 1000.0).round().max(0.0) as i64;

        let mut out = vec![flags];
        out.extend_from_slice(format!("{:03}", decidegrees).as_bytes());
        out.extend_from_slice(millivolts.to_string().as_bytes());
        out
    }
}

/// Body the radio backend POSTs to the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Uplink {
    pub device: String,
    pub ts: i64,
    pub data: String,
    pub ack: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_matches_device_layout() {
        let frame = Frame {
            alarm: false,
            info: false,
            heartbeat: false,
            door_open: false,
            temperature: 26.1,
            voltage: 5.825,
        };
        assert_eq!(hex::encode(frame.encode()), "0032363135383235");
    }

    #[test]
    fn test_encode_flags() {
        let frame = Frame {
            alarm: true,
            info: false,
            heartbeat: true,
            door_open: true,
            temperature: 2.0,
            voltage: 3.3,
        };
        let bytes = frame.encode();
        assert_eq!(bytes[0], 0xA1);
        assert_eq!(&bytes[1..], b"0203300");
    }
}

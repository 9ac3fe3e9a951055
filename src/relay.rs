//! Relay Agent Information (Option 82) decoding per RFC 3046.
//!
//! The option value is a stream of sub-options, each encoded as
//! {code (1), length (1), value (length)}. Sub-option 1 is the Agent
//! Circuit ID, sub-option 2 the Agent Remote ID.
//!
//! Access switches on this network encode the client-facing port number in
//! the circuit ID and their own hostname in the remote ID, so both fields
//! are surfaced here for diagnostics. Extraction is strictly best-effort:
//! anything that is absent or shorter than expected leaves the field `None`
//! and never fails the request.

const SUBOPT_CIRCUIT_ID: u8 = 1;
const SUBOPT_REMOTE_ID: u8 = 2;

/// Offset of the port number within the circuit ID payload.
const CIRCUIT_PORT_OFFSET: usize = 4;

/// Leading bytes of the remote ID payload before the hostname starts.
const REMOTE_ID_HEADER_LEN: usize = 2;

/// Diagnostic fields recovered from a relayed request.
///
/// None of these values participate in the assignment decision.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayInfo {
    /// Switch port the request came in on, if the circuit ID carried one.
    pub port: Option<u16>,
    /// Identity of the relaying switch, if the remote ID carried one.
    pub switch: Option<String>,
}

impl RelayInfo {
    /// Decodes the raw Option 82 value.
    ///
    /// A truncated sub-option ends the walk; whatever was decoded up to
    /// that point is kept.
    pub fn parse(data: &[u8]) -> Self {
        let mut info = Self::default();
        let mut index = 0;

        while index + 2 <= data.len() {
            let code = data[index];
            let length = data[index + 1] as usize;
            let end = index + 2 + length;
            if end > data.len() {
                break;
            }
            let value = &data[index + 2..end];

            match code {
                SUBOPT_CIRCUIT_ID => {
                    if value.len() >= CIRCUIT_PORT_OFFSET + 2 {
                        info.port = Some(u16::from_be_bytes([
                            value[CIRCUIT_PORT_OFFSET],
                            value[CIRCUIT_PORT_OFFSET + 1],
                        ]));
                    }
                }
                SUBOPT_REMOTE_ID => {
                    if value.len() > REMOTE_ID_HEADER_LEN {
                        info.switch = Some(
                            String::from_utf8_lossy(&value[REMOTE_ID_HEADER_LEN..]).into_owned(),
                        );
                    }
                }
                _ => {}
            }

            index = end;
        }

        info
    }

    /// Returns true if nothing useful was decoded.
    pub fn is_empty(&self) -> bool {
        self.port.is_none() && self.switch.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sub_option(code: u8, value: &[u8]) -> Vec<u8> {
        let mut out = vec![code, value.len() as u8];
        out.extend_from_slice(value);
        out
    }

    #[test]
    fn test_circuit_and_remote_id() {
        let mut data = sub_option(SUBOPT_CIRCUIT_ID, &[0, 4, 0, 1, 0x00, 0x17]);
        data.extend(sub_option(SUBOPT_REMOTE_ID, b"\x01\x06sw-b2-07"));

        let info = RelayInfo::parse(&data);
        assert_eq!(info.port, Some(0x0017));
        assert_eq!(info.switch.as_deref(), Some("sw-b2-07"));
        assert!(!info.is_empty());
    }

    #[test]
    fn test_short_circuit_id_omits_port() {
        let data = sub_option(SUBOPT_CIRCUIT_ID, &[0, 4, 0]);
        let info = RelayInfo::parse(&data);
        assert_eq!(info.port, None);
        assert_eq!(info.switch, None);
    }

    #[test]
    fn test_short_remote_id_omits_switch() {
        let data = sub_option(SUBOPT_REMOTE_ID, &[0x01, 0x06]);
        let info = RelayInfo::parse(&data);
        assert_eq!(info.switch, None);
    }

    #[test]
    fn test_empty_buffer() {
        let info = RelayInfo::parse(&[]);
        assert!(info.is_empty());
    }

    #[test]
    fn test_truncated_sub_option_keeps_earlier_fields() {
        let mut data = sub_option(SUBOPT_CIRCUIT_ID, &[0, 4, 0, 1, 0x00, 0x2a]);
        // remote ID claims 10 bytes but only 3 follow
        data.extend_from_slice(&[SUBOPT_REMOTE_ID, 10, b'a', b'b', b'c']);

        let info = RelayInfo::parse(&data);
        assert_eq!(info.port, Some(0x002a));
        assert_eq!(info.switch, None);
    }

    #[test]
    fn test_unknown_sub_options_skipped() {
        let mut data = sub_option(9, &[1, 2, 3]);
        data.extend(sub_option(SUBOPT_REMOTE_ID, b"\x01\x06sw-a1-01"));

        let info = RelayInfo::parse(&data);
        assert_eq!(info.switch.as_deref(), Some("sw-a1-01"));
    }

    #[test]
    fn test_non_utf8_remote_id_decoded_lossily() {
        let data = sub_option(SUBOPT_REMOTE_ID, &[0x01, 0x06, 0xff, 0xfe, b'x']);
        let info = RelayInfo::parse(&data);
        assert!(info.switch.is_some());
    }
}

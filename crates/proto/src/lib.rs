//! Semtech gateway message protocol encoding for loragate
//!
//! Builds the outbound PUSH_DATA datagrams (received packets and
//! periodic statistics) and validates the PUSH_ACK responses coming
//! back from the network servers. The JSON payload internals are not
//! interpreted anywhere else; the delivery subsystem only relies on
//! the four-byte acknowledgment matching rule.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod encode;

pub use encode::{data_packet, stat_packet};

pub const PROTOCOL_VERSION: u8 = 2;

pub const PKT_PUSH_DATA: u8 = 0x00;
pub const PKT_PUSH_ACK: u8 = 0x01;
pub const PKT_PULL_DATA: u8 = 0x02;
pub const PKT_PULL_RESP: u8 = 0x03;
pub const PKT_PULL_ACK: u8 = 0x04;

/// Bytes in a bare GWMP header: version, token, identifier.
pub const HEADER_LEN: usize = 4;

#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("failed to read the MAC address of interface `{0}`")]
    Interface(String, #[source] std::io::Error),

    #[error("malformed MAC address `{0}`")]
    MalformedMac(String),
}

/// 64-bit gateway identifier derived from the NIC MAC address, with
/// 0xFFFE spliced into the middle per the usual EUI-64 expansion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Eui([u8; 8]);

impl Eui {
    pub fn from_mac(mac: [u8; 6]) -> Self {
        Eui([
            mac[0], mac[1], mac[2], 0xFF, 0xFF, mac[3], mac[4], mac[5],
        ])
    }

    /// Read the interface's MAC address from sysfs and expand it.
    pub fn from_interface(name: &str) -> Result<Self, ProtoError> {
        let path = format!("/sys/class/net/{}/address", name);
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ProtoError::Interface(name.to_string(), e))?;
        Self::parse_mac(raw.trim())
    }

    fn parse_mac(raw: &str) -> Result<Self, ProtoError> {
        let mut mac = [0u8; 6];
        let mut parts = raw.split(':');
        for byte in mac.iter_mut() {
            let part = parts
                .next()
                .ok_or_else(|| ProtoError::MalformedMac(raw.to_string()))?;
            *byte = u8::from_str_radix(part, 16)
                .map_err(|_| ProtoError::MalformedMac(raw.to_string()))?;
        }
        if parts.next().is_some() {
            return Err(ProtoError::MalformedMac(raw.to_string()));
        }
        Ok(Self::from_mac(mac))
    }

    pub fn as_bytes(&self) -> &[u8; 8] {
        &self.0
    }
}

impl fmt::Display for Eui {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// Gateway coordinates advertised in stat messages.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: i32,
}

/// Push-acknowledgment matching rule: the response echoes the first
/// three header bytes of the original message and carries the PUSH_ACK
/// identifier in its fourth byte. Anything else is a delivery failure.
pub fn is_push_ack(original: &[u8], response: &[u8]) -> bool {
    original.len() > HEADER_LEN
        && response.len() >= HEADER_LEN
        && original[..3] == response[..3]
        && response[3] == PKT_PUSH_ACK
}

#[cfg(test)]
mod tests {
    use super::*;

    fn original() -> Vec<u8> {
        vec![PROTOCOL_VERSION, 0xAB, 0xCD, PKT_PUSH_DATA, 0x01, 0x02]
    }

    #[test]
    fn matching_ack_is_accepted() {
        let ack = [PROTOCOL_VERSION, 0xAB, 0xCD, PKT_PUSH_ACK];
        assert!(is_push_ack(&original(), &ack));
    }

    #[test]
    fn extra_response_bytes_are_tolerated() {
        let ack = [PROTOCOL_VERSION, 0xAB, 0xCD, PKT_PUSH_ACK, 0xFF];
        assert!(is_push_ack(&original(), &ack));
    }

    #[test]
    fn each_mismatched_header_byte_is_rejected() {
        for i in 0..3 {
            let mut ack = [PROTOCOL_VERSION, 0xAB, 0xCD, PKT_PUSH_ACK];
            ack[i] ^= 0x01;
            assert!(!is_push_ack(&original(), &ack), "byte {} mismatch", i);
        }
    }

    #[test]
    fn wrong_identifier_is_rejected() {
        let ack = [PROTOCOL_VERSION, 0xAB, 0xCD, PKT_PULL_ACK];
        assert!(!is_push_ack(&original(), &ack));
    }

    #[test]
    fn short_or_empty_responses_are_rejected() {
        assert!(!is_push_ack(&original(), &[PROTOCOL_VERSION, 0xAB, 0xCD]));
        assert!(!is_push_ack(&original(), &[]));
    }

    #[test]
    fn headerless_original_never_matches() {
        // nothing shorter than a header plus payload is ever sent
        let ack = [PROTOCOL_VERSION, 0xAB, 0xCD, PKT_PUSH_ACK];
        assert!(!is_push_ack(&[PROTOCOL_VERSION, 0xAB, 0xCD, PKT_PUSH_DATA], &ack));
    }

    #[test]
    fn eui_expands_the_mac() {
        let eui = Eui::from_mac([0xB8, 0x27, 0xEB, 0x12, 0x34, 0x56]);
        assert_eq!(
            eui.as_bytes(),
            &[0xB8, 0x27, 0xEB, 0xFF, 0xFF, 0x12, 0x34, 0x56]
        );
        assert_eq!(eui.to_string(), "b827ebffff123456");
    }

    #[test]
    fn mac_parsing_rejects_garbage() {
        assert!(Eui::parse_mac("b8:27:eb:12:34").is_err());
        assert!(Eui::parse_mac("b8:27:eb:12:34:56:78").is_err());
        assert!(Eui::parse_mac("not a mac").is_err());
        assert!(Eui::parse_mac("b8:27:eb:12:34:56").is_ok());
    }
}

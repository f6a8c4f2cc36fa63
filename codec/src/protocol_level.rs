// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use serde::{Deserialize, Serialize};
use std::convert::TryFrom;
use std::fmt;

use crate::base::{DecodeData, EncodeData};
use crate::{ByteArray, DecodeError, EncodeError};

/// Protocol name carried in CONNECT packets, a 4-byte UTF-8 string.
///
/// If the protocol name is incorrect the Server MAY disconnect the Client
/// [MQTT-3.1.2-1].
pub const PROTOCOL_NAME: &str = "MQTT";

/// Protocol version byte in the CONNECT variable header.
#[repr(u8)]
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum ProtocolLevel {
    /// MQTT 3.1.1, wire value 4.
    V311 = 4,

    /// MQTT 5.0, wire value 5.
    #[default]
    V5 = 5,
}

impl ProtocolLevel {
    /// Get byte length used in packet.
    #[must_use]
    pub const fn bytes() -> usize {
        1
    }

    /// Get the other supported protocol level, used for version fallback.
    #[must_use]
    pub const fn fallback(self) -> Self {
        match self {
            Self::V311 => Self::V5,
            Self::V5 => Self::V311,
        }
    }
}

impl fmt::Display for ProtocolLevel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::V311 => write!(f, "3.1.1"),
            Self::V5 => write!(f, "5.0"),
        }
    }
}

impl TryFrom<u8> for ProtocolLevel {
    type Error = DecodeError;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            4 => Ok(Self::V311),
            5 => Ok(Self::V5),
            _ => Err(DecodeError::InvalidProtocolLevel),
        }
    }
}

impl DecodeData for ProtocolLevel {
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let byte = ba.read_byte()?;
        Self::try_from(byte)
    }
}

impl EncodeData for ProtocolLevel {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        buf.push(*self as u8);
        Ok(Self::bytes())
    }
}

mod private {
    pub trait Sealed {}
    impl Sealed for super::V311 {}
    impl Sealed for super::V5 {}
}

/// Type level protocol version selector.
///
/// Packet encoders and decoders are generic over this trait so that both
/// wire versions share one skeleton per packet type, with the capability
/// consts gating the parts that only exist in one version.
pub trait ProtocolVersion:
    private::Sealed + Copy + Default + fmt::Debug + Send + Sync + 'static
{
    /// Wire protocol level of this version.
    const LEVEL: ProtocolLevel;

    /// Property blocks are present in the variable header.
    const HAS_PROPERTIES: bool;

    /// Acknowledgement packets carry a reason code byte.
    const HAS_REASON_CODE: bool;
}

/// Marker for MQTT 3.1.1.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct V311;

/// Marker for MQTT 5.0.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct V5;

impl ProtocolVersion for V311 {
    const LEVEL: ProtocolLevel = ProtocolLevel::V311;
    const HAS_PROPERTIES: bool = false;
    const HAS_REASON_CODE: bool = false;
}

impl ProtocolVersion for V5 {
    const LEVEL: ProtocolLevel = ProtocolLevel::V5;
    const HAS_PROPERTIES: bool = true;
    const HAS_REASON_CODE: bool = true;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_level() {
        assert_eq!(ProtocolLevel::try_from(4).unwrap(), ProtocolLevel::V311);
        assert_eq!(ProtocolLevel::try_from(5).unwrap(), ProtocolLevel::V5);
        assert!(ProtocolLevel::try_from(3).is_err());
        assert_eq!(ProtocolLevel::V311.fallback(), ProtocolLevel::V5);
    }

    #[test]
    fn test_version_consts() {
        assert_eq!(V311::LEVEL, ProtocolLevel::V311);
        assert!(!V311::HAS_PROPERTIES);
        assert_eq!(V5::LEVEL, ProtocolLevel::V5);
        assert!(V5::HAS_PROPERTIES);
    }
}

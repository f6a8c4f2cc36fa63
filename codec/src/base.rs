// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use byteorder::{BigEndian, WriteBytesExt};
use serde::{Deserialize, Serialize};
use std::cmp;
use std::convert::TryFrom;
use std::fmt;

use crate::{ByteArray, DecodeError, EncodeError, ProtocolVersion};

/// Convert wire primitives, integers, strings, binary chunks and property
/// blocks, into the network byte stream. Primitives have the same layout
/// in both protocol versions.
pub trait EncodeData {
    /// Append this value to `buf`, returning number of bytes written.
    ///
    /// # Errors
    ///
    /// Returns error if this value violates wire format rules.
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError>;
}

/// Parse wire primitives from the network byte stream.
pub trait DecodeData: Sized {
    /// Read one value from the cursor.
    ///
    /// # Errors
    ///
    /// Returns error if bytes violate wire format rules.
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError>;
}

/// Serialize a whole control packet for protocol version `V`.
///
/// The version is a type parameter per call so that MQTT 3.1.1 and MQTT 5.0
/// share one encoder skeleton per packet type.
pub trait EncodePacket {
    /// Append fixed header, variable header and payload to `buf`, returning
    /// number of bytes written. The remaining length field is computed
    /// exactly.
    ///
    /// # Errors
    ///
    /// Returns error if packet fields violate wire format rules.
    fn encode<V: ProtocolVersion>(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError>;
}

/// Parse a whole control packet expected to conform to protocol version `V`.
///
/// Decoding fails if the wire contradicts the expected version, e.g. a
/// property block appears where the version forbids one.
pub trait DecodePacket: Sized {
    /// Read one packet from the cursor, starting at the fixed header.
    ///
    /// # Errors
    ///
    /// Returns error if bytes violate wire format rules.
    fn decode<V: ProtocolVersion>(ba: &mut ByteArray) -> Result<Self, DecodeError>;
}

/// Packet identifier.
///
/// Each time a Client sends a new SUBSCRIBE, UNSUBSCRIBE, or PUBLISH
/// (where QoS > 0) MQTT Control Packet it MUST assign it a non-zero
/// Packet Identifier that is currently unused [MQTT-2.2.1-3].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PacketId(u16);

impl PacketId {
    /// Create a new packet id.
    #[must_use]
    pub const fn new(value: u16) -> Self {
        Self(value)
    }

    /// Get inner u16 value.
    #[must_use]
    pub const fn value(&self) -> u16 {
        self.0
    }

    /// Get byte length used in packet.
    #[must_use]
    pub const fn bytes() -> usize {
        2
    }
}

impl fmt::Display for PacketId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl cmp::PartialEq<u16> for PacketId {
    fn eq(&self, value: &u16) -> bool {
        self.0 == *value
    }
}

impl DecodeData for PacketId {
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let value = ba.read_u16()?;
        Ok(Self(value))
    }
}

impl EncodeData for PacketId {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        buf.write_u16::<BigEndian>(self.0)?;
        Ok(Self::bytes())
    }
}

/// Quality of service level of message delivery.
#[repr(u8)]
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum QoS {
    /// At most once delivery.
    #[default]
    AtMostOnce = 0,

    /// At least once delivery.
    AtLeastOnce = 1,

    /// Exactly once delivery.
    ExactOnce = 2,
}

impl QoS {
    /// Get byte length used in packet.
    #[must_use]
    pub const fn bytes() -> usize {
        1
    }
}

impl TryFrom<u8> for QoS {
    type Error = DecodeError;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(Self::AtMostOnce),
            1 => Ok(Self::AtLeastOnce),
            2 => Ok(Self::ExactOnce),
            _ => Err(DecodeError::InvalidQoS),
        }
    }
}

impl DecodeData for QoS {
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let byte = ba.read_byte()?;
        Self::try_from(byte)
    }
}

impl EncodeData for QoS {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        buf.push(*self as u8);
        Ok(Self::bytes())
    }
}

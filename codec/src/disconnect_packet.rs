// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use crate::base::{DecodeData, EncodeData};
use crate::property::check_property_type_list;
use crate::{
    ByteArray, DecodeError, DecodePacket, EncodeError, EncodePacket, FixedHeader, PacketType,
    Properties, PropertyType, ProtocolVersion, ReasonCode,
};

/// Properties available in DISCONNECT packets.
pub const DISCONNECT_PROPERTIES: &[PropertyType] = &[
    PropertyType::SessionExpiryInterval,
    PropertyType::ReasonString,
    PropertyType::UserProperty,
    PropertyType::ServerReference,
];

/// The DISCONNECT packet is the final MQTT Control Packet sent from the
/// Client or the Server. It indicates the reason why the Network Connection
/// is being closed.
///
/// In MQTT 3.1.1 this packet has no variable header and no payload. In
/// MQTT 5.0 the reason code and property length can be omitted when the
/// reason is 0x00 (Normal disconnection) and there are no properties.
#[allow(clippy::module_name_repetitions)]
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DisconnectPacket {
    /// Disconnect reason, MQTT 5.0 only.
    reason_code: ReasonCode,

    /// Disconnect properties, MQTT 5.0 only.
    properties: Properties,
}

impl DisconnectPacket {
    /// Create a new DISCONNECT packet with reason Normal disconnection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_reason_code(&mut self, reason_code: ReasonCode) -> &mut Self {
        self.reason_code = reason_code;
        self
    }

    #[must_use]
    pub const fn reason_code(&self) -> ReasonCode {
        self.reason_code
    }

    /// Get a mutable reference to the property list.
    pub fn properties_mut(&mut self) -> &mut Properties {
        &mut self.properties
    }

    #[must_use]
    pub const fn properties(&self) -> &Properties {
        &self.properties
    }
}

impl EncodePacket for DisconnectPacket {
    fn encode<V: ProtocolVersion>(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        let old_len = buf.len();
        let mut remaining_length = 0;
        let verbose = V::HAS_REASON_CODE
            && (self.reason_code != ReasonCode::Success || !self.properties.is_empty());
        if verbose {
            remaining_length += ReasonCode::bytes();
            if !self.properties.is_empty() {
                remaining_length += self.properties.bytes()?;
            }
        }

        let fixed_header = FixedHeader::new(PacketType::Disconnect, remaining_length)
            .map_err(|_| EncodeError::InvalidVarInt)?;
        fixed_header.encode(buf)?;
        if verbose {
            self.reason_code.encode(buf)?;
            if !self.properties.is_empty() {
                self.properties.encode(buf)?;
            }
        }
        Ok(buf.len() - old_len)
    }
}

impl DecodePacket for DisconnectPacket {
    fn decode<V: ProtocolVersion>(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let fixed_header = FixedHeader::decode(ba)?;
        if fixed_header.packet_type() != PacketType::Disconnect {
            return Err(DecodeError::InvalidPacketType);
        }

        let mut packet = Self::new();
        if V::HAS_REASON_CODE {
            if fixed_header.remaining_length() > 0 {
                packet.reason_code = ReasonCode::decode_for(ba, PacketType::Disconnect)?;
            }
            if fixed_header.remaining_length() > ReasonCode::bytes() {
                let properties = Properties::decode(ba)?;
                if let Err(property_type) =
                    check_property_type_list(properties.props(), DISCONNECT_PROPERTIES)
                {
                    log::error!("disconnect: Forbidden property {property_type:?} in DISCONNECT");
                    return Err(DecodeError::ForbiddenProperty);
                }
                packet.properties = properties;
            }
        } else if fixed_header.remaining_length() != 0 {
            return Err(DecodeError::InvalidRemainingLength);
        }

        Ok(packet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{V311, V5};

    #[test]
    fn test_round_trip_v311() {
        let packet = DisconnectPacket::new();
        let mut buf = Vec::new();
        packet.encode::<V311>(&mut buf).unwrap();
        assert_eq!(buf, vec![0xe0, 0x00]);

        let mut ba = ByteArray::new(&buf);
        assert!(DisconnectPacket::decode::<V311>(&mut ba).is_ok());
    }

    #[test]
    fn test_round_trip_v5_reason() {
        let mut packet = DisconnectPacket::new();
        packet.set_reason_code(ReasonCode::KeepAliveTimeout);
        let mut buf = Vec::new();
        packet.encode::<V5>(&mut buf).unwrap();
        assert_eq!(buf, vec![0xe0, 0x01, 0x8d]);

        let mut ba = ByteArray::new(&buf);
        let decoded = DisconnectPacket::decode::<V5>(&mut ba).unwrap();
        assert_eq!(decoded.reason_code(), ReasonCode::KeepAliveTimeout);
    }
}

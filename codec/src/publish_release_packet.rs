// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use crate::base::{DecodeData, EncodeData};
use crate::property::check_property_type_list;
use crate::publish_ack_packet::ACK_PROPERTIES;
use crate::{
    ByteArray, DecodeError, DecodePacket, EncodeError, EncodePacket, FixedHeader, PacketId,
    PacketType, Properties, ProtocolVersion, ReasonCode,
};

/// PUBREL packet is the response to a PUBREC packet. It is the third packet
/// of the QoS 2 protocol exchange.
///
/// Bits 3,2,1 and 0 of the fixed header in the PUBREL packet are reserved
/// and MUST be set to 0,0,1 and 0 respectively. The Server MUST treat any
/// other value as malformed and close the Network Connection [MQTT-3.6.1-1].
#[allow(clippy::module_name_repetitions)]
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PublishReleasePacket {
    packet_id: PacketId,
    reason_code: ReasonCode,
    properties: Properties,
}

impl PublishReleasePacket {
    /// Create a new PUBREL packet.
    #[must_use]
    pub fn new(packet_id: PacketId) -> Self {
        Self {
            packet_id,
            ..Self::default()
        }
    }

    #[must_use]
    pub const fn packet_id(&self) -> PacketId {
        self.packet_id
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

impl EncodePacket for PublishReleasePacket {
    fn encode<V: ProtocolVersion>(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        let old_len = buf.len();
        let mut remaining_length = PacketId::bytes();
        let verbose = V::HAS_REASON_CODE
            && (self.reason_code != ReasonCode::Success || !self.properties.is_empty());
        if verbose {
            remaining_length += ReasonCode::bytes();
            if !self.properties.is_empty() {
                remaining_length += self.properties.bytes()?;
            }
        }

        let fixed_header = FixedHeader::new(PacketType::PublishRelease, remaining_length)
            .map_err(|_| EncodeError::InvalidVarInt)?;
        fixed_header.encode(buf)?;
        self.packet_id.encode(buf)?;
        if verbose {
            self.reason_code.encode(buf)?;
            if !self.properties.is_empty() {
                self.properties.encode(buf)?;
            }
        }
        Ok(buf.len() - old_len)
    }
}

impl DecodePacket for PublishReleasePacket {
    fn decode<V: ProtocolVersion>(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let fixed_header = FixedHeader::decode(ba)?;
        if fixed_header.packet_type() != PacketType::PublishRelease {
            return Err(DecodeError::InvalidPacketType);
        }

        let packet_id = PacketId::decode(ba)?;
        if packet_id.value() == 0 {
            return Err(DecodeError::InvalidPacketId);
        }
        let mut packet = Self::new(packet_id);

        if V::HAS_REASON_CODE {
            if fixed_header.remaining_length() > PacketId::bytes() {
                packet.reason_code = ReasonCode::decode_for(ba, PacketType::PublishRelease)?;
            }
            if fixed_header.remaining_length() > PacketId::bytes() + ReasonCode::bytes() {
                let properties = Properties::decode(ba)?;
                if let Err(property_type) =
                    check_property_type_list(properties.props(), ACK_PROPERTIES)
                {
                    log::error!("publish_release: Forbidden property {property_type:?} in PUBREL");
                    return Err(DecodeError::ForbiddenProperty);
                }
                packet.properties = properties;
            }
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
        let packet = PublishReleasePacket::new(PacketId::new(5));
        let mut buf = Vec::new();
        packet.encode::<V311>(&mut buf).unwrap();
        assert_eq!(buf, vec![0x62, 0x02, 0x00, 0x05]);

        let mut ba = ByteArray::new(&buf);
        let decoded = PublishReleasePacket::decode::<V311>(&mut ba).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn test_reserved_flags() {
        let buf = [0x60, 0x02, 0x00, 0x05];
        let mut ba = ByteArray::new(&buf);
        assert_eq!(
            PublishReleasePacket::decode::<V311>(&mut ba),
            Err(DecodeError::InvalidPacketFlags)
        );
    }

    #[test]
    fn test_packet_id_not_found_v5() {
        let buf = [0x62, 0x03, 0x00, 0x05, 0x92];
        let mut ba = ByteArray::new(&buf);
        let decoded = PublishReleasePacket::decode::<V5>(&mut ba).unwrap();
        assert_eq!(decoded.reason_code(), ReasonCode::PacketIdentifierNotFound);
    }
}

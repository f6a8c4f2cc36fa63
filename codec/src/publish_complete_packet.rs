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

/// PUBCOMP packet is the response to a PUBREL packet. It is the fourth and
/// final packet of the QoS 2 protocol exchange.
#[allow(clippy::module_name_repetitions)]
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PublishCompletePacket {
    packet_id: PacketId,
    reason_code: ReasonCode,
    properties: Properties,
}

impl PublishCompletePacket {
    /// Create a new PUBCOMP packet.
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

impl EncodePacket for PublishCompletePacket {
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

        let fixed_header = FixedHeader::new(PacketType::PublishComplete, remaining_length)
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

impl DecodePacket for PublishCompletePacket {
    fn decode<V: ProtocolVersion>(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let fixed_header = FixedHeader::decode(ba)?;
        if fixed_header.packet_type() != PacketType::PublishComplete {
            return Err(DecodeError::InvalidPacketType);
        }

        let packet_id = PacketId::decode(ba)?;
        if packet_id.value() == 0 {
            return Err(DecodeError::InvalidPacketId);
        }
        let mut packet = Self::new(packet_id);

        if V::HAS_REASON_CODE {
            if fixed_header.remaining_length() > PacketId::bytes() {
                packet.reason_code = ReasonCode::decode_for(ba, PacketType::PublishComplete)?;
            }
            if fixed_header.remaining_length() > PacketId::bytes() + ReasonCode::bytes() {
                let properties = Properties::decode(ba)?;
                if let Err(property_type) =
                    check_property_type_list(properties.props(), ACK_PROPERTIES)
                {
                    log::error!("publish_complete: Forbidden property {property_type:?} in PUBCOMP");
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
    use crate::V311;

    #[test]
    fn test_round_trip_v311() {
        let packet = PublishCompletePacket::new(PacketId::new(11));
        let mut buf = Vec::new();
        packet.encode::<V311>(&mut buf).unwrap();
        assert_eq!(buf, vec![0x70, 0x02, 0x00, 0x0b]);

        let mut ba = ByteArray::new(&buf);
        let decoded = PublishCompletePacket::decode::<V311>(&mut ba).unwrap();
        assert_eq!(decoded, packet);
    }
}

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

/// PUBREC packet is the response to a PUBLISH packet with QoS 2. It is the
/// second packet of the QoS 2 protocol exchange.
///
/// This packet has the same layout as PUBACK: packet id, then in MQTT 5.0
/// an optional reason code and optional properties.
#[allow(clippy::module_name_repetitions)]
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PublishReceivedPacket {
    packet_id: PacketId,
    reason_code: ReasonCode,
    properties: Properties,
}

impl PublishReceivedPacket {
    /// Create a new PUBREC packet.
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

impl EncodePacket for PublishReceivedPacket {
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

        let fixed_header = FixedHeader::new(PacketType::PublishReceived, remaining_length)
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

impl DecodePacket for PublishReceivedPacket {
    fn decode<V: ProtocolVersion>(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let fixed_header = FixedHeader::decode(ba)?;
        if fixed_header.packet_type() != PacketType::PublishReceived {
            return Err(DecodeError::InvalidPacketType);
        }

        let packet_id = PacketId::decode(ba)?;
        if packet_id.value() == 0 {
            return Err(DecodeError::InvalidPacketId);
        }
        let mut packet = Self::new(packet_id);

        if V::HAS_REASON_CODE {
            if fixed_header.remaining_length() > PacketId::bytes() {
                packet.reason_code = ReasonCode::decode_for(ba, PacketType::PublishReceived)?;
            }
            if fixed_header.remaining_length() > PacketId::bytes() + ReasonCode::bytes() {
                let properties = Properties::decode(ba)?;
                if let Err(property_type) =
                    check_property_type_list(properties.props(), ACK_PROPERTIES)
                {
                    log::error!("publish_received: Forbidden property {property_type:?} in PUBREC");
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
        let packet = PublishReceivedPacket::new(PacketId::new(0x1234));
        let mut buf = Vec::new();
        packet.encode::<V311>(&mut buf).unwrap();
        assert_eq!(buf, vec![0x50, 0x02, 0x12, 0x34]);

        let mut ba = ByteArray::new(&buf);
        let decoded = PublishReceivedPacket::decode::<V311>(&mut ba).unwrap();
        assert_eq!(decoded, packet);
    }
}

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

/// UNSUBACK packet is sent by the Server to the Client to confirm receipt of
/// an UNSUBSCRIBE packet.
///
/// In MQTT 3.1.1 this packet has no payload; in MQTT 5.0 the payload contains
/// one reason code per topic filter, in the order of the UNSUBSCRIBE packet
/// [MQTT-3.11.3-1].
#[allow(clippy::module_name_repetitions)]
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct UnsubscribeAckPacket {
    packet_id: PacketId,

    /// Unsuback properties, MQTT 5.0 only.
    properties: Properties,

    /// Per-filter reason codes, MQTT 5.0 only.
    codes: Vec<ReasonCode>,
}

impl UnsubscribeAckPacket {
    /// Create a new UNSUBACK packet.
    #[must_use]
    pub fn new(packet_id: PacketId) -> Self {
        Self {
            packet_id,
            ..Self::default()
        }
    }

    /// Create a new UNSUBACK packet with per-filter reason codes.
    #[must_use]
    pub fn with_codes(packet_id: PacketId, codes: Vec<ReasonCode>) -> Self {
        Self {
            packet_id,
            properties: Properties::new(),
            codes,
        }
    }

    #[must_use]
    pub const fn packet_id(&self) -> PacketId {
        self.packet_id
    }

    #[must_use]
    pub fn codes(&self) -> &[ReasonCode] {
        &self.codes
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

impl EncodePacket for UnsubscribeAckPacket {
    fn encode<V: ProtocolVersion>(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        let old_len = buf.len();
        let mut remaining_length = PacketId::bytes();
        if V::HAS_PROPERTIES {
            remaining_length += self.properties.bytes()?;
            remaining_length += self.codes.len();
        }
        let fixed_header = FixedHeader::new(PacketType::UnsubscribeAck, remaining_length)
            .map_err(|_| EncodeError::InvalidVarInt)?;
        fixed_header.encode(buf)?;
        self.packet_id.encode(buf)?;
        if V::HAS_PROPERTIES {
            self.properties.encode(buf)?;
            for code in &self.codes {
                code.encode(buf)?;
            }
        }
        Ok(buf.len() - old_len)
    }
}

impl DecodePacket for UnsubscribeAckPacket {
    fn decode<V: ProtocolVersion>(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let fixed_header = FixedHeader::decode(ba)?;
        if fixed_header.packet_type() != PacketType::UnsubscribeAck {
            return Err(DecodeError::InvalidPacketType);
        }

        let end_offset = ba.offset() + fixed_header.remaining_length();
        let packet_id = PacketId::decode(ba)?;
        if packet_id.value() == 0 {
            return Err(DecodeError::InvalidPacketId);
        }
        let mut packet = Self::new(packet_id);

        if V::HAS_PROPERTIES {
            let properties = Properties::decode(ba)?;
            if let Err(property_type) =
                check_property_type_list(properties.props(), ACK_PROPERTIES)
            {
                log::error!("unsubscribe_ack: Forbidden property {property_type:?} in UNSUBACK");
                return Err(DecodeError::ForbiddenProperty);
            }
            packet.properties = properties;

            while ba.offset() < end_offset {
                packet
                    .codes
                    .push(ReasonCode::decode_for(ba, PacketType::UnsubscribeAck)?);
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
        let packet = UnsubscribeAckPacket::new(PacketId::new(8));
        let mut buf = Vec::new();
        packet.encode::<V311>(&mut buf).unwrap();
        assert_eq!(buf, vec![0xb0, 0x02, 0x00, 0x08]);

        let mut ba = ByteArray::new(&buf);
        let decoded = UnsubscribeAckPacket::decode::<V311>(&mut ba).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn test_round_trip_v5_codes() {
        let packet = UnsubscribeAckPacket::with_codes(
            PacketId::new(9),
            vec![ReasonCode::Success, ReasonCode::NoSubscriptionExisted],
        );
        let mut buf = Vec::new();
        packet.encode::<V5>(&mut buf).unwrap();

        let mut ba = ByteArray::new(&buf);
        let decoded = UnsubscribeAckPacket::decode::<V5>(&mut ba).unwrap();
        assert_eq!(decoded, packet);
    }
}

// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use crate::base::{DecodeData, EncodeData};
use crate::property::check_property_type_list;
use crate::{
    ByteArray, DecodeError, DecodePacket, EncodeError, EncodePacket, FixedHeader, PacketId,
    PacketType, Properties, PropertyType, ProtocolVersion, ReasonCode,
};

/// Properties available in acknowledgement packets.
pub const ACK_PROPERTIES: &[PropertyType] =
    &[PropertyType::ReasonString, PropertyType::UserProperty];

/// PUBACK packet is the response to a PUBLISH packet with QoS 1.
///
/// ```txt
///  7                     0
/// +-----------------------+
/// | Fixed header          |
/// |                       |
/// +-----------------------+
/// | Packet id             |
/// |                       |
/// +-----------------------+
/// | Reason code (v5 only) |
/// +-----------------------+
/// | Properties (v5 only)  |
/// +-----------------------+
/// ```
///
/// In MQTT 5.0 the reason code and property length can be omitted when the
/// reason is 0x00 (Success) and there are no properties.
#[allow(clippy::module_name_repetitions)]
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PublishAckPacket {
    packet_id: PacketId,
    reason_code: ReasonCode,
    properties: Properties,
}

impl PublishAckPacket {
    /// Create a new PUBACK packet.
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

impl EncodePacket for PublishAckPacket {
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

        let fixed_header = FixedHeader::new(PacketType::PublishAck, remaining_length)
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

impl DecodePacket for PublishAckPacket {
    fn decode<V: ProtocolVersion>(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let fixed_header = FixedHeader::decode(ba)?;
        if fixed_header.packet_type() != PacketType::PublishAck {
            return Err(DecodeError::InvalidPacketType);
        }

        let packet_id = PacketId::decode(ba)?;
        if packet_id.value() == 0 {
            return Err(DecodeError::InvalidPacketId);
        }
        let mut packet = Self::new(packet_id);

        if V::HAS_REASON_CODE {
            if fixed_header.remaining_length() > PacketId::bytes() {
                packet.reason_code = ReasonCode::decode_for(ba, PacketType::PublishAck)?;
            }
            if fixed_header.remaining_length() > PacketId::bytes() + ReasonCode::bytes() {
                let properties = Properties::decode(ba)?;
                if let Err(property_type) =
                    check_property_type_list(properties.props(), ACK_PROPERTIES)
                {
                    log::error!("publish_ack: Forbidden property {property_type:?} in PUBACK");
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
        let packet = PublishAckPacket::new(PacketId::new(7));
        let mut buf = Vec::new();
        packet.encode::<V311>(&mut buf).unwrap();
        assert_eq!(buf, vec![0x40, 0x02, 0x00, 0x07]);

        let mut ba = ByteArray::new(&buf);
        let decoded = PublishAckPacket::decode::<V311>(&mut ba).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn test_short_form_v5() {
        // Reason code omitted means Success.
        let buf = [0x40, 0x02, 0x00, 0x07];
        let mut ba = ByteArray::new(&buf);
        let decoded = PublishAckPacket::decode::<V5>(&mut ba).unwrap();
        assert_eq!(decoded.reason_code(), ReasonCode::Success);
    }

    #[test]
    fn test_reason_code_v5() {
        let mut packet = PublishAckPacket::new(PacketId::new(9));
        packet.set_reason_code(ReasonCode::QuotaExceeded);
        let mut buf = Vec::new();
        packet.encode::<V5>(&mut buf).unwrap();
        assert_eq!(buf, vec![0x40, 0x03, 0x00, 0x09, 0x97]);

        let mut ba = ByteArray::new(&buf);
        let decoded = PublishAckPacket::decode::<V5>(&mut ba).unwrap();
        assert_eq!(decoded.reason_code(), ReasonCode::QuotaExceeded);
    }
}

// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::convert::TryFrom;

use crate::base::{DecodeData, EncodeData};
use crate::property::check_property_type_list;
use crate::publish_ack_packet::ACK_PROPERTIES;
use crate::{
    ByteArray, DecodeError, DecodePacket, EncodeError, EncodePacket, FixedHeader, PacketId,
    PacketType, Properties, ProtocolVersion, QoS, ReasonCode, SubscribeAck,
};

/// SUBACK packet is sent by the Server to the Client to confirm receipt and
/// processing of a SUBSCRIBE packet.
///
/// The SUBACK packet MUST contain a return code for each Topic Filter /
/// Subscription Option pair, in the same order [MQTT-3.8.4-6].
///
/// ```txt
///  7                      0
/// +------------------------+
/// | Fixed header           |
/// |                        |
/// +------------------------+
/// | Packet id              |
/// |                        |
/// +------------------------+
/// | Properties (v5 only)   |
/// +------------------------+
/// | Ack 0                  |
/// +------------------------+
/// | Ack 1 ..               |
/// +------------------------+
/// ```
#[allow(clippy::module_name_repetitions)]
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SubscribeAckPacket {
    packet_id: PacketId,

    /// Suback properties, MQTT 5.0 only.
    properties: Properties,

    acks: Vec<SubscribeAck>,
}

impl SubscribeAckPacket {
    /// Create a new SUBACK packet with one ack value.
    #[must_use]
    pub fn new(packet_id: PacketId, ack: SubscribeAck) -> Self {
        Self {
            packet_id,
            properties: Properties::new(),
            acks: vec![ack],
        }
    }

    /// Create a new SUBACK packet with a list of ack values.
    #[must_use]
    pub fn with_acks(packet_id: PacketId, acks: Vec<SubscribeAck>) -> Self {
        Self {
            packet_id,
            properties: Properties::new(),
            acks,
        }
    }

    #[must_use]
    pub const fn packet_id(&self) -> PacketId {
        self.packet_id
    }

    #[must_use]
    pub fn acks(&self) -> &[SubscribeAck] {
        &self.acks
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

fn decode_ack<V: ProtocolVersion>(byte: u8) -> Result<SubscribeAck, DecodeError> {
    if V::HAS_REASON_CODE {
        // Validate against the SUBACK reason code set.
        let code = ReasonCode::try_from(byte).unwrap_or(ReasonCode::UnspecifiedError);
        match code {
            ReasonCode::Success => Ok(SubscribeAck::GrantedQoS(QoS::AtMostOnce)),
            ReasonCode::GrantedQoS1 => Ok(SubscribeAck::GrantedQoS(QoS::AtLeastOnce)),
            ReasonCode::GrantedQoS2 => Ok(SubscribeAck::GrantedQoS(QoS::ExactOnce)),
            code if !code.is_success() => Ok(SubscribeAck::Failed(code as u8)),
            _ => Err(DecodeError::InvalidReasonCode),
        }
    } else {
        // In MQTT 3.1.1 the allowed return codes are 0x00 - 0x02 and 0x80
        // [MQTT-3.9.3-2].
        match byte {
            0x00 => Ok(SubscribeAck::GrantedQoS(QoS::AtMostOnce)),
            0x01 => Ok(SubscribeAck::GrantedQoS(QoS::AtLeastOnce)),
            0x02 => Ok(SubscribeAck::GrantedQoS(QoS::ExactOnce)),
            0x80 => Ok(SubscribeAck::Failed(0x80)),
            _ => Err(DecodeError::InvalidReasonCode),
        }
    }
}

fn encode_ack(ack: SubscribeAck) -> u8 {
    match ack {
        SubscribeAck::GrantedQoS(qos) => qos as u8,
        SubscribeAck::Failed(code) => code,
    }
}

impl EncodePacket for SubscribeAckPacket {
    fn encode<V: ProtocolVersion>(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        let old_len = buf.len();
        let mut remaining_length = PacketId::bytes() + self.acks.len();
        if V::HAS_PROPERTIES {
            remaining_length += self.properties.bytes()?;
        }
        let fixed_header = FixedHeader::new(PacketType::SubscribeAck, remaining_length)
            .map_err(|_| EncodeError::InvalidVarInt)?;
        fixed_header.encode(buf)?;
        self.packet_id.encode(buf)?;
        if V::HAS_PROPERTIES {
            self.properties.encode(buf)?;
        }
        for ack in &self.acks {
            buf.push(encode_ack(*ack));
        }
        Ok(buf.len() - old_len)
    }
}

impl DecodePacket for SubscribeAckPacket {
    fn decode<V: ProtocolVersion>(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let fixed_header = FixedHeader::decode(ba)?;
        if fixed_header.packet_type() != PacketType::SubscribeAck {
            return Err(DecodeError::InvalidPacketType);
        }

        let end_offset = ba.offset() + fixed_header.remaining_length();
        let packet_id = PacketId::decode(ba)?;
        if packet_id.value() == 0 {
            return Err(DecodeError::InvalidPacketId);
        }

        let properties = if V::HAS_PROPERTIES {
            let properties = Properties::decode(ba)?;
            if let Err(property_type) =
                check_property_type_list(properties.props(), ACK_PROPERTIES)
            {
                log::error!("subscribe_ack: Forbidden property {property_type:?} in SUBACK");
                return Err(DecodeError::ForbiddenProperty);
            }
            properties
        } else {
            Properties::new()
        };

        let mut acks = Vec::new();
        while ba.offset() < end_offset {
            acks.push(decode_ack::<V>(ba.read_byte()?)?);
        }

        Ok(Self {
            packet_id,
            properties,
            acks,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{V311, V5};

    #[test]
    fn test_decode_mixed_results_v311() {
        let buf = [0x90, 0x04, 0x00, 0x02, 0x01, 0x80];
        let mut ba = ByteArray::new(&buf);
        let packet = SubscribeAckPacket::decode::<V311>(&mut ba).unwrap();
        assert_eq!(packet.packet_id(), PacketId::new(2));
        assert_eq!(
            packet.acks(),
            &[
                SubscribeAck::GrantedQoS(QoS::AtLeastOnce),
                SubscribeAck::Failed(0x80),
            ]
        );
    }

    #[test]
    fn test_round_trip_v5() {
        let packet = SubscribeAckPacket::with_acks(
            PacketId::new(5),
            vec![
                SubscribeAck::GrantedQoS(QoS::ExactOnce),
                SubscribeAck::Failed(ReasonCode::NotAuthorized as u8),
            ],
        );
        let mut buf = Vec::new();
        packet.encode::<V5>(&mut buf).unwrap();

        let mut ba = ByteArray::new(&buf);
        let decoded = SubscribeAckPacket::decode::<V5>(&mut ba).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn test_invalid_return_code_v311() {
        let buf = [0x90, 0x03, 0x00, 0x02, 0x03];
        let mut ba = ByteArray::new(&buf);
        assert_eq!(
            SubscribeAckPacket::decode::<V311>(&mut ba),
            Err(DecodeError::InvalidReasonCode)
        );
    }
}

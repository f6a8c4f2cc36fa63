// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use crate::base::DecodeData;
use crate::{
    AuthPacket, ByteArray, ConnectAckPacket, ConnectPacket, DecodeError, DecodePacket,
    DisconnectPacket, FixedHeader, PacketType, PingRequestPacket, PingResponsePacket,
    ProtocolVersion, PublishAckPacket, PublishCompletePacket, PublishPacket,
    PublishReceivedPacket, PublishReleasePacket, SubscribeAckPacket, SubscribePacket,
    UnsubscribeAckPacket, UnsubscribePacket,
};

/// One parsed control packet of any type.
///
/// Used to dispatch a framed inbound packet to its typed decoder.
#[allow(clippy::module_name_repetitions)]
#[derive(Debug, Clone, PartialEq)]
pub enum MqttPacket {
    Connect(ConnectPacket),
    ConnectAck(ConnectAckPacket),
    Publish(PublishPacket),
    PublishAck(PublishAckPacket),
    PublishReceived(PublishReceivedPacket),
    PublishRelease(PublishReleasePacket),
    PublishComplete(PublishCompletePacket),
    Subscribe(SubscribePacket),
    SubscribeAck(SubscribeAckPacket),
    Unsubscribe(UnsubscribePacket),
    UnsubscribeAck(UnsubscribeAckPacket),
    PingRequest(PingRequestPacket),
    PingResponse(PingResponsePacket),
    Disconnect(DisconnectPacket),
    Auth(AuthPacket),
}

impl MqttPacket {
    /// Parse one whole framed packet from `bytes`, expecting protocol
    /// version `V`.
    ///
    /// # Errors
    ///
    /// Returns error if bytes violate wire format rules, or the packet type
    /// does not exist in `V`.
    pub fn parse<V: ProtocolVersion>(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut ba = ByteArray::new(bytes);
        let fixed_header = FixedHeader::decode(&mut ba)?;
        let packet_end = ba.offset() + fixed_header.remaining_length();
        ba.reset_offset();

        let packet = match fixed_header.packet_type() {
            PacketType::Connect => Self::Connect(ConnectPacket::decode::<V>(&mut ba)?),
            PacketType::ConnectAck => Self::ConnectAck(ConnectAckPacket::decode::<V>(&mut ba)?),
            PacketType::Publish { .. } => Self::Publish(PublishPacket::decode::<V>(&mut ba)?),
            PacketType::PublishAck => Self::PublishAck(PublishAckPacket::decode::<V>(&mut ba)?),
            PacketType::PublishReceived => {
                Self::PublishReceived(PublishReceivedPacket::decode::<V>(&mut ba)?)
            }
            PacketType::PublishRelease => {
                Self::PublishRelease(PublishReleasePacket::decode::<V>(&mut ba)?)
            }
            PacketType::PublishComplete => {
                Self::PublishComplete(PublishCompletePacket::decode::<V>(&mut ba)?)
            }
            PacketType::Subscribe => Self::Subscribe(SubscribePacket::decode::<V>(&mut ba)?),
            PacketType::SubscribeAck => {
                Self::SubscribeAck(SubscribeAckPacket::decode::<V>(&mut ba)?)
            }
            PacketType::Unsubscribe => Self::Unsubscribe(UnsubscribePacket::decode::<V>(&mut ba)?),
            PacketType::UnsubscribeAck => {
                Self::UnsubscribeAck(UnsubscribeAckPacket::decode::<V>(&mut ba)?)
            }
            PacketType::PingRequest => Self::PingRequest(PingRequestPacket::decode::<V>(&mut ba)?),
            PacketType::PingResponse => {
                Self::PingResponse(PingResponsePacket::decode::<V>(&mut ba)?)
            }
            PacketType::Disconnect => Self::Disconnect(DisconnectPacket::decode::<V>(&mut ba)?),
            PacketType::Auth => Self::Auth(AuthPacket::decode::<V>(&mut ba)?),
        };

        // The decoder consumes exactly `remaining_length` bytes; trailing
        // bytes mean the variable header disagrees with the length field.
        if ba.offset() != packet_end {
            log::error!(
                "mqtt_packet: {} consumed {} of {packet_end} bytes",
                packet.packet_type(),
                ba.offset()
            );
            return Err(DecodeError::InvalidRemainingLength);
        }

        Ok(packet)
    }

    /// Get type of inner packet.
    #[must_use]
    pub fn packet_type(&self) -> PacketType {
        match self {
            Self::Connect(_) => PacketType::Connect,
            Self::ConnectAck(_) => PacketType::ConnectAck,
            Self::Publish(p) => PacketType::Publish {
                dup: p.dup(),
                qos: p.qos(),
                retain: p.retain(),
            },
            Self::PublishAck(_) => PacketType::PublishAck,
            Self::PublishReceived(_) => PacketType::PublishReceived,
            Self::PublishRelease(_) => PacketType::PublishRelease,
            Self::PublishComplete(_) => PacketType::PublishComplete,
            Self::Subscribe(_) => PacketType::Subscribe,
            Self::SubscribeAck(_) => PacketType::SubscribeAck,
            Self::Unsubscribe(_) => PacketType::Unsubscribe,
            Self::UnsubscribeAck(_) => PacketType::UnsubscribeAck,
            Self::PingRequest(_) => PacketType::PingRequest,
            Self::PingResponse(_) => PacketType::PingResponse,
            Self::Disconnect(_) => PacketType::Disconnect,
            Self::Auth(_) => PacketType::Auth,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::EncodePacket;
    use crate::{PacketId, QoS, V311, V5};

    #[test]
    fn test_parse_publish() {
        let mut packet = PublishPacket::new("t", QoS::AtLeastOnce, b"x").unwrap();
        packet.set_packet_id(PacketId::new(1));
        let mut buf = Vec::new();
        packet.encode::<V311>(&mut buf).unwrap();

        let parsed = MqttPacket::parse::<V311>(&buf).unwrap();
        assert_eq!(parsed, MqttPacket::Publish(packet));
    }

    #[test]
    fn test_parse_auth_needs_v5() {
        let packet = AuthPacket::new();
        let mut buf = Vec::new();
        packet.encode::<V5>(&mut buf).unwrap();

        assert!(MqttPacket::parse::<V5>(&buf).is_ok());
        assert_eq!(
            MqttPacket::parse::<V311>(&buf),
            Err(DecodeError::InvalidPacketType)
        );
    }
}

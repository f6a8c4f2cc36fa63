// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::io::Write;

use crate::base::{DecodeData, EncodeData};
use crate::property::check_property_type_list;
use crate::{
    ByteArray, DecodeError, DecodePacket, EncodeError, EncodePacket, FixedHeader, PacketId,
    PacketType, Properties, PropertyType, ProtocolVersion, PubTopic, QoS,
};

/// Properties available in PUBLISH packets.
pub const PUBLISH_PROPERTIES: &[PropertyType] = &[
    PropertyType::PayloadFormatIndicator,
    PropertyType::MessageExpiryInterval,
    PropertyType::TopicAlias,
    PropertyType::ResponseTopic,
    PropertyType::CorrelationData,
    PropertyType::UserProperty,
    PropertyType::SubscriptionIdentifier,
    PropertyType::ContentType,
];

/// The PUBLISH packet transports application messages from the Client to
/// the Server, or from the Server to the Client.
///
/// Basic structure of packet:
///
/// ```txt
///  7                     0
/// +-----------------------+
/// | Fixed header          |
/// |                       |
/// +-----------------------+
/// | Topic name length     |
/// |                       |
/// +-----------------------+
/// | Topic name ...        |
/// +-----------------------+
/// | Packet id (QoS 1/2)   |
/// |                       |
/// +-----------------------+
/// | Properties (v5 only)  |
/// +-----------------------+
/// | Msg payload ...       |
/// +-----------------------+
/// ```
///
/// Response of `PublishPacket`:
/// - QoS 0, no response
/// - QoS 1, `PublishAckPacket`
/// - QoS 2, `PublishReceivedPacket`
#[allow(clippy::module_name_repetitions)]
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PublishPacket {
    /// The DUP flag MUST be set to 1 by the Client or Server when it
    /// attempts to re-deliver a PUBLISH packet [MQTT-3.3.1-1].
    ///
    /// The DUP flag MUST be set to 0 for all QoS 0 messages [MQTT-3.3.1-2].
    dup: bool,

    /// The level of assurance for delivery of this message.
    ///
    /// A PUBLISH packet MUST NOT have both QoS bits set to 1 [MQTT-3.3.1-4].
    qos: QoS,

    /// If the RETAIN flag is set to 1 in a PUBLISH packet sent by a Client
    /// to a Server, the Server MUST replace any existing retained message
    /// for this topic with this one [MQTT-3.3.1-5].
    retain: bool,

    /// The Topic Name identifies the information channel to which Payload
    /// data is published. It MUST NOT contain wildcard characters
    /// [MQTT-3.3.2-2].
    topic: PubTopic,

    /// The Packet Identifier field is only present in PUBLISH packets where
    /// the QoS level is 1 or 2.
    packet_id: PacketId,

    /// Publish properties, MQTT 5.0 only.
    properties: Properties,

    /// Opaque payload bytes.
    msg: Vec<u8>,
}

impl PublishPacket {
    /// Create a new PUBLISH packet.
    ///
    /// # Errors
    ///
    /// Returns error if `topic` is invalid.
    pub fn new(topic: &str, qos: QoS, msg: &[u8]) -> Result<Self, EncodeError> {
        let topic = PubTopic::new(topic)?;
        Ok(Self {
            qos,
            topic,
            msg: msg.to_vec(),
            ..Self::default()
        })
    }

    /// Update `retain` flag.
    pub fn set_retain(&mut self, retain: bool) -> &mut Self {
        self.retain = retain;
        self
    }

    #[must_use]
    pub const fn retain(&self) -> bool {
        self.retain
    }

    /// Update `dup` flag.
    ///
    /// # Errors
    ///
    /// Returns error if `dup` flag is set in a QoS 0 packet.
    pub fn set_dup(&mut self, dup: bool) -> Result<&mut Self, EncodeError> {
        // The DUP flag MUST be set to 0 for all QoS 0 messages [MQTT-3.3.1-2].
        if dup && self.qos == QoS::AtMostOnce {
            return Err(EncodeError::InvalidPacketType);
        }
        self.dup = dup;
        Ok(self)
    }

    #[must_use]
    pub const fn dup(&self) -> bool {
        self.dup
    }

    #[must_use]
    pub const fn qos(&self) -> QoS {
        self.qos
    }

    /// Update packet id.
    ///
    /// The packet id field is only present in publish packets where the QoS
    /// level is 1 or 2.
    pub fn set_packet_id(&mut self, packet_id: PacketId) -> &mut Self {
        self.packet_id = packet_id;
        self
    }

    #[must_use]
    pub const fn packet_id(&self) -> PacketId {
        self.packet_id
    }

    #[must_use]
    pub fn topic(&self) -> &str {
        self.topic.as_ref()
    }

    /// Get a mutable reference to the property list.
    pub fn properties_mut(&mut self) -> &mut Properties {
        &mut self.properties
    }

    #[must_use]
    pub const fn properties(&self) -> &Properties {
        &self.properties
    }

    /// Get a reference to message payload.
    #[must_use]
    pub fn message(&self) -> &[u8] {
        &self.msg
    }

    fn remaining_length<V: ProtocolVersion>(&self) -> Result<usize, EncodeError> {
        let mut len = self.topic.bytes() + self.msg.len();
        if self.qos != QoS::AtMostOnce {
            len += PacketId::bytes();
        }
        if V::HAS_PROPERTIES {
            len += self.properties.bytes()?;
        }
        Ok(len)
    }
}

impl EncodePacket for PublishPacket {
    fn encode<V: ProtocolVersion>(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        let old_len = buf.len();

        let packet_type = PacketType::Publish {
            dup: self.dup,
            qos: self.qos,
            retain: self.retain,
        };
        let fixed_header = FixedHeader::new(packet_type, self.remaining_length::<V>()?)
            .map_err(|_| EncodeError::InvalidVarInt)?;
        fixed_header.encode(buf)?;

        self.topic.encode(buf)?;
        // The Packet Identifier field is only present in PUBLISH packets
        // where the QoS level is 1 or 2 [MQTT-2.2.1-2].
        if self.qos != QoS::AtMostOnce {
            self.packet_id.encode(buf)?;
        }
        if V::HAS_PROPERTIES {
            self.properties.encode(buf)?;
        }
        buf.write_all(&self.msg)?;

        Ok(buf.len() - old_len)
    }
}

impl DecodePacket for PublishPacket {
    fn decode<V: ProtocolVersion>(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let fixed_header = FixedHeader::decode(ba)?;
        let PacketType::Publish { dup, qos, retain } = fixed_header.packet_type() else {
            return Err(DecodeError::InvalidPacketType);
        };

        // The DUP flag MUST be set to 0 for all QoS 0 messages [MQTT-3.3.1-2].
        if dup && qos == QoS::AtMostOnce {
            return Err(DecodeError::InvalidPacketFlags);
        }

        let variable_header_offset = ba.offset();
        let topic = PubTopic::decode(ba)?;

        let packet_id = if qos == QoS::AtMostOnce {
            PacketId::new(0)
        } else {
            let packet_id = PacketId::decode(ba)?;
            // A non-zero Packet Identifier is required in QoS 1 and QoS 2
            // packets [MQTT-2.2.1-3].
            if packet_id.value() == 0 {
                return Err(DecodeError::InvalidPacketId);
            }
            packet_id
        };

        let properties = if V::HAS_PROPERTIES {
            let properties = Properties::decode(ba)?;
            if let Err(property_type) =
                check_property_type_list(properties.props(), PUBLISH_PROPERTIES)
            {
                log::error!("publish: Forbidden property {property_type:?} in PUBLISH");
                return Err(DecodeError::ForbiddenProperty);
            }
            properties
        } else {
            Properties::new()
        };

        // It is valid for a PUBLISH packet to contain a zero length payload.
        let consumed = ba.offset() - variable_header_offset;
        let msg_len = fixed_header
            .remaining_length()
            .checked_sub(consumed)
            .ok_or(DecodeError::InvalidRemainingLength)?;
        let msg = ba.read_bytes(msg_len)?.to_vec();

        Ok(Self {
            dup,
            qos,
            retain,
            topic,
            packet_id,
            properties,
            msg,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{V311, V5};

    #[test]
    fn test_encode_qos0_v311() {
        let packet = PublishPacket::new("t", QoS::AtMostOnce, &[0x61]).unwrap();
        let mut buf = Vec::new();
        packet.encode::<V311>(&mut buf).unwrap();
        assert_eq!(buf, vec![0x30, 0x04, 0x00, 0x01, b't', 0x61]);
    }

    #[test]
    fn test_round_trip_qos1_v311() {
        let mut packet = PublishPacket::new("a/b", QoS::AtLeastOnce, b"payload").unwrap();
        packet.set_packet_id(PacketId::new(17));
        let mut buf = Vec::new();
        packet.encode::<V311>(&mut buf).unwrap();

        let mut ba = ByteArray::new(&buf);
        let decoded = PublishPacket::decode::<V311>(&mut ba).unwrap();
        assert_eq!(decoded, packet);
        assert_eq!(decoded.packet_id(), PacketId::new(17));
        assert_eq!(decoded.message(), b"payload");
    }

    #[test]
    fn test_round_trip_qos2_v5() {
        let mut packet = PublishPacket::new("a/b/c", QoS::ExactOnce, b"x").unwrap();
        packet.set_packet_id(PacketId::new(2));
        packet.set_retain(true);
        let mut buf = Vec::new();
        packet.encode::<V5>(&mut buf).unwrap();

        let mut ba = ByteArray::new(&buf);
        let decoded = PublishPacket::decode::<V5>(&mut ba).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn test_dup_retransmission_round_trip() {
        let mut packet = PublishPacket::new("t", QoS::AtLeastOnce, b"m").unwrap();
        packet.set_packet_id(PacketId::new(3));
        packet.set_dup(true).unwrap();
        let mut buf = Vec::new();
        packet.encode::<V311>(&mut buf).unwrap();
        assert_eq!(buf[0] & 0b0000_1000, 0b0000_1000);

        let mut ba = ByteArray::new(&buf);
        let decoded = PublishPacket::decode::<V311>(&mut ba).unwrap();
        assert!(decoded.dup());
    }

    #[test]
    fn test_dup_with_qos0_rejected() {
        let buf = [0x38, 0x04, 0x00, 0x01, b't', 0x61];
        let mut ba = ByteArray::new(&buf);
        assert_eq!(
            PublishPacket::decode::<V311>(&mut ba),
            Err(DecodeError::InvalidPacketFlags)
        );
    }

    #[test]
    fn test_zero_packet_id_rejected() {
        let buf = [0x32, 0x06, 0x00, 0x01, b't', 0x00, 0x00, 0x61];
        let mut ba = ByteArray::new(&buf);
        assert_eq!(
            PublishPacket::decode::<V311>(&mut ba),
            Err(DecodeError::InvalidPacketId)
        );
    }
}

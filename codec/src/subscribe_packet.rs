// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::convert::TryFrom;

use crate::base::{DecodeData, EncodeData};
use crate::property::check_property_type_list;
use crate::{
    ByteArray, DecodeError, DecodePacket, EncodeError, EncodePacket, FixedHeader, PacketId,
    PacketType, Properties, PropertyType, ProtocolVersion, QoS, SubTopic,
};

/// Properties available in SUBSCRIBE packets.
pub const SUBSCRIBE_PROPERTIES: &[PropertyType] = &[
    PropertyType::SubscriptionIdentifier,
    PropertyType::UserProperty,
];

/// MQTT 5.0 retain handling option of a subscription.
///
/// This option specifies whether retained messages are sent when the
/// subscription is established.
#[repr(u8)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RetainHandling {
    /// Send retained messages at the time of the subscribe.
    #[default]
    Send = 0,

    /// Send retained messages at subscribe only if the subscription does
    /// not currently exist.
    SendIfNew = 1,

    /// Do not send retained messages at the time of the subscribe.
    Suppress = 2,
}

impl TryFrom<u8> for RetainHandling {
    type Error = DecodeError;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(Self::Send),
            1 => Ok(Self::SendIfNew),
            2 => Ok(Self::Suppress),
            _ => Err(DecodeError::InvalidPacketFlags),
        }
    }
}

/// One topic filter with its subscription options.
///
/// In MQTT 3.1.1 only the requested QoS is carried on the wire; the MQTT 5.0
/// option bits are serialized as zeros.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SubscribeTopic {
    filter: SubTopic,
    qos: QoS,

    /// If set, Application Messages MUST NOT be forwarded to a connection
    /// with a ClientID equal to the ClientID of the publishing connection
    /// [MQTT-3.8.3-3]. MQTT 5.0 only.
    no_local: bool,

    /// If set, messages forwarded using this subscription keep the RETAIN
    /// flag they were published with. MQTT 5.0 only.
    retain_as_published: bool,

    /// Retain handling mode. MQTT 5.0 only.
    retain_handling: RetainHandling,
}

// Subscription option bit positions, MQTT 5.0.
const QOS_MASK: u8 = 0b0000_0011;
const NO_LOCAL_BIT: u8 = 0b0000_0100;
const RETAIN_AS_PUBLISHED_BIT: u8 = 0b0000_1000;
const RETAIN_HANDLING_SHIFT: u8 = 4;
const RETAIN_HANDLING_MASK: u8 = 0b0011_0000;

impl SubscribeTopic {
    /// Create a new subscription entry from `filter` and requested `qos`.
    ///
    /// # Errors
    ///
    /// Returns error if `filter` is invalid.
    pub fn new(filter: &str, qos: QoS) -> Result<Self, EncodeError> {
        Ok(Self {
            filter: SubTopic::parse(filter)?,
            qos,
            ..Self::default()
        })
    }

    /// Create a new subscription entry from an already parsed filter.
    #[must_use]
    pub fn with_topic(filter: SubTopic, qos: QoS) -> Self {
        Self {
            filter,
            qos,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn filter(&self) -> &str {
        self.filter.as_ref()
    }

    #[must_use]
    pub const fn topic(&self) -> &SubTopic {
        &self.filter
    }

    #[must_use]
    pub const fn qos(&self) -> QoS {
        self.qos
    }

    pub fn set_no_local(&mut self, no_local: bool) -> &mut Self {
        self.no_local = no_local;
        self
    }

    #[must_use]
    pub const fn no_local(&self) -> bool {
        self.no_local
    }

    pub fn set_retain_as_published(&mut self, retain_as_published: bool) -> &mut Self {
        self.retain_as_published = retain_as_published;
        self
    }

    #[must_use]
    pub const fn retain_as_published(&self) -> bool {
        self.retain_as_published
    }

    pub fn set_retain_handling(&mut self, retain_handling: RetainHandling) -> &mut Self {
        self.retain_handling = retain_handling;
        self
    }

    #[must_use]
    pub const fn retain_handling(&self) -> RetainHandling {
        self.retain_handling
    }

    /// Get byte length in packet.
    #[must_use]
    pub fn bytes(&self) -> usize {
        self.filter.bytes() + 1
    }

    fn options_byte<V: ProtocolVersion>(&self) -> u8 {
        let mut byte = self.qos as u8;
        if V::HAS_PROPERTIES {
            if self.no_local {
                byte |= NO_LOCAL_BIT;
            }
            if self.retain_as_published {
                byte |= RETAIN_AS_PUBLISHED_BIT;
            }
            byte |= (self.retain_handling as u8) << RETAIN_HANDLING_SHIFT;
        }
        byte
    }

    fn decode_options<V: ProtocolVersion>(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let filter = SubTopic::decode(ba)?;
        let options = ba.read_byte()?;
        let qos = QoS::try_from(options & QOS_MASK)?;

        if V::HAS_PROPERTIES {
            // Bits 6 and 7 of the Subscription Options byte are reserved
            // and MUST be set to 0 [MQTT-3.8.3-5].
            if options & 0b1100_0000 != 0 {
                return Err(DecodeError::InvalidPacketFlags);
            }
            let retain_handling =
                RetainHandling::try_from((options & RETAIN_HANDLING_MASK) >> RETAIN_HANDLING_SHIFT)?;
            Ok(Self {
                filter,
                qos,
                no_local: options & NO_LOCAL_BIT != 0,
                retain_as_published: options & RETAIN_AS_PUBLISHED_BIT != 0,
                retain_handling,
            })
        } else {
            // The upper 6 bits of the Requested QoS byte are reserved
            // [MQTT-3-8.3-4].
            if options & !QOS_MASK != 0 {
                return Err(DecodeError::InvalidPacketFlags);
            }
            Ok(Self {
                filter,
                qos,
                ..Self::default()
            })
        }
    }
}

/// The SUBSCRIBE packet is sent from the Client to the Server to create one
/// or more subscriptions.
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
/// | Properties (v5 only)  |
/// +-----------------------+
/// | Topic filter length   |
/// |                       |
/// +-----------------------+
/// | Topic filter ...      |
/// +-----------------------+
/// | Options               |
/// +-----------------------+
/// | Topic filter length   |
/// |                       |
/// +-----------------------+
/// | Topic filter ...      |
/// +-----------------------+
/// | Options               |
/// +-----------------------+
/// ```
///
/// The payload of a SUBSCRIBE packet MUST contain at least one Topic
/// Filter / Options pair [MQTT-3.8.3-3].
#[allow(clippy::module_name_repetitions)]
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SubscribePacket {
    packet_id: PacketId,

    /// Subscribe properties, MQTT 5.0 only.
    properties: Properties,

    topics: Vec<SubscribeTopic>,
}

impl SubscribePacket {
    /// Create a subscribe packet with one topic filter.
    ///
    /// # Errors
    ///
    /// Returns error if `filter` is invalid.
    pub fn new(filter: &str, qos: QoS, packet_id: PacketId) -> Result<Self, EncodeError> {
        let topic = SubscribeTopic::new(filter, qos)?;
        Ok(Self {
            packet_id,
            properties: Properties::new(),
            topics: vec![topic],
        })
    }

    /// Create a subscribe packet with a list of topic filters.
    ///
    /// # Errors
    ///
    /// Returns error if `topics` is empty.
    pub fn with_topics(
        packet_id: PacketId,
        topics: Vec<SubscribeTopic>,
    ) -> Result<Self, EncodeError> {
        if topics.is_empty() {
            return Err(EncodeError::InvalidData);
        }
        Ok(Self {
            packet_id,
            properties: Properties::new(),
            topics,
        })
    }

    #[must_use]
    pub const fn packet_id(&self) -> PacketId {
        self.packet_id
    }

    #[must_use]
    pub fn topics(&self) -> &[SubscribeTopic] {
        &self.topics
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

impl EncodePacket for SubscribePacket {
    fn encode<V: ProtocolVersion>(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        if self.topics.is_empty() {
            return Err(EncodeError::InvalidData);
        }
        let old_len = buf.len();

        let mut remaining_length = PacketId::bytes();
        if V::HAS_PROPERTIES {
            remaining_length += self.properties.bytes()?;
        }
        remaining_length += self.topics.iter().map(SubscribeTopic::bytes).sum::<usize>();

        let fixed_header = FixedHeader::new(PacketType::Subscribe, remaining_length)
            .map_err(|_| EncodeError::InvalidVarInt)?;
        fixed_header.encode(buf)?;
        self.packet_id.encode(buf)?;
        if V::HAS_PROPERTIES {
            self.properties.encode(buf)?;
        }
        for topic in &self.topics {
            topic.filter.encode(buf)?;
            buf.push(topic.options_byte::<V>());
        }

        Ok(buf.len() - old_len)
    }
}

impl DecodePacket for SubscribePacket {
    fn decode<V: ProtocolVersion>(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let fixed_header = FixedHeader::decode(ba)?;
        if fixed_header.packet_type() != PacketType::Subscribe {
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
                check_property_type_list(properties.props(), SUBSCRIBE_PROPERTIES)
            {
                log::error!("subscribe: Forbidden property {property_type:?} in SUBSCRIBE");
                return Err(DecodeError::ForbiddenProperty);
            }
            properties
        } else {
            Properties::new()
        };

        let mut topics = Vec::new();
        while ba.offset() < end_offset {
            topics.push(SubscribeTopic::decode_options::<V>(ba)?);
        }
        // A SUBSCRIBE packet with no payload is a protocol violation
        // [MQTT-3.8.3-3].
        if topics.is_empty() {
            return Err(DecodeError::EmptyTopicFilter);
        }

        Ok(Self {
            packet_id,
            properties,
            topics,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{V311, V5};

    #[test]
    fn test_encode_v311() {
        let packet = SubscribePacket::new("sensors/+/temp", QoS::AtLeastOnce, PacketId::new(2))
            .unwrap();
        let mut buf = Vec::new();
        packet.encode::<V311>(&mut buf).unwrap();
        assert_eq!(buf[0], 0x82);
        assert_eq!(buf[1] as usize, buf.len() - 2);
        // Requested QoS is the last byte.
        assert_eq!(buf[buf.len() - 1], 0x01);
    }

    #[test]
    fn test_round_trip_v5_options() {
        let mut topic = SubscribeTopic::new("a/b", QoS::ExactOnce).unwrap();
        topic
            .set_no_local(true)
            .set_retain_as_published(true)
            .set_retain_handling(RetainHandling::Suppress);
        let packet = SubscribePacket::with_topics(PacketId::new(3), vec![topic]).unwrap();

        let mut buf = Vec::new();
        packet.encode::<V5>(&mut buf).unwrap();
        let mut ba = ByteArray::new(&buf);
        let decoded = SubscribePacket::decode::<V5>(&mut ba).unwrap();
        assert_eq!(decoded, packet);
        let topic = &decoded.topics()[0];
        assert!(topic.no_local());
        assert!(topic.retain_as_published());
        assert_eq!(topic.retain_handling(), RetainHandling::Suppress);
    }

    #[test]
    fn test_v311_options_serialized_as_zero() {
        let mut topic = SubscribeTopic::new("a/b", QoS::AtLeastOnce).unwrap();
        topic.set_no_local(true).set_retain_handling(RetainHandling::Suppress);
        let packet = SubscribePacket::with_topics(PacketId::new(4), vec![topic]).unwrap();

        let mut buf = Vec::new();
        packet.encode::<V311>(&mut buf).unwrap();
        // Only the QoS bits survive under MQTT 3.1.1.
        assert_eq!(buf[buf.len() - 1], 0x01);
    }

    #[test]
    fn test_multiple_filters_round_trip() {
        let topics = vec![
            SubscribeTopic::new("a/b", QoS::AtLeastOnce).unwrap(),
            SubscribeTopic::new("$SYS/#", QoS::AtMostOnce).unwrap(),
        ];
        let packet = SubscribePacket::with_topics(PacketId::new(9), topics).unwrap();
        let mut buf = Vec::new();
        packet.encode::<V311>(&mut buf).unwrap();

        let mut ba = ByteArray::new(&buf);
        let decoded = SubscribePacket::decode::<V311>(&mut ba).unwrap();
        assert_eq!(decoded.topics().len(), 2);
        assert_eq!(decoded.topics()[1].filter(), "$SYS/#");
    }
}

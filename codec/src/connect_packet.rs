// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use crate::base::{DecodeData, EncodeData};
use crate::property::check_property_type_list;
use crate::utils::validate_client_id;
use crate::{
    BinaryData, ByteArray, DecodeError, DecodePacket, EncodeError, EncodePacket, FixedHeader,
    PacketType, Properties, PropertyType, ProtocolLevel, ProtocolVersion, PubTopic, QoS,
    StringData, PROTOCOL_NAME,
};

/// Properties available in CONNECT packets.
pub const CONNECT_PROPERTIES: &[PropertyType] = &[
    PropertyType::SessionExpiryInterval,
    PropertyType::ReceiveMaximum,
    PropertyType::MaximumPacketSize,
    PropertyType::TopicAliasMaximum,
    PropertyType::RequestResponseInformation,
    PropertyType::RequestProblemInformation,
    PropertyType::UserProperty,
    PropertyType::AuthenticationMethod,
    PropertyType::AuthenticationData,
];

/// Properties available in the will block of CONNECT packets.
pub const WILL_PROPERTIES: &[PropertyType] = &[
    PropertyType::WillDelayInterval,
    PropertyType::PayloadFormatIndicator,
    PropertyType::MessageExpiryInterval,
    PropertyType::ContentType,
    PropertyType::ResponseTopic,
    PropertyType::CorrelationData,
    PropertyType::UserProperty,
];

/// Will message stored in CONNECT packets.
///
/// If the Will Flag is set to 1, the Will Message MUST be published after
/// the Network Connection is subsequently closed unless the Will Message
/// has been deleted by the Server on receipt of a DISCONNECT packet
/// [MQTT-3.1.2-8].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Will {
    topic: PubTopic,
    message: BinaryData,
    qos: QoS,
    retain: bool,

    /// Will properties, MQTT 5.0 only.
    properties: Properties,
}

impl Will {
    /// Create a new will message.
    ///
    /// # Errors
    ///
    /// Returns error if `topic` is invalid or `message` is too long.
    pub fn new(topic: &str, qos: QoS, message: &[u8]) -> Result<Self, EncodeError> {
        Ok(Self {
            topic: PubTopic::new(topic)?,
            message: BinaryData::from_slice(message)?,
            qos,
            retain: false,
            properties: Properties::new(),
        })
    }

    /// Update `retain` flag.
    pub fn set_retain(&mut self, retain: bool) -> &mut Self {
        self.retain = retain;
        self
    }

    #[must_use]
    pub fn topic(&self) -> &str {
        self.topic.as_ref()
    }

    #[must_use]
    pub fn message(&self) -> &[u8] {
        self.message.as_ref()
    }

    #[must_use]
    pub const fn qos(&self) -> QoS {
        self.qos
    }

    #[must_use]
    pub const fn retain(&self) -> bool {
        self.retain
    }

    /// Get a mutable reference to will properties.
    pub fn properties_mut(&mut self) -> &mut Properties {
        &mut self.properties
    }

    #[must_use]
    pub const fn properties(&self) -> &Properties {
        &self.properties
    }
}

/// Structure of a CONNECT packet:
///
/// ```txt
///  7                      0
/// +------------------------+
/// | Fixed header           |
/// |                        |
/// +------------------------+
/// | Protocol name length   |
/// |                        |
/// +------------------------+
/// | Protocol name "MQTT"   |
/// +------------------------+
/// | Protocol level         |
/// +------------------------+
/// | Connect flags          |
/// +------------------------+
/// | Keep alive             |
/// |                        |
/// +------------------------+
/// | Properties (v5 only)   |
/// +------------------------+
/// | Client id              |
/// +------------------------+
/// | Will block, user name, |
/// | password (optional)    |
/// +------------------------+
/// ```
#[allow(clippy::module_name_repetitions)]
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ConnectPacket {
    /// Time interval between two keep alive messages, in seconds.
    ///
    /// The Client MUST send a PINGREQ packet if it has no other packet to
    /// send within one keep alive interval [MQTT-3.1.2-23].
    keep_alive: u16,

    /// Clean session flag (called clean start in MQTT 5.0).
    ///
    /// If set, the Server MUST discard any existing Session and start
    /// a new Session [MQTT-3.1.2-4].
    clean_session: bool,

    /// Identifies the Client to the Server. MUST be the first field in the
    /// CONNECT packet payload [MQTT-3.1.3-3].
    client_id: StringData,

    will: Option<Will>,

    username: Option<StringData>,

    password: Option<BinaryData>,

    /// Connect properties, MQTT 5.0 only.
    properties: Properties,
}

// Connect flag bit positions.
const CLEAN_SESSION_BIT: u8 = 0b0000_0010;
const WILL_FLAG_BIT: u8 = 0b0000_0100;
const WILL_QOS_SHIFT: u8 = 3;
const WILL_RETAIN_BIT: u8 = 0b0010_0000;
const PASSWORD_BIT: u8 = 0b0100_0000;
const USERNAME_BIT: u8 = 0b1000_0000;

impl ConnectPacket {
    /// Create a new CONNECT packet with `client_id`.
    ///
    /// # Errors
    ///
    /// Returns error if `client_id` is invalid.
    pub fn new(client_id: &str) -> Result<Self, EncodeError> {
        validate_client_id(client_id).map_err(|_| EncodeError::InvalidClientId)?;
        Ok(Self {
            keep_alive: 60,
            clean_session: true,
            client_id: StringData::from(client_id)?,
            ..Self::default()
        })
    }

    pub fn set_keep_alive(&mut self, keep_alive: u16) -> &mut Self {
        self.keep_alive = keep_alive;
        self
    }

    #[must_use]
    pub const fn keep_alive(&self) -> u16 {
        self.keep_alive
    }

    pub fn set_clean_session(&mut self, clean_session: bool) -> &mut Self {
        self.clean_session = clean_session;
        self
    }

    #[must_use]
    pub const fn clean_session(&self) -> bool {
        self.clean_session
    }

    #[must_use]
    pub fn client_id(&self) -> &str {
        self.client_id.as_ref()
    }

    pub fn set_will(&mut self, will: Option<Will>) -> &mut Self {
        self.will = will;
        self
    }

    #[must_use]
    pub const fn will(&self) -> Option<&Will> {
        self.will.as_ref()
    }

    /// Update username field.
    ///
    /// # Errors
    ///
    /// Returns error if `username` is invalid.
    pub fn set_username(&mut self, username: Option<&str>) -> Result<&mut Self, EncodeError> {
        self.username = match username {
            Some(s) => Some(StringData::from(s)?),
            None => None,
        };
        Ok(self)
    }

    #[must_use]
    pub fn username(&self) -> Option<&str> {
        self.username.as_ref().map(AsRef::as_ref)
    }

    /// Update password field.
    ///
    /// # Errors
    ///
    /// Returns error if `password` is too long.
    pub fn set_password(&mut self, password: Option<&[u8]>) -> Result<&mut Self, EncodeError> {
        self.password = match password {
            Some(bytes) => Some(BinaryData::from_slice(bytes)?),
            None => None,
        };
        Ok(self)
    }

    #[must_use]
    pub fn password(&self) -> Option<&[u8]> {
        self.password.as_ref().map(AsRef::as_ref)
    }

    /// Get a mutable reference to the property list.
    pub fn properties_mut(&mut self) -> &mut Properties {
        &mut self.properties
    }

    #[must_use]
    pub const fn properties(&self) -> &Properties {
        &self.properties
    }

    fn connect_flags(&self) -> u8 {
        let mut flags = 0;
        if self.clean_session {
            flags |= CLEAN_SESSION_BIT;
        }
        if let Some(will) = &self.will {
            flags |= WILL_FLAG_BIT;
            flags |= (will.qos as u8) << WILL_QOS_SHIFT;
            if will.retain {
                flags |= WILL_RETAIN_BIT;
            }
        }
        if self.password.is_some() {
            flags |= PASSWORD_BIT;
        }
        if self.username.is_some() {
            flags |= USERNAME_BIT;
        }
        flags
    }

    fn remaining_length<V: ProtocolVersion>(&self) -> Result<usize, EncodeError> {
        // Protocol name, protocol level, connect flags, keep alive.
        let mut len = 2 + PROTOCOL_NAME.len() + ProtocolLevel::bytes() + 1 + 2;
        if V::HAS_PROPERTIES {
            len += self.properties.bytes()?;
        }
        len += self.client_id.bytes();
        if let Some(will) = &self.will {
            if V::HAS_PROPERTIES {
                len += will.properties.bytes()?;
            }
            len += will.topic.bytes() + will.message.bytes();
        }
        if let Some(username) = &self.username {
            len += username.bytes();
        }
        if let Some(password) = &self.password {
            len += password.bytes();
        }
        Ok(len)
    }
}

impl EncodePacket for ConnectPacket {
    fn encode<V: ProtocolVersion>(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        let old_len = buf.len();

        let remaining_length = self.remaining_length::<V>()?;
        let fixed_header = FixedHeader::new(PacketType::Connect, remaining_length)
            .map_err(|_| EncodeError::InvalidVarInt)?;
        fixed_header.encode(buf)?;

        let protocol_name = StringData::from(PROTOCOL_NAME)?;
        protocol_name.encode(buf)?;
        V::LEVEL.encode(buf)?;
        buf.push(self.connect_flags());
        buf.push((self.keep_alive >> 8) as u8);
        buf.push((self.keep_alive & 0xff) as u8);
        if V::HAS_PROPERTIES {
            self.properties.encode(buf)?;
        }

        self.client_id.encode(buf)?;
        if let Some(will) = &self.will {
            if V::HAS_PROPERTIES {
                will.properties.encode(buf)?;
            }
            will.topic.encode(buf)?;
            will.message.encode(buf)?;
        }
        if let Some(username) = &self.username {
            username.encode(buf)?;
        }
        if let Some(password) = &self.password {
            password.encode(buf)?;
        }

        Ok(buf.len() - old_len)
    }
}

impl DecodePacket for ConnectPacket {
    fn decode<V: ProtocolVersion>(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let fixed_header = FixedHeader::decode(ba)?;
        if fixed_header.packet_type() != PacketType::Connect {
            return Err(DecodeError::InvalidPacketType);
        }

        let protocol_name = StringData::decode(ba)?;
        if protocol_name.as_ref() != PROTOCOL_NAME {
            return Err(DecodeError::InvalidProtocolName);
        }
        let level = ProtocolLevel::decode(ba)?;
        if level != V::LEVEL {
            return Err(DecodeError::InvalidProtocolLevel);
        }

        let flags = ba.read_byte()?;
        // The Server MUST validate that the reserved flag in the CONNECT
        // packet is set to 0 [MQTT-3.1.2-3].
        if flags & 0b0000_0001 != 0 {
            return Err(DecodeError::InvalidConnectFlags);
        }
        let clean_session = flags & CLEAN_SESSION_BIT != 0;
        let will_flag = flags & WILL_FLAG_BIT != 0;
        let will_qos = QoS::try_from((flags >> WILL_QOS_SHIFT) & 0b0000_0011)?;
        let will_retain = flags & WILL_RETAIN_BIT != 0;
        let has_password = flags & PASSWORD_BIT != 0;
        let has_username = flags & USERNAME_BIT != 0;

        // If the Will Flag is set to 0, then Will QoS and Will Retain MUST
        // be set to 0 [MQTT-3.1.2-11].
        if !will_flag && (will_qos != QoS::AtMostOnce || will_retain) {
            return Err(DecodeError::InvalidConnectFlags);
        }
        // In MQTT 3.1.1 a password requires a user name [MQTT-3.1.2-22].
        if !V::HAS_PROPERTIES && has_password && !has_username {
            return Err(DecodeError::InvalidConnectFlags);
        }

        let keep_alive = ba.read_u16()?;

        let properties = if V::HAS_PROPERTIES {
            let properties = Properties::decode(ba)?;
            if let Err(property_type) =
                check_property_type_list(properties.props(), CONNECT_PROPERTIES)
            {
                log::error!("connect: Forbidden property {property_type:?} in CONNECT");
                return Err(DecodeError::ForbiddenProperty);
            }
            properties
        } else {
            Properties::new()
        };

        let client_id = StringData::decode(ba)?;
        validate_client_id(client_id.as_ref()).map_err(|_| DecodeError::InvalidClientId)?;

        let will = if will_flag {
            let will_properties = if V::HAS_PROPERTIES {
                let will_properties = Properties::decode(ba)?;
                if let Err(property_type) =
                    check_property_type_list(will_properties.props(), WILL_PROPERTIES)
                {
                    log::error!("connect: Forbidden property {property_type:?} in will block");
                    return Err(DecodeError::ForbiddenProperty);
                }
                will_properties
            } else {
                Properties::new()
            };
            let topic = PubTopic::decode(ba)?;
            let message = BinaryData::decode(ba)?;
            Some(Will {
                topic,
                message,
                qos: will_qos,
                retain: will_retain,
                properties: will_properties,
            })
        } else {
            None
        };

        let username = if has_username {
            Some(StringData::decode(ba)?)
        } else {
            None
        };
        let password = if has_password {
            Some(BinaryData::decode(ba)?)
        } else {
            None
        };

        Ok(Self {
            keep_alive,
            clean_session,
            client_id,
            will,
            username,
            password,
            properties,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Property, U32Data, V311, V5};

    #[test]
    fn test_encode_v311() {
        let mut packet = ConnectPacket::new("id").unwrap();
        packet.set_keep_alive(60);
        let mut buf = Vec::new();
        packet.encode::<V311>(&mut buf).unwrap();
        assert_eq!(
            buf,
            vec![
                0x10, 0x0e, 0x00, 0x04, b'M', b'Q', b'T', b'T', 0x04, 0x02, 0x00, 0x3c, 0x00,
                0x02, b'i', b'd',
            ]
        );
    }

    #[test]
    fn test_round_trip_v5() {
        let mut packet = ConnectPacket::new("c1").unwrap();
        packet.set_keep_alive(30).set_clean_session(true);
        packet
            .properties_mut()
            .push(Property::SessionExpiryInterval(U32Data::new(300)));
        let mut buf = Vec::new();
        packet.encode::<V5>(&mut buf).unwrap();

        let mut ba = ByteArray::new(&buf);
        let decoded = ConnectPacket::decode::<V5>(&mut ba).unwrap();
        assert_eq!(decoded, packet);
        assert_eq!(decoded.properties().session_expiry_interval(), Some(300));
    }

    #[test]
    fn test_round_trip_with_will_and_credentials() {
        let mut packet = ConnectPacket::new("c2").unwrap();
        let mut will = Will::new("last/will", QoS::AtLeastOnce, b"gone").unwrap();
        will.set_retain(true);
        packet.set_will(Some(will));
        packet.set_username(Some("user")).unwrap();
        packet.set_password(Some(b"pass")).unwrap();

        let mut buf = Vec::new();
        packet.encode::<V311>(&mut buf).unwrap();
        let mut ba = ByteArray::new(&buf);
        let decoded = ConnectPacket::decode::<V311>(&mut ba).unwrap();
        assert_eq!(decoded, packet);
        assert_eq!(decoded.will().unwrap().topic(), "last/will");
    }

    #[test]
    fn test_version_mismatch() {
        let packet = ConnectPacket::new("c3").unwrap();
        let mut buf = Vec::new();
        packet.encode::<V311>(&mut buf).unwrap();
        let mut ba = ByteArray::new(&buf);
        assert_eq!(
            ConnectPacket::decode::<V5>(&mut ba),
            Err(DecodeError::InvalidProtocolLevel)
        );
    }

    #[test]
    fn test_password_without_username_v311() {
        let mut packet = ConnectPacket::new("c4").unwrap();
        packet.set_password(Some(b"secret")).unwrap();
        let mut buf = Vec::new();
        packet.encode::<V311>(&mut buf).unwrap();
        let mut ba = ByteArray::new(&buf);
        assert_eq!(
            ConnectPacket::decode::<V311>(&mut ba),
            Err(DecodeError::InvalidConnectFlags)
        );
    }
}

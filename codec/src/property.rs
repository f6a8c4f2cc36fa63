// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! MQTT 5.0 property blocks.
//!
//! The last field of the Variable Header of the CONNECT, CONNACK, PUBLISH,
//! PUBACK, PUBREC, PUBREL, PUBCOMP, SUBSCRIBE, SUBACK, UNSUBSCRIBE, UNSUBACK,
//! DISCONNECT and AUTH packets is a set of Properties. A Property consists
//! of an Identifier which defines its usage and data type, followed by
//! a value. The set of Properties is preceded by its length in bytes
//! encoded as a Variable Byte Integer.

use std::convert::TryFrom;

use crate::base::{DecodeData, EncodeData};
use crate::{
    BinaryData, BoolData, ByteArray, DecodeError, EncodeError, PubTopic, QoS, StringData,
    StringPairData, U16Data, U32Data, VarInt,
};

/// Properties which may appear more than once in one property block.
pub const MULTIPLE_PROPERTIES: &[PropertyType] = &[
    PropertyType::UserProperty,
    PropertyType::SubscriptionIdentifier,
];

/// Property identifier byte.
#[allow(clippy::module_name_repetitions)]
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PropertyType {
    PayloadFormatIndicator = 0x01,
    MessageExpiryInterval = 0x02,
    ContentType = 0x03,
    ResponseTopic = 0x08,
    CorrelationData = 0x09,
    SubscriptionIdentifier = 0x0b,
    SessionExpiryInterval = 0x11,
    AssignedClientIdentifier = 0x12,
    ServerKeepAlive = 0x13,
    AuthenticationMethod = 0x15,
    AuthenticationData = 0x16,
    RequestProblemInformation = 0x17,
    WillDelayInterval = 0x18,
    RequestResponseInformation = 0x19,
    ResponseInformation = 0x1a,
    ServerReference = 0x1c,
    ReasonString = 0x1f,
    ReceiveMaximum = 0x21,
    TopicAliasMaximum = 0x22,
    TopicAlias = 0x23,
    MaximumQoS = 0x24,
    RetainAvailable = 0x25,
    UserProperty = 0x26,
    MaximumPacketSize = 0x27,
    WildcardSubscriptionAvailable = 0x28,
    SubscriptionIdentifierAvailable = 0x29,
    SharedSubscriptionAvailable = 0x2a,
}

impl PropertyType {
    /// Get byte length used in packet.
    #[must_use]
    pub const fn bytes() -> usize {
        1
    }
}

impl TryFrom<u8> for PropertyType {
    type Error = DecodeError;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0x01 => Ok(Self::PayloadFormatIndicator),
            0x02 => Ok(Self::MessageExpiryInterval),
            0x03 => Ok(Self::ContentType),
            0x08 => Ok(Self::ResponseTopic),
            0x09 => Ok(Self::CorrelationData),
            0x0b => Ok(Self::SubscriptionIdentifier),
            0x11 => Ok(Self::SessionExpiryInterval),
            0x12 => Ok(Self::AssignedClientIdentifier),
            0x13 => Ok(Self::ServerKeepAlive),
            0x15 => Ok(Self::AuthenticationMethod),
            0x16 => Ok(Self::AuthenticationData),
            0x17 => Ok(Self::RequestProblemInformation),
            0x18 => Ok(Self::WillDelayInterval),
            0x19 => Ok(Self::RequestResponseInformation),
            0x1a => Ok(Self::ResponseInformation),
            0x1c => Ok(Self::ServerReference),
            0x1f => Ok(Self::ReasonString),
            0x21 => Ok(Self::ReceiveMaximum),
            0x22 => Ok(Self::TopicAliasMaximum),
            0x23 => Ok(Self::TopicAlias),
            0x24 => Ok(Self::MaximumQoS),
            0x25 => Ok(Self::RetainAvailable),
            0x26 => Ok(Self::UserProperty),
            0x27 => Ok(Self::MaximumPacketSize),
            0x28 => Ok(Self::WildcardSubscriptionAvailable),
            0x29 => Ok(Self::SubscriptionIdentifierAvailable),
            0x2a => Ok(Self::SharedSubscriptionAvailable),
            _ => Err(DecodeError::InvalidPropertyType),
        }
    }
}

/// One property value.
///
/// The value shape is determined by the identifier. Integer shapes follow
/// MQTT 5.0 section 2.2.2.2.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Property {
    /// Byte. Used in PUBLISH, Will Properties.
    ///
    /// A value of 1 indicates the payload is UTF-8 encoded character data.
    /// It is a Protocol Error to include the Payload Format Indicator more
    /// than once.
    PayloadFormatIndicator(BoolData),

    /// Four Byte Integer. Used in PUBLISH, Will Properties.
    ///
    /// Lifetime of the message in seconds. If absent, the message does not
    /// expire.
    MessageExpiryInterval(U32Data),

    /// UTF-8 Encoded String. Used in PUBLISH, Will Properties.
    ContentType(StringData),

    /// UTF-8 Encoded String. Used in PUBLISH, Will Properties.
    ///
    /// Topic Name for a response message in request/response interactions.
    ResponseTopic(PubTopic),

    /// Binary Data. Used in PUBLISH, Will Properties.
    CorrelationData(BinaryData),

    /// Variable Byte Integer. Used in PUBLISH, SUBSCRIBE.
    ///
    /// The Subscription Identifier can have the value of 1 to 268,435,455.
    /// It is a Protocol Error if the Subscription Identifier has a value
    /// of 0.
    SubscriptionIdentifier(VarInt),

    /// Four Byte Integer. Used in CONNECT, CONNACK, DISCONNECT.
    ///
    /// The Client and Server MUST store the Session State after the Network
    /// Connection is closed if the Session Expiry Interval is greater than
    /// 0 [MQTT-3.1.2-23].
    SessionExpiryInterval(U32Data),

    /// UTF-8 Encoded String. Used in CONNACK.
    ///
    /// The Client Identifier which was assigned by the Server because a zero
    /// length Client Identifier was found in the CONNECT packet.
    AssignedClientIdentifier(StringData),

    /// Two Byte Integer. Used in CONNACK.
    ///
    /// If the Server sends a Server Keep Alive on the CONNACK packet, the
    /// Client MUST use this value instead of the Keep Alive value the Client
    /// sent on CONNECT [MQTT-3.2.2-21].
    ServerKeepAlive(U16Data),

    /// UTF-8 Encoded String. Used in CONNECT, CONNACK, AUTH.
    AuthenticationMethod(StringData),

    /// Binary Data. Used in CONNECT, CONNACK, AUTH.
    ///
    /// It is a Protocol Error to include Authentication Data if there is
    /// no Authentication Method.
    AuthenticationData(BinaryData),

    /// Byte. Used in CONNECT.
    RequestProblemInformation(BoolData),

    /// Four Byte Integer. Used in Will Properties.
    WillDelayInterval(U32Data),

    /// Byte. Used in CONNECT.
    RequestResponseInformation(BoolData),

    /// UTF-8 Encoded String. Used in CONNACK.
    ResponseInformation(StringData),

    /// UTF-8 Encoded String. Used in CONNACK, DISCONNECT.
    ServerReference(StringData),

    /// UTF-8 Encoded String. Used in all acknowledgement packets.
    ///
    /// A human readable string designed for diagnostics which SHOULD NOT be
    /// parsed by the receiver.
    ReasonString(StringData),

    /// Two Byte Integer. Used in CONNECT, CONNACK.
    ///
    /// The Client uses this value to limit the number of QoS 1 and QoS 2
    /// publications that it is willing to process concurrently. It is a
    /// Protocol Error to include the Receive Maximum value more than once
    /// or for it to have the value 0.
    ReceiveMaximum(U16Data),

    /// Two Byte Integer. Used in CONNECT, CONNACK.
    TopicAliasMaximum(U16Data),

    /// Two Byte Integer. Used in PUBLISH.
    TopicAlias(U16Data),

    /// Byte. Used in CONNACK.
    MaximumQoS(QoS),

    /// Byte. Used in CONNACK.
    RetainAvailable(BoolData),

    /// UTF-8 String Pair. Used in all packets which carry properties.
    ///
    /// The User Property is allowed to appear multiple times to represent
    /// multiple name, value pairs. The same name is allowed to appear more
    /// than once.
    UserProperty(StringPairData),

    /// Four Byte Integer. Used in CONNECT, CONNACK.
    ///
    /// It is a Protocol Error to include the Maximum Packet Size more than
    /// once, or for the value to be set to zero.
    MaximumPacketSize(U32Data),

    /// Byte. Used in CONNACK.
    WildcardSubscriptionAvailable(BoolData),

    /// Byte. Used in CONNACK.
    SubscriptionIdentifierAvailable(BoolData),

    /// Byte. Used in CONNACK.
    SharedSubscriptionAvailable(BoolData),
}

impl Property {
    /// Get identifier of this property.
    #[must_use]
    pub const fn property_type(&self) -> PropertyType {
        match self {
            Self::PayloadFormatIndicator(_) => PropertyType::PayloadFormatIndicator,
            Self::MessageExpiryInterval(_) => PropertyType::MessageExpiryInterval,
            Self::ContentType(_) => PropertyType::ContentType,
            Self::ResponseTopic(_) => PropertyType::ResponseTopic,
            Self::CorrelationData(_) => PropertyType::CorrelationData,
            Self::SubscriptionIdentifier(_) => PropertyType::SubscriptionIdentifier,
            Self::SessionExpiryInterval(_) => PropertyType::SessionExpiryInterval,
            Self::AssignedClientIdentifier(_) => PropertyType::AssignedClientIdentifier,
            Self::ServerKeepAlive(_) => PropertyType::ServerKeepAlive,
            Self::AuthenticationMethod(_) => PropertyType::AuthenticationMethod,
            Self::AuthenticationData(_) => PropertyType::AuthenticationData,
            Self::RequestProblemInformation(_) => PropertyType::RequestProblemInformation,
            Self::WillDelayInterval(_) => PropertyType::WillDelayInterval,
            Self::RequestResponseInformation(_) => PropertyType::RequestResponseInformation,
            Self::ResponseInformation(_) => PropertyType::ResponseInformation,
            Self::ServerReference(_) => PropertyType::ServerReference,
            Self::ReasonString(_) => PropertyType::ReasonString,
            Self::ReceiveMaximum(_) => PropertyType::ReceiveMaximum,
            Self::TopicAliasMaximum(_) => PropertyType::TopicAliasMaximum,
            Self::TopicAlias(_) => PropertyType::TopicAlias,
            Self::MaximumQoS(_) => PropertyType::MaximumQoS,
            Self::RetainAvailable(_) => PropertyType::RetainAvailable,
            Self::UserProperty(_) => PropertyType::UserProperty,
            Self::MaximumPacketSize(_) => PropertyType::MaximumPacketSize,
            Self::WildcardSubscriptionAvailable(_) => PropertyType::WildcardSubscriptionAvailable,
            Self::SubscriptionIdentifierAvailable(_) => {
                PropertyType::SubscriptionIdentifierAvailable
            }
            Self::SharedSubscriptionAvailable(_) => PropertyType::SharedSubscriptionAvailable,
        }
    }

    /// Get byte length in packet, including the identifier byte.
    #[must_use]
    pub fn bytes(&self) -> usize {
        let value_bytes = match self {
            Self::PayloadFormatIndicator(_)
            | Self::RequestProblemInformation(_)
            | Self::RequestResponseInformation(_)
            | Self::MaximumQoS(_)
            | Self::RetainAvailable(_)
            | Self::WildcardSubscriptionAvailable(_)
            | Self::SubscriptionIdentifierAvailable(_)
            | Self::SharedSubscriptionAvailable(_) => 1,
            Self::ServerKeepAlive(_)
            | Self::ReceiveMaximum(_)
            | Self::TopicAliasMaximum(_)
            | Self::TopicAlias(_) => U16Data::bytes(),
            Self::MessageExpiryInterval(_)
            | Self::SessionExpiryInterval(_)
            | Self::WillDelayInterval(_)
            | Self::MaximumPacketSize(_) => U32Data::bytes(),
            Self::SubscriptionIdentifier(v) => v.bytes(),
            Self::ContentType(v)
            | Self::AssignedClientIdentifier(v)
            | Self::AuthenticationMethod(v)
            | Self::ResponseInformation(v)
            | Self::ServerReference(v)
            | Self::ReasonString(v) => v.bytes(),
            Self::ResponseTopic(v) => v.bytes(),
            Self::CorrelationData(v) | Self::AuthenticationData(v) => v.bytes(),
            Self::UserProperty(v) => v.bytes(),
        };
        PropertyType::bytes() + value_bytes
    }
}

impl DecodeData for Property {
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let property_type = PropertyType::try_from(ba.read_byte()?)?;
        let property = match property_type {
            PropertyType::PayloadFormatIndicator => {
                Self::PayloadFormatIndicator(BoolData::decode(ba)?)
            }
            PropertyType::MessageExpiryInterval => {
                Self::MessageExpiryInterval(U32Data::decode(ba)?)
            }
            PropertyType::ContentType => Self::ContentType(StringData::decode(ba)?),
            PropertyType::ResponseTopic => Self::ResponseTopic(PubTopic::decode(ba)?),
            PropertyType::CorrelationData => Self::CorrelationData(BinaryData::decode(ba)?),
            PropertyType::SubscriptionIdentifier => {
                let id = VarInt::decode(ba)?;
                if id.value() == 0 {
                    return Err(DecodeError::InvalidPropertyValue);
                }
                Self::SubscriptionIdentifier(id)
            }
            PropertyType::SessionExpiryInterval => {
                Self::SessionExpiryInterval(U32Data::decode(ba)?)
            }
            PropertyType::AssignedClientIdentifier => {
                Self::AssignedClientIdentifier(StringData::decode(ba)?)
            }
            PropertyType::ServerKeepAlive => Self::ServerKeepAlive(U16Data::decode(ba)?),
            PropertyType::AuthenticationMethod => {
                Self::AuthenticationMethod(StringData::decode(ba)?)
            }
            PropertyType::AuthenticationData => Self::AuthenticationData(BinaryData::decode(ba)?),
            PropertyType::RequestProblemInformation => {
                Self::RequestProblemInformation(BoolData::decode(ba)?)
            }
            PropertyType::WillDelayInterval => Self::WillDelayInterval(U32Data::decode(ba)?),
            PropertyType::RequestResponseInformation => {
                Self::RequestResponseInformation(BoolData::decode(ba)?)
            }
            PropertyType::ResponseInformation => {
                Self::ResponseInformation(StringData::decode(ba)?)
            }
            PropertyType::ServerReference => Self::ServerReference(StringData::decode(ba)?),
            PropertyType::ReasonString => Self::ReasonString(StringData::decode(ba)?),
            PropertyType::ReceiveMaximum => {
                let value = U16Data::decode(ba)?;
                if value.value() == 0 {
                    return Err(DecodeError::InvalidPropertyValue);
                }
                Self::ReceiveMaximum(value)
            }
            PropertyType::TopicAliasMaximum => Self::TopicAliasMaximum(U16Data::decode(ba)?),
            PropertyType::TopicAlias => Self::TopicAlias(U16Data::decode(ba)?),
            PropertyType::MaximumQoS => {
                let qos = QoS::decode(ba)?;
                if qos == QoS::ExactOnce {
                    return Err(DecodeError::InvalidPropertyValue);
                }
                Self::MaximumQoS(qos)
            }
            PropertyType::RetainAvailable => Self::RetainAvailable(BoolData::decode(ba)?),
            PropertyType::UserProperty => Self::UserProperty(StringPairData::decode(ba)?),
            PropertyType::MaximumPacketSize => {
                let value = U32Data::decode(ba)?;
                if value.value() == 0 {
                    return Err(DecodeError::InvalidPropertyValue);
                }
                Self::MaximumPacketSize(value)
            }
            PropertyType::WildcardSubscriptionAvailable => {
                Self::WildcardSubscriptionAvailable(BoolData::decode(ba)?)
            }
            PropertyType::SubscriptionIdentifierAvailable => {
                Self::SubscriptionIdentifierAvailable(BoolData::decode(ba)?)
            }
            PropertyType::SharedSubscriptionAvailable => {
                Self::SharedSubscriptionAvailable(BoolData::decode(ba)?)
            }
        };
        Ok(property)
    }
}

impl EncodeData for Property {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        buf.push(self.property_type() as u8);
        let value_bytes = match self {
            Self::PayloadFormatIndicator(v)
            | Self::RequestProblemInformation(v)
            | Self::RequestResponseInformation(v)
            | Self::RetainAvailable(v)
            | Self::WildcardSubscriptionAvailable(v)
            | Self::SubscriptionIdentifierAvailable(v)
            | Self::SharedSubscriptionAvailable(v) => v.encode(buf)?,
            Self::MaximumQoS(v) => v.encode(buf)?,
            Self::ServerKeepAlive(v)
            | Self::ReceiveMaximum(v)
            | Self::TopicAliasMaximum(v)
            | Self::TopicAlias(v) => v.encode(buf)?,
            Self::MessageExpiryInterval(v)
            | Self::SessionExpiryInterval(v)
            | Self::WillDelayInterval(v)
            | Self::MaximumPacketSize(v) => v.encode(buf)?,
            Self::SubscriptionIdentifier(v) => v.encode(buf)?,
            Self::ContentType(v)
            | Self::AssignedClientIdentifier(v)
            | Self::AuthenticationMethod(v)
            | Self::ResponseInformation(v)
            | Self::ServerReference(v)
            | Self::ReasonString(v) => v.encode(buf)?,
            Self::ResponseTopic(v) => v.encode(buf)?,
            Self::CorrelationData(v) | Self::AuthenticationData(v) => v.encode(buf)?,
            Self::UserProperty(v) => v.encode(buf)?,
        };
        Ok(PropertyType::bytes() + value_bytes)
    }
}

/// Check that every property in `properties` is permitted by `types` and
/// that non-repeatable properties appear at most once.
///
/// # Errors
///
/// Returns the offending property type.
pub fn check_property_type_list(
    properties: &[Property],
    types: &[PropertyType],
) -> Result<(), PropertyType> {
    if properties.is_empty() {
        return Ok(());
    }

    for property in properties {
        if !types.contains(&property.property_type()) {
            return Err(property.property_type());
        }
    }

    for property_type in types {
        let count = properties
            .iter()
            .filter(|p| p.property_type() == *property_type)
            .count();
        if count > 1 && !MULTIPLE_PROPERTIES.contains(property_type) {
            return Err(*property_type);
        }
    }

    Ok(())
}

/// Property block: a Variable Byte Integer byte length followed by a
/// sequence of properties.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Properties(Vec<Property>);

impl Properties {
    /// Create an empty property block.
    #[must_use]
    pub const fn new() -> Self {
        Self(Vec::new())
    }

    /// Get inner property list.
    #[must_use]
    pub fn props(&self) -> &[Property] {
        &self.0
    }

    /// Append one property.
    pub fn push(&mut self, property: Property) -> &mut Self {
        self.0.push(property);
        self
    }

    /// Returns true if no property is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Get number of properties in this block.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Get byte length in packet, including the length prefix.
    ///
    /// # Errors
    ///
    /// Returns error if the payload does not fit in a Variable Byte Integer.
    pub fn bytes(&self) -> Result<usize, EncodeError> {
        let payload: usize = self.0.iter().map(Property::bytes).sum();
        let len = VarInt::from(payload).map_err(|_| EncodeError::InvalidVarInt)?;
        Ok(len.bytes() + payload)
    }

    fn find(&self, property_type: PropertyType) -> Option<&Property> {
        self.0.iter().find(|p| p.property_type() == property_type)
    }

    /// Get session expiry interval value in seconds.
    #[must_use]
    pub fn session_expiry_interval(&self) -> Option<u32> {
        match self.find(PropertyType::SessionExpiryInterval) {
            Some(Property::SessionExpiryInterval(v)) => Some(v.value()),
            _ => None,
        }
    }

    /// Get receive maximum value.
    #[must_use]
    pub fn receive_maximum(&self) -> Option<u16> {
        match self.find(PropertyType::ReceiveMaximum) {
            Some(Property::ReceiveMaximum(v)) => Some(v.value()),
            _ => None,
        }
    }

    /// Get server keep alive value in seconds.
    #[must_use]
    pub fn server_keep_alive(&self) -> Option<u16> {
        match self.find(PropertyType::ServerKeepAlive) {
            Some(Property::ServerKeepAlive(v)) => Some(v.value()),
            _ => None,
        }
    }

    /// Get client identifier assigned by the server.
    #[must_use]
    pub fn assigned_client_identifier(&self) -> Option<&str> {
        match self.find(PropertyType::AssignedClientIdentifier) {
            Some(Property::AssignedClientIdentifier(v)) => Some(v.as_ref()),
            _ => None,
        }
    }

    /// Get maximum packet size the peer accepts.
    #[must_use]
    pub fn maximum_packet_size(&self) -> Option<u32> {
        match self.find(PropertyType::MaximumPacketSize) {
            Some(Property::MaximumPacketSize(v)) => Some(v.value()),
            _ => None,
        }
    }

    /// Get authentication method name.
    #[must_use]
    pub fn authentication_method(&self) -> Option<&str> {
        match self.find(PropertyType::AuthenticationMethod) {
            Some(Property::AuthenticationMethod(v)) => Some(v.as_ref()),
            _ => None,
        }
    }

    /// Get authentication data bytes.
    #[must_use]
    pub fn authentication_data(&self) -> Option<&[u8]> {
        match self.find(PropertyType::AuthenticationData) {
            Some(Property::AuthenticationData(v)) => Some(v.as_ref()),
            _ => None,
        }
    }

    /// Get reason string sent by the peer.
    #[must_use]
    pub fn reason_string(&self) -> Option<&str> {
        match self.find(PropertyType::ReasonString) {
            Some(Property::ReasonString(v)) => Some(v.as_ref()),
            _ => None,
        }
    }
}

impl DecodeData for Properties {
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let len = VarInt::decode(ba)?;
        let end_offset = ba.offset() + len.value();
        let mut properties = Vec::new();
        while ba.offset() < end_offset {
            properties.push(Property::decode(ba)?);
        }
        if ba.offset() != end_offset {
            return Err(DecodeError::InvalidRemainingLength);
        }
        Ok(Self(properties))
    }
}

impl EncodeData for Properties {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        let payload: usize = self.0.iter().map(Property::bytes).sum();
        let len = VarInt::from(payload).map_err(|_| EncodeError::InvalidVarInt)?;
        let mut written = len.encode(buf)?;
        for property in &self.0 {
            written += property.encode(buf)?;
        }
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_properties() {
        let props = Properties::new();
        let mut buf = Vec::new();
        assert_eq!(props.encode(&mut buf).unwrap(), 1);
        assert_eq!(&buf, &[0x00]);

        let mut ba = ByteArray::new(&buf);
        let decoded = Properties::decode(&mut ba).unwrap();
        assert!(decoded.is_empty());
    }

    #[test]
    fn test_properties_round_trip() {
        let mut props = Properties::new();
        props
            .push(Property::SessionExpiryInterval(U32Data::new(120)))
            .push(Property::ReceiveMaximum(U16Data::new(20)))
            .push(Property::UserProperty(
                StringPairData::from("key", "value").unwrap(),
            ));
        let mut buf = Vec::new();
        let written = props.encode(&mut buf).unwrap();
        assert_eq!(written, props.bytes().unwrap());

        let mut ba = ByteArray::new(&buf);
        let decoded = Properties::decode(&mut ba).unwrap();
        assert_eq!(decoded, props);
        assert_eq!(decoded.session_expiry_interval(), Some(120));
        assert_eq!(decoded.receive_maximum(), Some(20));
    }

    #[test]
    fn test_check_property_type_list() {
        let mut props = Properties::new();
        props.push(Property::ReceiveMaximum(U16Data::new(10)));
        props.push(Property::ReceiveMaximum(U16Data::new(20)));
        assert_eq!(
            check_property_type_list(props.props(), &[PropertyType::ReceiveMaximum]),
            Err(PropertyType::ReceiveMaximum)
        );

        let mut props = Properties::new();
        props.push(Property::UserProperty(
            StringPairData::from("a", "1").unwrap(),
        ));
        props.push(Property::UserProperty(
            StringPairData::from("a", "2").unwrap(),
        ));
        assert!(check_property_type_list(props.props(), &[PropertyType::UserProperty]).is_ok());
    }

    #[test]
    fn test_zero_receive_maximum() {
        let buf = [0x03, 0x21, 0x00, 0x00];
        let mut ba = ByteArray::new(&buf);
        assert_eq!(
            Properties::decode(&mut ba),
            Err(DecodeError::InvalidPropertyValue)
        );
    }
}

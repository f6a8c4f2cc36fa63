// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use crate::base::{DecodeData, EncodeData};
use crate::property::check_property_type_list;
use crate::{
    ByteArray, ConnectReturnCode, DecodeError, DecodePacket, EncodeError, EncodePacket,
    FixedHeader, PacketType, Properties, PropertyType, ProtocolVersion, ReasonCode,
};

/// Properties available in CONNACK packets.
pub const CONNECT_ACK_PROPERTIES: &[PropertyType] = &[
    PropertyType::SessionExpiryInterval,
    PropertyType::ReceiveMaximum,
    PropertyType::MaximumQoS,
    PropertyType::RetainAvailable,
    PropertyType::MaximumPacketSize,
    PropertyType::AssignedClientIdentifier,
    PropertyType::TopicAliasMaximum,
    PropertyType::ReasonString,
    PropertyType::UserProperty,
    PropertyType::WildcardSubscriptionAvailable,
    PropertyType::SubscriptionIdentifierAvailable,
    PropertyType::SharedSubscriptionAvailable,
    PropertyType::ServerKeepAlive,
    PropertyType::ResponseInformation,
    PropertyType::ServerReference,
    PropertyType::AuthenticationMethod,
    PropertyType::AuthenticationData,
];

/// The CONNACK packet is the packet sent by the Server in response to
/// a CONNECT packet received from a Client.
///
/// The Server MUST send a CONNACK with a zero return code before sending any
/// packet other than AUTH [MQTT-3.2.0-1].
///
/// ```txt
///  7                        0
/// +--------------------------+
/// | Fixed header             |
/// |                          |
/// +--------------------------+
/// | Ack flags                |
/// +--------------------------+
/// | Return code/reason code  |
/// +--------------------------+
/// | Properties (v5 only)     |
/// +--------------------------+
/// ```
///
/// This packet does not contain a payload.
#[allow(clippy::module_name_repetitions)]
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ConnectAckPacket {
    /// The Session Present flag informs the Client whether the Server is
    /// using Session State from a previous connection for this ClientID.
    ///
    /// If the Server accepts a connection with Clean Start set to 1, the
    /// Server MUST set Session Present to 0 in the CONNACK packet
    /// [MQTT-3.2.2-2].
    session_present: bool,

    /// Connect return code, MQTT 3.1.1.
    return_code: Option<ConnectReturnCode>,

    /// Connect reason code, MQTT 5.0.
    reason_code: Option<ReasonCode>,

    /// Connack properties, MQTT 5.0 only.
    properties: Properties,
}

impl ConnectAckPacket {
    /// Create a new CONNACK packet.
    #[must_use]
    pub fn new(session_present: bool) -> Self {
        Self {
            session_present,
            ..Self::default()
        }
    }

    #[must_use]
    pub const fn session_present(&self) -> bool {
        self.session_present
    }

    pub fn set_return_code(&mut self, return_code: ConnectReturnCode) -> &mut Self {
        self.return_code = Some(return_code);
        self
    }

    #[must_use]
    pub const fn return_code(&self) -> Option<ConnectReturnCode> {
        self.return_code
    }

    pub fn set_reason_code(&mut self, reason_code: ReasonCode) -> &mut Self {
        self.reason_code = Some(reason_code);
        self
    }

    #[must_use]
    pub const fn reason_code(&self) -> Option<ReasonCode> {
        self.reason_code
    }

    /// Returns true if the broker accepted the connection.
    #[must_use]
    pub fn accepted(&self) -> bool {
        match (self.return_code, self.reason_code) {
            (Some(code), _) => code == ConnectReturnCode::Accepted,
            (None, Some(code)) => code.is_success(),
            (None, None) => false,
        }
    }

    /// Returns true if the broker refused the connection because of the
    /// protocol version.
    #[must_use]
    pub fn is_version_refusal(&self) -> bool {
        self.return_code == Some(ConnectReturnCode::RefusedProtocolVersion)
            || self.reason_code == Some(ReasonCode::UnsupportedProtocolVersion)
    }

    /// Get the raw refusal byte, zero when accepted.
    #[must_use]
    pub fn error_code(&self) -> u8 {
        match (self.return_code, self.reason_code) {
            (Some(code), _) => code as u8,
            (None, Some(code)) => code as u8,
            (None, None) => 0,
        }
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

impl EncodePacket for ConnectAckPacket {
    fn encode<V: ProtocolVersion>(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        let old_len = buf.len();
        let mut remaining_length = 1 + 1;
        if V::HAS_PROPERTIES {
            remaining_length += self.properties.bytes()?;
        }
        let fixed_header = FixedHeader::new(PacketType::ConnectAck, remaining_length)
            .map_err(|_| EncodeError::InvalidVarInt)?;
        fixed_header.encode(buf)?;

        buf.push(u8::from(self.session_present));
        if V::HAS_REASON_CODE {
            let reason_code = self.reason_code.unwrap_or_default();
            reason_code.encode(buf)?;
            self.properties.encode(buf)?;
        } else {
            let return_code = self.return_code.unwrap_or_default();
            return_code.encode(buf)?;
        }

        Ok(buf.len() - old_len)
    }
}

impl DecodePacket for ConnectAckPacket {
    fn decode<V: ProtocolVersion>(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let fixed_header = FixedHeader::decode(ba)?;
        if fixed_header.packet_type() != PacketType::ConnectAck {
            return Err(DecodeError::InvalidPacketType);
        }

        let ack_flags = ba.read_byte()?;
        // Bits 7-1 of the Connect Acknowledge Flags are reserved and MUST be
        // set to 0 [MQTT-3.2.2-1].
        if ack_flags & 0b1111_1110 != 0 {
            return Err(DecodeError::InvalidPacketFlags);
        }
        let session_present = ack_flags & 0b0000_0001 == 0b0000_0001;

        let mut packet = Self::new(session_present);
        if V::HAS_REASON_CODE {
            let reason_code = ReasonCode::decode_for(ba, PacketType::ConnectAck)?;
            packet.set_reason_code(reason_code);
            let properties = Properties::decode(ba)?;
            if let Err(property_type) =
                check_property_type_list(properties.props(), CONNECT_ACK_PROPERTIES)
            {
                log::error!("connect_ack: Forbidden property {property_type:?} in CONNACK");
                return Err(DecodeError::ForbiddenProperty);
            }
            packet.properties = properties;
        } else {
            let return_code = ConnectReturnCode::decode(ba)?;
            packet.set_return_code(return_code);
        }

        Ok(packet)
    }
}

// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use crate::base::{DecodeData, EncodeData};
use crate::property::check_property_type_list;
use crate::{
    ByteArray, DecodeError, DecodePacket, EncodeError, EncodePacket, FixedHeader, PacketType,
    Properties, PropertyType, ProtocolVersion, ReasonCode,
};

/// Properties available in AUTH packets.
pub const AUTH_PROPERTIES: &[PropertyType] = &[
    PropertyType::AuthenticationMethod,
    PropertyType::AuthenticationData,
    PropertyType::ReasonString,
    PropertyType::UserProperty,
];

/// An AUTH packet is sent from Client to Server or Server to Client as part
/// of an extended authentication exchange. MQTT 5.0 only.
///
/// It is a Protocol Error for either side to send an AUTH packet unless the
/// CONNECT packet contained an Authentication Method [MQTT-3.15.0-1].
#[allow(clippy::module_name_repetitions)]
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AuthPacket {
    reason_code: ReasonCode,
    properties: Properties,
}

impl AuthPacket {
    /// Create a new AUTH packet with reason Success.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
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

impl EncodePacket for AuthPacket {
    fn encode<V: ProtocolVersion>(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        if !V::HAS_PROPERTIES {
            return Err(EncodeError::UnsupportedVersion);
        }
        let old_len = buf.len();
        let mut remaining_length = 0;
        let verbose = self.reason_code != ReasonCode::Success || !self.properties.is_empty();
        if verbose {
            remaining_length += ReasonCode::bytes() + self.properties.bytes()?;
        }
        let fixed_header = FixedHeader::new(PacketType::Auth, remaining_length)
            .map_err(|_| EncodeError::InvalidVarInt)?;
        fixed_header.encode(buf)?;
        if verbose {
            self.reason_code.encode(buf)?;
            self.properties.encode(buf)?;
        }
        Ok(buf.len() - old_len)
    }
}

impl DecodePacket for AuthPacket {
    fn decode<V: ProtocolVersion>(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let fixed_header = FixedHeader::decode(ba)?;
        if fixed_header.packet_type() != PacketType::Auth {
            return Err(DecodeError::InvalidPacketType);
        }
        // The AUTH packet does not exist in MQTT 3.1.1.
        if !V::HAS_PROPERTIES {
            return Err(DecodeError::InvalidPacketType);
        }

        let mut packet = Self::new();
        if fixed_header.remaining_length() > 0 {
            packet.reason_code = ReasonCode::decode_for(ba, PacketType::Auth)?;
            let properties = Properties::decode(ba)?;
            if let Err(property_type) =
                check_property_type_list(properties.props(), AUTH_PROPERTIES)
            {
                log::error!("auth: Forbidden property {property_type:?} in AUTH");
                return Err(DecodeError::ForbiddenProperty);
            }
            packet.properties = properties;
        }

        Ok(packet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BinaryData, Property, StringData, V311, V5};

    #[test]
    fn test_round_trip_challenge() {
        let mut packet = AuthPacket::new();
        packet.set_reason_code(ReasonCode::ContinueAuthentication);
        packet
            .properties_mut()
            .push(Property::AuthenticationMethod(
                StringData::from("SCRAM-SHA-1").unwrap(),
            ))
            .push(Property::AuthenticationData(
                BinaryData::from_slice(b"nonce").unwrap(),
            ));
        let mut buf = Vec::new();
        packet.encode::<V5>(&mut buf).unwrap();

        let mut ba = ByteArray::new(&buf);
        let decoded = AuthPacket::decode::<V5>(&mut ba).unwrap();
        assert_eq!(decoded, packet);
        assert_eq!(
            decoded.properties().authentication_method(),
            Some("SCRAM-SHA-1")
        );
    }

    #[test]
    fn test_rejected_in_v311() {
        let packet = AuthPacket::new();
        let mut buf = Vec::new();
        assert_eq!(
            packet.encode::<V311>(&mut buf),
            Err(EncodeError::UnsupportedVersion)
        );

        let buf = [0xf0, 0x00];
        let mut ba = ByteArray::new(&buf);
        assert_eq!(
            AuthPacket::decode::<V311>(&mut ba),
            Err(DecodeError::InvalidPacketType)
        );
    }
}

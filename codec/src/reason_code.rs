// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Return codes and reason codes.
//!
//! MQTT 3.1.1 uses a six value CONNACK return code and a four value SUBACK
//! code. MQTT 5.0 uses one open enumeration shared by all acknowledgement
//! packets; each packet type permits a subset of the values.

use std::convert::TryFrom;

use crate::base::{DecodeData, EncodeData};
use crate::{ByteArray, DecodeError, EncodeError, PacketType, QoS};

/// CONNACK return code, MQTT 3.1.1.
#[repr(u8)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectReturnCode {
    /// Connection accepted.
    #[default]
    Accepted = 0,

    /// The Server does not support the level of the MQTT protocol requested
    /// by the Client.
    RefusedProtocolVersion = 1,

    /// The Client identifier is correct UTF-8 but not allowed by the Server.
    RefusedIdentifierRejected = 2,

    /// The Network Connection has been made but the MQTT service is
    /// unavailable.
    ServerUnavailable = 3,

    /// The data in the user name or password is malformed.
    BadUserNameOrPassword = 4,

    /// The Client is not authorized to connect.
    NotAuthorized = 5,
}

impl ConnectReturnCode {
    /// Get byte length used in packet.
    #[must_use]
    pub const fn bytes() -> usize {
        1
    }
}

impl TryFrom<u8> for ConnectReturnCode {
    type Error = DecodeError;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(Self::Accepted),
            1 => Ok(Self::RefusedProtocolVersion),
            2 => Ok(Self::RefusedIdentifierRejected),
            3 => Ok(Self::ServerUnavailable),
            4 => Ok(Self::BadUserNameOrPassword),
            5 => Ok(Self::NotAuthorized),
            _ => Err(DecodeError::InvalidReasonCode),
        }
    }
}

impl DecodeData for ConnectReturnCode {
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        Self::try_from(ba.read_byte()?)
    }
}

impl EncodeData for ConnectReturnCode {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        buf.push(*self as u8);
        Ok(Self::bytes())
    }
}

/// Reason code, MQTT 5.0.
///
/// A Reason Code is a one byte unsigned value that indicates the result of
/// an operation. Reason Codes less than 0x80 indicate successful completion
/// of an operation.
#[repr(u8)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReasonCode {
    /// Success / Normal disconnection / Granted QoS 0.
    #[default]
    Success = 0x00,

    /// Granted QoS 1, SUBACK.
    GrantedQoS1 = 0x01,

    /// Granted QoS 2, SUBACK.
    GrantedQoS2 = 0x02,

    /// Disconnect with Will Message, DISCONNECT.
    DisconnectWithWillMessage = 0x04,

    /// No matching subscribers, PUBACK and PUBREC.
    NoMatchingSubscribers = 0x10,

    /// No subscription existed, UNSUBACK.
    NoSubscriptionExisted = 0x11,

    /// Continue authentication, AUTH.
    ContinueAuthentication = 0x18,

    /// Re-authenticate, AUTH.
    ReAuthenticate = 0x19,

    /// Unspecified error.
    UnspecifiedError = 0x80,

    /// Malformed packet.
    MalformedPacket = 0x81,

    /// Protocol error.
    ProtocolError = 0x82,

    /// Implementation specific error.
    ImplementationSpecificError = 0x83,

    /// Unsupported protocol version, CONNACK.
    UnsupportedProtocolVersion = 0x84,

    /// Client identifier not valid, CONNACK.
    ClientIdentifierNotValid = 0x85,

    /// Bad user name or password, CONNACK.
    BadUserNameOrPassword = 0x86,

    /// Not authorized.
    NotAuthorized = 0x87,

    /// Server unavailable, CONNACK.
    ServerUnavailable = 0x88,

    /// Server busy.
    ServerBusy = 0x89,

    /// Banned, CONNACK.
    Banned = 0x8a,

    /// Server shutting down, DISCONNECT.
    ServerShuttingDown = 0x8b,

    /// Bad authentication method.
    BadAuthenticationMethod = 0x8c,

    /// Keep alive timeout, DISCONNECT.
    KeepAliveTimeout = 0x8d,

    /// Session taken over, DISCONNECT.
    SessionTakenOver = 0x8e,

    /// Topic filter invalid.
    TopicFilterInvalid = 0x8f,

    /// Topic name invalid.
    TopicNameInvalid = 0x90,

    /// Packet identifier in use.
    PacketIdentifierInUse = 0x91,

    /// Packet identifier not found, PUBREL and PUBCOMP.
    PacketIdentifierNotFound = 0x92,

    /// Receive maximum exceeded, DISCONNECT.
    ReceiveMaximumExceeded = 0x93,

    /// Topic alias invalid, DISCONNECT.
    TopicAliasInvalid = 0x94,

    /// Packet too large.
    PacketTooLarge = 0x95,

    /// Message rate too high, DISCONNECT.
    MessageRateTooHigh = 0x96,

    /// Quota exceeded.
    QuotaExceeded = 0x97,

    /// Administrative action, DISCONNECT.
    AdministrativeAction = 0x98,

    /// Payload format invalid.
    PayloadFormatInvalid = 0x99,

    /// Retain not supported.
    RetainNotSupported = 0x9a,

    /// QoS not supported.
    QoSNotSupported = 0x9b,

    /// Use another server.
    UseAnotherServer = 0x9c,

    /// Server moved.
    ServerMoved = 0x9d,

    /// Shared subscriptions not supported, SUBACK and DISCONNECT.
    SharedSubscriptionsNotSupported = 0x9e,

    /// Connection rate exceeded.
    ConnectionRateExceeded = 0x9f,

    /// Maximum connect time, DISCONNECT.
    MaximumConnectTime = 0xa0,

    /// Subscription identifiers not supported, SUBACK and DISCONNECT.
    SubscriptionIdentifiersNotSupported = 0xa1,

    /// Wildcard subscriptions not supported, SUBACK and DISCONNECT.
    WildcardSubscriptionsNotSupported = 0xa2,
}

/// Reason codes permitted in CONNACK packets.
pub const CONNACK_REASON_CODES: &[ReasonCode] = &[
    ReasonCode::Success,
    ReasonCode::UnspecifiedError,
    ReasonCode::MalformedPacket,
    ReasonCode::ProtocolError,
    ReasonCode::ImplementationSpecificError,
    ReasonCode::UnsupportedProtocolVersion,
    ReasonCode::ClientIdentifierNotValid,
    ReasonCode::BadUserNameOrPassword,
    ReasonCode::NotAuthorized,
    ReasonCode::ServerUnavailable,
    ReasonCode::ServerBusy,
    ReasonCode::Banned,
    ReasonCode::BadAuthenticationMethod,
    ReasonCode::TopicNameInvalid,
    ReasonCode::PacketTooLarge,
    ReasonCode::QuotaExceeded,
    ReasonCode::PayloadFormatInvalid,
    ReasonCode::RetainNotSupported,
    ReasonCode::QoSNotSupported,
    ReasonCode::UseAnotherServer,
    ReasonCode::ServerMoved,
    ReasonCode::ConnectionRateExceeded,
];

/// Reason codes permitted in PUBACK and PUBREC packets.
pub const PUBLISH_ACK_REASON_CODES: &[ReasonCode] = &[
    ReasonCode::Success,
    ReasonCode::NoMatchingSubscribers,
    ReasonCode::UnspecifiedError,
    ReasonCode::ImplementationSpecificError,
    ReasonCode::NotAuthorized,
    ReasonCode::TopicNameInvalid,
    ReasonCode::PacketIdentifierInUse,
    ReasonCode::QuotaExceeded,
    ReasonCode::PayloadFormatInvalid,
];

/// Reason codes permitted in PUBREL and PUBCOMP packets.
pub const PUBLISH_RELEASE_REASON_CODES: &[ReasonCode] =
    &[ReasonCode::Success, ReasonCode::PacketIdentifierNotFound];

/// Reason codes permitted in SUBACK packets.
pub const SUBSCRIBE_ACK_REASON_CODES: &[ReasonCode] = &[
    ReasonCode::Success,
    ReasonCode::GrantedQoS1,
    ReasonCode::GrantedQoS2,
    ReasonCode::UnspecifiedError,
    ReasonCode::ImplementationSpecificError,
    ReasonCode::NotAuthorized,
    ReasonCode::TopicFilterInvalid,
    ReasonCode::PacketIdentifierInUse,
    ReasonCode::QuotaExceeded,
    ReasonCode::SharedSubscriptionsNotSupported,
    ReasonCode::SubscriptionIdentifiersNotSupported,
    ReasonCode::WildcardSubscriptionsNotSupported,
];

/// Reason codes permitted in UNSUBACK packets.
pub const UNSUBSCRIBE_ACK_REASON_CODES: &[ReasonCode] = &[
    ReasonCode::Success,
    ReasonCode::NoSubscriptionExisted,
    ReasonCode::UnspecifiedError,
    ReasonCode::ImplementationSpecificError,
    ReasonCode::NotAuthorized,
    ReasonCode::TopicFilterInvalid,
    ReasonCode::PacketIdentifierInUse,
];

/// Reason codes permitted in DISCONNECT packets.
pub const DISCONNECT_REASON_CODES: &[ReasonCode] = &[
    ReasonCode::Success,
    ReasonCode::DisconnectWithWillMessage,
    ReasonCode::UnspecifiedError,
    ReasonCode::MalformedPacket,
    ReasonCode::ProtocolError,
    ReasonCode::ImplementationSpecificError,
    ReasonCode::NotAuthorized,
    ReasonCode::ServerBusy,
    ReasonCode::ServerShuttingDown,
    ReasonCode::KeepAliveTimeout,
    ReasonCode::SessionTakenOver,
    ReasonCode::TopicFilterInvalid,
    ReasonCode::TopicNameInvalid,
    ReasonCode::ReceiveMaximumExceeded,
    ReasonCode::TopicAliasInvalid,
    ReasonCode::PacketTooLarge,
    ReasonCode::MessageRateTooHigh,
    ReasonCode::QuotaExceeded,
    ReasonCode::AdministrativeAction,
    ReasonCode::PayloadFormatInvalid,
    ReasonCode::RetainNotSupported,
    ReasonCode::QoSNotSupported,
    ReasonCode::UseAnotherServer,
    ReasonCode::ServerMoved,
    ReasonCode::SharedSubscriptionsNotSupported,
    ReasonCode::ConnectionRateExceeded,
    ReasonCode::MaximumConnectTime,
    ReasonCode::SubscriptionIdentifiersNotSupported,
    ReasonCode::WildcardSubscriptionsNotSupported,
];

/// Reason codes permitted in AUTH packets.
pub const AUTH_REASON_CODES: &[ReasonCode] = &[
    ReasonCode::Success,
    ReasonCode::ContinueAuthentication,
    ReasonCode::ReAuthenticate,
];

impl ReasonCode {
    /// Get byte length used in packet.
    #[must_use]
    pub const fn bytes() -> usize {
        1
    }

    /// Returns true if this code indicates success.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        (*self as u8) < 0x80
    }

    /// Decode one reason code byte, validating it against the set permitted
    /// for `packet_type`.
    ///
    /// Bytes not defined by MQTT 5.0 at all decode as `UnspecifiedError`;
    /// defined bytes which are not permitted in this packet type are a
    /// protocol violation.
    ///
    /// # Errors
    ///
    /// Returns error if the byte is defined but forbidden here.
    pub fn decode_for(ba: &mut ByteArray, packet_type: PacketType) -> Result<Self, DecodeError> {
        let byte = ba.read_byte()?;
        let Ok(code) = Self::try_from(byte) else {
            log::warn!("reason_code: Unknown reason code {byte:#04x} in {packet_type}");
            return Ok(Self::UnspecifiedError);
        };
        let permitted = match packet_type {
            PacketType::ConnectAck => CONNACK_REASON_CODES,
            PacketType::PublishAck | PacketType::PublishReceived => PUBLISH_ACK_REASON_CODES,
            PacketType::PublishRelease | PacketType::PublishComplete => {
                PUBLISH_RELEASE_REASON_CODES
            }
            PacketType::SubscribeAck => SUBSCRIBE_ACK_REASON_CODES,
            PacketType::UnsubscribeAck => UNSUBSCRIBE_ACK_REASON_CODES,
            PacketType::Disconnect => DISCONNECT_REASON_CODES,
            PacketType::Auth => AUTH_REASON_CODES,
            _ => return Err(DecodeError::InvalidReasonCode),
        };
        if permitted.contains(&code) {
            Ok(code)
        } else {
            log::error!("reason_code: Code {byte:#04x} is not permitted in {packet_type}");
            Err(DecodeError::InvalidReasonCode)
        }
    }
}

impl TryFrom<u8> for ReasonCode {
    type Error = DecodeError;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0x00 => Ok(Self::Success),
            0x01 => Ok(Self::GrantedQoS1),
            0x02 => Ok(Self::GrantedQoS2),
            0x04 => Ok(Self::DisconnectWithWillMessage),
            0x10 => Ok(Self::NoMatchingSubscribers),
            0x11 => Ok(Self::NoSubscriptionExisted),
            0x18 => Ok(Self::ContinueAuthentication),
            0x19 => Ok(Self::ReAuthenticate),
            0x80 => Ok(Self::UnspecifiedError),
            0x81 => Ok(Self::MalformedPacket),
            0x82 => Ok(Self::ProtocolError),
            0x83 => Ok(Self::ImplementationSpecificError),
            0x84 => Ok(Self::UnsupportedProtocolVersion),
            0x85 => Ok(Self::ClientIdentifierNotValid),
            0x86 => Ok(Self::BadUserNameOrPassword),
            0x87 => Ok(Self::NotAuthorized),
            0x88 => Ok(Self::ServerUnavailable),
            0x89 => Ok(Self::ServerBusy),
            0x8a => Ok(Self::Banned),
            0x8b => Ok(Self::ServerShuttingDown),
            0x8c => Ok(Self::BadAuthenticationMethod),
            0x8d => Ok(Self::KeepAliveTimeout),
            0x8e => Ok(Self::SessionTakenOver),
            0x8f => Ok(Self::TopicFilterInvalid),
            0x90 => Ok(Self::TopicNameInvalid),
            0x91 => Ok(Self::PacketIdentifierInUse),
            0x92 => Ok(Self::PacketIdentifierNotFound),
            0x93 => Ok(Self::ReceiveMaximumExceeded),
            0x94 => Ok(Self::TopicAliasInvalid),
            0x95 => Ok(Self::PacketTooLarge),
            0x96 => Ok(Self::MessageRateTooHigh),
            0x97 => Ok(Self::QuotaExceeded),
            0x98 => Ok(Self::AdministrativeAction),
            0x99 => Ok(Self::PayloadFormatInvalid),
            0x9a => Ok(Self::RetainNotSupported),
            0x9b => Ok(Self::QoSNotSupported),
            0x9c => Ok(Self::UseAnotherServer),
            0x9d => Ok(Self::ServerMoved),
            0x9e => Ok(Self::SharedSubscriptionsNotSupported),
            0x9f => Ok(Self::ConnectionRateExceeded),
            0xa0 => Ok(Self::MaximumConnectTime),
            0xa1 => Ok(Self::SubscriptionIdentifiersNotSupported),
            0xa2 => Ok(Self::WildcardSubscriptionsNotSupported),
            _ => Err(DecodeError::InvalidReasonCode),
        }
    }
}

impl EncodeData for ReasonCode {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        buf.push(*self as u8);
        Ok(Self::bytes())
    }
}

/// Per-filter result in a SUBACK packet.
///
/// In MQTT 3.1.1 the allowed return codes are the granted QoS values and
/// 0x80 for failure [MQTT-3.9.3-2].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeAck {
    /// Subscription accepted with granted QoS.
    GrantedQoS(QoS),

    /// Subscription rejected with a reason code byte.
    Failed(u8),
}

impl SubscribeAck {
    /// Get byte length used in packet.
    #[must_use]
    pub const fn bytes() -> usize {
        1
    }

    /// Returns true if the subscription was accepted.
    #[must_use]
    pub const fn is_granted(&self) -> bool {
        matches!(self, Self::GrantedQoS(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_return_code() {
        assert_eq!(
            ConnectReturnCode::try_from(0).unwrap(),
            ConnectReturnCode::Accepted
        );
        assert_eq!(
            ConnectReturnCode::try_from(5).unwrap(),
            ConnectReturnCode::NotAuthorized
        );
        assert!(ConnectReturnCode::try_from(6).is_err());
    }

    #[test]
    fn test_unknown_reason_code_maps_to_unspecified() {
        let buf = [0x7c];
        let mut ba = ByteArray::new(&buf);
        let code = ReasonCode::decode_for(&mut ba, PacketType::ConnectAck).unwrap();
        assert_eq!(code, ReasonCode::UnspecifiedError);
    }

    #[test]
    fn test_forbidden_reason_code() {
        // GrantedQoS1 is a SUBACK code, not permitted in PUBACK.
        let buf = [0x01];
        let mut ba = ByteArray::new(&buf);
        assert_eq!(
            ReasonCode::decode_for(&mut ba, PacketType::PublishAck),
            Err(DecodeError::InvalidReasonCode)
        );
    }
}

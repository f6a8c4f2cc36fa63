// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Packet codec for MQTT 3.1.1 and MQTT 5.0.
//!
//! The protocol version is a type level parameter of every packet encode and
//! decode call, so both wire versions share one codec skeleton per packet
//! type. See [`ProtocolVersion`], [`V311`] and [`V5`].

mod auth_packet;
pub mod base;
mod binary_data;
mod bool_data;
mod byte_array;
mod connect_ack_packet;
mod connect_packet;
mod disconnect_packet;
mod error;
mod header;
mod mqtt_packet;
mod ping_request_packet;
mod ping_response_packet;
mod property;
mod protocol_level;
mod publish_ack_packet;
mod publish_complete_packet;
mod publish_packet;
mod publish_received_packet;
mod publish_release_packet;
mod reason_code;
mod string_data;
mod string_pair_data;
mod subscribe_ack_packet;
mod subscribe_packet;
pub mod topic;
mod u16_data;
mod u32_data;
mod unsubscribe_ack_packet;
mod unsubscribe_packet;
pub mod utils;
mod var_int;

pub use auth_packet::{AuthPacket, AUTH_PROPERTIES};
pub use base::{DecodeData, DecodePacket, EncodeData, EncodePacket, PacketId, QoS};
pub use binary_data::BinaryData;
pub use bool_data::BoolData;
pub use byte_array::ByteArray;
pub use connect_ack_packet::{ConnectAckPacket, CONNECT_ACK_PROPERTIES};
pub use connect_packet::{ConnectPacket, Will, CONNECT_PROPERTIES, WILL_PROPERTIES};
pub use disconnect_packet::{DisconnectPacket, DISCONNECT_PROPERTIES};
pub use error::{DecodeError, EncodeError};
pub use header::{FixedHeader, PacketType};
pub use mqtt_packet::MqttPacket;
pub use ping_request_packet::PingRequestPacket;
pub use ping_response_packet::PingResponsePacket;
pub use property::{
    check_property_type_list, Properties, Property, PropertyType, MULTIPLE_PROPERTIES,
};
pub use protocol_level::{ProtocolLevel, ProtocolVersion, V311, V5, PROTOCOL_NAME};
pub use publish_ack_packet::{PublishAckPacket, ACK_PROPERTIES};
pub use publish_complete_packet::PublishCompletePacket;
pub use publish_packet::{PublishPacket, PUBLISH_PROPERTIES};
pub use publish_received_packet::PublishReceivedPacket;
pub use publish_release_packet::PublishReleasePacket;
pub use reason_code::{
    ConnectReturnCode, ReasonCode, SubscribeAck, AUTH_REASON_CODES, CONNACK_REASON_CODES,
    DISCONNECT_REASON_CODES, PUBLISH_ACK_REASON_CODES, PUBLISH_RELEASE_REASON_CODES,
    SUBSCRIBE_ACK_REASON_CODES, UNSUBSCRIBE_ACK_REASON_CODES,
};
pub use string_data::StringData;
pub use string_pair_data::StringPairData;
pub use subscribe_ack_packet::SubscribeAckPacket;
pub use subscribe_packet::{RetainHandling, SubscribePacket, SubscribeTopic, SUBSCRIBE_PROPERTIES};
pub use topic::{PubTopic, SubTopic, TopicError};
pub use u16_data::U16Data;
pub use u32_data::U32Data;
pub use unsubscribe_ack_packet::UnsubscribeAckPacket;
pub use unsubscribe_packet::{UnsubscribePacket, UNSUBSCRIBE_PROPERTIES};
pub use var_int::{VarInt, VarIntError, MAX_VAR_INT};

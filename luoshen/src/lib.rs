// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! MQTT client library for Rust.
//!
//! Luoshen speaks MQTT 3.1.1 and MQTT 5.0 over TCP, TLS, WebSocket and
//! secure WebSocket. The engine is a single-threaded tick reactor: commands
//! are submitted from any thread and settle through one-shot completion
//! handles, events fan out through multicast delegates.
//!
//! ```no_run
//! use luoshen::{Client, ConnectOptions, Message, QoS};
//!
//! let options = ConnectOptions::new("test.mosquitto.org", 1883).unwrap();
//! let client = Client::new(options);
//! client.start();
//!
//! client.connect(true).wait().unwrap();
//! let msg = Message::new("luoshen/hello", QoS::AtLeastOnce, b"hi").unwrap();
//! client.publish(msg).wait().unwrap();
//! client.disconnect().wait().unwrap();
//! ```

pub mod client;
pub mod commands;
pub mod completion;
pub mod connect_options;
pub mod credentials;
pub mod delegate;
pub mod error;
pub mod events;
pub mod inflight;
pub mod message;
pub mod metrics;
mod reactor;
pub mod router;
mod session;
pub mod socket;
pub mod stream;
pub mod timer;

pub use client::Client;
pub use codec::{ProtocolLevel, QoS, RetainHandling, Will};
pub use completion::CompletionHandle;
pub use connect_options::{
    CallbackExecutor, ConnectOptions, ConnectOptionsBuilder, ConnectType, MqttConnect,
    MqttsConnect, SelfSignedTls, SslVerifyCallback, TlsType, WsConnect, WssConnect,
};
pub use credentials::{AnonymousCredentials, Credentials, CredentialsProvider, StaticCredentials};
pub use delegate::{DelegateHandle, Multicast};
pub use error::{Error, ErrorKind};
pub use events::{
    ConnectEvent, DisconnectEvent, PublishAckEvent, SubscribeAckEvent, UnsubscribeAckEvent,
};
pub use message::{Message, SubscribeResult, TopicFilter, UnsubscribeResult};
pub use metrics::MetricsSnapshot;
pub use session::SessionPhase;
pub use socket::{NetTransport, Transport, TransportEvent};

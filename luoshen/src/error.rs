// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::fmt::{self, Display};
use std::io;

/// Represent the types of errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Connection options violate an invariant.
    ConfigInvalid,

    /// The peer refused the transport connection.
    TransportRefused,

    /// The transport connection was lost.
    TransportDropped,

    /// TLS handshake did not complete.
    TlsHandshakeFailed,

    /// Codec or state machine fault in strict mode.
    ProtocolViolation,

    /// Inbound packet violates wire format rules.
    MalformedPacket,

    /// No CONNACK arrived within the handshake timeout.
    HandshakeTimedOut,

    /// No PINGRESP arrived within 1.5 keep alive intervals.
    KeepAliveLost,

    /// The broker refused the MQTT connection with this code.
    BrokerRefused(u8),

    /// The broker rejected a subscription with this code.
    SubscriptionFailed(u8),

    /// An acknowledgeable packet ran out of retransmission attempts.
    RetriesExhausted,

    /// The outbound byte queue would exceed its cap.
    BackpressureExceeded,

    /// The command queue is full.
    QueueFull,

    /// All 65535 packet identifiers are bound to live entries.
    IdentifiersExhausted,

    /// The session ended while the command was outstanding.
    SessionLost,

    /// The command was dropped before it settled.
    Cancelled,

    /// Operation is not valid in the current connection state.
    InvalidState,

    /// Error occurred while performing I/O.
    IoError,

    /// Socket stream error.
    SocketError,

    /// Cert files error.
    CertError,

    /// Packet encode error.
    EncodeError,

    /// Packet decode error.
    DecodeError,
}

#[derive(Debug, Clone)]
pub struct Error {
    /// Type of current error.
    kind: ErrorKind,

    /// Detail message about this error.
    message: String,
}

impl Error {
    #[must_use]
    pub fn new(kind: ErrorKind, message: &str) -> Self {
        Self {
            kind,
            message: message.to_owned(),
        }
    }

    #[must_use]
    pub const fn from_string(kind: ErrorKind, message: String) -> Self {
        Self { kind, message }
    }

    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for Error {}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: String::new(),
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Self::from_string(ErrorKind::IoError, format!("IoError {err}"))
    }
}

impl From<tungstenite::Error> for Error {
    fn from(err: tungstenite::Error) -> Self {
        Self::from_string(ErrorKind::SocketError, format!("Websocket error: {err}"))
    }
}

impl From<rustls::Error> for Error {
    fn from(err: rustls::Error) -> Self {
        Self::from_string(ErrorKind::TlsHandshakeFailed, format!("Tls error: {err}"))
    }
}

impl From<codec::EncodeError> for Error {
    fn from(err: codec::EncodeError) -> Self {
        Self::from_string(ErrorKind::EncodeError, format!("{err:?}"))
    }
}

impl From<codec::DecodeError> for Error {
    fn from(err: codec::DecodeError) -> Self {
        Self::from_string(ErrorKind::DecodeError, format!("{err:?}"))
    }
}

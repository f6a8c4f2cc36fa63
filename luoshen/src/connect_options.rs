// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use codec::utils::random_string;
use codec::{ProtocolLevel, Will};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::credentials::{AnonymousCredentials, CredentialsProvider};
use crate::error::{Error, ErrorKind};

/// Schedules a delegate broadcast on a caller controlled thread.
///
/// Without an executor, callbacks run inline on the reactor thread.
pub type CallbackExecutor = Arc<dyn Fn(Box<dyn FnOnce() + Send>) + Send + Sync>;

/// Per-certificate verification override.
///
/// Arguments are the result of the built-in chain verification and the DER
/// encoded end-entity certificate; the return value is the final verdict.
pub type SslVerifyCallback = Arc<dyn Fn(bool, &[u8]) -> bool + Send + Sync>;

#[derive(Clone, Debug)]
pub struct SelfSignedTls {
    /// PEM bundle with the root certificate(s) to trust.
    pub root_ca_pem: PathBuf,
}

#[derive(Clone, Debug)]
pub enum TlsType {
    /// Signed by a public root CA, like `Let's Encrypt`. Trust anchors come
    /// from the built-in webpki root set.
    CASigned,

    /// Self signed certificate chain, trust anchors come from a PEM bundle.
    SelfSigned(SelfSignedTls),
}

#[derive(Clone, Debug)]
pub struct MqttConnect {}

#[derive(Clone, Debug)]
pub struct MqttsConnect {
    pub tls_type: TlsType,
}

#[derive(Clone, Debug)]
pub struct WsConnect {
    pub path: String,
}

#[derive(Clone, Debug)]
pub struct WssConnect {
    pub tls_type: TlsType,
    pub path: String,
}

/// Transport variant used to reach the broker.
#[derive(Clone, Debug)]
pub enum ConnectType {
    Mqtt(MqttConnect),
    Mqtts(MqttsConnect),
    Ws(WsConnect),
    Wss(WssConnect),
}

impl ConnectType {
    /// Returns true for the TLS based variants.
    #[must_use]
    pub const fn is_secure(&self) -> bool {
        matches!(self, Self::Mqtts(..) | Self::Wss(..))
    }

    /// Returns the WebSocket URI path, if this is a WebSocket variant.
    #[must_use]
    pub fn ws_path(&self) -> Option<&str> {
        match self {
            Self::Ws(connect) => Some(&connect.path),
            Self::Wss(connect) => Some(&connect.path),
            _ => None,
        }
    }
}

/// Immutable connection options, constructed through
/// [`ConnectOptionsBuilder`].
#[derive(Clone)]
pub struct ConnectOptions {
    host: String,
    port: u16,
    connect_type: ConnectType,
    client_id: String,
    credentials: Arc<dyn CredentialsProvider>,
    protocol_level: ProtocolLevel,
    allow_version_fallback: bool,
    session_expiry_interval: u32,
    will: Option<Will>,

    keep_alive: Duration,
    connect_timeout: Duration,
    handshake_timeout: Duration,

    max_packet_size: usize,
    max_inbound_buffer: usize,
    max_outbound_queue: usize,

    retry_interval: Duration,
    retry_multiplier: f64,
    retry_interval_cap: Duration,
    max_packet_retries: u32,
    max_connection_retries: u32,

    auto_reconnect: bool,
    reconnect_delay: Duration,
    reconnect_delay_cap: Duration,
    reconnect_multiplier: f64,

    strict_mode: bool,
    enforce_max_packet_size: bool,
    max_inbound_packets_per_tick: usize,
    max_pending_commands: usize,
    tick_interval: Duration,

    verify_server_certificate: bool,
    ssl_verify_callback: Option<SslVerifyCallback>,
    callback_executor: Option<CallbackExecutor>,
}

impl fmt::Debug for ConnectOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectOptions")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("connect_type", &self.connect_type)
            .field("client_id", &self.client_id)
            .field("protocol_level", &self.protocol_level)
            .field("keep_alive", &self.keep_alive)
            .field("auto_reconnect", &self.auto_reconnect)
            .field("strict_mode", &self.strict_mode)
            .finish_non_exhaustive()
    }
}

impl ConnectOptions {
    /// Create options for a plain TCP connection with all defaults.
    ///
    /// # Errors
    ///
    /// Returns error if `host` or `port` is invalid.
    pub fn new(host: &str, port: u16) -> Result<Self, Error> {
        ConnectOptionsBuilder::new(host, port).build()
    }

    /// Start building options for `host` and `port`.
    #[must_use]
    pub fn builder(host: &str, port: u16) -> ConnectOptionsBuilder {
        ConnectOptionsBuilder::new(host, port)
    }

    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    #[must_use]
    pub const fn connect_type(&self) -> &ConnectType {
        &self.connect_type
    }

    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    #[must_use]
    pub fn credentials(&self) -> &Arc<dyn CredentialsProvider> {
        &self.credentials
    }

    #[must_use]
    pub const fn protocol_level(&self) -> ProtocolLevel {
        self.protocol_level
    }

    #[must_use]
    pub const fn allow_version_fallback(&self) -> bool {
        self.allow_version_fallback
    }

    #[must_use]
    pub const fn session_expiry_interval(&self) -> u32 {
        self.session_expiry_interval
    }

    #[must_use]
    pub const fn will(&self) -> Option<&Will> {
        self.will.as_ref()
    }

    #[must_use]
    pub const fn keep_alive(&self) -> Duration {
        self.keep_alive
    }

    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    #[must_use]
    pub const fn handshake_timeout(&self) -> Duration {
        self.handshake_timeout
    }

    #[must_use]
    pub const fn max_packet_size(&self) -> usize {
        self.max_packet_size
    }

    #[must_use]
    pub const fn max_inbound_buffer(&self) -> usize {
        self.max_inbound_buffer
    }

    #[must_use]
    pub const fn max_outbound_queue(&self) -> usize {
        self.max_outbound_queue
    }

    #[must_use]
    pub const fn retry_interval(&self) -> Duration {
        self.retry_interval
    }

    #[must_use]
    pub const fn retry_multiplier(&self) -> f64 {
        self.retry_multiplier
    }

    #[must_use]
    pub const fn retry_interval_cap(&self) -> Duration {
        self.retry_interval_cap
    }

    #[must_use]
    pub const fn max_packet_retries(&self) -> u32 {
        self.max_packet_retries
    }

    #[must_use]
    pub const fn max_connection_retries(&self) -> u32 {
        self.max_connection_retries
    }

    #[must_use]
    pub const fn auto_reconnect(&self) -> bool {
        self.auto_reconnect
    }

    #[must_use]
    pub const fn reconnect_delay(&self) -> Duration {
        self.reconnect_delay
    }

    #[must_use]
    pub const fn reconnect_delay_cap(&self) -> Duration {
        self.reconnect_delay_cap
    }

    #[must_use]
    pub const fn reconnect_multiplier(&self) -> f64 {
        self.reconnect_multiplier
    }

    #[must_use]
    pub const fn strict_mode(&self) -> bool {
        self.strict_mode
    }

    #[must_use]
    pub const fn enforce_max_packet_size(&self) -> bool {
        self.enforce_max_packet_size
    }

    #[must_use]
    pub const fn max_inbound_packets_per_tick(&self) -> usize {
        self.max_inbound_packets_per_tick
    }

    #[must_use]
    pub const fn max_pending_commands(&self) -> usize {
        self.max_pending_commands
    }

    #[must_use]
    pub const fn tick_interval(&self) -> Duration {
        self.tick_interval
    }

    #[must_use]
    pub const fn verify_server_certificate(&self) -> bool {
        self.verify_server_certificate
    }

    #[must_use]
    pub fn ssl_verify_callback(&self) -> Option<&SslVerifyCallback> {
        self.ssl_verify_callback.as_ref()
    }

    #[must_use]
    pub fn callback_executor(&self) -> Option<&CallbackExecutor> {
        self.callback_executor.as_ref()
    }
}

/// Builder with the documented defaults for every tuning parameter.
pub struct ConnectOptionsBuilder {
    options: ConnectOptions,
}

impl ConnectOptionsBuilder {
    #[must_use]
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            options: ConnectOptions {
                host: host.to_string(),
                port,
                connect_type: ConnectType::Mqtt(MqttConnect {}),
                client_id: String::new(),
                credentials: Arc::new(AnonymousCredentials),
                protocol_level: ProtocolLevel::V5,
                allow_version_fallback: true,
                session_expiry_interval: 0,
                will: None,

                keep_alive: Duration::from_secs(60),
                connect_timeout: Duration::from_secs(30),
                handshake_timeout: Duration::from_secs(30),

                max_packet_size: 1024 * 1024,
                max_inbound_buffer: 64 * 1024 * 1024,
                max_outbound_queue: 10 * 1024 * 1024,

                retry_interval: Duration::from_secs(5),
                retry_multiplier: 1.5,
                retry_interval_cap: Duration::from_secs(60),
                max_packet_retries: 3,
                max_connection_retries: 5,

                auto_reconnect: false,
                reconnect_delay: Duration::from_secs(1),
                reconnect_delay_cap: Duration::from_secs(60),
                reconnect_multiplier: 2.0,

                strict_mode: false,
                enforce_max_packet_size: true,
                max_inbound_packets_per_tick: 100,
                max_pending_commands: 1000,
                tick_interval: Duration::from_millis(10),

                verify_server_certificate: true,
                ssl_verify_callback: None,
                callback_executor: None,
            },
        }
    }

    #[must_use]
    pub fn connect_type(mut self, connect_type: ConnectType) -> Self {
        self.options.connect_type = connect_type;
        self
    }

    #[must_use]
    pub fn client_id(mut self, client_id: &str) -> Self {
        self.options.client_id = client_id.to_string();
        self
    }

    #[must_use]
    pub fn credentials(mut self, credentials: Arc<dyn CredentialsProvider>) -> Self {
        self.options.credentials = credentials;
        self
    }

    #[must_use]
    pub fn protocol_level(mut self, protocol_level: ProtocolLevel) -> Self {
        self.options.protocol_level = protocol_level;
        self
    }

    #[must_use]
    pub fn allow_version_fallback(mut self, allow: bool) -> Self {
        self.options.allow_version_fallback = allow;
        self
    }

    #[must_use]
    pub fn session_expiry_interval(mut self, seconds: u32) -> Self {
        self.options.session_expiry_interval = seconds;
        self
    }

    #[must_use]
    pub fn will(mut self, will: Will) -> Self {
        self.options.will = Some(will);
        self
    }

    #[must_use]
    pub fn keep_alive(mut self, keep_alive: Duration) -> Self {
        self.options.keep_alive = keep_alive;
        self
    }

    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.options.connect_timeout = timeout;
        self
    }

    #[must_use]
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.options.handshake_timeout = timeout;
        self
    }

    #[must_use]
    pub fn max_packet_size(mut self, bytes: usize) -> Self {
        self.options.max_packet_size = bytes;
        self
    }

    #[must_use]
    pub fn max_inbound_buffer(mut self, bytes: usize) -> Self {
        self.options.max_inbound_buffer = bytes;
        self
    }

    #[must_use]
    pub fn max_outbound_queue(mut self, bytes: usize) -> Self {
        self.options.max_outbound_queue = bytes;
        self
    }

    #[must_use]
    pub fn retry_interval(mut self, interval: Duration) -> Self {
        self.options.retry_interval = interval;
        self
    }

    #[must_use]
    pub fn retry_multiplier(mut self, multiplier: f64) -> Self {
        self.options.retry_multiplier = multiplier;
        self
    }

    #[must_use]
    pub fn retry_interval_cap(mut self, cap: Duration) -> Self {
        self.options.retry_interval_cap = cap;
        self
    }

    #[must_use]
    pub fn max_packet_retries(mut self, retries: u32) -> Self {
        self.options.max_packet_retries = retries;
        self
    }

    #[must_use]
    pub fn max_connection_retries(mut self, retries: u32) -> Self {
        self.options.max_connection_retries = retries;
        self
    }

    #[must_use]
    pub fn auto_reconnect(mut self, enable: bool) -> Self {
        self.options.auto_reconnect = enable;
        self
    }

    #[must_use]
    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.options.reconnect_delay = delay;
        self
    }

    #[must_use]
    pub fn reconnect_delay_cap(mut self, cap: Duration) -> Self {
        self.options.reconnect_delay_cap = cap;
        self
    }

    #[must_use]
    pub fn reconnect_multiplier(mut self, multiplier: f64) -> Self {
        self.options.reconnect_multiplier = multiplier;
        self
    }

    #[must_use]
    pub fn strict_mode(mut self, strict: bool) -> Self {
        self.options.strict_mode = strict;
        self
    }

    #[must_use]
    pub fn enforce_max_packet_size(mut self, enforce: bool) -> Self {
        self.options.enforce_max_packet_size = enforce;
        self
    }

    #[must_use]
    pub fn max_inbound_packets_per_tick(mut self, count: usize) -> Self {
        self.options.max_inbound_packets_per_tick = count;
        self
    }

    #[must_use]
    pub fn max_pending_commands(mut self, count: usize) -> Self {
        self.options.max_pending_commands = count;
        self
    }

    #[must_use]
    pub fn tick_interval(mut self, interval: Duration) -> Self {
        self.options.tick_interval = interval;
        self
    }

    #[must_use]
    pub fn verify_server_certificate(mut self, verify: bool) -> Self {
        self.options.verify_server_certificate = verify;
        self
    }

    #[must_use]
    pub fn ssl_verify_callback(mut self, callback: SslVerifyCallback) -> Self {
        self.options.ssl_verify_callback = Some(callback);
        self
    }

    #[must_use]
    pub fn callback_executor(mut self, executor: CallbackExecutor) -> Self {
        self.options.callback_executor = Some(executor);
        self
    }

    /// Validate the invariants and produce the immutable options.
    ///
    /// # Errors
    ///
    /// Returns `ConfigInvalid` if any invariant is violated.
    pub fn build(mut self) -> Result<ConnectOptions, Error> {
        let options = &mut self.options;
        if options.host.is_empty() {
            return Err(Error::new(ErrorKind::ConfigInvalid, "host must not be empty"));
        }
        if options.port == 0 {
            return Err(Error::new(ErrorKind::ConfigInvalid, "port must not be zero"));
        }
        if let Some(path) = options.connect_type.ws_path() {
            if path.is_empty() {
                return Err(Error::new(
                    ErrorKind::ConfigInvalid,
                    "websocket path must not be empty",
                ));
            }
        }
        if options.keep_alive.as_secs() > u64::from(u16::MAX) {
            return Err(Error::new(
                ErrorKind::ConfigInvalid,
                "keep alive exceeds 65535 seconds",
            ));
        }
        if options.retry_interval.is_zero()
            || options.retry_interval_cap.is_zero()
            || options.reconnect_delay.is_zero()
            || options.reconnect_delay_cap.is_zero()
            || options.connect_timeout.is_zero()
            || options.handshake_timeout.is_zero()
        {
            return Err(Error::new(
                ErrorKind::ConfigInvalid,
                "retry intervals and timeouts must be positive",
            ));
        }
        if options.retry_multiplier < 1.0 || options.reconnect_multiplier < 1.0 {
            return Err(Error::new(
                ErrorKind::ConfigInvalid,
                "backoff multipliers must be >= 1.0",
            ));
        }
        if options.max_outbound_queue < options.max_packet_size {
            return Err(Error::new(
                ErrorKind::ConfigInvalid,
                "max outbound queue must hold at least one max sized packet",
            ));
        }
        if options.max_inbound_packets_per_tick == 0 || options.max_pending_commands == 0 {
            return Err(Error::new(
                ErrorKind::ConfigInvalid,
                "per-tick and pending-command bounds must be positive",
            ));
        }
        if options.client_id.is_empty() {
            options.client_id = format!("luoshen-{}", random_string(8));
        }
        Ok(self.options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = ConnectOptions::new("localhost", 1883).unwrap();
        assert_eq!(options.port(), 1883);
        assert_eq!(options.max_packet_size(), 1024 * 1024);
        assert_eq!(options.keep_alive(), Duration::from_secs(60));
        assert!(options.client_id().starts_with("luoshen-"));
        assert!(!options.auto_reconnect());
        assert!(options.verify_server_certificate());
    }

    #[test]
    fn test_invalid_port() {
        let err = ConnectOptions::new("localhost", 0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigInvalid);
    }

    #[test]
    fn test_ws_requires_path() {
        let err = ConnectOptions::builder("localhost", 8080)
            .connect_type(ConnectType::Ws(WsConnect {
                path: String::new(),
            }))
            .build()
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigInvalid);
    }

    #[test]
    fn test_queue_must_hold_one_packet() {
        let err = ConnectOptions::builder("localhost", 1883)
            .max_packet_size(1024)
            .max_outbound_queue(512)
            .build()
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigInvalid);
    }

    #[test]
    fn test_multiplier_below_one_rejected() {
        let err = ConnectOptions::builder("localhost", 1883)
            .retry_multiplier(0.5)
            .build()
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigInvalid);
    }
}

// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Non-blocking byte streams over TCP, TLS, WebSocket and secure WebSocket.
//!
//! The TCP connect itself is bounded by the configured connect timeout;
//! every later operation is non-blocking. TLS and WebSocket handshakes are
//! driven incrementally by [`Stream::poll_handshake`] until they report
//! completion.

use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::SystemTime;

use rustls::client::{ServerCertVerified, ServerCertVerifier, WebPkiVerifier};
use rustls::{Certificate, ClientConfig, ClientConnection, OwnedTrustAnchor, RootCertStore};
use tungstenite::handshake::client::ClientHandshake;
use tungstenite::handshake::{HandshakeError, MidHandshake};
use tungstenite::protocol::WebSocket;
use tungstenite::Message;

use crate::connect_options::{ConnectOptions, ConnectType, SslVerifyCallback, TlsType};
use crate::error::{Error, ErrorKind};

type TlsStream = rustls::StreamOwned<ClientConnection, TcpStream>;

/// Result of one non-blocking read attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadResult {
    /// Bytes were appended to the buffer.
    Data(usize),

    /// Nothing available right now.
    WouldBlock,

    /// The peer closed the stream.
    Closed,
}

enum StreamState {
    /// TLS handshake in progress; `ws_url` is set when a WebSocket
    /// handshake follows on top.
    TlsHandshake {
        tls: Box<TlsStream>,
        ws_url: Option<String>,
    },

    /// WebSocket upgrade over plain TCP in progress.
    WsHandshake(Option<MidHandshake<ClientHandshake<TcpStream>>>),

    /// WebSocket upgrade over TLS in progress.
    WssHandshake(Option<MidHandshake<ClientHandshake<TlsStream>>>),

    Tcp(TcpStream),
    Tls(Box<TlsStream>),
    Ws(Box<WebSocket<TcpStream>>),
    Wss(Box<WebSocket<TlsStream>>),
    Closed,
}

impl std::fmt::Debug for StreamState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::TlsHandshake { .. } => "TlsHandshake",
            Self::WsHandshake(..) => "WsHandshake",
            Self::WssHandshake(..) => "WssHandshake",
            Self::Tcp(..) => "Tcp",
            Self::Tls(..) => "Tls",
            Self::Ws(..) => "Ws",
            Self::Wss(..) => "Wss",
            Self::Closed => "Closed",
        };
        f.write_str(name)
    }
}

/// One broker connection at the byte level.
#[derive(Debug)]
pub struct Stream {
    state: StreamState,
}

impl Stream {
    /// Open the TCP connection and set up the handshake pipeline required
    /// by the configured transport variant.
    ///
    /// # Errors
    ///
    /// Returns error if the address does not resolve, the TCP connect fails
    /// or times out, or TLS configuration is invalid.
    pub fn connect(options: &ConnectOptions) -> Result<Self, Error> {
        let address = (options.host(), options.port())
            .to_socket_addrs()
            .map_err(|err| {
                Error::from_string(
                    ErrorKind::TransportRefused,
                    format!("Failed to resolve {}:{}: {err}", options.host(), options.port()),
                )
            })?
            .next()
            .ok_or_else(|| {
                Error::from_string(
                    ErrorKind::TransportRefused,
                    format!("No address for {}:{}", options.host(), options.port()),
                )
            })?;

        let tcp_stream =
            TcpStream::connect_timeout(&address, options.connect_timeout()).map_err(|err| {
                Error::from_string(
                    ErrorKind::TransportRefused,
                    format!("Failed to connect to {address}: {err}"),
                )
            })?;
        tcp_stream.set_nonblocking(true)?;
        tcp_stream.set_nodelay(true)?;

        let state = match options.connect_type() {
            ConnectType::Mqtt(_) => StreamState::Tcp(tcp_stream),
            ConnectType::Mqtts(mqtts) => {
                let tls = new_tls_stream(options, &mqtts.tls_type, tcp_stream)?;
                StreamState::TlsHandshake { tls, ws_url: None }
            }
            ConnectType::Ws(ws) => {
                let ws_url = format!("ws://{}:{}{}", options.host(), options.port(), ws.path);
                start_ws_handshake(&ws_url, tcp_stream)?
            }
            ConnectType::Wss(wss) => {
                let tls = new_tls_stream(options, &wss.tls_type, tcp_stream)?;
                let ws_url = format!("wss://{}:{}{}", options.host(), options.port(), wss.path);
                StreamState::TlsHandshake {
                    tls,
                    ws_url: Some(ws_url),
                }
            }
        };

        Ok(Self { state })
    }

    /// Drive pending handshakes one non-blocking step.
    ///
    /// Returns true once the stream is ready for MQTT bytes.
    ///
    /// # Errors
    ///
    /// Returns error if a handshake fails.
    pub fn poll_handshake(&mut self) -> Result<bool, Error> {
        match std::mem::replace(&mut self.state, StreamState::Closed) {
            StreamState::TlsHandshake { mut tls, ws_url } => {
                if tls.conn.is_handshaking() {
                    match tls.conn.complete_io(&mut tls.sock) {
                        Ok(_) => {}
                        Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {}
                        Err(err) => {
                            return Err(Error::from_string(
                                ErrorKind::TlsHandshakeFailed,
                                format!("Tls handshake failed: {err}"),
                            ));
                        }
                    }
                }
                if tls.conn.is_handshaking() {
                    self.state = StreamState::TlsHandshake { tls, ws_url };
                    Ok(false)
                } else if let Some(ws_url) = ws_url {
                    self.state = start_wss_handshake(&ws_url, *tls)?;
                    Ok(matches!(self.state, StreamState::Wss(..)))
                } else {
                    self.state = StreamState::Tls(tls);
                    Ok(true)
                }
            }
            StreamState::WsHandshake(Some(mid)) => match mid.handshake() {
                Ok((socket, _response)) => {
                    self.state = StreamState::Ws(Box::new(socket));
                    Ok(true)
                }
                Err(HandshakeError::Interrupted(mid)) => {
                    self.state = StreamState::WsHandshake(Some(mid));
                    Ok(false)
                }
                Err(HandshakeError::Failure(err)) => Err(Error::from_string(
                    ErrorKind::TransportRefused,
                    format!("Websocket handshake failed: {err}"),
                )),
            },
            StreamState::WssHandshake(Some(mid)) => match mid.handshake() {
                Ok((socket, _response)) => {
                    self.state = StreamState::Wss(Box::new(socket));
                    Ok(true)
                }
                Err(HandshakeError::Interrupted(mid)) => {
                    self.state = StreamState::WssHandshake(Some(mid));
                    Ok(false)
                }
                Err(HandshakeError::Failure(err)) => Err(Error::from_string(
                    ErrorKind::TransportRefused,
                    format!("Websocket handshake failed: {err}"),
                )),
            },
            StreamState::WsHandshake(None) | StreamState::WssHandshake(None) => Err(Error::new(
                ErrorKind::SocketError,
                "Websocket handshake state is empty",
            )),
            state @ (StreamState::Tcp(..)
            | StreamState::Tls(..)
            | StreamState::Ws(..)
            | StreamState::Wss(..)) => {
                self.state = state;
                Ok(true)
            }
            StreamState::Closed => Err(Error::new(ErrorKind::SocketError, "Stream is closed")),
        }
    }

    /// Append available bytes to `buf` without blocking.
    ///
    /// # Errors
    ///
    /// Returns error on a hard stream failure.
    pub fn read_buf(&mut self, buf: &mut Vec<u8>) -> Result<ReadResult, Error> {
        match &mut self.state {
            StreamState::Tcp(stream) => read_chunk(stream, buf),
            StreamState::Tls(stream) => read_chunk(stream.as_mut(), buf),
            StreamState::Ws(socket) => read_ws_message(socket, buf),
            StreamState::Wss(socket) => read_ws_message(socket, buf),
            StreamState::Closed => Ok(ReadResult::Closed),
            _ => Ok(ReadResult::WouldBlock),
        }
    }

    /// Write one MQTT packet, resuming at `*offset` after a short write.
    ///
    /// Returns true when the whole packet was accepted by the stream.
    /// WebSocket variants frame the packet as one binary message.
    ///
    /// # Errors
    ///
    /// Returns error on a hard stream failure.
    pub fn write_packet(&mut self, packet: &[u8], offset: &mut usize) -> Result<bool, Error> {
        match &mut self.state {
            StreamState::Tcp(stream) => write_chunk(stream, packet, offset),
            StreamState::Tls(stream) => write_chunk(stream.as_mut(), packet, offset),
            StreamState::Ws(socket) => write_ws_message(socket, packet),
            StreamState::Wss(socket) => write_ws_message(socket, packet),
            StreamState::Closed => Err(Error::new(ErrorKind::SocketError, "Stream is closed")),
            _ => Ok(false),
        }
    }

    /// Flush buffered frames and TLS records without blocking.
    pub fn flush(&mut self) {
        let result: std::io::Result<()> = match &mut self.state {
            StreamState::Tls(stream) => stream.flush(),
            StreamState::Ws(socket) => flush_ws(socket),
            StreamState::Wss(socket) => flush_ws(socket),
            _ => Ok(()),
        };
        if let Err(err) = result {
            if err.kind() != std::io::ErrorKind::WouldBlock {
                log::debug!("stream: flush failed: {err}");
            }
        }
    }

    /// Tear the stream down. A close frame or close-notify is attempted
    /// best effort.
    pub fn close(&mut self) {
        match &mut self.state {
            StreamState::Ws(socket) => {
                let _ = socket.close(None);
            }
            StreamState::Wss(socket) => {
                let _ = socket.close(None);
            }
            StreamState::Tls(stream) => {
                stream.conn.send_close_notify();
                let _ = stream.conn.write_tls(&mut stream.sock);
            }
            _ => {}
        }
        self.state = StreamState::Closed;
    }
}

fn read_chunk<S: Read>(stream: &mut S, buf: &mut Vec<u8>) -> Result<ReadResult, Error> {
    let mut chunk = [0u8; 4096];
    loop {
        match stream.read(&mut chunk) {
            Ok(0) => return Ok(ReadResult::Closed),
            Ok(n) => {
                buf.extend_from_slice(&chunk[..n]);
                return Ok(ReadResult::Data(n));
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                return Ok(ReadResult::WouldBlock)
            }
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => {}
            Err(err) => {
                return Err(Error::from_string(
                    ErrorKind::SocketError,
                    format!("Failed to read from stream: {err}"),
                ));
            }
        }
    }
}

fn write_chunk<S: Write>(
    stream: &mut S,
    packet: &[u8],
    offset: &mut usize,
) -> Result<bool, Error> {
    while *offset < packet.len() {
        match stream.write(&packet[*offset..]) {
            Ok(0) => {
                return Err(Error::new(ErrorKind::SocketError, "Stream write returned 0"))
            }
            Ok(n) => *offset += n,
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => return Ok(false),
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => {}
            Err(err) => {
                return Err(Error::from_string(
                    ErrorKind::SocketError,
                    format!("Failed to write to stream: {err}"),
                ));
            }
        }
    }
    Ok(true)
}

fn read_ws_message<S: Read + Write>(
    socket: &mut WebSocket<S>,
    buf: &mut Vec<u8>,
) -> Result<ReadResult, Error> {
    match socket.read() {
        Ok(Message::Binary(data)) => {
            let len = data.len();
            buf.extend(data);
            Ok(ReadResult::Data(len))
        }
        Ok(Message::Close(_)) => Ok(ReadResult::Closed),
        Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => Ok(ReadResult::WouldBlock),
        Ok(Message::Text(text)) => {
            log::warn!("stream: Ignoring unexpected text frame of {} bytes", text.len());
            Ok(ReadResult::WouldBlock)
        }
        Err(tungstenite::Error::Io(err)) if err.kind() == std::io::ErrorKind::WouldBlock => {
            Ok(ReadResult::WouldBlock)
        }
        Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
            Ok(ReadResult::Closed)
        }
        Err(err) => Err(err.into()),
    }
}

fn write_ws_message<S: Read + Write>(
    socket: &mut WebSocket<S>,
    packet: &[u8],
) -> Result<bool, Error> {
    match socket.send(Message::binary(packet.to_vec())) {
        Ok(()) => Ok(true),
        // The frame is queued inside tungstenite; only the flush blocked.
        Err(tungstenite::Error::Io(err)) if err.kind() == std::io::ErrorKind::WouldBlock => {
            Ok(true)
        }
        Err(err) => Err(err.into()),
    }
}

fn flush_ws<S: Read + Write>(socket: &mut WebSocket<S>) -> std::io::Result<()> {
    match socket.flush() {
        Ok(()) => Ok(()),
        Err(tungstenite::Error::Io(err)) => Err(err),
        Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => Ok(()),
        Err(err) => {
            log::debug!("stream: Websocket flush failed: {err}");
            Ok(())
        }
    }
}

fn start_ws_handshake(ws_url: &str, stream: TcpStream) -> Result<StreamState, Error> {
    match tungstenite::client(ws_url, stream) {
        Ok((socket, _response)) => Ok(StreamState::Ws(Box::new(socket))),
        Err(HandshakeError::Interrupted(mid)) => Ok(StreamState::WsHandshake(Some(mid))),
        Err(HandshakeError::Failure(err)) => Err(Error::from_string(
            ErrorKind::TransportRefused,
            format!("Websocket handshake failed: {err}"),
        )),
    }
}

fn start_wss_handshake(ws_url: &str, stream: TlsStream) -> Result<StreamState, Error> {
    match tungstenite::client(ws_url, stream) {
        Ok((socket, _response)) => Ok(StreamState::Wss(Box::new(socket))),
        Err(HandshakeError::Interrupted(mid)) => Ok(StreamState::WssHandshake(Some(mid))),
        Err(HandshakeError::Failure(err)) => Err(Error::from_string(
            ErrorKind::TransportRefused,
            format!("Websocket handshake failed: {err}"),
        )),
    }
}

fn new_tls_stream(
    options: &ConnectOptions,
    tls_type: &TlsType,
    tcp_stream: TcpStream,
) -> Result<Box<TlsStream>, Error> {
    let config = build_tls_config(options, tls_type)?;
    let server_name = rustls::ServerName::try_from(options.host()).map_err(|err| {
        Error::from_string(
            ErrorKind::CertError,
            format!("Invalid server name {}: {err}", options.host()),
        )
    })?;
    let connection = ClientConnection::new(config, server_name)?;
    Ok(Box::new(rustls::StreamOwned::new(connection, tcp_stream)))
}

fn build_tls_config(
    options: &ConnectOptions,
    tls_type: &TlsType,
) -> Result<Arc<ClientConfig>, Error> {
    let mut roots = RootCertStore::empty();
    match tls_type {
        TlsType::CASigned => {
            roots.add_trust_anchors(webpki_roots::TLS_SERVER_ROOTS.iter().map(|anchor| {
                OwnedTrustAnchor::from_subject_spki_name_constraints(
                    anchor.subject,
                    anchor.spki,
                    anchor.name_constraints,
                )
            }));
        }
        TlsType::SelfSigned(self_signed) => {
            let root_ca_fd = File::open(&self_signed.root_ca_pem).map_err(|err| {
                Error::from_string(
                    ErrorKind::CertError,
                    format!(
                        "Failed to open root ca file {:?}: {err}",
                        self_signed.root_ca_pem
                    ),
                )
            })?;
            let mut reader = BufReader::new(root_ca_fd);
            let certs = rustls_pemfile::certs(&mut reader).map_err(|err| {
                Error::from_string(ErrorKind::CertError, format!("Invalid pem bundle: {err}"))
            })?;
            if certs.is_empty() {
                return Err(Error::new(ErrorKind::CertError, "Pem bundle holds no cert"));
            }
            for cert in certs {
                roots.add(&Certificate(cert)).map_err(|err| {
                    Error::from_string(ErrorKind::CertError, format!("Invalid root cert: {err}"))
                })?;
            }
        }
    }

    let needs_hook =
        !options.verify_server_certificate() || options.ssl_verify_callback().is_some();
    let verifier = if needs_hook {
        Some(Arc::new(VerifyHook {
            inner: WebPkiVerifier::new(roots.clone(), None),
            verify: options.verify_server_certificate(),
            callback: options.ssl_verify_callback().cloned(),
        }))
    } else {
        None
    };

    let mut config = ClientConfig::builder()
        .with_safe_defaults()
        .with_root_certificates(roots)
        .with_no_client_auth();
    if let Some(verifier) = verifier {
        config.dangerous().set_certificate_verifier(verifier);
    }
    Ok(Arc::new(config))
}

/// Chain verifier with an optional per-certificate override hook.
struct VerifyHook {
    inner: WebPkiVerifier,
    verify: bool,
    callback: Option<SslVerifyCallback>,
}

impl ServerCertVerifier for VerifyHook {
    fn verify_server_cert(
        &self,
        end_entity: &Certificate,
        intermediates: &[Certificate],
        server_name: &rustls::ServerName,
        scts: &mut dyn Iterator<Item = &[u8]>,
        ocsp_response: &[u8],
        now: SystemTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        let preverify_ok = if self.verify {
            self.inner
                .verify_server_cert(end_entity, intermediates, server_name, scts, ocsp_response, now)
                .is_ok()
        } else {
            true
        };

        let accept = match &self.callback {
            Some(callback) => callback(preverify_ok, end_entity.0.as_slice()),
            None => preverify_ok,
        };
        if accept {
            Ok(ServerCertVerified::assertion())
        } else {
            Err(rustls::Error::InvalidCertificate(
                rustls::CertificateError::ApplicationVerificationFailure,
            ))
        }
    }
}

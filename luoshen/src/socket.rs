// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Transport adapter: a non-blocking byte stream with MQTT packet framing.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::connect_options::ConnectOptions;
use crate::error::{Error, ErrorKind};
use crate::stream::{ReadResult, Stream};

/// Compact the inbound buffer once the consumed prefix reaches this size
/// and at least 75% of the buffer.
const COMPACT_THRESHOLD: usize = 256 * 1024;

/// Events emitted by a transport towards the reactor.
#[derive(Debug)]
pub enum TransportEvent {
    /// The transport (including TLS and WebSocket handshakes) is ready.
    Connected,

    /// The transport is gone. Emitted exactly once per connection.
    Disconnected { reason: Option<Error> },

    /// One whole MQTT packet, fixed header included.
    Packet(Vec<u8>),
}

/// Uniform non-blocking transport consumed by the reactor.
///
/// Implemented by [`NetTransport`] for the production backends; tests plug
/// in scripted implementations.
pub trait Transport: Send {
    /// Begin a connection attempt. Idempotent while connecting or
    /// connected; completion is signalled with a `Connected` event.
    ///
    /// # Errors
    ///
    /// Returns error if the connection attempt cannot be started.
    fn connect(&mut self) -> Result<(), Error>;

    /// Queue one whole MQTT packet for sending.
    ///
    /// # Errors
    ///
    /// Returns `BackpressureExceeded` if the outbound queue cap would be
    /// exceeded, `InvalidState` if the transport is not connected.
    fn send(&mut self, packet: &[u8]) -> Result<(), Error>;

    /// Begin orderly teardown. Leads to exactly one `Disconnected` event.
    fn close(&mut self, code: i32, reason: &str);

    fn is_connected(&self) -> bool;

    /// One round of socket polling: receive, handshake progress, flush.
    fn tick(&mut self);

    /// Flush bytes queued since the last tick.
    fn flush(&mut self);

    /// Take the next pending event.
    fn poll_event(&mut self) -> Option<TransportEvent>;

    /// Bytes currently queued for sending.
    fn outbound_bytes(&self) -> usize;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Handshaking,
    Connected,
    Closed,
}

/// Production transport over the configured stream backend.
pub struct NetTransport {
    options: Arc<ConnectOptions>,
    stream: Option<Stream>,
    phase: Phase,

    inbound: Vec<u8>,
    read_pos: usize,

    outbound: VecDeque<Vec<u8>>,
    outbound_bytes: usize,
    front_offset: usize,

    events: VecDeque<TransportEvent>,
}

impl NetTransport {
    #[must_use]
    pub fn new(options: Arc<ConnectOptions>) -> Self {
        Self {
            options,
            stream: None,
            phase: Phase::Idle,
            inbound: Vec::with_capacity(4096),
            read_pos: 0,
            outbound: VecDeque::new(),
            outbound_bytes: 0,
            front_offset: 0,
            events: VecDeque::new(),
        }
    }

    fn fail(&mut self, reason: Error) {
        log::warn!("socket: Connection failed: {reason}");
        self.teardown(Some(reason));
    }

    fn teardown(&mut self, reason: Option<Error>) {
        if let Some(mut stream) = self.stream.take() {
            stream.close();
        }
        if self.phase != Phase::Idle && self.phase != Phase::Closed {
            self.events.push_back(TransportEvent::Disconnected { reason });
        }
        self.phase = Phase::Closed;
        self.inbound.clear();
        self.read_pos = 0;
        self.outbound.clear();
        self.outbound_bytes = 0;
        self.front_offset = 0;
    }

    /// Parse complete packets out of the inbound buffer.
    fn deframe(&mut self) -> Result<(), Error> {
        loop {
            let buf = &self.inbound[self.read_pos..];
            let Some((header_len, remaining_length)) = parse_fixed_header(buf)? else {
                break;
            };

            let total = header_len + remaining_length;
            if self.options.enforce_max_packet_size() && total > self.options.max_packet_size() {
                return Err(Error::from_string(
                    ErrorKind::MalformedPacket,
                    format!(
                        "Inbound packet of {total} bytes exceeds max packet size {}",
                        self.options.max_packet_size()
                    ),
                ));
            }
            if buf.len() < total {
                break;
            }

            self.events
                .push_back(TransportEvent::Packet(buf[..total].to_vec()));
            self.read_pos += total;
        }

        // Drop the consumed prefix only when it dominates the buffer, so
        // steady-state reads do not copy.
        if self.read_pos >= COMPACT_THRESHOLD && self.read_pos * 4 >= self.inbound.len() * 3 {
            self.inbound.drain(..self.read_pos);
            self.read_pos = 0;
        }

        if self.inbound.len() > self.options.max_inbound_buffer() {
            return Err(Error::from_string(
                ErrorKind::MalformedPacket,
                format!(
                    "Inbound buffer exceeds cap of {} bytes",
                    self.options.max_inbound_buffer()
                ),
            ));
        }
        Ok(())
    }

    fn receive(&mut self) -> Result<(), Error> {
        loop {
            let read = {
                let Some(stream) = self.stream.as_mut() else {
                    return Ok(());
                };
                stream.read_buf(&mut self.inbound)?
            };
            match read {
                ReadResult::Data(_) => {
                    self.deframe()?;
                }
                ReadResult::WouldBlock => return Ok(()),
                ReadResult::Closed => {
                    return Err(Error::new(
                        ErrorKind::TransportDropped,
                        "Connection closed by peer",
                    ));
                }
            }
        }
    }

    fn flush_outbound(&mut self) -> Result<(), Error> {
        let Some(stream) = self.stream.as_mut() else {
            return Ok(());
        };
        while let Some(packet) = self.outbound.front() {
            let done = stream.write_packet(packet, &mut self.front_offset)?;
            if !done {
                return Ok(());
            }
            self.outbound_bytes -= packet.len();
            self.outbound.pop_front();
            self.front_offset = 0;
        }
        stream.flush();
        Ok(())
    }
}

impl Transport for NetTransport {
    fn connect(&mut self) -> Result<(), Error> {
        if self.phase == Phase::Handshaking || self.phase == Phase::Connected {
            return Ok(());
        }
        log::info!(
            "socket: Connecting to {}:{}",
            self.options.host(),
            self.options.port()
        );
        let stream = Stream::connect(&self.options)?;
        self.stream = Some(stream);
        self.phase = Phase::Handshaking;
        Ok(())
    }

    fn send(&mut self, packet: &[u8]) -> Result<(), Error> {
        if self.phase != Phase::Connected && self.phase != Phase::Handshaking {
            return Err(Error::new(ErrorKind::InvalidState, "Transport not connected"));
        }
        if self.outbound_bytes + packet.len() > self.options.max_outbound_queue() {
            return Err(Error::from_string(
                ErrorKind::BackpressureExceeded,
                format!(
                    "Outbound queue of {} bytes would exceed cap {}",
                    self.outbound_bytes + packet.len(),
                    self.options.max_outbound_queue()
                ),
            ));
        }
        self.outbound_bytes += packet.len();
        self.outbound.push_back(packet.to_vec());
        Ok(())
    }

    fn close(&mut self, code: i32, reason: &str) {
        log::info!("socket: Closing connection, code: {code}, reason: {reason}");
        self.teardown(None);
    }

    fn is_connected(&self) -> bool {
        self.phase == Phase::Connected
    }

    fn tick(&mut self) {
        match self.phase {
            Phase::Idle | Phase::Closed => {}
            Phase::Handshaking => {
                let ready = match self.stream.as_mut() {
                    Some(stream) => stream.poll_handshake(),
                    None => return,
                };
                match ready {
                    Ok(true) => {
                        self.phase = Phase::Connected;
                        self.events.push_back(TransportEvent::Connected);
                    }
                    Ok(false) => {}
                    Err(err) => self.fail(err),
                }
            }
            Phase::Connected => {
                if let Err(err) = self.receive() {
                    self.fail(err);
                    return;
                }
                if let Err(err) = self.flush_outbound() {
                    self.fail(err);
                }
            }
        }
    }

    fn flush(&mut self) {
        if self.phase == Phase::Connected {
            if let Err(err) = self.flush_outbound() {
                self.fail(err);
            }
        }
    }

    fn poll_event(&mut self) -> Option<TransportEvent> {
        self.events.pop_front()
    }

    fn outbound_bytes(&self) -> usize {
        self.outbound_bytes
    }
}

/// Parse the fixed header at the start of `buf`.
///
/// Returns `(header_len, remaining_length)` when a whole fixed header is
/// available, `None` when more bytes are needed.
///
/// # Errors
///
/// Returns error if the length field uses more than four bytes.
fn parse_fixed_header(buf: &[u8]) -> Result<Option<(usize, usize)>, Error> {
    if buf.len() < 2 {
        return Ok(None);
    }

    let mut remaining_length: usize = 0;
    let mut multiplier: usize = 1;
    let mut index = 1;
    loop {
        if index >= buf.len() {
            return Ok(None);
        }
        let byte = buf[index] as usize;
        remaining_length += (byte & 0x7f) * multiplier;
        index += 1;
        if byte & 0x80 == 0 {
            break;
        }
        multiplier *= 128;
        if multiplier > 128 * 128 * 128 {
            return Err(Error::new(
                ErrorKind::MalformedPacket,
                "Remaining length field exceeds four bytes",
            ));
        }
    }

    Ok(Some((index, remaining_length)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_fixed_header() {
        assert_eq!(parse_fixed_header(&[0xd0]).unwrap(), None);
        assert_eq!(parse_fixed_header(&[0xd0, 0x00]).unwrap(), Some((2, 0)));
        assert_eq!(
            parse_fixed_header(&[0x30, 0x92, 0x01, 0x00]).unwrap(),
            Some((3, 146))
        );
        // Continuation bit set but next byte missing.
        assert_eq!(parse_fixed_header(&[0x30, 0x92]).unwrap(), None);
        assert!(parse_fixed_header(&[0x30, 0xff, 0xff, 0xff, 0xff, 0x7f]).is_err());
    }
}

// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Session state machine.
//!
//! Drives the connection lifecycle for one protocol version. The reactor
//! instantiates [`Session<V311>`] or [`Session<V5>`] based on the version
//! preference and swaps the instantiation for the one-shot version
//! fallback redial.

use codec::{
    AuthPacket, BinaryData, ConnectPacket, DisconnectPacket, EncodePacket, MqttPacket, PacketId,
    PingRequestPacket, Property, ProtocolVersion, PublishAckPacket, PublishCompletePacket,
    PublishPacket, PublishReleasePacket, QoS, ReasonCode, StringData, SubTopic, SubscribeAck,
    SubscribePacket, U16Data, U32Data, UnsubscribePacket,
};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::commands::Command;
use crate::completion::CompletionSink;
use crate::connect_options::{CallbackExecutor, ConnectOptions};
use crate::delegate::Multicast;
use crate::error::{Error, ErrorKind};
use crate::events::{
    ClientDelegates, ConnectEvent, DisconnectEvent, PublishAckEvent, SubscribeAckEvent,
    UnsubscribeAckEvent,
};
use crate::inflight::{EntrySink, FlightPhase, InFlightTracker};
use crate::message::{Message, SubscribeResult, UnsubscribeResult};
use crate::metrics::Metrics;
use crate::router::Router;
use crate::socket::{Transport, TransportEvent};
use crate::timer::{TimerId, TimerKind, TimerQueue};

/// Follow-up the reactor must perform after a session call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Directive {
    None,

    /// The broker refused the protocol version; redial once with the
    /// other version.
    FallbackRedial,
}

/// Lifecycle phase of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Disconnected,
    Connecting,
    Handshaking,
    Ready,
    Disconnecting,
    Reconnecting,
}

/// Reactor-owned collaborators the session operates on.
pub(crate) struct Context<'a> {
    pub transport: &'a mut dyn Transport,
    pub tracker: &'a mut InFlightTracker,
    pub router: &'a mut Router,
    pub timers: &'a mut TimerQueue,
    pub delegates: &'a ClientDelegates,
    pub metrics: &'a Arc<Metrics>,
    pub connected_flag: &'a AtomicBool,
    pub executor: Option<&'a CallbackExecutor>,
}

impl Context<'_> {
    /// Broadcast `event`, inline or marshalled through the configured
    /// executor.
    fn broadcast<E: Send + 'static>(&self, multicast: &Multicast<E>, event: E) {
        if let Some(executor) = self.executor {
            let multicast = multicast.clone();
            let metrics = Arc::clone(self.metrics);
            executor(Box::new(move || {
                let panics = multicast.broadcast(&event);
                metrics.inc_callback_panics(panics);
            }));
        } else {
            let panics = multicast.broadcast(&event);
            self.metrics.inc_callback_panics(panics);
        }
    }
}

/// The state machine for one negotiated protocol version.
pub(crate) struct Session<V: ProtocolVersion> {
    options: Arc<ConnectOptions>,
    phase: SessionPhase,

    clean_session: bool,
    client_id: String,

    /// Negotiated keep alive, the lesser of the client preference and a
    /// server override.
    keep_alive: Duration,
    session_present: bool,

    /// Whether a version-refusal may still trigger the fallback redial.
    can_fallback: bool,

    last_send: Instant,
    last_recv: Instant,
    ping_outstanding: bool,

    reconnect_backoff: Duration,
    connection_retries: u32,

    connect_sink: Option<CompletionSink<()>>,
    disconnect_sink: Option<CompletionSink<()>>,

    handshake_timer: Option<TimerId>,
    keep_alive_timer: Option<TimerId>,
    ping_timer: Option<TimerId>,
    reconnect_timer: Option<TimerId>,
    retry_timer: Option<TimerId>,

    _version: PhantomData<V>,
}

impl<V: ProtocolVersion> Session<V> {
    pub fn new(options: Arc<ConnectOptions>, can_fallback: bool) -> Self {
        let now = Instant::now();
        Self {
            client_id: options.client_id().to_string(),
            keep_alive: options.keep_alive(),
            reconnect_backoff: options.reconnect_delay(),
            options,
            phase: SessionPhase::Disconnected,
            clean_session: true,
            session_present: false,
            can_fallback,
            last_send: now,
            last_recv: now,
            ping_outstanding: false,
            connection_retries: 0,
            connect_sink: None,
            disconnect_sink: None,
            handshake_timer: None,
            keep_alive_timer: None,
            ping_timer: None,
            reconnect_timer: None,
            retry_timer: None,
            _version: PhantomData,
        }
    }

    #[must_use]
    pub const fn phase(&self) -> SessionPhase {
        self.phase
    }

    #[must_use]
    pub const fn clean_session(&self) -> bool {
        self.clean_session
    }

    /// Take the pending connect completion, used to carry it into the
    /// fallback session.
    pub fn take_connect_sink(&mut self) -> Option<CompletionSink<()>> {
        self.connect_sink.take()
    }

    pub fn connect_with_sink(
        &mut self,
        clean_session: bool,
        sink: Option<CompletionSink<()>>,
        ctx: &mut Context,
    ) {
        self.clean_session = clean_session;
        self.connect_sink = sink;
        self.start_connect(ctx);
    }

    fn start_connect(&mut self, ctx: &mut Context) {
        match ctx.transport.connect() {
            Ok(()) => {
                self.phase = SessionPhase::Connecting;
                let deadline = Instant::now()
                    + self.options.connect_timeout()
                    + self.options.handshake_timeout();
                self.replace_timer(
                    ctx,
                    TimerSlot::Handshake,
                    Some((TimerKind::HandshakeTimeout, deadline)),
                );
            }
            Err(err) => {
                log::warn!("session: Transport connect failed: {err}");
                self.session_lost(err, ctx);
            }
        }
    }

    // ------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------

    /// Process one producer command. A returned command could not run yet
    /// and must go back to the front of the queue.
    pub fn handle_command(&mut self, command: Command, ctx: &mut Context) -> Option<Command> {
        match command {
            Command::Connect {
                clean_session,
                sink,
            } => {
                if self.phase == SessionPhase::Disconnected {
                    self.connect_with_sink(clean_session, Some(sink), ctx);
                } else {
                    sink.complete_err(Error::new(
                        ErrorKind::InvalidState,
                        "Connect while session is active",
                    ));
                }
                None
            }
            Command::Disconnect { sink } => {
                self.on_disconnect_command(sink, ctx);
                None
            }
            Command::Publish { message, sink } => self.on_publish_command(message, sink, ctx),
            Command::Subscribe { filters, sink } => self.on_subscribe_command(filters, sink, ctx),
            Command::Unsubscribe { topics, sink } => {
                self.on_unsubscribe_command(topics, sink, ctx)
            }
            Command::CloseSocket { code, reason } => {
                ctx.transport.close(code, &reason);
                None
            }
        }
    }

    fn on_disconnect_command(&mut self, sink: CompletionSink<()>, ctx: &mut Context) {
        match self.phase {
            SessionPhase::Ready => {
                let packet = DisconnectPacket::new();
                if let Err(err) = self.send_packet(ctx, &packet) {
                    log::warn!("session: Failed to send DISCONNECT: {err}");
                }
                ctx.transport.flush();
                self.phase = SessionPhase::Disconnecting;
                self.disconnect_sink = Some(sink);
                ctx.transport.close(0, "client disconnect");
            }
            SessionPhase::Connecting | SessionPhase::Handshaking => {
                self.phase = SessionPhase::Disconnecting;
                self.disconnect_sink = Some(sink);
                if let Some(connect_sink) = self.connect_sink.take() {
                    connect_sink.complete_err(Error::new(
                        ErrorKind::Cancelled,
                        "Disconnected before the handshake finished",
                    ));
                }
                ctx.transport.close(0, "client disconnect");
            }
            SessionPhase::Reconnecting => {
                self.replace_timer(ctx, TimerSlot::Reconnect, None);
                self.phase = SessionPhase::Disconnected;
                sink.complete_ok(());
            }
            SessionPhase::Disconnecting | SessionPhase::Disconnected => {
                sink.complete_ok(());
            }
        }
    }

    fn on_publish_command(
        &mut self,
        message: Message,
        sink: CompletionSink<()>,
        ctx: &mut Context,
    ) -> Option<Command> {
        if self.phase != SessionPhase::Ready {
            sink.complete_err(Error::new(ErrorKind::InvalidState, "Not connected"));
            return None;
        }

        if message.qos() == QoS::AtMostOnce {
            let packet = match new_publish_packet(&message, PacketId::new(0)) {
                Ok(packet) => packet,
                Err(err) => {
                    sink.complete_err(err);
                    return None;
                }
            };
            match self.send_packet(ctx, &packet) {
                Ok(()) => {
                    ctx.router.note_local_publish(message.topic());
                    sink.complete_ok(());
                }
                Err(err) => sink.complete_err(err),
            }
            return None;
        }

        // The configured pending cap is hard: violations reject the
        // producer. A broker receive maximum below the cap only defers the
        // command until acknowledgements free a slot.
        if ctx.tracker.at_pending_cap() {
            sink.complete_err(Error::new(
                ErrorKind::QueueFull,
                "Pending command cap reached",
            ));
            return None;
        }
        if !ctx.tracker.has_capacity() {
            return Some(Command::Publish { message, sink });
        }
        let packet_id = match ctx.tracker.alloc_id() {
            Ok(packet_id) => packet_id,
            Err(err) => {
                log::warn!("session: Deferring publish: {err}");
                return Some(Command::Publish { message, sink });
            }
        };

        let packet = match new_publish_packet(&message, packet_id) {
            Ok(packet) => packet,
            Err(err) => {
                sink.complete_err(err);
                return None;
            }
        };
        let mut bytes = Vec::new();
        if let Err(err) = packet.encode::<V>(&mut bytes) {
            sink.complete_err(err.into());
            return None;
        }
        if let Err(err) = self.send_bytes(ctx, &bytes) {
            sink.complete_err(err);
            return None;
        }

        let flight_phase = if message.qos() == QoS::AtLeastOnce {
            FlightPhase::AwaitingAck
        } else {
            FlightPhase::AwaitingRec
        };
        ctx.router.note_local_publish(message.topic());
        ctx.tracker.insert_outbound(
            packet_id,
            bytes,
            message.qos(),
            flight_phase,
            EntrySink::Unit(sink),
            Instant::now(),
        );
        self.ensure_retry_timer(ctx);
        None
    }

    fn on_subscribe_command(
        &mut self,
        filters: Vec<crate::message::TopicFilter>,
        sink: CompletionSink<Vec<SubscribeResult>>,
        ctx: &mut Context,
    ) -> Option<Command> {
        if self.phase != SessionPhase::Ready {
            sink.complete_err(Error::new(ErrorKind::InvalidState, "Not connected"));
            return None;
        }
        if filters.is_empty() {
            sink.complete_err(Error::new(ErrorKind::ConfigInvalid, "No topic filter given"));
            return None;
        }
        if ctx.tracker.at_pending_cap() {
            sink.complete_err(Error::new(
                ErrorKind::QueueFull,
                "Pending command cap reached",
            ));
            return None;
        }
        if !ctx.tracker.has_capacity() {
            return Some(Command::Subscribe { filters, sink });
        }
        let packet_id = match ctx.tracker.alloc_id() {
            Ok(packet_id) => packet_id,
            Err(err) => {
                log::warn!("session: Deferring subscribe: {err}");
                return Some(Command::Subscribe { filters, sink });
            }
        };

        let topics = filters
            .iter()
            .map(crate::message::TopicFilter::to_subscribe_topic)
            .collect();
        let packet = match SubscribePacket::with_topics(packet_id, topics) {
            Ok(packet) => packet,
            Err(err) => {
                sink.complete_err(err.into());
                return None;
            }
        };
        let mut bytes = Vec::new();
        if let Err(err) = packet.encode::<V>(&mut bytes) {
            sink.complete_err(err.into());
            return None;
        }
        if let Err(err) = self.send_bytes(ctx, &bytes) {
            sink.complete_err(err);
            return None;
        }

        ctx.tracker.insert_outbound(
            packet_id,
            bytes,
            QoS::AtLeastOnce,
            FlightPhase::AwaitingAck,
            EntrySink::Subscribe(sink, filters),
            Instant::now(),
        );
        self.ensure_retry_timer(ctx);
        None
    }

    fn on_unsubscribe_command(
        &mut self,
        topics: Vec<String>,
        sink: CompletionSink<Vec<UnsubscribeResult>>,
        ctx: &mut Context,
    ) -> Option<Command> {
        if self.phase != SessionPhase::Ready {
            sink.complete_err(Error::new(ErrorKind::InvalidState, "Not connected"));
            return None;
        }
        let mut filters = Vec::with_capacity(topics.len());
        for topic in &topics {
            match SubTopic::parse(topic) {
                Ok(filter) => filters.push(filter),
                Err(err) => {
                    sink.complete_err(Error::from_string(
                        ErrorKind::ConfigInvalid,
                        format!("Invalid topic filter {topic}: {err:?}"),
                    ));
                    return None;
                }
            }
        }
        if ctx.tracker.at_pending_cap() {
            sink.complete_err(Error::new(
                ErrorKind::QueueFull,
                "Pending command cap reached",
            ));
            return None;
        }
        if !ctx.tracker.has_capacity() {
            return Some(Command::Unsubscribe { topics, sink });
        }
        let packet_id = match ctx.tracker.alloc_id() {
            Ok(packet_id) => packet_id,
            Err(err) => {
                log::warn!("session: Deferring unsubscribe: {err}");
                return Some(Command::Unsubscribe { topics, sink });
            }
        };

        let packet = match UnsubscribePacket::with_topics(packet_id, filters) {
            Ok(packet) => packet,
            Err(err) => {
                sink.complete_err(err.into());
                return None;
            }
        };
        let mut bytes = Vec::new();
        if let Err(err) = packet.encode::<V>(&mut bytes) {
            sink.complete_err(err.into());
            return None;
        }
        if let Err(err) = self.send_bytes(ctx, &bytes) {
            sink.complete_err(err);
            return None;
        }

        ctx.tracker.insert_outbound(
            packet_id,
            bytes,
            QoS::AtLeastOnce,
            FlightPhase::AwaitingAck,
            EntrySink::Unsubscribe(sink, topics),
            Instant::now(),
        );
        self.ensure_retry_timer(ctx);
        None
    }

    // ------------------------------------------------------------------
    // Transport events
    // ------------------------------------------------------------------

    pub fn handle_transport_event(&mut self, event: TransportEvent, ctx: &mut Context) {
        match event {
            TransportEvent::Connected => self.on_transport_connected(ctx),
            TransportEvent::Disconnected { reason } => {
                self.on_transport_disconnected(reason, ctx);
            }
            TransportEvent::Packet(_) => {
                // Packets are routed through handle_packet by the reactor.
                log::error!("session: Unexpected raw packet event");
            }
        }
    }

    fn on_transport_connected(&mut self, ctx: &mut Context) {
        if self.phase != SessionPhase::Connecting {
            log::warn!(
                "session: Transport connected in phase {:?}, ignored",
                self.phase
            );
            return;
        }

        match self.build_connect_packet() {
            Ok(packet) => {
                if let Err(err) = self.send_packet(ctx, &packet) {
                    self.session_lost(err, ctx);
                    return;
                }
                self.phase = SessionPhase::Handshaking;
                let deadline = Instant::now() + self.options.handshake_timeout();
                self.replace_timer(
                    ctx,
                    TimerSlot::Handshake,
                    Some((TimerKind::HandshakeTimeout, deadline)),
                );
            }
            Err(err) => {
                self.session_lost(err, ctx);
            }
        }
    }

    fn build_connect_packet(&self) -> Result<ConnectPacket, Error> {
        let mut packet = ConnectPacket::new(&self.client_id)?;
        packet.set_clean_session(self.clean_session);
        #[allow(clippy::cast_possible_truncation)]
        packet.set_keep_alive(self.options.keep_alive().as_secs() as u16);

        let provider = self.options.credentials();
        let credentials = provider.credentials();
        packet.set_username(credentials.username.as_deref())?;
        packet.set_password(credentials.password.as_deref())?;
        if let Some(will) = self.options.will() {
            packet.set_will(Some(will.clone()));
        }

        if V::HAS_PROPERTIES {
            let properties = packet.properties_mut();
            if self.options.session_expiry_interval() > 0 {
                properties.push(Property::SessionExpiryInterval(U32Data::new(
                    self.options.session_expiry_interval(),
                )));
            }
            let cap = self.options.max_pending_commands();
            if cap < usize::from(u16::MAX) {
                #[allow(clippy::cast_possible_truncation)]
                properties.push(Property::ReceiveMaximum(U16Data::new(cap as u16)));
            }
            if let Some(method) = provider.auth_method() {
                properties.push(Property::AuthenticationMethod(
                    StringData::from(&method).map_err(codec::EncodeError::from)?,
                ));
                if let Some(data) = provider.initial_auth_data() {
                    properties.push(Property::AuthenticationData(BinaryData::from_slice(&data)?));
                }
            }
        }
        Ok(packet)
    }

    fn on_transport_disconnected(&mut self, reason: Option<Error>, ctx: &mut Context) {
        match self.phase {
            SessionPhase::Disconnecting => self.finish_disconnect(ctx),
            SessionPhase::Disconnected | SessionPhase::Reconnecting => {}
            SessionPhase::Connecting | SessionPhase::Handshaking | SessionPhase::Ready => {
                let error = reason.unwrap_or_else(|| {
                    Error::new(ErrorKind::TransportDropped, "Connection lost")
                });
                self.session_lost(error, ctx);
            }
        }
    }

    fn finish_disconnect(&mut self, ctx: &mut Context) {
        self.cancel_all_timers(ctx);
        self.phase = SessionPhase::Disconnected;
        ctx.connected_flag.store(false, Ordering::Release);

        // A voluntary disconnect drops session state on the client side.
        for sink in ctx.tracker.abort_all() {
            sink.fail(&Error::new(ErrorKind::SessionLost, "Client disconnected"));
        }
        ctx.router.clear();

        if let Some(sink) = self.disconnect_sink.take() {
            sink.complete_ok(());
        }
        ctx.broadcast(
            &ctx.delegates.disconnect,
            DisconnectEvent {
                reason: None,
                reconnecting: false,
            },
        );
    }

    // ------------------------------------------------------------------
    // Inbound packets
    // ------------------------------------------------------------------

    pub fn handle_packet(&mut self, bytes: &[u8], ctx: &mut Context) -> Directive {
        ctx.metrics.add_bytes_received(bytes.len() as u64);
        let packet = match MqttPacket::parse::<V>(bytes) {
            Ok(packet) => packet,
            Err(err) => {
                return self.on_malformed_packet(err, ctx);
            }
        };
        self.last_recv = Instant::now();

        match (self.phase, packet) {
            (SessionPhase::Handshaking, MqttPacket::ConnectAck(packet)) => {
                return self.on_connect_ack(&packet, ctx);
            }
            (SessionPhase::Ready, MqttPacket::Publish(packet)) => {
                self.on_inbound_publish(packet, ctx);
            }
            (SessionPhase::Ready, MqttPacket::PublishAck(packet)) => {
                self.on_publish_ack(packet.packet_id(), FlightPhase::AwaitingAck, ctx);
            }
            (SessionPhase::Ready, MqttPacket::PublishReceived(packet)) => {
                self.on_publish_received(packet.packet_id(), ctx);
            }
            (SessionPhase::Ready, MqttPacket::PublishComplete(packet)) => {
                self.on_publish_ack(packet.packet_id(), FlightPhase::AwaitingComp, ctx);
            }
            (SessionPhase::Ready, MqttPacket::PublishRelease(packet)) => {
                self.on_publish_release(packet.packet_id(), ctx);
            }
            (SessionPhase::Ready, MqttPacket::SubscribeAck(packet)) => {
                self.on_subscribe_ack(&packet, ctx);
            }
            (SessionPhase::Ready, MqttPacket::UnsubscribeAck(packet)) => {
                self.on_unsubscribe_ack(&packet, ctx);
            }
            (SessionPhase::Ready, MqttPacket::PingResponse(_)) => {
                self.ping_outstanding = false;
                self.replace_timer(ctx, TimerSlot::Ping, None);
            }
            (SessionPhase::Ready | SessionPhase::Handshaking, MqttPacket::Disconnect(packet)) => {
                let code = packet.reason_code() as u8;
                self.session_lost(
                    Error::from_string(
                        ErrorKind::TransportDropped,
                        format!("Server disconnect, reason: {code:#04x}"),
                    ),
                    ctx,
                );
            }
            (SessionPhase::Ready | SessionPhase::Handshaking, MqttPacket::Auth(packet)) => {
                self.on_auth(&packet, ctx);
            }
            (phase, packet) => {
                log::warn!(
                    "session: Unexpected {} in phase {phase:?}",
                    packet.packet_type()
                );
                if self.options.strict_mode() {
                    self.session_lost(
                        Error::from_string(
                            ErrorKind::ProtocolViolation,
                            format!("Unexpected {} packet", packet.packet_type()),
                        ),
                        ctx,
                    );
                }
            }
        }
        Directive::None
    }

    fn on_malformed_packet(&mut self, err: codec::DecodeError, ctx: &mut Context) -> Directive {
        if self.options.strict_mode() {
            self.session_lost(
                Error::from_string(
                    ErrorKind::ProtocolViolation,
                    format!("Malformed inbound packet: {err:?}"),
                ),
                ctx,
            );
        } else {
            log::warn!("session: Dropping malformed inbound packet: {err:?}");
            ctx.metrics.inc_malformed_packets();
        }
        Directive::None
    }

    fn on_connect_ack(
        &mut self,
        packet: &codec::ConnectAckPacket,
        ctx: &mut Context,
    ) -> Directive {
        self.replace_timer(ctx, TimerSlot::Handshake, None);

        if !packet.accepted() {
            let code = packet.error_code();
            log::warn!("session: Broker refused connection, code: {code:#04x}");

            if packet.is_version_refusal() && self.can_fallback && self.options.allow_version_fallback()
            {
                // Keep the connect sink; the reactor transfers it into the
                // fallback session.
                self.phase = SessionPhase::Disconnected;
                ctx.connected_flag.store(false, Ordering::Release);
                ctx.transport.close(0, "version fallback redial");
                return Directive::FallbackRedial;
            }

            self.phase = SessionPhase::Disconnected;
            ctx.connected_flag.store(false, Ordering::Release);
            ctx.transport.close(0, "broker refused connection");
            if let Some(sink) = self.connect_sink.take() {
                sink.complete_err(Error::from_string(
                    ErrorKind::BrokerRefused(code),
                    format!("Broker refused connection with code {code:#04x}"),
                ));
            }
            ctx.broadcast(
                &ctx.delegates.connect,
                ConnectEvent {
                    accepted: false,
                    session_present: false,
                    code,
                },
            );
            return Directive::None;
        }

        self.phase = SessionPhase::Ready;
        self.session_present = packet.session_present();
        self.ping_outstanding = false;
        self.connection_retries = 0;
        self.reconnect_backoff = self.options.reconnect_delay();
        ctx.connected_flag.store(true, Ordering::Release);

        // CONNACK properties may lower keep alive and pending caps, and
        // assign a server-side client id.
        self.keep_alive = self.options.keep_alive();
        if V::HAS_PROPERTIES {
            let properties = packet.properties();
            if let Some(server_keep_alive) = properties.server_keep_alive() {
                let server_keep_alive = Duration::from_secs(u64::from(server_keep_alive));
                self.keep_alive = self.keep_alive.min(server_keep_alive);
            }
            if let Some(assigned) = properties.assigned_client_identifier() {
                log::info!("session: Server assigned client id: {assigned}");
                self.client_id = assigned.to_string();
            }
            ctx.tracker.set_receive_maximum(properties.receive_maximum());
        }

        if packet.session_present() {
            let resend = ctx.tracker.resend_pending(Instant::now());
            for bytes in resend {
                if let Err(err) = self.send_bytes(ctx, &bytes) {
                    log::warn!("session: Failed to resend pending packet: {err}");
                }
            }
        } else {
            for sink in ctx.tracker.abort_all() {
                sink.fail(&Error::new(
                    ErrorKind::SessionLost,
                    "Broker discarded session state",
                ));
            }
            ctx.router.clear();
        }

        if !self.keep_alive.is_zero() {
            let deadline = self.last_send + self.keep_alive;
            self.replace_timer(ctx, TimerSlot::KeepAlive, Some((TimerKind::KeepAlive, deadline)));
        }
        self.ensure_retry_timer(ctx);

        log::info!(
            "session: Connected, session_present: {}",
            packet.session_present()
        );
        if let Some(sink) = self.connect_sink.take() {
            sink.complete_ok(());
        }
        ctx.broadcast(
            &ctx.delegates.connect,
            ConnectEvent {
                accepted: true,
                session_present: packet.session_present(),
                code: 0,
            },
        );
        Directive::None
    }

    fn on_inbound_publish(&mut self, packet: PublishPacket, ctx: &mut Context) {
        let message = Message::from_wire(
            codec::PubTopic::new(packet.topic()).unwrap_or_default(),
            packet.qos(),
            packet.retain(),
            packet.message().to_vec(),
        );

        match packet.qos() {
            QoS::AtMostOnce => {
                self.dispatch_message(message, ctx);
            }
            QoS::AtLeastOnce => {
                self.dispatch_message(message, ctx);
                let ack = PublishAckPacket::new(packet.packet_id());
                if let Err(err) = self.send_packet(ctx, &ack) {
                    log::warn!("session: Failed to send PUBACK: {err}");
                }
            }
            QoS::ExactOnce => {
                // A duplicate delivery for an id still in the received set
                // is not dispatched again, but is acknowledged again.
                if ctx.tracker.begin_inbound(packet.packet_id(), Instant::now()) {
                    self.dispatch_message(message, ctx);
                }
                let ack = codec::PublishReceivedPacket::new(packet.packet_id());
                if let Err(err) = self.send_packet(ctx, &ack) {
                    log::warn!("session: Failed to send PUBREC: {err}");
                }
            }
        }
    }

    fn dispatch_message(&self, message: Message, ctx: &mut Context) {
        ctx.metrics.inc_messages_dispatched();
        let sinks = ctx.router.matching_sinks(&message);
        let multicast = ctx.delegates.message.clone();
        let metrics = Arc::clone(ctx.metrics);

        let invoke = move || {
            for sink in &sinks {
                if std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| sink(&message)))
                    .is_err()
                {
                    log::error!("session: Per-filter message sink panicked");
                    metrics.inc_callback_panics(1);
                }
            }
            let panics = multicast.broadcast(&message);
            metrics.inc_callback_panics(panics);
        };

        if let Some(executor) = ctx.executor {
            executor(Box::new(invoke));
        } else {
            invoke();
        }
    }

    fn on_publish_ack(&mut self, packet_id: PacketId, phase: FlightPhase, ctx: &mut Context) {
        if let Some(sink) = ctx.tracker.complete_ack(packet_id, phase) {
            match sink {
                EntrySink::Unit(sink) => sink.complete_ok(()),
                EntrySink::None => {}
                other => {
                    log::error!("session: Publish ack bound to non-publish sink");
                    other.fail(&Error::new(ErrorKind::ProtocolViolation, "Mismatched ack"));
                }
            }
            ctx.broadcast(&ctx.delegates.publish_ack, PublishAckEvent { packet_id });
        }
        self.ensure_retry_timer(ctx);
    }

    fn on_publish_received(&mut self, packet_id: PacketId, ctx: &mut Context) {
        let release = PublishReleasePacket::new(packet_id);
        let mut pubrel_bytes = Vec::new();
        if let Err(err) = release.encode::<V>(&mut pubrel_bytes) {
            log::error!("session: Failed to encode PUBREL: {err:?}");
            return;
        }
        if let Some(bytes) =
            ctx.tracker
                .on_publish_received(packet_id, pubrel_bytes, Instant::now())
        {
            if let Err(err) = self.send_bytes(ctx, &bytes) {
                log::warn!("session: Failed to send PUBREL: {err}");
            }
        } else {
            log::warn!("session: PUBREC for unknown packet {packet_id}");
        }
        self.ensure_retry_timer(ctx);
    }

    fn on_publish_release(&mut self, packet_id: PacketId, ctx: &mut Context) {
        if !ctx.tracker.release_inbound(packet_id) {
            log::warn!("session: PUBREL for unknown packet {packet_id}");
        }
        let complete = PublishCompletePacket::new(packet_id);
        if let Err(err) = self.send_packet(ctx, &complete) {
            log::warn!("session: Failed to send PUBCOMP: {err}");
        }
    }

    fn on_subscribe_ack(&mut self, packet: &codec::SubscribeAckPacket, ctx: &mut Context) {
        let Some(sink) = ctx
            .tracker
            .complete_ack(packet.packet_id(), FlightPhase::AwaitingAck)
        else {
            return;
        };
        let EntrySink::Subscribe(sink, filters) = sink else {
            log::error!("session: SUBACK bound to non-subscribe sink");
            sink.fail(&Error::new(ErrorKind::ProtocolViolation, "Mismatched ack"));
            return;
        };

        if packet.acks().len() != filters.len() {
            log::warn!(
                "session: SUBACK carries {} results for {} filters",
                packet.acks().len(),
                filters.len()
            );
        }

        let mut results = Vec::with_capacity(filters.len());
        for (filter, ack) in filters.into_iter().zip(packet.acks().iter()) {
            match ack {
                SubscribeAck::GrantedQoS(qos) => {
                    results.push(SubscribeResult {
                        filter: filter.filter().to_string(),
                        granted_qos: Some(*qos),
                        code: *qos as u8,
                    });
                    ctx.router.install(filter, *qos);
                }
                SubscribeAck::Failed(code) => {
                    log::warn!(
                        "session: Subscription to {} failed with code {code:#04x}",
                        filter.filter()
                    );
                    results.push(SubscribeResult {
                        filter: filter.filter().to_string(),
                        granted_qos: None,
                        code: *code,
                    });
                }
            }
        }

        sink.complete_ok(results.clone());
        ctx.broadcast(&ctx.delegates.subscribe_ack, SubscribeAckEvent { results });
        self.ensure_retry_timer(ctx);
    }

    fn on_unsubscribe_ack(&mut self, packet: &codec::UnsubscribeAckPacket, ctx: &mut Context) {
        let Some(sink) = ctx
            .tracker
            .complete_ack(packet.packet_id(), FlightPhase::AwaitingAck)
        else {
            return;
        };
        let EntrySink::Unsubscribe(sink, topics) = sink else {
            log::error!("session: UNSUBACK bound to non-unsubscribe sink");
            sink.fail(&Error::new(ErrorKind::ProtocolViolation, "Mismatched ack"));
            return;
        };

        let mut results = Vec::with_capacity(topics.len());
        for (index, topic) in topics.into_iter().enumerate() {
            let code = packet.codes().get(index).copied();
            let accepted = match code {
                Some(code) => code.is_success(),
                // MQTT 3.1.1 has no per-filter result; UNSUBACK implies
                // acceptance.
                None => true,
            };
            if accepted {
                ctx.router.remove(&topic);
            }
            results.push(UnsubscribeResult {
                filter: topic,
                code: code.map_or(0, |code| code as u8),
                accepted,
            });
        }

        sink.complete_ok(results.clone());
        ctx.broadcast(
            &ctx.delegates.unsubscribe_ack,
            UnsubscribeAckEvent { results },
        );
        self.ensure_retry_timer(ctx);
    }

    fn on_auth(&mut self, packet: &AuthPacket, ctx: &mut Context) {
        if packet.reason_code() != ReasonCode::ContinueAuthentication {
            log::info!("session: AUTH with reason {:?}", packet.reason_code());
            return;
        }
        let provider = Arc::clone(self.options.credentials());
        let server_data = packet
            .properties()
            .authentication_data()
            .map(<[u8]>::to_vec)
            .unwrap_or_default();
        let Some(client_data) = provider.on_auth_challenge(&server_data) else {
            self.session_lost(
                Error::new(
                    ErrorKind::ProtocolViolation,
                    "Unanswered authentication challenge",
                ),
                ctx,
            );
            return;
        };

        let mut response = AuthPacket::new();
        response.set_reason_code(ReasonCode::ContinueAuthentication);
        let mut ok = true;
        if let Some(method) = provider.auth_method() {
            match StringData::from(&method) {
                Ok(method) => {
                    response
                        .properties_mut()
                        .push(Property::AuthenticationMethod(method));
                }
                Err(err) => {
                    log::error!("session: Invalid auth method: {err:?}");
                    ok = false;
                }
            }
        }
        match BinaryData::from_slice(&client_data) {
            Ok(data) => {
                response
                    .properties_mut()
                    .push(Property::AuthenticationData(data));
            }
            Err(err) => {
                log::error!("session: Invalid auth data: {err:?}");
                ok = false;
            }
        }
        if ok {
            if let Err(err) = self.send_packet(ctx, &response) {
                log::warn!("session: Failed to send AUTH response: {err}");
            }
        }
    }

    // ------------------------------------------------------------------
    // Timers
    // ------------------------------------------------------------------

    pub fn handle_timer(&mut self, kind: TimerKind, ctx: &mut Context) {
        match kind {
            TimerKind::HandshakeTimeout => {
                if self.phase == SessionPhase::Connecting
                    || self.phase == SessionPhase::Handshaking
                {
                    self.session_lost(
                        Error::new(ErrorKind::HandshakeTimedOut, "No CONNACK from broker"),
                        ctx,
                    );
                }
            }
            TimerKind::KeepAlive => self.on_keep_alive_timer(ctx),
            TimerKind::PingTimeout => {
                if self.phase == SessionPhase::Ready && self.ping_outstanding {
                    self.session_lost(
                        Error::new(ErrorKind::KeepAliveLost, "No PINGRESP from broker"),
                        ctx,
                    );
                }
            }
            TimerKind::Reconnect => self.on_reconnect_timer(ctx),
            TimerKind::RetryScan => self.on_retry_scan(ctx),
        }
    }

    fn on_keep_alive_timer(&mut self, ctx: &mut Context) {
        if self.phase != SessionPhase::Ready || self.keep_alive.is_zero() {
            return;
        }
        let now = Instant::now();
        let due = self.last_send + self.keep_alive;
        if now >= due {
            // The client MUST send a PINGREQ if no other packet went out
            // within one keep alive interval [MQTT-3.1.2-23]. While one is
            // outstanding its loss deadline stays armed.
            if !self.ping_outstanding {
                let packet = PingRequestPacket::new();
                if let Err(err) = self.send_packet(ctx, &packet) {
                    log::warn!("session: Failed to send PINGREQ: {err}");
                } else {
                    self.ping_outstanding = true;
                    let deadline = now + self.keep_alive.mul_f64(1.5);
                    self.replace_timer(
                        ctx,
                        TimerSlot::Ping,
                        Some((TimerKind::PingTimeout, deadline)),
                    );
                }
            }
            let next = now + self.keep_alive;
            self.replace_timer(ctx, TimerSlot::KeepAlive, Some((TimerKind::KeepAlive, next)));
        } else {
            // Outbound traffic happened in the window; check again when the
            // quiet period would expire.
            self.replace_timer(ctx, TimerSlot::KeepAlive, Some((TimerKind::KeepAlive, due)));
        }
    }

    fn on_reconnect_timer(&mut self, ctx: &mut Context) {
        if self.phase != SessionPhase::Reconnecting {
            return;
        }
        self.reconnect_backoff = self
            .reconnect_backoff
            .mul_f64(self.options.reconnect_multiplier())
            .min(self.options.reconnect_delay_cap());
        ctx.metrics.inc_reconnects();
        log::info!(
            "session: Reconnect attempt {}, next backoff {:?}",
            self.connection_retries,
            self.reconnect_backoff
        );
        self.start_connect(ctx);
    }

    fn on_retry_scan(&mut self, ctx: &mut Context) {
        self.retry_timer = None;
        if self.phase != SessionPhase::Ready {
            return;
        }
        let scan = ctx.tracker.retry_scan(Instant::now());
        for bytes in scan.resend {
            ctx.metrics.inc_retransmissions();
            if let Err(err) = self.send_bytes(ctx, &bytes) {
                log::warn!("session: Retransmission failed: {err}");
            }
        }
        let exhausted = !scan.exhausted.is_empty();
        for sink in scan.exhausted {
            sink.fail(&Error::new(
                ErrorKind::RetriesExhausted,
                "No acknowledgement after all retries",
            ));
        }
        if exhausted && self.options.strict_mode() {
            self.session_lost(
                Error::new(ErrorKind::RetriesExhausted, "Packet retries exhausted"),
                ctx,
            );
            return;
        }
        self.ensure_retry_timer(ctx);
    }

    // ------------------------------------------------------------------
    // Session loss
    // ------------------------------------------------------------------

    /// Whether in-flight state may survive until the next CONNACK decides.
    fn may_resume(&self) -> bool {
        if !self.options.auto_reconnect() {
            return false;
        }
        if V::HAS_PROPERTIES {
            self.options.session_expiry_interval() > 0
        } else {
            !self.clean_session
        }
    }

    fn session_lost(&mut self, error: Error, ctx: &mut Context) {
        log::warn!("session: Session lost: {error}");
        // A failed attempt inside the reconnect cycle is not a new loss;
        // listeners were already told.
        let report = self.phase != SessionPhase::Reconnecting;
        self.cancel_all_timers(ctx);
        ctx.connected_flag.store(false, Ordering::Release);
        ctx.transport.close(0, "session lost");
        self.ping_outstanding = false;

        if let Some(sink) = self.connect_sink.take() {
            sink.complete_err(error.clone());
        }
        if let Some(sink) = self.disconnect_sink.take() {
            sink.complete_ok(());
        }

        let reconnecting = self.options.auto_reconnect()
            && self.connection_retries < self.options.max_connection_retries();

        if !(reconnecting && self.may_resume()) {
            let lost = Error::from_string(ErrorKind::SessionLost, error.to_string());
            for sink in ctx.tracker.abort_all() {
                sink.fail(&lost);
            }
            ctx.router.clear();
        }

        if reconnecting {
            self.connection_retries += 1;
            self.phase = SessionPhase::Reconnecting;
            let deadline = Instant::now() + self.reconnect_backoff;
            self.replace_timer(ctx, TimerSlot::Reconnect, Some((TimerKind::Reconnect, deadline)));
        } else {
            self.phase = SessionPhase::Disconnected;
        }

        if report {
            ctx.broadcast(
                &ctx.delegates.disconnect,
                DisconnectEvent {
                    reason: Some(error),
                    reconnecting,
                },
            );
        }
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn send_packet<P: EncodePacket>(&mut self, ctx: &mut Context, packet: &P) -> Result<(), Error> {
        let mut buf = Vec::new();
        packet.encode::<V>(&mut buf)?;
        self.send_bytes(ctx, &buf)
    }

    fn send_bytes(&mut self, ctx: &mut Context, bytes: &[u8]) -> Result<(), Error> {
        ctx.transport.send(bytes)?;
        ctx.metrics.add_bytes_sent(bytes.len() as u64);
        self.last_send = Instant::now();
        Ok(())
    }

    fn ensure_retry_timer(&mut self, ctx: &mut Context) {
        let Some(deadline) = ctx.tracker.next_deadline() else {
            self.replace_timer(ctx, TimerSlot::Retry, None);
            return;
        };
        self.replace_timer(ctx, TimerSlot::Retry, Some((TimerKind::RetryScan, deadline)));
    }

    fn replace_timer(
        &mut self,
        ctx: &mut Context,
        slot: TimerSlot,
        next: Option<(TimerKind, Instant)>,
    ) {
        let slot = match slot {
            TimerSlot::Handshake => &mut self.handshake_timer,
            TimerSlot::KeepAlive => &mut self.keep_alive_timer,
            TimerSlot::Ping => &mut self.ping_timer,
            TimerSlot::Reconnect => &mut self.reconnect_timer,
            TimerSlot::Retry => &mut self.retry_timer,
        };
        if let Some(timer_id) = slot.take() {
            ctx.timers.cancel(timer_id);
        }
        if let Some((kind, deadline)) = next {
            *slot = Some(ctx.timers.schedule(kind, deadline));
        }
    }

    fn cancel_all_timers(&mut self, ctx: &mut Context) {
        for slot in [
            TimerSlot::Handshake,
            TimerSlot::KeepAlive,
            TimerSlot::Ping,
            TimerSlot::Reconnect,
            TimerSlot::Retry,
        ] {
            self.replace_timer(ctx, slot, None);
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum TimerSlot {
    Handshake,
    KeepAlive,
    Ping,
    Reconnect,
    Retry,
}

fn new_publish_packet(message: &Message, packet_id: PacketId) -> Result<PublishPacket, Error> {
    let mut packet = PublishPacket::new(message.topic(), message.qos(), message.payload())?;
    packet.set_retain(message.retain());
    if message.qos() != QoS::AtMostOnce {
        packet.set_packet_id(packet_id);
    }
    Ok(packet)
}

// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Single-threaded cooperative reactor.
//!
//! Owns the command queue, the timer service, the transport, the in-flight
//! tracker, the subscription router and the session state machine. One
//! [`Reactor::tick`] performs, in order: inbound dispatch, timers, command
//! drain, socket I/O, outbound flush. Every sub-step makes bounded progress.

use codec::{ProtocolLevel, V311, V5};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Instant;

use crate::commands::CommandQueue;
use crate::connect_options::ConnectOptions;
use crate::events::ClientDelegates;
use crate::inflight::InFlightTracker;
use crate::metrics::Metrics;
use crate::router::Router;
use crate::session::{Context, Directive, Session, SessionPhase};
use crate::socket::{Transport, TransportEvent};
use crate::timer::TimerQueue;

/// The session instantiated at the negotiated protocol version.
enum SessionKind {
    V311(Session<V311>),
    V5(Session<V5>),
}

impl SessionKind {
    fn new(options: &Arc<ConnectOptions>, level: ProtocolLevel, can_fallback: bool) -> Self {
        match level {
            ProtocolLevel::V311 => Self::V311(Session::new(Arc::clone(options), can_fallback)),
            ProtocolLevel::V5 => Self::V5(Session::new(Arc::clone(options), can_fallback)),
        }
    }

    fn level(&self) -> ProtocolLevel {
        match self {
            Self::V311(_) => ProtocolLevel::V311,
            Self::V5(_) => ProtocolLevel::V5,
        }
    }
}

/// Builds the borrow context and dispatches one session call on whichever
/// version is active.
macro_rules! with_session {
    ($self:ident, |$session:ident, $ctx:ident| $body:expr) => {{
        let mut $ctx = Context {
            transport: &mut *$self.transport,
            tracker: &mut $self.tracker,
            router: &mut $self.router,
            timers: &mut $self.timers,
            delegates: &$self.delegates,
            metrics: &$self.metrics,
            connected_flag: &$self.connected,
            executor: $self.executor.as_ref(),
        };
        match &mut $self.session {
            SessionKind::V311($session) => $body,
            SessionKind::V5($session) => $body,
        }
    }};
}

pub(crate) struct Reactor {
    options: Arc<ConnectOptions>,
    queue: Arc<CommandQueue>,
    timers: TimerQueue,
    transport: Box<dyn Transport>,
    tracker: InFlightTracker,
    router: Router,
    session: SessionKind,
    delegates: ClientDelegates,
    metrics: Arc<Metrics>,
    connected: Arc<AtomicBool>,
    executor: Option<crate::connect_options::CallbackExecutor>,

    /// The version fallback redial may happen once per client.
    fallback_done: bool,
}

impl Reactor {
    pub fn new(
        options: Arc<ConnectOptions>,
        transport: Box<dyn Transport>,
        queue: Arc<CommandQueue>,
        delegates: ClientDelegates,
        metrics: Arc<Metrics>,
        connected: Arc<AtomicBool>,
    ) -> Self {
        let can_fallback = options.allow_version_fallback();
        let session = SessionKind::new(&options, options.protocol_level(), can_fallback);
        let tracker = InFlightTracker::new(&options);
        let executor = options.callback_executor().cloned();
        Self {
            options,
            queue,
            timers: TimerQueue::new(),
            transport,
            tracker,
            router: Router::new(),
            session,
            delegates,
            metrics,
            connected,
            executor,
            fallback_done: false,
        }
    }

    /// One scheduler round. Called from exactly one driver thread.
    pub fn tick(&mut self) {
        self.drain_inbound();
        self.fire_timers();
        self.drain_commands();
        self.transport.tick();
        self.transport.flush();
    }

    /// Step 1: dispatch parsed packets and connection events from the
    /// transport, bounded per tick.
    fn drain_inbound(&mut self) {
        let mut budget = self.options.max_inbound_packets_per_tick();
        while budget > 0 {
            let Some(event) = self.transport.poll_event() else {
                return;
            };
            match event {
                TransportEvent::Packet(bytes) => {
                    budget -= 1;
                    let directive =
                        with_session!(self, |session, ctx| session.handle_packet(&bytes, &mut ctx));
                    if directive == Directive::FallbackRedial {
                        self.fallback_redial();
                    }
                }
                event => {
                    with_session!(self, |session, ctx| session
                        .handle_transport_event(event, &mut ctx));
                }
            }
        }
    }

    /// Step 2: pop every timer whose deadline passed.
    fn fire_timers(&mut self) {
        let now = Instant::now();
        while let Some((_id, kind)) = self.timers.pop_ready(now) {
            with_session!(self, |session, ctx| session.handle_timer(kind, &mut ctx));
        }
    }

    /// Step 3: drain queued commands. A deferred command goes back to the
    /// queue front and stops the drain so ordering is preserved.
    fn drain_commands(&mut self) {
        let mut budget = self.queue.len();
        while budget > 0 {
            budget -= 1;
            let Some(command) = self.queue.pop() else {
                return;
            };
            let deferred =
                with_session!(self, |session, ctx| session.handle_command(command, &mut ctx));
            if let Some(command) = deferred {
                log::debug!("reactor: Deferring {} command", command.name());
                self.queue.push_front(command);
                return;
            }
        }
    }

    /// Swap the session to the other protocol version and redial, carrying
    /// the pending connect completion over.
    fn fallback_redial(&mut self) {
        if self.fallback_done {
            log::error!("reactor: Version fallback requested twice");
            return;
        }
        self.fallback_done = true;

        let (sink, clean_session) = match &mut self.session {
            SessionKind::V311(session) => (session.take_connect_sink(), session.clean_session()),
            SessionKind::V5(session) => (session.take_connect_sink(), session.clean_session()),
        };
        // Events still queued belong to the connection that was just closed.
        while self.transport.poll_event().is_some() {
            log::debug!("reactor: Discarding stale transport event during redial");
        }
        let level = self.session.level().fallback();
        log::info!("reactor: Redialing with protocol version {level}");
        self.session = SessionKind::new(&self.options, level, false);
        with_session!(self, |session, ctx| session.connect_with_sink(
            clean_session,
            sink,
            &mut ctx
        ));
    }

    /// Current lifecycle phase, for logging and tests.
    #[allow(dead_code)]
    pub fn phase(&self) -> SessionPhase {
        match &self.session {
            SessionKind::V311(session) => session.phase(),
            SessionKind::V5(session) => session.phase(),
        }
    }
}

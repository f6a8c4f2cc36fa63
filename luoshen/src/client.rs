// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Public client facade.
//!
//! Commands can be submitted from any thread; the reactor runs on exactly
//! one driver thread. Drive it yourself by calling [`Client::tick`] in a
//! loop, or let the client own a background driver thread with
//! [`Client::start`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crate::commands::{Command, CommandQueue};
use crate::completion::{completion_pair, CompletionHandle};
use crate::connect_options::ConnectOptions;
use crate::delegate::Multicast;
use crate::error::{Error, ErrorKind};
use crate::events::{
    ClientDelegates, ConnectEvent, DisconnectEvent, PublishAckEvent, SubscribeAckEvent,
    UnsubscribeAckEvent,
};
use crate::message::{Message, SubscribeResult, TopicFilter, UnsubscribeResult};
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::reactor::Reactor;
use crate::socket::{NetTransport, Transport};

/// MQTT client over one broker connection.
pub struct Client {
    options: Arc<ConnectOptions>,
    queue: Arc<CommandQueue>,
    connected: Arc<AtomicBool>,
    delegates: ClientDelegates,
    metrics: Arc<Metrics>,
    reactor: Arc<Mutex<Reactor>>,
    driver: Mutex<Option<JoinHandle<()>>>,
    stop: Arc<AtomicBool>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("options", &self.options)
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Create a client with the production transport backends.
    #[must_use]
    pub fn new(options: ConnectOptions) -> Self {
        let options = Arc::new(options);
        let transport = Box::new(NetTransport::new(Arc::clone(&options)));
        Self::with_boxed_transport(options, transport)
    }

    /// Create a client over a caller supplied transport. Used by tests and
    /// alternative socket backends.
    #[must_use]
    pub fn with_transport(options: ConnectOptions, transport: Box<dyn Transport>) -> Self {
        Self::with_boxed_transport(Arc::new(options), transport)
    }

    fn with_boxed_transport(options: Arc<ConnectOptions>, transport: Box<dyn Transport>) -> Self {
        let queue = Arc::new(CommandQueue::new(options.max_pending_commands()));
        let connected = Arc::new(AtomicBool::new(false));
        let delegates = ClientDelegates::new();
        let metrics = Arc::new(Metrics::new());
        let reactor = Reactor::new(
            Arc::clone(&options),
            transport,
            Arc::clone(&queue),
            delegates.clone(),
            Arc::clone(&metrics),
            Arc::clone(&connected),
        );
        Self {
            options,
            queue,
            connected,
            delegates,
            metrics,
            reactor: Arc::new(Mutex::new(reactor)),
            driver: Mutex::new(None),
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    fn submit(&self, command: Command) {
        if let Err(command) = self.queue.push(command) {
            let error = Error::new(ErrorKind::QueueFull, "Command queue is full");
            fail_command(command, &error);
        }
    }

    /// Establish the MQTT connection.
    #[must_use]
    pub fn connect(&self, clean_session: bool) -> CompletionHandle<()> {
        let (sink, handle) = completion_pair();
        self.submit(Command::Connect {
            clean_session,
            sink,
        });
        handle
    }

    /// Shut the session down with a DISCONNECT packet.
    #[must_use]
    pub fn disconnect(&self) -> CompletionHandle<()> {
        let (sink, handle) = completion_pair();
        self.submit(Command::Disconnect { sink });
        handle
    }

    /// Publish one message with its QoS delivery guarantee.
    #[must_use]
    pub fn publish(&self, message: Message) -> CompletionHandle<()> {
        let (sink, handle) = completion_pair();
        self.submit(Command::Publish { message, sink });
        handle
    }

    /// Create subscriptions for `filters`, settling with per-filter
    /// results.
    #[must_use]
    pub fn subscribe(&self, filters: Vec<TopicFilter>) -> CompletionHandle<Vec<SubscribeResult>> {
        let (sink, handle) = completion_pair();
        self.submit(Command::Subscribe { filters, sink });
        handle
    }

    /// Create one subscription.
    #[must_use]
    pub fn subscribe_filter(&self, filter: TopicFilter) -> CompletionHandle<Vec<SubscribeResult>> {
        self.subscribe(vec![filter])
    }

    /// Remove subscriptions, settling with per-filter results.
    #[must_use]
    pub fn unsubscribe(&self, topics: Vec<String>) -> CompletionHandle<Vec<UnsubscribeResult>> {
        let (sink, handle) = completion_pair();
        self.submit(Command::Unsubscribe { topics, sink });
        handle
    }

    /// Drop the transport without the MQTT shutdown handshake.
    pub fn close_socket(&self, code: i32, reason: &str) {
        self.submit(Command::CloseSocket {
            code,
            reason: reason.to_string(),
        });
    }

    /// Whether the session currently is in the Ready state. Callable from
    /// any thread.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Run one reactor round on the calling thread.
    ///
    /// Use this for driver-controlled ticking; do not mix with
    /// [`Client::start`].
    pub fn tick(&self) {
        self.reactor.lock().unwrap().tick();
    }

    /// Spawn the library-owned driver thread, ticking at the configured
    /// interval.
    pub fn start(&self) {
        let mut driver = self.driver.lock().unwrap();
        if driver.is_some() {
            return;
        }
        self.stop.store(false, Ordering::Release);

        let reactor = Arc::clone(&self.reactor);
        let stop = Arc::clone(&self.stop);
        let interval = self.options.tick_interval();
        let spawned = std::thread::Builder::new()
            .name("luoshen-reactor".to_string())
            .spawn(move || {
                while !stop.load(Ordering::Acquire) {
                    reactor.lock().unwrap().tick();
                    std::thread::sleep(interval);
                }
            });
        match spawned {
            Ok(handle) => *driver = Some(handle),
            Err(err) => log::error!("client: Failed to spawn driver thread: {err}"),
        }
    }

    /// Stop the driver thread started with [`Client::start`].
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
        let handle = self.driver.lock().unwrap().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                log::error!("client: Driver thread panicked");
            }
        }
    }

    /// Connection lifecycle events.
    #[must_use]
    pub fn on_connect(&self) -> &Multicast<ConnectEvent> {
        &self.delegates.connect
    }

    #[must_use]
    pub fn on_disconnect(&self) -> &Multicast<DisconnectEvent> {
        &self.delegates.disconnect
    }

    /// QoS 1/2 publish flow completions.
    #[must_use]
    pub fn on_publish_ack(&self) -> &Multicast<PublishAckEvent> {
        &self.delegates.publish_ack
    }

    #[must_use]
    pub fn on_subscribe_ack(&self) -> &Multicast<SubscribeAckEvent> {
        &self.delegates.subscribe_ack
    }

    #[must_use]
    pub fn on_unsubscribe_ack(&self) -> &Multicast<UnsubscribeAckEvent> {
        &self.delegates.unsubscribe_ack
    }

    /// Inbound application messages.
    #[must_use]
    pub fn on_message(&self) -> &Multicast<Message> {
        &self.delegates.message
    }

    /// Copy of the engine counters.
    #[must_use]
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Connection options this client was built with.
    #[must_use]
    pub fn options(&self) -> &ConnectOptions {
        &self.options
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Settle the completion of a command rejected before reaching the reactor.
fn fail_command(command: Command, error: &Error) {
    match command {
        Command::Connect { sink, .. } => sink.complete_err(error.clone()),
        Command::Disconnect { sink } => sink.complete_err(error.clone()),
        Command::Publish { sink, .. } => sink.complete_err(error.clone()),
        Command::Subscribe { sink, .. } => sink.complete_err(error.clone()),
        Command::Unsubscribe { sink, .. } => sink.complete_err(error.clone()),
        Command::CloseSocket { .. } => {}
    }
}

// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use chrono::{DateTime, Utc};
use codec::{PubTopic, QoS, RetainHandling, SubTopic, SubscribeTopic};
use std::fmt;
use std::sync::Arc;

use crate::error::{Error, ErrorKind};

/// Per-filter message callback installed by a subscribe call.
pub type MessageSink = Arc<dyn Fn(&Message) + Send + Sync>;

/// One application message, immutable after construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    topic: PubTopic,
    payload: Vec<u8>,
    qos: QoS,
    retain: bool,
    created_at: DateTime<Utc>,
}

impl Message {
    /// Create a new message.
    ///
    /// # Errors
    ///
    /// Returns error if `topic` is not a valid topic name.
    pub fn new(topic: &str, qos: QoS, payload: &[u8]) -> Result<Self, Error> {
        let topic = PubTopic::new(topic)
            .map_err(|err| Error::from_string(ErrorKind::ConfigInvalid, format!("{err:?}")))?;
        Ok(Self {
            topic,
            payload: payload.to_vec(),
            qos,
            retain: false,
            created_at: Utc::now(),
        })
    }

    /// Create a message with the retain flag set.
    ///
    /// # Errors
    ///
    /// Returns error if `topic` is not a valid topic name.
    pub fn with_retain(topic: &str, qos: QoS, payload: &[u8]) -> Result<Self, Error> {
        let mut msg = Self::new(topic, qos, payload)?;
        msg.retain = true;
        Ok(msg)
    }

    pub(crate) fn from_wire(
        topic: PubTopic,
        qos: QoS,
        retain: bool,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            topic,
            payload,
            qos,
            retain,
            created_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn topic(&self) -> &str {
        self.topic.as_ref()
    }

    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    #[must_use]
    pub const fn qos(&self) -> QoS {
        self.qos
    }

    #[must_use]
    pub const fn retain(&self) -> bool {
        self.retain
    }

    /// UTC timestamp taken when this message object was constructed.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// One topic filter of a subscribe command, with its subscription options
/// and an optional per-filter message sink.
#[derive(Clone)]
pub struct TopicFilter {
    filter: SubTopic,
    qos: QoS,
    no_local: bool,
    retain_as_published: bool,
    retain_handling: RetainHandling,
    sink: Option<MessageSink>,
}

impl fmt::Debug for TopicFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TopicFilter")
            .field("filter", &self.filter)
            .field("qos", &self.qos)
            .field("no_local", &self.no_local)
            .field("retain_as_published", &self.retain_as_published)
            .field("retain_handling", &self.retain_handling)
            .field("has_sink", &self.sink.is_some())
            .finish()
    }
}

impl TopicFilter {
    /// Create a new topic filter with requested `qos`.
    ///
    /// # Errors
    ///
    /// Returns error if `filter` is not a valid topic filter.
    pub fn new(filter: &str, qos: QoS) -> Result<Self, Error> {
        let filter = SubTopic::parse(filter)
            .map_err(|err| Error::from_string(ErrorKind::ConfigInvalid, format!("{err:?}")))?;
        Ok(Self {
            filter,
            qos,
            no_local: false,
            retain_as_published: false,
            retain_handling: RetainHandling::default(),
            sink: None,
        })
    }

    /// Install a callback invoked for every message matching this filter.
    #[must_use]
    pub fn with_sink<F>(mut self, sink: F) -> Self
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        self.sink = Some(Arc::new(sink));
        self
    }

    /// Set the MQTT 5 no-local option.
    #[must_use]
    pub const fn with_no_local(mut self, no_local: bool) -> Self {
        self.no_local = no_local;
        self
    }

    /// Set the MQTT 5 retain-as-published option.
    #[must_use]
    pub const fn with_retain_as_published(mut self, retain_as_published: bool) -> Self {
        self.retain_as_published = retain_as_published;
        self
    }

    /// Set the MQTT 5 retain handling mode.
    #[must_use]
    pub const fn with_retain_handling(mut self, retain_handling: RetainHandling) -> Self {
        self.retain_handling = retain_handling;
        self
    }

    #[must_use]
    pub fn filter(&self) -> &str {
        self.filter.as_ref()
    }

    #[must_use]
    pub const fn topic(&self) -> &SubTopic {
        &self.filter
    }

    #[must_use]
    pub const fn qos(&self) -> QoS {
        self.qos
    }

    #[must_use]
    pub const fn no_local(&self) -> bool {
        self.no_local
    }

    #[must_use]
    pub const fn retain_handling(&self) -> RetainHandling {
        self.retain_handling
    }

    #[must_use]
    pub(crate) fn sink(&self) -> Option<&MessageSink> {
        self.sink.as_ref()
    }

    pub(crate) fn to_subscribe_topic(&self) -> SubscribeTopic {
        let mut topic = SubscribeTopic::with_topic(self.filter.clone(), self.qos);
        topic
            .set_no_local(self.no_local)
            .set_retain_as_published(self.retain_as_published)
            .set_retain_handling(self.retain_handling);
        topic
    }
}

/// Outcome of one filter in a subscribe command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeResult {
    /// The filter string this result belongs to.
    pub filter: String,

    /// QoS granted by the broker, if the subscription was accepted.
    pub granted_qos: Option<QoS>,

    /// Raw ack byte from the broker.
    pub code: u8,
}

impl SubscribeResult {
    /// Returns true if the broker accepted the subscription.
    #[must_use]
    pub const fn is_granted(&self) -> bool {
        self.granted_qos.is_some()
    }
}

/// Outcome of one filter in an unsubscribe command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsubscribeResult {
    /// The filter string this result belongs to.
    pub filter: String,

    /// Raw reason code byte, zero in MQTT 3.1.1.
    pub code: u8,

    /// Whether the broker processed the unsubscribe.
    pub accepted: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_new() {
        let msg = Message::new("a/b", QoS::AtLeastOnce, b"hello").unwrap();
        assert_eq!(msg.topic(), "a/b");
        assert_eq!(msg.payload(), b"hello");
        assert!(!msg.retain());

        assert!(Message::new("a/+", QoS::AtMostOnce, b"").is_err());
    }

    #[test]
    fn test_topic_filter() {
        let filter = TopicFilter::new("home/+/temp", QoS::AtLeastOnce)
            .unwrap()
            .with_no_local(true);
        assert_eq!(filter.filter(), "home/+/temp");
        let topic = filter.to_subscribe_topic();
        assert!(topic.no_local());
        assert_eq!(topic.qos(), QoS::AtLeastOnce);
    }
}

// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Subscription router: matches inbound publishes against the active
//! topic filters and fans them out to per-filter sinks.

use codec::QoS;
use std::collections::HashMap;
use std::collections::VecDeque;

use crate::message::{Message, MessageSink, TopicFilter};

/// How many recently published topics are remembered for no-local
/// suppression.
const RECENT_LOCAL_TOPICS: usize = 32;

/// One active subscription.
#[derive(Debug, Clone)]
pub struct SubscriptionRecord {
    filter: TopicFilter,

    /// QoS granted by the broker, may be lower than requested.
    granted_qos: QoS,
}

impl SubscriptionRecord {
    #[must_use]
    pub fn filter(&self) -> &TopicFilter {
        &self.filter
    }

    #[must_use]
    pub const fn granted_qos(&self) -> QoS {
        self.granted_qos
    }
}

/// Set of active subscriptions keyed by exact filter string.
#[derive(Debug, Default)]
pub struct Router {
    records: HashMap<String, SubscriptionRecord>,

    /// Topics this client published recently, consulted by no-local
    /// subscriptions.
    recent_local: VecDeque<String>,
}

impl Router {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a granted subscription. Failed subscriptions are never
    /// installed.
    pub fn install(&mut self, filter: TopicFilter, granted_qos: QoS) {
        let key = filter.filter().to_string();
        self.records.insert(
            key,
            SubscriptionRecord {
                filter,
                granted_qos,
            },
        );
    }

    /// Remove the subscription for an exact filter string.
    pub fn remove(&mut self, filter: &str) -> bool {
        self.records.remove(filter).is_some()
    }

    /// Drop every record; used when the broker reports no session state.
    pub fn clear(&mut self) {
        self.records.clear();
        self.recent_local.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Get the record for an exact filter string.
    #[must_use]
    pub fn get(&self, filter: &str) -> Option<&SubscriptionRecord> {
        self.records.get(filter)
    }

    /// Remember that this client just published on `topic`.
    pub fn note_local_publish(&mut self, topic: &str) {
        if self.recent_local.iter().any(|t| t == topic) {
            return;
        }
        if self.recent_local.len() >= RECENT_LOCAL_TOPICS {
            self.recent_local.pop_front();
        }
        self.recent_local.push_back(topic.to_string());
    }

    /// Collect the per-filter sinks of every subscription matching
    /// `message`, each at most once per filter.
    ///
    /// No-local subscriptions are skipped for topics this client published
    /// itself. The caller invokes the sinks and the global message delegate.
    #[must_use]
    pub fn matching_sinks(&self, message: &Message) -> Vec<MessageSink> {
        let topic = message.topic();
        let local = self.recent_local.iter().any(|t| t == topic);

        let mut sinks = Vec::new();
        for record in self.records.values() {
            if !record.filter.topic().is_match(topic) {
                continue;
            }
            if record.filter.no_local() && local {
                log::debug!("router: Suppressing no-local delivery on {topic}");
                continue;
            }
            if let Some(sink) = record.filter.sink() {
                sinks.push(sink.clone());
            }
        }
        sinks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_install_and_remove() {
        let mut router = Router::new();
        let filter = TopicFilter::new("a/b", QoS::AtLeastOnce).unwrap();
        router.install(filter, QoS::AtLeastOnce);
        assert_eq!(router.len(), 1);
        assert_eq!(
            router.get("a/b").unwrap().granted_qos(),
            QoS::AtLeastOnce
        );
        assert!(router.remove("a/b"));
        assert!(!router.remove("a/b"));
    }

    #[test]
    fn test_wildcard_dispatch_exactly_once() {
        let mut router = Router::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);
        let filter = TopicFilter::new("home/+/temp", QoS::AtMostOnce)
            .unwrap()
            .with_sink(move |_msg| {
                c.fetch_add(1, Ordering::SeqCst);
            });
        router.install(filter, QoS::AtMostOnce);

        let message = Message::new("home/kitchen/temp", QoS::AtMostOnce, b"21").unwrap();
        let sinks = router.matching_sinks(&message);
        assert_eq!(sinks.len(), 1);
        for sink in &sinks {
            sink(&message);
        }
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        let message = Message::new("home/kitchen/living/temp", QoS::AtMostOnce, b"21").unwrap();
        assert!(router.matching_sinks(&message).is_empty());
    }

    #[test]
    fn test_no_local_suppression() {
        let mut router = Router::new();
        let filter = TopicFilter::new("chat/room", QoS::AtMostOnce)
            .unwrap()
            .with_no_local(true)
            .with_sink(|_msg| {});
        router.install(filter, QoS::AtMostOnce);

        router.note_local_publish("chat/room");
        let message = Message::new("chat/room", QoS::AtMostOnce, b"hi").unwrap();
        assert!(router.matching_sinks(&message).is_empty());
    }

    #[test]
    fn test_clear() {
        let mut router = Router::new();
        router.install(
            TopicFilter::new("a", QoS::AtMostOnce).unwrap(),
            QoS::AtMostOnce,
        );
        router.clear();
        assert!(router.is_empty());
    }
}

//! Topic management
//!
//! `SubscriptionRegistry` is the bidirectional topic <-> session index. A
//! `Topic` exists only while it has at least one subscriber; the last
//! unsubscribe (or session removal) drops it from the map immediately.
//!
//! Both directions live in `DashMap`s so operations on different topics or
//! sessions contend on different shards. No guard from one map is held while
//! touching the other.

use std::collections::HashSet;

use dashmap::DashMap;

pub type SessionId = String;

#[derive(Debug, Default)]
pub struct Topic {
    pub name: String,
    pub subscribers: HashSet<SessionId>,
}

impl Topic {
    /// Create a new topic with the given name.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            subscribers: HashSet::new(),
        }
    }

    /// Add a subscriber. Returns false if it was already subscribed.
    pub fn subscribe(&mut self, id: SessionId) -> bool {
        self.subscribers.insert(id)
    }

    /// Remove a subscriber. Returns false if it was not subscribed.
    pub fn unsubscribe(&mut self, id: &SessionId) -> bool {
        self.subscribers.remove(id)
    }
}

#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    topics: DashMap<String, Topic>,
    memberships: DashMap<SessionId, HashSet<String>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe `session` to `topic`. Idempotent; returns true only when the
    /// membership is new.
    pub fn subscribe(&self, session: &SessionId, topic: &str) -> bool {
        let added = self
            .topics
            .entry(topic.to_string())
            .or_insert_with(|| Topic::new(topic))
            .subscribe(session.clone());

        self.memberships
            .entry(session.clone())
            .or_default()
            .insert(topic.to_string());

        added
    }

    /// Unsubscribe `session` from `topic`. Idempotent; returns true only when
    /// a membership was removed.
    pub fn unsubscribe(&self, session: &SessionId, topic: &str) -> bool {
        let removed = match self.topics.get_mut(topic) {
            Some(mut t) => t.unsubscribe(session),
            None => false,
        };
        self.topics
            .remove_if(topic, |_, t| t.subscribers.is_empty());

        if let Some(mut topics) = self.memberships.get_mut(session) {
            topics.remove(topic);
        }
        self.memberships
            .remove_if(session, |_, topics| topics.is_empty());

        removed
    }

    /// Snapshot of the sessions subscribed to `topic` right now.
    pub fn subscribers_of(&self, topic: &str) -> Vec<SessionId> {
        self.topics
            .get(topic)
            .map(|t| t.subscribers.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn topics_of(&self, session: &SessionId) -> HashSet<String> {
        self.memberships
            .get(session)
            .map(|topics| topics.clone())
            .unwrap_or_default()
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .get(topic)
            .map(|t| t.subscribers.len())
            .unwrap_or(0)
    }

    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }

    /// Drop every membership held by `session`. Returns the topics it left.
    pub fn remove_session(&self, session: &SessionId) -> HashSet<String> {
        let topics = self
            .memberships
            .remove(session)
            .map(|(_, topics)| topics)
            .unwrap_or_default();

        for topic in &topics {
            if let Some(mut t) = self.topics.get_mut(topic) {
                t.unsubscribe(session);
            }
            self.topics
                .remove_if(topic, |_, t| t.subscribers.is_empty());
        }

        topics
    }
}

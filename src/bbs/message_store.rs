//! In-memory chat history shared by every connected station.
//!
//! The store keeps messages in arrival order behind a single mutex. Eviction is
//! delegated to a [`RetentionPolicy`] chosen from configuration:
//!
//! - [`CountBound`] keeps the newest `capacity` messages (a capacity of 0 keeps none).
//! - [`AgeBound`] keeps every message younger than the retention window.
//!
//! Eviction runs inside the same critical section as the append, so a reader never
//! observes the store past its bound. [`MessageStore::recent`] returns an owned snapshot.
use chrono::{DateTime, Local, Utc};
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Mutex, MutexGuard};

/// One chat line as posted by a station.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub sender: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn new(sender: impl Into<String>, text: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            sender: sender.into(),
            text: text.into(),
            timestamp,
        }
    }
}

impl fmt::Display for Message {
    /// `[HH:MM] SENDER: text`, clock in the station's local time zone.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let local = self.timestamp.with_timezone(&Local);
        write!(f, "[{}] {}: {}", local.format("%H:%M"), self.sender, self.text)
    }
}

/// Eviction strategy applied on every write and read.
pub trait RetentionPolicy: Send + Sync + fmt::Debug {
    /// Drop whatever the policy no longer allows, given the current time.
    fn prune(&self, messages: &mut VecDeque<Message>, now: DateTime<Utc>);
}

/// Fixed-size ring: the oldest message falls out when a new one arrives at capacity.
#[derive(Debug, Clone, Copy)]
pub struct CountBound {
    capacity: usize,
}

impl CountBound {
    pub fn new(capacity: usize) -> Self {
        Self { capacity }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl RetentionPolicy for CountBound {
    fn prune(&self, messages: &mut VecDeque<Message>, _now: DateTime<Utc>) {
        while messages.len() > self.capacity {
            messages.pop_front();
        }
    }
}

/// Time window: anything at least `window` old is gone. No count limit.
#[derive(Debug, Clone, Copy)]
pub struct AgeBound {
    window: chrono::Duration,
}

impl AgeBound {
    pub fn new(window: chrono::Duration) -> Self {
        Self { window }
    }

    pub fn window(&self) -> chrono::Duration {
        self.window
    }
}

impl RetentionPolicy for AgeBound {
    fn prune(&self, messages: &mut VecDeque<Message>, now: DateTime<Utc>) {
        // A window reaching past the calendar range expires nothing.
        let Some(cutoff) = now.checked_sub_signed(self.window) else {
            return;
        };
        // Arrival order means timestamps are non-decreasing, except across wall-clock
        // steps; retain() keeps that case correct.
        messages.retain(|m| m.timestamp > cutoff);
    }
}

#[derive(Debug)]
pub struct MessageStore {
    messages: Mutex<VecDeque<Message>>,
    policy: Box<dyn RetentionPolicy>,
}

impl MessageStore {
    pub fn new(policy: impl RetentionPolicy + 'static) -> Self {
        Self {
            messages: Mutex::new(VecDeque::new()),
            policy: Box::new(policy),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Message>> {
        self.messages
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record a message stamped with the current time.
    pub fn add(&self, sender: &str, text: &str) -> Message {
        self.add_at(sender, text, Utc::now())
    }

    /// Record a message with an explicit timestamp.
    pub fn add_at(&self, sender: &str, text: &str, now: DateTime<Utc>) -> Message {
        let message = Message::new(sender, text, now);
        let mut guard = self.lock();
        guard.push_back(message.clone());
        self.policy.prune(&mut guard, now);
        message
    }

    /// Current history, oldest first.
    pub fn recent(&self) -> Vec<Message> {
        self.recent_at(Utc::now())
    }

    pub fn recent_at(&self, now: DateTime<Utc>) -> Vec<Message> {
        let mut guard = self.lock();
        self.policy.prune(&mut guard, now);
        guard.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

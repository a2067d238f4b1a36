//! Per-topic history and delivery
//!
//! A `Spreader` keeps the retained history of one topic (the latest Full and
//! every Diff accepted after it) together with the roster of subscribers and
//! the watermark each of them has reached.
//!
//! Invariants:
//! - history `ts` values are strictly increasing and start at a Full (unless a
//!   Diff arrived on a topic that has never seen a Full)
//! - a roster entry receives an accepted message only when its watermark is
//!   below the message `ts`, and the watermark then moves to that `ts`
//!
//! Concurrency note: a spreader is owned by the broker worker and never shared.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, trace};

use crate::broker::message::Message;
use crate::client::{Subscriber, SubscriberId};

struct RosterEntry {
    subscriber: Arc<dyn Subscriber>,
    watermark: i64,
    touched: Instant,
}

pub struct Spreader {
    pub uri: String,
    history: Vec<Message>,
    roster: HashMap<SubscriberId, RosterEntry>,
    last_activity: Instant,
}

impl Spreader {
    pub fn new(uri: &str) -> Self {
        Self {
            uri: uri.to_string(),
            history: Vec::new(),
            roster: HashMap::new(),
            last_activity: Instant::now(),
        }
    }

    /// Accepts `msg` into the history and fans it out to the roster.
    ///
    /// Returns `false` when the message is stale, i.e. its `ts` is not newer
    /// than the newest retained entry.
    pub fn publish(&mut self, msg: Message) -> bool {
        if let Some(last) = self.history.last() {
            if msg.ts <= last.ts {
                debug!(uri = %self.uri, ts = msg.ts, last = last.ts, "stale message dropped");
                return false;
            }
        }

        if msg.is_full() {
            self.history.clear();
        }

        let now = Instant::now();
        self.last_activity = now;
        for (id, entry) in self.roster.iter_mut() {
            if entry.watermark < msg.ts {
                trace!(uri = %self.uri, subscriber = %id, ts = msg.ts, "deliver");
                entry.subscriber.send(msg.clone());
                entry.watermark = msg.ts;
                entry.touched = now;
            }
        }

        self.history.push(msg);
        true
    }

    /// Registers (or re-registers) `subscriber` with the given offset and
    /// sends it the catch-up batch.
    pub fn subscribe(&mut self, subscriber: Arc<dyn Subscriber>, offset: i64) {
        let batch = self.catch_up(offset);
        let watermark = batch.last().map_or(offset, |m| m.ts);
        let now = Instant::now();
        self.last_activity = now;

        debug!(
            uri = %self.uri,
            subscriber = %subscriber.id(),
            offset,
            sent = batch.len(),
            "subscribed"
        );
        if !batch.is_empty() {
            subscriber.send_msgs(batch);
        }

        self.roster.insert(
            subscriber.id().to_string(),
            RosterEntry {
                subscriber,
                watermark,
                touched: now,
            },
        );
    }

    /// Messages a subscriber at `offset` needs to become consistent.
    fn catch_up(&self, offset: i64) -> Vec<Message> {
        let (Some(first), Some(last)) = (self.history.first(), self.history.last()) else {
            return Vec::new();
        };
        if offset < first.ts || offset > last.ts {
            return self.history.clone();
        }
        self.history
            .iter()
            .filter(|m| m.ts > offset)
            .cloned()
            .collect()
    }

    pub fn unsubscribe(&mut self, id: &str) -> bool {
        let removed = self.roster.remove(id).is_some();
        if removed {
            self.last_activity = Instant::now();
        }
        removed
    }

    pub fn roster_len(&self) -> usize {
        self.roster.len()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.roster.contains_key(id)
    }

    /// Watermark of the given subscriber, if it is on the roster.
    pub fn watermark(&self, id: &str) -> Option<i64> {
        self.roster.get(id).map(|e| e.watermark)
    }

    /// Time since the given subscriber last received something or subscribed.
    pub fn touched_for(&self, id: &str, now: Instant) -> Option<Duration> {
        self.roster
            .get(id)
            .map(|e| now.saturating_duration_since(e.touched))
    }

    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_activity)
    }

    /// A spreader is reclaimable once nobody listens and it has been idle for
    /// at least `threshold`.
    pub fn is_expired(&self, now: Instant, threshold: Duration) -> bool {
        self.roster.is_empty() && self.idle_for(now) >= threshold
    }

    pub fn replay(&self) -> Vec<Message> {
        self.history.clone()
    }
}

impl std::fmt::Debug for Spreader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Spreader")
            .field("uri", &self.uri)
            .field("history", &self.history.len())
            .field("roster", &self.roster.len())
            .finish()
    }
}

//! The channel registry (spec §4.C).

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;

use crate::channel::{ChannelStats, ChannelState, ReadersResult};
use crate::event::ReadCursorEvent;

/// Aggregate view returned by `GET /stats` (spec §4.E).
#[derive(Debug, Clone, Serialize)]
pub struct ServiceStats {
    pub channels_count: usize,
    pub channels: Vec<ChannelStats>,
}

/// Registry of per-channel state, keyed by channel id.
///
/// The registry lock is held only long enough to look up or lazily create a
/// channel entry; all the real work (`apply`, queries) happens against the
/// channel's own lock after the registry lock has been released, so
/// channels never contend with each other through this struct.
pub struct IndexService {
    channels: RwLock<HashMap<String, Arc<ChannelState>>>,
    window_size: i64,
}

impl IndexService {
    pub fn new(window_size: i64) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            window_size,
        }
    }

    fn channel_or_create(&self, channel_id: &str) -> Arc<ChannelState> {
        if let Some(existing) = self.channels.read().get(channel_id) {
            return existing.clone();
        }

        // Double-checked creation: re-verify under the writer lock before
        // inserting, in case another caller raced us to it.
        let mut channels = self.channels.write();
        channels
            .entry(channel_id.to_string())
            .or_insert_with(|| Arc::new(ChannelState::new(channel_id, self.window_size)))
            .clone()
    }

    fn lookup(&self, channel_id: &str) -> Option<Arc<ChannelState>> {
        self.channels.read().get(channel_id).cloned()
    }

    /// Route one event to its channel, creating the channel lazily on first
    /// sight. Infallible: any malformed cursor value is simply a no-op
    /// inside `ChannelState::apply`.
    pub fn handle_event(&self, event: &ReadCursorEvent) {
        let channel = self.channel_or_create(&event.channel_id);
        channel.apply(event);
    }

    /// Unknown channels produce empty results, not an error (spec §4.E).
    pub fn get_readers_for_seq(&self, channel_id: &str, seq: i64, limit: usize) -> ReadersResult {
        match self.lookup(channel_id) {
            Some(channel) => channel.readers_at(seq, limit),
            None => ReadersResult {
                count: 0,
                readers: Vec::new(),
                truncated: false,
            },
        }
    }

    pub fn get_read_counts(&self, channel_id: &str, seqs: &[i64]) -> HashMap<i64, u64> {
        match self.lookup(channel_id) {
            Some(channel) => channel.counts_at(seqs),
            None => seqs.iter().map(|&seq| (seq, 0)).collect(),
        }
    }

    pub fn get_stats(&self) -> ServiceStats {
        let channels = self.channels.read();
        ServiceStats {
            channels_count: channels.len(),
            channels: channels.values().map(|c| c.stats()).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(channel: &str, user: &str, new_last_seq: i64) -> ReadCursorEvent {
        ReadCursorEvent {
            event_type: "channel_read_advanced".to_string(),
            event_id: format!("{channel}-{user}-{new_last_seq}"),
            channel_id: channel.to_string(),
            user_id: user.to_string(),
            prev_last_seq: 0,
            new_last_seq,
            timestamp: 0,
        }
    }

    #[test]
    fn s6_unknown_channel_returns_empty_not_error() {
        let svc = IndexService::new(1000);
        let r = svc.get_readers_for_seq("missing", 1, 10);
        assert_eq!(r.count, 0);
        assert!(r.readers.is_empty());
        assert!(!r.truncated);

        let counts = svc.get_read_counts("missing", &[1, 2, 3]);
        assert_eq!(counts[&1], 0);
        assert_eq!(counts[&2], 0);
        assert_eq!(counts[&3], 0);
    }

    #[test]
    fn routes_events_to_distinct_channels() {
        let svc = IndexService::new(1000);
        svc.handle_event(&event("A", "U", 150));
        svc.handle_event(&event("B", "U", 50));

        assert_eq!(svc.get_readers_for_seq("A", 100, 10).count, 1);
        assert_eq!(svc.get_readers_for_seq("B", 100, 10).count, 0);
        assert_eq!(svc.get_readers_for_seq("B", 1, 10).count, 1);
    }

    #[test]
    fn stats_reports_all_known_channels() {
        let svc = IndexService::new(1000);
        svc.handle_event(&event("A", "U", 150));
        svc.handle_event(&event("B", "U", 50));

        let stats = svc.get_stats();
        assert_eq!(stats.channels_count, 2);
    }

    #[test]
    fn lazy_creation_is_idempotent_under_repeated_lookup() {
        let svc = IndexService::new(1000);
        svc.handle_event(&event("A", "U1", 10));
        let first = svc.channel_or_create("A");
        let second = svc.channel_or_create("A");
        assert!(Arc::ptr_eq(&first, &second));
    }
}

//! Per-channel read index state (spec §3, §4.B).

use std::collections::{HashMap, VecDeque};

use parking_lot::RwLock;
use roaring::RoaringBitmap;
use serde::Serialize;

use crate::event::ReadCursorEvent;
use crate::segment::{ReadSegment, SEGMENT_WIDTH};

/// Result of a single point query (spec §4.E `GET .../readers`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReadersResult {
    pub count: u64,
    pub readers: Vec<String>,
    pub truncated: bool,
}

/// Snapshot returned by `stats()` (spec §4.B, §4.E `GET /stats`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelStats {
    pub channel_id: String,
    pub max_seq: i64,
    pub users_count: usize,
    pub segments: usize,
}

struct Inner {
    max_seq: i64,
    user_cursors: HashMap<String, i64>,
    user_index: HashMap<String, u32>,
    index_to_user: Vec<String>,
    segments: VecDeque<ReadSegment>,
    window_size: i64,
}

/// All state for one observed channel, guarded by a single reader-writer
/// lock held for the duration of one `apply` (writer) or one query
/// (reader). Created lazily and lives for the process lifetime.
pub struct ChannelState {
    channel_id: String,
    inner: RwLock<Inner>,
}

impl ChannelState {
    pub fn new(channel_id: impl Into<String>, window_size: i64) -> Self {
        Self {
            channel_id: channel_id.into(),
            inner: RwLock::new(Inner {
                max_seq: 0,
                user_cursors: HashMap::new(),
                user_index: HashMap::new(),
                index_to_user: Vec::new(),
                segments: VecDeque::new(),
                window_size,
            }),
        }
    }

    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    /// Apply one cursor-advance event under the writer lock. The whole
    /// critical section is bounded by the number of retained segments
    /// (`window_size / SEGMENT_WIDTH`), never by the number of users.
    ///
    /// Segment extension runs before the marking pass, not after, as
    /// spec.md's step order literally reads — see DESIGN.md for why: with
    /// mark-before-extend, a channel's very first event (no segments yet
    /// exist to mark) would leave every freshly-created segment reader-less,
    /// which the S1 scenario (spec.md §8) rules out.
    pub fn apply(&self, event: &ReadCursorEvent) {
        let mut inner = self.inner.write();

        let user_idx = match inner.user_index.get(&event.user_id) {
            Some(&idx) => idx,
            None => {
                let idx = inner.index_to_user.len() as u32;
                inner.user_index.insert(event.user_id.clone(), idx);
                inner.index_to_user.push(event.user_id.clone());
                idx
            }
        };

        let old = *inner.user_cursors.get(&event.user_id).unwrap_or(&0);
        if event.new_last_seq <= old {
            return; // idempotent: stale or redelivered event
        }
        inner.user_cursors.insert(event.user_id.clone(), event.new_last_seq);

        if event.new_last_seq > inner.max_seq {
            inner.max_seq = event.new_last_seq;
            let max_seq = inner.max_seq;
            Self::ensure_segments_cover(&mut inner, max_seq);
        }

        for seg in inner.segments.iter_mut() {
            if seg.start_seq > event.new_last_seq {
                break;
            }
            if seg.end_seq > old {
                seg.add(user_idx);
            }
        }

        Self::prune_old_segments(&mut inner);
    }

    /// Extend `segments` with fresh, empty, width-`SEGMENT_WIDTH` segments
    /// until the last one's `end_seq >= max_seq` (spec §4.B step 5).
    fn ensure_segments_cover(inner: &mut Inner, max_seq: i64) {
        if inner.segments.is_empty() {
            inner.segments.push_back(ReadSegment::new(0, SEGMENT_WIDTH - 1));
        }
        loop {
            let last_end = inner.segments.back().expect("just ensured non-empty").end_seq;
            if last_end >= max_seq {
                break;
            }
            inner
                .segments
                .push_back(ReadSegment::new(last_end + 1, last_end + SEGMENT_WIDTH));
        }
    }

    /// Drop leading segments wholly outside the retention window (spec §4.B
    /// step 6, invariant 5). Unconditional every `apply`, matching the
    /// original's `pruneOldSegments`; a no-op while `max_seq <= window_size`.
    fn prune_old_segments(inner: &mut Inner) {
        let threshold = inner.max_seq - inner.window_size;
        if threshold <= 0 {
            return;
        }
        while let Some(front) = inner.segments.front() {
            if front.end_seq < threshold {
                inner.segments.pop_front();
            } else {
                break;
            }
        }
    }

    /// Users whose cursor has advanced to or past `seq` (spec §4.B
    /// `readers_at`). A `seq` beyond anything ever observed in this channel
    /// trivially has zero readers — `max_seq` is the highest cursor ever
    /// reported, so nobody can have read further than that, regardless of
    /// how far segments have been pre-allocated ahead of it.
    pub fn readers_at(&self, seq: i64, limit: usize) -> ReadersResult {
        let inner = self.inner.read();
        if seq > inner.max_seq {
            return ReadersResult {
                count: 0,
                readers: Vec::new(),
                truncated: false,
            };
        }

        let mut merged = RoaringBitmap::new();
        for seg in inner.segments.iter() {
            if seg.end_seq >= seq {
                seg.union_into(&mut merged);
            }
        }

        let count = merged.len();
        let readers: Vec<String> = merged
            .iter()
            .take(limit)
            .filter_map(|idx| inner.index_to_user.get(idx as usize).cloned())
            .collect();
        let truncated = count > readers.len() as u64;

        ReadersResult {
            count,
            readers,
            truncated,
        }
    }

    /// Batch form of `readers_at(..).count` (spec §4.B `counts_at`). Sorts
    /// the distinct requested sequences ascending and walks the segment
    /// list once, from the highest segment down, accumulating a running
    /// union — avoids re-scanning segments once per requested `seq`.
    pub fn counts_at(&self, seqs: &[i64]) -> HashMap<i64, u64> {
        let inner = self.inner.read();
        let mut result = HashMap::with_capacity(seqs.len());

        let mut distinct: Vec<i64> = seqs.to_vec();
        distinct.sort_unstable();
        distinct.dedup();

        let mut relevant: Vec<i64> = Vec::with_capacity(distinct.len());
        for seq in distinct {
            if seq > inner.max_seq {
                result.insert(seq, 0);
            } else {
                relevant.push(seq);
            }
        }

        let mut acc = RoaringBitmap::new();
        let mut frontier = inner.segments.len();
        for &seq in relevant.iter().rev() {
            while frontier > 0 && inner.segments[frontier - 1].end_seq >= seq {
                inner.segments[frontier - 1].union_into(&mut acc);
                frontier -= 1;
            }
            result.insert(seq, acc.len());
        }

        result
    }

    pub fn stats(&self) -> ChannelStats {
        let inner = self.inner.read();
        ChannelStats {
            channel_id: self.channel_id.clone(),
            max_seq: inner.max_seq,
            users_count: inner.user_cursors.len(),
            segments: inner.segments.len(),
        }
    }
}

//! Compressed per-segment reader bitmaps (spec §4.A).
//!
//! A [`ReadSegment`] covers a contiguous, fixed-width range of message
//! sequence numbers and tracks which dense user-indices have read into it.
//! The underlying set is a Roaring bitmap: cheap union, cheap cardinality,
//! and compact whether the channel's readers are a sparse handful or most
//! of its membership.

use roaring::RoaringBitmap;

/// Fixed width of every segment, in sequence units (spec §3).
pub const SEGMENT_WIDTH: i64 = 100;

#[derive(Debug, Clone)]
pub struct ReadSegment {
    pub start_seq: i64,
    pub end_seq: i64,
    readers: RoaringBitmap,
}

impl ReadSegment {
    pub fn new(start_seq: i64, end_seq: i64) -> Self {
        debug_assert!(start_seq <= end_seq);
        Self {
            start_seq,
            end_seq,
            readers: RoaringBitmap::new(),
        }
    }

    /// Mark `user_idx` as having read into this segment.
    pub fn add(&mut self, user_idx: u32) {
        self.readers.insert(user_idx);
    }

    /// Union this segment's readers into `dst`.
    pub fn union_into(&self, dst: &mut RoaringBitmap) {
        *dst |= &self.readers;
    }

    pub fn cardinality(&self) -> u64 {
        self.readers.len()
    }

    pub fn contains(&self, user_idx: u32) -> bool {
        self.readers.contains(user_idx)
    }
}

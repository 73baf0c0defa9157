//! Wire format for inbound read-cursor-advance events.

use serde::{Deserialize, Serialize};

/// A single cursor advance as published by the chat backend onto the
/// `read_cursor_events` stream. Unknown fields are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadCursorEvent {
    #[serde(rename = "type", default)]
    pub event_type: String,
    pub event_id: String,
    pub channel_id: String,
    pub user_id: String,
    #[serde(default)]
    pub prev_last_seq: i64,
    pub new_last_seq: i64,
    #[serde(default)]
    pub timestamp: i64,
}

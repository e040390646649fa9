//! Outgoing message identifier allocation.
//!
//! Identifiers share one `i32` space with the server's reserved routing ids
//! (`0`, `-1` and the echo id `-698`). The sequence walks upward from
//! `i32::MIN`, hops over `[MSG_ID_ECHO, MSG_ID_SAFE_START)` and wraps back to
//! `i32::MIN` just below `i32::MAX`.

use std::ops::Range;

use crate::message::{MSG_ID_ECHO, MSG_ID_SAFE_START};

/// Identifiers the sequence never hands out.
pub const RESERVED_RANGE: Range<i32> = MSG_ID_ECHO..MSG_ID_SAFE_START;

/// Monotonic identifier cursor owned by a single client.
#[derive(Debug, Clone)]
pub struct MessageIdSequence {
    next: i32,
}

impl Default for MessageIdSequence {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageIdSequence {
    /// A sequence starting at `i32::MIN`.
    pub fn new() -> Self {
        Self { next: i32::MIN }
    }

    /// A sequence whose next identifier is `next` (or `MSG_ID_SAFE_START`
    /// if `next` falls inside the reserved range).
    pub fn starting_at(next: i32) -> Self {
        Self { next }
    }

    /// Value the next call to [`take_next`](Self::take_next) will be based on.
    pub fn peek(&self) -> i32 {
        self.next
    }

    /// Return the current identifier and advance the cursor.
    pub fn take_next(&mut self) -> i32 {
        let current = if RESERVED_RANGE.contains(&self.next) {
            MSG_ID_SAFE_START
        } else {
            self.next
        };

        self.next = if current >= i32::MAX - 1 {
            i32::MIN
        } else if current == MSG_ID_ECHO - 1 {
            MSG_ID_SAFE_START
        } else {
            current + 1
        };

        current
    }
}

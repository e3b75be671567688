// Copyright © 2026 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Provide the priority-bucketed message queues of the ICPU link.
// Author: Lukas Bower

//! Priority-bucketed message queues.
//!
//! Each queue partitions its entries into per-priority FIFO buckets behind
//! one spin lock, so every operation is safe from interrupt context. The
//! free and response queues are single-bucket; the pending queue carries
//! one bucket per [`Priority`] level. Retrieval is strict priority
//! (priority 0 first), FIFO within a bucket.

use std::collections::VecDeque;

use log::debug;

use crate::pool::MsgRef;

/// Message priority. Lower values transmit first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Priority {
    /// Urgent control traffic.
    High = 0,
    /// Default priority.
    Normal = 1,
    /// Background traffic.
    Low = 2,
}

impl Priority {
    /// Number of priority levels.
    pub const LEVELS: usize = 3;

    /// Bucket index of this priority.
    #[must_use]
    pub fn bucket(self) -> usize {
        self as usize
    }
}

/// Queue entry: a slot reference plus the fields the queues match on.
#[derive(Debug, Clone, Copy)]
pub struct QueuedMsg {
    /// Generational reference to the message body.
    pub slot: MsgRef,
    /// Transmit priority.
    pub priority: Priority,
    /// Correlation key snapshot taken when the entry was built.
    pub key: u64,
    /// Sender id, carried for diagnostics.
    pub sender: u32,
}

impl QueuedMsg {
    /// Entry for an unused slot sitting in the free queue.
    #[must_use]
    pub fn free_slot(slot: MsgRef) -> Self {
        Self {
            slot,
            priority: Priority::Normal,
            key: 0,
            sender: 0,
        }
    }
}

struct QueueInner {
    buckets: Vec<VecDeque<QueuedMsg>>,
    count: u32,
}

/// One message queue.
pub struct MsgQueue {
    name: &'static str,
    inner: spin::Mutex<QueueInner>,
}

impl MsgQueue {
    /// Create a queue with `priorities` FIFO buckets.
    #[must_use]
    pub fn new(name: &'static str, priorities: usize) -> Self {
        let levels = priorities.max(1);
        let mut buckets = Vec::with_capacity(levels);
        for _ in 0..levels {
            buckets.push(VecDeque::new());
        }
        Self {
            name,
            inner: spin::Mutex::new(QueueInner { buckets, count: 0 }),
        }
    }

    fn bucket_for(inner: &QueueInner, priority: Priority) -> usize {
        priority.bucket().min(inner.buckets.len() - 1)
    }

    /// Pop the head of the highest-priority populated bucket.
    #[must_use]
    pub fn get(&self) -> Option<QueuedMsg> {
        let mut inner = self.inner.lock();
        for bucket in 0..inner.buckets.len() {
            if let Some(msg) = inner.buckets[bucket].pop_front() {
                inner.count -= 1;
                return Some(msg);
            }
        }
        None
    }

    /// Remove and return the first entry whose correlation key is `key`,
    /// scanning buckets in priority order.
    #[must_use]
    pub fn get_by_key(&self, key: u64) -> Option<QueuedMsg> {
        let mut inner = self.inner.lock();
        for bucket in 0..inner.buckets.len() {
            if let Some(pos) = inner.buckets[bucket].iter().position(|m| m.key == key) {
                let msg = inner.buckets[bucket].remove(pos);
                if msg.is_some() {
                    inner.count -= 1;
                }
                return msg;
            }
        }
        None
    }

    /// Pop the head of one specific bucket.
    #[must_use]
    pub fn get_by_priority(&self, bucket: usize) -> Option<QueuedMsg> {
        let mut inner = self.inner.lock();
        let msg = inner.buckets.get_mut(bucket)?.pop_front();
        if msg.is_some() {
            inner.count -= 1;
        }
        msg
    }

    /// Append `msg` to the tail of its priority bucket.
    ///
    /// Single-bucket queues fold every priority into bucket 0.
    pub fn set(&self, msg: QueuedMsg) {
        let mut inner = self.inner.lock();
        let bucket = Self::bucket_for(&inner, msg.priority);
        inner.buckets[bucket].push_back(msg);
        inner.count += 1;
    }

    /// Append `msg` only when the queue is already non-empty.
    ///
    /// Used by senders to pile onto a backlog an active drain will flush,
    /// without starting a second drain. Returns true when appended.
    pub fn set_if_not_empty(&self, msg: QueuedMsg) -> bool {
        let mut inner = self.inner.lock();
        if inner.count == 0 {
            return false;
        }
        let bucket = Self::bucket_for(&inner, msg.priority);
        inner.buckets[bucket].push_back(msg);
        inner.count += 1;
        true
    }

    /// Number of queued entries.
    #[must_use]
    pub fn len(&self) -> u32 {
        self.inner.lock().count
    }

    /// True when no entries are queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every entry. Used during link teardown.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        for bucket in inner.buckets.iter_mut() {
            bucket.clear();
        }
        inner.count = 0;
    }

    /// Log the queue contents for postmortems. Read-only.
    pub fn dump(&self) {
        let inner = self.inner.lock();
        debug!("queue {}: {} entries", self.name, inner.count);
        for (bucket, entries) in inner.buckets.iter().enumerate() {
            for msg in entries {
                debug!(
                    "  [{}] slot={} gen={} key={:#018x} sender={}",
                    bucket,
                    msg.slot.slot(),
                    msg.slot.generation(),
                    msg.key,
                    msg.sender
                );
            }
        }
    }
}

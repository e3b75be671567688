// Copyright © 2026 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Provide the fixed-capacity message slot arena for the ICPU link.
// Author: Lukas Bower

//! Fixed message slot arena.
//!
//! All message storage is allocated once when the link opens: a fixed array
//! of [`POOL_CAPACITY`] slots that the queues hand around for the life of
//! the session. Slots are addressed through generational references — a
//! [`MsgRef`] is only valid for the generation it was issued for, so a
//! retired reference fails with [`LinkError::StaleRef`] instead of
//! corrupting a recycled slot.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::LinkError;
use crate::queue::Priority;
use crate::wire::MAX_MSG_WORDS;

/// Number of message slots in the arena.
pub const POOL_CAPACITY: usize = 64;

/// Generational reference to one arena slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MsgRef {
    slot: u16,
    generation: u32,
}

impl MsgRef {
    /// Arena index of the referenced slot.
    #[must_use]
    pub fn slot(&self) -> u16 {
        self.slot
    }

    /// Generation this reference was issued for.
    #[must_use]
    pub fn generation(&self) -> u32 {
        self.generation
    }
}

/// Payload handed to a sender's completion callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply<'a> {
    /// Correlated response words received from the co-processor.
    Response(&'a [u32]),
    /// The transmission failed; carries the original outbound words.
    SendFailed(&'a [u32]),
}

/// Completion callback attached to a request.
pub type ReplyFn = Arc<dyn Fn(u64, Reply<'_>) + Send + Sync>;

/// Sender identity attached to an in-flight request.
#[derive(Clone)]
pub struct Origin {
    /// Numeric sender id, carried for diagnostics.
    pub sender: u32,
    /// Opaque caller cookie passed back to the callback.
    pub cookie: u64,
    /// Completion callback.
    pub callback: ReplyFn,
}

/// One message body. Reused across checkouts for the life of the session.
pub struct MsgBody {
    words: [u32; MAX_MSG_WORDS],
    len: usize,
    priority: Priority,
    key: u64,
    origin: Option<Origin>,
}

impl MsgBody {
    fn new() -> Self {
        Self {
            words: [0; MAX_MSG_WORDS],
            len: 0,
            priority: Priority::Normal,
            key: 0,
            origin: None,
        }
    }

    fn reset(&mut self) {
        self.len = 0;
        self.priority = Priority::Normal;
        self.key = 0;
        self.origin = None;
    }

    /// Copy `words` into the body.
    pub fn set_payload(&mut self, words: &[u32]) -> Result<(), LinkError> {
        if words.is_empty() {
            return Err(LinkError::InvalidArgument("empty payload"));
        }
        if words.len() > MAX_MSG_WORDS {
            return Err(LinkError::InvalidArgument("payload exceeds mailbox window"));
        }
        self.words[..words.len()].copy_from_slice(words);
        self.len = words.len();
        Ok(())
    }

    /// Valid payload words.
    #[must_use]
    pub fn words(&self) -> &[u32] {
        &self.words[..self.len]
    }

    /// Payload length in words; zero for a slot that was never filled.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// True when no payload is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Message priority.
    #[must_use]
    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// Set the message priority.
    pub fn set_priority(&mut self, priority: Priority) {
        self.priority = priority;
    }

    /// Correlation key of the message.
    #[must_use]
    pub fn key(&self) -> u64 {
        self.key
    }

    /// Set the correlation key.
    pub fn set_key(&mut self, key: u64) {
        self.key = key;
    }

    /// Attach the sender context.
    pub fn set_origin(&mut self, origin: Option<Origin>) {
        self.origin = origin;
    }

    /// Detach and return the sender context.
    pub fn take_origin(&mut self) -> Option<Origin> {
        self.origin.take()
    }

    /// True when a completion callback is attached.
    #[must_use]
    pub fn has_callback(&self) -> bool {
        self.origin.is_some()
    }
}

/// Arena usage counters, read for postmortem logging and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Slots handed out of the free queue.
    pub checkouts: u64,
    /// Slots retired back to the free queue.
    pub retires: u64,
    /// Checkout attempts that found the pool exhausted.
    pub exhaustions: u64,
}

/// Fixed arena of [`POOL_CAPACITY`] message slots.
pub struct MsgPool {
    slots: Vec<spin::Mutex<MsgBody>>,
    generations: Vec<AtomicU32>,
    checkouts: AtomicU64,
    retires: AtomicU64,
    exhaustions: AtomicU64,
}

impl MsgPool {
    /// Allocate the arena. Happens once per link open.
    #[must_use]
    pub fn new() -> Self {
        let mut slots = Vec::with_capacity(POOL_CAPACITY);
        let mut generations = Vec::with_capacity(POOL_CAPACITY);
        for _ in 0..POOL_CAPACITY {
            slots.push(spin::Mutex::new(MsgBody::new()));
            generations.push(AtomicU32::new(0));
        }
        Self {
            slots,
            generations,
            checkouts: AtomicU64::new(0),
            retires: AtomicU64::new(0),
            exhaustions: AtomicU64::new(0),
        }
    }

    /// Arena capacity in slots.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// References to every slot at its current generation.
    ///
    /// Used to populate the free queue when the link opens; the previous
    /// session's references (if any) are stale by construction.
    #[must_use]
    pub fn current_refs(&self) -> Vec<MsgRef> {
        self.generations
            .iter()
            .enumerate()
            .map(|(i, g)| MsgRef {
                slot: i as u16,
                generation: g.load(Ordering::Acquire),
            })
            .collect()
    }

    /// Run `f` against the body referenced by `r`.
    ///
    /// Fails with [`LinkError::StaleRef`] when `r` belongs to a retired
    /// generation.
    pub fn with<R>(&self, r: MsgRef, f: impl FnOnce(&mut MsgBody) -> R) -> Result<R, LinkError> {
        let idx = usize::from(r.slot);
        let gen = self
            .generations
            .get(idx)
            .ok_or(LinkError::InvalidArgument("slot index out of range"))?;
        if gen.load(Ordering::Acquire) != r.generation {
            return Err(LinkError::StaleRef {
                slot: r.slot,
                generation: r.generation,
            });
        }
        let mut body = self.slots[idx].lock();
        Ok(f(&mut body))
    }

    /// Retire `r`, reset its body, and return the next-generation reference.
    ///
    /// The returned reference is the only valid handle to the slot; retiring
    /// the same reference twice fails with [`LinkError::StaleRef`].
    pub fn retire(&self, r: MsgRef) -> Result<MsgRef, LinkError> {
        let idx = usize::from(r.slot);
        let gen = self
            .generations
            .get(idx)
            .ok_or(LinkError::InvalidArgument("slot index out of range"))?;
        gen.compare_exchange(
            r.generation,
            r.generation.wrapping_add(1),
            Ordering::AcqRel,
            Ordering::Acquire,
        )
        .map_err(|_| LinkError::StaleRef {
            slot: r.slot,
            generation: r.generation,
        })?;
        self.slots[idx].lock().reset();
        self.retires.fetch_add(1, Ordering::Relaxed);
        Ok(MsgRef {
            slot: r.slot,
            generation: r.generation.wrapping_add(1),
        })
    }

    /// Record a successful checkout from the free queue.
    pub fn note_checkout(&self) {
        self.checkouts.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a checkout attempt that found no free slot.
    pub fn note_exhausted(&self) {
        self.exhaustions.fetch_add(1, Ordering::Relaxed);
    }

    /// Current usage counters.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            checkouts: self.checkouts.load(Ordering::Relaxed),
            retires: self.retires.load(Ordering::Relaxed),
            exhaustions: self.exhaustions.load(Ordering::Relaxed),
        }
    }
}

impl Default for MsgPool {
    fn default() -> Self {
        Self::new()
    }
}

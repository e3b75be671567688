// Copyright © 2026 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Track whether the current thread is executing in interrupt context.
// Author: Lukas Bower

//! Execution-context marker.
//!
//! The receive interrupt handler enters an [`IrqScope`] before dispatching
//! inbound words, so code reached from the handler can detect that it must
//! not block. `send_message` consults [`in_irq`] to pick the synchronous
//! send path for interrupt-context callers.

use core::cell::Cell;

std::thread_local! {
    static IRQ_DEPTH: Cell<u32> = const { Cell::new(0) };
}

/// Scope guard marking the current thread as interrupt context.
///
/// Nesting is allowed; the marker clears when the outermost scope drops.
pub struct IrqScope(());

impl IrqScope {
    /// Enter interrupt context on the current thread.
    pub fn enter() -> Self {
        IRQ_DEPTH.with(|d| d.set(d.get() + 1));
        IrqScope(())
    }
}

impl Drop for IrqScope {
    fn drop(&mut self) {
        IRQ_DEPTH.with(|d| d.set(d.get().saturating_sub(1)));
    }
}

/// Return true when the current thread is inside an [`IrqScope`].
#[must_use]
pub fn in_irq() -> bool {
    IRQ_DEPTH.with(|d| d.get() > 0)
}

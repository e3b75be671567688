// Copyright © 2026 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Define the error taxonomy shared across the ICPU link crate.
// Author: Lukas Bower

//! Errors surfaced by the ICPU messaging link.

use thiserror::Error;

use crate::state::LinkState;

/// Errors returned by link, channel, and pool operations.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum LinkError {
    /// A caller-supplied argument was rejected.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    /// The operation is not valid in the current link state.
    #[error("operation invalid in link state {0:?}")]
    BadState(LinkState),
    /// Firmware has not reported READY yet; the caller may retry.
    #[error("firmware boot in progress; retry later")]
    RetryLater,
    /// Every message slot is checked out.
    #[error("message pool exhausted")]
    NoFreeSlot,
    /// The transmit mailbox never went idle within the retry budget.
    #[error("mailbox busy-wait exhausted")]
    TransportTimeout,
    /// The mailbox hardware faulted during a transmission.
    #[error("mailbox transmit failed")]
    TransportFailure,
    /// The channel has not been started.
    #[error("mailbox channel not ready")]
    ChannelDown,
    /// Firmware boot did not complete within the caller's deadline.
    #[error("firmware boot timed out")]
    BootTimeout,
    /// A message reference outlived its slot generation.
    #[error("stale message reference (slot {slot}, generation {generation})")]
    StaleRef {
        /// Arena index of the referenced slot.
        slot: u16,
        /// Generation the reference was issued for.
        generation: u32,
    },
    /// A hardware collaborator reported a failure.
    #[error("hardware operation failed: {0}")]
    Hardware(&'static str),
    /// A firmware collaborator reported a failure.
    #[error("firmware operation failed: {0}")]
    Firmware(&'static str),
}

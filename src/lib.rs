// Copyright © 2026 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Expose the ICPU mailbox messaging link library.
// Author: Lukas Bower
#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Asynchronous command/response messaging with the ICPU image
//! co-processor over a hardware mailbox.
//!
//! The crate is the messaging core only: the mailbox channel abstraction,
//! the fixed-capacity priority message pool, and the dispatcher that
//! decides when and how to transmit, correlates responses, and
//! demultiplexes inbound commands. Firmware loading, DMA buffers, and
//! platform power control stay behind the collaborator traits in [`hw`].
//!
//! A link is opened against a register bus and interrupt services, then
//! driven through [`IcpuLink::send_message`] once the firmware handshake
//! completes:
//!
//! ```ignore
//! let link = IcpuLink::new(bus, irq, hw_ops, fw_ops, config);
//! link.open()?;
//! link.wait_boot_complete(Duration::from_secs(1))?;
//! link.send_message(sender, cookie, Some(callback), Priority::Normal, &words)?;
//! ```

/// Execution-context tracking for interrupt-side code.
pub mod ctx;
/// Crate-wide error taxonomy.
pub mod error;
/// Hardware and firmware collaborator traits.
pub mod hw;
/// Interface dispatcher and link lifecycle.
pub mod link;
/// Mailbox channel abstraction.
pub mod mailbox;
/// Fixed message slot arena.
pub mod pool;
/// Priority-bucketed message queues.
pub mod queue;
/// Link state machine.
pub mod state;
/// Mailbox word layout and command codes.
pub mod wire;

pub use error::LinkError;
pub use link::{IcpuLink, InboundFn, LinkConfig};
pub use pool::{Reply, ReplyFn, POOL_CAPACITY};
pub use queue::Priority;
pub use state::LinkState;
pub use wire::MAX_MSG_WORDS;

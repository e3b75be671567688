// Copyright © 2026 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Drive one hardware mailbox direction for the ICPU link.
// Author: Lukas Bower

//! Mailbox channel abstraction.
//!
//! A [`MailboxChannel`] owns one hardware direction. The TX side writes the
//! data register window and pulses the interrupt-generate register once the
//! busy bit clears; the RX side owns the hardware interrupt and drains the
//! data window from its handler. Clients plug in through [`MailboxClient`].

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;

use bitflags::bitflags;
use log::{debug, trace, warn};

use crate::ctx::IrqScope;
use crate::error::LinkError;
use crate::hw::{IrqServices, MailboxHwInfo, MmioBus};

/// Status bit set while the peer has not consumed the last transmission.
pub const STATUS_TX_BUSY: u32 = 1 << 0;
/// Status bit set when inbound words are pending; write-1-to-clear.
pub const STATUS_RX_PENDING: u32 = 1 << 1;

/// Status read pattern indicating the device fell off the bus.
pub const BUS_FAULT_PATTERN: u32 = 0xffff_ffff;

/// Default busy-wait budget for a transmission, in poll iterations.
pub const DEFAULT_BUSY_RETRIES: u32 = 50;

// Delay between busy-bit polls.
const BUSY_POLL_DELAY: Duration = Duration::from_micros(10);

bitflags! {
    /// Channel lifecycle bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct ChannelState: u8 {
        /// Descriptor validated, resources allocated.
        const INIT = 0b01;
        /// Channel started by `startup`.
        const START = 0b10;
    }
}

impl ChannelState {
    const READY: ChannelState = ChannelState::INIT.union(ChannelState::START);
}

/// Direction of a mailbox channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailboxMode {
    /// Host-to-coprocessor.
    Tx,
    /// Coprocessor-to-host.
    Rx,
}

/// Callbacks a channel owner receives.
pub trait MailboxClient: Send + Sync {
    /// Inbound words captured by the RX interrupt handler.
    ///
    /// Runs in interrupt context; must not block.
    fn rx_complete(&self, words: &[u32]);
    /// A transmission left the data window. Invoked synchronously from
    /// `send` before it returns.
    fn tx_done(&self);
}

/// One hardware mailbox direction.
pub struct MailboxChannel {
    mode: MailboxMode,
    hw: MailboxHwInfo,
    bus: Arc<dyn MmioBus>,
    irq: Arc<dyn IrqServices>,
    client: Arc<dyn MailboxClient>,
    state: spin::Mutex<ChannelState>,
    hw_lock: spin::Mutex<()>,
    busy_retries: AtomicU32,
    // RX scratch sized to the data window; reused across interrupts.
    scratch: spin::Mutex<Vec<u32>>,
    // Handle to self for the interrupt closure registered by startup.
    me: Weak<MailboxChannel>,
}

/// Validate `hw` for `mode` and build the channel.
pub fn request_channel(
    mode: MailboxMode,
    hw: MailboxHwInfo,
    bus: Arc<dyn MmioBus>,
    irq: Arc<dyn IrqServices>,
    client: Arc<dyn MailboxClient>,
) -> Result<Arc<MailboxChannel>, LinkError> {
    match mode {
        MailboxMode::Tx => hw.validate_tx()?,
        MailboxMode::Rx => hw.validate_rx()?,
    }
    let scratch = match mode {
        MailboxMode::Tx => Vec::new(),
        MailboxMode::Rx => vec![0u32; hw.max_words as usize],
    };
    debug!("mailbox {:?} channel requested ({} words)", mode, hw.max_words);
    Ok(Arc::new_cyclic(|me| MailboxChannel {
        mode,
        hw,
        bus,
        irq,
        client,
        state: spin::Mutex::new(ChannelState::INIT),
        hw_lock: spin::Mutex::new(()),
        busy_retries: AtomicU32::new(DEFAULT_BUSY_RETRIES),
        scratch: spin::Mutex::new(scratch),
        me: me.clone(),
    }))
}

/// Shut the channel down and release it.
pub fn free_channel(channel: Arc<MailboxChannel>) {
    channel.shutdown();
    debug!("mailbox {:?} channel freed", channel.mode);
}

impl MailboxChannel {
    /// Channel direction.
    #[must_use]
    pub fn mode(&self) -> MailboxMode {
        self.mode
    }

    /// Override the busy-wait budget. Test and debug knob.
    pub fn set_busy_retries(&self, retries: u32) {
        self.busy_retries.store(retries.max(1), Ordering::Relaxed);
    }

    /// Start the channel.
    ///
    /// TX enables the outbound interrupt; RX attaches the hardware
    /// interrupt handler with the channel as its context.
    pub fn startup(&self) -> Result<(), LinkError> {
        {
            let state = self.state.lock();
            if state.contains(ChannelState::START) {
                return Ok(());
            }
        }
        match self.mode {
            MailboxMode::Tx => {
                if let Some(reg) = self.hw.int_enable_reg {
                    self.bus.write32(reg, 1);
                }
            }
            MailboxMode::Rx => {
                let channel = self.me.upgrade().ok_or(LinkError::ChannelDown)?;
                self.irq
                    .request_irq(self.hw.irq, Arc::new(move || channel.isr()))?;
            }
        }
        self.state.lock().insert(ChannelState::START);
        debug!("mailbox {:?} channel started", self.mode);
        Ok(())
    }

    /// Stop the channel. Idempotent.
    pub fn shutdown(&self) {
        {
            let mut state = self.state.lock();
            if !state.contains(ChannelState::START) {
                return;
            }
            state.remove(ChannelState::START);
        }
        match self.mode {
            MailboxMode::Tx => {
                if let Some(reg) = self.hw.int_enable_reg {
                    self.bus.write32(reg, 0);
                }
            }
            MailboxMode::Rx => self.irq.free_irq(self.hw.irq),
        }
        debug!("mailbox {:?} channel stopped", self.mode);
    }

    /// Transmit `data` through the data register window.
    ///
    /// Busy-waits on [`STATUS_TX_BUSY`] for at most the configured retry
    /// budget, then writes the words, pulses the interrupt-generate
    /// register, and invokes the client's `tx_done` before returning.
    pub fn send(&self, data: &[u32]) -> Result<(), LinkError> {
        if self.mode != MailboxMode::Tx {
            return Err(LinkError::InvalidArgument("send on rx channel"));
        }
        if *self.state.lock() != ChannelState::READY {
            return Err(LinkError::ChannelDown);
        }
        if data.is_empty() {
            return Err(LinkError::InvalidArgument("empty transmission"));
        }
        if data.len() > self.hw.max_words as usize {
            return Err(LinkError::InvalidArgument("transmission exceeds data window"));
        }
        // Registers validated by request_channel.
        let status_reg = self.hw.status_reg.ok_or(LinkError::ChannelDown)?;
        let data_reg = self.hw.data_reg.ok_or(LinkError::ChannelDown)?;
        let int_gen_reg = self.hw.int_gen_reg.ok_or(LinkError::ChannelDown)?;

        {
            let _hw = self.hw_lock.lock();
            self.wait_tx_idle(status_reg)?;
            for (i, word) in data.iter().enumerate() {
                self.bus.write32(data_reg + 4 * i as u32, *word);
            }
            self.bus.write32(int_gen_reg, 1);
        }
        trace!("mailbox tx: {} words", data.len());
        self.client.tx_done();
        Ok(())
    }

    fn wait_tx_idle(&self, status_reg: u32) -> Result<(), LinkError> {
        let budget = self.busy_retries.load(Ordering::Relaxed);
        for _ in 0..budget {
            let status = self.bus.read32(status_reg);
            if status == BUS_FAULT_PATTERN {
                warn!("mailbox status reads all-ones; device gone");
                return Err(LinkError::TransportFailure);
            }
            if status & STATUS_TX_BUSY == 0 {
                return Ok(());
            }
            thread::sleep(BUSY_POLL_DELAY);
        }
        Err(LinkError::TransportTimeout)
    }

    /// RX interrupt handler.
    ///
    /// Drains exactly `max_words` data registers (each read clears the
    /// register), acknowledges the interrupt by clearing
    /// [`STATUS_RX_PENDING`], and hands the captured words to the client.
    pub fn isr(&self) {
        if self.mode != MailboxMode::Rx {
            return;
        }
        let (Some(status_reg), Some(data_reg)) = (self.hw.status_reg, self.hw.data_reg) else {
            return;
        };
        let _irq = IrqScope::enter();
        let mut scratch = self.scratch.lock();
        for i in 0..self.hw.max_words as usize {
            scratch[i] = self.bus.read32(data_reg + 4 * i as u32);
        }
        self.bus.write32(status_reg, STATUS_RX_PENDING);
        self.client.rx_complete(&scratch);
    }
}

// Copyright © 2026 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Define the hardware seams consumed by the ICPU messaging link.
// Author: Lukas Bower

//! Hardware and firmware collaborator traits.
//!
//! The messaging core never touches registers directly; everything goes
//! through [`MmioBus`]. Interrupt wiring, co-processor power control, and
//! firmware image handling are likewise behind traits so platform glue and
//! test harnesses can provide their own implementations.

use std::sync::Arc;
use std::time::Duration;

use crate::error::LinkError;

/// 32-bit register access for one mailbox block.
pub trait MmioBus: Send + Sync {
    /// Read the register at `offset`.
    fn read32(&self, offset: u32) -> u32;
    /// Write the register at `offset`.
    fn write32(&self, offset: u32, value: u32);
}

/// Interrupt handler registered for a hardware line.
pub type IrqHandler = Arc<dyn Fn() + Send + Sync>;

/// Interrupt line registration.
pub trait IrqServices: Send + Sync {
    /// Attach `handler` to hardware interrupt `line`.
    fn request_irq(&self, line: u32, handler: IrqHandler) -> Result<(), LinkError>;
    /// Detach whatever handler is attached to `line`.
    fn free_irq(&self, line: u32);
}

/// One step of the forced-powerdown register sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PowerdownStep {
    /// Register address to poke.
    pub addr: u32,
    /// Bits of the register that participate.
    pub mask: u32,
    /// Value written under `mask`.
    pub value: u32,
    /// Budget for the step to take effect, in milliseconds.
    pub timeout_ms: u32,
}

/// Sentinel `addr` marking the step that trips the co-processor panic
/// handler instead of writing a register.
pub const POWERDOWN_PANIC_SENTINEL: u32 = 0xffff_ffff;

/// Walk a forced-powerdown sequence against `bus`.
///
/// Each step writes `value` under `mask` and polls until the register
/// settles, bounded by the step's timeout. A step addressed at
/// [`POWERDOWN_PANIC_SENTINEL`] trips the platform panic hook instead of
/// touching a register.
pub fn run_powerdown_sequence(
    bus: &dyn MmioBus,
    ops: &dyn HardwareOps,
    steps: &[PowerdownStep],
) -> Result<(), LinkError> {
    for step in steps {
        if step.addr == POWERDOWN_PANIC_SENTINEL {
            ops.panic_handler();
            continue;
        }
        let current = bus.read32(step.addr);
        bus.write32(step.addr, (current & !step.mask) | (step.value & step.mask));
        let mut waited_ms = 0;
        while bus.read32(step.addr) & step.mask != step.value & step.mask {
            if waited_ms >= step.timeout_ms {
                return Err(LinkError::Hardware("powerdown step never settled"));
            }
            std::thread::sleep(Duration::from_millis(1));
            waited_ms += 1;
        }
    }
    Ok(())
}

/// Co-processor power and debug control.
pub trait HardwareOps: Send + Sync {
    /// Program the firmware base address into the co-processor.
    fn set_base_address(&self, addr: u64);
    /// Reset and release the co-processor so it starts booting.
    fn reset(&self) -> Result<(), LinkError>;
    /// Block until the co-processor parks in WFI, bounded by `timeout`.
    fn wait_for_wfi(&self, timeout: Duration) -> Result<(), LinkError>;
    /// Run the ordered forced-powerdown sequence.
    fn force_powerdown(&self) -> Result<(), LinkError>;
    /// Invoke the platform panic hook.
    fn panic_handler(&self);
    /// Write the co-processor debug register.
    fn set_debug_register(&self, value: u32);
}

/// Location of a loaded firmware image in device address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DmaBufferInfo {
    /// Device-visible address of the buffer.
    pub device_addr: u64,
    /// Buffer size in bytes.
    pub size: usize,
}

/// Firmware image loading and DMA buffer handling.
pub trait FirmwareOps: Send + Sync {
    /// Load the firmware image and return its DMA buffer.
    fn load(&self) -> Result<DmaBufferInfo, LinkError>;
    /// Release the firmware image.
    fn unload(&self);
    /// Return the DMA buffer of the currently loaded image, if any.
    fn buffer_info(&self) -> Option<DmaBufferInfo>;
    /// Flush CPU-side writes so the device sees the image.
    fn sync_for_device(&self);
}

/// Register layout and interrupt wiring of one hardware mailbox.
///
/// All register fields are byte offsets on the [`MmioBus`] that serves the
/// mailbox block. Missing fields are direction dependent and validated by
/// [`MailboxHwInfo::validate_tx`] / [`MailboxHwInfo::validate_rx`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MailboxHwInfo {
    /// Interrupt-enable register (TX only).
    pub int_enable_reg: Option<u32>,
    /// Interrupt-generate register pulsed after a transmission (TX only).
    pub int_gen_reg: Option<u32>,
    /// Status register.
    pub status_reg: Option<u32>,
    /// First data register; data occupies `max_words` consecutive registers.
    pub data_reg: Option<u32>,
    /// Data window length in 32-bit words.
    pub max_words: u32,
    /// Hardware interrupt line (RX only).
    pub irq: u32,
}

impl MailboxHwInfo {
    pub(crate) fn validate_tx(&self) -> Result<(), LinkError> {
        if self.int_enable_reg.is_none()
            || self.int_gen_reg.is_none()
            || self.status_reg.is_none()
            || self.data_reg.is_none()
        {
            return Err(LinkError::InvalidArgument("tx mailbox register missing"));
        }
        if self.max_words == 0 {
            return Err(LinkError::InvalidArgument("tx mailbox data length is zero"));
        }
        Ok(())
    }

    pub(crate) fn validate_rx(&self) -> Result<(), LinkError> {
        if self.status_reg.is_none() || self.data_reg.is_none() {
            return Err(LinkError::InvalidArgument("rx mailbox register missing"));
        }
        if self.max_words == 0 {
            return Err(LinkError::InvalidArgument("rx mailbox data length is zero"));
        }
        if self.irq == 0 {
            return Err(LinkError::InvalidArgument("rx mailbox irq is zero"));
        }
        Ok(())
    }
}

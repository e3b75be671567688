// Copyright © 2026 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Provide the fake mailbox hardware rig shared by the integration tests.
// Author: Lukas Bower

//! In-process model of the ICPU mailbox hardware: one register bus carrying
//! a TX and an RX mailbox, an interrupt controller that invokes handlers
//! inline, and recording hardware/firmware collaborators.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use icpu_link::error::LinkError;
use icpu_link::hw::{
    DmaBufferInfo, FirmwareOps, HardwareOps, IrqHandler, IrqServices, MailboxHwInfo, MmioBus,
};
use icpu_link::link::{IcpuLink, LinkConfig};
use icpu_link::mailbox::{STATUS_RX_PENDING, STATUS_TX_BUSY};
use icpu_link::wire::{self, FwCommand};

pub const TX_INT_ENABLE: u32 = 0x00;
pub const TX_INT_GEN: u32 = 0x04;
pub const TX_STATUS: u32 = 0x08;
pub const TX_DATA: u32 = 0x10;
pub const RX_STATUS: u32 = 0x100;
pub const RX_DATA: u32 = 0x110;
pub const RX_IRQ_LINE: u32 = 5;
pub const MAILBOX_WORDS: u32 = 32;

const REG_COUNT: usize = 0x200 / 4;

/// Register bus backing both mailbox directions.
///
/// Writing 1 to the TX interrupt-generate register captures the TX data
/// window into the transmission log. RX data registers read destructively,
/// like the hardware they stand in for.
pub struct FakeBus {
    regs: Mutex<Vec<u32>>,
    tx_log: Mutex<Vec<Vec<u32>>>,
    gate_blocked: Mutex<bool>,
    gate_cv: Condvar,
    gate_waiters: AtomicUsize,
}

impl FakeBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            regs: Mutex::new(vec![0; REG_COUNT]),
            tx_log: Mutex::new(Vec::new()),
            gate_blocked: Mutex::new(false),
            gate_cv: Condvar::new(),
            gate_waiters: AtomicUsize::new(0),
        })
    }

    pub fn set_reg(&self, offset: u32, value: u32) {
        self.regs.lock().unwrap()[offset as usize / 4] = value;
    }

    pub fn reg(&self, offset: u32) -> u32 {
        self.regs.lock().unwrap()[offset as usize / 4]
    }

    /// Completed transmissions, each the full TX data window.
    pub fn tx_log(&self) -> Vec<Vec<u32>> {
        self.tx_log.lock().unwrap().clone()
    }

    /// Make the next TX interrupt-generate write block until
    /// [`FakeBus::release_tx`]. Models a slow peer holding the sender.
    pub fn hold_tx(&self) {
        *self.gate_blocked.lock().unwrap() = true;
    }

    pub fn release_tx(&self) {
        *self.gate_blocked.lock().unwrap() = false;
        self.gate_cv.notify_all();
    }

    /// Number of transmitters currently parked in [`FakeBus::hold_tx`].
    pub fn tx_blocked_waiters(&self) -> usize {
        self.gate_waiters.load(Ordering::SeqCst)
    }

    fn wait_gate(&self) {
        let mut blocked = self.gate_blocked.lock().unwrap();
        if !*blocked {
            return;
        }
        self.gate_waiters.fetch_add(1, Ordering::SeqCst);
        while *blocked {
            blocked = self.gate_cv.wait(blocked).unwrap();
        }
        self.gate_waiters.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MmioBus for FakeBus {
    fn read32(&self, offset: u32) -> u32 {
        let mut regs = self.regs.lock().unwrap();
        let idx = offset as usize / 4;
        let value = regs[idx];
        // RX data registers clear on read.
        if (RX_DATA..RX_DATA + 4 * MAILBOX_WORDS).contains(&offset) {
            regs[idx] = 0;
        }
        value
    }

    fn write32(&self, offset: u32, value: u32) {
        if offset == TX_INT_GEN && value != 0 {
            // Gate check happens before the register lock so a parked
            // transmitter never wedges the rest of the bus.
            self.wait_gate();
        }
        let mut regs = self.regs.lock().unwrap();
        if offset == RX_STATUS {
            // Write-1-to-clear.
            regs[offset as usize / 4] &= !value;
            return;
        }
        regs[offset as usize / 4] = value;
        if offset == TX_INT_GEN && value != 0 {
            let window = regs[TX_DATA as usize / 4..][..MAILBOX_WORDS as usize].to_vec();
            drop(regs);
            self.tx_log.lock().unwrap().push(window);
        }
    }
}

/// Interrupt controller invoking handlers inline on the firing thread.
pub struct FakeIrq {
    handlers: Mutex<HashMap<u32, IrqHandler>>,
    requests: AtomicUsize,
    frees: AtomicUsize,
}

impl FakeIrq {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            handlers: Mutex::new(HashMap::new()),
            requests: AtomicUsize::new(0),
            frees: AtomicUsize::new(0),
        })
    }

    pub fn fire(&self, line: u32) {
        let handler = self.handlers.lock().unwrap().get(&line).cloned();
        if let Some(handler) = handler {
            handler();
        }
    }

    pub fn registered(&self, line: u32) -> bool {
        self.handlers.lock().unwrap().contains_key(&line)
    }

    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    pub fn frees(&self) -> usize {
        self.frees.load(Ordering::SeqCst)
    }
}

impl IrqServices for FakeIrq {
    fn request_irq(&self, line: u32, handler: IrqHandler) -> Result<(), LinkError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        self.handlers.lock().unwrap().insert(line, handler);
        Ok(())
    }

    fn free_irq(&self, line: u32) {
        self.frees.fetch_add(1, Ordering::SeqCst);
        self.handlers.lock().unwrap().remove(&line);
    }
}

/// Recording power/debug collaborator.
pub struct FakeHw {
    pub wfi_result: Mutex<Result<(), LinkError>>,
    pub resets: AtomicUsize,
    pub forced_powerdowns: AtomicUsize,
    pub panics: AtomicUsize,
    pub base_addrs: Mutex<Vec<u64>>,
}

impl FakeHw {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            wfi_result: Mutex::new(Ok(())),
            resets: AtomicUsize::new(0),
            forced_powerdowns: AtomicUsize::new(0),
            panics: AtomicUsize::new(0),
            base_addrs: Mutex::new(Vec::new()),
        })
    }
}

impl HardwareOps for FakeHw {
    fn set_base_address(&self, addr: u64) {
        self.base_addrs.lock().unwrap().push(addr);
    }

    fn reset(&self) -> Result<(), LinkError> {
        self.resets.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn wait_for_wfi(&self, _timeout: Duration) -> Result<(), LinkError> {
        *self.wfi_result.lock().unwrap()
    }

    fn force_powerdown(&self) -> Result<(), LinkError> {
        self.forced_powerdowns.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn panic_handler(&self) {
        self.panics.fetch_add(1, Ordering::SeqCst);
    }

    fn set_debug_register(&self, _value: u32) {}
}

/// Recording firmware collaborator.
pub struct FakeFw {
    pub load_result: Mutex<Result<DmaBufferInfo, LinkError>>,
    pub loads: AtomicUsize,
    pub unloads: AtomicUsize,
}

impl FakeFw {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            load_result: Mutex::new(Ok(DmaBufferInfo {
                device_addr: 0x8000_0000,
                size: 0x10_0000,
            })),
            loads: AtomicUsize::new(0),
            unloads: AtomicUsize::new(0),
        })
    }
}

impl FirmwareOps for FakeFw {
    fn load(&self) -> Result<DmaBufferInfo, LinkError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        *self.load_result.lock().unwrap()
    }

    fn unload(&self) {
        self.unloads.fetch_add(1, Ordering::SeqCst);
    }

    fn buffer_info(&self) -> Option<DmaBufferInfo> {
        self.load_result.lock().unwrap().ok()
    }

    fn sync_for_device(&self) {}
}

pub fn tx_info() -> MailboxHwInfo {
    MailboxHwInfo {
        int_enable_reg: Some(TX_INT_ENABLE),
        int_gen_reg: Some(TX_INT_GEN),
        status_reg: Some(TX_STATUS),
        data_reg: Some(TX_DATA),
        max_words: MAILBOX_WORDS,
        irq: 0,
    }
}

pub fn rx_info() -> MailboxHwInfo {
    MailboxHwInfo {
        int_enable_reg: None,
        int_gen_reg: None,
        status_reg: Some(RX_STATUS),
        data_reg: Some(RX_DATA),
        max_words: MAILBOX_WORDS,
        irq: RX_IRQ_LINE,
    }
}

/// Complete test rig: bus, interrupt controller, collaborators, and link.
pub struct Rig {
    pub bus: Arc<FakeBus>,
    pub irq: Arc<FakeIrq>,
    pub hw: Arc<FakeHw>,
    pub fw: Arc<FakeFw>,
    pub link: Arc<IcpuLink>,
}

impl Rig {
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    pub fn with_config(tweak: impl FnOnce(&mut LinkConfig)) -> Self {
        init_logger();
        let bus = FakeBus::new();
        let irq = FakeIrq::new();
        let hw = FakeHw::new();
        let fw = FakeFw::new();
        let mut config = LinkConfig::new(tx_info(), vec![rx_info()]);
        tweak(&mut config);
        let link = Arc::new(IcpuLink::new(
            bus.clone(),
            irq.clone(),
            hw.clone(),
            fw.clone(),
            config,
        ));
        Self {
            bus,
            irq,
            hw,
            fw,
            link,
        }
    }

    /// Inject `words` through the RX mailbox and fire its interrupt.
    pub fn deliver(&self, words: &[u32]) {
        assert!(words.len() <= MAILBOX_WORDS as usize);
        for i in 0..MAILBOX_WORDS as usize {
            let value = words.get(i).copied().unwrap_or(0);
            self.bus.set_reg(RX_DATA + 4 * i as u32, value);
        }
        self.bus
            .set_reg(RX_STATUS, self.bus.reg(RX_STATUS) | STATUS_RX_PENDING);
        self.irq.fire(RX_IRQ_LINE);
    }

    /// Open the link and complete the firmware READY handshake.
    pub fn boot(&self) {
        self.link.open().expect("open");
        self.deliver(&[wire::make_word0(FwCommand::Ready as u8, 0, false, 0)]);
        self.link
            .wait_boot_complete(Duration::from_secs(1))
            .expect("boot");
    }

    /// Mark the TX mailbox busy or idle.
    pub fn set_tx_busy(&self, busy: bool) {
        self.bus
            .set_reg(TX_STATUS, if busy { STATUS_TX_BUSY } else { 0 });
    }

    /// Transmissions matching `cmd`, by command code.
    pub fn tx_with_command(&self, cmd: u8) -> Vec<Vec<u32>> {
        self.bus
            .tx_log()
            .into_iter()
            .filter(|w| wire::command_code(w[0]) == cmd)
            .collect()
    }
}

/// Spin until `cond` holds, panicking after `timeout`.
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + timeout;
    while !cond() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        std::thread::sleep(Duration::from_millis(1));
    }
}

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

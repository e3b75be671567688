// Copyright © 2026 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Dispatch ICPU messages across the mailbox channels and link states.
// Author: Lukas Bower

//! Interface dispatcher.
//!
//! [`IcpuLink`] owns the message pool, the three queues, the mailbox
//! channels, and the drain worker, and decides for every outbound message
//! whether it transmits directly, joins the pending backlog, or takes the
//! interrupt-context synchronous path. Inbound traffic is demultiplexed
//! here: responses are matched against the response queue by correlation
//! key, firmware commands are handled inline, and everything else goes to
//! the registered inbound handler.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, TryLockError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use log::{debug, error, info, trace, warn};

use crate::ctx;
use crate::error::LinkError;
use crate::hw::{FirmwareOps, HardwareOps, IrqServices, MailboxHwInfo, MmioBus};
use crate::mailbox::{free_channel, request_channel, MailboxChannel, MailboxClient, MailboxMode};
use crate::pool::{MsgPool, MsgRef, Origin, PoolStats, Reply, ReplyFn};
use crate::queue::{MsgQueue, Priority, QueuedMsg};
use crate::state::{hooks_for, LinkState, StateHooks, POWER_DOWN_BACKOFF, POWER_DOWN_RETRIES};
use crate::wire::{self, FwCommand, MAX_MSG_WORDS};

/// Every Nth asynchronous send piggybacks a time-sync command so host and
/// co-processor clocks stay correlated.
const TIME_SYNC_INTERVAL: u64 = 100;

/// Handler for inbound commands or error reports.
pub type InboundFn = Arc<dyn Fn(u64, &[u32]) + Send + Sync>;

#[derive(Clone)]
struct Handler {
    cookie: u64,
    func: InboundFn,
}

/// Hardware wiring and tunables for one link.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Transmit mailbox descriptor.
    pub tx: MailboxHwInfo,
    /// Receive mailbox descriptors, one per inbound hardware mailbox.
    pub rx: Vec<MailboxHwInfo>,
    /// Instance id stamped into internally generated commands.
    pub instance: u8,
    /// How long `close` waits for the co-processor to park in WFI before
    /// forcing powerdown.
    pub wfi_timeout: Duration,
    /// Busy-wait budget override for the transmit channel.
    pub tx_busy_retries: Option<u32>,
}

impl LinkConfig {
    /// Config with default tunables.
    #[must_use]
    pub fn new(tx: MailboxHwInfo, rx: Vec<MailboxHwInfo>) -> Self {
        Self {
            tx,
            rx,
            instance: 0,
            wfi_timeout: Duration::from_millis(500),
            tx_busy_retries: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BootStatus {
    Idle,
    Pending,
    Ready,
    Failed,
}

// Completion the READY command settles; armed on entry to WAIT_FW_READY.
struct Completion {
    status: Mutex<BootStatus>,
    cv: Condvar,
}

impl Completion {
    fn new() -> Self {
        Self {
            status: Mutex::new(BootStatus::Idle),
            cv: Condvar::new(),
        }
    }

    fn arm(&self) {
        *lock_plain(&self.status) = BootStatus::Pending;
    }

    fn settle(&self, status: BootStatus) {
        *lock_plain(&self.status) = status;
        self.cv.notify_all();
    }

    fn wait(&self, timeout: Duration) -> BootStatus {
        let guard = lock_plain(&self.status);
        let (guard, _) = self
            .cv
            .wait_timeout_while(guard, timeout, |s| *s == BootStatus::Pending)
            .unwrap_or_else(|p| p.into_inner());
        *guard
    }
}

fn lock_plain<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|p| p.into_inner())
}

/// Shared core of one link: queues, pool, channels, and state.
pub(crate) struct LinkShared {
    instance: u8,
    state: spin::Mutex<LinkState>,
    pool: MsgPool,
    free_q: MsgQueue,
    pend_q: MsgQueue,
    resp_q: MsgQueue,
    // Serializes whole-message transmissions from process context. The
    // channel keeps its own interrupt-safe lock underneath.
    send_lock: Mutex<()>,
    drain_scheduled: AtomicBool,
    shutdown: AtomicBool,
    wake_lock: Mutex<()>,
    wake_cv: Condvar,
    boot: Completion,
    msg_handler: spin::Mutex<Option<Handler>>,
    err_handler: spin::Mutex<Option<Handler>>,
    async_sends: AtomicU64,
    tx_chan: spin::Mutex<Option<Arc<MailboxChannel>>>,
    rx_chans: spin::Mutex<Vec<Arc<MailboxChannel>>>,
}

impl LinkShared {
    fn new(instance: u8) -> Self {
        Self {
            instance,
            state: spin::Mutex::new(LinkState::Init),
            pool: MsgPool::new(),
            free_q: MsgQueue::new("free", 1),
            pend_q: MsgQueue::new("pending", Priority::LEVELS),
            resp_q: MsgQueue::new("response", 1),
            send_lock: Mutex::new(()),
            drain_scheduled: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            wake_lock: Mutex::new(()),
            wake_cv: Condvar::new(),
            boot: Completion::new(),
            msg_handler: spin::Mutex::new(None),
            err_handler: spin::Mutex::new(None),
            async_sends: AtomicU64::new(0),
            tx_chan: spin::Mutex::new(None),
            rx_chans: spin::Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn transition(&self, target: LinkState) {
        let old = {
            let mut state = self.state.lock();
            let old = *state;
            if old == target {
                return;
            }
            *state = target;
            old
        };
        debug!("link state {:?} -> {:?}", old, target);
        hooks_for(old).post(self, target);
        hooks_for(target).pre(self);
        hooks_for(target).action(self);
    }

    pub(crate) fn boot_arm(&self) {
        self.boot.arm();
    }

    pub(crate) fn boot_ready(&self) {
        self.boot.settle(BootStatus::Ready);
    }

    pub(crate) fn boot_fail(&self) {
        self.boot.settle(BootStatus::Failed);
    }

    // Repopulate the free queue with every slot at its current generation
    // and reset the per-session bookkeeping.
    fn reset_session(&self) {
        self.free_q.clear();
        self.pend_q.clear();
        self.resp_q.clear();
        for slot in self.pool.current_refs() {
            self.free_q.set(QueuedMsg::free_slot(slot));
        }
        self.drain_scheduled.store(false, Ordering::SeqCst);
        self.shutdown.store(false, Ordering::SeqCst);
        self.async_sends.store(0, Ordering::SeqCst);
    }

    fn clear_queues(&self) {
        self.free_q.clear();
        self.pend_q.clear();
        self.resp_q.clear();
    }

    fn reset_client(&self) {
        *self.msg_handler.lock() = None;
        *self.err_handler.lock() = None;
    }

    fn dump_queues(&self) {
        self.free_q.dump();
        self.pend_q.dump();
        self.resp_q.dump();
        debug!("pool stats: {:?}", self.pool.stats());
    }

    fn recycle(&self, slot: MsgRef) {
        match self.pool.retire(slot) {
            Ok(fresh) => self.free_q.set(QueuedMsg::free_slot(fresh)),
            Err(e) => error!("slot recycle failed: {e}"),
        }
    }

    fn schedule_drain(&self) {
        if self
            .drain_scheduled
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            let _wake = lock_plain(&self.wake_lock);
            self.wake_cv.notify_one();
        }
    }

    fn send_message(
        &self,
        sender: u32,
        cookie: u64,
        callback: Option<ReplyFn>,
        priority: Priority,
        words: &[u32],
        count_async: bool,
    ) -> Result<(), LinkError> {
        if words.is_empty() {
            return Err(LinkError::InvalidArgument("empty payload"));
        }
        if words.len() > MAX_MSG_WORDS {
            return Err(LinkError::InvalidArgument("payload exceeds mailbox window"));
        }

        let word0 = words[0];
        let power_down =
            !wire::is_response(word0) && wire::command_code(word0) == FwCommand::PowerDown as u8;
        let state = *self.state.lock();
        match state {
            LinkState::Running => {}
            // Shutdown must always be able to deliver the power-down command.
            LinkState::Closing if power_down => {}
            LinkState::WaitFwReady => return Err(LinkError::RetryLater),
            other => return Err(LinkError::BadState(other)),
        }

        let Some(free) = self.free_q.get() else {
            self.pool.note_exhausted();
            if self.resp_q.len() as usize == self.pool.capacity() {
                warn!("message pool exhausted with every slot awaiting a response");
                self.notify_no_response();
                self.dump_queues();
            }
            return Err(LinkError::NoFreeSlot);
        };
        self.pool.note_checkout();

        let word1 = words.get(1).copied().unwrap_or(0);
        let key = wire::correlation_key(word0, word1);
        let origin = callback.map(|cb| Origin {
            sender,
            cookie,
            callback: cb,
        });
        let has_callback = origin.is_some();
        let fill = self.pool.with(free.slot, move |body| {
            body.set_payload(words).map(|()| {
                body.set_priority(priority);
                body.set_key(key);
                body.set_origin(origin);
            })
        });
        match fill {
            Ok(Ok(())) => {}
            Ok(Err(e)) | Err(e) => {
                self.recycle(free.slot);
                return Err(e);
            }
        }
        let entry = QueuedMsg {
            slot: free.slot,
            priority,
            key,
            sender,
        };

        // Interrupt-context callers never queue and never touch the
        // process-context send lock.
        if ctx::in_irq() {
            return self.transmit(entry, has_callback, None);
        }

        let piggyback = count_async
            && (self.async_sends.fetch_add(1, Ordering::Relaxed) + 1) % TIME_SYNC_INTERVAL == 0;

        let result = if self.pend_q.set_if_not_empty(entry) {
            // A backlog exists; keep per-link ordering by joining it.
            trace!("send joined pending backlog (key {key:#x})");
            self.schedule_drain();
            Ok(())
        } else {
            match self.send_lock.try_lock() {
                Ok(guard) => self.transmit(entry, has_callback, Some(guard)),
                Err(TryLockError::WouldBlock) => {
                    trace!("send lock contended; deferring (key {key:#x})");
                    self.pend_q.set(entry);
                    self.schedule_drain();
                    Ok(())
                }
                Err(TryLockError::Poisoned(p)) => {
                    self.transmit(entry, has_callback, Some(p.into_inner()))
                }
            }
        };

        if piggyback && result.is_ok() {
            self.send_time_sync();
        }
        result
    }

    // Transmit one checked-out message. Registers the response-queue entry
    // before the hardware send so a fast response can never beat its own
    // registration; on failure runs the failure path, on callback-less
    // success recycles the slot immediately.
    fn transmit(
        &self,
        entry: QueuedMsg,
        has_callback: bool,
        guard: Option<MutexGuard<'_, ()>>,
    ) -> Result<(), LinkError> {
        if has_callback {
            self.resp_q.set(entry);
        }
        let result = self.tx_send(entry.slot);
        drop(guard);
        match result {
            Ok(()) => {
                if !has_callback {
                    self.recycle(entry.slot);
                }
                Ok(())
            }
            Err(e) => {
                self.send_failure(entry, has_callback, e);
                Err(e)
            }
        }
    }

    fn tx_send(&self, slot: MsgRef) -> Result<(), LinkError> {
        let channel = self.tx_chan.lock().clone().ok_or(LinkError::ChannelDown)?;
        let mut buf = [0u32; MAX_MSG_WORDS];
        let len = self.pool.with(slot, |body| {
            let words = body.words();
            buf[..words.len()].copy_from_slice(words);
            words.len()
        })?;
        channel.send(&buf[..len])
    }

    // Failure path shared by the direct, queued, and interrupt-context
    // sends: log the message, deliver a tagged failure to the callback if
    // one was registered, and recycle the slot.
    fn send_failure(&self, entry: QueuedMsg, has_callback: bool, err: LinkError) {
        warn!("transmit failed (key {:#x}): {err}", entry.key);
        if has_callback && self.resp_q.get_by_key(entry.key).is_none() {
            // A response consumed the registration while the send was
            // failing; the slot is already settled.
            debug!("send failure raced with a response (key {:#x})", entry.key);
            return;
        }
        let mut buf = [0u32; MAX_MSG_WORDS];
        let mut len = 0;
        let origin = match self.pool.with(entry.slot, |body| {
            let words = body.words();
            buf[..words.len()].copy_from_slice(words);
            len = words.len();
            body.take_origin()
        }) {
            Ok(origin) => origin,
            Err(e) => {
                error!("failed message unreadable: {e}");
                return;
            }
        };
        debug!("failed message payload: {:x?}", &buf[..len]);
        if let Some(origin) = origin {
            (origin.callback)(origin.cookie, Reply::SendFailed(&buf[..len]));
        }
        self.recycle(entry.slot);
    }

    fn drain_pending(&self) {
        while let Some(entry) = self.pend_q.get() {
            let has_callback = self
                .pool
                .with(entry.slot, |body| body.has_callback())
                .unwrap_or(false);
            let guard = lock_plain(&self.send_lock);
            if let Err(e) = self.transmit(entry, has_callback, Some(guard)) {
                warn!("queued transmit failed (key {:#x}): {e}", entry.key);
            }
        }
    }

    fn send_time_sync(&self) {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        let micros = now.as_micros() as u64;
        let words = [
            wire::make_word0(FwCommand::TimeSync as u8, self.instance, false, 0),
            0,
            (micros >> 32) as u32,
            micros as u32,
        ];
        if let Err(e) = self.send_message(0, 0, None, Priority::Normal, &words, false) {
            debug!("time sync skipped: {e}");
        }
    }

    // Best-effort power-down, sent while the link is already CLOSING.
    pub(crate) fn send_power_down(&self) {
        let words = [
            wire::make_word0(FwCommand::PowerDown as u8, self.instance, false, 0),
            0,
        ];
        for attempt in 1..=POWER_DOWN_RETRIES {
            match self.send_message(0, 0, None, Priority::High, &words, false) {
                Ok(()) => {
                    debug!("power-down sent (attempt {attempt})");
                    return;
                }
                Err(LinkError::TransportTimeout) | Err(LinkError::NoFreeSlot) => {
                    thread::sleep(POWER_DOWN_BACKOFF);
                }
                Err(e) => {
                    warn!("power-down aborted: {e}");
                    return;
                }
            }
        }
        warn!("power-down undelivered after {POWER_DOWN_RETRIES} attempts");
    }

    fn dispatch_inbound(&self, words: &[u32]) {
        let Some(&word0) = words.first() else {
            return;
        };
        if wire::is_response(word0) {
            self.dispatch_response(word0, words);
        } else {
            self.dispatch_command(word0, words);
        }
    }

    fn dispatch_response(&self, word0: u32, words: &[u32]) {
        let word1 = words.get(1).copied().unwrap_or(0);
        let key = wire::correlation_key(word0, word1);
        let Some(entry) = self.resp_q.get_by_key(key) else {
            warn!(
                "orphaned response: cmd {:#x} err {:#x} key {:#018x}",
                wire::command_code(word0),
                wire::error_code(word0),
                key
            );
            debug!("orphaned payload: {:x?}", words);
            return;
        };
        let origin = match self.pool.with(entry.slot, |body| body.take_origin()) {
            Ok(origin) => origin,
            Err(e) => {
                error!("response slot unreadable: {e}");
                return;
            }
        };
        if let Some(origin) = origin {
            (origin.callback)(origin.cookie, Reply::Response(words));
        }
        self.recycle(entry.slot);
    }

    fn dispatch_command(&self, word0: u32, words: &[u32]) {
        let cmd = wire::command_code(word0);
        if wire::is_fw_internal(cmd) {
            match FwCommand::try_from(cmd) {
                Ok(FwCommand::Ready) => self.firmware_ready(),
                Ok(FwCommand::Error) => self.notify_error(words),
                _ => warn!("unhandled firmware command {cmd:#x}: {words:x?}"),
            }
            return;
        }
        let handler = self.msg_handler.lock().clone();
        match handler {
            Some(h) => (h.func)(h.cookie, words),
            None => warn!("no handler for inbound command {cmd:#x}: {words:x?}"),
        }
    }

    fn firmware_ready(&self) {
        let state = *self.state.lock();
        if state == LinkState::WaitFwReady {
            info!("firmware reported ready");
            self.transition(LinkState::Running);
        } else {
            warn!("ready command ignored in state {state:?}");
        }
        self.send_time_sync();
    }

    fn notify_no_response(&self) {
        let words = [wire::make_word0(
            FwCommand::Error as u8,
            self.instance,
            true,
            wire::ERR_NO_RESPONSE,
        )];
        self.notify_error(&words);
    }

    fn notify_error(&self, words: &[u32]) {
        let handler = self.err_handler.lock().clone();
        match handler {
            Some(h) => (h.func)(h.cookie, words),
            None => warn!("error report with no handler registered: {words:x?}"),
        }
    }
}

impl MailboxClient for LinkShared {
    fn rx_complete(&self, words: &[u32]) {
        self.dispatch_inbound(words);
    }

    fn tx_done(&self) {
        trace!("mailbox transmission complete");
    }
}

fn drain_worker(shared: Arc<LinkShared>) {
    debug!("drain worker up");
    loop {
        {
            let mut wake = lock_plain(&shared.wake_lock);
            while !shared.drain_scheduled.load(Ordering::SeqCst)
                && !shared.shutdown.load(Ordering::SeqCst)
            {
                wake = shared
                    .wake_cv
                    .wait(wake)
                    .unwrap_or_else(|p| p.into_inner());
            }
        }
        if shared.shutdown.load(Ordering::SeqCst) {
            break;
        }
        shared.drain_pending();
        shared.drain_scheduled.store(false, Ordering::SeqCst);
        if !shared.pend_q.is_empty() {
            // An enqueue slipped in before the flag cleared; pick it up.
            shared.drain_scheduled.store(true, Ordering::SeqCst);
        }
    }
    debug!("drain worker down");
}

/// Messaging link to the ICPU co-processor.
pub struct IcpuLink {
    shared: Arc<LinkShared>,
    bus: Arc<dyn MmioBus>,
    irq: Arc<dyn IrqServices>,
    hw_ops: Arc<dyn HardwareOps>,
    fw_ops: Arc<dyn FirmwareOps>,
    config: LinkConfig,
    // Serializes open/close against each other.
    lifecycle: Mutex<()>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl IcpuLink {
    /// Build a closed link. No hardware is touched until [`IcpuLink::open`].
    #[must_use]
    pub fn new(
        bus: Arc<dyn MmioBus>,
        irq: Arc<dyn IrqServices>,
        hw_ops: Arc<dyn HardwareOps>,
        fw_ops: Arc<dyn FirmwareOps>,
        config: LinkConfig,
    ) -> Self {
        Self {
            shared: Arc::new(LinkShared::new(config.instance)),
            bus,
            irq,
            hw_ops,
            fw_ops,
            config,
            lifecycle: Mutex::new(()),
            worker: Mutex::new(None),
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> LinkState {
        *self.shared.state.lock()
    }

    /// Depths of the free, pending, and response queues.
    #[must_use]
    pub fn queue_depths(&self) -> (u32, u32, u32) {
        (
            self.shared.free_q.len(),
            self.shared.pend_q.len(),
            self.shared.resp_q.len(),
        )
    }

    /// Message pool usage counters.
    #[must_use]
    pub fn pool_stats(&self) -> PoolStats {
        self.shared.pool.stats()
    }

    /// Open the link: populate the pool, bring up the mailbox channels,
    /// start the drain worker, and kick off the co-processor boot.
    ///
    /// Any failure unwinds in reverse order and leaves the link in `Init`.
    pub fn open(&self) -> Result<(), LinkError> {
        let _lifecycle = lock_plain(&self.lifecycle);
        let state = *self.shared.state.lock();
        if state != LinkState::Init {
            return Err(LinkError::BadState(state));
        }
        info!("opening icpu link");
        self.shared.reset_session();

        let client: Arc<dyn MailboxClient> = self.shared.clone();
        let tx = request_channel(
            MailboxMode::Tx,
            self.config.tx,
            self.bus.clone(),
            self.irq.clone(),
            client.clone(),
        )?;
        if let Some(budget) = self.config.tx_busy_retries {
            tx.set_busy_retries(budget);
        }
        if let Err(e) = tx.startup() {
            free_channel(tx);
            return Err(e);
        }
        *self.shared.tx_chan.lock() = Some(tx);

        for hw in &self.config.rx {
            let chan = match request_channel(
                MailboxMode::Rx,
                *hw,
                self.bus.clone(),
                self.irq.clone(),
                client.clone(),
            ) {
                Ok(chan) => chan,
                Err(e) => {
                    self.release_channels();
                    return Err(e);
                }
            };
            if let Err(e) = chan.startup() {
                free_channel(chan);
                self.release_channels();
                return Err(e);
            }
            self.shared.rx_chans.lock().push(chan);
        }

        let worker_shared = Arc::clone(&self.shared);
        let handle = match thread::Builder::new()
            .name("icpu-drain".into())
            .spawn(move || drain_worker(worker_shared))
        {
            Ok(handle) => handle,
            Err(e) => {
                warn!("drain worker spawn failed: {e}");
                self.release_channels();
                return Err(LinkError::Hardware("drain worker spawn failed"));
            }
        };
        *lock_plain(&self.worker) = Some(handle);

        self.shared.transition(LinkState::WaitFwReady);

        if let Err(e) = self.boot_coprocessor() {
            self.shared.transition(LinkState::Init);
            self.stop_worker();
            self.release_channels();
            self.shared.clear_queues();
            return Err(e);
        }
        info!("icpu link open; waiting for firmware ready");
        Ok(())
    }

    fn boot_coprocessor(&self) -> Result<(), LinkError> {
        let image = self.fw_ops.load()?;
        self.hw_ops.set_base_address(image.device_addr);
        self.fw_ops.sync_for_device();
        if let Err(e) = self.hw_ops.reset() {
            self.fw_ops.unload();
            return Err(e);
        }
        Ok(())
    }

    /// Close the link. No-op when already `Init`.
    ///
    /// Sends the best-effort power-down command, waits for the
    /// co-processor to park (falling back to forced powerdown plus a queue
    /// dump), then tears down the worker, queues, and channels.
    pub fn close(&self) {
        let _lifecycle = lock_plain(&self.lifecycle);
        let state = *self.shared.state.lock();
        if state == LinkState::Init {
            return;
        }
        info!("closing icpu link (from {state:?})");
        self.shared.transition(LinkState::Closing);

        if let Err(e) = self.hw_ops.wait_for_wfi(self.config.wfi_timeout) {
            warn!("co-processor never reached wfi: {e}; forcing powerdown");
            self.shared.dump_queues();
            if let Err(e) = self.hw_ops.force_powerdown() {
                error!("forced powerdown failed: {e}");
                self.hw_ops.panic_handler();
            }
        }

        self.stop_worker();
        self.shared.clear_queues();
        self.release_channels();
        self.fw_ops.unload();
        self.shared.reset_client();
        self.shared.transition(LinkState::Init);
    }

    fn stop_worker(&self) {
        self.shared.shutdown.store(true, Ordering::SeqCst);
        {
            let _wake = lock_plain(&self.shared.wake_lock);
            self.shared.wake_cv.notify_all();
        }
        if let Some(handle) = lock_plain(&self.worker).take() {
            if handle.join().is_err() {
                error!("drain worker panicked");
            }
        }
        self.shared.shutdown.store(false, Ordering::SeqCst);
    }

    fn release_channels(&self) {
        for chan in self.shared.rx_chans.lock().drain(..) {
            free_channel(chan);
        }
        if let Some(chan) = self.shared.tx_chan.lock().take() {
            free_channel(chan);
        }
    }

    /// Send one message to the co-processor.
    ///
    /// Callers in interrupt context transmit synchronously; process-context
    /// callers transmit directly when the link is uncontended and join the
    /// pending backlog otherwise, so the call never blocks on a busy link.
    /// When `callback` is given, the slot stays in flight until a response
    /// with the same correlation key arrives (or the send fails), and the
    /// callback receives a [`Reply`] distinguishing the two.
    pub fn send_message(
        &self,
        sender: u32,
        cookie: u64,
        callback: Option<ReplyFn>,
        priority: Priority,
        words: &[u32],
    ) -> Result<(), LinkError> {
        self.shared
            .send_message(sender, cookie, callback, priority, words, true)
    }

    /// Block until the firmware READY handshake completes.
    ///
    /// Returns immediately when the link is already `Running`; fails with
    /// [`LinkError::BootTimeout`] when `timeout` expires first, and with a
    /// state error from any state that cannot finish booting.
    pub fn wait_boot_complete(&self, timeout: Duration) -> Result<(), LinkError> {
        match *self.shared.state.lock() {
            LinkState::Running => return Ok(()),
            LinkState::WaitFwReady => {}
            other => return Err(LinkError::BadState(other)),
        }
        match self.shared.boot.wait(timeout) {
            BootStatus::Ready => Ok(()),
            BootStatus::Pending => Err(LinkError::BootTimeout),
            BootStatus::Failed | BootStatus::Idle => {
                Err(LinkError::BadState(*self.shared.state.lock()))
            }
        }
    }

    /// Register the handler for inbound commands outside the firmware
    /// range. Single slot; a new registration replaces the previous one.
    pub fn register_msg_handler(&self, cookie: u64, func: InboundFn) {
        debug!("inbound command handler registered");
        *self.shared.msg_handler.lock() = Some(Handler { cookie, func });
    }

    /// Register the handler for firmware error reports. Single slot.
    pub fn register_err_handler(&self, cookie: u64, func: InboundFn) {
        debug!("error handler registered");
        *self.shared.err_handler.lock() = Some(Handler { cookie, func });
    }
}

impl Drop for IcpuLink {
    fn drop(&mut self) {
        if *self.shared.state.lock() != LinkState::Init {
            self.close();
        }
    }
}

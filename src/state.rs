// Copyright © 2026 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Model the ICPU link lifecycle states and their transition hooks.
// Author: Lukas Bower

//! Link lifecycle state machine.
//!
//! `INIT -> WAIT_FW_READY -> RUNNING -> CLOSING -> INIT`. Every state
//! carries hook objects: `pre` runs on entry, `action` arms whatever the
//! state needs armed immediately after entry, and `post` runs on the state
//! being left, parameterized by the target. State is only ever mutated
//! through [`crate::link::LinkShared::transition`].

use std::time::Duration;

use log::{debug, warn};

use crate::link::LinkShared;

/// Retry budget for the best-effort power-down command sent when the link
/// leaves `RUNNING` for `CLOSING`.
pub(crate) const POWER_DOWN_RETRIES: u32 = 50;
/// Backoff between power-down attempts.
pub(crate) const POWER_DOWN_BACKOFF: Duration = Duration::from_millis(5);

/// Lifecycle state of the messaging link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Closed; only `open` is valid.
    Init,
    /// Opened; waiting for the firmware READY command.
    WaitFwReady,
    /// Fully operational.
    Running,
    /// Shutting down; only the power-down command may transmit.
    Closing,
}

pub(crate) trait StateHooks: Send + Sync {
    fn pre(&self, _link: &LinkShared) {}
    fn action(&self, _link: &LinkShared) {}
    fn post(&self, _link: &LinkShared, _target: LinkState) {}
}

struct InitHooks;
struct WaitFwReadyHooks;
struct RunningHooks;
struct ClosingHooks;

impl StateHooks for InitHooks {
    fn pre(&self, _link: &LinkShared) {
        debug!("link idle");
    }
}

impl StateHooks for WaitFwReadyHooks {
    // Arm the boot completion so wait_boot_complete has something to pend on.
    fn action(&self, link: &LinkShared) {
        link.boot_arm();
    }

    fn post(&self, link: &LinkShared, target: LinkState) {
        if target == LinkState::Running {
            link.boot_ready();
        } else {
            warn!("firmware boot aborted; link headed to {:?}", target);
            link.boot_fail();
        }
    }
}

impl StateHooks for RunningHooks {
    fn post(&self, link: &LinkShared, target: LinkState) {
        if target == LinkState::Closing {
            link.send_power_down();
        }
    }
}

impl StateHooks for ClosingHooks {
    fn pre(&self, _link: &LinkShared) {
        debug!("link draining for shutdown");
    }
}

pub(crate) fn hooks_for(state: LinkState) -> &'static dyn StateHooks {
    match state {
        LinkState::Init => &InitHooks,
        LinkState::WaitFwReady => &WaitFwReadyHooks,
        LinkState::Running => &RunningHooks,
        LinkState::Closing => &ClosingHooks,
    }
}

// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Affinity info state machine of a CPU.
//!
//! ```text
//!        CPU_ON          on_finish
//!  OFF ---------> ON_PENDING ---------> ON
//!   ^                 |                  |
//!   +-- hook failed --+                  |
//!   +----------------- CPU_OFF ----------+
//! ```
//!
//! The state is stored in the CPU power node, so every transition happens under the CPU's lock.

use crate::error::{FatalError, PsciError, fatal};
use arm_psci::AffinityInfo;
use log::trace;

/// Affinity info of a single CPU with the allowed transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuLifecycle {
    state: AffinityInfo,
}

impl CpuLifecycle {
    /// Creates the state of a CPU which has not been started yet.
    pub const fn new() -> Self {
        Self {
            state: AffinityInfo::Off,
        }
    }

    /// Returns the current affinity info. Does not change the state.
    pub fn state(&self) -> AffinityInfo {
        self.state
    }

    /// Marks the cold booting CPU as running.
    pub fn boot(&mut self, cpu_index: usize) {
        self.transition(cpu_index, AffinityInfo::Off, AffinityInfo::On);
    }

    /// Starts a `CPU_ON` request targeting this CPU.
    ///
    /// Only a CPU which is off can be turned on, every other state rejects the request without
    /// touching the state.
    pub fn request_on(&mut self) -> Result<(), PsciError> {
        match self.state {
            AffinityInfo::Off => {
                self.state = AffinityInfo::OnPending;
                Ok(())
            }
            AffinityInfo::OnPending => Err(PsciError::OnPending),
            AffinityInfo::On => Err(PsciError::AlreadyOn),
        }
    }

    /// Reverts a `CPU_ON` request which the platform failed to carry out.
    pub fn cancel_on(&mut self, cpu_index: usize) {
        self.transition(cpu_index, AffinityInfo::OnPending, AffinityInfo::Off);
    }

    /// Finishes a `CPU_ON` request on the CPU which has been turned on.
    pub fn complete_on(&mut self, cpu_index: usize) {
        self.transition(cpu_index, AffinityInfo::OnPending, AffinityInfo::On);
    }

    /// Commits a `CPU_OFF` request.
    pub fn commit_off(&mut self, cpu_index: usize) {
        self.transition(cpu_index, AffinityInfo::On, AffinityInfo::Off);
    }

    fn transition(&mut self, cpu_index: usize, from: AffinityInfo, to: AffinityInfo) {
        if self.state != from {
            fatal(FatalError::InvalidAffinityTransition { cpu_index });
        }
        trace!("CPU {cpu_index} affinity info {from:?} -> {to:?}");
        self.state = to;
    }
}

impl Default for CpuLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

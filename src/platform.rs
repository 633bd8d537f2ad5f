// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Contract between the engine and the platform port.

#[cfg(test)]
pub(crate) mod test;

use crate::{
    aarch64::{dsb_sy, wfi},
    coordinator::PsciCompositePowerState,
    error::PsciError,
    warm_boot::WarmBootRecord,
};
use arm_psci::{EntryPoint, HwState, Mpidr, PowerState};
use arm_sysregs::read_isr_el1;
use bitflags::bitflags;
use core::fmt::Debug;

bitflags! {
    /// Optional platform feature flags
    #[derive(Debug, Eq, PartialEq, Clone, Copy)]
    #[repr(transparent)]
    pub struct PsciPlatformOptionalFeatures: u64 {
        /// `NODE_HW_STATE` is implemented by [`PsciPlatformInterface::node_hw_state`].
        const NODE_HW_STATE = 1 << 0;
        /// `SYSTEM_SUSPEND` is implemented by
        /// [`PsciPlatformInterface::sys_suspend_power_state`].
        const SYSTEM_SUSPEND = 1 << 1;
        /// `PSCI_STAT_RESIDENCY` and `PSCI_STAT_COUNT` are available.
        const STAT = 1 << 2;
    }
}

/// Platform-specific power state interface
///
/// The platform has to provide a platform-specific power state type which implements this trait
/// and all of the dependent traits.
///
/// The type has to implement the `Ord` trait in a way the states are in ascending order from
/// running state to power down state. The engine only ever compares states, it never interprets
/// their values.
pub trait PlatformPowerStateInterface: Debug + Clone + Copy + PartialEq + Ord + Send + Sync {
    /// Deepest power down state of a domain.
    const OFF: Self;
    /// Running state of a domain.
    const RUN: Self;

    /// Classifies the state.
    fn power_state_type(&self) -> PowerStateType;
}

/// Classification of a local power state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerStateType {
    /// The domain loses its context.
    PowerDown,
    /// The domain keeps its context but does not execute.
    StandbyOrRetention,
    /// The domain is running.
    Run,
}

/// Power state type of a platform.
pub type PlatformPowerState<P> = <P as PsciPlatformInterface>::PlatformPowerState;

/// Composite power state of a platform.
pub type CompositeState<P> = PsciCompositePowerState<PlatformPowerState<P>>;

/// Platform hooks of the power management engine.
///
/// Every hook receives the index of the calling CPU. Per level hooks are called once for each
/// affected level while the lock of that level is held, from the CPU level outwards when powering
/// down and from the outermost level inwards when powering up.
pub trait PsciPlatformInterface: Sync {
    /// Number of CPUs of the platform.
    const CORE_COUNT: usize;
    /// Highest affinity level of the power domain tree.
    const MAX_POWER_LEVEL: usize;
    /// Optional features implemented by the platform.
    const FEATURES: PsciPlatformOptionalFeatures;

    /// Local power state of a single power domain.
    type PlatformPowerState: PlatformPowerStateInterface;

    /// Describes the power domain tree in breadth-first order.
    ///
    /// The first entry is the number of domains at `MAX_POWER_LEVEL`. It is followed by the child
    /// count of every node of the level below, one level after the other, finishing with the
    /// number of CPUs in each level 1 domain.
    fn topology() -> &'static [usize];

    /// Converts the `CPU_SUSPEND` power state parameter into a composite power state. Returns
    /// `None` for state IDs the platform does not support.
    fn validate_power_state(
        power_state: PowerState,
    ) -> Option<PsciCompositePowerState<Self::PlatformPowerState>>;

    /// Checks whether the non-secure entry point is valid.
    fn validate_ns_entrypoint(&self, _entry: &EntryPoint) -> bool {
        true
    }

    /// Chooses the state of a domain at `level` from the states requested by its CPUs.
    ///
    /// The engine never lets a domain go deeper than the shallowest request, so the result is
    /// clamped to that.
    fn coordinate_level(
        &self,
        _level: usize,
        requested_states: &[Self::PlatformPowerState],
    ) -> Self::PlatformPowerState {
        requested_states
            .iter()
            .copied()
            .min()
            .unwrap_or(Self::PlatformPowerState::RUN)
    }

    /// Puts the calling CPU into a standby state which only affects the CPU power domain. Returns
    /// once the CPU has been woken up by an interrupt.
    fn cpu_standby(&self, cpu_index: usize, cpu_state: Self::PlatformPowerState);

    /// Prepares the domain at `level` for entering the target state of that level.
    fn power_domain_suspend(
        &self,
        cpu_index: usize,
        level: usize,
        target_state: &PsciCompositePowerState<Self::PlatformPowerState>,
    );

    /// Restores the domain at `level` after waking up from the previous state of that level.
    fn power_domain_suspend_finish(
        &self,
        cpu_index: usize,
        level: usize,
        previous_state: &PsciCompositePowerState<Self::PlatformPowerState>,
    );

    /// Called before the CPU_OFF coordination starts. An error cancels the request.
    fn power_domain_off_early(&self, _cpu_index: usize) -> Result<(), PsciError> {
        Ok(())
    }

    /// Prepares the domain at `level` for being turned off.
    fn power_domain_off(
        &self,
        cpu_index: usize,
        level: usize,
        target_state: &PsciCompositePowerState<Self::PlatformPowerState>,
    );

    /// Enters the previously prepared power down state. Does not return, the CPU continues at the
    /// warm boot entry point once it is powered up again.
    fn power_domain_power_down_wfi(
        &self,
        _cpu_index: usize,
        _target_state: &PsciCompositePowerState<Self::PlatformPowerState>,
    ) -> ! {
        dsb_sy();
        loop {
            wfi();
        }
    }

    /// Powers on the CPU identified by `mpidr`.
    fn power_domain_on(&self, mpidr: Mpidr) -> Result<(), PsciError>;

    /// Restores the domain at `level` on the first CPU which came up after a `CPU_ON` request.
    fn power_domain_on_finish(
        &self,
        cpu_index: usize,
        level: usize,
        previous_state: &PsciCompositePowerState<Self::PlatformPowerState>,
    );

    /// Turns off the system.
    fn system_off(&self, cpu_index: usize) -> !;

    /// Resets the system.
    fn system_reset(&self, cpu_index: usize) -> !;

    /// Returns the composite power state used by `SYSTEM_SUSPEND`. It has to power down the
    /// highest level.
    fn sys_suspend_power_state(&self) -> PsciCompositePowerState<Self::PlatformPowerState> {
        unimplemented!("SYSTEM_SUSPEND is not implemented for the platform")
    }

    /// Reads the hardware state of a power domain.
    fn node_hw_state(&self, _mpidr: Mpidr, _power_level: usize) -> Result<HwState, PsciError> {
        Err(PsciError::NotSupported)
    }

    /// Checks if the CPU has pending interrupts
    fn has_pending_interrupts(&self, _cpu_index: usize) -> bool {
        isr_pending()
    }

    /// Returns a monotonic timestamp for the power state statistics.
    fn timestamp(&self) -> u64 {
        0
    }

    /// Copies the warm boot record of a CPU into memory which keeps its content while the CPU's
    /// power domains are off.
    fn save_warm_boot_record(&self, _cpu_index: usize, _record: &WarmBootRecord) {}

    /// Reads back a record stored by [`Self::save_warm_boot_record`]. `None` means the platform
    /// has no separate retained storage and the engine's own copy is used.
    fn load_warm_boot_record(&self, _cpu_index: usize) -> Option<WarmBootRecord> {
        None
    }
}

/// Checks whether any of the interrupt pending bits of `ISR_EL1` is set on the calling CPU.
pub fn isr_pending() -> bool {
    !read_isr_el1().is_empty()
}

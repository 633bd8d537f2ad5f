// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Notifications of the secure world about power management events.

use crate::error::PsciError;
use arm_psci::{MigrateInfoType, Mpidr};

/// Placement of the trusted OS, as reported to `MIGRATE_INFO_TYPE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResidentTrustedOs {
    /// Uniprocessor trusted OS resident on the given CPU which can be migrated.
    UpMigrateCapable(Mpidr),
    /// Uniprocessor trusted OS resident on the given CPU which cannot be migrated.
    UpNotMigrateCapable(Mpidr),
    /// There is no trusted OS or it runs on every CPU.
    NotPresentOrMultiprocessor,
}

impl ResidentTrustedOs {
    /// Return value of `MIGRATE_INFO_TYPE`.
    pub fn info_type(&self) -> MigrateInfoType {
        match self {
            Self::UpMigrateCapable(_) => MigrateInfoType::MigrateCapable,
            Self::UpNotMigrateCapable(_) => MigrateInfoType::NotMigrateCapable,
            Self::NotPresentOrMultiprocessor => MigrateInfoType::MigrationNotRequired,
        }
    }

    /// The CPU the trusted OS is resident on, if it is a uniprocessor OS.
    pub fn resident_cpu(&self) -> Option<Mpidr> {
        match *self {
            Self::UpMigrateCapable(mpidr) | Self::UpNotMigrateCapable(mpidr) => Some(mpidr),
            Self::NotPresentOrMultiprocessor => None,
        }
    }
}

/// PSCI SPM interface.
///
/// Contains the callbacks that the PSCI implementation uses to inform the Secure World about power
/// management events. Every method is called on the CPU the event belongs to.
pub trait PsciSpmInterface: Sync {
    /// The CPU is about to be turned off. An error denies the `CPU_OFF` request.
    fn cpu_off(&self, _cpu_index: usize) -> Result<(), PsciError> {
        Ok(())
    }

    /// The CPU enters a power down state which loses the context of the levels up to
    /// `max_off_level`.
    fn cpu_suspend(&self, _cpu_index: usize, _max_off_level: usize) {}

    /// The CPU woke up from a power down state.
    fn cpu_suspend_finish(&self, _cpu_index: usize, _max_off_level: usize) {}

    /// The CPU has been turned on by `CPU_ON`.
    fn cpu_on_finish(&self, _cpu_index: usize) {}

    /// The system is about to be turned off.
    fn system_off(&self) {}

    /// The system is about to be reset.
    fn system_reset(&self) {}

    /// Describes where the trusted OS runs.
    fn migrate_info(&self) -> ResidentTrustedOs {
        ResidentTrustedOs::NotPresentOrMultiprocessor
    }

    /// Moves the trusted OS from the calling CPU to `target`.
    fn migrate(&self, _cpu_index: usize, _target: Mpidr) -> Result<(), PsciError> {
        Err(PsciError::NotSupported)
    }
}

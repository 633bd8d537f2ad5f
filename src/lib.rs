// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Platform independent PSCI power domain coordination for EL3 firmware.
//!
//! The engine keeps the state of every power domain of the platform in a tree of locked nodes and
//! decides, for each `CPU_OFF`, `CPU_SUSPEND` and `SYSTEM_SUSPEND` request, which domains can be
//! powered down and which CPU is the last one running in each of them. The platform port provides
//! the topology and the hooks which actually change the power state of the hardware through
//! [`PsciPlatformInterface`].
//!
//! The SMC dispatcher decodes the PSCI calls and forwards them to the methods of [`Psci`] together
//! with the index of the calling CPU. After a warm reset each CPU calls [`Psci::handle_cpu_boot`]
//! to find out where the non-secure world continues.

#![cfg_attr(not(test), no_std)]

mod aarch64;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod lifecycle;
pub mod logger;
pub mod platform;
pub mod power_domain_tree;
pub mod psci;
pub mod spm;
pub mod stats;
pub mod topology;
pub mod warm_boot;

pub use coordinator::PsciCompositePowerState;
pub use error::{FatalError, PsciError};
pub use platform::{
    PlatformPowerStateInterface, PowerStateType, PsciPlatformInterface,
    PsciPlatformOptionalFeatures,
};
pub use psci::Psci;
pub use spm::{PsciSpmInterface, ResidentTrustedOs};
pub use warm_boot::{WakeUpReason, WarmBootRecord};

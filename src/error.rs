// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Error types of the power management engine.

use arm_psci::ErrorCode;
use core::fmt::{self, Display, Formatter};
use log::error;

/// Rejection reported to the caller of a PSCI operation.
///
/// These are ordinary outcomes of a request and never abort the firmware. The SMC layer converts
/// them to the PSCI return codes with [`ErrorCode::from`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PsciError {
    /// Unknown MPIDR, power state or affinity level.
    InvalidParameters,
    /// The entry point was rejected by the platform.
    InvalidAddress,
    /// CPU_ON targeted a CPU which is already running.
    AlreadyOn,
    /// CPU_ON targeted a CPU which has a CPU_ON request in flight.
    OnPending,
    /// The request needs this CPU to be the last one running in the affected domains.
    DeniedByTopology,
    /// The platform or the secure payload refused the request.
    Denied,
    /// The target is not the CPU the request has to be issued on.
    NotPresent,
    /// The call is not implemented by this platform.
    NotSupported,
    /// The platform failed to carry out the request.
    InternalFailure,
}

impl From<PsciError> for ErrorCode {
    fn from(value: PsciError) -> Self {
        match value {
            PsciError::InvalidParameters => Self::InvalidParameters,
            PsciError::InvalidAddress => Self::InvalidAddress,
            PsciError::AlreadyOn => Self::AlreadyOn,
            PsciError::OnPending => Self::OnPending,
            PsciError::DeniedByTopology | PsciError::Denied => Self::Denied,
            PsciError::NotPresent => Self::NotPresent,
            PsciError::NotSupported => Self::NotSupported,
            PsciError::InternalFailure => Self::InternalFailure,
        }
    }
}

impl Display for PsciError {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        let message = match self {
            Self::InvalidParameters => "invalid parameters",
            Self::InvalidAddress => "invalid entry point address",
            Self::AlreadyOn => "CPU already on",
            Self::OnPending => "CPU on pending",
            Self::DeniedByTopology => "other CPUs are still running",
            Self::Denied => "denied",
            Self::NotPresent => "not present",
            Self::NotSupported => "not supported",
            Self::InternalFailure => "internal failure",
        };
        f.write_str(message)
    }
}

/// Errors in the platform supplied topology descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopologyError {
    /// `MAX_POWER_LEVEL` is zero or above the supported limit.
    UnsupportedPowerLevel(usize),
    /// The descriptor ended before every node had its child count.
    DescriptorTooShort,
    /// The descriptor has entries which were not consumed.
    TrailingEntries(usize),
    /// A node was declared without any child.
    EmptyDomain {
        /// Affinity level of the children which are missing.
        level: usize,
    },
    /// A node has more children than the affinity field can address.
    TooManyChildren(usize),
    /// The descriptor describes a different number of CPUs than the platform declares.
    CoreCountMismatch {
        /// Platform `CORE_COUNT`.
        expected: usize,
        /// CPUs found in the descriptor.
        found: usize,
    },
    /// The arena capacity is too small for the topology.
    CapacityExceeded,
}

impl Display for TopologyError {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Self::UnsupportedPowerLevel(level) => write!(f, "unsupported max power level {level}"),
            Self::DescriptorTooShort => write!(f, "topology descriptor too short"),
            Self::TrailingEntries(count) => {
                write!(f, "{count} unused entries at the end of the topology descriptor")
            }
            Self::EmptyDomain { level } => write!(f, "domain without children at level {level}"),
            Self::TooManyChildren(count) => write!(f, "{count} children in a single domain"),
            Self::CoreCountMismatch { expected, found } => {
                write!(f, "topology has {found} CPUs, platform declares {expected}")
            }
            Self::CapacityExceeded => write!(f, "power domain arena capacity exceeded"),
        }
    }
}

/// Contract violations which leave the power domain state unrecoverable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatalError {
    /// The platform topology descriptor is malformed.
    Topology(TopologyError),
    /// A CPU woke up in a state which does not match its warm boot record.
    UnexpectedWakeUp {
        /// Index of the waking CPU.
        cpu_index: usize,
    },
    /// The warm boot record read back from retained memory cannot be decoded.
    CorruptWarmBootRecord {
        /// Index of the waking CPU.
        cpu_index: usize,
    },
    /// An affinity info transition which the state machine does not allow.
    InvalidAffinityTransition {
        /// Index of the CPU whose state was changed.
        cpu_index: usize,
    },
    /// A platform hook returned a power state which breaks the composite state rules.
    InvalidPlatformPowerState,
    /// A composite power state without any levels.
    EmptyCompositePowerState,
}

impl Display for FatalError {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Self::Topology(error) => write!(f, "invalid topology: {error}"),
            Self::UnexpectedWakeUp { cpu_index } => {
                write!(f, "unexpected wake up of CPU {cpu_index}")
            }
            Self::CorruptWarmBootRecord { cpu_index } => {
                write!(f, "corrupt warm boot record of CPU {cpu_index}")
            }
            Self::InvalidAffinityTransition { cpu_index } => {
                write!(f, "invalid affinity info transition of CPU {cpu_index}")
            }
            Self::InvalidPlatformPowerState => write!(f, "invalid platform power state"),
            Self::EmptyCompositePowerState => write!(f, "composite power state without levels"),
        }
    }
}

impl From<TopologyError> for FatalError {
    fn from(value: TopologyError) -> Self {
        Self::Topology(value)
    }
}

/// Reports a fatal error and stops the calling CPU.
///
/// The embedding firmware's panic handler decides how the system is brought down.
#[track_caller]
pub fn fatal(error: FatalError) -> ! {
    error!("PSCI fatal error: {error}");
    panic!("PSCI fatal error: {error}");
}

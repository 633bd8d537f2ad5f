// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Warm boot records and the power up path of CPUs woken by `CPU_ON` or from a suspend state.

use crate::{
    coordinator::set_path_to_run,
    error::{FatalError, fatal},
    platform::{CompositeState, PsciPlatformInterface},
    power_domain_tree::LockedPath,
    psci::Psci,
    topology::CPU_POWER_LEVEL,
};
use arm_psci::{AffinityInfo, EntryPoint};
use log::debug;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// Reason of the next boot of a CPU.
#[derive(Clone, Copy, Debug, Eq, IntoPrimitive, PartialEq, TryFromPrimitive)]
#[repr(u32)]
pub enum WarmBootKind {
    /// The CPU has not been prepared for a warm boot.
    ColdBoot = 0,
    /// The CPU has been turned on by `CPU_ON`.
    CpuOn = 1,
    /// The CPU wakes up from a power down suspend state.
    Suspend = 2,
}

/// Per CPU record which has to survive the power down of the CPU's power domains.
///
/// Zeroed memory reads as a cold boot record.
#[derive(Clone, Copy, Debug, Eq, FromBytes, Immutable, IntoBytes, KnownLayout, PartialEq)]
#[repr(C)]
pub struct WarmBootRecord {
    kind: u32,
    target_power_level: u32,
    entry_point_address: u64,
    context_id: u64,
    entry_width: u32,
    reserved: u32,
}

impl WarmBootRecord {
    /// Record of a CPU which boots without being prepared.
    pub const COLD_BOOT: Self = Self {
        kind: WarmBootKind::ColdBoot as u32,
        target_power_level: 0,
        entry_point_address: 0,
        context_id: 0,
        entry_width: 0,
        reserved: 0,
    };

    /// Record of a CPU targeted by `CPU_ON`.
    pub fn cpu_on(entry: &EntryPoint) -> Self {
        Self::new(WarmBootKind::CpuOn, CPU_POWER_LEVEL, entry)
    }

    /// Record of a CPU entering a power down state which affects the levels up to
    /// `target_power_level`.
    pub fn suspend(entry: &EntryPoint, target_power_level: usize) -> Self {
        Self::new(WarmBootKind::Suspend, target_power_level, entry)
    }

    fn new(kind: WarmBootKind, target_power_level: usize, entry: &EntryPoint) -> Self {
        let entry_width = match entry {
            EntryPoint::Entry32 { .. } => 32,
            EntryPoint::Entry64 { .. } => 64,
        };

        Self {
            kind: kind.into(),
            // Power levels are bound by `MAX_POWER_LEVEL_LIMIT`.
            target_power_level: target_power_level as u32,
            entry_point_address: entry.entry_point_address(),
            context_id: entry.context_id(),
            entry_width,
            reserved: 0,
        }
    }

    /// Decodes the boot reason, `None` if the record is corrupted.
    pub fn kind(&self) -> Option<WarmBootKind> {
        WarmBootKind::try_from(self.kind).ok()
    }

    /// Highest level of the suspend request which prepared the record.
    pub fn target_power_level(&self) -> usize {
        self.target_power_level as usize
    }

    /// Entry point of the non-secure world, `None` for cold boot records.
    pub fn entry_point(&self) -> Option<EntryPoint> {
        match self.entry_width {
            32 => Some(EntryPoint::Entry32 {
                entry_point_address: u32::try_from(self.entry_point_address).ok()?,
                context_id: u32::try_from(self.context_id).ok()?,
            }),
            64 => Some(EntryPoint::Entry64 {
                entry_point_address: self.entry_point_address,
                context_id: self.context_id,
            }),
            _ => None,
        }
    }
}

/// Result of [`Psci::handle_cpu_boot`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeUpReason {
    /// The CPU was not woken up by the power management engine and has to run the cold boot path.
    ColdBoot,
    /// The CPU has been turned on by `CPU_ON`.
    CpuOn(EntryPoint),
    /// The CPU woke up from a power down suspend state.
    SuspendFinished(EntryPoint),
}

impl<P: PsciPlatformInterface> Psci<P> {
    /// Called on the reset path of a CPU to find out why it boots. For warm boots this restores
    /// every power domain that was turned off on the way down, from the outermost level inwards,
    /// and returns the entry point of the non-secure world.
    pub fn handle_cpu_boot(&self, cpu_index: usize) -> WakeUpReason {
        let mut path = self.power_domain_tree().acquire_path(cpu_index, CPU_POWER_LEVEL);

        let record = self
            .platform()
            .load_warm_boot_record(cpu_index)
            .unwrap_or(*path.cpu().warm_boot_record());
        let Some(kind) = record.kind() else {
            fatal(FatalError::CorruptWarmBootRecord { cpu_index });
        };

        let end_level = match (kind, path.cpu().affinity_info()) {
            (WarmBootKind::ColdBoot, AffinityInfo::Off) => {
                debug!("CPU {cpu_index} cold boot");
                return WakeUpReason::ColdBoot;
            }
            (WarmBootKind::CpuOn, AffinityInfo::OnPending) => {
                self.power_domain_tree().topology().max_level()
            }
            (WarmBootKind::Suspend, AffinityInfo::On) => record.target_power_level(),
            _ => fatal(FatalError::UnexpectedWakeUp { cpu_index }),
        };

        let Some(entry) = record.entry_point() else {
            fatal(FatalError::CorruptWarmBootRecord { cpu_index });
        };
        if end_level > self.power_domain_tree().topology().max_level() {
            fatal(FatalError::CorruptWarmBootRecord { cpu_index });
        }

        debug!("CPU {cpu_index} warm boot {kind:?}");

        path.extend_to(end_level);
        self.finish_power_up(&mut path, kind);

        path.cpu_mut().set_warm_boot_record(WarmBootRecord::COLD_BOOT);
        self.platform()
            .save_warm_boot_record(cpu_index, &WarmBootRecord::COLD_BOOT);

        match kind {
            WarmBootKind::CpuOn => WakeUpReason::CpuOn(entry),
            _ => WakeUpReason::SuspendFinished(entry),
        }
    }

    /// Restores the power domains of the locked path which are not running, from the outermost
    /// level inwards, and sets the whole path to running.
    pub(crate) fn finish_power_up(
        &self,
        path: &mut LockedPath<'_, P::PlatformPowerState>,
        kind: WarmBootKind,
    ) {
        let cpu_index = path.cpu_index();
        let mut previous_state =
            CompositeState::<P>::run(self.power_domain_tree().topology().max_level());
        previous_state.set_local_states_from_path(path);

        let timestamp = self.platform().timestamp();
        for level in previous_state.affected_levels() {
            if level == CPU_POWER_LEVEL {
                path.cpu_mut().stats_mut().exit(timestamp);
            } else {
                path.ancestor_mut(level).stats_mut().exit(timestamp);
            }
        }

        for level in previous_state.affected_levels().rev() {
            match kind {
                WarmBootKind::CpuOn => {
                    self.platform()
                        .power_domain_on_finish(cpu_index, level, &previous_state)
                }
                _ => self
                    .platform()
                    .power_domain_suspend_finish(cpu_index, level, &previous_state),
            }
        }

        match kind {
            WarmBootKind::CpuOn => {
                let cpu = path.cpu_mut();
                cpu.lifecycle_mut().complete_on(cpu_index);
                cpu.mark_booted();
                if let Some(spm) = self.spm() {
                    spm.cpu_on_finish(cpu_index);
                }
            }
            _ => {
                // Retention keeps the context of the secure payload.
                if let Some(spm) = self.spm()
                    && previous_state.find_highest_power_down_level().is_some()
                {
                    spm.cpu_suspend_finish(cpu_index, previous_state.max_off_level());
                }
            }
        }

        set_path_to_run(path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        platform::{
            PlatformPowerStateInterface,
            test::{HookCall, QuadCoreTopology, TestPlatform, TestPowerState, TestTopology},
        },
        psci::tests::{ENTRY_64, expect_cpu_power_down},
    };
    use arm_psci::PowerState;
    use std::panic::{AssertUnwindSafe, catch_unwind};
    use zerocopy::FromZeros;

    #[test]
    fn record_layout() {
        assert_eq!(32, size_of::<WarmBootRecord>());
        assert_eq!(WarmBootRecord::COLD_BOOT, WarmBootRecord::new_zeroed());
        assert_eq!(Some(WarmBootKind::ColdBoot), WarmBootRecord::COLD_BOOT.kind());
        assert_eq!(None, WarmBootRecord::COLD_BOOT.entry_point());
    }

    #[test]
    fn record_cpu_on() {
        let record = WarmBootRecord::cpu_on(&ENTRY_64);
        assert_eq!(Some(WarmBootKind::CpuOn), record.kind());
        assert_eq!(Some(ENTRY_64), record.entry_point());

        let bytes = record.as_bytes();
        assert_eq!(&1u32.to_ne_bytes(), &bytes[0..4]);
        assert_eq!(record, WarmBootRecord::read_from_bytes(bytes).unwrap());
    }

    #[test]
    fn record_suspend_32bit_entry() {
        let entry = EntryPoint::Entry32 {
            entry_point_address: 0x8000_0000,
            context_id: 0x1234,
        };
        let record = WarmBootRecord::suspend(&entry, 1);
        assert_eq!(Some(WarmBootKind::Suspend), record.kind());
        assert_eq!(1, record.target_power_level());
        assert_eq!(Some(entry), record.entry_point());
    }

    #[test]
    fn record_corrupted() {
        let mut bytes = [0u8; 32];
        bytes[0] = 7;
        let record = WarmBootRecord::read_from_bytes(&bytes[..]).unwrap();
        assert_eq!(None, record.kind());

        bytes[0] = 1;
        bytes[24] = 16;
        let record = WarmBootRecord::read_from_bytes(&bytes[..]).unwrap();
        assert_eq!(None, record.entry_point());
    }

    #[test]
    fn cold_boot_of_off_cpu() {
        let psci = Psci::new(TestPlatform::<QuadCoreTopology>::new(), 0);
        assert_eq!(WakeUpReason::ColdBoot, psci.handle_cpu_boot(2));
        assert_eq!(
            Ok(AffinityInfo::Off),
            psci.affinity_info(QuadCoreTopology::mpidr(2), 0)
        );
    }

    #[test]
    #[should_panic(expected = "unexpected wake up of CPU 0")]
    fn running_cpu_cold_boots() {
        let psci = Psci::new(TestPlatform::<QuadCoreTopology>::new(), 0);
        psci.handle_cpu_boot(0);
    }

    #[test]
    fn cpu_on_finish() {
        let psci = Psci::new(TestPlatform::<QuadCoreTopology>::new(), 0);
        psci.cpu_on(0, QuadCoreTopology::mpidr(3), ENTRY_64).unwrap();
        psci.platform().take_calls();

        assert_eq!(WakeUpReason::CpuOn(ENTRY_64), psci.handle_cpu_boot(3));
        assert_eq!(
            Ok(AffinityInfo::On),
            psci.affinity_info(QuadCoreTopology::mpidr(3), 0)
        );
        // The cluster is already running, only the CPU level is restored.
        assert_eq!(
            vec![HookCall::PowerDomainOnFinish {
                cpu_index: 3,
                level: 0
            }],
            psci.platform().take_calls()
        );
        assert!(psci.secondaries_brought_up());
    }

    #[test]
    #[should_panic(expected = "unexpected wake up of CPU 3")]
    fn warm_boot_record_is_consumed() {
        let psci = Psci::new(TestPlatform::<QuadCoreTopology>::new(), 0);
        psci.cpu_on(0, QuadCoreTopology::mpidr(3), ENTRY_64).unwrap();
        psci.handle_cpu_boot(3);
        psci.handle_cpu_boot(3);
    }

    #[test]
    fn retained_record_is_used() {
        let platform = TestPlatform::<QuadCoreTopology>::new();
        platform.set_retained_storage(true);
        let psci = Psci::new(platform, 0);

        psci.cpu_on(0, QuadCoreTopology::mpidr(1), ENTRY_64).unwrap();
        assert_eq!(
            Some(WarmBootRecord::cpu_on(&ENTRY_64)),
            psci.platform().load_warm_boot_record(1)
        );

        // Corrupt the retained copy, the engine's own copy is ignored.
        psci.platform().corrupt_retained_record(1);
        let message = catch_unwind(AssertUnwindSafe(|| psci.handle_cpu_boot(1))).unwrap_err();
        assert_eq!(
            "PSCI fatal error: corrupt warm boot record of CPU 1",
            message.downcast_ref::<String>().unwrap()
        );
    }

    #[test]
    fn suspend_finish_restores_levels_in_reverse() {
        let psci = Psci::new(TestPlatform::<QuadCoreTopology>::new(), 0);
        psci.cpu_on(0, QuadCoreTopology::mpidr(1), ENTRY_64).unwrap();
        psci.handle_cpu_boot(1);
        expect_cpu_power_down(|| psci.cpu_off(0));
        psci.platform().take_calls();

        // CPU 1 is the last running CPU of the cluster.
        expect_cpu_power_down(|| psci.cpu_suspend(1, PowerState::PowerDown(0x33), ENTRY_64));
        assert_eq!(
            vec![
                HookCall::PowerDomainSuspend {
                    cpu_index: 1,
                    level: 0
                },
                HookCall::PowerDomainSuspend {
                    cpu_index: 1,
                    level: 1
                },
                HookCall::PowerDownWfi { cpu_index: 1 },
            ],
            psci.platform().take_calls()
        );

        assert_eq!(
            WakeUpReason::SuspendFinished(ENTRY_64),
            psci.handle_cpu_boot(1)
        );
        assert_eq!(
            vec![
                HookCall::PowerDomainSuspendFinish {
                    cpu_index: 1,
                    level: 1
                },
                HookCall::PowerDomainSuspendFinish {
                    cpu_index: 1,
                    level: 0
                },
            ],
            psci.platform().take_calls()
        );

        let path = psci.power_domain_tree().acquire_path(1, 1);
        assert_eq!(TestPowerState::RUN, path.cpu().local_state());
        assert_eq!(TestPowerState::RUN, path.ancestor(1).local_state());
    }
}

// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! A fake platform for unit tests which records the hooks called by the engine.

use super::{
    PlatformPowerStateInterface, PowerStateType, PsciPlatformInterface,
    PsciPlatformOptionalFeatures,
};
use crate::{
    coordinator::PsciCompositePowerState, error::PsciError, topology::Topology,
    warm_boot::WarmBootRecord,
};
use arm_psci::{EntryPoint, HwState, Mpidr, PowerState};
use core::{
    marker::PhantomData,
    sync::atomic::{AtomicBool, AtomicU64, Ordering},
};
use spin::mutex::SpinMutex;
use zerocopy::{FromBytes, IntoBytes};

// Functions that normally do not return make it impossible to test any PSCI call which ends in
// these functions. The test platform calls panic with the following magic strings that can be
// caught by `catch_unwind`. This way the test can expect unwind the calls on power down testing.
pub const POWER_DOWN_WFI_MAGIC: &str = "POWER_DOWN_WFI_MAGIC";
pub const SYSTEM_OFF_MAGIC: &str = "SYSTEM_OFF_MAGIC";
pub const SYSTEM_RESET_MAGIC: &str = "SYSTEM_RESET_MAGIC";

const RECORD_SIZE: usize = size_of::<WarmBootRecord>();

/// Power states of the test platform, ordered from the shallowest to the deepest.
#[derive(PartialEq, PartialOrd, Debug, Eq, Ord, Clone, Copy)]
pub enum TestPowerState {
    On,
    Standby0,
    Standby1,
    Standby2,
    PowerDown,
}

impl PlatformPowerStateInterface for TestPowerState {
    const OFF: Self = TestPowerState::PowerDown;
    const RUN: Self = TestPowerState::On;

    fn power_state_type(&self) -> PowerStateType {
        match self {
            TestPowerState::PowerDown => PowerStateType::PowerDown,
            TestPowerState::Standby0 | TestPowerState::Standby1 | TestPowerState::Standby2 => {
                PowerStateType::StandbyOrRetention
            }
            TestPowerState::On => PowerStateType::Run,
        }
    }
}

/// Shape of the power domain tree of a [`TestPlatform`].
pub trait TestTopology: Send + Sync + 'static {
    const CORE_COUNT: usize;
    const MAX_POWER_LEVEL: usize;
    const TOPOLOGY: &'static [usize];

    /// The MPIDR of a CPU, for use in tests.
    fn mpidr(cpu_index: usize) -> Mpidr {
        Topology::new(Self::TOPOLOGY, Self::CORE_COUNT, Self::MAX_POWER_LEVEL)
            .cpu(cpu_index)
            .mpidr
    }
}

/// System, SoC, cluster and core levels. Each cluster has 3 cores except the last one which has 4.
pub struct FourLevelTopology;

impl TestTopology for FourLevelTopology {
    const CORE_COUNT: usize = 13;
    const MAX_POWER_LEVEL: usize = 3;
    const TOPOLOGY: &'static [usize] = &[1, 2, 2, 2, 3, 3, 3, 4];
}

/// A single cluster of four cores.
pub struct QuadCoreTopology;

impl TestTopology for QuadCoreTopology {
    const CORE_COUNT: usize = 4;
    const MAX_POWER_LEVEL: usize = 1;
    const TOPOLOGY: &'static [usize] = &[1, 4];
}

/// A platform hook invoked by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookCall {
    CpuStandby {
        cpu_index: usize,
        state: TestPowerState,
    },
    PowerDomainSuspend {
        cpu_index: usize,
        level: usize,
    },
    PowerDomainSuspendFinish {
        cpu_index: usize,
        level: usize,
    },
    PowerDomainOff {
        cpu_index: usize,
        level: usize,
    },
    PowerDownWfi {
        cpu_index: usize,
    },
    PowerDomainOn {
        mpidr: Mpidr,
    },
    PowerDomainOnFinish {
        cpu_index: usize,
        level: usize,
    },
    SystemOff {
        cpu_index: usize,
    },
    SystemReset {
        cpu_index: usize,
    },
}

/// A fake platform for unit tests.
///
/// Only the hooks which change the power state of a domain are recorded, queries are not.
pub struct TestPlatform<T> {
    calls: SpinMutex<Vec<HookCall>>,
    fail_power_on: AtomicBool,
    deny_power_off: AtomicBool,
    pending_interrupt: AtomicBool,
    retained_storage: AtomicBool,
    retained_records: SpinMutex<Vec<[u8; RECORD_SIZE]>>,
    timestamp: AtomicU64,
    cluster_state_override: SpinMutex<Option<TestPowerState>>,
    sys_suspend_power_state: SpinMutex<Option<PsciCompositePowerState<TestPowerState>>>,
    _topology: PhantomData<T>,
}

impl<T: TestTopology> TestPlatform<T> {
    pub fn new() -> Self {
        Self {
            calls: SpinMutex::new(Vec::new()),
            fail_power_on: AtomicBool::new(false),
            deny_power_off: AtomicBool::new(false),
            pending_interrupt: AtomicBool::new(false),
            retained_storage: AtomicBool::new(false),
            retained_records: SpinMutex::new(vec![[0; RECORD_SIZE]; T::CORE_COUNT]),
            timestamp: AtomicU64::new(0),
            cluster_state_override: SpinMutex::new(None),
            sys_suspend_power_state: SpinMutex::new(None),
            _topology: PhantomData,
        }
    }

    /// Returns and clears the recorded hook calls.
    pub fn take_calls(&self) -> Vec<HookCall> {
        core::mem::take(&mut *self.calls.lock())
    }

    pub fn set_fail_power_on(&self, fail: bool) {
        self.fail_power_on.store(fail, Ordering::SeqCst);
    }

    /// Makes `power_domain_off_early` reject every `CPU_OFF` request.
    pub fn set_deny_power_off(&self, deny: bool) {
        self.deny_power_off.store(deny, Ordering::SeqCst);
    }

    pub fn set_pending_interrupt(&self, pending: bool) {
        self.pending_interrupt.store(pending, Ordering::SeqCst);
    }

    /// Makes the platform keep its own copy of the warm boot records.
    pub fn set_retained_storage(&self, enabled: bool) {
        self.retained_storage.store(enabled, Ordering::SeqCst);
    }

    /// Overwrites the kind of the retained warm boot record of a CPU with an invalid value.
    pub fn corrupt_retained_record(&self, cpu_index: usize) {
        self.retained_records.lock()[cpu_index][0..4].copy_from_slice(&[0xff; 4]);
    }

    /// Makes `coordinate_level` pick `state` for every cluster.
    pub fn set_cluster_state_override(&self, state: Option<TestPowerState>) {
        *self.cluster_state_override.lock() = state;
    }

    pub fn set_sys_suspend_power_state(&self, state: PsciCompositePowerState<TestPowerState>) {
        *self.sys_suspend_power_state.lock() = Some(state);
    }

    pub fn set_timestamp(&self, timestamp: u64) {
        self.timestamp.store(timestamp, Ordering::SeqCst);
    }

    fn record(&self, call: HookCall) {
        self.calls.lock().push(call);
    }
}

impl<T: TestTopology> Default for TestPlatform<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: TestTopology> PsciPlatformInterface for TestPlatform<T> {
    const CORE_COUNT: usize = T::CORE_COUNT;
    const MAX_POWER_LEVEL: usize = T::MAX_POWER_LEVEL;
    const FEATURES: PsciPlatformOptionalFeatures = PsciPlatformOptionalFeatures::all();

    type PlatformPowerState = TestPowerState;

    fn topology() -> &'static [usize] {
        T::TOPOLOGY
    }

    fn validate_power_state(
        power_state: PowerState,
    ) -> Option<PsciCompositePowerState<TestPowerState>> {
        let states = match power_state {
            PowerState::StandbyOrRetention(0) => [
                TestPowerState::Standby0,
                TestPowerState::On,
                TestPowerState::On,
                TestPowerState::On,
            ],
            PowerState::StandbyOrRetention(1) => [
                TestPowerState::Standby1,
                TestPowerState::Standby0,
                TestPowerState::On,
                TestPowerState::On,
            ],
            PowerState::StandbyOrRetention(2) => [
                TestPowerState::Standby2,
                TestPowerState::Standby1,
                TestPowerState::Standby0,
                TestPowerState::On,
            ],
            PowerState::PowerDown(0x3) => [
                TestPowerState::PowerDown,
                TestPowerState::On,
                TestPowerState::On,
                TestPowerState::On,
            ],
            PowerState::PowerDown(0x23) => [
                TestPowerState::PowerDown,
                TestPowerState::Standby2,
                TestPowerState::On,
                TestPowerState::On,
            ],
            PowerState::PowerDown(0x33) => [
                TestPowerState::PowerDown,
                TestPowerState::PowerDown,
                TestPowerState::On,
                TestPowerState::On,
            ],
            PowerState::PowerDown(0x333) => [
                TestPowerState::PowerDown,
                TestPowerState::PowerDown,
                TestPowerState::PowerDown,
                TestPowerState::On,
            ],
            PowerState::PowerDown(0x3333) => [TestPowerState::PowerDown; 4],
            _ => return None,
        };

        // States of levels the topology doesn't have are not supported.
        let (used, unused) = states.split_at(T::MAX_POWER_LEVEL + 1);
        if unused.iter().any(|state| *state != TestPowerState::On) {
            return None;
        }
        Some(PsciCompositePowerState::new(used))
    }

    fn validate_ns_entrypoint(&self, entry: &EntryPoint) -> bool {
        entry.entry_point_address() != 0
    }

    fn coordinate_level(
        &self,
        level: usize,
        requested_states: &[TestPowerState],
    ) -> TestPowerState {
        let shallowest = requested_states
            .iter()
            .copied()
            .min()
            .unwrap_or(TestPowerState::RUN);
        match *self.cluster_state_override.lock() {
            Some(state) if level == 1 => state,
            _ => shallowest,
        }
    }

    fn cpu_standby(&self, cpu_index: usize, cpu_state: TestPowerState) {
        self.record(HookCall::CpuStandby {
            cpu_index,
            state: cpu_state,
        });
    }

    fn power_domain_suspend(
        &self,
        cpu_index: usize,
        level: usize,
        _target_state: &PsciCompositePowerState<TestPowerState>,
    ) {
        self.record(HookCall::PowerDomainSuspend { cpu_index, level });
    }

    fn power_domain_suspend_finish(
        &self,
        cpu_index: usize,
        level: usize,
        _previous_state: &PsciCompositePowerState<TestPowerState>,
    ) {
        self.record(HookCall::PowerDomainSuspendFinish { cpu_index, level });
    }

    fn power_domain_off_early(&self, _cpu_index: usize) -> Result<(), PsciError> {
        if self.deny_power_off.load(Ordering::SeqCst) {
            return Err(PsciError::Denied);
        }
        Ok(())
    }

    fn power_domain_off(
        &self,
        cpu_index: usize,
        level: usize,
        target_state: &PsciCompositePowerState<TestPowerState>,
    ) {
        assert_eq!(target_state.cpu_level_state(), TestPowerState::PowerDown);
        self.record(HookCall::PowerDomainOff { cpu_index, level });
    }

    fn power_domain_power_down_wfi(
        &self,
        cpu_index: usize,
        _target_state: &PsciCompositePowerState<TestPowerState>,
    ) -> ! {
        self.record(HookCall::PowerDownWfi { cpu_index });
        panic!("{}", POWER_DOWN_WFI_MAGIC);
    }

    fn power_domain_on(&self, mpidr: Mpidr) -> Result<(), PsciError> {
        if self.fail_power_on.load(Ordering::SeqCst) {
            return Err(PsciError::InternalFailure);
        }
        self.record(HookCall::PowerDomainOn { mpidr });
        Ok(())
    }

    fn power_domain_on_finish(
        &self,
        cpu_index: usize,
        level: usize,
        _previous_state: &PsciCompositePowerState<TestPowerState>,
    ) {
        self.record(HookCall::PowerDomainOnFinish { cpu_index, level });
    }

    fn system_off(&self, cpu_index: usize) -> ! {
        self.record(HookCall::SystemOff { cpu_index });
        panic!("{}", SYSTEM_OFF_MAGIC);
    }

    fn system_reset(&self, cpu_index: usize) -> ! {
        self.record(HookCall::SystemReset { cpu_index });
        panic!("{}", SYSTEM_RESET_MAGIC);
    }

    fn sys_suspend_power_state(&self) -> PsciCompositePowerState<TestPowerState> {
        self.sys_suspend_power_state
            .lock()
            .clone()
            .unwrap_or_else(|| PsciCompositePowerState::off(T::MAX_POWER_LEVEL))
    }

    fn node_hw_state(&self, _mpidr: Mpidr, _power_level: usize) -> Result<HwState, PsciError> {
        Ok(HwState::Off)
    }

    fn has_pending_interrupts(&self, _cpu_index: usize) -> bool {
        self.pending_interrupt.load(Ordering::SeqCst)
    }

    fn timestamp(&self) -> u64 {
        self.timestamp.load(Ordering::SeqCst)
    }

    fn save_warm_boot_record(&self, cpu_index: usize, record: &WarmBootRecord) {
        if self.retained_storage.load(Ordering::SeqCst) {
            self.retained_records.lock()[cpu_index].copy_from_slice(record.as_bytes());
        }
    }

    fn load_warm_boot_record(&self, cpu_index: usize) -> Option<WarmBootRecord> {
        if !self.retained_storage.load(Ordering::SeqCst) {
            return None;
        }
        WarmBootRecord::read_from_bytes(&self.retained_records.lock()[cpu_index]).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topology_mpidrs() {
        assert_eq!(
            Mpidr {
                aff0: 3,
                aff1: 1,
                aff2: 1,
                aff3: Some(0)
            },
            FourLevelTopology::mpidr(12)
        );
        assert_eq!(
            Mpidr {
                aff0: 2,
                aff1: 0,
                aff2: 0,
                aff3: Some(0)
            },
            QuadCoreTopology::mpidr(2)
        );
    }

    #[test]
    fn power_states_truncated_to_topology() {
        assert_eq!(
            Some(PsciCompositePowerState::new(&[
                TestPowerState::PowerDown,
                TestPowerState::PowerDown
            ])),
            TestPlatform::<QuadCoreTopology>::validate_power_state(PowerState::PowerDown(0x33))
        );
        assert_eq!(
            None,
            TestPlatform::<QuadCoreTopology>::validate_power_state(PowerState::PowerDown(0x333))
        );
        assert_eq!(
            4,
            TestPlatform::<FourLevelTopology>::validate_power_state(PowerState::PowerDown(0x333))
                .map(|state| state.states().len())
                .unwrap_or_default()
        );
    }
}

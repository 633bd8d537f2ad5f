// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! PSCI operation handlers.
//!
//! Every handler receives the index of the calling CPU. Handlers which power down the calling CPU
//! do not return on success: the CPU continues in [`Psci::handle_cpu_boot`] once it is powered up
//! again.

use crate::{
    aarch64::wfi,
    config::DEBUG,
    coordinator::{LastManLevels, set_path_to_run},
    error::{FatalError, PsciError, fatal},
    platform::{
        CompositeState, PlatformPowerState, PlatformPowerStateInterface, PsciPlatformInterface,
        PsciPlatformOptionalFeatures,
    },
    power_domain_tree::{LockedPath, PowerDomainTree},
    spm::{PsciSpmInterface, ResidentTrustedOs},
    stats::StateStats,
    topology::{CPU_POWER_LEVEL, Topology},
    warm_boot::{WarmBootKind, WarmBootRecord},
};
use arm_psci::{
    AffinityInfo, EntryPoint, FeatureFlagsCpuSuspend, FunctionId, HwState, MigrateInfoType, Mpidr,
    PowerState,
};
use log::{debug, info, warn};
use spin::Once;

/// Main PSCI structure of the PSCI implementation that handles all the PSCI calls and stores the
/// the power state representation of each power domain.
pub struct Psci<P: PsciPlatformInterface> {
    platform: P,
    power_domain_tree: PowerDomainTree<PlatformPowerState<P>>,
    spm: Once<&'static dyn PsciSpmInterface>,
}

/// Where a suspend request comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SuspendRequest {
    Cpu,
    System,
}

impl<P: PsciPlatformInterface> Psci<P> {
    /// Initialises the PSCI state.
    ///
    /// This should be called exactly once on the boot CPU, before any other PSCI methods are
    /// called or any secondary CPUs are started.
    pub fn new(platform: P, boot_cpu_index: usize) -> Self {
        info!("Initializing PSCI");

        let topology = Topology::new(P::topology(), P::CORE_COUNT, P::MAX_POWER_LEVEL);
        let power_domain_tree = PowerDomainTree::new(topology);

        {
            // Init primary CPU
            let mut path = power_domain_tree.acquire_path(boot_cpu_index, P::MAX_POWER_LEVEL);
            let cpu = path.cpu_mut();
            cpu.lifecycle_mut().boot(boot_cpu_index);
            cpu.mark_booted();
            set_path_to_run(&mut path);
        }

        Self {
            platform,
            power_domain_tree,
            spm: Once::new(),
        }
    }

    /// Registers the hooks of the secure payload. Only the first registration takes effect.
    pub fn register_spm_hooks(&self, spm: &'static dyn PsciSpmInterface) {
        if self.spm.is_completed() {
            warn!("SPM hooks are already registered");
            return;
        }
        self.spm.call_once(|| spm);
    }

    /// Returns the platform implementation.
    pub fn platform(&self) -> &P {
        &self.platform
    }

    /// Returns the state of the power domains.
    pub fn power_domain_tree(&self) -> &PowerDomainTree<PlatformPowerState<P>> {
        &self.power_domain_tree
    }

    pub(crate) fn spm(&self) -> Option<&'static dyn PsciSpmInterface> {
        self.spm.get().copied()
    }

    fn topology(&self) -> &Topology {
        self.power_domain_tree.topology()
    }

    /// Checks whether any CPU other than the boot CPU has been started.
    pub fn secondaries_brought_up(&self) -> bool {
        self.power_domain_tree.secondaries_brought_up()
    }

    /// Prints the power domain nodes, one line each, parents before children.
    pub fn log_power_domain_map(&self) {
        let topology = self.topology();
        info!("PSCI power domain map:");

        for cpu_index in 0..topology.cpu_count() {
            let path = self
                .power_domain_tree
                .acquire_path(cpu_index, topology.max_level());

            // A domain is printed together with its first CPU.
            for node in path
                .ancestors()
                .rev()
                .filter(|node| node.cpu_range().start == cpu_index)
            {
                info!(
                    "  Domain Node : Level {}, parent {:?}, state {:?}, changes {}",
                    node.level(),
                    topology.domain(node.index()).parent,
                    node.local_state(),
                    node.generation()
                );
            }

            info!(
                "  CPU Node : MPID {:?}, parent {}, state {:?}, changes {}, affinity {:?}",
                topology.cpu(cpu_index).mpidr,
                path.cpu().parent(),
                path.cpu().local_state(),
                path.cpu().generation(),
                path.cpu().affinity_info()
            );
        }
    }

    /// Handles `CPU_SUSPEND` PSCI call by following the steps below.
    /// * If the a standby power state is requested which only affects the CPU level, the wait for
    ///   interrupts by calling `cpu_standby` and then return after an interrupt.
    /// * If a power down state is requested or a standby request affects higher levels, then call
    ///   `suspend_start`.
    pub fn cpu_suspend(
        &self,
        cpu_index: usize,
        power_state: PowerState,
        entry: EntryPoint,
    ) -> Result<(), PsciError> {
        debug!("CPU {cpu_index} CPU_SUSPEND {power_state:?}");

        let composite_state =
            P::validate_power_state(power_state).ok_or(PsciError::InvalidParameters)?;
        let is_power_down_state = matches!(power_state, PowerState::PowerDown(_));

        if composite_state.max_level() != P::MAX_POWER_LEVEL
            || !composite_state.is_valid_suspend_request(is_power_down_state)
        {
            warn!("Invalid composite state {composite_state:?} for {power_state:?}");
            return Err(PsciError::InvalidParameters);
        }

        let highest_affected_level = composite_state
            .find_highest_non_run_level()
            .ok_or(PsciError::InvalidParameters)?;

        if !is_power_down_state && highest_affected_level == CPU_POWER_LEVEL {
            // CPU standby which does not affect parent nodes
            self.cpu_standby(cpu_index, composite_state.cpu_level_state());
            return Ok(());
        }

        if is_power_down_state && !self.platform.validate_ns_entrypoint(&entry) {
            return Err(PsciError::InvalidAddress);
        }

        self.suspend_start(
            cpu_index,
            SuspendRequest::Cpu,
            entry,
            highest_affected_level,
            composite_state,
            is_power_down_state,
        )
    }

    fn cpu_standby(&self, cpu_index: usize, state: PlatformPowerState<P>) {
        {
            let mut path = self
                .power_domain_tree
                .acquire_path(cpu_index, CPU_POWER_LEVEL);
            let cpu = path.cpu_mut();
            cpu.set_local_state(state);
            cpu.stats_mut().enter(state, self.platform.timestamp());
        }

        // Start waiting for interrupts.
        self.platform.cpu_standby(cpu_index, state);
        // Continue execution after an interrupt woke up the CPU.

        let mut path = self
            .power_domain_tree
            .acquire_path(cpu_index, CPU_POWER_LEVEL);
        let cpu = path.cpu_mut();
        cpu.stats_mut().exit(self.platform.timestamp());
        cpu.set_local_state(<PlatformPowerState<P> as PlatformPowerStateInterface>::RUN);
    }

    /// Handles the common part of `CPU_SUSPEND` and `SYSTEM_SUSPEND` PSCI calls.
    ///
    /// The function follows the steps below.
    /// * Return immediately if there's a pending interrupt.
    /// * Otherwise determine the valid state for each level without violating any power domain
    ///   rules.
    /// * Request this power state from the platform layer (`power_domain_suspend`) for each level
    ///   where the CPU is the last man. This step does not trigger an immediate shutdown of the
    ///   power domain.
    /// * Power down the domain by calling `power_domain_power_down_wfi` if this is a power down
    ///   request. The function does not return after this point. When the CPU wakes up, the boot
    ///   code must call `handle_cpu_boot` that completes the power down suspend operation.
    /// * If the requested power state is a standby state, call a `WFI` and restore running state
    ///   after waking up by an interrupt.
    fn suspend_start(
        &self,
        cpu_index: usize,
        request: SuspendRequest,
        entry: EntryPoint,
        end_level: usize,
        mut composite_state: CompositeState<P>,
        is_power_down_state: bool,
    ) -> Result<(), PsciError> {
        let mut path = self.power_domain_tree.acquire_path(cpu_index, end_level);

        if self.platform.has_pending_interrupts(cpu_index) {
            debug!("CPU {cpu_index} has pending interrupts, not suspending");
            return Ok(());
        }

        let last_man = composite_state.coordinate(&self.platform, &mut path);

        if request == SuspendRequest::System && !last_man.is_last_man(end_level) {
            // A CPU came up since the caller checked the other CPUs.
            set_path_to_run(&mut path);
            return Err(PsciError::DeniedByTopology);
        }

        self.record_power_down_stats(&mut path, &last_man, &composite_state);

        if is_power_down_state {
            if let Some(spm) = self.spm() {
                spm.cpu_suspend(cpu_index, composite_state.max_off_level());
            }

            let record = WarmBootRecord::suspend(&entry, end_level);
            path.cpu_mut().set_warm_boot_record(record);
            self.platform.save_warm_boot_record(cpu_index, &record);
        }

        for level in last_man.levels() {
            self.platform
                .power_domain_suspend(cpu_index, level, &composite_state);
        }

        // Unlock the path before entering suspend state
        self.power_domain_tree.release_path(path);

        if is_power_down_state {
            self.platform
                .power_domain_power_down_wfi(cpu_index, &composite_state);
            // This branch does not return
        }

        // Go to suspend by waiting for interrupts.
        wfi();

        // Restore running state after wake-up.
        let mut path = self.power_domain_tree.acquire_path(cpu_index, end_level);
        self.finish_power_up(&mut path, WarmBootKind::Suspend);
        Ok(())
    }

    /// Records the entry into low power states of the domains this CPU is responsible for.
    fn record_power_down_stats(
        &self,
        path: &mut LockedPath<'_, PlatformPowerState<P>>,
        last_man: &LastManLevels,
        composite_state: &CompositeState<P>,
    ) {
        let timestamp = self.platform.timestamp();
        for level in last_man.levels() {
            let state = composite_state.state(level);
            if level == CPU_POWER_LEVEL {
                path.cpu_mut().stats_mut().enter(state, timestamp);
            } else {
                path.ancestor_mut(level).stats_mut().enter(state, timestamp);
            }
        }
    }

    /// Handles `CPU_OFF` PSCI call.
    /// On success, turns off the current CPU and does not return.
    pub fn cpu_off(&self, cpu_index: usize) -> Result<(), PsciError> {
        debug!("CPU {cpu_index} CPU_OFF");

        self.platform.power_domain_off_early(cpu_index)?;

        if let Some(spm) = self.spm() {
            spm.cpu_off(cpu_index).map_err(|error| {
                warn!("Secure payload denied CPU_OFF of CPU {cpu_index}: {error}");
                PsciError::Denied
            })?;
        }

        let max_level = self.topology().max_level();
        let mut composite_state = CompositeState::<P>::off(max_level);

        let mut path = self.power_domain_tree.acquire_path(cpu_index, max_level);
        let last_man = composite_state.coordinate(&self.platform, &mut path);
        self.record_power_down_stats(&mut path, &last_man, &composite_state);

        let cpu = path.cpu_mut();
        cpu.lifecycle_mut().commit_off(cpu_index);
        cpu.set_warm_boot_record(WarmBootRecord::COLD_BOOT);
        self.platform
            .save_warm_boot_record(cpu_index, &WarmBootRecord::COLD_BOOT);

        for level in last_man.levels() {
            self.platform
                .power_domain_off(cpu_index, level, &composite_state);
        }

        // Unlock the path before actually turning off the CPU
        self.power_domain_tree.release_path(path);

        self.platform
            .power_domain_power_down_wfi(cpu_index, &composite_state)
        // Does not return
    }

    /// Handles `CPU_ON` PSCI call by turning on the CPU identified by the given `target_cpu` MPIDR.
    /// The caller has to provide a valid non-secure entry point for the CPU.
    ///
    /// Returns once the platform started powering up the target, without waiting for it to boot.
    pub fn cpu_on(
        &self,
        cpu_index: usize,
        target_cpu: Mpidr,
        entry: EntryPoint,
    ) -> Result<(), PsciError> {
        debug!("CPU {cpu_index} CPU_ON {target_cpu:?}");

        let target_index = self
            .topology()
            .core_position(target_cpu)
            .map_err(|_| PsciError::InvalidParameters)?;

        if !self.platform.validate_ns_entrypoint(&entry) {
            return Err(PsciError::InvalidAddress);
        }

        let mut path = self
            .power_domain_tree
            .acquire_path(target_index, CPU_POWER_LEVEL);

        path.cpu_mut()
            .lifecycle_mut()
            .request_on()
            .inspect_err(|error| debug!("CPU_ON of CPU {target_index} rejected: {error}"))?;

        let record = WarmBootRecord::cpu_on(&entry);
        path.cpu_mut().set_warm_boot_record(record);
        self.platform.save_warm_boot_record(target_index, &record);

        if let Err(error) = self.platform.power_domain_on(target_cpu) {
            warn!("Failed to power on CPU {target_index}: {error}");
            let cpu = path.cpu_mut();
            cpu.lifecycle_mut().cancel_on(target_index);
            cpu.set_warm_boot_record(WarmBootRecord::COLD_BOOT);
            self.platform
                .save_warm_boot_record(target_index, &WarmBootRecord::COLD_BOOT);
            return Err(error);
        }

        Ok(())
    }

    /// Handles `AFFINITY_INFO` PSCI call.
    pub fn affinity_info(
        &self,
        target_affinity: Mpidr,
        lowest_affinity_level: usize,
    ) -> Result<AffinityInfo, PsciError> {
        let cpu_index = self
            .topology()
            .core_position(target_affinity)
            .map_err(|_| PsciError::InvalidParameters)?;

        if lowest_affinity_level > CPU_POWER_LEVEL {
            // We don't support levels higher than CPU_POWER_LEVEL.
            return Err(PsciError::InvalidParameters);
        }

        Ok(self
            .power_domain_tree
            .acquire_path(cpu_index, CPU_POWER_LEVEL)
            .cpu()
            .affinity_info())
    }

    /// Handles `SYSTEM_SUSPEND` PSCI call.
    /// Suspends system into RAM, does not return on success.
    pub fn system_suspend(&self, cpu_index: usize, entry: EntryPoint) -> Result<(), PsciError> {
        debug!("CPU {cpu_index} SYSTEM_SUSPEND");

        if !P::FEATURES.contains(PsciPlatformOptionalFeatures::SYSTEM_SUSPEND) {
            return Err(PsciError::NotSupported);
        }

        if !self.power_domain_tree.is_last_cpu(cpu_index) {
            debug!("SYSTEM_SUSPEND denied, other CPUs are on");
            return Err(PsciError::DeniedByTopology);
        }

        if !self.platform.validate_ns_entrypoint(&entry) {
            return Err(PsciError::InvalidAddress);
        }

        let max_level = self.topology().max_level();
        let composite_state = self.platform.sys_suspend_power_state();
        if composite_state.max_level() != max_level
            || composite_state.find_highest_power_down_level() != Some(max_level)
            || !composite_state.is_valid_suspend_request(true)
        {
            fatal(FatalError::InvalidPlatformPowerState);
        }

        self.suspend_start(
            cpu_index,
            SuspendRequest::System,
            entry,
            max_level,
            composite_state,
            true,
        )
    }

    /// Handles `SYSTEM_OFF` PSCI call.
    /// Turns off the system and does not return on success.
    pub fn system_off(&self, cpu_index: usize) -> Result<(), PsciError> {
        debug!("CPU {cpu_index} SYSTEM_OFF");

        if !self.power_domain_tree.is_last_cpu(cpu_index) {
            return Err(PsciError::DeniedByTopology);
        }

        if DEBUG {
            self.log_power_domain_map();
        }

        if let Some(spm) = self.spm() {
            spm.system_off();
        }
        self.platform.system_off(cpu_index)
    }

    /// Handles `SYSTEM_RESET` PSCI call.
    /// Resets the system and does not return on success.
    pub fn system_reset(&self, cpu_index: usize) -> Result<(), PsciError> {
        debug!("CPU {cpu_index} SYSTEM_RESET");

        if !self.power_domain_tree.is_last_cpu(cpu_index) {
            return Err(PsciError::DeniedByTopology);
        }

        if DEBUG {
            self.log_power_domain_map();
        }

        if let Some(spm) = self.spm() {
            spm.system_reset();
        }
        self.platform.system_reset(cpu_index)
    }

    /// Handles `PSCI_FEATURES` PSCI call.
    pub fn features(&self, function_id: FunctionId) -> Result<u64, PsciError> {
        const SUCCESS: u64 = 0;

        let check_optional_feature = |feature| {
            if P::FEATURES.contains(feature) {
                Ok(SUCCESS)
            } else {
                Err(PsciError::NotSupported)
            }
        };

        match function_id {
            // Mandatory features without feature flags
            FunctionId::PsciVersion
            | FunctionId::CpuOff
            | FunctionId::CpuOn32
            | FunctionId::CpuOn64
            | FunctionId::AffinityInfo32
            | FunctionId::AffinityInfo64
            | FunctionId::SystemOff
            | FunctionId::SystemReset
            | FunctionId::PsciFeatures
            | FunctionId::MigrateInfoType => Ok(SUCCESS),

            // CPU suspend features
            FunctionId::CpuSuspend32 | FunctionId::CpuSuspend64 => {
                let flags = FeatureFlagsCpuSuspend::EXTENDED_POWER_STATE;
                Ok(u32::from(flags).into())
            }

            // Migrate
            FunctionId::Migrate32
            | FunctionId::Migrate64
            | FunctionId::MigrateInfoUpCpu32
            | FunctionId::MigrateInfoUpCpu64 => {
                if self.spm().is_some() {
                    Ok(SUCCESS)
                } else {
                    Err(PsciError::NotSupported)
                }
            }

            FunctionId::NodeHwState32 | FunctionId::NodeHwState64 => {
                check_optional_feature(PsciPlatformOptionalFeatures::NODE_HW_STATE)
            }
            FunctionId::SystemSuspend32 | FunctionId::SystemSuspend64 => {
                check_optional_feature(PsciPlatformOptionalFeatures::SYSTEM_SUSPEND)
            }
            FunctionId::PsciStatResidency32
            | FunctionId::PsciStatResidency64
            | FunctionId::PsciStatCount32
            | FunctionId::PsciStatCount64 => {
                check_optional_feature(PsciPlatformOptionalFeatures::STAT)
            }

            _ => Err(PsciError::NotSupported),
        }
    }

    /// Handles `NODE_HW_STATE` PSCI call.
    pub fn node_hw_state(
        &self,
        target_cpu: Mpidr,
        power_level: usize,
    ) -> Result<HwState, PsciError> {
        if !P::FEATURES.contains(PsciPlatformOptionalFeatures::NODE_HW_STATE) {
            return Err(PsciError::NotSupported);
        }

        if self.topology().core_position(target_cpu).is_err()
            || power_level > self.topology().max_level()
        {
            return Err(PsciError::InvalidParameters);
        }

        self.platform.node_hw_state(target_cpu, power_level)
    }

    /// Handles `PSCI_STAT_RESIDENCY` PSCI call.
    pub fn stat_residency(
        &self,
        target_cpu: Mpidr,
        power_state: PowerState,
    ) -> Result<u64, PsciError> {
        Ok(self.state_stats(target_cpu, power_state)?.residency)
    }

    /// Handles `PSCI_STAT_COUNT` PSCI call.
    pub fn stat_count(&self, target_cpu: Mpidr, power_state: PowerState) -> Result<u64, PsciError> {
        Ok(self.state_stats(target_cpu, power_state)?.count)
    }

    /// Reads the statistics of the highest level affected by `power_state`, in the domain of
    /// that level which contains `target_cpu`.
    fn state_stats(
        &self,
        target_cpu: Mpidr,
        power_state: PowerState,
    ) -> Result<StateStats, PsciError> {
        if !P::FEATURES.contains(PsciPlatformOptionalFeatures::STAT) {
            return Err(PsciError::NotSupported);
        }

        let cpu_index = self
            .topology()
            .core_position(target_cpu)
            .map_err(|_| PsciError::InvalidParameters)?;

        let composite_state =
            P::validate_power_state(power_state).ok_or(PsciError::InvalidParameters)?;
        let is_power_down_state = matches!(power_state, PowerState::PowerDown(_));
        if composite_state.max_level() != P::MAX_POWER_LEVEL
            || !composite_state.is_valid_suspend_request(is_power_down_state)
        {
            return Err(PsciError::InvalidParameters);
        }

        let level = composite_state
            .find_highest_non_run_level()
            .ok_or(PsciError::InvalidParameters)?;
        let state = composite_state.state(level);

        let path = self.power_domain_tree.acquire_path(cpu_index, level);
        Ok(if level == CPU_POWER_LEVEL {
            path.cpu().stats().get(state)
        } else {
            path.ancestor(level).stats().get(state)
        })
    }

    /// Handles `MIGRATE` PSCI call, moving a uniprocessor trusted OS from the calling CPU to
    /// `target_cpu`.
    pub fn migrate(&self, cpu_index: usize, target_cpu: Mpidr) -> Result<(), PsciError> {
        let spm = self.spm().ok_or(PsciError::NotSupported)?;

        let resident_cpu = match spm.migrate_info() {
            ResidentTrustedOs::UpMigrateCapable(mpidr) => mpidr,
            ResidentTrustedOs::UpNotMigrateCapable(_) => return Err(PsciError::Denied),
            ResidentTrustedOs::NotPresentOrMultiprocessor => return Err(PsciError::NotSupported),
        };

        // Migrate should only be invoked on the CPU where the trusted OS is resident.
        if self.topology().core_position(resident_cpu) != Ok(cpu_index) {
            return Err(PsciError::NotPresent);
        }

        self.topology()
            .core_position(target_cpu)
            .map_err(|_| PsciError::InvalidParameters)?;

        spm.migrate(cpu_index, target_cpu)
    }

    /// Handles `MIGRATE_INFO_TYPE` PSCI call.
    pub fn migrate_info_type(&self) -> MigrateInfoType {
        self.resident_trusted_os().info_type()
    }

    /// Handles `MIGRATE_INFO_UP_CPU` PSCI call.
    pub fn migrate_info_up_cpu(&self) -> Result<Mpidr, PsciError> {
        self.resident_trusted_os()
            .resident_cpu()
            .ok_or(PsciError::InvalidParameters)
    }

    fn resident_trusted_os(&self) -> ResidentTrustedOs {
        self.spm()
            .map(|spm| spm.migrate_info())
            .unwrap_or(ResidentTrustedOs::NotPresentOrMultiprocessor)
    }
}

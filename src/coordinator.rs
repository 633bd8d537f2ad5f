// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Composite power states and the last man calculation.

use crate::{
    config::POWER_LEVEL_COUNT_LIMIT,
    error::{FatalError, fatal},
    platform::{PlatformPowerStateInterface, PowerStateType, PsciPlatformInterface},
    power_domain_tree::LockedPath,
    topology::CPU_POWER_LEVEL,
};
use arrayvec::ArrayVec;

/// Object for storing platform-specific power state for multiple power levels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PsciCompositePowerState<S> {
    states: ArrayVec<S, POWER_LEVEL_COUNT_LIMIT>,
}

impl<S: PlatformPowerStateInterface> PsciCompositePowerState<S> {
    /// Power level of the CPUs.
    pub const CPU_POWER_LEVEL: usize = CPU_POWER_LEVEL;

    /// Creates a composite state from the states of levels `0..=max_level`.
    ///
    /// Panics if there are more levels than the engine supports.
    pub fn new(states: &[S]) -> Self {
        Self {
            states: states.iter().copied().collect(),
        }
    }

    /// States set to `state` on all levels up to `max_level`.
    pub fn uniform(state: S, max_level: usize) -> Self {
        Self {
            states: (0..=max_level).map(|_| state).collect(),
        }
    }

    /// States set to OFF on all levels.
    pub fn off(max_level: usize) -> Self {
        Self::uniform(S::OFF, max_level)
    }

    /// States set to RUN on all levels.
    pub fn run(max_level: usize) -> Self {
        Self::uniform(S::RUN, max_level)
    }

    /// Highest level described by the composite state.
    pub fn max_level(&self) -> usize {
        self.states
            .len()
            .checked_sub(1)
            .unwrap_or_else(|| fatal(FatalError::EmptyCompositePowerState))
    }

    /// Returns the power state of a level.
    pub fn state(&self, level: usize) -> S {
        self.states[level]
    }

    /// Sets the power state of a level.
    pub fn set_state(&mut self, level: usize, state: S) {
        self.states[level] = state;
    }

    /// Power states of all levels starting from the CPU level.
    pub fn states(&self) -> &[S] {
        &self.states
    }

    /// Returns the power state of the CPU level.
    pub fn cpu_level_state(&self) -> S {
        self.states[Self::CPU_POWER_LEVEL]
    }

    /// Returns the power state of the highest level of the topology.
    pub fn highest_level_state(&self) -> S {
        self.states[self.max_level()]
    }

    /// Find the highest power level which is not set to running state.
    pub fn find_highest_non_run_level(&self) -> Option<usize> {
        self.states
            .iter()
            .rposition(|state| state.power_state_type() != PowerStateType::Run)
    }

    /// Find the highest power level which is set to power down state.
    pub fn find_highest_power_down_level(&self) -> Option<usize> {
        self.states
            .iter()
            .rposition(|state| state.power_state_type() == PowerStateType::PowerDown)
    }

    /// Highest level which loses its context, the CPU level if none of them does.
    pub fn max_off_level(&self) -> usize {
        self.find_highest_power_down_level()
            .unwrap_or(Self::CPU_POWER_LEVEL)
    }

    /// Levels whose domains left the running state: the CPU level and every level above it
    /// which is not running. Ascending order.
    pub fn affected_levels(&self) -> impl DoubleEndedIterator<Item = usize> + '_ {
        self.states
            .iter()
            .enumerate()
            .filter(|&(level, state)| level == Self::CPU_POWER_LEVEL || *state != S::RUN)
            .map(|(level, _)| level)
    }

    /// Fill the structure with the current local states of the nodes of the locked path. Levels
    /// above the path are set to running.
    pub fn set_local_states_from_path(&mut self, path: &LockedPath<'_, S>) {
        self.states.fill(S::RUN);
        self.states[Self::CPU_POWER_LEVEL] = path.cpu().local_state();

        for (node, state) in path
            .ancestors()
            .zip(&mut self.states[Self::CPU_POWER_LEVEL + 1..])
        {
            *state = node.local_state();
        }
    }

    /// Requests the power state for all locked ancestor nodes and sets the coordinated local
    /// state of each node.
    ///
    /// Each non-CPU power node keeps the states requested by its descendant CPUs. A node cannot
    /// go deeper than the shallowest of these, and once a level has to keep running every level
    /// above it keeps running too. The result replaces the requested states in `self`.
    ///
    /// The returned levels are the ones where the calling CPU is the last one to go down, and so
    /// the one responsible for the power down sequence of that level.
    pub fn coordinate<P>(&mut self, platform: &P, path: &mut LockedPath<'_, S>) -> LastManLevels
    where
        P: PsciPlatformInterface<PlatformPowerState = S>,
    {
        let cpu_index = path.cpu_index();
        let mut last_man = LastManLevels::cpu_only();
        let mut higher_levels_are_run = false;

        for (node, state) in path
            .ancestors_mut()
            .zip(&mut self.states[Self::CPU_POWER_LEVEL + 1..])
        {
            node.set_requested_power_state(cpu_index, *state);

            if higher_levels_are_run {
                // A lower level keeps running, so this one has to as well.
                *state = S::RUN;
            } else {
                let shallowest = node.shallowest_requested_state();
                *state = platform
                    .coordinate_level(node.level(), node.requested_states())
                    .min(shallowest);

                if *state == S::RUN {
                    higher_levels_are_run = true;
                } else {
                    last_man.set(node.level());
                }
            }

            node.set_local_state(*state);
        }

        path.cpu_mut().set_local_state(self.cpu_level_state());
        last_man
    }

    /// Checks that the composite state does not violate any PSCI rules.
    pub fn is_valid_suspend_request(&self, is_power_down_state: bool) -> bool {
        // There should be a non-run level
        if self.find_highest_non_run_level().is_none() {
            return false;
        };

        // Higher levels must be in less than or equal power state
        if !self.states.is_sorted_by(|a, b| a >= b) {
            return false;
        }

        if is_power_down_state {
            // There must be a power down state
            self.find_highest_power_down_level().is_some()
        } else {
            // Retention state, there should not be a power state on any level
            self.find_highest_power_down_level().is_none()
        }
    }
}

/// Sets the CPU and every locked ancestor back to running, withdrawing the CPU's request for a
/// low power state.
pub fn set_path_to_run<S: PlatformPowerStateInterface>(path: &mut LockedPath<'_, S>) {
    let cpu_index = path.cpu_index();
    for node in path.ancestors_mut() {
        node.set_requested_power_state(cpu_index, S::RUN);
        node.set_local_state(S::RUN);
    }
    path.cpu_mut().set_local_state(S::RUN);
}

/// Per level flags telling whether the coordinating CPU is the last man of the level.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LastManLevels {
    levels: [bool; POWER_LEVEL_COUNT_LIMIT],
}

impl LastManLevels {
    /// A CPU is always responsible for its own power domain.
    fn cpu_only() -> Self {
        let mut levels = [false; POWER_LEVEL_COUNT_LIMIT];
        levels[CPU_POWER_LEVEL] = true;
        Self { levels }
    }

    fn set(&mut self, level: usize) {
        self.levels[level] = true;
    }

    /// Checks whether the CPU is the last man at `level`.
    pub fn is_last_man(&self, level: usize) -> bool {
        self.levels.get(level).copied().unwrap_or(false)
    }

    /// Levels where the CPU is the last man, in ascending order.
    pub fn levels(&self) -> impl DoubleEndedIterator<Item = usize> + '_ {
        self.levels
            .iter()
            .enumerate()
            .filter(|&(_, last_man)| *last_man)
            .map(|(level, _)| level)
    }
}

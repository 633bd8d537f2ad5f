// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Collection of structures for storing the mutable state of the power domain tree.

mod lock_manager;

pub use lock_manager::{LockEvent, LockedPath};
#[cfg(test)]
pub(crate) use lock_manager::trace;

use crate::{
    config::{MAX_CORE_COUNT, MAX_NON_CPU_DOMAINS},
    lifecycle::CpuLifecycle,
    platform::PlatformPowerStateInterface,
    stats::PowerStats,
    topology::{CPU_POWER_LEVEL, DomainLayout, Topology},
    warm_boot::WarmBootRecord,
};
use arm_psci::AffinityInfo;
use arrayvec::ArrayVec;
use core::{
    fmt::{self, Debug, Formatter},
    ops::Range,
};
use spin::mutex::SpinMutex;

/// Represents a non-CPU power domain node in the power domain tree.
#[derive(Debug)]
pub struct NonCpuPowerNode<S> {
    /// Index of the node in the non-CPU node arena
    index: usize,
    /// Affinity level of the node
    level: usize,
    /// Parent node index or None if it is the top level node
    parent: Option<usize>,
    /// Local power state of the node
    local_state: S,
    /// Number of local state changes
    generation: u32,
    /// Range of descendant CPU indices
    cpu_range: Range<usize>,
    /// Requested power state of each descendant CPU at the level of this node
    requested_states: ArrayVec<S, MAX_CORE_COUNT>,
    stats: PowerStats<S>,
}

impl<S: PlatformPowerStateInterface> NonCpuPowerNode<S> {
    /// Creates the node of a domain, every descendant CPU requesting `OFF`.
    pub fn new(index: usize, layout: &DomainLayout) -> Self {
        Self {
            index,
            level: layout.level,
            parent: layout.parent,
            local_state: S::OFF,
            generation: 0,
            cpu_range: layout.cpu_range.clone(),
            requested_states: layout.cpu_range.clone().map(|_| S::OFF).collect(),
            stats: PowerStats::new(),
        }
    }

    /// Index of the node in the non-CPU node arena.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Affinity level of the node.
    pub fn level(&self) -> usize {
        self.level
    }

    /// Range of the descendant CPU indices.
    pub fn cpu_range(&self) -> Range<usize> {
        self.cpu_range.clone()
    }

    /// Store the requested power state of a descendant CPU node.
    pub fn set_requested_power_state(&mut self, cpu_index: usize, state: S) {
        assert!(self.cpu_range.contains(&cpu_index));
        self.requested_states[cpu_index - self.cpu_range.start] = state;
    }

    /// Returns the power state requested by a descendant CPU node.
    pub fn requested_power_state(&self, cpu_index: usize) -> S {
        assert!(self.cpu_range.contains(&cpu_index));
        self.requested_states[cpu_index - self.cpu_range.start]
    }

    /// Requested power states of all descendant CPUs, in CPU index order.
    pub fn requested_states(&self) -> &[S] {
        &self.requested_states
    }

    /// The deepest state the node may enter while still meeting the power requirements of its
    /// descendant CPU nodes. Smaller power state values represent shallower power states, so this
    /// is the minimal requested state.
    pub fn shallowest_requested_state(&self) -> S {
        self.requested_states
            .iter()
            .copied()
            .min()
            .unwrap_or(S::RUN)
    }

    /// Get local power state of the node.
    pub fn local_state(&self) -> S {
        self.local_state
    }

    /// Set local power state of the node.
    pub fn set_local_state(&mut self, local_state: S) {
        if self.local_state != local_state {
            self.local_state = local_state;
            self.generation = self.generation.wrapping_add(1);
        }
    }

    /// Number of local state changes since the tree was created.
    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Statistics of the node.
    pub fn stats(&self) -> &PowerStats<S> {
        &self.stats
    }

    /// Mutable statistics of the node.
    pub fn stats_mut(&mut self) -> &mut PowerStats<S> {
        &mut self.stats
    }
}

/// Represents a CPU power domain node in the power domain tree.
#[derive(Debug)]
pub struct CpuPowerNode<S> {
    /// Parent non-CPU power node index
    parent: usize,
    /// Affinity info state machine of the CPU
    lifecycle: CpuLifecycle,
    /// Local power state of the CPU node
    local_state: S,
    /// Number of local state changes
    generation: u32,
    /// Whether the CPU has ever been running
    has_booted: bool,
    /// Reason and entry point of the next warm boot
    warm_boot: WarmBootRecord,
    stats: PowerStats<S>,
}

impl<S: PlatformPowerStateInterface> CpuPowerNode<S> {
    /// Creates the node of a CPU which is off.
    pub fn new(parent: usize) -> Self {
        Self {
            parent,
            lifecycle: CpuLifecycle::new(),
            local_state: S::OFF,
            generation: 0,
            has_booted: false,
            warm_boot: WarmBootRecord::COLD_BOOT,
            stats: PowerStats::new(),
        }
    }

    /// Index of the level 1 node containing the CPU.
    pub fn parent(&self) -> usize {
        self.parent
    }

    /// Get affinity info of the CPU.
    pub fn affinity_info(&self) -> AffinityInfo {
        self.lifecycle.state()
    }

    /// Affinity info state machine of the CPU.
    pub fn lifecycle_mut(&mut self) -> &mut CpuLifecycle {
        &mut self.lifecycle
    }

    /// Get local state of the CPU.
    pub fn local_state(&self) -> S {
        self.local_state
    }

    /// Set local state of the CPU.
    pub fn set_local_state(&mut self, local_state: S) {
        if self.local_state != local_state {
            self.local_state = local_state;
            self.generation = self.generation.wrapping_add(1);
        }
    }

    /// Number of local state changes since the tree was created.
    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Whether the CPU has ever been running.
    pub fn has_booted(&self) -> bool {
        self.has_booted
    }

    /// Notes that the CPU is running.
    pub fn mark_booted(&mut self) {
        self.has_booted = true;
    }

    /// Warm boot record of the CPU.
    pub fn warm_boot_record(&self) -> &WarmBootRecord {
        &self.warm_boot
    }

    /// Replaces the warm boot record of the CPU.
    pub fn set_warm_boot_record(&mut self, record: WarmBootRecord) {
        self.warm_boot = record;
    }

    /// Statistics of the CPU power domain.
    pub fn stats(&self) -> &PowerStats<S> {
        &self.stats
    }

    /// Mutable statistics of the CPU power domain.
    pub fn stats_mut(&mut self) -> &mut PowerStats<S> {
        &mut self.stats
    }
}

/// The PowerDomainTree is responsible for storing the non-CPU and CPU power nodes. The nodes can
/// only be accessed through a [`LockedPath`].
pub struct PowerDomainTree<S> {
    topology: Topology,
    non_cpu_power_nodes: ArrayVec<SpinMutex<NonCpuPowerNode<S>>, MAX_NON_CPU_DOMAINS>,
    cpu_power_nodes: ArrayVec<SpinMutex<CpuPowerNode<S>>, MAX_CORE_COUNT>,
}

impl<S: PlatformPowerStateInterface> PowerDomainTree<S> {
    /// Creates the nodes of every domain described by the topology. Every domain starts in the
    /// `OFF` state.
    pub fn new(topology: Topology) -> Self {
        let non_cpu_power_nodes = (0..topology.domain_count())
            .map(|index| SpinMutex::new(NonCpuPowerNode::new(index, topology.domain(index))))
            .collect();
        let cpu_power_nodes = (0..topology.cpu_count())
            .map(|cpu_index| SpinMutex::new(CpuPowerNode::new(topology.cpu(cpu_index).parent)))
            .collect();

        Self {
            topology,
            non_cpu_power_nodes,
            cpu_power_nodes,
        }
    }

    /// Returns the static layout of the tree.
    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    /// Check if a given CPU is the only CPU in the system which is not off.
    ///
    /// Each CPU is locked on its own, so the result is only stable if no other CPU can issue a
    /// `CPU_ON` in the meantime.
    pub fn is_last_cpu(&self, cpu_index: usize) -> bool {
        (0..self.cpu_power_nodes.len())
            .filter(|&index| index != cpu_index)
            .all(|index| {
                self.acquire_path(index, CPU_POWER_LEVEL).cpu().affinity_info()
                    == AffinityInfo::Off
            })
    }

    /// Checks whether any CPU other than the boot CPU has ever been running.
    pub fn secondaries_brought_up(&self) -> bool {
        let booted = (0..self.cpu_power_nodes.len())
            .filter(|&index| self.acquire_path(index, CPU_POWER_LEVEL).cpu().has_booted())
            .count();
        booted > 1
    }
}

impl<S: PlatformPowerStateInterface> Debug for PowerDomainTree<S> {
    /// Outputs the tree in Graphviz DOT format.
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        writeln!(f, "digraph {{")?;
        for (index, ncpu) in self.non_cpu_power_nodes.iter().enumerate() {
            if let Some(nc) = ncpu.try_lock() {
                writeln!(
                    f,
                    "NC{index} [label=\"level {} {:?}\"]",
                    nc.level, nc.local_state
                )?;
                if let Some(parent) = nc.parent {
                    writeln!(f, "NC{parent} -> NC{index}")?;
                }
            } else {
                writeln!(f, "NC{index} [label=\"NonCpuPowerNode is locked\"]")?;
            }
        }

        for (index, cpu) in self.cpu_power_nodes.iter().enumerate() {
            if let Some(c) = cpu.try_lock() {
                writeln!(
                    f,
                    "C{index} [label=\"{:?} {:?}\"]",
                    c.affinity_info(),
                    c.local_state
                )?;
                writeln!(f, "NC{} -> C{}", c.parent, index)?;
            } else {
                writeln!(f, "C{index} [label=\"CpuPowerNode is locked\"]")?;
            }
        }

        writeln!(f, "}}")?;

        Ok(())
    }
}
